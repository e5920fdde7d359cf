//! HTTP adapters for the photo API.
//!
//! [`UnsplashClient`] implements both page fetchers; [`HttpImageFetcher`]
//! downloads thumbnails and [`CachedImageFetcher`] keeps recent ones in memory.
mod client;
mod dto;
mod images;
mod token;

pub use client::{RetryPolicy, UnsplashClient};
pub use images::{CachedImageFetcher, HttpImageFetcher};
pub use token::{EnvToken, StaticToken, TokenProvider};
