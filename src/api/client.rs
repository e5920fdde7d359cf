use super::dto::{into_records, LikeResponseDto, PhotoDto, SearchResponseDto};
use super::token::TokenProvider;
use crate::config::Config;
use crate::error::TransportError;
use crate::fetchers::{DataFetcher, LikedPhotosFetcher, PhotoLiker, SearchFetcher};
use crate::model::PhotoRecord;
use futures::StreamExt;
use reqwest::Method;
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Limit for JSON page bodies.
const MAX_PAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Retry behaviour shared by the API and image adapters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    /// First backoff delay; doubles on each retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.request_timeout_secs),
            max_retries: config.max_retries,
            ..Self::default()
        }
    }
}

/// Sends the request built by `build` and returns its size-limited body.
///
/// Timeouts, connection errors, 5xx and 429 responses are retried with
/// exponential backoff; any other non-2xx status fails immediately.
pub(crate) async fn get_bytes<B>(
    build: B,
    retry: RetryPolicy,
    limit: usize,
) -> Result<Vec<u8>, TransportError>
where
    B: Fn() -> Result<reqwest::RequestBuilder, TransportError>,
{
    let mut retry_count = 0;

    loop {
        let attempt = async {
            let response = tokio::time::timeout(retry.timeout, build()?.send())
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(TransportError::Network)?;

            if !response.status().is_success() {
                return Err(TransportError::HttpStatus(response.status().as_u16()));
            }
            read_limited_bytes(response, limit).await
        };

        match attempt.await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_retryable() && retry_count < retry.max_retries => {
                let delay = retry.base_delay * 2u32.pow(retry_count);
                tracing::warn!(
                    error = %e,
                    retry = retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Transient request failure, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(TransportError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(TransportError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(TransportError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

/// Rejects non-HTTPS base URLs so the bearer token is never sent in clear text.
/// Plain HTTP is accepted for localhost (test servers).
pub(crate) fn parse_base_url(base: &str) -> Result<Url, TransportError> {
    let url = Url::parse(base).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if matches!(url.host_str(), Some("127.0.0.1") | Some("localhost")) => {
            tracing::warn!(base_url = %url, "Using non-HTTPS API base URL (localhost only)");
            Ok(url)
        }
        _ => {
            tracing::error!(base_url = %url, "Rejecting non-HTTPS base URL");
            Err(TransportError::InsecureBaseUrl)
        }
    }
}

/// Feed, search and liked-photo pages from the photo API, plus like writes.
pub struct UnsplashClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
}

impl UnsplashClient {
    /// # Errors
    ///
    /// [`TransportError::InvalidUrl`] or [`TransportError::InsecureBaseUrl`] for
    /// an unusable `base_url`.
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        tokens: Arc<dyn TokenProvider>,
        retry: RetryPolicy,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            http,
            base_url: parse_base_url(base_url)?,
            tokens,
            retry,
        })
    }

    fn endpoint(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn send_json<T>(&self, method: Method, url: Url) -> Result<T, TransportError>
    where
        T: serde::de::DeserializeOwned,
    {
        let build = || -> Result<reqwest::RequestBuilder, TransportError> {
            let token = self.tokens.access_token()?;
            Ok(self
                .http
                .request(method.clone(), url.clone())
                .header("Authorization", format!("Bearer {}", token.expose_secret()))
                .header("Accept-Version", "v1")
                .header("Accept", "application/json"))
        };

        let bytes = get_bytes(build, self.retry, MAX_PAGE_SIZE).await?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn write_like(&self, method: Method, photo_id: &str) -> Result<PhotoRecord, TransportError> {
        let url = self.endpoint(&["photos", photo_id, "like"], &[])?;
        tracing::debug!(photo_id, method = %method, "Sending like write");
        let response: LikeResponseDto = self.send_json(method, url).await?;
        PhotoRecord::try_from(response.into_photo())
            .map_err(|e| TransportError::Decode(format!("invalid created_at: {e}")))
    }
}

#[async_trait::async_trait]
impl DataFetcher for UnsplashClient {
    async fn fetch_page(
        &self,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<PhotoRecord>, TransportError> {
        let url = self.endpoint(
            &["photos"],
            &[("page", page.to_string()), ("per_page", per_page.to_string())],
        )?;
        tracing::debug!(page, per_page, "Fetching feed page");
        let dtos: Vec<PhotoDto> = self.send_json(Method::GET, url).await?;
        Ok(into_records(dtos))
    }
}

#[async_trait::async_trait]
impl SearchFetcher for UnsplashClient {
    async fn search_page(
        &self,
        page: usize,
        per_page: usize,
        query: &str,
    ) -> Result<Vec<PhotoRecord>, TransportError> {
        let url = self.endpoint(
            &["search", "photos"],
            &[
                ("query", query.to_string()),
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ],
        )?;
        tracing::debug!(page, per_page, query, "Fetching search page");
        let response: SearchResponseDto = self.send_json(Method::GET, url).await?;
        Ok(into_records(response.results))
    }
}

#[async_trait::async_trait]
impl LikedPhotosFetcher for UnsplashClient {
    async fn fetch_liked_page(
        &self,
        page: usize,
        per_page: usize,
        username: &str,
    ) -> Result<Vec<PhotoRecord>, TransportError> {
        let url = self.endpoint(
            &["users", username, "likes"],
            &[("page", page.to_string()), ("per_page", per_page.to_string())],
        )?;
        tracing::debug!(page, per_page, username, "Fetching liked photos page");
        let dtos: Vec<PhotoDto> = self.send_json(Method::GET, url).await?;
        Ok(into_records(dtos))
    }
}

#[async_trait::async_trait]
impl PhotoLiker for UnsplashClient {
    async fn like(&self, photo_id: &str) -> Result<PhotoRecord, TransportError> {
        self.write_like(Method::POST, photo_id).await
    }

    async fn unlike(&self, photo_id: &str) -> Result<PhotoRecord, TransportError> {
        self.write_like(Method::DELETE, photo_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::token::StaticToken;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PHOTO_JSON: &str = r#"{
        "id": "p1",
        "likes": 3,
        "liked_by_user": false,
        "created_at": "2025-10-19T16:05:00Z",
        "description": null,
        "urls": { "small": "https://img.example.com/p1-s", "full": "https://img.example.com/p1-f" }
    }"#;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(5),
            max_retries: 3,
            base_delay: Duration::from_millis(10),
        }
    }

    fn client(server: &MockServer) -> UnsplashClient {
        UnsplashClient::new(
            reqwest::Client::new(),
            &server.uri(),
            Arc::new(StaticToken::new("test-token")),
            fast_retry(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_page_sends_auth_and_pagination() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photos"))
            .and(query_param("page", "2"))
            .and(query_param("per_page", "20"))
            .and(header("Authorization", "Bearer test-token"))
            .and(header("Accept-Version", "v1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("[{PHOTO_JSON}]")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let records = client(&mock_server).fetch_page(2, 20).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "p1");
    }

    #[tokio::test]
    async fn test_search_page_unwraps_results() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/photos"))
            .and(query_param("query", "red fox"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!(r#"{{"total": 1, "results": [{PHOTO_JSON}]}}"#)),
            )
            .mount(&mock_server)
            .await;

        let records = client(&mock_server)
            .search_page(1, 20, "red fox")
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].urls.small, "https://img.example.com/p1-s");
    }

    #[tokio::test]
    async fn test_fetch_liked_page_uses_user_path() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/ana/likes"))
            .and(query_param("page", "3"))
            .and(query_param("per_page", "10"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("[{PHOTO_JSON}]")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let records = client(&mock_server)
            .fetch_liked_page(3, 10, "ana")
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "p1");
    }

    #[tokio::test]
    async fn test_like_and_unlike_return_updated_record() {
        let mock_server = MockServer::start().await;
        let liked = PHOTO_JSON
            .replace(r#""likes": 3"#, r#""likes": 4"#)
            .replace(r#""liked_by_user": false"#, r#""liked_by_user": true"#);
        Mock::given(method("POST"))
            .and(path("/photos/p1/like"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_string(format!(r#"{{"photo": {liked}, "user": {{"username": "ana"}}}}"#)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/photos/p1/like"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!(r#"{{"photo": {PHOTO_JSON}, "user": {{"username": "ana"}}}}"#)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client(&mock_server);
        let record = client.like("p1").await.unwrap();
        assert_eq!(record.likes, 4);
        assert!(record.liked_by_user);

        let record = client.unlike("p1").await.unwrap();
        assert_eq!(record.likes, 3);
        assert!(!record.liked_by_user);
    }

    #[tokio::test]
    async fn test_like_with_bad_timestamp_is_decode_error() {
        let mock_server = MockServer::start().await;
        let broken = PHOTO_JSON.replace("2025-10-19T16:05:00Z", "yesterday");
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_string(broken))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server).like("p1").await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn test_http_404_fails_without_retry() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = client(&mock_server).fetch_page(1, 20).await.unwrap_err();
        assert!(matches!(err, TransportError::HttpStatus(404)));
    }

    #[tokio::test]
    async fn test_http_500_retries_then_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&mock_server)
            .await;

        let err = client(&mock_server).fetch_page(1, 20).await.unwrap_err();
        assert!(matches!(err, TransportError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn test_http_503_retry_then_success() {
        use wiremock::matchers::any;

        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&mock_server)
            .await;

        let records = client(&mock_server).fetch_page(1, 20).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_is_decode_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server).fetch_page(1, 20).await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_request() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(0)
            .mount(&mock_server)
            .await;

        let client = UnsplashClient::new(
            reqwest::Client::new(),
            &mock_server.uri(),
            Arc::new(crate::api::token::EnvToken::new(
                "PHOTOFEED_TEST_TOKEN_UNSET",
                None,
            )),
            fast_retry(),
        )
        .unwrap();
        let err = client.fetch_page(1, 20).await.unwrap_err();
        assert!(matches!(err, TransportError::MissingToken));
    }

    #[test]
    fn test_http_base_url_rejected() {
        assert!(matches!(
            parse_base_url("http://evil.com"),
            Err(TransportError::InsecureBaseUrl)
        ));
        assert!(parse_base_url("http://127.0.0.1:8080").is_ok());
        assert!(parse_base_url("https://api.example.com").is_ok());
        assert!(matches!(
            parse_base_url("not a url"),
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
