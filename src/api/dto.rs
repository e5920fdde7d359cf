//! Wire shapes of the photo API and their conversion into [`PhotoRecord`]s.
use crate::model::{PhotoRecord, PhotoUrls};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct PhotoDto {
    pub id: String,
    pub likes: u32,
    #[serde(default)]
    pub liked_by_user: bool,
    pub created_at: String,
    /// Null for most photos.
    pub description: Option<String>,
    pub urls: UrlsDto,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UrlsDto {
    pub small: String,
    pub full: String,
}

/// `GET /search/photos` wraps its page in an object.
#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponseDto {
    pub results: Vec<PhotoDto>,
}

/// `POST`/`DELETE /photos/{id}/like` answer. The API nests the photo next to
/// the user; a bare photo object is accepted as well.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum LikeResponseDto {
    Wrapped { photo: PhotoDto },
    Bare(PhotoDto),
}

impl LikeResponseDto {
    pub fn into_photo(self) -> PhotoDto {
        match self {
            LikeResponseDto::Wrapped { photo } | LikeResponseDto::Bare(photo) => photo,
        }
    }
}

impl TryFrom<PhotoDto> for PhotoRecord {
    type Error = chrono::ParseError;

    fn try_from(dto: PhotoDto) -> Result<Self, Self::Error> {
        let created_at = DateTime::parse_from_rfc3339(&dto.created_at)?.with_timezone(&Utc);
        Ok(PhotoRecord {
            id: dto.id,
            urls: PhotoUrls {
                small: dto.urls.small,
                full: dto.urls.full,
            },
            likes: dto.likes,
            liked_by_user: dto.liked_by_user,
            created_at,
            description: dto.description.unwrap_or_default(),
        })
    }
}

/// Converts a page of DTOs, dropping records whose timestamp does not parse.
pub(crate) fn into_records(dtos: Vec<PhotoDto>) -> Vec<PhotoRecord> {
    let total = dtos.len();
    let records: Vec<PhotoRecord> = dtos
        .into_iter()
        .filter_map(|dto| {
            let id = dto.id.clone();
            let created_at = dto.created_at.clone();
            PhotoRecord::try_from(dto)
                .map_err(|e| {
                    tracing::debug!(id = %id, created_at = %created_at, error = %e, "Unparseable timestamp");
                })
                .ok()
        })
        .collect();

    let skipped = total - records.len();
    if skipped > 0 {
        tracing::warn!(skipped, "Records with invalid timestamps skipped");
    }
    records
}
