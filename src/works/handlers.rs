use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::state::AppState;
use crate::storage;

use super::repo::WorkPhoto;

const PHOTO_PRESIGN_SECS: u64 = 600;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/works", get(list_works).post(create_work))
        .route("/works/:id", delete(delete_work))
        .layer(DefaultBodyLimit::max(12 * 1024 * 1024))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkPhotoOut {
    pub id: i64,
    pub image_url: String,
    pub caption: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[instrument(skip(state))]
pub async fn list_works(
    State(state): State<AppState>,
) -> Result<Json<Vec<WorkPhotoOut>>, (StatusCode, String)> {
    let photos = WorkPhoto::list(&state.db).await.map_err(internal)?;
    let mut out = Vec::with_capacity(photos.len());
    for p in photos {
        let image_url = state
            .storage
            .presign_get(&p.s3_key, PHOTO_PRESIGN_SECS)
            .await
            .map_err(internal)?;
        out.push(WorkPhotoOut {
            id: p.id,
            image_url,
            caption: p.caption,
            created_at: p.created_at,
        });
    }
    Ok(Json(out))
}

/// Multipart fields: `image` (required), `caption` (optional text).
#[instrument(skip(state, mp))]
pub async fn create_work(
    State(state): State<AppState>,
    mut mp: Multipart,
) -> Result<(StatusCode, Json<WorkPhotoOut>), (StatusCode, String)> {
    let mut image = None;
    let mut caption: Option<String> = None;
    while let Ok(Some(field)) = mp.next_field().await {
        match field.name() {
            Some("image") => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let data = field.bytes().await.map_err(internal)?;
                image = Some((data, content_type));
            }
            Some("caption") => {
                let text = field.text().await.map_err(internal)?;
                let text = text.trim();
                if !text.is_empty() {
                    caption = Some(text.to_string());
                }
            }
            _ => {}
        }
    }
    let Some((data, content_type)) = image else {
        return Err((StatusCode::BAD_REQUEST, "image field is required".into()));
    };

    let key = storage::work_key(&content_type);
    state
        .storage
        .put_object(&key, data, &content_type)
        .await
        .map_err(internal)?;

    let photo = WorkPhoto::create(&state.db, &key, caption.as_deref())
        .await
        .map_err(internal)?;
    let image_url = state
        .storage
        .presign_get(&photo.s3_key, PHOTO_PRESIGN_SECS)
        .await
        .map_err(internal)?;
    info!(photo_id = photo.id, %key, "work photo uploaded");

    Ok((
        StatusCode::CREATED,
        Json(WorkPhotoOut {
            id: photo.id,
            image_url,
            caption: photo.caption,
            created_at: photo.created_at,
        }),
    ))
}

/// The row goes first, then the stored object best-effort.
#[instrument(skip(state))]
pub async fn delete_work(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, String)> {
    let photo = WorkPhoto::find(&state.db, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Photo not found".to_string()))?;

    WorkPhoto::delete(&state.db, id).await.map_err(internal)?;

    if let Err(e) = state.storage.delete_object(&photo.s3_key).await {
        warn!(error = %e, key = %photo.s3_key, "failed to remove deleted work photo object");
    }
    Ok(StatusCode::NO_CONTENT)
}
