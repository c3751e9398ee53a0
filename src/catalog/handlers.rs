use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use sqlx::types::Decimal;
use tracing::{info, instrument, warn};

use crate::state::AppState;
use crate::storage;

use super::dto::{
    CreateBranch, CreateCategory, CreateMaster, CreateService, MasterOut, UpdateBranch,
    UpdateMaster,
};
use super::repo::{Branch, Category, DeleteOutcome, Master, Service, ServiceWithCategory};

const AVATAR_PRESIGN_SECS: u64 = 600;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/branches", get(list_branches).post(create_branch))
        .route("/branches/:id", axum::routing::patch(update_branch).delete(delete_branch))
        .route("/categories", get(list_categories).post(create_category))
        .route("/categories/:id", delete(delete_category))
        .route("/services", get(list_services).post(create_service))
        .route("/services/:id", delete(delete_service))
        .route("/masters", get(list_masters).post(create_master))
        .route("/masters/:id", axum::routing::patch(update_master).delete(delete_master))
        .route("/masters/:id/avatar", post(upload_avatar))
        .layer(DefaultBodyLimit::max(12 * 1024 * 1024))
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// --- branches ---

#[instrument(skip(state))]
pub async fn list_branches(
    State(state): State<AppState>,
) -> Result<Json<Vec<Branch>>, (StatusCode, String)> {
    let items = Branch::list(&state.db).await.map_err(internal)?;
    Ok(Json(items))
}

#[instrument(skip(state, body))]
pub async fn create_branch(
    State(state): State<AppState>,
    Json(body): Json<CreateBranch>,
) -> Result<Json<Branch>, (StatusCode, String)> {
    let Some(name) = body.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
        return Err((StatusCode::BAD_REQUEST, "Name is required".into()));
    };
    let item = Branch::create(&state.db, name, body.address.as_deref())
        .await
        .map_err(internal)?;
    Ok(Json(item))
}

#[instrument(skip(state, body))]
pub async fn update_branch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateBranch>,
) -> Result<Json<Branch>, (StatusCode, String)> {
    let item = Branch::update(&state.db, id, body.name.as_deref(), body.address.as_deref())
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Branch not found".to_string()))?;
    Ok(Json(item))
}

/// Delete policy: appointments referencing the branch survive with their
/// branch reference cleared.
#[instrument(skip(state))]
pub async fn delete_branch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, String)> {
    let deleted = Branch::delete_detaching(&state.db, id).await.map_err(internal)?;
    if !deleted {
        return Err((StatusCode::NOT_FOUND, "Branch not found".into()));
    }
    Ok(StatusCode::NO_CONTENT)
}

// --- categories ---

#[instrument(skip(state))]
pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<Category>>, (StatusCode, String)> {
    let items = Category::list(&state.db).await.map_err(internal)?;
    Ok(Json(items))
}

#[instrument(skip(state, body))]
pub async fn create_category(
    State(state): State<AppState>,
    Json(body): Json<CreateCategory>,
) -> Result<Json<Category>, (StatusCode, String)> {
    let Some(name) = body.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
        return Err((StatusCode::BAD_REQUEST, "Name is required".into()));
    };
    let item = Category::create(&state.db, name).await.map_err(internal)?;
    Ok(Json(item))
}

/// Delete policy: dependent services are kept and detached (category
/// reference nulled) in the same transaction.
#[instrument(skip(state))]
pub async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, String)> {
    let deleted = Category::delete_detaching(&state.db, id).await.map_err(internal)?;
    if !deleted {
        return Err((StatusCode::NOT_FOUND, "Category not found".into()));
    }
    info!(category_id = id, "category deleted, services detached");
    Ok(StatusCode::NO_CONTENT)
}

// --- services ---

#[instrument(skip(state))]
pub async fn list_services(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceWithCategory>>, (StatusCode, String)> {
    let items = Service::list_with_category(&state.db).await.map_err(internal)?;
    Ok(Json(items))
}

fn validate_service_input(body: &CreateService) -> Result<(String, i32, Decimal), String> {
    let name = body
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or("Name is required")?;
    let duration = body.duration_minutes.ok_or("Duration is required")?;
    if duration <= 0 {
        return Err("Duration must be positive".into());
    }
    let price = body.price.ok_or("Price is required")?;
    if price < Decimal::ZERO {
        return Err("Price must not be negative".into());
    }
    Ok((name.to_string(), duration, price))
}

#[instrument(skip(state, body))]
pub async fn create_service(
    State(state): State<AppState>,
    Json(body): Json<CreateService>,
) -> Result<Json<Service>, (StatusCode, String)> {
    let (name, duration, price) = match validate_service_input(&body) {
        Ok(v) => v,
        Err(msg) => {
            warn!(%msg, "invalid service payload");
            return Err((StatusCode::BAD_REQUEST, msg));
        }
    };
    let item = Service::create(&state.db, &name, duration, price, body.category_id)
        .await
        .map_err(internal)?;
    Ok(Json(item))
}

/// Delete policy: blocked while appointments still reference the service, so
/// existing price snapshots keep a resolvable origin. Check and delete run in
/// one transaction.
#[instrument(skip(state))]
pub async fn delete_service(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, String)> {
    match Service::delete_guarded(&state.db, id).await.map_err(internal)? {
        DeleteOutcome::Referenced => {
            warn!(service_id = id, "service delete blocked");
            Err((StatusCode::CONFLICT, "Service still has appointments".into()))
        }
        DeleteOutcome::Missing => Err((StatusCode::NOT_FOUND, "Service not found".into())),
        DeleteOutcome::Deleted => Ok(StatusCode::NO_CONTENT),
    }
}

// --- masters ---

async fn master_out(state: &AppState, master: Master) -> MasterOut {
    let avatar_url = match &master.avatar_key {
        Some(key) => state.storage.presign_get(key, AVATAR_PRESIGN_SECS).await.ok(),
        None => None,
    };
    MasterOut {
        id: master.id,
        name: master.name,
        active: master.active,
        role: master.role,
        avatar_url,
    }
}

#[instrument(skip(state))]
pub async fn list_masters(
    State(state): State<AppState>,
) -> Result<Json<Vec<MasterOut>>, (StatusCode, String)> {
    let masters = Master::list(&state.db).await.map_err(internal)?;
    let mut out = Vec::with_capacity(masters.len());
    for m in masters {
        out.push(master_out(&state, m).await);
    }
    Ok(Json(out))
}

#[instrument(skip(state, body))]
pub async fn create_master(
    State(state): State<AppState>,
    Json(body): Json<CreateMaster>,
) -> Result<Json<MasterOut>, (StatusCode, String)> {
    let Some(name) = body.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
        return Err((StatusCode::BAD_REQUEST, "Name is required".into()));
    };
    let active = body.active.unwrap_or(true);
    let role = body.role.as_deref().unwrap_or("MASTER");
    let master = Master::create(&state.db, name, active, role)
        .await
        .map_err(internal)?;
    Ok(Json(master_out(&state, master).await))
}

#[instrument(skip(state, body))]
pub async fn update_master(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateMaster>,
) -> Result<Json<MasterOut>, (StatusCode, String)> {
    let master = Master::update(
        &state.db,
        id,
        body.name.as_deref(),
        body.active,
        body.role.as_deref(),
    )
    .await
    .map_err(internal)?
    .ok_or((StatusCode::NOT_FOUND, "Master not found".to_string()))?;
    Ok(Json(master_out(&state, master).await))
}

/// Replace the master's avatar. Multipart field: `avatar`. The previous
/// stored object, if any, is removed best-effort after the new one is in
/// place.
#[instrument(skip(state, mp))]
pub async fn upload_avatar(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    mut mp: Multipart,
) -> Result<Json<MasterOut>, (StatusCode, String)> {
    let master = Master::find(&state.db, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Master not found".to_string()))?;

    let mut upload = None;
    while let Ok(Some(field)) = mp.next_field().await {
        if field.name() == Some("avatar") {
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            let data = field.bytes().await.map_err(internal)?;
            upload = Some((data, content_type));
            break;
        }
    }
    let Some((data, content_type)) = upload else {
        return Err((StatusCode::BAD_REQUEST, "avatar field is required".into()));
    };

    let key = storage::avatar_key(id, &content_type);
    state
        .storage
        .put_object(&key, data, &content_type)
        .await
        .map_err(internal)?;

    if let Some(prev) = &master.avatar_key {
        if let Err(e) = state.storage.delete_object(prev).await {
            warn!(error = %e, key = %prev, "failed to remove previous avatar");
        }
    }

    let updated = Master::set_avatar(&state.db, id, &key)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Master not found".to_string()))?;
    info!(master_id = id, %key, "avatar updated");
    Ok(Json(master_out(&state, updated).await))
}

/// Delete policy: blocked while appointments still reference the master. On
/// success the stored avatar is removed best-effort (cleanup collaborator).
#[instrument(skip(state))]
pub async fn delete_master(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, String)> {
    let master = Master::find(&state.db, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Master not found".to_string()))?;

    match Master::delete_guarded(&state.db, id).await.map_err(internal)? {
        DeleteOutcome::Referenced => {
            warn!(master_id = id, "master delete blocked");
            return Err((StatusCode::CONFLICT, "Master still has appointments".into()));
        }
        DeleteOutcome::Missing => {
            return Err((StatusCode::NOT_FOUND, "Master not found".into()));
        }
        DeleteOutcome::Deleted => {}
    }

    if let Some(key) = &master.avatar_key {
        if let Err(e) = state.storage.delete_object(key).await {
            warn!(error = %e, %key, "failed to remove avatar of deleted master");
        }
    }
    info!(master_id = id, "master deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_body(name: Option<&str>, duration: Option<i32>, price: Option<i64>) -> CreateService {
        CreateService {
            name: name.map(Into::into),
            duration_minutes: duration,
            price: price.map(|p| Decimal::new(p, 0)),
            category_id: None,
        }
    }

    #[test]
    fn service_validation_rejects_bad_input() {
        assert!(validate_service_input(&service_body(None, Some(30), Some(1000))).is_err());
        assert!(validate_service_input(&service_body(Some("  "), Some(30), Some(1000))).is_err());
        assert!(validate_service_input(&service_body(Some("Cut"), None, Some(1000))).is_err());
        assert!(validate_service_input(&service_body(Some("Cut"), Some(0), Some(1000))).is_err());
        assert!(validate_service_input(&service_body(Some("Cut"), Some(-5), Some(1000))).is_err());
        assert!(validate_service_input(&service_body(Some("Cut"), Some(30), None)).is_err());
        assert!(
            validate_service_input(&CreateService {
                name: Some("Cut".into()),
                duration_minutes: Some(30),
                price: Some(Decimal::new(-1, 0)),
                category_id: None,
            })
            .is_err()
        );
    }

    #[test]
    fn service_validation_trims_name() {
        let (name, duration, price) =
            validate_service_input(&service_body(Some("  Cut  "), Some(30), Some(1000))).unwrap();
        assert_eq!(name, "Cut");
        assert_eq!(duration, 30);
        assert_eq!(price, Decimal::new(1000, 0));
    }
}
