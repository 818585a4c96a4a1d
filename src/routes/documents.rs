use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_actor, Actor},
    error::{AppError, AppResult},
    repository::table_service::{create_row, delete_row, get_row, list_rows, update_row},
    schemas::{clamp_limit, DocumentPath, DocumentsQuery},
    services::{
        audit::{write_audit_log, AuditAction, AuditEntry},
        document_indexer::{index_document, sha256_hex},
    },
    state::AppState,
};

const DEFAULT_SOURCE_TYPE: &str = "upload";

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/documents",
            axum::routing::get(list_documents).post(upload_document),
        )
        .route(
            "/documents/{document_id}",
            axum::routing::get(get_document).delete(delete_document),
        )
}

async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<DocumentsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if !is_admin(&actor) {
        filters.insert("uploader_id".to_string(), Value::String(actor.id.clone()));
    }
    let rows = list_rows(
        pool,
        "documents",
        Some(&filters),
        clamp_limit(query.limit),
        query.offset,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn get_document(
    State(state): State<AppState>,
    Path(path): Path<DocumentPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;
    let record = get_row(pool, "documents", &path.document_id, "id").await?;
    ensure_can_access(&actor, &record)?;
    Ok(Json(record))
}

async fn upload_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<Value>)> {
    let actor = require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;
    let upload = read_upload(multipart, state.config.document_max_upload_bytes).await?;

    let document_id = uuid::Uuid::new_v4().to_string();
    let mut record = Map::new();
    record.insert("id".to_string(), Value::String(document_id.clone()));
    record.insert("filename".to_string(), Value::String(upload.filename.clone()));
    record.insert(
        "content_type".to_string(),
        Value::String(upload.content_type.clone()),
    );
    record.insert(
        "source_type".to_string(),
        Value::String(upload.source_type.clone()),
    );
    record.insert("chunk_count".to_string(), Value::from(0));
    record.insert("uploader_id".to_string(), Value::String(actor.id.clone()));
    record.insert(
        "uploader_email".to_string(),
        actor.email.clone().map(Value::String).unwrap_or(Value::Null),
    );
    record.insert(
        "pdf_sha256".to_string(),
        Value::String(sha256_hex(&upload.bytes)),
    );
    record.insert(
        "created_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    let mut created = create_row(pool, "documents", &record).await?;

    match index_document(
        &state.http_client,
        &state.config,
        &document_id,
        &upload.filename,
        &upload.content_type,
        upload.bytes,
    )
    .await
    {
        Ok(chunk_count) => {
            let mut patch = Map::new();
            patch.insert("chunk_count".to_string(), Value::from(chunk_count));
            created = update_row(pool, "documents", &document_id, &patch, "id").await?;
        }
        Err(error) => {
            tracing::warn!(
                document_id = %document_id,
                error = %error,
                "Document indexing failed; keeping metadata only"
            );
        }
    }

    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        AuditEntry::new(AuditAction::Created, "document")
            .entity_id(&document_id)
            .description(format!("Document uploaded: {}", upload.filename)),
    )
    .await;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_document(
    State(state): State<AppState>,
    Path(path): Path<DocumentPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "documents", &path.document_id, "id").await?;
    ensure_can_access(&actor, &record)?;
    delete_row(pool, "documents", &path.document_id, "id").await?;

    let filename = record
        .get("filename")
        .and_then(Value::as_str)
        .unwrap_or_default();
    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        AuditEntry::new(AuditAction::Deleted, "document")
            .entity_id(&path.document_id)
            .description(format!("Document deleted: {filename}")),
    )
    .await;

    Ok(Json(json!({ "deleted": true })))
}

#[derive(Debug)]
struct Upload {
    filename: String,
    content_type: String,
    source_type: String,
    bytes: Vec<u8>,
}

async fn read_upload(mut multipart: Multipart, max_bytes: usize) -> AppResult<Upload> {
    let mut file: Option<(String, String, Vec<u8>)> = None;
    let mut source_type = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .unwrap_or("document")
                    .to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(bad_multipart)?;
                file = Some((filename, content_type, bytes.to_vec()));
            }
            "source_type" => {
                let value = field.text().await.map_err(bad_multipart)?;
                source_type = Some(value);
            }
            _ => {}
        }
    }

    let Some((filename, content_type, bytes)) = file else {
        return Err(AppError::BadRequest(
            "Multipart field 'file' is required.".to_string(),
        ));
    };
    check_upload_size(bytes.len(), max_bytes)?;

    Ok(Upload {
        filename,
        content_type,
        source_type: normalize_source_type(source_type.as_deref()),
        bytes,
    })
}

fn check_upload_size(size: usize, max_bytes: usize) -> AppResult<()> {
    if size == 0 {
        return Err(AppError::BadRequest("Uploaded file is empty.".to_string()));
    }
    if size > max_bytes {
        return Err(AppError::UnprocessableEntity(format!(
            "Uploaded file exceeds the {max_bytes} byte limit."
        )));
    }
    Ok(())
}

fn normalize_source_type(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| DEFAULT_SOURCE_TYPE.to_string())
}

fn ensure_can_access(actor: &Actor, record: &Value) -> AppResult<()> {
    let owner = record.get("uploader_id").and_then(Value::as_str);
    if is_admin(actor) || owner == Some(actor.id.as_str()) {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Forbidden: document belongs to another user.".to_string(),
    ))
}

fn is_admin(actor: &Actor) -> bool {
    actor.role.eq_ignore_ascii_case("admin")
}

fn bad_multipart(error: axum::extract::multipart::MultipartError) -> AppError {
    AppError::BadRequest(format!("Invalid multipart body: {error}"))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{check_upload_size, ensure_can_access, normalize_source_type};
    use crate::auth::Actor;
    use crate::error::AppError;

    fn actor(id: &str, role: &str) -> Actor {
        Actor {
            id: id.to_string(),
            email: None,
            role: role.to_string(),
        }
    }

    #[test]
    fn only_owner_or_admin_can_touch_a_document() {
        let record = json!({ "id": "doc-1", "uploader_id": "user-1" });
        assert!(ensure_can_access(&actor("user-1", "user"), &record).is_ok());
        assert!(ensure_can_access(&actor("user-9", "Admin"), &record).is_ok());
        assert!(matches!(
            ensure_can_access(&actor("user-9", "user"), &record),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn upload_size_limits() {
        assert!(matches!(
            check_upload_size(0, 10),
            Err(AppError::BadRequest(_))
        ));
        assert!(check_upload_size(10, 10).is_ok());
        assert!(matches!(
            check_upload_size(11, 10),
            Err(AppError::UnprocessableEntity(_))
        ));
    }

    #[test]
    fn source_type_defaults_to_upload() {
        assert_eq!(normalize_source_type(None), "upload");
        assert_eq!(normalize_source_type(Some("  ")), "upload");
        assert_eq!(normalize_source_type(Some("Lease")), "lease");
    }
}
