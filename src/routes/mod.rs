use std::sync::Arc;

use actix_web::{error::InternalError, get, web, HttpRequest, HttpResponse};
use mime_guess::from_path;
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::AppError,
    repository::IncidentRepository,
    storage::{FileStore, StorageError},
};

/// Builds the service the handler tests drive: the full route table on the
/// in-memory backends, media served under `/media`.
#[cfg(test)]
macro_rules! test_app {
    ($state:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data($state.clone())
                .app_data(crate::routes::json_config())
                .configure(crate::routes::configure)
                .service(actix_web::web::scope("/media").service(crate::routes::get_media)),
        )
    };
}

pub mod attachment;
pub mod incident;

/// Backends shared by every handler.
pub struct AppState {
    pub incidents: Arc<dyn IncidentRepository>,
    pub files: Arc<dyn FileStore>,
}

impl AppState {
    pub fn new(incidents: Arc<dyn IncidentRepository>, files: Arc<dyn FileStore>) -> Self {
        AppState { incidents, files }
    }
}

/// Registers the incident and attachment endpoints. The fixed
/// `dashboard_stats/` and `choices/` paths go before `{id}/`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(incident::get_dashboard_stats)
        .service(incident::get_choices)
        .service(incident::get_incidents)
        .service(incident::create_incident)
        .service(incident::get_incident)
        .service(incident::update_incident)
        .service(incident::patch_incident)
        .service(incident::delete_incident)
        .service(attachment::upload_attachment)
        .service(attachment::get_attachments)
        .service(attachment::get_attachment)
        .service(attachment::delete_attachment);
}

/// Answers unreadable JSON bodies with `400 {"detail": ...}`.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|error, _req: &HttpRequest| {
        let detail = format!("JSON parse error - {error}");
        InternalError::from_response(error, HttpResponse::BadRequest().json(json!({ "detail": detail })))
            .into()
    })
}

/// Ids in paths are UUIDs; anything else cannot name a record.
pub fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound("record"))
}

#[get("/{key:.*}")]
pub async fn get_media(
    key: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let key = key.into_inner();
    match state.files.open(&key).await {
        Ok(data) => {
            let mime = from_path(&key).first_or_octet_stream();
            Ok(HttpResponse::Ok().content_type(mime).body(data))
        }
        Err(StorageError::NotFound(_) | StorageError::InvalidKey(_)) => {
            Err(AppError::NotFound("file"))
        }
        Err(error) => Err(error.into()),
    }
}
