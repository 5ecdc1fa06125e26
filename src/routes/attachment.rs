use actix_multipart::form::MultipartForm;
use actix_web::{delete, get, post, web, HttpResponse};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::{
    error::AppError,
    models::{
        incident::Incident,
        incident_attachment::{
            AttachmentListResponse, AttachmentUploadForm, AttachmentUploadResponse,
            IncidentAttachment,
        },
    },
};

use super::{parse_id, AppState};

async fn load_incident(state: &AppState, id: &str) -> Result<Incident, AppError> {
    state
        .incidents
        .find_by_id(parse_id(id)?)
        .await?
        .ok_or(AppError::NotFound("incident"))
}

async fn load_attachment(
    state: &AppState,
    incident_id: &str,
    id: &str,
) -> Result<IncidentAttachment, AppError> {
    state
        .incidents
        .find_attachment(parse_id(incident_id)?, parse_id(id)?)
        .await?
        .ok_or(AppError::NotFound("attachment"))
}

#[post("/incidents/{id}/upload_attachment/")]
pub async fn upload_attachment(
    state: web::Data<AppState>,
    id: web::Path<String>,
    form: MultipartForm<AttachmentUploadForm>,
) -> Result<HttpResponse, AppError> {
    let incident = load_incident(&state, &id).await?;
    let attachment = IncidentAttachment::upload(
        state.incidents.as_ref(),
        state.files.as_ref(),
        &incident,
        form.into_inner(),
        Utc::now(),
    )
    .await?;
    info!(
        incident_id = %incident.id,
        attachment_id = %attachment.id,
        file_size = attachment.file_size,
        "attachment uploaded"
    );

    Ok(HttpResponse::Created().json(AttachmentUploadResponse {
        message: "Attachment uploaded successfully",
        attachment: attachment.to_response(state.files.as_ref()),
    }))
}

#[get("/incidents/{id}/attachments/")]
pub async fn get_attachments(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let incident = load_incident(&state, &id).await?;
    let attachments: Vec<_> = state
        .incidents
        .list_attachments(incident.id)
        .await?
        .iter()
        .map(|attachment| attachment.to_response(state.files.as_ref()))
        .collect();

    Ok(HttpResponse::Ok().json(AttachmentListResponse {
        count: attachments.len(),
        attachments,
    }))
}

#[get("/incidents/{incident_id}/attachments/{id}/")]
pub async fn get_attachment(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (incident_id, id) = path.into_inner();
    let attachment = load_attachment(&state, &incident_id, &id).await?;
    Ok(HttpResponse::Ok().json(attachment.to_response(state.files.as_ref())))
}

#[delete("/incidents/{incident_id}/attachments/{id}/")]
pub async fn delete_attachment(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (incident_id, id) = path.into_inner();
    let attachment = load_attachment(&state, &incident_id, &id).await?;
    let attachment_id = attachment.id;
    attachment
        .delete(state.incidents.as_ref(), state.files.as_ref())
        .await?;
    info!(incident_id = %incident_id, attachment_id = %attachment_id, "attachment deleted");

    Ok(HttpResponse::Ok().json(json!({ "message": "Attachment deleted successfully" })))
}
