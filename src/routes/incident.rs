use actix_web::{delete, get, patch, post, put, web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::{
    error::{AppError, ValidationErrors},
    models::{
        choices::{
            Category, Choice, ChoiceTables, InjuryDamageType, ReportedByType, SubCategory,
            WasteType,
        },
        incident::{Incident, IncidentDetail, IncidentListItem, IncidentMutationResponse},
        incident_attachment::remove_payload,
        payload::{parse_bool, WriteMode},
        statistics::DashboardStats,
    },
    repository::{IncidentFilter, IncidentOrdering, PageRequest},
};

use super::{parse_id, AppState};

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct IncidentQuery {
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub facility: Option<String>,
    pub department: Option<String>,
    pub injury_damage_type: Option<String>,
    pub waste_type: Option<String>,
    pub reported_by_type: Option<String>,
    pub is_active: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IncidentListResponse {
    pub count: u64,
    pub results: Vec<IncidentListItem>,
}

fn filter_choice<T: Choice>(
    errors: &mut ValidationErrors,
    field: &str,
    value: &Option<String>,
) -> Option<T> {
    let raw = value.as_deref().map(str::trim).filter(|raw| !raw.is_empty())?;
    let parsed = T::parse(raw);
    if parsed.is_none() {
        errors.add(
            field,
            format!("Select a valid choice. {raw} is not one of the available choices."),
        );
    }
    parsed
}

fn filter_text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(str::to_string)
}

impl IncidentQuery {
    pub fn to_filter(&self) -> Result<IncidentFilter, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let is_active = match filter_text(&self.is_active) {
            Some(raw) => {
                let parsed = parse_bool(&raw);
                if parsed.is_none() {
                    errors.add("is_active", "Enter a valid boolean.");
                }
                parsed
            }
            None => None,
        };

        let filter = IncidentFilter {
            category: filter_choice::<Category>(&mut errors, "category", &self.category),
            sub_category: filter_choice::<SubCategory>(
                &mut errors,
                "sub_category",
                &self.sub_category,
            ),
            facility: filter_text(&self.facility),
            department: filter_text(&self.department),
            injury_damage_type: filter_choice::<InjuryDamageType>(
                &mut errors,
                "injury_damage_type",
                &self.injury_damage_type,
            ),
            waste_type: filter_choice::<WasteType>(&mut errors, "waste_type", &self.waste_type),
            reported_by_type: filter_choice::<ReportedByType>(
                &mut errors,
                "reported_by_type",
                &self.reported_by_type,
            ),
            is_active,
            ..IncidentFilter::default()
        };
        let filter = match &self.search {
            Some(search) => filter.with_search(search),
            None => filter,
        };

        errors.into_result(filter)
    }

    pub fn to_ordering(&self) -> IncidentOrdering {
        self.ordering
            .as_deref()
            .map(IncidentOrdering::parse)
            .unwrap_or_default()
    }

    /// Without `page` or `page_size` every match is returned. A `page` that
    /// is not a positive number is not found.
    pub fn to_page(&self) -> Result<PageRequest, AppError> {
        let page_size = filter_text(&self.page_size)
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|size| *size > 0)
            .map(|size| size.min(MAX_PAGE_SIZE));
        let page = match filter_text(&self.page) {
            Some(raw) => Some(
                raw.parse::<u64>()
                    .ok()
                    .filter(|page| *page > 0)
                    .ok_or(AppError::NotFound("page"))?,
            ),
            None => None,
        };

        Ok(match (page, page_size) {
            (None, None) => PageRequest::default(),
            (page, size) => {
                let size = size.unwrap_or(DEFAULT_PAGE_SIZE);
                // Offsets past i64::MAX cannot be skipped by the database either.
                let offset = (page.unwrap_or(1) - 1)
                    .checked_mul(size)
                    .filter(|offset| i64::try_from(*offset).is_ok())
                    .ok_or(AppError::NotFound("page"))?;
                PageRequest {
                    offset,
                    limit: Some(size),
                }
            }
        })
    }
}

#[get("/incidents/")]
pub async fn get_incidents(
    state: web::Data<AppState>,
    query: web::Query<IncidentQuery>,
) -> Result<HttpResponse, AppError> {
    let filter = query.to_filter()?;
    let ordering = query.to_ordering();
    let page_request = query.to_page()?;

    let page = state
        .incidents
        .list(&filter, &ordering, page_request)
        .await?;
    if page.items.is_empty() && page_request.offset > 0 {
        return Err(AppError::NotFound("page"));
    }

    let ids: Vec<_> = page.items.iter().map(|incident| incident.id).collect();
    let counts = state.incidents.attachment_counts(&ids).await?;
    let today = Utc::now().date_naive();
    let results = page
        .items
        .iter()
        .map(|incident| {
            incident.to_list_item(counts.get(&incident.id).copied().unwrap_or(0), today)
        })
        .collect();

    Ok(HttpResponse::Ok().json(IncidentListResponse {
        count: page.count,
        results,
    }))
}

#[post("/incidents/")]
pub async fn create_incident(
    state: web::Data<AppState>,
    payload: web::Json<Map<String, Value>>,
) -> Result<HttpResponse, AppError> {
    let incident = Incident::create(state.incidents.as_ref(), payload.into_inner(), Utc::now()).await?;
    info!(incident_id = %incident.id, title = %incident.incident_title, "incident created");

    Ok(HttpResponse::Created().json(IncidentMutationResponse {
        message: "Incident created successfully",
        incident: incident.into_detail(Vec::new()),
    }))
}

async fn load(state: &AppState, id: &str) -> Result<Incident, AppError> {
    let id = parse_id(id)?;
    state
        .incidents
        .find_by_id(id)
        .await?
        .ok_or(AppError::NotFound("incident"))
}

async fn detail_response(
    state: &AppState,
    incident: Incident,
) -> Result<IncidentDetail, AppError> {
    let attachments = state
        .incidents
        .list_attachments(incident.id)
        .await?
        .iter()
        .map(|attachment| attachment.to_response(state.files.as_ref()))
        .collect();
    Ok(incident.into_detail(attachments))
}

#[get("/incidents/{id}/")]
pub async fn get_incident(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let incident = load(&state, &id).await?;
    Ok(HttpResponse::Ok().json(detail_response(&state, incident).await?))
}

async fn update(
    state: &AppState,
    id: &str,
    payload: Map<String, Value>,
    mode: WriteMode,
) -> Result<HttpResponse, AppError> {
    let incident = load(state, id).await?;
    let incident = incident
        .update(state.incidents.as_ref(), payload, mode, Utc::now())
        .await?;
    info!(incident_id = %incident.id, ?mode, "incident updated");

    Ok(HttpResponse::Ok().json(IncidentMutationResponse {
        message: "Incident updated successfully",
        incident: detail_response(state, incident).await?,
    }))
}

#[put("/incidents/{id}/")]
pub async fn update_incident(
    state: web::Data<AppState>,
    id: web::Path<String>,
    payload: web::Json<Map<String, Value>>,
) -> Result<HttpResponse, AppError> {
    update(&state, &id, payload.into_inner(), WriteMode::Replace).await
}

#[patch("/incidents/{id}/")]
pub async fn patch_incident(
    state: web::Data<AppState>,
    id: web::Path<String>,
    payload: web::Json<Map<String, Value>>,
) -> Result<HttpResponse, AppError> {
    update(&state, &id, payload.into_inner(), WriteMode::Partial).await
}

/// Removes the incident and its attachment records, then their payloads.
#[delete("/incidents/{id}/")]
pub async fn delete_incident(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let incident = load(&state, &id).await?;
    let attachments = state
        .incidents
        .delete(incident.id)
        .await?
        .ok_or(AppError::NotFound("incident"))?;
    for attachment in &attachments {
        remove_payload(state.files.as_ref(), &attachment.file).await;
    }
    info!(
        incident_id = %incident.id,
        attachments = attachments.len(),
        "incident deleted"
    );

    Ok(HttpResponse::NoContent().finish())
}

#[get("/incidents/dashboard_stats/")]
pub async fn get_dashboard_stats(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let stats = DashboardStats::compute(state.incidents.as_ref(), Utc::now().date_naive()).await?;
    Ok(HttpResponse::Ok().json(stats))
}

#[get("/incidents/choices/")]
pub async fn get_choices() -> HttpResponse {
    HttpResponse::Ok().json(ChoiceTables::build())
}
