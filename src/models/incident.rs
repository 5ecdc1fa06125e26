use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    error::AppError,
    repository::{IncidentRepository, RepositoryError},
};

use super::{
    choices::{Category, InjuryDamageType, PersonType, ReportedByType, SubCategory, WasteType},
    incident_attachment::IncidentAttachmentResponse,
    payload::{IncidentChanges, WriteMode},
    validation,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Incident {
    pub id: Uuid,
    pub incident_title: String,
    pub date_of_incident: NaiveDate,
    pub time_of_incident: NaiveTime,
    pub facility: Option<String>,
    pub department: Option<String>,
    pub site: Option<String>,
    pub category: Category,
    pub sub_category: Option<SubCategory>,
    pub description: String,
    pub persons_involved_type: PersonType,
    pub persons_involved_details: Option<String>,
    pub injury_damage_type: InjuryDamageType,
    pub injury_damage_details: Option<String>,
    pub waste_type: WasteType,
    pub waste_category_code: Option<String>,
    pub reported_by_type: ReportedByType,
    pub reported_by_name: String,
    pub reported_by_contact: Option<String>,
    pub reporting_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct IncidentListItem {
    pub id: Uuid,
    pub incident_number: String,
    pub incident_title: String,
    pub category: Category,
    pub sub_category: Option<SubCategory>,
    pub date_of_incident: NaiveDate,
    pub time_of_incident: NaiveTime,
    pub facility: Option<String>,
    pub department: Option<String>,
    pub injury_damage_type: InjuryDamageType,
    pub reported_by_name: String,
    pub reporting_date: DateTime<Utc>,
    pub attachment_count: u64,
    pub days_since_incident: i64,
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct IncidentDetail {
    pub id: Uuid,
    pub incident_number: String,
    pub incident_title: String,
    pub date_of_incident: NaiveDate,
    pub time_of_incident: NaiveTime,
    pub facility: Option<String>,
    pub department: Option<String>,
    pub site: Option<String>,
    pub category: Category,
    pub sub_category: Option<SubCategory>,
    pub description: String,
    pub persons_involved_type: PersonType,
    pub persons_involved_details: Option<String>,
    pub injury_damage_type: InjuryDamageType,
    pub injury_damage_details: Option<String>,
    pub waste_type: WasteType,
    pub waste_category_code: Option<String>,
    pub reported_by_type: ReportedByType,
    pub reported_by_name: String,
    pub reported_by_contact: Option<String>,
    pub reporting_date: DateTime<Utc>,
    pub attachments: Vec<IncidentAttachmentResponse>,
    pub attachment_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct IncidentMutationResponse {
    pub message: &'static str,
    pub incident: IncidentDetail,
}

/// Formats `INC-<YYYYMMDD>-<first eight id characters, uppercased>`.
pub fn incident_number(id: &Uuid, date_of_incident: NaiveDate) -> String {
    let id = id.simple().to_string();
    format!(
        "INC-{}-{}",
        date_of_incident.format("%Y%m%d"),
        id[..8].to_uppercase()
    )
}

impl Incident {
    pub fn incident_number(&self) -> String {
        incident_number(&self.id, self.date_of_incident)
    }

    pub fn days_since_incident(&self, today: NaiveDate) -> i64 {
        (today - self.date_of_incident).num_days()
    }

    pub fn to_list_item(&self, attachment_count: u64, today: NaiveDate) -> IncidentListItem {
        IncidentListItem {
            id: self.id,
            incident_number: self.incident_number(),
            incident_title: self.incident_title.clone(),
            category: self.category,
            sub_category: self.sub_category,
            date_of_incident: self.date_of_incident,
            time_of_incident: self.time_of_incident,
            facility: self.facility.clone(),
            department: self.department.clone(),
            injury_damage_type: self.injury_damage_type,
            reported_by_name: self.reported_by_name.clone(),
            reporting_date: self.reporting_date,
            attachment_count,
            days_since_incident: self.days_since_incident(today),
            is_active: self.is_active,
        }
    }

    pub fn into_detail(self, attachments: Vec<IncidentAttachmentResponse>) -> IncidentDetail {
        IncidentDetail {
            id: self.id,
            incident_number: self.incident_number(),
            attachment_count: attachments.len() as u64,
            attachments,
            incident_title: self.incident_title,
            date_of_incident: self.date_of_incident,
            time_of_incident: self.time_of_incident,
            facility: self.facility,
            department: self.department,
            site: self.site,
            category: self.category,
            sub_category: self.sub_category,
            description: self.description,
            persons_involved_type: self.persons_involved_type,
            persons_involved_details: self.persons_involved_details,
            injury_damage_type: self.injury_damage_type,
            injury_damage_details: self.injury_damage_details,
            waste_type: self.waste_type,
            waste_category_code: self.waste_category_code,
            reported_by_type: self.reported_by_type,
            reported_by_name: self.reported_by_name,
            reported_by_contact: self.reported_by_contact,
            reporting_date: self.reporting_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
            is_active: self.is_active,
        }
    }

    /// Validates a create payload and persists the new incident.
    pub async fn create(
        repo: &dyn IncidentRepository,
        payload: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Incident, AppError> {
        let changes = validate_changes(repo, payload, WriteMode::Create, None, now).await?;
        let mut incident = Incident::from_changes(changes, now)
            .ok_or_else(|| AppError::field("incident_title", validation::REQUIRED))?;
        incident.waste_category_code =
            validation::validate_waste(incident.waste_type, incident.waste_category_code.take())?;

        repo.insert(&incident)
            .await
            .map_err(duplicate_title_as_validation)?;
        Ok(incident)
    }

    /// Applies a full (`Replace`) or partial update on top of `self` and
    /// persists the result.
    pub async fn update(
        mut self,
        repo: &dyn IncidentRepository,
        payload: Map<String, Value>,
        mode: WriteMode,
        now: DateTime<Utc>,
    ) -> Result<Incident, AppError> {
        let changes = validate_changes(repo, payload, mode, Some(self.id), now).await?;
        self.apply(changes);
        self.waste_category_code =
            validation::validate_waste(self.waste_type, self.waste_category_code.take())?;
        self.updated_at = now.max(self.updated_at);

        repo.replace(&self)
            .await
            .map_err(duplicate_title_as_validation)?;
        Ok(self)
    }

    /// `None` when a required field is absent, which the create reader has
    /// already reported.
    fn from_changes(changes: IncidentChanges, now: DateTime<Utc>) -> Option<Incident> {
        match changes {
            IncidentChanges {
                incident_title: Some(incident_title),
                date_of_incident: Some(date_of_incident),
                time_of_incident: Some(time_of_incident),
                category: Some(category),
                description: Some(description),
                reported_by_type: Some(reported_by_type),
                reported_by_name: Some(reported_by_name),
                facility,
                department,
                site,
                sub_category,
                persons_involved_type,
                persons_involved_details,
                injury_damage_type,
                injury_damage_details,
                waste_type,
                waste_category_code,
                reported_by_contact,
                is_active: _,
            } => Some(Incident {
                id: Uuid::new_v4(),
                incident_title,
                date_of_incident,
                time_of_incident,
                facility: facility.flatten(),
                department: department.flatten(),
                site: site.flatten(),
                category,
                sub_category: sub_category.flatten(),
                description,
                persons_involved_type: persons_involved_type.unwrap_or(PersonType::NotApplicable),
                persons_involved_details: persons_involved_details.flatten(),
                injury_damage_type: injury_damage_type.unwrap_or(InjuryDamageType::NotApplicable),
                injury_damage_details: injury_damage_details.flatten(),
                waste_type: waste_type.unwrap_or_default(),
                waste_category_code: waste_category_code.flatten(),
                reported_by_type,
                reported_by_name,
                reported_by_contact: reported_by_contact.flatten(),
                reporting_date: now,
                created_at: now,
                updated_at: now,
                is_active: true,
            }),
            _ => None,
        }
    }

    fn apply(&mut self, changes: IncidentChanges) {
        let IncidentChanges {
            incident_title,
            date_of_incident,
            time_of_incident,
            facility,
            department,
            site,
            category,
            sub_category,
            description,
            persons_involved_type,
            persons_involved_details,
            injury_damage_type,
            injury_damage_details,
            waste_type,
            waste_category_code,
            reported_by_type,
            reported_by_name,
            reported_by_contact,
            is_active,
        } = changes;

        if let Some(value) = incident_title {
            self.incident_title = value;
        }
        if let Some(value) = date_of_incident {
            self.date_of_incident = value;
        }
        if let Some(value) = time_of_incident {
            self.time_of_incident = value;
        }
        if let Some(value) = facility {
            self.facility = value;
        }
        if let Some(value) = department {
            self.department = value;
        }
        if let Some(value) = site {
            self.site = value;
        }
        if let Some(value) = category {
            self.category = value;
        }
        if let Some(value) = sub_category {
            self.sub_category = value;
        }
        if let Some(value) = description {
            self.description = value;
        }
        if let Some(value) = persons_involved_type {
            self.persons_involved_type = value;
        }
        if let Some(value) = persons_involved_details {
            self.persons_involved_details = value;
        }
        if let Some(value) = injury_damage_type {
            self.injury_damage_type = value;
        }
        if let Some(value) = injury_damage_details {
            self.injury_damage_details = value;
        }
        if let Some(value) = waste_type {
            self.waste_type = value;
        }
        if let Some(value) = waste_category_code {
            self.waste_category_code = value;
        }
        if let Some(value) = reported_by_type {
            self.reported_by_type = value;
        }
        if let Some(value) = reported_by_name {
            self.reported_by_name = value;
        }
        if let Some(value) = reported_by_contact {
            self.reported_by_contact = value;
        }
        if let Some(value) = is_active {
            self.is_active = value;
        }
    }
}

async fn validate_changes(
    repo: &dyn IncidentRepository,
    payload: Map<String, Value>,
    mode: WriteMode,
    current: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<IncidentChanges, AppError> {
    let (mut changes, mut errors) = IncidentChanges::read(&payload, mode);

    if let Some(date) = changes.date_of_incident {
        if let Err(message) = validation::validate_date_of_incident(date, now.date_naive()) {
            errors.add("date_of_incident", message);
        }
    }
    if let Some(title) = changes.incident_title.take() {
        match validation::validate_incident_title(repo, &title, current).await {
            Ok(title) => changes.incident_title = Some(title),
            Err(validation::TitleError::Invalid(message)) => {
                errors.add("incident_title", message)
            }
            Err(validation::TitleError::Repository(error)) => return Err(error.into()),
        }
    }

    errors.into_result(changes).map_err(AppError::Validation)
}

fn duplicate_title_as_validation(error: RepositoryError) -> AppError {
    match error {
        RepositoryError::DuplicateTitle => {
            AppError::field("incident_title", validation::DUPLICATE_TITLE)
        }
        other => other.into(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryIncidentRepository;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    fn valid_payload(title: &str) -> Map<String, Value> {
        payload(json!({
            "incident_title": title,
            "date_of_incident": "2024-06-15",
            "time_of_incident": "08:15:00",
            "category": "INCIDENT",
            "description": "Forklift clipped a rack",
            "persons_involved_type": "EMPLOYEE",
            "injury_damage_type": "MINOR_INJURY",
            "reported_by_type": "EMPLOYEE",
            "reported_by_name": "Sam",
        }))
    }

    #[test]
    fn incident_number_uses_date_and_id_prefix() {
        let id = Uuid::parse_str("3fa85f64-5717-4562-b3fc-2c963f66afa6").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();

        assert_eq!(incident_number(&id, date), "INC-20240309-3FA85F64");
    }

    #[tokio::test]
    async fn create_fills_defaults() {
        let repo = MemoryIncidentRepository::default();
        let incident = Incident::create(&repo, valid_payload("Rack strike"), now())
            .await
            .expect("valid incident");

        assert_eq!(incident.waste_type, WasteType::NotApplicable);
        assert_eq!(incident.reporting_date, now());
        assert!(incident.is_active);
        assert_eq!(incident.incident_number().len(), "INC-20240615-".len() + 8);
        assert!(repo.find_by_id(incident.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn create_accepts_today_and_rejects_tomorrow() {
        let repo = MemoryIncidentRepository::default();
        Incident::create(&repo, valid_payload("Today"), now())
            .await
            .expect("today is allowed");

        let mut body = valid_payload("Tomorrow");
        let tomorrow = now().date_naive() + Duration::days(1);
        body.insert("date_of_incident".into(), json!(tomorrow.to_string()));

        match Incident::create(&repo, body, now()).await {
            Err(AppError::Validation(errors)) => assert_eq!(
                errors.messages("date_of_incident"),
                ["Incident date cannot be in the future."]
            ),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn titles_are_unique_ignoring_case() {
        let repo = MemoryIncidentRepository::default();
        Incident::create(&repo, valid_payload("Spill A"), now())
            .await
            .expect("first title");

        match Incident::create(&repo, valid_payload("spill a"), now()).await {
            Err(AppError::Validation(errors)) => assert_eq!(
                errors.messages("incident_title"),
                ["An incident with this title already exists."]
            ),
            other => panic!("expected duplicate title, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_applicable_waste_discards_code() {
        let repo = MemoryIncidentRepository::default();
        let mut body = valid_payload("Waste NA");
        body.insert("waste_type".into(), json!("NOT_APPLICABLE"));
        body.insert("waste_category_code".into(), json!("HW 5.1"));

        let incident = Incident::create(&repo, body, now()).await.unwrap();
        let stored = repo.find_by_id(incident.id).await.unwrap().unwrap();
        assert_eq!(stored.waste_category_code, None);
    }

    #[tokio::test]
    async fn hazardous_waste_requires_code() {
        let repo = MemoryIncidentRepository::default();
        let mut body = valid_payload("Waste H");
        body.insert("waste_type".into(), json!("HAZARDOUS"));
        body.insert("waste_category_code".into(), json!(""));

        match Incident::create(&repo, body, now()).await {
            Err(AppError::Validation(errors)) => assert_eq!(
                errors.messages("waste_category_code"),
                ["Waste category code is required when waste is involved."]
            ),
            other => panic!("expected waste error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_fields_are_reported_together() {
        let repo = MemoryIncidentRepository::default();
        let body = payload(json!({ "incident_title": "Only a title" }));

        match Incident::create(&repo, body, now()).await {
            Err(AppError::Validation(errors)) => {
                for field in [
                    "date_of_incident",
                    "time_of_incident",
                    "category",
                    "description",
                    "reported_by_type",
                    "reported_by_name",
                ] {
                    assert_eq!(errors.messages(field), ["This field is required."], "{field}");
                }
                assert!(errors.messages("persons_involved_type").is_empty());
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn partial_update_keeps_own_title_and_bumps_updated_at() {
        let repo = MemoryIncidentRepository::default();
        let incident = Incident::create(&repo, valid_payload("Spill B"), now())
            .await
            .unwrap();
        let later = now() + Duration::hours(2);

        let updated = incident
            .clone()
            .update(
                &repo,
                payload(json!({ "incident_title": "SPILL B", "is_active": false })),
                WriteMode::Partial,
                later,
            )
            .await
            .expect("renaming to own title is allowed");

        assert_eq!(updated.incident_title, "SPILL B");
        assert!(!updated.is_active);
        assert_eq!(updated.updated_at, later);
        assert_eq!(updated.created_at, incident.created_at);
        assert_eq!(updated.description, incident.description);
    }

    #[tokio::test]
    async fn partial_update_switching_to_not_applicable_clears_code() {
        let repo = MemoryIncidentRepository::default();
        let mut body = valid_payload("Drum leak");
        body.insert("waste_type".into(), json!("CHEMICAL"));
        body.insert("waste_category_code".into(), json!("CH-7"));
        let incident = Incident::create(&repo, body, now()).await.unwrap();
        assert_eq!(incident.waste_category_code.as_deref(), Some("CH-7"));

        let updated = incident
            .update(
                &repo,
                payload(json!({ "waste_type": "NOT_APPLICABLE" })),
                WriteMode::Partial,
                now(),
            )
            .await
            .unwrap();
        assert_eq!(updated.waste_category_code, None);
    }

    #[tokio::test]
    async fn full_update_requires_every_required_field() {
        let repo = MemoryIncidentRepository::default();
        let incident = Incident::create(&repo, valid_payload("Spill C"), now())
            .await
            .unwrap();

        match incident
            .update(
                &repo,
                payload(json!({ "description": "new" })),
                WriteMode::Replace,
                now(),
            )
            .await
        {
            Err(AppError::Validation(errors)) => {
                assert_eq!(errors.messages("incident_title"), ["This field is required."])
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
