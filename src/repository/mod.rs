//! Persistence port for incidents and their attachments.
//!
//! [`IncidentRepository`] is implemented by the MongoDB adapter and by an
//! in-memory store with identical semantics.

use std::{cmp::Ordering, collections::HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    choices::{Category, InjuryDamageType, ReportedByType, SubCategory, WasteType},
    incident::Incident,
    incident_attachment::IncidentAttachment,
};

pub mod memory;
pub mod mongo;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository connection failed: {0}")]
    Connection(String),
    #[error("repository query failed: {0}")]
    Query(String),
    #[error("incident title is already taken")]
    DuplicateTitle,
    #[error("incident {0} does not exist")]
    IncidentNotFound(Uuid),
    #[error("stored record is malformed: {0}")]
    Corrupt(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Exact-match, text-search, and date-window criteria. Unset fields match
/// everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IncidentFilter {
    pub category: Option<Category>,
    pub sub_category: Option<SubCategory>,
    pub facility: Option<String>,
    pub department: Option<String>,
    pub injury_damage_type: Option<InjuryDamageType>,
    pub waste_type: Option<WasteType>,
    pub reported_by_type: Option<ReportedByType>,
    pub is_active: Option<bool>,
    /// Every term must appear, ignoring case, in at least one searchable field.
    pub search_terms: Vec<String>,
    /// Inclusive lower bound on `date_of_incident`.
    pub occurred_from: Option<NaiveDate>,
    /// Inclusive upper bound on `date_of_incident`.
    pub occurred_to: Option<NaiveDate>,
}

impl IncidentFilter {
    pub fn active() -> Self {
        IncidentFilter {
            is_active: Some(true),
            ..Self::default()
        }
    }

    pub fn with_search(mut self, search: &str) -> Self {
        self.search_terms = search
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|term| !term.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    pub fn matches(&self, incident: &Incident) -> bool {
        fn eq<T: PartialEq>(wanted: &Option<T>, actual: &T) -> bool {
            wanted.as_ref().map_or(true, |wanted| wanted == actual)
        }
        fn eq_opt<T: PartialEq>(wanted: &Option<T>, actual: &Option<T>) -> bool {
            wanted
                .as_ref()
                .map_or(true, |wanted| actual.as_ref() == Some(wanted))
        }

        eq(&self.category, &incident.category)
            && eq_opt(&self.sub_category, &incident.sub_category)
            && eq_opt(&self.facility, &incident.facility)
            && eq_opt(&self.department, &incident.department)
            && eq(&self.injury_damage_type, &incident.injury_damage_type)
            && eq(&self.waste_type, &incident.waste_type)
            && eq(&self.reported_by_type, &incident.reported_by_type)
            && eq(&self.is_active, &incident.is_active)
            && self
                .occurred_from
                .map_or(true, |from| incident.date_of_incident >= from)
            && self
                .occurred_to
                .map_or(true, |to| incident.date_of_incident <= to)
            && self.search_terms.iter().all(|term| {
                let term = term.to_lowercase();
                searchable_fields(incident)
                    .into_iter()
                    .flatten()
                    .any(|field| field.to_lowercase().contains(&term))
            })
    }
}

pub const SEARCH_FIELDS: [&str; 6] = [
    "incident_title",
    "description",
    "facility",
    "department",
    "persons_involved_details",
    "reported_by_name",
];

fn searchable_fields(incident: &Incident) -> [Option<&str>; 6] {
    [
        Some(incident.incident_title.as_str()),
        Some(incident.description.as_str()),
        incident.facility.as_deref(),
        incident.department.as_deref(),
        incident.persons_involved_details.as_deref(),
        Some(incident.reported_by_name.as_str()),
    ]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    DateOfIncident,
    ReportingDate,
    IncidentTitle,
    Facility,
}

impl SortField {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "created_at" => Some(SortField::CreatedAt),
            "date_of_incident" => Some(SortField::DateOfIncident),
            "reporting_date" => Some(SortField::ReportingDate),
            "incident_title" => Some(SortField::IncidentTitle),
            "facility" => Some(SortField::Facility),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::DateOfIncident => "date_of_incident",
            SortField::ReportingDate => "reporting_date",
            SortField::IncidentTitle => "incident_title",
            SortField::Facility => "facility",
        }
    }

    fn compare(self, a: &Incident, b: &Incident) -> Ordering {
        match self {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::DateOfIncident => a.date_of_incident.cmp(&b.date_of_incident),
            SortField::ReportingDate => a.reporting_date.cmp(&b.reporting_date),
            SortField::IncidentTitle => a.incident_title.cmp(&b.incident_title),
            SortField::Facility => a.facility.cmp(&b.facility),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub descending: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncidentOrdering(pub Vec<SortKey>);

impl Default for IncidentOrdering {
    /// Newest report first, then most recent occurrence.
    fn default() -> Self {
        IncidentOrdering(vec![
            SortKey {
                field: SortField::ReportingDate,
                descending: true,
            },
            SortKey {
                field: SortField::DateOfIncident,
                descending: true,
            },
        ])
    }
}

impl IncidentOrdering {
    /// Parses `field,-field`; unknown fields are skipped and an empty result
    /// falls back to the default ordering.
    pub fn parse(raw: &str) -> Self {
        let keys: Vec<SortKey> = raw
            .split(',')
            .map(str::trim)
            .filter_map(|term| {
                let (descending, name) = match term.strip_prefix('-') {
                    Some(name) => (true, name),
                    None => (false, term),
                };
                SortField::parse(name).map(|field| SortKey { field, descending })
            })
            .collect();

        if keys.is_empty() {
            Self::default()
        } else {
            IncidentOrdering(keys)
        }
    }

    pub fn compare(&self, a: &Incident, b: &Incident) -> Ordering {
        self.0
            .iter()
            .map(|key| {
                let ordering = key.field.compare(a, b);
                if key.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: Option<u64>,
}

#[derive(Debug)]
pub struct Page<T> {
    /// Matches before slicing.
    pub count: u64,
    pub items: Vec<T>,
}

#[async_trait]
pub trait IncidentRepository: Send + Sync {
    async fn insert(&self, incident: &Incident) -> RepositoryResult<()>;

    async fn replace(&self, incident: &Incident) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Incident>>;

    /// Case-insensitive title lookup, ignoring the incident `exclude`.
    async fn title_exists(&self, title: &str, exclude: Option<Uuid>) -> RepositoryResult<bool>;

    async fn list(
        &self,
        filter: &IncidentFilter,
        ordering: &IncidentOrdering,
        page: PageRequest,
    ) -> RepositoryResult<Page<Incident>>;

    async fn count(&self, filter: &IncidentFilter) -> RepositoryResult<u64>;

    /// Matching incidents per non-empty facility value.
    async fn count_by_facility(&self, filter: &IncidentFilter)
        -> RepositoryResult<Vec<(String, u64)>>;

    /// Deletes the incident together with its attachment records and returns
    /// the attachments removed, or `None` when no such incident exists.
    async fn delete(&self, id: Uuid) -> RepositoryResult<Option<Vec<IncidentAttachment>>>;

    /// Fails with [`RepositoryError::IncidentNotFound`] unless the parent
    /// incident exists once the record is stored.
    async fn insert_attachment(&self, attachment: &IncidentAttachment) -> RepositoryResult<()>;

    async fn find_attachment(
        &self,
        incident_id: Uuid,
        attachment_id: Uuid,
    ) -> RepositoryResult<Option<IncidentAttachment>>;

    /// Attachments of one incident, newest upload first.
    async fn list_attachments(&self, incident_id: Uuid) -> RepositoryResult<Vec<IncidentAttachment>>;

    async fn attachment_counts(&self, incident_ids: &[Uuid]) -> RepositoryResult<HashMap<Uuid, u64>>;

    async fn delete_attachment(&self, attachment_id: Uuid) -> RepositoryResult<bool>;
}
