use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, Bson, Document},
    error::{Error as MongoError, ErrorKind, WriteError, WriteFailure},
    options::{
        Collation, CollationStrength, CountOptions, FindOneOptions, FindOptions, IndexOptions,
    },
    Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::models::{
    choices::{
        AttachmentType, Category, Choice, InjuryDamageType, PersonType, ReportedByType,
        SubCategory, WasteType,
    },
    incident::Incident,
    incident_attachment::IncidentAttachment,
};

use super::{
    IncidentFilter, IncidentOrdering, IncidentRepository, Page, PageRequest, RepositoryError,
    RepositoryResult, SEARCH_FIELDS,
};

const INCIDENTS: &str = "incidents";
const ATTACHMENTS: &str = "incident_attachments";
const DUPLICATE_KEY: i32 = 11000;
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

#[derive(Debug, Serialize, Deserialize)]
struct IncidentDocument {
    #[serde(rename = "_id")]
    id: String,
    incident_title: String,
    date_of_incident: String,
    time_of_incident: String,
    facility: Option<String>,
    department: Option<String>,
    site: Option<String>,
    category: Category,
    sub_category: Option<SubCategory>,
    description: String,
    persons_involved_type: PersonType,
    persons_involved_details: Option<String>,
    injury_damage_type: InjuryDamageType,
    injury_damage_details: Option<String>,
    waste_type: WasteType,
    waste_category_code: Option<String>,
    reported_by_type: ReportedByType,
    reported_by_name: String,
    reported_by_contact: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    reporting_date: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    updated_at: DateTime<Utc>,
    is_active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct AttachmentDocument {
    #[serde(rename = "_id")]
    id: String,
    incident_id: String,
    file: String,
    filename: String,
    file_size: i64,
    attachment_type: AttachmentType,
    description: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    uploaded_at: DateTime<Utc>,
}

impl From<&Incident> for IncidentDocument {
    fn from(incident: &Incident) -> Self {
        IncidentDocument {
            id: incident.id.to_string(),
            incident_title: incident.incident_title.clone(),
            date_of_incident: incident.date_of_incident.format(DATE_FORMAT).to_string(),
            time_of_incident: incident.time_of_incident.format(TIME_FORMAT).to_string(),
            facility: incident.facility.clone(),
            department: incident.department.clone(),
            site: incident.site.clone(),
            category: incident.category,
            sub_category: incident.sub_category,
            description: incident.description.clone(),
            persons_involved_type: incident.persons_involved_type,
            persons_involved_details: incident.persons_involved_details.clone(),
            injury_damage_type: incident.injury_damage_type,
            injury_damage_details: incident.injury_damage_details.clone(),
            waste_type: incident.waste_type,
            waste_category_code: incident.waste_category_code.clone(),
            reported_by_type: incident.reported_by_type,
            reported_by_name: incident.reported_by_name.clone(),
            reported_by_contact: incident.reported_by_contact.clone(),
            reporting_date: incident.reporting_date,
            created_at: incident.created_at,
            updated_at: incident.updated_at,
            is_active: incident.is_active,
        }
    }
}

impl TryFrom<IncidentDocument> for Incident {
    type Error = RepositoryError;

    fn try_from(document: IncidentDocument) -> Result<Self, Self::Error> {
        Ok(Incident {
            id: parse_id(&document.id)?,
            date_of_incident: NaiveDate::parse_from_str(&document.date_of_incident, DATE_FORMAT)
                .map_err(|error| corrupt("date_of_incident", error))?,
            time_of_incident: NaiveTime::parse_from_str(&document.time_of_incident, TIME_FORMAT)
                .map_err(|error| corrupt("time_of_incident", error))?,
            incident_title: document.incident_title,
            facility: document.facility,
            department: document.department,
            site: document.site,
            category: document.category,
            sub_category: document.sub_category,
            description: document.description,
            persons_involved_type: document.persons_involved_type,
            persons_involved_details: document.persons_involved_details,
            injury_damage_type: document.injury_damage_type,
            injury_damage_details: document.injury_damage_details,
            waste_type: document.waste_type,
            waste_category_code: document.waste_category_code,
            reported_by_type: document.reported_by_type,
            reported_by_name: document.reported_by_name,
            reported_by_contact: document.reported_by_contact,
            reporting_date: document.reporting_date,
            created_at: document.created_at,
            updated_at: document.updated_at,
            is_active: document.is_active,
        })
    }
}

impl From<&IncidentAttachment> for AttachmentDocument {
    fn from(attachment: &IncidentAttachment) -> Self {
        AttachmentDocument {
            id: attachment.id.to_string(),
            incident_id: attachment.incident_id.to_string(),
            file: attachment.file.clone(),
            filename: attachment.filename.clone(),
            file_size: i64::try_from(attachment.file_size).unwrap_or(i64::MAX),
            attachment_type: attachment.attachment_type,
            description: attachment.description.clone(),
            uploaded_at: attachment.uploaded_at,
        }
    }
}

impl TryFrom<AttachmentDocument> for IncidentAttachment {
    type Error = RepositoryError;

    fn try_from(document: AttachmentDocument) -> Result<Self, Self::Error> {
        Ok(IncidentAttachment {
            id: parse_id(&document.id)?,
            incident_id: parse_id(&document.incident_id)?,
            file_size: u64::try_from(document.file_size)
                .map_err(|error| corrupt("file_size", error))?,
            file: document.file,
            filename: document.filename,
            attachment_type: document.attachment_type,
            description: document.description,
            uploaded_at: document.uploaded_at,
        })
    }
}

fn parse_id(raw: &str) -> RepositoryResult<Uuid> {
    Uuid::parse_str(raw).map_err(|error| corrupt("_id", error))
}

fn corrupt(field: &str, error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Corrupt(format!("{field}: {error}"))
}

fn query_error(error: MongoError) -> RepositoryError {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(WriteError {
            code: DUPLICATE_KEY,
            ..
        })) => RepositoryError::DuplicateTitle,
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) | ErrorKind::DnsResolve { .. } => {
            RepositoryError::Connection(error.to_string())
        }
        _ => RepositoryError::Query(error.to_string()),
    }
}

/// English, case-insensitive comparison used for titles.
fn title_collation() -> Collation {
    Collation::builder()
        .locale("en")
        .strength(CollationStrength::Secondary)
        .build()
}

fn filter_document(filter: &IncidentFilter) -> Document {
    let mut query = Document::new();

    if let Some(category) = filter.category {
        query.insert("category", category.value());
    }
    if let Some(sub_category) = filter.sub_category {
        query.insert("sub_category", sub_category.value());
    }
    if let Some(facility) = &filter.facility {
        query.insert("facility", facility);
    }
    if let Some(department) = &filter.department {
        query.insert("department", department);
    }
    if let Some(injury) = filter.injury_damage_type {
        query.insert("injury_damage_type", injury.value());
    }
    if let Some(waste) = filter.waste_type {
        query.insert("waste_type", waste.value());
    }
    if let Some(reported_by) = filter.reported_by_type {
        query.insert("reported_by_type", reported_by.value());
    }
    if let Some(is_active) = filter.is_active {
        query.insert("is_active", is_active);
    }

    let mut window = Document::new();
    if let Some(from) = filter.occurred_from {
        window.insert("$gte", from.format(DATE_FORMAT).to_string());
    }
    if let Some(to) = filter.occurred_to {
        window.insert("$lte", to.format(DATE_FORMAT).to_string());
    }
    if !window.is_empty() {
        query.insert("date_of_incident", window);
    }

    if !filter.search_terms.is_empty() {
        let terms: Vec<Document> = filter
            .search_terms
            .iter()
            .map(|term| {
                let pattern = regex::escape(term);
                let fields: Vec<Document> = SEARCH_FIELDS
                    .iter()
                    .map(|field| doc! { *field: { "$regex": &pattern, "$options": "i" } })
                    .collect();
                doc! { "$or": fields }
            })
            .collect();
        query.insert("$and", terms);
    }

    query
}

fn sort_document(ordering: &IncidentOrdering) -> Document {
    let mut sort = Document::new();
    for key in &ordering.0 {
        let field = key.field.name();
        if !sort.contains_key(field) {
            sort.insert(field, if key.descending { -1 } else { 1 });
        }
    }
    sort.insert("_id", 1);
    sort
}

fn count_of(value: Option<&Bson>) -> u64 {
    match value {
        Some(Bson::Int32(count)) => u64::try_from(*count).unwrap_or_default(),
        Some(Bson::Int64(count)) => u64::try_from(*count).unwrap_or_default(),
        _ => 0,
    }
}

#[derive(Clone, Debug)]
pub struct MongoIncidentRepository {
    incidents: Collection<IncidentDocument>,
    attachments: Collection<AttachmentDocument>,
}

impl MongoIncidentRepository {
    pub fn new(db: &Database) -> Self {
        MongoIncidentRepository {
            incidents: db.collection::<IncidentDocument>(INCIDENTS),
            attachments: db.collection::<AttachmentDocument>(ATTACHMENTS),
        }
    }

    /// Creates the unique title index and the lookup indexes. Safe to call on
    /// every start.
    pub async fn ensure_indexes(&self) -> RepositoryResult<()> {
        let unique_title = IndexModel::builder()
            .keys(doc! { "incident_title": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .collation(title_collation())
                    .build(),
            )
            .build();
        let mut models = vec![unique_title];
        for field in ["date_of_incident", "category", "facility", "reporting_date"] {
            models.push(IndexModel::builder().keys(doc! { field: 1 }).build());
        }

        self.incidents
            .create_indexes(models, None)
            .await
            .map_err(query_error)?;
        self.attachments
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "incident_id": 1, "uploaded_at": -1 })
                    .build(),
                None,
            )
            .await
            .map_err(query_error)?;

        info!("incident indexes are in place");
        Ok(())
    }

    async fn incident_exists(&self, id: &str) -> RepositoryResult<bool> {
        let options = CountOptions::builder().limit(1).build();
        let count = self
            .incidents
            .count_documents(doc! { "_id": id }, options)
            .await
            .map_err(query_error)?;
        Ok(count > 0)
    }
}

#[async_trait]
impl IncidentRepository for MongoIncidentRepository {
    async fn insert(&self, incident: &Incident) -> RepositoryResult<()> {
        self.incidents
            .insert_one(IncidentDocument::from(incident), None)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn replace(&self, incident: &Incident) -> RepositoryResult<()> {
        let result = self
            .incidents
            .replace_one(
                doc! { "_id": incident.id.to_string() },
                IncidentDocument::from(incident),
                None,
            )
            .await
            .map_err(query_error)?;
        if result.matched_count == 0 {
            return Err(RepositoryError::IncidentNotFound(incident.id));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Incident>> {
        self.incidents
            .find_one(doc! { "_id": id.to_string() }, None)
            .await
            .map_err(query_error)?
            .map(Incident::try_from)
            .transpose()
    }

    async fn title_exists(&self, title: &str, exclude: Option<Uuid>) -> RepositoryResult<bool> {
        let mut filter = doc! { "incident_title": title };
        if let Some(exclude) = exclude {
            filter.insert("_id", doc! { "$ne": exclude.to_string() });
        }
        let options = FindOneOptions::builder()
            .collation(title_collation())
            .projection(doc! { "_id": 1 })
            .build();

        Ok(self
            .incidents
            .clone_with_type::<Document>()
            .find_one(filter, options)
            .await
            .map_err(query_error)?
            .is_some())
    }

    async fn list(
        &self,
        filter: &IncidentFilter,
        ordering: &IncidentOrdering,
        page: PageRequest,
    ) -> RepositoryResult<Page<Incident>> {
        let query = filter_document(filter);
        let count = self
            .incidents
            .count_documents(query.clone(), None)
            .await
            .map_err(query_error)?;

        let options = FindOptions::builder()
            .sort(sort_document(ordering))
            .skip(page.offset)
            .limit(page.limit.map(|limit| i64::try_from(limit).unwrap_or(i64::MAX)))
            .build();
        let documents: Vec<IncidentDocument> = self
            .incidents
            .find(query, options)
            .await
            .map_err(query_error)?
            .try_collect()
            .await
            .map_err(query_error)?;

        let items = documents
            .into_iter()
            .map(Incident::try_from)
            .collect::<RepositoryResult<Vec<_>>>()?;
        Ok(Page { count, items })
    }

    async fn count(&self, filter: &IncidentFilter) -> RepositoryResult<u64> {
        self.incidents
            .count_documents(filter_document(filter), None)
            .await
            .map_err(query_error)
    }

    async fn count_by_facility(
        &self,
        filter: &IncidentFilter,
    ) -> RepositoryResult<Vec<(String, u64)>> {
        let pipeline = vec![
            doc! {
                "$match": {
                    "$and": [
                        filter_document(filter),
                        { "facility": { "$nin": [Bson::Null, ""] } },
                    ]
                }
            },
            doc! { "$group": { "_id": "$facility", "count": { "$sum": 1 } } },
            doc! { "$sort": { "_id": 1 } },
        ];

        let groups: Vec<Document> = self
            .incidents
            .aggregate(pipeline, None)
            .await
            .map_err(query_error)?
            .try_collect()
            .await
            .map_err(query_error)?;

        groups
            .iter()
            .map(|group| {
                let facility = group
                    .get_str("_id")
                    .map_err(|error| corrupt("facility", error))?;
                Ok((facility.to_string(), count_of(group.get("count"))))
            })
            .collect()
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<Option<Vec<IncidentAttachment>>> {
        let deleted = self
            .incidents
            .delete_one(doc! { "_id": id.to_string() }, None)
            .await
            .map_err(query_error)?
            .deleted_count;
        if deleted == 0 {
            return Ok(None);
        }
        // Attachments stored after this point roll themselves back in
        // `insert_attachment`, so only the ones read here need removing.
        let removed = self.list_attachments(id).await?;
        let ids: Vec<String> = removed
            .iter()
            .map(|attachment| attachment.id.to_string())
            .collect();
        self.attachments
            .delete_many(doc! { "_id": { "$in": ids } }, None)
            .await
            .map_err(query_error)?;
        Ok(Some(removed))
    }

    async fn insert_attachment(&self, attachment: &IncidentAttachment) -> RepositoryResult<()> {
        let incident_id = attachment.incident_id.to_string();
        if !self.incident_exists(&incident_id).await? {
            return Err(RepositoryError::IncidentNotFound(attachment.incident_id));
        }
        self.attachments
            .insert_one(AttachmentDocument::from(attachment), None)
            .await
            .map_err(query_error)?;
        // The incident may have been deleted between the check and the insert.
        if !self.incident_exists(&incident_id).await? {
            self.attachments
                .delete_one(doc! { "_id": attachment.id.to_string() }, None)
                .await
                .map_err(query_error)?;
            return Err(RepositoryError::IncidentNotFound(attachment.incident_id));
        }
        Ok(())
    }

    async fn find_attachment(
        &self,
        incident_id: Uuid,
        attachment_id: Uuid,
    ) -> RepositoryResult<Option<IncidentAttachment>> {
        self.attachments
            .find_one(
                doc! {
                    "_id": attachment_id.to_string(),
                    "incident_id": incident_id.to_string(),
                },
                None,
            )
            .await
            .map_err(query_error)?
            .map(IncidentAttachment::try_from)
            .transpose()
    }

    async fn list_attachments(&self, incident_id: Uuid) -> RepositoryResult<Vec<IncidentAttachment>> {
        let options = FindOptions::builder()
            .sort(doc! { "uploaded_at": -1, "_id": 1 })
            .build();
        let documents: Vec<AttachmentDocument> = self
            .attachments
            .find(doc! { "incident_id": incident_id.to_string() }, options)
            .await
            .map_err(query_error)?
            .try_collect()
            .await
            .map_err(query_error)?;

        documents
            .into_iter()
            .map(IncidentAttachment::try_from)
            .collect()
    }

    async fn attachment_counts(&self, incident_ids: &[Uuid]) -> RepositoryResult<HashMap<Uuid, u64>> {
        if incident_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<String> = incident_ids.iter().map(Uuid::to_string).collect();
        let pipeline = vec![
            doc! { "$match": { "incident_id": { "$in": ids } } },
            doc! { "$group": { "_id": "$incident_id", "count": { "$sum": 1 } } },
        ];

        let groups: Vec<Document> = self
            .attachments
            .aggregate(pipeline, None)
            .await
            .map_err(query_error)?
            .try_collect()
            .await
            .map_err(query_error)?;

        groups
            .iter()
            .map(|group| {
                let id = group
                    .get_str("_id")
                    .map_err(|error| corrupt("incident_id", error))?;
                Ok((parse_id(id)?, count_of(group.get("count"))))
            })
            .collect()
    }

    async fn delete_attachment(&self, attachment_id: Uuid) -> RepositoryResult<bool> {
        let result = self
            .attachments
            .delete_one(doc! { "_id": attachment_id.to_string() }, None)
            .await
            .map_err(query_error)?;
        Ok(result.deleted_count > 0)
    }
}
