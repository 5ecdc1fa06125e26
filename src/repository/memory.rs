use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{incident::Incident, incident_attachment::IncidentAttachment};

use super::{
    IncidentFilter, IncidentOrdering, IncidentRepository, Page, PageRequest, RepositoryError,
    RepositoryResult,
};

#[derive(Debug, Default)]
struct Tables {
    incidents: HashMap<Uuid, Incident>,
    attachments: HashMap<Uuid, IncidentAttachment>,
}

impl Tables {
    fn title_taken(&self, title: &str, exclude: Option<Uuid>) -> bool {
        let title = title.to_lowercase();
        self.incidents
            .values()
            .any(|incident| Some(incident.id) != exclude && incident.incident_title.to_lowercase() == title)
    }
}

/// Process-local repository with the same semantics as the MongoDB adapter,
/// including the case-insensitive unique title.
#[derive(Debug, Default)]
pub struct MemoryIncidentRepository {
    tables: RwLock<Tables>,
}

#[async_trait]
impl IncidentRepository for MemoryIncidentRepository {
    async fn insert(&self, incident: &Incident) -> RepositoryResult<()> {
        let mut tables = self.tables.write().await;
        if tables.title_taken(&incident.incident_title, None) {
            return Err(RepositoryError::DuplicateTitle);
        }
        tables.incidents.insert(incident.id, incident.clone());
        Ok(())
    }

    async fn replace(&self, incident: &Incident) -> RepositoryResult<()> {
        let mut tables = self.tables.write().await;
        if tables.title_taken(&incident.incident_title, Some(incident.id)) {
            return Err(RepositoryError::DuplicateTitle);
        }
        match tables.incidents.get_mut(&incident.id) {
            Some(stored) => {
                *stored = incident.clone();
                Ok(())
            }
            None => Err(RepositoryError::IncidentNotFound(incident.id)),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Incident>> {
        Ok(self.tables.read().await.incidents.get(&id).cloned())
    }

    async fn title_exists(&self, title: &str, exclude: Option<Uuid>) -> RepositoryResult<bool> {
        Ok(self.tables.read().await.title_taken(title, exclude))
    }

    async fn list(
        &self,
        filter: &IncidentFilter,
        ordering: &IncidentOrdering,
        page: PageRequest,
    ) -> RepositoryResult<Page<Incident>> {
        let tables = self.tables.read().await;
        let mut matches: Vec<&Incident> = tables
            .incidents
            .values()
            .filter(|incident| filter.matches(incident))
            .collect();
        // Id as the last key keeps pages stable between calls.
        matches.sort_by(|a, b| ordering.compare(a, b).then_with(|| a.id.cmp(&b.id)));

        let count = matches.len() as u64;
        let items = matches
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit.map_or(usize::MAX, |limit| limit as usize))
            .cloned()
            .collect();
        Ok(Page { count, items })
    }

    async fn count(&self, filter: &IncidentFilter) -> RepositoryResult<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .incidents
            .values()
            .filter(|incident| filter.matches(incident))
            .count() as u64)
    }

    async fn count_by_facility(
        &self,
        filter: &IncidentFilter,
    ) -> RepositoryResult<Vec<(String, u64)>> {
        let tables = self.tables.read().await;
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for incident in tables.incidents.values().filter(|incident| filter.matches(incident)) {
            if let Some(facility) = incident.facility.as_deref().filter(|f| !f.is_empty()) {
                *counts.entry(facility).or_default() += 1;
            }
        }
        let mut counts: Vec<(String, u64)> = counts
            .into_iter()
            .map(|(facility, count)| (facility.to_string(), count))
            .collect();
        counts.sort();
        Ok(counts)
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<Option<Vec<IncidentAttachment>>> {
        let mut tables = self.tables.write().await;
        if tables.incidents.remove(&id).is_none() {
            return Ok(None);
        }
        let (removed, kept): (HashMap<_, _>, HashMap<_, _>) =
            std::mem::take(&mut tables.attachments)
                .into_iter()
                .partition(|(_, attachment)| attachment.incident_id == id);
        tables.attachments = kept;
        Ok(Some(removed.into_values().collect()))
    }

    async fn insert_attachment(&self, attachment: &IncidentAttachment) -> RepositoryResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.incidents.contains_key(&attachment.incident_id) {
            return Err(RepositoryError::IncidentNotFound(attachment.incident_id));
        }
        tables.attachments.insert(attachment.id, attachment.clone());
        Ok(())
    }

    async fn find_attachment(
        &self,
        incident_id: Uuid,
        attachment_id: Uuid,
    ) -> RepositoryResult<Option<IncidentAttachment>> {
        Ok(self
            .tables
            .read()
            .await
            .attachments
            .get(&attachment_id)
            .filter(|attachment| attachment.incident_id == incident_id)
            .cloned())
    }

    async fn list_attachments(&self, incident_id: Uuid) -> RepositoryResult<Vec<IncidentAttachment>> {
        let tables = self.tables.read().await;
        let mut attachments: Vec<IncidentAttachment> = tables
            .attachments
            .values()
            .filter(|attachment| attachment.incident_id == incident_id)
            .cloned()
            .collect();
        attachments.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(attachments)
    }

    async fn attachment_counts(&self, incident_ids: &[Uuid]) -> RepositoryResult<HashMap<Uuid, u64>> {
        let tables = self.tables.read().await;
        let mut counts = HashMap::new();
        for attachment in tables.attachments.values() {
            if incident_ids.contains(&attachment.incident_id) {
                *counts.entry(attachment.incident_id).or_default() += 1;
            }
        }
        Ok(counts)
    }

    async fn delete_attachment(&self, attachment_id: Uuid) -> RepositoryResult<bool> {
        Ok(self
            .tables
            .write()
            .await
            .attachments
            .remove(&attachment_id)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{choices::AttachmentType, incident::fixtures};
    use crate::repository::{SortField, SortKey};
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn attachment(incident_id: Uuid, minutes: i64) -> IncidentAttachment {
        IncidentAttachment {
            id: Uuid::new_v4(),
            incident_id,
            file: format!("incidents/{incident_id}/attachments/{minutes}.jpg"),
            filename: format!("{minutes}.jpg"),
            file_size: 10,
            attachment_type: AttachmentType::Photo,
            description: None,
            uploaded_at: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
                + Duration::minutes(minutes),
        }
    }

    #[tokio::test]
    async fn duplicate_titles_are_rejected_ignoring_case() {
        let repo = MemoryIncidentRepository::default();
        let first = fixtures::incident("Gas leak", date(2024, 6, 1));
        repo.insert(&first).await.unwrap();

        let second = fixtures::incident("GAS LEAK", date(2024, 6, 2));
        assert!(matches!(
            repo.insert(&second).await,
            Err(RepositoryError::DuplicateTitle)
        ));
        assert!(repo.title_exists("gas leak", None).await.unwrap());
        assert!(!repo.title_exists("gas leak", Some(first.id)).await.unwrap());
    }

    #[tokio::test]
    async fn list_pages_after_ordering() {
        let repo = MemoryIncidentRepository::default();
        for (title, facility) in [("C", "Plant 3"), ("A", "Plant 1"), ("B", "Plant 2")] {
            let mut incident = fixtures::incident(title, date(2024, 6, 1));
            incident.facility = Some(facility.into());
            repo.insert(&incident).await.unwrap();
        }

        let ordering = IncidentOrdering(vec![SortKey {
            field: SortField::Facility,
            descending: true,
        }]);
        let page = repo
            .list(
                &IncidentFilter::default(),
                &ordering,
                PageRequest {
                    offset: 1,
                    limit: Some(1),
                },
            )
            .await
            .unwrap();

        assert_eq!(page.count, 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].incident_title, "B");
    }

    #[tokio::test]
    async fn facility_counts_skip_missing_values() {
        let repo = MemoryIncidentRepository::default();
        let mut blank = fixtures::incident("Blank", date(2024, 6, 1));
        blank.facility = None;
        repo.insert(&blank).await.unwrap();
        repo.insert(&fixtures::incident("One", date(2024, 6, 1)))
            .await
            .unwrap();
        repo.insert(&fixtures::incident("Two", date(2024, 6, 1)))
            .await
            .unwrap();

        let counts = repo
            .count_by_facility(&IncidentFilter::default())
            .await
            .unwrap();
        assert_eq!(counts, vec![("Plant 1".to_string(), 2)]);
    }

    #[tokio::test]
    async fn deleting_an_incident_cascades_to_attachments() {
        let repo = MemoryIncidentRepository::default();
        let incident = fixtures::incident("Cascade", date(2024, 6, 1));
        let other = fixtures::incident("Other", date(2024, 6, 1));
        repo.insert(&incident).await.unwrap();
        repo.insert(&other).await.unwrap();

        let older = attachment(incident.id, 0);
        let newer = attachment(incident.id, 5);
        let kept = attachment(other.id, 0);
        for attachment in [&older, &newer, &kept] {
            repo.insert_attachment(attachment).await.unwrap();
        }

        let listed = repo.list_attachments(incident.id).await.unwrap();
        assert_eq!(listed, vec![newer.clone(), older.clone()]);
        assert!(repo
            .find_attachment(other.id, newer.id)
            .await
            .unwrap()
            .is_none());

        let counts = repo
            .attachment_counts(&[incident.id, other.id])
            .await
            .unwrap();
        assert_eq!(counts[&incident.id], 2);
        assert_eq!(counts[&other.id], 1);

        let mut removed = repo.delete(incident.id).await.unwrap().unwrap();
        removed.sort_by_key(|attachment| attachment.uploaded_at);
        assert_eq!(removed, vec![older.clone(), newer]);
        assert!(repo.delete(incident.id).await.unwrap().is_none());
        assert!(repo.list_attachments(incident.id).await.unwrap().is_empty());
        assert_eq!(repo.list_attachments(other.id).await.unwrap(), vec![kept]);
    }

    #[tokio::test]
    async fn attachments_need_an_existing_incident() {
        let repo = MemoryIncidentRepository::default();
        let incident = fixtures::incident("Gone", date(2024, 6, 1));
        repo.insert(&incident).await.unwrap();
        repo.delete(incident.id).await.unwrap();

        let error = repo
            .insert_attachment(&attachment(incident.id, 0))
            .await
            .unwrap_err();
        assert!(matches!(error, RepositoryError::IncidentNotFound(id) if id == incident.id));
        assert!(repo.list_attachments(incident.id).await.unwrap().is_empty());
    }
}
