use std::sync::OnceLock;

use actix_multipart::form::{tempfile::TempFile, text::Text, MultipartForm};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::{AppError, ValidationErrors},
    repository::IncidentRepository,
    storage::{key_basename, FileStore, StorageError},
};

use super::{
    choices::{invalid_choice_message, AttachmentType, Choice},
    incident::Incident,
    validation,
};

#[derive(Clone, Debug, PartialEq)]
pub struct IncidentAttachment {
    pub id: Uuid,
    pub incident_id: Uuid,
    /// Storage key of the payload.
    pub file: String,
    pub filename: String,
    pub file_size: u64,
    pub attachment_type: AttachmentType,
    pub description: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, MultipartForm)]
pub struct AttachmentUploadForm {
    pub file: Option<TempFile>,
    pub attachment_type: Option<Text<String>>,
    pub description: Option<Text<String>>,
}

#[derive(Debug, Serialize)]
pub struct IncidentAttachmentResponse {
    pub id: Uuid,
    pub file: String,
    pub file_url: String,
    pub filename: String,
    pub file_size: u64,
    pub file_size_formatted: String,
    pub attachment_type: AttachmentType,
    pub description: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AttachmentUploadResponse {
    pub message: &'static str,
    pub attachment: IncidentAttachmentResponse,
}

#[derive(Debug, Serialize)]
pub struct AttachmentListResponse {
    pub count: usize,
    pub attachments: Vec<IncidentAttachmentResponse>,
}

/// Human readable size with one decimal, e.g. `1.5 MB`.
pub fn format_file_size(size: u64) -> String {
    if size == 0 {
        return "0 B".to_string();
    }
    let mut size = size as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

fn invalid_filename_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^-\w.]").expect("filename pattern compiles"))
}

/// Base name of an uploaded file with spaces turned into `_` and anything
/// other than word characters, `-` and `.` removed.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned = invalid_filename_chars()
        .replace_all(&base.trim().replace(' ', "_"), "")
        .into_owned();
    match cleaned.as_str() {
        "" | "." | ".." => "upload".to_string(),
        _ => cleaned,
    }
}

pub fn attachment_key(incident_id: Uuid, filename: &str) -> String {
    format!("incidents/{incident_id}/attachments/{filename}")
}

impl IncidentAttachment {
    pub fn to_response(&self, files: &dyn FileStore) -> IncidentAttachmentResponse {
        IncidentAttachmentResponse {
            id: self.id,
            file: self.file.clone(),
            file_url: files.url(&self.file),
            filename: self.filename.clone(),
            file_size: self.file_size,
            file_size_formatted: format_file_size(self.file_size),
            attachment_type: self.attachment_type,
            description: self.description.clone(),
            uploaded_at: self.uploaded_at,
        }
    }

    /// Validates the form, stores the payload, and records the attachment
    /// against `incident`.
    pub async fn upload(
        repo: &dyn IncidentRepository,
        files: &dyn FileStore,
        incident: &Incident,
        form: AttachmentUploadForm,
        now: DateTime<Utc>,
    ) -> Result<IncidentAttachment, AppError> {
        let mut errors = ValidationErrors::new();

        let upload = match form.file {
            Some(upload) => {
                let name = upload.file_name.clone().unwrap_or_default();
                if let Err(message) = validation::validate_file(&name, upload.size as u64) {
                    errors.add("file", message);
                }
                Some((upload, name))
            }
            None => {
                errors.add("file", validation::NO_FILE);
                None
            }
        };

        let attachment_type = match form.attachment_type.as_deref().map(|raw| raw.trim()) {
            None | Some("") => {
                errors.add("attachment_type", validation::REQUIRED);
                None
            }
            Some(raw) => {
                let parsed = AttachmentType::parse(raw);
                if parsed.is_none() {
                    errors.add("attachment_type", invalid_choice_message(raw));
                }
                parsed
            }
        };

        let description = form
            .description
            .map(|text| text.into_inner().trim().to_string())
            .filter(|text| !text.is_empty());

        let (Some((upload, name)), Some(attachment_type)) = (upload, attachment_type) else {
            return Err(AppError::Validation(errors));
        };
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        let data = tokio::fs::read(upload.file.path())
            .await
            .map_err(StorageError::from)?;
        let file_size = data.len() as u64;
        let key = attachment_key(incident.id, &sanitize_filename(&name));
        let stored_key = files.save(&key, data).await?;

        let attachment = IncidentAttachment {
            id: Uuid::new_v4(),
            incident_id: incident.id,
            filename: key_basename(&stored_key).to_string(),
            file: stored_key,
            file_size,
            attachment_type,
            description,
            uploaded_at: now,
        };

        if let Err(error) = repo.insert_attachment(&attachment).await {
            remove_payload(files, &attachment.file).await;
            return Err(error.into());
        }
        Ok(attachment)
    }

    /// Removes the stored payload, then the record. A payload that cannot be
    /// removed does not block the record deletion.
    pub async fn delete(
        self,
        repo: &dyn IncidentRepository,
        files: &dyn FileStore,
    ) -> Result<(), AppError> {
        remove_payload(files, &self.file).await;
        repo.delete_attachment(self.id).await?;
        Ok(())
    }
}

pub async fn remove_payload(files: &dyn FileStore, key: &str) {
    if let Err(error) = files.delete(key).await {
        warn!(key, error = %error, "attachment payload could not be removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::incident::fixtures;
    use crate::repository::memory::MemoryIncidentRepository;
    use crate::storage::memory::MemoryFileStore;
    use chrono::{NaiveDate, TimeZone};
    use rstest::rstest;
    use std::io::Write;

    #[rstest]
    #[case(0, "0 B")]
    #[case(512, "512.0 B")]
    #[case(1024, "1.0 KB")]
    #[case(1536, "1.5 KB")]
    #[case(10 * 1024 * 1024, "10.0 MB")]
    #[case(3 * 1024 * 1024 * 1024, "3.0 GB")]
    fn sizes_are_human_readable(#[case] size: u64, #[case] expected: &str) {
        assert_eq!(format_file_size(size), expected);
    }

    #[rstest]
    #[case("site photo.jpg", "site_photo.jpg")]
    #[case("C:\\Users\\me\\scan.pdf", "scan.pdf")]
    #[case("../../etc/passwd", "passwd")]
    #[case("rapport été.pdf", "rapport_été.pdf")]
    #[case("..", "upload")]
    #[case("$%&.txt", ".txt")]
    fn filenames_are_sanitized(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_filename(raw), expected);
    }

    fn temp_upload(name: &str, bytes: &[u8]) -> TempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        TempFile {
            file,
            content_type: None,
            file_name: Some(name.to_string()),
            size: bytes.len(),
        }
    }

    fn form(file: Option<TempFile>, attachment_type: Option<&str>) -> AttachmentUploadForm {
        AttachmentUploadForm {
            file,
            attachment_type: attachment_type.map(|raw| Text(raw.to_string())),
            description: Some(Text("  Photo of the leak ".to_string())),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn upload_derives_name_and_size_from_the_stored_payload() {
        let repo = MemoryIncidentRepository::default();
        let files = MemoryFileStore::new("/media");
        let incident = fixtures::incident("Leak", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        repo.insert(&incident).await.unwrap();

        let first = IncidentAttachment::upload(
            &repo,
            &files,
            &incident,
            form(Some(temp_upload("leak photo.JPG", &[7; 1024])), Some("PHOTO")),
            now(),
        )
        .await
        .unwrap();
        let second = IncidentAttachment::upload(
            &repo,
            &files,
            &incident,
            form(Some(temp_upload("leak photo.JPG", &[8; 10])), Some("PHOTO")),
            now(),
        )
        .await
        .unwrap();

        assert_eq!(first.filename, "leak_photo.JPG");
        assert_eq!(first.file_size, 1024);
        assert_eq!(
            first.file,
            format!("incidents/{}/attachments/leak_photo.JPG", incident.id)
        );
        assert_eq!(first.description.as_deref(), Some("Photo of the leak"));
        assert_ne!(second.filename, first.filename);
        assert_eq!(second.file_size, 10);
        assert_eq!(repo.list_attachments(incident.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upload_to_a_deleted_incident_is_not_found_and_keeps_no_payload() {
        let repo = MemoryIncidentRepository::default();
        let files = MemoryFileStore::new("/media");
        let incident = fixtures::incident("Leak", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        repo.insert(&incident).await.unwrap();
        let loaded = repo.find_by_id(incident.id).await.unwrap().unwrap();
        repo.delete(incident.id).await.unwrap();

        let result = IncidentAttachment::upload(
            &repo,
            &files,
            &loaded,
            form(Some(temp_upload("leak.jpg", b"JFIF")), Some("PHOTO")),
            now(),
        )
        .await;

        assert!(matches!(result, Err(AppError::NotFound("incident"))));
        assert_eq!(files.len().await, 0);
        assert!(repo.list_attachments(incident.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_reports_file_and_type_errors_together() {
        let repo = MemoryIncidentRepository::default();
        let files = MemoryFileStore::new("/media");
        let incident = fixtures::incident("Leak", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());

        let result = IncidentAttachment::upload(
            &repo,
            &files,
            &incident,
            form(Some(temp_upload("payload.exe", b"MZ")), Some("SELFIE")),
            now(),
        )
        .await;

        match result {
            Err(AppError::Validation(errors)) => {
                assert_eq!(errors.messages("file").len(), 1);
                assert!(errors.messages("file")[0].starts_with("File type '.exe' is not allowed."));
                assert_eq!(
                    errors.messages("attachment_type"),
                    ["\"SELFIE\" is not a valid choice."]
                );
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(files.len().await, 0);
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let repo = MemoryIncidentRepository::default();
        let files = MemoryFileStore::new("/media");
        let incident = fixtures::incident("Leak", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());

        match IncidentAttachment::upload(&repo, &files, &incident, form(None, None), now()).await {
            Err(AppError::Validation(errors)) => {
                assert_eq!(errors.messages("file"), ["No file was submitted."]);
                assert_eq!(errors.messages("attachment_type"), ["This field is required."]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_tolerates_missing_payload() {
        let repo = MemoryIncidentRepository::default();
        let files = MemoryFileStore::new("/media");
        let incident = fixtures::incident("Leak", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        repo.insert(&incident).await.unwrap();

        let attachment = IncidentAttachment::upload(
            &repo,
            &files,
            &incident,
            form(Some(temp_upload("notes.txt", b"hello")), Some("DOCUMENT")),
            now(),
        )
        .await
        .unwrap();
        files.delete(&attachment.file).await.unwrap();

        attachment.clone().delete(&repo, &files).await.unwrap();
        assert!(repo
            .find_attachment(incident.id, attachment.id)
            .await
            .unwrap()
            .is_none());
    }
}
