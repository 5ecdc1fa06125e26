//! Field and cross-field rules applied before an incident or attachment is
//! written.

use std::path::Path;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    error::AppError,
    repository::{IncidentRepository, RepositoryError},
};

use super::choices::{invalid_choice_message, Choice, InjuryDamageType, PersonType, WasteType};

pub const REQUIRED: &str = "This field is required.";
pub const NOT_NULL: &str = "This field may not be null.";
pub const NOT_BLANK: &str = "This field may not be blank.";
pub const NOT_A_STRING: &str = "Not a valid string.";
pub const NOT_A_BOOLEAN: &str = "Must be a valid boolean.";
pub const DATE_FORMAT: &str = "Date has wrong format. Use one of these formats instead: YYYY-MM-DD.";
pub const TIME_FORMAT: &str =
    "Time has wrong format. Use one of these formats instead: hh:mm[:ss[.uuuuuu]].";
pub const FUTURE_DATE: &str = "Incident date cannot be in the future.";
pub const EMPTY_TITLE: &str = "Incident title cannot be empty.";
pub const DUPLICATE_TITLE: &str = "An incident with this title already exists.";
pub const WASTE_CODE_REQUIRED: &str = "Waste category code is required when waste is involved.";
pub const NO_FILE: &str = "No file was submitted.";

pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

pub const ALLOWED_EXTENSIONS: [&str; 17] = [
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".mp4", ".avi", ".mov", ".wmv", ".mp3", ".wav",
    ".m4a", ".pdf", ".doc", ".docx", ".txt", ".rtf",
];

/// A rule violation attributed to one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        FieldError {
            field,
            message: message.into(),
        }
    }
}

impl From<FieldError> for AppError {
    fn from(error: FieldError) -> Self {
        AppError::field(error.field, error.message)
    }
}

#[derive(Debug)]
pub enum TitleError {
    Invalid(&'static str),
    Repository(RepositoryError),
}

pub fn validate_date_of_incident(date: NaiveDate, today: NaiveDate) -> Result<NaiveDate, &'static str> {
    if date > today {
        return Err(FUTURE_DATE);
    }
    Ok(date)
}

pub fn normalize_incident_title(title: &str) -> Result<String, &'static str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(EMPTY_TITLE);
    }
    Ok(title.to_string())
}

/// Trims the title and rejects it when another incident (other than
/// `current`) already uses it, ignoring case.
pub async fn validate_incident_title(
    repo: &dyn IncidentRepository,
    title: &str,
    current: Option<Uuid>,
) -> Result<String, TitleError> {
    let title = normalize_incident_title(title).map_err(TitleError::Invalid)?;
    let taken = repo
        .title_exists(&title, current)
        .await
        .map_err(TitleError::Repository)?;
    if taken {
        return Err(TitleError::Invalid(DUPLICATE_TITLE));
    }
    Ok(title)
}

fn coerce_choice<T: Choice>(value: Option<&str>, sentinel: T) -> Result<T, String> {
    match value.map(str::trim) {
        None | Some("") => Ok(sentinel),
        Some(raw) => T::parse(raw).ok_or_else(|| invalid_choice_message(raw)),
    }
}

pub fn validate_persons_involved_type(value: Option<&str>) -> Result<PersonType, String> {
    coerce_choice(value, PersonType::NotApplicable)
}

pub fn validate_injury_damage_type(value: Option<&str>) -> Result<InjuryDamageType, String> {
    coerce_choice(value, InjuryDamageType::NotApplicable)
}

/// Returns the waste category code to store for `waste_type`.
pub fn validate_waste(
    waste_type: WasteType,
    waste_category_code: Option<String>,
) -> Result<Option<String>, FieldError> {
    if waste_type == WasteType::NotApplicable {
        return Ok(None);
    }
    match waste_category_code {
        Some(code) if !code.trim().is_empty() => Ok(Some(code)),
        _ => Err(FieldError::new("waste_category_code", WASTE_CODE_REQUIRED)),
    }
}

/// Lowercased extension including the leading dot, or an empty string.
pub fn file_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

pub fn validate_file(filename: &str, size: u64) -> Result<(), String> {
    if size > MAX_ATTACHMENT_BYTES {
        return Err(format!(
            "File size cannot exceed {:.1} MB",
            MAX_ATTACHMENT_BYTES as f64 / (1024.0 * 1024.0)
        ));
    }

    let extension = file_extension(filename);
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(format!(
            "File type '{}' is not allowed. Allowed types: {}",
            extension,
            ALLOWED_EXTENSIONS.join(", ")
        ));
    }
    Ok(())
}
