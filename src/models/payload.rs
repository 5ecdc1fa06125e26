//! Field-level parsing of incident write payloads.
//!
//! Every field is read independently so that one request reports all of its
//! field errors at once. Cross-field rules run later, on the merged record.

use chrono::{NaiveDate, NaiveTime};
use serde_json::{Map, Value};

use crate::error::ValidationErrors;

use super::{
    choices::{
        invalid_choice_message, Category, Choice, InjuryDamageType, PersonType, ReportedByType,
        SubCategory, WasteType,
    },
    validation,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Replace,
    Partial,
}

/// Proposed field values. `None` means the field was not supplied; for
/// nullable fields `Some(None)` means it was explicitly cleared.
#[derive(Debug, Default)]
pub struct IncidentChanges {
    pub incident_title: Option<String>,
    pub date_of_incident: Option<NaiveDate>,
    pub time_of_incident: Option<NaiveTime>,
    pub facility: Option<Option<String>>,
    pub department: Option<Option<String>>,
    pub site: Option<Option<String>>,
    pub category: Option<Category>,
    pub sub_category: Option<Option<SubCategory>>,
    pub description: Option<String>,
    pub persons_involved_type: Option<PersonType>,
    pub persons_involved_details: Option<Option<String>>,
    pub injury_damage_type: Option<InjuryDamageType>,
    pub injury_damage_details: Option<Option<String>>,
    pub waste_type: Option<WasteType>,
    pub waste_category_code: Option<Option<String>>,
    pub reported_by_type: Option<ReportedByType>,
    pub reported_by_name: Option<String>,
    pub reported_by_contact: Option<Option<String>>,
    pub is_active: Option<bool>,
}

impl IncidentChanges {
    pub fn read(payload: &Map<String, Value>, mode: WriteMode) -> (IncidentChanges, ValidationErrors) {
        let mut reader = FieldReader {
            payload,
            required: mode != WriteMode::Partial,
            errors: ValidationErrors::new(),
        };

        let changes = IncidentChanges {
            incident_title: reader.title("incident_title"),
            date_of_incident: reader.date("date_of_incident"),
            time_of_incident: reader.time("time_of_incident"),
            facility: reader.optional_text("facility"),
            department: reader.optional_text("department"),
            site: reader.optional_text("site"),
            category: reader.choice("category"),
            sub_category: reader.optional_choice("sub_category"),
            description: reader.text("description"),
            persons_involved_type: reader.coerced_choice(
                "persons_involved_type",
                validation::validate_persons_involved_type,
            ),
            persons_involved_details: reader.optional_text("persons_involved_details"),
            injury_damage_type: reader
                .coerced_choice("injury_damage_type", validation::validate_injury_damage_type),
            injury_damage_details: reader.optional_text("injury_damage_details"),
            waste_type: reader.defaulted_choice("waste_type"),
            waste_category_code: reader.optional_text("waste_category_code"),
            reported_by_type: reader.choice("reported_by_type"),
            reported_by_name: reader.text("reported_by_name"),
            reported_by_contact: reader.optional_text("reported_by_contact"),
            is_active: match mode {
                WriteMode::Create => None,
                _ => reader.boolean("is_active"),
            },
        };

        (changes, reader.errors)
    }
}

struct FieldReader<'a> {
    payload: &'a Map<String, Value>,
    required: bool,
    errors: ValidationErrors,
}

impl<'a> FieldReader<'a> {
    fn present(&mut self, field: &str) -> Option<&'a Value> {
        let value = self.payload.get(field);
        if value.is_none() && self.required {
            self.errors.add(field, validation::REQUIRED);
        }
        value
    }

    fn string(&mut self, field: &str, value: &'a Value) -> Option<&'a str> {
        match value {
            Value::String(text) => Some(text.as_str()),
            Value::Null => {
                self.errors.add(field, validation::NOT_NULL);
                None
            }
            _ => {
                self.errors.add(field, validation::NOT_A_STRING);
                None
            }
        }
    }

    /// Raw title text; emptiness and uniqueness are checked by the title
    /// validator.
    fn title(&mut self, field: &str) -> Option<String> {
        let value = self.present(field)?;
        self.string(field, value).map(str::to_string)
    }

    fn text(&mut self, field: &str) -> Option<String> {
        let value = self.present(field)?;
        let text = self.string(field, value)?.trim();
        if text.is_empty() {
            self.errors.add(field, validation::NOT_BLANK);
            return None;
        }
        Some(text.to_string())
    }

    fn optional_text(&mut self, field: &str) -> Option<Option<String>> {
        match self.payload.get(field)? {
            Value::Null => Some(None),
            Value::String(text) => {
                let text = text.trim();
                Some((!text.is_empty()).then(|| text.to_string()))
            }
            _ => {
                self.errors.add(field, validation::NOT_A_STRING);
                None
            }
        }
    }

    fn choice<T: Choice>(&mut self, field: &str) -> Option<T> {
        let value = self.present(field)?;
        let raw = self.string(field, value)?;
        let parsed = T::parse(raw);
        if parsed.is_none() {
            self.errors.add(field, invalid_choice_message(raw));
        }
        parsed
    }

    fn defaulted_choice<T: Choice>(&mut self, field: &str) -> Option<T> {
        if !self.payload.contains_key(field) {
            return None;
        }
        let required = std::mem::replace(&mut self.required, false);
        let parsed = self.choice(field);
        self.required = required;
        parsed
    }

    fn optional_choice<T: Choice>(&mut self, field: &str) -> Option<Option<T>> {
        match self.payload.get(field)? {
            Value::Null => Some(None),
            Value::String(raw) if raw.is_empty() => Some(None),
            Value::String(raw) => match T::parse(raw) {
                Some(choice) => Some(Some(choice)),
                None => {
                    self.errors.add(field, invalid_choice_message(raw));
                    None
                }
            },
            _ => {
                self.errors.add(field, validation::NOT_A_STRING);
                None
            }
        }
    }

    /// Absent or empty input is handed to `coerce` as `None`; in partial mode
    /// an absent field stays unchanged.
    fn coerced_choice<T>(
        &mut self,
        field: &str,
        coerce: fn(Option<&str>) -> Result<T, String>,
    ) -> Option<T> {
        let raw = match self.payload.get(field) {
            None if !self.required => return None,
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(raw.as_str()),
            Some(_) => {
                self.errors.add(field, validation::NOT_A_STRING);
                return None;
            }
        };
        match coerce(raw) {
            Ok(choice) => Some(choice),
            Err(message) => {
                self.errors.add(field, message);
                None
            }
        }
    }

    fn date(&mut self, field: &str) -> Option<NaiveDate> {
        let value = self.present(field)?;
        let raw = self.string(field, value)?;
        match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                self.errors.add(field, validation::DATE_FORMAT);
                None
            }
        }
    }

    fn time(&mut self, field: &str) -> Option<NaiveTime> {
        let value = self.present(field)?;
        let raw = self.string(field, value)?.trim();
        match NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        {
            Ok(time) => Some(time),
            Err(_) => {
                self.errors.add(field, validation::TIME_FORMAT);
                None
            }
        }
    }

    fn boolean(&mut self, field: &str) -> Option<bool> {
        let parsed = match self.payload.get(field)? {
            Value::Bool(flag) => Some(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(1) => Some(true),
                Some(0) => Some(false),
                _ => None,
            },
            Value::String(raw) => parse_bool(raw),
            _ => None,
        };
        if parsed.is_none() {
            self.errors.add(field, validation::NOT_A_BOOLEAN);
        }
        parsed
    }
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
