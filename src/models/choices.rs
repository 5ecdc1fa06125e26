use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A closed set of stored values, each paired with a display label.
pub trait Choice: Copy + Sized + 'static {
    /// Values offered to clients, in display order.
    const CHOICES: &'static [Self];

    fn value(self) -> &'static str;
    fn label(self) -> &'static str;
    fn parse(value: &str) -> Option<Self>;
}

#[derive(Debug, Serialize)]
pub struct ChoiceOption {
    pub value: &'static str,
    pub label: &'static str,
}

pub fn options<T: Choice>() -> Vec<ChoiceOption> {
    T::CHOICES
        .iter()
        .map(|choice| ChoiceOption {
            value: choice.value(),
            label: choice.label(),
        })
        .collect()
}

pub fn invalid_choice_message(value: &str) -> String {
    format!("\"{value}\" is not a valid choice.")
}

// Variants listed under `unlisted` parse and serialize but are not offered as
// choices.
macro_rules! choice_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => ($value:literal, $label:literal),)+
        }
        $(unlisted {
            $($extra:ident => ($extra_value:literal, $extra_label:literal),)+
        })?
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant,)+
            $($($extra,)+)?
        }

        impl Choice for $name {
            const CHOICES: &'static [Self] = &[$($name::$variant),+];

            fn value(self) -> &'static str {
                match self {
                    $($name::$variant => $value,)+
                    $($($name::$extra => $extra_value,)+)?
                }
            }

            fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                    $($($name::$extra => $extra_label,)+)?
                }
            }

            fn parse(value: &str) -> Option<Self> {
                match value {
                    $($value => Some($name::$variant),)+
                    $($($extra_value => Some($name::$extra),)+)?
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.value())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.value())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                <$name as Choice>::parse(&value)
                    .ok_or_else(|| de::Error::custom(invalid_choice_message(&value)))
            }
        }
    };
}

choice_enum! {
    pub enum Category {
        Incident => ("INCIDENT", "Incident"),
        NearMiss => ("NEAR_MISS", "Near-Miss"),
        UnsafeAct => ("UNSAFE_ACT", "Unsafe Act"),
        UnsafeCondition => ("UNSAFE_CONDITION", "Unsafe Condition"),
    }
}

choice_enum! {
    pub enum SubCategory {
        Fire => ("FIRE", "Fire"),
        Spill => ("SPILL", "Spill"),
        Exposure => ("EXPOSURE", "Exposure"),
        EquipmentFailure => ("EQUIPMENT_FAILURE", "Equipment Failure"),
        ChemicalLeak => ("CHEMICAL_LEAK", "Chemical Leak"),
        Explosion => ("EXPLOSION", "Explosion"),
        Electrical => ("ELECTRICAL", "Electrical"),
        Structural => ("STRUCTURAL", "Structural"),
        Environmental => ("ENVIRONMENTAL", "Environmental"),
        Other => ("OTHER", "Other"),
    }
}

choice_enum! {
    pub enum PersonType {
        Employee => ("EMPLOYEE", "Employee"),
        Contractor => ("CONTRACTOR", "Contractor"),
        ThirdParty => ("THIRD_PARTY", "Third Party"),
        Visitor => ("VISITOR", "Visitor"),
    }
    unlisted {
        NotApplicable => ("NOT_APPLICABLE", "Not Applicable"),
    }
}

choice_enum! {
    pub enum InjuryDamageType {
        NoInjury => ("NO_INJURY", "No Injury"),
        MinorInjury => ("MINOR_INJURY", "Minor Injury"),
        MajorInjury => ("MAJOR_INJURY", "Major Injury"),
        Fatality => ("FATALITY", "Fatality"),
        PropertyDamage => ("PROPERTY_DAMAGE", "Property Damage"),
        EnvironmentalImpact => ("ENVIRONMENTAL_IMPACT", "Environmental Impact"),
        NearMiss => ("NEAR_MISS", "Near Miss"),
    }
    unlisted {
        NotApplicable => ("NOT_APPLICABLE", "Not Applicable"),
    }
}

choice_enum! {
    pub enum WasteType {
        Hazardous => ("HAZARDOUS", "Hazardous"),
        NonHazardous => ("NON_HAZARDOUS", "Non-Hazardous"),
        Biomedical => ("BIOMEDICAL", "Biomedical"),
        EWaste => ("E_WASTE", "E-Waste"),
        Chemical => ("CHEMICAL", "Chemical"),
        Construction => ("CONSTRUCTION", "Construction"),
        NotApplicable => ("NOT_APPLICABLE", "Not Applicable"),
    }
}

impl Default for WasteType {
    fn default() -> Self {
        WasteType::NotApplicable
    }
}

choice_enum! {
    pub enum ReportedByType {
        Employee => ("EMPLOYEE", "Employee"),
        Contractor => ("CONTRACTOR", "Contractor"),
        Visitor => ("VISITOR", "Visitor"),
        IotSensor => ("IOT_SENSOR", "Automated IoT Sensor Trigger"),
    }
}

choice_enum! {
    pub enum AttachmentType {
        Photo => ("PHOTO", "Photo"),
        Video => ("VIDEO", "Video"),
        VoiceNote => ("VOICE_NOTE", "Voice Note"),
        Document => ("DOCUMENT", "Document"),
        Other => ("OTHER", "Other"),
    }
}

/// Value/label tables for every enumerated field, as served to form clients.
#[derive(Debug, Serialize)]
pub struct ChoiceTables {
    pub categories: Vec<ChoiceOption>,
    pub sub_categories: Vec<ChoiceOption>,
    pub person_types: Vec<ChoiceOption>,
    pub injury_damage_types: Vec<ChoiceOption>,
    pub waste_types: Vec<ChoiceOption>,
    pub reported_by_types: Vec<ChoiceOption>,
    pub attachment_types: Vec<ChoiceOption>,
}

impl ChoiceTables {
    pub fn build() -> Self {
        ChoiceTables {
            categories: options::<Category>(),
            sub_categories: options::<SubCategory>(),
            person_types: options::<PersonType>(),
            injury_damage_types: options::<InjuryDamageType>(),
            waste_types: options::<WasteType>(),
            reported_by_types: options::<ReportedByType>(),
            attachment_types: options::<AttachmentType>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("NEAR_MISS", Some(Category::NearMiss))]
    #[case("UNSAFE_CONDITION", Some(Category::UnsafeCondition))]
    #[case("near_miss", None)]
    #[case("", None)]
    fn category_parses_exact_values(#[case] raw: &str, #[case] expected: Option<Category>) {
        assert_eq!(Category::parse(raw), expected);
    }

    #[test]
    fn sentinel_parses_but_is_not_offered() {
        assert_eq!(
            PersonType::parse("NOT_APPLICABLE"),
            Some(PersonType::NotApplicable)
        );
        assert!(!PersonType::CHOICES.contains(&PersonType::NotApplicable));
        assert!(!InjuryDamageType::CHOICES.contains(&InjuryDamageType::NotApplicable));
        assert_eq!(InjuryDamageType::CHOICES.len(), 7);
    }

    #[test]
    fn serde_uses_stored_values() {
        let json = serde_json::to_string(&ReportedByType::IotSensor).unwrap();
        assert_eq!(json, "\"IOT_SENSOR\"");

        let parsed: WasteType = serde_json::from_str("\"E_WASTE\"").unwrap();
        assert_eq!(parsed, WasteType::EWaste);

        let err = serde_json::from_str::<WasteType>("\"SLUDGE\"").unwrap_err();
        assert!(err.to_string().contains("\"SLUDGE\" is not a valid choice."));
    }

    #[test]
    fn choice_tables_pair_values_with_labels() {
        let tables = serde_json::to_value(ChoiceTables::build()).unwrap();

        assert_eq!(tables["categories"].as_array().unwrap().len(), 4);
        assert_eq!(tables["sub_categories"].as_array().unwrap().len(), 10);
        assert_eq!(
            tables["reported_by_types"][3],
            serde_json::json!({ "value": "IOT_SENSOR", "label": "Automated IoT Sensor Trigger" })
        );
        assert_eq!(
            tables["waste_types"][6],
            serde_json::json!({ "value": "NOT_APPLICABLE", "label": "Not Applicable" })
        );
    }
}
