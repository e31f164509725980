use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientStatus {
    Active,
    Discharged,
}

text_enum!(PatientStatus {
    Active => "active",
    Discharged => "discharged",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub full_name: String,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub blood_group: Option<String>,
    pub diagnosis: Option<String>,
    pub allergies: Option<String>,
    pub ward: Option<String>,
    pub bed_number: Option<i64>,
    pub status: PatientStatus,
    pub admitted_at: DateTime<Utc>,
}

/// Admission payload
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPatient {
    /// Chosen by the caller (e.g. an MRN); generated when absent
    #[validate(length(min = 1, max = 64))]
    pub id: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    #[validate(range(min = 0, max = 150))]
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub blood_group: Option<String>,
    pub diagnosis: Option<String>,
    pub allergies: Option<String>,
    pub ward: Option<String>,
    #[validate(range(min = 1))]
    pub bed_number: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalNote {
    pub id: String,
    pub patient_id: String,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewClinicalNote {
    #[validate(length(min = 1, max = 100))]
    pub author: String,
    #[validate(length(min = 1, max = 10_000))]
    pub content: String,
}
