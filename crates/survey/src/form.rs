//! Form catalogue: which fields each survey version promotes to scalar columns.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Survey schema version tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FormType {
    /// `001` - musculoskeletal symptom survey (근골격계 증상조사표).
    MusculoskeletalSymptom,
    /// `002` - musculoskeletal burden-work hazard assessment (근골격계부담작업 유해요인조사).
    HazardAssessment,
    /// `003` - occupational stress survey (직무스트레스 평가).
    OccupationalStress,
}

impl FormType {
    pub const ALL: [FormType; 3] = [
        FormType::MusculoskeletalSymptom,
        FormType::HazardAssessment,
        FormType::OccupationalStress,
    ];

    pub fn code(&self) -> &'static str {
        self.spec().code
    }

    pub fn title(&self) -> &'static str {
        self.spec().title
    }

    pub fn parse(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim();
        FormType::ALL
            .into_iter()
            .find(|f| f.code() == code)
            .ok_or_else(|| ValidationError::UnknownFormType(code.to_string()))
    }

    pub fn spec(&self) -> &'static FormSpec {
        match self {
            FormType::MusculoskeletalSymptom => &FORM_001,
            FormType::HazardAssessment => &FORM_002,
            FormType::OccupationalStress => &FORM_003,
        }
    }
}

impl core::fmt::Display for FormType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl TryFrom<String> for FormType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FormType::parse(&value)
    }
}

impl From<FormType> for String {
    fn from(value: FormType) -> Self {
        value.code().to_string()
    }
}

/// Canonical scalar columns. Every form projects a subset of these.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ScalarField {
    Name,
    Age,
    Gender,
    Department,
    Position,
    WorkYears,
    WorkMonths,
    DailyWorkHours,
    PhysicalBurden,
}

impl ScalarField {
    /// Payload key the value is read from.
    pub fn key(&self) -> &'static str {
        match self {
            ScalarField::Name => "name",
            ScalarField::Age => "age",
            ScalarField::Gender => "gender",
            ScalarField::Department => "department",
            ScalarField::Position => "position",
            ScalarField::WorkYears => "work_years",
            ScalarField::WorkMonths => "work_months",
            ScalarField::DailyWorkHours => "daily_work_hours",
            ScalarField::PhysicalBurden => "physical_burden",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ScalarField::Age
                | ScalarField::WorkYears
                | ScalarField::WorkMonths
                | ScalarField::DailyWorkHours
        )
    }
}

/// Static description of one survey version.
#[derive(Debug)]
pub struct FormSpec {
    pub code: &'static str,
    pub title: &'static str,
    /// Fields that must be present and non-empty.
    pub required: &'static [ScalarField],
    /// Fields promoted to scalar columns.
    pub scalars: &'static [ScalarField],
    /// Checkbox groups, always normalized to arrays.
    pub multi_value: &'static [&'static str],
}

impl FormSpec {
    pub fn is_multi_value(&self, key: &str) -> bool {
        self.multi_value.contains(&key)
    }
}

use ScalarField::*;

static FORM_001: FormSpec = FormSpec {
    code: "001",
    title: "근골격계 증상조사표",
    required: &[Name, Age, Gender],
    scalars: &[
        Name,
        Age,
        Gender,
        Department,
        Position,
        WorkYears,
        WorkMonths,
        DailyWorkHours,
        PhysicalBurden,
    ],
    multi_value: &["pain_areas", "past_diseases", "hobbies"],
};

static FORM_002: FormSpec = FormSpec {
    code: "002",
    title: "근골격계부담작업 유해요인조사",
    required: &[Name, Department],
    scalars: &[
        Name,
        Age,
        Gender,
        Department,
        Position,
        WorkYears,
        DailyWorkHours,
        PhysicalBurden,
    ],
    multi_value: &["hazard_factors", "body_parts", "work_tools"],
};

static FORM_003: FormSpec = FormSpec {
    code: "003",
    title: "직무스트레스 평가",
    required: &[Name, Age, Gender],
    scalars: &[Name, Age, Gender, Department, Position, WorkYears, WorkMonths],
    multi_value: &["stress_factors"],
};
