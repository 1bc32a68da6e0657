//! Submission normalizer.
//!
//! Maps an arbitrary, version-tagged form payload to:
//! - a fixed scalar projection (`ScalarFields`) with type coercion,
//! - checkbox groups normalized to arrays (`selections`),
//! - a verbatim copy of every submitted field (`responses`).
//!
//! Invariant: `reconstruct(normalize(p).responses) == p` for every accepted payload.

use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};

use crate::error::ValidationError;
use crate::form::{FormType, ScalarField};
use crate::record::ScalarFields;

/// Raw submission as key/value pairs (JSON object or decoded form body).
pub type Payload = Map<String, JsonValue>;

const FORM_TYPE_KEY: &str = "form_type";
const SYMPTOM_FLAG_KEY: &str = "has_symptoms";
const PAIN_AREAS_KEY: &str = "pain_areas";

/// Output of normalization, ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSubmission {
    pub form_type: FormType,
    pub scalars: ScalarFields,
    pub selections: BTreeMap<String, Vec<String>>,
    pub responses: Payload,
}

/// Normalize a payload. Fails fast on unknown form types and missing/unparsable required fields.
pub fn normalize(payload: &Payload) -> Result<NormalizedSubmission, ValidationError> {
    let form_type = read_form_type(payload)?;
    let spec = form_type.spec();

    for field in spec.required {
        if is_blank(payload.get(field.key())) {
            return Err(ValidationError::MissingField(field.key()));
        }
    }

    let mut scalars = ScalarFields::default();
    for field in spec.scalars {
        let value = payload.get(field.key());
        if field.is_integer() {
            let parsed = value.and_then(coerce_int);
            if parsed.is_none() && spec.required.contains(field) {
                return Err(ValidationError::InvalidNumber {
                    field: field.key(),
                    value: value.map(|v| v.to_string()).unwrap_or_default(),
                });
            }
            set_integer(&mut scalars, *field, parsed);
        } else {
            set_text(&mut scalars, *field, value.and_then(coerce_text));
        }
    }

    let mut selections = BTreeMap::new();
    for key in spec.multi_value {
        if let Some(value) = payload.get(*key) {
            selections.insert((*key).to_string(), to_array(value));
        }
    }

    scalars.has_symptoms = payload.get(SYMPTOM_FLAG_KEY).is_some_and(is_truthy)
        || selections
            .get(PAIN_AREAS_KEY)
            .is_some_and(|areas| !areas.is_empty());

    Ok(NormalizedSubmission {
        form_type,
        scalars,
        selections,
        responses: payload.clone(),
    })
}

/// Rebuild the original payload from stored responses.
pub fn reconstruct(form_type: FormType, responses: &Payload) -> Payload {
    let mut out = responses.clone();
    if !out.contains_key(FORM_TYPE_KEY) {
        out.insert(
            FORM_TYPE_KEY.to_string(),
            JsonValue::String(form_type.code().to_string()),
        );
    }
    out
}

/// Merge administrative changes into stored responses.
///
/// The form type is fixed at creation; a change that would alter it is rejected.
pub fn merge_changes(
    form_type: FormType,
    responses: &Payload,
    changes: &Payload,
) -> Result<Payload, ValidationError> {
    if let Some(requested) = changes.get(FORM_TYPE_KEY) {
        let requested = form_type_code(requested).ok_or(ValidationError::Immutable(FORM_TYPE_KEY))?;
        if FormType::parse(&requested).ok() != Some(form_type) {
            return Err(ValidationError::Immutable(FORM_TYPE_KEY));
        }
    }

    let mut merged = reconstruct(form_type, responses);
    for (k, v) in changes {
        if k == FORM_TYPE_KEY {
            continue;
        }
        merged.insert(k.clone(), v.clone());
    }
    Ok(merged)
}

fn read_form_type(payload: &Payload) -> Result<FormType, ValidationError> {
    let raw = payload
        .get(FORM_TYPE_KEY)
        .filter(|v| !is_blank(Some(v)))
        .ok_or(ValidationError::MissingFormType)?;
    let code = form_type_code(raw).ok_or_else(|| ValidationError::UnknownFormType(raw.to_string()))?;
    FormType::parse(&code)
}

fn form_type_code(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.trim().to_string()),
        // Numeric tags lose their zero padding in transit ("001" -> 1).
        JsonValue::Number(n) => n.as_u64().map(|n| format!("{n:03}")),
        _ => None,
    }
}

fn set_integer(scalars: &mut ScalarFields, field: ScalarField, value: Option<i64>) {
    match field {
        ScalarField::Age => scalars.age = value,
        ScalarField::WorkYears => scalars.work_years = value,
        ScalarField::WorkMonths => scalars.work_months = value,
        ScalarField::DailyWorkHours => scalars.daily_work_hours = value,
        _ => {}
    }
}

fn set_text(scalars: &mut ScalarFields, field: ScalarField, value: Option<String>) {
    match field {
        ScalarField::Name => scalars.name = value,
        ScalarField::Gender => scalars.gender = value,
        ScalarField::Department => scalars.department = value,
        ScalarField::Position => scalars.position = value,
        ScalarField::PhysicalBurden => scalars.physical_burden = value,
        _ => {}
    }
}

fn is_blank(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => true,
        Some(JsonValue::String(s)) => s.trim().is_empty(),
        Some(JsonValue::Array(items)) => items.iter().all(|v| is_blank(Some(v))),
        Some(_) => false,
    }
}

/// Integer coercion with `parseInt`-like leniency: leading digits win, NaN becomes `None`.
fn coerce_int(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        JsonValue::String(s) => parse_leading_int(s),
        JsonValue::Array(items) if items.len() == 1 => coerce_int(&items[0]),
        _ => None,
    }
}

fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'-') => (-1, &s[1..]),
        Some(b'+') => (1, &s[1..]),
        _ => (1, s),
    };
    let digits: &str = {
        let end = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        &rest[..end]
    };
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok().map(|n| n * sign)
}

fn coerce_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Array(items) => {
            let parts = items.iter().filter_map(coerce_text).collect::<Vec<_>>();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        JsonValue::Null | JsonValue::Object(_) => None,
    }
}

/// Checkbox groups: a lone scalar becomes a one-element array; blanks are not selections.
fn to_array(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::Array(items) => items.iter().filter_map(selection_item).collect(),
        other => selection_item(other).into_iter().collect(),
    }
}

fn selection_item(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "예" | "있음" | "yes" | "y" | "true" | "1" | "on"
        ),
        JsonValue::Array(items) => items.iter().any(is_truthy),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: JsonValue) -> Payload {
        match v {
            JsonValue::Object(m) => m,
            _ => panic!("test payload must be an object"),
        }
    }

    #[test]
    fn projects_scalars_for_symptom_survey() {
        let p = payload(json!({
            "form_type": "001",
            "name": "홍길동",
            "age": 35,
            "gender": "남",
            "department": "조립1팀",
            "work_years": "7",
            "physical_burden": "힘듦",
            "custom_note": "야간 근무 多"
        }));

        let n = normalize(&p).unwrap();
        assert_eq!(n.form_type, FormType::MusculoskeletalSymptom);
        assert_eq!(n.scalars.name.as_deref(), Some("홍길동"));
        assert_eq!(n.scalars.age, Some(35));
        assert_eq!(n.scalars.work_years, Some(7));
        assert_eq!(n.scalars.physical_burden.as_deref(), Some("힘듦"));
        assert_eq!(n.responses["custom_note"], "야간 근무 多");
        assert!(!n.scalars.has_symptoms);
    }

    #[test]
    fn string_ages_are_coerced_like_parse_int() {
        let p = payload(json!({"form_type": "001", "name": "a", "age": " 41세", "gender": "여"}));
        assert_eq!(normalize(&p).unwrap().scalars.age, Some(41));
    }

    #[test]
    fn unparsable_optional_numeric_becomes_null() {
        let p = payload(json!({
            "form_type": "001", "name": "a", "age": 30, "gender": "여",
            "work_months": "모름"
        }));
        assert_eq!(normalize(&p).unwrap().scalars.work_months, None);
    }

    #[test]
    fn unparsable_required_numeric_is_rejected() {
        let p = payload(json!({"form_type": "001", "name": "a", "age": "abc", "gender": "여"}));
        assert!(matches!(
            normalize(&p),
            Err(ValidationError::InvalidNumber { field: "age", .. })
        ));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let p = payload(json!({"form_type": "001", "name": "a", "age": 30}));
        assert_eq!(normalize(&p), Err(ValidationError::MissingField("gender")));

        let p = payload(json!({"form_type": "001", "name": "  ", "age": 30, "gender": "남"}));
        assert_eq!(normalize(&p), Err(ValidationError::MissingField("name")));
    }

    #[test]
    fn unknown_or_missing_form_type_is_rejected() {
        let p = payload(json!({"form_type": "999", "name": "a"}));
        assert!(matches!(normalize(&p), Err(ValidationError::UnknownFormType(_))));

        let p = payload(json!({"name": "a"}));
        assert_eq!(normalize(&p), Err(ValidationError::MissingFormType));
    }

    #[test]
    fn numeric_form_type_is_padded() {
        let p = payload(json!({"form_type": 3, "name": "a", "age": 30, "gender": "남"}));
        assert_eq!(normalize(&p).unwrap().form_type, FormType::OccupationalStress);
    }

    #[test]
    fn lone_checkbox_value_is_wrapped() {
        let p = payload(json!({
            "form_type": "001", "name": "a", "age": 30, "gender": "남",
            "pain_areas": "목",
            "hobbies": ["게임", "", "운동"]
        }));
        let n = normalize(&p).unwrap();
        assert_eq!(n.selections["pain_areas"], vec!["목".to_string()]);
        assert_eq!(n.selections["hobbies"], vec!["게임".to_string(), "운동".to_string()]);
        assert!(n.scalars.has_symptoms);
        // Raw value kept verbatim.
        assert_eq!(n.responses["pain_areas"], "목");
    }

    #[test]
    fn symptom_flag_is_read_from_payload() {
        let p = payload(json!({
            "form_type": "003", "name": "a", "age": 30, "gender": "남",
            "has_symptoms": "예"
        }));
        assert!(normalize(&p).unwrap().scalars.has_symptoms);
    }

    #[test]
    fn fields_outside_the_form_are_not_projected() {
        // 003 has no physical_burden column.
        let p = payload(json!({
            "form_type": "003", "name": "a", "age": 30, "gender": "남",
            "physical_burden": "매우 힘듦"
        }));
        let n = normalize(&p).unwrap();
        assert_eq!(n.scalars.physical_burden, None);
        assert_eq!(n.responses["physical_burden"], "매우 힘듦");
    }

    #[test]
    fn merge_rejects_form_type_change() {
        let p = payload(json!({"form_type": "001", "name": "a", "age": 30, "gender": "남"}));
        let changes = payload(json!({"form_type": "002"}));
        assert_eq!(
            merge_changes(FormType::MusculoskeletalSymptom, &p, &changes),
            Err(ValidationError::Immutable("form_type"))
        );
    }

    #[test]
    fn merge_overwrites_fields_and_keeps_the_rest() {
        let p = payload(json!({"form_type": "001", "name": "a", "age": 30, "gender": "남", "x": 1}));
        let changes = payload(json!({"form_type": "001", "department": "품질팀", "age": 31}));
        let merged = merge_changes(FormType::MusculoskeletalSymptom, &p, &changes).unwrap();
        assert_eq!(merged["age"], 31);
        assert_eq!(merged["department"], "품질팀");
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["form_type"], "001");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn extra_value() -> impl Strategy<Value = JsonValue> {
            prop_oneof![
                "[a-z0-9 가-힣]{0,12}".prop_map(JsonValue::from),
                any::<i32>().prop_map(JsonValue::from),
                any::<bool>().prop_map(JsonValue::from),
                prop::collection::vec("[a-z가-힣]{1,6}", 0..4)
                    .prop_map(|v| JsonValue::Array(v.into_iter().map(JsonValue::from).collect())),
                Just(JsonValue::Null),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: scalars ∪ responses reconstruct the submission losslessly.
            #[test]
            fn normalize_then_reconstruct_is_lossless(
                name in "[A-Za-z가-힣]{1,8}",
                age in 1i64..100,
                age_as_string in any::<bool>(),
                gender in prop_oneof![Just("남"), Just("여")],
                pain in prop::option::of(prop_oneof![
                    "[가-힣]{1,3}".prop_map(JsonValue::from),
                    prop::collection::vec("[가-힣]{1,3}", 0..4)
                        .prop_map(|v| JsonValue::Array(v.into_iter().map(JsonValue::from).collect())),
                ]),
                extras in prop::collection::btree_map("x_[a-z]{1,6}", extra_value(), 0..6),
            ) {
                let mut p = Payload::new();
                p.insert("form_type".into(), JsonValue::from("001"));
                p.insert("name".into(), JsonValue::from(name.clone()));
                p.insert(
                    "age".into(),
                    if age_as_string { JsonValue::from(age.to_string()) } else { JsonValue::from(age) },
                );
                p.insert("gender".into(), JsonValue::from(gender));
                if let Some(pain) = pain.clone() {
                    p.insert("pain_areas".into(), pain);
                }
                for (k, v) in extras {
                    p.insert(k, v);
                }

                let n = normalize(&p).unwrap();
                prop_assert_eq!(reconstruct(n.form_type, &n.responses), p.clone());
                prop_assert_eq!(n.scalars.age, Some(age));
                prop_assert_eq!(n.scalars.name.as_deref(), Some(name.as_str()));

                if let Some(JsonValue::String(lone)) = pain {
                    prop_assert_eq!(&n.selections["pain_areas"], &vec![lone]);
                }
            }

            /// Property: normalization is deterministic.
            #[test]
            fn normalize_is_deterministic(
                name in "[A-Za-z]{1,8}",
                age in "[0-9]{1,2}[a-z]{0,2}",
            ) {
                let mut p = Payload::new();
                p.insert("form_type".into(), JsonValue::from("003"));
                p.insert("name".into(), JsonValue::from(name));
                p.insert("age".into(), JsonValue::from(age));
                p.insert("gender".into(), JsonValue::from("여"));
                prop_assert_eq!(normalize(&p), normalize(&p));
            }
        }
    }
}
