use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize};

/// A single logged food item as stored in the remote collection.
///
/// Owned by exactly one user and immutable once created; the only way it
/// leaves the collection is an explicit delete. Stored documents are not
/// guaranteed to carry well-typed macro fields, so deserialization coerces
/// anything absent, null, or non-numeric to `0.0` (see [`crate::totals`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoodEntry {
    /// Store-assigned identifier.
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub calories: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub protein: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fat: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub carbs: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fiber: f64,
    /// Client-generated unix timestamp in milliseconds.
    pub created_at: i64,
}

/// The six client-supplied fields of a create call. The timestamp is attached
/// at submit time by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntry {
    pub name: String,
    pub calories: f64,
    pub protein: f64,
    pub fat: f64,
    pub carbs: f64,
    pub fiber: f64,
}

/// Raw form input: six text fields, exactly as the user typed them.
#[derive(Debug, Clone, Default)]
pub struct EntryDraft {
    pub name: String,
    pub calories: String,
    pub protein: String,
    pub fat: String,
    pub carbs: String,
    pub fiber: String,
}

impl EntryDraft {
    /// Validate the draft into a create payload.
    ///
    /// All six fields must be non-empty and the macro fields must parse as
    /// numbers. Values are otherwise taken as typed (non-negative by
    /// convention, not enforced).
    pub fn validate(&self) -> Result<NewEntry> {
        let fields = [
            &self.name,
            &self.calories,
            &self.protein,
            &self.fat,
            &self.carbs,
            &self.fiber,
        ];
        if fields.iter().any(|f| f.trim().is_empty()) {
            bail!("Please fill in all fields");
        }
        Ok(NewEntry {
            name: self.name.trim().to_string(),
            calories: parse_macro("calories", &self.calories)?,
            protein: parse_macro("protein", &self.protein)?,
            fat: parse_macro("fat", &self.fat)?,
            carbs: parse_macro("carbs", &self.carbs)?,
            fiber: parse_macro("fiber", &self.fiber)?,
        })
    }
}

fn parse_macro(field: &str, raw: &str) -> Result<f64> {
    let raw = raw.trim();
    raw.parse::<f64>()
        .ok()
        .with_context(|| format!("{field} must be a number (got '{raw}')"))
}

/// Accept numbers, numeric strings, or garbage; everything else becomes 0.0.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_draft() -> EntryDraft {
        EntryDraft {
            name: "Oatmeal".to_string(),
            calories: "150".to_string(),
            protein: "5".to_string(),
            fat: "3".to_string(),
            carbs: "27".to_string(),
            fiber: "4".to_string(),
        }
    }

    #[test]
    fn test_validate_complete_draft() {
        let entry = full_draft().validate().unwrap();
        assert_eq!(entry.name, "Oatmeal");
        assert!((entry.calories - 150.0).abs() < f64::EPSILON);
        assert!((entry.protein - 5.0).abs() < f64::EPSILON);
        assert!((entry.fat - 3.0).abs() < f64::EPSILON);
        assert!((entry.carbs - 27.0).abs() < f64::EPSILON);
        assert!((entry.fiber - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_trims_whitespace() {
        let mut draft = full_draft();
        draft.name = "  Toast  ".to_string();
        draft.calories = " 80 ".to_string();
        let entry = draft.validate().unwrap();
        assert_eq!(entry.name, "Toast");
        assert!((entry.calories - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_any_empty_field() {
        for field in 0..6 {
            let mut draft = full_draft();
            match field {
                0 => draft.name = String::new(),
                1 => draft.calories = String::new(),
                2 => draft.protein = "   ".to_string(),
                3 => draft.fat = String::new(),
                4 => draft.carbs = String::new(),
                _ => draft.fiber = String::new(),
            }
            let err = draft.validate().unwrap_err();
            assert_eq!(err.to_string(), "Please fill in all fields");
        }
    }

    #[test]
    fn test_validate_rejects_non_numeric_macro() {
        let mut draft = full_draft();
        draft.protein = "lots".to_string();
        let err = draft.validate().unwrap_err();
        assert!(err.to_string().contains("protein must be a number"));
    }

    #[test]
    fn test_validate_accepts_negative_values() {
        // Non-negative by convention only; a correction entry may go below zero.
        let mut draft = full_draft();
        draft.calories = "-100".to_string();
        let entry = draft.validate().unwrap();
        assert!((entry.calories + 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_entry_deserializes_well_typed_document() {
        let entry: FoodEntry = serde_json::from_str(
            r#"{"id":"e1","name":"Rice","calories":200,"protein":4.5,"fat":0.5,"carbs":44,"fiber":1,"created_at":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(entry.id, "e1");
        assert!((entry.protein - 4.5).abs() < f64::EPSILON);
        assert_eq!(entry.created_at, 1_700_000_000_000);
    }

    #[test]
    fn test_entry_deserializes_missing_macros_to_zero() {
        let entry: FoodEntry = serde_json::from_str(
            r#"{"id":"e2","name":"Mystery","created_at":1}"#,
        )
        .unwrap();
        assert!((entry.calories - 0.0).abs() < f64::EPSILON);
        assert!((entry.fiber - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_entry_deserializes_stringly_typed_macros() {
        let entry: FoodEntry = serde_json::from_str(
            r#"{"id":"e3","name":"Legacy","calories":"120","protein":"x","fat":null,"carbs":true,"fiber":"2.5","created_at":1}"#,
        )
        .unwrap();
        assert!((entry.calories - 120.0).abs() < f64::EPSILON);
        assert!((entry.protein - 0.0).abs() < f64::EPSILON);
        assert!((entry.fat - 0.0).abs() < f64::EPSILON);
        assert!((entry.carbs - 0.0).abs() < f64::EPSILON);
        assert!((entry.fiber - 2.5).abs() < f64::EPSILON);
    }
}
