use serde::Serialize;

use crate::models::FoodEntry;

/// Running sums over the mirrored entry list.
///
/// Fully derived: recomputed from scratch on every snapshot and never
/// persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Totals {
    pub calories: f64,
    pub protein: f64,
    pub fat: f64,
    pub carbs: f64,
    pub fiber: f64,
}

impl Totals {
    /// Fold the entry list into its five sums. An empty list yields all zeros.
    #[must_use]
    pub fn of(entries: &[FoodEntry]) -> Self {
        entries.iter().fold(Self::default(), |mut acc, entry| {
            acc.calories += entry.calories;
            acc.protein += entry.protein;
            acc.fat += entry.fat;
            acc.carbs += entry.carbs;
            acc.fiber += entry.fiber;
            acc
        })
    }
}
