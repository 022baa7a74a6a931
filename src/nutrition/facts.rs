use std::fmt;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Nutrient bundle. Stored records are always per 100 g; portion figures are
/// derived with [`NutritionFacts::scaled`] and never written back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionFacts {
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    #[serde(default)]
    pub fiber_g: f64,
    #[serde(default)]
    pub sugar_g: f64,
    #[serde(default)]
    pub sodium_g: f64,
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl NutritionFacts {
    fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            calories: f(self.calories),
            protein_g: f(self.protein_g),
            carbs_g: f(self.carbs_g),
            fat_g: f(self.fat_g),
            fiber_g: f(self.fiber_g),
            sugar_g: f(self.sugar_g),
            sodium_g: f(self.sodium_g),
        }
    }

    /// Scale a per-100 g bundle to `portion_grams`, rounding each nutrient
    /// to two decimals.
    pub fn scaled(&self, portion_grams: f64) -> Self {
        let factor = portion_grams / 100.0;
        self.map(|v| round2(v * factor))
    }

    /// Replace negative or non-finite values (bad upstream data) with zero.
    pub fn sanitized(self) -> Self {
        self.map(|v| if v.is_finite() && v > 0.0 { v } else { 0.0 })
    }

    pub fn rounded(self) -> Self {
        self.map(round2)
    }

    pub fn values(&self) -> [f64; 7] {
        [
            self.calories,
            self.protein_g,
            self.carbs_g,
            self.fat_g,
            self.fiber_g,
            self.sugar_g,
            self.sodium_g,
        ]
    }
}

impl Add for NutritionFacts {
    type Output = NutritionFacts;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            calories: self.calories + rhs.calories,
            protein_g: self.protein_g + rhs.protein_g,
            carbs_g: self.carbs_g + rhs.carbs_g,
            fat_g: self.fat_g + rhs.fat_g,
            fiber_g: self.fiber_g + rhs.fiber_g,
            sugar_g: self.sugar_g + rhs.sugar_g,
            sodium_g: self.sodium_g + rhs.sodium_g,
        }
    }
}

impl std::iter::Sum for NutritionFacts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(NutritionFacts::default(), Add::add)
    }
}

/// Fallback tier that produced a figure, highest confidence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Cache,
    PrimarySource,
    SecondarySource,
    Estimated,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Cache => "cache",
            SourceTag::PrimarySource => "primary_source",
            SourceTag::SecondarySource => "secondary_source",
            SourceTag::Estimated => "estimated",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-100 g facts as kept in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFacts {
    pub per_100g: NutritionFacts,
    pub source: SourceTag,
    #[serde(default)]
    pub food_name: Option<String>,
}

/// Facts scaled to a requested portion, with the tier that answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub nutrition: NutritionFacts,
    pub source: SourceTag,
    pub portion_grams: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_name: Option<String>,
}

/// Cache key: lowercased, trimmed food name.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apple() -> NutritionFacts {
        NutritionFacts {
            calories: 52.0,
            protein_g: 0.26,
            carbs_g: 13.81,
            fat_g: 0.17,
            ..Default::default()
        }
    }

    #[test]
    fn scales_apple_to_150g() {
        let s = apple().scaled(150.0);
        assert_eq!(s.calories, 78.0);
        assert_eq!(s.protein_g, 0.39);
        assert_eq!(s.carbs_g, 20.72);
        assert_eq!(s.fat_g, 0.26);
        assert_eq!(s.fiber_g, 0.0);
    }

    #[test]
    fn scaling_does_not_touch_the_base() {
        let base = apple();
        let _ = base.scaled(300.0);
        assert_eq!(base, apple());
    }

    #[test]
    fn doubling_portion_doubles_values_within_rounding() {
        let base = NutritionFacts {
            calories: 123.456,
            protein_g: 7.891,
            carbs_g: 3.333,
            fat_g: 9.999,
            fiber_g: 1.005,
            sugar_g: 0.5,
            sodium_g: 0.0421,
        };
        let one = base.scaled(87.0);
        let two = base.scaled(174.0);
        for (a, b) in one.values().iter().zip(two.values()) {
            assert!((b - 2.0 * a).abs() <= 0.0151, "{b} vs 2*{a}");
        }
    }

    #[test]
    fn sanitized_clamps_bad_values() {
        let f = NutritionFacts {
            calories: -4.0,
            protein_g: f64::NAN,
            carbs_g: 2.0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(f.calories, 0.0);
        assert_eq!(f.protein_g, 0.0);
        assert_eq!(f.carbs_g, 2.0);
    }

    #[test]
    fn sum_is_elementwise() {
        let total: NutritionFacts = [apple(), apple()].into_iter().sum();
        assert_eq!(total.calories, 104.0);
        assert_eq!(total.rounded().carbs_g, 27.62);
    }

    #[test]
    fn normalizes_cache_keys() {
        assert_eq!(normalize_name("  Grilled Chicken "), "grilled chicken");
    }

    #[test]
    fn source_tag_serializes_snake_case() {
        let s = serde_json::to_string(&SourceTag::PrimarySource).unwrap();
        assert_eq!(s, "\"primary_source\"");
        assert_eq!(SourceTag::Estimated.to_string(), "estimated");
    }
}
