use super::facts::NutritionFacts;

/// One row of the keyword policy: any keyword found as a substring of the
/// lowercased food name selects this category.
#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub category: &'static str,
    pub keywords: &'static [&'static str],
    pub per_100g: NutritionFacts,
}

/// Coarse last-resort classifier. Rules are tried in order; the first
/// matching rule wins and `fallback` answers everything else.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    rules: Vec<CategoryRule>,
    fallback: CategoryRule,
}

const fn profile(calories: f64, protein_g: f64, carbs_g: f64, fat_g: f64) -> NutritionFacts {
    NutritionFacts {
        calories,
        protein_g,
        carbs_g,
        fat_g,
        fiber_g: 0.0,
        sugar_g: 0.0,
        sodium_g: 0.0,
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self {
            rules: vec![
                CategoryRule {
                    category: "fruit",
                    keywords: &[
                        "apple", "orange", "banana", "fruit", "berry", "grape", "manzana",
                        "naranja", "plátano", "fruta",
                    ],
                    per_100g: profile(50.0, 1.0, 12.0, 0.2),
                },
                CategoryRule {
                    category: "vegetable",
                    keywords: &[
                        "lettuce", "tomato", "vegetable", "salad", "carrot", "broccoli",
                        "lechuga", "tomate", "verdura", "vegetal",
                    ],
                    per_100g: profile(25.0, 2.0, 5.0, 0.1),
                },
                CategoryRule {
                    category: "meat",
                    keywords: &[
                        "chicken", "beef", "pork", "meat", "fish", "steak", "pollo", "carne",
                        "pescado",
                    ],
                    per_100g: profile(200.0, 20.0, 0.0, 15.0),
                },
                CategoryRule {
                    category: "grain",
                    keywords: &["bread", "rice", "pasta", "grain", "toast", "pan", "arroz"],
                    per_100g: profile(250.0, 8.0, 50.0, 3.0),
                },
            ],
            fallback: CategoryRule {
                category: "default",
                keywords: &[],
                per_100g: profile(100.0, 5.0, 15.0, 5.0),
            },
        }
    }
}

impl CategoryTable {
    pub fn new(rules: Vec<CategoryRule>, fallback: CategoryRule) -> Self {
        Self { rules, fallback }
    }

    pub fn classify(&self, food_name: &str) -> &CategoryRule {
        let lower = food_name.to_lowercase();
        self.rules
            .iter()
            .find(|r| r.keywords.iter().any(|k| lower.contains(k)))
            .unwrap_or(&self.fallback)
    }
}
