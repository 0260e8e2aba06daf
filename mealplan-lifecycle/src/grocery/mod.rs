//! Grocery list aggregation
//!
//! Walks every chosen option of a finalized plan down to its recipe step
//! ingredients, scales each quantity, groups by (ingredient, unit) and folds
//! units into a canonical unit wherever the conversion table allows it.

mod builder;
mod catalog;

pub use builder::GroceryListBuilder;
pub use catalog::{ConversionCatalog, ConversionTable};

use std::collections::{BTreeMap, BTreeSet};

use mealplan_common::db::{MealPlan, MeasurementUnitConversion};
use mealplan_common::{Error, Result};

/// One scaled ingredient line contributed by a chosen recipe
#[derive(Debug, Clone, PartialEq)]
pub struct IngredientRequirement {
    pub ingredient_id: String,
    pub measurement_unit_id: String,
    pub minimum: f64,
    pub maximum: Option<f64>,
}

/// Consolidated quantity for one grocery list line
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedQuantity {
    pub ingredient_id: String,
    pub measurement_unit_id: String,
    pub minimum: f64,
    pub maximum: Option<f64>,
}

/// Running sums for one (ingredient, unit) group
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    minimum: f64,
    /// Sum of every contributor's maximum, or its minimum where it has none
    ceiling: f64,
    has_maximum: bool,
}

impl Accumulator {
    fn add(&mut self, minimum: f64, maximum: Option<f64>) {
        self.minimum += minimum;
        self.ceiling += maximum.unwrap_or(minimum);
        self.has_maximum |= maximum.is_some();
    }

    fn absorb(&mut self, other: Accumulator, modifier: f64) {
        self.minimum += other.minimum * modifier;
        self.ceiling += other.ceiling * modifier;
        self.has_maximum |= other.has_maximum;
    }

    fn maximum(&self) -> Option<f64> {
        self.has_maximum.then_some(self.ceiling)
    }
}

/// Scaled ingredient lines of every chosen option in `plan`
///
/// Optional ingredients and intermediate products (no catalog ingredient)
/// are skipped. Fails when a chosen option's meal was not loaded.
pub fn requirements_for_plan(plan: &MealPlan) -> Result<Vec<IngredientRequirement>> {
    let mut requirements = Vec::new();

    for (event, option) in plan.chosen_options() {
        let meal = option.meal.as_ref().ok_or_else(|| {
            Error::Internal(format!(
                "meal {} for option {} of event {} was not loaded",
                option.meal_id, option.id, event.id
            ))
        })?;

        for component in &meal.components {
            let scale = option.meal_scale * component.recipe_scale;
            for step in &component.recipe.steps {
                for ingredient in &step.ingredients {
                    if ingredient.optional {
                        continue;
                    }
                    let Some(ingredient_id) = &ingredient.ingredient_id else {
                        continue;
                    };
                    requirements.push(IngredientRequirement {
                        ingredient_id: ingredient_id.clone(),
                        measurement_unit_id: ingredient.measurement_unit_id.clone(),
                        minimum: ingredient.minimum_quantity * scale,
                        maximum: ingredient.maximum_quantity.map(|max| max * scale),
                    });
                }
            }
        }
    }

    Ok(requirements)
}

/// Group, sum and unit-normalize requirements
///
/// Output is sorted by (ingredient, unit) and holds one line per group.
pub fn aggregate(requirements: &[IngredientRequirement], conversions: &ConversionTable) -> Vec<AggregatedQuantity> {
    let mut groups: BTreeMap<&str, BTreeMap<&str, Accumulator>> = BTreeMap::new();

    for requirement in requirements {
        groups
            .entry(requirement.ingredient_id.as_str())
            .or_default()
            .entry(requirement.measurement_unit_id.as_str())
            .or_default()
            .add(requirement.minimum, requirement.maximum);
    }

    let mut lines = Vec::new();
    for (ingredient_id, by_unit) in groups {
        for (unit_id, totals) in normalize_units(ingredient_id, by_unit, conversions) {
            lines.push(AggregatedQuantity {
                ingredient_id: ingredient_id.to_string(),
                measurement_unit_id: unit_id.to_string(),
                minimum: totals.minimum,
                maximum: totals.maximum(),
            });
        }
    }

    lines
}

/// Fold units of one ingredient into its canonical unit
///
/// The canonical unit is the present unit that the most other present units
/// convert into directly (smallest id on ties). Units with no direct
/// conversion into it stay separate. Nothing is folded when no present unit
/// converts into another.
fn normalize_units<'a>(
    ingredient_id: &str,
    mut by_unit: BTreeMap<&'a str, Accumulator>,
    conversions: &ConversionTable,
) -> BTreeMap<&'a str, Accumulator> {
    if by_unit.len() < 2 {
        return by_unit;
    }

    let units: BTreeSet<&str> = by_unit.keys().copied().collect();

    let canonical = units
        .iter()
        .map(|target| {
            let inbound = units
                .iter()
                .filter(|source| *source != target)
                .filter(|source| conversions.find(source, target, ingredient_id).is_some())
                .count();
            (*target, inbound)
        })
        .filter(|(_, inbound)| *inbound > 0)
        .max_by(|(unit_a, a), (unit_b, b)| a.cmp(b).then(unit_b.cmp(unit_a)));

    let Some((canonical, _)) = canonical else {
        return by_unit;
    };

    for source in units.iter().filter(|unit| **unit != canonical) {
        let Some(conversion) = conversions.find(source, canonical, ingredient_id) else {
            continue;
        };
        let modifier = conversion.modifier;
        if let Some(totals) = by_unit.remove(source) {
            if let Some(target) = by_unit.get_mut(canonical) {
                target.absorb(totals, modifier);
            }
        }
    }

    by_unit
}

/// Most specific direct conversion: ingredient-specific beats general, then smallest id
pub(crate) fn best_conversion<'a>(
    candidates: impl IntoIterator<Item = &'a MeasurementUnitConversion>,
    to_unit: &str,
    ingredient_id: &str,
) -> Option<&'a MeasurementUnitConversion> {
    candidates
        .into_iter()
        .filter(|c| c.to_unit == to_unit && c.applies_to(ingredient_id))
        .min_by(|a, b| {
            let specific_a = a.only_for_ingredient.is_none();
            let specific_b = b.only_for_ingredient.is_none();
            specific_a.cmp(&specific_b).then(a.id.cmp(&b.id))
        })
}
