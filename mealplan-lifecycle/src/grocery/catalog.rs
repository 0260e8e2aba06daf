//! Read-only measurement-unit conversion catalog
//!
//! Conversions are fetched from the store per source unit on first use and
//! kept for the life of the catalog. Safe for concurrent readers.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use mealplan_common::db::MeasurementUnitConversion;
use mealplan_common::Result;
use tokio::sync::RwLock;
use tracing::debug;

use super::best_conversion;
use crate::db::Store;

/// Direct conversions keyed by source unit
#[derive(Debug, Clone, Default)]
pub struct ConversionTable {
    by_from_unit: HashMap<String, Arc<Vec<MeasurementUnitConversion>>>,
}

impl ConversionTable {
    pub fn from_conversions(conversions: impl IntoIterator<Item = MeasurementUnitConversion>) -> Self {
        let mut grouped: HashMap<String, Vec<MeasurementUnitConversion>> = HashMap::new();
        for conversion in conversions {
            grouped
                .entry(conversion.from_unit.clone())
                .or_default()
                .push(conversion);
        }
        Self {
            by_from_unit: grouped
                .into_iter()
                .map(|(unit, list)| (unit, Arc::new(list)))
                .collect(),
        }
    }

    /// Conversion from `from_unit` to `to_unit` usable for `ingredient_id`
    pub fn find(&self, from_unit: &str, to_unit: &str, ingredient_id: &str) -> Option<&MeasurementUnitConversion> {
        let candidates = self.by_from_unit.get(from_unit)?;
        best_conversion(candidates.iter(), to_unit, ingredient_id)
    }

    pub fn len(&self) -> usize {
        self.by_from_unit.values().map(|list| list.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lazily populated, shared view of the conversion table
pub struct ConversionCatalog {
    store: Store,
    cache: RwLock<HashMap<String, Arc<Vec<MeasurementUnitConversion>>>>,
}

impl ConversionCatalog {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Conversions out of `unit_id`, from cache or store
    pub async fn conversions_from(&self, unit_id: &str) -> Result<Arc<Vec<MeasurementUnitConversion>>> {
        if let Some(cached) = self.cache.read().await.get(unit_id) {
            return Ok(Arc::clone(cached));
        }

        let loaded = Arc::new(self.store.get_measurement_unit_conversions_from_unit(unit_id).await?);
        debug!(unit_id = %unit_id, count = loaded.len(), "Loaded unit conversions");

        let mut cache = self.cache.write().await;
        let entry = cache.entry(unit_id.to_string()).or_insert(loaded);
        Ok(Arc::clone(entry))
    }

    /// Table covering every unit in `unit_ids`
    pub async fn table_for<'a>(&self, unit_ids: impl IntoIterator<Item = &'a str>) -> Result<ConversionTable> {
        let units: BTreeSet<&str> = unit_ids.into_iter().collect();
        let mut by_from_unit = HashMap::with_capacity(units.len());
        for unit in units {
            by_from_unit.insert(unit.to_string(), self.conversions_from(unit).await?);
        }
        Ok(ConversionTable { by_from_unit })
    }
}
