//! Measurement-unit conversion catalog reads

use mealplan_common::db::MeasurementUnitConversion;
use mealplan_common::Result;
use sqlx::Row;

use super::Store;

impl Store {
    /// Non-archived conversions whose source unit is `unit_id`
    pub async fn get_measurement_unit_conversions_from_unit(
        &self,
        unit_id: &str,
    ) -> Result<Vec<MeasurementUnitConversion>> {
        let rows = sqlx::query(
            r#"
            SELECT id, from_unit, to_unit, only_for_ingredient, modifier, notes
            FROM valid_measurement_unit_conversions
            WHERE from_unit = ? AND archived_at IS NULL
            ORDER BY to_unit, id
            "#,
        )
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await?;

        let mut conversions = Vec::with_capacity(rows.len());
        for row in rows {
            conversions.push(MeasurementUnitConversion {
                id: row.try_get("id")?,
                from_unit: row.try_get("from_unit")?,
                to_unit: row.try_get("to_unit")?,
                only_for_ingredient: row.try_get("only_for_ingredient")?,
                modifier: row.try_get("modifier")?,
                notes: row.try_get("notes")?,
            });
        }

        Ok(conversions)
    }
}
