//! Bulk load of the opportunity dataset
//!
//! Drop, recreate, and fill the table from the source CSV. Blank account
//! and date fields become NULL; a blank close value becomes 0 rather than
//! NULL, which is why the zero-denominator guards downstream matter.

use crate::error::{EngineError, Result};
use crate::store::{Store, TABLE};
use rusqlite::params;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS sales_pipeline (
    opportunity_id TEXT PRIMARY KEY,
    sales_agent    TEXT,
    product        TEXT,
    account        TEXT,
    deal_stage     TEXT,
    engage_date    TEXT,
    close_date     TEXT,
    close_value    INTEGER
);
";

#[derive(Debug, Deserialize)]
struct CsvOpportunity {
    opportunity_id: String,
    sales_agent: String,
    product: String,
    #[serde(default)]
    account: String,
    deal_stage: String,
    #[serde(default)]
    engage_date: String,
    #[serde(default)]
    close_date: String,
    #[serde(default)]
    close_value: String,
}

fn blank_to_null(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Close values arrive as strings, sometimes decimal-formatted. Truncate
/// toward zero; anything unparseable becomes 0 like a blank.
fn parse_close_value(raw: &str) -> i64 {
    raw.trim().parse::<f64>().map(|v| v as i64).unwrap_or(0)
}

/// Create the table if it does not exist yet.
pub fn ensure_schema(store: &Store) -> Result<()> {
    store.execute_batch(SCHEMA_SQL)
}

/// Drop and recreate the table, then bulk load from the source CSV.
/// Returns the number of rows loaded.
pub fn reset_from_source(store: &Store, csv_path: &Path) -> Result<usize> {
    info!("resetting {} from {}", TABLE, csv_path.display());
    store.execute_batch(&format!("DROP TABLE IF EXISTS {TABLE};"))?;
    store.execute_batch(SCHEMA_SQL)?;
    load_csv(store, csv_path)
}

/// Append every CSV record into the table.
pub fn load_csv(store: &Store, csv_path: &Path) -> Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path).map_err(|e| {
        EngineError::Ingest(format!("cannot read {}: {}", csv_path.display(), e))
    })?;

    let mut count = 0usize;
    for record in reader.deserialize::<CsvOpportunity>() {
        let record = record?;
        let close_value = parse_close_value(&record.close_value);
        store.execute(
            &format!(
                "INSERT INTO {TABLE}
                 (opportunity_id, sales_agent, product, account, deal_stage, engage_date, close_date, close_value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                record.opportunity_id,
                record.sales_agent,
                record.product,
                blank_to_null(&record.account),
                record.deal_stage,
                blank_to_null(&record.engage_date),
                blank_to_null(&record.close_date),
                close_value,
            ],
        )?;
        count += 1;
        if count % 1000 == 0 {
            info!("inserted {} records...", count);
        }
    }

    info!("✅ loaded {} records into {}", count, TABLE);
    Ok(count)
}
