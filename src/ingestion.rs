use crate::error::{Result, SalesAnalyticsError};
use crate::normalizer::{resolve_columns, FieldSpec};
use crate::schema::{BusinessMapping, MappingAliases};
use crate::utils::clean_cell;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Already-read tabular input: one header row plus string cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Reads a CSV with a header row. Short rows are padded with blank cells.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader.headers()?.iter().map(String::from).collect();

        let mut rows = Vec::new();
        for result in csv_reader.records() {
            let record = result?;
            let mut row: Vec<String> = record.iter().map(String::from).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        debug!("Read {} rows with columns: {}", rows.len(), headers.join(", "));

        Ok(Self { headers, rows })
    }

    pub fn from_csv_str(text: &str) -> Result<Self> {
        Self::from_csv_reader(text.as_bytes())
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingLoad {
    pub mapping: BusinessMapping,
    pub rows_in: usize,
    /// Rows without a customer id or business category.
    pub rows_skipped: usize,
}

/// Loads `customer_id -> business_category[, business_sub_category]` rows.
/// A later row for the same customer replaces an earlier one.
pub fn load_business_mapping(table: &RawTable, aliases: &MappingAliases) -> Result<MappingLoad> {
    let specs = [
        FieldSpec::required("customer_id", &aliases.customer_id),
        FieldSpec::required("business_category", &aliases.business_category),
        FieldSpec::optional("business_sub_category", &aliases.business_sub_category),
    ];
    let resolved = resolve_columns(&table.headers, &specs)?;

    let unresolved = |field: &str| SalesAnalyticsError::SchemaError {
        missing: vec![field.to_string()],
        found: table.headers.clone(),
    };
    let customer_col = resolved[0].ok_or_else(|| unresolved("customer_id"))?;
    let category_col = resolved[1].ok_or_else(|| unresolved("business_category"))?;
    let sub_col = resolved[2];

    let mut mapping = BusinessMapping::new();
    let mut rows_skipped = 0;

    for row in &table.rows {
        let cell = |idx: usize| row.get(idx).and_then(|c| clean_cell(c));

        match (cell(customer_col), cell(category_col)) {
            (Some(customer), Some(category)) => {
                let sub = sub_col.and_then(cell).map(str::to_string);
                mapping.insert(customer, category, sub);
            }
            _ => rows_skipped += 1,
        }
    }

    info!(
        "Loaded business mapping for {} customers ({} rows skipped)",
        mapping.len(),
        rows_skipped
    );

    Ok(MappingLoad {
        mapping,
        rows_in: table.rows.len(),
        rows_skipped,
    })
}
