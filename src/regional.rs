use crate::engine::{require_positive, AggregateCell, CategoryMatrix, MatrixBuilder, Metric, RowDimension};
use crate::error::{Result, SalesAnalyticsError};
use crate::normalizer::CanonicalField;
use crate::{EnrichedDataset, EnrichedRecord, RecordFilter};
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

pub const UNKNOWN_LOCATION: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationField {
    Location,
    State,
}

impl FromStr for LocationField {
    type Err = SalesAnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "location" | "city" | "city_state" => Ok(LocationField::Location),
            "state" | "region" => Ok(LocationField::State),
            other => Err(SalesAnalyticsError::invalid_parameter(
                "location_field",
                format!("unknown location field '{}'", other),
            )),
        }
    }
}

impl LocationField {
    fn row_dimension(self) -> RowDimension {
        match self {
            LocationField::Location => RowDimension::Location,
            LocationField::State => RowDimension::State,
        }
    }

    fn is_available(self, enriched: &EnrichedDataset) -> bool {
        match self {
            LocationField::Location => enriched.has_field(CanonicalField::Location),
            LocationField::State => {
                enriched.has_field(CanonicalField::State)
                    || enriched.has_field(CanonicalField::Location)
            }
        }
    }

    /// The record's value for this field; state falls back to the last
    /// comma-separated part of the location.
    pub fn value_of(self, record: &EnrichedRecord) -> &str {
        let t = &record.transaction;
        let value = match self {
            LocationField::Location => t.location.as_deref(),
            LocationField::State => t.state.as_deref().or_else(|| {
                t.location
                    .as_deref()
                    .and_then(|l| l.rsplit(',').next())
                    .map(str::trim)
            }),
        };
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(UNKNOWN_LOCATION)
    }

    pub(crate) fn require(self, enriched: &EnrichedDataset, view: &str) -> Result<()> {
        if self.is_available(enriched) {
            Ok(())
        } else {
            let field = match self {
                LocationField::Location => "location",
                LocationField::State => "state",
            };
            Err(SalesAnalyticsError::missing_field(field, view))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionalProduct {
    pub product_category: String,
    pub value: Decimal,
    pub cell: AggregateCell,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationTopProducts {
    pub location: String,
    pub products: Vec<RegionalProduct>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionalPreferences {
    pub field: LocationField,
    pub metric: Metric,
    /// Location x product category
    pub matrix: CategoryMatrix,
    pub top_products: Vec<LocationTopProducts>,
}

/// Location x product category aggregates and each location's top products.
/// Fails with `MissingFieldError` when the dataset has no location data.
pub fn regional_preferences(
    enriched: &EnrichedDataset,
    field: LocationField,
    metric: Metric,
    top_n: usize,
    filter: &RecordFilter,
) -> Result<RegionalPreferences> {
    field.require(enriched, "regional preferences")?;
    require_positive("top_n", top_n)?;
    filter.validate()?;

    let mut builder = MatrixBuilder::new();
    for record in enriched.scoped(filter) {
        builder.add(field.value_of(record), None, record);
    }
    let matrix = builder.build(
        field.row_dimension(),
        &[],
        &BTreeMap::new(),
        &enriched.product_order,
    );

    let top_products = matrix
        .rows
        .iter()
        .zip(&matrix.cells)
        .map(|(row, cells)| {
            let mut products: Vec<RegionalProduct> = matrix
                .columns
                .iter()
                .zip(cells)
                .filter(|(_, cell)| !cell.is_empty())
                .map(|(column, cell)| RegionalProduct {
                    product_category: column.clone(),
                    value: cell.value(metric),
                    cell: cell.clone(),
                })
                .collect();
            products.sort_by(|a, b| {
                b.value
                    .cmp(&a.value)
                    .then_with(|| a.product_category.cmp(&b.product_category))
            });
            products.truncate(top_n);
            LocationTopProducts {
                location: row.label.clone(),
                products,
            }
        })
        .collect();

    debug!(
        "Regional preferences over {} locations and {} product categories",
        matrix.rows.len(),
        matrix.columns.len()
    );

    Ok(RegionalPreferences {
        field,
        metric,
        matrix,
        top_products,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationSummary {
    pub location: String,
    pub customer_count: usize,
    pub transaction_count: usize,
    pub total_revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationInsights {
    pub total_locations: usize,
    pub by_customers: Vec<LocationSummary>,
    pub by_revenue: Vec<LocationSummary>,
}

pub fn location_insights(
    enriched: &EnrichedDataset,
    limit: usize,
    filter: &RecordFilter,
) -> Result<LocationInsights> {
    LocationField::Location.require(enriched, "location insights")?;
    require_positive("limit", limit)?;
    filter.validate()?;

    let mut per_location: BTreeMap<&str, (BTreeSet<&str>, usize, Decimal)> = BTreeMap::new();
    for record in enriched.scoped(filter) {
        let entry = per_location
            .entry(LocationField::Location.value_of(record))
            .or_default();
        entry.0.insert(record.transaction.customer_id.as_str());
        entry.1 += 1;
        entry.2 += record.transaction.sales_amount;
    }

    let summaries: Vec<LocationSummary> = per_location
        .into_iter()
        .map(|(location, (customers, count, revenue))| LocationSummary {
            location: location.to_string(),
            customer_count: customers.len(),
            transaction_count: count,
            total_revenue: revenue,
        })
        .collect();

    let mut by_customers = summaries.clone();
    by_customers.sort_by(|a, b| {
        b.customer_count
            .cmp(&a.customer_count)
            .then_with(|| a.location.cmp(&b.location))
    });
    by_customers.truncate(limit);

    let total_locations = summaries.len();
    let mut by_revenue = summaries;
    by_revenue.sort_by(|a, b| {
        b.total_revenue
            .cmp(&a.total_revenue)
            .then_with(|| a.location.cmp(&b.location))
    });
    by_revenue.truncate(limit);

    Ok(LocationInsights {
        total_locations,
        by_customers,
        by_revenue,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationOpportunity {
    pub location: String,
    pub business_category: String,
    pub business_count: usize,
    pub total_revenue: Decimal,
}

/// Where a product category already sells: location x business category
/// pairs ranked by how many distinct businesses buy it there.
pub fn location_opportunities(
    enriched: &EnrichedDataset,
    product_category: &str,
    limit: usize,
    filter: &RecordFilter,
) -> Result<Vec<LocationOpportunity>> {
    LocationField::Location.require(enriched, "location opportunities")?;
    require_positive("limit", limit)?;
    filter.validate()?;

    let mut groups: BTreeMap<(&str, &str), (BTreeSet<&str>, Decimal)> = BTreeMap::new();
    for record in enriched
        .scoped(filter)
        .filter(|r| r.transaction.product_category == product_category)
    {
        let entry = groups
            .entry((
                LocationField::Location.value_of(record),
                record.business_category(),
            ))
            .or_default();
        entry.0.insert(record.transaction.customer_id.as_str());
        entry.1 += record.transaction.sales_amount;
    }

    let mut opportunities: Vec<LocationOpportunity> = groups
        .into_iter()
        .map(|((location, business), (customers, revenue))| LocationOpportunity {
            location: location.to_string(),
            business_category: business.to_string(),
            business_count: customers.len(),
            total_revenue: revenue,
        })
        .collect();

    // Ties keep the (location, business category) key order
    opportunities.sort_by(|a, b| {
        b.business_count
            .cmp(&a.business_count)
            .then_with(|| b.total_revenue.cmp(&a.total_revenue))
    });
    opportunities.truncate(limit);

    Ok(opportunities)
}
