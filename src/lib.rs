//! # Sales Category Analytics
//!
//! A library that classifies the customers behind raw sales transactions into
//! business categories and computes which business categories buy which
//! product categories, where growth opportunities exist, and which customers
//! to target next.
//!
//! ## Core Concepts
//!
//! - **Normalization**: Loosely named input columns are resolved once against
//!   configured aliases; malformed rows are dropped and counted by reason
//! - **Classification**: Explicit mapping first, keyword scoring second,
//!   "Other" last, with the decision recorded as a [`Provenance`]
//! - **Aggregation**: Category matrices, top combinations, growth
//!   opportunities and trend series are pure functions of an
//!   [`EnrichedDataset`]
//! - **Targets**: Customers of a business category who do not yet buy a
//!   product category, ranked by how narrow their current purchasing is
//! - **Regional analysis**: The same matrix keyed by location or state
//! - **Brand matching**: Customers and states ranked by how well a brand's
//!   product catalogue fits what they already buy
//!
//! ## Example
//!
//! ```rust,ignore
//! use sales_category_analytics::*;
//!
//! let raw = RawTable::from_csv_path("transactions.csv")?;
//! let mut mapping = BusinessMapping::new();
//! mapping.insert("C1", "Retail", None);
//!
//! let config = EngineConfig::default();
//! let prepared = prepare_dataset(&raw, &mapping, &config)?;
//!
//! let matrix = category_matrix(&prepared.enriched, MatrixLevel::Category, &RecordFilter::default());
//! let top = top_combinations(&matrix, "revenue".parse()?, 10)?;
//! ```

pub mod brand;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod export;
pub mod ingestion;
pub mod normalizer;
pub mod overrides;
pub mod regional;
pub mod schema;
pub mod session;
pub mod similarity;
pub mod targets;
pub mod trends;
pub mod utils;

pub use brand::{
    brand_market_fit, brand_outreach_list, brand_outreach_message, brand_regional_fit,
    find_brand_matches, BrandCatalogue, BrandCatalogueLoad, BrandMarketFit, BrandMatch,
    BrandOutreach, BrandProduct, BrandQuery, CategoryFit, RankedShare, RegionalBrandFit,
};
pub use classifier::{
    auto_classify, classify, classify_customer, keyword_score, ClassificationReport,
    CustomerClassification, Provenance, ProvenanceKind,
};
pub use engine::{
    category_matrix, growth_opportunities, summary_statistics, top_combinations, AggregateCell,
    CategoryMatrix, Combination, GrowthOpportunity, MatrixLevel, MatrixRow, Metric, RowDimension,
    SummaryStatistics,
};
pub use error::{Result, SalesAnalyticsError};
pub use export::{
    brand_matches_to_csv, brand_outreach_to_csv, combinations_to_csv,
    location_opportunities_to_csv, opportunities_to_csv, outreach_email, outreach_emails,
    outreach_to_csv, records_to_csv, targets_to_csv, trends_to_csv,
};
pub use ingestion::*;
pub use normalizer::{
    normalize, parse_amount, parse_date, CanonicalField, DropReason, NormalizationReport,
    NormalizedDataset, Normalizer,
};
pub use overrides::*;
pub use regional::{
    location_insights, location_opportunities, regional_preferences, LocationField,
    LocationInsights, LocationOpportunity, LocationSummary, LocationTopProducts,
    RegionalPreferences, RegionalProduct,
};
pub use schema::*;
pub use session::{AnalyticsSession, PreparedDataset};
pub use similarity::SimilarityTable;
pub use targets::{
    find_targets, outreach_list, similar_products, OutreachTarget, SimilarCategory,
    TargetCustomer, TargetQuery,
};
pub use trends::{trend_series, Granularity, TrendGrouping, TrendPoint};

use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use utils::contains_ignore_case;

/// A transaction with its customer's resolved classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub transaction: Transaction,
    /// Shared by every record of the same customer
    pub classification: Arc<CustomerClassification>,
}

impl EnrichedRecord {
    pub fn business_category(&self) -> &str {
        &self.classification.business_category
    }

    pub fn business_sub_category(&self) -> &str {
        &self.classification.business_sub_category
    }

    pub fn provenance(&self) -> &Provenance {
        &self.classification.provenance
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedDataset {
    pub records: Vec<EnrichedRecord>,
    pub customers: BTreeMap<String, Arc<CustomerClassification>>,
    pub report: ClassificationReport,
    /// Display order of business categories (keyword table order)
    pub business_order: Vec<String>,
    pub sub_category_order: BTreeMap<String, Vec<String>>,
    pub product_order: Vec<String>,
    pub available_fields: BTreeSet<CanonicalField>,
}

impl EnrichedDataset {
    pub fn with_product_order(mut self, order: Vec<String>) -> Self {
        self.product_order = order;
        self
    }

    pub fn has_field(&self, field: CanonicalField) -> bool {
        self.available_fields.contains(&field)
    }

    pub fn scoped<'a>(&'a self, filter: &'a RecordFilter) -> impl Iterator<Item = &'a EnrichedRecord> + 'a {
        self.records.iter().filter(move |r| filter.matches(r))
    }

    pub fn customer(&self, customer_id: &str) -> Option<&CustomerClassification> {
        self.customers.get(customer_id).map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Scope shared by every aggregate view. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default)]
    pub business_category: Option<String>,
    #[serde(default)]
    pub business_sub_category: Option<String>,
    #[serde(default)]
    pub product_category: Option<String>,
    /// Case-insensitive substring of the location or state
    #[serde(default)]
    pub location: Option<String>,
    /// Inclusive
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    /// Inclusive
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
}

impl RecordFilter {
    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(SalesAnalyticsError::DateError(format!(
                    "date_from {} is after date_to {}",
                    from, to
                )));
            }
        }
        Ok(())
    }

    pub fn matches(&self, record: &EnrichedRecord) -> bool {
        let t = &record.transaction;

        if let Some(category) = &self.business_category {
            if record.business_category() != category {
                return false;
            }
        }
        if let Some(sub) = &self.business_sub_category {
            if record.business_sub_category() != sub {
                return false;
            }
        }
        if let Some(product) = &self.product_category {
            if &t.product_category != product {
                return false;
            }
        }
        if let Some(needle) = &self.location {
            let hit = [t.location.as_deref(), t.state.as_deref()]
                .into_iter()
                .flatten()
                .any(|value| contains_ignore_case(value, needle));
            if !hit {
                return false;
            }
        }
        if self.date_from.is_some_and(|from| t.transaction_date < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| t.transaction_date > to) {
            return false;
        }
        true
    }
}

pub struct SalesAnalyticsProcessor;

impl SalesAnalyticsProcessor {
    /// Normalizes `raw` and classifies its customers.
    pub fn prepare(
        raw: &RawTable,
        mapping: &BusinessMapping,
        config: &EngineConfig,
    ) -> Result<PreparedDataset> {
        config.validate()?;

        info!("Preparing {} transaction rows", raw.len());
        debug!(
            "Keyword table has {} categories; mapping has {} customers",
            config.keyword_table.categories.len(),
            mapping.len()
        );

        let normalized = Arc::new(normalize(raw, config)?);
        let enriched = Self::enrich(&normalized, mapping, config);

        Ok(PreparedDataset {
            normalized,
            enriched,
        })
    }

    pub fn enrich(
        normalized: &NormalizedDataset,
        mapping: &BusinessMapping,
        config: &EngineConfig,
    ) -> EnrichedDataset {
        classify(normalized, mapping, &config.keyword_table)
            .with_product_order(config.product_category_order.clone())
    }
}

pub fn prepare_dataset(
    raw: &RawTable,
    mapping: &BusinessMapping,
    config: &EngineConfig,
) -> Result<PreparedDataset> {
    SalesAnalyticsProcessor::prepare(raw, mapping, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared() -> PreparedDataset {
        let csv = "\
customer_id,customer_name,product_id,product_category,transaction_date,sales_amount,state
C1,Joe's Bookstore,P1,Books,2024-01-01,100,TX
C1,,P2,Toys,2024-02-01,20,TX
C2,Downtown Clinic,P3,Supplies,2024-03-01,75,CO
";
        let raw = RawTable::from_csv_str(csv).unwrap();
        prepare_dataset(&raw, &BusinessMapping::new(), &EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_customer_name_drives_classification() {
        let prepared = prepared();
        let enriched = &prepared.enriched;

        assert_eq!(enriched.customer("C1").unwrap().business_category, "Retail");
        assert_eq!(
            enriched.customer("C2").unwrap().business_category,
            "Healthcare"
        );
        assert_eq!(enriched.report.count(ProvenanceKind::Auto), 2);
        assert!(Arc::ptr_eq(
            &enriched.records[0].classification,
            &enriched.records[1].classification
        ));
    }

    #[test]
    fn test_record_filter() {
        let prepared = prepared();
        let enriched = &prepared.enriched;

        let by_state = RecordFilter {
            location: Some("tx".to_string()),
            ..RecordFilter::default()
        };
        assert_eq!(enriched.scoped(&by_state).count(), 2);

        let by_dates = RecordFilter {
            date_from: NaiveDate::from_ymd_opt(2024, 2, 1),
            date_to: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..RecordFilter::default()
        };
        assert_eq!(enriched.scoped(&by_dates).count(), 2);

        let by_business = RecordFilter {
            business_category: Some("Healthcare".to_string()),
            ..RecordFilter::default()
        };
        let records: Vec<_> = enriched.scoped(&by_business).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].transaction.customer_id, "C2");
    }

    #[test]
    fn test_inverted_date_range_rejected() {
        let filter = RecordFilter {
            date_from: NaiveDate::from_ymd_opt(2024, 3, 1),
            date_to: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..RecordFilter::default()
        };
        assert!(matches!(
            filter.validate(),
            Err(SalesAnalyticsError::DateError(_))
        ));
        assert!(RecordFilter::default().validate().is_ok());
    }

    #[test]
    fn test_enriched_record_serializes_flat() {
        let prepared = prepared();
        let value = serde_json::to_value(&prepared.enriched.records[0]).unwrap();

        assert_eq!(value["customer_id"], "C1");
        assert_eq!(value["classification"]["business_category"], "Retail");
        assert_eq!(value["classification"]["provenance"]["method"], "auto");
    }

    #[test]
    fn test_invalid_config_rejected_before_processing() {
        let mut config = EngineConfig::default();
        config.date_formats.clear();
        let raw = RawTable::from_csv_str("a\n1\n").unwrap();

        assert!(matches!(
            prepare_dataset(&raw, &BusinessMapping::new(), &config),
            Err(SalesAnalyticsError::InvalidConfig(_))
        ));
    }
}
