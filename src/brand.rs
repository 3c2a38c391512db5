use crate::engine::require_positive;
use crate::error::{Result, SalesAnalyticsError};
use crate::ingestion::RawTable;
use crate::normalizer::{resolve_columns, CanonicalField, FieldSpec};
use crate::regional::{LocationField, UNKNOWN_LOCATION};
use crate::schema::BrandAliases;
use crate::targets::matches_location;
use crate::utils::{clean_cell, order_labels};
use crate::{EnrichedDataset, EnrichedRecord, RecordFilter};
use log::{debug, info};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Products recommended per matching brand category.
const PRODUCTS_PER_CATEGORY: usize = 3;
/// Upper bound on recommended products per customer.
const MAX_RECOMMENDED_PRODUCTS: usize = 5;
/// Added to the opportunity score of customers sharing no brand category.
const NO_OVERLAP_PENALTY: usize = 10;
const TOP_BREAKDOWN: usize = 5;

pub const DEFAULT_MIN_MATCH_SCORE: f64 = 0.3;

fn default_min_match_score() -> f64 {
    DEFAULT_MIN_MATCH_SCORE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandProduct {
    pub product_id: Option<String>,
    pub product_name: String,
    pub product_category: String,
    pub product_type: Option<String>,
}

/// A brand's product list, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandCatalogue {
    pub products: Vec<BrandProduct>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandCatalogueLoad {
    pub catalogue: BrandCatalogue,
    pub rows_in: usize,
    /// Rows without a product name or category.
    pub rows_skipped: usize,
}

impl BrandCatalogue {
    pub fn new(products: Vec<BrandProduct>) -> Self {
        Self { products }
    }

    /// Reads `product_name`, `product_category` and optional id/type columns.
    pub fn from_table(table: &RawTable, aliases: &BrandAliases) -> Result<BrandCatalogueLoad> {
        let specs = [
            FieldSpec::required("product_name", &aliases.product_name),
            FieldSpec::required("product_category", &aliases.product_category),
            FieldSpec::optional("product_id", &aliases.product_id),
            FieldSpec::optional("product_type", &aliases.product_type),
        ];
        let resolved = resolve_columns(&table.headers, &specs)?;

        let unresolved = |field: &str| SalesAnalyticsError::SchemaError {
            missing: vec![field.to_string()],
            found: table.headers.clone(),
        };
        let name_col = resolved[0].ok_or_else(|| unresolved("product_name"))?;
        let category_col = resolved[1].ok_or_else(|| unresolved("product_category"))?;

        let mut products = Vec::with_capacity(table.rows.len());
        let mut rows_skipped = 0;
        for row in &table.rows {
            let cell = |idx: usize| row.get(idx).and_then(|c| clean_cell(c));
            let optional = |idx: Option<usize>| idx.and_then(cell).map(str::to_string);

            match (cell(name_col), cell(category_col)) {
                (Some(name), Some(category)) => products.push(BrandProduct {
                    product_id: optional(resolved[2]),
                    product_name: name.to_string(),
                    product_category: category.to_string(),
                    product_type: optional(resolved[3]),
                }),
                _ => rows_skipped += 1,
            }
        }

        info!(
            "Loaded {} brand products ({} rows skipped)",
            products.len(),
            rows_skipped
        );

        Ok(BrandCatalogueLoad {
            catalogue: Self { products },
            rows_in: table.rows.len(),
            rows_skipped,
        })
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Distinct product categories in first-appearance order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.products
            .iter()
            .map(|p| p.product_category.as_str())
            .filter(|c| seen.insert(*c))
            .collect()
    }

    pub fn products_in<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a BrandProduct> + 'a {
        self.products
            .iter()
            .filter(move |p| p.product_category == category)
    }

    fn require_products(&self) -> Result<()> {
        if self.is_empty() {
            Err(SalesAnalyticsError::invalid_parameter(
                "brand_catalogue",
                "contains no products",
            ))
        } else {
            Ok(())
        }
    }

    /// Up to three products per brand category the customer already buys;
    /// the catalogue head when there is no overlap.
    fn recommend(&self, customer_categories: &BTreeSet<&str>) -> Vec<String> {
        let mut recommended: Vec<String> = self
            .categories()
            .into_iter()
            .filter(|c| customer_categories.contains(c))
            .flat_map(|c| {
                self.products_in(c)
                    .take(PRODUCTS_PER_CATEGORY)
                    .map(|p| p.product_name.clone())
            })
            .collect();
        if recommended.is_empty() {
            recommended = self
                .products
                .iter()
                .map(|p| p.product_name.clone())
                .collect();
        }
        recommended.truncate(MAX_RECOMMENDED_PRODUCTS);
        recommended
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandQuery {
    /// Empty targets every business category.
    #[serde(default)]
    pub business_categories: Vec<String>,
    /// Case-insensitive substring matched against location and state.
    #[serde(default)]
    pub location_filter: Option<String>,
    #[serde(default = "default_min_match_score")]
    pub min_match_score: f64,
    pub max_results: usize,
    #[serde(default)]
    pub scope: RecordFilter,
}

impl BrandQuery {
    pub fn new(max_results: usize) -> Self {
        Self {
            business_categories: Vec::new(),
            location_filter: None,
            min_match_score: DEFAULT_MIN_MATCH_SCORE,
            max_results,
            scope: RecordFilter::default(),
        }
    }

    pub fn with_business_category(mut self, category: &str) -> Self {
        self.business_categories.push(category.to_string());
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location_filter = Some(location.to_string());
        self
    }

    pub fn with_min_match_score(mut self, score: f64) -> Self {
        self.min_match_score = score;
        self
    }

    fn validate(&self, enriched: &EnrichedDataset) -> Result<()> {
        require_positive("max_results", self.max_results)?;
        self.scope.validate()?;
        if !(0.0..=1.0).contains(&self.min_match_score) {
            return Err(SalesAnalyticsError::invalid_parameter(
                "min_match_score",
                format!("must be within [0, 1], got {}", self.min_match_score),
            ));
        }
        if self.location_filter.is_some()
            && !enriched.has_field(CanonicalField::Location)
            && !enriched.has_field(CanonicalField::State)
        {
            return Err(SalesAnalyticsError::missing_field(
                "location",
                "location-filtered brand matching",
            ));
        }
        Ok(())
    }

    fn admits(&self, record: &EnrichedRecord) -> bool {
        let category_ok = self.business_categories.is_empty()
            || self
                .business_categories
                .iter()
                .any(|c| c == record.business_category());
        let location_ok = self
            .location_filter
            .as_deref()
            .map_or(true, |needle| matches_location(record, needle));
        category_ok && location_ok
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandMatch {
    /// 1-based rank
    pub priority: usize,
    pub customer_id: String,
    pub customer_name: Option<String>,
    pub business_category: String,
    pub location: Option<String>,
    pub current_categories: Vec<String>,
    /// Brand categories the customer already buys.
    pub overlapping_categories: Vec<String>,
    /// `overlap / max(customer categories, brand categories)`
    pub match_score: f64,
    pub recommended_products: Vec<String>,
    pub total_revenue: Decimal,
    pub product_diversity: usize,
    /// Lower is a better opportunity.
    pub opportunity_score: usize,
}

impl BrandMatch {
    pub fn display_name(&self) -> &str {
        self.customer_name.as_deref().unwrap_or(&self.customer_id)
    }
}

#[derive(Default)]
struct BrandActivity<'a> {
    categories: BTreeSet<&'a str>,
    total_revenue: Decimal,
    name: Option<&'a str>,
    location: Option<&'a str>,
    business_category: &'a str,
}

/// Customers ranked by how well a brand's catalogue fits what they already
/// buy. Customers below `min_match_score` are left out.
pub fn find_brand_matches(
    enriched: &EnrichedDataset,
    catalogue: &BrandCatalogue,
    query: &BrandQuery,
) -> Result<Vec<BrandMatch>> {
    catalogue.require_products()?;
    query.validate(enriched)?;

    let brand_categories = catalogue.categories();

    let mut activity: BTreeMap<&str, BrandActivity> = BTreeMap::new();
    for record in enriched.scoped(&query.scope).filter(|r| query.admits(r)) {
        let t = &record.transaction;
        let entry = activity.entry(t.customer_id.as_str()).or_default();

        entry.categories.insert(t.product_category.as_str());
        entry.total_revenue += t.sales_amount;
        entry.business_category = record.business_category();
        if entry.name.is_none() {
            entry.name = t.customer_name.as_deref();
        }
        if entry.location.is_none() {
            entry.location = t.location.as_deref();
        }
    }

    let mut matches: Vec<BrandMatch> = activity
        .into_iter()
        .filter_map(|(customer_id, a)| {
            let overlapping: Vec<String> = brand_categories
                .iter()
                .filter(|c| a.categories.contains(*c))
                .map(|c| c.to_string())
                .collect();
            let diversity = a.categories.len();
            let match_score =
                overlapping.len() as f64 / diversity.max(brand_categories.len()) as f64;
            if match_score < query.min_match_score {
                return None;
            }
            let opportunity_score = if overlapping.is_empty() {
                diversity + NO_OVERLAP_PENALTY
            } else {
                diversity
            };

            Some(BrandMatch {
                priority: 0,
                customer_id: customer_id.to_string(),
                customer_name: a.name.map(str::to_string),
                business_category: a.business_category.to_string(),
                location: a.location.map(str::to_string),
                recommended_products: catalogue.recommend(&a.categories),
                current_categories: order_labels(
                    a.categories.into_iter().map(str::to_string),
                    &enriched.product_order,
                ),
                overlapping_categories: overlapping,
                match_score,
                total_revenue: a.total_revenue,
                product_diversity: diversity,
                opportunity_score,
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        a.opportunity_score
            .cmp(&b.opportunity_score)
            .then_with(|| b.match_score.total_cmp(&a.match_score))
            .then_with(|| b.total_revenue.cmp(&a.total_revenue))
            .then_with(|| a.customer_id.cmp(&b.customer_id))
    });
    matches.truncate(query.max_results);
    for (idx, m) in matches.iter_mut().enumerate() {
        m.priority = idx + 1;
    }

    debug!(
        "Brand catalogue with {} categories matched {} customers",
        brand_categories.len(),
        matches.len()
    );

    Ok(matches)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandOutreach {
    #[serde(flatten)]
    pub brand_match: BrandMatch,
    pub outreach_message: String,
}

pub fn brand_outreach_message(brand_match: &BrandMatch) -> String {
    format!(
        "Based on your current product mix ({}), we recommend: {}.",
        brand_match.current_categories.join(", "),
        brand_match.recommended_products.join(", ")
    )
}

/// `find_brand_matches` with an outreach message per customer.
pub fn brand_outreach_list(
    enriched: &EnrichedDataset,
    catalogue: &BrandCatalogue,
    query: &BrandQuery,
) -> Result<Vec<BrandOutreach>> {
    Ok(find_brand_matches(enriched, catalogue, query)?
        .into_iter()
        .map(|brand_match| BrandOutreach {
            outreach_message: brand_outreach_message(&brand_match),
            brand_match,
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedShare {
    pub label: String,
    pub transaction_count: usize,
    pub total_revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFit {
    pub product_category: String,
    pub buyer_count: usize,
    pub transaction_count: usize,
    pub total_revenue: Decimal,
    pub average_transaction: Decimal,
    /// By transaction count
    pub top_business_categories: Vec<RankedShare>,
    /// By revenue; empty without location data
    pub top_locations: Vec<RankedShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandMarketFit {
    /// Brand categories with at least one buyer, in catalogue order.
    pub categories: Vec<CategoryFit>,
    /// Brand categories nobody in scope buys.
    pub unmatched_categories: Vec<String>,
    pub total_customers: usize,
    pub customers_buying_brand_categories: usize,
    /// Percentage of customers buying any brand category, 0 to 100.
    pub market_fit_score: f64,
}

fn ranked(shares: BTreeMap<&str, (usize, Decimal)>, by_revenue: bool) -> Vec<RankedShare> {
    let mut shares: Vec<RankedShare> = shares
        .into_iter()
        .map(|(label, (count, revenue))| RankedShare {
            label: label.to_string(),
            transaction_count: count,
            total_revenue: revenue,
        })
        .collect();
    shares.sort_by(|a, b| {
        let primary = if by_revenue {
            b.total_revenue.cmp(&a.total_revenue)
        } else {
            b.transaction_count.cmp(&a.transaction_count)
        };
        primary.then_with(|| a.label.cmp(&b.label))
    });
    shares.truncate(TOP_BREAKDOWN);
    shares
}

#[derive(Default)]
struct CategoryTally<'a> {
    buyers: BTreeSet<&'a str>,
    count: usize,
    revenue: Decimal,
    by_business: BTreeMap<&'a str, (usize, Decimal)>,
    by_location: BTreeMap<&'a str, (usize, Decimal)>,
}

/// How much of the scoped market already buys the brand's categories.
pub fn brand_market_fit(
    enriched: &EnrichedDataset,
    catalogue: &BrandCatalogue,
    filter: &RecordFilter,
) -> Result<BrandMarketFit> {
    catalogue.require_products()?;
    filter.validate()?;

    let brand_categories = catalogue.categories();
    let wanted: BTreeSet<&str> = brand_categories.iter().copied().collect();
    let has_location = enriched.has_field(CanonicalField::Location);

    let mut customers = BTreeSet::new();
    let mut tallies: BTreeMap<&str, CategoryTally> = BTreeMap::new();
    for record in enriched.scoped(filter) {
        let t = &record.transaction;
        customers.insert(t.customer_id.as_str());
        if !wanted.contains(t.product_category.as_str()) {
            continue;
        }

        let tally = tallies.entry(t.product_category.as_str()).or_default();
        tally.buyers.insert(t.customer_id.as_str());
        tally.count += 1;
        tally.revenue += t.sales_amount;

        let business = tally.by_business.entry(record.business_category()).or_default();
        business.0 += 1;
        business.1 += t.sales_amount;
        if has_location {
            let location = tally
                .by_location
                .entry(LocationField::Location.value_of(record))
                .or_default();
            location.0 += 1;
            location.1 += t.sales_amount;
        }
    }

    let buying: BTreeSet<&str> = tallies
        .values()
        .flat_map(|t| t.buyers.iter().copied())
        .collect();

    let mut categories = Vec::new();
    let mut unmatched_categories = Vec::new();
    for category in brand_categories {
        match tallies.remove(category) {
            Some(tally) => categories.push(CategoryFit {
                product_category: category.to_string(),
                buyer_count: tally.buyers.len(),
                transaction_count: tally.count,
                average_transaction: tally.revenue / Decimal::from(tally.count),
                total_revenue: tally.revenue,
                top_business_categories: ranked(tally.by_business, false),
                top_locations: ranked(tally.by_location, true),
            }),
            None => unmatched_categories.push(category.to_string()),
        }
    }

    let market_fit_score = if customers.is_empty() {
        0.0
    } else {
        buying.len() as f64 / customers.len() as f64 * 100.0
    };

    Ok(BrandMarketFit {
        categories,
        unmatched_categories,
        total_customers: customers.len(),
        customers_buying_brand_categories: buying.len(),
        market_fit_score,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalBrandFit {
    pub state: String,
    pub total_businesses: usize,
    pub businesses_with_overlap: usize,
    pub category_overlap: usize,
    pub total_brand_categories: usize,
    /// Share of brand categories sold in the state, 0 to 100.
    pub overlap_percentage: f64,
    /// `0.6 * category share + 0.4 * business share`, 0 to 1.
    pub fit_score: f64,
}

const CATEGORY_FIT_WEIGHT: f64 = 0.6;
const BUSINESS_FIT_WEIGHT: f64 = 0.4;

/// Per-state fit of the brand's categories, best first. Records without a
/// state are left out.
pub fn brand_regional_fit(
    enriched: &EnrichedDataset,
    catalogue: &BrandCatalogue,
    filter: &RecordFilter,
) -> Result<Vec<RegionalBrandFit>> {
    catalogue.require_products()?;
    LocationField::State.require(enriched, "brand regional fit")?;
    filter.validate()?;

    let brand_categories: BTreeSet<&str> = catalogue.categories().into_iter().collect();

    let mut per_state: BTreeMap<&str, (BTreeSet<&str>, BTreeSet<&str>, BTreeSet<&str>)> =
        BTreeMap::new();
    for record in enriched.scoped(filter) {
        let state = LocationField::State.value_of(record);
        if state == UNKNOWN_LOCATION {
            continue;
        }
        let t = &record.transaction;
        let (categories, businesses, overlapping) = per_state.entry(state).or_default();
        categories.insert(t.product_category.as_str());
        businesses.insert(t.customer_id.as_str());
        if brand_categories.contains(t.product_category.as_str()) {
            overlapping.insert(t.customer_id.as_str());
        }
    }

    let total_brand_categories = brand_categories.len();
    let mut fits: Vec<RegionalBrandFit> = per_state
        .into_iter()
        .map(|(state, (categories, businesses, overlapping))| {
            let category_overlap = categories.intersection(&brand_categories).count();
            let category_share = category_overlap as f64 / total_brand_categories as f64;
            let business_share = overlapping.len() as f64 / businesses.len() as f64;
            RegionalBrandFit {
                state: state.to_string(),
                total_businesses: businesses.len(),
                businesses_with_overlap: overlapping.len(),
                category_overlap,
                total_brand_categories,
                overlap_percentage: category_share * 100.0,
                fit_score: CATEGORY_FIT_WEIGHT * category_share
                    + BUSINESS_FIT_WEIGHT * business_share,
            }
        })
        .collect();

    fits.sort_by(|a, b| {
        b.fit_score
            .total_cmp(&a.fit_score)
            .then_with(|| a.state.cmp(&b.state))
    });

    Ok(fits)
}
