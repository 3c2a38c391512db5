use crate::engine::require_positive;
use crate::error::{Result, SalesAnalyticsError};
use crate::normalizer::CanonicalField;
use crate::similarity::SimilarityTable;
use crate::utils::{contains_ignore_case, order_labels};
use crate::{EnrichedDataset, EnrichedRecord, RecordFilter};
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_MAX_SUGGESTIONS: usize = 3;

fn default_max_suggestions() -> usize {
    DEFAULT_MAX_SUGGESTIONS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetQuery {
    pub business_category: String,
    pub target_product_category: String,
    /// Case-insensitive substring matched against location and state.
    #[serde(default)]
    pub location_filter: Option<String>,
    pub max_targets: usize,
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
    /// Scope applied before eligibility is decided.
    #[serde(default)]
    pub scope: RecordFilter,
}

impl TargetQuery {
    pub fn new(business_category: &str, target_product_category: &str, max_targets: usize) -> Self {
        Self {
            business_category: business_category.to_string(),
            target_product_category: target_product_category.to_string(),
            location_filter: None,
            max_targets,
            max_suggestions: DEFAULT_MAX_SUGGESTIONS,
            scope: RecordFilter::default(),
        }
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location_filter = Some(location.to_string());
        self
    }

    pub fn with_scope(mut self, scope: RecordFilter) -> Self {
        self.scope = scope;
        self
    }

    fn validate(&self, enriched: &EnrichedDataset) -> Result<()> {
        require_positive("max_targets", self.max_targets)?;
        require_positive("max_suggestions", self.max_suggestions)?;
        self.scope.validate()?;
        if self.business_category.trim().is_empty() {
            return Err(SalesAnalyticsError::invalid_parameter(
                "business_category",
                "must not be blank",
            ));
        }
        if self.target_product_category.trim().is_empty() {
            return Err(SalesAnalyticsError::invalid_parameter(
                "target_product_category",
                "must not be blank",
            ));
        }
        if self.location_filter.is_some()
            && !enriched.has_field(CanonicalField::Location)
            && !enriched.has_field(CanonicalField::State)
        {
            return Err(SalesAnalyticsError::missing_field(
                "location",
                "location-filtered target search",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarCategory {
    pub product_category: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCustomer {
    /// 1-based rank
    pub priority: usize,
    pub customer_id: String,
    pub customer_name: Option<String>,
    pub business_category: String,
    pub business_sub_category: String,
    pub location: Option<String>,
    pub current_categories: Vec<String>,
    pub product_diversity: usize,
    pub total_revenue: Decimal,
    pub transaction_count: usize,
    pub recommended_category: String,
    pub similar_categories: Vec<SimilarCategory>,
}

impl TargetCustomer {
    pub fn display_name(&self) -> &str {
        self.customer_name.as_deref().unwrap_or(&self.customer_id)
    }
}

#[derive(Default)]
struct CustomerActivity<'a> {
    categories: BTreeSet<&'a str>,
    total_revenue: Decimal,
    transaction_count: usize,
    buys_target: bool,
    name: Option<&'a str>,
    location: Option<&'a str>,
    first: Option<&'a EnrichedRecord>,
}

pub(crate) fn matches_location(record: &EnrichedRecord, needle: &str) -> bool {
    let t = &record.transaction;
    t.location
        .as_deref()
        .into_iter()
        .chain(t.state.as_deref())
        .any(|value| contains_ignore_case(value, needle))
}

/// Categories the customer already buys that relate to its recommended
/// category, most similar first. Unknown pairs are never suggested.
pub fn similar_products(
    customer: &TargetCustomer,
    table: &SimilarityTable,
    k: usize,
) -> Result<Vec<SimilarCategory>> {
    require_positive("k", k)?;

    let mut similar: Vec<SimilarCategory> = customer
        .current_categories
        .iter()
        .filter(|c| **c != customer.recommended_category)
        .map(|c| SimilarCategory {
            product_category: c.clone(),
            similarity: table.similarity(&customer.recommended_category, c),
        })
        .filter(|s| s.similarity > 0.0)
        .collect();

    similar.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.product_category.cmp(&b.product_category))
    });
    similar.truncate(k);

    Ok(similar)
}

/// Customers of the requested business category that do not yet buy the
/// target product category, fewest current categories first.
pub fn find_targets(
    enriched: &EnrichedDataset,
    query: &TargetQuery,
    table: &SimilarityTable,
) -> Result<Vec<TargetCustomer>> {
    query.validate(enriched)?;

    let mut activity: BTreeMap<&str, CustomerActivity> = BTreeMap::new();
    for record in enriched.scoped(&query.scope) {
        if record.business_category() != query.business_category {
            continue;
        }
        // Only purchases made in the filtered location count
        if let Some(needle) = &query.location_filter {
            if !matches_location(record, needle) {
                continue;
            }
        }
        let t = &record.transaction;
        let entry = activity.entry(t.customer_id.as_str()).or_default();

        entry.categories.insert(t.product_category.as_str());
        entry.total_revenue += t.sales_amount;
        entry.transaction_count += 1;
        entry.buys_target |= t.product_category == query.target_product_category;
        if entry.name.is_none() {
            entry.name = t.customer_name.as_deref();
        }
        if entry.location.is_none() {
            entry.location = t.location.as_deref();
        }
        if entry.first.is_none() {
            entry.first = Some(record);
        }
    }

    let mut candidates: Vec<(&str, CustomerActivity)> = activity
        .into_iter()
        .filter(|(_, a)| !a.buys_target)
        .collect();

    candidates.sort_by(|(id_a, a), (id_b, b)| {
        a.categories
            .len()
            .cmp(&b.categories.len())
            .then_with(|| b.total_revenue.cmp(&a.total_revenue))
            .then_with(|| id_a.cmp(id_b))
    });
    candidates.truncate(query.max_targets);

    let mut targets = Vec::with_capacity(candidates.len());
    for (idx, (customer_id, a)) in candidates.into_iter().enumerate() {
        let sub_category = a
            .first
            .map(|r| r.business_sub_category().to_string())
            .unwrap_or_default();
        let product_diversity = a.categories.len();
        let current_categories = order_labels(
            a.categories.into_iter().map(str::to_string),
            &enriched.product_order,
        );

        let mut target = TargetCustomer {
            priority: idx + 1,
            customer_id: customer_id.to_string(),
            customer_name: a.name.map(str::to_string),
            business_category: query.business_category.clone(),
            business_sub_category: sub_category,
            location: a.location.map(str::to_string),
            current_categories,
            product_diversity,
            total_revenue: a.total_revenue,
            transaction_count: a.transaction_count,
            recommended_category: query.target_product_category.clone(),
            similar_categories: Vec::new(),
        };
        target.similar_categories = similar_products(&target, table, query.max_suggestions)?;
        targets.push(target);
    }

    debug!(
        "Found {} '{}' targets for '{}'",
        targets.len(),
        query.business_category,
        query.target_product_category
    );

    Ok(targets)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutreachTarget {
    #[serde(flatten)]
    pub target: TargetCustomer,
    pub personalization_note: String,
}

pub fn personalization_note(target: &TargetCustomer) -> String {
    let mut note = format!(
        "Similar {} businesses{} are purchasing {}. You currently purchase: {}.",
        target.business_category,
        target
            .location
            .as_deref()
            .map(|l| format!(" in {}", l))
            .unwrap_or_default(),
        target.recommended_category,
        target.current_categories.join(", ")
    );
    if let Some(best) = target.similar_categories.first() {
        note.push_str(&format!(
            " Buyers of {} often add {}.",
            best.product_category, target.recommended_category
        ));
    }
    note
}

/// `find_targets` with a personalization note per customer.
pub fn outreach_list(
    enriched: &EnrichedDataset,
    query: &TargetQuery,
    table: &SimilarityTable,
) -> Result<Vec<OutreachTarget>> {
    Ok(find_targets(enriched, query, table)?
        .into_iter()
        .map(|target| OutreachTarget {
            personalization_note: personalization_note(&target),
            target,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use crate::ingestion::RawTable;
    use crate::normalizer::normalize;
    use crate::schema::{BusinessMapping, EngineConfig};

    fn dataset() -> EnrichedDataset {
        let csv = "\
customer_id,product_id,product_category,transaction_date,sales_amount,location
R1,P1,Books,2024-01-01,100,\"Austin, TX\"
R1,P2,Stationery,2024-01-02,40,\"Austin, TX\"
R2,P1,Books,2024-01-03,300,\"Denver, CO\"
R3,P1,Books,2024-01-04,50,\"Dallas, TX\"
R4,P3,Toys,2024-01-05,70,\"Austin, TX\"
T1,P1,Books,2024-01-06,999,\"Austin, TX\"
";
        let config = EngineConfig::default();
        let normalized = normalize(&RawTable::from_csv_str(csv).unwrap(), &config).unwrap();
        let mut mapping = BusinessMapping::new();
        for id in ["R1", "R2", "R3", "R4"] {
            mapping.insert(id, "Retail", None);
        }
        mapping.insert("T1", "Technology", None);
        classify(&normalized, &mapping, &config.keyword_table)
    }

    fn similarity() -> SimilarityTable {
        let mut table = SimilarityTable::new();
        table.insert("Toys", "Books", 0.4).unwrap();
        table.insert("Toys", "Stationery", 0.7).unwrap();
        table
    }

    #[test]
    fn test_targets_exclude_existing_buyers_and_rank() {
        let query = TargetQuery::new("Retail", "Toys", 10);
        let targets = find_targets(&dataset(), &query, &similarity()).unwrap();

        let ids: Vec<&str> = targets.iter().map(|t| t.customer_id.as_str()).collect();
        // Single-category buyers by revenue desc, then the two-category buyer
        assert_eq!(ids, vec!["R2", "R3", "R1"]);
        assert_eq!(targets[0].priority, 1);
        assert!(targets
            .iter()
            .all(|t| !t.current_categories.contains(&"Toys".to_string())));

        let r1 = &targets[2];
        assert_eq!(r1.product_diversity, 2);
        assert_eq!(r1.total_revenue, Decimal::from(140));
        assert_eq!(
            r1.similar_categories
                .iter()
                .map(|s| s.product_category.as_str())
                .collect::<Vec<_>>(),
            vec!["Stationery", "Books"]
        );
    }

    #[test]
    fn test_location_filter_and_truncation() {
        let query = TargetQuery::new("Retail", "Toys", 1).with_location("tx");
        let targets = find_targets(&dataset(), &query, &SimilarityTable::new()).unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].customer_id, "R3");
        assert!(targets[0].similar_categories.is_empty());
    }

    #[test]
    fn test_location_filter_limits_activity_to_that_location() {
        let csv = "\
customer_id,product_id,product_category,transaction_date,sales_amount,location
R1,P1,Books,2024-01-01,100,\"Austin, TX\"
R1,P2,Stationery,2024-01-02,40,\"Denver, CO\"
R1,P3,Toys,2024-01-03,70,\"Denver, CO\"
";
        let config = EngineConfig::default();
        let normalized = normalize(&RawTable::from_csv_str(csv).unwrap(), &config).unwrap();
        let mut mapping = BusinessMapping::new();
        mapping.insert("R1", "Retail", None);
        let data = classify(&normalized, &mapping, &config.keyword_table);

        let query = TargetQuery::new("Retail", "Toys", 5).with_location("Austin");
        let targets = find_targets(&data, &query, &SimilarityTable::new()).unwrap();

        // Toys were bought in Denver only, so R1 is still a target in Austin
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].product_diversity, 1);
        assert_eq!(targets[0].total_revenue, Decimal::from(100));
        assert_eq!(targets[0].current_categories, vec!["Books".to_string()]);

        let anywhere = TargetQuery::new("Retail", "Toys", 5);
        assert!(find_targets(&data, &anywhere, &SimilarityTable::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_invalid_parameters() {
        let data = dataset();
        let table = SimilarityTable::new();

        let zero = TargetQuery::new("Retail", "Toys", 0);
        assert!(matches!(
            find_targets(&data, &zero, &table),
            Err(SalesAnalyticsError::InvalidParameter { .. })
        ));

        let target = find_targets(&data, &TargetQuery::new("Retail", "Toys", 1), &table)
            .unwrap()
            .remove(0);
        assert!(similar_products(&target, &table, 0).is_err());
    }

    #[test]
    fn test_location_filter_requires_location_field() {
        let csv = "\
customer_id,product_id,product_category,transaction_date,sales_amount
R1,P1,Books,2024-01-01,100
";
        let config = EngineConfig::default();
        let normalized = normalize(&RawTable::from_csv_str(csv).unwrap(), &config).unwrap();
        let data = classify(&normalized, &BusinessMapping::new(), &config.keyword_table);

        let query = TargetQuery::new("Other", "Toys", 5).with_location("TX");
        assert!(matches!(
            find_targets(&data, &query, &SimilarityTable::new()),
            Err(SalesAnalyticsError::MissingFieldError { .. })
        ));

        let unfiltered = TargetQuery::new("Other", "Toys", 5);
        assert_eq!(
            find_targets(&data, &unfiltered, &SimilarityTable::new())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_outreach_note_mentions_location_and_products() {
        let query = TargetQuery::new("Retail", "Toys", 10);
        let list = outreach_list(&dataset(), &query, &similarity()).unwrap();
        let r1 = list.iter().find(|o| o.target.customer_id == "R1").unwrap();

        assert_eq!(
            r1.personalization_note,
            "Similar Retail businesses in Austin, TX are purchasing Toys. \
You currently purchase: Books, Stationery. Buyers of Stationery often add Toys."
        );
    }
}
