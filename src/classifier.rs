use crate::normalizer::NormalizedDataset;
use crate::schema::{
    BusinessMapping, KeywordTable, SubCategoryKeywords, OTHER_CATEGORY, UNSPECIFIED_SUB_CATEGORY,
};
use crate::{EnrichedDataset, EnrichedRecord};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// How a customer's business category was decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Provenance {
    /// Taken verbatim from the business mapping or a manual override
    Explicit,
    /// Highest keyword score in the keyword table
    Auto { category: String, score: usize },
    /// No mapping and no keyword hit
    Default,
}

impl Provenance {
    pub fn kind(&self) -> ProvenanceKind {
        match self {
            Provenance::Explicit => ProvenanceKind::Explicit,
            Provenance::Auto { .. } => ProvenanceKind::Auto,
            Provenance::Default => ProvenanceKind::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceKind {
    Explicit,
    Auto,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerClassification {
    pub business_category: String,
    pub business_sub_category: String,
    pub provenance: Provenance,
}

impl CustomerClassification {
    fn other() -> Self {
        Self {
            business_category: OTHER_CATEGORY.to_string(),
            business_sub_category: UNSPECIFIED_SUB_CATEGORY.to_string(),
            provenance: Provenance::Default,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub total_customers: usize,
    pub customers_by_provenance: BTreeMap<ProvenanceKind, usize>,
    /// Customers that ended up in "Other", whatever the provenance.
    pub other_assignments: usize,
    /// Customers whose top keyword score was shared by several categories.
    pub keyword_ties: usize,
}

impl ClassificationReport {
    pub fn count(&self, kind: ProvenanceKind) -> usize {
        self.customers_by_provenance.get(&kind).copied().unwrap_or(0)
    }
}

/// Number of distinct keywords occurring in `identifier`, case-insensitively.
pub fn keyword_score(identifier: &str, keywords: &[String]) -> usize {
    let identifier = identifier.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect::<BTreeSet<_>>()
        .iter()
        .filter(|k| identifier.contains(k.as_str()))
        .count()
}

struct BestMatch<'a> {
    name: &'a str,
    score: usize,
    tied: bool,
}

/// Strictly highest score wins; equal scores keep the earlier candidate.
fn best_match<'a, I>(identifier: &str, candidates: I) -> Option<BestMatch<'a>>
where
    I: IntoIterator<Item = (&'a str, &'a [String])>,
{
    let mut best: Option<BestMatch<'a>> = None;

    for (name, keywords) in candidates {
        let score = keyword_score(identifier, keywords);
        if score == 0 {
            continue;
        }
        match best.as_mut() {
            Some(current) if score > current.score => {
                *current = BestMatch {
                    name,
                    score,
                    tied: false,
                }
            }
            Some(current) if score == current.score => current.tied = true,
            Some(_) => {}
            None => {
                best = Some(BestMatch {
                    name,
                    score,
                    tied: false,
                })
            }
        }
    }

    best
}

fn category_candidates(table: &KeywordTable) -> impl Iterator<Item = (&str, &[String])> {
    table
        .categories
        .iter()
        .map(|c| (c.name.as_str(), c.keywords.as_slice()))
}

fn sub_category_candidates(subs: &[SubCategoryKeywords]) -> impl Iterator<Item = (&str, &[String])> {
    subs.iter().map(|s| (s.name.as_str(), s.keywords.as_slice()))
}

fn resolve_sub_category(identifier: &str, table: &KeywordTable, category: &str) -> String {
    table
        .find(category)
        .and_then(|c| best_match(identifier, sub_category_candidates(&c.sub_categories)))
        .map(|m| m.name.to_string())
        .unwrap_or_else(|| UNSPECIFIED_SUB_CATEGORY.to_string())
}

/// Keyword classification of a single identifying string, plus whether the
/// winning score was tied.
fn auto_classify_with_tie(identifier: &str, table: &KeywordTable) -> (CustomerClassification, bool) {
    match best_match(identifier, category_candidates(table)) {
        Some(best) => (
            CustomerClassification {
                business_category: best.name.to_string(),
                business_sub_category: resolve_sub_category(identifier, table, best.name),
                provenance: Provenance::Auto {
                    category: best.name.to_string(),
                    score: best.score,
                },
            },
            best.tied,
        ),
        None => (CustomerClassification::other(), false),
    }
}

pub fn auto_classify(identifier: &str, table: &KeywordTable) -> CustomerClassification {
    auto_classify_with_tie(identifier, table).0
}

/// Explicit mapping first, then keywords, then "Other".
pub fn classify_customer(
    customer_id: &str,
    identifier: &str,
    mapping: &BusinessMapping,
    table: &KeywordTable,
) -> CustomerClassification {
    classify_customer_with_tie(customer_id, identifier, mapping, table).0
}

fn classify_customer_with_tie(
    customer_id: &str,
    identifier: &str,
    mapping: &BusinessMapping,
    table: &KeywordTable,
) -> (CustomerClassification, bool) {
    match mapping.get(customer_id) {
        Some(entry) => (
            CustomerClassification {
                business_category: entry.business_category.clone(),
                business_sub_category: entry.business_sub_category.clone(),
                provenance: Provenance::Explicit,
            },
            false,
        ),
        None => auto_classify_with_tie(identifier, table),
    }
}

/// Classifies every distinct customer once and attaches the shared result to
/// each of its transactions.
pub fn classify(
    dataset: &NormalizedDataset,
    mapping: &BusinessMapping,
    table: &KeywordTable,
) -> EnrichedDataset {
    let mut identifiers: BTreeMap<&str, Option<&str>> = BTreeMap::new();
    for t in &dataset.transactions {
        let name = t
            .customer_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let entry = identifiers.entry(t.customer_id.as_str()).or_insert(None);
        if entry.is_none() {
            *entry = name;
        }
    }

    let mut report = ClassificationReport {
        total_customers: identifiers.len(),
        ..ClassificationReport::default()
    };
    let mut customers: BTreeMap<String, Arc<CustomerClassification>> = BTreeMap::new();

    for (customer_id, name) in identifiers {
        let identifier = name.unwrap_or(customer_id);
        let (classification, tied) =
            classify_customer_with_tie(customer_id, identifier, mapping, table);

        if tied {
            report.keyword_ties += 1;
            debug!(
                "Keyword tie for customer '{}' resolved to '{}'",
                customer_id, classification.business_category
            );
        }
        if classification.business_category == OTHER_CATEGORY {
            report.other_assignments += 1;
        }
        if classification.provenance == Provenance::Default {
            debug!("No mapping or keyword match for customer '{}'", customer_id);
        }
        *report
            .customers_by_provenance
            .entry(classification.provenance.kind())
            .or_insert(0) += 1;

        customers.insert(customer_id.to_string(), Arc::new(classification));
    }

    let records = dataset
        .transactions
        .iter()
        .filter_map(|t| {
            customers.get(&t.customer_id).map(|c| EnrichedRecord {
                transaction: t.clone(),
                classification: Arc::clone(c),
            })
        })
        .collect();

    info!(
        "Classified {} customers: {} explicit, {} auto, {} default ({} keyword ties)",
        report.total_customers,
        report.count(ProvenanceKind::Explicit),
        report.count(ProvenanceKind::Auto),
        report.count(ProvenanceKind::Default),
        report.keyword_ties
    );

    let sub_category_order = table
        .categories
        .iter()
        .map(|c| (c.name.clone(), table.sub_category_names(&c.name)))
        .collect();

    EnrichedDataset {
        records,
        customers,
        report,
        business_order: table.category_names(),
        sub_category_order,
        product_order: Vec::new(),
        available_fields: dataset.available_fields.clone(),
    }
}
