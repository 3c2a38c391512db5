use crate::error::{Result, SalesAnalyticsError};
use crate::schema::SimilarityEntry;
use crate::EnrichedDataset;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Symmetric product-category adjacency. Pairs that were never inserted have
/// a similarity of zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityTable {
    pairs: BTreeMap<(String, String), f64>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl SimilarityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, a: &str, b: &str, similarity: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&similarity) {
            return Err(SalesAnalyticsError::invalid_parameter(
                "similarity",
                format!(
                    "similarity between '{}' and '{}' must be within [0, 1], got {}",
                    a, b, similarity
                ),
            ));
        }
        if a != b {
            self.pairs.insert(pair_key(a, b), similarity);
        }
        Ok(())
    }

    pub fn from_entries(entries: &[SimilarityEntry]) -> Result<Self> {
        let mut table = Self::new();
        for entry in entries {
            table.insert(&entry.category_a, &entry.category_b, entry.similarity)?;
        }
        Ok(table)
    }

    /// Jaccard similarity over the sets of customers buying each category.
    pub fn from_co_purchases(enriched: &EnrichedDataset) -> Self {
        let mut buyers: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for record in &enriched.records {
            buyers
                .entry(record.transaction.product_category.as_str())
                .or_default()
                .insert(record.transaction.customer_id.as_str());
        }

        let mut table = Self::new();
        let categories: Vec<(&str, &BTreeSet<&str>)> =
            buyers.iter().map(|(c, b)| (*c, b)).collect();
        for (i, (a, buyers_a)) in categories.iter().enumerate() {
            for (b, buyers_b) in &categories[i + 1..] {
                let shared = buyers_a.intersection(buyers_b).count();
                if shared == 0 {
                    continue;
                }
                let union = buyers_a.union(buyers_b).count();
                table
                    .pairs
                    .insert(pair_key(a, b), shared as f64 / union as f64);
            }
        }
        table
    }

    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        self.pairs.get(&pair_key(a, b)).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn entries(&self) -> Vec<SimilarityEntry> {
        self.pairs
            .iter()
            .map(|((a, b), s)| SimilarityEntry {
                category_a: a.clone(),
                category_b: b.clone(),
                similarity: *s,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use crate::ingestion::RawTable;
    use crate::normalizer::normalize;
    use crate::schema::{BusinessMapping, EngineConfig};

    #[test]
    fn test_similarity_is_symmetric() {
        let mut table = SimilarityTable::new();
        table.insert("Software", "Electronics", 0.8).unwrap();

        assert_eq!(table.similarity("Software", "Electronics"), 0.8);
        assert_eq!(table.similarity("Electronics", "Software"), 0.8);
        assert_eq!(table.similarity("Electronics", "Electronics"), 1.0);
        assert_eq!(table.similarity("Electronics", "Furniture"), 0.0);
    }

    #[test]
    fn test_out_of_range_similarity_rejected() {
        let mut table = SimilarityTable::new();
        assert!(table.insert("A", "B", 1.5).is_err());
        assert!(table.insert("A", "B", -0.1).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_from_co_purchases_jaccard() {
        let csv = "\
customer_id,product_id,product_category,transaction_date,sales_amount
C1,P1,Books,2024-01-01,10
C1,P2,Stationery,2024-01-01,10
C2,P1,Books,2024-01-01,10
C3,P3,Toys,2024-01-01,10
";
        let config = EngineConfig::default();
        let normalized = normalize(&RawTable::from_csv_str(csv).unwrap(), &config).unwrap();
        let enriched = classify(&normalized, &BusinessMapping::new(), &config.keyword_table);
        let table = SimilarityTable::from_co_purchases(&enriched);

        // Books: {C1, C2}, Stationery: {C1}
        assert!((table.similarity("Books", "Stationery") - 0.5).abs() < 1e-9);
        assert_eq!(table.similarity("Books", "Toys"), 0.0);
        assert_eq!(table.len(), 1);
    }
}
