use crate::brand::{BrandCatalogue, BrandCatalogueLoad};
use crate::error::Result;
use crate::ingestion::{load_business_mapping, MappingLoad, RawTable};
use crate::normalizer::{NormalizedDataset, Normalizer};
use crate::overrides::{CategoryOverride, ClassificationOverrides};
use crate::schema::{BusinessMapping, EngineConfig, KeywordTable};
use crate::similarity::SimilarityTable;
use crate::{EnrichedDataset, SalesAnalyticsProcessor};
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;

/// Normalized and classified snapshot shared by every view of a session.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub normalized: Arc<NormalizedDataset>,
    pub enriched: EnrichedDataset,
}

/// Length-prefixed BLAKE3 hashing so adjacent fields cannot collide.
struct Fingerprint(blake3::Hasher);

impl Fingerprint {
    fn new(domain: &str) -> Self {
        let mut fp = Self(blake3::Hasher::new());
        fp.bytes(domain.as_bytes());
        fp
    }

    fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(&(bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }

    fn table(&mut self, table: &RawTable) -> &mut Self {
        self.bytes(&(table.headers.len() as u64).to_le_bytes());
        for header in &table.headers {
            self.bytes(header.as_bytes());
        }
        self.bytes(&(table.rows.len() as u64).to_le_bytes());
        for row in &table.rows {
            self.bytes(&(row.len() as u64).to_le_bytes());
            for cell in row {
                self.bytes(cell.as_bytes());
            }
        }
        self
    }

    fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self> {
        let encoded = serde_json::to_vec(value)?;
        Ok(self.bytes(&encoded))
    }

    fn finish(&self) -> blake3::Hash {
        self.0.finalize()
    }
}

/// Explicit per-upload context: configuration, the raw transaction snapshot,
/// the business mapping and any manual overrides. Independent sessions share
/// nothing.
pub struct AnalyticsSession {
    config: EngineConfig,
    transactions: Arc<RawTable>,
    mapping: BusinessMapping,
    overrides: ClassificationOverrides,
    normalized_cache: Option<(blake3::Hash, Arc<NormalizedDataset>)>,
    prepared_cache: Option<(blake3::Hash, Arc<PreparedDataset>)>,
}

impl AnalyticsSession {
    pub fn new(config: EngineConfig, transactions: RawTable) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transactions: Arc::new(transactions),
            mapping: BusinessMapping::new(),
            overrides: ClassificationOverrides::new(),
            normalized_cache: None,
            prepared_cache: None,
        })
    }

    pub fn with_mapping(mut self, mapping: BusinessMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transactions(&self) -> &RawTable {
        &self.transactions
    }

    pub fn overrides(&self) -> &ClassificationOverrides {
        &self.overrides
    }

    pub fn set_mapping(&mut self, mapping: BusinessMapping) {
        self.mapping = mapping;
    }

    /// Replaces the mapping from an uploaded mapping table.
    pub fn load_mapping(&mut self, table: &RawTable) -> Result<MappingLoad> {
        let load = load_business_mapping(table, &self.config.mapping_aliases)?;
        self.mapping = load.mapping.clone();
        Ok(load)
    }

    /// Reads a brand catalogue with this session's configured aliases.
    pub fn load_brand_catalogue(&self, table: &RawTable) -> Result<BrandCatalogueLoad> {
        BrandCatalogue::from_table(table, &self.config.brand_aliases)
    }

    /// Takes effect on the next `prepare`; earlier snapshots are unaffected.
    pub fn set_keyword_table(&mut self, table: KeywordTable) -> Result<()> {
        table.validate()?;
        self.config.keyword_table = table;
        Ok(())
    }

    pub fn apply_override(&mut self, entry: CategoryOverride) -> Result<()> {
        info!(
            "Manual override for customer '{}': {}",
            entry.customer_id, entry.business_category
        );
        self.overrides.push(entry)
    }

    /// Mapping with the session overrides layered on top.
    pub fn effective_mapping(&self) -> BusinessMapping {
        self.overrides.apply(&self.mapping)
    }

    fn normalization_key(&self) -> Result<blake3::Hash> {
        let mut fp = Fingerprint::new("normalize");
        fp.table(&self.transactions)
            .json(&self.config.column_aliases)?
            .json(&self.config.date_formats)?;
        Ok(fp.finish())
    }

    fn preparation_key(&self, normalized: &blake3::Hash, mapping: &BusinessMapping) -> Result<blake3::Hash> {
        let mut fp = Fingerprint::new("prepare");
        fp.bytes(normalized.as_bytes())
            .json(mapping)?
            .json(&self.config.keyword_table)?
            .json(&self.config.product_category_order)?;
        Ok(fp.finish())
    }

    fn normalized(&mut self, key: blake3::Hash) -> Result<Arc<NormalizedDataset>> {
        if let Some((cached_key, dataset)) = &self.normalized_cache {
            if *cached_key == key {
                debug!("Normalization cache hit");
                return Ok(Arc::clone(dataset));
            }
        }

        let dataset = Arc::new(Normalizer::from_config(&self.config).normalize(&self.transactions)?);
        self.normalized_cache = Some((key, Arc::clone(&dataset)));
        Ok(dataset)
    }

    /// Normalizes and classifies, reusing the previous result when nothing it
    /// depends on has changed. An override re-runs classification only.
    pub fn prepare(&mut self) -> Result<Arc<PreparedDataset>> {
        let normalized_key = self.normalization_key()?;
        let mapping = self.effective_mapping();
        let key = self.preparation_key(&normalized_key, &mapping)?;

        if let Some((cached_key, prepared)) = &self.prepared_cache {
            if *cached_key == key {
                debug!("Prepared dataset cache hit ({})", key.to_hex());
                return Ok(Arc::clone(prepared));
            }
        }

        let normalized = self.normalized(normalized_key)?;
        let enriched = SalesAnalyticsProcessor::enrich(&normalized, &mapping, &self.config);
        let prepared = Arc::new(PreparedDataset {
            normalized,
            enriched,
        });

        self.prepared_cache = Some((key, Arc::clone(&prepared)));
        Ok(prepared)
    }

    /// The configured similarity table, or one derived from co-purchases when
    /// none is configured.
    pub fn similarity_table(&self, enriched: &EnrichedDataset) -> Result<SimilarityTable> {
        if self.config.similarity.is_empty() {
            Ok(SimilarityTable::from_co_purchases(enriched))
        } else {
            SimilarityTable::from_entries(&self.config.similarity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Provenance;
    use crate::schema::CategoryKeywords;

    const CSV: &str = "\
customer_id,product_id,product_category,transaction_date,sales_amount
Joe's Bookstore,P1,Books,2024-01-01,10
Acme Software,P2,Laptops,2024-01-02,20
";

    fn session() -> AnalyticsSession {
        AnalyticsSession::new(
            EngineConfig::default(),
            RawTable::from_csv_str(CSV).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_prepare_is_memoized() {
        let mut session = session();
        let first = session.prepare().unwrap();
        let second = session.prepare().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_override_reclassifies_without_renormalizing() {
        let mut session = session();
        let before = session.prepare().unwrap();
        assert_eq!(
            before.enriched.customers["Joe's Bookstore"].business_category,
            "Retail"
        );

        session
            .apply_override(CategoryOverride::new("Joe's Bookstore", "Education", None))
            .unwrap();
        let after = session.prepare().unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(&before.normalized, &after.normalized));

        let joe = &after.enriched.customers["Joe's Bookstore"];
        assert_eq!(joe.business_category, "Education");
        assert_eq!(joe.provenance, Provenance::Explicit);

        // The earlier snapshot is not patched
        assert_eq!(
            before.enriched.customers["Joe's Bookstore"].business_category,
            "Retail"
        );
    }

    #[test]
    fn test_keyword_table_change_applies_to_next_run() {
        let mut session = session();
        let before = session.prepare().unwrap();

        session
            .set_keyword_table(KeywordTable::new(vec![CategoryKeywords::new(
                "Publishing",
                &["book"],
            )]))
            .unwrap();
        let after = session.prepare().unwrap();

        assert_eq!(
            after.enriched.customers["Joe's Bookstore"].business_category,
            "Publishing"
        );
        assert_eq!(
            before.enriched.customers["Joe's Bookstore"].business_category,
            "Retail"
        );
    }

    #[test]
    fn test_invalid_keyword_table_rejected() {
        let mut session = session();
        let duplicate = KeywordTable::new(vec![
            CategoryKeywords::new("Retail", &["shop"]),
            CategoryKeywords::new("Retail", &["store"]),
        ]);
        assert!(session.set_keyword_table(duplicate).is_err());
        assert_eq!(
            session.config().keyword_table,
            KeywordTable::original_defaults()
        );
    }

    #[test]
    fn test_similarity_falls_back_to_co_purchases() {
        let mut session = session();
        let prepared = session.prepare().unwrap();
        let table = session.similarity_table(&prepared.enriched).unwrap();
        assert!(table.is_empty());
    }
}
