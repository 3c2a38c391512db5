use crate::error::{Result, SalesAnalyticsError};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Business category assigned when neither a mapping nor a keyword applies.
pub const OTHER_CATEGORY: &str = "Other";

/// Sub-category assigned when no finer segment could be resolved.
pub const UNSPECIFIED_SUB_CATEGORY: &str = "Unspecified";

/// A single validated sales transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub customer_id: String,
    /// Display name used for keyword classification when present.
    pub customer_name: Option<String>,
    pub product_id: String,
    pub product_category: String,
    pub transaction_date: NaiveDate,
    pub sales_amount: Decimal,
    pub location: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub business_category: String,
    pub business_sub_category: String,
}

/// Explicit customer -> business category assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessMapping {
    entries: BTreeMap<String, MappingEntry>,
}

impl BusinessMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `customer_id`. A blank sub-category
    /// is stored as "Unspecified".
    pub fn insert(
        &mut self,
        customer_id: impl Into<String>,
        business_category: impl Into<String>,
        business_sub_category: Option<String>,
    ) {
        let sub = business_sub_category
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNSPECIFIED_SUB_CATEGORY.to_string());

        self.entries.insert(
            customer_id.into().trim().to_string(),
            MappingEntry {
                business_category: business_category.into().trim().to_string(),
                business_sub_category: sub,
            },
        );
    }

    pub fn get(&self, customer_id: &str) -> Option<&MappingEntry> {
        self.entries.get(customer_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MappingEntry)> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubCategoryKeywords {
    #[schemars(description = "Sub-category name (e.g. 'Bookstore' within 'Retail')")]
    pub name: String,

    #[schemars(
        description = "Case-insensitive substrings that indicate this sub-category in a customer's name or id"
    )]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CategoryKeywords {
    #[schemars(description = "Business category name (e.g. 'Retail', 'Healthcare')")]
    pub name: String,

    #[schemars(
        description = "Case-insensitive substrings that indicate this category. Each keyword found in the customer's identifying string adds one to the category score."
    )]
    pub keywords: Vec<String>,

    #[serde(default)]
    #[schemars(
        description = "Ordered sub-categories scored only after this category has been chosen. Earlier entries win ties."
    )]
    pub sub_categories: Vec<SubCategoryKeywords>,
}

impl CategoryKeywords {
    pub fn new(name: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            sub_categories: Vec::new(),
        }
    }

    pub fn with_sub_category(mut self, name: &str, keywords: &[&str]) -> Self {
        self.sub_categories.push(SubCategoryKeywords {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        });
        self
    }
}

/// Ordered keyword configuration. Declaration order is the tie-break priority.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct KeywordTable {
    pub categories: Vec<CategoryKeywords>,
}

impl KeywordTable {
    pub fn new(categories: Vec<CategoryKeywords>) -> Self {
        Self { categories }
    }

    pub fn category_names(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.name.clone()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&CategoryKeywords> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn sub_category_names(&self, category: &str) -> Vec<String> {
        self.find(category)
            .map(|c| c.sub_categories.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn original_defaults() -> Self {
        Self::new(vec![
            CategoryKeywords::new(
                "Retail",
                &["retail", "store", "shop", "market", "outlet", "merchant"],
            ),
            CategoryKeywords::new(
                "Healthcare",
                &[
                    "health", "medical", "hospital", "clinic", "pharmacy", "doctor", "nurse",
                ],
            ),
            CategoryKeywords::new(
                "Manufacturing",
                &[
                    "manufacturing",
                    "factory",
                    "production",
                    "industrial",
                    "manufacturer",
                ],
            ),
            CategoryKeywords::new(
                "Technology",
                &[
                    "tech",
                    "software",
                    "computer",
                    "digital",
                    "technology",
                    "tech company",
                ],
            ),
            CategoryKeywords::new(
                "Finance",
                &[
                    "bank",
                    "financial",
                    "finance",
                    "investment",
                    "accounting",
                    "insurance",
                ],
            ),
            CategoryKeywords::new(
                "Education",
                &[
                    "school",
                    "university",
                    "education",
                    "college",
                    "academy",
                    "learning",
                ],
            ),
            CategoryKeywords::new(
                "Real Estate",
                &["real estate", "property", "realty", "housing", "construction"],
            ),
            CategoryKeywords::new(
                "Hospitality",
                &["hotel", "restaurant", "hospitality", "catering", "tourism"],
            ),
            CategoryKeywords::new(
                "Transportation",
                &["transport", "logistics", "shipping", "delivery", "freight"],
            ),
            CategoryKeywords::new(
                "Construction",
                &["construction", "contractor", "building", "architect"],
            ),
            CategoryKeywords::new(
                "Food & Beverage",
                &["food", "restaurant", "cafe", "beverage", "catering"],
            ),
            CategoryKeywords::new(
                "Professional Services",
                &["consulting", "legal", "law", "advisory", "services"],
            ),
        ])
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for category in &self.categories {
            if category.name.trim().is_empty() {
                return Err(SalesAnalyticsError::InvalidConfig(
                    "Keyword table contains a category with a blank name".to_string(),
                ));
            }
            if !seen.insert(category.name.as_str()) {
                return Err(SalesAnalyticsError::InvalidConfig(format!(
                    "Business category '{}' is declared more than once",
                    category.name
                )));
            }

            let mut seen_sub = BTreeSet::new();
            for sub in &category.sub_categories {
                if sub.name.trim().is_empty() {
                    return Err(SalesAnalyticsError::InvalidConfig(format!(
                        "Business category '{}' has a sub-category with a blank name",
                        category.name
                    )));
                }
                if !seen_sub.insert(sub.name.as_str()) {
                    return Err(SalesAnalyticsError::InvalidConfig(format!(
                        "Sub-category '{}' is declared more than once under '{}'",
                        sub.name, category.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Header aliases per canonical field, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnAliases {
    pub customer_id: Vec<String>,
    #[serde(default)]
    pub customer_name: Vec<String>,
    pub product_id: Vec<String>,
    pub product_category: Vec<String>,
    pub transaction_date: Vec<String>,
    pub sales_amount: Vec<String>,
    #[serde(default)]
    pub location: Vec<String>,
    #[serde(default)]
    pub city: Vec<String>,
    #[serde(default)]
    pub state: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for ColumnAliases {
    fn default() -> Self {
        Self {
            customer_id: strings(&[
                "customer_id",
                "customer",
                "client_id",
                "client",
                "buyer",
                "store",
            ]),
            customer_name: strings(&[
                "customer_name",
                "client_name",
                "business_name",
                "company_name",
                "company",
                "account_name",
            ]),
            product_id: strings(&["product_id", "product", "item_id", "item", "sku"]),
            product_category: strings(&["product_category", "category", "product_type"]),
            transaction_date: strings(&[
                "transaction_date",
                "date",
                "sale_date",
                "purchase_date",
                "order_date",
            ]),
            sales_amount: strings(&[
                "sales_amount",
                "amount",
                "revenue",
                "price",
                "total",
                "sales",
            ]),
            location: strings(&["location", "city_state", "address", "region"]),
            city: strings(&["city", "town"]),
            state: strings(&["state", "province"]),
        }
    }
}

/// Header aliases for the optional business-mapping file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MappingAliases {
    pub customer_id: Vec<String>,
    pub business_category: Vec<String>,
    #[serde(default)]
    pub business_sub_category: Vec<String>,
}

impl Default for MappingAliases {
    fn default() -> Self {
        Self {
            customer_id: strings(&[
                "customer_id",
                "customer",
                "client_id",
                "client",
                "buyer",
                "store",
            ]),
            business_category: strings(&[
                "business_category",
                "business_type",
                "industry",
                "category",
            ]),
            business_sub_category: strings(&[
                "business_sub_category",
                "sub_category",
                "subcategory",
                "segment",
            ]),
        }
    }
}

/// Header aliases for a brand product catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BrandAliases {
    pub product_name: Vec<String>,
    pub product_category: Vec<String>,
    #[serde(default)]
    pub product_id: Vec<String>,
    #[serde(default)]
    pub product_type: Vec<String>,
}

impl Default for BrandAliases {
    fn default() -> Self {
        Self {
            product_name: strings(&["product_name", "name", "title", "item"]),
            product_category: strings(&["product_category", "category", "collection"]),
            product_id: strings(&["product_id", "sku", "item_id"]),
            product_type: strings(&["product_type", "type", "format"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityDenominator {
    #[schemars(
        description = "Normalise against the number of distinct product categories present in the analysed scope."
    )]
    DatasetProductCategories,

    #[schemars(description = "Normalise against a fixed catalogue size (must be at least 1).")]
    Fixed(usize),
}

impl Default for OpportunityDenominator {
    fn default() -> Self {
        Self::DatasetProductCategories
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SimilarityEntry {
    pub category_a: String,
    pub category_b: String,
    #[schemars(description = "Similarity between the two product categories, from 0.0 to 1.0. Symmetric.")]
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    #[serde(default)]
    pub column_aliases: ColumnAliases,

    #[serde(default)]
    pub mapping_aliases: MappingAliases,

    #[serde(default)]
    pub brand_aliases: BrandAliases,

    #[schemars(
        description = "chrono format strings tried in order for every transaction date; the first that parses wins."
    )]
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,

    #[schemars(description = "Ordered business category keyword table used for auto-classification.")]
    #[serde(default = "KeywordTable::original_defaults")]
    pub keyword_table: KeywordTable,

    #[schemars(
        description = "Preferred display order of product categories. Unlisted categories follow in lexicographic order."
    )]
    #[serde(default)]
    pub product_category_order: Vec<String>,

    #[serde(default)]
    pub opportunity_denominator: OpportunityDenominator,

    #[schemars(description = "Symmetric product-category adjacency used for similar-product suggestions.")]
    #[serde(default)]
    pub similarity: Vec<SimilarityEntry>,
}

pub fn default_date_formats() -> Vec<String> {
    strings(&[
        "%Y-%m-%d",
        "%m/%d/%Y",
        "%d/%m/%Y",
        "%Y-%m-%d %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
    ])
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            column_aliases: ColumnAliases::default(),
            mapping_aliases: MappingAliases::default(),
            brand_aliases: BrandAliases::default(),
            date_formats: default_date_formats(),
            keyword_table: KeywordTable::original_defaults(),
            product_category_order: Vec::new(),
            opportunity_denominator: OpportunityDenominator::default(),
            similarity: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.keyword_table.validate()?;

        if self.date_formats.is_empty() {
            return Err(SalesAnalyticsError::InvalidConfig(
                "At least one date format must be configured".to_string(),
            ));
        }

        let required = [
            ("customer_id", &self.column_aliases.customer_id),
            ("product_id", &self.column_aliases.product_id),
            ("product_category", &self.column_aliases.product_category),
            ("transaction_date", &self.column_aliases.transaction_date),
            ("sales_amount", &self.column_aliases.sales_amount),
        ];
        for (field, aliases) in required {
            if aliases.iter().all(|a| a.trim().is_empty()) {
                return Err(SalesAnalyticsError::InvalidConfig(format!(
                    "No column aliases configured for required field '{}'",
                    field
                )));
            }
        }

        if self.opportunity_denominator == OpportunityDenominator::Fixed(0) {
            return Err(SalesAnalyticsError::InvalidConfig(
                "Fixed opportunity denominator must be at least 1".to_string(),
            ));
        }

        for entry in &self.similarity {
            if !(0.0..=1.0).contains(&entry.similarity) {
                return Err(SalesAnalyticsError::InvalidConfig(format!(
                    "Similarity between '{}' and '{}' must be within [0, 1], got {}",
                    entry.category_a, entry.category_b, entry.similarity
                )));
            }
        }

        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EngineConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_generation() {
        let schema_json = EngineConfig::schema_as_json().unwrap();
        assert!(schema_json.contains("keyword_table"));
        assert!(schema_json.contains("date_formats"));
        assert!(schema_json.contains("opportunity_denominator"));
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.keyword_table.categories.len(), 12);
        assert_eq!(config.keyword_table.categories[0].name, "Retail");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "keyword_table": [
                {
                    "name": "Retail",
                    "keywords": ["store", "shop"],
                    "sub_categories": [{ "name": "Bookstore", "keywords": ["book"] }]
                }
            ],
            "opportunity_denominator": { "fixed": 8 }
        }"#;

        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.keyword_table.categories.len(), 1);
        assert_eq!(
            config.keyword_table.sub_category_names("Retail"),
            vec!["Bookstore".to_string()]
        );
        assert_eq!(config.opportunity_denominator, OpportunityDenominator::Fixed(8));
        assert_eq!(config.date_formats, default_date_formats());
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let table = KeywordTable::new(vec![
            CategoryKeywords::new("Retail", &["store"]),
            CategoryKeywords::new("Retail", &["shop"]),
        ]);
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_out_of_range_similarity_rejected() {
        let config = EngineConfig {
            similarity: vec![SimilarityEntry {
                category_a: "Books".to_string(),
                category_b: "Stationery".to_string(),
                similarity: 1.5,
            }],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mapping_blank_sub_category_is_unspecified() {
        let mut mapping = BusinessMapping::new();
        mapping.insert("C1", "Retail", Some("  ".to_string()));
        mapping.insert("C2", "Retail", Some("Bookstore".to_string()));

        assert_eq!(
            mapping.get("C1").unwrap().business_sub_category,
            UNSPECIFIED_SUB_CATEGORY
        );
        assert_eq!(mapping.get("C2").unwrap().business_sub_category, "Bookstore");
    }
}
