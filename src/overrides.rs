use crate::error::{Result, SalesAnalyticsError};
use crate::schema::BusinessMapping;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A manual correction of one customer's business classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CategoryOverride {
    #[schemars(description = "The exact customer id as it appears in the transactions.")]
    pub customer_id: String,

    #[schemars(description = "The business category to assign.")]
    pub business_category: String,

    #[schemars(description = "Optional sub-category. Blank or missing means 'Unspecified'.")]
    #[serde(default)]
    pub business_sub_category: Option<String>,
}

impl CategoryOverride {
    pub fn new(customer_id: &str, business_category: &str, business_sub_category: Option<&str>) -> Self {
        Self {
            customer_id: customer_id.to_string(),
            business_category: business_category.to_string(),
            business_sub_category: business_sub_category.map(str::to_string),
        }
    }
}

/// Session-lifetime overrides. Later entries for the same customer win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClassificationOverrides {
    #[serde(default)]
    pub overrides: Vec<CategoryOverride>,
}

impl ClassificationOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Validates and records one override.
    pub fn push(&mut self, entry: CategoryOverride) -> Result<()> {
        validate_override(&entry)?;
        self.overrides.push(entry);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.overrides.iter().try_for_each(validate_override)
    }

    /// Returns a new mapping with every override layered on top of `base`.
    /// The base mapping is left untouched.
    pub fn apply(&self, base: &BusinessMapping) -> BusinessMapping {
        let mut mapping = base.clone();

        for entry in &self.overrides {
            debug!(
                "Override: customer '{}' -> '{}'",
                entry.customer_id, entry.business_category
            );
            mapping.insert(
                entry.customer_id.as_str(),
                entry.business_category.as_str(),
                entry.business_sub_category.clone(),
            );
        }

        mapping
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ClassificationOverrides)
    }
}

fn validate_override(entry: &CategoryOverride) -> Result<()> {
    if entry.customer_id.trim().is_empty() {
        return Err(SalesAnalyticsError::invalid_parameter(
            "customer_id",
            "override customer id must not be blank",
        ));
    }
    if entry.business_category.trim().is_empty() {
        return Err(SalesAnalyticsError::invalid_parameter(
            "business_category",
            format!(
                "override for customer '{}' has a blank business category",
                entry.customer_id
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::UNSPECIFIED_SUB_CATEGORY;

    #[test]
    fn test_apply_leaves_base_untouched() {
        let mut base = BusinessMapping::new();
        base.insert("C1", "Retail", Some("Bookstore".to_string()));

        let mut overrides = ClassificationOverrides::new();
        overrides
            .push(CategoryOverride::new("C1", "Technology", None))
            .unwrap();
        overrides
            .push(CategoryOverride::new("C2", "Healthcare", Some("Clinic")))
            .unwrap();

        let applied = overrides.apply(&base);

        assert_eq!(base.len(), 1);
        assert_eq!(base.get("C1").unwrap().business_category, "Retail");

        let c1 = applied.get("C1").unwrap();
        assert_eq!(c1.business_category, "Technology");
        assert_eq!(c1.business_sub_category, UNSPECIFIED_SUB_CATEGORY);
        assert_eq!(applied.get("C2").unwrap().business_sub_category, "Clinic");
    }

    #[test]
    fn test_later_override_wins() {
        let mut overrides = ClassificationOverrides::new();
        overrides
            .push(CategoryOverride::new("C1", "Retail", None))
            .unwrap();
        overrides
            .push(CategoryOverride::new("C1", "Finance", None))
            .unwrap();

        let applied = overrides.apply(&BusinessMapping::new());
        assert_eq!(applied.get("C1").unwrap().business_category, "Finance");
    }

    #[test]
    fn test_blank_category_rejected() {
        let mut overrides = ClassificationOverrides::new();
        let result = overrides.push(CategoryOverride::new("C1", "  ", None));
        assert!(matches!(
            result,
            Err(SalesAnalyticsError::InvalidParameter { .. })
        ));
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_overrides_deserialize_from_json() {
        let json = r#"{"overrides": [{"customer_id": "C9", "business_category": "Education"}]}"#;
        let overrides: ClassificationOverrides = serde_json::from_str(json).unwrap();
        assert!(overrides.validate().is_ok());
        assert_eq!(overrides.overrides[0].business_sub_category, None);
    }
}
