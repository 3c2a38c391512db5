use crate::brand::{BrandMatch, BrandOutreach};
use crate::engine::{CategoryMatrix, Combination, GrowthOpportunity, Metric, RowDimension};
use crate::error::{Result, SalesAnalyticsError};
use crate::regional::LocationOpportunity;
use crate::targets::{OutreachTarget, TargetCustomer};
use crate::trends::TrendPoint;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io;

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| SalesAnalyticsError::IoError(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| SalesAnalyticsError::IoError(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// Serializes rows through `csv::Writer`, deriving the header from the
/// record's field names.
pub fn records_to_csv<T: Serialize>(records: &[T]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    finish(writer)
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn row_headers(dimension: RowDimension) -> &'static [&'static str] {
    match dimension {
        RowDimension::BusinessCategory => &["business_category"],
        RowDimension::BusinessSubCategory => &["business_category", "business_sub_category"],
        RowDimension::Location => &["location"],
        RowDimension::State => &["state"],
    }
}

#[derive(Serialize)]
struct MatrixCellRecord<'a> {
    row: &'a str,
    sub_row: Option<&'a str>,
    product_category: &'a str,
    total_revenue: Decimal,
    transaction_count: usize,
    distinct_customer_count: usize,
}

impl CategoryMatrix {
    /// Wide layout: one line per row label, one column per product category.
    pub fn to_csv(&self, metric: Metric) -> Result<String> {
        let row_headers = row_headers(self.row_dimension);
        let with_sub = row_headers.len() > 1;

        let mut writer = csv::Writer::from_writer(Vec::new());
        let header: Vec<&str> = row_headers
            .iter()
            .copied()
            .chain(self.columns.iter().map(String::as_str))
            .collect();
        writer.write_record(&header)?;

        for (row, cells) in self.rows.iter().zip(&self.cells) {
            let mut record = vec![row.label.clone()];
            if with_sub {
                record.push(row.sub_label.clone().unwrap_or_default());
            }
            record.extend(cells.iter().map(|c| c.value(metric).to_string()));
            writer.write_record(&record)?;
        }

        finish(writer)
    }

    /// Long layout: one line per non-empty cell with every aggregate.
    pub fn to_long_csv(&self) -> Result<String> {
        let records: Vec<MatrixCellRecord> = self
            .iter()
            .filter(|(_, _, cell)| !cell.is_empty())
            .map(|(row, column, cell)| MatrixCellRecord {
                row: &row.label,
                sub_row: row.sub_label.as_deref(),
                product_category: column,
                total_revenue: cell.total_revenue,
                transaction_count: cell.transaction_count,
                distinct_customer_count: cell.distinct_customer_count,
            })
            .collect();
        records_to_csv(&records)
    }

    pub fn to_json(&self) -> Result<String> {
        to_json(self)
    }

    pub fn to_markdown(&self, metric: Metric) -> String {
        let row_headers = row_headers(self.row_dimension);
        let with_sub = row_headers.len() > 1;
        let mut output = String::new();

        output.push_str(&format!("## {} by product category\n\n", metric));

        let header: Vec<&str> = row_headers
            .iter()
            .copied()
            .chain(self.columns.iter().map(String::as_str))
            .collect();
        output.push_str(&format!("| {} |\n", header.join(" | ")));
        output.push_str(&format!("|{}\n", "---|".repeat(header.len())));

        for (row, cells) in self.rows.iter().zip(&self.cells) {
            let mut values = vec![row.label.clone()];
            if with_sub {
                values.push(row.sub_label.clone().unwrap_or_default());
            }
            values.extend(cells.iter().map(|c| c.value(metric).round_dp(2).to_string()));
            output.push_str(&format!("| {} |\n", values.join(" | ")));
        }

        output
    }
}

#[derive(Serialize)]
struct CombinationRecord<'a> {
    business_category: &'a str,
    business_sub_category: Option<&'a str>,
    product_category: &'a str,
    metric: Metric,
    value: Decimal,
}

pub fn combinations_to_csv(combinations: &[Combination]) -> Result<String> {
    let records: Vec<CombinationRecord> = combinations
        .iter()
        .map(|c| CombinationRecord {
            business_category: &c.business_category,
            business_sub_category: c.business_sub_category.as_deref(),
            product_category: &c.product_category,
            metric: c.metric,
            value: c.value,
        })
        .collect();
    records_to_csv(&records)
}

#[derive(Serialize)]
struct OpportunityRecord<'a> {
    business_category: &'a str,
    product_categories_bought: usize,
    total_product_categories: usize,
    opportunity_score: f64,
    missing_product_categories: String,
    total_revenue: Decimal,
}

pub fn opportunities_to_csv(opportunities: &[GrowthOpportunity]) -> Result<String> {
    let records: Vec<OpportunityRecord> = opportunities
        .iter()
        .map(|o| OpportunityRecord {
            business_category: &o.business_category,
            product_categories_bought: o.product_categories_bought,
            total_product_categories: o.total_product_categories,
            opportunity_score: o.opportunity_score,
            missing_product_categories: o.missing_product_categories.join(", "),
            total_revenue: o.total_revenue,
        })
        .collect();
    records_to_csv(&records)
}

pub fn trends_to_csv(points: &[TrendPoint]) -> Result<String> {
    records_to_csv(points)
}

#[derive(Serialize)]
struct TargetRecord<'a> {
    priority: usize,
    customer_id: &'a str,
    customer_name: Option<&'a str>,
    business_category: &'a str,
    business_sub_category: &'a str,
    location: Option<&'a str>,
    current_categories: String,
    product_diversity: usize,
    total_revenue: Decimal,
    recommended_category: &'a str,
    similar_categories: String,
    personalization_note: Option<&'a str>,
}

impl<'a> TargetRecord<'a> {
    fn new(target: &'a TargetCustomer, note: Option<&'a str>) -> Self {
        Self {
            priority: target.priority,
            customer_id: &target.customer_id,
            customer_name: target.customer_name.as_deref(),
            business_category: &target.business_category,
            business_sub_category: &target.business_sub_category,
            location: target.location.as_deref(),
            current_categories: target.current_categories.join(", "),
            product_diversity: target.product_diversity,
            total_revenue: target.total_revenue,
            recommended_category: &target.recommended_category,
            similar_categories: similar_list(target),
            personalization_note: note,
        }
    }
}

fn similar_list(target: &TargetCustomer) -> String {
    target
        .similar_categories
        .iter()
        .map(|s| s.product_category.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn targets_to_csv(targets: &[TargetCustomer]) -> Result<String> {
    let records: Vec<TargetRecord> = targets.iter().map(|t| TargetRecord::new(t, None)).collect();
    records_to_csv(&records)
}

pub fn outreach_to_csv(outreach: &[OutreachTarget]) -> Result<String> {
    let records: Vec<TargetRecord> = outreach
        .iter()
        .map(|o| TargetRecord::new(&o.target, Some(&o.personalization_note)))
        .collect();
    records_to_csv(&records)
}

pub fn outreach_email(target: &TargetCustomer) -> String {
    let name = target.display_name();
    let location = target.location.as_deref().unwrap_or("your area");
    let similar = if target.similar_categories.is_empty() {
        "None at this time".to_string()
    } else {
        similar_list(target)
    };

    format!(
        "Subject: Product Recommendation for {name}\n\
         \n\
         Dear {name},\n\
         \n\
         We noticed that other {category} businesses in {location} are finding great success with our {product} line.\n\
         \n\
         Based on your current product mix ({current}), we believe {product} would be an excellent addition to your inventory.\n\
         \n\
         Related categories you already carry:\n\
         {similar}\n\
         \n\
         Would you like to learn more about our {product} offerings? We'd be happy to provide samples or a personalized consultation.\n\
         \n\
         Best regards,\n\
         Your Sales Team",
        name = name,
        category = target.business_category,
        location = location,
        product = target.recommended_category,
        current = target.current_categories.join(", "),
        similar = similar,
    )
}

/// All e-mails, separated by a rule of `=`.
pub fn outreach_emails(targets: &[TargetCustomer]) -> String {
    let separator = format!("\n\n{}\n\n", "=".repeat(80));
    targets
        .iter()
        .map(outreach_email)
        .collect::<Vec<_>>()
        .join(&separator)
}

#[derive(Serialize)]
struct BrandMatchRecord<'a> {
    priority: usize,
    customer_id: &'a str,
    customer_name: Option<&'a str>,
    business_category: &'a str,
    location: Option<&'a str>,
    current_categories: String,
    overlapping_categories: String,
    match_score: f64,
    recommended_products: String,
    total_revenue: Decimal,
    opportunity_score: usize,
    outreach_message: Option<&'a str>,
}

impl<'a> BrandMatchRecord<'a> {
    fn new(m: &'a BrandMatch, message: Option<&'a str>) -> Self {
        Self {
            priority: m.priority,
            customer_id: &m.customer_id,
            customer_name: m.customer_name.as_deref(),
            business_category: &m.business_category,
            location: m.location.as_deref(),
            current_categories: m.current_categories.join(", "),
            overlapping_categories: m.overlapping_categories.join(", "),
            match_score: m.match_score,
            recommended_products: m.recommended_products.join(" | "),
            total_revenue: m.total_revenue,
            opportunity_score: m.opportunity_score,
            outreach_message: message,
        }
    }
}

pub fn brand_matches_to_csv(matches: &[BrandMatch]) -> Result<String> {
    let records: Vec<BrandMatchRecord> = matches
        .iter()
        .map(|m| BrandMatchRecord::new(m, None))
        .collect();
    records_to_csv(&records)
}

pub fn brand_outreach_to_csv(outreach: &[BrandOutreach]) -> Result<String> {
    let records: Vec<BrandMatchRecord> = outreach
        .iter()
        .map(|o| BrandMatchRecord::new(&o.brand_match, Some(&o.outreach_message)))
        .collect();
    records_to_csv(&records)
}

pub fn location_opportunities_to_csv(opportunities: &[LocationOpportunity]) -> Result<String> {
    records_to_csv(opportunities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AggregateCell, MatrixRow};
    use crate::targets::SimilarCategory;

    fn matrix() -> CategoryMatrix {
        let cell = |revenue: i64, count: usize| AggregateCell {
            total_revenue: Decimal::from(revenue),
            transaction_count: count,
            distinct_customer_count: count,
        };
        CategoryMatrix {
            row_dimension: RowDimension::BusinessCategory,
            rows: vec![
                MatrixRow {
                    label: "Retail".to_string(),
                    sub_label: None,
                },
                MatrixRow {
                    label: "Technology".to_string(),
                    sub_label: None,
                },
            ],
            columns: vec!["Electronics".to_string(), "Software".to_string()],
            cells: vec![
                vec![cell(100, 1), cell(50, 1)],
                vec![cell(200, 1), AggregateCell::default()],
            ],
        }
    }

    fn target() -> TargetCustomer {
        TargetCustomer {
            priority: 1,
            customer_id: "C7".to_string(),
            customer_name: Some("Corner Shop".to_string()),
            business_category: "Retail".to_string(),
            business_sub_category: "Unspecified".to_string(),
            location: Some("Austin, TX".to_string()),
            current_categories: vec!["Books".to_string(), "Stationery".to_string()],
            product_diversity: 2,
            total_revenue: Decimal::from(140),
            transaction_count: 2,
            recommended_category: "Toys".to_string(),
            similar_categories: vec![SimilarCategory {
                product_category: "Stationery".to_string(),
                similarity: 0.7,
            }],
        }
    }

    #[test]
    fn test_matrix_wide_csv() {
        let csv = matrix().to_csv(Metric::TotalRevenue).unwrap();
        assert_eq!(
            csv,
            "business_category,Electronics,Software\nRetail,100,50\nTechnology,200,0\n"
        );
    }

    #[test]
    fn test_matrix_long_csv_skips_empty_cells() {
        let csv = matrix().to_long_csv().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "row,sub_row,product_category,total_revenue,transaction_count,distinct_customer_count"
        );
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3], "Technology,,Electronics,200,1,1");
    }

    #[test]
    fn test_matrix_markdown() {
        let md = matrix().to_markdown(Metric::TransactionCount);
        assert!(md.contains("| business_category | Electronics | Software |"));
        assert!(md.contains("|---|---|---|"));
        assert!(md.contains("| Technology | 1 | 0 |"));
    }

    #[test]
    fn test_targets_csv_joins_lists() {
        let csv = targets_to_csv(&[target()]).unwrap();
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let headers = reader.headers().unwrap().clone();
        let record = reader.records().next().unwrap().unwrap();

        let column = |name: &str| {
            let idx = headers.iter().position(|h| h == name).unwrap();
            record.get(idx).unwrap().to_string()
        };
        assert_eq!(column("customer_id"), "C7");
        assert_eq!(column("current_categories"), "Books, Stationery");
        assert_eq!(column("similar_categories"), "Stationery");
    }

    #[test]
    fn test_outreach_email_template() {
        let email = outreach_email(&target());
        assert!(email.starts_with("Subject: Product Recommendation for Corner Shop\n\nDear Corner Shop,"));
        assert!(email.contains("other Retail businesses in Austin, TX"));
        assert!(email.contains("current product mix (Books, Stationery)"));
        assert!(email.ends_with("Your Sales Team"));

        let both = outreach_emails(&[target(), target()]);
        assert_eq!(both.matches(&"=".repeat(80)).count(), 1);
    }

    #[test]
    fn test_brand_outreach_csv() {
        let brand_match = BrandMatch {
            priority: 1,
            customer_id: "C7".to_string(),
            customer_name: None,
            business_category: "Retail".to_string(),
            location: Some("Austin, TX".to_string()),
            current_categories: vec!["Cards".to_string(), "Toys".to_string()],
            overlapping_categories: vec!["Cards".to_string()],
            match_score: 0.5,
            recommended_products: vec!["Birthday Card".to_string(), "Holiday Card".to_string()],
            total_revenue: Decimal::from(90),
            product_diversity: 2,
            opportunity_score: 2,
        };
        let outreach = BrandOutreach {
            outreach_message: "Hello".to_string(),
            brand_match,
        };

        let csv = brand_outreach_to_csv(&[outreach]).unwrap();
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let headers = reader.headers().unwrap().clone();
        let record = reader.records().next().unwrap().unwrap();
        let column = |name: &str| {
            let idx = headers.iter().position(|h| h == name).unwrap();
            record.get(idx).unwrap().to_string()
        };

        assert_eq!(column("recommended_products"), "Birthday Card | Holiday Card");
        assert_eq!(column("current_categories"), "Cards, Toys");
        assert_eq!(column("outreach_message"), "Hello");
    }

    #[test]
    fn test_json_export() {
        let json = matrix().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["row_dimension"], "business_category");
        assert_eq!(value["columns"][1], "Software");
    }
}
