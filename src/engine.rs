use crate::error::{Result, SalesAnalyticsError};
use crate::schema::OpportunityDenominator;
use crate::utils::order_labels;
use crate::{EnrichedDataset, EnrichedRecord, RecordFilter};
use chrono::NaiveDate;
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Row granularity of a category matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixLevel {
    Category,
    SubCategory,
}

/// What the row labels of a matrix represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowDimension {
    BusinessCategory,
    BusinessSubCategory,
    Location,
    State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TotalRevenue,
    TransactionCount,
    AverageValue,
}

impl Metric {
    pub const fn as_str(self) -> &'static str {
        match self {
            Metric::TotalRevenue => "total_revenue",
            Metric::TransactionCount => "transaction_count",
            Metric::AverageValue => "average_value",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = SalesAnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "revenue" | "total_revenue" => Ok(Metric::TotalRevenue),
            "count" | "transaction_count" => Ok(Metric::TransactionCount),
            "avg_value" | "average_value" => Ok(Metric::AverageValue),
            other => Err(SalesAnalyticsError::invalid_parameter(
                "metric",
                format!(
                    "unknown metric '{}'; expected revenue, count or avg_value",
                    other
                ),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCell {
    pub total_revenue: Decimal,
    pub transaction_count: usize,
    pub distinct_customer_count: usize,
}

impl AggregateCell {
    pub fn is_empty(&self) -> bool {
        self.transaction_count == 0
    }

    pub fn average_value(&self) -> Decimal {
        if self.transaction_count == 0 {
            return Decimal::ZERO;
        }
        self.total_revenue / Decimal::from(self.transaction_count)
    }

    pub fn value(&self, metric: Metric) -> Decimal {
        match metric {
            Metric::TotalRevenue => self.total_revenue,
            Metric::TransactionCount => Decimal::from(self.transaction_count),
            Metric::AverageValue => self.average_value(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatrixRow {
    pub label: String,
    pub sub_label: Option<String>,
}

/// Dense, ordered aggregate table: `cells[row][column]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMatrix {
    pub row_dimension: RowDimension,
    pub rows: Vec<MatrixRow>,
    pub columns: Vec<String>,
    pub cells: Vec<Vec<AggregateCell>>,
}

impl CategoryMatrix {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    fn lookup(&self, label: &str, sub_label: Option<&str>, column: &str) -> Option<&AggregateCell> {
        let col = self.column_index(column)?;
        let row = self
            .rows
            .iter()
            .position(|r| r.label == label && r.sub_label.as_deref() == sub_label)?;
        self.cells.get(row).and_then(|r| r.get(col))
    }

    pub fn cell(&self, label: &str, column: &str) -> Option<&AggregateCell> {
        self.lookup(label, None, column)
    }

    pub fn sub_cell(&self, label: &str, sub_label: &str, column: &str) -> Option<&AggregateCell> {
        self.lookup(label, Some(sub_label), column)
    }

    pub fn total_revenue(&self) -> Decimal {
        self.iter().map(|(_, _, cell)| cell.total_revenue).sum()
    }

    /// Row-major iteration over every cell, empty ones included.
    pub fn iter(&self) -> impl Iterator<Item = (&MatrixRow, &str, &AggregateCell)> {
        self.rows.iter().zip(&self.cells).flat_map(move |(row, cells)| {
            self.columns
                .iter()
                .zip(cells)
                .map(move |(column, cell)| (row, column.as_str(), cell))
        })
    }
}

#[derive(Default)]
struct CellAccumulator<'a> {
    total_revenue: Decimal,
    transaction_count: usize,
    customers: BTreeSet<&'a str>,
}

impl CellAccumulator<'_> {
    fn finish(self) -> AggregateCell {
        AggregateCell {
            total_revenue: self.total_revenue,
            transaction_count: self.transaction_count,
            distinct_customer_count: self.customers.len(),
        }
    }
}

type CellKey<'a> = (&'a str, Option<&'a str>, &'a str);

/// Single-pass accumulator shared by the business and regional matrices.
pub(crate) struct MatrixBuilder<'a> {
    cells: BTreeMap<CellKey<'a>, CellAccumulator<'a>>,
}

impl<'a> MatrixBuilder<'a> {
    pub(crate) fn new() -> Self {
        Self {
            cells: BTreeMap::new(),
        }
    }

    pub(crate) fn add(&mut self, label: &'a str, sub_label: Option<&'a str>, record: &'a EnrichedRecord) {
        let t = &record.transaction;
        let acc = self
            .cells
            .entry((label, sub_label, t.product_category.as_str()))
            .or_default();
        acc.total_revenue += t.sales_amount;
        acc.transaction_count += 1;
        acc.customers.insert(t.customer_id.as_str());
    }

    pub(crate) fn build(
        self,
        row_dimension: RowDimension,
        label_order: &[String],
        sub_label_order: &BTreeMap<String, Vec<String>>,
        column_order: &[String],
    ) -> CategoryMatrix {
        let mut sub_labels: BTreeMap<&str, BTreeSet<Option<&str>>> = BTreeMap::new();
        let mut present_columns: BTreeSet<&str> = BTreeSet::new();
        for (label, sub, column) in self.cells.keys() {
            sub_labels.entry(*label).or_default().insert(*sub);
            present_columns.insert(*column);
        }

        let labels = order_labels(sub_labels.keys().map(|l| l.to_string()), label_order);
        let mut rows = Vec::new();
        for label in labels {
            let subs = sub_labels.remove(label.as_str()).unwrap_or_default();
            if subs.contains(&None) {
                rows.push(MatrixRow {
                    label: label.clone(),
                    sub_label: None,
                });
            }
            let configured = sub_label_order.get(&label).map(Vec::as_slice).unwrap_or(&[]);
            let named = subs.into_iter().flatten().map(str::to_string);
            for sub in order_labels(named, configured) {
                rows.push(MatrixRow {
                    label: label.clone(),
                    sub_label: Some(sub),
                });
            }
        }

        let columns = order_labels(present_columns.into_iter().map(str::to_string), column_order);

        let row_index: BTreeMap<(&str, Option<&str>), usize> = rows
            .iter()
            .enumerate()
            .map(|(i, r)| ((r.label.as_str(), r.sub_label.as_deref()), i))
            .collect();
        let column_index: BTreeMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let mut cells = vec![vec![AggregateCell::default(); columns.len()]; rows.len()];
        for ((label, sub, column), acc) in self.cells {
            if let (Some(&r), Some(&c)) = (row_index.get(&(label, sub)), column_index.get(column)) {
                cells[r][c] = acc.finish();
            }
        }

        CategoryMatrix {
            row_dimension,
            rows,
            columns,
            cells,
        }
    }
}

/// Business category (optionally sub-category) x product category.
pub fn category_matrix(
    enriched: &EnrichedDataset,
    level: MatrixLevel,
    filter: &RecordFilter,
) -> CategoryMatrix {
    let mut builder = MatrixBuilder::new();
    for record in enriched.scoped(filter) {
        let sub = match level {
            MatrixLevel::Category => None,
            MatrixLevel::SubCategory => Some(record.business_sub_category()),
        };
        builder.add(record.business_category(), sub, record);
    }

    let (dimension, sub_order) = match level {
        MatrixLevel::Category => (RowDimension::BusinessCategory, BTreeMap::new()),
        MatrixLevel::SubCategory => (
            RowDimension::BusinessSubCategory,
            enriched.sub_category_order.clone(),
        ),
    };

    let matrix = builder.build(
        dimension,
        &enriched.business_order,
        &sub_order,
        &enriched.product_order,
    );
    debug!(
        "Built {}x{} category matrix",
        matrix.rows.len(),
        matrix.columns.len()
    );
    matrix
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combination {
    pub business_category: String,
    pub business_sub_category: Option<String>,
    pub product_category: String,
    pub metric: Metric,
    pub value: Decimal,
    pub cell: AggregateCell,
}

pub(crate) fn require_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(SalesAnalyticsError::invalid_parameter(
            name,
            "must be a positive integer",
        ));
    }
    Ok(())
}

/// Non-empty cells ranked by `metric` descending, then by row and column
/// labels ascending.
pub fn top_combinations(
    matrix: &CategoryMatrix,
    metric: Metric,
    limit: usize,
) -> Result<Vec<Combination>> {
    require_positive("limit", limit)?;

    let mut ranked: Vec<Combination> = matrix
        .iter()
        .filter(|(_, _, cell)| !cell.is_empty())
        .map(|(row, column, cell)| Combination {
            business_category: row.label.clone(),
            business_sub_category: row.sub_label.clone(),
            product_category: column.to_string(),
            metric,
            value: cell.value(metric),
            cell: cell.clone(),
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.value
            .cmp(&a.value)
            .then_with(|| a.business_category.cmp(&b.business_category))
            .then_with(|| a.business_sub_category.cmp(&b.business_sub_category))
            .then_with(|| a.product_category.cmp(&b.product_category))
    });
    ranked.truncate(limit);

    Ok(ranked)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthOpportunity {
    pub business_category: String,
    pub product_categories_bought: usize,
    pub total_product_categories: usize,
    /// `(D - breadth) / D`, clamped to `[0, 1]`.
    pub opportunity_score: f64,
    pub missing_product_categories: Vec<String>,
    pub total_revenue: Decimal,
}

/// Business categories ranked by how few product categories they buy.
/// Categories with no transactions in scope never appear.
pub fn growth_opportunities(
    enriched: &EnrichedDataset,
    filter: &RecordFilter,
    denominator: &OpportunityDenominator,
) -> Result<Vec<GrowthOpportunity>> {
    filter.validate()?;
    if let OpportunityDenominator::Fixed(n) = denominator {
        require_positive("opportunity_denominator", *n)?;
    }

    let mut bought: BTreeMap<&str, (BTreeSet<&str>, Decimal)> = BTreeMap::new();
    let mut all_products: BTreeSet<&str> = BTreeSet::new();
    for record in enriched.scoped(filter) {
        let product = record.transaction.product_category.as_str();
        let entry = bought.entry(record.business_category()).or_default();
        entry.0.insert(product);
        entry.1 += record.transaction.sales_amount;
        all_products.insert(product);
    }

    let total = match denominator {
        OpportunityDenominator::DatasetProductCategories => all_products.len(),
        OpportunityDenominator::Fixed(n) => *n,
    };
    let product_order = order_labels(
        all_products.iter().map(|p| p.to_string()),
        &enriched.product_order,
    );

    let mut opportunities: Vec<GrowthOpportunity> = bought
        .into_iter()
        .map(|(category, (products, revenue))| {
            let breadth = products.len();
            let score = if total == 0 {
                0.0
            } else {
                (total.saturating_sub(breadth) as f64 / total as f64).clamp(0.0, 1.0)
            };
            GrowthOpportunity {
                business_category: category.to_string(),
                product_categories_bought: breadth,
                total_product_categories: total,
                opportunity_score: score,
                missing_product_categories: product_order
                    .iter()
                    .filter(|p| !products.contains(p.as_str()))
                    .cloned()
                    .collect(),
                total_revenue: revenue,
            }
        })
        .collect();

    opportunities.sort_by(|a, b| {
        a.product_categories_bought
            .cmp(&b.product_categories_bought)
            .then_with(|| a.business_category.cmp(&b.business_category))
    });

    Ok(opportunities)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub total_revenue: Decimal,
    pub transaction_count: usize,
    pub customer_count: usize,
    pub business_category_count: usize,
    pub product_category_count: usize,
    pub average_transaction_value: Decimal,
    pub first_transaction: Option<NaiveDate>,
    pub last_transaction: Option<NaiveDate>,
}

pub fn summary_statistics(enriched: &EnrichedDataset, filter: &RecordFilter) -> SummaryStatistics {
    let mut total_revenue = Decimal::ZERO;
    let mut transaction_count = 0usize;
    let mut customers = BTreeSet::new();
    let mut business_categories = BTreeSet::new();
    let mut product_categories = BTreeSet::new();
    let mut first: Option<NaiveDate> = None;
    let mut last: Option<NaiveDate> = None;

    for record in enriched.scoped(filter) {
        let t = &record.transaction;
        total_revenue += t.sales_amount;
        transaction_count += 1;
        customers.insert(t.customer_id.as_str());
        business_categories.insert(record.business_category());
        product_categories.insert(t.product_category.as_str());
        first = Some(first.map_or(t.transaction_date, |d| d.min(t.transaction_date)));
        last = Some(last.map_or(t.transaction_date, |d| d.max(t.transaction_date)));
    }

    let average_transaction_value = if transaction_count == 0 {
        Decimal::ZERO
    } else {
        total_revenue / Decimal::from(transaction_count)
    };

    SummaryStatistics {
        total_revenue,
        transaction_count,
        customer_count: customers.len(),
        business_category_count: business_categories.len(),
        product_category_count: product_categories.len(),
        average_transaction_value,
        first_transaction: first,
        last_transaction: last,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use crate::ingestion::RawTable;
    use crate::normalizer::normalize;
    use crate::schema::{BusinessMapping, EngineConfig};

    const HEADER: &str = "customer_id,product_id,product_category,transaction_date,sales_amount";

    fn enriched(rows: &[&str], mapping: &[(&str, &str, Option<&str>)]) -> EnrichedDataset {
        let csv = format!("{}\n{}\n", HEADER, rows.join("\n"));
        let config = EngineConfig::default();
        let normalized = normalize(&RawTable::from_csv_str(&csv).unwrap(), &config).unwrap();

        let mut business = BusinessMapping::new();
        for (customer, category, sub) in mapping {
            business.insert(*customer, *category, sub.map(str::to_string));
        }
        classify(&normalized, &business, &config.keyword_table)
    }

    fn example() -> EnrichedDataset {
        enriched(
            &[
                "C1,P1,Electronics,2024-01-01,100",
                "C1,P2,Software,2024-01-02,50",
                "C2,P3,Electronics,2024-01-03,200",
            ],
            &[("C1", "Retail", None), ("C2", "Technology", None)],
        )
    }

    #[test]
    fn test_category_matrix_example() {
        let matrix = category_matrix(&example(), MatrixLevel::Category, &RecordFilter::default());

        assert_eq!(matrix.columns, vec!["Electronics", "Software"]);
        assert_eq!(
            matrix.cell("Retail", "Electronics").unwrap().total_revenue,
            Decimal::from(100)
        );
        assert_eq!(
            matrix.cell("Retail", "Software").unwrap().total_revenue,
            Decimal::from(50)
        );
        assert_eq!(
            matrix.cell("Technology", "Electronics").unwrap().total_revenue,
            Decimal::from(200)
        );
        assert!(matrix.cell("Technology", "Software").unwrap().is_empty());
        assert_eq!(matrix.total_revenue(), Decimal::from(350));
    }

    #[test]
    fn test_rows_follow_keyword_table_order() {
        let data = enriched(
            &[
                "C1,P1,Electronics,2024-01-01,10",
                "C2,P1,Electronics,2024-01-01,10",
                "C3,P1,Electronics,2024-01-01,10",
            ],
            &[
                ("C1", "Zoo Supplies", None),
                ("C2", "Technology", None),
                ("C3", "Retail", None),
            ],
        );
        let matrix = category_matrix(&data, MatrixLevel::Category, &RecordFilter::default());
        let labels: Vec<&str> = matrix.rows.iter().map(|r| r.label.as_str()).collect();

        // Retail is declared before Technology; unconfigured labels come last
        assert_eq!(labels, vec!["Retail", "Technology", "Zoo Supplies"]);
    }

    #[test]
    fn test_sub_category_matrix_and_distinct_customers() {
        let data = enriched(
            &[
                "C1,P1,Books,2024-01-01,10",
                "C1,P2,Books,2024-01-02,15",
                "C2,P1,Books,2024-01-03,20",
                "C3,P1,Books,2024-01-03,5",
            ],
            &[
                ("C1", "Retail", Some("Bookstore")),
                ("C2", "Retail", Some("Bookstore")),
                ("C3", "Retail", None),
            ],
        );
        let matrix = category_matrix(&data, MatrixLevel::SubCategory, &RecordFilter::default());

        let bookstore = matrix.sub_cell("Retail", "Bookstore", "Books").unwrap();
        assert_eq!(bookstore.transaction_count, 3);
        assert_eq!(bookstore.distinct_customer_count, 2);
        assert_eq!(bookstore.total_revenue, Decimal::from(45));

        let unspecified = matrix.sub_cell("Retail", "Unspecified", "Books").unwrap();
        assert_eq!(unspecified.total_revenue, Decimal::from(5));
        assert_eq!(matrix.total_revenue(), Decimal::from(50));
    }

    #[test]
    fn test_filtered_matrix_conserves_revenue() {
        let data = example();
        let filter = RecordFilter {
            product_category: Some("Electronics".to_string()),
            ..RecordFilter::default()
        };
        let matrix = category_matrix(&data, MatrixLevel::Category, &filter);
        let expected: Decimal = data
            .scoped(&filter)
            .map(|r| r.transaction.sales_amount)
            .sum();

        assert_eq!(matrix.total_revenue(), expected);
        assert_eq!(expected, Decimal::from(300));
    }

    #[test]
    fn test_top_combinations_example() {
        let matrix = category_matrix(&example(), MatrixLevel::Category, &RecordFilter::default());
        let top = top_combinations(&matrix, Metric::TotalRevenue, 1).unwrap();

        assert_eq!(top.len(), 1);
        assert_eq!(top[0].business_category, "Technology");
        assert_eq!(top[0].product_category, "Electronics");
        assert_eq!(top[0].value, Decimal::from(200));
    }

    #[test]
    fn test_top_combinations_ties_are_lexicographic() {
        let matrix = category_matrix(&example(), MatrixLevel::Category, &RecordFilter::default());
        let top = top_combinations(&matrix, Metric::TransactionCount, 10).unwrap();

        let order: Vec<(&str, &str)> = top
            .iter()
            .map(|c| (c.business_category.as_str(), c.product_category.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Retail", "Electronics"),
                ("Retail", "Software"),
                ("Technology", "Electronics"),
            ]
        );
    }

    #[test]
    fn test_top_combinations_rejects_zero_limit() {
        let matrix = category_matrix(&example(), MatrixLevel::Category, &RecordFilter::default());
        assert!(matches!(
            top_combinations(&matrix, Metric::TotalRevenue, 0),
            Err(SalesAnalyticsError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("revenue".parse::<Metric>().unwrap(), Metric::TotalRevenue);
        assert_eq!("Count".parse::<Metric>().unwrap(), Metric::TransactionCount);
        assert_eq!("avg_value".parse::<Metric>().unwrap(), Metric::AverageValue);
        assert!("margin".parse::<Metric>().is_err());
    }

    #[test]
    fn test_growth_opportunities_rank_narrow_buyers_first() {
        let data = enriched(
            &[
                "N1,P1,A,2024-01-01,10",
                "W1,P1,A,2024-01-01,10",
                "W1,P2,B,2024-01-01,10",
                "W1,P3,C,2024-01-01,10",
                "W1,P4,D,2024-01-01,10",
                "W1,P5,E,2024-01-01,10",
            ],
            &[("N1", "Narrow", None), ("W1", "Wide", None)],
        );
        let ranked = growth_opportunities(
            &data,
            &RecordFilter::default(),
            &OpportunityDenominator::DatasetProductCategories,
        )
        .unwrap();

        assert_eq!(ranked[0].business_category, "Narrow");
        assert_eq!(ranked[0].product_categories_bought, 1);
        assert!((ranked[0].opportunity_score - 0.8).abs() < 1e-9);
        assert_eq!(ranked[0].missing_product_categories, vec!["B", "C", "D", "E"]);

        assert_eq!(ranked[1].business_category, "Wide");
        assert_eq!(ranked[1].opportunity_score, 0.0);
        assert!(ranked[0].opportunity_score > ranked[1].opportunity_score);
    }

    #[test]
    fn test_growth_opportunities_fixed_denominator() {
        let data = example();
        let ranked = growth_opportunities(
            &data,
            &RecordFilter::default(),
            &OpportunityDenominator::Fixed(4),
        )
        .unwrap();

        assert_eq!(ranked[0].business_category, "Technology");
        assert!((ranked[0].opportunity_score - 0.75).abs() < 1e-9);
        assert!((ranked[1].opportunity_score - 0.5).abs() < 1e-9);

        assert!(growth_opportunities(
            &data,
            &RecordFilter::default(),
            &OpportunityDenominator::Fixed(0)
        )
        .is_err());
    }

    #[test]
    fn test_empty_scope_is_not_an_error() {
        let filter = RecordFilter {
            business_category: Some("Nobody".to_string()),
            ..RecordFilter::default()
        };
        let data = example();

        assert!(category_matrix(&data, MatrixLevel::Category, &filter).is_empty());
        assert!(growth_opportunities(&data, &filter, &OpportunityDenominator::default())
            .unwrap()
            .is_empty());
        let stats = summary_statistics(&data, &filter);
        assert_eq!(stats.transaction_count, 0);
        assert_eq!(stats.first_transaction, None);
    }

    #[test]
    fn test_summary_statistics() {
        let stats = summary_statistics(&example(), &RecordFilter::default());

        assert_eq!(stats.total_revenue, Decimal::from(350));
        assert_eq!(stats.transaction_count, 3);
        assert_eq!(stats.customer_count, 2);
        assert_eq!(stats.business_category_count, 2);
        assert_eq!(stats.product_category_count, 2);
        assert_eq!(stats.first_transaction, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(stats.last_transaction, NaiveDate::from_ymd_opt(2024, 1, 3));
    }
}
