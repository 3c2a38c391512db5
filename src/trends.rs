use crate::error::{Result, SalesAnalyticsError};
use crate::utils::{first_day_of_month, order_labels, quarter_start, week_start, year_start};
use crate::{EnrichedDataset, RecordFilter};
use chrono::NaiveDate;
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    /// ISO weeks, starting on Monday
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Day => date,
            Granularity::Week => week_start(date),
            Granularity::Month => first_day_of_month(date),
            Granularity::Quarter => quarter_start(date),
            Granularity::Year => year_start(date),
        }
    }
}

impl FromStr for Granularity {
    type Err = SalesAnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "d" | "day" | "daily" => Ok(Granularity::Day),
            "w" | "week" | "weekly" => Ok(Granularity::Week),
            "m" | "month" | "monthly" => Ok(Granularity::Month),
            "q" | "quarter" | "quarterly" => Ok(Granularity::Quarter),
            "y" | "year" | "yearly" | "annual" => Ok(Granularity::Year),
            other => Err(SalesAnalyticsError::invalid_parameter(
                "granularity",
                format!("unknown bucket granularity '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendGrouping {
    pub by_business_category: bool,
    pub by_product_category: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub bucket_start: NaiveDate,
    pub business_category: Option<String>,
    pub product_category: Option<String>,
    pub total_revenue: Decimal,
    pub transaction_count: usize,
}

/// Revenue per calendar bucket, chronological. Buckets with no transactions
/// are not emitted.
pub fn trend_series(
    enriched: &EnrichedDataset,
    granularity: Granularity,
    grouping: TrendGrouping,
    filter: &RecordFilter,
) -> Result<Vec<TrendPoint>> {
    filter.validate()?;

    let mut buckets: BTreeMap<NaiveDate, BTreeMap<(Option<&str>, Option<&str>), (Decimal, usize)>> =
        BTreeMap::new();
    let mut business_labels = BTreeSet::new();
    let mut product_labels = BTreeSet::new();

    for record in enriched.scoped(filter) {
        let t = &record.transaction;
        let business = grouping
            .by_business_category
            .then(|| record.business_category());
        let product = grouping
            .by_product_category
            .then_some(t.product_category.as_str());
        business_labels.extend(business);
        product_labels.extend(product);

        let entry = buckets
            .entry(granularity.bucket_start(t.transaction_date))
            .or_default()
            .entry((business, product))
            .or_default();
        entry.0 += t.sales_amount;
        entry.1 += 1;
    }

    let rank = |labels: BTreeSet<&str>, configured: &[String]| -> BTreeMap<String, usize> {
        order_labels(labels.into_iter().map(str::to_string), configured)
            .into_iter()
            .enumerate()
            .map(|(i, label)| (label, i))
            .collect()
    };
    let business_rank = rank(business_labels, &enriched.business_order);
    let product_rank = rank(product_labels, &enriched.product_order);
    let position = |ranks: &BTreeMap<String, usize>, label: Option<&str>| {
        label.and_then(|l| ranks.get(l).copied())
    };

    let mut series = Vec::new();
    for (bucket_start, groups) in buckets {
        let mut points: Vec<_> = groups.into_iter().collect();
        points.sort_by_key(|((business, product), _)| {
            (
                position(&business_rank, *business),
                position(&product_rank, *product),
            )
        });

        series.extend(
            points
                .into_iter()
                .map(|((business, product), (revenue, count))| TrendPoint {
                    bucket_start,
                    business_category: business.map(str::to_string),
                    product_category: product.map(str::to_string),
                    total_revenue: revenue,
                    transaction_count: count,
                }),
        );
    }

    debug!("Trend series with {:?} buckets: {} points", granularity, series.len());
    Ok(series)
}
