use crate::error::{Result, SalesAnalyticsError};
use crate::ingestion::RawTable;
use crate::schema::{ColumnAliases, EngineConfig, Transaction};
use crate::utils::{clean_cell, normalize_header};
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    CustomerId,
    CustomerName,
    ProductId,
    ProductCategory,
    TransactionDate,
    SalesAmount,
    Location,
    City,
    State,
}

impl CanonicalField {
    pub const REQUIRED: [CanonicalField; 5] = [
        Self::CustomerId,
        Self::ProductId,
        Self::ProductCategory,
        Self::TransactionDate,
        Self::SalesAmount,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CustomerId => "customer_id",
            Self::CustomerName => "customer_name",
            Self::ProductId => "product_id",
            Self::ProductCategory => "product_category",
            Self::TransactionDate => "transaction_date",
            Self::SalesAmount => "sales_amount",
            Self::Location => "location",
            Self::City => "city",
            Self::State => "state",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingCustomerId,
    MissingProductId,
    MissingProductCategory,
    UnparsableDate,
    UnparsableAmount,
    NegativeAmount,
    /// Kept amounts would no longer sum within the decimal range
    AmountOutOfRange,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub rows_in: usize,
    pub rows_kept: usize,
    pub dropped_by_reason: BTreeMap<DropReason, usize>,
    /// Canonical field name -> source header it was resolved to.
    pub resolved_columns: BTreeMap<String, String>,
}

impl NormalizationReport {
    pub fn rows_dropped(&self) -> usize {
        self.dropped_by_reason.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedDataset {
    pub transactions: Vec<Transaction>,
    pub report: NormalizationReport,
    pub available_fields: BTreeSet<CanonicalField>,
}

impl NormalizedDataset {
    pub fn has_field(&self, field: CanonicalField) -> bool {
        self.available_fields.contains(&field)
    }

    /// Renders the dataset back into a table with canonical headers, ISO dates
    /// and plain decimal amounts.
    pub fn to_raw_table(&self) -> RawTable {
        let with_name = self.has_field(CanonicalField::CustomerName);
        let with_location = self.has_field(CanonicalField::Location);
        let with_state = self.has_field(CanonicalField::State);

        let mut headers = vec![CanonicalField::CustomerId.as_str().to_string()];
        if with_name {
            headers.push(CanonicalField::CustomerName.as_str().to_string());
        }
        for field in &CanonicalField::REQUIRED[1..] {
            headers.push(field.as_str().to_string());
        }
        if with_location {
            headers.push(CanonicalField::Location.as_str().to_string());
        }
        if with_state {
            headers.push(CanonicalField::State.as_str().to_string());
        }

        let rows = self
            .transactions
            .iter()
            .map(|t| {
                let mut row = vec![t.customer_id.clone()];
                if with_name {
                    row.push(t.customer_name.clone().unwrap_or_default());
                }
                row.push(t.product_id.clone());
                row.push(t.product_category.clone());
                row.push(t.transaction_date.format("%Y-%m-%d").to_string());
                row.push(t.sales_amount.to_string());
                if with_location {
                    row.push(t.location.clone().unwrap_or_default());
                }
                if with_state {
                    row.push(t.state.clone().unwrap_or_default());
                }
                row
            })
            .collect();

        RawTable::new(headers, rows)
    }
}

/// A field to resolve against a header row.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec<'a> {
    pub name: &'a str,
    pub aliases: &'a [String],
    pub required: bool,
}

impl<'a> FieldSpec<'a> {
    pub fn required(name: &'a str, aliases: &'a [String]) -> Self {
        Self {
            name,
            aliases,
            required: true,
        }
    }

    pub fn optional(name: &'a str, aliases: &'a [String]) -> Self {
        Self {
            name,
            aliases,
            required: false,
        }
    }
}

/// Resolves each field to a header index in two passes: exact (normalized)
/// equality for every field first, then substring matches for fields still
/// unresolved. The field name itself always counts as an exact alias, and a
/// header is claimed by at most one field.
///
/// Fails with `SchemaError` listing every unresolved required field.
pub fn resolve_columns(headers: &[String], specs: &[FieldSpec<'_>]) -> Result<Vec<Option<usize>>> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
    let alias_lists: Vec<Vec<String>> = specs
        .iter()
        .map(|spec| {
            let mut aliases = vec![normalize_header(spec.name)];
            for alias in spec.aliases {
                let alias = normalize_header(alias);
                if !alias.is_empty() && !aliases.contains(&alias) {
                    aliases.push(alias);
                }
            }
            aliases
        })
        .collect();

    let mut claimed = vec![false; headers.len()];
    let mut resolved: Vec<Option<usize>> = vec![None; specs.len()];

    let passes: [fn(&str, &str) -> bool; 2] = [
        |header, alias| header == alias,
        |header, alias| header.contains(alias),
    ];

    for matches in passes {
        for (spec_idx, aliases) in alias_lists.iter().enumerate() {
            if resolved[spec_idx].is_some() {
                continue;
            }
            'aliases: for alias in aliases {
                for (header_idx, header) in normalized.iter().enumerate() {
                    if !claimed[header_idx] && matches(header, alias) {
                        claimed[header_idx] = true;
                        resolved[spec_idx] = Some(header_idx);
                        break 'aliases;
                    }
                }
            }
        }
    }

    let missing: Vec<String> = specs
        .iter()
        .zip(&resolved)
        .filter(|(spec, idx)| spec.required && idx.is_none())
        .map(|(spec, _)| spec.name.to_string())
        .collect();

    if !missing.is_empty() {
        return Err(SalesAnalyticsError::SchemaError {
            missing,
            found: headers.to_vec(),
        });
    }

    Ok(resolved)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnMap {
    customer_id: usize,
    customer_name: Option<usize>,
    product_id: usize,
    product_category: usize,
    transaction_date: usize,
    sales_amount: usize,
    location: Option<usize>,
    city: Option<usize>,
    state: Option<usize>,
}

impl ColumnMap {
    fn resolve(headers: &[String], aliases: &ColumnAliases) -> Result<Self> {
        let specs = [
            FieldSpec::required("customer_id", &aliases.customer_id),
            FieldSpec::required("product_id", &aliases.product_id),
            FieldSpec::required("product_category", &aliases.product_category),
            FieldSpec::required("transaction_date", &aliases.transaction_date),
            FieldSpec::required("sales_amount", &aliases.sales_amount),
            FieldSpec::optional("customer_name", &aliases.customer_name),
            FieldSpec::optional("location", &aliases.location),
            FieldSpec::optional("city", &aliases.city),
            FieldSpec::optional("state", &aliases.state),
        ];
        let resolved = resolve_columns(headers, &specs)?;

        let required = |idx: usize| {
            resolved[idx].ok_or_else(|| SalesAnalyticsError::SchemaError {
                missing: vec![specs[idx].name.to_string()],
                found: headers.to_vec(),
            })
        };

        Ok(Self {
            customer_id: required(0)?,
            product_id: required(1)?,
            product_category: required(2)?,
            transaction_date: required(3)?,
            sales_amount: required(4)?,
            customer_name: resolved[5],
            location: resolved[6],
            city: resolved[7],
            state: resolved[8],
        })
    }

    fn has_location(&self) -> bool {
        self.location.is_some() || (self.city.is_some() && self.state.is_some())
    }

    fn resolved_columns(&self, headers: &[String]) -> BTreeMap<String, String> {
        let entries = [
            (CanonicalField::CustomerId, Some(self.customer_id)),
            (CanonicalField::CustomerName, self.customer_name),
            (CanonicalField::ProductId, Some(self.product_id)),
            (CanonicalField::ProductCategory, Some(self.product_category)),
            (CanonicalField::TransactionDate, Some(self.transaction_date)),
            (CanonicalField::SalesAmount, Some(self.sales_amount)),
            (CanonicalField::Location, self.location),
            (CanonicalField::City, self.city),
            (CanonicalField::State, self.state),
        ];

        entries
            .into_iter()
            .filter_map(|(field, idx)| {
                idx.map(|i| (field.as_str().to_string(), headers[i].clone()))
            })
            .collect()
    }

    fn available_fields(&self) -> BTreeSet<CanonicalField> {
        let mut fields: BTreeSet<CanonicalField> = CanonicalField::REQUIRED.into_iter().collect();
        if self.customer_name.is_some() {
            fields.insert(CanonicalField::CustomerName);
        }
        if self.has_location() {
            fields.insert(CanonicalField::Location);
        }
        if self.state.is_some() {
            fields.insert(CanonicalField::State);
        }
        fields
    }
}

/// Parses `value` with the first format that succeeds. Formats carrying a time
/// component are parsed as date-times and truncated to the date.
pub fn parse_date(value: &str, formats: &[String]) -> Option<NaiveDate> {
    let value = value.trim();
    formats.iter().find_map(|format| {
        if has_time_component(format) {
            NaiveDateTime::parse_from_str(value, format)
                .ok()
                .map(|dt| dt.date())
        } else {
            NaiveDate::parse_from_str(value, format).ok()
        }
    })
}

fn has_time_component(format: &str) -> bool {
    ["%H", "%I", "%M", "%S", "%T", "%R", "%p"]
        .iter()
        .any(|spec| format.contains(spec))
}

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹', '₩', '₽', '₺', '₫', '¢'];
const GROUP_SEPARATORS: &[char] = &[',', '_', '\'', ' ', '\u{a0}', '\u{202f}'];

fn is_currency_code(token: &str) -> bool {
    token.len() == 3 && token.chars().all(|c| c.is_ascii_uppercase())
}

/// Removes one ISO-style currency code ("USD 10", "10 EUR") separated from
/// the number by whitespace.
fn strip_currency_code(text: &str) -> &str {
    if let Some((head, rest)) = text.split_once(char::is_whitespace) {
        if is_currency_code(head) {
            return rest.trim();
        }
    }
    if let Some((rest, tail)) = text.rsplit_once(char::is_whitespace) {
        if is_currency_code(tail) {
            return rest.trim();
        }
    }
    text
}

/// Parses a sales amount, stripping currency markers and digit-group
/// separators. A parenthesised amount is negative. Zero is accepted.
pub fn parse_amount(value: &str) -> std::result::Result<Decimal, DropReason> {
    let mut text = value.trim();

    let parenthesised = text.starts_with('(') && text.ends_with(')');
    if parenthesised {
        text = &text[1..text.len() - 1];
    }

    let text = strip_currency_code(text.trim());
    let cleaned: String = text
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && !GROUP_SEPARATORS.contains(c))
        .collect();

    if cleaned.is_empty() {
        return Err(DropReason::UnparsableAmount);
    }

    let amount = Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .map_err(|_| DropReason::UnparsableAmount)?;

    let amount = if parenthesised { -amount } else { amount };

    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(DropReason::NegativeAmount);
    }

    Ok(amount)
}

pub struct Normalizer<'a> {
    aliases: &'a ColumnAliases,
    date_formats: &'a [String],
}

impl<'a> Normalizer<'a> {
    pub fn new(aliases: &'a ColumnAliases, date_formats: &'a [String]) -> Self {
        Self {
            aliases,
            date_formats,
        }
    }

    pub fn from_config(config: &'a EngineConfig) -> Self {
        Self::new(&config.column_aliases, &config.date_formats)
    }

    pub fn normalize(&self, raw: &RawTable) -> Result<NormalizedDataset> {
        let columns = ColumnMap::resolve(&raw.headers, self.aliases)?;

        let mut report = NormalizationReport {
            rows_in: raw.rows.len(),
            resolved_columns: columns.resolved_columns(&raw.headers),
            ..NormalizationReport::default()
        };

        // Aggregates sum subsets of the kept amounts; their total must stay in range.
        let mut kept_total = Decimal::ZERO;
        let mut transactions = Vec::with_capacity(raw.rows.len());
        for row in &raw.rows {
            let outcome = self.normalize_row(row, &columns).and_then(|transaction| {
                kept_total = kept_total
                    .checked_add(transaction.sales_amount)
                    .ok_or(DropReason::AmountOutOfRange)?;
                Ok(transaction)
            });
            match outcome {
                Ok(transaction) => transactions.push(transaction),
                Err(reason) => *report.dropped_by_reason.entry(reason).or_insert(0) += 1,
            }
        }
        report.rows_kept = transactions.len();

        info!(
            "Normalized {} of {} rows ({} dropped)",
            report.rows_kept,
            report.rows_in,
            report.rows_dropped()
        );
        for (reason, count) in &report.dropped_by_reason {
            debug!("Dropped {} rows: {:?}", count, reason);
        }

        Ok(NormalizedDataset {
            transactions,
            report,
            available_fields: columns.available_fields(),
        })
    }

    fn normalize_row(
        &self,
        row: &[String],
        columns: &ColumnMap,
    ) -> std::result::Result<Transaction, DropReason> {
        let cell = |idx: usize| row.get(idx).and_then(|c| clean_cell(c));
        let optional = |idx: Option<usize>| idx.and_then(cell).map(str::to_string);

        let customer_id = cell(columns.customer_id).ok_or(DropReason::MissingCustomerId)?;
        let product_id = cell(columns.product_id).ok_or(DropReason::MissingProductId)?;
        let product_category =
            cell(columns.product_category).ok_or(DropReason::MissingProductCategory)?;

        let transaction_date = cell(columns.transaction_date)
            .and_then(|value| parse_date(value, self.date_formats))
            .ok_or(DropReason::UnparsableDate)?;

        let sales_amount = parse_amount(
            cell(columns.sales_amount).ok_or(DropReason::UnparsableAmount)?,
        )?;

        let state = optional(columns.state);
        let location = match columns.location {
            Some(idx) => cell(idx).map(str::to_string),
            None => match (optional(columns.city), &state) {
                (Some(city), Some(state)) => Some(format!("{}, {}", city, state)),
                _ => None,
            },
        };

        Ok(Transaction {
            customer_id: customer_id.to_string(),
            customer_name: optional(columns.customer_name),
            product_id: product_id.to_string(),
            product_category: product_category.to_string(),
            transaction_date,
            sales_amount,
            location,
            state,
        })
    }
}

pub fn normalize(raw: &RawTable, config: &EngineConfig) -> Result<NormalizedDataset> {
    Normalizer::from_config(config).normalize(raw)
}
