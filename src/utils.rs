use chrono::{Datelike, Days, NaiveDate};
use std::collections::BTreeSet;

pub fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = date.weekday().num_days_from_monday() as u64;
    date.checked_sub_days(Days::new(offset)).unwrap_or(date)
}

pub fn quarter_start(date: NaiveDate) -> NaiveDate {
    let month = ((date.month() - 1) / 3) * 3 + 1;
    NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
}

pub fn year_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
}

/// Returns the trimmed cell, or `None` when it is blank or a `nan` artifact.
pub fn clean_cell(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed)
    }
}

/// Lowercases a header or alias and folds spaces and dashes to underscores.
pub fn normalize_header(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Orders labels by their position in `configured`, then lexicographically for
/// labels that are not configured.
pub fn order_labels<I>(present: I, configured: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut remaining: BTreeSet<String> = present.into_iter().collect();
    let mut ordered = Vec::with_capacity(remaining.len());

    for label in configured {
        if remaining.remove(label) {
            ordered.push(label.clone());
        }
    }

    ordered.extend(remaining);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    #[test]
    fn test_week_start() {
        // 2024-01-03 is a Wednesday
        let date = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        assert_eq!(week_start(date), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());

        // Sunday belongs to the week that started the previous Monday
        let sunday = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
        assert_eq!(week_start(sunday), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(week_start(sunday).weekday(), Weekday::Mon);
    }

    #[test]
    fn test_quarter_and_year_start() {
        let date = NaiveDate::from_ymd_opt(2023, 8, 17).unwrap();
        assert_eq!(quarter_start(date), NaiveDate::from_ymd_opt(2023, 7, 1).unwrap());
        assert_eq!(year_start(date), NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert_eq!(
            first_day_of_month(date),
            NaiveDate::from_ymd_opt(2023, 8, 1).unwrap()
        );
    }

    #[test]
    fn test_clean_cell() {
        assert_eq!(clean_cell("  C1 "), Some("C1"));
        assert_eq!(clean_cell("   "), None);
        assert_eq!(clean_cell("NaN"), None);
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header(" Customer ID "), "customer_id");
        assert_eq!(normalize_header("Sale-Date"), "sale_date");
    }

    #[test]
    fn test_order_labels() {
        let configured = vec!["Technology".to_string(), "Retail".to_string()];
        let present = vec![
            "Retail".to_string(),
            "Other".to_string(),
            "Finance".to_string(),
            "Technology".to_string(),
        ];

        assert_eq!(
            order_labels(present, &configured),
            vec!["Technology", "Retail", "Finance", "Other"]
        );
    }
}
