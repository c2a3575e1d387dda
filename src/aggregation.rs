//! Pure transformations over the aggregator's transaction feed.
//!
//! Provides functions to sort transactions by date, group spending by
//! category, and bucket spending by day for chart display. These functions
//! perform no I/O and hold no state between calls.

use std::collections::HashMap;

use time::{Date, Duration};

use crate::aggregator::TransactionRecord;

/// Label used for transactions without a category hierarchy.
pub const UNCATEGORIZED_LABEL: &str = "Uncategorized";

/// Sorts transactions from newest to oldest.
///
/// Merge sort is used so that transactions sharing a date keep their
/// relative order from the input feed.
pub fn sort_by_date_descending(transactions: Vec<TransactionRecord>) -> Vec<TransactionRecord> {
    if transactions.len() <= 1 {
        return transactions;
    }

    let mut left = transactions;
    let right = left.split_off(left.len() / 2);

    merge_by_date(
        sort_by_date_descending(left),
        sort_by_date_descending(right),
    )
}

/// Merges two date-descending runs into one, taking from the left run on
/// equal dates.
fn merge_by_date(
    left: Vec<TransactionRecord>,
    right: Vec<TransactionRecord>,
) -> Vec<TransactionRecord> {
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left_iter = left.into_iter();
    let mut right_iter = right.into_iter();
    let mut next_left = left_iter.next();
    let mut next_right = right_iter.next();

    loop {
        match (next_left.take(), next_right.take()) {
            (Some(left_record), Some(right_record)) => {
                if left_record.date >= right_record.date {
                    merged.push(left_record);
                    next_left = left_iter.next();
                    next_right = Some(right_record);
                } else {
                    merged.push(right_record);
                    next_left = Some(left_record);
                    next_right = right_iter.next();
                }
            }
            (Some(left_record), None) => {
                merged.push(left_record);
                merged.extend(left_iter);
                return merged;
            }
            (None, Some(right_record)) => {
                merged.push(right_record);
                merged.extend(right_iter);
                return merged;
            }
            (None, None) => return merged,
        }
    }
}

/// Sums the absolute amount of each transaction under its most general
/// category label, or [UNCATEGORIZED_LABEL] if it has none.
///
/// # Returns
/// (label, total) pairs ordered by each label's first occurrence in the
/// input, which keeps chart colors stable across refreshes of the same feed.
pub fn category_totals(transactions: &[TransactionRecord]) -> Vec<(String, f64)> {
    let mut totals: Vec<(String, f64)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for transaction in transactions {
        let label = transaction
            .category
            .as_deref()
            .and_then(<[String]>::first)
            .map_or(UNCATEGORIZED_LABEL, String::as_str);

        match positions.get(label) {
            Some(&position) => totals[position].1 += transaction.amount.abs(),
            None => {
                positions.insert(label.to_owned(), totals.len());
                totals.push((label.to_owned(), transaction.amount.abs()));
            }
        }
    }

    totals
}

/// Sums spending per day over a trailing window of calendar dates.
///
/// The window covers every date from
/// `window_end_date - (window_size_days - 1)` through `window_end_date`
/// inclusive, zero-filled so days without spending still appear. Only
/// strictly positive amounts count as spending; credits and income are
/// excluded.
///
/// # Returns
/// Exactly `window_size_days` (date, total) pairs in ascending date order.
pub fn daily_totals(
    transactions: &[TransactionRecord],
    window_end_date: Date,
    window_size_days: usize,
) -> Vec<(Date, f64)> {
    let window_start_date = window_end_date - Duration::days(window_size_days as i64 - 1);

    let mut totals: Vec<(Date, f64)> = (0..window_size_days)
        .map(|offset| (window_start_date + Duration::days(offset as i64), 0.0))
        .collect();

    for transaction in transactions {
        if transaction.amount <= 0.0 {
            continue;
        }

        if transaction.date < window_start_date || transaction.date > window_end_date {
            continue;
        }

        let offset = (transaction.date - window_start_date).whole_days() as usize;
        totals[offset].1 += transaction.amount;
    }

    totals
}
