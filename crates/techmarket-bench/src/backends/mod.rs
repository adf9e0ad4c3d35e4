//! Database backends under comparison.
//!
//! Every store implements the same pair of repository traits so the runner
//! can drive PostgreSQL, MongoDB and Cassandra through `Box<dyn Backend>`.
//! Adapters are synchronous and block on a shared tokio runtime.

pub mod cassandra;
pub mod mongodb;
pub mod postgres;

pub use self::cassandra::CassandraBackend;
pub use self::mongodb::MongoBackend;
pub use self::postgres::PostgresBackend;

use chrono::{DateTime, Datelike, Months, Utc};

use crate::error::Result;
use crate::harness::BackendKind;
use crate::model::{Client, Order, Payment, Product};

/// Batch writes of the benchmark entities.
///
/// Each method chunks internally; the first failing chunk aborts the call.
pub trait InsertRepository {
    fn insert_clients(&self, clients: &[Client]) -> Result<()>;

    fn insert_products(&self, products: &[Product]) -> Result<()>;

    /// Write orders together with their items.
    fn insert_orders(&self, orders: &[Order]) -> Result<()>;

    fn insert_payments(&self, payments: &[Payment]) -> Result<()>;
}

/// Read queries of the benchmark.
///
/// Missing data is `None`, an empty vector or `0.0`, never an error.
pub trait QueryRepository {
    fn client_by_email(&self, email: &str) -> Result<Option<Client>>;

    /// Products of a category, cheapest first.
    fn products_by_category(&self, category: &str) -> Result<Vec<Product>>;

    /// Distinct products appearing in the client's delivered orders.
    fn delivered_products_by_client(&self, client_id: i64) -> Result<Vec<Product>>;

    /// Products ordered by total quantity sold, highest first.
    fn top_selling_products(&self, limit: usize) -> Result<Vec<Product>>;

    fn pix_payments_since(&self, since: DateTime<Utc>) -> Result<Vec<Payment>>;

    /// Sum of the client's order totals with `ordered_at` in `[start, end]`.
    fn client_total_spent(
        &self,
        client_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64>;
}

/// A store taking part in the benchmark.
pub trait Backend: InsertRepository + QueryRepository {
    fn kind(&self) -> BackendKind;

    /// Drop and recreate everything the adapter writes to.
    fn setup_schema(&self) -> Result<()>;
}

/// `YYYY-MM` partition key of a timestamp.
pub fn month_key(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}

/// The instant one calendar month before `at`.
///
/// Day-of-month overflow is clamped, so March 31 maps to the last day of
/// February.
pub fn one_month_before(at: DateTime<Utc>) -> DateTime<Utc> {
    at.checked_sub_months(Months::new(1)).unwrap_or(at)
}

/// Month keys from `since` up to and including `until`, oldest first.
pub fn month_keys_between(since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<String> {
    let mut keys = Vec::new();
    let (mut year, mut month) = (since.year(), since.month());
    let end = (until.year(), until.month());
    while (year, month) <= end {
        keys.push(format!("{:04}-{:02}", year, month));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    keys
}

/// Round a summed amount to whole cents.
pub(crate) fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_month_key() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(month_key(at), "2024-03");
    }

    #[test]
    fn test_one_month_before_clamps_day() {
        let at = Utc.with_ymd_and_hms(2024, 3, 31, 8, 30, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 2, 29, 8, 30, 0).unwrap();
        assert_eq!(one_month_before(at), expected);
    }

    #[test]
    fn test_one_month_before_crosses_year() {
        let at = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
        assert_eq!(month_key(one_month_before(at)), "2024-12");
    }

    #[test]
    fn test_month_keys_between() {
        let since = Utc.with_ymd_and_hms(2024, 11, 20, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(
            month_keys_between(since, until),
            vec!["2024-11", "2024-12", "2025-01"]
        );
    }

    #[test]
    fn test_month_keys_between_same_month() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(month_keys_between(at, at), vec!["2024-06"]);
        assert!(month_keys_between(at, one_month_before(at)).is_empty());
    }

    #[test]
    fn test_round_cents() {
        assert_eq!(round_cents(10.004), 10.0);
        assert_eq!(round_cents(0.1 + 0.2), 0.3);
    }
}
