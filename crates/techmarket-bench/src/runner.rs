//! The fixed benchmark matrix.
//!
//! Every backend first loads the whole dataset, one measured insert per
//! entity kind. Then each query is measured against every backend in turn,
//! so rows for the same query sit next to each other in the report.

use std::io::Write;

use chrono::{DateTime, Utc};

use crate::backends::{one_month_before, Backend};
use crate::fixtures::Dataset;
use crate::harness::{BenchHarness, OperationKind};

/// Result limit of the best-seller query.
pub const TOP_SELLERS_LIMIT: usize = 5;

/// Parameters of the query phase, taken from the loaded dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryProbes {
    /// Email of the first generated client.
    pub email: String,
    /// Category of the first generated product.
    pub category: String,
    pub client_id: i64,
    pub limit: usize,
    /// Start of the "last month" window.
    pub since: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

impl QueryProbes {
    pub fn from_dataset(dataset: &Dataset, now: DateTime<Utc>) -> Self {
        Self {
            email: dataset
                .clients
                .first()
                .map(|client| client.email.clone())
                .unwrap_or_default(),
            category: dataset
                .products
                .first()
                .map(|product| product.category.clone())
                .unwrap_or_default(),
            client_id: dataset.clients.first().map(|client| client.id).unwrap_or(1),
            limit: TOP_SELLERS_LIMIT,
            since: one_month_before(now),
            now,
        }
    }
}

/// Load `dataset` into every backend, then run the query phase.
pub fn run<W: Write>(
    harness: &mut BenchHarness<W>,
    backends: &[Box<dyn Backend>],
    dataset: &Dataset,
    now: DateTime<Utc>,
) {
    for backend in backends {
        run_inserts(harness, backend.as_ref(), dataset);
    }
    run_queries(harness, backends, dataset, &QueryProbes::from_dataset(dataset, now));
}

/// One measured insert per entity kind, parents before children.
pub fn run_inserts<W: Write>(
    harness: &mut BenchHarness<W>,
    backend: &dyn Backend,
    dataset: &Dataset,
) {
    let kind = backend.kind();
    tracing::info!(backend = %kind, "loading dataset");

    harness.measure(kind, OperationKind::Insert, "Client", dataset.clients.len(), || {
        backend.insert_clients(&dataset.clients)
    });
    harness.measure(kind, OperationKind::Insert, "Product", dataset.products.len(), || {
        backend.insert_products(&dataset.products)
    });
    harness.measure(kind, OperationKind::Insert, "Order", dataset.orders.len(), || {
        backend.insert_orders(&dataset.orders)
    });
    harness.measure(kind, OperationKind::Insert, "Payment", dataset.payments.len(), || {
        backend.insert_payments(&dataset.payments)
    });
}

/// Each query against every backend, query by query.
pub fn run_queries<W: Write>(
    harness: &mut BenchHarness<W>,
    backends: &[Box<dyn Backend>],
    dataset: &Dataset,
    probes: &QueryProbes,
) {
    let query = OperationKind::Query;

    for backend in backends {
        harness.measure(backend.kind(), query, "Client by email", dataset.clients.len(), || {
            backend.client_by_email(&probes.email)
        });
    }
    for backend in backends {
        harness.measure(
            backend.kind(),
            query,
            "Products by category",
            dataset.products.len(),
            || backend.products_by_category(&probes.category),
        );
    }
    for backend in backends {
        harness.measure(
            backend.kind(),
            query,
            "Delivered products by client",
            dataset.orders.len(),
            || backend.delivered_products_by_client(probes.client_id),
        );
    }
    for backend in backends {
        harness.measure(
            backend.kind(),
            query,
            "Top 5 best-selling products",
            dataset.orders.len(),
            || backend.top_selling_products(probes.limit),
        );
    }
    for backend in backends {
        harness.measure(
            backend.kind(),
            query,
            "Pix payments in the last month",
            dataset.payments.len(),
            || backend.pix_payments_since(probes.since),
        );
    }
    for backend in backends {
        harness.measure(
            backend.kind(),
            query,
            "Client total spent in the last month",
            dataset.orders.len(),
            || backend.client_total_spent(probes.client_id, probes.since, probes.now),
        );
    }
}
