//! Cassandra backend.
//!
//! Tables are laid out per query: clients keyed by email, products
//! partitioned by category (clustered by price) plus a lookup by id, orders
//! partitioned by client and clustered newest first, payments partitioned by
//! type and month. Nothing uses `ALLOW FILTERING`; item-level aggregates are
//! computed client-side.

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use scylla::batch::{Batch, BatchType};
use scylla::prepared_statement::PreparedStatement;
use scylla::retry_policy::{QueryInfo, RetryDecision, RetryPolicy, RetrySession};
use scylla::serialize::row::SerializeRow;
use scylla::transport::errors::{DbError, QueryError};
use scylla::transport::iterator::NextRowError;
use scylla::transport::session::PoolSize;
use scylla::{ExecutionProfile, Session, SessionBuilder};
use tokio::runtime::Runtime;

use crate::config::CassandraConfig;
use crate::error::{Error, Result};
use crate::harness::BackendKind;
use crate::model::{Client, Order, OrderStatus, Payment, PaymentType, Product};

use super::{
    month_key, month_keys_between, round_cents, Backend, InsertRepository, QueryRepository,
};

/// Statements per unlogged batch.
pub const CASSANDRA_BATCH_SIZE: usize = 100;

/// Statements per unlogged batch of orders, whose item maps make rows larger.
pub const CASSANDRA_ORDER_BATCH_SIZE: usize = 30;

const TABLES: &[&str] = &[
    "clients_by_email",
    "products_by_category",
    "products_by_id",
    "orders_by_client",
    "payments_by_type_and_month",
];

const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE clients_by_email (
        email text PRIMARY KEY,
        id bigint,
        name text,
        phone text,
        created_at timestamp,
        cpf text
    )",
    "CREATE TABLE products_by_category (
        category text,
        price double,
        id bigint,
        name text,
        stock int,
        PRIMARY KEY ((category), price, id)
    )",
    "CREATE TABLE products_by_id (
        id bigint PRIMARY KEY,
        name text,
        category text,
        price double,
        stock int
    )",
    "CREATE TABLE orders_by_client (
        client_id bigint,
        ordered_at timestamp,
        id bigint,
        status text,
        total_value double,
        items map<bigint, int>,
        PRIMARY KEY ((client_id), ordered_at, id)
    ) WITH CLUSTERING ORDER BY (ordered_at DESC, id ASC)",
    "CREATE TABLE payments_by_type_and_month (
        payment_type text,
        month text,
        paid_at timestamp,
        id bigint,
        order_id bigint,
        status text,
        PRIMARY KEY ((payment_type, month), paid_at, id)
    ) WITH CLUSTERING ORDER BY (paid_at DESC, id ASC)",
];

type ClientRow = (i64, String, String, String, DateTime<Utc>, String);
type ProductRow = (i64, String, String, f64, i32);
type PaymentRow = (i64, i64, String, String, DateTime<Utc>);

/// Cassandra backend.
pub struct CassandraBackend {
    session: Session,
    keyspace: String,
    replication_factor: u32,
    rt: Arc<Runtime>,
}

impl CassandraBackend {
    /// Open a session, create the keyspace if missing and switch to it.
    pub fn connect(config: &CassandraConfig, rt: Arc<Runtime>) -> Result<Self> {
        if !is_valid_identifier(&config.keyspace) {
            return Err(Error::Config(format!(
                "invalid keyspace name '{}'",
                config.keyspace
            )));
        }
        let pool_size = NonZeroUsize::new(config.pool_size)
            .ok_or_else(|| Error::Config("CASSANDRA_POOL_SIZE must be positive".to_string()))?;

        let profile = ExecutionProfile::builder()
            .consistency(config.consistency)
            .request_timeout(Some(config.timeout))
            .retry_policy(Box::new(BoundedRetryPolicy::new(config.retries)))
            .build();

        let session = rt.block_on(async {
            let session = SessionBuilder::new()
                .known_nodes(&config.hosts)
                .connection_timeout(config.timeout)
                .pool_size(PoolSize::PerHost(pool_size))
                .default_execution_profile_handle(profile.into_handle())
                .build()
                .await?;

            session
                .query_unpaged(
                    create_keyspace_statement(&config.keyspace, config.replication_factor),
                    (),
                )
                .await?;
            session.use_keyspace(config.keyspace.as_str(), false).await?;
            Ok::<_, Error>(session)
        })?;
        tracing::info!(
            hosts = ?config.hosts,
            keyspace = %config.keyspace,
            consistency = ?config.consistency,
            "connected to Cassandra"
        );

        Ok(Self {
            session,
            keyspace: config.keyspace.clone(),
            replication_factor: config.replication_factor,
            rt,
        })
    }

    /// Run `values` through `statement` in unlogged batches of `batch_size`.
    async fn batch_insert<V>(
        &self,
        statement: &str,
        values: &[V],
        batch_size: usize,
    ) -> Result<()>
    where
        V: SerializeRow + Clone,
    {
        let prepared = self.session.prepare(statement).await?;
        for chunk in values.chunks(batch_size) {
            let batch = unlogged_batch(&prepared, chunk.len());
            self.session.batch(&batch, chunk.to_vec()).await?;
            tracing::debug!(statements = chunk.len(), "executed batch");
        }
        Ok(())
    }

    async fn products_by_ids(&self, ids: Vec<i64>) -> Result<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let result = self
            .session
            .query_unpaged(
                "SELECT id, name, category, price, stock FROM products_by_id WHERE id IN ?",
                (ids,),
            )
            .await?;
        result
            .rows_typed::<ProductRow>()
            .map_err(Error::decode)?
            .map(|row| row.map(product_from_row).map_err(Error::decode))
            .collect()
    }
}

impl InsertRepository for CassandraBackend {
    fn insert_clients(&self, clients: &[Client]) -> Result<()> {
        let rows: Vec<ClientRow> = clients
            .iter()
            .map(|c| {
                (
                    c.id,
                    c.email.clone(),
                    c.name.clone(),
                    c.phone.clone(),
                    c.created_at,
                    c.cpf.clone(),
                )
            })
            .collect();
        self.rt.block_on(self.batch_insert(
            "INSERT INTO clients_by_email (id, email, name, phone, created_at, cpf) \
             VALUES (?, ?, ?, ?, ?, ?)",
            &rows,
            CASSANDRA_BATCH_SIZE,
        ))
    }

    fn insert_products(&self, products: &[Product]) -> Result<()> {
        let rows: Vec<ProductRow> = products
            .iter()
            .map(|p| (p.id, p.name.clone(), p.category.clone(), p.price, p.stock))
            .collect();
        self.rt.block_on(async {
            self.batch_insert(
                "INSERT INTO products_by_category (id, name, category, price, stock) \
                 VALUES (?, ?, ?, ?, ?)",
                &rows,
                CASSANDRA_BATCH_SIZE,
            )
            .await?;
            self.batch_insert(
                "INSERT INTO products_by_id (id, name, category, price, stock) \
                 VALUES (?, ?, ?, ?, ?)",
                &rows,
                CASSANDRA_BATCH_SIZE,
            )
            .await
        })
    }

    fn insert_orders(&self, orders: &[Order]) -> Result<()> {
        let rows: Vec<(i64, DateTime<Utc>, i64, &'static str, f64, HashMap<i64, i32>)> = orders
            .iter()
            .map(|o| {
                let items = o
                    .items
                    .iter()
                    .map(|item| (item.product_id, item.quantity))
                    .collect();
                (o.client_id, o.ordered_at, o.id, o.status.as_str(), o.total_value, items)
            })
            .collect();
        self.rt.block_on(self.batch_insert(
            "INSERT INTO orders_by_client (client_id, ordered_at, id, status, total_value, items) \
             VALUES (?, ?, ?, ?, ?, ?)",
            &rows,
            CASSANDRA_ORDER_BATCH_SIZE,
        ))
    }

    fn insert_payments(&self, payments: &[Payment]) -> Result<()> {
        let rows: Vec<(&'static str, String, DateTime<Utc>, i64, i64, &'static str)> = payments
            .iter()
            .map(|p| {
                (
                    p.payment_type.as_str(),
                    month_key(p.paid_at),
                    p.paid_at,
                    p.id,
                    p.order_id,
                    p.status.as_str(),
                )
            })
            .collect();
        self.rt.block_on(self.batch_insert(
            "INSERT INTO payments_by_type_and_month \
             (payment_type, month, paid_at, id, order_id, status) VALUES (?, ?, ?, ?, ?, ?)",
            &rows,
            CASSANDRA_BATCH_SIZE,
        ))
    }
}

impl QueryRepository for CassandraBackend {
    fn client_by_email(&self, email: &str) -> Result<Option<Client>> {
        let result = self.rt.block_on(self.session.query_unpaged(
            "SELECT id, email, name, phone, created_at, cpf FROM clients_by_email WHERE email = ?",
            (email,),
        ))?;
        let row = result
            .maybe_first_row_typed::<ClientRow>()
            .map_err(Error::decode)?;
        Ok(row.map(|(id, email, name, phone, created_at, cpf)| Client {
            id,
            name,
            email,
            phone,
            created_at,
            cpf,
        }))
    }

    fn products_by_category(&self, category: &str) -> Result<Vec<Product>> {
        let result = self.rt.block_on(self.session.query_unpaged(
            "SELECT id, name, category, price, stock FROM products_by_category WHERE category = ?",
            (category,),
        ))?;
        result
            .rows_typed::<ProductRow>()
            .map_err(Error::decode)?
            .map(|row| row.map(product_from_row).map_err(Error::decode))
            .collect()
    }

    fn delivered_products_by_client(&self, client_id: i64) -> Result<Vec<Product>> {
        self.rt.block_on(async {
            let result = self
                .session
                .query_unpaged(
                    "SELECT status, items FROM orders_by_client WHERE client_id = ?",
                    (client_id,),
                )
                .await?;
            let orders = result
                .rows_typed::<(String, Option<HashMap<i64, i32>>)>()
                .map_err(Error::decode)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(Error::decode)?;

            let ids = delivered_product_ids(orders);
            let mut products = self.products_by_ids(ids.into_iter().collect()).await?;
            products.sort_by_key(|product| product.id);
            Ok::<_, Error>(products)
        })
    }

    fn top_selling_products(&self, limit: usize) -> Result<Vec<Product>> {
        self.rt.block_on(async {
            let mut rows = self
                .session
                .query_iter("SELECT items FROM orders_by_client", ())
                .await?
                .into_typed::<(Option<HashMap<i64, i32>>,)>();

            let mut sold: HashMap<i64, i64> = HashMap::new();
            while let Some((items,)) = rows.try_next().await.map_err(paging_error)? {
                for (product_id, quantity) in items.unwrap_or_default() {
                    *sold.entry(product_id).or_default() += i64::from(quantity);
                }
            }

            let ranking = rank_by_quantity(&sold, limit);
            let mut products: HashMap<i64, Product> = self
                .products_by_ids(ranking.clone())
                .await?
                .into_iter()
                .map(|product| (product.id, product))
                .collect();
            let ranked: Vec<Product> = ranking
                .into_iter()
                .filter_map(|id| products.remove(&id))
                .collect();
            Ok::<_, Error>(ranked)
        })
    }

    fn pix_payments_since(&self, since: DateTime<Utc>) -> Result<Vec<Payment>> {
        // Payments are never dated after the query runs.
        let months = pix_scan_months(since, Utc::now());
        self.rt.block_on(async {
            let mut payments = Vec::new();
            for month in &months {
                let result = self
                    .session
                    .query_unpaged(
                        "SELECT id, order_id, payment_type, status, paid_at \
                         FROM payments_by_type_and_month \
                         WHERE payment_type = ? AND month = ? AND paid_at >= ?",
                        (PaymentType::Pix.as_str(), month.as_str(), since),
                    )
                    .await?;
                for row in result.rows_typed::<PaymentRow>().map_err(Error::decode)? {
                    payments.push(payment_from_row(row.map_err(Error::decode)?)?);
                }
            }
            Ok::<_, Error>(payments)
        })
    }

    fn client_total_spent(
        &self,
        client_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64> {
        let result = self.rt.block_on(self.session.query_unpaged(
            "SELECT total_value FROM orders_by_client \
             WHERE client_id = ? AND ordered_at >= ? AND ordered_at <= ?",
            (client_id, start, end),
        ))?;
        let mut total = 0.0;
        for row in result.rows_typed::<(f64,)>().map_err(Error::decode)? {
            let (value,) = row.map_err(Error::decode)?;
            total += value;
        }
        Ok(round_cents(total))
    }
}

impl Backend for CassandraBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cassandra
    }

    fn setup_schema(&self) -> Result<()> {
        self.rt.block_on(async {
            self.session
                .query_unpaged(
                    create_keyspace_statement(&self.keyspace, self.replication_factor),
                    (),
                )
                .await?;
            for table in TABLES {
                self.session
                    .query_unpaged(format!("DROP TABLE IF EXISTS {}", table), ())
                    .await?;
            }
            for statement in CREATE_TABLES {
                self.session.query_unpaged(*statement, ()).await?;
            }
            self.session.await_schema_agreement().await?;
            Ok::<_, Error>(())
        })?;
        tracing::info!(backend = %self.kind(), keyspace = %self.keyspace, "schema ready");
        Ok(())
    }
}

/// Retries failed requests on the next node, up to a fixed count.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRetryPolicy {
    max_retries: usize,
}

impl BoundedRetryPolicy {
    pub fn new(max_retries: usize) -> Self {
        Self { max_retries }
    }
}

impl RetryPolicy for BoundedRetryPolicy {
    fn new_session(&self) -> Box<dyn RetrySession> {
        Box::new(BoundedRetrySession {
            max_retries: self.max_retries,
            attempts: 0,
        })
    }

    fn clone_boxed(&self) -> Box<dyn RetryPolicy> {
        Box::new(*self)
    }
}

struct BoundedRetrySession {
    max_retries: usize,
    attempts: usize,
}

impl BoundedRetrySession {
    fn decide(&mut self, retryable: bool) -> RetryDecision {
        if !retryable || self.attempts >= self.max_retries {
            return RetryDecision::DontRetry;
        }
        self.attempts += 1;
        RetryDecision::RetryNextNode(None)
    }
}

impl RetrySession for BoundedRetrySession {
    fn decide_should_retry(&mut self, query_info: QueryInfo) -> RetryDecision {
        self.decide(is_retryable(query_info.error))
    }

    fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Page fetch failures stay driver errors; only row conversion is a decode error.
fn paging_error(error: NextRowError) -> Error {
    match error {
        NextRowError::QueryError(error) => Error::from(error),
        NextRowError::FromRowError(error) => Error::decode(error),
    }
}

/// Errors caused by the statement itself fail the same way on every node.
fn is_retryable(error: &QueryError) -> bool {
    !matches!(
        error,
        QueryError::BadQuery(_)
            | QueryError::DbError(
                DbError::SyntaxError
                    | DbError::Invalid
                    | DbError::Unauthorized
                    | DbError::AlreadyExists { .. },
                _
            )
    )
}

fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn create_keyspace_statement(keyspace: &str, replication_factor: u32) -> String {
    format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
         {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    )
}

/// Month partitions covering `since..=until`, newest first. A `since` later
/// than `until` still scans its own month.
fn pix_scan_months(since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<String> {
    let mut months = month_keys_between(since, until.max(since));
    months.reverse();
    months
}

fn unlogged_batch(statement: &PreparedStatement, len: usize) -> Batch {
    let mut batch = Batch::new(BatchType::Unlogged);
    for _ in 0..len {
        batch.append_statement(statement.clone());
    }
    batch
}

/// Product ids over the delivered orders among `(status, items)` rows.
fn delivered_product_ids(
    orders: impl IntoIterator<Item = (String, Option<HashMap<i64, i32>>)>,
) -> BTreeSet<i64> {
    let delivered = OrderStatus::Delivered.as_str();
    orders
        .into_iter()
        .filter(|(status, _)| status == delivered)
        .flat_map(|(_, items)| items.unwrap_or_default().into_keys())
        .collect()
}

/// Product ids by quantity sold, highest first, ties by id.
fn rank_by_quantity(sold: &HashMap<i64, i64>, limit: usize) -> Vec<i64> {
    let mut ranked: Vec<(i64, i64)> = sold.iter().map(|(id, qty)| (*id, *qty)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(id, _)| id).collect()
}

fn product_from_row((id, name, category, price, stock): ProductRow) -> Product {
    Product {
        id,
        name,
        category,
        price,
        stock,
    }
}

fn payment_from_row((id, order_id, payment_type, status, paid_at): PaymentRow) -> Result<Payment> {
    Ok(Payment {
        id,
        order_id,
        payment_type: payment_type.parse()?,
        status: status.parse()?,
        paid_at,
    })
}
