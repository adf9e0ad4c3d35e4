//! PostgreSQL backend.
//!
//! Normalized schema with one table per entity kind and order items in their
//! own table. Inserts are multi-row `INSERT ... VALUES` statements inside a
//! single transaction per call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::runtime::Runtime;

use crate::config::PostgresConfig;
use crate::error::{Error, Result};
use crate::harness::BackendKind;
use crate::model::{Client, Order, OrderItem, OrderStatus, Payment, PaymentType, Product};

use super::{round_cents, Backend, InsertRepository, QueryRepository};

/// Rows per `INSERT` statement.
pub const PG_BATCH_SIZE: usize = 1_000;

const SCHEMA: &str = r#"
DROP TABLE IF EXISTS payments CASCADE;
DROP TABLE IF EXISTS order_items CASCADE;
DROP TABLE IF EXISTS orders CASCADE;
DROP TABLE IF EXISTS products CASCADE;
DROP TABLE IF EXISTS clients CASCADE;

CREATE TABLE clients (
    id BIGINT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    phone TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    cpf TEXT NOT NULL
);

CREATE TABLE products (
    id BIGINT PRIMARY KEY,
    name TEXT NOT NULL,
    category TEXT NOT NULL,
    price DOUBLE PRECISION NOT NULL,
    stock INTEGER NOT NULL
);

CREATE TABLE orders (
    id BIGINT PRIMARY KEY,
    client_id BIGINT NOT NULL REFERENCES clients(id),
    ordered_at TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL,
    total_value DOUBLE PRECISION NOT NULL
);

CREATE TABLE order_items (
    order_id BIGINT NOT NULL REFERENCES orders(id),
    product_id BIGINT NOT NULL REFERENCES products(id),
    quantity INTEGER NOT NULL,
    unit_price DOUBLE PRECISION NOT NULL,
    PRIMARY KEY (order_id, product_id)
);

CREATE TABLE payments (
    id BIGINT PRIMARY KEY,
    order_id BIGINT NOT NULL REFERENCES orders(id),
    payment_type TEXT NOT NULL,
    status TEXT NOT NULL,
    paid_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX idx_clients_email ON clients(email);
CREATE INDEX idx_products_category_price ON products(category, price);
CREATE INDEX idx_orders_client_ordered_at ON orders(client_id, ordered_at);
CREATE INDEX idx_order_items_product ON order_items(product_id);
CREATE INDEX idx_payments_type_paid_at ON payments(payment_type, paid_at);
"#;

const CLIENT_COLUMNS: &str = "id, name, email, phone, created_at, cpf";
const PAYMENT_COLUMNS: &str = "id, order_id, payment_type, status, paid_at";

/// PostgreSQL backend.
pub struct PostgresBackend {
    pool: PgPool,
    rt: Arc<Runtime>,
}

impl PostgresBackend {
    /// Connect a pool sized from the configuration.
    pub fn connect(config: &PostgresConfig, rt: Arc<Runtime>) -> Result<Self> {
        let pool = rt.block_on(async {
            PgPoolOptions::new()
                .max_connections(config.pool_size)
                .connect(&config.uri)
                .await
        })?;
        tracing::info!(pool_size = config.pool_size, "connected to PostgreSQL");

        Ok(Self { pool, rt })
    }
}

impl InsertRepository for PostgresBackend {
    fn insert_clients(&self, clients: &[Client]) -> Result<()> {
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await?;

            for chunk in clients.chunks(PG_BATCH_SIZE) {
                let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                    "INSERT INTO clients (id, name, email, phone, created_at, cpf) ",
                );
                builder.push_values(chunk, |mut row, client| {
                    row.push_bind(client.id)
                        .push_bind(client.name.as_str())
                        .push_bind(client.email.as_str())
                        .push_bind(client.phone.as_str())
                        .push_bind(client.created_at)
                        .push_bind(client.cpf.as_str());
                });
                builder.build().execute(&mut *tx).await?;
                tracing::debug!(rows = chunk.len(), "inserted client chunk");
            }

            tx.commit().await?;
            Ok::<_, Error>(())
        })
    }

    fn insert_products(&self, products: &[Product]) -> Result<()> {
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await?;

            for chunk in products.chunks(PG_BATCH_SIZE) {
                let mut builder: QueryBuilder<Postgres> =
                    QueryBuilder::new("INSERT INTO products (id, name, category, price, stock) ");
                builder.push_values(chunk, |mut row, product| {
                    row.push_bind(product.id)
                        .push_bind(product.name.as_str())
                        .push_bind(product.category.as_str())
                        .push_bind(product.price)
                        .push_bind(product.stock);
                });
                builder.build().execute(&mut *tx).await?;
                tracing::debug!(rows = chunk.len(), "inserted product chunk");
            }

            tx.commit().await?;
            Ok::<_, Error>(())
        })
    }

    fn insert_orders(&self, orders: &[Order]) -> Result<()> {
        let items: Vec<(i64, &OrderItem)> = orders
            .iter()
            .flat_map(|order| order.items.iter().map(move |item| (order.id, item)))
            .collect();

        self.rt.block_on(async {
            let mut tx = self.pool.begin().await?;

            for chunk in orders.chunks(PG_BATCH_SIZE) {
                let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                    "INSERT INTO orders (id, client_id, ordered_at, status, total_value) ",
                );
                builder.push_values(chunk, |mut row, order| {
                    row.push_bind(order.id)
                        .push_bind(order.client_id)
                        .push_bind(order.ordered_at)
                        .push_bind(order.status.as_str())
                        .push_bind(order.total_value);
                });
                builder.build().execute(&mut *tx).await?;
                tracing::debug!(rows = chunk.len(), "inserted order chunk");
            }

            for chunk in items.chunks(PG_BATCH_SIZE) {
                let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                    "INSERT INTO order_items (order_id, product_id, quantity, unit_price) ",
                );
                builder.push_values(chunk, |mut row, (order_id, item)| {
                    row.push_bind(*order_id)
                        .push_bind(item.product_id)
                        .push_bind(item.quantity)
                        .push_bind(item.unit_price);
                });
                builder.build().execute(&mut *tx).await?;
                tracing::debug!(rows = chunk.len(), "inserted order item chunk");
            }

            tx.commit().await?;
            Ok::<_, Error>(())
        })
    }

    fn insert_payments(&self, payments: &[Payment]) -> Result<()> {
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await?;

            for chunk in payments.chunks(PG_BATCH_SIZE) {
                let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                    "INSERT INTO payments (id, order_id, payment_type, status, paid_at) ",
                );
                builder.push_values(chunk, |mut row, payment| {
                    row.push_bind(payment.id)
                        .push_bind(payment.order_id)
                        .push_bind(payment.payment_type.as_str())
                        .push_bind(payment.status.as_str())
                        .push_bind(payment.paid_at);
                });
                builder.build().execute(&mut *tx).await?;
                tracing::debug!(rows = chunk.len(), "inserted payment chunk");
            }

            tx.commit().await?;
            Ok::<_, Error>(())
        })
    }
}

impl QueryRepository for PostgresBackend {
    fn client_by_email(&self, email: &str) -> Result<Option<Client>> {
        let sql = format!("SELECT {} FROM clients WHERE email = $1", CLIENT_COLUMNS);
        let row = self
            .rt
            .block_on(sqlx::query(&sql).bind(email).fetch_optional(&self.pool))?;
        row.as_ref().map(client_from_row).transpose()
    }

    fn products_by_category(&self, category: &str) -> Result<Vec<Product>> {
        let rows = self.rt.block_on(
            sqlx::query(
                "SELECT id, name, category, price, stock FROM products \
                 WHERE category = $1 ORDER BY price, id",
            )
            .bind(category)
            .fetch_all(&self.pool),
        )?;
        rows.iter().map(product_from_row).collect()
    }

    fn delivered_products_by_client(&self, client_id: i64) -> Result<Vec<Product>> {
        let rows = self.rt.block_on(
            sqlx::query(
                r#"
                SELECT DISTINCT p.id, p.name, p.category, p.price, p.stock
                FROM products p
                JOIN order_items oi ON oi.product_id = p.id
                JOIN orders o ON o.id = oi.order_id
                WHERE o.client_id = $1 AND o.status = $2
                ORDER BY p.id
                "#,
            )
            .bind(client_id)
            .bind(OrderStatus::Delivered.as_str())
            .fetch_all(&self.pool),
        )?;
        rows.iter().map(product_from_row).collect()
    }

    fn top_selling_products(&self, limit: usize) -> Result<Vec<Product>> {
        let rows = self.rt.block_on(
            sqlx::query(
                r#"
                SELECT p.id, p.name, p.category, p.price, p.stock, SUM(oi.quantity) AS sold
                FROM products p
                JOIN order_items oi ON oi.product_id = p.id
                GROUP BY p.id
                ORDER BY sold DESC, p.id
                LIMIT $1
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool),
        )?;
        rows.iter().map(product_from_row).collect()
    }

    fn pix_payments_since(&self, since: DateTime<Utc>) -> Result<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE payment_type = $1 AND paid_at >= $2 \
             ORDER BY paid_at DESC",
            PAYMENT_COLUMNS
        );
        let rows = self.rt.block_on(
            sqlx::query(&sql)
                .bind(PaymentType::Pix.as_str())
                .bind(since)
                .fetch_all(&self.pool),
        )?;
        rows.iter().map(payment_from_row).collect()
    }

    fn client_total_spent(
        &self,
        client_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64> {
        let row = self.rt.block_on(
            sqlx::query(
                "SELECT COALESCE(SUM(total_value), 0)::DOUBLE PRECISION AS total FROM orders \
                 WHERE client_id = $1 AND ordered_at BETWEEN $2 AND $3",
            )
            .bind(client_id)
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool),
        )?;
        let total: f64 = row.try_get("total")?;
        Ok(round_cents(total))
    }
}

impl Backend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn setup_schema(&self) -> Result<()> {
        self.rt.block_on(sqlx::raw_sql(SCHEMA).execute(&self.pool))?;
        tracing::info!(backend = %self.kind(), "schema ready");
        Ok(())
    }
}

fn client_from_row(row: &PgRow) -> Result<Client> {
    Ok(Client {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        created_at: row.try_get("created_at")?,
        cpf: row.try_get("cpf")?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        price: row.try_get("price")?,
        stock: row.try_get("stock")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment> {
    let payment_type: String = row.try_get("payment_type")?;
    let status: String = row.try_get("status")?;
    Ok(Payment {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        payment_type: payment_type.parse()?,
        status: status.parse()?,
        paid_at: row.try_get("paid_at")?,
    })
}
