//! TechMarket storage benchmark
//!
//! Seeds a synthetic e-commerce dataset and times equivalent insert and
//! query operations against PostgreSQL, MongoDB and Cassandra, appending an
//! aligned performance table to a report file.
//!
//! # Components
//!
//! - **Fixtures**: seeded generators for clients, products, orders and payments
//! - **Backends**: one repository adapter per store behind a common trait set
//! - **Harness**: times operations, keeps successes, renders the report
//! - **Runner**: the fixed insert-then-query matrix

pub mod backends;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod harness;
pub mod model;
pub mod runner;

pub use backends::{
    Backend, CassandraBackend, InsertRepository, MongoBackend, PostgresBackend, QueryRepository,
};
pub use config::BenchConfig;
pub use error::{Error, Result};
pub use fixtures::{Dataset, SeedSizes};
pub use harness::{render_table, BackendKind, BenchHarness, Measurement, OperationKind};
pub use model::{
    Client, Order, OrderItem, OrderStatus, Payment, PaymentStatus, PaymentType, Product,
};
