//! MongoDB backend.
//!
//! One collection per entity kind keyed by `_id = id`. Order items are
//! embedded in their order document, so the item-level queries run as
//! aggregation pipelines over `orders`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Collection, Database, IndexModel};
use tokio::runtime::Runtime;

use crate::config::MongoConfig;
use crate::error::{Error, Result};
use crate::harness::BackendKind;
use crate::model::{Client, Order, OrderStatus, Payment, PaymentType, Product};

use super::{round_cents, Backend, InsertRepository, QueryRepository};

/// Documents per `insert_many` call.
pub const MONGO_BATCH_SIZE: usize = 1_000;

const CLIENTS: &str = "clients";
const PRODUCTS: &str = "products";
const ORDERS: &str = "orders";
const PAYMENTS: &str = "payments";

/// MongoDB backend.
pub struct MongoBackend {
    db: Database,
    rt: Arc<Runtime>,
}

impl MongoBackend {
    /// Connect to the configured deployment and select the database.
    pub fn connect(config: &MongoConfig, rt: Arc<Runtime>) -> Result<Self> {
        let client = rt.block_on(async {
            let mut options = ClientOptions::parse(&config.uri).await?;
            options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
            let client = mongodb::Client::with_options(options)?;
            client
                .database(&config.database)
                .run_command(doc! { "ping": 1 })
                .await?;
            Ok::<_, Error>(client)
        })?;
        tracing::info!(database = %config.database, "connected to MongoDB");

        Ok(Self {
            db: client.database(&config.database),
            rt,
        })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection(name)
    }

    fn insert_documents(&self, name: &str, docs: Vec<Document>) -> Result<()> {
        let collection = self.collection(name);
        self.rt.block_on(async {
            for chunk in docs.chunks(MONGO_BATCH_SIZE) {
                collection.insert_many(chunk).await?;
                tracing::debug!(collection = name, docs = chunk.len(), "inserted chunk");
            }
            Ok::<_, Error>(())
        })
    }

    fn aggregate(&self, name: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let collection = self.collection(name);
        self.rt.block_on(async {
            let cursor = collection.aggregate(pipeline).await?;
            let docs: Vec<Document> = cursor.try_collect().await?;
            Ok::<_, Error>(docs)
        })
    }
}

impl InsertRepository for MongoBackend {
    fn insert_clients(&self, clients: &[Client]) -> Result<()> {
        self.insert_documents(CLIENTS, clients.iter().map(client_to_document).collect())
    }

    fn insert_products(&self, products: &[Product]) -> Result<()> {
        self.insert_documents(PRODUCTS, products.iter().map(product_to_document).collect())
    }

    fn insert_orders(&self, orders: &[Order]) -> Result<()> {
        self.insert_documents(ORDERS, orders.iter().map(order_to_document).collect())
    }

    fn insert_payments(&self, payments: &[Payment]) -> Result<()> {
        self.insert_documents(PAYMENTS, payments.iter().map(payment_to_document).collect())
    }
}

impl QueryRepository for MongoBackend {
    fn client_by_email(&self, email: &str) -> Result<Option<Client>> {
        let collection = self.collection(CLIENTS);
        let found = self
            .rt
            .block_on(async { collection.find_one(doc! { "email": email }).await })?;
        found.as_ref().map(client_from_document).transpose()
    }

    fn products_by_category(&self, category: &str) -> Result<Vec<Product>> {
        let collection = self.collection(PRODUCTS);
        let docs: Vec<Document> = self.rt.block_on(async {
            let cursor = collection
                .find(doc! { "category": category })
                .sort(doc! { "price": 1, "_id": 1 })
                .await?;
            cursor.try_collect::<Vec<Document>>().await
        })?;
        docs.iter().map(product_from_document).collect()
    }

    fn delivered_products_by_client(&self, client_id: i64) -> Result<Vec<Product>> {
        let pipeline = vec![
            doc! { "$match": {
                "client_id": client_id,
                "status": OrderStatus::Delivered.as_str(),
            } },
            doc! { "$unwind": "$items" },
            doc! { "$group": { "_id": "$items.product_id" } },
            doc! { "$lookup": {
                "from": PRODUCTS,
                "localField": "_id",
                "foreignField": "_id",
                "as": "product",
            } },
            doc! { "$unwind": "$product" },
            doc! { "$replaceWith": "$product" },
            doc! { "$sort": { "_id": 1 } },
        ];
        let docs = self.aggregate(ORDERS, pipeline)?;
        docs.iter().map(product_from_document).collect()
    }

    fn top_selling_products(&self, limit: usize) -> Result<Vec<Product>> {
        let pipeline = vec![
            doc! { "$unwind": "$items" },
            doc! { "$group": {
                "_id": "$items.product_id",
                "sold": { "$sum": "$items.quantity" },
            } },
            doc! { "$sort": { "sold": -1, "_id": 1 } },
            doc! { "$limit": limit as i64 },
            doc! { "$lookup": {
                "from": PRODUCTS,
                "localField": "_id",
                "foreignField": "_id",
                "as": "product",
            } },
            doc! { "$unwind": "$product" },
            doc! { "$replaceWith": "$product" },
        ];
        let docs = self.aggregate(ORDERS, pipeline)?;
        docs.iter().map(product_from_document).collect()
    }

    fn pix_payments_since(&self, since: DateTime<Utc>) -> Result<Vec<Payment>> {
        let collection = self.collection(PAYMENTS);
        let filter = doc! {
            "payment_type": PaymentType::Pix.as_str(),
            "paid_at": { "$gte": to_bson_date(since) },
        };
        let docs: Vec<Document> = self.rt.block_on(async {
            let cursor = collection
                .find(filter)
                .sort(doc! { "paid_at": -1 })
                .await?;
            cursor.try_collect::<Vec<Document>>().await
        })?;
        docs.iter().map(payment_from_document).collect()
    }

    fn client_total_spent(
        &self,
        client_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64> {
        let pipeline = vec![
            doc! { "$match": {
                "client_id": client_id,
                "ordered_at": { "$gte": to_bson_date(start), "$lte": to_bson_date(end) },
            } },
            doc! { "$group": { "_id": Bson::Null, "total": { "$sum": "$total_value" } } },
        ];
        let docs = self.aggregate(ORDERS, pipeline)?;
        match docs.first() {
            Some(doc) => Ok(round_cents(read_f64(doc, "total")?)),
            None => Ok(0.0),
        }
    }
}

impl Backend for MongoBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MongoDb
    }

    fn setup_schema(&self) -> Result<()> {
        let indexes = [
            (CLIENTS, doc! { "email": 1 }, true),
            (PRODUCTS, doc! { "category": 1, "price": 1 }, false),
            (ORDERS, doc! { "client_id": 1, "ordered_at": 1 }, false),
            (PAYMENTS, doc! { "payment_type": 1, "paid_at": 1 }, false),
        ];

        self.rt.block_on(async {
            for (name, keys, unique) in indexes {
                let collection = self.collection(name);
                collection.drop().await?;
                let index = IndexModel::builder()
                    .keys(keys)
                    .options(IndexOptions::builder().unique(unique).build())
                    .build();
                collection.create_index(index).await?;
            }
            Ok::<_, Error>(())
        })?;
        tracing::info!(backend = %self.kind(), "schema ready");
        Ok(())
    }
}

fn to_bson_date(at: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(at.timestamp_millis())
}

fn client_to_document(client: &Client) -> Document {
    doc! {
        "_id": client.id,
        "name": &client.name,
        "email": &client.email,
        "phone": &client.phone,
        "created_at": to_bson_date(client.created_at),
        "cpf": &client.cpf,
    }
}

fn product_to_document(product: &Product) -> Document {
    doc! {
        "_id": product.id,
        "name": &product.name,
        "category": &product.category,
        "price": product.price,
        "stock": product.stock,
    }
}

fn order_to_document(order: &Order) -> Document {
    let items: Vec<Document> = order
        .items
        .iter()
        .map(|item| {
            doc! {
                "product_id": item.product_id,
                "quantity": item.quantity,
                "unit_price": item.unit_price,
            }
        })
        .collect();

    doc! {
        "_id": order.id,
        "client_id": order.client_id,
        "ordered_at": to_bson_date(order.ordered_at),
        "status": order.status.as_str(),
        "total_value": order.total_value,
        "items": items,
    }
}

fn payment_to_document(payment: &Payment) -> Document {
    doc! {
        "_id": payment.id,
        "order_id": payment.order_id,
        "payment_type": payment.payment_type.as_str(),
        "status": payment.status.as_str(),
        "paid_at": to_bson_date(payment.paid_at),
    }
}

fn client_from_document(doc: &Document) -> Result<Client> {
    Ok(Client {
        id: read_i64(doc, "_id")?,
        name: read_string(doc, "name")?,
        email: read_string(doc, "email")?,
        phone: read_string(doc, "phone")?,
        created_at: read_datetime(doc, "created_at")?,
        cpf: read_string(doc, "cpf")?,
    })
}

fn product_from_document(doc: &Document) -> Result<Product> {
    let stock = read_i64(doc, "stock")?;
    Ok(Product {
        id: read_i64(doc, "_id")?,
        name: read_string(doc, "name")?,
        category: read_string(doc, "category")?,
        price: read_f64(doc, "price")?,
        stock: i32::try_from(stock).map_err(Error::decode)?,
    })
}

fn payment_from_document(doc: &Document) -> Result<Payment> {
    Ok(Payment {
        id: read_i64(doc, "_id")?,
        order_id: read_i64(doc, "order_id")?,
        payment_type: read_string(doc, "payment_type")?.parse()?,
        status: read_string(doc, "status")?.parse()?,
        paid_at: read_datetime(doc, "paid_at")?,
    })
}

/// Integer field stored as either BSON int32 or int64.
fn read_i64(doc: &Document, key: &str) -> Result<i64> {
    match doc.get(key) {
        Some(Bson::Int64(value)) => Ok(*value),
        Some(Bson::Int32(value)) => Ok(i64::from(*value)),
        Some(other) => Err(Error::Decode(format!(
            "field '{}' is not an integer: {}",
            key, other
        ))),
        None => Err(Error::Decode(format!("missing field '{}'", key))),
    }
}

/// Numeric field; `$sum` over doubles may come back as any numeric type.
fn read_f64(doc: &Document, key: &str) -> Result<f64> {
    match doc.get(key) {
        Some(Bson::Double(value)) => Ok(*value),
        Some(Bson::Int32(value)) => Ok(f64::from(*value)),
        Some(Bson::Int64(value)) => Ok(*value as f64),
        Some(other) => Err(Error::Decode(format!(
            "field '{}' is not a number: {}",
            key, other
        ))),
        None => Err(Error::Decode(format!("missing field '{}'", key))),
    }
}

fn read_string(doc: &Document, key: &str) -> Result<String> {
    doc.get_str(key)
        .map(str::to_string)
        .map_err(|e| Error::Decode(format!("field '{}': {}", key, e)))
}

fn read_datetime(doc: &Document, key: &str) -> Result<DateTime<Utc>> {
    let millis = doc
        .get_datetime(key)
        .map_err(|e| Error::Decode(format!("field '{}': {}", key, e)))?
        .timestamp_millis();
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Decode(format!("field '{}' is out of range", key)))
}
