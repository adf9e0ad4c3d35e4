//! Synthetic dataset generation.
//!
//! Every generator draws from a caller-owned random source and dates records
//! relative to a caller-supplied `now`, so a seeded run is reproducible.

use chrono::{DateTime, Duration, Utc};
use rand::seq::index::sample;
use rand::Rng;

use crate::model::{
    Client, Order, OrderItem, OrderStatus, Payment, PaymentStatus, PaymentType, Product,
};

/// Default number of clients seeded per run.
pub const DEFAULT_CLIENTS: usize = 20_000;
/// Default number of products seeded per run.
pub const DEFAULT_PRODUCTS: usize = 5_000;
/// Default number of orders seeded per run.
pub const DEFAULT_ORDERS: usize = 10_000;
/// Default number of payments seeded per run.
pub const DEFAULT_PAYMENTS: usize = 10_000;

/// Upper bound on the line items of a single order.
const MAX_ITEMS_PER_ORDER: usize = 10;

const FIRST_NAMES: &[&str] = &[
    "Ana", "Bruno", "Carla", "Diego", "Eduarda", "Felipe", "Gabriela", "Heitor", "Isabela",
    "Joao", "Larissa", "Marcos", "Natalia", "Otavio", "Paula", "Rafael", "Sofia", "Thiago",
    "Valentina", "Vinicius",
];

const LAST_NAMES: &[&str] = &[
    "Silva", "Santos", "Oliveira", "Souza", "Rodrigues", "Ferreira", "Alves", "Pereira",
    "Lima", "Gomes", "Costa", "Ribeiro", "Martins", "Carvalho", "Almeida",
];

const EMAIL_DOMAINS: &[&str] = &[
    "example.com", "mail.com", "techmarket.com.br", "inbox.net", "provider.org",
];

/// Product categories with their price range.
const CATEGORIES: &[(&str, f64, f64)] = &[
    ("Smartphones", 800.0, 8_000.0),
    ("Notebooks", 2_000.0, 15_000.0),
    ("Tablets", 500.0, 5_000.0),
    ("Smart TVs", 1_200.0, 12_000.0),
    ("Headphones", 50.0, 2_000.0),
    ("Smartwatches", 200.0, 3_000.0),
    ("Cameras", 500.0, 8_000.0),
    ("Accessories", 20.0, 500.0),
    ("Peripherals", 50.0, 1_000.0),
    ("PC Components", 100.0, 5_000.0),
];

const PRODUCT_PREFIXES: &[&str] = &[
    "Pro", "Ultra", "Max", "Plus", "Lite", "Premium", "Elite", "Smart", "Tech", "Advanced",
];

const PRODUCT_BRANDS: &[&str] = &[
    "TechPro", "SmartTech", "InnovatePro", "FutureTech", "NextGen", "EliteTech", "PrimeTech",
    "UltraTech", "MaxTech", "ProTech",
];

/// Payment status odds, in percent.
const PAYMENT_STATUS_WEIGHTS: &[(PaymentStatus, u32)] = &[
    (PaymentStatus::Approved, 70),
    (PaymentStatus::Pending, 10),
    (PaymentStatus::Declined, 5),
    (PaymentStatus::Processing, 10),
    (PaymentStatus::Refunded, 5),
];

/// Number of records of each kind in a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSizes {
    pub clients: usize,
    pub products: usize,
    pub orders: usize,
    pub payments: usize,
}

impl SeedSizes {
    /// Create sizes for each entity kind.
    pub fn new(clients: usize, products: usize, orders: usize, payments: usize) -> Self {
        Self {
            clients,
            products,
            orders,
            payments,
        }
    }

    /// A handful of records of each kind, for tests and smoke runs.
    pub fn tiny() -> Self {
        Self::new(10, 10, 20, 20)
    }
}

impl Default for SeedSizes {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENTS, DEFAULT_PRODUCTS, DEFAULT_ORDERS, DEFAULT_PAYMENTS)
    }
}

/// All generated entities of a run.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub clients: Vec<Client>,
    pub products: Vec<Product>,
    pub orders: Vec<Order>,
    pub payments: Vec<Payment>,
}

impl Dataset {
    /// Generate every entity kind with foreign references kept in range.
    pub fn generate(rng: &mut impl Rng, sizes: SeedSizes, now: DateTime<Utc>) -> Self {
        let clients = generate_clients(rng, sizes.clients, now);
        let products = generate_products(rng, sizes.products);
        let orders = generate_orders(rng, sizes.orders, sizes.clients, sizes.products, now);
        let payments = generate_payments(rng, sizes.payments, sizes.orders, now);

        Self {
            clients,
            products,
            orders,
            payments,
        }
    }

    /// Sizes of the generated sequences.
    pub fn sizes(&self) -> SeedSizes {
        SeedSizes::new(
            self.clients.len(),
            self.products.len(),
            self.orders.len(),
            self.payments.len(),
        )
    }
}

/// Truncate a monetary amount to whole cents.
fn truncate_cents(value: f64) -> f64 {
    (value * 100.0).trunc() / 100.0
}

/// Pick a random element of a non-empty pool.
fn pick<'a, T>(rng: &mut impl Rng, pool: &'a [T]) -> &'a T {
    &pool[rng.gen_range(0..pool.len())]
}

/// A random instant within the last `days` days.
fn random_past(rng: &mut impl Rng, now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    let offset = rng.gen_range(0..days * 86_400);
    now - Duration::seconds(offset)
}

/// Generate a CPF with valid check digits, formatted `XXX.XXX.XXX-XX`.
pub fn generate_cpf(rng: &mut impl Rng) -> String {
    let mut digits: Vec<u32> = (0..9).map(|_| rng.gen_range(0..10)).collect();
    digits.push(cpf_check_digit(&digits));
    digits.push(cpf_check_digit(&digits));

    let s: String = digits
        .iter()
        .filter_map(|d| char::from_digit(*d, 10))
        .collect();
    format!("{}.{}.{}-{}", &s[0..3], &s[3..6], &s[6..9], &s[9..11])
}

/// Mod-11 check digit over the given prefix.
fn cpf_check_digit(prefix: &[u32]) -> u32 {
    let weight_start = prefix.len() as u32 + 1;
    let sum: u32 = prefix
        .iter()
        .enumerate()
        .map(|(i, d)| d * (weight_start - i as u32))
        .sum();
    let digit = 11 - (sum % 11);
    if digit >= 10 {
        0
    } else {
        digit
    }
}

/// Generate a Brazilian mobile number: two-digit area code plus nine digits.
pub fn generate_phone(rng: &mut impl Rng) -> String {
    let area = rng.gen_range(11..100);
    let number = 900_000_000 + rng.gen_range(0..100_000_000);
    format!("{:02}{:09}", area, number)
}

/// Generate clients with ids `1..=count`.
pub fn generate_clients(rng: &mut impl Rng, count: usize, now: DateTime<Utc>) -> Vec<Client> {
    (0..count)
        .map(|i| {
            let id = i as i64 + 1;
            let first = pick(rng, FIRST_NAMES);
            let last = pick(rng, LAST_NAMES);
            let domain = pick(rng, EMAIL_DOMAINS);

            Client {
                id,
                name: format!("{} {}", first, last),
                // The id suffix keeps emails unique for the unique index.
                email: format!("{}.{}{}@{}", first, last, id, domain).to_lowercase(),
                phone: generate_phone(rng),
                created_at: random_past(rng, now, 365),
                cpf: generate_cpf(rng),
            }
        })
        .collect()
}

/// Generate products with ids `1..=count`.
pub fn generate_products(rng: &mut impl Rng, count: usize) -> Vec<Product> {
    (0..count)
        .map(|i| {
            let (category, min, max) = *pick(rng, CATEGORIES);
            let brand = pick(rng, PRODUCT_BRANDS);
            let prefix = pick(rng, PRODUCT_PREFIXES);
            let model = rng.gen_range(1_000..10_000);
            let price = truncate_cents(min + rng.gen::<f64>() * (max - min));

            Product {
                id: i as i64 + 1,
                name: format!("{} {} {} {}", brand, category, prefix, model),
                category: category.to_string(),
                price,
                stock: rng.gen_range(100..=1_000),
            }
        })
        .collect()
}

/// Generate line items over distinct products drawn from `1..=product_count`.
fn generate_order_items(rng: &mut impl Rng, product_count: usize) -> Vec<OrderItem> {
    let max_items = MAX_ITEMS_PER_ORDER.min(product_count);
    if max_items == 0 {
        return Vec::new();
    }
    let item_count = rng.gen_range(1..=max_items);

    sample(rng, product_count, item_count)
        .into_iter()
        .map(|index| OrderItem {
            product_id: index as i64 + 1,
            quantity: rng.gen_range(1..=5),
            unit_price: truncate_cents(100.0 + rng.gen::<f64>() * 900.0),
        })
        .collect()
}

/// Generate orders with ids `1..=count` referencing existing clients and products.
pub fn generate_orders(
    rng: &mut impl Rng,
    count: usize,
    client_count: usize,
    product_count: usize,
    now: DateTime<Utc>,
) -> Vec<Order> {
    (0..count)
        .map(|i| {
            let items = generate_order_items(rng, product_count);
            let total: f64 = items
                .iter()
                .map(|item| item.unit_price * f64::from(item.quantity))
                .sum();

            Order {
                id: i as i64 + 1,
                client_id: rng.gen_range(1..=client_count.max(1)) as i64,
                ordered_at: random_past(rng, now, 90),
                status: *pick(rng, OrderStatus::ALL),
                total_value: truncate_cents(total),
                items,
            }
        })
        .collect()
}

/// Weighted draw over [`PAYMENT_STATUS_WEIGHTS`].
fn generate_payment_status(rng: &mut impl Rng) -> PaymentStatus {
    let roll = rng.gen_range(0..100);
    let mut accumulated = 0;
    for (status, weight) in PAYMENT_STATUS_WEIGHTS {
        accumulated += weight;
        if roll < accumulated {
            return *status;
        }
    }
    PaymentStatus::Approved
}

/// Generate payments with ids `1..=count` referencing existing orders.
pub fn generate_payments(
    rng: &mut impl Rng,
    count: usize,
    order_count: usize,
    now: DateTime<Utc>,
) -> Vec<Payment> {
    (0..count)
        .map(|i| Payment {
            id: i as i64 + 1,
            order_id: rng.gen_range(1..=order_count.max(1)) as i64,
            payment_type: *pick(rng, PaymentType::ALL),
            status: generate_payment_status(rng),
            paid_at: random_past(rng, now, 30),
        })
        .collect()
}
