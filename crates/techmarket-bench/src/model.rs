//! Entity types shared by every backend.
//!
//! Identifiers are assigned by the generators as `1..=n`, so a foreign
//! reference means the same record in every store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::Error;

/// Registered customer.
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
    pub cpf: String,
}

/// Catalog product.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub stock: i32,
}

/// Customer order with its line items.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub client_id: i64,
    pub ordered_at: DateTime<Utc>,
    pub status: OrderStatus,
    pub total_value: f64,
    pub items: Vec<OrderItem>,
}

/// One product line of an order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub product_id: i64,
    pub quantity: i32,
    pub unit_price: f64,
}

/// Payment attached to an order.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub paid_at: DateTime<Utc>,
}

/// Declares a C-like enum with a stable storage string per variant.
macro_rules! stored_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The value written to the stores.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::Decode(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

stored_enum! {
    /// Order lifecycle status.
    OrderStatus {
        Processing => "processing",
        AwaitingPayment => "awaiting_payment",
        Paid => "paid",
        Picking => "picking",
        InTransit => "in_transit",
        Delivered => "delivered",
        Cancelled => "cancelled",
    }
}

stored_enum! {
    /// Payment method.
    PaymentType {
        Pix => "pix",
        CreditCard => "credit_card",
        DebitCard => "debit_card",
        Boleto => "boleto",
        BankTransfer => "bank_transfer",
    }
}

stored_enum! {
    /// Payment settlement status.
    PaymentStatus {
        Approved => "approved",
        Pending => "pending",
        Declined => "declined",
        Processing => "processing",
        Refunded => "refunded",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), *status);
        }
        assert_eq!(PaymentType::Pix.to_string(), "pix");
        assert_eq!(
            "refunded".parse::<PaymentStatus>().unwrap(),
            PaymentStatus::Refunded
        );
    }

    #[test]
    fn test_unknown_value_is_decode_error() {
        let err = "shipped".parse::<OrderStatus>().unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.to_string().contains("OrderStatus"));
        assert!(err.to_string().contains("shipped"));
    }
}
