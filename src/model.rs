use crate::domain::{AnimalId, FarmId, FarmName, ProductId, ProductKind, Species, UserId, Username};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Fraction of the purchase price paid back when an animal is sold.
pub const SELL_PRICE_RATIO: Decimal = dec!(0.8);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: Username,
    pub email: String,
    pub balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Farm {
    pub id: FarmId,
    pub name: FarmName,
    pub owner_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Animal {
    pub id: AnimalId,
    pub farm_id: FarmId,
    pub species: Species,
    pub name: String,
    pub birth_time: DateTime<Utc>,
    pub lifespan_seconds: i64,
    pub production_interval_seconds: u32,
    pub next_production_time: Option<DateTime<Utc>>,
    pub purchase_price: Decimal,
    pub sell_price: Decimal,
}

impl Animal {
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.birth_time
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.age_at(now).num_seconds() >= self.lifespan_seconds
    }

    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        self.next_production_time.is_some_and(|next| next <= now)
    }

    pub fn production_interval(&self) -> Duration {
        Duration::seconds(i64::from(self.production_interval_seconds))
    }
}

/// Sellable stock of one product kind on one farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub farm_id: FarmId,
    pub product_kind: ProductKind,
    pub quantity: u32,
    pub unit_sale_price: Decimal,
    pub produced_at: DateTime<Utc>,
}

impl Product {
    pub fn stock_value(&self) -> Decimal {
        self.unit_sale_price * Decimal::from(self.quantity)
    }
}

/// Parameters of a purchase. Price and interval fall back to the species table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyAnimalRequest {
    pub species: Species,
    pub name: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub production_interval_seconds: Option<u32>,
}

impl BuyAnimalRequest {
    pub fn new(species: Species, name: impl Into<String>) -> Self {
        Self {
            species,
            name: name.into(),
            price: None,
            production_interval_seconds: None,
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_interval(mut self, seconds: u32) -> Self {
        self.production_interval_seconds = Some(seconds);
        self
    }

    pub fn resolved_price(&self) -> Decimal {
        self.price.unwrap_or_else(|| self.species.base_price())
    }

    pub fn resolved_interval(&self) -> u32 {
        self.production_interval_seconds
            .unwrap_or_else(|| self.species.default_production_interval_secs())
    }
}

/// Outcome of a partial or full stock sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSale {
    pub product_id: ProductId,
    pub farm_id: FarmId,
    pub product_kind: ProductKind,
    pub quantity_sold: u32,
    pub unit_sale_price: Decimal,
    pub proceeds: Decimal,
    /// Stock left after the sale; zero means the row was removed.
    pub remaining_quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimalSale {
    pub animal: Animal,
    pub proceeds: Decimal,
    pub balance_after: Decimal,
}

/// What an account reset removed and the farm it left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountReset {
    pub user: User,
    pub farm: Farm,
    pub removed_farms: usize,
    pub removed_animals: usize,
    pub removed_products: usize,
}
