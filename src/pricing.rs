//! Market prices for produced goods.

use crate::domain::ProductKind;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

/// Price returned for a kind the table has no entry for.
pub const FALLBACK_PRICE: Decimal = dec!(1.0);

/// Source of current unit prices, consulted once per production event.
pub trait PriceSource: Send + Sync {
    fn price(&self, kind: ProductKind) -> Decimal;
}

/// Static in-memory price table with a fallback for unknown kinds.
#[derive(Debug)]
pub struct PricingTable {
    prices: RwLock<HashMap<ProductKind, Decimal>>,
}

impl PricingTable {
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_prices(prices: impl IntoIterator<Item = (ProductKind, Decimal)>) -> Self {
        Self {
            prices: RwLock::new(prices.into_iter().collect()),
        }
    }

    pub fn set_price(&self, kind: ProductKind, price: Decimal) {
        self.prices.write().insert(kind, price);
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_prices([
            (ProductKind::Milk, dec!(15.0)),
            (ProductKind::Egg, dec!(2.5)),
            (ProductKind::Wool, dec!(50.0)),
        ])
    }
}

impl PriceSource for PricingTable {
    fn price(&self, kind: ProductKind) -> Decimal {
        self.prices
            .read()
            .get(&kind)
            .copied()
            .unwrap_or(FALLBACK_PRICE)
    }
}
