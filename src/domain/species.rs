//! Species lookup table.
//!
//! Everything that varies by species (product kind, lifespan, market price,
//! default production cadence) lives in [`SPECIES_TABLE`] so the mapping has
//! exactly one source.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Animals a farm can keep.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum Species {
    Cow,
    Sheep,
    Chicken,
}

/// Goods produced by animals.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum ProductKind {
    Milk,
    Wool,
    Egg,
}

/// Fixed per-species parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeciesProfile {
    pub species: Species,
    pub product: ProductKind,
    /// Lifespan measured in simulated years.
    pub lifespan_years: u32,
    pub base_price: Decimal,
    pub default_production_interval_secs: u32,
}

pub static SPECIES_TABLE: [SpeciesProfile; 3] = [
    SpeciesProfile {
        species: Species::Cow,
        product: ProductKind::Milk,
        lifespan_years: 20,
        base_price: dec!(400),
        default_production_interval_secs: 15,
    },
    SpeciesProfile {
        species: Species::Sheep,
        product: ProductKind::Wool,
        lifespan_years: 15,
        base_price: dec!(200),
        default_production_interval_secs: 20,
    },
    SpeciesProfile {
        species: Species::Chicken,
        product: ProductKind::Egg,
        lifespan_years: 10,
        base_price: dec!(50),
        default_production_interval_secs: 10,
    },
];

/// Wall-clock seconds in one simulated year.
pub const DEFAULT_SECONDS_PER_SIM_YEAR: u32 = 30;

impl Species {
    pub fn profile(self) -> &'static SpeciesProfile {
        // SPECIES_TABLE holds exactly one row per variant, in declaration order.
        &SPECIES_TABLE[self as usize]
    }

    pub fn product(self) -> ProductKind {
        self.profile().product
    }

    pub fn base_price(self) -> Decimal {
        self.profile().base_price
    }

    pub fn default_production_interval_secs(self) -> u32 {
        self.profile().default_production_interval_secs
    }

    /// Lifespan in wall-clock seconds for the given year length.
    pub fn lifespan_secs(self, seconds_per_year: u32) -> i64 {
        i64::from(self.profile().lifespan_years) * i64::from(seconds_per_year)
    }

    pub fn all() -> impl Iterator<Item = Species> {
        Species::iter()
    }
}
