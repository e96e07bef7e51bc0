//! Domain primitives shared by the store, the ledger and the schedulers.
//!
//! - [`value_objects`]: identifier newtypes and validated names
//! - [`species`]: the species lookup table (product kind, lifespan, prices)

pub mod species;
pub mod value_objects;

pub use species::{ProductKind, SPECIES_TABLE, Species, SpeciesProfile};
pub use value_objects::{
    AnimalId, DEFAULT_FARM_NAME, FarmId, FarmName, ProductId, UserId, Username, ValidationError,
};
