//! Domain Value Objects with NewType pattern for type safety
//!
//! Every row kind in the store gets its own identifier type so a `FarmId`
//! can never be handed to a function expecting an `AnimalId`:
//!
//! ```rust,ignore
//! let farm = FarmId::new();
//! let animal = AnimalId::new();
//! // sell_animal(animal, user) ✓ OK
//! // sell_animal(farm, user)   ✗ Compile error!
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| ValidationError::Invalid {
                        field: stringify!($name),
                        reason: "not a valid UUID",
                    })
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Identity of a registered player.
    UserId
);
uuid_id!(
    /// Identity of a farm. Farms never change owner.
    FarmId
);
uuid_id!(
    /// Identity of a living animal.
    AnimalId
);
uuid_id!(
    /// Identity of a `(farm, product kind)` stock row.
    ProductId
);

// ============================================================================
// FarmName - display name of a farm
// ============================================================================

/// Name of a farm.
///
/// # Validation
/// - Must not be blank after trimming
/// - Maximum length: 100 characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FarmName(String);

impl FarmName {
    const MAX_LENGTH: usize = 100;

    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::Empty("FarmName"));
        }
        if name.chars().count() > Self::MAX_LENGTH {
            return Err(ValidationError::TooLong {
                field: "FarmName",
                max: Self::MAX_LENGTH,
                actual: name.chars().count(),
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Name given to the farm created at registration and by an account reset.
pub const DEFAULT_FARM_NAME: &str = "My Farm";

impl Default for FarmName {
    fn default() -> Self {
        Self(DEFAULT_FARM_NAME.to_string())
    }
}

impl fmt::Display for FarmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Username - unique login handle
// ============================================================================

/// Unique login handle of a user.
///
/// # Validation
/// - Must not be empty
/// - Maximum length: 50 characters
/// - No whitespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    const MAX_LENGTH: usize = 50;

    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::Empty("Username"));
        }
        if name.len() > Self::MAX_LENGTH {
            return Err(ValidationError::TooLong {
                field: "Username",
                max: Self::MAX_LENGTH,
                actual: name.len(),
            });
        }
        if let Some(character) = name.chars().find(|c| c.is_whitespace()) {
            return Err(ValidationError::InvalidCharacter {
                field: "Username",
                character,
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Validation Errors
// ============================================================================

/// Validation errors for domain value objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Field is empty but must not be.
    Empty(&'static str),

    /// Field exceeds maximum length.
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    /// Field contains invalid character.
    InvalidCharacter {
        field: &'static str,
        character: char,
    },

    /// Field value is invalid for specified reason.
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Empty(field) => write!(f, "{} cannot be empty", field),
            ValidationError::TooLong { field, max, actual } => {
                write!(f, "{} too long (max: {}, actual: {})", field, max, actual)
            }
            ValidationError::InvalidCharacter { field, character } => {
                write!(f, "{} contains invalid character: '{}'", field, character)
            }
            ValidationError::Invalid { field, reason } => {
                write!(f, "{} is invalid: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ValidationError {}
