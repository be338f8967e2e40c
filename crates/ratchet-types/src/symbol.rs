//! Symbol and worker identifiers.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::TypesError;

/// A tradable symbol (e.g. `EURUSD`, `DXY`).
///
/// Symbols are normalized to upper case so registry rows and bar rows written
/// by different producers compare equal.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Into, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Creates a symbol, normalizing it to upper case.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is empty or contains whitespace.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, TypesError> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() || raw.chars().any(char::is_whitespace) {
            return Err(TypesError::InvalidSymbol(raw.to_string()));
        }
        Ok(Self(raw.to_uppercase()))
    }

    /// Returns the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of one worker process, recorded as the lease holder of the tasks
/// it claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(Uuid);

impl WorkerId {
    /// Generates a fresh random worker id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_normalizes_case() {
        let symbol = Symbol::new(" eurusd ").unwrap();
        assert_eq!(symbol.as_str(), "EURUSD");
        assert_eq!(symbol.to_string(), "EURUSD");
    }

    #[test]
    fn test_symbol_rejects_blank() {
        assert!(Symbol::new("").is_err());
        assert!(Symbol::new("EUR USD").is_err());
        assert!("   ".parse::<Symbol>().is_err());
    }

    #[test]
    fn test_worker_ids_are_unique() {
        assert_ne!(WorkerId::new(), WorkerId::new());
    }
}
