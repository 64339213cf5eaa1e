//! Identifiers for services, contracts and owned data
//!
//! All identifiers are plain string newtypes: ordered (so every map in the
//! model iterates deterministically), hashable, and serialized transparently.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create identifier from any string-like value
            #[inline]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow as `&str`
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Unique name of a deployable service (e.g. `user-service`)
    ServiceName
);

string_id!(
    /// Identifier of a contract (an operation or schema unit, e.g. `UserProfile`)
    ContractId
);

string_id!(
    /// A datum some service is the source of truth for (e.g. `accountBalance`)
    Datum
);

/// Reference to one field of one contract, written `Contract.field`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    /// Contract the field belongs to
    pub contract: ContractId,
    /// Field name within the contract
    pub field: String,
}

impl FieldRef {
    /// Create a field reference
    #[inline]
    #[must_use]
    pub fn new(contract: impl Into<ContractId>, field: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.contract, self.field)
    }
}

/// Error parsing a [`FieldRef`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid field reference '{0}': expected 'Contract.field'")]
pub struct FieldRefParseError(pub String);

impl FromStr for FieldRef {
    type Err = FieldRefParseError;

    /// Splits on the last `.` so contract ids may themselves be dotted
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (contract, field) = s
            .rsplit_once('.')
            .ok_or_else(|| FieldRefParseError(s.to_string()))?;
        if contract.trim().is_empty() || field.trim().is_empty() {
            return Err(FieldRefParseError(s.to_string()));
        }
        Ok(Self::new(contract.trim(), field.trim()))
    }
}
