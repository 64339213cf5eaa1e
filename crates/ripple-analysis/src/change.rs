//! Change requests
//!
//! A [`ChangeRequest`] is a list of field-level deltas against contracts plus
//! the intent the requester declared. The declared intent is only ever
//! compared against the computed compatibility class; it is never trusted.

use crate::error::ChangeDocumentError;
use ripple_model::{ContractId, Datum, FieldRef, FieldType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the requester claims the change is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredIntent {
    /// Claimed backwards compatible
    Additive,
    /// Claimed breaking
    Breaking,
    /// No claim
    #[default]
    Unknown,
}

/// Field-level operation
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaOp {
    /// Introduce a new field
    Add {
        /// Field type
        ty: FieldType,
        /// Whether the field is required
        required: bool,
        /// Default used when absent
        default: Option<serde_json::Value>,
        /// Datum carried by the new field
        datum: Option<Datum>,
    },
    /// Drop an existing field
    Remove,
    /// Change attributes of an existing field; `None` leaves it unchanged
    Modify {
        /// New type
        ty: Option<FieldType>,
        /// New requiredness
        required: Option<bool>,
        /// New deprecation flag
        deprecated: Option<bool>,
    },
}

impl DeltaOp {
    /// Operation keyword
    #[must_use]
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Remove => "remove",
            Self::Modify { .. } => "modify",
        }
    }
}

/// One change to one contract field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDelta {
    /// Field being changed
    pub target: FieldRef,
    /// Operation
    pub op: DeltaOp,
}

impl FieldDelta {
    /// Create delta
    #[inline]
    #[must_use]
    pub fn new(target: FieldRef, op: DeltaOp) -> Self {
        Self { target, op }
    }

    /// Add an optional field without default
    #[must_use]
    pub fn add(target: FieldRef, ty: FieldType) -> Self {
        Self::new(
            target,
            DeltaOp::Add {
                ty,
                required: false,
                default: None,
                datum: None,
            },
        )
    }

    /// Remove a field
    #[must_use]
    pub fn remove(target: FieldRef) -> Self {
        Self::new(target, DeltaOp::Remove)
    }

    /// Modify a field (no attribute changed yet)
    #[must_use]
    pub fn modify(target: FieldRef) -> Self {
        Self::new(
            target,
            DeltaOp::Modify {
                ty: None,
                required: None,
                deprecated: None,
            },
        )
    }

    /// Make the added/modified field required
    #[must_use]
    pub fn required(mut self) -> Self {
        match &mut self.op {
            DeltaOp::Add { required, .. } => *required = true,
            DeltaOp::Modify { required, .. } => *required = Some(true),
            DeltaOp::Remove => {}
        }
        self
    }

    /// Make the modified field optional
    #[must_use]
    pub fn optional(mut self) -> Self {
        match &mut self.op {
            DeltaOp::Add { required, .. } => *required = false,
            DeltaOp::Modify { required, .. } => *required = Some(false),
            DeltaOp::Remove => {}
        }
        self
    }

    /// Give the added field a default
    #[must_use]
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        if let DeltaOp::Add { default, .. } = &mut self.op {
            *default = Some(value);
        }
        self
    }

    /// Tag the added field with a datum
    #[must_use]
    pub fn with_datum(mut self, value: impl Into<Datum>) -> Self {
        if let DeltaOp::Add { datum, .. } = &mut self.op {
            *datum = Some(value.into());
        }
        self
    }

    /// Change the modified field's type
    #[must_use]
    pub fn with_type(mut self, value: FieldType) -> Self {
        if let DeltaOp::Modify { ty, .. } = &mut self.op {
            *ty = Some(value);
        }
        self
    }

    /// Deprecate (or un-deprecate) the modified field
    #[must_use]
    pub fn set_deprecated(mut self, value: bool) -> Self {
        if let DeltaOp::Modify { deprecated, .. } = &mut self.op {
            *deprecated = Some(value);
        }
        self
    }

    /// Contract targeted by the delta
    #[inline]
    #[must_use]
    pub fn contract(&self) -> &ContractId {
        &self.target.contract
    }
}

impl fmt::Display for FieldDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.keyword(), self.target)
    }
}

/// A proposed change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeRequest {
    /// Field deltas, in request order
    pub deltas: Vec<FieldDelta>,
    /// Declared intent (refined by classification, never trusted)
    pub intent: DeclaredIntent,
}

impl ChangeRequest {
    /// Empty request with a declared intent
    #[inline]
    #[must_use]
    pub fn new(intent: DeclaredIntent) -> Self {
        Self {
            deltas: Vec::new(),
            intent,
        }
    }

    /// Append a delta
    #[inline]
    #[must_use]
    pub fn with_delta(mut self, delta: FieldDelta) -> Self {
        self.deltas.push(delta);
        self
    }

    /// Whether the request has no deltas
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// Operation keyword in a change document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    /// Add a field
    Add,
    /// Remove a field
    Remove,
    /// Modify a field
    Modify,
}

/// One delta as written in a change document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaDescriptor {
    /// Contract identifier
    pub contract: ContractId,
    /// Field name
    pub field: String,
    /// Operation
    pub op: DeltaKind,
    /// New type (required for `add`)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<FieldType>,
    /// New requiredness
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    /// New deprecation flag (`modify` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<bool>,
    /// Default value (`add` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Datum carried (`add` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datum: Option<Datum>,
}

impl TryFrom<DeltaDescriptor> for FieldDelta {
    type Error = ChangeDocumentError;

    fn try_from(d: DeltaDescriptor) -> Result<Self, Self::Error> {
        let target = FieldRef::new(d.contract, d.field);
        let op = match d.op {
            DeltaKind::Add => DeltaOp::Add {
                ty: d.ty.ok_or_else(|| ChangeDocumentError::MissingType(target.clone()))?,
                required: d.required.unwrap_or(false),
                default: d.default,
                datum: d.datum,
            },
            DeltaKind::Remove => DeltaOp::Remove,
            DeltaKind::Modify => DeltaOp::Modify {
                ty: d.ty,
                required: d.required,
                deprecated: d.deprecated,
            },
        };
        Ok(Self { target, op })
    }
}

/// Serialized change request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeDocument {
    /// Declared intent
    #[serde(default)]
    pub intent: DeclaredIntent,
    /// Deltas
    #[serde(default)]
    pub deltas: Vec<DeltaDescriptor>,
}

impl ChangeDocument {
    /// Parse from JSON
    ///
    /// # Errors
    /// [`ChangeDocumentError::Json`] on malformed input
    pub fn from_json_str(input: &str) -> Result<Self, ChangeDocumentError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Parse from YAML
    ///
    /// # Errors
    /// [`ChangeDocumentError::Yaml`] on malformed input
    pub fn from_yaml_str(input: &str) -> Result<Self, ChangeDocumentError> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// Convert into a [`ChangeRequest`]
    ///
    /// # Errors
    /// [`ChangeDocumentError::MissingType`] for an `add` without a type
    pub fn into_request(self) -> Result<ChangeRequest, ChangeDocumentError> {
        let deltas = self
            .deltas
            .into_iter()
            .map(FieldDelta::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ChangeRequest {
            deltas,
            intent: self.intent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(s: &str) -> FieldRef {
        s.parse().unwrap()
    }

    #[test]
    fn builder_sets_add_attributes() {
        let delta = FieldDelta::add(field("UserProfile.loyaltyTier"), FieldType::String)
            .required()
            .with_default(serde_json::json!("bronze"));
        match delta.op {
            DeltaOp::Add { required, default, .. } => {
                assert!(required);
                assert_eq!(default, Some(serde_json::json!("bronze")));
            }
            other => panic!("unexpected op {other:?}"),
        }
        assert_eq!(delta.target.to_string(), "UserProfile.loyaltyTier");
    }

    #[test]
    fn builder_ignores_attributes_that_do_not_apply() {
        let delta = FieldDelta::remove(field("UserProfile.roles"))
            .required()
            .with_type(FieldType::Integer);
        assert_eq!(delta.op, DeltaOp::Remove);
    }

    #[test]
    fn yaml_change_document_converts() {
        let yaml = r#"
intent: additive
deltas:
  - { contract: UserProfile, field: loyaltyTier, op: add, type: string, required: true }
  - { contract: UserProfile, field: roles, op: modify, deprecated: true }
  - { contract: Inventory, field: sku, op: remove }
"#;
        let request = ChangeDocument::from_yaml_str(yaml).unwrap().into_request().unwrap();
        assert_eq!(request.intent, DeclaredIntent::Additive);
        assert_eq!(request.deltas.len(), 3);
        assert_eq!(request.deltas[2].to_string(), "remove Inventory.sku");
        assert!(matches!(
            request.deltas[1].op,
            DeltaOp::Modify { deprecated: Some(true), ty: None, required: None }
        ));
    }

    #[test]
    fn add_without_type_is_rejected() {
        let json = r#"{"deltas": [{"contract": "UserProfile", "field": "tier", "op": "add"}]}"#;
        let err = ChangeDocument::from_json_str(json).unwrap().into_request().unwrap_err();
        assert!(matches!(err, ChangeDocumentError::MissingType(_)));
    }
}
