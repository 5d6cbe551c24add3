//! Key value comparers.
//!
//! Each property carries two comparers: a general-purpose one used for
//! change detection, and a key comparer used whenever the property takes
//! part in identity map lookups. They differ for byte arrays (identity
//! versus content) and for reference-like structured types.
//!
//! Composite keys compare with a [`KeyComparer`]: the conjunction of the
//! per-column comparers, hashing by combining the per-column hashes.

use crate::error::{TrackError, TrackResult};
use crate::value::{EqualitySemantics, Value, ValueType};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Equality and hash strategy for values of one property type.
///
/// Implementations must treat two nulls as equal and a null as unequal to
/// any non-null value, and must keep `equals(a, b) => hash_code(a) == hash_code(b)`.
pub trait ValueComparer: fmt::Debug + Send + Sync {
    /// The value type this comparer handles.
    fn value_type(&self) -> &ValueType;

    /// Returns true if both values are equal.
    fn equals(&self, a: &Value, b: &Value) -> bool;

    /// Returns the hash of a value.
    fn hash_code(&self, value: &Value) -> u64;
}

/// Whether a comparer serves change detection or key lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparerRole {
    /// Change detection.
    General,
    /// Identity map lookups.
    Key,
}

/// The comparer chosen for a property when none is configured.
#[derive(Debug, Clone)]
pub struct DefaultValueComparer {
    value_type: ValueType,
    role: ComparerRole,
}

impl DefaultValueComparer {
    /// Creates a default comparer for a type and role.
    pub fn new(value_type: ValueType, role: ComparerRole) -> Self {
        Self { value_type, role }
    }

    /// Creates the general-purpose comparer for a type.
    pub fn general(value_type: ValueType) -> Self {
        Self::new(value_type, ComparerRole::General)
    }

    /// Creates the key comparer for a type.
    pub fn key(value_type: ValueType) -> Self {
        Self::new(value_type, ComparerRole::Key)
    }

    /// Returns the role of this comparer.
    pub fn role(&self) -> ComparerRole {
        self.role
    }

    fn semantics(&self) -> EqualitySemantics {
        match &self.value_type {
            ValueType::Structured { equality, .. } => *equality,
            _ => EqualitySemantics::Fields,
        }
    }
}

impl ValueComparer for DefaultValueComparer {
    fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    fn equals(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Bytes(x), Value::Bytes(y)) => match self.role {
                ComparerRole::General => Arc::ptr_eq(x, y),
                ComparerRole::Key => x == y,
            },
            (Value::Structured(x), Value::Structured(y)) => match (self.semantics(), self.role) {
                (EqualitySemantics::Custom, _) | (EqualitySemantics::Identity, ComparerRole::Key) => {
                    x.equals(&**y)
                }
                (EqualitySemantics::Fields, _) => {
                    x.type_name() == y.type_name() && x.fields() == y.fields()
                }
                (EqualitySemantics::Identity, ComparerRole::General) => {
                    std::ptr::addr_eq(Arc::as_ptr(x), Arc::as_ptr(y))
                }
            },
            _ => a == b,
        }
    }

    fn hash_code(&self, value: &Value) -> u64 {
        match value {
            Value::Null => 0,
            Value::Bytes(bytes) if self.role == ComparerRole::General => {
                bytes.as_ptr() as usize as u64
            }
            Value::Structured(v) => match (self.semantics(), self.role) {
                (EqualitySemantics::Custom, _) | (EqualitySemantics::Identity, ComparerRole::Key) => {
                    v.hash_code()
                }
                (EqualitySemantics::Fields, _) => hash_value(value),
                (EqualitySemantics::Identity, ComparerRole::General) => {
                    Arc::as_ptr(v) as *const () as usize as u64
                }
            },
            _ => hash_value(value),
        }
    }
}

/// A comparer built from caller-supplied functions.
///
/// Null handling is applied before the functions are called, so they only
/// ever see non-null values.
#[derive(Clone)]
pub struct CustomValueComparer {
    value_type: ValueType,
    equals: Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>,
    hash: Arc<dyn Fn(&Value) -> u64 + Send + Sync>,
}

impl CustomValueComparer {
    /// Creates a comparer for `value_type` from an equality and a hash function.
    pub fn new<E, H>(value_type: ValueType, equals: E, hash: H) -> Self
    where
        E: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
        H: Fn(&Value) -> u64 + Send + Sync + 'static,
    {
        Self {
            value_type,
            equals: Arc::new(equals),
            hash: Arc::new(hash),
        }
    }
}

impl fmt::Debug for CustomValueComparer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomValueComparer")
            .field("value_type", &self.value_type)
            .finish_non_exhaustive()
    }
}

impl ValueComparer for CustomValueComparer {
    fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    fn equals(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            _ => (self.equals)(a, b),
        }
    }

    fn hash_code(&self, value: &Value) -> u64 {
        if value.is_null() {
            0
        } else {
            (self.hash)(value)
        }
    }
}

/// Comparer for ordered key value tuples.
#[derive(Debug, Clone)]
pub struct KeyComparer {
    parts: Vec<Arc<dyn ValueComparer>>,
}

impl KeyComparer {
    /// Creates a composite comparer from per-column comparers.
    pub fn new(parts: Vec<Arc<dyn ValueComparer>>) -> Self {
        Self { parts }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Returns true if the comparer has no columns.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Returns true if every column is equal.
    pub fn equals(&self, a: &[Value], b: &[Value]) -> bool {
        a.len() == self.parts.len()
            && b.len() == self.parts.len()
            && self
                .parts
                .iter()
                .zip(a.iter().zip(b))
                .all(|(comparer, (x, y))| comparer.equals(x, y))
    }

    /// Combines the per-column hashes.
    pub fn hash(&self, values: &[Value]) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (comparer, value) in self.parts.iter().zip(values) {
            comparer.hash_code(value).hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Verifies that a configured comparer handles the property's type.
pub(crate) fn check_comparer(
    comparer: &dyn ValueComparer,
    declaring_type: &str,
    property: &str,
    property_type: &ValueType,
) -> TrackResult<()> {
    if comparer.value_type().name() == property_type.name() {
        Ok(())
    } else {
        Err(TrackError::ComparerTypeMismatch {
            comparer_type: comparer.value_type().name().to_string(),
            declaring_type: declaring_type.to_string(),
            property: property.to_string(),
            property_type: property_type.name().to_string(),
        })
    }
}

fn hash_value(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
