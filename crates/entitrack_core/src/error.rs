//! Error types for entitrack core.

use crate::object::EntityHandle;
use thiserror::Error;

/// Result type for tracking operations.
pub type TrackResult<T> = Result<T, TrackError>;

/// Errors that can occur while tracking entities.
///
/// Every variant is a deterministic usage error caused by caller input;
/// none of them is transient and none is retried.
#[derive(Debug, Error)]
pub enum TrackError {
    /// Two tracked entries would share one key value.
    #[error("{}", identity_conflict_message(.entity_type, .key_properties, .key_values))]
    IdentityConflict {
        /// Display name of the entity type.
        entity_type: String,
        /// Key property names.
        key_properties: Vec<String>,
        /// Key values, present only when sensitive data logging is enabled.
        key_values: Option<Vec<String>>,
    },

    /// Supplied value count does not match the property or key arity.
    #[error("{}", count_mismatch_message(.entity_type, .expected, .actual))]
    KeyValueCountMismatch {
        /// Entity type, when the lookup targeted its primary key directly.
        entity_type: Option<String>,
        /// Number of values the properties require.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// A supplied key value has the wrong type for its property.
    #[error(
        "the key value at property '{property}' of entity type '{declaring_type}' is of type \
         '{actual}' which does not match the property type of '{expected}'"
    )]
    KeyTypeMismatch {
        /// Property name.
        property: String,
        /// Declaring entity type.
        declaring_type: String,
        /// Declared property type.
        expected: String,
        /// Supplied value type.
        actual: String,
    },

    /// A typed accessor was used with a value of another type.
    #[error(
        "property '{property}' on entity type '{declaring_type}' is of type '{expected}', \
         but a value of type '{actual}' was used"
    )]
    WrongGenericPropertyType {
        /// Property name.
        property: String,
        /// Declaring entity type.
        declaring_type: String,
        /// Declared property type.
        expected: String,
        /// Supplied value type.
        actual: String,
    },

    /// A property, navigation or complex property name does not exist.
    #[error("the {member_kind} '{name}' was not found on entity type '{declaring_type}'")]
    UnknownMember {
        /// Kind of member looked up.
        member_kind: MemberKind,
        /// Requested name.
        name: String,
        /// Entity type searched.
        declaring_type: String,
    },

    /// A custom comparer was configured for a property of another type.
    #[error(
        "the comparer for type '{comparer_type}' cannot be used for '{declaring_type}.{property}' \
         because its type is '{property_type}'"
    )]
    ComparerTypeMismatch {
        /// Type handled by the comparer.
        comparer_type: String,
        /// Declaring entity type.
        declaring_type: String,
        /// Property name.
        property: String,
        /// Declared property type.
        property_type: String,
    },

    /// A primary key property is null and no value can be generated.
    #[error(
        "unable to track an entity of type '{entity_type}' because its primary key property \
         '{property}' is null"
    )]
    NullKeyValue {
        /// Entity type.
        entity_type: String,
        /// Key property that is null.
        property: String,
    },

    /// A temporary key value would outlive the Added state.
    #[error(
        "the property '{entity_type}.{property}' has a temporary value while attempting to \
         change the entity's state to '{state}'"
    )]
    TemporaryValuePersists {
        /// Entity type.
        entity_type: String,
        /// Property holding the temporary value.
        property: String,
        /// Requested target state.
        state: String,
    },

    /// A handle does not refer to an instance of this context.
    #[error("no entity instance with handle {handle} exists in this context")]
    UnknownEntity {
        /// The unknown handle.
        handle: EntityHandle,
    },

    /// The metadata model is inconsistent.
    #[error("invalid model: {message}")]
    InvalidModel {
        /// Description of the inconsistency.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The persistence sink failed.
    #[error("persistence failed: {message}")]
    Persistence {
        /// Message reported by the sink.
        message: String,
    },

    /// The context has been disposed.
    #[error("the context has been disposed and can no longer be used")]
    ContextDisposed,
}

/// Kind of member named in an [`TrackError::UnknownMember`] error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// An entity type looked up by name on the model.
    EntityType,
    /// A scalar property.
    Property,
    /// A reference, collection or skip navigation.
    Navigation,
    /// A complex property.
    ComplexProperty,
    /// Any member kind.
    Member,
}

impl std::fmt::Display for MemberKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MemberKind::EntityType => "entity type",
            MemberKind::Property => "property",
            MemberKind::Navigation => "navigation",
            MemberKind::ComplexProperty => "complex property",
            MemberKind::Member => "member",
        };
        f.write_str(name)
    }
}

fn identity_conflict_message(
    entity_type: &str,
    key_properties: &[String],
    key_values: &Option<Vec<String>>,
) -> String {
    let key = match key_values {
        Some(values) => {
            let pairs: Vec<String> = key_properties
                .iter()
                .zip(values)
                .map(|(p, v)| format!("{p}: {v}"))
                .collect();
            format!("the key value '{{{}}}'", pairs.join(", "))
        }
        None => {
            let names: Vec<String> = key_properties.iter().map(|p| format!("'{p}'")).collect();
            format!("the same key value for {{{}}}", names.join(", "))
        }
    };
    format!(
        "the instance of entity type '{entity_type}' cannot be tracked because another instance \
         with {key} is already being tracked"
    )
}

fn count_mismatch_message(entity_type: &Option<String>, expected: &usize, actual: &usize) -> String {
    match entity_type {
        Some(entity_type) => format!(
            "entity type '{entity_type}' is defined with a {expected}-part composite key, \
             but {actual} values were passed"
        ),
        None => format!(
            "{actual} values were passed, but {expected} properties are being searched for; \
             the number of values and properties must match"
        ),
    }
}

impl TrackError {
    /// Creates an invalid model error.
    pub fn invalid_model(message: impl Into<String>) -> Self {
        Self::InvalidModel {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Creates an unknown member error.
    pub fn unknown_member(
        member_kind: MemberKind,
        name: impl Into<String>,
        declaring_type: impl Into<String>,
    ) -> Self {
        Self::UnknownMember {
            member_kind,
            name: name.into(),
            declaring_type: declaring_type.into(),
        }
    }

    /// Creates a count mismatch error for a list of properties.
    pub fn count_mismatch(expected: usize, actual: usize) -> Self {
        Self::KeyValueCountMismatch {
            entity_type: None,
            expected,
            actual,
        }
    }

    /// Returns true if this error is an identity conflict.
    pub fn is_identity_conflict(&self) -> bool {
        matches!(self, Self::IdentityConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_mismatch_reports_both_counts() {
        let err = TrackError::count_mismatch(3, 1);
        let message = err.to_string();
        assert!(message.contains('1'));
        assert!(message.contains('3'));
    }

    #[test]
    fn composite_key_count_mismatch_names_entity_type() {
        let err = TrackError::KeyValueCountMismatch {
            entity_type: Some("CompositeKey".into()),
            expected: 3,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "entity type 'CompositeKey' is defined with a 3-part composite key, but 1 values were passed"
        );
    }

    #[test]
    fn wrong_generic_type_message_has_all_parts() {
        let err = TrackError::WrongGenericPropertyType {
            property: "Id".into(),
            declaring_type: "IntKey".into(),
            expected: "int".into(),
            actual: "string".into(),
        };
        let message = err.to_string();
        for part in ["Id", "IntKey", "int", "string"] {
            assert!(message.contains(part), "missing {part}");
        }
    }

    #[test]
    fn unknown_member_display() {
        let err = TrackError::unknown_member(MemberKind::Navigation, "Widgets", "Category");
        assert_eq!(
            err.to_string(),
            "the navigation 'Widgets' was not found on entity type 'Category'"
        );
    }

    #[test]
    fn identity_conflict_is_detected() {
        let err = TrackError::IdentityConflict {
            entity_type: "Product".into(),
            key_properties: vec!["Id".into()],
            key_values: Some(vec!["1".into()]),
        };
        assert!(err.is_identity_conflict());
        assert!(err.to_string().contains("'{Id: 1}'"));

        let redacted = TrackError::IdentityConflict {
            entity_type: "OrderDetails".into(),
            key_properties: vec!["OrderId".into(), "ProductId".into()],
            key_values: None,
        };
        assert!(redacted
            .to_string()
            .contains("the same key value for {'OrderId', 'ProductId'}"));
    }
}
