//! Property values and their declared types.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// How values of a structured type are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EqualitySemantics {
    /// The type supplies its own equality and hash
    /// ([`StructuredValue::equals`] and [`StructuredValue::hash_code`]).
    Custom,
    /// Value-like: compared field by field.
    Fields,
    /// Reference-like: compared by instance identity.
    Identity,
}

/// A user-defined structured value stored in a property.
///
/// Implementations expose their fields so that value-like types can be
/// compared structurally, and may override [`equals`](Self::equals) and
/// [`hash_code`](Self::hash_code) when the type has custom equality.
pub trait StructuredValue: fmt::Debug + Send + Sync + 'static {
    /// Name of the structured type.
    fn type_name(&self) -> &str;

    /// Field values in declaration order.
    fn fields(&self) -> Vec<Value>;

    /// Custom equality. Defaults to field equality.
    fn equals(&self, other: &dyn StructuredValue) -> bool {
        self.type_name() == other.type_name() && self.fields() == other.fields()
    }

    /// Custom hash. Defaults to a hash of the fields.
    fn hash_code(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.type_name().hash(&mut hasher);
        self.fields().hash(&mut hasher);
        hasher.finish()
    }
}

/// A property value.
///
/// `PartialEq` and `Hash` on `Value` are structural: byte arrays compare
/// by content and structured values field by field. Property comparers
/// may apply different semantics.
#[derive(Debug, Clone)]
pub enum Value {
    /// No value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// Text.
    Text(String),
    /// GUID.
    Guid(Uuid),
    /// Byte array. Clones share the same allocation.
    Bytes(Arc<[u8]>),
    /// User-defined structured value.
    Structured(Arc<dyn StructuredValue>),
}

impl Value {
    /// Creates a byte array value.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(Arc::from(bytes.into()))
    }

    /// Creates a structured value.
    pub fn structured(value: impl StructuredValue) -> Self {
        Value::Structured(Arc::new(value))
    }

    /// Returns true if this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if the value is the "not set" default for key checks.
    pub fn is_sentinel(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Int(v) => *v == 0,
            Value::Long(v) => *v == 0,
            Value::Guid(v) => v.is_nil(),
            _ => false,
        }
    }

    /// Display name of the runtime type.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Text(_) => "string",
            Value::Guid(_) => "Guid",
            Value::Bytes(_) => "byte[]",
            Value::Structured(v) => v.type_name(),
        }
    }

    /// Returns true if the value can be stored in a property of `value_type`.
    ///
    /// `Null` is compatible with every type; nullability is checked separately.
    pub fn is_compatible_with(&self, value_type: &ValueType) -> bool {
        match (self, value_type) {
            (Value::Null, _) => true,
            (Value::Bool(_), ValueType::Bool)
            | (Value::Int(_), ValueType::Int)
            | (Value::Long(_), ValueType::Long)
            | (Value::Text(_), ValueType::Text)
            | (Value::Guid(_), ValueType::Guid)
            | (Value::Bytes(_), ValueType::Bytes) => true,
            (Value::Structured(v), ValueType::Structured { name, .. }) => v.type_name() == &**name,
            _ => false,
        }
    }

    /// Returns the integer value.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the long value.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the GUID value.
    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Value::Guid(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the byte array.
    pub fn as_bytes(&self) -> Option<&Arc<[u8]>> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the structured value.
    pub fn as_structured(&self) -> Option<&Arc<dyn StructuredValue>> {
        match self {
            Value::Structured(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Guid(a), Value::Guid(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Structured(a), Value::Structured(b)) => {
                a.type_name() == b.type_name() && a.fields() == b.fields()
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Long(v) => v.hash(state),
            Value::Text(v) => v.hash(state),
            Value::Guid(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Structured(v) => {
                v.type_name().hash(state);
                v.fields().hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("<null>"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Guid(v) => write!(f, "{v}"),
            Value::Bytes(v) => {
                f.write_str("0x")?;
                for b in v.iter() {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
            Value::Structured(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Guid(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Rust types a property value can be read as.
///
/// `Option<T>` reads nulls; the plain type rejects them.
pub trait ScalarType: Sized {
    /// Name of the property type this Rust type reads, as in [`ValueType::name`].
    fn type_name() -> &'static str;

    /// Converts a value; `None` if it holds another type or null.
    fn from_value(value: &Value) -> Option<Self>;

    /// Returns true if null reads as a value of this type.
    fn accepts_null() -> bool {
        false
    }
}

macro_rules! scalar_type {
    ($ty:ty, $name:literal, $accessor:expr) => {
        impl ScalarType for $ty {
            fn type_name() -> &'static str {
                $name
            }

            fn from_value(value: &Value) -> Option<Self> {
                ($accessor)(value)
            }
        }
    };
}

scalar_type!(bool, "bool", Value::as_bool);
scalar_type!(i32, "int", Value::as_int);
scalar_type!(i64, "long", Value::as_long);
scalar_type!(Uuid, "Guid", Value::as_guid);
scalar_type!(String, "string", |v: &Value| v.as_text().map(str::to_string));
scalar_type!(Vec<u8>, "byte[]", |v: &Value| v.as_bytes().map(|b| b.to_vec()));

impl<T: ScalarType> ScalarType for Option<T> {
    fn type_name() -> &'static str {
        T::type_name()
    }

    fn from_value(value: &Value) -> Option<Self> {
        if value.is_null() {
            Some(None)
        } else {
            T::from_value(value).map(Some)
        }
    }

    fn accepts_null() -> bool {
        true
    }
}

/// Declared type of a property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `bool`.
    Bool,
    /// `int`.
    Int,
    /// `long`.
    Long,
    /// `string`.
    Text,
    /// `Guid`.
    Guid,
    /// `byte[]`.
    Bytes,
    /// A user-defined structured type.
    Structured {
        /// Type name, matched against [`StructuredValue::type_name`].
        name: Arc<str>,
        /// How instances are compared.
        equality: EqualitySemantics,
    },
}

impl ValueType {
    /// Creates a structured value type.
    pub fn structured(name: &str, equality: EqualitySemantics) -> Self {
        ValueType::Structured {
            name: Arc::from(name),
            equality,
        }
    }

    /// Display name of the type.
    pub fn name(&self) -> &str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Long => "long",
            ValueType::Text => "string",
            ValueType::Guid => "Guid",
            ValueType::Bytes => "byte[]",
            ValueType::Structured { name, .. } => &**name,
        }
    }

    /// Value a fresh instance holds for a property of this type.
    pub fn default_value(&self, nullable: bool) -> Value {
        if nullable {
            return Value::Null;
        }
        match self {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Long => Value::Long(0),
            ValueType::Guid => Value::Guid(Uuid::nil()),
            ValueType::Text | ValueType::Bytes | ValueType::Structured { .. } => Value::Null,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Point {
        x: i32,
        y: i32,
    }

    impl StructuredValue for Point {
        fn type_name(&self) -> &str {
            "Point"
        }

        fn fields(&self) -> Vec<Value> {
            vec![Value::Int(self.x), Value::Int(self.y)]
        }
    }

    #[test]
    fn scalar_reads() {
        assert_eq!(i32::from_value(&Value::Int(7)), Some(7));
        assert_eq!(i32::from_value(&Value::Long(7)), None);
        assert_eq!(i32::from_value(&Value::Null), None);
        assert_eq!(<Option<i32>>::from_value(&Value::Null), Some(None));
        assert_eq!(String::from_value(&Value::from("a")), Some("a".to_string()));
        assert_eq!(<Option<Uuid>>::type_name(), "Guid");
        assert!(<Option<bool>>::accepts_null());
        assert!(!bool::accepts_null());
    }

    #[test]
    fn sentinel_values() {
        assert!(Value::Null.is_sentinel());
        assert!(Value::Int(0).is_sentinel());
        assert!(Value::Long(0).is_sentinel());
        assert!(Value::Guid(Uuid::nil()).is_sentinel());
        assert!(!Value::Int(-1).is_sentinel());
        assert!(!Value::Text(String::new()).is_sentinel());
    }

    #[test]
    fn type_names() {
        assert_eq!(Value::Int(1).type_name(), "int");
        assert_eq!(Value::from("x").type_name(), "string");
        assert_eq!(ValueType::Guid.name(), "Guid");
        assert_eq!(ValueType::Bytes.to_string(), "byte[]");
        assert_eq!(Value::structured(Point { x: 1, y: 2 }).type_name(), "Point");
    }

    #[test]
    fn compatibility() {
        assert!(Value::Int(1).is_compatible_with(&ValueType::Int));
        assert!(!Value::Int(1).is_compatible_with(&ValueType::Long));
        assert!(Value::Null.is_compatible_with(&ValueType::Text));

        let point = ValueType::structured("Point", EqualitySemantics::Fields);
        assert!(Value::structured(Point { x: 0, y: 0 }).is_compatible_with(&point));
        assert!(!Value::Text("Point".into()).is_compatible_with(&point));
    }

    #[test]
    fn structural_equality_for_bytes_and_structured() {
        assert_eq!(Value::bytes(vec![1, 2]), Value::bytes(vec![1, 2]));
        assert_ne!(Value::bytes(vec![1, 2]), Value::bytes(vec![2, 1]));
        assert_eq!(
            Value::structured(Point { x: 1, y: 2 }),
            Value::structured(Point { x: 1, y: 2 })
        );
    }

    #[test]
    fn option_conversion() {
        assert_eq!(Value::from(Some(5)), Value::Int(5));
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn default_values() {
        assert_eq!(ValueType::Int.default_value(false), Value::Int(0));
        assert_eq!(ValueType::Int.default_value(true), Value::Null);
        assert_eq!(ValueType::Text.default_value(false), Value::Null);
    }

    #[test]
    fn display() {
        assert_eq!(Value::Int(7).to_string(), "7");
        assert_eq!(Value::bytes(vec![0xAB, 1]).to_string(), "0xAB01");
        assert_eq!(Value::Null.to_string(), "<null>");
    }
}
