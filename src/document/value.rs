use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::artifact::Artifact;
use crate::codec::{NdArray, Table};
use crate::document::symbol::Symbol;

/// Insertion-ordered mapping used for documents and bound call arguments.
pub type Map = IndexMap<String, Value>;

/// A live value of some concrete Rust type, carried through a document tree
/// until the encoder hands it to the codec registry.
#[derive(Clone)]
pub struct Opaque {
    type_id: TypeId,
    type_name: String,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>().to_string(),
            inner: Arc::new(value),
        }
    }

    /// Wrap a value produced by a type-erased reader.
    pub fn from_boxed(value: Box<dyn Any + Send + Sync>, type_name: &str) -> Self {
        let inner: Arc<dyn Any + Send + Sync> = Arc::from(value);
        Self {
            type_id: Any::type_id(&*inner),
            type_name: type_name.to_string(),
            inner,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn as_any(&self) -> &(dyn Any + Send + Sync) {
        &*self.inner
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque<{}>", self.type_name)
    }
}

/// In-memory document tree.
///
/// Mirrors JSON, plus three variants the document codec treats specially:
/// artifact handles, resolved symbols and opaque values of registered types.
/// Floats JSON cannot express stay as [`Value::NonFinite`] and fail to encode.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    /// NaN or an infinity. Kept in the tree so encoding can reject it.
    NonFinite(f64),
    String(String),
    List(Vec<Value>),
    Map(Map),
    Artifact(Artifact),
    Symbol(Symbol),
    Opaque(Opaque),
}

impl Value {
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Value::Opaque(Opaque::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            Value::NonFinite(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_artifact(&self) -> Option<&Artifact> {
        match self {
            Value::Artifact(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the wrapped value if this is an opaque `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(o) => o.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Map lookup; `None` for non-maps and missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Convert a plain JSON value without any reference decoding.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::NonFinite(a), Value::NonFinite(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Artifact(a), Value::Artifact(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! from_integer {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(n: $ty) -> Self {
                Value::Number(n.into())
            }
        })*
    };
}

from_integer!(i32, i64, u32, u64, usize);

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::NonFinite(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(map)
    }
}

impl From<Artifact> for Value {
    fn from(a: Artifact) -> Self {
        Value::Artifact(a)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::opaque(t)
    }
}

impl From<NdArray> for Value {
    fn from(a: NdArray) -> Self {
        Value::opaque(a)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Build a [`Map`] from `key => value` pairs.
#[macro_export]
macro_rules! map {
    () => { $crate::document::Map::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut m = $crate::document::Map::new();
        $( m.insert(($key).to_string(), $crate::document::Value::from($value)); )+
        m
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_json_keeps_key_order() {
        let json = serde_json::json!({"z": 1, "a": [true, null], "m": {"k": "v"}});
        let value = Value::from_json(json);
        let keys: Vec<&str> = value.as_map().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(value.get("m").and_then(|m| m.get("k")).and_then(Value::as_str), Some("v"));
    }

    #[test]
    fn opaque_equality_is_identity() {
        let a = Value::opaque(Table::new(["x"]));
        let b = a.clone();
        let c = Value::opaque(Table::new(["x"]));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.downcast_ref::<Table>().is_some());
        assert!(a.downcast_ref::<NdArray>().is_none());
    }

    #[test]
    fn non_finite_floats_are_not_null() {
        let nan = Value::from(f64::NAN);
        assert!(!nan.is_null());
        assert!(nan.as_f64().is_some_and(f64::is_nan));
        assert_eq!(nan, Value::from(f64::NAN));
        assert_eq!(Value::from(f64::INFINITY), Value::NonFinite(f64::INFINITY));
        assert_ne!(Value::from(f64::INFINITY), Value::from(f64::NEG_INFINITY));
        assert_eq!(Value::from(1.5), Value::Number(serde_json::Number::from_f64(1.5).unwrap()));
    }

    #[test]
    fn map_macro_builds_ordered_map() {
        let m = map! { "b" => 2, "a" => "x" };
        assert_eq!(m.get_index(0).map(|(k, _)| k.as_str()), Some("b"));
        assert_eq!(m["a"], Value::from("x"));
    }
}
