//! Recursive encoding between [`Value`] trees and JSON documents.
//!
//! Encoding externalizes every opaque value of a registered type into its own
//! artifact file and leaves a reference in its place. Decoding turns those
//! references back into [`Artifact`] handles (no file reads) and resolves
//! symbol references; [`DocumentCodec::resolve_nested`] is the opt-in pass
//! that actually loads artifact contents.

pub mod symbol;
pub mod value;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::Serialize;

use crate::artifact::Artifact;
use crate::codec::CodecRegistry;
use crate::error::LedgerError;

pub use self::symbol::{Symbol, SymbolResolver, SymbolTable};
pub use self::value::{Map, Opaque, Value};

pub const MODULE_KEY: &str = "__module__";
pub const NAME_KEY: &str = "__name__";

/// Encoder/decoder bound to a codec registry and a symbol resolver.
#[derive(Clone)]
pub struct DocumentCodec {
    registry: Arc<CodecRegistry>,
    resolver: Arc<dyn SymbolResolver>,
}

impl DocumentCodec {
    pub fn new(registry: Arc<CodecRegistry>, resolver: Arc<dyn SymbolResolver>) -> Self {
        Self { registry, resolver }
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    /// Encode `value` into JSON, writing artifacts for opaque values under `run_dir`.
    pub fn encode(&self, value: &Value, run_dir: &Path) -> Result<serde_json::Value> {
        Ok(match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::NonFinite(n) => {
                return Err(LedgerError::InvalidDocument(format!(
                    "{} has no JSON representation",
                    n
                ))
                .into());
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| self.encode(item, run_dir))
                    .collect::<Result<_>>()?,
            ),
            Value::Map(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.encode(v, run_dir)?);
                }
                serde_json::Value::Object(out)
            }
            Value::Artifact(artifact) => artifact.to_reference(),
            Value::Symbol(symbol) => symbol_reference(symbol),
            Value::Opaque(opaque) => {
                Artifact::create_opaque(opaque, run_dir, &self.registry)?.to_reference()
            }
        })
    }

    /// Decode JSON into a [`Value`], producing artifact handles and resolved symbols.
    pub fn decode(&self, json: serde_json::Value) -> Result<Value> {
        Ok(match json {
            serde_json::Value::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| self.decode(item))
                    .collect::<Result<_>>()?,
            ),
            serde_json::Value::Object(map) => {
                if let Some(artifact) = Artifact::from_reference(&map) {
                    return Ok(Value::Artifact(artifact));
                }
                if let Some((module, name)) = symbol_parts(&map) {
                    return Ok(Value::Symbol(self.resolver.resolve(module, name)?));
                }
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, self.decode(v)?);
                }
                Value::Map(out)
            }
            scalar => Value::from_json(scalar),
        })
    }

    /// Replace every artifact handle in `value` with its loaded contents.
    pub fn resolve_nested(&self, value: Value) -> Result<Value> {
        Ok(match value {
            Value::Artifact(artifact) => Value::Opaque(artifact.load(&self.registry)?),
            Value::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| self.resolve_nested(item))
                    .collect::<Result<_>>()?,
            ),
            Value::Map(map) => Value::Map(self.resolve_map(map, &[])?),
            other => other,
        })
    }

    /// Like [`DocumentCodec::resolve_nested`] on a map, but leaves the
    /// top-level entries named in `keep` untouched.
    pub fn resolve_map(&self, map: Map, keep: &[String]) -> Result<Map> {
        let mut out = Map::with_capacity(map.len());
        for (k, v) in map {
            let v = if keep.contains(&k) {
                v
            } else {
                self.resolve_nested(v)?
            };
            out.insert(k, v);
        }
        Ok(out)
    }

    /// Delete the backing file of every artifact referenced in `value`.
    pub fn remove_nested(&self, value: &Value) -> Result<()> {
        match value {
            Value::Artifact(artifact) => artifact.delete(),
            Value::List(items) => items.iter().try_for_each(|item| self.remove_nested(item)),
            Value::Map(map) => map.values().try_for_each(|v| self.remove_nested(v)),
            _ => Ok(()),
        }
    }

    /// Encode `value` and write it to `path` as a 4-space indented document.
    /// Returns the encoded JSON.
    pub fn dump(&self, value: &Value, path: &Path, run_dir: &Path) -> Result<serde_json::Value> {
        let json = self.encode(value, run_dir)?;
        write_json(path, &json)?;
        Ok(json)
    }

    /// Read and decode the document at `path`.
    pub fn load(&self, path: &Path) -> Result<Value> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document: {}", path.display()))?;
        let json: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse document: {}", path.display()))?;
        self.decode(json)
    }

    /// Read a document, optionally loading every artifact it references.
    pub fn load_resolved(&self, path: &Path, resolve: bool) -> Result<Value> {
        let value = self.load(path)?;
        if resolve {
            self.resolve_nested(value)
        } else {
            Ok(value)
        }
    }
}

fn symbol_reference(symbol: &Symbol) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(
        MODULE_KEY.to_string(),
        serde_json::Value::String(symbol.module().to_string()),
    );
    map.insert(
        NAME_KEY.to_string(),
        serde_json::Value::String(symbol.name().to_string()),
    );
    serde_json::Value::Object(map)
}

fn symbol_parts(map: &serde_json::Map<String, serde_json::Value>) -> Option<(&str, &str)> {
    if map.len() != 2 {
        return None;
    }
    let module = map.get(MODULE_KEY)?.as_str()?;
    let name = map.get(NAME_KEY)?.as_str()?;
    Some((module, name))
}

/// Serialize `value` with 4-space indentation, keeping key insertion order.
pub fn to_json_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(|e| LedgerError::InvalidDocument(e.to_string()).into())
}

/// Write `value` to `path` in the document format.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = to_json_string(value)?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Table;
    use crate::map;

    fn codec() -> DocumentCodec {
        DocumentCodec::new(
            Arc::new(CodecRegistry::with_builtins()),
            Arc::new(SymbolTable::new()),
        )
    }

    #[test]
    fn four_space_indent() {
        let text = to_json_string(&serde_json::json!({"a": [1]})).unwrap();
        assert_eq!(text, "{\n    \"a\": [\n        1\n    ]\n}");
    }

    #[test]
    fn each_occurrence_gets_its_own_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let codec = codec();
        let table = Value::from(Table::new(["x"]));
        let doc = Value::List(vec![table.clone(), table]);

        let json = codec.encode(&doc, dir.path()).unwrap();
        let ids: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r[crate::artifact::ID_KEY].as_str().unwrap())
            .collect();
        assert_ne!(ids[0], ids[1]);
        assert_eq!(std::fs::read_dir(dir.path().join("artifacts")).unwrap().count(), 2);
    }

    #[test]
    fn existing_artifact_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let codec = codec();
        let artifact = Artifact::create(&Table::new(["x"]), dir.path(), codec.registry()).unwrap();

        let json = codec
            .encode(&map! { "t" => artifact.clone() }.into(), dir.path())
            .unwrap();
        assert_eq!(json["t"], artifact.to_reference());
        assert_eq!(std::fs::read_dir(dir.path().join("artifacts")).unwrap().count(), 1);
    }

    #[test]
    fn plain_maps_with_extra_keys_are_not_references() {
        let codec = codec();
        let json = serde_json::json!({"__module__": "m", "__name__": "n", "extra": 1});
        let value = codec.decode(json).unwrap();
        assert_eq!(value.get("extra").and_then(Value::as_i64), Some(1));
    }

    #[test]
    fn unresolvable_symbol_fails_decode() {
        let codec = codec();
        let err = codec
            .decode(serde_json::json!({"__module__": "m", "__name__": "gone"}))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::SymbolNotFound { .. })
        ));
    }
}
