use std::sync::Arc;

use runledger::artifact::artifacts_dir;
use runledger::codec::{ArrayData, CodecRegistry, NdArray, Table};
use runledger::document::{DocumentCodec, Map, SymbolTable, Value};
use runledger::error::LedgerError;
use runledger::map;

fn codec() -> (DocumentCodec, Arc<SymbolTable>) {
    let symbols = Arc::new(SymbolTable::new());
    let codec = DocumentCodec::new(Arc::new(CodecRegistry::with_builtins()), symbols.clone());
    (codec, symbols)
}

fn scores() -> Table {
    let mut t = Table::new(["id", "score"]);
    t.push_row(["1", "0.5"]).unwrap();
    t
}

fn normalize(x: f64) -> f64 {
    x / 10.0
}

#[test]
fn plain_structure_passes_through() {
    let dir = tempfile::tempdir().unwrap();
    let (codec, _) = codec();
    let value = Value::Map(map! {
        "lr" => 0.01,
        "epochs" => 3,
        "tags" => vec![Value::from("a"), Value::Null, Value::from(true)],
    });

    let json = codec.encode(&value, dir.path()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"lr": 0.01, "epochs": 3, "tags": ["a", null, true]})
    );
    assert_eq!(codec.decode(json).unwrap(), value);
    assert!(!artifacts_dir(dir.path()).exists());
}

#[test]
fn every_occurrence_gets_its_own_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let (codec, _) = codec();
    let table = Value::from(scores());
    let value = Value::Map(map! {
        "train" => table.clone(),
        "nested" => Value::Map(map! { "again" => table }),
    });

    let json = codec.encode(&value, dir.path()).unwrap();
    let first = json["train"]["__id__"].as_str().unwrap();
    let second = json["nested"]["again"]["__id__"].as_str().unwrap();
    assert_ne!(first, second);
    assert_eq!(json["train"]["__type__"], "table");
    assert_eq!(std::fs::read_dir(artifacts_dir(dir.path())).unwrap().count(), 2);
}

#[test]
fn decode_yields_handles_and_resolve_loads_them() {
    let dir = tempfile::tempdir().unwrap();
    let (codec, _) = codec();
    let array = NdArray::new(vec![3], ArrayData::I64(vec![1, 2, 3])).unwrap();
    let value = Value::List(vec![Value::from(array.clone()), Value::from(7)]);

    let json = codec.encode(&value, dir.path()).unwrap();
    let decoded = codec.decode(json).unwrap();
    let handle = decoded.as_list().unwrap()[0].as_artifact().unwrap().clone();
    assert_eq!(handle.type_name(), "ndarray");

    // an encoded handle is referenced again, not rewritten
    let again = codec.encode(&decoded, dir.path()).unwrap();
    assert_eq!(again[0]["__id__"], handle.id());
    assert_eq!(std::fs::read_dir(artifacts_dir(dir.path())).unwrap().count(), 1);

    let resolved = codec.resolve_nested(decoded).unwrap();
    assert_eq!(resolved.as_list().unwrap()[0].downcast_ref::<NdArray>(), Some(&array));
    assert_eq!(resolved.as_list().unwrap()[1], Value::from(7));
}

#[test]
fn resolve_map_keeps_selected_entries() {
    let dir = tempfile::tempdir().unwrap();
    let (codec, _) = codec();
    let value = Value::Map(map! { "a" => scores(), "b" => scores() });
    let decoded = codec.decode(codec.encode(&value, dir.path()).unwrap()).unwrap();

    let Value::Map(m) = decoded else { panic!("expected a map") };
    let resolved: Map = codec.resolve_map(m, &["b".to_string()]).unwrap();
    assert!(resolved["a"].downcast_ref::<Table>().is_some());
    assert!(resolved["b"].as_artifact().is_some());
}

#[test]
fn symbols_round_trip_through_the_table() {
    let dir = tempfile::tempdir().unwrap();
    let (codec, symbols) = codec();
    let symbol = symbols.register("demo::prep", "normalize", normalize as fn(f64) -> f64);

    let json = codec.encode(&Value::from(symbol), dir.path()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"__module__": "demo::prep", "__name__": "normalize"})
    );

    let decoded = codec.decode(json).unwrap();
    let f = decoded
        .as_symbol()
        .unwrap()
        .downcast_ref::<fn(f64) -> f64>()
        .unwrap();
    assert_eq!(f(5.0), 0.5);
}

#[test]
fn unknown_symbol_fails_decode() {
    let (codec, _) = codec();
    let err = codec
        .decode(serde_json::json!({"__module__": "demo::gone", "__name__": "f"}))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LedgerError>(),
        Some(LedgerError::SymbolNotFound { .. })
    ));
}

#[test]
fn lookalike_user_maps_stay_maps() {
    let (codec, _) = codec();
    let json = serde_json::json!({
        "__module__": "x",
        "__name__": "y",
        "comment": "not a symbol",
    });
    let decoded = codec.decode(json).unwrap();
    assert_eq!(decoded.as_map().unwrap().len(), 3);
}

#[test]
fn unregistered_opaque_values_fail_encode() {
    let dir = tempfile::tempdir().unwrap();
    let (codec, _) = codec();
    let err = codec
        .encode(&Value::opaque(std::time::Duration::from_secs(1)), dir.path())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LedgerError>(),
        Some(LedgerError::TypeNotSupported(_))
    ));
}

#[test]
fn non_finite_numbers_fail_encode() {
    let dir = tempfile::tempdir().unwrap();
    let (codec, _) = codec();
    for x in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let value = Value::Map(map! { "loss" => x });
        let err = codec.encode(&value, dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::InvalidDocument(_))
        ));
    }
}

#[test]
fn dump_writes_four_space_indented_documents() {
    let dir = tempfile::tempdir().unwrap();
    let (codec, _) = codec();
    let path = dir.path().join("doc.json");
    codec
        .dump(&Value::Map(map! { "b" => 1, "a" => 2 }), &path, dir.path())
        .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text, "{\n    \"b\": 1,\n    \"a\": 2\n}");
    assert_eq!(
        codec.load(&path).unwrap(),
        Value::Map(map! { "b" => 1, "a" => 2 })
    );
}
