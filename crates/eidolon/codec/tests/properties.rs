use eidolon_codec::{
    canonical_bytes, canonical_roundtrip, compute_ucr_hash, sha256_canonical,
};
use proptest::prelude::*;
use serde_json::{Map, Value};

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        (-1_000_000i64..1_000_000).prop_map(|n| Value::from(n as f64 / 8.0)),
        "[a-zA-Z0-9 éü☕\\n\"]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,4}", inner), 0..6).prop_map(|pairs| {
                let mut map = Map::new();
                for (k, v) in pairs {
                    map.insert(k, v);
                }
                Value::Object(map)
            }),
        ]
    })
}

/// Rebuild every object with keys inserted in reverse order.
fn reverse_insertion(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(reverse_insertion).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.reverse();
            for k in keys {
                out.insert(k.clone(), reverse_insertion(&map[k]));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

proptest! {
    #[test]
    fn equal_graphs_have_equal_bytes(v in arb_json()) {
        let w = reverse_insertion(&v);
        prop_assert_eq!(canonical_bytes(&v).unwrap(), canonical_bytes(&w).unwrap());
    }

    #[test]
    fn roundtrip_through_parser_is_identity(v in arb_json()) {
        let bytes = canonical_bytes(&v).unwrap();
        prop_assert_eq!(canonical_roundtrip(&bytes).unwrap(), bytes);
    }

    #[test]
    fn ucr_hash_survives_roundtrip(v in arb_json(), tag in "[a-f0-9]{8}") {
        let mut record = Map::new();
        record.insert("payload".into(), v);
        let mut hashes = Map::new();
        hashes.insert("ucr_hash".into(), Value::String(tag));
        hashes.insert("artifact_manifest_hash".into(), Value::String("m".into()));
        record.insert("hashes".into(), Value::Object(hashes));
        let record = Value::Object(record);

        let roundtripped: Value =
            serde_json::from_slice(
                &canonical_roundtrip(&canonical_bytes(&record).unwrap()).unwrap(),
            )
                .unwrap();
        let h = compute_ucr_hash(&record).unwrap();
        prop_assert_eq!(&h, &compute_ucr_hash(&roundtripped).unwrap());

        let mut blanked = record.clone();
        blanked["hashes"]["ucr_hash"] = Value::String(String::new());
        prop_assert_eq!(h, sha256_canonical(&blanked).unwrap());
    }
}
