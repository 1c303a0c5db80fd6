//! Property tests for canonicalization, request keys and merge strategies

use std::collections::HashSet;

use proptest::prelude::*;
use serde_json::{Map, Value, json};

use resource_cache::canonical::canonicalize;
use resource_cache::merge::merge_ids;
use resource_cache::{UpdateStrategy, derive_key};

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-zA-Z0-9 &=|%]{0,8}".prop_map(Value::from),
        Just(Value::Null),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    arb_scalar().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,4}", inner), 0..4)
                .prop_map(|pairs| Value::Object(pairs.into_iter().collect())),
        ]
    })
}

fn arb_pairs() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map("[a-z]{1,6}", arb_value(), 0..6)
        .prop_map(|map| map.into_iter().collect())
}

fn object(pairs: impl IntoIterator<Item = (String, Value)>) -> Value {
    let mut map = Map::new();
    for (key, value) in pairs {
        map.insert(key, value);
    }
    Value::Object(map)
}

fn arb_ids() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(0i64..20, 0..10).prop_map(|ids| ids.into_iter().map(Value::from).collect())
}

fn keys(ids: &[Value]) -> Vec<String> {
    ids.iter().map(ToString::to_string).collect()
}

proptest! {
    #[test]
    fn canonicalize_ignores_key_order(pairs in arb_pairs()) {
        let forward = object(pairs.clone());
        let reversed = object(pairs.into_iter().rev());
        prop_assert_eq!(canonicalize(&forward), canonicalize(&reversed));
    }

    #[test]
    fn canonicalize_distinguishes_string_values(a in "[a-z0-9 &=]{0,8}", b in "[a-z0-9 &=]{0,8}") {
        prop_assume!(a != b);
        prop_assert_ne!(
            canonicalize(&json!({"q": a})),
            canonicalize(&json!({"q": b}))
        );
    }

    #[test]
    fn request_key_is_stable_and_order_independent(pairs in arb_pairs(), body in arb_value()) {
        let headers = object(pairs.clone());
        let reordered = object(pairs.into_iter().rev());
        let first = derive_key("GET", "http://a/users", &headers, &body);
        prop_assert_eq!(&first, &derive_key("GET", "http://a/users", &reordered, &body));
        prop_assert_eq!(first.as_str().len(), 64);
    }

    #[test]
    fn request_key_changes_with_any_single_value(
        pairs in arb_pairs(),
        field in "[a-z]{1,6}",
        a in arb_scalar(),
        b in arb_scalar(),
    ) {
        prop_assume!(a != b);
        let with = |value: &Value| {
            let mut map: Map<String, Value> = pairs.iter().cloned().collect();
            map.insert(field.clone(), value.clone());
            Value::Object(map)
        };
        prop_assert_ne!(
            derive_key("POST", "http://a/users", &with(&a), &Value::Null),
            derive_key("POST", "http://a/users", &with(&b), &Value::Null)
        );
        prop_assert_ne!(
            derive_key("POST", "http://a/users", &Value::Null, &with(&a)),
            derive_key("POST", "http://a/users", &Value::Null, &with(&b))
        );
    }

    #[test]
    fn request_key_changes_with_method_or_url(path in "[a-z]{1,8}", other in "[a-z]{1,8}") {
        prop_assume!(path != other);
        let url = format!("http://a/{path}");
        let other_url = format!("http://a/{other}");
        let key = derive_key("GET", &url, &Value::Null, &Value::Null);
        prop_assert_ne!(&key, &derive_key("POST", &url, &Value::Null, &Value::Null));
        prop_assert_ne!(&key, &derive_key("GET", &other_url, &Value::Null, &Value::Null));
    }

    #[test]
    fn append_is_a_deduplicated_union(existing in arb_ids(), incoming in arb_ids()) {
        let merged = merge_ids(&UpdateStrategy::Append, &existing, &incoming, "user").unwrap().unwrap();
        let merged_keys = keys(&merged);

        let unique: HashSet<_> = merged_keys.iter().collect();
        prop_assert_eq!(unique.len(), merged_keys.len());
        for id in keys(&existing).iter().chain(keys(&incoming).iter()) {
            prop_assert!(unique.contains(id));
        }
        // existing ids keep their relative order at the front
        let mut seen = HashSet::new();
        let existing_unique: Vec<_> = keys(&existing).into_iter().filter(|id| seen.insert(id.clone())).collect();
        prop_assert_eq!(&merged_keys[..existing_unique.len()], &existing_unique[..]);
    }

    #[test]
    fn prepend_puts_incoming_first(existing in arb_ids(), incoming in arb_ids()) {
        let merged = merge_ids(&UpdateStrategy::Prepend, &existing, &incoming, "user").unwrap().unwrap();
        let mut seen = HashSet::new();
        let incoming_unique: Vec<_> = keys(&incoming).into_iter().filter(|id| seen.insert(id.clone())).collect();
        prop_assert_eq!(&keys(&merged)[..incoming_unique.len()], &incoming_unique[..]);
    }

    #[test]
    fn remove_drops_every_incoming_id(existing in arb_ids(), incoming in arb_ids()) {
        let merged = merge_ids(&UpdateStrategy::Remove, &existing, &incoming, "user").unwrap().unwrap();
        let removed: HashSet<_> = keys(&incoming).into_iter().collect();
        prop_assert!(keys(&merged).iter().all(|id| !removed.contains(id)));
        let kept = keys(&existing).into_iter().filter(|id| !removed.contains(id)).count();
        prop_assert_eq!(merged.len(), kept);
    }

    #[test]
    fn replace_yields_incoming(existing in arb_ids(), incoming in arb_ids()) {
        let merged = merge_ids(&UpdateStrategy::Replace, &existing, &incoming, "user").unwrap();
        prop_assert_eq!(merged, Some(incoming));
    }
}
