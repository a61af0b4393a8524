//! Pure patch application over mirrored JSON values.
//!
//! Keyed maps mutate by shallow copy; ordered sequences grow by
//! insert-before (an appended log line is a patch at the sequence's
//! current length). Everything-as-map-merge is the other conceivable
//! semantics; this module deliberately implements the array-aware one.

use serde_json::{Map, Value};

use tether_rpc::PathSegment;

/// Apply a path-addressed patch to `current`, producing a new value.
///
/// Rules, evaluated in order:
///
/// 1. Empty path: `value` replaces the current value wholesale.
/// 2. A single string-key segment with a `null` value deletes that key
///    from the map; deleting an absent key is a no-op.
/// 3. A final integer segment inserts `value` **before** that position in
///    the sequence (length grows by one).
/// 4. A non-final integer segment recurses into that element, leaving the
///    sequence length unchanged.
/// 5. A string-key segment recurses into a shallow-copied map entry.
///
/// `current` is never mutated, so snapshots published earlier stay
/// intact. Indices beyond the current length are a protocol violation
/// (the server derives them from the same ordered history); they clamp
/// (rule 3) or leave the sequence unchanged (rule 4) rather than panic.
pub fn apply(current: &Value, path: &[PathSegment], value: Value) -> Value {
    let Some((head, rest)) = path.split_first() else {
        return value;
    };
    match head {
        PathSegment::Key(key) => {
            let mut map = match current.as_object() {
                Some(map) => map.clone(),
                None => Map::new(),
            };
            if rest.is_empty() && value.is_null() {
                let _ = map.remove(key);
            } else {
                let child = map.get(key).cloned().unwrap_or(Value::Null);
                let _ = map.insert(key.clone(), apply(&child, rest, value));
            }
            Value::Object(map)
        }
        PathSegment::Index(index) => {
            let mut seq = match current.as_array() {
                Some(seq) => seq.clone(),
                None => Vec::new(),
            };
            if rest.is_empty() {
                let at = (*index).min(seq.len());
                seq.insert(at, value);
            } else if let Some(slot) = seq.get_mut(*index) {
                let child = slot.clone();
                *slot = apply(&child, rest, value);
            }
            Value::Array(seq)
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn path(segments: &[&str]) -> Vec<PathSegment> {
        segments.iter().map(|s| PathSegment::from(*s)).collect()
    }

    // ── Rule 1: root replacement ────────────────────────────────────

    #[test]
    fn empty_path_replaces_wholesale() {
        let current = json!({"a": 1});
        let next = apply(&current, &[], json!([1, 2, 3]));
        assert_eq!(next, json!([1, 2, 3]));
    }

    #[test]
    fn empty_path_accepts_null() {
        let next = apply(&json!({"a": 1}), &[], Value::Null);
        assert!(next.is_null());
    }

    // ── Rule 2: keyed deletion ──────────────────────────────────────

    #[test]
    fn null_at_key_deletes() {
        let current = json!({"a": 1, "b": 2});
        let next = apply(&current, &path(&["a"]), Value::Null);
        assert_eq!(next, json!({"b": 2}));
    }

    #[test]
    fn deleting_absent_key_is_noop() {
        let current = json!({"b": 2});
        let once = apply(&current, &path(&["a"]), Value::Null);
        let twice = apply(&once, &path(&["a"]), Value::Null);
        assert_eq!(once, json!({"b": 2}));
        assert_eq!(once, twice);
    }

    #[test]
    fn nested_null_deletes_at_depth() {
        let current = json!({"steps": {"s1": {"x": 1}, "s2": {}}});
        let next = apply(&current, &path(&["steps", "s1"]), Value::Null);
        assert_eq!(next, json!({"steps": {"s2": {}}}));
    }

    // ── Rule 3: final-index insertion ───────────────────────────────

    #[test]
    fn final_index_inserts_before() {
        let current = json!(["a", "b"]);
        let next = apply(&current, &[PathSegment::Index(1)], json!("x"));
        assert_eq!(next, json!(["a", "x", "b"]));
    }

    #[test]
    fn append_at_length() {
        let current = json!(["a", "b"]);
        let next = apply(&current, &[PathSegment::Index(2)], json!("c"));
        assert_eq!(next, json!(["a", "b", "c"]));
    }

    #[test]
    fn insert_at_zero_prepends() {
        let current = json!(["b"]);
        let next = apply(&current, &[PathSegment::Index(0)], json!("a"));
        assert_eq!(next, json!(["a", "b"]));
    }

    #[test]
    fn out_of_range_insert_clamps() {
        let current = json!(["a"]);
        let next = apply(&current, &[PathSegment::Index(9)], json!("z"));
        assert_eq!(next, json!(["a", "z"]));
    }

    // ── Rule 4: recursion through an index ──────────────────────────

    #[test]
    fn non_final_index_recurses_in_place() {
        let current = json!([{"n": 1}, {"n": 2}]);
        let next = apply(
            &current,
            &[PathSegment::Index(1), PathSegment::from("n")],
            json!(5),
        );
        assert_eq!(next, json!([{"n": 1}, {"n": 5}]));
    }

    #[test]
    fn out_of_range_recursion_leaves_sequence_unchanged() {
        let current = json!([{"n": 1}]);
        let next = apply(
            &current,
            &[PathSegment::Index(7), PathSegment::from("n")],
            json!(5),
        );
        assert_eq!(next, current);
    }

    // ── Rule 5: keyed recursion ─────────────────────────────────────

    #[test]
    fn nested_replacement_does_not_mutate_original() {
        let original = json!({"n": {"v": 1}});
        let next = apply(&original, &path(&["n", "v"]), json!(2));
        assert_eq!(next, json!({"n": {"v": 2}}));
        assert_eq!(original, json!({"n": {"v": 1}}));
    }

    #[test]
    fn new_key_materializes_intermediate_maps() {
        let current = json!({"steps": {}});
        let next = apply(&current, &path(&["steps", "s1"]), json!({"target": "f"}));
        assert_eq!(next, json!({"steps": {"s1": {"target": "f"}}}));
    }

    #[test]
    fn mixed_path_map_then_index() {
        let current = json!({"lines": ["one"]});
        let next = apply(
            &current,
            &[PathSegment::from("lines"), PathSegment::Index(1)],
            json!("two"),
        );
        assert_eq!(next, json!({"lines": ["one", "two"]}));
    }

    // ── Properties ──────────────────────────────────────────────────

    proptest! {
        #[test]
        fn deletion_is_idempotent(
            entries in prop::collection::btree_map("[a-z]{1,4}", any::<i64>(), 0..8),
            key in "[a-z]{1,4}",
        ) {
            let current = Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, json!(v)))
                    .collect(),
            );
            let once = apply(&current, &[PathSegment::Key(key.clone())], Value::Null);
            let twice = apply(&once, &[PathSegment::Key(key.clone())], Value::Null);
            prop_assert_eq!(&once, &twice);
            prop_assert!(once.as_object().is_some_and(|m| !m.contains_key(&key)));
        }

        #[test]
        fn insertion_grows_by_one(
            items in prop::collection::vec(any::<i32>(), 0..8),
            at in 0usize..8,
        ) {
            let current = Value::Array(items.iter().map(|i| json!(i)).collect());
            let next = apply(&current, &[PathSegment::Index(at)], json!("inserted"));
            let seq = next.as_array().expect("sequence");
            prop_assert_eq!(seq.len(), items.len() + 1);
            prop_assert_eq!(&seq[at.min(items.len())], &json!("inserted"));
        }

        #[test]
        fn replacement_never_mutates_input(
            before in any::<i64>(),
            after in any::<i64>(),
        ) {
            let original = json!({"n": {"v": before}});
            let snapshot = original.clone();
            let _next = apply(&original, &[
                PathSegment::from("n"),
                PathSegment::from("v"),
            ], json!(after));
            prop_assert_eq!(original, snapshot);
        }
    }
}
