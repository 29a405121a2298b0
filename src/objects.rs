//! Path tree utilities.
//!
//! Pure functions over `serde_json::Value` trees addressed by `/`-delimited
//! paths. The writer returns a compensation ([`Slot`]) that, replayed through
//! the same writer, restores the previous content exactly.

use serde_json::{Map, Value};

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '/';

/// Field name of the deletion sentinel recorded in the changes tree.
const TOMBSTONE_MARKER: &str = "__deleted";

/// The content of a path: a value, or nothing.
#[derive(Clone, Debug, PartialEq)]
pub enum Slot {
    Value(Value),
    Absent,
}

/// The exact inverse of a write: the prior slot, recorded at the shallowest
/// path the write structurally altered.
///
/// For a plain leaf overwrite that is the written path itself. When the write
/// created a fresh chain of containers, or replaced a non-object intermediate
/// wholesale, the compensation instead covers that prefix, so replaying it
/// removes or restores the entire altered subtree.
#[derive(Clone, Debug, PartialEq)]
pub struct Compensation {
    pub path: String,
    pub slot: Slot,
}

impl Compensation {
    fn new(path: String, slot: Slot) -> Self {
        Self { path, slot }
    }

    /// Write the prior slot back, undoing the mutation this compensation was
    /// captured from.
    pub fn replay(&self, tree: &mut Value) {
        set_slot(tree, &self.path, self.slot.clone());
    }
}

/// Build the deletion sentinel.
///
/// A dedicated marker object rather than JSON `null`: `null` is a legitimate
/// stored value, and the marker must survive a JSON round-trip through the
/// local cache.
pub fn tombstone() -> Value {
    let mut marker = Map::new();
    marker.insert(TOMBSTONE_MARKER.to_string(), Value::Bool(true));
    Value::Object(marker)
}

/// Check whether a value is the deletion sentinel.
pub fn is_tombstone(value: &Value) -> bool {
    matches!(value, Value::Object(map)
        if map.len() == 1 && map.get(TOMBSTONE_MARKER) == Some(&Value::Bool(true)))
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(PATH_SEPARATOR).filter(|s| !s.is_empty())
}

/// Resolve a path to the value stored there, if any.
///
/// Missing or non-container intermediate segments yield `None`, never a panic.
pub fn get_at<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = tree;
    for segment in segments(path) {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write a slot at `path`, returning a [`Compensation`] that restores the
/// prior content exactly when replayed.
///
/// `Slot::Value` creates intermediate containers as needed; `Slot::Absent`
/// removes the node (a no-op compensating `Absent` when the path is already
/// missing). An empty path addresses the whole tree.
pub fn set_slot(tree: &mut Value, path: &str, slot: Slot) -> Compensation {
    let segs: Vec<&str> = segments(path).collect();
    match slot {
        Slot::Value(value) => put_at(tree, &segs, value),
        Slot::Absent => Compensation::new(join_path(&segs), remove_at(tree, &segs)),
    }
}

fn join_path(segs: &[&str]) -> String {
    segs.join(&PATH_SEPARATOR.to_string())
}

fn put_at(tree: &mut Value, segs: &[&str], value: Value) -> Compensation {
    let Some((last, parents)) = segs.split_last() else {
        let prior = std::mem::replace(tree, value);
        return Compensation::new(String::new(), Slot::Value(prior));
    };

    let mut current = tree;
    for (depth, seg) in parents.iter().enumerate() {
        current = match current {
            Value::Object(map) => {
                let created = !map.contains_key(*seg);
                let node = map
                    .entry((*seg).to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if created {
                    // Everything below this prefix is freshly created, so the
                    // compensation removes the whole chain.
                    let parent = ensure_object(ensure_node(node, &parents[depth + 1..]));
                    parent.insert((*last).to_string(), value);
                    return Compensation::new(join_path(&segs[..=depth]), Slot::Absent);
                }
                node
            }
            scalar => {
                // Writing through a non-object node replaces it wholesale;
                // the compensation must restore the whole replaced prefix,
                // not just the leaf.
                let prior = std::mem::replace(scalar, Value::Object(Map::new()));
                let parent = ensure_object(ensure_node(scalar, &parents[depth..]));
                parent.insert((*last).to_string(), value);
                return Compensation::new(join_path(&segs[..depth]), Slot::Value(prior));
            }
        };
    }

    // The deepest parent can itself be a non-object.
    if !current.is_object() {
        let prior = std::mem::replace(current, Value::Object(Map::new()));
        ensure_object(current).insert((*last).to_string(), value);
        return Compensation::new(join_path(parents), Slot::Value(prior));
    }

    let parent = ensure_object(current);
    match parent.insert((*last).to_string(), value) {
        Some(prior) => Compensation::new(join_path(segs), Slot::Value(prior)),
        None => Compensation::new(join_path(segs), Slot::Absent),
    }
}

fn remove_at(tree: &mut Value, segs: &[&str]) -> Slot {
    let Some((last, parents)) = segs.split_last() else {
        return Slot::Value(std::mem::replace(tree, Value::Object(Map::new())));
    };

    let mut current = tree;
    for seg in parents {
        current = match current {
            Value::Object(map) => match map.get_mut(*seg) {
                Some(child) => child,
                None => return Slot::Absent,
            },
            _ => return Slot::Absent,
        };
    }

    match current {
        Value::Object(map) => match map.remove(*last) {
            Some(prior) => Slot::Value(prior),
            None => Slot::Absent,
        },
        _ => Slot::Absent,
    }
}

/// Descend to the node at `segs`, coercing intermediates into containers.
fn ensure_node<'a>(mut current: &'a mut Value, segs: &[&str]) -> &'a mut Value {
    for seg in segs {
        current = ensure_object(current)
            .entry((*seg).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    current
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Recursively prune dead branches.
///
/// With `prune_empty` set, containers that are (or become) empty are removed
/// as well, so trees never accumulate husks left behind by removals.
pub fn cleanup(tree: &mut Value, prune_empty: bool) {
    if let Value::Object(map) = tree {
        for value in map.values_mut() {
            cleanup(value, prune_empty);
        }
        if prune_empty {
            map.retain(|_, v| !matches!(v, Value::Object(m) if m.is_empty()));
        }
    }
}

/// Remove tombstone-marked entries at any depth.
///
/// Used when overlaying pending changes onto remote search results: a locally
/// deleted entry must drop out of the result, and the state tree must never
/// hold tombstones.
pub fn strip_tombstones(tree: &mut Value) {
    if let Value::Object(map) = tree {
        map.retain(|_, v| !is_tombstone(v));
        for value in map.values_mut() {
            strip_tombstones(value);
        }
    }
}

/// Recursively merge `source` into `target`.
///
/// On key collision `source` wins when `overwrite` is set; with it unset,
/// existing target values are kept. This is the local-wins policy: pending
/// local edits merged over freshly fetched remote data with `overwrite`.
pub fn merge_deep(target: &mut Value, source: &Value, overwrite: bool) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(key) {
                    // Tombstones are atomic markers, never merged into.
                    Some(target_value)
                        if target_value.is_object()
                            && source_value.is_object()
                            && !is_tombstone(source_value) =>
                    {
                        merge_deep(target_value, source_value, overwrite);
                    }
                    Some(target_value) => {
                        if overwrite {
                            *target_value = source_value.clone();
                        }
                    }
                    None => {
                        target_map.insert(key.clone(), source_value.clone());
                    }
                }
            }
        }
        (target, source) => {
            if overwrite {
                *target = source.clone();
            }
        }
    }
}

/// Merge `source` into the subtree of `target` at `path`, creating the
/// subtree if absent.
pub fn merge_deep_at(path: &str, target: &mut Value, source: &Value, overwrite: bool) {
    let segs: Vec<&str> = segments(path).collect();
    let node = ensure_node(target, &segs);
    merge_deep(node, source, overwrite);
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn path_strategy() -> impl Strategy<Value = String> {
        proptest::collection::vec(
            prop_oneof![Just("a"), Just("b"), Just("c"), Just("d")],
            1..4,
        )
        .prop_map(|segments| segments.join(PATH_SEPARATOR.to_string().as_str()))
    }

    fn value_strategy() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            any::<i64>().prop_map(serde_json::Value::from),
            "[a-z]{0,6}".prop_map(serde_json::Value::from),
            Just(json!({"nested": {"flag": true}})),
        ]
    }

    proptest! {
        // A single replayed compensation is an exact inverse, even when the
        // write coerced or created intermediate containers.
        #[test]
        fn prop_compensation_is_exact_inverse(
            setup in proptest::collection::vec((path_strategy(), value_strategy()), 0..6),
            path in path_strategy(),
            value in value_strategy(),
        ) {
            let mut tree = json!({"seed": {"keep": 1}});
            for (p, v) in &setup {
                set_slot(&mut tree, p, Slot::Value(v.clone()));
            }
            let before = tree.clone();

            let comp = set_slot(&mut tree, &path, Slot::Value(value));
            comp.replay(&mut tree);

            prop_assert_eq!(tree, before);
        }

        // Replaying the captured compensations in reverse restores the tree,
        // no matter how the writes overlap.
        #[test]
        fn prop_reversed_compensations_restore_tree(
            writes in proptest::collection::vec((path_strategy(), value_strategy()), 1..8)
        ) {
            let mut tree = json!({"seed": {"keep": 1}});
            let original = tree.clone();

            let mut compensations = Vec::new();
            for (path, value) in &writes {
                compensations.push(set_slot(&mut tree, path, Slot::Value(value.clone())));
            }

            for comp in compensations.into_iter().rev() {
                comp.replay(&mut tree);
            }

            prop_assert_eq!(tree, original);
        }

        #[test]
        fn prop_get_at_sees_the_last_write(
            path in path_strategy(),
            value in value_strategy(),
        ) {
            let mut tree = json!({});
            set_slot(&mut tree, &path, Slot::Value(value.clone()));
            prop_assert_eq!(get_at(&tree, &path), Some(&value));
        }
    }
}
