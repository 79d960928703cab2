//! Helpers for walking nested JSON objects with segment indices.

use super::{StorageError, StoreTransform};
use serde_json::{Map, Value};

/// Looks up `index` inside `root`. An empty index returns the whole root.
pub fn get_nested(root: &Map<String, Value>, index: &[&str]) -> Option<Value> {
    let Some((first, rest)) = index.split_first() else {
        return Some(Value::Object(root.clone()));
    };

    let mut current = root.get(*first)?;
    for segment in rest {
        current = current.as_object()?.get(*segment)?;
    }
    Some(current.clone())
}

/// Applies `transform` to the value under `index`, creating intermediate objects as needed.
pub fn update_nested(
    root: &mut Map<String, Value>,
    index: &[&str],
    transform: StoreTransform,
) -> Result<(), StorageError> {
    let Some((last, parents)) = index.split_last() else {
        return Err(StorageError::InvalidIndex(
            "cannot update the root of a store".to_string(),
        ));
    };

    let mut target = root;
    for segment in parents {
        let entry = target
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(map) = entry else {
            return Err(StorageError::InvalidIndex(format!(
                "segment {segment} is not an object"
            )));
        };
        target = map;
    }

    let current = target.remove(*last);
    target.insert(last.to_string(), transform(current));
    Ok(())
}

/// Removes the value under `index`. An empty index clears `root`.
///
/// Returns whether anything was removed.
pub fn delete_nested(root: &mut Map<String, Value>, index: &[&str]) -> bool {
    let Some((last, parents)) = index.split_last() else {
        let removed = !root.is_empty();
        root.clear();
        return removed;
    };

    let mut target = root;
    for segment in parents {
        match target.get_mut(*segment) {
            Some(Value::Object(map)) => target = map,
            _ => return false,
        }
    }
    target.remove(*last).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn root() -> Map<String, Value> {
        json!({ "a": { "b": { "c": 1 } }, "x": 2 })
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn get_walks_the_index() {
        let root = root();
        assert_eq!(get_nested(&root, &["a", "b", "c"]), Some(json!(1)));
        assert_eq!(get_nested(&root, &["x"]), Some(json!(2)));
        assert_eq!(get_nested(&root, &["x", "y"]), None);
        assert_eq!(get_nested(&root, &["missing"]), None);
        assert_eq!(get_nested(&root, &[]), Some(Value::Object(root.clone())));
    }

    #[test]
    fn update_creates_and_replaces_intermediates() {
        let mut root = root();
        update_nested(&mut root, &["x", "y"], Box::new(|_| json!("new"))).unwrap();
        assert_eq!(get_nested(&root, &["x", "y"]), Some(json!("new")));

        update_nested(
            &mut root,
            &["a", "b", "c"],
            Box::new(|current| json!(current.and_then(|v| v.as_i64()).unwrap_or(0) + 1)),
        )
        .unwrap();
        assert_eq!(get_nested(&root, &["a", "b", "c"]), Some(json!(2)));

        assert!(update_nested(&mut root, &[], Box::new(|_| json!({}))).is_err());
    }

    #[test]
    fn delete_ignores_missing_paths() {
        let mut root = root();
        assert!(!delete_nested(&mut root, &["a", "missing", "c"]));
        assert!(delete_nested(&mut root, &["a", "b"]));
        assert_eq!(get_nested(&root, &["a"]), Some(json!({})));
        assert!(delete_nested(&mut root, &[]));
        assert!(root.is_empty());
    }
}
