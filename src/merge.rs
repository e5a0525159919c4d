use serde_json::{Map, Value};

/// Last-writer-wins: copy every non-null field of `patch` onto `target`.
pub fn merge_present(target: &mut Value, patch: &Value) {
    let (Some(obj), Some(patch)) = (target.as_object_mut(), patch.as_object()) else {
        return;
    };
    for (k, v) in patch {
        if !v.is_null() {
            obj.insert(k.clone(), v.clone());
        }
    }
}

/// Insert or update `item` in the array `container[array_field]`, matching
/// on `item[key_field]`. Creates the array (and turns `container` into an
/// object) when missing.
pub fn upsert_by_key(container: &mut Value, array_field: &str, key_field: &str, item: Value) {
    ensure_array(container, array_field);
    let Some(list) = container.get_mut(array_field).and_then(Value::as_array_mut) else {
        return;
    };
    let key = item.get(key_field).cloned();
    let pos = key.and_then(|k| list.iter().position(|el| el.get(key_field) == Some(&k)));
    match pos {
        Some(i) => merge_present(&mut list[i], &item),
        None => list.push(item),
    }
}

/// Patch the element whose `key_field` equals `id`. Returns false if absent.
pub fn patch_by_key(
    container: &mut Value,
    array_field: &str,
    key_field: &str,
    id: &str,
    patch: &Value,
) -> bool {
    let Some(list) = container.get_mut(array_field).and_then(Value::as_array_mut) else {
        return false;
    };
    match list.iter_mut().find(|el| el.get(key_field).and_then(Value::as_str) == Some(id)) {
        Some(el) => {
            merge_present(el, patch);
            true
        }
        None => false,
    }
}

/// Remove the element whose `key_field` equals `id`. Returns whether one was removed.
pub fn remove_by_key(container: &mut Value, array_field: &str, key_field: &str, id: &str) -> bool {
    let Some(list) = container.get_mut(array_field).and_then(Value::as_array_mut) else {
        return false;
    };
    let before = list.len();
    list.retain(|el| el.get(key_field).and_then(Value::as_str) != Some(id));
    list.len() != before
}

fn ensure_array(container: &mut Value, field: &str) {
    if container.get(field).is_some_and(Value::is_array) {
        return;
    }
    match container.as_object_mut() {
        Some(obj) => {
            obj.insert(field.to_string(), Value::Array(Vec::new()));
        }
        None => {
            let mut obj = Map::new();
            obj.insert(field.to_string(), Value::Array(Vec::new()));
            *container = Value::Object(obj);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upsert_inserts_then_updates() {
        let mut labour = json!({ "id": "l1" });
        upsert_by_key(&mut labour, "contractions", "id", json!({ "id": "c1", "intensity": null }));
        upsert_by_key(&mut labour, "contractions", "id", json!({ "id": "c1", "intensity": 7 }));
        assert_eq!(labour["contractions"], json!([{ "id": "c1", "intensity": 7 }]));
    }

    #[test]
    fn remove_and_patch_report_presence() {
        let mut labour = json!({ "contractions": [{ "id": "c1" }, { "id": "c2" }] });
        assert!(patch_by_key(&mut labour, "contractions", "id", "c2", &json!({ "intensity": 3 })));
        assert!(!patch_by_key(&mut labour, "contractions", "id", "zz", &json!({})));
        assert!(remove_by_key(&mut labour, "contractions", "id", "c1"));
        assert!(!remove_by_key(&mut labour, "contractions", "id", "c1"));
        assert_eq!(labour["contractions"], json!([{ "id": "c2", "intensity": 3 }]));
    }
}
