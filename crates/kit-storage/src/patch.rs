use serde_json::{Map, Value};

/// Compute the RFC 7386 merge patch that turns `old` into `new`.
///
/// Returns `None` when the documents are equal. Arrays are replaced
/// wholesale, as merge patch has no way to address elements.
pub fn merge_diff(old: &Value, new: &Value) -> Option<Value> {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (field, new_value) in new {
                match old.get(field) {
                    Some(old_value) => {
                        if let Some(inner) = merge_diff(old_value, new_value) {
                            patch.insert(field.clone(), inner);
                        }
                    }
                    None => {
                        patch.insert(field.clone(), new_value.clone());
                    }
                }
            }
            for field in old.keys() {
                if !new.contains_key(field) {
                    patch.insert(field.clone(), Value::Null);
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        (old, new) if old == new => None,
        (_, new) => Some(new.clone()),
    }
}
