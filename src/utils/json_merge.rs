//! Shallow-recursive JSON merge used for node data overrides.

use serde_json::Value;

/// Merge `patch` into `base`: objects merge key-by-key, everything else
/// replaces. `null` in the patch clears the key.
pub fn merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    base.remove(key);
                } else {
                    merge(base.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}
