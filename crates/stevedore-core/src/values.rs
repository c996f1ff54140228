//! Configuration values with deep merge support
//!
//! Chart default values and deployment overrides are both JSON trees; the
//! merge is what the renderer consumes.

use serde_json::Value;

/// Deep merge `overlay` into `base`.
///
/// Merge semantics:
/// - Objects: recursive merge, overlay keys win
/// - Everything else (scalars, arrays, null): overlay replaces base
pub fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

/// Chart defaults merged with the deployment's overrides (overrides win)
pub fn effective_values(defaults: &Value, overrides: Option<&Value>) -> Value {
    let mut merged = if defaults.is_object() {
        defaults.clone()
    } else {
        Value::Object(serde_json::Map::new())
    };
    if let Some(overrides) = overrides {
        merge_values(&mut merged, overrides);
    }
    merged
}
