use serde_json::Map;
use serde_json::Value;

/// Copies into `remote` every field of `local` it lacks. Existing remote
/// fields are never touched. Returns the names of the fields added.
pub(crate) fn merge_missing(
    remote: &mut Map<String, Value>,
    local: &Map<String, Value>,
) -> Vec<String> {
    let mut added = Vec::new();
    for (field, value) in local {
        if !remote.contains_key(field) {
            remote.insert(field.clone(), value.clone());
            added.push(field.clone());
        }
    }
    added
}
