//! Canonical JSON snapshots of replica state.
//!
//! Object keys are sorted, so two values compare equal whenever they serialize
//! the same, whatever order their maps were filled in.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// Pretty JSON with sorted object keys and a trailing newline.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value).context("serialize snapshot")?;
    let mut text = serde_json::to_string_pretty(&sorted(value)).context("format snapshot")?;
    text.push('\n');
    Ok(text)
}

/// Hex blake3 digest of [`canonical_json`].
pub fn canonical_digest<T: Serialize>(value: &T) -> Result<String> {
    let json = canonical_json(value)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}

/// JSON pointer of the first place `left` and `right` disagree, if any.
pub fn first_difference<A: Serialize, B: Serialize>(left: &A, right: &B) -> Result<Option<String>> {
    let left = sorted(serde_json::to_value(left).context("serialize left snapshot")?);
    let right = sorted(serde_json::to_value(right).context("serialize right snapshot")?);
    Ok(diverging_path(&left, &right, String::new()))
}

/// Fail with the diverging path unless both values snapshot identically.
pub fn assert_same_snapshot<A: Serialize, B: Serialize>(expected: &A, actual: &B) -> Result<()> {
    match first_difference(expected, actual)? {
        None => Ok(()),
        Some(path) if path.is_empty() => bail!("snapshots differ at the root"),
        Some(path) => bail!("snapshots differ at {path}"),
    }
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sorted(value)))
                    .collect::<Map<_, _>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

fn diverging_path(left: &Value, right: &Value, at: String) -> Option<String> {
    match (left, right) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, value) in a {
                let path = format!("{at}/{key}");
                match b.get(key) {
                    Some(other) => {
                        if let Some(found) = diverging_path(value, other, path) {
                            return Some(found);
                        }
                    }
                    None => return Some(path),
                }
            }
            b.keys()
                .find(|key| !a.contains_key(*key))
                .map(|key| format!("{at}/{key}"))
        }
        (Value::Array(a), Value::Array(b)) => {
            for (index, (x, y)) in a.iter().zip(b).enumerate() {
                if let Some(found) = diverging_path(x, y, format!("{at}/{index}")) {
                    return Some(found);
                }
            }
            (a.len() != b.len()).then(|| format!("{at}/{}", a.len().min(b.len())))
        }
        _ => (left != right).then_some(at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"b": 1, "a": {"y": 2, "x": [3, {"d": 4, "c": 5}]}});
        let b = json!({"a": {"x": [3, {"c": 5, "d": 4}], "y": 2}, "b": 1});
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
        assert_eq!(canonical_digest(&a).unwrap(), canonical_digest(&b).unwrap());
        assert!(assert_same_snapshot(&a, &b).is_ok());
    }

    #[test]
    fn array_order_matters() {
        let a = json!([1, 2]);
        let b = json!([2, 1]);
        assert_ne!(canonical_digest(&a).unwrap(), canonical_digest(&b).unwrap());
        assert_eq!(first_difference(&a, &b).unwrap().as_deref(), Some("/0"));
    }

    #[test]
    fn divergence_names_the_path() {
        let a = json!({"regions": [{"id": 1, "timer": 20}]});
        let b = json!({"regions": [{"id": 1, "timer": 21}]});
        assert_eq!(
            first_difference(&a, &b).unwrap().as_deref(),
            Some("/regions/0/timer")
        );
        let err = assert_same_snapshot(&a, &b).unwrap_err();
        assert!(err.to_string().contains("/regions/0/timer"));

        let shorter = json!({"regions": []});
        assert_eq!(
            first_difference(&a, &shorter).unwrap().as_deref(),
            Some("/regions/0")
        );
        assert_eq!(
            first_difference(&json!({"a": 1}), &json!({"a": 1, "b": 2}))
                .unwrap()
                .as_deref(),
            Some("/b")
        );
    }
}
