//! Property paths and binding attributes
//!
//! A property path is a dotted list of segments (`style.backgroundColor`)
//! addressing a value inside a node's property object. Binding attributes
//! spell the path in kebab-case because HTML parsers fold attribute names to
//! lowercase: `@style.background-color="{{ \"red\" }}"`.

use serde_json::{Map, Value};

use super::DomError;

/// Prefix marking a property binding attribute
pub const BINDING_PREFIX: char = '@';

const OPEN_DELIMITER: &str = "{{";
const CLOSE_DELIMITER: &str = "}}";

/// Read the value at `path`
pub fn get<'a>(properties: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = properties.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write `value` at `path`, creating intermediate objects
///
/// Fails if the path is empty or an intermediate segment holds a
/// non-object value.
pub fn set(properties: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), DomError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(DomError::InvalidPath(path.to_string()));
    }

    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| DomError::InvalidPath(path.to_string()))?;

    let mut current = properties;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match slot {
            Value::Object(map) => map,
            _ => return Err(DomError::InvalidPath(path.to_string())),
        };
    }

    current.insert(last.to_string(), value);
    Ok(())
}

/// `background-color` → `backgroundColor`
pub fn camel_case(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut upper = false;
    for c in segment.chars() {
        if c == '-' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Property path declared by a binding attribute name
///
/// Returns `None` for attributes that are not bindings.
pub fn binding_path(attribute: &str) -> Option<String> {
    let raw = attribute.strip_prefix(BINDING_PREFIX)?;
    if raw.is_empty() {
        return None;
    }
    Some(raw.split('.').map(camel_case).collect::<Vec<_>>().join("."))
}

/// Literal embedded in a binding attribute value
///
/// The value must be wrapped in `{{ }}`; the inside is parsed as JSON.
pub fn binding_literal(raw: &str) -> Result<Value, DomError> {
    let inner = raw
        .trim()
        .strip_prefix(OPEN_DELIMITER)
        .and_then(|rest| rest.strip_suffix(CLOSE_DELIMITER))
        .ok_or_else(|| DomError::InvalidBinding(raw.to_string()))?;

    serde_json::from_str(inner.trim()).map_err(|_| DomError::InvalidBinding(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut props = Map::new();
        set(&mut props, "style.backgroundColor", json!("red")).unwrap();
        assert_eq!(get(&props, "style.backgroundColor"), Some(&json!("red")));
        assert_eq!(Value::Object(props), json!({"style": {"backgroundColor": "red"}}));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut props = Map::new();
        set(&mut props, "value", json!("x")).unwrap();
        assert!(matches!(
            set(&mut props, "value.length", json!(1)),
            Err(DomError::InvalidPath(_))
        ));
        assert!(set(&mut props, "a..b", json!(1)).is_err());
        assert!(set(&mut props, "", json!(1)).is_err());
    }

    #[test]
    fn test_binding_path() {
        assert_eq!(binding_path("@value").as_deref(), Some("value"));
        assert_eq!(
            binding_path("@style.background-color").as_deref(),
            Some("style.backgroundColor")
        );
        assert_eq!(binding_path("data-ampere"), None);
        assert_eq!(binding_path("@"), None);
    }

    #[test]
    fn test_binding_literal() {
        assert_eq!(binding_literal("{{ \"red\" }}").unwrap(), json!("red"));
        assert_eq!(binding_literal("{{42}}").unwrap(), json!(42));
        assert_eq!(binding_literal(" {{ {\"a\": [1, 2]} }} ").unwrap(), json!({"a": [1, 2]}));
        assert!(binding_literal("red").is_err());
        assert!(binding_literal("{{ red }}").is_err());
    }
}
