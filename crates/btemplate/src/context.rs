/*
 * context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Values seen by templates and the data context a render starts from.

use std::collections::HashMap;

/// A dynamically typed value, as produced by JSON data or expressions.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TemplateValue {
    /// A string value.
    String(String),

    /// A numeric value.
    Number(f64),

    /// A boolean value.
    Bool(bool),

    /// A list of values.
    List(Vec<TemplateValue>),

    /// A map of string keys to values.
    Map(HashMap<String, TemplateValue>),

    /// A null/missing value.
    #[default]
    Null,
}

impl TemplateValue {
    /// Whether `if` conditions and logical operators treat this value as true.
    ///
    /// Empty text, zero, NaN, `false`, null, empty maps and empty lists are
    /// false. The text `"false"` and a list of falsy items are true.
    pub fn is_truthy(&self) -> bool {
        match self {
            TemplateValue::Bool(b) => *b,
            TemplateValue::String(s) => !s.is_empty(),
            TemplateValue::Number(n) => *n != 0.0 && !n.is_nan(),
            TemplateValue::List(items) => !items.is_empty(),
            TemplateValue::Map(m) => !m.is_empty(),
            TemplateValue::Null => false,
        }
    }

    /// Follow a dotted path.
    ///
    /// Map segments are looked up by key; list segments must be decimal
    /// indices. Any miss along the way yields `None`.
    pub fn get_path(&self, path: &[&str]) -> Option<&TemplateValue> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };

        match self {
            TemplateValue::Map(m) => m.get(*first).and_then(|v| v.get_path(rest)),
            TemplateValue::List(items) => first
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .and_then(|v| v.get_path(rest)),
            _ => None,
        }
    }

    /// Text emitted for this value by an interpolation.
    ///
    /// Integral numbers print without a fraction, `false` and null print
    /// nothing, lists print their elements back to back and maps print `true`.
    pub fn render(&self) -> String {
        match self {
            TemplateValue::String(s) => s.clone(),
            TemplateValue::Number(n) => format_number(*n),
            TemplateValue::Bool(true) => "true".to_string(),
            TemplateValue::Bool(false) => String::new(),
            TemplateValue::List(items) => items.iter().map(TemplateValue::render).collect(),
            TemplateValue::Map(_) => "true".to_string(),
            TemplateValue::Null => String::new(),
        }
    }

    /// Numeric view used by arithmetic and ordering. Non-numeric text is NaN.
    pub fn to_number(&self) -> f64 {
        match self {
            TemplateValue::Number(n) => *n,
            TemplateValue::Bool(b) => f64::from(u8::from(*b)),
            TemplateValue::String(s) if s.trim().is_empty() => 0.0,
            TemplateValue::String(s) => s.trim().parse().unwrap_or(f64::NAN),
            TemplateValue::Null => 0.0,
            TemplateValue::List(_) | TemplateValue::Map(_) => f64::NAN,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else if n.is_nan() {
        "NaN".to_string()
    } else {
        n.to_string()
    }
}

impl From<&str> for TemplateValue {
    fn from(s: &str) -> Self {
        TemplateValue::String(s.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(s: String) -> Self {
        TemplateValue::String(s)
    }
}

impl From<bool> for TemplateValue {
    fn from(b: bool) -> Self {
        TemplateValue::Bool(b)
    }
}

impl From<f64> for TemplateValue {
    fn from(n: f64) -> Self {
        TemplateValue::Number(n)
    }
}

impl From<i64> for TemplateValue {
    fn from(n: i64) -> Self {
        TemplateValue::Number(n as f64)
    }
}

impl From<Vec<TemplateValue>> for TemplateValue {
    fn from(items: Vec<TemplateValue>) -> Self {
        TemplateValue::List(items)
    }
}

impl From<serde_json::Value> for TemplateValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => TemplateValue::Null,
            serde_json::Value::Bool(b) => TemplateValue::Bool(b),
            serde_json::Value::Number(n) => TemplateValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => TemplateValue::String(s),
            serde_json::Value::Array(items) => {
                TemplateValue::List(items.into_iter().map(TemplateValue::from).collect())
            }
            serde_json::Value::Object(map) => TemplateValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, TemplateValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// The data context a renderer is invoked with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateContext {
    variables: HashMap<String, TemplateValue>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a JSON object. Non-object values yield an empty context.
    pub fn from_json(value: serde_json::Value) -> Self {
        match TemplateValue::from(value) {
            TemplateValue::Map(variables) => Self { variables },
            _ => Self::default(),
        }
    }

    /// Bind a top-level name.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<TemplateValue>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Get a top-level variable.
    pub fn get(&self, key: &str) -> Option<&TemplateValue> {
        self.variables.get(key)
    }

    /// Look up a dotted path such as `["user", "name"]`.
    pub fn get_path(&self, path: &[&str]) -> Option<&TemplateValue> {
        let (first, rest) = path.split_first()?;
        self.get(first).and_then(|v| v.get_path(rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        let truthy = [
            json!(true),
            json!("false"),
            json!(2),
            json!(-0.5),
            json!([0, "", null]),
            json!({"k": null}),
        ];
        for value in truthy {
            assert!(TemplateValue::from(value.clone()).is_truthy(), "{}", value);
        }

        let falsy = [json!(false), json!(""), json!(0), json!([]), json!({}), json!(null)];
        for value in falsy {
            assert!(!TemplateValue::from(value.clone()).is_truthy(), "{}", value);
        }
        assert!(!TemplateValue::Number(f64::NAN).is_truthy());
    }

    #[test]
    fn test_render_mixed_values() {
        let value = TemplateValue::from(json!(["a", 1, true, false, null, {"k": 1}]));
        assert_eq!(value.render(), "a1truetrue");
    }

    #[test]
    fn test_get_path_indexes_lists() {
        let ctx = TemplateContext::from_json(json!({"items": [{"name": "a"}, {"name": "b"}]}));
        assert_eq!(
            ctx.get_path(&["items", "1", "name"]),
            Some(&TemplateValue::String("b".to_string()))
        );
        assert_eq!(ctx.get_path(&["items", "7", "name"]), None);
        assert_eq!(ctx.get_path(&["items", "first"]), None);
    }

    #[test]
    fn test_render_numbers() {
        assert_eq!(TemplateValue::Number(3.0).render(), "3");
        assert_eq!(TemplateValue::Number(-2.5).render(), "-2.5");
        assert_eq!(TemplateValue::Number(f64::NAN).render(), "NaN");
    }

    #[test]
    fn test_from_json_non_object_is_empty() {
        assert_eq!(TemplateContext::from_json(json!([1, 2])), TemplateContext::new());
    }

    #[test]
    fn test_to_number() {
        assert_eq!(TemplateValue::from(" 42 ").to_number(), 42.0);
        assert_eq!(TemplateValue::Bool(true).to_number(), 1.0);
        assert!(TemplateValue::from("abc").to_number().is_nan());
    }
}
