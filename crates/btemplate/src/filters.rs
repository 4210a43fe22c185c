/*
 * filters.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Output filters.
//!
//! A filter is a named pure function from text (plus optional arguments) to
//! text. Interpolations chain filters with `|`; `filter` directives pass the
//! rendered output of their body through one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::TemplateValue;

/// A registered filter function.
pub type FilterFn = Arc<dyn Fn(&str, &[TemplateValue]) -> String + Send + Sync>;

/// Named filters known to an engine.
#[derive(Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, FilterFn>,
}

impl FilterRegistry {
    /// A registry with no filters at all.
    pub fn empty() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    /// A registry holding the built-in `html`, `url` and `raw` filters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.insert("html", |text: &str, _: &[TemplateValue]| escape_html(text));
        registry.insert("url", |text: &str, _: &[TemplateValue]| {
            encode_uri_component(text)
        });
        registry.insert("raw", |text: &str, _: &[TemplateValue]| text.to_string());
        registry
    }

    /// Register or overwrite a filter.
    pub fn insert<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&str, &[TemplateValue]) -> String + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    pub fn get(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FilterRegistry")
            .field("filters", &names)
            .finish()
    }
}

/// Escape `& < > " '` for HTML output.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encode everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
pub fn encode_uri_component(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(char::from(byte)),
            _ => {
                out.push('%');
                out.push(char::from(HEX[usize::from(byte >> 4)]));
                out.push(char::from(HEX[usize::from(byte & 0x0F)]));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>"), "&lt;b&gt;");
        assert_eq!(
            escape_html(r#"Tom & "Jerry's""#),
            "Tom &amp; &quot;Jerry&#39;s&quot;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_encode_uri_component() {
        assert_eq!(encode_uri_component("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(encode_uri_component("<b>"), "%3Cb%3E");
        assert_eq!(encode_uri_component("it's-(ok)_~*!."), "it's-(ok)_~*!.");
        assert_eq!(encode_uri_component("é"), "%C3%A9");
    }

    #[test]
    fn test_builtins_registered() {
        let registry = FilterRegistry::with_builtins();
        for name in ["html", "url", "raw"] {
            assert!(registry.contains(name), "missing builtin {}", name);
        }
        let raw = registry.get("raw").unwrap();
        assert_eq!(raw("<b>", &[]), "<b>");
    }

    #[test]
    fn test_insert_overwrites() {
        let mut registry = FilterRegistry::with_builtins();
        registry.insert("raw", |text: &str, _: &[TemplateValue]| text.to_uppercase());
        assert_eq!(registry.get("raw").unwrap()("abc", &[]), "ABC");
    }

    #[test]
    fn test_filter_receives_arguments() {
        let mut registry = FilterRegistry::empty();
        registry.insert("repeat", |text: &str, args: &[TemplateValue]| {
            let n = args.first().map(|v| v.to_number() as usize).unwrap_or(1);
            text.repeat(n)
        });
        assert_eq!(
            registry.get("repeat").unwrap()("ab", &[TemplateValue::Number(3.0)]),
            "ababab"
        );
        assert!(!registry.contains("html"));
    }
}
