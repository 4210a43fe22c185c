/*
 * options.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Engine configuration.
 *
 * Options use camelCase keys when read from JSON so that configuration
 * written for the directive syntax (`commandOpen`, `defaultFilter`, ...)
 * can be passed through unchanged.
 */

use serde::{Deserialize, Serialize};

use crate::error::{TemplateError, TemplateResult};

/// How duplicate target or block names are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingConflict {
    /// Reject the later definition with [`TemplateError::NamingConflict`].
    #[default]
    Error,
    /// The later definition replaces the earlier one.
    Override,
    /// The earlier definition is kept, the later one is dropped.
    Ignore,
}

/// The running configuration of an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineOptions {
    pub command_open: String,
    pub command_close: String,
    pub variable_open: String,
    pub variable_close: String,
    /// Filter applied to text interpolations that name no filter. Empty disables it.
    pub default_filter: String,
    /// Drop literal text that is whitespace only.
    pub strip: bool,
    pub naming_conflict: NamingConflict,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            command_open: "<!--".to_string(),
            command_close: "-->".to_string(),
            variable_open: "${".to_string(),
            variable_close: "}".to_string(),
            default_filter: "html".to_string(),
            strip: false,
            naming_conflict: NamingConflict::Error,
        }
    }
}

/// A partial set of options merged into the running configuration.
///
/// Expected structure when read from JSON:
/// ```json
/// {
///   "commandOpen": "<%",
///   "commandClose": "%>",
///   "defaultFilter": "raw",
///   "strip": true,
///   "namingConflict": "override"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsPatch {
    pub command_open: Option<String>,
    pub command_close: Option<String>,
    pub variable_open: Option<String>,
    pub variable_close: Option<String>,
    pub default_filter: Option<String>,
    pub strip: Option<bool>,
    pub naming_conflict: Option<NamingConflict>,
}

impl OptionsPatch {
    /// Parse a patch from JSON. Unrecognized keys are ignored.
    pub fn from_json(value: serde_json::Value) -> TemplateResult<Self> {
        serde_json::from_value(value).map_err(|e| TemplateError::InvalidOptions {
            message: e.to_string(),
        })
    }
}

impl EngineOptions {
    /// Merge a patch, returning the resulting configuration.
    ///
    /// The receiver is left untouched if the merged options are invalid.
    pub fn merged(&self, patch: OptionsPatch) -> TemplateResult<Self> {
        let mut next = self.clone();
        if let Some(v) = patch.command_open {
            next.command_open = v;
        }
        if let Some(v) = patch.command_close {
            next.command_close = v;
        }
        if let Some(v) = patch.variable_open {
            next.variable_open = v;
        }
        if let Some(v) = patch.variable_close {
            next.variable_close = v;
        }
        if let Some(v) = patch.default_filter {
            next.default_filter = v;
        }
        if let Some(v) = patch.strip {
            next.strip = v;
        }
        if let Some(v) = patch.naming_conflict {
            next.naming_conflict = v;
        }
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> TemplateResult<()> {
        let delimiters = [
            ("commandOpen", &self.command_open),
            ("commandClose", &self.command_close),
            ("variableOpen", &self.variable_open),
            ("variableClose", &self.variable_close),
        ];
        for (key, value) in delimiters {
            if value.is_empty() {
                return Err(TemplateError::InvalidOptions {
                    message: format!("`{}` must not be empty", key),
                });
            }
        }
        Ok(())
    }
}
