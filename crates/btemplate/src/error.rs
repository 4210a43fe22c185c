/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template compilation and rendering.

use thiserror::Error;

/// Errors that can occur during template operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    /// A directive's argument does not match its grammar.
    #[error("Invalid `{directive}` directive `{argument}`: {message}")]
    Syntax {
        directive: String,
        argument: String,
        message: String,
    },

    /// An open directive could not be closed where a close was required.
    #[error("Structural error at `{directive}`: {message}")]
    Structural { directive: String, message: String },

    /// An interpolation or filter directive names an unregistered filter.
    #[error("Unknown filter: {name}")]
    UnknownFilter { name: String },

    /// A master or import reference is missing or cyclic.
    #[error("Master chain error in target `{target}`: {message}")]
    MasterChain { target: String, message: String },

    /// A target or block name was defined twice under the `error` policy.
    #[error("Naming conflict: {kind} `{name}` is already defined")]
    NamingConflict { kind: String, name: String },

    /// `use` directives nested deeper than the engine allows.
    #[error("Recursive use detected (depth > {max_depth}): {name}")]
    RecursiveUse { name: String, max_depth: usize },

    /// Options rejected by `Engine::configure`.
    #[error("Invalid options: {message}")]
    InvalidOptions { message: String },
}

impl TemplateError {
    pub(crate) fn syntax(
        directive: impl Into<String>,
        argument: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        TemplateError::Syntax {
            directive: directive.into(),
            argument: argument.into(),
            message: message.into(),
        }
    }

    pub(crate) fn structural(directive: impl Into<String>, message: impl Into<String>) -> Self {
        TemplateError::Structural {
            directive: directive.into(),
            message: message.into(),
        }
    }

    pub(crate) fn master_chain(target: impl Into<String>, message: impl Into<String>) -> Self {
        TemplateError::MasterChain {
            target: target.into(),
            message: message.into(),
        }
    }
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_message_names_directive_and_argument() {
        let err = TemplateError::syntax("for", "items", "expected `as`");
        insta::assert_snapshot!(err.to_string(), @"Invalid `for` directive `items`: expected `as`");
    }

    #[test]
    fn test_structural_message() {
        let err = TemplateError::structural("for", "`for` must be closed manually");
        insta::assert_snapshot!(err.to_string(), @"Structural error at `for`: `for` must be closed manually");
    }

    #[test]
    fn test_master_chain_message() {
        let err = TemplateError::master_chain("child", "master `base` is not defined");
        assert_eq!(
            err.to_string(),
            "Master chain error in target `child`: master `base` is not defined"
        );
    }
}
