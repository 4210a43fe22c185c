/*
 * lexer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Source splitting.
//!
//! Two passes share the same delimiter scanning: the directive pass splits a
//! source into literal text and directive payloads using the command
//! delimiters, and the interpolation pass splits literal text into literal
//! pieces and `${...}` expressions using the variable delimiters.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{TemplateError, TemplateResult};
use crate::expr::Delimiters;
use crate::options::EngineOptions;

static DIRECTIVE_SYNTAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(/)?([a-z]+)\s*(?::([\s\S]+))?$").expect("directive syntax regex is valid")
});

static COMMENT_SYNTAX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*//").expect("comment syntax regex is valid"));

/// The closed set of directive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Target,
    Block,
    Import,
    Use,
    Var,
    For,
    If,
    Elif,
    Else,
    Filter,
}

impl DirectiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "target" => DirectiveKind::Target,
            "block" => DirectiveKind::Block,
            "import" => DirectiveKind::Import,
            "use" => DirectiveKind::Use,
            "var" => DirectiveKind::Var,
            "for" => DirectiveKind::For,
            "if" => DirectiveKind::If,
            "elif" => DirectiveKind::Elif,
            "else" => DirectiveKind::Else,
            "filter" => DirectiveKind::Filter,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DirectiveKind::Target => "target",
            DirectiveKind::Block => "block",
            DirectiveKind::Import => "import",
            DirectiveKind::Use => "use",
            DirectiveKind::Var => "var",
            DirectiveKind::For => "for",
            DirectiveKind::If => "if",
            DirectiveKind::Elif => "elif",
            DirectiveKind::Else => "else",
            DirectiveKind::Filter => "filter",
        }
    }

    /// The kind of open node a `/kind` directive closes.
    ///
    /// `elif` and `else` branches live inside their `if`, so closing either
    /// closes the whole chain.
    pub fn closed_kind(self) -> Self {
        match self {
            DirectiveKind::Elif | DirectiveKind::Else => DirectiveKind::If,
            other => other,
        }
    }
}

/// A directive payload found between command delimiters.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// `true` for `/kind` payloads.
    pub closing: bool,
    pub kind: DirectiveKind,
    /// The raw argument after `:`, trimmed. Empty when absent.
    pub argument: String,
}

/// Output of the directive pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    Directive(Directive),
}

/// A piece of literal text after the interpolation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment<'a> {
    Literal(&'a str),
    /// The expression between the variable delimiters, delimiters excluded.
    Interpolation(&'a str),
}

/// Parts of a `for` argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ForParts<'a> {
    /// The list expression, variable delimiters excluded.
    pub list: &'a str,
    pub item: &'a str,
    pub index: Option<&'a str>,
}

/// Delimiter configuration plus the grammar derived from it.
#[derive(Debug, Clone)]
pub struct Lexer {
    command_open: String,
    command_close: String,
    variable_open: String,
    variable_close: String,
    for_syntax: Regex,
}

impl Lexer {
    pub fn new(options: &EngineOptions) -> TemplateResult<Self> {
        let open = regex::escape(&options.variable_open);
        let close = regex::escape(&options.variable_close);
        let binding = format!(r"(?:{open}\s*([a-z0-9_]+)\s*{close}|([a-z0-9_]+))");
        let pattern = format!(
            r"(?i)^\s*({open}[\s\S]+{close})\s*as\s+{binding}\s*(?:,\s*{bindex})?\s*$",
            bindex = binding,
        );
        let for_syntax = Regex::new(&pattern).map_err(|e| TemplateError::InvalidOptions {
            message: format!("variable delimiters produce an invalid grammar: {}", e),
        })?;

        Ok(Self {
            command_open: options.command_open.clone(),
            command_close: options.command_close.clone(),
            variable_open: options.variable_open.clone(),
            variable_close: options.variable_close.clone(),
            for_syntax,
        })
    }

    pub fn variable_open(&self) -> &str {
        &self.variable_open
    }

    pub fn variable_close(&self) -> &str {
        &self.variable_close
    }

    /// Variable delimiters in the form the expression parser takes.
    pub fn delimiters(&self) -> Delimiters<'_> {
        Delimiters {
            open: &self.variable_open,
            close: &self.variable_close,
        }
    }

    /// Split a source into literal text and directives.
    ///
    /// Payloads that do not name a known directive are kept as literal text,
    /// delimiters included. Adjacent literal pieces are merged.
    pub fn tokenize(&self, source: &str) -> Vec<Token> {
        let open = self.command_open.as_str();
        let close = self.command_close.as_str();
        let mut tokens = Vec::new();
        let mut text = String::new();
        let mut pos = 0;

        while let Some(found) = source[pos..].find(open) {
            let start = pos + found;
            text.push_str(&source[pos..start]);

            let body = start + open.len();
            let next_open = source[body..].find(open).map(|i| body + i);
            let next_close = source[body..].find(close).map(|i| body + i);

            match next_close {
                Some(end) if next_open.is_none_or(|o| end <= o) => {
                    let payload = &source[body..end];
                    match parse_payload(payload) {
                        Some(directive) => {
                            if !text.is_empty() {
                                tokens.push(Token::Text(std::mem::take(&mut text)));
                            }
                            tokens.push(Token::Directive(directive));
                        }
                        None if COMMENT_SYNTAX.is_match(payload) => {}
                        None => text.push_str(&source[start..end + close.len()]),
                    }
                    pos = end + close.len();
                }
                _ => {
                    // Unterminated: literal up to the next opening delimiter.
                    let stop = next_open.unwrap_or(source.len());
                    text.push_str(&source[start..stop]);
                    pos = stop;
                }
            }
        }

        text.push_str(&source[pos..]);
        if !text.is_empty() {
            tokens.push(Token::Text(text));
        }
        tokens
    }

    /// Split literal text into literal pieces and interpolation expressions.
    pub fn split_interpolations<'a>(&self, text: &'a str) -> Vec<Segment<'a>> {
        let open = self.variable_open.as_str();
        let close = self.variable_close.as_str();
        let mut segments = Vec::new();
        let mut literal_start = 0;
        let mut pos = 0;

        while let Some(found) = text[pos..].find(open) {
            let start = pos + found;
            let body = start + open.len();
            match find_closing(&text[body..], open, close) {
                Some(len) => {
                    if start > literal_start {
                        segments.push(Segment::Literal(&text[literal_start..start]));
                    }
                    segments.push(Segment::Interpolation(&text[body..body + len]));
                    pos = body + len + close.len();
                    literal_start = pos;
                }
                None => break,
            }
        }

        if literal_start < text.len() {
            segments.push(Segment::Literal(&text[literal_start..]));
        }
        segments
    }

    /// Match a `for` argument: `${list} as item[, index]`.
    pub fn split_for_argument<'a>(&self, argument: &'a str) -> Option<ForParts<'a>> {
        let caps = self.for_syntax.captures(argument)?;
        let list = caps.get(1)?.as_str();

        // The list must be exactly one interpolation, not `${a} + ${b}`.
        let inner = &list[self.variable_open.len()..];
        let len = find_closing(inner, &self.variable_open, &self.variable_close)?;
        if len + self.variable_close.len() != inner.len() {
            return None;
        }

        let item = caps.get(2).or_else(|| caps.get(3))?.as_str();
        let index = caps.get(4).or_else(|| caps.get(5)).map(|m| m.as_str());
        Some(ForParts {
            list: &inner[..len],
            item,
            index,
        })
    }
}

/// Find the closing delimiter matching an already-consumed opening one.
///
/// `text` starts right after the opening delimiter. Every further opening
/// delimiter raises the depth by one and every closing one lowers it; the
/// result is the byte length of the enclosed expression.
pub fn find_closing(text: &str, open: &str, close: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut pos = 0;
    loop {
        let next_close = pos + text[pos..].find(close)?;
        match text[pos..].find(open).map(|i| pos + i) {
            Some(next_open) if next_open < next_close => {
                depth += 1;
                pos = next_open + open.len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some(next_close);
                }
                pos = next_close + close.len();
            }
        }
    }
}

fn parse_payload(payload: &str) -> Option<Directive> {
    let caps = DIRECTIVE_SYNTAX.captures(payload)?;
    let kind = DirectiveKind::from_name(caps.get(2)?.as_str())?;
    Some(Directive {
        closing: caps.get(1).is_some(),
        kind,
        argument: caps
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lexer() -> Lexer {
        Lexer::new(&EngineOptions::default()).unwrap()
    }

    fn directive(closing: bool, kind: DirectiveKind, argument: &str) -> Token {
        Token::Directive(Directive {
            closing,
            kind,
            argument: argument.to_string(),
        })
    }

    #[test]
    fn test_tokenize_directives_and_text() {
        let tokens = lexer().tokenize("a<!-- if: x -->b<!--/if-->c");
        assert_eq!(
            tokens,
            vec![
                Token::Text("a".to_string()),
                directive(false, DirectiveKind::If, "x"),
                Token::Text("b".to_string()),
                directive(true, DirectiveKind::If, ""),
                Token::Text("c".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_directive_is_literal() {
        let tokens = lexer().tokenize("a<!-- just a comment -->b<!--loop: x-->c");
        assert_eq!(
            tokens,
            vec![Token::Text(
                "a<!-- just a comment -->b<!--loop: x-->c".to_string()
            )]
        );
    }

    #[test]
    fn test_uppercase_directive_is_literal() {
        let tokens = lexer().tokenize("<!--IF: x-->");
        assert_eq!(tokens, vec![Token::Text("<!--IF: x-->".to_string())]);
    }

    #[test]
    fn test_unterminated_directive_is_literal() {
        let tokens = lexer().tokenize("a<!-- if: x <!--else-->b<!-- open");
        assert_eq!(
            tokens,
            vec![
                Token::Text("a<!-- if: x ".to_string()),
                directive(false, DirectiveKind::Else, ""),
                Token::Text("b<!-- open".to_string()),
            ]
        );
    }

    #[test]
    fn test_comment_payload_dropped() {
        let tokens = lexer().tokenize("a<!-- // -->b<!-- // note: ${x} -->c");
        assert_eq!(tokens, vec![Token::Text("abc".to_string())]);
    }

    #[test]
    fn test_argument_is_trimmed_and_multiline() {
        let tokens = lexer().tokenize("<!-- var:\n  total = 1 +\n 2\n-->");
        assert_eq!(tokens, vec![directive(false, DirectiveKind::Var, "total = 1 +\n 2")]);
    }

    #[test]
    fn test_split_interpolations() {
        let segments = lexer().split_interpolations("Hi ${name}, ${greeting|raw}!");
        assert_eq!(
            segments,
            vec![
                Segment::Literal("Hi "),
                Segment::Interpolation("name"),
                Segment::Literal(", "),
                Segment::Interpolation("greeting|raw"),
                Segment::Literal("!"),
            ]
        );
    }

    #[test]
    fn test_split_interpolations_nested_open() {
        let segments = lexer().split_interpolations("${a|default(${b})} tail");
        assert_eq!(
            segments,
            vec![
                Segment::Interpolation("a|default(${b})"),
                Segment::Literal(" tail"),
            ]
        );
    }

    #[test]
    fn test_split_interpolations_unterminated() {
        let segments = lexer().split_interpolations("cost: ${ 5");
        assert_eq!(segments, vec![Segment::Literal("cost: ${ 5")]);
    }

    #[test]
    fn test_find_closing_depth() {
        assert_eq!(find_closing("a}", "${", "}"), Some(1));
        assert_eq!(find_closing("a${b}c}", "${", "}"), Some(6));
        assert_eq!(find_closing("a${b}", "${", "}"), None);
    }

    #[test]
    fn test_split_for_argument() {
        let lexer = lexer();
        assert_eq!(
            lexer.split_for_argument("${items} as it"),
            Some(ForParts {
                list: "items",
                item: "it",
                index: None
            })
        );
        assert_eq!(
            lexer.split_for_argument("${ page.items } as ${item}, ${i}"),
            Some(ForParts {
                list: " page.items ",
                item: "item",
                index: Some("i")
            })
        );
        assert_eq!(lexer.split_for_argument("items as it"), None);
        assert_eq!(lexer.split_for_argument("${a} + ${b} as it"), None);
    }

    #[test]
    fn test_custom_delimiters() {
        let options = EngineOptions {
            command_open: "{%".to_string(),
            command_close: "%}".to_string(),
            variable_open: "{{".to_string(),
            variable_close: "}}".to_string(),
            ..EngineOptions::default()
        };
        let lexer = Lexer::new(&options).unwrap();
        assert_eq!(
            lexer.tokenize("{% for: {{xs}} as x %}{{x}}{%/for%}"),
            vec![
                directive(false, DirectiveKind::For, "{{xs}} as x"),
                Token::Text("{{x}}".to_string()),
                directive(true, DirectiveKind::For, ""),
            ]
        );
        assert_eq!(
            lexer.split_for_argument("{{xs}} as x").map(|p| p.list),
            Some("xs")
        );
        assert_eq!(
            lexer.split_interpolations("<{{x}}>"),
            vec![
                Segment::Literal("<"),
                Segment::Interpolation("x"),
                Segment::Literal(">")
            ]
        );
    }
}
