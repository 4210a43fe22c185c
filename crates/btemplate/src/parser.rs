/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Directive stream to target trees.
//!
//! The parser keeps a stack of open frames. Literal text and leaf
//! directives attach to the frame on top; container directives push a new
//! frame and attach their node to the parent when they close. Targets are
//! always the bottom frame: opening one closes everything that is open.

use std::collections::{HashMap, HashSet};
use std::mem;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::{
    Block, Branch, BranchKind, Conditional, FilterNode, ForLoop, Import, Node, Target,
    TargetState, Text, TextPart, Use, Var, collect_blocks,
};
use crate::error::{TemplateError, TemplateResult};
use crate::expr::{
    Expr, FilterCall, Interpolation, parse_arguments, parse_expression, parse_interpolation,
};
use crate::filters::FilterRegistry;
use crate::lexer::{Directive, DirectiveKind, Lexer, Segment, Token};
use crate::options::NamingConflict;

static TARGET_SYNTAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([a-z0-9/_-]+)\s*(?:\(\s*master\s*=\s*([a-z0-9/_-]+)\s*\))?\s*$")
        .expect("target syntax regex is valid")
});

static NAME_SYNTAX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*([a-z0-9/_-]+)\s*$").expect("name syntax regex is valid"));

static USE_SYNTAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([a-z0-9/_-]+)\s*(?:\(([\s\S]*)\))?\s*$")
        .expect("use syntax regex is valid")
});

static FILTER_SYNTAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([a-z0-9_-]+)\s*(?:\(([\s\S]*)\))?\s*$")
        .expect("filter syntax regex is valid")
});

static VAR_SYNTAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([a-z0-9_]+)\s*=([\s\S]*)$").expect("var syntax regex is valid")
});

/// What the parser needs from the engine.
#[derive(Debug, Clone, Copy)]
pub struct ParseConfig<'a> {
    pub lexer: &'a Lexer,
    pub filters: &'a FilterRegistry,
    pub naming_conflict: NamingConflict,
    pub strip: bool,
}

/// Parse a source into the targets it defines, in source order.
///
/// Stray text outside any target is collected into anonymous targets named
/// `__<n>`, with `n` drawn from `next_guid`.
pub fn parse_source(
    source: &str,
    config: ParseConfig<'_>,
    next_guid: &mut u64,
) -> TemplateResult<Vec<Target>> {
    let mut state = ParseState::new(config, next_guid);
    for token in config.lexer.tokenize(source) {
        match token {
            Token::Text(text) => state.text(&text)?,
            Token::Directive(directive) if directive.closing => state.close(directive.kind)?,
            Token::Directive(directive) => state.open(directive)?,
        }
    }
    state.finish()
}

#[derive(Debug)]
enum FrameKind {
    Target {
        name: String,
        master: Option<String>,
    },
    Block {
        name: String,
    },
    Import {
        name: String,
    },
    For {
        list: Interpolation,
        item: String,
        index: Option<String>,
    },
    If {
        finished: Vec<Branch>,
        kind: BranchKind,
        condition: Option<Expr>,
    },
    Filter {
        call: FilterCall,
    },
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    children: Vec<Node>,
    /// Block names declared in this scope. Only used by targets and imports.
    block_names: HashSet<String>,
    has_duplicate_blocks: bool,
}

impl Frame {
    fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
            block_names: HashSet::new(),
            has_duplicate_blocks: false,
        }
    }

    fn directive(&self) -> DirectiveKind {
        match self.kind {
            FrameKind::Target { .. } => DirectiveKind::Target,
            FrameKind::Block { .. } => DirectiveKind::Block,
            FrameKind::Import { .. } => DirectiveKind::Import,
            FrameKind::For { .. } => DirectiveKind::For,
            FrameKind::If { .. } => DirectiveKind::If,
            FrameKind::Filter { .. } => DirectiveKind::Filter,
        }
    }

    fn auto_closes(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::Target { .. } | FrameKind::Import { .. } | FrameKind::If { .. }
        )
    }

    fn is_block_scope(&self) -> bool {
        matches!(self.kind, FrameKind::Target { .. } | FrameKind::Import { .. })
    }
}

/// Everything threaded through one parse.
struct ParseState<'a> {
    config: ParseConfig<'a>,
    next_guid: &'a mut u64,
    stack: Vec<Frame>,
    targets: Vec<Target>,
}

impl<'a> ParseState<'a> {
    fn new(config: ParseConfig<'a>, next_guid: &'a mut u64) -> Self {
        Self {
            config,
            next_guid,
            stack: Vec::new(),
            targets: Vec::new(),
        }
    }

    fn finish(mut self) -> TemplateResult<Vec<Target>> {
        if !self.stack.is_empty() {
            self.close_through(0)?;
        }
        Ok(self.targets)
    }

    // -------------------------------------------------------------------------
    // Stack discipline
    // -------------------------------------------------------------------------

    fn ensure_target(&mut self) {
        if self.stack.is_empty() {
            let name = format!("__{}", *self.next_guid);
            *self.next_guid += 1;
            tracing::trace!(target_name = %name, "opening anonymous target");
            self.stack.push(Frame::new(FrameKind::Target { name, master: None }));
        }
    }

    fn attach(&mut self, node: Node) {
        self.ensure_target();
        if let Some(top) = self.stack.last_mut() {
            top.children.push(node);
        }
    }

    fn find_frame(&self, kind: DirectiveKind) -> Option<usize> {
        self.stack.iter().rposition(|frame| frame.directive() == kind)
    }

    /// Pop every frame above `index`, which must all auto-close, then `index` itself.
    fn close_through(&mut self, index: usize) -> TemplateResult<()> {
        self.close_above(index)?;
        self.pop_frame()
    }

    fn close_above(&mut self, index: usize) -> TemplateResult<()> {
        while self.stack.len() > index + 1 {
            if let Some(top) = self.stack.last() {
                if !top.auto_closes() {
                    let name = top.directive().as_str();
                    return Err(TemplateError::structural(
                        name,
                        format!("`{}` must be closed manually", name),
                    ));
                }
            }
            self.pop_frame()?;
        }
        Ok(())
    }

    fn pop_frame(&mut self) -> TemplateResult<()> {
        let Some(mut frame) = self.stack.pop() else {
            return Ok(());
        };
        if frame.has_duplicate_blocks {
            dedupe_blocks(&mut frame.children, self.config.naming_conflict);
        }

        let node = match frame.kind {
            FrameKind::Target { name, master } => {
                let mut target = Target::new(name, master);
                target.children = frame.children;
                target.advance(TargetState::Read);
                return self.finish_target(target);
            }
            FrameKind::Block { name } => Node::Block(Block {
                name,
                children: frame.children,
            }),
            FrameKind::Import { name } => Node::Import(Import {
                name,
                children: frame.children,
                resolved: None,
            }),
            FrameKind::For { list, item, index } => Node::For(ForLoop {
                list,
                item,
                index,
                children: frame.children,
            }),
            FrameKind::If {
                mut finished,
                kind,
                condition,
            } => {
                finished.push(Branch {
                    kind,
                    condition,
                    children: frame.children,
                });
                Node::If(Conditional { branches: finished })
            }
            FrameKind::Filter { call } => Node::Filter(FilterNode {
                call,
                children: frame.children,
            }),
        };
        self.attach(node);
        Ok(())
    }

    fn finish_target(&mut self, mut target: Target) -> TemplateResult<()> {
        target.advance(if target.master.is_some() {
            TargetState::Ready
        } else {
            TargetState::Applied
        });

        let existing = self.targets.iter().position(|t| t.name == target.name);
        match (existing, self.config.naming_conflict) {
            (None, _) => self.targets.push(target),
            (Some(_), NamingConflict::Error) => {
                return Err(TemplateError::NamingConflict {
                    kind: "target".to_string(),
                    name: target.name,
                });
            }
            (Some(i), NamingConflict::Override) => {
                tracing::warn!(
                    target_name = %target.name,
                    "target redefined, later definition wins"
                );
                self.targets[i] = target;
            }
            (Some(_), NamingConflict::Ignore) => {
                tracing::debug!(target_name = %target.name, "duplicate target ignored");
            }
        }
        Ok(())
    }

    fn declare_block(&mut self, name: &str) -> TemplateResult<()> {
        let policy = self.config.naming_conflict;
        let Some(scope) = self.stack.iter_mut().rev().find(|f| f.is_block_scope()) else {
            return Ok(());
        };
        if scope.block_names.insert(name.to_string()) {
            return Ok(());
        }
        match policy {
            NamingConflict::Error => {
                return Err(TemplateError::NamingConflict {
                    kind: "block".to_string(),
                    name: name.to_string(),
                });
            }
            NamingConflict::Override => {
                tracing::warn!(block = %name, "block redefined, later definition wins");
            }
            NamingConflict::Ignore => {
                tracing::debug!(block = %name, "duplicate block ignored");
            }
        }
        scope.has_duplicate_blocks = true;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Token handlers
    // -------------------------------------------------------------------------

    fn text(&mut self, text: &str) -> TemplateResult<()> {
        let blank = text.trim().is_empty();
        if blank && (self.config.strip || self.stack.is_empty()) {
            return Ok(());
        }

        let lexer = self.config.lexer;
        let mut parts = Vec::new();
        for segment in lexer.split_interpolations(text) {
            match segment {
                Segment::Literal(s) => parts.push(TextPart::Literal(s.to_string())),
                Segment::Interpolation(src) => {
                    let interp = parse_interpolation(src, lexer.delimiters())
                        .map_err(|message| TemplateError::syntax("interpolation", src, message))?;
                    self.check_filters(&interp)?;
                    parts.push(TextPart::Interpolation(interp));
                }
            }
        }
        self.attach(Node::Text(Text { parts }));
        Ok(())
    }

    fn close(&mut self, kind: DirectiveKind) -> TemplateResult<()> {
        let wanted = kind.closed_kind();
        let index = self.find_frame(wanted).ok_or_else(|| {
            TemplateError::structural(
                kind.as_str(),
                format!("no open `{}` to close", wanted.as_str()),
            )
        })?;
        self.close_through(index)
    }

    fn open(&mut self, directive: Directive) -> TemplateResult<()> {
        let arg = directive.argument.as_str();
        let kind = directive.kind;
        let syntax = |message: &str| TemplateError::syntax(kind.as_str(), arg, message);
        let lexer = self.config.lexer;
        let delims = lexer.delimiters();

        match kind {
            DirectiveKind::Target => {
                let caps = TARGET_SYNTAX
                    .captures(arg)
                    .ok_or_else(|| syntax("expected `name` or `name(master = other)`"))?;
                let name = caps[1].to_string();
                let master = caps.get(2).map(|m| m.as_str().to_string());
                if !self.stack.is_empty() {
                    self.close_through(0)?;
                }
                self.stack.push(Frame::new(FrameKind::Target { name, master }));
            }
            DirectiveKind::Block => {
                let name = parse_name(arg).ok_or_else(|| syntax("expected a block name"))?;
                self.ensure_target();
                self.declare_block(&name)?;
                self.stack.push(Frame::new(FrameKind::Block { name }));
            }
            DirectiveKind::Import => {
                let name = parse_name(arg).ok_or_else(|| syntax("expected a target name"))?;
                self.ensure_target();
                self.stack.push(Frame::new(FrameKind::Import { name }));
            }
            DirectiveKind::Use => {
                let caps = USE_SYNTAX
                    .captures(arg)
                    .ok_or_else(|| syntax("expected `name` or `name(args)`"))?;
                let args = match caps.get(2) {
                    Some(m) => parse_arguments(m.as_str(), delims).map_err(|e| syntax(&e))?,
                    None => Vec::new(),
                };
                for a in &args {
                    self.check_expr_filters(&a.value)?;
                }
                self.attach(Node::Use(Use {
                    target: caps[1].to_string(),
                    args,
                }));
            }
            DirectiveKind::Var => {
                let caps = VAR_SYNTAX
                    .captures(arg)
                    .ok_or_else(|| syntax("expected `name = expression`"))?;
                let value = parse_expression(&caps[2], delims).map_err(|e| syntax(&e))?;
                self.check_expr_filters(&value)?;
                self.attach(Node::Var(Var {
                    name: caps[1].to_string(),
                    value,
                }));
            }
            DirectiveKind::For => {
                let parts = lexer.split_for_argument(arg).ok_or_else(|| {
                    syntax(&format!(
                        "expected `{}list{} as item [, index]`",
                        delims.open, delims.close
                    ))
                })?;
                let list = parse_interpolation(parts.list, delims).map_err(|e| syntax(&e))?;
                self.check_filters(&list)?;
                let frame = FrameKind::For {
                    list,
                    item: parts.item.to_string(),
                    index: parts.index.map(str::to_string),
                };
                self.ensure_target();
                self.stack.push(Frame::new(frame));
            }
            DirectiveKind::If => {
                let condition = parse_expression(arg, delims).map_err(|e| syntax(&e))?;
                self.check_expr_filters(&condition)?;
                self.ensure_target();
                self.stack.push(Frame::new(FrameKind::If {
                    finished: Vec::new(),
                    kind: BranchKind::If,
                    condition: Some(condition),
                }));
            }
            DirectiveKind::Elif => {
                let condition = parse_expression(arg, delims).map_err(|e| syntax(&e))?;
                self.check_expr_filters(&condition)?;
                self.next_branch(kind, BranchKind::Elif, Some(condition))?;
            }
            DirectiveKind::Else => {
                if !arg.is_empty() {
                    return Err(syntax("`else` takes no argument"));
                }
                self.next_branch(kind, BranchKind::Else, None)?;
            }
            DirectiveKind::Filter => {
                let caps = FILTER_SYNTAX
                    .captures(arg)
                    .ok_or_else(|| syntax("expected `name` or `name(args)`"))?;
                let name = caps[1].to_string();
                if !self.config.filters.contains(&name) {
                    return Err(TemplateError::UnknownFilter { name });
                }
                let mut args = Vec::new();
                if let Some(m) = caps.get(2) {
                    for a in parse_arguments(m.as_str(), delims).map_err(|e| syntax(&e))? {
                        if a.name.is_some() {
                            return Err(syntax("filter arguments are positional"));
                        }
                        self.check_expr_filters(&a.value)?;
                        args.push(a.value);
                    }
                }
                self.ensure_target();
                self.stack.push(Frame::new(FrameKind::Filter {
                    call: FilterCall { name, args },
                }));
            }
        }
        Ok(())
    }

    /// Close the current branch of the nearest `if` and start a new one.
    fn next_branch(
        &mut self,
        directive: DirectiveKind,
        next_kind: BranchKind,
        next_condition: Option<Expr>,
    ) -> TemplateResult<()> {
        let name = directive.as_str();
        let index = self.find_frame(DirectiveKind::If).ok_or_else(|| {
            TemplateError::structural(name, format!("`{}` without an open `if`", name))
        })?;
        self.close_above(index)?;

        let Some(frame) = self.stack.last_mut() else {
            return Ok(());
        };
        let children = mem::take(&mut frame.children);
        if let FrameKind::If {
            finished,
            kind,
            condition,
        } = &mut frame.kind
        {
            if *kind == BranchKind::Else {
                return Err(TemplateError::structural(
                    name,
                    format!("`{}` after `else`", name),
                ));
            }
            finished.push(Branch {
                kind: *kind,
                condition: condition.take(),
                children,
            });
            *kind = next_kind;
            *condition = next_condition;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Filter validation
    // -------------------------------------------------------------------------

    fn check_filters(&self, interp: &Interpolation) -> TemplateResult<()> {
        let mut unknown = None;
        interp.for_each_filter(&mut |call| {
            if unknown.is_none() && !self.config.filters.contains(&call.name) {
                unknown = Some(call.name.clone());
            }
        });
        unknown.map_or(Ok(()), |name| Err(TemplateError::UnknownFilter { name }))
    }

    fn check_expr_filters(&self, expr: &Expr) -> TemplateResult<()> {
        let mut unknown = None;
        expr.for_each_filter(&mut |call| {
            if unknown.is_none() && !self.config.filters.contains(&call.name) {
                unknown = Some(call.name.clone());
            }
        });
        unknown.map_or(Ok(()), |name| Err(TemplateError::UnknownFilter { name }))
    }
}

fn parse_name(arg: &str) -> Option<String> {
    NAME_SYNTAX.captures(arg).map(|caps| caps[1].to_string())
}

/// Keep one block per name within a scope.
///
/// Under `override` the first block keeps its position and takes the last
/// definition's content; under `ignore` later definitions are dropped.
fn dedupe_blocks(nodes: &mut Vec<Node>, policy: NamingConflict) {
    let mut last: HashMap<String, Vec<Node>> = HashMap::new();
    if policy == NamingConflict::Override {
        let mut blocks = Vec::new();
        collect_blocks(nodes, &mut blocks);
        for block in blocks {
            last.insert(block.name.clone(), block.children.clone());
        }
    }
    let mut seen = HashSet::new();
    prune_blocks(nodes, &mut seen, &last);
}

fn prune_blocks(
    nodes: &mut Vec<Node>,
    seen: &mut HashSet<String>,
    replacements: &HashMap<String, Vec<Node>>,
) {
    nodes.retain_mut(|node| match node {
        Node::Block(block) => {
            if !seen.insert(block.name.clone()) {
                return false;
            }
            if let Some(children) = replacements.get(&block.name) {
                block.children = children.clone();
            }
            prune_blocks(&mut block.children, seen, replacements);
            true
        }
        Node::Import(_) => true,
        other => {
            for children in other.child_lists_mut() {
                prune_blocks(children, seen, replacements);
            }
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::EngineOptions;
    use pretty_assertions::assert_eq;

    fn parse_with(source: &str, options: &EngineOptions) -> TemplateResult<Vec<Target>> {
        let lexer = Lexer::new(options).unwrap();
        let filters = FilterRegistry::with_builtins();
        let config = ParseConfig {
            lexer: &lexer,
            filters: &filters,
            naming_conflict: options.naming_conflict,
            strip: options.strip,
        };
        let mut guid = 1;
        parse_source(source, config, &mut guid)
    }

    fn parse(source: &str) -> TemplateResult<Vec<Target>> {
        parse_with(source, &EngineOptions::default())
    }

    fn names(targets: &[Target]) -> Vec<&str> {
        targets.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_targets_in_source_order() {
        let targets = parse("<!-- target: a -->A<!-- target: b(master = a) -->B").unwrap();
        assert_eq!(names(&targets), vec!["a", "b"]);
        assert_eq!(targets[0].state, TargetState::Applied);
        assert_eq!(targets[1].master.as_deref(), Some("a"));
        assert_eq!(targets[1].state, TargetState::Ready);
    }

    #[test]
    fn test_stray_text_opens_anonymous_target() {
        let targets = parse("hello ${name}").unwrap();
        assert_eq!(names(&targets), vec!["__1"]);
        let Node::Text(text) = &targets[0].children[0] else {
            panic!("expected text");
        };
        assert_eq!(text.parts.len(), 2);
    }

    #[test]
    fn test_blank_text_before_first_target_is_dropped() {
        let targets = parse("\n  <!-- target: a -->A").unwrap();
        assert_eq!(names(&targets), vec!["a"]);
    }

    #[test]
    fn test_if_chain_collects_branches() {
        let targets =
            parse("<!-- if: a -->1<!-- elif: b -->2<!-- else -->3<!-- /if -->").unwrap();
        let Node::If(cond) = &targets[0].children[0] else {
            panic!("expected if");
        };
        let kinds: Vec<BranchKind> = cond.branches.iter().map(|b| b.kind).collect();
        assert_eq!(kinds, vec![BranchKind::If, BranchKind::Elif, BranchKind::Else]);
        assert!(cond.branches[2].condition.is_none());
        assert_eq!(cond.branches[1].children.len(), 1);
    }

    #[test]
    fn test_else_auto_closes_nested_if() {
        let targets =
            parse("<!-- if: a --><!-- if: b -->x<!-- else -->y<!-- /if --><!-- /if -->").unwrap();
        let Node::If(outer) = &targets[0].children[0] else {
            panic!("expected if");
        };
        assert_eq!(outer.branches.len(), 1);
        let Node::If(inner) = &outer.branches[0].children[0] else {
            panic!("expected nested if");
        };
        assert_eq!(inner.branches.len(), 2);
    }

    #[test]
    fn test_if_auto_closes_at_end() {
        let targets = parse("<!-- if: a -->x").unwrap();
        assert!(matches!(targets[0].children[0], Node::If(_)));
    }

    #[test]
    fn test_unclosed_for_is_structural_error() {
        let err = parse("<!-- for: ${items} as it -->${it}").unwrap_err();
        assert_eq!(
            err,
            TemplateError::structural("for", "`for` must be closed manually")
        );
    }

    #[test]
    fn test_new_target_does_not_close_open_block() {
        let err = parse("<!-- target: a --><!-- block: x --><!-- target: b -->").unwrap_err();
        assert!(matches!(err, TemplateError::Structural { directive, .. } if directive == "block"));
    }

    #[test]
    fn test_close_without_open_is_structural_error() {
        let err = parse("a<!-- /for -->").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"Structural error at `for`: no open `for` to close");
    }

    #[test]
    fn test_else_without_if() {
        let err = parse("<!-- else -->").unwrap_err();
        assert!(matches!(err, TemplateError::Structural { directive, .. } if directive == "else"));
    }

    #[test]
    fn test_elif_after_else() {
        let err = parse("<!-- if: a --><!-- else --><!-- elif: b --><!-- /if -->").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"Structural error at `elif`: `elif` after `else`");
    }

    #[test]
    fn test_else_with_argument_is_syntax_error() {
        let err = parse("<!-- if: a --><!-- else: b --><!-- /if -->").unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
    }

    #[test]
    fn test_close_if_from_elif_name() {
        let targets = parse("<!-- if: a -->1<!-- elif: b -->2<!-- /elif -->after").unwrap();
        assert_eq!(targets[0].children.len(), 2);
    }

    #[test]
    fn test_syntax_errors_name_directive_and_argument() {
        let err = parse("<!-- for: items as it --><!-- /for -->").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"Invalid `for` directive `items as it`: expected `${list} as item [, index]`");

        let err = parse("<!-- target: a b -->").unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { directive, argument, .. }
            if directive == "target" && argument == "a b"));

        let err = parse("<!-- var: 1x -->").unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { directive, .. } if directive == "var"));
    }

    #[test]
    fn test_unknown_filter_at_parse_time() {
        assert_eq!(
            parse("${x|nope}").unwrap_err(),
            TemplateError::UnknownFilter {
                name: "nope".to_string()
            }
        );
        assert_eq!(
            parse("<!-- filter: nope -->x<!-- /filter -->").unwrap_err(),
            TemplateError::UnknownFilter {
                name: "nope".to_string()
            }
        );
        assert!(matches!(
            parse("<!-- if: ${a|nope} -->x<!-- /if -->").unwrap_err(),
            TemplateError::UnknownFilter { .. }
        ));
    }

    #[test]
    fn test_use_and_var_are_leaves() {
        let targets = parse("<!-- use: item(title = ${t}, 2) --><!-- var: n = 1 + 2 -->").unwrap();
        let Node::Use(use_node) = &targets[0].children[0] else {
            panic!("expected use");
        };
        assert_eq!(use_node.target, "item");
        assert_eq!(use_node.args.len(), 2);
        assert!(matches!(&targets[0].children[1], Node::Var(v) if v.name == "n"));
    }

    #[test]
    fn test_for_bindings() {
        let targets = parse("<!-- for: ${list} as ${item}, ${i} -->x<!-- /for -->").unwrap();
        let Node::For(for_loop) = &targets[0].children[0] else {
            panic!("expected for");
        };
        assert_eq!(for_loop.item, "item");
        assert_eq!(for_loop.index.as_deref(), Some("i"));
    }

    #[test]
    fn test_blocks_inside_import_are_scoped_to_import() {
        let targets = parse(
            "<!-- target: a --><!-- block: x -->1<!-- /block -->\
             <!-- import: layout --><!-- block: x -->2<!-- /block --><!-- /import -->",
        )
        .unwrap();
        assert_eq!(targets[0].blocks().len(), 1);
    }

    #[test]
    fn test_duplicate_names_default_to_error() {
        let err = parse("<!-- target: a -->1<!-- target: a -->2").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"Naming conflict: target `a` is already defined");

        let err = parse("<!-- block: x --><!-- /block --><!-- block: x --><!-- /block -->")
            .unwrap_err();
        assert_eq!(
            err,
            TemplateError::NamingConflict {
                kind: "block".to_string(),
                name: "x".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_names_override() {
        let options = EngineOptions {
            naming_conflict: NamingConflict::Override,
            ..Default::default()
        };
        let targets = parse_with(
            "<!-- target: a -->1<!-- target: a --><!-- block: x -->old<!-- /block -->|<!-- block: x -->new<!-- /block -->",
            &options,
        )
        .unwrap();
        assert_eq!(names(&targets), vec!["a"]);
        let blocks = targets[0].blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            blocks[0].children,
            vec![Node::Text(Text {
                parts: vec![TextPart::Literal("new".to_string())]
            })]
        );
        assert_eq!(targets[0].children.len(), 2);
    }

    #[test]
    fn test_duplicate_names_ignore() {
        let options = EngineOptions {
            naming_conflict: NamingConflict::Ignore,
            ..Default::default()
        };
        let targets = parse_with(
            "<!-- target: a --><!-- block: x -->old<!-- /block --><!-- block: x -->new<!-- /block --><!-- target: a -->2",
            &options,
        )
        .unwrap();
        assert_eq!(targets.len(), 1);
        let blocks = targets[0].blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            blocks[0].children,
            vec![Node::Text(Text {
                parts: vec![TextPart::Literal("old".to_string())]
            })]
        );
    }

    #[test]
    fn test_strip_drops_blank_text() {
        let options = EngineOptions {
            strip: true,
            ..Default::default()
        };
        let targets = parse_with("<!-- target: a -->\n  <!-- if: x -->y<!-- /if -->\n", &options)
            .unwrap();
        assert_eq!(targets[0].children.len(), 1);
    }

    #[test]
    fn test_malformed_interpolation() {
        let err = parse("a ${1 +} b").unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { directive, argument, .. }
            if directive == "interpolation" && argument == "1 +"));
    }
}
