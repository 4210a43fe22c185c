/*
 * compiler.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Resolved trees to instruction lists.
//!
//! A [`Program`] is a flat list of [`Instr`]s with absolute jump targets.
//! Conditionals compile to `BranchUnless`/`Jump` pairs, loops to a
//! `LoopStart`/`LoopNext` pair around the body, and filter directives to a
//! `CaptureStart`/`CaptureEnd` pair whose captured output is filtered.

use std::collections::BTreeSet;

use crate::ast::{Conditional, ForLoop, Node, Text, TextPart};
use crate::error::{TemplateError, TemplateResult};
use crate::expr::{Argument, Expr, FilterCall, Interpolation};
use crate::filters::FilterRegistry;
use crate::resolver::Resolution;

/// One step of a compiled program.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Emit literal text.
    Text(String),
    /// Emit an interpolation's text, after its filters.
    Interpolate(Interpolation),
    /// Bind a name in the current scope.
    Bind { name: String, value: Expr },
    /// Jump to `target` if `condition` is falsy.
    BranchUnless { condition: Expr, target: usize },
    Jump(usize),
    /// Begin a loop. Skips to `end` when there is nothing to iterate.
    LoopStart {
        list: Interpolation,
        item: String,
        index: Option<String>,
        end: usize,
    },
    /// Advance the loop opened at `start`.
    LoopNext { start: usize },
    /// Start capturing output.
    CaptureStart,
    /// Stop capturing and emit the captured text through `filter`.
    CaptureEnd { filter: FilterCall },
    /// Render another target with `args` bound.
    Use { target: String, args: Vec<Argument> },
}

/// A compiled target.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub target: String,
    pub instrs: Vec<Instr>,
    /// Targets whose recompilation invalidates this program.
    pub dependencies: BTreeSet<String>,
}

/// Settings baked into a program at build time.
#[derive(Debug, Clone, Copy)]
pub struct CompileConfig<'a> {
    pub filters: &'a FilterRegistry,
    /// Filter for interpolations without one. Empty disables it.
    pub default_filter: &'a str,
    /// Drop text nodes that hold only whitespace.
    pub strip: bool,
}

/// Build the program for a resolved target.
pub fn compile_program(
    target: &str,
    resolution: Resolution,
    config: CompileConfig<'_>,
) -> TemplateResult<Program> {
    let mut compiler = Compiler {
        config,
        instrs: Vec::new(),
    };
    compiler.nodes(&resolution.nodes)?;
    tracing::debug!(
        target_name = %target,
        instructions = compiler.instrs.len(),
        "compiled target"
    );
    Ok(Program {
        target: target.to_string(),
        instrs: compiler.instrs,
        dependencies: resolution.dependencies,
    })
}

struct Compiler<'a> {
    config: CompileConfig<'a>,
    instrs: Vec<Instr>,
}

impl Compiler<'_> {
    fn nodes(&mut self, nodes: &[Node]) -> TemplateResult<()> {
        for node in nodes {
            self.node(node)?;
        }
        Ok(())
    }

    fn node(&mut self, node: &Node) -> TemplateResult<()> {
        match node {
            Node::Text(text) => {
                if self.config.strip && is_blank(text) {
                    return Ok(());
                }
                for part in &text.parts {
                    match part {
                        TextPart::Literal(s) => self.text(s),
                        TextPart::Interpolation(interp) => self.interpolation(interp)?,
                    }
                }
            }
            Node::Block(block) => self.nodes(&block.children)?,
            Node::Import(import) => {
                if let Some(resolved) = &import.resolved {
                    self.nodes(resolved)?;
                }
            }
            Node::Use(use_node) => self.instrs.push(Instr::Use {
                target: use_node.target.clone(),
                args: use_node.args.clone(),
            }),
            Node::Var(var) => self.instrs.push(Instr::Bind {
                name: var.name.clone(),
                value: var.value.clone(),
            }),
            Node::For(for_loop) => self.for_loop(for_loop)?,
            Node::If(conditional) => self.conditional(conditional)?,
            Node::Filter(filter) => {
                self.instrs.push(Instr::CaptureStart);
                self.nodes(&filter.children)?;
                self.instrs.push(Instr::CaptureEnd {
                    filter: filter.call.clone(),
                });
            }
        }
        Ok(())
    }

    fn text(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        if let Some(Instr::Text(prev)) = self.instrs.last_mut() {
            prev.push_str(s);
        } else {
            self.instrs.push(Instr::Text(s.to_string()));
        }
    }

    fn interpolation(&mut self, interp: &Interpolation) -> TemplateResult<()> {
        let mut interp = interp.clone();
        let default = self.config.default_filter;
        if interp.filters.is_empty() && !default.is_empty() {
            if !self.config.filters.contains(default) {
                return Err(TemplateError::UnknownFilter {
                    name: default.to_string(),
                });
            }
            interp.filters.push(FilterCall::new(default));
        }
        self.instrs.push(Instr::Interpolate(interp));
        Ok(())
    }

    fn for_loop(&mut self, for_loop: &ForLoop) -> TemplateResult<()> {
        let start = self.instrs.len();
        self.instrs.push(Instr::LoopStart {
            list: for_loop.list.clone(),
            item: for_loop.item.clone(),
            index: for_loop.index.clone(),
            end: 0,
        });
        self.nodes(&for_loop.children)?;
        self.instrs.push(Instr::LoopNext { start });

        let after = self.instrs.len();
        if let Some(Instr::LoopStart { end, .. }) = self.instrs.get_mut(start) {
            *end = after;
        }
        Ok(())
    }

    fn conditional(&mut self, conditional: &Conditional) -> TemplateResult<()> {
        let mut exits = Vec::new();
        for branch in &conditional.branches {
            let guard = branch.condition.as_ref().map(|condition| {
                self.instrs.push(Instr::BranchUnless {
                    condition: condition.clone(),
                    target: 0,
                });
                self.instrs.len() - 1
            });

            self.nodes(&branch.children)?;

            if let Some(guard) = guard {
                exits.push(self.instrs.len());
                self.instrs.push(Instr::Jump(0));
                let next = self.instrs.len();
                if let Some(Instr::BranchUnless { target, .. }) = self.instrs.get_mut(guard) {
                    *target = next;
                }
            }
        }

        let end = self.instrs.len();
        for exit in exits {
            self.instrs[exit] = Instr::Jump(end);
        }
        Ok(())
    }
}

/// Whether a text node holds nothing but whitespace.
fn is_blank(text: &Text) -> bool {
    text.parts
        .iter()
        .all(|part| matches!(part, TextPart::Literal(s) if s.trim().is_empty()))
}
