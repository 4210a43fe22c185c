/*
 * evaluator.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Program execution.
//!
//! One fixed executor runs every [`Program`]. It keeps a program counter,
//! a stack of output buffers (pushed by `CaptureStart`), a stack of active
//! loops, and a stack of variable scopes layered over the data context.

use std::collections::HashMap;
use std::sync::Arc;

use crate::compiler::{Instr, Program};
use crate::context::{TemplateContext, TemplateValue};
use crate::error::{TemplateError, TemplateResult};
use crate::expr::Environment;
use crate::filters::FilterRegistry;

/// Default limit on nested `use` directives.
pub const DEFAULT_MAX_USE_DEPTH: usize = 50;

type Scope = HashMap<String, TemplateValue>;

/// Where the executor finds the programs that `use` directives name.
pub trait ProgramSource {
    /// The compiled program for `name`, or `None` if no such target exists.
    fn program(&self, name: &str) -> TemplateResult<Option<Arc<Program>>>;
}

/// Everything a render needs besides the program itself.
pub struct RenderContext<'a> {
    programs: &'a dyn ProgramSource,
    filters: &'a FilterRegistry,
    data: &'a TemplateContext,
    max_use_depth: usize,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        programs: &'a dyn ProgramSource,
        filters: &'a FilterRegistry,
        data: &'a TemplateContext,
    ) -> Self {
        Self {
            programs,
            filters,
            data,
            max_use_depth: DEFAULT_MAX_USE_DEPTH,
        }
    }

    /// Set the maximum `use` nesting depth.
    pub fn with_max_use_depth(mut self, depth: usize) -> Self {
        self.max_use_depth = depth;
        self
    }

    /// Run `program` against the data context.
    pub fn render(&self, program: &Program) -> TemplateResult<String> {
        let mut scopes = vec![Scope::new()];
        self.execute(program, &mut scopes, 0)
    }

    fn env<'s>(&'s self, scopes: &'s [Scope]) -> ScopeEnv<'s> {
        ScopeEnv {
            scopes,
            data: self.data,
            filters: self.filters,
        }
    }

    fn execute(
        &self,
        program: &Program,
        scopes: &mut Vec<Scope>,
        depth: usize,
    ) -> TemplateResult<String> {
        let mut buffers = vec![String::new()];
        let mut loops: Vec<LoopState> = Vec::new();
        let mut pc = 0;

        while let Some(instr) = program.instrs.get(pc) {
            match instr {
                Instr::Text(text) => push_output(&mut buffers, text),
                Instr::Interpolate(interp) => {
                    let value = interp.evaluate(&self.env(scopes))?;
                    push_output(&mut buffers, &value.render());
                }
                Instr::Bind { name, value } => {
                    let value = value.evaluate(&self.env(scopes))?;
                    if let Some(scope) = scopes.last_mut() {
                        scope.insert(name.clone(), value);
                    }
                }
                Instr::BranchUnless { condition, target } => {
                    if !condition.evaluate(&self.env(scopes))?.is_truthy() {
                        pc = *target;
                        continue;
                    }
                }
                Instr::Jump(target) => {
                    pc = *target;
                    continue;
                }
                Instr::LoopStart {
                    list,
                    item,
                    index,
                    end,
                } => {
                    let entries = iteration_entries(list.evaluate(&self.env(scopes))?);
                    let Some(first) = entries.first() else {
                        pc = *end;
                        continue;
                    };
                    scopes.push(loop_scope(item, index.as_deref(), first));
                    loops.push(LoopState {
                        entries,
                        position: 0,
                    });
                }
                Instr::LoopNext { start } => {
                    scopes.pop();
                    if let Some(state) = loops.last_mut() {
                        state.position += 1;
                        if let Some(entry) = state.entries.get(state.position) {
                            if let Some(Instr::LoopStart { item, index, .. }) =
                                program.instrs.get(*start)
                            {
                                scopes.push(loop_scope(item, index.as_deref(), entry));
                            }
                            pc = start + 1;
                            continue;
                        }
                    }
                    loops.pop();
                }
                Instr::CaptureStart => buffers.push(String::new()),
                Instr::CaptureEnd { filter } => {
                    let captured = if buffers.len() > 1 {
                        buffers.pop().unwrap_or_default()
                    } else {
                        String::new()
                    };
                    let env = self.env(scopes);
                    let args = filter
                        .args
                        .iter()
                        .map(|arg| arg.evaluate(&env))
                        .collect::<TemplateResult<Vec<_>>>()?;
                    let filtered = env.apply_filter(&filter.name, &captured, &args)?;
                    push_output(&mut buffers, &filtered);
                }
                Instr::Use { target, args } => {
                    if depth >= self.max_use_depth {
                        return Err(TemplateError::RecursiveUse {
                            name: target.clone(),
                            max_depth: self.max_use_depth,
                        });
                    }
                    let Some(used) = self.programs.program(target)? else {
                        tracing::trace!(
                            target_name = %target,
                            "use of unknown target renders nothing"
                        );
                        pc += 1;
                        continue;
                    };

                    let mut scope = Scope::new();
                    let mut positional = Vec::new();
                    {
                        let env = self.env(scopes);
                        for arg in args {
                            let value = arg.value.evaluate(&env)?;
                            match &arg.name {
                                Some(name) => {
                                    scope.insert(name.clone(), value);
                                }
                                None => positional.push(value),
                            }
                        }
                    }
                    if !positional.is_empty() {
                        scope.insert("args".to_string(), TemplateValue::List(positional));
                    }

                    scopes.push(scope);
                    let rendered = self.execute(&used, scopes, depth + 1);
                    scopes.pop();
                    push_output(&mut buffers, &rendered?);
                }
            }
            pc += 1;
        }

        // Captures left open by a malformed program are flushed unfiltered.
        let mut out = String::new();
        for buffer in buffers {
            out.push_str(&buffer);
        }
        Ok(out)
    }
}

struct LoopState {
    entries: Vec<(TemplateValue, TemplateValue)>,
    position: usize,
}

fn push_output(buffers: &mut [String], text: &str) {
    if let Some(top) = buffers.last_mut() {
        top.push_str(text);
    }
}

/// `(index, item)` pairs a loop visits.
///
/// Lists yield their elements with numeric positions, maps their values in
/// key order with the key as index. Other truthy values are visited once.
fn iteration_entries(value: TemplateValue) -> Vec<(TemplateValue, TemplateValue)> {
    match value {
        TemplateValue::List(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| (TemplateValue::Number(i as f64), item))
            .collect(),
        TemplateValue::Map(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries
                .into_iter()
                .map(|(key, item)| (TemplateValue::String(key), item))
                .collect()
        }
        other if other.is_truthy() => vec![(TemplateValue::Number(0.0), other)],
        _ => Vec::new(),
    }
}

fn loop_scope(item: &str, index: Option<&str>, entry: &(TemplateValue, TemplateValue)) -> Scope {
    let mut scope = Scope::new();
    scope.insert(item.to_string(), entry.1.clone());
    if let Some(index) = index {
        scope.insert(index.to_string(), entry.0.clone());
    }
    scope
}

/// Expression environment over the scope stack.
struct ScopeEnv<'a> {
    scopes: &'a [Scope],
    data: &'a TemplateContext,
    filters: &'a FilterRegistry,
}

impl Environment for ScopeEnv<'_> {
    fn lookup(&self, path: &[String]) -> Option<TemplateValue> {
        let (first, rest) = path.split_first()?;
        let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
        let root = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(first))
            .or_else(|| self.data.get(first))?;
        root.get_path(&rest).cloned()
    }

    fn apply_filter(
        &self,
        name: &str,
        input: &str,
        args: &[TemplateValue],
    ) -> TemplateResult<String> {
        let filter = self
            .filters
            .get(name)
            .ok_or_else(|| TemplateError::UnknownFilter {
                name: name.to_string(),
            })?;
        Ok(filter(input, args))
    }
}
