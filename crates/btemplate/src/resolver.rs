/*
 * resolver.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Target inheritance resolution.
//!
//! A target with no master is its own effective tree. A target with a
//! master takes its master's effective tree and swaps in its own version of
//! every block it declares. Imports are expanded in place the same way, with
//! the blocks declared inside the import as the overrides.

use std::collections::{BTreeSet, HashMap};
use std::hash::BuildHasher;

use crate::ast::{Block, Node, Target, collect_blocks};
use crate::error::{TemplateError, TemplateResult};

/// Trait for looking up targets by name.
///
/// Implemented for the engine's registry; tests can use a plain map.
pub trait TargetLookup {
    fn lookup_target(&self, name: &str) -> Option<&Target>;
}

impl<S: BuildHasher> TargetLookup for HashMap<String, Target, S> {
    fn lookup_target(&self, name: &str) -> Option<&Target> {
        self.get(name)
    }
}

/// The effective tree of a target and every target it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub nodes: Vec<Node>,
    /// The target itself, its master chain, and everything imported.
    pub dependencies: BTreeSet<String>,
}

/// Resolve the effective tree of `name`.
pub fn resolve_target(targets: &dyn TargetLookup, name: &str) -> TemplateResult<Resolution> {
    let mut resolver = Resolver {
        targets,
        chain: Vec::new(),
        dependencies: BTreeSet::new(),
    };
    let nodes = resolver.effective(name, name, "target")?;
    tracing::trace!(
        target_name = %name,
        dependencies = resolver.dependencies.len(),
        "resolved target"
    );
    Ok(Resolution {
        nodes,
        dependencies: resolver.dependencies,
    })
}

struct Resolver<'a> {
    targets: &'a dyn TargetLookup,
    /// Targets currently being resolved, outermost first.
    chain: Vec<String>,
    dependencies: BTreeSet<String>,
}

impl Resolver<'_> {
    fn effective(
        &mut self,
        name: &str,
        referrer: &str,
        relation: &str,
    ) -> TemplateResult<Vec<Node>> {
        if self.chain.iter().any(|n| n == name) {
            let mut cycle = self.chain.clone();
            cycle.push(name.to_string());
            return Err(TemplateError::master_chain(
                referrer,
                format!("cycle detected: {}", cycle.join(" -> ")),
            ));
        }

        let targets = self.targets;
        let target = targets.lookup_target(name).ok_or_else(|| {
            TemplateError::master_chain(referrer, format!("{} `{}` is not defined", relation, name))
        })?;

        self.chain.push(name.to_string());
        self.dependencies.insert(name.to_string());

        let mut nodes = match &target.master {
            None => target.children.clone(),
            Some(master) => {
                let mut inherited = self.effective(master, name, "master")?;
                let mut blocks = Vec::new();
                collect_blocks(&target.children, &mut blocks);
                apply_overrides(&mut inherited, &block_map(&blocks));
                inherited
            }
        };
        self.expand_imports(&mut nodes, name)?;

        self.chain.pop();
        Ok(nodes)
    }

    fn expand_imports(&mut self, nodes: &mut [Node], owner: &str) -> TemplateResult<()> {
        for node in nodes.iter_mut() {
            match node {
                Node::Import(import) => {
                    if import.resolved.is_some() {
                        continue;
                    }
                    let mut content = self.effective(&import.name, owner, "import")?;
                    let mut blocks = Vec::new();
                    collect_blocks(&import.children, &mut blocks);
                    apply_overrides(&mut content, &block_map(&blocks));
                    self.expand_imports(&mut content, owner)?;
                    import.resolved = Some(content);
                }
                other => {
                    for children in other.child_lists_mut() {
                        self.expand_imports(children, owner)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn block_map<'a>(blocks: &[&'a Block]) -> HashMap<&'a str, &'a Block> {
    blocks.iter().map(|b| (b.name.as_str(), *b)).collect()
}

/// Replace every block in `nodes` named in `overrides` with the override's content.
///
/// Expanded imports are left alone: their blocks were settled when the
/// import was resolved.
fn apply_overrides(nodes: &mut [Node], overrides: &HashMap<&str, &Block>) {
    if overrides.is_empty() {
        return;
    }
    for node in nodes.iter_mut() {
        match node {
            Node::Block(block) => match overrides.get(block.name.as_str()) {
                Some(replacement) => block.children = replacement.children.clone(),
                None => apply_overrides(&mut block.children, overrides),
            },
            Node::Import(_) => {}
            other => {
                for children in other.child_lists_mut() {
                    apply_overrides(children, overrides);
                }
            }
        }
    }
}
