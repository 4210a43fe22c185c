/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template node types.
//!
//! A source is parsed into one or more [`Target`]s, each owning a tree of
//! [`Node`]s. Every directive kind has its own variant; tree navigation that
//! is shared between kinds goes through [`NodeChildren`] and
//! [`Node::child_lists`].

use crate::expr::{Argument, Expr, FilterCall, Interpolation};

/// A node in the template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text, possibly containing interpolations.
    Text(Text),

    /// Overridable named region: `<!-- block: name -->...<!-- /block -->`
    Block(Block),

    /// Another target spliced in place: `<!-- import: name -->`
    Import(Import),

    /// Render another target with arguments: `<!-- use: name(a = 1) -->`
    Use(Use),

    /// Local binding: `<!-- var: total = a + b -->`
    Var(Var),

    /// Loop: `<!-- for: ${items} as item, index -->...<!-- /for -->`
    For(ForLoop),

    /// Conditional chain: `<!-- if: x -->...<!-- elif: y -->...<!-- else -->...<!-- /if -->`
    If(Conditional),

    /// Post-process output: `<!-- filter: name(args) -->...<!-- /filter -->`
    Filter(FilterNode),
}

/// Literal text split into literal pieces and interpolations.
#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextPart {
    Literal(String),
    Interpolation(Interpolation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    /// Name of the imported target.
    pub name: String,
    /// Blocks declared inside the import, overriding the imported target's.
    pub children: Vec<Node>,
    /// The imported target's effective tree, with overrides applied.
    ///
    /// This is `None` after parsing and filled in by the resolver.
    pub resolved: Option<Vec<Node>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Use {
    pub target: String,
    pub args: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    pub list: Interpolation,
    pub item: String,
    pub index: Option<String>,
    pub children: Vec<Node>,
}

/// An `if` with its `elif`/`else` branches, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    pub branches: Vec<Branch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    If,
    Elif,
    Else,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub kind: BranchKind,
    /// `None` for `else`.
    pub condition: Option<Expr>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub call: FilterCall,
    pub children: Vec<Node>,
}

/// Lifecycle of a target. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetState {
    /// Opened, closing directive not yet seen.
    Reading,
    /// Closed.
    Read,
    /// Registered, no master.
    Applied,
    /// Registered, with a master to resolve at first render.
    Ready,
}

/// A named top-level compilable unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub master: Option<String>,
    pub children: Vec<Node>,
    pub state: TargetState,
}

impl Target {
    pub fn new(name: impl Into<String>, master: Option<String>) -> Self {
        Self {
            name: name.into(),
            master,
            children: Vec::new(),
            state: TargetState::Reading,
        }
    }

    /// Blocks declared by this target, outermost first.
    ///
    /// Blocks inside an import belong to that import, not to the target.
    pub fn blocks(&self) -> Vec<&Block> {
        let mut out = Vec::new();
        collect_blocks(&self.children, &mut out);
        out
    }

    /// Advance the lifecycle. Moving backwards is ignored.
    pub fn advance(&mut self, state: TargetState) {
        if state > self.state {
            self.state = state;
        }
    }
}

/// Collect blocks in `nodes`, descending into everything except imports.
pub fn collect_blocks<'a>(nodes: &'a [Node], out: &mut Vec<&'a Block>) {
    for node in nodes {
        match node {
            Node::Block(block) => {
                out.push(block);
                collect_blocks(&block.children, out);
            }
            Node::Import(_) => {}
            other => {
                for children in other.child_lists() {
                    collect_blocks(children, out);
                }
            }
        }
    }
}

/// Shared access to a node's ordered children.
pub trait NodeChildren {
    fn children(&self) -> &[Node];
    fn children_mut(&mut self) -> &mut Vec<Node>;
}

macro_rules! impl_node_children {
    ($($ty:ty),* $(,)?) => {
        $(
            impl NodeChildren for $ty {
                fn children(&self) -> &[Node] {
                    &self.children
                }

                fn children_mut(&mut self) -> &mut Vec<Node> {
                    &mut self.children
                }
            }
        )*
    };
}

impl_node_children!(Target, Block, Import, ForLoop, Branch, FilterNode);

impl Node {
    /// Every child list of this node. Conditionals yield one per branch.
    ///
    /// An import yields the blocks declared inside it; its resolved content
    /// is not included.
    pub fn child_lists(&self) -> Vec<&[Node]> {
        match self {
            Node::Text(_) | Node::Use(_) | Node::Var(_) => Vec::new(),
            Node::Block(n) => vec![n.children()],
            Node::Import(n) => vec![n.children()],
            Node::For(n) => vec![n.children()],
            Node::Filter(n) => vec![n.children()],
            Node::If(n) => n.branches.iter().map(|b| b.children()).collect(),
        }
    }

    pub fn child_lists_mut(&mut self) -> Vec<&mut Vec<Node>> {
        match self {
            Node::Text(_) | Node::Use(_) | Node::Var(_) => Vec::new(),
            Node::Block(n) => vec![n.children_mut()],
            Node::Import(n) => vec![n.children_mut()],
            Node::For(n) => vec![n.children_mut()],
            Node::Filter(n) => vec![n.children_mut()],
            Node::If(n) => n.branches.iter_mut().map(|b| b.children_mut()).collect(),
        }
    }
}
