/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! A directive-based template engine with target inheritance.
//!
//! Sources mix literal text with directives written between command
//! delimiters (`<!--` and `-->` by default) and interpolations written
//! between variable delimiters (`${` and `}` by default):
//!
//! - Targets: `<!-- target: page(master = layout) -->`
//! - Overridable blocks: `<!-- block: body -->...<!-- /block -->`
//! - Imports: `<!-- import: card -->...<!-- /import -->`
//! - Macro-like use: `<!-- use: item(title = ${t}) -->`
//! - Local bindings: `<!-- var: total = a + b -->`
//! - Loops: `<!-- for: ${items} as item, index -->...<!-- /for -->`
//! - Conditionals: `<!-- if: x -->...<!-- elif: y -->...<!-- else -->...<!-- /if -->`
//! - Output filters: `<!-- filter: url -->...<!-- /filter -->`
//! - Interpolations with filter chains: `${ user.name | html }`
//!
//! # Architecture
//!
//! The lexer splits a source into text and directives, the parser builds a
//! tree per target, and the engine registers the targets. On first render a
//! target is resolved against its master chain and imports, compiled into a
//! flat instruction list, and cached. One executor runs every program.
//!
//! # Example
//!
//! ```
//! use btemplate::{Engine, TemplateContext};
//!
//! let mut engine = Engine::new();
//! engine
//!     .compile(
//!         "<!-- target: base --><h1><!-- block: title -->Untitled<!-- /block --></h1>\
//!          <!-- target: page(master = base) --><!-- block: title -->${name}<!-- /block -->",
//!     )
//!     .unwrap();
//!
//! let mut ctx = TemplateContext::new();
//! ctx.insert("name", "<World>");
//!
//! let output = engine.render("page", &ctx).unwrap();
//! assert_eq!(output, "<h1>&lt;World&gt;</h1>");
//! ```

pub mod ast;
pub mod compiler;
pub mod context;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod expr;
pub mod filters;
pub mod lexer;
pub mod options;
pub mod parser;
pub mod resolver;

// Re-export main types at crate root
pub use ast::{Node, Target, TargetState};
pub use compiler::{Instr, Program};
pub use context::{TemplateContext, TemplateValue};
pub use engine::{Engine, Renderer};
pub use error::{TemplateError, TemplateResult};
pub use filters::{FilterFn, FilterRegistry};
pub use options::{EngineOptions, NamingConflict, OptionsPatch};
