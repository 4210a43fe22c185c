/*
 * engine.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The engine: target registry, configuration, filters and program cache.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::ast::Target;
use crate::compiler::{CompileConfig, Program, compile_program};
use crate::context::{TemplateContext, TemplateValue};
use crate::error::{TemplateError, TemplateResult};
use crate::evaluator::{ProgramSource, RenderContext};
use crate::filters::FilterRegistry;
use crate::lexer::Lexer;
use crate::options::{EngineOptions, NamingConflict, OptionsPatch};
use crate::parser::{ParseConfig, parse_source};
use crate::resolver::resolve_target;

/// First number used for anonymous target names.
const FIRST_GUID: u64 = 0x2B845;

/// A template engine.
///
/// Compiling a source registers every target it defines. Targets are
/// resolved and compiled into programs on first render; programs are cached
/// until a target they depend on is recompiled or the configuration or
/// filter set changes.
#[derive(Debug)]
pub struct Engine {
    options: EngineOptions,
    lexer: Lexer,
    filters: FilterRegistry,
    targets: HashMap<String, Target>,
    next_guid: u64,
    programs: RwLock<HashMap<String, Arc<Program>>>,
}

impl Engine {
    /// Create an engine with default options and the built-in filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with the given options.
    pub fn with_options(options: EngineOptions) -> TemplateResult<Self> {
        options.validate()?;
        let lexer = Lexer::new(&options)?;
        Ok(Self {
            options,
            lexer,
            filters: FilterRegistry::with_builtins(),
            targets: HashMap::new(),
            next_guid: FIRST_GUID,
            programs: RwLock::new(HashMap::new()),
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Merge `patch` into the running options.
    ///
    /// The delimiter grammar is rebuilt and every compiled program dropped.
    /// Already registered targets keep the trees they were parsed with.
    pub fn configure(&mut self, patch: OptionsPatch) -> TemplateResult<()> {
        let options = self.options.merged(patch)?;
        let lexer = Lexer::new(&options)?;
        tracing::debug!(
            command_open = %options.command_open,
            command_close = %options.command_close,
            default_filter = %options.default_filter,
            strip = options.strip,
            "engine reconfigured"
        );
        self.options = options;
        self.lexer = lexer;
        self.clear_programs();
        Ok(())
    }

    /// [`configure`](Self::configure) from camelCase JSON.
    pub fn configure_json(&mut self, value: serde_json::Value) -> TemplateResult<()> {
        self.configure(OptionsPatch::from_json(value)?)
    }

    /// Register or replace a filter.
    pub fn add_filter<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&str, &[TemplateValue]) -> String + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(filter = %name, "filter registered");
        self.filters.insert(name, filter);
        self.clear_programs();
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    /// Parse `source` and register the targets it defines.
    ///
    /// Returns a renderer for the first target in the source, or a renderer
    /// that produces nothing if the source defines none. On error nothing
    /// is registered.
    pub fn compile(&mut self, source: &str) -> TemplateResult<Renderer<'_>> {
        let config = ParseConfig {
            lexer: &self.lexer,
            filters: &self.filters,
            naming_conflict: self.options.naming_conflict,
            strip: self.options.strip,
        };
        let mut guid = self.next_guid;
        let parsed = parse_source(source, config, &mut guid)?;

        let policy = self.options.naming_conflict;
        let mut accepted = Vec::with_capacity(parsed.len());
        for target in &parsed {
            if !self.targets.contains_key(&target.name) {
                continue;
            }
            match policy {
                NamingConflict::Error => {
                    return Err(TemplateError::NamingConflict {
                        kind: "target".to_string(),
                        name: target.name.clone(),
                    });
                }
                NamingConflict::Override => {
                    tracing::warn!(
                        target_name = %target.name,
                        "target redefined, later definition wins"
                    );
                }
                NamingConflict::Ignore => {
                    tracing::debug!(
                        target_name = %target.name,
                        "target already defined, keeping it"
                    );
                }
            }
        }

        let first = parsed.first().map(|t| t.name.clone());
        for target in parsed {
            if policy == NamingConflict::Ignore && self.targets.contains_key(&target.name) {
                continue;
            }
            accepted.push(target.name.clone());
            self.targets.insert(target.name.clone(), target);
        }
        self.next_guid = guid;
        self.invalidate(&accepted);
        tracing::debug!(targets = ?accepted, "compiled source");

        Ok(Renderer {
            engine: self,
            target: first,
        })
    }

    /// A renderer for a registered target.
    pub fn get_renderer(&self, name: &str) -> Option<Renderer<'_>> {
        self.targets.contains_key(name).then(|| Renderer {
            engine: self,
            target: Some(name.to_string()),
        })
    }

    /// Render a registered target. Unknown names render as empty text.
    pub fn render(&self, name: &str, data: &TemplateContext) -> TemplateResult<String> {
        let Some(program) = self.program(name)? else {
            return Ok(String::new());
        };
        RenderContext::new(self, &self.filters, data).render(&program)
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.get(name)
    }

    /// Names of all registered targets, sorted.
    pub fn target_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.targets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn clear_programs(&mut self) {
        self.programs
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drop cached programs built from any of `names`.
    fn invalidate(&mut self, names: &[String]) {
        let programs = self
            .programs
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        programs.retain(|cached, program| {
            let stale = names
                .iter()
                .any(|name| name == cached || program.dependencies.contains(name));
            if stale {
                tracing::trace!(target_name = %cached, "dropping cached program");
            }
            !stale
        });
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::with_options(EngineOptions::default()).expect("default options are valid")
    }
}

impl ProgramSource for Engine {
    /// The cached program for `name`, resolving and compiling it on first use.
    fn program(&self, name: &str) -> TemplateResult<Option<Arc<Program>>> {
        if !self.targets.contains_key(name) {
            return Ok(None);
        }
        if let Some(program) = self
            .programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Some(Arc::clone(program)));
        }

        let resolution = resolve_target(&self.targets, name)?;
        let program = Arc::new(compile_program(
            name,
            resolution,
            CompileConfig {
                filters: &self.filters,
                default_filter: &self.options.default_filter,
                strip: self.options.strip,
            },
        )?);
        self.programs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::clone(&program));
        Ok(Some(program))
    }
}

/// A handle that renders one target of an [`Engine`].
///
/// The handle looks the program up on every call, so it always renders the
/// target's current definition.
#[derive(Debug, Clone)]
pub struct Renderer<'e> {
    engine: &'e Engine,
    target: Option<String>,
}

impl Renderer<'_> {
    /// Name of the target this renderer renders, if any.
    pub fn target_name(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn render(&self, data: &TemplateContext) -> TemplateResult<String> {
        match &self.target {
            Some(name) => self.engine.render(name, data),
            None => Ok(String::new()),
        }
    }

    /// Render with a JSON object as the data context.
    pub fn render_json(&self, data: serde_json::Value) -> TemplateResult<String> {
        self.render(&TemplateContext::from_json(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx(value: serde_json::Value) -> TemplateContext {
        TemplateContext::from_json(value)
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn test_compile_returns_first_target() {
        let mut engine = Engine::new();
        let renderer = engine
            .compile("<!-- target: a -->A<!-- target: b -->B")
            .unwrap();
        assert_eq!(renderer.target_name(), Some("a"));
        assert_eq!(renderer.render(&TemplateContext::new()).unwrap(), "A");
        assert_eq!(engine.target_names(), vec!["a", "b"]);
        assert_eq!(engine.render("b", &TemplateContext::new()).unwrap(), "B");
    }

    #[test]
    fn test_compile_empty_source_gives_noop_renderer() {
        let mut engine = Engine::new();
        let renderer = engine.compile("").unwrap();
        assert_eq!(renderer.target_name(), None);
        assert_eq!(renderer.render_json(json!({"x": 1})).unwrap(), "");
        assert!(engine.target_names().is_empty());
    }

    #[test]
    fn test_anonymous_targets_use_engine_counter() {
        let mut engine = Engine::new();
        let first = engine.compile("one").unwrap().target_name().map(str::to_string);
        let second = engine.compile("two").unwrap().target_name().map(str::to_string);
        assert_eq!(first.as_deref(), Some("__178245"));
        assert_eq!(second.as_deref(), Some("__178246"));

        let mut other = Engine::new();
        let again = other.compile("three").unwrap().target_name().map(str::to_string);
        assert_eq!(again.as_deref(), Some("__178245"));
    }

    #[test]
    fn test_unknown_names() {
        let engine = Engine::new();
        assert!(engine.get_renderer("nope").is_none());
        assert_eq!(engine.render("nope", &TemplateContext::new()).unwrap(), "");
    }

    #[test]
    fn test_failed_compile_registers_nothing() {
        let mut engine = Engine::new();
        let before = engine.next_guid;
        let err = engine
            .compile("<!-- target: ok -->fine<!-- target: bad --><!-- for: ${x} as y -->")
            .unwrap_err();
        assert!(matches!(err, TemplateError::Structural { .. }));
        assert!(engine.target("ok").is_none());
        assert_eq!(engine.next_guid, before);
    }

    #[test]
    fn test_redefinition_policies() {
        let mut engine = Engine::new();
        engine.compile("<!-- target: t -->first").unwrap();
        let err = engine.compile("<!-- target: t -->second").unwrap_err();
        assert_eq!(
            err,
            TemplateError::NamingConflict {
                kind: "target".to_string(),
                name: "t".to_string()
            }
        );
        assert_eq!(engine.render("t", &TemplateContext::new()).unwrap(), "first");

        engine.configure_json(json!({"namingConflict": "ignore"})).unwrap();
        engine.compile("<!-- target: t -->second").unwrap();
        assert_eq!(engine.render("t", &TemplateContext::new()).unwrap(), "first");

        engine.configure_json(json!({"namingConflict": "override"})).unwrap();
        engine.compile("<!-- target: t -->third").unwrap();
        assert_eq!(engine.render("t", &TemplateContext::new()).unwrap(), "third");
    }

    #[test]
    fn test_recompiling_master_invalidates_children() {
        let mut engine = Engine::with_options(EngineOptions {
            naming_conflict: NamingConflict::Override,
            ..Default::default()
        })
        .unwrap();
        engine
            .compile(
                "<!-- target: base -->[<!-- block: body -->base<!-- /block -->]\
                 <!-- target: child(master = base) --><!-- block: body -->child<!-- /block -->",
            )
            .unwrap();
        assert_eq!(engine.render("child", &TemplateContext::new()).unwrap(), "[child]");

        engine
            .compile("<!-- target: base -->{<!-- block: body -->base<!-- /block -->}")
            .unwrap();
        assert_eq!(engine.render("child", &TemplateContext::new()).unwrap(), "{child}");
    }

    #[test]
    fn test_recompiling_import_invalidates_importers() {
        let mut engine = Engine::with_options(EngineOptions {
            naming_conflict: NamingConflict::Override,
            ..Default::default()
        })
        .unwrap();
        engine
            .compile("<!-- target: part -->v1<!-- target: page -->(<!-- import: part -->)")
            .unwrap();
        assert_eq!(engine.render("page", &TemplateContext::new()).unwrap(), "(v1)");

        engine.compile("<!-- target: part -->v2").unwrap();
        assert_eq!(engine.render("page", &TemplateContext::new()).unwrap(), "(v2)");
    }

    #[test]
    fn test_forward_master_reference() {
        let mut engine = Engine::new();
        engine
            .compile("<!-- target: child(master = later) --><!-- block: b -->C<!-- /block -->")
            .unwrap();
        let err = engine.render("child", &TemplateContext::new()).unwrap_err();
        assert!(matches!(err, TemplateError::MasterChain { .. }));

        engine
            .compile("<!-- target: later --><<!-- block: b -->L<!-- /block -->>")
            .unwrap();
        assert_eq!(engine.render("child", &TemplateContext::new()).unwrap(), "<C>");
    }

    #[test]
    fn test_configure_changes_default_filter() {
        let mut engine = Engine::new();
        engine.compile("<!-- target: t -->${v}").unwrap();
        let data = ctx(json!({"v": "a&b"}));
        assert_eq!(engine.render("t", &data).unwrap(), "a&amp;b");

        engine.configure_json(json!({"defaultFilter": "url"})).unwrap();
        assert_eq!(engine.render("t", &data).unwrap(), "a%26b");

        engine.configure_json(json!({"defaultFilter": ""})).unwrap();
        assert_eq!(engine.render("t", &data).unwrap(), "a&b");
    }

    #[test]
    fn test_configure_delimiters() {
        let mut engine = Engine::new();
        engine
            .configure_json(json!({
                "commandOpen": "{%",
                "commandClose": "%}",
                "variableOpen": "{{",
                "variableClose": "}}"
            }))
            .unwrap();
        let renderer = engine
            .compile("{% for: {{xs}} as x %}{{x}},{% /for %}<!-- kept -->")
            .unwrap();
        assert_eq!(
            renderer.render_json(json!({"xs": [1, 2]})).unwrap(),
            "1,2,<!-- kept -->"
        );
    }

    #[test]
    fn test_invalid_options_leave_engine_untouched() {
        let mut engine = Engine::new();
        let err = engine.configure_json(json!({"commandOpen": ""})).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidOptions { .. }));
        assert_eq!(engine.options().command_open, "<!--");

        assert!(matches!(
            engine.configure_json(json!({"strip": "yes"})).unwrap_err(),
            TemplateError::InvalidOptions { .. }
        ));
    }

    #[test]
    fn test_add_filter_recompiles_cached_programs() {
        let mut engine = Engine::new();
        engine.add_filter("shout", |s: &str, _: &[TemplateValue]| s.to_uppercase());
        engine.compile("<!-- target: t -->${v|shout}").unwrap();
        let data = ctx(json!({"v": "hey"}));
        assert_eq!(engine.render("t", &data).unwrap(), "HEY");

        engine.add_filter("shout", |s: &str, _: &[TemplateValue]| format!("{s}!"));
        assert_eq!(engine.render("t", &data).unwrap(), "hey!");
    }

    #[test]
    fn test_missing_default_filter_surfaces_on_render() {
        let mut engine = Engine::new();
        engine.configure_json(json!({"defaultFilter": "nope"})).unwrap();
        engine.compile("<!-- target: t -->${v}").unwrap();
        assert_eq!(
            engine.render("t", &TemplateContext::new()).unwrap_err(),
            TemplateError::UnknownFilter {
                name: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_program_is_cached() {
        let mut engine = Engine::new();
        engine.compile("<!-- target: t -->x").unwrap();
        let first = engine.program("t").unwrap().unwrap();
        let second = engine.program("t").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
