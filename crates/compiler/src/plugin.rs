//! Compiler extension surface
//!
//! External projects extend the compiler without modifying it: a plug-in
//! contributes Pratt rules keyed by token kind, a statement hook, an
//! expression hook, and a type-seeding hook. Registration is idempotent by
//! plug-in name — registering the same name twice keeps the first.
//!
//! Plug-ins see the compiler as an opaque cursor: `check`, `matches`,
//! `consume`, `advance`, `previous`, `peek`, the `emit_*`/`make_constant`/
//! `emit_jump`/`patch_jump` family, and the scope helpers.

use crate::compile::Compiler;
use crate::compile::rules::ParseRule;
use crate::typecheck::TypeChecker;
use erkao_core::TokenKind;

pub trait CompilerPlugin {
    /// Stable identity; duplicate registrations of this name are ignored.
    fn name(&self) -> &str;

    /// Pratt rules to overlay, keyed by token kind. Overlays win over the
    /// built-in table.
    fn rules(&self) -> Vec<(TokenKind, ParseRule)> {
        Vec::new()
    }

    /// Called before built-in statement dispatch. Return true after
    /// consuming a complete statement.
    fn parse_statement(&self, _compiler: &mut Compiler) -> bool {
        false
    }

    /// Called when no prefix rule matches an expression token. Return true
    /// after consuming a complete expression (one value, one type).
    fn parse_expression(&self, _compiler: &mut Compiler) -> bool {
        false
    }

    /// Declare types for globals the plug-in's runtime provides.
    fn seed_types(&self, _checker: &mut TypeChecker) {}
}

pub struct CompilerConfig {
    /// Advisory type checking; diagnostics only, never blocks codegen.
    pub type_check: bool,
    plugins: Vec<Box<dyn CompilerPlugin>>,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig {
            type_check: true,
            plugins: Vec::new(),
        }
    }

    pub fn with_type_checking(mut self, enabled: bool) -> Self {
        self.type_check = enabled;
        self
    }

    /// Register a plug-in. Idempotent: a second plug-in with an
    /// already-registered name is dropped.
    pub fn with_plugin(mut self, plugin: Box<dyn CompilerPlugin>) -> Self {
        if !self.plugins.iter().any(|p| p.name() == plugin.name()) {
            self.plugins.push(plugin);
        }
        self
    }

    pub fn plugins(&self) -> &[Box<dyn CompilerPlugin>] {
        &self.plugins
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig::new()
    }
}
