//! Erkao Compiler
//!
//! Lowers a token stream (produced by the external lexer) to stack-based
//! bytecode in a single pass: the Pratt parser is fused with the emitter and
//! no AST is built. Constants — strings, prototype functions, classes, enum
//! tables — are allocated into the target VM's heap during compilation, so
//! a `Vm` is part of the compiler's input.
//!
//! # Extending the compiler
//!
//! External projects register plug-ins through [`CompilerConfig`]:
//!
//! ```rust,ignore
//! use erkao_compiler::{CompilerConfig, compile_with_config};
//!
//! let config = CompilerConfig::new()
//!     .with_plugin(Box::new(MyDslPlugin::new()));
//! compile_with_config(&mut vm, &tokens, source, Some("main.ek"), &config)?;
//! ```

pub mod compile;
pub mod diagnostics;
pub mod pattern;
pub mod plugin;
pub mod typecheck;

pub use compile::{CompileOutput, Compiler, compile, compile_with_config};
pub use compile::rules::{ParseFn, ParseRule, Precedence};
pub use diagnostics::{
    CompileFailure, Diagnostic, DiagnosticKind, EXIT_ERROR, EXIT_IO, EXIT_OK, EXIT_USAGE, Reporter,
};
pub use plugin::{CompilerConfig, CompilerPlugin};
pub use typecheck::{Type, TypeChecker};
