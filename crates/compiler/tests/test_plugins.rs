//! Integration tests for the compiler plug-in surface
//!
//! A plug-in overlays Pratt rules, hooks statement and expression parsing
//! through the public cursor, and seeds types for globals its runtime
//! provides.

mod common;

use common::{chunk_of, lex, ops};
use erkao_compiler::{
    CompilerConfig, CompilerPlugin, Compiler, ParseRule, Precedence, Type, TypeChecker,
    compile_with_config,
};
use erkao_core::{Op, TokenKind};
use erkao_runtime::Vm;

struct DashboardPlugin;

fn caret_prefix(c: &mut Compiler, _can_assign: bool) {
    // A stand-in literal: `^` evaluates to null.
    c.emit_op(Op::Null);
    c.push_type(Type::Null);
}

impl CompilerPlugin for DashboardPlugin {
    fn name(&self) -> &str {
        "dashboard"
    }

    fn rules(&self) -> Vec<(TokenKind, ParseRule)> {
        vec![(
            TokenKind::Caret,
            ParseRule::new(Some(caret_prefix), None, Precedence::None),
        )]
    }

    fn parse_statement(&self, c: &mut Compiler) -> bool {
        if c.check(TokenKind::Identifier) && c.peek().lexeme == "checkpoint" {
            c.advance();
            c.consume(TokenKind::Semicolon, "Expect ';' after 'checkpoint'");
            c.emit_op(Op::Gc);
            return true;
        }
        false
    }

    fn seed_types(&self, checker: &mut TypeChecker) {
        checker.seed("gauge", Type::Function);
    }
}

fn compile_with_plugin(vm: &mut Vm, source: &str) -> Result<erkao_compiler::CompileOutput, erkao_compiler::CompileFailure> {
    let tokens = lex(source);
    let config = CompilerConfig::new().with_plugin(Box::new(DashboardPlugin));
    compile_with_config(vm, &tokens, source, Some("plugin.ek"), &config)
}

#[test]
fn test_rule_overlay_wins_over_base_table() {
    let mut vm = Vm::new();
    let out = compile_with_plugin(&mut vm, "let x = ^;").unwrap();
    let chunk = chunk_of(&vm, out.function);
    assert!(ops(chunk).contains(&Op::Null));

    // Without the plug-in, `^` has no prefix rule.
    let mut vm = Vm::new();
    let tokens = lex("let x = ^;");
    assert!(erkao_compiler::compile(&mut vm, &tokens, "let x = ^;", None).is_err());
}

#[test]
fn test_statement_hook_consumes_whole_statement() {
    let mut vm = Vm::new();
    let out = compile_with_plugin(&mut vm, "checkpoint; let a = 1;").unwrap();
    let chunk = chunk_of(&vm, out.function);
    let ops = ops(chunk);
    assert!(ops.contains(&Op::Gc));
    assert!(ops.contains(&Op::DefineVar));
}

#[test]
fn test_type_seeding_feeds_the_advisory_checker() {
    let mut vm = Vm::new();
    let out = compile_with_plugin(&mut vm, "let y = gauge - 1;").unwrap();
    // gauge is seeded as a function; subtracting from it is a (soft) type
    // error, and codegen still happened.
    assert!(!out.diagnostics.is_empty());
    assert!(ops(chunk_of(&vm, out.function)).contains(&Op::Subtract));

    // Unseeded, the same source infers Any and stays quiet.
    let mut vm = Vm::new();
    let tokens = lex("let y = gauge - 1;");
    let out = erkao_compiler::compile(&mut vm, &tokens, "let y = gauge - 1;", None).unwrap();
    assert!(out.diagnostics.is_empty());
}
