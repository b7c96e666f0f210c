//! The single-pass compiler
//!
//! Parser and emitter are one structure: a Pratt cursor over the token array
//! that writes bytecode as it recognises forms. There is no AST. Expression
//! parselets live in `expressions`, statement forms in `statements`, the
//! pattern sub-compiler in `crate::pattern`, and the dense rule table in
//! `rules`.
//!
//! Invariants the parselets maintain:
//! - every expression leaves exactly one value on the runtime stack and one
//!   type on the checker's stack;
//! - every statement leaves both stacks at their entry depth;
//! - every `BeginScope` is balanced by an `EndScope` on all exits, including
//!   `break`/`continue`/`return`/`throw`.

pub mod expressions;
pub mod rules;
pub mod statements;

use crate::diagnostics::{CompileFailure, DiagnosticKind, Reporter};
use crate::plugin::CompilerConfig;
use crate::typecheck::{Type, TypeChecker};
use erkao_core::{Chunk, Op, Token, TokenKind, Value};
use erkao_runtime::{Program, Vm};
use rules::{ParseRule, Precedence};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

/// A successful compilation: the script function plus any advisory (type)
/// diagnostics collected along the way. The host decides whether to print
/// them; they never suppress codegen.
#[derive(Debug)]
pub struct CompileOutput {
    pub function: erkao_core::ObjRef,
    pub diagnostics: Vec<crate::diagnostics::Diagnostic>,
}

/// Compile a token stream into a script function in `vm`'s heap.
///
/// The lexer is external; `tokens` is its output and `source` is the text it
/// lexed, kept for caret rendering in diagnostics. On any lex, parse, or
/// compile error no function is produced and every collected diagnostic is
/// returned.
pub fn compile(
    vm: &mut Vm,
    tokens: &[Token],
    source: &str,
    path: Option<&str>,
) -> Result<CompileOutput, CompileFailure> {
    compile_with_config(vm, tokens, source, path, &CompilerConfig::default())
}

pub fn compile_with_config(
    vm: &mut Vm,
    tokens: &[Token],
    source: &str,
    path: Option<&str>,
    config: &CompilerConfig,
) -> Result<CompileOutput, CompileFailure> {
    let mut reporter = Reporter::new(source, path);

    // Lexer errors halt compilation before it begins.
    for token in tokens {
        if token.kind == TokenKind::Error {
            reporter.report(DiagnosticKind::Lex, token, token.lexeme.clone());
        }
    }
    if reporter.failed() {
        return Err(CompileFailure {
            diagnostics: reporter.diagnostics,
        });
    }

    let program = Program::new(path.map(str::to_string), source);
    let mut compiler = Compiler::new(vm, tokens, reporter, program.clone(), config);
    trace!(tokens = tokens.len(), "compile start");

    while !compiler.check(TokenKind::Eof) {
        compiler.declaration();
    }
    let script = compiler.finish_script();

    let Compiler { reporter, .. } = compiler;
    if reporter.failed() {
        return Err(CompileFailure {
            diagnostics: reporter.diagnostics,
        });
    }
    vm.register_program(program);
    trace!(type_errors = reporter.type_error_count(), "compile done");
    Ok(CompileOutput {
        function: script.expect("script function exists when no hard error was reported"),
        diagnostics: reporter.diagnostics,
    })
}

/// What kind of function body is being emitted; drives `this` legality and
/// return conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// One literal in the tail run of consecutive literal emissions; the
/// constant folder rewrites these in place.
pub(crate) struct RecentConst {
    pub start: usize,
    pub value: Value,
}

/// Loop/switch bookkeeping for `break`/`continue`. Contexts nest; the vector
/// in `FunctionCtx` is the `enclosing` chain.
pub(crate) struct BreakContext {
    pub kind: BreakKind,
    /// Scope depth at entry; `break`/`continue` emit scope exits down to it.
    pub scope_depth: usize,
    /// Forward jumps to patch to just past the construct.
    pub breaks: Vec<usize>,
    /// Forward jumps to patch to the loop's back-edge instruction.
    pub continues: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BreakKind {
    Loop,
    Switch,
}

/// Per-function emission state. Function compilation nests: a `fun` inside a
/// body pushes a fresh context and pops it into a prototype constant.
pub(crate) struct FunctionCtx {
    pub chunk: Chunk,
    pub name: Option<String>,
    pub params: Vec<String>,
    pub arity: u8,
    pub min_arity: u8,
    pub kind: FunctionKind,
    pub scope_depth: usize,
    pub breaks: Vec<BreakContext>,
    /// Scope depth at each live `Try` site; `throw` unwinds emitted scopes
    /// down to the innermost one.
    pub try_scopes: Vec<usize>,
    pub uses_yield: bool,
    pub run: Vec<RecentConst>,
}

impl FunctionCtx {
    fn new(kind: FunctionKind, name: Option<String>) -> Self {
        FunctionCtx {
            chunk: Chunk::new(),
            name,
            params: Vec::new(),
            arity: 0,
            min_arity: 0,
            kind,
            scope_depth: 0,
            breaks: Vec::new(),
            try_scopes: Vec::new(),
            uses_yield: false,
            run: Vec::new(),
        }
    }
}

/// Compile-time knowledge of a declared enum, for `MatchEnum` operands and
/// exhaustiveness checking.
#[derive(Debug, Clone)]
pub(crate) struct EnumInfo {
    pub variants: Vec<(String, u8)>,
    /// Any variant with payload makes the enum an ADT, which is what
    /// exhaustiveness applies to.
    pub is_adt: bool,
}

pub struct Compiler<'a> {
    pub(crate) vm: &'a mut Vm,
    pub(crate) config: &'a CompilerConfig,
    tokens: &'a [Token],
    pos: usize,
    eof: Token,
    pub(crate) panic_mode: bool,
    pub(crate) reporter: Reporter,
    pub(crate) program: Rc<Program>,
    pub(crate) checker: TypeChecker,
    pub(crate) func: FunctionCtx,
    func_stack: Vec<FunctionCtx>,
    pub(crate) enums: HashMap<String, EnumInfo>,
    rule_overlay: HashMap<TokenKind, ParseRule>,
    script: Option<erkao_core::ObjRef>,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(
        vm: &'a mut Vm,
        tokens: &'a [Token],
        reporter: Reporter,
        program: Rc<Program>,
        config: &'a CompilerConfig,
    ) -> Self {
        let mut eof = Token::new(TokenKind::Eof, "", 0, 0);
        if let Some(last) = tokens.last() {
            eof.line = last.line;
            eof.column = last.column + last.len();
        }
        let mut checker = TypeChecker::new(config.type_check);
        let mut rule_overlay = HashMap::new();
        for plugin in config.plugins() {
            for (kind, rule) in plugin.rules() {
                rule_overlay.insert(kind, rule);
            }
            plugin.seed_types(&mut checker);
        }
        Compiler {
            vm,
            config,
            tokens,
            pos: 0,
            eof,
            panic_mode: false,
            reporter,
            program,
            checker,
            func: FunctionCtx::new(FunctionKind::Script, None),
            func_stack: Vec::new(),
            enums: HashMap::new(),
            rule_overlay,
            script: None,
        }
    }

    /// Close the script body: implicit `null` return, then build the
    /// top-level function object.
    pub(crate) fn finish_script(&mut self) -> Option<erkao_core::ObjRef> {
        self.emit_op(Op::Null);
        self.emit_op(Op::Return);
        if self.reporter.failed() {
            return None;
        }
        let ctx = std::mem::replace(&mut self.func, FunctionCtx::new(FunctionKind::Script, None));
        let script = self.vm.alloc_function(
            None,
            0,
            0,
            false,
            Vec::new(),
            ctx.chunk,
            Some(self.program.clone()),
        );
        self.script = Some(script);
        self.script
    }

    // ----- cursor (the surface plug-ins see) -----

    pub fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn token_at(&self, index: usize) -> Option<&Token> {
        self.tokens.get(index)
    }

    pub fn previous(&self) -> &Token {
        if self.pos == 0 {
            &self.eof
        } else {
            self.tokens.get(self.pos - 1).unwrap_or(&self.eof)
        }
    }

    pub fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    pub fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    /// Consume the token if it matches; reports whether it did.
    pub fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    pub fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    // ----- errors -----

    pub(crate) fn error(&mut self, message: &str) {
        let token = self.previous().clone();
        self.error_at(DiagnosticKind::Parse, &token, message);
    }

    pub(crate) fn error_at_current(&mut self, message: &str) {
        let token = self.peek().clone();
        self.error_at(DiagnosticKind::Parse, &token, message);
    }

    pub(crate) fn compile_error(&mut self, message: &str) {
        let token = self.previous().clone();
        self.error_at(DiagnosticKind::Compile, &token, message);
    }

    pub(crate) fn error_at(&mut self, kind: DiagnosticKind, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }
        if kind != DiagnosticKind::Type {
            self.panic_mode = true;
        }
        self.reporter.report(kind, token, message);
    }

    /// Panic-mode recovery: skip to the next statement boundary so one typo
    /// does not cascade.
    pub(crate) fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(TokenKind::Eof) {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }
            match self.peek().kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Let
                | TokenKind::Const
                | TokenKind::Enum
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Match
                | TokenKind::Return
                | TokenKind::Throw
                | TokenKind::Try
                | TokenKind::Import
                | TokenKind::Export
                | TokenKind::Defer => return,
                _ => self.advance(),
            }
        }
    }

    // ----- emission -----

    fn raw_op(&mut self, op: Op) {
        let token = self.previous().clone();
        self.func.chunk.write_op(op, token);
    }

    pub fn emit_op(&mut self, op: Op) {
        self.func.run.clear();
        self.raw_op(op);
    }

    pub fn emit_byte(&mut self, byte: u8) {
        let token = self.previous().clone();
        self.func.chunk.write(byte, token);
    }

    pub fn emit_short(&mut self, operand: u16) {
        let token = self.previous().clone();
        self.func.chunk.write_u16(operand, token);
    }

    /// Add to the constant pool; overflow is a compile error.
    pub fn make_constant(&mut self, value: Value) -> u16 {
        match self.func.chunk.add_constant(value) {
            Some(index) => index,
            None => {
                self.compile_error("Too many constants in one chunk");
                0
            }
        }
    }

    /// Intern `name` and add it to the pool; name operands are always
    /// interned so runtime lookups compare handles, not bytes.
    pub(crate) fn name_constant(&mut self, name: &str) -> u16 {
        let interned = self.vm.intern(name);
        self.make_constant(Value::Obj(interned))
    }

    pub fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op(Op::Constant);
        self.emit_short(index);
    }

    /// Literal emission joins the folding window. Only source literals come
    /// through here; synthesised constants use `emit_constant`.
    pub(crate) fn emit_literal(&mut self, value: Value) {
        let start = self.func.chunk.len();
        match value {
            Value::Null => self.raw_op(Op::Null),
            Value::Bool(true) => self.raw_op(Op::True),
            Value::Bool(false) => self.raw_op(Op::False),
            _ => {
                let index = match self.func.chunk.add_constant(value) {
                    Some(index) => index,
                    None => {
                        self.compile_error("Too many constants in one chunk");
                        0
                    }
                };
                self.raw_op(Op::Constant);
                let token = self.previous().clone();
                self.func.chunk.write_u16(index, token);
            }
        }
        self.func.run.push(RecentConst { start, value });
        if self.func.run.len() > 8 {
            self.func.run.remove(0);
        }
    }

    /// Fold a binary operator over the two most recent literals. Pure
    /// arithmetic, comparison, equality, and string concatenation fold; the
    /// truncation also discards the dead operands' cache slots.
    pub(crate) fn try_fold_binary(&mut self, op: Op) -> bool {
        let n = self.func.run.len();
        if n < 2 {
            return false;
        }
        let a = self.func.run[n - 2].value;
        let b = self.func.run[n - 1].value;
        let folded = match op {
            Op::Add => match (a, b) {
                (Value::Number(x), Value::Number(y)) => Some(Value::Number(x + y)),
                (Value::Obj(x), Value::Obj(y)) => {
                    let joined = format!(
                        "{}{}",
                        self.vm.heap.string_bytes(x),
                        self.vm.heap.string_bytes(y)
                    );
                    Some(Value::Obj(self.vm.intern(&joined)))
                }
                _ => None,
            },
            Op::Subtract => fold_numeric(a, b, |x, y| x - y),
            Op::Multiply => fold_numeric(a, b, |x, y| x * y),
            Op::Divide => fold_numeric(a, b, |x, y| x / y),
            Op::Greater => fold_compare(a, b, |x, y| x > y),
            Op::GreaterEqual => fold_compare(a, b, |x, y| x >= y),
            Op::Less => fold_compare(a, b, |x, y| x < y),
            Op::LessEqual => fold_compare(a, b, |x, y| x <= y),
            Op::Equal => Some(Value::Bool(a == b)),
            _ => None,
        };
        let Some(folded) = folded else { return false };
        let start = self.func.run[n - 2].start;
        self.func.chunk.truncate(start);
        self.func.run.truncate(n - 2);
        self.emit_literal(folded);
        true
    }

    pub(crate) fn try_fold_unary(&mut self, op: Op) -> bool {
        let Some(last) = self.func.run.last() else {
            return false;
        };
        let folded = match (op, last.value) {
            (Op::Negate, Value::Number(n)) => Some(Value::Number(-n)),
            (Op::Not, value) => Some(Value::Bool(value.is_falsey())),
            _ => None,
        };
        let Some(folded) = folded else { return false };
        let start = last.start;
        self.func.chunk.truncate(start);
        self.func.run.pop();
        self.emit_literal(folded);
        true
    }

    /// Emit a jump with a placeholder offset; returns the operand position
    /// for `patch_jump`.
    pub fn emit_jump(&mut self, op: Op) -> usize {
        self.emit_op(op);
        let at = self.func.chunk.len();
        self.emit_short(0xFFFF);
        at
    }

    /// Point a forward jump at the current position. Offsets are measured
    /// from the byte after the operand.
    pub fn patch_jump(&mut self, operand_at: usize) {
        let target = self.func.chunk.len();
        let offset = target - (operand_at + 2);
        if offset > u16::MAX as usize {
            self.compile_error("Too much code to jump over");
            return;
        }
        self.func.chunk.patch_u16(operand_at, offset as u16);
    }

    /// Backward jump to `start` (a recorded loop head).
    pub(crate) fn emit_loop(&mut self, start: usize) {
        self.emit_op(Op::Loop);
        // Offset counts from the byte after the two operand bytes.
        let offset = self.func.chunk.len() + 2 - start;
        if offset > u16::MAX as usize {
            self.compile_error("Loop body too large");
            self.emit_short(0);
            return;
        }
        self.emit_short(offset as u16);
    }

    // ----- scopes -----

    pub fn begin_scope(&mut self) {
        self.emit_op(Op::BeginScope);
        self.func.scope_depth += 1;
    }

    pub fn end_scope(&mut self) {
        self.emit_op(Op::EndScope);
        self.emit_op(Op::Gc);
        self.func.scope_depth -= 1;
    }

    /// Emit scope exits down to `target` without changing compile-time
    /// depth: used before `break`/`continue`/`return`/`throw` jumps while
    /// code after the jump is still inside the scopes.
    pub(crate) fn emit_scope_exits(&mut self, target: usize) {
        let mut depth = self.func.scope_depth;
        while depth > target {
            self.emit_op(Op::EndScope);
            self.emit_op(Op::Gc);
            depth -= 1;
        }
    }

    // ----- Pratt driver -----

    pub(crate) fn rule(&self, kind: TokenKind) -> ParseRule {
        if let Some(rule) = self.rule_overlay.get(&kind) {
            return *rule;
        }
        rules::base_rule(kind)
    }

    pub fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    pub(crate) fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let rule = self.rule(self.previous().kind);
        let can_assign = precedence <= Precedence::Assignment;
        if let Some(prefix) = rule.prefix {
            prefix(self, can_assign);
        } else {
            // Give plug-in expression hooks a chance at the unknown token.
            let config = self.config;
            let mut handled = false;
            for plugin in config.plugins() {
                if plugin.parse_expression(self) {
                    handled = true;
                    break;
                }
            }
            if !handled {
                self.error("Expect expression");
                self.checker.push(Type::Any);
                return;
            }
        }

        while precedence <= self.rule(self.peek().kind).precedence {
            self.advance();
            let Some(infix) = self.rule(self.previous().kind).infix else {
                break;
            };
            infix(self, can_assign);
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target");
        }
    }

    // ----- declarations (dispatch lives in statements.rs) -----

    pub(crate) fn push_function(&mut self, kind: FunctionKind, name: Option<String>) {
        let ctx = std::mem::replace(&mut self.func, FunctionCtx::new(kind, name));
        self.func_stack.push(ctx);
    }

    pub(crate) fn pop_function(&mut self) -> FunctionCtx {
        let parent = self.func_stack.pop().expect("function stack underflow");
        std::mem::replace(&mut self.func, parent)
    }

    pub(crate) fn in_method(&self) -> bool {
        matches!(self.func.kind, FunctionKind::Method | FunctionKind::Initializer)
    }

    // ----- type-stack surface for plug-ins -----

    /// A plug-in expression hook must leave one type behind, same as any
    /// parselet.
    pub fn push_type(&mut self, ty: Type) {
        self.checker.push(ty);
    }

    pub fn pop_type(&mut self) -> Type {
        self.checker.pop()
    }
}

fn fold_numeric(a: Value, b: Value, f: impl Fn(f64, f64) -> f64) -> Option<Value> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Some(Value::Number(f(x, y))),
        _ => None,
    }
}

fn fold_compare(a: Value, b: Value, f: impl Fn(f64, f64) -> bool) -> Option<Value> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Some(Value::Bool(f(x, y))),
        _ => None,
    }
}
