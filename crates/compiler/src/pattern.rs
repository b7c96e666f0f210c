//! The pattern sub-compiler
//!
//! Patterns parse into a transient tree and lower immediately into the
//! surrounding function's chunk; nothing survives compilation. Lowering
//! walks the tree carrying a path from the scrutinee root, emits an
//! equality or shape test per node, and routes failures either to a shared
//! boolean epilogue (`match` arms, `if let`) or to per-site throw sequences
//! that build `{message, path, value}` exception maps (destructuring `let`).
//!
//! The scrutinee is bound to a hidden local first; every test and binding
//! replays its path from that binding, so the lowering needs no stack
//! shuffling opcodes.

use crate::compile::Compiler;
use crate::diagnostics::DiagnosticKind;
use erkao_core::{Op, Token, TokenKind, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LitValue {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone)]
pub(crate) struct MapEntry {
    pub key: String,
    pub quoted: bool,
    pub pattern: Pattern,
}

#[derive(Debug, Clone)]
pub(crate) enum Pattern {
    Wildcard,
    Binding(String),
    /// `^name` — compares against an existing variable instead of binding.
    Pin(String),
    Literal {
        value: LitValue,
        token: Token,
    },
    Array {
        items: Vec<Pattern>,
        rest: Option<String>,
    },
    Map {
        entries: Vec<MapEntry>,
        rest: Option<String>,
    },
    Enum {
        enum_name: String,
        variant: String,
        args: Vec<Pattern>,
        token: Token,
    },
}

// ----- parsing -----

pub(crate) fn parse_pattern(c: &mut Compiler) -> Pattern {
    if c.matches(TokenKind::Minus) {
        c.consume(TokenKind::Number, "Expect number after '-' in pattern");
        let token = c.previous().clone();
        let n = token.lexeme.parse::<f64>().unwrap_or(0.0);
        return Pattern::Literal {
            value: LitValue::Number(-n),
            token,
        };
    }
    if c.matches(TokenKind::Number) {
        let token = c.previous().clone();
        let n = token.lexeme.parse::<f64>().unwrap_or(0.0);
        return Pattern::Literal {
            value: LitValue::Number(n),
            token,
        };
    }
    if c.matches(TokenKind::String) {
        let token = c.previous().clone();
        let text = crate::compile::expressions::unquote(&token.lexeme);
        return Pattern::Literal {
            value: LitValue::Str(text),
            token,
        };
    }
    if c.matches(TokenKind::True) {
        let token = c.previous().clone();
        return Pattern::Literal {
            value: LitValue::Bool(true),
            token,
        };
    }
    if c.matches(TokenKind::False) {
        let token = c.previous().clone();
        return Pattern::Literal {
            value: LitValue::Bool(false),
            token,
        };
    }
    if c.matches(TokenKind::Null) {
        let token = c.previous().clone();
        return Pattern::Literal {
            value: LitValue::Null,
            token,
        };
    }
    if c.matches(TokenKind::Caret) {
        c.consume(TokenKind::Identifier, "Expect variable name after '^'");
        return Pattern::Pin(c.previous().lexeme.clone());
    }
    if c.matches(TokenKind::Identifier) {
        let name = c.previous().lexeme.clone();
        if c.matches(TokenKind::Dot) {
            let enum_token = c.previous().clone();
            c.consume(TokenKind::Identifier, "Expect variant name after '.'");
            let variant = c.previous().lexeme.clone();
            let mut args = Vec::new();
            if c.matches(TokenKind::LeftParen) {
                if !c.check(TokenKind::RightParen) {
                    loop {
                        args.push(parse_pattern(c));
                        if !c.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                c.consume(TokenKind::RightParen, "Expect ')' after variant payload");
            }
            return Pattern::Enum {
                enum_name: name,
                variant,
                args,
                token: enum_token,
            };
        }
        if name == "_" {
            return Pattern::Wildcard;
        }
        return Pattern::Binding(name);
    }
    if c.matches(TokenKind::LeftBracket) {
        let mut items = Vec::new();
        let mut rest = None;
        if !c.check(TokenKind::RightBracket) {
            loop {
                if c.matches(TokenKind::Dot) {
                    c.consume(TokenKind::Dot, "Expect '..' before rest binding");
                    c.consume(TokenKind::Identifier, "Expect rest binding name");
                    rest = Some(c.previous().lexeme.clone());
                    break;
                }
                items.push(parse_pattern(c));
                if !c.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        c.consume(TokenKind::RightBracket, "Expect ']' after array pattern");
        return Pattern::Array { items, rest };
    }
    if c.matches(TokenKind::LeftBrace) {
        let mut entries = Vec::new();
        let mut rest = None;
        if !c.check(TokenKind::RightBrace) {
            loop {
                if c.matches(TokenKind::Dot) {
                    c.consume(TokenKind::Dot, "Expect '..' before rest binding");
                    c.consume(TokenKind::Identifier, "Expect rest binding name");
                    rest = Some(c.previous().lexeme.clone());
                    break;
                }
                if c.matches(TokenKind::String) {
                    let key = crate::compile::expressions::unquote(&c.previous().lexeme.clone());
                    c.consume(TokenKind::Colon, "Expect ':' after string key");
                    entries.push(MapEntry {
                        key,
                        quoted: true,
                        pattern: parse_pattern(c),
                    });
                } else {
                    c.consume(TokenKind::Identifier, "Expect map pattern key");
                    let key = c.previous().lexeme.clone();
                    let pattern = if c.matches(TokenKind::Colon) {
                        parse_pattern(c)
                    } else {
                        // `{a}` is shorthand for `{a: a}`.
                        Pattern::Binding(key.clone())
                    };
                    entries.push(MapEntry {
                        key,
                        quoted: false,
                        pattern,
                    });
                }
                if !c.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        c.consume(TokenKind::RightBrace, "Expect '}' after map pattern");
        return Pattern::Map { entries, rest };
    }

    c.error_at_current("Expect pattern");
    Pattern::Wildcard
}

// ----- lowering -----

#[derive(Debug, Clone, PartialEq)]
enum PathStep {
    Index(usize),
    Key(String),
    QuotedKey(String),
}

/// `$.a[0]["k"]` notation with escaped string keys.
fn render_path(path: &[PathStep]) -> String {
    let mut out = String::from("$");
    for step in path {
        match step {
            PathStep::Index(i) => out.push_str(&format!("[{}]", i)),
            PathStep::Key(k) => {
                out.push('.');
                out.push_str(k);
            }
            PathStep::QuotedKey(k) => {
                let escaped = k.replace('\\', "\\\\").replace('"', "\\\"");
                out.push_str(&format!("[\"{}\"]", escaped));
            }
        }
    }
    out
}

#[derive(Debug)]
enum Binding {
    Path {
        name: String,
        path: Vec<PathStep>,
    },
    ArrayRest {
        name: String,
        path: Vec<PathStep>,
        start: usize,
    },
    MapRest {
        name: String,
        path: Vec<PathStep>,
        excluded: Vec<String>,
    },
}

impl Binding {
    fn name(&self) -> &str {
        match self {
            Binding::Path { name, .. }
            | Binding::ArrayRest { name, .. }
            | Binding::MapRest { name, .. } => name,
        }
    }
}

enum FailMode {
    /// Boolean mode: all failures route to one epilogue that leaves `false`.
    Shared(Vec<usize>),
    /// Throw mode: every failure gets its own constructor, tagged with the
    /// path that failed.
    Throwing(Vec<(usize, Vec<PathStep>)>),
}

struct Lowering {
    hidden_index: u16,
    bindings: Vec<Binding>,
    mode: FailMode,
}

impl Lowering {
    fn add_binding(&mut self, c: &mut Compiler, binding: Binding) {
        if self.bindings.iter().any(|b| b.name() == binding.name()) {
            let token = c.previous().clone();
            c.error_at(
                DiagnosticKind::Compile,
                &token,
                &format!("Duplicate pattern binding '{}'", binding.name()),
            );
            return;
        }
        self.bindings.push(binding);
    }
}

/// Push the sub-value at `path` by replaying steps from the hidden binding.
fn replay_path(c: &mut Compiler, hidden_index: u16, path: &[PathStep]) {
    c.emit_op(Op::GetVar);
    c.emit_short(hidden_index);
    for step in path {
        match step {
            PathStep::Index(i) => {
                c.emit_constant(Value::Number(*i as f64));
                c.emit_op(Op::GetIndex);
            }
            PathStep::Key(k) | PathStep::QuotedKey(k) => {
                let interned = c.vm.intern(k);
                c.emit_constant(Value::Obj(interned));
                c.emit_op(Op::GetIndex);
            }
        }
    }
}

/// Register the check whose boolean is on top of the stack: jump out on
/// false, pop it on success.
fn fail_check(c: &mut Compiler, low: &mut Lowering, path: &[PathStep]) {
    let jump = c.emit_jump(Op::JumpIfFalse);
    c.emit_op(Op::Pop);
    match &mut low.mode {
        FailMode::Shared(jumps) => jumps.push(jump),
        FailMode::Throwing(sites) => sites.push((jump, path.to_vec())),
    }
}

fn emit_lit(c: &mut Compiler, value: &LitValue) {
    match value {
        LitValue::Number(n) => c.emit_constant(Value::Number(*n)),
        LitValue::Str(s) => {
            let interned = c.vm.intern(s);
            c.emit_constant(Value::Obj(interned));
        }
        LitValue::Bool(true) => c.emit_op(Op::True),
        LitValue::Bool(false) => c.emit_op(Op::False),
        LitValue::Null => c.emit_op(Op::Null),
    }
}

fn walk(c: &mut Compiler, low: &mut Lowering, pattern: &Pattern, path: &[PathStep]) {
    match pattern {
        Pattern::Wildcard => {}
        Pattern::Binding(name) => {
            low.add_binding(
                c,
                Binding::Path {
                    name: name.clone(),
                    path: path.to_vec(),
                },
            );
        }
        Pattern::Pin(name) => {
            replay_path(c, low.hidden_index, path);
            let index = c.name_constant(name);
            c.emit_op(Op::GetVar);
            c.emit_short(index);
            c.emit_op(Op::Equal);
            fail_check(c, low, path);
        }
        Pattern::Literal { value, .. } => {
            replay_path(c, low.hidden_index, path);
            emit_lit(c, value);
            c.emit_op(Op::Equal);
            fail_check(c, low, path);
        }
        Pattern::Array { items, rest } => {
            replay_path(c, low.hidden_index, path);
            c.emit_op(Op::IsArray);
            fail_check(c, low, path);

            replay_path(c, low.hidden_index, path);
            c.emit_op(Op::Len);
            c.emit_constant(Value::Number(items.len() as f64));
            c.emit_op(if rest.is_some() {
                Op::GreaterEqual
            } else {
                Op::Equal
            });
            fail_check(c, low, path);

            for (i, item) in items.iter().enumerate() {
                let mut item_path = path.to_vec();
                item_path.push(PathStep::Index(i));
                walk(c, low, item, &item_path);
            }
            if let Some(rest) = rest {
                low.add_binding(
                    c,
                    Binding::ArrayRest {
                        name: rest.clone(),
                        path: path.to_vec(),
                        start: items.len(),
                    },
                );
            }
        }
        Pattern::Map { entries, rest } => {
            replay_path(c, low.hidden_index, path);
            c.emit_op(Op::IsMap);
            fail_check(c, low, path);

            for entry in entries {
                replay_path(c, low.hidden_index, path);
                let interned = c.vm.intern(&entry.key);
                c.emit_constant(Value::Obj(interned));
                c.emit_op(Op::MapHas);
                fail_check(c, low, path);

                let mut entry_path = path.to_vec();
                entry_path.push(if entry.quoted {
                    PathStep::QuotedKey(entry.key.clone())
                } else {
                    PathStep::Key(entry.key.clone())
                });
                walk(c, low, &entry.pattern, &entry_path);
            }
            if let Some(rest) = rest {
                low.add_binding(
                    c,
                    Binding::MapRest {
                        name: rest.clone(),
                        path: path.to_vec(),
                        excluded: entries.iter().map(|e| e.key.clone()).collect(),
                    },
                );
            }
        }
        Pattern::Enum {
            enum_name,
            variant,
            args,
            token,
        } => {
            if let Some(info) = c.enums.get(enum_name).cloned() {
                match info.variants.iter().find(|(v, _)| v == variant) {
                    None => {
                        let token = token.clone();
                        c.error_at(
                            DiagnosticKind::Compile,
                            &token,
                            &format!("Enum '{}' has no variant '{}'", enum_name, variant),
                        );
                    }
                    Some((_, arity)) => {
                        if *arity as usize != args.len() {
                            let token = token.clone();
                            c.error_at(
                                DiagnosticKind::Compile,
                                &token,
                                &format!(
                                    "Variant '{}.{}' has {} field(s), pattern names {}",
                                    enum_name,
                                    variant,
                                    arity,
                                    args.len()
                                ),
                            );
                        }
                    }
                }
            }

            replay_path(c, low.hidden_index, path);
            let enum_index = c.name_constant(enum_name);
            let variant_index = c.name_constant(variant);
            c.emit_op(Op::MatchEnum);
            c.emit_short(enum_index);
            c.emit_short(variant_index);
            // MatchEnum peeks, leaving [value, bool]; squash to one bool.
            let no = c.emit_jump(Op::JumpIfFalse);
            c.emit_op(Op::Pop);
            c.emit_op(Op::Pop);
            c.emit_op(Op::True);
            let done = c.emit_jump(Op::Jump);
            c.patch_jump(no);
            c.emit_op(Op::Pop);
            c.emit_op(Op::Pop);
            c.emit_op(Op::False);
            c.patch_jump(done);
            fail_check(c, low, path);

            for (i, arg) in args.iter().enumerate() {
                let mut arg_path = path.to_vec();
                arg_path.push(PathStep::Key("values".to_string()));
                arg_path.push(PathStep::Index(i));
                walk(c, low, arg, &arg_path);
            }
        }
    }
}

fn emit_bindings(c: &mut Compiler, low: &Lowering, is_const: bool) {
    let define = if is_const { Op::DefineConst } else { Op::DefineVar };
    for binding in &low.bindings {
        match binding {
            Binding::Path { name, path } => {
                replay_path(c, low.hidden_index, path);
                let index = c.name_constant(name);
                c.emit_op(define);
                c.emit_short(index);
            }
            Binding::ArrayRest { name, path, start } => {
                let helper = c.name_constant("arrayRest");
                c.emit_op(Op::GetVar);
                c.emit_short(helper);
                replay_path(c, low.hidden_index, path);
                c.emit_constant(Value::Number(*start as f64));
                c.emit_op(Op::Call);
                c.emit_byte(2);
                let index = c.name_constant(name);
                c.emit_op(define);
                c.emit_short(index);
            }
            Binding::MapRest {
                name,
                path,
                excluded,
            } => {
                let helper = c.name_constant("mapRest");
                c.emit_op(Op::GetVar);
                c.emit_short(helper);
                replay_path(c, low.hidden_index, path);
                for key in excluded {
                    let interned = c.vm.intern(key);
                    c.emit_constant(Value::Obj(interned));
                }
                c.emit_op(Op::Array);
                c.emit_short(excluded.len() as u16);
                c.emit_op(Op::Call);
                c.emit_byte(2);
                let index = c.name_constant(name);
                c.emit_op(define);
                c.emit_short(index);
            }
        }
    }
}

/// Boolean mode: leaves exactly one bool on the stack. Bindings are defined
/// before the guard runs; guard failure re-enters the shared failure path.
pub(crate) fn lower_bool_matcher(
    c: &mut Compiler,
    pattern: &Pattern,
    hidden_index: u16,
    has_guard: bool,
) {
    let mut low = Lowering {
        hidden_index,
        bindings: Vec::new(),
        mode: FailMode::Shared(Vec::new()),
    };
    walk(c, &mut low, pattern, &[]);
    emit_bindings(c, &low, false);
    if has_guard {
        c.expression();
        c.checker.pop();
        fail_check(c, &mut low, &[]);
    }
    c.emit_op(Op::True);
    let out = c.emit_jump(Op::Jump);
    // Failures land here with their `false` still on the stack; it is the
    // result.
    if let FailMode::Shared(jumps) = &low.mode {
        for jump in jumps.clone() {
            c.patch_jump(jump);
        }
    }
    c.patch_jump(out);
    c.checker.push(crate::typecheck::Type::Bool);
}

/// Throw mode for destructuring `let`/`const`: the scrutinee is on the
/// stack; failures throw `{message, path, value}`.
pub(crate) fn lower_destructuring(c: &mut Compiler, pattern: &Pattern, is_const: bool) {
    let hidden = format!("__let{}", c.func.chunk.len());
    let hidden_index = c.name_constant(&hidden);
    c.emit_op(Op::DefineVar);
    c.emit_short(hidden_index);

    let mut low = Lowering {
        hidden_index,
        bindings: Vec::new(),
        mode: FailMode::Throwing(Vec::new()),
    };
    walk(c, &mut low, pattern, &[]);
    emit_bindings(c, &low, is_const);
    let done = c.emit_jump(Op::Jump);

    let sites = match &low.mode {
        FailMode::Throwing(sites) => sites.clone(),
        FailMode::Shared(_) => unreachable!("destructuring lowers in throw mode"),
    };
    for (jump, path) in sites {
        c.patch_jump(jump);
        c.emit_op(Op::Pop);
        emit_failure_throw(c, hidden_index, &path);
    }
    c.patch_jump(done);
}

/// Build and throw `{message, path, value}` for the failing path. The
/// message appends the stringified offending value.
fn emit_failure_throw(c: &mut Compiler, hidden_index: u16, path: &[PathStep]) {
    let rendered = render_path(path);
    c.emit_op(Op::Map);
    c.emit_short(0);

    let message_key = c.vm.intern("message");
    let message_constant = Value::Obj(message_key);
    c.emit_constant(message_constant);
    let prefix = format!("Pattern match failed at {}: got ", rendered);
    let prefix_ref = c.vm.intern(&prefix);
    c.emit_constant(Value::Obj(prefix_ref));
    replay_path(c, hidden_index, path);
    c.emit_op(Op::Stringify);
    c.emit_op(Op::Add);
    c.emit_op(Op::MapSet);

    let path_key = c.vm.intern("path");
    c.emit_constant(Value::Obj(path_key));
    let path_ref = c.vm.intern(&rendered);
    c.emit_constant(Value::Obj(path_ref));
    c.emit_op(Op::MapSet);

    let value_key = c.vm.intern("value");
    c.emit_constant(Value::Obj(value_key));
    replay_path(c, hidden_index, path);
    c.emit_op(Op::MapSet);

    c.emit_op(Op::Throw);
}

// ----- exhaustiveness and duplicate-arm tracking -----

/// Collects what a `match`'s arms cover; consulted when the statement
/// closes. Exhaustiveness applies only when every unguarded arm tests one
/// ADT enum and nothing catches all.
pub(crate) struct ArmTracker {
    literals: Vec<LitValue>,
    enum_variants: HashMap<String, Vec<String>>,
    has_catch_all: bool,
    has_default: bool,
    has_other_arms: bool,
}

impl ArmTracker {
    pub(crate) fn new() -> Self {
        ArmTracker {
            literals: Vec::new(),
            enum_variants: HashMap::new(),
            has_catch_all: false,
            has_default: false,
            has_other_arms: false,
        }
    }

    pub(crate) fn saw_default(&mut self) {
        self.has_default = true;
    }

    pub(crate) fn track(&mut self, c: &mut Compiler, pattern: &Pattern, has_guard: bool) {
        match pattern {
            Pattern::Literal { value, token } => {
                if self.literals.contains(value) {
                    let token = token.clone();
                    c.error_at(DiagnosticKind::Compile, &token, "Duplicate case");
                } else {
                    self.literals.push(value.clone());
                }
                self.has_other_arms = true;
            }
            Pattern::Wildcard | Pattern::Binding(_) => {
                if !has_guard {
                    self.has_catch_all = true;
                }
            }
            Pattern::Enum {
                enum_name, variant, ..
            } => {
                if !has_guard {
                    self.enum_variants
                        .entry(enum_name.clone())
                        .or_default()
                        .push(variant.clone());
                }
            }
            Pattern::Array { .. } | Pattern::Map { .. } | Pattern::Pin(_) => {
                self.has_other_arms = true;
            }
        }
    }

    pub(crate) fn check_exhaustive(&self, c: &mut Compiler, match_token: &Token) {
        if self.has_default || self.has_catch_all || self.has_other_arms {
            return;
        }
        if self.enum_variants.len() != 1 {
            return;
        }
        let (enum_name, used) = self.enum_variants.iter().next().expect("one entry");
        let Some(info) = c.enums.get(enum_name).cloned() else {
            return;
        };
        if !info.is_adt {
            return;
        }
        let missing: Vec<String> = info
            .variants
            .iter()
            .filter(|(variant, _)| !used.contains(variant))
            .map(|(variant, _)| format!("{}.{}", enum_name, variant))
            .collect();
        if !missing.is_empty() {
            c.error_at(
                DiagnosticKind::Compile,
                match_token,
                &format!("Non-exhaustive match: missing {}", missing.join(", ")),
            );
        }
    }
}
