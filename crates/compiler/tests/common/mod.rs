//! Shared test harness
//!
//! The lexer is outside this workspace, so tests bring a minimal one of
//! their own, plus helpers to decode emitted chunks and check structural
//! invariants.
#![allow(dead_code)]

use erkao_compiler::{CompileFailure, CompileOutput, compile};
use erkao_core::{Chunk, ObjRef, Op, Token, TokenKind};
use erkao_runtime::{ObjKind, Vm};

pub fn lex(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    let mut line = 0usize;
    let mut column = 0usize;

    macro_rules! push {
        ($kind:expr, $lexeme:expr, $col:expr) => {
            tokens.push(Token::new($kind, $lexeme, line, $col))
        };
    }

    while let Some((_, ch)) = chars.next() {
        let start_column = column;
        column += 1;
        match ch {
            '\n' => {
                line += 1;
                column = 0;
            }
            ' ' | '\t' | '\r' => {}
            '/' => {
                if matches!(chars.peek(), Some((_, '/'))) {
                    while let Some((_, c)) = chars.peek().copied() {
                        if c == '\n' {
                            break;
                        }
                        chars.next();
                        column += 1;
                    }
                } else {
                    push!(TokenKind::Slash, "/", start_column);
                }
            }
            '(' => push!(TokenKind::LeftParen, "(", start_column),
            ')' => push!(TokenKind::RightParen, ")", start_column),
            '{' => push!(TokenKind::LeftBrace, "{", start_column),
            '}' => push!(TokenKind::RightBrace, "}", start_column),
            '[' => push!(TokenKind::LeftBracket, "[", start_column),
            ']' => push!(TokenKind::RightBracket, "]", start_column),
            ',' => push!(TokenKind::Comma, ",", start_column),
            '.' => push!(TokenKind::Dot, ".", start_column),
            '-' => push!(TokenKind::Minus, "-", start_column),
            '+' => push!(TokenKind::Plus, "+", start_column),
            ';' => push!(TokenKind::Semicolon, ";", start_column),
            '*' => push!(TokenKind::Star, "*", start_column),
            ':' => push!(TokenKind::Colon, ":", start_column),
            '^' => push!(TokenKind::Caret, "^", start_column),
            '?' => {
                if matches!(chars.peek(), Some((_, '.'))) {
                    chars.next();
                    column += 1;
                    push!(TokenKind::QuestionDot, "?.", start_column);
                } else {
                    push!(TokenKind::Question, "?", start_column);
                }
            }
            '!' => {
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    column += 1;
                    push!(TokenKind::BangEqual, "!=", start_column);
                } else {
                    push!(TokenKind::Bang, "!", start_column);
                }
            }
            '=' => {
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    column += 1;
                    push!(TokenKind::EqualEqual, "==", start_column);
                } else {
                    push!(TokenKind::Equal, "=", start_column);
                }
            }
            '>' => {
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    column += 1;
                    push!(TokenKind::GreaterEqual, ">=", start_column);
                } else {
                    push!(TokenKind::Greater, ">", start_column);
                }
            }
            '<' => {
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    column += 1;
                    push!(TokenKind::LessEqual, "<=", start_column);
                } else {
                    push!(TokenKind::Less, "<", start_column);
                }
            }
            '"' => {
                let mut lexeme = String::from("\"");
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    column += 1;
                    if c == '\n' {
                        line += 1;
                        column = 0;
                    }
                    lexeme.push(c);
                    if c == '\\' {
                        if let Some((_, escaped)) = chars.next() {
                            column += 1;
                            lexeme.push(escaped);
                        }
                        continue;
                    }
                    if c == '"' {
                        closed = true;
                        break;
                    }
                }
                if closed {
                    push!(TokenKind::String, lexeme, start_column);
                } else {
                    push!(TokenKind::Error, "Unterminated string", start_column);
                }
            }
            c if c.is_ascii_digit() => {
                let mut lexeme = String::from(c);
                while let Some((_, d)) = chars.peek().copied() {
                    if d.is_ascii_digit() || d == '.' {
                        // Only one dot, and only with a digit after it.
                        if d == '.' {
                            let mut ahead = chars.clone();
                            ahead.next();
                            if !matches!(ahead.peek(), Some((_, n)) if n.is_ascii_digit()) {
                                break;
                            }
                            if lexeme.contains('.') {
                                break;
                            }
                        }
                        lexeme.push(d);
                        chars.next();
                        column += 1;
                    } else {
                        break;
                    }
                }
                push!(TokenKind::Number, lexeme, start_column);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut lexeme = String::from(c);
                while let Some((_, d)) = chars.peek().copied() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        lexeme.push(d);
                        chars.next();
                        column += 1;
                    } else {
                        break;
                    }
                }
                let kind = keyword(&lexeme).unwrap_or(TokenKind::Identifier);
                push!(kind, lexeme, start_column);
            }
            other => {
                push!(TokenKind::Error, format!("Unexpected character '{}'", other), start_column);
            }
        }
    }
    tokens.push(Token::new(TokenKind::Eof, "", line, column));
    tokens
}

fn keyword(lexeme: &str) -> Option<TokenKind> {
    Some(match lexeme {
        "and" => TokenKind::And,
        "as" => TokenKind::As,
        "break" => TokenKind::Break,
        "case" => TokenKind::Case,
        "catch" => TokenKind::Catch,
        "class" => TokenKind::Class,
        "const" => TokenKind::Const,
        "continue" => TokenKind::Continue,
        "default" => TokenKind::Default,
        "defer" => TokenKind::Defer,
        "else" => TokenKind::Else,
        "enum" => TokenKind::Enum,
        "export" => TokenKind::Export,
        "false" => TokenKind::False,
        "for" => TokenKind::For,
        "from" => TokenKind::From,
        "fun" => TokenKind::Fun,
        "if" => TokenKind::If,
        "import" => TokenKind::Import,
        "let" => TokenKind::Let,
        "match" => TokenKind::Match,
        "null" => TokenKind::Null,
        "or" => TokenKind::Or,
        "private" => TokenKind::Private,
        "return" => TokenKind::Return,
        "this" => TokenKind::This,
        "throw" => TokenKind::Throw,
        "true" => TokenKind::True,
        "try" => TokenKind::Try,
        "while" => TokenKind::While,
        "yield" => TokenKind::Yield,
        _ => return None,
    })
}

pub fn compile_src(vm: &mut Vm, source: &str) -> Result<CompileOutput, CompileFailure> {
    let tokens = lex(source);
    compile(vm, &tokens, source, Some("test.ek"))
}

pub fn chunk_of(vm: &Vm, function: ObjRef) -> &Chunk {
    match &vm.heap.get(function).kind {
        ObjKind::Function(f) => &f.chunk,
        other => panic!("expected function, got {}", other.kind_name()),
    }
}

/// Find a prototype function constant by name anywhere in a chunk's pool.
pub fn find_function_constant(vm: &Vm, chunk: &Chunk, name: &str) -> Option<ObjRef> {
    for constant in chunk.constants() {
        if let erkao_core::Value::Obj(r) = constant
            && let ObjKind::Function(f) = &vm.heap.get(*r).kind
            && let Some(n) = f.name
            && vm.heap.string_bytes(n) == name
        {
            return Some(*r);
        }
    }
    None
}

/// Decode the instruction stream into (offset, op) pairs. Panics on an
/// undecodable byte — emitted chunks must never contain one.
pub fn decode(chunk: &Chunk) -> Vec<(usize, Op)> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < chunk.len() {
        let byte = chunk.byte(offset).unwrap();
        let op = Op::from_byte(byte)
            .unwrap_or_else(|| panic!("bad opcode {byte:#04x} at offset {offset}"));
        out.push((offset, op));
        let mut width = op.operand_width();
        if op == Op::ExportFrom {
            let pairs = chunk.read_u16(offset + 1).unwrap_or(0) as usize;
            width += pairs * 4;
        }
        offset += 1 + width;
    }
    out
}

pub fn ops(chunk: &Chunk) -> Vec<Op> {
    decode(chunk).into_iter().map(|(_, op)| op).collect()
}

/// Property: every jump offset, interpreted, lands on an opcode boundary
/// inside the chunk.
pub fn assert_jumps_valid(chunk: &Chunk) {
    let boundaries: std::collections::HashSet<usize> =
        decode(chunk).into_iter().map(|(offset, _)| offset).collect();
    for (offset, op) in decode(chunk) {
        let operand = chunk.read_u16(offset + 1).unwrap_or(0) as usize;
        let after = offset + 3;
        match op {
            Op::Jump | Op::JumpIfFalse | Op::Try => {
                let target = after + operand;
                assert!(
                    boundaries.contains(&target) || target == chunk.len(),
                    "{op:?} at {offset} targets {target}, not an opcode boundary"
                );
            }
            Op::Loop => {
                let target = after - operand;
                assert!(
                    boundaries.contains(&target),
                    "Loop at {offset} targets {target}, not an opcode boundary"
                );
            }
            _ => {}
        }
    }
}

/// True if `needle` appears as a contiguous subsequence of `haystack`.
pub fn contains_sequence(haystack: &[Op], needle: &[Op]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}
