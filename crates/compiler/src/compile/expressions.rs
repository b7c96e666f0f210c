//! Expression parselets
//!
//! Each leaves exactly one value on the runtime stack and one type on the
//! checker's stack. Assignment forms are only taken when the current
//! precedence permits (`can_assign`), which is what rejects `a + b = c`.

use super::rules::Precedence;
use super::{Compiler, FunctionKind, statements};
use crate::typecheck::Type;
use erkao_core::{Op, TokenKind, Value};

pub fn number(c: &mut Compiler, _can_assign: bool) {
    let lexeme = c.previous().lexeme.clone();
    match lexeme.parse::<f64>() {
        Ok(n) => c.emit_literal(Value::Number(n)),
        Err(_) => {
            c.error("Invalid number literal");
            c.emit_literal(Value::Null);
        }
    }
    c.checker.push(Type::Number);
}

pub fn string(c: &mut Compiler, _can_assign: bool) {
    let lexeme = c.previous().lexeme.clone();
    let text = unquote(&lexeme);
    let interned = c.vm.intern(&text);
    c.emit_literal(Value::Obj(interned));
    c.checker.push(Type::Str);
}

/// Strip the surrounding quotes and process the escapes the lexer leaves in
/// place. Tolerant of malformed lexemes; hostile token arrays must not
/// panic the compiler.
pub(crate) fn unquote(lexeme: &str) -> String {
    let inner = lexeme
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(lexeme);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

pub fn literal(c: &mut Compiler, _can_assign: bool) {
    match c.previous().kind {
        TokenKind::True => {
            c.emit_literal(Value::Bool(true));
            c.checker.push(Type::Bool);
        }
        TokenKind::False => {
            c.emit_literal(Value::Bool(false));
            c.checker.push(Type::Bool);
        }
        TokenKind::Null => {
            c.emit_literal(Value::Null);
            c.checker.push(Type::Null);
        }
        _ => unreachable!("literal rule on non-literal token"),
    }
}

pub fn grouping(c: &mut Compiler, _can_assign: bool) {
    c.expression();
    c.consume(TokenKind::RightParen, "Expect ')' after expression");
}

pub fn unary(c: &mut Compiler, _can_assign: bool) {
    let op_kind = c.previous().kind;
    let token = c.previous().clone();
    c.parse_precedence(Precedence::Unary);
    match op_kind {
        TokenKind::Minus => {
            if !c.try_fold_unary(Op::Negate) {
                c.emit_op(Op::Negate);
            }
            c.checker.check_numeric_unary(&token, &mut c.reporter);
        }
        TokenKind::Bang => {
            if !c.try_fold_unary(Op::Not) {
                c.emit_op(Op::Not);
            }
            c.checker.pop();
            c.checker.push(Type::Bool);
        }
        _ => unreachable!("unary rule on non-unary token"),
    }
}

pub fn binary(c: &mut Compiler, _can_assign: bool) {
    let op_kind = c.previous().kind;
    let token = c.previous().clone();
    let rule = c.rule(op_kind);
    c.parse_precedence(rule.precedence.next());

    match op_kind {
        TokenKind::Plus => {
            if !c.try_fold_binary(Op::Add) {
                c.emit_op(Op::Add);
            }
            c.checker.check_add(&token, &mut c.reporter);
        }
        TokenKind::Minus => {
            if !c.try_fold_binary(Op::Subtract) {
                c.emit_op(Op::Subtract);
            }
            c.checker.check_arithmetic(&token, &mut c.reporter);
        }
        TokenKind::Star => {
            if !c.try_fold_binary(Op::Multiply) {
                c.emit_op(Op::Multiply);
            }
            c.checker.check_arithmetic(&token, &mut c.reporter);
        }
        TokenKind::Slash => {
            if !c.try_fold_binary(Op::Divide) {
                c.emit_op(Op::Divide);
            }
            c.checker.check_arithmetic(&token, &mut c.reporter);
        }
        TokenKind::EqualEqual => {
            if !c.try_fold_binary(Op::Equal) {
                c.emit_op(Op::Equal);
            }
            c.checker.check_equality();
        }
        TokenKind::BangEqual => {
            if c.try_fold_binary(Op::Equal) {
                let folded = c.try_fold_unary(Op::Not);
                debug_assert!(folded);
            } else {
                c.emit_op(Op::Equal);
                c.emit_op(Op::Not);
            }
            c.checker.check_equality();
        }
        TokenKind::Greater => {
            if !c.try_fold_binary(Op::Greater) {
                c.emit_op(Op::Greater);
            }
            c.checker.check_comparison(&token, &mut c.reporter);
        }
        TokenKind::GreaterEqual => {
            if !c.try_fold_binary(Op::GreaterEqual) {
                c.emit_op(Op::GreaterEqual);
            }
            c.checker.check_comparison(&token, &mut c.reporter);
        }
        TokenKind::Less => {
            if !c.try_fold_binary(Op::Less) {
                c.emit_op(Op::Less);
            }
            c.checker.check_comparison(&token, &mut c.reporter);
        }
        TokenKind::LessEqual => {
            if !c.try_fold_binary(Op::LessEqual) {
                c.emit_op(Op::LessEqual);
            }
            c.checker.check_comparison(&token, &mut c.reporter);
        }
        _ => unreachable!("binary rule on non-binary token"),
    }
}

/// `and` short-circuits by peeking: the deciding value stays on the stack
/// and becomes the result when false.
pub fn and_(c: &mut Compiler, _can_assign: bool) {
    let end = c.emit_jump(Op::JumpIfFalse);
    c.emit_op(Op::Pop);
    c.parse_precedence(Precedence::And);
    c.patch_jump(end);
    c.checker.pop();
    c.checker.pop();
    c.checker.push(Type::Any);
}

pub fn or_(c: &mut Compiler, _can_assign: bool) {
    let else_jump = c.emit_jump(Op::JumpIfFalse);
    let end = c.emit_jump(Op::Jump);
    c.patch_jump(else_jump);
    c.emit_op(Op::Pop);
    c.parse_precedence(Precedence::Or);
    c.patch_jump(end);
    c.checker.pop();
    c.checker.pop();
    c.checker.push(Type::Any);
}

pub fn variable(c: &mut Compiler, can_assign: bool) {
    let name = c.previous().lexeme.clone();
    let index = c.name_constant(&name);
    if can_assign && c.matches(TokenKind::Equal) {
        c.expression();
        c.emit_op(Op::SetVar);
        c.emit_short(index);
        // Assignment is an expression; the assigned value's type stands.
    } else {
        c.emit_op(Op::GetVar);
        c.emit_short(index);
        let ty = c.checker.seeded(&name).unwrap_or(Type::Any);
        c.checker.push(ty);
    }
}

pub fn this_(c: &mut Compiler, _can_assign: bool) {
    if !c.in_method() {
        c.error("Cannot use 'this' outside of a class method");
    }
    let index = c.name_constant("this");
    c.emit_op(Op::GetThis);
    c.emit_short(index);
    c.checker.push(Type::Instance);
}

pub fn dot(c: &mut Compiler, can_assign: bool) {
    c.consume(TokenKind::Identifier, "Expect property name after '.'");
    let name = c.previous().lexeme.clone();
    let index = c.name_constant(&name);
    if can_assign && c.matches(TokenKind::Equal) {
        c.expression();
        c.emit_op(Op::SetProperty);
        c.emit_short(index);
        c.checker.pop();
        c.checker.pop();
        c.checker.push(Type::Any);
    } else if c.matches(TokenKind::LeftParen) {
        // Fused lookup + call; the site carries a METHOD inline cache.
        let argc = argument_list(c);
        c.emit_op(Op::Invoke);
        c.emit_short(index);
        c.emit_byte(argc);
        for _ in 0..argc {
            c.checker.pop();
        }
        c.checker.pop();
        c.checker.push(Type::Any);
    } else {
        c.emit_op(Op::GetProperty);
        c.emit_short(index);
        c.checker.pop();
        c.checker.push(Type::Any);
    }
}

/// `?.name`, `?.(args)`, `?.[index]` — all null-propagating.
pub fn question_dot(c: &mut Compiler, _can_assign: bool) {
    if c.matches(TokenKind::LeftParen) {
        let argc = argument_list(c);
        c.emit_op(Op::CallOptional);
        c.emit_byte(argc);
        for _ in 0..argc {
            c.checker.pop();
        }
        c.checker.pop();
        c.checker.push(Type::Any);
        return;
    }
    if c.matches(TokenKind::LeftBracket) {
        c.expression();
        c.consume(TokenKind::RightBracket, "Expect ']' after index");
        c.emit_op(Op::GetIndexOptional);
        c.checker.pop();
        c.checker.pop();
        c.checker.push(Type::Any);
        return;
    }
    c.consume(TokenKind::Identifier, "Expect property name after '?.'");
    let name = c.previous().lexeme.clone();
    let index = c.name_constant(&name);
    c.emit_op(Op::GetPropertyOptional);
    c.emit_short(index);
    c.checker.pop();
    c.checker.push(Type::Any);
}

/// Postfix `?`: unwrap an Option-shaped value or rethrow.
pub fn try_unwrap(c: &mut Compiler, _can_assign: bool) {
    c.emit_op(Op::TryUnwrap);
    c.checker.pop();
    c.checker.push(Type::Any);
}

pub fn call(c: &mut Compiler, _can_assign: bool) {
    let argc = argument_list(c);
    c.emit_op(Op::Call);
    c.emit_byte(argc);
    for _ in 0..argc {
        c.checker.pop();
    }
    c.checker.pop();
    c.checker.push(Type::Any);
}

pub fn index(c: &mut Compiler, can_assign: bool) {
    c.expression();
    c.consume(TokenKind::RightBracket, "Expect ']' after index");
    if can_assign && c.matches(TokenKind::Equal) {
        c.expression();
        c.emit_op(Op::SetIndex);
        let value_ty = c.checker.pop();
        c.checker.pop();
        c.checker.pop();
        c.checker.push(value_ty);
    } else {
        c.emit_op(Op::GetIndex);
        c.checker.pop();
        c.checker.pop();
        c.checker.push(Type::Any);
    }
}

pub fn array_literal(c: &mut Compiler, _can_assign: bool) {
    let mut count: u16 = 0;
    if !c.check(TokenKind::RightBracket) {
        loop {
            c.expression();
            c.checker.pop();
            if count == u16::MAX {
                c.compile_error("Too many elements in array literal");
            } else {
                count += 1;
            }
            if !c.matches(TokenKind::Comma) {
                break;
            }
            // Trailing comma.
            if c.check(TokenKind::RightBracket) {
                break;
            }
        }
    }
    c.consume(TokenKind::RightBracket, "Expect ']' after array elements");
    c.emit_op(Op::Array);
    c.emit_short(count);
    c.checker.push(Type::Array);
}

pub fn map_literal(c: &mut Compiler, _can_assign: bool) {
    let mut count: u16 = 0;
    if !c.check(TokenKind::RightBrace) {
        loop {
            // Key: identifier or string literal, pushed as an interned
            // string constant.
            if c.matches(TokenKind::Identifier) {
                let key = c.previous().lexeme.clone();
                let interned = c.vm.intern(&key);
                c.emit_constant(Value::Obj(interned));
            } else if c.matches(TokenKind::String) {
                let lexeme = c.previous().lexeme.clone();
                let key = unquote(&lexeme);
                let interned = c.vm.intern(&key);
                c.emit_constant(Value::Obj(interned));
            } else {
                c.error_at_current("Expect map key");
                break;
            }
            c.consume(TokenKind::Colon, "Expect ':' after map key");
            c.expression();
            c.checker.pop();
            if count == u16::MAX {
                c.compile_error("Too many entries in map literal");
            } else {
                count += 1;
            }
            if !c.matches(TokenKind::Comma) {
                break;
            }
            if c.check(TokenKind::RightBrace) {
                break;
            }
        }
    }
    c.consume(TokenKind::RightBrace, "Expect '}' after map entries");
    c.emit_op(Op::Map);
    c.emit_short(count);
    c.checker.push(Type::Map);
}

/// `fun (params) { body }` in expression position.
pub fn fun_expression(c: &mut Compiler, _can_assign: bool) {
    let proto = statements::compile_function(c, FunctionKind::Function, None);
    let index = c.make_constant(Value::Obj(proto));
    c.emit_op(Op::Closure);
    c.emit_short(index);
    c.checker.push(Type::Function);
}

/// Parse a parenthesised argument list; the '(' is already consumed.
pub(crate) fn argument_list(c: &mut Compiler) -> u8 {
    let mut argc: u8 = 0;
    if !c.check(TokenKind::RightParen) {
        loop {
            c.expression();
            if argc == u8::MAX {
                c.compile_error("Cannot have more than 255 arguments");
            } else {
                argc += 1;
            }
            if !c.matches(TokenKind::Comma) {
                break;
            }
        }
    }
    c.consume(TokenKind::RightParen, "Expect ')' after arguments");
    argc
}
