//! The Pratt precedence table
//!
//! A dense mapping from token kind to `{prefix, infix, precedence}`.
//! Plug-ins overlay entries by token kind before compilation; the overlay
//! wins on lookup.

use super::Compiler;
use erkao_core::TokenKind;

pub type ParseFn = for<'a, 'b> fn(&'a mut Compiler<'b>, bool);

#[derive(Clone, Copy)]
pub struct ParseRule {
    pub prefix: Option<ParseFn>,
    pub infix: Option<ParseFn>,
    pub precedence: Precedence,
}

impl ParseRule {
    pub const fn new(
        prefix: Option<ParseFn>,
        infix: Option<ParseFn>,
        precedence: Precedence,
    ) -> Self {
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    /// The next-tighter level; binary parselets parse their right operand at
    /// this to get left associativity.
    pub fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

/// The built-in table. Token kinds without an entry parse as nothing, which
/// surfaces as "Expect expression" at the right spot.
pub fn base_rule(kind: TokenKind) -> ParseRule {
    use self::Precedence as P;
    use super::expressions as e;
    match kind {
        TokenKind::LeftParen => ParseRule::new(Some(e::grouping), Some(e::call), P::Call),
        TokenKind::LeftBracket => ParseRule::new(Some(e::array_literal), Some(e::index), P::Call),
        TokenKind::LeftBrace => ParseRule::new(Some(e::map_literal), None, P::None),
        TokenKind::Dot => ParseRule::new(None, Some(e::dot), P::Call),
        TokenKind::QuestionDot => ParseRule::new(None, Some(e::question_dot), P::Call),
        TokenKind::Question => ParseRule::new(None, Some(e::try_unwrap), P::Call),
        TokenKind::Minus => ParseRule::new(Some(e::unary), Some(e::binary), P::Term),
        TokenKind::Plus => ParseRule::new(None, Some(e::binary), P::Term),
        TokenKind::Slash => ParseRule::new(None, Some(e::binary), P::Factor),
        TokenKind::Star => ParseRule::new(None, Some(e::binary), P::Factor),
        TokenKind::Bang => ParseRule::new(Some(e::unary), None, P::None),
        TokenKind::BangEqual => ParseRule::new(None, Some(e::binary), P::Equality),
        TokenKind::EqualEqual => ParseRule::new(None, Some(e::binary), P::Equality),
        TokenKind::Greater => ParseRule::new(None, Some(e::binary), P::Comparison),
        TokenKind::GreaterEqual => ParseRule::new(None, Some(e::binary), P::Comparison),
        TokenKind::Less => ParseRule::new(None, Some(e::binary), P::Comparison),
        TokenKind::LessEqual => ParseRule::new(None, Some(e::binary), P::Comparison),
        TokenKind::Identifier => ParseRule::new(Some(e::variable), None, P::None),
        TokenKind::String => ParseRule::new(Some(e::string), None, P::None),
        TokenKind::Number => ParseRule::new(Some(e::number), None, P::None),
        TokenKind::And => ParseRule::new(None, Some(e::and_), P::And),
        TokenKind::Or => ParseRule::new(None, Some(e::or_), P::Or),
        TokenKind::True | TokenKind::False | TokenKind::Null => {
            ParseRule::new(Some(e::literal), None, P::None)
        }
        TokenKind::This => ParseRule::new(Some(e::this_), None, P::None),
        TokenKind::Fun => ParseRule::new(Some(e::fun_expression), None, P::None),
        _ => ParseRule::new(None, None, P::None),
    }
}
