//! Recursive-descent parser for formulas.
//!
//! Entry points: [`parse`] for a single expression and [`parse_template`]
//! for text with `${...}` interpolations.
use crate::ast::Expression;
use crate::error::ParseError;
use crate::lexer::{lex, Spanned, Token};

mod expressions;
mod template;

pub use template::parse_template;

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

/// Deepest syntax tree the parser builds. Operator chains count one level
/// per operator.
pub const MAX_NESTING: usize = 256;

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned]) -> Self {
        Parser {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Enter one more level of the tree being built.
    fn nest(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(self.err("expression nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn cur_pos(&self) -> usize {
        self.cur().pos
    }

    fn advance(&mut self) -> &Spanned {
        let t = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ParseError> {
        if self.peek() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected {}, got {}", what, describe(self.peek()))))
        }
    }

    fn err(&self, msg: impl Into<String>) -> ParseError {
        ParseError::new(self.cur_pos(), msg)
    }

    fn take_ident(&mut self) -> Result<String, ParseError> {
        if let Token::Ident(w) = self.peek().clone() {
            self.advance();
            Ok(w)
        } else {
            Err(self.err(format!("expected identifier, got {}", describe(self.peek()))))
        }
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        if self.peek() == &Token::Eof {
            Ok(())
        } else {
            Err(self.err(format!("unexpected {} after expression", describe(self.peek()))))
        }
    }
}

/// Human-readable token description for error messages.
fn describe(token: &Token) -> String {
    match token {
        Token::Ident(w) => format!("identifier '{}'", w),
        Token::Str(s) => format!("string \"{}\"", s),
        Token::Number(n) => format!("number {}", n),
        Token::PropertyRef(p) => format!("'#{}'", p),
        Token::EntityId(id) => format!("entity id {}", id),
        Token::At => "'@'".into(),
        Token::LBrace => "'{'".into(),
        Token::RBrace => "'}'".into(),
        Token::LBracket => "'['".into(),
        Token::RBracket => "']'".into(),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        Token::Colon => "':'".into(),
        Token::Comma => "','".into(),
        Token::Dot => "'.'".into(),
        Token::Plus => "'+'".into(),
        Token::Minus => "'-'".into(),
        Token::Star => "'*'".into(),
        Token::Slash => "'/'".into(),
        Token::EqEq => "'=='".into(),
        Token::Neq => "'!='".into(),
        Token::Lt => "'<'".into(),
        Token::Lte => "'<='".into(),
        Token::Gt => "'>'".into(),
        Token::Gte => "'>='".into(),
        Token::AndAnd => "'&&'".into(),
        Token::OrOr => "'||'".into(),
        Token::Bang => "'!'".into(),
        Token::Eof => "end of input".into(),
    }
}

/// Parse formula source text into an [`Expression`].
///
/// Fails on malformed text and on trees deeper than [`MAX_NESTING`].
/// Semantically invalid but well-formed input (an unknown function name, a
/// property that does not exist) parses fine.
pub fn parse(source: &str) -> Result<Expression, ParseError> {
    let tokens = lex(source)?;
    let mut parser = Parser::new(&tokens);
    let expr = parser.parse_expr()?;
    parser.expect_eof()?;
    Ok(expr)
}
