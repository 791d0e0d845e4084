use super::{describe, Parser};
use crate::ast::{BinaryOp, Expression, Literal, UnaryOp};
use crate::error::ParseError;
use crate::lexer::Token;

impl<'a> Parser<'a> {
    // -- Binary precedence levels --------------------------------

    pub(super) fn parse_expr(&mut self) -> Result<Expression, ParseError> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> Result<Expression, ParseError> {
        let mark = self.depth;
        let mut left = self.parse_and_expr()?;
        while self.peek() == &Token::OrOr {
            self.advance();
            self.nest()?;
            let right = self.parse_and_expr()?;
            left = Expression::binary(BinaryOp::Or, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expression, ParseError> {
        let mark = self.depth;
        let mut left = self.parse_equality_expr()?;
        while self.peek() == &Token::AndAnd {
            self.advance();
            self.nest()?;
            let right = self.parse_equality_expr()?;
            left = Expression::binary(BinaryOp::And, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_equality_expr(&mut self) -> Result<Expression, ParseError> {
        let mark = self.depth;
        let mut left = self.parse_compare_expr()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::Neq => BinaryOp::Neq,
                _ => break,
            };
            self.advance();
            self.nest()?;
            let right = self.parse_compare_expr()?;
            left = Expression::binary(op, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_compare_expr(&mut self) -> Result<Expression, ParseError> {
        let mark = self.depth;
        let mut left = self.parse_additive_expr()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Lte => BinaryOp::Lte,
                Token::Gt => BinaryOp::Gt,
                Token::Gte => BinaryOp::Gte,
                _ => break,
            };
            self.advance();
            self.nest()?;
            let right = self.parse_additive_expr()?;
            left = Expression::binary(op, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_additive_expr(&mut self) -> Result<Expression, ParseError> {
        let mark = self.depth;
        let mut left = self.parse_term_expr()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.nest()?;
            let right = self.parse_term_expr()?;
            left = Expression::binary(op, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_term_expr(&mut self) -> Result<Expression, ParseError> {
        let mark = self.depth;
        let mut left = self.parse_unary_expr()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            self.nest()?;
            let right = self.parse_unary_expr()?;
            left = Expression::binary(op, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<Expression, ParseError> {
        self.nest()?;
        let expr = self.parse_unary_operand();
        self.depth -= 1;
        expr
    }

    fn parse_unary_operand(&mut self) -> Result<Expression, ParseError> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix_expr(),
        };
        self.advance();
        let operand = self.parse_unary_expr()?;
        Ok(Expression::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix_expr(&mut self) -> Result<Expression, ParseError> {
        let mark = self.depth;
        let mut expr = self.parse_primary()?;
        while self.peek() == &Token::Dot {
            self.advance();
            self.nest()?;
            let member = self.take_ident()?;
            expr = Expression::member(expr, member);
        }
        self.depth = mark;
        Ok(expr)
    }

    // -- Primary expressions -------------------------------------

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expression::number(n))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expression::text(s))
            }
            Token::PropertyRef(name) => {
                self.advance();
                Ok(Expression::SelfProperty { name })
            }
            Token::EntityId(id) => {
                self.advance();
                Ok(Expression::EntityRef { id })
            }
            Token::At => {
                self.advance();
                match self.peek().clone() {
                    Token::Str(id) if !id.is_empty() => {
                        self.advance();
                        Ok(Expression::EntityRef { id })
                    }
                    other => Err(self.err(format!(
                        "expected quoted entity id after '@', got {}",
                        describe(&other)
                    ))),
                }
            }
            Token::LParen => {
                self.advance();
                let e = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(e)
            }
            Token::LBracket => self.parse_list(),
            Token::LBrace => self.parse_record(),
            Token::Ident(word) => self.parse_word(word),
            other => Err(self.err(format!("expected expression, got {}", describe(&other)))),
        }
    }

    fn parse_word(&mut self, word: String) -> Result<Expression, ParseError> {
        let literal = match word.as_str() {
            "true" => Some(Literal::Boolean(true)),
            "false" => Some(Literal::Boolean(false)),
            "null" => Some(Literal::Null),
            _ => None,
        };
        if let Some(value) = literal {
            self.advance();
            return Ok(Expression::Literal { value });
        }
        if word == "self" {
            self.advance();
            return Ok(Expression::SelfEntity);
        }

        let word_pos = self.cur_pos();
        self.advance();
        if self.peek() != &Token::LParen {
            return Err(ParseError::new(
                word_pos,
                format!(
                    "unexpected identifier '{}'; use #{} to reference a property",
                    word, word
                ),
            ));
        }
        self.advance();
        let args = self.parse_call_args()?;
        Ok(Expression::Call { name: word, args })
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expression>, ParseError> {
        let mut args = Vec::new();
        if self.peek() == &Token::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.peek() {
                Token::Comma => {
                    self.advance();
                }
                Token::RParen => {
                    self.advance();
                    return Ok(args);
                }
                other => {
                    return Err(self.err(format!(
                        "expected ',' or ')' in argument list, got {}",
                        describe(other)
                    )))
                }
            }
        }
    }

    fn parse_list(&mut self) -> Result<Expression, ParseError> {
        self.expect(Token::LBracket, "'['")?;
        let mut items = Vec::new();
        while self.peek() != &Token::RBracket {
            items.push(self.parse_expr()?);
            match self.peek() {
                Token::Comma => {
                    self.advance();
                }
                Token::RBracket => {}
                other => {
                    return Err(self.err(format!(
                        "expected ',' or ']' in list, got {}",
                        describe(other)
                    )))
                }
            }
        }
        self.advance();
        Ok(Expression::List { items })
    }

    fn parse_record(&mut self) -> Result<Expression, ParseError> {
        self.expect(Token::LBrace, "'{'")?;
        let mut fields: Vec<(String, Expression)> = Vec::new();
        while self.peek() != &Token::RBrace {
            let key_pos = self.cur_pos();
            let key = match self.peek().clone() {
                Token::Ident(k) | Token::Str(k) => {
                    self.advance();
                    k
                }
                other => {
                    return Err(self.err(format!("expected record key, got {}", describe(&other))))
                }
            };
            if fields.iter().any(|(k, _)| *k == key) {
                return Err(ParseError::new(
                    key_pos,
                    format!("duplicate record key '{}'", key),
                ));
            }
            self.expect(Token::Colon, "':'")?;
            let value = self.parse_expr()?;
            fields.push((key, value));
            match self.peek() {
                Token::Comma => {
                    self.advance();
                }
                Token::RBrace => {}
                other => {
                    return Err(self.err(format!(
                        "expected ',' or '}}' in record, got {}",
                        describe(other)
                    )))
                }
            }
        }
        self.advance();
        Ok(Expression::Record { fields })
    }
}
