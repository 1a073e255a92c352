//! Recursive-descent parser producing the [`ast`](crate::parser::ast).
//!
//! Binary expressions use precedence climbing with the priorities from
//! [`BinOp::priority`].

use std::rc::Rc;

use crate::parser::ast::{BinOp, Block, Expr, FunctionBody, Stat, StatKind, TableField, UnOp};
use crate::parser::lexer::LexError;
use crate::parser::token::{Span, Token};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("{message} near '{near}'")]
    Unexpected {
        message: String,
        near: String,
        span: Span,
    },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::Lex(err) => err.span(),
            ParseError::Unexpected { span, .. } => *span,
        }
    }
}

type ParseResult<T> = Result<T, ParseError>;

/// Maximum nesting of blocks and expressions.
const MAX_SYNTAX_LEVELS: usize = 200;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// Create a parser over a token list ending with [`Token::Eof`].
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    pub fn parse_chunk(mut self) -> ParseResult<Block> {
        let block = self.block()?;
        if self.peek() != &Token::Eof {
            return Err(self.unexpected("'<eof>' expected"));
        }
        Ok(block)
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|(t, _)| t)
            .unwrap_or(&Token::Eof)
    }

    fn peek_ahead(&self, n: usize) -> &Token {
        self.tokens
            .get(self.pos + n)
            .map(|(t, _)| t)
            .unwrap_or(&Token::Eof)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, s)| *s)
            .unwrap_or_default()
    }

    fn line(&self) -> u32 {
        self.span().line
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> ParseResult<()> {
        if self.check(&token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}' expected", token)))
        }
    }

    /// Expect a block terminator matching an opening keyword on `line`.
    fn expect_match(&mut self, token: Token, opener: Token, line: u32) -> ParseResult<()> {
        if self.check(&token) {
            return Ok(());
        }
        if line == self.line() {
            Err(self.unexpected(&format!("'{}' expected", token)))
        } else {
            Err(self.unexpected(&format!(
                "'{}' expected (to close '{}' at line {})",
                token, opener, line
            )))
        }
    }

    fn expect_name(&mut self) -> ParseResult<Rc<str>> {
        match self.peek().clone() {
            Token::Name(name) => {
                self.advance();
                Ok(Rc::from(name))
            }
            _ => Err(self.unexpected("<name> expected")),
        }
    }

    /// Run `f` one syntax level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_SYNTAX_LEVELS {
            return Err(self.unexpected("chunk has too many syntax levels"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn unexpected(&self, message: &str) -> ParseError {
        ParseError::Unexpected {
            message: message.to_string(),
            near: self.peek().to_string(),
            span: self.span(),
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn block(&mut self) -> ParseResult<Block> {
        self.nested(Self::statements)
    }

    fn statements(&mut self) -> ParseResult<Block> {
        let mut stats = Vec::new();
        loop {
            if self.peek().closes_block() {
                break;
            }
            if self.peek() == &Token::Return {
                let line = self.line();
                self.advance();
                let exprs = if self.peek().closes_block() || self.peek() == &Token::Semicolon {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                self.check(&Token::Semicolon);
                stats.push(Stat {
                    kind: StatKind::Return(exprs),
                    line,
                });
                if !self.peek().closes_block() {
                    return Err(self.unexpected("'end' expected"));
                }
                break;
            }
            let stat = self.statement()?;
            stats.push(stat);
            self.check(&Token::Semicolon);
        }
        Ok(Block { stats })
    }

    fn statement(&mut self) -> ParseResult<Stat> {
        let line = self.line();
        let kind = match self.peek() {
            Token::If => self.if_stat(line)?,
            Token::While => {
                self.advance();
                let cond = self.expr()?;
                self.expect(Token::Do)?;
                let body = self.block()?;
                self.expect_match(Token::End, Token::While, line)?;
                StatKind::While { cond, body }
            }
            Token::Do => {
                self.advance();
                let body = self.block()?;
                self.expect_match(Token::End, Token::Do, line)?;
                StatKind::Do(body)
            }
            Token::For => self.for_stat(line)?,
            Token::Repeat => {
                self.advance();
                let body = self.block()?;
                self.expect_match(Token::Until, Token::Repeat, line)?;
                let cond = self.expr()?;
                StatKind::Repeat { body, cond }
            }
            Token::Function => self.function_stat(line)?,
            Token::Local => {
                self.advance();
                if self.check(&Token::Function) {
                    let name = self.expect_name()?;
                    let body = self.function_body(line, false)?;
                    StatKind::LocalFunction { name, body }
                } else {
                    let mut names = vec![self.expect_name()?];
                    while self.check(&Token::Comma) {
                        names.push(self.expect_name()?);
                    }
                    let exprs = if self.check(&Token::Assign) {
                        self.expr_list()?
                    } else {
                        Vec::new()
                    };
                    StatKind::Local { names, exprs }
                }
            }
            Token::Break => {
                self.advance();
                StatKind::Break
            }
            _ => self.expr_stat()?,
        };
        Ok(Stat { kind, line })
    }

    fn if_stat(&mut self, line: u32) -> ParseResult<StatKind> {
        self.advance();
        let mut branches = Vec::new();
        let cond = self.expr()?;
        self.expect(Token::Then)?;
        branches.push((cond, self.block()?));

        let mut otherwise = None;
        loop {
            match self.peek() {
                Token::ElseIf => {
                    self.advance();
                    let cond = self.expr()?;
                    self.expect(Token::Then)?;
                    branches.push((cond, self.block()?));
                }
                Token::Else => {
                    self.advance();
                    otherwise = Some(self.block()?);
                    self.expect_match(Token::End, Token::If, line)?;
                    break;
                }
                _ => {
                    self.expect_match(Token::End, Token::If, line)?;
                    break;
                }
            }
        }
        Ok(StatKind::If {
            branches,
            otherwise,
        })
    }

    fn for_stat(&mut self, line: u32) -> ParseResult<StatKind> {
        self.advance();
        let first = self.expect_name()?;

        if self.check(&Token::Assign) {
            let start = self.expr()?;
            self.expect(Token::Comma)?;
            let limit = self.expr()?;
            let step = if self.check(&Token::Comma) {
                Some(self.expr()?)
            } else {
                None
            };
            self.expect(Token::Do)?;
            let body = self.block()?;
            self.expect_match(Token::End, Token::For, line)?;
            return Ok(StatKind::NumericFor {
                var: first,
                start,
                limit,
                step,
                body,
            });
        }

        let mut names = vec![first];
        while self.check(&Token::Comma) {
            names.push(self.expect_name()?);
        }
        if !self.check(&Token::In) {
            return Err(self.unexpected("'=' or 'in' expected"));
        }
        let exprs = self.expr_list()?;
        self.expect(Token::Do)?;
        let body = self.block()?;
        self.expect_match(Token::End, Token::For, line)?;
        Ok(StatKind::GenericFor { names, exprs, body })
    }

    fn function_stat(&mut self, line: u32) -> ParseResult<StatKind> {
        self.advance();
        let mut target = Expr::Name(self.expect_name()?);
        let mut is_method = false;

        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let key = self.expect_name()?;
                    target = Expr::Index {
                        object: Box::new(target),
                        key: Box::new(Expr::String(key)),
                    };
                }
                Token::Colon => {
                    self.advance();
                    let key = self.expect_name()?;
                    target = Expr::Index {
                        object: Box::new(target),
                        key: Box::new(Expr::String(key)),
                    };
                    is_method = true;
                    break;
                }
                _ => break,
            }
        }

        let body = self.function_body(line, is_method)?;
        Ok(StatKind::Function { target, body })
    }

    fn expr_stat(&mut self) -> ParseResult<StatKind> {
        let first = self.suffixed_expr()?;

        if matches!(self.peek(), Token::Assign | Token::Comma) {
            let mut targets = vec![first];
            while self.check(&Token::Comma) {
                targets.push(self.suffixed_expr()?);
            }
            if targets.iter().any(|t| !t.is_assignable()) {
                return Err(self.unexpected("syntax error"));
            }
            self.expect(Token::Assign)?;
            let exprs = self.expr_list()?;
            return Ok(StatKind::Assign { targets, exprs });
        }

        match first {
            Expr::Call { .. } | Expr::MethodCall { .. } => Ok(StatKind::Call(first)),
            _ => Err(self.unexpected("syntax error")),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expr_list(&mut self) -> ParseResult<Vec<Expr>> {
        let mut exprs = vec![self.expr()?];
        while self.check(&Token::Comma) {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn expr(&mut self) -> ParseResult<Expr> {
        self.sub_expr(0)
    }

    fn sub_expr(&mut self, limit: u8) -> ParseResult<Expr> {
        self.nested(|parser| parser.binary_expr(limit))
    }

    fn binary_expr(&mut self, limit: u8) -> ParseResult<Expr> {
        let mut lhs = match unary_op(self.peek()) {
            Some(op) => {
                self.advance();
                let operand = self.sub_expr(UnOp::PRIORITY)?;
                Expr::Unary {
                    op,
                    operand: Box::new(operand),
                }
            }
            None => self.simple_expr()?,
        };

        while let Some(op) = binary_op(self.peek()) {
            let (left, right) = op.priority();
            if left <= limit {
                break;
            }
            self.advance();
            let rhs = self.sub_expr(right)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn simple_expr(&mut self) -> ParseResult<Expr> {
        let expr = match self.peek().clone() {
            Token::Number(n) => Expr::Number(n),
            Token::String(s) => Expr::String(Rc::from(s)),
            Token::Nil => Expr::Nil,
            Token::True => Expr::True,
            Token::False => Expr::False,
            Token::Ellipsis => Expr::VarArgs,
            Token::LeftBrace => return self.table_constructor(),
            Token::Function => {
                let line = self.line();
                self.advance();
                return Ok(Expr::Function(self.function_body(line, false)?));
            }
            _ => return self.suffixed_expr(),
        };
        self.advance();
        Ok(expr)
    }

    fn primary_expr(&mut self) -> ParseResult<Expr> {
        match self.peek().clone() {
            Token::Name(name) => {
                self.advance();
                Ok(Expr::Name(Rc::from(name)))
            }
            Token::LeftParen => {
                let line = self.line();
                self.advance();
                let inner = self.expr()?;
                self.expect_match(Token::RightParen, Token::LeftParen, line)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            _ => Err(self.unexpected("unexpected symbol")),
        }
    }

    fn suffixed_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary_expr()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let key = self.expect_name()?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        key: Box::new(Expr::String(key)),
                    };
                }
                Token::LeftBracket => {
                    self.advance();
                    let key = self.expr()?;
                    self.expect(Token::RightBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        key: Box::new(key),
                    };
                }
                Token::Colon => {
                    self.advance();
                    let method = self.expect_name()?;
                    let line = self.line();
                    let args = self.call_args()?;
                    expr = Expr::MethodCall {
                        object: Box::new(expr),
                        method,
                        args,
                        line,
                    };
                }
                Token::LeftParen | Token::LeftBrace | Token::String(_) => {
                    let line = self.line();
                    let args = self.call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        line,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> ParseResult<Vec<Expr>> {
        match self.peek().clone() {
            Token::String(s) => {
                self.advance();
                Ok(vec![Expr::String(Rc::from(s))])
            }
            Token::LeftBrace => Ok(vec![self.table_constructor()?]),
            Token::LeftParen => {
                let line = self.line();
                self.advance();
                if self.check(&Token::RightParen) {
                    return Ok(Vec::new());
                }
                let args = self.expr_list()?;
                self.expect_match(Token::RightParen, Token::LeftParen, line)?;
                Ok(args)
            }
            _ => Err(self.unexpected("function arguments expected")),
        }
    }

    fn table_constructor(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        self.expect(Token::LeftBrace)?;
        let mut fields = Vec::new();

        while self.peek() != &Token::RightBrace {
            let named = self.peek_ahead(1) == &Token::Assign;
            let field = match self.peek().clone() {
                Token::LeftBracket => {
                    self.advance();
                    let key = self.expr()?;
                    self.expect(Token::RightBracket)?;
                    self.expect(Token::Assign)?;
                    TableField::Keyed(key, self.expr()?)
                }
                Token::Name(name) if named => {
                    self.advance();
                    self.advance();
                    TableField::Named(Rc::from(name), self.expr()?)
                }
                _ => TableField::Positional(self.expr()?),
            };
            fields.push(field);

            if !self.check(&Token::Comma) && !self.check(&Token::Semicolon) {
                break;
            }
        }

        self.expect_match(Token::RightBrace, Token::LeftBrace, line)?;
        Ok(Expr::Table(fields))
    }

    fn function_body(&mut self, line: u32, is_method: bool) -> ParseResult<Rc<FunctionBody>> {
        let mut params: Vec<Rc<str>> = Vec::new();
        if is_method {
            params.push(Rc::from("self"));
        }
        let mut is_vararg = false;

        self.expect(Token::LeftParen)?;
        if self.peek() != &Token::RightParen {
            loop {
                match self.peek().clone() {
                    Token::Name(name) => {
                        self.advance();
                        params.push(Rc::from(name));
                    }
                    Token::Ellipsis => {
                        self.advance();
                        is_vararg = true;
                        break;
                    }
                    _ => return Err(self.unexpected("<name> expected")),
                }
                if !self.check(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RightParen)?;

        let body = self.block()?;
        self.expect_match(Token::End, Token::Function, line)?;
        Ok(Rc::new(FunctionBody {
            params,
            is_vararg,
            body,
            line,
        }))
    }
}

fn unary_op(token: &Token) -> Option<UnOp> {
    match token {
        Token::Minus => Some(UnOp::Neg),
        Token::Not => Some(UnOp::Not),
        Token::Hash => Some(UnOp::Len),
        _ => None,
    }
}

fn binary_op(token: &Token) -> Option<BinOp> {
    Some(match token {
        Token::Plus => BinOp::Add,
        Token::Minus => BinOp::Sub,
        Token::Star => BinOp::Mul,
        Token::Slash => BinOp::Div,
        Token::Percent => BinOp::Mod,
        Token::Caret => BinOp::Pow,
        Token::DotDot => BinOp::Concat,
        Token::EqualEqual => BinOp::Eq,
        Token::NotEqual => BinOp::Ne,
        Token::Less => BinOp::Lt,
        Token::LessEqual => BinOp::Le,
        Token::Greater => BinOp::Gt,
        Token::GreaterEqual => BinOp::Ge,
        Token::And => BinOp::And,
        Token::Or => BinOp::Or,
        _ => return None,
    })
}
