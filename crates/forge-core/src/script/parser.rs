//! Recursive-descent parser for agent scripts.

use super::ast::{BinaryOp, Expr, FnDef, Program, Stmt, UnaryOp};
use super::lexer::{tokenize, Tok, Token};
use super::ScriptError;

/// Nesting bound for blocks and sub-expressions.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
}

pub fn parse_program(src: &str) -> Result<Program, ScriptError> {
    let mut p = Parser::new(tokenize(src)?);
    let mut functions = Vec::new();
    while !p.at(&Tok::Eof) {
        functions.push(p.function()?);
    }
    Ok(Program { functions })
}

/// Parse a single standalone expression (the whole input must be consumed).
pub fn parse_expression(src: &str) -> Result<Expr, ScriptError> {
    let mut p = Parser::new(tokenize(src)?);
    let expr = p.expr()?;
    if !p.at(&Tok::Eof) {
        return Err(p.error("unexpected trailing input"));
    }
    Ok(expr)
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
        }
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Parse {
            line: self.line(),
            message: message.into(),
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), ScriptError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}, found {:?}", self.peek())))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ScriptError> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected {what}, found {other:?}"))),
        }
    }

    fn enter(&mut self) -> Result<(), ScriptError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    /// Release the depth charged by `folds` left-deep nodes of one chain.
    fn unwind(&mut self, folds: usize) {
        self.nesting -= folds;
    }

    fn function(&mut self) -> Result<FnDef, ScriptError> {
        let line = self.line();
        self.expect(Tok::Fn, "'fn'")?;
        let name = self.ident("function name")?;
        self.expect(Tok::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.at(&Tok::RParen) {
            loop {
                params.push(self.ident("parameter name")?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::RParen, "')'")?;
        let body = self.block()?;
        Ok(FnDef {
            name,
            params,
            body,
            line,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.enter()?;
        self.expect(Tok::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.at(&Tok::RBrace) {
            if self.at(&Tok::Eof) {
                return Err(self.error("unexpected end of input, missing '}'"));
            }
            stmts.push(self.statement()?);
        }
        self.advance();
        self.leave();
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Let => {
                self.advance();
                let name = self.ident("variable name")?;
                self.expect(Tok::Assign, "'='")?;
                let value = self.expr()?;
                self.expect(Tok::Semi, "';'")?;
                Ok(Stmt::Let { name, value, line })
            }
            Tok::If => self.if_statement(),
            Tok::While => {
                self.advance();
                let cond = self.expr()?;
                let body = self.block()?;
                Ok(Stmt::While { cond, body })
            }
            Tok::For => {
                self.advance();
                let var = self.ident("loop variable")?;
                self.expect(Tok::In, "'in'")?;
                let iter = self.expr()?;
                let body = self.block()?;
                Ok(Stmt::For { var, iter, body })
            }
            Tok::Return => {
                self.advance();
                if self.eat(&Tok::Semi) {
                    return Ok(Stmt::Return(None));
                }
                let value = self.expr()?;
                self.expect(Tok::Semi, "';'")?;
                Ok(Stmt::Return(Some(value)))
            }
            Tok::Ident(name) if self.tokens.get(self.pos + 1).map(|t| &t.tok) == Some(&Tok::Assign) => {
                self.advance();
                self.advance();
                let value = self.expr()?;
                self.expect(Tok::Semi, "';'")?;
                Ok(Stmt::Assign { name, value, line })
            }
            _ => {
                let expr = self.expr()?;
                self.expect(Tok::Semi, "';'")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.expect(Tok::If, "'if'")?;
        let cond = self.expr()?;
        let then_branch = self.block()?;
        let else_branch = if self.eat(&Tok::Else) {
            if self.at(&Tok::If) {
                self.enter()?;
                let nested = self.if_statement()?;
                self.leave();
                Some(vec![nested])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn expr(&mut self) -> Result<Expr, ScriptError> {
        self.enter()?;
        let e = self.or();
        self.leave();
        e
    }

    fn or(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.and()?;
        let mut folds = 0;
        while self.eat(&Tok::OrOr) {
            self.enter()?;
            folds += 1;
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.unwind(folds);
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.equality()?;
        let mut folds = 0;
        while self.eat(&Tok::AndAnd) {
            self.enter()?;
            folds += 1;
            let rhs = self.equality()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.unwind(folds);
        Ok(lhs)
    }

    fn binary_level(
        &mut self,
        ops: &[(Tok, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
    ) -> Result<Expr, ScriptError> {
        let mut lhs = next(self)?;
        let mut folds = 0;
        'outer: loop {
            for (tok, op) in ops {
                if self.eat(tok) {
                    // Each fold deepens the left spine of the tree.
                    self.enter()?;
                    folds += 1;
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                    continue 'outer;
                }
            }
            self.unwind(folds);
            return Ok(lhs);
        }
    }

    fn equality(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[(Tok::EqEq, BinaryOp::Eq), (Tok::NotEq, BinaryOp::NotEq)],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                (Tok::Le, BinaryOp::Le),
                (Tok::Ge, BinaryOp::Ge),
                (Tok::Lt, BinaryOp::Lt),
                (Tok::Gt, BinaryOp::Gt),
            ],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[(Tok::Plus, BinaryOp::Add), (Tok::Minus, BinaryOp::Sub)],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                (Tok::Star, BinaryOp::Mul),
                (Tok::Slash, BinaryOp::Div),
                (Tok::Percent, BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let op = if self.eat(&Tok::Minus) {
            UnaryOp::Neg
        } else if self.eat(&Tok::Bang) {
            UnaryOp::Not
        } else {
            return self.postfix();
        };
        self.enter()?;
        let expr = self.unary()?;
        self.leave();
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        let mut folds = 0;
        loop {
            if self.eat(&Tok::Dot) {
                self.enter()?;
                folds += 1;
                let name = self.ident("field name")?;
                expr = Expr::Field {
                    target: Box::new(expr),
                    name,
                };
            } else if self.eat(&Tok::LBracket) {
                self.enter()?;
                folds += 1;
                let index = self.expr()?;
                self.expect(Tok::RBracket, "']'")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.at(&Tok::LParen) {
                return Err(self.error("only named functions can be called"));
            } else {
                self.unwind(folds);
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        match self.advance() {
            Tok::Num(n) => Ok(Expr::Number(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::True => Ok(Expr::Bool(true)),
            Tok::False => Ok(Expr::Bool(false)),
            Tok::Null => Ok(Expr::Null),
            Tok::Ident(name) => {
                if self.eat(&Tok::LParen) {
                    let mut args = Vec::new();
                    if !self.at(&Tok::RParen) {
                        loop {
                            args.push(self.expr()?);
                            if !self.eat(&Tok::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(Tok::RParen, "')'")?;
                    Ok(Expr::Call { name, args, line })
                } else {
                    Ok(Expr::Ident { name, line })
                }
            }
            Tok::LParen => {
                let e = self.expr()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(e)
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                if !self.at(&Tok::RBracket) {
                    loop {
                        items.push(self.expr()?);
                        if !self.eat(&Tok::Comma) || self.at(&Tok::RBracket) {
                            break;
                        }
                    }
                }
                self.expect(Tok::RBracket, "']'")?;
                Ok(Expr::Array(items))
            }
            Tok::LBrace => {
                let mut fields = Vec::new();
                if !self.at(&Tok::RBrace) {
                    loop {
                        let key = match self.advance() {
                            Tok::Ident(k) | Tok::Str(k) => k,
                            other => {
                                return Err(self.error(format!(
                                    "expected object key, found {other:?}"
                                )))
                            }
                        };
                        self.expect(Tok::Colon, "':'")?;
                        fields.push((key, self.expr()?));
                        if !self.eat(&Tok::Comma) || self.at(&Tok::RBrace) {
                            break;
                        }
                    }
                }
                self.expect(Tok::RBrace, "'}'")?;
                Ok(Expr::Object(fields))
            }
            other => Err(ScriptError::Parse {
                line,
                message: format!("unexpected token {other:?}"),
            }),
        }
    }
}
