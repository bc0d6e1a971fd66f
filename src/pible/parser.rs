//! HolyC syntax analysis: token stream to AST.
//!
//! Recursive descent for declarations and statements, precedence
//! climbing for expressions. Recovery is minimal: on a bad statement
//! the parser skips to the next `;` or `}` and tries again, so a second
//! error can be detected, but the first one is what compilation fails
//! with.

use thiserror::Error;

use crate::pible::ast::{
    AssignOp, BinaryOp, Decl, Expr, ExprKind, Field, FunctionDecl, Param, Program, Stmt, StmtKind,
    StructDecl, Type, UnaryOp, VarDecl,
};
use crate::pible::diagnostics::Span;
use crate::pible::lexer::{Token, TokenKind, TokenValue};

/// Syntax errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The token stream does not match the grammar at this point.
    #[error("unexpected token {got:?} at line {line}, expected {expected}")]
    UnexpectedToken {
        /// Kind actually found.
        got: TokenKind,
        /// Description of what would have been accepted.
        expected: String,
        /// Span of the offending token.
        span: Span,
        /// 1-based source line.
        line: usize,
    },
}

impl ParseError {
    /// Byte range the error refers to.
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. } => *span,
        }
    }
}

/// HolyC parser over a scanned token stream.
pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    current: usize,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    /// Creates a parser; the stream must end with an `Eof` token.
    pub fn new(tokens: Vec<Token<'a>>) -> Self {
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
        }
    }

    /// Parses a whole translation unit.
    ///
    /// # Errors
    ///
    /// Returns the first [`ParseError`] encountered. The parser keeps
    /// going after a failed statement so the stream is consumed, but no
    /// AST is produced once an error has been recorded.
    pub fn parse(mut self) -> Result<Program, ParseError> {
        let end = self.tokens.last().map(|t| t.span.offset).unwrap_or(0);
        let mut decls = Vec::new();

        while !self.is_at_end() {
            match self.declaration() {
                Ok(decl) => decls.push(decl),
                Err(err) => {
                    self.errors.push(err);
                    let before = self.current;
                    self.synchronize();
                    // Synchronize stops short of a closing brace; at
                    // file scope that token belongs to nothing, so it
                    // must be consumed to make progress.
                    if self.current == before && !self.is_at_end() {
                        self.advance();
                    }
                }
            }
        }

        if let Some(first) = self.errors.into_iter().next() {
            return Err(first);
        }

        Ok(Program {
            decls,
            span: Span::new(0, end),
        })
    }

    fn declaration(&mut self) -> Result<Decl, ParseError> {
        if self.check(TokenKind::Struct) || self.check(TokenKind::Class) {
            return self.struct_declaration().map(Decl::Struct);
        }

        let exported = self.match_token(TokenKind::Export);
        // `static`/`const` qualify file-scope variables; neither changes
        // layout, so they are accepted and not recorded.
        let qualified = self.match_token(TokenKind::Static) | self.match_token(TokenKind::Const);

        let start = self.peek_span();
        let ty = self.parse_type()?;
        let name = self.expect_identifier("declaration name")?;

        if self.check(TokenKind::LeftParen) {
            if qualified {
                return Err(self.error_at_current("a variable declaration"));
            }
            self.function_declaration(exported, ty, name, start)
                .map(Decl::Function)
        } else {
            if exported {
                return Err(self.error_at_current("'(' to begin an exported function"));
            }
            self.global_declaration(ty, name, start).map(Decl::Global)
        }
    }

    fn struct_declaration(&mut self) -> Result<StructDecl, ParseError> {
        let start = self.peek_span();
        self.advance(); // struct | class
        let name = self.expect_identifier("struct name")?;
        self.consume(TokenKind::LeftBrace, "'{' after struct name")?;

        let mut fields = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            let field_start = self.peek_span();
            let ty = self.parse_type()?;
            let field_name = self.expect_identifier("field name")?;
            let ty = self.array_suffix(ty)?;
            let end = self.consume(TokenKind::Semicolon, "';' after field")?;
            fields.push(Field {
                name: field_name,
                ty,
                span: field_start.merge(end),
            });
        }

        self.consume(TokenKind::RightBrace, "'}' after struct fields")?;
        let end = self.consume(TokenKind::Semicolon, "';' after struct declaration")?;

        Ok(StructDecl {
            name,
            fields,
            span: start.merge(end),
        })
    }

    fn function_declaration(
        &mut self,
        exported: bool,
        return_type: Type,
        name: String,
        start: Span,
    ) -> Result<FunctionDecl, ParseError> {
        self.consume(TokenKind::LeftParen, "'(' after function name")?;

        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                let param_start = self.peek_span();
                let ty = self.parse_type()?;
                let param_name = self.expect_identifier("parameter name")?;
                let ty = self.array_suffix(ty)?;
                params.push(Param {
                    name: param_name,
                    ty,
                    span: param_start.merge(self.previous_span()),
                });
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "')' after parameters")?;

        let body = self.block()?;
        let span = start.merge(body.span);

        Ok(FunctionDecl {
            exported,
            return_type,
            name,
            params,
            body,
            span,
        })
    }

    fn global_declaration(
        &mut self,
        ty: Type,
        name: String,
        start: Span,
    ) -> Result<VarDecl, ParseError> {
        let ty = self.array_suffix(ty)?;
        let init = if self.match_token(TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        let end = self.consume(TokenKind::Semicolon, "';' after declaration")?;

        Ok(VarDecl {
            ty,
            name,
            init,
            span: start.merge(end),
        })
    }

    fn parse_type(&mut self) -> Result<Type, ParseError> {
        let base = match self.peek_kind() {
            TokenKind::U0 => Type::Void,
            TokenKind::U8 => Type::unsigned(8),
            TokenKind::U16 => Type::unsigned(16),
            TokenKind::U32 => Type::unsigned(32),
            TokenKind::U64 => Type::unsigned(64),
            TokenKind::I8 => Type::signed(8),
            TokenKind::I16 => Type::signed(16),
            TokenKind::I32 => Type::signed(32),
            TokenKind::I64 => Type::signed(64),
            TokenKind::F64 => Type::F64,
            TokenKind::Bool => Type::Bool,
            TokenKind::Identifier => Type::Struct(self.peek_lexeme().to_string()),
            _ => return Err(self.error_at_current("a type")),
        };
        self.advance();

        let mut ty = base;
        while self.match_token(TokenKind::Star) {
            ty = Type::Pointer(Box::new(ty));
        }
        Ok(ty)
    }

    /// C-style array declarator suffix after a variable or field name.
    fn array_suffix(&mut self, ty: Type) -> Result<Type, ParseError> {
        if !self.match_token(TokenKind::LeftBracket) {
            return Ok(ty);
        }
        let len = match (&self.peek_kind(), &self.peek().value) {
            (TokenKind::IntLiteral, TokenValue::Int(v)) => {
                let len = *v as usize;
                self.advance();
                len
            }
            _ => return Err(self.error_at_current("an array length")),
        };
        self.consume(TokenKind::RightBracket, "']' after array length")?;
        Ok(Type::Array(Box::new(ty), len))
    }

    fn block(&mut self) -> Result<Stmt, ParseError> {
        let start = self.consume(TokenKind::LeftBrace, "'{' to begin a block")?;

        let mut statements = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            match self.statement() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
        }

        let end = self.consume(TokenKind::RightBrace, "'}' to close the block")?;
        Ok(Stmt {
            kind: StmtKind::Block(statements),
            span: start.merge(end),
        })
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind() {
            TokenKind::LeftBrace => self.block(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Break => {
                let span = self.advance_span();
                let end = self.consume(TokenKind::Semicolon, "';' after 'break'")?;
                Ok(Stmt {
                    kind: StmtKind::Break,
                    span: span.merge(end),
                })
            }
            TokenKind::Continue => {
                let span = self.advance_span();
                let end = self.consume(TokenKind::Semicolon, "';' after 'continue'")?;
                Ok(Stmt {
                    kind: StmtKind::Continue,
                    span: span.merge(end),
                })
            }
            _ if self.starts_var_decl() => self.var_decl_statement(),
            _ => self.expression_statement(),
        }
    }

    /// Type keywords always open a declaration; a bare identifier only
    /// does when followed by another identifier or a `*` declarator,
    /// which is what distinguishes `Point p;` from `p;`.
    fn starts_var_decl(&self) -> bool {
        match self.peek_kind() {
            TokenKind::U0
            | TokenKind::U8
            | TokenKind::U16
            | TokenKind::U32
            | TokenKind::U64
            | TokenKind::I8
            | TokenKind::I16
            | TokenKind::I32
            | TokenKind::I64
            | TokenKind::F64
            | TokenKind::Bool => true,
            TokenKind::Identifier => matches!(
                self.peek_kind_at(1),
                TokenKind::Identifier | TokenKind::Star
            ) && matches!(
                self.peek_kind_at(2),
                TokenKind::Identifier
                    | TokenKind::Star
                    | TokenKind::Semicolon
                    | TokenKind::Equal
                    | TokenKind::LeftBracket
            ),
            _ => false,
        }
    }

    fn var_decl_statement(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek_span();
        let ty = self.parse_type()?;
        let name = self.expect_identifier("variable name")?;
        let ty = self.array_suffix(ty)?;
        let init = if self.match_token(TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        let end = self.consume(TokenKind::Semicolon, "';' after declaration")?;
        let span = start.merge(end);

        Ok(Stmt {
            kind: StmtKind::VarDecl(VarDecl {
                ty,
                name,
                init,
                span,
            }),
            span,
        })
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance_span(); // if
        self.consume(TokenKind::LeftParen, "'(' after 'if'")?;
        let cond = self.expression()?;
        self.consume(TokenKind::RightParen, "')' after condition")?;

        let then_branch = Box::new(self.statement()?);
        // Dangling else binds here, to the nearest if.
        let else_branch = if self.match_token(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        let span = start.merge(
            else_branch
                .as_deref()
                .map(|s| s.span)
                .unwrap_or(then_branch.span),
        );
        Ok(Stmt {
            kind: StmtKind::If {
                cond,
                then_branch,
                else_branch,
            },
            span,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance_span(); // while
        self.consume(TokenKind::LeftParen, "'(' after 'while'")?;
        let cond = self.expression()?;
        self.consume(TokenKind::RightParen, "')' after condition")?;
        let body = Box::new(self.statement()?);
        let span = start.merge(body.span);

        Ok(Stmt {
            kind: StmtKind::While { cond, body },
            span,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance_span(); // for
        self.consume(TokenKind::LeftParen, "'(' after 'for'")?;

        let init = if self.match_token(TokenKind::Semicolon) {
            None
        } else if self.starts_var_decl() {
            Some(Box::new(self.var_decl_statement()?))
        } else {
            let stmt = self.expression_statement()?;
            Some(Box::new(stmt))
        };

        let cond = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenKind::Semicolon, "';' after loop condition")?;

        let step = if self.check(TokenKind::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenKind::RightParen, "')' after for clauses")?;

        let body = Box::new(self.statement()?);
        let span = start.merge(body.span);

        Ok(Stmt {
            kind: StmtKind::For {
                init,
                cond,
                step,
                body,
            },
            span,
        })
    }

    fn return_statement(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance_span(); // return
        let expr = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        let end = self.consume(TokenKind::Semicolon, "';' after return value")?;

        Ok(Stmt {
            kind: StmtKind::Return(expr),
            span: start.merge(end),
        })
    }

    fn expression_statement(&mut self) -> Result<Stmt, ParseError> {
        let expr = self.expression()?;
        let end = self.consume(TokenKind::Semicolon, "';' after expression")?;
        let span = expr.span.merge(end);

        Ok(Stmt {
            kind: StmtKind::Expr(expr),
            span,
        })
    }

    // === Expressions ===

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.assignment()
    }

    // Right-associative; the target's shape is validated during code
    // generation, where types are known.
    fn assignment(&mut self) -> Result<Expr, ParseError> {
        let expr = self.binary_expr(0)?;

        let op = match self.peek_kind() {
            TokenKind::Equal => AssignOp::Assign,
            TokenKind::PlusAssign => AssignOp::AddAssign,
            TokenKind::MinusAssign => AssignOp::SubAssign,
            TokenKind::StarAssign => AssignOp::MulAssign,
            TokenKind::SlashAssign => AssignOp::DivAssign,
            _ => return Ok(expr),
        };
        self.advance();

        let value = self.assignment()?;
        let span = expr.span.merge(value.span);
        Ok(Expr {
            kind: ExprKind::Assign {
                target: Box::new(expr),
                op,
                value: Box::new(value),
            },
            span,
        })
    }

    /// Precedence climb over the binary operator ladder; all levels are
    /// left-associative.
    fn binary_expr(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;

        while let Some((op, prec)) = binary_precedence(self.peek_kind()) {
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.binary_expr(prec + 1)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            };
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Increment => Some(UnaryOp::PreIncrement),
            TokenKind::Decrement => Some(UnaryOp::PreDecrement),
            TokenKind::Star => Some(UnaryOp::Deref),
            TokenKind::Ampersand => Some(UnaryOp::AddrOf),
            _ => None,
        };

        if let Some(op) = op {
            let start = self.advance_span();
            let operand = self.unary()?;
            let span = start.merge(operand.span);
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            });
        }

        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;

        loop {
            match self.peek_kind() {
                TokenKind::LeftParen => {
                    // Only calls by name exist in the dialect.
                    let callee = match &expr.kind {
                        ExprKind::Identifier(name) => name.clone(),
                        _ => return Err(self.error_at_current("a callable name")),
                    };
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(TokenKind::RightParen) {
                        loop {
                            args.push(self.expression()?);
                            if !self.match_token(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    let end = self.consume(TokenKind::RightParen, "')' after arguments")?;
                    let span = expr.span.merge(end);
                    expr = Expr {
                        kind: ExprKind::Call { callee, args },
                        span,
                    };
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.expression()?;
                    let end = self.consume(TokenKind::RightBracket, "']' after index")?;
                    let span = expr.span.merge(end);
                    expr = Expr {
                        kind: ExprKind::Index {
                            array: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    };
                }
                TokenKind::Dot | TokenKind::Arrow => {
                    let arrow = self.peek_kind() == TokenKind::Arrow;
                    self.advance();
                    let field = self.expect_identifier("field name")?;
                    let span = expr.span.merge(self.previous_span());
                    expr = Expr {
                        kind: ExprKind::Member {
                            object: Box::new(expr),
                            field,
                            arrow,
                        },
                        span,
                    };
                }
                TokenKind::Increment | TokenKind::Decrement => {
                    let op = if self.peek_kind() == TokenKind::Increment {
                        UnaryOp::PostIncrement
                    } else {
                        UnaryOp::PostDecrement
                    };
                    let end = self.advance_span();
                    let span = expr.span.merge(end);
                    expr = Expr {
                        kind: ExprKind::Unary {
                            op,
                            operand: Box::new(expr),
                        },
                        span,
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        let span = token.span;

        let kind = match token.kind {
            TokenKind::IntLiteral | TokenKind::CharLiteral => {
                let value = token.int_value();
                let width_hint = if value <= i32::MAX as u64 { 32 } else { 64 };
                ExprKind::IntLit { value, width_hint }
            }
            TokenKind::FloatLiteral => match token.value {
                TokenValue::Float(v) => ExprKind::FloatLit(v),
                _ => ExprKind::FloatLit(0.0),
            },
            TokenKind::StringLiteral => match token.value {
                TokenValue::Bytes(ref b) => ExprKind::StringLit(b.clone()),
                _ => ExprKind::StringLit(Vec::new()),
            },
            TokenKind::True => ExprKind::BoolLit(true),
            TokenKind::False => ExprKind::BoolLit(false),
            TokenKind::Null => ExprKind::Null,
            TokenKind::Identifier | TokenKind::PrintF => {
                ExprKind::Identifier(token.lexeme.to_string())
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.expression()?;
                let end = self.consume(TokenKind::RightParen, "')' after expression")?;
                return Ok(Expr {
                    kind: inner.kind,
                    span: span.merge(end),
                });
            }
            _ => return Err(self.error_at_current("an expression")),
        };

        self.advance();
        Ok(Expr { kind, span })
    }

    // === Token stream helpers ===

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> &Token<'a> {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current - 1]
    }

    fn advance_span(&mut self) -> Span {
        self.advance().span
    }

    fn is_at_end(&self) -> bool {
        self.peek_kind() == TokenKind::Eof
    }

    fn peek(&self) -> &Token<'a> {
        &self.tokens[self.current]
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens[self.current].kind
    }

    fn peek_kind_at(&self, ahead: usize) -> TokenKind {
        self.tokens
            .get(self.current + ahead)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn peek_lexeme(&self) -> &'a str {
        self.tokens[self.current].lexeme
    }

    fn peek_span(&self) -> Span {
        self.tokens[self.current].span
    }

    fn previous_span(&self) -> Span {
        self.tokens[self.current - 1].span
    }

    fn consume(&mut self, kind: TokenKind, expected: &str) -> Result<Span, ParseError> {
        if self.check(kind) {
            Ok(self.advance_span())
        } else {
            Err(self.error_at_current(expected))
        }
    }

    fn expect_identifier(&mut self, expected: &str) -> Result<String, ParseError> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance().lexeme.to_string())
        } else {
            Err(self.error_at_current(expected))
        }
    }

    fn error_at_current(&self, expected: &str) -> ParseError {
        let token = self.peek();
        ParseError::UnexpectedToken {
            got: token.kind,
            expected: expected.to_string(),
            span: token.span,
            line: token.line,
        }
    }

    /// Discards tokens until the statement boundary after an error.
    fn synchronize(&mut self) {
        while !self.is_at_end() {
            if self.peek_kind() == TokenKind::Semicolon {
                self.advance();
                return;
            }
            if self.peek_kind() == TokenKind::RightBrace {
                return;
            }
            self.advance();
        }
    }
}

fn binary_precedence(kind: TokenKind) -> Option<(BinaryOp, u8)> {
    let entry = match kind {
        TokenKind::Or => (BinaryOp::LogicalOr, 1),
        TokenKind::And => (BinaryOp::LogicalAnd, 2),
        TokenKind::Pipe => (BinaryOp::BitOr, 3),
        TokenKind::Caret => (BinaryOp::BitXor, 4),
        TokenKind::Ampersand => (BinaryOp::BitAnd, 5),
        TokenKind::EqualEqual => (BinaryOp::Eq, 6),
        TokenKind::BangEqual => (BinaryOp::Ne, 6),
        TokenKind::Less => (BinaryOp::Lt, 7),
        TokenKind::LessEqual => (BinaryOp::Le, 7),
        TokenKind::Greater => (BinaryOp::Gt, 7),
        TokenKind::GreaterEqual => (BinaryOp::Ge, 7),
        TokenKind::LeftShift => (BinaryOp::Shl, 8),
        TokenKind::RightShift => (BinaryOp::Shr, 8),
        TokenKind::Plus => (BinaryOp::Add, 9),
        TokenKind::Minus => (BinaryOp::Sub, 9),
        TokenKind::Star => (BinaryOp::Mul, 10),
        TokenKind::Slash => (BinaryOp::Div, 10),
        TokenKind::Percent => (BinaryOp::Mod, 10),
        _ => return None,
    };
    Some(entry)
}
