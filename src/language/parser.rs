use crate::language::{
    ast::*,
    errors::ParseError,
    span::Span,
    token::{Token, TokenKind},
    types::{Mutability, TypeAnnotation, TypeExpr},
};

#[tracing::instrument(level = "debug", skip_all)]
pub fn parse(tokens: Vec<Token>) -> Result<Program, ParseError> {
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_id: ExprId,
    suppress_block_literal: bool,
}

enum Infix {
    Binary(BinaryOp),
    Range { inclusive: bool },
}

impl Parser {
    fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last(), Some(Token { kind: TokenKind::Eof, .. })) {
            let end = tokens.last().map(|t| t.span.end).unwrap_or(0);
            tokens.push(Token {
                kind: TokenKind::Eof,
                lexeme: String::new(),
                span: Span::new(end, end),
            });
        }
        Self {
            tokens,
            pos: 0,
            next_id: 0,
            suppress_block_literal: false,
        }
    }

    fn parse_program(mut self) -> Result<Program, ParseError> {
        let mut items = Vec::new();
        while !self.is_eof() {
            if self.matches(TokenKind::Semi) {
                continue;
            }
            items.push(self.parse_item()?);
        }
        tracing::debug!(items = items.len(), expressions = self.next_id, "parsed program");
        Ok(Program {
            items,
            next_expr_id: self.next_id,
        })
    }

    fn parse_item(&mut self) -> Result<Item, ParseError> {
        match self.peek_kind() {
            TokenKind::Record => self.parse_record().map(Item::Record),
            TokenKind::Union => self.parse_union().map(Item::Union),
            TokenKind::Patch => self.parse_patch().map(Item::Patch),
            TokenKind::Fn | TokenKind::Identifier(_) => self.parse_function().map(Item::Function),
            _ => Err(self.error_here("`record`, `union`, `patch` or a function")),
        }
    }

    fn parse_record(&mut self) -> Result<RecordDecl, ParseError> {
        let start = self.expect(TokenKind::Record)?.start;
        let (name, _) = self.expect_identifier("record name")?;
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_eof() {
            let ty = self.parse_type_annotation()?;
            let (field, field_span) = self.expect_identifier("field name")?;
            let span = ty.span.union(field_span);
            fields.push(RecordField {
                name: field,
                ty,
                span,
            });
            if !self.matches(TokenKind::Semi) && !self.matches(TokenKind::Comma) {
                break;
            }
        }
        let end = self.expect(TokenKind::RBrace)?.end;
        Ok(RecordDecl {
            name,
            fields,
            span: Span::new(start, end),
        })
    }

    fn parse_union(&mut self) -> Result<UnionDecl, ParseError> {
        let start = self.expect(TokenKind::Union)?.start;
        let (name, _) = self.expect_identifier("union name")?;
        let mut type_params = Vec::new();
        if self.matches(TokenKind::Lt) {
            loop {
                let (param, _) = self.expect_identifier("type parameter")?;
                type_params.push(param);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Gt)?;
        }
        self.expect(TokenKind::LBrace)?;
        let mut variants = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_eof() {
            let (variant, variant_span) = self.expect_identifier("variant name")?;
            let mut fields = Vec::new();
            let mut end = variant_span.end;
            if self.matches(TokenKind::LParen) {
                if !self.check(&TokenKind::RParen) {
                    loop {
                        fields.push(self.parse_type_annotation()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                end = self.expect(TokenKind::RParen)?.end;
            }
            variants.push(UnionVariant {
                name: variant,
                fields,
                span: Span::new(variant_span.start, end),
            });
            if !self.matches(TokenKind::Semi) && !self.matches(TokenKind::Comma) {
                break;
            }
        }
        let end = self.expect(TokenKind::RBrace)?.end;
        Ok(UnionDecl {
            name,
            type_params,
            variants,
            span: Span::new(start, end),
        })
    }

    fn parse_patch(&mut self) -> Result<PatchDecl, ParseError> {
        let start = self.expect(TokenKind::Patch)?.start;
        let target = self.parse_type_annotation()?;
        self.expect(TokenKind::LBrace)?;
        let mut methods = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_eof() {
            if self.matches(TokenKind::Semi) {
                continue;
            }
            methods.push(self.parse_function()?);
        }
        let end = self.expect(TokenKind::RBrace)?.end;
        Ok(PatchDecl {
            target,
            methods,
            span: Span::new(start, end),
        })
    }

    /// `fn name(params) -> T { }` or the C-style `T name(params) { }`.
    fn parse_function(&mut self) -> Result<FunctionDecl, ParseError> {
        let start = self.current_span().start;
        let keyword_form = self.matches(TokenKind::Fn);
        let leading_type = if keyword_form {
            None
        } else {
            Some(self.parse_type_annotation()?)
        };
        let (name, _) = self.expect_identifier("function name")?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.parse_param()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let return_type = if keyword_form && self.matches(TokenKind::Arrow) {
            Some(self.parse_type_annotation()?)
        } else {
            leading_type
        };
        let body = self.parse_block()?;
        let span = Span::new(start, body.span.end);
        Ok(FunctionDecl {
            name,
            params,
            return_type,
            body,
            span,
        })
    }

    fn parse_param(&mut self) -> Result<Param, ParseError> {
        let ty = self.parse_type_annotation()?;
        let (name, mutability) = match self.peek_kind().clone() {
            TokenKind::Identifier(name) => (name, Mutability::Immutable),
            TokenKind::MutIdentifier(name) => (name, Mutability::Mutable),
            _ => return Err(self.error_here("parameter name")),
        };
        let name_span = self.advance().span;
        Ok(Param {
            name,
            span: ty.span.union(name_span),
            ty,
            mutability,
            symbol: None,
        })
    }

    fn parse_type_annotation(&mut self) -> Result<TypeAnnotation, ParseError> {
        let start = self.current_span().start;
        let ty = self.parse_type_expr()?;
        Ok(TypeAnnotation {
            ty,
            span: Span::new(start, self.previous_span().end),
        })
    }

    fn parse_type_expr(&mut self) -> Result<TypeExpr, ParseError> {
        let (name, _) = self.expect_identifier("type")?;
        let args = if self.check(&TokenKind::Lt) {
            self.parse_type_args()?
        } else {
            Vec::new()
        };
        let mut ty = TypeExpr::Named(name, args);
        loop {
            let mutable = if self.matches(TokenKind::Ampersand) {
                false
            } else if self.matches(TokenKind::AmpersandAt) {
                true
            } else {
                break;
            };
            ty = TypeExpr::Reference {
                mutable,
                ty: Box::new(ty),
            };
        }
        Ok(ty)
    }

    fn parse_type_args(&mut self) -> Result<Vec<TypeExpr>, ParseError> {
        self.expect(TokenKind::Lt)?;
        let mut args = Vec::new();
        loop {
            let length = match self.peek().kind {
                TokenKind::Integer(len) => u64::try_from(len).ok(),
                _ => None,
            };
            match length {
                Some(len) => {
                    self.advance();
                    args.push(TypeExpr::Length(len));
                }
                None => args.push(self.parse_type_expr()?),
            }
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Gt)?;
        Ok(args)
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let start = self.expect(TokenKind::LBrace)?.start;
        let outer = std::mem::replace(&mut self.suppress_block_literal, false);
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_eof() {
            if self.matches(TokenKind::Semi) {
                continue;
            }
            let statement = self.parse_statement()?;
            let is_tail = statement.is_expression_tail();
            statements.push(statement);
            if is_tail {
                break;
            }
        }
        self.suppress_block_literal = outer;
        let end = self.expect(TokenKind::RBrace)?.end;
        Ok(Block {
            statements,
            span: Span::new(start, end),
            scope: None,
        })
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        if let Some(statement) = self.parse_declaration()? {
            return Ok(statement);
        }
        // A block-like expression at the start of a statement ends at its `}`.
        let expr = if matches!(
            self.peek_kind(),
            TokenKind::If
                | TokenKind::When
                | TokenKind::Loop
                | TokenKind::While
                | TokenKind::For
                | TokenKind::LBrace
        ) {
            self.parse_primary()?
        } else {
            self.parse_expression()?
        };
        let span = expr.span;
        let form = if self.matches(TokenKind::Semi) {
            StatementForm::Statement
        } else if self.check(&TokenKind::RBrace) {
            StatementForm::ExpressionTail
        } else if expr.is_block_like() {
            StatementForm::Statement
        } else {
            return Err(self.error_here("`;`"));
        };
        Ok(Statement {
            kind: StmtKind::Expr(expr),
            form,
            span,
        })
    }

    /// `Type name = e;`, `Type @name = e;` and `@name = e;`. Anything else
    /// is left for the expression parser.
    fn parse_declaration(&mut self) -> Result<Option<Statement>, ParseError> {
        let start = self.current_span().start;
        let (ty, name, mutability) = match self.peek_kind().clone() {
            TokenKind::MutIdentifier(name) if self.peek_kind_n(1) == &TokenKind::Eq => {
                self.advance();
                (None, name, Mutability::Mutable)
            }
            TokenKind::Identifier(_) => {
                let declared = self.speculate(|p| {
                    let ty = p.parse_type_annotation()?;
                    let (name, mutability) = match p.peek_kind().clone() {
                        TokenKind::Identifier(name) => (name, Mutability::Immutable),
                        TokenKind::MutIdentifier(name) => (name, Mutability::Mutable),
                        _ => return Err(p.error_here("binding name")),
                    };
                    if p.peek_kind_n(1) != &TokenKind::Eq {
                        return Err(p.error_here("`=`"));
                    }
                    p.advance();
                    Ok((ty, name, mutability))
                });
                match declared {
                    Some((ty, name, mutability)) => (Some(ty), name, mutability),
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };
        self.expect(TokenKind::Eq)?;
        let value = self.parse_expression()?;
        let end = self.expect(TokenKind::Semi)?.end;
        let span = Span::new(start, end);
        Ok(Some(Statement {
            kind: StmtKind::Let(LetStmt {
                name,
                ty,
                mutability,
                value,
                span,
                symbol: None,
            }),
            form: StatementForm::Statement,
            span,
        }))
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        let target = self.parse_binary(0)?;
        let op = match self.peek_kind() {
            TokenKind::Eq => AssignOp::Assign,
            TokenKind::PlusEq => AssignOp::Add,
            TokenKind::MinusEq => AssignOp::Sub,
            TokenKind::StarEq => AssignOp::Mul,
            TokenKind::SlashEq => AssignOp::Div,
            TokenKind::PercentEq => AssignOp::Rem,
            _ => return Ok(target),
        };
        self.advance();
        let value = self.parse_assignment()?;
        let span = target.span.union(value.span);
        Ok(self.node(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        ))
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let Some((infix, prec)) = self.current_infix() else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = self.parse_binary(prec + 1)?;
            let span = left.span.union(right.span);
            let kind = match infix {
                Infix::Binary(op) => ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Infix::Range { inclusive } => ExprKind::Range {
                    start: Box::new(left),
                    end: Box::new(right),
                    inclusive,
                },
            };
            left = self.node(kind, span);
        }
        Ok(left)
    }

    fn current_infix(&self) -> Option<(Infix, u8)> {
        let infix = match self.peek_kind() {
            TokenKind::Or => (Infix::Binary(BinaryOp::Or), 1),
            TokenKind::And => (Infix::Binary(BinaryOp::And), 2),
            TokenKind::EqEq => (Infix::Binary(BinaryOp::Eq), 3),
            TokenKind::BangEq => (Infix::Binary(BinaryOp::NotEq), 3),
            TokenKind::Lt => (Infix::Binary(BinaryOp::Lt), 4),
            TokenKind::LtEq => (Infix::Binary(BinaryOp::LtEq), 4),
            TokenKind::Gt => (Infix::Binary(BinaryOp::Gt), 4),
            TokenKind::GtEq => (Infix::Binary(BinaryOp::GtEq), 4),
            TokenKind::DotDot => (Infix::Range { inclusive: false }, 5),
            TokenKind::DotDotEq => (Infix::Range { inclusive: true }, 5),
            TokenKind::Plus => (Infix::Binary(BinaryOp::Add), 6),
            TokenKind::Minus => (Infix::Binary(BinaryOp::Sub), 6),
            TokenKind::Star => (Infix::Binary(BinaryOp::Mul), 7),
            TokenKind::Slash => (Infix::Binary(BinaryOp::Div), 7),
            TokenKind::Percent => (Infix::Binary(BinaryOp::Rem), 7),
            _ => return None,
        };
        Some(infix)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let start = self.current_span().start;
        let kind = match self.peek_kind() {
            TokenKind::Minus => {
                self.advance();
                if let Some(literal) = self.negative_literal() {
                    let span = Span::new(start, self.previous_span().end);
                    return Ok(self.node(ExprKind::Literal(literal), span));
                }
                let operand = self.parse_unary()?;
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                }
            }
            TokenKind::Not => {
                self.advance();
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(self.parse_unary()?),
                }
            }
            TokenKind::Ampersand | TokenKind::AmpersandAt => {
                let mutable = self.advance().kind == TokenKind::AmpersandAt;
                ExprKind::Reference {
                    mutable,
                    operand: Box::new(self.parse_unary()?),
                }
            }
            TokenKind::Star => {
                self.advance();
                ExprKind::Deref {
                    operand: Box::new(self.parse_unary()?),
                    implicit: false,
                }
            }
            _ => return self.parse_postfix(),
        };
        let span = Span::new(start, self.previous_span().end);
        Ok(self.node(kind, span))
    }

    /// Folds `-5` into one literal unless a postfix operator follows it.
    fn negative_literal(&mut self) -> Option<Literal> {
        let literal = match self.peek_kind() {
            TokenKind::Integer(value) => Literal::Int(value.checked_neg()?),
            TokenKind::Float(value) => Literal::Float(-value),
            _ => return None,
        };
        if matches!(
            self.peek_kind_n(1),
            TokenKind::Dot | TokenKind::LBracket | TokenKind::LParen
        ) {
            return None;
        }
        self.advance();
        Some(literal)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(&TokenKind::LParen) {
                let (args, end) = self.parse_call_args()?;
                let span = Span::new(expr.span.start, end);
                expr = self.node(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                        target: None,
                    },
                    span,
                );
            } else if self.matches(TokenKind::Dot) {
                let (name, name_span) = self.expect_identifier("field or method name")?;
                if self.check(&TokenKind::LParen) {
                    let (args, end) = self.parse_call_args()?;
                    let span = Span::new(expr.span.start, end);
                    expr = self.node(
                        ExprKind::MethodCall {
                            receiver: Box::new(expr),
                            method: name,
                            args,
                            target: None,
                        },
                        span,
                    );
                } else {
                    let span = expr.span.union(name_span);
                    expr = self.node(
                        ExprKind::FieldAccess {
                            base: Box::new(expr),
                            field: name,
                        },
                        span,
                    );
                }
            } else if self.matches(TokenKind::LBracket) {
                let index = self.nested(false, |p| p.parse_expression())?;
                let end = self.expect(TokenKind::RBracket)?.end;
                let span = Span::new(expr.span.start, end);
                expr = self.node(
                    ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, usize), ParseError> {
        self.expect(TokenKind::LParen)?;
        let args = self.nested(false, |p| {
            let mut args = Vec::new();
            while !p.check(&TokenKind::RParen) && !p.is_eof() {
                args.push(p.parse_expression()?);
                if !p.matches(TokenKind::Comma) {
                    break;
                }
            }
            Ok(args)
        })?;
        let end = self.expect(TokenKind::RParen)?.end;
        Ok((args, end))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        let literal = match &token.kind {
            TokenKind::Integer(value) => Some(Literal::Int(*value)),
            TokenKind::Float(value) => Some(Literal::Float(*value)),
            TokenKind::String(value) => Some(Literal::String(value.clone())),
            TokenKind::Char(value) => Some(Literal::Char(*value)),
            TokenKind::True => Some(Literal::Bool(true)),
            TokenKind::False => Some(Literal::Bool(false)),
            _ => None,
        };
        if let Some(literal) = literal {
            self.advance();
            return Ok(self.node(ExprKind::Literal(literal), token.span));
        }

        match token.kind {
            TokenKind::LParen => {
                self.advance();
                let inner = self.nested(false, |p| p.parse_expression())?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.advance();
                let elements = self.nested(false, |p| {
                    let mut elements = Vec::new();
                    while !p.check(&TokenKind::RBracket) && !p.is_eof() {
                        elements.push(p.parse_expression()?);
                        if !p.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                    Ok(elements)
                })?;
                let end = self.expect(TokenKind::RBracket)?.end;
                Ok(self.node(
                    ExprKind::ArrayLiteral(elements),
                    Span::new(token.span.start, end),
                ))
            }
            TokenKind::LBrace if !self.suppress_block_literal => {
                let block = self.parse_block()?;
                let span = block.span;
                Ok(self.node(ExprKind::Block(Box::new(block)), span))
            }
            TokenKind::If => self.parse_if(),
            TokenKind::When => self.parse_when(),
            TokenKind::Loop => {
                self.advance();
                let body = self.parse_block()?;
                let span = Span::new(token.span.start, body.span.end);
                Ok(self.node(
                    ExprKind::Loop {
                        body: Box::new(body),
                    },
                    span,
                ))
            }
            TokenKind::While => {
                self.advance();
                let condition = self.nested(true, |p| p.parse_expression())?;
                let body = self.parse_block()?;
                let span = Span::new(token.span.start, body.span.end);
                Ok(self.node(
                    ExprKind::While {
                        condition: Box::new(condition),
                        body: Box::new(body),
                    },
                    span,
                ))
            }
            TokenKind::For => {
                self.advance();
                let (binding, _) = self.expect_identifier("loop variable")?;
                self.expect(TokenKind::In)?;
                let iterable = self.nested(true, |p| p.parse_expression())?;
                let body = self.parse_block()?;
                let span = Span::new(token.span.start, body.span.end);
                Ok(self.node(
                    ExprKind::For {
                        binding,
                        symbol: None,
                        iterable: Box::new(iterable),
                        body: Box::new(body),
                    },
                    span,
                ))
            }
            TokenKind::Break | TokenKind::Return => self.parse_jump(),
            TokenKind::Identifier(name) => self.parse_identifier_expression(name),
            TokenKind::MutIdentifier(name) => {
                self.advance();
                Ok(self.node(
                    ExprKind::Identifier(Identifier { name, symbol: None }),
                    token.span,
                ))
            }
            _ => Err(self.error_here("expression")),
        }
    }

    /// `break`, `break e`, `return`, `return e`.
    fn parse_jump(&mut self) -> Result<Expr, ParseError> {
        let keyword = self.advance().clone();
        let value = if self.starts_expression() {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        let span = Span::new(keyword.span.start, self.previous_span().end);
        let kind = if keyword.kind == TokenKind::Break {
            ExprKind::Break(value)
        } else {
            ExprKind::Return(value)
        };
        Ok(self.node(kind, span))
    }

    fn starts_expression(&self) -> bool {
        !matches!(
            self.peek_kind(),
            TokenKind::Semi
                | TokenKind::Comma
                | TokenKind::RBrace
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::Eof
        )
    }

    fn parse_if(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect(TokenKind::If)?.start;
        let condition = self.nested(true, |p| p.parse_expression())?;
        let then_branch = self.parse_block()?;
        let mut end = then_branch.span.end;
        let else_branch = if self.matches(TokenKind::Else) {
            let branch = if self.check(&TokenKind::If) {
                self.parse_if()?
            } else {
                let block = self.parse_block()?;
                let span = block.span;
                self.node(ExprKind::Block(Box::new(block)), span)
            };
            end = branch.span.end;
            Some(Box::new(branch))
        } else {
            None
        };
        Ok(self.node(
            ExprKind::If {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch,
            },
            Span::new(start, end),
        ))
    }

    fn parse_when(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect(TokenKind::When)?.start;
        let scrutinee = self.nested(true, |p| p.parse_expression())?;
        self.expect(TokenKind::LBrace)?;
        let arms = self.nested(false, |p| {
            let mut arms = Vec::new();
            while !p.check(&TokenKind::RBrace) && !p.is_eof() {
                let pattern = p.parse_pattern()?;
                p.expect(TokenKind::Colon)?;
                let body = p.parse_expression()?;
                let span = pattern.span().union(body.span);
                let block_like = body.is_block_like();
                arms.push(WhenArm {
                    pattern,
                    body,
                    span,
                    scope: None,
                });
                if p.matches(TokenKind::Semi) || p.matches(TokenKind::Comma) {
                    continue;
                }
                if !block_like && !p.check(&TokenKind::RBrace) {
                    return Err(p.error_here("`;` after `when` arm"));
                }
            }
            Ok(arms)
        })?;
        let end = self.expect(TokenKind::RBrace)?.end;
        Ok(self.node(
            ExprKind::When {
                scrutinee: Box::new(scrutinee),
                arms,
                produces_value: false,
            },
            Span::new(start, end),
        ))
    }

    fn parse_pattern(&mut self) -> Result<Pattern, ParseError> {
        let token = self.peek().clone();
        let literal = match &token.kind {
            TokenKind::Integer(value) => Some(Literal::Int(*value)),
            TokenKind::Float(value) => Some(Literal::Float(*value)),
            TokenKind::String(value) => Some(Literal::String(value.clone())),
            TokenKind::Char(value) => Some(Literal::Char(*value)),
            TokenKind::True => Some(Literal::Bool(true)),
            TokenKind::False => Some(Literal::Bool(false)),
            TokenKind::Minus => {
                self.advance();
                let Some(literal) = self.negative_literal() else {
                    return Err(self.error_here("number"));
                };
                let span = Span::new(token.span.start, self.previous_span().end);
                return Ok(Pattern::Literal(literal, span));
            }
            _ => None,
        };
        if let Some(literal) = literal {
            self.advance();
            return Ok(Pattern::Literal(literal, token.span));
        }

        match token.kind {
            TokenKind::Else => {
                self.advance();
                Ok(Pattern::Else(token.span))
            }
            TokenKind::Identifier(name) if name == "_" => {
                self.advance();
                Ok(Pattern::Wildcard(token.span))
            }
            TokenKind::Identifier(first) => {
                self.advance();
                let (qualifier, name, mut span) = if self.matches(TokenKind::ColonColon) {
                    let (variant, variant_span) = self.expect_identifier("variant name")?;
                    (Some(first), variant, token.span.union(variant_span))
                } else {
                    (None, first, token.span)
                };
                if self.matches(TokenKind::LParen) {
                    let mut args = Vec::new();
                    while !self.check(&TokenKind::RParen) && !self.is_eof() {
                        args.push(self.parse_pattern()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                    span = span.union(self.expect(TokenKind::RParen)?);
                    Ok(Pattern::Variant {
                        qualifier,
                        name,
                        args,
                        span,
                    })
                } else if qualifier.is_some() {
                    Ok(Pattern::Variant {
                        qualifier,
                        name,
                        args: Vec::new(),
                        span,
                    })
                } else {
                    Ok(Pattern::Binding {
                        name,
                        span,
                        symbol: None,
                    })
                }
            }
            _ => Err(self.error_here("pattern")),
        }
    }

    fn parse_identifier_expression(&mut self, name: String) -> Result<Expr, ParseError> {
        let span = self.advance().span;
        // `<` opens type arguments only before `::` or a record body.
        let type_args = if self.check(&TokenKind::Lt) {
            self.speculate(|p| {
                let args = p.parse_type_args()?;
                if p.check(&TokenKind::ColonColon)
                    || (p.check(&TokenKind::LBrace) && !p.suppress_block_literal)
                {
                    Ok(args)
                } else {
                    Err(p.error_here("`::`"))
                }
            })
        } else {
            None
        };
        let has_type_args = type_args.is_some();
        let qualifier = TypeAnnotation {
            ty: TypeExpr::Named(name.clone(), type_args.unwrap_or_default()),
            span: Span::new(span.start, self.previous_span().end),
        };

        if self.matches(TokenKind::ColonColon) {
            let (variant, variant_span) = self.expect_identifier("variant name")?;
            let (args, end) = if self.check(&TokenKind::LParen) {
                self.parse_call_args()?
            } else {
                (Vec::new(), variant_span.end)
            };
            return Ok(self.node(
                ExprKind::VariantLiteral {
                    qualifier: Some(qualifier),
                    variant,
                    args,
                    resolved: None,
                },
                Span::new(span.start, end),
            ));
        }
        if self.check(&TokenKind::LBrace)
            && !self.suppress_block_literal
            && (has_type_args || self.looks_like_record_body())
        {
            return self.parse_record_literal(qualifier);
        }
        Ok(self.node(ExprKind::Identifier(Identifier { name, symbol: None }), span))
    }

    fn looks_like_record_body(&self) -> bool {
        match self.peek_kind_n(1) {
            TokenKind::RBrace => true,
            TokenKind::Identifier(_) => self.peek_kind_n(2) == &TokenKind::Colon,
            _ => false,
        }
    }

    fn parse_record_literal(&mut self, ty: TypeAnnotation) -> Result<Expr, ParseError> {
        let start = ty.span.start;
        self.expect(TokenKind::LBrace)?;
        let fields = self.nested(false, |p| {
            let mut fields = Vec::new();
            while !p.check(&TokenKind::RBrace) && !p.is_eof() {
                let (name, name_span) = p.expect_identifier("field name")?;
                p.expect(TokenKind::Colon)?;
                let value = p.parse_expression()?;
                let span = name_span.union(value.span);
                fields.push(FieldInit { name, value, span });
                if !p.matches(TokenKind::Comma) && !p.matches(TokenKind::Semi) {
                    break;
                }
            }
            Ok(fields)
        })?;
        let end = self.expect(TokenKind::RBrace)?.end;
        Ok(self.node(
            ExprKind::RecordLiteral { ty, fields },
            Span::new(start, end),
        ))
    }

    fn node(&mut self, kind: ExprKind, span: Span) -> Expr {
        let id = self.next_id;
        self.next_id += 1;
        Expr { id, kind, span }
    }

    /// Runs `f` with record and block literals allowed or suppressed.
    fn nested<T>(
        &mut self,
        suppress: bool,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        let outer = std::mem::replace(&mut self.suppress_block_literal, suppress);
        let result = f(self);
        self.suppress_block_literal = outer;
        result
    }

    /// Tries `attempt`, rewinding to the current token if it fails.
    fn speculate<T>(
        &mut self,
        attempt: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Option<T> {
        let saved = self.pos;
        match attempt(self) {
            Ok(value) => Some(value),
            Err(_) => {
                self.pos = saved;
                None
            }
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<(String, Span), ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                let span = self.advance().span;
                Ok((name, span))
            }
            _ => Err(self.error_here(what)),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Span, ParseError> {
        if self.check(&kind) {
            Ok(self.advance().span)
        } else {
            Err(self.error_here(&kind.to_string()))
        }
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(&kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_kind_n(&self, n: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)].kind
    }

    fn advance(&mut self) -> &Token {
        let last = self.tokens.len() - 1;
        let idx = self.pos.min(last);
        self.pos = (self.pos + 1).min(self.tokens.len());
        &self.tokens[idx]
    }

    fn is_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn current_span(&self) -> Span {
        self.peek().span
    }

    fn previous_span(&self) -> Span {
        if self.pos == 0 {
            self.current_span()
        } else {
            self.tokens[(self.pos - 1).min(self.tokens.len() - 1)].span
        }
    }

    fn error_here(&self, expected: &str) -> ParseError {
        let token = self.peek();
        ParseError::new(expected, token.kind.to_string(), token.span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::lexer::tokenize;
    use pretty_assertions::assert_eq;

    fn parse_source(source: &str) -> Program {
        parse(tokenize(source).expect("lex")).expect("parse")
    }

    fn main_body(source: &str) -> Block {
        let program = parse_source(&format!("fn main() {{ {source} }}"));
        match program.items.into_iter().next() {
            Some(Item::Function(decl)) => decl.body,
            other => panic!("expected a function, got {other:?}"),
        }
    }

    fn show(expr: &Expr) -> String {
        let list = |args: &[Expr]| {
            args.iter()
                .map(show)
                .collect::<Vec<_>>()
                .join(" ")
        };
        match &expr.kind {
            ExprKind::Literal(Literal::Int(value)) => value.to_string(),
            ExprKind::Literal(Literal::Bool(value)) => value.to_string(),
            ExprKind::Literal(Literal::String(value)) => format!("{value:?}"),
            ExprKind::Literal(other) => format!("{other:?}"),
            ExprKind::Identifier(ident) => ident.name.clone(),
            ExprKind::Unary { op, operand } => {
                let op = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "not",
                };
                format!("({op} {})", show(operand))
            }
            ExprKind::Binary { op, left, right } => {
                format!("({} {} {})", op.symbol(), show(left), show(right))
            }
            ExprKind::Assign { op, target, value } => {
                let op = op.binary().map(|op| op.symbol()).unwrap_or("");
                format!("({op}= {} {})", show(target), show(value))
            }
            ExprKind::Range {
                start,
                end,
                inclusive,
            } => {
                let op = if *inclusive { "..=" } else { ".." };
                format!("({op} {} {})", show(start), show(end))
            }
            ExprKind::Reference { mutable, operand } => {
                let op = if *mutable { "&@" } else { "&" };
                format!("({op} {})", show(operand))
            }
            ExprKind::Deref { operand, .. } => format!("(* {})", show(operand)),
            ExprKind::Call { callee, args, .. } => format!("(call {} {})", show(callee), list(args)),
            ExprKind::MethodCall {
                receiver,
                method,
                args,
                ..
            } => format!("(.{method} {} {})", show(receiver), list(args)),
            ExprKind::FieldAccess { base, field } => format!("(.{field} {})", show(base)),
            ExprKind::Index { base, index } => format!("([] {} {})", show(base), show(index)),
            ExprKind::VariantLiteral {
                qualifier,
                variant,
                args,
                ..
            } => {
                let qualifier = qualifier
                    .as_ref()
                    .map(|q| q.ty.canonical_name())
                    .unwrap_or_default();
                format!("({qualifier}::{variant} {})", list(args))
            }
            ExprKind::RecordLiteral { ty, fields } => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{}: {}", f.name, show(&f.value)))
                    .collect();
                format!("({} {{{}}})", ty.ty.canonical_name(), fields.join(", "))
            }
            ExprKind::ArrayLiteral(elements) => format!("[{}]", list(elements)),
            ExprKind::If { .. } => "if".into(),
            ExprKind::When { .. } => "when".into(),
            ExprKind::Block(_) => "block".into(),
            other => format!("{other:?}"),
        }
    }

    fn tail(source: &str) -> String {
        let body = main_body(source);
        show(body.tail().expect("tail expression"))
    }

    #[test]
    fn assignment_is_lowest_and_right_associative() {
        assert_eq!(tail("a = b = c + 1"), "(= a (= b (+ c 1)))");
        assert_eq!(tail("total += x * 2"), "(+= total (* x 2))");
        assert_eq!(tail("*r -= 1"), "(-= (* r) 1)");
    }

    #[test]
    fn binary_precedence_follows_the_table() {
        assert_eq!(
            tail("1 + 2 * 3 == 7 and not done or x"),
            "(or (and (== (+ 1 (* 2 3)) 7) (not done)) x)"
        );
        assert_eq!(tail("0..n + 1"), "(.. 0 (+ n 1))");
        assert_eq!(tail("a < b..=c"), "(< a (..= b c))");
        assert_eq!(tail("-x * -3"), "(* (- x) -3)");
    }

    #[test]
    fn postfix_binds_tighter_than_prefix() {
        assert_eq!(tail("x.y.z(1)[0]"), "([] (.z (.y x) 1) 0)");
        assert_eq!(tail("&@user.name"), "(&@ (.name user))");
        assert_eq!(tail("*r.age"), "(* (.age r))");
        assert_eq!(tail("f(a, g(b))"), "(call f a (call g b))");
    }

    #[test]
    fn generic_arguments_are_disambiguated_from_comparisons() {
        assert_eq!(tail("a < b"), "(< a b)");
        assert_eq!(tail("a < b > c"), "(> (< a b) c)");
        assert_eq!(
            tail("result<i32, string>::ok(1)"),
            "(result<i32, string>::ok 1)"
        );
        assert_eq!(tail("option::none"), "(option::none )");
    }

    #[test]
    fn record_literals_are_suppressed_in_conditions() {
        assert_eq!(
            tail("userProfile{name: \"ann\", age: 25}"),
            "(userProfile {name: \"ann\", age: 25})"
        );
        let body = main_body("if ready { 1 } else { 2 }");
        match &body.tail().expect("tail").kind {
            ExprKind::If {
                condition,
                else_branch,
                ..
            } => {
                assert_eq!(show(condition), "ready");
                assert!(else_branch.is_some());
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn trailing_expression_is_the_block_tail() {
        let with_tail = main_body("f(); 7");
        assert_eq!(with_tail.statements.len(), 2);
        assert_eq!(with_tail.tail().map(show), Some("7".to_string()));

        let without_tail = main_body("f(); 7;");
        assert!(without_tail.tail().is_none());
        assert!(without_tail.statements.iter().all(Statement::is_statement));
    }

    #[test]
    fn block_like_statements_may_omit_semicolons() {
        let body = main_body("if a { b(); } while c { } x");
        assert_eq!(body.statements.len(), 3);
        assert!(body.statements[0].is_statement());
        assert!(body.statements[1].is_statement());
        assert!(body.statements[2].is_expression_tail());
    }

    #[test]
    fn declarations_and_assignments() {
        let body = main_body("i32 x = 1; i32 @y = 2; @z = 3; w = 4; result<i32, string>& r = &v;");
        let summary: Vec<String> = body
            .statements
            .iter()
            .map(|stmt| match &stmt.kind {
                StmtKind::Let(decl) => format!(
                    "let {}{} : {}",
                    if decl.mutability.is_mutable() { "@" } else { "" },
                    decl.name,
                    decl.ty
                        .as_ref()
                        .map(|t| t.ty.canonical_name())
                        .unwrap_or_else(|| "_".into())
                ),
                StmtKind::Expr(expr) => show(expr),
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                "let x : i32",
                "let @y : i32",
                "let @z : _",
                "(= w 4)",
                "let r : result<i32, string>&",
            ]
        );
    }

    #[test]
    fn parses_top_level_items() {
        let program = parse_source(
            "record userProfile { string name; i32 age; }
             union result<T, E> { ok(T); err(E), none }
             patch userProfile { bool isAdult() { self.age >= 18 } }
             fn bump(i32& a, i32 @b) -> i32 { b += *a; b }",
        );
        assert_eq!(program.items.len(), 4);
        match &program.items[1] {
            Item::Union(decl) => {
                assert_eq!(decl.type_params, vec!["T", "E"]);
                let names: Vec<&str> = decl.variants.iter().map(|v| v.name.as_str()).collect();
                assert_eq!(names, vec!["ok", "err", "none"]);
                assert!(decl.variants[2].fields.is_empty());
            }
            other => panic!("expected union, got {other:?}"),
        }
        match &program.items[2] {
            Item::Patch(patch) => {
                assert_eq!(patch.methods[0].name, "isAdult");
                assert_eq!(
                    patch.methods[0].return_type.as_ref().map(|t| t.ty.canonical_name()),
                    Some("bool".to_string())
                );
            }
            other => panic!("expected patch, got {other:?}"),
        }
        match &program.items[3] {
            Item::Function(decl) => {
                assert_eq!(decl.params[0].ty.ty.canonical_name(), "i32&");
                assert!(decl.params[1].mutability.is_mutable());
                assert!(decl.return_type.is_some());
            }
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn when_arms_keep_source_order_and_pattern_shapes() {
        let body = main_body("when r { ok(v): v; result::err(_): 0; none: 1; -1: 2; else: { 3 } }");
        let ExprKind::When { arms, .. } = &body.tail().expect("tail").kind else {
            panic!("expected when");
        };
        let shapes: Vec<&str> = arms
            .iter()
            .map(|arm| match &arm.pattern {
                Pattern::Variant { qualifier: None, .. } => "variant",
                Pattern::Variant { .. } => "qualified",
                Pattern::Binding { .. } => "binding",
                Pattern::Literal(Literal::Int(-1), _) => "literal",
                Pattern::Else(_) => "else",
                _ => "other",
            })
            .collect();
        assert_eq!(shapes, vec!["variant", "qualified", "binding", "literal", "else"]);
    }

    #[test]
    fn expression_ids_are_unique() {
        let program = parse_source("fn main() { a = 1 + 2; b = a * 3; }");
        let body = match &program.items[0] {
            Item::Function(decl) => &decl.body,
            _ => unreachable!(),
        };
        let mut ids = Vec::new();
        fn collect(expr: &Expr, ids: &mut Vec<ExprId>) {
            ids.push(expr.id);
            match &expr.kind {
                ExprKind::Assign { target, value, .. } => {
                    collect(target, ids);
                    collect(value, ids);
                }
                ExprKind::Binary { left, right, .. } => {
                    collect(left, ids);
                    collect(right, ids);
                }
                _ => {}
            }
        }
        for stmt in &body.statements {
            if let StmtKind::Expr(expr) = &stmt.kind {
                collect(expr, &mut ids);
            }
        }
        let count = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), count);
        assert!(ids.iter().all(|id| *id < program.next_expr_id));
    }

    #[test]
    fn reports_expected_and_found() {
        let err = parse(tokenize("fn main() { x = ; }").expect("lex")).unwrap_err();
        assert_eq!(err.expected, "expression");
        assert_eq!(err.found, "`;`");
        assert_eq!(err.position(), 16);

        let err = parse(tokenize("fn main() { a b }").expect("lex")).unwrap_err();
        assert_eq!(err.expected, "`;`");
    }
}
