use crate::language::{
    ast::*,
    errors::{SyntaxError, SyntaxErrors},
    lexer::lex,
    span::Span,
    token::{Token, TokenKind},
    types::{IntKind, Mutability, TypeAnnotation, TypeExpr},
};
use std::path::PathBuf;

pub fn parse_module(
    path: PathBuf,
    source: &str,
    ids: &mut NodeIdGen,
) -> Result<Module, SyntaxErrors> {
    let tokens = match lex(source) {
        Ok(tokens) => tokens,
        Err(errors) => {
            let errs = errors
                .into_iter()
                .map(|err| SyntaxError::new(err.message, err.span))
                .collect();
            return Err(SyntaxErrors::new(errs));
        }
    };
    Parser::new(path, tokens, ids).parse()
}

struct Parser<'a> {
    path: PathBuf,
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<SyntaxError>,
    ids: &'a mut NodeIdGen,
    suppress_struct_literal: bool,
}

#[derive(Debug)]
enum StatementOrTail {
    Statement(Statement),
    Tail(Expr),
}

struct Ident {
    name: String,
    span: Span,
}

impl<'a> Parser<'a> {
    fn new(path: PathBuf, mut tokens: Vec<Token>, ids: &'a mut NodeIdGen) -> Self {
        if tokens.is_empty() {
            tokens.push(Token {
                kind: TokenKind::Eof,
                span: Span::new(0, 0),
            });
        }
        Self {
            path,
            tokens,
            pos: 0,
            errors: Vec::new(),
            ids,
            suppress_struct_literal: false,
        }
    }

    fn parse(mut self) -> Result<Module, SyntaxErrors> {
        let mut imports = Vec::new();
        let mut items = Vec::new();

        while !self.is_eof() {
            if self.matches(TokenKind::Semi) {
                continue;
            }

            if self.check(TokenKind::Import) {
                match self.parse_import() {
                    Ok(import) => imports.push(import),
                    Err(err) => {
                        self.report(err);
                        self.synchronize_item();
                    }
                }
                continue;
            }

            match self.parse_item() {
                Ok(item) => items.push(item),
                Err(err) => {
                    self.report(err);
                    self.synchronize_item();
                }
            }
        }

        if self.errors.is_empty() {
            Ok(Module {
                path: self.path,
                imports,
                items,
            })
        } else {
            Err(SyntaxErrors::new(self.errors))
        }
    }

    fn parse_import(&mut self) -> Result<Import, SyntaxError> {
        let start = self.expect(TokenKind::Import)?.span.start;
        let first = self.expect_identifier("expected module path after `import`")?;
        let mut segments = vec![first.name];
        let mut kind = ImportKind::Module { alias: None };

        while self.matches(TokenKind::ColonColon) {
            if self.matches(TokenKind::LBrace) {
                let mut selectors = Vec::new();
                while !self.check(TokenKind::RBrace) && !self.is_eof() {
                    let name = self.expect_identifier("expected imported name")?;
                    let alias = if self.matches(TokenKind::As) {
                        Some(self.expect_identifier("expected alias after `as`")?)
                    } else {
                        None
                    };
                    let end = alias.as_ref().map(|a| a.span.end).unwrap_or(name.span.end);
                    selectors.push(ImportSelector {
                        name: name.name,
                        alias: alias.map(|a| a.name),
                        span: Span::new(name.span.start, end),
                    });
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBrace)?;
                kind = ImportKind::Named(selectors);
                break;
            }
            segments.push(self.expect_identifier("expected module path segment")?.name);
        }

        if matches!(kind, ImportKind::Module { .. }) && self.matches(TokenKind::As) {
            let alias = self.expect_identifier("expected alias after `as`")?;
            kind = ImportKind::Module {
                alias: Some(alias.name),
            };
        }
        let end = self.expect(TokenKind::Semi)?.span.end;
        Ok(Import {
            path: ImportPath { segments },
            kind,
            span: Span::new(start, end),
        })
    }

    fn parse_item(&mut self) -> Result<Item, SyntaxError> {
        let start = self.current_span_start();
        let visibility = self.parse_visibility();
        if self.matches(TokenKind::Struct) {
            return self.parse_struct(start, visibility).map(Item::Struct);
        }
        if self.matches(TokenKind::Enum) {
            return self.parse_enum(start, visibility).map(Item::Enum);
        }
        if self.matches(TokenKind::Trait) {
            return self.parse_trait(start, visibility).map(Item::Trait);
        }
        if self.matches(TokenKind::Fn) {
            return self.parse_function(start, visibility).map(Item::Function);
        }
        if self.matches(TokenKind::Const) {
            return self.parse_const(start, visibility).map(Item::Const);
        }
        if self.matches(TokenKind::Type) {
            return self.parse_type_alias(start, visibility).map(Item::TypeAlias);
        }
        if visibility == Visibility::Private && self.matches(TokenKind::Impl) {
            return self.parse_impl(start).map(Item::Impl);
        }
        Err(self.error_here("expected declaration"))
    }

    fn parse_visibility(&mut self) -> Visibility {
        if self.matches(TokenKind::Pub) {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }

    fn parse_type_params(&mut self) -> Result<Vec<String>, SyntaxError> {
        let mut params = Vec::new();
        if self.matches(TokenKind::LBracket) {
            while !self.check(TokenKind::RBracket) && !self.is_eof() {
                params.push(self.expect_identifier("expected type parameter")?.name);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RBracket)?;
        }
        Ok(params)
    }

    fn parse_struct(&mut self, start: usize, visibility: Visibility) -> Result<StructDef, SyntaxError> {
        let name = self.expect_identifier("expected struct name")?;
        let type_params = self.parse_type_params()?;
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();

        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            if self.matches(TokenKind::Comma) || self.matches(TokenKind::Semi) {
                continue;
            }
            let field_start = self.current_span_start();
            let field_visibility = self.parse_visibility();
            let ident = self.expect_identifier("expected field name")?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type_annotation()?;
            let end = ty.span.end;
            fields.push(StructField {
                name: ident.name,
                ty,
                visibility: field_visibility,
                span: Span::new(field_start, end),
            });
        }

        let end = self.expect(TokenKind::RBrace)?.span.end;
        Ok(StructDef {
            name: name.name,
            type_params,
            fields,
            span: Span::new(start, end),
            visibility,
        })
    }

    fn parse_enum(&mut self, start: usize, visibility: Visibility) -> Result<EnumDef, SyntaxError> {
        let name = self.expect_identifier("expected enum name")?;
        let type_params = self.parse_type_params()?;
        self.expect(TokenKind::LBrace)?;
        let mut variants = Vec::new();

        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            if self.matches(TokenKind::Comma) || self.matches(TokenKind::Semi) {
                continue;
            }
            let variant_name = self.expect_identifier("expected variant name")?;
            let mut fields = Vec::new();
            let mut end = variant_name.span.end;
            if self.matches(TokenKind::LParen) {
                while !self.check(TokenKind::RParen) && !self.is_eof() {
                    fields.push(self.parse_type_annotation()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                end = self.expect(TokenKind::RParen)?.span.end;
            }
            variants.push(EnumVariant {
                name: variant_name.name,
                fields,
                span: Span::new(variant_name.span.start, end),
            });
        }

        let end = self.expect(TokenKind::RBrace)?.span.end;
        Ok(EnumDef {
            name: name.name,
            type_params,
            variants,
            span: Span::new(start, end),
            visibility,
        })
    }

    fn parse_trait(&mut self, start: usize, visibility: Visibility) -> Result<TraitDef, SyntaxError> {
        let name = self.expect_identifier("expected trait name")?;
        self.expect(TokenKind::LBrace)?;
        let mut methods = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            let method_start = self.expect(TokenKind::Fn)?.span.start;
            let method_name = self.expect_identifier("expected method name")?;
            let params = self.parse_params()?;
            let ret = if self.matches(TokenKind::Arrow) {
                Some(self.parse_type_annotation()?)
            } else {
                None
            };
            let end = self.expect(TokenKind::Semi)?.span.end;
            methods.push(TraitMethod {
                name: method_name.name,
                params,
                ret,
                span: Span::new(method_start, end),
            });
        }
        let end = self.expect(TokenKind::RBrace)?.span.end;
        Ok(TraitDef {
            name: name.name,
            methods,
            span: Span::new(start, end),
            visibility,
        })
    }

    fn parse_impl(&mut self, start: usize) -> Result<ImplBlock, SyntaxError> {
        let first = self.parse_type_annotation()?;
        let (trait_name, target) = if self.matches(TokenKind::For) {
            (Some(first.ty), self.parse_type_annotation()?)
        } else {
            (None, first)
        };
        self.expect(TokenKind::LBrace)?;
        let mut methods = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            let method_start = self.current_span_start();
            let visibility = self.parse_visibility();
            self.expect(TokenKind::Fn)?;
            methods.push(self.parse_function(method_start, visibility)?);
        }
        let end = self.expect(TokenKind::RBrace)?.span.end;
        Ok(ImplBlock {
            trait_name,
            target,
            methods,
            span: Span::new(start, end),
        })
    }

    fn parse_function(&mut self, start: usize, visibility: Visibility) -> Result<FunctionDef, SyntaxError> {
        let name = self.expect_identifier("expected function name")?;
        let type_params = self.parse_type_params()?;
        let params = self.parse_params()?;
        let ret = if self.matches(TokenKind::Arrow) {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        let span = Span::new(start, body.span.end);
        Ok(FunctionDef {
            name: name.name,
            type_params,
            params,
            ret,
            body,
            span,
            visibility,
        })
    }

    fn parse_params(&mut self) -> Result<Vec<FunctionParam>, SyntaxError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) && !self.is_eof() {
            params.push(self.parse_param()?);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_param(&mut self) -> Result<FunctionParam, SyntaxError> {
        let span_start = self.current_span_start();
        let mutability = if self.matches(TokenKind::Mut) {
            Mutability::Mutable
        } else {
            Mutability::Immutable
        };
        let name = self.expect_identifier("expected parameter name")?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type_annotation()?;
        let span = Span::new(span_start, ty.span.end);
        Ok(FunctionParam {
            name: name.name,
            ty,
            mutability,
            span,
        })
    }

    fn parse_const(&mut self, start: usize, visibility: Visibility) -> Result<ConstDef, SyntaxError> {
        let name = self.expect_identifier("expected const name")?;
        let ty = if self.matches(TokenKind::Colon) {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };
        self.expect(TokenKind::Eq)?;
        let value = self.parse_expression()?;
        let end = self.expect(TokenKind::Semi)?.span.end;
        Ok(ConstDef {
            name: name.name,
            ty,
            value,
            span: Span::new(start, end),
            visibility,
        })
    }

    fn parse_type_alias(&mut self, start: usize, visibility: Visibility) -> Result<TypeAliasDef, SyntaxError> {
        let name = self.expect_identifier("expected type alias name")?;
        self.expect(TokenKind::Eq)?;
        let ty = self.parse_type_annotation()?;
        let end = self.expect(TokenKind::Semi)?.span.end;
        Ok(TypeAliasDef {
            name: name.name,
            ty,
            span: Span::new(start, end),
            visibility,
        })
    }

    fn parse_block(&mut self) -> Result<Block, SyntaxError> {
        let start = self.expect(TokenKind::LBrace)?.span.start;
        let outer = std::mem::replace(&mut self.suppress_struct_literal, false);
        let result = self.parse_block_contents();
        self.suppress_struct_literal = outer;
        let (statements, tail) = result?;
        let end = self.expect(TokenKind::RBrace)?.span.end;
        Ok(Block {
            statements,
            tail,
            span: Span::new(start, end),
        })
    }

    fn parse_block_contents(&mut self) -> Result<(Vec<Statement>, Option<Box<Expr>>), SyntaxError> {
        let mut statements = Vec::new();
        let mut tail = None;
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            if self.matches(TokenKind::Semi) {
                continue;
            }
            match self.parse_statement()? {
                StatementOrTail::Statement(stmt) => statements.push(stmt),
                StatementOrTail::Tail(expr) => {
                    tail = Some(Box::new(expr));
                    break;
                }
            }
        }
        Ok((statements, tail))
    }

    fn parse_statement(&mut self) -> Result<StatementOrTail, SyntaxError> {
        if self.matches(TokenKind::Let) {
            let start = self.previous_span().start;
            let stmt = self.parse_let(start)?;
            return Ok(StatementOrTail::Statement(Statement::Let(stmt)));
        }
        if self.matches(TokenKind::Return) {
            let stmt = self.parse_return()?;
            return Ok(StatementOrTail::Statement(Statement::Return(stmt)));
        }
        if self.matches(TokenKind::While) {
            let stmt = self.parse_while()?;
            return Ok(StatementOrTail::Statement(Statement::While(stmt)));
        }
        if self.matches(TokenKind::Break) {
            let span = self.previous_span();
            self.expect(TokenKind::Semi)?;
            return Ok(StatementOrTail::Statement(Statement::Break(span)));
        }
        if self.matches(TokenKind::Continue) {
            let span = self.previous_span();
            self.expect(TokenKind::Semi)?;
            return Ok(StatementOrTail::Statement(Statement::Continue(span)));
        }
        if self.matches(TokenKind::If) {
            let if_expr = self.parse_if()?;
            if if_expr.else_branch.is_some() && self.check(TokenKind::RBrace) {
                let span = if_expr.span;
                let expr = self.make_expr(ExprKind::If(Box::new(if_expr)), span);
                return Ok(StatementOrTail::Tail(expr));
            }
            self.matches(TokenKind::Semi);
            return Ok(StatementOrTail::Statement(Statement::If(if_expr)));
        }
        if self.check(TokenKind::LBrace) {
            let block = self.parse_block()?;
            if block.tail.is_some() && self.check(TokenKind::RBrace) {
                let span = block.span;
                let expr = self.make_expr(ExprKind::Block(Box::new(block)), span);
                return Ok(StatementOrTail::Tail(expr));
            }
            return Ok(StatementOrTail::Statement(Statement::Block(block)));
        }

        self.parse_expression_statement()
    }

    fn parse_expression_statement(&mut self) -> Result<StatementOrTail, SyntaxError> {
        let expr = self.parse_expression()?;
        if self.matches(TokenKind::Eq) {
            let value = self.parse_expression()?;
            let end = self.expect(TokenKind::Semi)?.span.end;
            let span = Span::new(expr.span.start, end);
            return self.assignment(expr, value, span).map(StatementOrTail::Statement);
        }
        if self.matches(TokenKind::Semi) {
            Ok(StatementOrTail::Statement(Statement::Expr(expr)))
        } else if self.check(TokenKind::RBrace) {
            Ok(StatementOrTail::Tail(expr))
        } else if matches!(expr.kind, ExprKind::Match(_) | ExprKind::Block(_)) {
            Ok(StatementOrTail::Statement(Statement::Expr(expr)))
        } else {
            Err(self.error_here("expected `;` after expression"))
        }
    }

    fn assignment(&mut self, target: Expr, value: Expr, span: Span) -> Result<Statement, SyntaxError> {
        let mut fields = Vec::new();
        let mut current = target;
        loop {
            match current.kind {
                ExprKind::Path(path) if path.is_simple() && path.type_args.is_empty() => {
                    let base = path.last().to_string();
                    if fields.is_empty() {
                        return Ok(Statement::Assign(AssignStmt {
                            target: base,
                            value,
                            span,
                        }));
                    }
                    fields.reverse();
                    return Ok(Statement::FieldAssign(FieldAssignStmt {
                        base,
                        fields,
                        value,
                        span,
                    }));
                }
                ExprKind::Member { base, name, .. } => {
                    fields.push(name);
                    current = *base;
                }
                _ => {
                    return Err(SyntaxError::new("invalid assignment target", current.span)
                        .with_help("assign to a local binding or one of its fields"));
                }
            }
        }
    }

    fn parse_let(&mut self, start: usize) -> Result<LetStmt, SyntaxError> {
        let mutability = if self.matches(TokenKind::Mut) {
            Mutability::Mutable
        } else {
            Mutability::Immutable
        };
        let name = self.expect_identifier("expected binding name")?;
        let ty = if self.matches(TokenKind::Colon) {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };
        let value = if self.matches(TokenKind::Eq) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let end = self.expect(TokenKind::Semi)?.span.end;
        Ok(LetStmt {
            id: self.ids.fresh(),
            name: name.name,
            ty,
            value,
            mutability,
            span: Span::new(start, end),
        })
    }

    fn parse_return(&mut self) -> Result<ReturnStmt, SyntaxError> {
        let start = self.previous_span().start;
        if self.matches(TokenKind::Semi) {
            return Ok(ReturnStmt {
                value: None,
                span: Span::new(start, self.previous_span().end),
            });
        }
        let value = self.parse_expression()?;
        let end = self.expect(TokenKind::Semi)?.span.end;
        Ok(ReturnStmt {
            value: Some(value),
            span: Span::new(start, end),
        })
    }

    fn parse_while(&mut self) -> Result<WhileStmt, SyntaxError> {
        let start = self.previous_span().start;
        let condition = self.parse_condition()?;
        let body = self.parse_block()?;
        let body_end = body.span.end;
        Ok(WhileStmt {
            condition,
            body,
            span: Span::new(start, body_end),
        })
    }

    fn parse_if(&mut self) -> Result<IfExpr, SyntaxError> {
        let start = self.previous_span().start;
        let condition = self.parse_condition()?;
        let then_branch = self.parse_block()?;
        let mut end = then_branch.span.end;
        let else_branch = if self.matches(TokenKind::Else) {
            if self.matches(TokenKind::If) {
                let nested = self.parse_if()?;
                end = nested.span.end;
                Some(ElseBranch::ElseIf(Box::new(nested)))
            } else {
                let block = self.parse_block()?;
                end = block.span.end;
                Some(ElseBranch::Block(block))
            }
        } else {
            None
        };
        Ok(IfExpr {
            condition,
            then_branch,
            else_branch,
            span: Span::new(start, end),
        })
    }

    /// Conditions and scrutinees are followed by a block, so `Name {` there
    /// opens the block rather than a struct literal.
    fn parse_condition(&mut self) -> Result<Expr, SyntaxError> {
        let outer = std::mem::replace(&mut self.suppress_struct_literal, true);
        let result = self.parse_expression();
        self.suppress_struct_literal = outer;
        result
    }

    fn parse_expression(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_cast()?;

        while let Some((op, prec)) = self.current_binary_op() {
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = self.parse_binary(prec + 1)?;
            let span = left.span.to(right.span);
            left = self.make_expr(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    fn parse_cast(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_unary()?;
        while self.matches(TokenKind::As) {
            let ty = self.parse_type_annotation()?;
            let span = expr.span.to(ty.span);
            expr = self.make_expr(
                ExprKind::Cast {
                    expr: Box::new(expr),
                    ty,
                },
                span,
            );
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Tilde => UnaryOp::BitNot,
            _ => return self.parse_postfix(),
        };
        let start = self.advance().span.start;
        if op == UnaryOp::Neg {
            if let TokenKind::Integer(value) = self.peek_kind() {
                // Negative literals fold here so `-128` fits an i8.
                let end = self.advance().span.end;
                return Ok(self.make_expr(
                    ExprKind::Literal(Literal::Int(-value)),
                    Span::new(start, end),
                ));
            }
        }
        let expr = self.parse_unary()?;
        let span = Span::new(start, expr.span.end);
        Ok(self.make_expr(
            ExprKind::Unary {
                op,
                expr: Box::new(expr),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.matches(TokenKind::LParen) {
                let args = self.parse_call_args()?;
                let end = self.previous_span().end;
                let span = Span::new(expr.span.start, end);
                expr = self.make_expr(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    span,
                );
                continue;
            }
            if self.matches(TokenKind::Dot) {
                let field = self.expect_identifier("expected member name after `.`")?;
                let span = expr.span.to(field.span);
                expr = self.make_expr(
                    ExprKind::Member {
                        base: Box::new(expr),
                        name: field.name,
                        name_span: field.span,
                    },
                    span,
                );
                continue;
            }
            break;
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let outer = std::mem::replace(&mut self.suppress_struct_literal, false);
        let mut args = Vec::new();
        let mut result = Ok(());
        while !self.check(TokenKind::RParen) && !self.is_eof() {
            match self.parse_expression() {
                Ok(arg) => args.push(arg),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.suppress_struct_literal = outer;
        result?;
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        if self.matches(TokenKind::Match) {
            return self.parse_match_expression();
        }
        if self.matches(TokenKind::If) {
            let if_expr = self.parse_if()?;
            let span = if_expr.span;
            return Ok(self.make_expr(ExprKind::If(Box::new(if_expr)), span));
        }
        if self.check(TokenKind::LBrace) {
            let block = self.parse_block()?;
            let span = block.span;
            return Ok(self.make_expr(ExprKind::Block(Box::new(block)), span));
        }

        match self.peek_kind() {
            TokenKind::Identifier(_) => self.parse_path_expression(),
            TokenKind::Integer(value) => {
                let span = self.advance().span;
                Ok(self.make_expr(ExprKind::Literal(Literal::Int(value)), span))
            }
            TokenKind::String(value) => {
                let span = self.advance().span;
                Ok(self.make_expr(ExprKind::Literal(Literal::String(value)), span))
            }
            TokenKind::True | TokenKind::False => {
                let value = self.check(TokenKind::True);
                let span = self.advance().span;
                Ok(self.make_expr(ExprKind::Literal(Literal::Bool(value)), span))
            }
            TokenKind::LParen => {
                self.advance();
                let outer = std::mem::replace(&mut self.suppress_struct_literal, false);
                let inner = self.parse_expression();
                self.suppress_struct_literal = outer;
                let inner = inner?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            other => Err(self.error_here(&format!("expected expression, found {other}"))),
        }
    }

    fn parse_path_expression(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.expect_identifier("expected identifier")?;
        let start = first.span.start;
        let mut end = first.span.end;
        let mut segments = vec![first.name];
        while self.matches(TokenKind::ColonColon) {
            let segment = self.expect_identifier("expected path segment after `::`")?;
            end = segment.span.end;
            segments.push(segment.name);
        }
        let mut type_args = Vec::new();
        if self.matches(TokenKind::LBracket) {
            while !self.check(TokenKind::RBracket) && !self.is_eof() {
                type_args.push(self.parse_type_annotation()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            end = self.expect(TokenKind::RBracket)?.span.end;
        }
        let path = PathExpr {
            segments,
            type_args,
        };
        let is_type_name = path.last().starts_with(|c: char| c.is_ascii_uppercase());
        if is_type_name && !self.suppress_struct_literal && self.check(TokenKind::LBrace) {
            return self.parse_struct_literal(path, start);
        }
        Ok(self.make_expr(ExprKind::Path(path), Span::new(start, end)))
    }

    fn parse_struct_literal(&mut self, path: PathExpr, start: usize) -> Result<Expr, SyntaxError> {
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            let name = self.expect_identifier("expected field name")?;
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expression()?;
            let span = name.span.to(value.span);
            fields.push(StructLiteralField {
                name: name.name,
                value,
                span,
            });
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        let end = self.expect(TokenKind::RBrace)?.span.end;
        Ok(self.make_expr(
            ExprKind::StructLiteral { path, fields },
            Span::new(start, end),
        ))
    }

    fn parse_match_expression(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.previous_span().start;
        let scrutinee = self.parse_condition()?;
        self.expect(TokenKind::LBrace)?;
        let mut arms = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            let pattern = self.parse_pattern()?;
            self.expect(TokenKind::FatArrow)?;
            let outer = std::mem::replace(&mut self.suppress_struct_literal, false);
            let body = self.parse_expression();
            self.suppress_struct_literal = outer;
            let body = body?;
            let span = pattern.span.to(body.span);
            arms.push(MatchArm {
                pattern,
                body,
                span,
            });
            if !self.matches(TokenKind::Comma) && !self.check(TokenKind::RBrace) {
                return Err(self.error_here("expected `,` between match arms"));
            }
        }
        let end = self.expect(TokenKind::RBrace)?.span.end;
        Ok(self.make_expr(
            ExprKind::Match(MatchExpr {
                scrutinee: Box::new(scrutinee),
                arms,
            }),
            Span::new(start, end),
        ))
    }

    fn parse_pattern(&mut self) -> Result<Pattern, SyntaxError> {
        let start = self.current_span_start();
        match self.peek_kind() {
            TokenKind::Underscore => {
                let span = self.advance().span;
                Ok(self.make_pattern(PatternKind::Wildcard, span))
            }
            TokenKind::Integer(value) => {
                let span = self.advance().span;
                Ok(self.make_pattern(PatternKind::Int(value), span))
            }
            TokenKind::Minus => {
                self.advance();
                match self.peek_kind() {
                    TokenKind::Integer(value) => {
                        let end = self.advance().span.end;
                        Ok(self.make_pattern(PatternKind::Int(-value), Span::new(start, end)))
                    }
                    _ => Err(self.error_here("expected integer after `-` in pattern")),
                }
            }
            TokenKind::True | TokenKind::False => {
                let value = self.check(TokenKind::True);
                let span = self.advance().span;
                Ok(self.make_pattern(PatternKind::Bool(value), span))
            }
            TokenKind::String(value) => {
                let span = self.advance().span;
                Ok(self.make_pattern(PatternKind::String(value), span))
            }
            TokenKind::Dot => {
                self.advance();
                self.parse_variant_pattern(None, start)
            }
            TokenKind::Identifier(_) => {
                let first = self.expect_identifier("expected pattern")?;
                if !self.check(TokenKind::ColonColon)
                    && !self.check(TokenKind::Dot)
                    && !self.check(TokenKind::LParen)
                {
                    return Ok(self.make_pattern(PatternKind::Bind(first.name), first.span));
                }
                if self.check(TokenKind::LParen) {
                    let variant = Ident {
                        name: first.name,
                        span: first.span,
                    };
                    return self.finish_variant_pattern(None, variant, start);
                }
                let mut segments = vec![first.name];
                while self.matches(TokenKind::ColonColon) {
                    segments.push(self.expect_identifier("expected path segment")?.name);
                }
                self.expect(TokenKind::Dot)?;
                let enum_path = PathExpr {
                    segments,
                    type_args: Vec::new(),
                };
                self.parse_variant_pattern(Some(enum_path), start)
            }
            other => Err(self.error_here(&format!("expected pattern, found {other}"))),
        }
    }

    fn parse_variant_pattern(
        &mut self,
        enum_path: Option<PathExpr>,
        start: usize,
    ) -> Result<Pattern, SyntaxError> {
        let variant = self.expect_identifier("expected variant name")?;
        self.finish_variant_pattern(enum_path, variant, start)
    }

    fn finish_variant_pattern(
        &mut self,
        enum_path: Option<PathExpr>,
        variant: Ident,
        start: usize,
    ) -> Result<Pattern, SyntaxError> {
        let mut fields = Vec::new();
        let mut end = variant.span.end;
        if self.matches(TokenKind::LParen) {
            while !self.check(TokenKind::RParen) && !self.is_eof() {
                fields.push(self.parse_pattern()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            end = self.expect(TokenKind::RParen)?.span.end;
        }
        Ok(self.make_pattern(
            PatternKind::Variant {
                enum_path,
                variant: variant.name,
                fields,
            },
            Span::new(start, end),
        ))
    }

    fn parse_type_annotation(&mut self) -> Result<TypeAnnotation, SyntaxError> {
        let start = self.current_span_start();
        let ty = self.parse_type_expr()?;
        let end = self.previous_span().end.max(start);
        Ok(TypeAnnotation {
            ty,
            span: Span::new(start, end),
        })
    }

    fn parse_type_expr(&mut self) -> Result<TypeExpr, SyntaxError> {
        if self.matches(TokenKind::LParen) {
            self.expect(TokenKind::RParen)?;
            return Ok(TypeExpr::Unit);
        }
        let start = self.current_span_start();
        let first = self.expect_identifier("expected type")?;
        let mut path = vec![first.name];
        while self.matches(TokenKind::ColonColon) {
            path.push(self.expect_identifier("expected type path segment")?.name);
        }
        if !self.check(TokenKind::LBracket) {
            return Ok(TypeExpr::Named {
                path,
                args: Vec::new(),
            });
        }
        if path.len() == 1 && IntKind::from_name(&path[0]).is_some() {
            let base_end = self.previous_span().end;
            self.expect(TokenKind::LBracket)?;
            let min = self.parse_expression()?;
            self.expect(TokenKind::DotDotEq)?;
            let max = self.parse_expression()?;
            self.expect(TokenKind::RBracket)?;
            let base = TypeAnnotation {
                ty: TypeExpr::Named {
                    path,
                    args: Vec::new(),
                },
                span: Span::new(start, base_end),
            };
            return Ok(TypeExpr::Range {
                base: Box::new(base),
                min: Box::new(min),
                max: Box::new(max),
            });
        }
        self.expect(TokenKind::LBracket)?;
        let mut args = Vec::new();
        while !self.check(TokenKind::RBracket) && !self.is_eof() {
            args.push(self.parse_type_annotation()?);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(TypeExpr::Named { path, args })
    }

    fn current_binary_op(&self) -> Option<(BinaryOp, u8)> {
        match self.peek_kind() {
            TokenKind::PipePipe => Some((BinaryOp::Or, 1)),
            TokenKind::AmpersandAmpersand => Some((BinaryOp::And, 2)),
            TokenKind::EqEq => Some((BinaryOp::Eq, 3)),
            TokenKind::BangEq => Some((BinaryOp::NotEq, 3)),
            TokenKind::Lt => Some((BinaryOp::Lt, 4)),
            TokenKind::LtEq => Some((BinaryOp::LtEq, 4)),
            TokenKind::Gt => Some((BinaryOp::Gt, 4)),
            TokenKind::GtEq => Some((BinaryOp::GtEq, 4)),
            TokenKind::Pipe => Some((BinaryOp::BitOr, 5)),
            TokenKind::Caret => Some((BinaryOp::BitXor, 6)),
            TokenKind::Ampersand => Some((BinaryOp::BitAnd, 7)),
            TokenKind::LtLt => Some((BinaryOp::Shl, 8)),
            TokenKind::GtGt => Some((BinaryOp::Shr, 8)),
            TokenKind::Plus => Some((BinaryOp::Add, 9)),
            TokenKind::Minus => Some((BinaryOp::Sub, 9)),
            TokenKind::Star => Some((BinaryOp::Mul, 10)),
            TokenKind::Slash => Some((BinaryOp::Div, 10)),
            TokenKind::Percent => Some((BinaryOp::Rem, 10)),
            _ => None,
        }
    }

    fn make_expr(&mut self, kind: ExprKind, span: Span) -> Expr {
        Expr {
            id: self.ids.fresh(),
            kind,
            span,
        }
    }

    fn make_pattern(&mut self, kind: PatternKind, span: Span) -> Pattern {
        Pattern {
            id: self.ids.fresh(),
            kind,
            span,
        }
    }

    fn expect_identifier(&mut self, msg: &str) -> Result<Ident, SyntaxError> {
        match self.peek_kind() {
            TokenKind::Identifier(name) => {
                let span = self.advance().span;
                Ok(Ident { name, span })
            }
            other => Err(self.error_here(&format!("{msg}, found {other}"))),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token, SyntaxError> {
        if self.check(kind.clone()) {
            Ok(self.advance())
        } else {
            let found = self.peek_kind();
            Err(self.error_here(&format!("expected {kind}, found {found}")))
        }
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn current(&self) -> &Token {
        let index = self.pos.min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn peek_kind(&self) -> TokenKind {
        self.current().kind.clone()
    }

    fn advance(&mut self) -> &Token {
        let index = self.pos.min(self.tokens.len() - 1);
        self.pos = (self.pos + 1).min(self.tokens.len());
        &self.tokens[index]
    }

    fn is_eof(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    fn current_span_start(&self) -> usize {
        self.current().span.start
    }

    fn previous_span(&self) -> Span {
        match self.pos.checked_sub(1) {
            Some(index) => self.tokens[index.min(self.tokens.len() - 1)].span,
            None => Span::new(0, 0),
        }
    }

    fn error_here(&self, message: &str) -> SyntaxError {
        SyntaxError::new(message.to_string(), self.current().span)
    }

    fn report(&mut self, err: SyntaxError) {
        self.errors.push(err);
    }

    fn synchronize_item(&mut self) {
        while !self.is_eof() {
            match self.peek_kind() {
                TokenKind::Struct
                | TokenKind::Enum
                | TokenKind::Fn
                | TokenKind::Const
                | TokenKind::Import
                | TokenKind::Trait
                | TokenKind::Impl
                | TokenKind::Type
                | TokenKind::Pub => return,
                _ => {
                    self.advance();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Module {
        let mut ids = NodeIdGen::new();
        parse_module(PathBuf::from("app/main.kl"), source, &mut ids).expect("parse")
    }

    fn parse_errors(source: &str) -> Vec<SyntaxError> {
        let mut ids = NodeIdGen::new();
        parse_module(PathBuf::from("app/main.kl"), source, &mut ids)
            .expect_err("should fail")
            .errors
    }

    fn only_function(module: &Module) -> &FunctionDef {
        match module.items.first() {
            Some(Item::Function(def)) => def,
            other => panic!("expected function, found {other:?}"),
        }
    }

    #[test]
    fn parses_all_import_forms() {
        let module = parse(
            "import util;\nimport util::strings as s;\nimport geo::{Point, dist as distance};\n",
        );
        assert_eq!(module.imports.len(), 3);
        assert!(matches!(module.imports[0].kind, ImportKind::Module { alias: None }));
        match &module.imports[1].kind {
            ImportKind::Module { alias } => assert_eq!(alias.as_deref(), Some("s")),
            other => panic!("unexpected {other:?}"),
        }
        match &module.imports[2].kind {
            ImportKind::Named(selectors) => {
                assert_eq!(module.imports[2].path.to_string(), "geo");
                assert_eq!(selectors[0].local_name(), "Point");
                assert_eq!(selectors[1].local_name(), "distance");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_generic_items_and_range_types() {
        let module = parse(
            "pub struct Pair[T] { pub a: T, b: T }\n\
             enum Opt[T] { Some(T), None }\n\
             type Small = i32[0..=9];\n\
             fn id[T](x: T) -> T { x }\n",
        );
        match &module.items[0] {
            Item::Struct(def) => {
                assert_eq!(def.type_params, vec!["T".to_string()]);
                assert!(def.visibility.is_public());
                assert!(def.fields[0].visibility.is_public());
                assert!(!def.fields[1].visibility.is_public());
            }
            other => panic!("unexpected {other:?}"),
        }
        match &module.items[2] {
            Item::TypeAlias(alias) => assert!(matches!(alias.ty.ty, TypeExpr::Range { .. })),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn comparisons_bind_looser_than_bit_operators() {
        let module = parse("fn f(a: i32) -> bool { a & 1 == 0 }");
        let tail = only_function(&module).body.tail.as_ref().expect("tail");
        match &tail.kind {
            ExprKind::Binary { op, left, .. } => {
                assert_eq!(*op, BinaryOp::Eq);
                assert!(matches!(
                    left.kind,
                    ExprKind::Binary {
                        op: BinaryOp::BitAnd,
                        ..
                    }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn condition_does_not_start_struct_literal() {
        let module = parse("fn f(Flag: bool) { if Flag { return; } }");
        let body = &only_function(&module).body;
        assert!(matches!(body.statements[0], Statement::If(_)));
    }

    #[test]
    fn parses_field_assignment_and_explicit_type_args() {
        let module = parse("fn f() { let mut p = Point { x: 1, y: 2 }; p.x = id[i32](3); }");
        let body = &only_function(&module).body;
        match &body.statements[1] {
            Statement::FieldAssign(stmt) => {
                assert_eq!(stmt.base, "p");
                assert_eq!(stmt.fields, vec!["x".to_string()]);
                match &stmt.value.kind {
                    ExprKind::Call { callee, .. } => match &callee.kind {
                        ExprKind::Path(path) => assert_eq!(path.type_args.len(), 1),
                        other => panic!("unexpected {other:?}"),
                    },
                    other => panic!("unexpected {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_match_patterns() {
        let module = parse(
            "fn f(e: E) -> i32 { match e { .A(v) => v, E.B => 1, Some(_) => 2, -3 => 3, _ => 0 } }",
        );
        let tail = only_function(&module).body.tail.as_ref().expect("tail");
        let ExprKind::Match(match_expr) = &tail.kind else {
            panic!("expected match");
        };
        assert_eq!(match_expr.arms.len(), 5);
        assert!(matches!(
            &match_expr.arms[0].pattern.kind,
            PatternKind::Variant { enum_path: None, variant, fields } if variant == "A" && fields.len() == 1
        ));
        assert!(matches!(
            &match_expr.arms[1].pattern.kind,
            PatternKind::Variant { enum_path: Some(_), variant, .. } if variant == "B"
        ));
        assert!(matches!(match_expr.arms[3].pattern.kind, PatternKind::Int(-3)));
        assert!(match_expr.arms[4].pattern.kind.is_catch_all());
    }

    #[test]
    fn negative_literals_fold() {
        let module = parse("const MIN: i8 = -128;");
        match &module.items[0] {
            Item::Const(def) => {
                assert!(matches!(def.value.kind, ExprKind::Literal(Literal::Int(-128))))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn node_ids_are_unique() {
        let mut ids = NodeIdGen::new();
        let a = parse_module(PathBuf::from("a.kl"), "fn f() -> i32 { 1 + 2 }", &mut ids)
            .expect("parse");
        let b = parse_module(PathBuf::from("b.kl"), "fn g() -> i32 { 3 }", &mut ids)
            .expect("parse");
        let first = match &a.items[0] {
            Item::Function(def) => def.body.tail.as_ref().map(|e| e.id),
            _ => None,
        };
        let second = match &b.items[0] {
            Item::Function(def) => def.body.tail.as_ref().map(|e| e.id),
            _ => None,
        };
        assert_ne!(first, second);
    }

    #[test]
    fn reports_errors_and_recovers_at_next_item() {
        let errors = parse_errors("fn f() { let = 1; }\nfn g() { 1 2 }\n");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("expected binding name"));
        assert!(errors[1].message.contains("expected `;`"));
    }
}
