use crate::language::{
    ast::*,
    errors::{SyntaxError, SyntaxErrors},
    lexer::tokenize,
    span::Span,
    token::{Token, TokenKind},
};
use std::path::PathBuf;
use std::sync::Arc;

pub fn parse_unit(path: Option<PathBuf>, source: &str) -> Result<CompilationUnit, SyntaxErrors> {
    let tokens = tokenize(source).map_err(SyntaxErrors::new)?;
    let mut parser = Parser::new(&tokens);
    let unit = parser.parse_unit(path);
    if parser.errors.is_empty() {
        unit.ok_or_else(|| {
            SyntaxErrors::new(vec![SyntaxError::new(
                "Could not parse compilation unit",
                Span::new(0, 0),
            )])
        })
    } else {
        Err(SyntaxErrors::new(parser.errors))
    }
}

pub fn parse_expression(source: &str) -> Result<Expr, SyntaxErrors> {
    let tokens = tokenize(source).map_err(SyntaxErrors::new)?;
    let mut parser = Parser::new(&tokens);
    let expr = parser
        .parse_expr()
        .and_then(|expr| parser.expect_eof().map(|_| expr));
    expr.map_err(|err| SyntaxErrors::new(vec![err]))
}

type ParseResult<T> = Result<T, SyntaxError>;

struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
    errors: Vec<SyntaxError>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            position: 0,
            errors: Vec::new(),
        }
    }

    fn parse_unit(&mut self, path: Option<PathBuf>) -> Option<CompilationUnit> {
        let start = self.peek().span;
        let native = self.eat(&TokenKind::Native);
        let kind = match self.peek_kind() {
            TokenKind::Component => UnitKind::Component,
            TokenKind::Api => UnitKind::Api,
            other => {
                let err = self
                    .error(
                        format!("Expected `component` or `api`, found {}", other.describe()),
                        self.peek().span,
                    )
                    .with_help("A source file starts with `component Name` or `api Name`");
                self.errors.push(err);
                return None;
            }
        };
        self.advance();
        let name = match self.qualified_name() {
            Ok(name) => name,
            Err(err) => {
                self.errors.push(err);
                return None;
            }
        };
        self.eat(&TokenKind::Semi);

        let mut imports = Vec::new();
        while self.check(&TokenKind::Import) {
            match self.parse_import() {
                Ok(import) => imports.push(import),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
        }

        let mut exports = Vec::new();
        while self.check(&TokenKind::Export) {
            match self.parse_export() {
                Ok(export) => exports.push(export),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
        }

        let mut decls = Vec::new();
        while !self.check(&TokenKind::End) && !self.is_at_end() {
            match self.parse_decl() {
                Ok(decl) => decls.push(decl),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
        }

        let end_span = self.peek().span;
        if let Err(err) = self.consume(&TokenKind::End, "Expected `end` to close the unit") {
            self.errors.push(err);
        }
        self.eat(&TokenKind::Semi);
        if let Err(err) = self.expect_eof() {
            self.errors.push(err);
        }

        Some(CompilationUnit {
            kind,
            name,
            native,
            path,
            imports,
            exports,
            decls,
            span: start.join(end_span),
        })
    }

    fn parse_import(&mut self) -> ParseResult<Import> {
        let start = self.consume(&TokenKind::Import, "Expected `import`")?;
        if self.eat(&TokenKind::Api) {
            let mut apis = vec![self.qualified_name()?];
            while self.eat(&TokenKind::Comma) {
                apis.push(self.qualified_name()?);
            }
            let end = self.consume(&TokenKind::Semi, "Expected `;` after import")?;
            return Ok(Import::Apis {
                apis,
                span: start.join(end),
            });
        }

        let api = self.qualified_name()?;
        self.consume(&TokenKind::Dot, "Expected `.{` after imported API name")?;
        self.consume(&TokenKind::LBrace, "Expected `{` to open the import list")?;
        if self.eat(&TokenKind::Ellipsis) {
            self.consume(&TokenKind::RBrace, "Expected `}` after `...`")?;
            let mut except = Vec::new();
            if self.eat(&TokenKind::Except) {
                self.consume(&TokenKind::LBrace, "Expected `{` after `except`")?;
                except = self.identifier_list(&TokenKind::RBrace)?;
                self.consume(&TokenKind::RBrace, "Expected `}` to close the except list")?;
            }
            let end = self.consume(&TokenKind::Semi, "Expected `;` after import")?;
            return Ok(Import::Star {
                api,
                except,
                span: start.join(end),
            });
        }

        let mut names = Vec::new();
        loop {
            let name = self.identifier("Expected an imported name")?;
            let alias = if self.eat(&TokenKind::As) {
                Some(self.identifier("Expected an alias after `as`")?)
            } else {
                None
            };
            names.push(AliasedName { name, alias });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RBrace, "Expected `}` to close the import list")?;
        let end = self.consume(&TokenKind::Semi, "Expected `;` after import")?;
        Ok(Import::Names {
            api,
            names,
            span: start.join(end),
        })
    }

    fn parse_export(&mut self) -> ParseResult<Export> {
        let start = self.consume(&TokenKind::Export, "Expected `export`")?;
        let mut apis = vec![self.qualified_name()?];
        while self.eat(&TokenKind::Comma) {
            apis.push(self.qualified_name()?);
        }
        let end = self.consume(&TokenKind::Semi, "Expected `;` after export")?;
        Ok(Export {
            apis,
            span: start.join(end),
        })
    }

    fn parse_decl(&mut self) -> ParseResult<Decl> {
        match self.peek_kind() {
            TokenKind::Let => Ok(Decl::Let(self.parse_value_decl()?)),
            TokenKind::Var => Ok(Decl::Var(self.parse_value_decl()?)),
            TokenKind::Fn => Ok(Decl::Function(self.parse_function()?)),
            TokenKind::Test => {
                let start = self.advance().span;
                let name = self.identifier("Expected a test name")?;
                self.consume(&TokenKind::LParen, "Expected `(` after test name")?;
                self.consume(&TokenKind::RParen, "Tests take no parameters")?;
                self.consume(&TokenKind::Eq, "Expected `=` before the test body")?;
                let body = self.parse_expr()?;
                let end = self.consume(&TokenKind::Semi, "Expected `;` after test body")?;
                Ok(Decl::Test(FunctionDecl {
                    name,
                    params: Vec::new(),
                    body: Some(Arc::new(body)),
                    span: start.join(end),
                }))
            }
            TokenKind::Trait => {
                let start = self.advance().span;
                let name = self.identifier("Expected a trait name")?;
                let extends = self.parse_extends()?;
                let methods = self.parse_methods()?;
                let end = self.consume(&TokenKind::End, "Expected `end` to close the trait")?;
                Ok(Decl::Trait(TraitDecl {
                    name,
                    extends,
                    methods,
                    span: start.join(end),
                }))
            }
            TokenKind::Object => {
                let start = self.advance().span;
                let name = self.identifier("Expected an object name")?;
                let params = if self.eat(&TokenKind::LParen) {
                    let params = self.parameter_list()?;
                    self.consume(&TokenKind::RParen, "Expected `)` after object parameters")?;
                    Some(params)
                } else {
                    None
                };
                let extends = self.parse_extends()?;
                let methods = self.parse_methods()?;
                let end = self.consume(&TokenKind::End, "Expected `end` to close the object")?;
                Ok(Decl::Object(ObjectDecl {
                    name,
                    params,
                    extends,
                    methods,
                    span: start.join(end),
                }))
            }
            other => Err(self
                .error(
                    format!("Expected a declaration, found {}", other.describe()),
                    self.peek().span,
                )
                .with_help("Declarations start with let, var, fn, trait, object or test")),
        }
    }

    fn parse_value_decl(&mut self) -> ParseResult<ValueDecl> {
        let start = self.advance().span;
        let name = self.identifier("Expected a name after `let`/`var`")?;
        let init = if self.eat(&TokenKind::Eq) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let end = self.consume_with_help(
            &TokenKind::Semi,
            "Expected `;` after declaration",
            format!("Try: let {name} = <value>;"),
        )?;
        Ok(ValueDecl {
            name,
            init,
            span: start.join(end),
        })
    }

    fn parse_function(&mut self) -> ParseResult<FunctionDecl> {
        let start = self.consume(&TokenKind::Fn, "Expected `fn`")?;
        let name = self.identifier("Expected a function name")?;
        self.consume(&TokenKind::LParen, "Expected `(` after function name")?;
        let params = self.parameter_list()?;
        self.consume(&TokenKind::RParen, "Expected `)` after parameters")?;
        let body = if self.eat(&TokenKind::Eq) {
            Some(Arc::new(self.parse_expr()?))
        } else {
            None
        };
        let end = self.consume(&TokenKind::Semi, "Expected `;` after function declaration")?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            span: start.join(end),
        })
    }

    fn parse_extends(&mut self) -> ParseResult<Vec<String>> {
        if !self.eat(&TokenKind::Extends) {
            return Ok(Vec::new());
        }
        self.consume(&TokenKind::LBrace, "Expected `{` after `extends`")?;
        let names = self.identifier_list(&TokenKind::RBrace)?;
        self.consume(&TokenKind::RBrace, "Expected `}` to close the extends list")?;
        Ok(names)
    }

    fn parse_methods(&mut self) -> ParseResult<Vec<FunctionDecl>> {
        let mut methods = Vec::new();
        while self.check(&TokenKind::Fn) {
            methods.push(self.parse_function()?);
        }
        Ok(methods)
    }

    fn parameter_list(&mut self) -> ParseResult<Vec<String>> {
        let mut params = Vec::new();
        if self.check(&TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            if self.eat(&TokenKind::SelfKw) {
                params.push("self".to_string());
            } else {
                params.push(self.identifier("Expected a parameter name")?);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn identifier_list(&mut self, terminator: &TokenKind) -> ParseResult<Vec<String>> {
        let mut names = Vec::new();
        if self.check(terminator) {
            return Ok(names);
        }
        loop {
            names.push(self.identifier("Expected a name")?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(names)
    }

    fn qualified_name(&mut self) -> ParseResult<String> {
        let mut name = self.identifier("Expected a qualified name")?;
        while self.check(&TokenKind::Dot)
            && matches!(self.peek_at(1), Some(TokenKind::Identifier(_)))
        {
            self.advance();
            name.push('.');
            name.push_str(&self.identifier("Expected a name segment")?);
        }
        Ok(name)
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        if let TokenKind::Identifier(name) = self.peek_kind() {
            if matches!(self.peek_at(1), Some(TokenKind::ColonEq)) {
                let name = name.clone();
                let start = self.advance().span;
                self.advance();
                let value = self.parse_expr()?;
                let span = start.join(value.span);
                return Ok(Expr::new(
                    ExprKind::Assign {
                        name,
                        value: Box::new(value),
                    },
                    span,
                ));
            }
        }
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> ParseResult<Expr> {
        let mut left = self.parse_unary()?;
        while let Some((op, precedence)) = binary_operator(self.peek_kind()) {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_binary(precedence + 1)?;
            let span = left.span.join(right.span);
            left = Expr::new(
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

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        let start = self.advance().span;
        let operand = self.parse_unary()?;
        let span = start.join(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(&TokenKind::LParen) {
                self.advance();
                let args = self.argument_list()?;
                let end = self.consume(&TokenKind::RParen, "Expected `)` after arguments")?;
                let span = expr.span.join(end);
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    span,
                );
            } else if self.check(&TokenKind::Dot) {
                self.advance();
                let name = self.identifier("Expected a member name after `.`")?;
                if self.eat(&TokenKind::LParen) {
                    let args = self.argument_list()?;
                    let end = self.consume(&TokenKind::RParen, "Expected `)` after arguments")?;
                    let span = expr.span.join(end);
                    expr = Expr::new(
                        ExprKind::MethodCall {
                            receiver: Box::new(expr),
                            method: name,
                            args,
                        },
                        span,
                    );
                } else {
                    let span = expr.span.join(self.previous_span());
                    expr = Expr::new(
                        ExprKind::Field {
                            target: Box::new(expr),
                            name,
                        },
                        span,
                    );
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn argument_list(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.check(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        let span = token.span;
        match token.kind {
            TokenKind::Integer(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::Int(value), span))
            }
            TokenKind::String(text) => {
                self.advance();
                Ok(Expr::new(ExprKind::Str(text), span))
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                Ok(Expr::new(
                    ExprKind::Bool(token.kind == TokenKind::True),
                    span,
                ))
            }
            TokenKind::SelfKw => {
                self.advance();
                Ok(Expr::new(ExprKind::SelfRef, span))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::new(ExprKind::Ident(name), span))
            }
            TokenKind::LParen => {
                self.advance();
                if self.check(&TokenKind::RParen) {
                    let end = self.advance().span;
                    return Ok(Expr::new(ExprKind::Unit, span.join(end)));
                }
                let first = self.parse_expr()?;
                if self.check(&TokenKind::Comma) {
                    let mut items = vec![first];
                    while self.eat(&TokenKind::Comma) {
                        items.push(self.parse_expr()?);
                    }
                    let end = self.consume(&TokenKind::RParen, "Expected `)` after tuple")?;
                    return Ok(Expr::new(ExprKind::Tuple(items), span.join(end)));
                }
                let end = self.consume(&TokenKind::RParen, "Expected `)` after expression")?;
                Ok(Expr::new(first.kind, span.join(end)))
            }
            TokenKind::LBrace => self.parse_block(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                self.advance();
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                let full = span.join(body.span);
                Ok(Expr::new(
                    ExprKind::While {
                        cond: Box::new(cond),
                        body: Box::new(body),
                    },
                    full,
                ))
            }
            TokenKind::Spawn => {
                self.advance();
                let body = self.parse_postfix()?;
                let full = span.join(body.span);
                Ok(Expr::new(ExprKind::Spawn(Arc::new(body)), full))
            }
            TokenKind::Throw => {
                self.advance();
                let value = self.parse_expr()?;
                let full = span.join(value.span);
                Ok(Expr::new(ExprKind::Throw(Box::new(value)), full))
            }
            TokenKind::Try => {
                self.advance();
                let body = self.parse_block()?;
                self.consume(&TokenKind::Catch, "Expected `catch` after try block")?;
                let binder = self.identifier("Expected a name to bind the caught error")?;
                let handler = self.parse_block()?;
                let full = span.join(handler.span);
                Ok(Expr::new(
                    ExprKind::Try {
                        body: Box::new(body),
                        binder,
                        handler: Box::new(handler),
                    },
                    full,
                ))
            }
            other => Err(self.error(
                format!("Unexpected {} in expression", other.describe()),
                span,
            )),
        }
    }

    fn parse_if(&mut self) -> ParseResult<Expr> {
        let start = self.consume(&TokenKind::If, "Expected `if`")?;
        let cond = self.parse_expr()?;
        let then_branch = self.parse_block()?;
        let mut span = start.join(then_branch.span);
        let else_branch = if self.eat(&TokenKind::Else) {
            let branch = if self.check(&TokenKind::If) {
                self.parse_if()?
            } else {
                self.parse_block()?
            };
            span = span.join(branch.span);
            Some(Box::new(branch))
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch,
            },
            span,
        ))
    }

    fn parse_block(&mut self) -> ParseResult<Expr> {
        let start = self.consume(&TokenKind::LBrace, "Expected `{` to open a block")?;
        let mut stmts = Vec::new();
        let mut result = None;
        while !self.check(&TokenKind::RBrace) {
            if self.is_at_end() {
                return Err(self.error("Unterminated block", start));
            }
            if self.check(&TokenKind::Let) || self.check(&TokenKind::Var) {
                let mutable = self.check(&TokenKind::Var);
                let let_start = self.advance().span;
                let name = self.identifier("Expected a local name")?;
                self.consume(&TokenKind::Eq, "Expected `=` in local binding")?;
                let value = self.parse_expr()?;
                let end = self.consume(&TokenKind::Semi, "Expected `;` after local binding")?;
                stmts.push(Stmt::Let {
                    name,
                    mutable,
                    value,
                    span: let_start.join(end),
                });
                continue;
            }
            let expr = self.parse_expr()?;
            if self.eat(&TokenKind::Semi) {
                stmts.push(Stmt::Expr(expr));
            } else if self.check(&TokenKind::RBrace) {
                result = Some(Box::new(expr));
            } else if is_block_like(&expr) {
                stmts.push(Stmt::Expr(expr));
            } else {
                return Err(self.error(
                    format!(
                        "Expected `;` or `}}` after expression, found {}",
                        self.peek_kind().describe()
                    ),
                    self.peek().span,
                ));
            }
        }
        let end = self.consume(&TokenKind::RBrace, "Expected `}` to close the block")?;
        Ok(Expr::new(ExprKind::Block { stmts, result }, start.join(end)))
    }

    fn identifier(&mut self, message: &str) -> ParseResult<String> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(
                format!("{message}, found {}", other.describe()),
                self.peek().span,
            )),
        }
    }

    fn consume(&mut self, expected: &TokenKind, message: &str) -> ParseResult<Span> {
        if self.check(expected) {
            Ok(self.advance().span)
        } else {
            Err(self.error(
                format!("{message}, found {}", self.peek_kind().describe()),
                self.peek().span,
            ))
        }
    }

    fn consume_with_help(
        &mut self,
        expected: &TokenKind,
        message: &str,
        help: String,
    ) -> ParseResult<Span> {
        self.consume(expected, message)
            .map_err(|err| err.with_help(help))
    }

    fn expect_eof(&mut self) -> ParseResult<()> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.error(
                format!("Unexpected {} after end of unit", self.peek_kind().describe()),
                self.peek().span,
            ))
        }
    }

    fn eat(&mut self, expected: &TokenKind) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, expected: &TokenKind) -> bool {
        self.peek_kind() == expected
    }

    fn peek(&self) -> &'a Token {
        let index = self.position.min(self.tokens.len().saturating_sub(1));
        &self.tokens[index]
    }

    fn peek_kind(&self) -> &'a TokenKind {
        &self.peek().kind
    }

    fn peek_at(&self, offset: usize) -> Option<&'a TokenKind> {
        self.tokens.get(self.position + offset).map(|token| &token.kind)
    }

    fn advance(&mut self) -> &'a Token {
        let token = self.peek();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn previous_span(&self) -> Span {
        self.position
            .checked_sub(1)
            .and_then(|index| self.tokens.get(index))
            .map(|token| token.span)
            .unwrap_or_default()
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn error(&self, message: impl Into<String>, span: Span) -> SyntaxError {
        SyntaxError::new(message, span)
    }

    fn synchronize(&mut self) {
        while !self.is_at_end() {
            match self.peek_kind() {
                TokenKind::Semi => {
                    self.advance();
                    return;
                }
                TokenKind::Let
                | TokenKind::Var
                | TokenKind::Fn
                | TokenKind::Trait
                | TokenKind::Object
                | TokenKind::Test
                | TokenKind::End => return,
                _ => {
                    self.advance();
                }
            }
        }
    }
}

fn binary_operator(kind: &TokenKind) -> Option<(BinaryOp, u8)> {
    let entry = match kind {
        TokenKind::PipePipe => (BinaryOp::Or, 1),
        TokenKind::AmpersandAmpersand => (BinaryOp::And, 2),
        TokenKind::EqEq => (BinaryOp::Eq, 3),
        TokenKind::BangEq => (BinaryOp::NotEq, 3),
        TokenKind::Lt => (BinaryOp::Lt, 4),
        TokenKind::LtEq => (BinaryOp::LtEq, 4),
        TokenKind::Gt => (BinaryOp::Gt, 4),
        TokenKind::GtEq => (BinaryOp::GtEq, 4),
        TokenKind::Plus => (BinaryOp::Add, 5),
        TokenKind::Minus => (BinaryOp::Sub, 5),
        TokenKind::Star => (BinaryOp::Mul, 6),
        TokenKind::Slash => (BinaryOp::Div, 6),
        TokenKind::Percent => (BinaryOp::Rem, 6),
        _ => return None,
    };
    Some(entry)
}

fn is_block_like(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Block { .. } | ExprKind::If { .. } | ExprKind::While { .. } | ExprKind::Try { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_component_header_imports_and_exports() {
        let source = r#"
            component Geometry.Main
            import Shapes.{ Circle, area as areaOf };
            import Util.{...} except { helper };
            export Executable;
            fn run() = areaOf(Circle(2));
            end
        "#;
        let unit = parse_unit(None, source).expect("parse");
        assert_eq!(unit.name, "Geometry.Main");
        assert!(unit.is_component());
        assert_eq!(unit.imports.len(), 2);
        match &unit.imports[0] {
            Import::Names { api, names, .. } => {
                assert_eq!(api, "Shapes");
                assert_eq!(names[1].visible_name(), "areaOf");
            }
            other => panic!("unexpected import {other:?}"),
        }
        match &unit.imports[1] {
            Import::Star { except, .. } => assert_eq!(except, &vec!["helper".to_string()]),
            other => panic!("unexpected import {other:?}"),
        }
        assert_eq!(unit.exported_api_names(), vec!["Executable".to_string()]);
    }

    #[test]
    fn parses_traits_objects_and_functional_methods() {
        let source = r#"
            api Shapes
            trait Shape extends { Named }
              fn area(self);
              fn describe();
            end
            object Circle(r) extends { Shape } end
            end
        "#;
        let unit = parse_unit(None, source).expect("parse");
        let Decl::Trait(shape) = &unit.decls[0] else {
            panic!("expected trait");
        };
        assert_eq!(shape.extends, vec!["Named".to_string()]);
        assert!(shape.methods[0].is_functional());
        assert!(!shape.methods[1].is_functional());
        assert!(shape.methods[1].is_abstract());
        let Decl::Object(circle) = &unit.decls[1] else {
            panic!("expected object");
        };
        assert_eq!(circle.params.as_deref(), Some(&["r".to_string()][..]));
    }

    #[test]
    fn block_allows_trailing_expression_and_statement_forms() {
        let expr = parse_expression("{ var i = 0; while i < 3 { i := i + 1; } i }").expect("parse");
        let ExprKind::Block { stmts, result } = expr.kind else {
            panic!("expected block");
        };
        assert_eq!(stmts.len(), 2);
        assert!(result.is_some());
    }

    #[test]
    fn precedence_binds_multiplication_tighter_than_addition() {
        let expr = parse_expression("1 + 2 * 3").expect("parse");
        let ExprKind::Binary { op, right, .. } = expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn recovers_and_reports_multiple_errors() {
        let source = "component Broken let x = ; let y = 2 fn f() = 1; end";
        let errors = parse_unit(None, source).expect_err("should fail");
        assert!(errors.errors.len() >= 2);
    }
}
