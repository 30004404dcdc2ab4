use crate::language::span::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Integer(i64),
    String(String),

    Component,
    Api,
    Native,
    Import,
    Export,
    Except,
    End,
    Let,
    Var,
    Fn,
    Trait,
    Object,
    Extends,
    Test,
    If,
    Else,
    While,
    Spawn,
    Throw,
    Try,
    Catch,
    SelfKw,
    True,
    False,
    As,

    ColonEq,
    EqEq,
    BangEq,
    LtEq,
    GtEq,
    AmpersandAmpersand,
    PipePipe,
    Ellipsis,
    Dot,
    Comma,
    Semi,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Gt,
    Eq,
    Bang,

    Eof,
}

impl TokenKind {
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        let kind = match ident {
            "component" => TokenKind::Component,
            "api" => TokenKind::Api,
            "native" => TokenKind::Native,
            "import" => TokenKind::Import,
            "export" => TokenKind::Export,
            "except" => TokenKind::Except,
            "end" => TokenKind::End,
            "let" => TokenKind::Let,
            "var" => TokenKind::Var,
            "fn" => TokenKind::Fn,
            "trait" => TokenKind::Trait,
            "object" => TokenKind::Object,
            "extends" => TokenKind::Extends,
            "test" => TokenKind::Test,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "spawn" => TokenKind::Spawn,
            "throw" => TokenKind::Throw,
            "try" => TokenKind::Try,
            "catch" => TokenKind::Catch,
            "self" => TokenKind::SelfKw,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "as" => TokenKind::As,
            _ => return None,
        };
        Some(kind)
    }

    pub fn describe(&self) -> String {
        match self {
            TokenKind::Identifier(name) => format!("identifier `{name}`"),
            TokenKind::Integer(value) => format!("integer `{value}`"),
            TokenKind::String(_) => "string literal".into(),
            TokenKind::Eof => "end of input".into(),
            other => format!("{other:?}"),
        }
    }
}
