use crate::language::{
    errors::SyntaxError,
    span::Span,
    token::{Token, TokenKind},
};
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace1, not_line_ending},
    combinator::{map, map_res, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair},
    IResult, Parser as NomParser,
};

pub fn tokenize(source: &str) -> Result<Vec<Token>, Vec<SyntaxError>> {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut remaining = source;

    loop {
        remaining = skip_trivia(remaining);
        let offset = source.len() - remaining.len();
        if remaining.is_empty() {
            tokens.push(Token {
                kind: TokenKind::Eof,
                span: Span::new(offset, offset),
            });
            break;
        }

        match lex_token(remaining) {
            Ok((rest, kind)) => {
                let end = source.len() - rest.len();
                tokens.push(Token {
                    kind,
                    span: Span::new(offset, end),
                });
                remaining = rest;
            }
            Err(_) => {
                let ch = remaining.chars().next().unwrap_or('\0');
                let width = if ch.is_ascii_digit() {
                    remaining.bytes().take_while(u8::is_ascii_digit).count()
                } else {
                    ch.len_utf8().max(1)
                };
                let span = Span::new(offset, offset + width);
                let err = if ch == '"' {
                    SyntaxError::new("Unterminated or malformed string literal", span)
                        .with_help("Supported escapes are \\\" \\\\ \\n and \\t")
                } else if ch.is_ascii_digit() {
                    SyntaxError::new("Integer literal does not fit in 64 bits", span)
                } else {
                    SyntaxError::new(format!("Unexpected character `{ch}`"), span)
                };
                errors.push(err);
                remaining = &remaining[width.min(remaining.len())..];
            }
        }
    }

    if errors.is_empty() {
        Ok(tokens)
    } else {
        Err(errors)
    }
}

fn skip_trivia(input: &str) -> &str {
    let trivia: IResult<&str, Vec<&str>> = many0(alt((
        multispace1,
        recognize(pair(tag("//"), not_line_ending)),
    )))
    .parse(input);
    match trivia {
        Ok((rest, _)) => rest,
        Err(_) => input,
    }
}

fn lex_token(input: &str) -> IResult<&str, TokenKind> {
    alt((parse_word, parse_integer, parse_string, parse_symbol)).parse(input)
}

fn parse_word(input: &str) -> IResult<&str, TokenKind> {
    let (input, word) = recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)?;
    let kind = TokenKind::keyword(word).unwrap_or_else(|| TokenKind::Identifier(word.to_string()));
    Ok((input, kind))
}

fn parse_integer(input: &str) -> IResult<&str, TokenKind> {
    map(map_res(digit1, |digits: &str| digits.parse::<i64>()), TokenKind::Integer).parse(input)
}

fn parse_string(input: &str) -> IResult<&str, TokenKind> {
    let escapes = alt((
        value("\\", tag("\\")),
        value("\"", tag("\"")),
        value("\n", tag("n")),
        value("\t", tag("t")),
    ));
    let body = opt(escaped_transform(is_not("\\\""), '\\', escapes));
    map(delimited(char('"'), body, char('"')), |text: Option<String>| {
        TokenKind::String(text.unwrap_or_default())
    })
    .parse(input)
}

fn parse_symbol(input: &str) -> IResult<&str, TokenKind> {
    let compound = alt((
        value(TokenKind::ColonEq, tag(":=")),
        value(TokenKind::EqEq, tag("==")),
        value(TokenKind::BangEq, tag("!=")),
        value(TokenKind::LtEq, tag("<=")),
        value(TokenKind::GtEq, tag(">=")),
        value(TokenKind::AmpersandAmpersand, tag("&&")),
        value(TokenKind::PipePipe, tag("||")),
        value(TokenKind::Ellipsis, tag("...")),
    ));
    let single = alt((
        value(TokenKind::Dot, char('.')),
        value(TokenKind::Comma, char(',')),
        value(TokenKind::Semi, char(';')),
        value(TokenKind::LParen, char('(')),
        value(TokenKind::RParen, char(')')),
        value(TokenKind::LBrace, char('{')),
        value(TokenKind::RBrace, char('}')),
        value(TokenKind::Plus, char('+')),
        value(TokenKind::Minus, char('-')),
        value(TokenKind::Star, char('*')),
        value(TokenKind::Slash, char('/')),
        value(TokenKind::Percent, char('%')),
        value(TokenKind::Lt, char('<')),
        value(TokenKind::Gt, char('>')),
        value(TokenKind::Eq, char('=')),
        value(TokenKind::Bang, char('!')),
    ));
    alt((compound, single)).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .expect("tokenize")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn keywords_and_identifiers_are_distinguished() {
        assert_eq!(
            kinds("component Main end counter_2"),
            vec![
                TokenKind::Component,
                TokenKind::Identifier("Main".into()),
                TokenKind::End,
                TokenKind::Identifier("counter_2".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn compound_symbols_win_over_single_characters() {
        assert_eq!(
            kinds("x := a <= b ... c"),
            vec![
                TokenKind::Identifier("x".into()),
                TokenKind::ColonEq,
                TokenKind::Identifier("a".into()),
                TokenKind::LtEq,
                TokenKind::Identifier("b".into()),
                TokenKind::Ellipsis,
                TokenKind::Identifier("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_support_escapes_and_empty_literals() {
        assert_eq!(
            kinds(r#""a\"b\n" """#),
            vec![
                TokenKind::String("a\"b\n".into()),
                TokenKind::String(String::new()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_spans_track_offsets() {
        let tokens = tokenize("// header\n  42").expect("tokenize");
        assert_eq!(tokens[0].kind, TokenKind::Integer(42));
        assert_eq!(tokens[0].span, Span::new(12, 14));
    }

    #[test]
    fn unexpected_characters_are_reported() {
        let errors = tokenize("let x = 1 # 2;").expect_err("should fail");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains('#'));
    }
}
