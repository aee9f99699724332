use crate::language::{
    span::Span,
    token::{Token, TokenKind},
};
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_until, take_while, take_while1},
    character::complete::{char, digit1, multispace1, none_of, one_of, satisfy},
    combinator::{map, map_opt, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult,
};

#[derive(Clone, Debug)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

pub fn lex(source: &str) -> Result<Vec<Token>, Vec<LexError>> {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut remaining = source;

    loop {
        if let Ok((rest, _)) = trivia(remaining) {
            remaining = rest;
        }
        let offset = source.len() - remaining.len();
        if remaining.is_empty() {
            tokens.push(Token {
                kind: TokenKind::Eof,
                span: Span::new(offset, offset),
            });
            break;
        }
        if remaining.starts_with("/*") {
            errors.push(LexError {
                message: "unterminated block comment".into(),
                span: Span::new(offset, source.len()),
            });
            break;
        }

        if let Ok((rest, text)) = number_text(remaining) {
            let end = source.len() - rest.len();
            match parse_integer(text) {
                Some(value) => tokens.push(Token {
                    kind: TokenKind::Integer(value),
                    span: Span::new(offset, end),
                }),
                None => errors.push(LexError {
                    message: format!("integer literal `{text}` is too large"),
                    span: Span::new(offset, end),
                }),
            }
            remaining = rest;
            continue;
        }

        if remaining.starts_with('"') {
            match string_literal(remaining) {
                Ok((rest, text)) => {
                    let end = source.len() - rest.len();
                    tokens.push(Token {
                        kind: TokenKind::String(text),
                        span: Span::new(offset, end),
                    });
                    remaining = rest;
                    continue;
                }
                Err(_) => {
                    errors.push(LexError {
                        message: "unterminated string literal".into(),
                        span: Span::new(offset, source.len()),
                    });
                    break;
                }
            }
        }

        match alt((identifier_or_keyword, symbol))(remaining) {
            Ok((rest, kind)) => {
                let end = source.len() - rest.len();
                tokens.push(Token {
                    kind,
                    span: Span::new(offset, end),
                });
                remaining = rest;
            }
            Err(_) => {
                let width = remaining.chars().next().map(char::len_utf8).unwrap_or(1);
                let text = &remaining[..width];
                errors.push(LexError {
                    message: format!("unrecognised character `{text}`"),
                    span: Span::new(offset, offset + width),
                });
                remaining = &remaining[width..];
            }
        }
    }

    if errors.is_empty() {
        Ok(tokens)
    } else {
        Err(errors)
    }
}

fn trivia(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), pair(tag("//"), take_while(|c: char| c != '\n'))),
            value((), delimited(tag("/*"), take_until("*/"), tag("*/"))),
        ))),
    )(input)
}

fn number_text(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(preceded(
            tag("0x"),
            take_while1(|c: char| c.is_ascii_hexdigit() || c == '_'),
        )),
        recognize(pair(
            digit1,
            take_while(|c: char| c.is_ascii_digit() || c == '_'),
        )),
    ))(input)
}

fn parse_integer(text: &str) -> Option<i128> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    match cleaned.strip_prefix("0x") {
        Some(hex) => i128::from_str_radix(hex, 16).ok(),
        None => cleaned.parse::<i128>().ok(),
    }
}

fn string_literal(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                none_of("\\\""),
                '\\',
                alt((
                    value("\\", tag("\\")),
                    value("\"", tag("\"")),
                    value("\n", tag("n")),
                    value("\r", tag("r")),
                    value("\t", tag("t")),
                    value("\0", tag("0")),
                )),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

fn identifier_or_keyword(input: &str) -> IResult<&str, TokenKind> {
    map(
        recognize(pair(
            satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
            take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        )),
        |text: &str| {
            TokenKind::keyword(text).unwrap_or_else(|| TokenKind::Identifier(text.to_string()))
        },
    )(input)
}

fn symbol(input: &str) -> IResult<&str, TokenKind> {
    map_opt(
        alt((
            alt((
                tag("..="),
                tag("->"),
                tag("=>"),
                tag("::"),
                tag("&&"),
                tag("||"),
                tag("=="),
                tag("!="),
                tag("<="),
                tag(">="),
                tag("<<"),
                tag(">>"),
            )),
            recognize(one_of("&|^~!=<>+-*/%.,:;(){}[]")),
        )),
        symbol_kind,
    )(input)
}

fn symbol_kind(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "..=" => TokenKind::DotDotEq,
        "->" => TokenKind::Arrow,
        "=>" => TokenKind::FatArrow,
        "::" => TokenKind::ColonColon,
        "&&" => TokenKind::AmpersandAmpersand,
        "||" => TokenKind::PipePipe,
        "==" => TokenKind::EqEq,
        "!=" => TokenKind::BangEq,
        "<=" => TokenKind::LtEq,
        ">=" => TokenKind::GtEq,
        "<<" => TokenKind::LtLt,
        ">>" => TokenKind::GtGt,
        "&" => TokenKind::Ampersand,
        "|" => TokenKind::Pipe,
        "^" => TokenKind::Caret,
        "~" => TokenKind::Tilde,
        "!" => TokenKind::Bang,
        "=" => TokenKind::Eq,
        "<" => TokenKind::Lt,
        ">" => TokenKind::Gt,
        "+" => TokenKind::Plus,
        "-" => TokenKind::Minus,
        "*" => TokenKind::Star,
        "/" => TokenKind::Slash,
        "%" => TokenKind::Percent,
        "." => TokenKind::Dot,
        "," => TokenKind::Comma,
        ":" => TokenKind::Colon,
        ";" => TokenKind::Semi,
        "(" => TokenKind::LParen,
        ")" => TokenKind::RParen,
        "{" => TokenKind::LBrace,
        "}" => TokenKind::RBrace,
        "[" => TokenKind::LBracket,
        "]" => TokenKind::RBracket,
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source)
            .expect("lex")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn lexes_keywords_symbols_and_literals() {
        assert_eq!(
            kinds("pub fn f(x: i32) -> i32 { x << 2 }"),
            vec![
                TokenKind::Pub,
                TokenKind::Fn,
                TokenKind::Identifier("f".into()),
                TokenKind::LParen,
                TokenKind::Identifier("x".into()),
                TokenKind::Colon,
                TokenKind::Identifier("i32".into()),
                TokenKind::RParen,
                TokenKind::Arrow,
                TokenKind::Identifier("i32".into()),
                TokenKind::LBrace,
                TokenKind::Identifier("x".into()),
                TokenKind::LtLt,
                TokenKind::Integer(2),
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_comments_and_decodes_escapes() {
        assert_eq!(
            kinds("// note\n/* block */ \"a\\n\\\"b\" 0x1_F 1_000"),
            vec![
                TokenKind::String("a\n\"b".into()),
                TokenKind::Integer(31),
                TokenKind::Integer(1000),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn empty_string_literal_is_accepted() {
        assert_eq!(
            kinds("\"\""),
            vec![TokenKind::String(String::new()), TokenKind::Eof]
        );
    }

    #[test]
    fn tracks_byte_spans() {
        let tokens = lex("let  abc").expect("lex");
        assert_eq!(tokens[1].span, Span::new(5, 8));
    }

    #[test]
    fn reports_unknown_characters_and_unterminated_strings() {
        let errors = lex("let $ = \"open").expect_err("should fail");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("unrecognised character `$`"));
        assert!(errors[1].message.contains("unterminated string"));
    }
}
