use chumsky::error::{Rich, RichReason};
use chumsky::prelude::*;

/// Lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
}

/// Token with the line it starts on.
///
/// A `Newline` token is on the last physical line of its logical line.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: i32,
}

/// Lexing failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub line: i32,
    pub message: String,
}

type Err<'a> = extra::Err<Rich<'a, char>>;

/// Splits some source code into tokens.
///
/// Each physical line is lexed on its own. Indentation changes produce
/// `Indent`/`Dedent` tokens, and line breaks within brackets are ignored.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut indents = vec![0usize];
    let mut depth = 0usize;

    let line_tokens = line_tokens();

    for (index, raw_line) in source.lines().enumerate() {
        let line = i32::try_from(index + 1).unwrap_or(i32::MAX);
        let text = raw_line.trim_end();

        let content = text.trim_start();
        if depth == 0 && (content.is_empty() || content.starts_with('#')) {
            continue;
        }

        if depth == 0 {
            let indent = text.len() - content.len();
            let current = indents.last().copied().unwrap_or(0);

            if indent > current {
                indents.push(indent);
                tokens.push(Token { tok: Tok::Indent, line });
            } else {
                while indent < indents.last().copied().unwrap_or(0) {
                    indents.pop();
                    tokens.push(Token { tok: Tok::Dedent, line });
                }

                if indent != indents.last().copied().unwrap_or(0) {
                    return Err(LexError {
                        line,
                        message: "unindent does not match any outer indentation level".into(),
                    });
                }
            }
        }

        let toks = line_tokens
            .parse(content)
            .into_result()
            .map_err(|errors| LexError {
                line,
                message: errors.first().map_or_else(|| "invalid syntax".into(), error_message),
            })?;

        for tok in toks {
            match tok {
                Tok::Op("(" | "[" | "{") => depth += 1,
                Tok::Op(")" | "]" | "}") => depth = depth.saturating_sub(1),
                _ => (),
            }

            tokens.push(Token { tok, line });
        }

        if depth == 0 {
            tokens.push(Token { tok: Tok::Newline, line });
        }
    }

    let last_line = tokens.last().map_or(1, |t| t.line);

    while indents.len() > 1 {
        indents.pop();
        tokens.push(Token { tok: Tok::Dedent, line: last_line });
    }

    Ok(tokens)
}

/// Returns the message of a parsing error.
pub(crate) fn error_message<T>(error: &Rich<'_, T>) -> String {
    match error.reason() {
        RichReason::Custom(message) => message.clone(),
        _ => "invalid syntax".into(),
    }
}

/// Tokens of a line without its indentation, up to an optional comment.
fn line_tokens<'a>() -> impl Parser<'a, &'a str, Vec<Tok>, Err<'a>> {
    let comment = just('#').then(any().repeated());

    token()
        .padded()
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(comment.or_not())
        .then_ignore(end())
}

fn token<'a>() -> impl Parser<'a, &'a str, Tok, Err<'a>> + Clone {
    let escape = just('\\').ignore_then(any().map(|c| match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    }));

    let quoted = |quote: char| {
        none_of([quote, '\\'])
            .or(escape.clone())
            .repeated()
            .collect::<String>()
            .delimited_by(just(quote), just(quote))
    };
    let string = quoted('\'').or(quoted('"')).labelled("string literal");

    let bytes = one_of("bB")
        .ignore_then(string.clone())
        .map(|text: String| Tok::Bytes(text.into_bytes()));

    let number = any()
        .filter(|c: &char| c.is_ascii_digit())
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '.' || *c == '_')
                .repeated(),
        )
        .to_slice()
        .try_map(|text: &str, span| {
            parse_number(text)
                .ok_or_else(|| Rich::custom(span, format!("invalid number literal '{text}'")))
        });

    let name = any()
        .filter(|c: &char| c.is_alphabetic() || *c == '_')
        .then(any().filter(|c: &char| c.is_alphanumeric() || *c == '_').repeated())
        .to_slice()
        .map(|name: &str| Tok::Name(name.to_owned()));

    let long_op = choice((
        symbol("**"),
        symbol("//"),
        symbol("=="),
        symbol("!="),
        symbol("<="),
        symbol(">="),
        symbol("+="),
        symbol("-="),
        symbol("*="),
    ));
    let short_op = choice((
        symbol("("),
        symbol(")"),
        symbol("["),
        symbol("]"),
        symbol("{"),
        symbol("}"),
        symbol(","),
        symbol(":"),
        symbol("."),
        symbol("="),
        symbol("+"),
        symbol("-"),
        symbol("*"),
        symbol("/"),
        symbol("%"),
        symbol("<"),
        symbol(">"),
    ));
    let op = long_op.or(short_op).map(Tok::Op).labelled("operator");

    choice((bytes, string.map(Tok::Str), number, name, op))
}

/// Matches an operator, yielding the static operator string.
fn symbol<'a>(op: &'static str) -> impl Parser<'a, &'a str, &'static str, Err<'a>> + Clone {
    just::<&'a str, &'a str, Err<'a>>(op).to(op)
}

fn parse_number(text: &str) -> Option<Tok> {
    let text: String = text.chars().filter(|c| *c != '_').collect();

    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok().map(Tok::Int);
    }

    if text.contains(['.', 'e', 'E']) {
        return text.parse().ok().map(Tok::Float);
    }

    text.parse().ok().map(Tok::Int)
}

#[cfg(test)]
mod tests {
    use super::{Tok, tokenize};

    #[test]
    fn indentation_blocks() {
        let tokens = tokenize("if x:\n    y = 1\nz = 2\n").unwrap();
        let toks: Vec<_> = tokens.into_iter().map(|t| (t.tok, t.line)).collect();

        assert_eq!(
            toks,
            [
                (Tok::Name("if".into()), 1),
                (Tok::Name("x".into()), 1),
                (Tok::Op(":"), 1),
                (Tok::Newline, 1),
                (Tok::Indent, 2),
                (Tok::Name("y".into()), 2),
                (Tok::Op("="), 2),
                (Tok::Int(1), 2),
                (Tok::Newline, 2),
                (Tok::Dedent, 3),
                (Tok::Name("z".into()), 3),
                (Tok::Op("="), 3),
                (Tok::Int(2), 3),
                (Tok::Newline, 3),
            ]
        );
    }

    #[test]
    fn brackets_span_lines() {
        let tokens = tokenize("x = [1,\n     2]  # list\n").unwrap();
        let newlines: Vec<_> = tokens.iter().filter(|t| t.tok == Tok::Newline).collect();

        assert_eq!(newlines.len(), 1);
        assert_eq!(newlines[0].line, 2);
    }

    #[test]
    fn literals() {
        let tokens = tokenize("'a\\n' b\"xy\" 0x1f 2.5 1_000 bar").unwrap();
        let toks: Vec<_> = tokens.into_iter().map(|t| t.tok).take(6).collect();

        assert_eq!(
            toks,
            [
                Tok::Str("a\n".into()),
                Tok::Bytes(b"xy".to_vec()),
                Tok::Int(31),
                Tok::Float(2.5),
                Tok::Int(1000),
                Tok::Name("bar".into()),
            ]
        );
    }

    #[test]
    fn operators() {
        let tokens = tokenize("a**=b // c").unwrap();
        let toks: Vec<_> = tokens.into_iter().map(|t| t.tok).collect();

        assert_eq!(
            toks,
            [
                Tok::Name("a".into()),
                Tok::Op("**"),
                Tok::Op("="),
                Tok::Name("b".into()),
                Tok::Op("//"),
                Tok::Name("c".into()),
                Tok::Newline,
            ]
        );
    }

    #[test]
    fn bad_dedent() {
        let err = tokenize("if x:\n    y\n  z\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn bad_literals() {
        let err = tokenize("x = 1\ny = 'abc\n").unwrap_err();
        assert_eq!(err.line, 2);

        let err = tokenize("z = 12ab").unwrap_err();
        assert_eq!(err.line, 1);

        assert!(tokenize("a $ b").is_err());
    }
}
