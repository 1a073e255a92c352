//! Lexer for the Luna script language.
//!
//! Tokenization is done by logos. The logos token set is converted into the
//! public [`Token`] enum with line/column spans attached.

use crate::parser::token::{Span, Token};
use logos::Logos;

/// Logos-based token enum for lexing.
///
/// Converted to [`Token`] after lexing.
#[derive(Logos, Debug, Clone, PartialEq)]
enum LogosToken {
    #[regex(r"[ \t\r\n\f]+", logos::skip)]
    Whitespace,

    // `--` line comments and `--[[ ]]` block comments
    #[token("--", lex_comment)]
    Comment,

    // Keywords (tokens win over the name regex)
    #[token("and")]
    And,
    #[token("break")]
    Break,
    #[token("do")]
    Do,
    #[token("else")]
    Else,
    #[token("elseif")]
    ElseIf,
    #[token("end")]
    End,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("function")]
    Function,
    #[token("if")]
    If,
    #[token("in")]
    In,
    #[token("local")]
    Local,
    #[token("nil")]
    Nil,
    #[token("not")]
    Not,
    #[token("or")]
    Or,
    #[token("repeat")]
    Repeat,
    #[token("return")]
    Return,
    #[token("then")]
    Then,
    #[token("true")]
    True,
    #[token("until")]
    Until,
    #[token("while")]
    While,

    #[regex(r"0[xX][0-9a-fA-F]+", parse_hex)]
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", parse_number)]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", parse_number)]
    Number(f64),

    #[regex(r#""([^"\\\n]|\\(.|\n))*""#, parse_string)]
    #[regex(r#"'([^'\\\n]|\\(.|\n))*'"#, parse_string)]
    String(String),

    #[token("[[", lex_long_string)]
    LongString(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Name(String),

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("#")]
    Hash,
    #[token("==")]
    EqualEqual,
    #[token("~=")]
    NotEqual,
    #[token("<=")]
    LessEqual,
    #[token(">=")]
    GreaterEqual,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("=")]
    Assign,
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token("[")]
    LeftBracket,
    #[token("]")]
    RightBracket,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("..")]
    DotDot,
    #[token("...")]
    Ellipsis,
}

fn lex_comment(lex: &mut logos::Lexer<'_, LogosToken>) -> logos::Skip {
    let remainder = lex.remainder();

    if let Some(body) = remainder.strip_prefix("[[") {
        match body.find("]]") {
            Some(end) => lex.bump(end + 4),
            None => lex.bump(remainder.len()),
        }
    } else {
        let end = remainder.find('\n').unwrap_or(remainder.len());
        lex.bump(end);
    }

    logos::Skip
}

fn lex_long_string(lex: &mut logos::Lexer<'_, LogosToken>) -> Option<String> {
    let remainder = lex.remainder();
    let end = remainder.find("]]")?;
    let content = &remainder[..end];
    lex.bump(end + 2);

    // A newline right after the opening brackets is not part of the string
    let content = content
        .strip_prefix("\r\n")
        .or_else(|| content.strip_prefix('\n'))
        .unwrap_or(content);
    Some(content.to_string())
}

fn parse_hex(lex: &mut logos::Lexer<'_, LogosToken>) -> Option<f64> {
    u64::from_str_radix(&lex.slice()[2..], 16)
        .ok()
        .map(|v| v as f64)
}

fn parse_number(lex: &mut logos::Lexer<'_, LogosToken>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, LogosToken>) -> Option<String> {
    let s = lex.slice();
    Some(unescape_string(&s[1..s.len() - 1]))
}

/// Resolve backslash escapes in a quoted string body.
pub(crate) fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('\n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some('a') => result.push('\x07'),
            Some('b') => result.push('\x08'),
            Some('f') => result.push('\x0c'),
            Some('v') => result.push('\x0b'),
            Some(d) if d.is_ascii_digit() => {
                // \ddd: up to three decimal digits
                let mut code = d.to_digit(10).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(10)) {
                        Some(digit) => {
                            code = code * 10 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                result.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }

    result
}

/// Lexical error with its source location.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LexError {
    #[error("unexpected symbol near '{char}'")]
    UnexpectedCharacter { char: char, span: Span },

    #[error("unfinished string")]
    UnterminatedString { span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedCharacter { span, .. } | LexError::UnterminatedString { span } => {
                *span
            }
        }
    }
}

/// Converts source text into `(Token, Span)` pairs.
pub struct Lexer<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            source,
            line_starts,
        }
    }

    /// Tokenize the whole source. The token list always ends with [`Token::Eof`].
    pub fn tokenize(self) -> Result<Vec<(Token, Span)>, Vec<LexError>> {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();
        let mut lex = LogosToken::lexer(self.source);

        while let Some(result) = lex.next() {
            let range = lex.span();
            let span = self.span(range.start, range.end);
            match result {
                Ok(token) => tokens.push((convert(token), span)),
                Err(()) => {
                    let slice = lex.slice();
                    if slice.starts_with('"') || slice.starts_with('\'') || slice.starts_with("[[")
                    {
                        errors.push(LexError::UnterminatedString { span });
                    } else {
                        let char = slice.chars().next().unwrap_or('\0');
                        errors.push(LexError::UnexpectedCharacter { char, span });
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let end = self.source.len();
        tokens.push((Token::Eof, self.span(end, end)));
        Ok(tokens)
    }

    fn span(&self, start: usize, end: usize) -> Span {
        let line = self.line_starts.partition_point(|&s| s <= start);
        let line_start = self.line_starts[line.saturating_sub(1)];
        Span::new(start, end, line as u32, (start - line_start + 1) as u32)
    }
}

fn convert(token: LogosToken) -> Token {
    match token {
        // Skipped by logos callbacks, never produced
        LogosToken::Whitespace | LogosToken::Comment => Token::Eof,
        LogosToken::And => Token::And,
        LogosToken::Break => Token::Break,
        LogosToken::Do => Token::Do,
        LogosToken::Else => Token::Else,
        LogosToken::ElseIf => Token::ElseIf,
        LogosToken::End => Token::End,
        LogosToken::False => Token::False,
        LogosToken::For => Token::For,
        LogosToken::Function => Token::Function,
        LogosToken::If => Token::If,
        LogosToken::In => Token::In,
        LogosToken::Local => Token::Local,
        LogosToken::Nil => Token::Nil,
        LogosToken::Not => Token::Not,
        LogosToken::Or => Token::Or,
        LogosToken::Repeat => Token::Repeat,
        LogosToken::Return => Token::Return,
        LogosToken::Then => Token::Then,
        LogosToken::True => Token::True,
        LogosToken::Until => Token::Until,
        LogosToken::While => Token::While,
        LogosToken::Number(n) => Token::Number(n),
        LogosToken::String(s) | LogosToken::LongString(s) => Token::String(s),
        LogosToken::Name(n) => Token::Name(n),
        LogosToken::Plus => Token::Plus,
        LogosToken::Minus => Token::Minus,
        LogosToken::Star => Token::Star,
        LogosToken::Slash => Token::Slash,
        LogosToken::Percent => Token::Percent,
        LogosToken::Caret => Token::Caret,
        LogosToken::Hash => Token::Hash,
        LogosToken::EqualEqual => Token::EqualEqual,
        LogosToken::NotEqual => Token::NotEqual,
        LogosToken::LessEqual => Token::LessEqual,
        LogosToken::GreaterEqual => Token::GreaterEqual,
        LogosToken::Less => Token::Less,
        LogosToken::Greater => Token::Greater,
        LogosToken::Assign => Token::Assign,
        LogosToken::LeftParen => Token::LeftParen,
        LogosToken::RightParen => Token::RightParen,
        LogosToken::LeftBrace => Token::LeftBrace,
        LogosToken::RightBrace => Token::RightBrace,
        LogosToken::LeftBracket => Token::LeftBracket,
        LogosToken::RightBracket => Token::RightBracket,
        LogosToken::Semicolon => Token::Semicolon,
        LogosToken::Colon => Token::Colon,
        LogosToken::Comma => Token::Comma,
        LogosToken::Dot => Token::Dot,
        LogosToken::DotDot => Token::DotDot,
        LogosToken::Ellipsis => Token::Ellipsis,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn test_keywords_and_names() {
        assert_eq!(
            kinds("local iffy = nil"),
            vec![
                Token::Local,
                Token::Name("iffy".into()),
                Token::Assign,
                Token::Nil,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("3 0.5 .25 1e2 0x1F"),
            vec![
                Token::Number(3.0),
                Token::Number(0.5),
                Token::Number(0.25),
                Token::Number(100.0),
                Token::Number(31.0),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            kinds(r#""a\tb" 'it\'s' [[long
text]]"#),
            vec![
                Token::String("a\tb".into()),
                Token::String("it's".into()),
                Token::String("long\ntext".into()),
                Token::Eof
            ]
        );
        assert_eq!(unescape_string(r"\65\066"), "AB");
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("a -- line\n--[[ block\n ]] b"),
            vec![Token::Name("a".into()), Token::Name("b".into()), Token::Eof]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a..b ... ~= == <= :"),
            vec![
                Token::Name("a".into()),
                Token::DotDot,
                Token::Name("b".into()),
                Token::Ellipsis,
                Token::NotEqual,
                Token::EqualEqual,
                Token::LessEqual,
                Token::Colon,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_spans_track_lines() {
        let tokens = Lexer::new("a\n  b").tokenize().unwrap();
        assert_eq!(tokens[1].1.line, 2);
        assert_eq!(tokens[1].1.column, 3);
    }

    #[test]
    fn test_unterminated_string() {
        let errors = Lexer::new("x = \"abc").tokenize().unwrap_err();
        assert!(matches!(errors[0], LexError::UnterminatedString { .. }));
    }

    #[test]
    fn test_unexpected_character() {
        let errors = Lexer::new("a = @").tokenize().unwrap_err();
        assert_eq!(
            errors[0],
            LexError::UnexpectedCharacter {
                char: '@',
                span: Span::new(4, 5, 1, 5)
            }
        );
    }
}
