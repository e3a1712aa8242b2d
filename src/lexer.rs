//! Lexical analysis: a character source becomes a lazy stream of tokens.
//!
//! Tokens are produced on demand by [`Tokenizer`]; each call to `next`
//! performs just enough work to recognise one token. The stream always ends
//! with a single [`Token::Eof`] unless tokenizing fails first.

use nom::{
    IResult, Parser,
    bytes::complete::{take_while, take_while1},
    character::complete::char,
    combinator::recognize,
    sequence::{delimited, pair},
};
use std::fmt;

use crate::parser::ParseConfig;
use crate::{Error, ParseError, ParseErrorKind};

/// Single-character tokens that also terminate a bare atom
pub(crate) const RESERVED_CHARS: &str = "()[]{}:";

const RAISE_CHAR: char = '↑';
const COLLAPSE_CHAR: char = '↓';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    LParen,
    RParen,
    LSquare,
    RSquare,
    LBracket,
    RBracket,
    Colon,
    Raise,
    Collapse,
    Atom(String),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LSquare => write!(f, "["),
            Token::RSquare => write!(f, "]"),
            Token::LBracket => write!(f, "{{"),
            Token::RBracket => write!(f, "}}"),
            Token::Colon => write!(f, ":"),
            Token::Raise => write!(f, "{RAISE_CHAR}"),
            Token::Collapse => write!(f, "{COLLAPSE_CHAR}"),
            Token::Atom(text) => write!(f, "{text}"),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

/// Commas are accepted anywhere whitespace is
fn is_separator(c: char) -> bool {
    c.is_whitespace() || c == ','
}

fn separators(input: &str) -> IResult<&str, &str> {
    take_while(is_separator).parse(input)
}

fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char(';'), take_while(|c: char| c != '\n'))).parse(input)
}

/// A quoted string is read verbatim, reserved characters included
fn string_literal(input: &str) -> IResult<&str, &str> {
    recognize(delimited(
        char('"'),
        take_while(|c: char| c != '"'),
        char('"'),
    ))
    .parse(input)
}

fn bare_atom(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !is_separator(c) && !RESERVED_CHARS.contains(c)).parse(input)
}

/// Lazy, non-restartable token stream over a borrowed source.
pub struct Tokenizer<'a> {
    source: &'a str,
    remaining: &'a str,
    handle_comments: bool,
    finished: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str, config: &ParseConfig) -> Self {
        Tokenizer {
            source,
            remaining: source,
            handle_comments: config.handle_comments,
            finished: false,
        }
    }

    /// Byte offset of the next unread character
    pub fn offset(&self) -> usize {
        self.source.len() - self.remaining.len()
    }

    fn skip_blank(&mut self) {
        loop {
            if let Ok((rest, _)) = separators(self.remaining) {
                self.remaining = rest;
            }
            if !self.handle_comments {
                return;
            }
            match line_comment(self.remaining) {
                Ok((rest, _)) => self.remaining = rest,
                Err(_) => return,
            }
        }
    }

    fn fail(&mut self, message: &str) -> Error {
        self.finished = true;
        Error::TokenizeError(ParseError::with_context(
            ParseErrorKind::Incomplete,
            message,
            self.source,
            self.offset(),
        ))
    }

    fn next_token(&mut self) -> Result<Token, Error> {
        self.skip_blank();

        let mut chars = self.remaining.chars();
        let Some(first) = chars.next() else {
            self.finished = true;
            return Ok(Token::Eof);
        };

        let single = match first {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LSquare),
            ']' => Some(Token::RSquare),
            '{' => Some(Token::LBracket),
            '}' => Some(Token::RBracket),
            ':' => Some(Token::Colon),
            RAISE_CHAR => Some(Token::Raise),
            COLLAPSE_CHAR => Some(Token::Collapse),
            _ => None,
        };
        if let Some(token) = single {
            self.remaining = chars.as_str();
            return Ok(token);
        }

        let recognised = if first == '"' {
            string_literal(self.remaining)
        } else {
            bare_atom(self.remaining)
        };

        // A bare atom always matches here, so only a string can fail
        let Ok((rest, text)) = recognised else {
            return Err(self.fail("unterminated string literal"));
        };
        self.remaining = rest;
        Ok(Token::Atom(text.to_owned()))
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Result<Token, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        Some(self.next_token())
    }
}

/// Tokenize `source` with the default configuration.
pub fn tokenize(source: &str) -> Tokenizer<'_> {
    Tokenizer::new(source, &ParseConfig::default())
}

/// Tokenize `source` with an explicit configuration.
pub fn tokenize_with_config<'a>(source: &'a str, config: &ParseConfig) -> Tokenizer<'a> {
    Tokenizer::new(source, config)
}
