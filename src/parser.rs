//! LL(1) recursive-descent parser turning a token stream into parse trees.
//!
//! ```text
//! expr  := ATOM | '(' entry* ')' | '[' expr* ']' | '{' (entry* | expr*) '}' | MARKER expr
//! entry := expr ':' expr
//! ```
//!
//! A brace collection whose first element is followed by `:` is a map,
//! otherwise it is a set. Parsing is lazy: [`Parser`] yields one top-level
//! form per call to `next` and stops for good after the first error.

use std::iter::Peekable;

use crate::ast::{Expr, Marker};
use crate::lexer::{Token, tokenize, tokenize_with_config};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Options shared by the tokenizer and the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseConfig {
    /// Treat `;` up to the end of the line as a comment
    pub handle_comments: bool,
    /// Maximum nesting of collections and markers
    pub max_depth: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: false,
            max_depth: MAX_PARSE_DEPTH,
        }
    }
}

/// Lazy stream of top-level forms over a token stream.
pub struct Parser<I: Iterator<Item = Result<Token, Error>>> {
    tokens: Peekable<I>,
    max_depth: usize,
    failed: bool,
}

fn syntax_error(expected: &str, found: &Token) -> Error {
    match found {
        Token::Eof => Error::ParseError(ParseError::unexpected_end(expected)),
        other => Error::ParseError(ParseError::unexpected(expected, other.to_string())),
    }
}

impl<I: Iterator<Item = Result<Token, Error>>> Parser<I> {
    pub fn new(tokens: I, config: &ParseConfig) -> Self {
        Parser {
            tokens: tokens.peekable(),
            max_depth: config.max_depth,
            failed: false,
        }
    }

    /// Consume one token; an exhausted stream reads as end of input
    fn next_token(&mut self) -> Result<Token, Error> {
        self.tokens.next().unwrap_or(Ok(Token::Eof))
    }

    /// Look at the next token without consuming it. A tokenizer error is
    /// consumed and returned immediately.
    fn peek_token(&mut self) -> Result<&Token, Error> {
        if let Some(Err(e)) = self.tokens.next_if(Result::is_err) {
            return Err(e);
        }
        Ok(match self.tokens.peek() {
            Some(Ok(token)) => token,
            _ => &Token::Eof,
        })
    }

    fn enter(&self, depth: usize) -> Result<usize, Error> {
        let inner = depth + 1;
        if inner > self.max_depth {
            return Err(Error::ParseError(ParseError::from_message(
                ParseErrorKind::TooDeeplyNested,
                format!("expression nested too deeply (max depth: {})", self.max_depth),
            )));
        }
        Ok(inner)
    }

    fn parse_expr(&mut self, depth: usize) -> Result<Expr, Error> {
        match self.next_token()? {
            Token::Atom(text) => Ok(Expr::atom(&text)),
            Token::LParen => {
                let inner = self.enter(depth)?;
                self.parse_entries(&Token::RParen, inner, Vec::new())
            }
            Token::LSquare => {
                let inner = self.enter(depth)?;
                self.parse_elements(&Token::RSquare, inner, Vec::new())
                    .map(Expr::list)
            }
            Token::LBracket => {
                let inner = self.enter(depth)?;
                self.parse_brace(inner)
            }
            Token::Raise => {
                let inner = self.enter(depth)?;
                Ok(Expr::meta(Marker::Raise, self.parse_expr(inner)?))
            }
            Token::Collapse => {
                let inner = self.enter(depth)?;
                Ok(Expr::meta(Marker::Collapse, self.parse_expr(inner)?))
            }
            other => Err(syntax_error("expression", &other)),
        }
    }

    /// Map entries up to `close`; `entries` holds any already-read prefix
    fn parse_entries(
        &mut self,
        close: &Token,
        depth: usize,
        mut entries: Vec<(Expr, Expr)>,
    ) -> Result<Expr, Error> {
        loop {
            match self.peek_token()? {
                token if token == close => {
                    self.next_token()?;
                    return Ok(Expr::map(entries));
                }
                Token::Eof => return Err(syntax_error(&format!("'{close}'"), &Token::Eof)),
                _ => {}
            }
            let key = self.parse_expr(depth)?;
            match self.next_token()? {
                Token::Colon => {}
                other => return Err(syntax_error("':' after map key", &other)),
            }
            let value = self.parse_expr(depth)?;
            entries.push((key, value));
        }
    }

    fn parse_elements(
        &mut self,
        close: &Token,
        depth: usize,
        mut elements: Vec<Expr>,
    ) -> Result<Vec<Expr>, Error> {
        loop {
            match self.peek_token()? {
                token if token == close => {
                    self.next_token()?;
                    return Ok(elements);
                }
                Token::Eof => return Err(syntax_error(&format!("'{close}'"), &Token::Eof)),
                Token::Colon => {
                    return Err(syntax_error("collection element", &Token::Colon));
                }
                _ => elements.push(self.parse_expr(depth)?),
            }
        }
    }

    /// `{` has been consumed: decide between map and set after the first element
    fn parse_brace(&mut self, depth: usize) -> Result<Expr, Error> {
        if *self.peek_token()? == Token::RBracket {
            self.next_token()?;
            return Ok(Expr::set(Vec::new()));
        }
        let first = self.parse_expr(depth)?;
        if *self.peek_token()? == Token::Colon {
            self.next_token()?;
            let value = self.parse_expr(depth)?;
            self.parse_entries(&Token::RBracket, depth, vec![(first, value)])
        } else {
            self.parse_elements(&Token::RBracket, depth, vec![first])
                .map(Expr::set)
        }
    }
}

impl<I: Iterator<Item = Result<Token, Error>>> Iterator for Parser<I> {
    type Item = Result<Expr, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.peek_token() {
            Ok(Token::Eof) => {
                self.failed = true;
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        }
        let result = self.parse_expr(0);
        match &result {
            Ok(expr) => log::trace!("parsed form: {expr}"),
            Err(_) => self.failed = true,
        }
        Some(result)
    }
}

/// Parse a token stream into a lazy sequence of top-level forms.
pub fn parse<T>(tokens: T) -> Parser<T::IntoIter>
where
    T: IntoIterator<Item = Result<Token, Error>>,
{
    Parser::new(tokens.into_iter(), &ParseConfig::default())
}

/// Parse a token stream with an explicit configuration.
pub fn parse_with_config<T>(tokens: T, config: &ParseConfig) -> Parser<T::IntoIter>
where
    T: IntoIterator<Item = Result<Token, Error>>,
{
    Parser::new(tokens.into_iter(), config)
}

/// Tokenize and parse all of `input`, failing on the first error.
pub fn parse_str(input: &str) -> Result<Vec<Expr>, Error> {
    parse(tokenize(input)).collect()
}

/// Like [`parse_str`], with comments and depth taken from `config`.
pub fn parse_str_with_config(input: &str, config: &ParseConfig) -> Result<Vec<Expr>, Error> {
    parse_with_config(tokenize_with_config(input, config), config).collect()
}

/// Parse exactly one form from `input`.
pub fn parse_one(input: &str) -> Result<Expr, Error> {
    let mut forms = parse(tokenize(input));
    let first = match forms.next() {
        Some(result) => result?,
        None => {
            return Err(Error::ParseError(ParseError::unexpected_end("expression")));
        }
    };
    match forms.next() {
        None => Ok(first),
        Some(_) => Err(Error::ParseError(ParseError {
            found: Some(input.to_owned()),
            ..ParseError::from_message(
                ParseErrorKind::TrailingContent,
                format!("unexpected input after the form {first}"),
            )
        })),
    }
}
