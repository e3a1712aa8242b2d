//! Tali - a small homoiconic, map-oriented expression language
//!
//! This crate provides the front-end and evaluator of the language: a lazy
//! tokenizer, an LL(1) recursive-descent parser producing a typed parse tree,
//! and a trampolined tree-walking evaluator with lexical scoping, closures and
//! quoting.
//!
//! ## Syntax
//!
//! Every program is built from atoms and three bracketed collections:
//!
//! ```text
//! (a: 1, b: 2)            ; ordered key/value map
//! [1 2 3]                 ; ordered list
//! {1 2 3}                 ; set (deduplicated after evaluation)
//! (op: +, a: 1, b: 2)     ; invocation: a map carrying an operator key
//! ```
//!
//! Commas are optional and behave like whitespace. A map that carries one of
//! the operator keys (`op`, `@`, `f`) is an invocation rather than a literal;
//! the remaining entries are named arguments.
//!
//! ## Special forms
//!
//! ```text
//! (op: quote, q: E)                   ; E, unevaluated
//! (op: if, p: P, t: T, f: F)          ; exactly one of T / F
//! (op: def, n: inc, p: [x], f: BODY)  ; bind a procedure in the current frame
//! (op: eval, e: E)                    ; evaluate E, then evaluate the result again
//! ```
//!
//! ## Usage
//!
//! ```
//! use tali::{eval, parse, tokenize};
//! use tali::evaluator::create_global_env;
//! use tali::value::Value;
//!
//! let env = create_global_env();
//! let source = "{op: def, n: inc, p: [x], f: {op: +, a: x, b: 1}} (op: inc, x: 41)";
//! let mut last = Value::Unit;
//! for expr in parse(tokenize(source)) {
//!     last = eval(&expr?, &env)?;
//! }
//! assert_eq!(last, Value::Integer(42));
//! # Ok::<(), tali::Error>(())
//! ```
//!
//! ## Modules
//!
//! - `lexer`: characters to a lazy token stream
//! - `parser`: tokens to a lazy stream of parse trees
//! - `ast`: parse tree types and atom classification
//! - `value`: runtime values and their equality contract
//! - `evaluator`: environments and the evaluation loop
//! - `builtinops`: primitive procedures of the root environment

use std::fmt;

/// Maximum parsing depth to prevent stack overflow on deeply nested input
pub const MAX_PARSE_DEPTH: usize = 64;

/// Maximum nesting of non-tail evaluations.
/// Tail calls are iterated and never count towards this limit.
pub const MAX_EVAL_DEPTH: usize = 256;

/// Maximum nesting of collections inside a runtime value
pub const MAX_VALUE_DEPTH: usize = 512;

/// Categorizes the different kinds of tokenizing and parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Unexpected token at a grammar position
    InvalidSyntax,
    /// Input ended before the form was complete (EOF, unterminated string, unclosed delimiter)
    Incomplete,
    /// Expression nesting exceeded the configured parse depth
    TooDeeplyNested,
    /// Extra input found after a complete form where exactly one was expected
    TrailingContent,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// What the grammar expected at this position, if identifiable
    pub expected: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context: None,
            expected: None,
            found: None,
        }
    }

    /// Create an InvalidSyntax error naming the expected and the actual token
    pub fn unexpected(expected: impl Into<String>, found: impl Into<String>) -> Self {
        let expected = expected.into();
        let found = found.into();
        ParseError {
            kind: ParseErrorKind::InvalidSyntax,
            message: format!("expected {expected}, found '{found}'"),
            context: None,
            expected: Some(expected),
            found: Some(found),
        }
    }

    /// Create an Incomplete error for input that ended while `expected` was still required
    pub fn unexpected_end(expected: impl Into<String>) -> Self {
        let expected = expected.into();
        ParseError {
            kind: ParseErrorKind::Incomplete,
            message: format!("unexpected end of input, expected {expected}"),
            context: None,
            expected: Some(expected),
            found: None,
        }
    }

    /// Create a ParseError with context extracted from input at a given offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        // Show a little of what came before the error
        let context_start = input[..error_offset.min(input.len())]
            .chars()
            .count()
            .saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        ParseError {
            context: Some(display_context),
            ..Self::from_message(kind, message)
        }
    }
}

/// Error types for the interpreter.
///
/// Every failure aborts the current top-level form; nothing is recovered
/// inside the core.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The character source could not be split into tokens
    TokenizeError(ParseError),
    /// A token did not fit the grammar at its position
    ParseError(ParseError),
    /// Lookup exhausted the frame chain
    UnboundSymbol(String),
    /// An invocation did not supply a declared parameter
    ArityError { operator: String, missing: String },
    /// A primitive received an operand of an unsupported kind
    TypeError(String),
    /// The operator key named neither a special form nor a bound procedure
    UnknownOperator(String),
    /// Any other runtime failure (overflow, division by zero, depth limit, ...)
    EvalError(String),
}

impl Error {
    /// Create an ArityError for an invocation of `operator` lacking `missing`
    pub fn arity_error(operator: impl Into<String>, missing: impl Into<String>) -> Self {
        Error::ArityError {
            operator: operator.into(),
            missing: missing.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::TokenizeError(e) | Error::ParseError(e) => {
                let label = if matches!(self, Error::TokenizeError(_)) {
                    "TokenizeError"
                } else {
                    "ParseError"
                };
                write!(f, "{label}: {}", e.message)?;
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::UnboundSymbol(name) => write!(f, "Unbound symbol: {name}"),
            Error::ArityError { operator, missing } => write!(
                f,
                "ArityError: invocation of {operator} is missing parameter '{missing}'"
            ),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::UnknownOperator(op) => write!(f, "Unknown operator: {op}"),
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod value;

pub use evaluator::eval;
pub use lexer::tokenize;
pub use parser::parse;
