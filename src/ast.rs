//! This module defines the parse tree produced by the parser. The main enum,
//! [`Expr`], mirrors the surface syntax: atoms, ordered maps, lists, sets and
//! meta-marked expressions. Maps that carry an operator key are tagged as
//! [`Invocation`]s once, at construction time, so the evaluator never has to
//! sniff map keys again. Children are reference counted, which makes cloning
//! any subtree O(1); the evaluator relies on this to hand tail expressions
//! around without borrowing from the tree it is walking.
//!
//! Atoms stay opaque text here. Their meaning is decided by
//! [`classify_atom`] at evaluation time.

use std::fmt;
use std::rc::Rc;

/// Keys that turn a map into an invocation, in order of precedence.
pub const OPERATOR_KEYS: [&str; 3] = ["op", "@", "f"];

/// Canonical boolean literals
pub const TRUE_LITERAL: &str = "true";
pub const FALSE_LITERAL: &str = "false";

/// Prefix markers from the `↑` / `↓` tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    Raise,
    Collapse,
}

/// Special forms, recognised structurally from the operator value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialForm {
    Quote,
    If,
    Def,
    Eval,
}

impl SpecialForm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "quote" => Some(SpecialForm::Quote),
            "if" => Some(SpecialForm::If),
            "def" => Some(SpecialForm::Def),
            "eval" => Some(SpecialForm::Eval),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SpecialForm::Quote => "quote",
            SpecialForm::If => "if",
            SpecialForm::Def => "def",
            SpecialForm::Eval => "eval",
        }
    }
}

/// What an invocation does when evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Form {
    Special(SpecialForm),
    /// Generic call of whatever the operator value resolves to
    Call,
}

/// A map whose keys include an operator key.
///
/// All entries are kept verbatim, the operator entry included, so quoting an
/// invocation and displaying it reproduces the source form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Invocation {
    form: Form,
    operator: usize,
    entries: Vec<(Expr, Expr)>,
}

impl Invocation {
    /// Detect the operator entry of a map, if any
    fn classify(entries: &[(Expr, Expr)]) -> Option<(Form, usize)> {
        let operator = OPERATOR_KEYS.iter().find_map(|key| {
            entries
                .iter()
                .rposition(|(k, _)| matches!(k, Expr::Atom(text) if &**text == *key))
        })?;

        let form = match &entries[operator].1 {
            Expr::Atom(name) => SpecialForm::from_name(name).map_or(Form::Call, Form::Special),
            _ => Form::Call,
        };
        Some((form, operator))
    }

    pub fn form(&self) -> Form {
        self.form
    }

    /// The expression stored under the operator key
    pub fn operator(&self) -> &Expr {
        &self.entries[self.operator].1
    }

    pub fn entries(&self) -> &[(Expr, Expr)] {
        &self.entries
    }

    /// Look up a named argument; the operator entry is never an argument.
    /// When a key is repeated the last entry wins.
    pub fn argument(&self, name: &str) -> Option<&Expr> {
        self.entries
            .iter()
            .enumerate()
            .rev()
            .find(|(i, (key, _))| {
                *i != self.operator && matches!(key, Expr::Atom(text) if &**text == name)
            })
            .map(|(_, (_, value))| value)
    }
}

/// Parse tree node
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Opaque token text, classified only when evaluated
    Atom(Rc<str>),
    /// Ordered key/value map literal
    Map(Rc<[(Expr, Expr)]>),
    /// Map carrying an operator key
    Invocation(Rc<Invocation>),
    /// Ordered list
    List(Rc<[Expr]>),
    /// Set, deduplicated only after evaluation
    Set(Rc<[Expr]>),
    /// Expression prefixed by a meta marker
    Meta(Marker, Rc<Expr>),
}

impl Expr {
    pub fn atom(text: &str) -> Self {
        Expr::Atom(text.into())
    }

    /// Build a map, tagging it as an invocation when it carries an operator key
    pub fn map(entries: Vec<(Expr, Expr)>) -> Self {
        match Invocation::classify(&entries) {
            Some((form, operator)) => Expr::Invocation(Rc::new(Invocation {
                form,
                operator,
                entries,
            })),
            None => Expr::Map(entries.into()),
        }
    }

    pub fn list(elements: Vec<Expr>) -> Self {
        Expr::List(elements.into())
    }

    pub fn set(elements: Vec<Expr>) -> Self {
        Expr::Set(elements.into())
    }

    pub fn meta(marker: Marker, inner: Expr) -> Self {
        Expr::Meta(marker, Rc::new(inner))
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Expr::Atom(text) => Some(text),
            _ => None,
        }
    }

    /// Nesting depth: zero for an atom, one more than the deepest child otherwise
    pub fn depth(&self) -> usize {
        let deepest = match self {
            Expr::Atom(_) => return 0,
            Expr::Map(entries) => entry_depth(entries),
            Expr::Invocation(inv) => entry_depth(&inv.entries),
            Expr::List(elements) | Expr::Set(elements) => {
                elements.iter().map(Expr::depth).max().unwrap_or(0)
            }
            Expr::Meta(_, inner) => inner.depth(),
        };
        deepest + 1
    }
}

fn entry_depth(entries: &[(Expr, Expr)]) -> usize {
    entries
        .iter()
        .map(|(k, v)| k.depth().max(v.depth()))
        .max()
        .unwrap_or(0)
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Atom(text) => write!(f, "Atom({text:?})"),
            Expr::Map(entries) => f.debug_tuple("Map").field(&&entries[..]).finish(),
            Expr::Invocation(inv) => f
                .debug_struct("Invocation")
                .field("form", &inv.form)
                .field("entries", &inv.entries)
                .finish(),
            Expr::List(elements) => f.debug_tuple("List").field(&&elements[..]).finish(),
            Expr::Set(elements) => f.debug_tuple("Set").field(&&elements[..]).finish(),
            Expr::Meta(marker, inner) => write!(f, "Meta({marker:?}, {inner:?})"),
        }
    }
}

fn write_entries(f: &mut fmt::Formatter<'_>, entries: &[(Expr, Expr)]) -> fmt::Result {
    write!(f, "(")?;
    for (i, (key, value)) in entries.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{key}: {value}")?;
    }
    write!(f, ")")
}

fn write_sequence(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    close: &str,
    elements: &[Expr],
) -> fmt::Result {
    write!(f, "{open}")?;
    for (i, elem) in elements.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{elem}")?;
    }
    write!(f, "{close}")
}

/// Display produces source text that parses back to an equal tree
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Atom(text) => write!(f, "{text}"),
            Expr::Map(entries) => write_entries(f, entries),
            Expr::Invocation(inv) => write_entries(f, &inv.entries),
            Expr::List(elements) => write_sequence(f, "[", "]", elements),
            Expr::Set(elements) => write_sequence(f, "{", "}", elements),
            Expr::Meta(Marker::Raise, inner) => write!(f, "↑{inner}"),
            Expr::Meta(Marker::Collapse, inner) => write!(f, "↓{inner}"),
        }
    }
}

/// Meaning of an atom's text
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AtomClass<'a> {
    Integer(i64),
    /// An integer literal that does not fit the integer type
    IntegerOutOfRange(&'a str),
    Decimal(f64),
    /// String contents with the surrounding quotes stripped
    String(&'a str),
    Bool(bool),
    Symbol(&'a str),
}

fn is_digit_run(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

/// Classify atom text. The order matters: numbers first, then quoted
/// strings, then the boolean literals, and anything else is a symbol.
pub fn classify_atom(text: &str) -> AtomClass<'_> {
    let unsigned = text.strip_prefix('-').unwrap_or(text);

    if is_digit_run(unsigned) {
        return match text.parse::<i64>() {
            Ok(n) => AtomClass::Integer(n),
            Err(_) => AtomClass::IntegerOutOfRange(text),
        };
    }

    if let Some((whole, fraction)) = unsigned.split_once('.')
        && is_digit_run(whole)
        && is_digit_run(fraction)
        && let Ok(d) = text.parse::<f64>()
    {
        return AtomClass::Decimal(d);
    }

    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        return AtomClass::String(&text[1..text.len() - 1]);
    }

    match text {
        TRUE_LITERAL => AtomClass::Bool(true),
        FALSE_LITERAL => AtomClass::Bool(false),
        _ => AtomClass::Symbol(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_atom_data_driven() {
        let test_cases = vec![
            ("0", AtomClass::Integer(0)),
            ("42", AtomClass::Integer(42)),
            ("-17", AtomClass::Integer(-17)),
            ("9223372036854775807", AtomClass::Integer(i64::MAX)),
            ("99999999999999999999", AtomClass::IntegerOutOfRange("99999999999999999999")),
            ("3.25", AtomClass::Decimal(3.25)),
            ("-0.5", AtomClass::Decimal(-0.5)),
            ("\"hello\"", AtomClass::String("hello")),
            ("\"\"", AtomClass::String("")),
            // Quotes shield text that would otherwise be a number or boolean
            ("\"42\"", AtomClass::String("42")),
            ("\"true\"", AtomClass::String("true")),
            ("true", AtomClass::Bool(true)),
            ("false", AtomClass::Bool(false)),
            // Everything else is a symbol
            ("x", AtomClass::Symbol("x")),
            ("-", AtomClass::Symbol("-")),
            ("//", AtomClass::Symbol("//")),
            ("1.", AtomClass::Symbol("1.")),
            (".5", AtomClass::Symbol(".5")),
            ("1.2.3", AtomClass::Symbol("1.2.3")),
            ("12abc", AtomClass::Symbol("12abc")),
            ("\"", AtomClass::Symbol("\"")),
            ("True", AtomClass::Symbol("True")),
        ];

        for (i, (input, expected)) in test_cases.into_iter().enumerate() {
            assert_eq!(
                classify_atom(input),
                expected,
                "Classification test #{}: '{input}'",
                i + 1
            );
        }
    }

    #[test]
    fn test_operator_key_tags_invocation() {
        let literal = Expr::map(vec![
            (Expr::atom("a"), Expr::atom("1")),
            (Expr::atom("b"), Expr::atom("2")),
        ]);
        assert!(matches!(literal, Expr::Map(_)));

        let call = Expr::map(vec![
            (Expr::atom("f"), Expr::atom("add")),
            (Expr::atom("a"), Expr::atom("1")),
        ]);
        let Expr::Invocation(inv) = call else {
            panic!("expected invocation");
        };
        assert_eq!(inv.form(), Form::Call);
        assert_eq!(inv.operator(), &Expr::atom("add"));
        assert_eq!(inv.argument("a"), Some(&Expr::atom("1")));
        assert_eq!(inv.argument("f"), None);
    }

    #[test]
    fn test_op_key_takes_precedence_over_f() {
        // In a def form `f` is the body, not the operator
        let def = Expr::map(vec![
            (Expr::atom("op"), Expr::atom("def")),
            (Expr::atom("n"), Expr::atom("inc")),
            (Expr::atom("f"), Expr::atom("x")),
        ]);
        let Expr::Invocation(inv) = def else {
            panic!("expected invocation");
        };
        assert_eq!(inv.form(), Form::Special(SpecialForm::Def));
        assert_eq!(inv.argument("f"), Some(&Expr::atom("x")));
    }

    #[test]
    fn test_repeated_argument_last_wins() {
        let call = Expr::map(vec![
            (Expr::atom("op"), Expr::atom("g")),
            (Expr::atom("x"), Expr::atom("1")),
            (Expr::atom("x"), Expr::atom("2")),
        ]);
        let Expr::Invocation(inv) = call else {
            panic!("expected invocation");
        };
        assert_eq!(inv.argument("x"), Some(&Expr::atom("2")));
    }

    #[test]
    fn test_display_round_trip_text() {
        let expr = Expr::map(vec![
            (Expr::atom("k"), Expr::list(vec![Expr::atom("1"), Expr::atom("2")])),
            (Expr::atom("s"), Expr::set(vec![])),
            (Expr::atom("m"), Expr::meta(Marker::Raise, Expr::atom("x"))),
        ]);
        assert_eq!(expr.to_string(), "(k: [1, 2], s: {}, m: ↑x)");
    }

    #[test]
    fn test_depth() {
        assert_eq!(Expr::atom("x").depth(), 0);
        assert_eq!(Expr::set(vec![]).depth(), 1);
        let nested = Expr::map(vec![(
            Expr::atom("k"),
            Expr::list(vec![Expr::atom("1"), Expr::list(vec![Expr::atom("2")])]),
        )]);
        assert_eq!(nested.depth(), 3);
        assert_eq!(Expr::meta(Marker::Raise, nested).depth(), 4);
    }
}
