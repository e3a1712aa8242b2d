//! Runtime values produced by evaluation.
//!
//! ## Equality and hashing
//!
//! [`Value`] implements a single canonical, kind-strict structural equality:
//!
//! - values of different kinds are never equal, so `1`, `1.0` and `"1"` are
//!   three distinct members of a set;
//! - decimals compare by bit pattern after normalising `-0.0` to `0.0`, which
//!   keeps equality reflexive;
//! - lists compare in order, maps and sets compare as unordered collections;
//! - procedures compare by parameters, body and identity of the captured
//!   frame, primitives by name.
//!
//! [`Hash`] agrees with this equality, so values can key hash maps and sets.
//! Set literals deduplicate with exactly this contract.
//!
//! ## Sharing
//!
//! Collection payloads live behind [`Shared`], so cloning a value (as every
//! variable lookup does) never copies its elements. Each collection records
//! its nesting depth when it is built; the evaluator uses [`Value::depth`] to
//! refuse values nested deeper than [`crate::MAX_VALUE_DEPTH`].

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;

use crate::Error;
use crate::ast::{AtomClass, Expr, FALSE_LITERAL, TRUE_LITERAL, classify_atom};
use crate::evaluator::Environment;
use crate::evaluator::intooperation::OperationFn;

/// Type alias for integer values in the interpreter
pub(crate) type IntegerType = i64;

/// Type alias for decimal values in the interpreter
pub(crate) type DecimalType = f64;

/// Immutable, reference-counted elements of a collection value
pub struct Shared<T> {
    items: Rc<Vec<T>>,
    depth: usize,
}

impl<T: Clone> Shared<T> {
    /// Take the elements out, copying them only while other handles remain
    pub fn into_vec(self) -> Vec<T> {
        Rc::unwrap_or_clone(self.items)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared {
            items: Rc::clone(&self.items),
            depth: self.depth,
        }
    }
}

impl<T> Deref for Shared<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[derive(Clone)]
pub enum Value {
    Integer(IntegerType),
    Decimal(DecimalType),
    String(String),
    Bool(bool),
    /// A symbol read as data, e.g. a bare map key
    Symbol(String),
    /// Ordered key/value mapping; keys are unique under value equality
    Map(Shared<(Value, Value)>),
    List(Shared<Value>),
    /// Insertion-ordered, deduplicated members
    Set(Shared<Value>),
    /// An unevaluated parse tree, as returned by `quote`
    Code(Expr),
    /// User procedure: parameters, unevaluated body and the frame active at definition
    Procedure {
        params: Vec<String>,
        body: Expr,
        env: Environment,
    },
    /// Native procedure with declared parameter names
    Primitive {
        id: String,
        params: Vec<String>,
        func: Arc<OperationFn>,
    },
    /// Result of side-effecting forms such as `def`
    Unit,
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Decimal(d) => write!(f, "Decimal({d:?})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Map(entries) => {
                write!(f, "Map(")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?}: {v:?}")?;
                }
                write!(f, ")")
            }
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Set(items) => f.debug_tuple("Set").field(items).finish(),
            Value::Code(expr) => write!(f, "Code({expr:?})"),
            // The captured frame may contain this very procedure
            Value::Procedure { params, body, .. } => {
                write!(f, "Procedure(params={params:?}, body={body})")
            }
            Value::Primitive { id, params, .. } => write!(f, "Primitive({id}, params={params:?})"),
            Value::Unit => write!(f, "Unit"),
        }
    }
}

/// Numeric operand of an arithmetic primitive
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(IntegerType),
    Decimal(DecimalType),
}

impl Number {
    pub fn as_decimal(self) -> DecimalType {
        match self {
            Number::Integer(n) => n as DecimalType,
            Number::Decimal(d) => d,
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Integer(i) => Value::Integer(i),
            Number::Decimal(d) => Value::Decimal(d),
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<IntegerType> for Value {
    fn from(n: IntegerType) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<DecimalType> for Value {
    fn from(d: DecimalType) -> Self {
        Value::Decimal(d)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Unit
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into).collect())
    }
}

// Fallible conversions from `Value` back into primitive Rust types.

impl std::convert::TryInto<IntegerType> for Value {
    type Error = Error;

    fn try_into(self) -> Result<IntegerType, Error> {
        if let Value::Integer(n) = self {
            Ok(n)
        } else {
            Err(Error::TypeError(format!("expected integer, got {}", self.kind())))
        }
    }
}

impl std::convert::TryInto<Number> for Value {
    type Error = Error;

    fn try_into(self) -> Result<Number, Error> {
        match self {
            Value::Integer(n) => Ok(Number::Integer(n)),
            Value::Decimal(d) => Ok(Number::Decimal(d)),
            other => Err(Error::TypeError(format!(
                "expected number, got {} {other}",
                other.kind()
            ))),
        }
    }
}

impl std::convert::TryInto<bool> for Value {
    type Error = Error;

    fn try_into(self) -> Result<bool, Error> {
        if let Value::Bool(b) = self {
            Ok(b)
        } else {
            Err(Error::TypeError(format!("expected boolean, got {}", self.kind())))
        }
    }
}

/// Helper for creating symbol values in tests and embedding code
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper for creating values from Rust literals
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

fn shared<T>(items: Vec<T>, depth_of: impl Fn(&T) -> usize) -> Shared<T> {
    let depth = 1 + items.iter().map(depth_of).max().unwrap_or(0);
    Shared {
        items: Rc::new(items),
        depth,
    }
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(shared(items, Value::depth))
    }

    /// Wrap entries as a map; callers keep keys unique (see `map_insert`)
    pub fn map(entries: Vec<(Value, Value)>) -> Value {
        Value::Map(shared(entries, |(k, v)| k.depth().max(v.depth())))
    }

    /// Collection nesting depth. Scalars and procedures count as zero, code
    /// as the depth of its tree.
    pub fn depth(&self) -> usize {
        match self {
            Value::Map(entries) => entries.depth,
            Value::List(items) | Value::Set(items) => items.depth,
            Value::Code(expr) => expr.depth(),
            _ => 0,
        }
    }

    /// Human-readable kind name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Symbol(_) => "symbol",
            Value::Map(_) => "map",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Code(_) => "code",
            Value::Procedure { .. } => "procedure",
            Value::Primitive { .. } => "primitive",
            Value::Unit => "unit",
        }
    }

    /// Truthiness as used by `if`
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Unit => false,
            Value::Integer(n) => *n != 0,
            Value::Decimal(d) => *d != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
            Value::List(items) | Value::Set(items) => !items.is_empty(),
            Value::Symbol(_)
            | Value::Code(_)
            | Value::Procedure { .. }
            | Value::Primitive { .. } => true,
        }
    }

    /// Read a map key without evaluating it. Literal atoms become their
    /// values, other atoms become symbols and composite keys stay code.
    pub fn from_key(key: &Expr) -> Value {
        match key {
            Expr::Atom(text) => match classify_atom(text) {
                AtomClass::Integer(n) => Value::Integer(n),
                AtomClass::Decimal(d) => Value::Decimal(d),
                AtomClass::String(s) => Value::String(s.to_owned()),
                AtomClass::Bool(b) => Value::Bool(b),
                AtomClass::Symbol(s) | AtomClass::IntegerOutOfRange(s) => {
                    Value::Symbol(s.to_owned())
                }
            },
            other => Value::Code(other.clone()),
        }
    }

    /// Normalise a runtime key so a quoted atom finds the entry a bare atom key created
    pub fn into_key(self) -> Value {
        match self {
            Value::Code(expr @ Expr::Atom(_)) => Value::from_key(&expr),
            other => other,
        }
    }

    /// Turn a value back into code for `eval`. Procedures, primitives and
    /// unit have no source form and yield `None`.
    pub fn to_expr(&self) -> Option<Expr> {
        match self {
            Value::Integer(n) => Some(Expr::atom(&n.to_string())),
            Value::Decimal(d) => {
                let text = format_decimal(*d);
                matches!(classify_atom(&text), AtomClass::Decimal(_)).then(|| Expr::atom(&text))
            }
            Value::String(s) => Some(Expr::atom(&format!("\"{s}\""))),
            Value::Bool(b) => Some(Expr::atom(if *b { TRUE_LITERAL } else { FALSE_LITERAL })),
            Value::Symbol(s) => Some(Expr::atom(s)),
            Value::Code(expr) => Some(expr.clone()),
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| Some((k.to_expr()?, v.to_expr()?)))
                .collect::<Option<Vec<_>>>()
                .map(Expr::map),
            Value::List(items) => items
                .iter()
                .map(Value::to_expr)
                .collect::<Option<Vec<_>>>()
                .map(Expr::list),
            Value::Set(items) => items
                .iter()
                .map(Value::to_expr)
                .collect::<Option<Vec<_>>>()
                .map(Expr::set),
            Value::Procedure { .. } | Value::Primitive { .. } | Value::Unit => None,
        }
    }

    /// Build a set, keeping the first occurrence of each distinct member
    pub fn set_from(items: impl IntoIterator<Item = Value>) -> Value {
        let mut seen = std::collections::HashSet::new();
        let mut members = Vec::new();
        for item in items {
            if seen.insert(item.clone()) {
                members.push(item);
            }
        }
        Value::Set(shared(members, Value::depth))
    }

    /// Insert or replace a map entry. A replaced entry keeps its position.
    pub(crate) fn map_insert(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
    }
}

fn format_decimal(d: DecimalType) -> String {
    let text = format!("{d:?}");
    if text.contains(['.', 'e', 'N', 'i']) {
        text
    } else {
        format!("{text}.0")
    }
}

fn normalized_bits(d: DecimalType) -> u64 {
    if d == 0.0 { 0.0f64.to_bits() } else { d.to_bits() }
}

fn unordered_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x))
}

fn map_eq(a: &[(Value, Value)], b: &[(Value, Value)]) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => normalized_bits(*a) == normalized_bits(*b),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => map_eq(a, b),
            (Value::List(a), Value::List(b)) => **a == **b,
            (Value::Set(a), Value::Set(b)) => unordered_eq(a, b),
            (Value::Code(a), Value::Code(b)) => a == b,
            (
                Value::Procedure {
                    params: p1,
                    body: b1,
                    env: e1,
                },
                Value::Procedure {
                    params: p2,
                    body: b2,
                    env: e2,
                },
            ) => p1 == p2 && b1 == b2 && e1 == e2,
            // Compare primitives by id string, not function pointer
            (Value::Primitive { id: id1, .. }, Value::Primitive { id: id2, .. }) => id1 == id2,
            (Value::Unit, Value::Unit) => true,
            _ => false, // Different kinds are never equal
        }
    }
}

impl Eq for Value {}

/// Order-independent hash of a collection: the sum of the members' own hashes
fn unordered_hash<'a, T: Hash + 'a>(items: impl Iterator<Item = &'a T>) -> u64 {
    items.fold(0u64, |acc, item| {
        let mut hasher = DefaultHasher::new();
        item.hash(&mut hasher);
        acc.wrapping_add(hasher.finish())
    })
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Integer(n) => n.hash(state),
            Value::Decimal(d) => normalized_bits(*d).hash(state),
            Value::String(s) | Value::Symbol(s) => s.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Map(entries) => {
                entries.len().hash(state);
                unordered_hash(entries.iter()).hash(state);
            }
            Value::List(items) => (**items).hash(state),
            Value::Set(items) => {
                items.len().hash(state);
                unordered_hash(items.iter()).hash(state);
            }
            Value::Code(expr) => expr.hash(state),
            Value::Procedure { params, body, env } => {
                params.hash(state);
                body.hash(state);
                env.hash(state);
            }
            Value::Primitive { id, .. } => id.hash(state),
            Value::Unit => {}
        }
    }
}

fn write_values(f: &mut fmt::Formatter<'_>, open: &str, close: &str, items: &[Value]) -> fmt::Result {
    write!(f, "{open}")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, "{close}")
}

/// Display mirrors the surface syntax, so data values print as re-readable source
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Decimal(d) => write!(f, "{}", format_decimal(*d)),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Bool(b) => write!(f, "{}", if *b { TRUE_LITERAL } else { FALSE_LITERAL }),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Map(entries) => {
                write!(f, "(")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, ")")
            }
            Value::List(items) => write_values(f, "[", "]", items),
            Value::Set(items) => write_values(f, "{", "}", items),
            Value::Code(expr) => write!(f, "{expr}"),
            Value::Procedure { params, .. } => write!(f, "#<procedure [{}]>", params.join(" ")),
            Value::Primitive { id, .. } => write!(f, "#<primitive:{id}>"),
            Value::Unit => write!(f, "#<unit>"),
        }
    }
}
