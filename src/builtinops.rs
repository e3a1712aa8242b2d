//! Registry of primitive procedures installed in the root environment.
//!
//! Every primitive declares the parameter names it reads from an invocation
//! map. The evaluator evaluates the matching entries in declared order and
//! hands the values over positionally:
//!
//! ```text
//! (op: +, a: 1, b: 2)              ; 3
//! (op: //, a: -7, b: 2)            ; -4
//! (op: idx, m: [10 20], k: 1)      ; 20
//! (op: bnd, m: ("x": 1), k: "x", v: 2)
//! ```
//!
//! ## Quoted code
//!
//! `idx` and `bnd` also work on quoted maps, calls and lists, which is how a
//! program inspects and rewrites code before handing it to `eval`. Entries are
//! read the way map keys are: atoms become literals or symbols, subtrees stay
//! code. `bnd` rebuilds the tree, so binding an operator key turns a literal
//! map into a call.
//!
//! ```text
//! (op: idx, m: (op: quote, q: (a: 1)), k: (op: quote, q: a))   ; 1
//! ```
//!
//! ## Numbers
//!
//! Integer arithmetic is checked and reports overflow. As soon as one operand
//! is a decimal the operation is carried out in decimal. `/` always produces
//! a decimal, `//` floors towards negative infinity.
//!
//! ## Special forms
//!
//! `quote`, `if`, `def` and `eval` are recognised structurally by the parser
//! and evaluator. They are not part of this registry and cannot be rebound.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with typed parameters (`Number`, `i64`,
//!    `bool`, `&str` or `Value`) returning a value or `Result<_, Error>`
//! 2. **Add to BUILTIN_OPS** with its identifier and parameter names, one name
//!    per Rust parameter
//! 3. **Add tests** covering edge cases and error conditions

use crate::Error;
use crate::ast::Expr;
use crate::evaluator::intooperation::{IntoOperation, OperationFn};
use crate::value::{Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Definition of a primitive procedure
#[derive(Clone)]
pub struct BuiltinOp {
    /// Name bound in the root environment
    pub id: &'static str,
    /// Declared parameter names, in the order arguments are evaluated
    pub params: &'static [&'static str],
    /// Implementation through the canonical erased signature
    pub func: Arc<OperationFn>,
}

impl fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinOp")
            .field("id", &self.id)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl BuiltinOp {
    /// The runtime value bound under this primitive's name
    pub fn to_value(&self) -> Value {
        Value::Primitive {
            id: self.id.to_owned(),
            params: self.params.iter().map(|p| (*p).to_owned()).collect(),
            func: Arc::clone(&self.func),
        }
    }
}

//
// Builtin Function Implementations
//

fn overflow(operation: &str) -> Error {
    Error::EvalError(format!("Integer overflow in {operation}"))
}

// Macro to generate the checked binary arithmetic functions
macro_rules! arithmetic {
    ($name:ident, $checked:ident, $op:tt, $label:expr) => {
        fn $name(a: Number, b: Number) -> Result<Value, Error> {
            match (a, b) {
                (Number::Integer(x), Number::Integer(y)) => x
                    .$checked(y)
                    .map(Value::Integer)
                    .ok_or_else(|| overflow($label)),
                _ => Ok(Value::Decimal(a.as_decimal() $op b.as_decimal())),
            }
        }
    };
}

arithmetic!(builtin_add, checked_add, +, "addition");
arithmetic!(builtin_sub, checked_sub, -, "subtraction");
arithmetic!(builtin_mul, checked_mul, *, "multiplication");

fn division_by_zero() -> Error {
    Error::EvalError("division by zero".into())
}

fn builtin_div(a: Number, b: Number) -> Result<f64, Error> {
    let divisor = b.as_decimal();
    if divisor == 0.0 {
        return Err(division_by_zero());
    }
    Ok(a.as_decimal() / divisor)
}

fn builtin_floor_div(a: Number, b: Number) -> Result<Value, Error> {
    match (a, b) {
        (Number::Integer(_), Number::Integer(0)) => Err(division_by_zero()),
        (Number::Integer(x), Number::Integer(y)) => {
            let quotient = x.checked_div(y).ok_or_else(|| overflow("division"))?;
            // Truncation rounds towards zero; step down when the signs differ
            if x % y != 0 && ((x < 0) != (y < 0)) {
                Ok(Value::Integer(quotient - 1))
            } else {
                Ok(Value::Integer(quotient))
            }
        }
        _ => {
            let divisor = b.as_decimal();
            if divisor == 0.0 {
                return Err(division_by_zero());
            }
            Ok(Value::Decimal((a.as_decimal() / divisor).floor()))
        }
    }
}

/// Order two numbers, or two strings lexicographically
fn compare(a: &Value, b: &Value) -> Result<Ordering, Error> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(x.cmp(y)),
        (Value::Integer(_) | Value::Decimal(_), Value::Integer(_) | Value::Decimal(_)) => {
            let (x, y) = (as_decimal(a), as_decimal(b));
            x.partial_cmp(&y)
                .ok_or_else(|| Error::EvalError(format!("cannot order {x} and {y}")))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(Error::TypeError(format!(
            "comparison requires two numbers or two strings, got {} and {}",
            a.kind(),
            b.kind()
        ))),
    }
}

fn as_decimal(value: &Value) -> f64 {
    match value {
        Value::Integer(n) => *n as f64,
        Value::Decimal(d) => *d,
        _ => f64::NAN,
    }
}

// Macro to generate the ordering comparisons
macro_rules! ordering_comparison {
    ($name:ident, $test:ident) => {
        fn $name(a: Value, b: Value) -> Result<bool, Error> {
            compare(&a, &b).map(Ordering::$test)
        }
    };
}

ordering_comparison!(builtin_gt, is_gt);
ordering_comparison!(builtin_lt, is_lt);
ordering_comparison!(builtin_ge, is_ge);
ordering_comparison!(builtin_le, is_le);

/// Numbers compare by magnitude across integer and decimal; everything else
/// uses the structural equality of `Value`
fn builtin_eq(a: Value, b: Value) -> bool {
    match (&a, &b) {
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Integer(_) | Value::Decimal(_), Value::Integer(_) | Value::Decimal(_)) => {
            as_decimal(&a) == as_decimal(&b)
        }
        _ => a == b,
    }
}

fn list_index(key: &Value, len: usize) -> Result<usize, Error> {
    match key {
        Value::Integer(n) => usize::try_from(*n)
            .ok()
            .filter(|i| *i < len)
            .ok_or_else(|| {
                Error::EvalError(format!("index {n} out of range for list of length {len}"))
            }),
        other => Err(Error::TypeError(format!(
            "list index must be an integer, got {}",
            other.kind()
        ))),
    }
}

/// Entries of a quoted map or call
fn code_entries(expr: &Expr) -> Option<&[(Expr, Expr)]> {
    match expr {
        Expr::Map(entries) => Some(entries),
        Expr::Invocation(inv) => Some(inv.entries()),
        _ => None,
    }
}

fn into_code(value: &Value) -> Result<Expr, Error> {
    value.to_expr().ok_or_else(|| {
        Error::TypeError(format!("a {} cannot be placed into quoted code", value.kind()))
    })
}

fn builtin_bnd(m: Value, k: Value, v: Value) -> Result<Value, Error> {
    match m {
        Value::Map(entries) => {
            let mut entries = entries.into_vec();
            Value::map_insert(&mut entries, k.into_key(), v);
            Ok(Value::map(entries))
        }
        Value::List(items) => {
            let i = list_index(&k, items.len())?;
            let mut items = items.into_vec();
            items[i] = v;
            Ok(Value::list(items))
        }
        Value::Code(expr) => bnd_code(&expr, k, &v),
        other => Err(Error::TypeError(format!(
            "bnd requires a map or a list, got {}",
            other.kind()
        ))),
    }
}

/// Rebind an entry of quoted code, rebuilding the tree around it
fn bnd_code(expr: &Expr, k: Value, v: &Value) -> Result<Value, Error> {
    if let Some(entries) = code_entries(expr) {
        let key = k.into_key();
        let mut entries = entries.to_vec();
        let value = into_code(v)?;
        // Repeated keys resolve to the last entry, as arguments do
        match entries
            .iter_mut()
            .rfind(|(candidate, _)| Value::from_key(candidate) == key)
        {
            Some(entry) => entry.1 = value,
            None => entries.push((into_code(&key)?, value)),
        }
        return Ok(Value::Code(Expr::map(entries)));
    }

    match expr {
        Expr::List(elements) => {
            let i = list_index(&k, elements.len())?;
            let mut elements = elements.to_vec();
            elements[i] = into_code(v)?;
            Ok(Value::Code(Expr::list(elements)))
        }
        other => Err(Error::TypeError(format!("bnd cannot rebind inside quoted {other}"))),
    }
}

fn builtin_idx(m: Value, k: Value) -> Result<Value, Error> {
    match m {
        Value::Map(entries) => {
            let key = k.into_key();
            entries
                .iter()
                .find(|(candidate, _)| *candidate == key)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| Error::EvalError(format!("key {key} not found in map")))
        }
        Value::List(items) => {
            let i = list_index(&k, items.len())?;
            Ok(items[i].clone())
        }
        Value::Code(expr) => idx_code(&expr, k),
        other => Err(Error::TypeError(format!(
            "idx requires a map or a list, got {}",
            other.kind()
        ))),
    }
}

/// Read an entry of quoted code as data
fn idx_code(expr: &Expr, k: Value) -> Result<Value, Error> {
    if let Some(entries) = code_entries(expr) {
        let key = k.into_key();
        return entries
            .iter()
            .rev()
            .find(|(candidate, _)| Value::from_key(candidate) == key)
            .map(|(_, value)| Value::from_key(value))
            .ok_or_else(|| Error::EvalError(format!("key {key} not found in quoted {expr}")));
    }

    match expr {
        Expr::List(elements) => {
            let i = list_index(&k, elements.len())?;
            Ok(Value::from_key(&elements[i]))
        }
        other => Err(Error::TypeError(format!("idx cannot look inside quoted {other}"))),
    }
}

fn builtin_print(x: Value) -> Value {
    match x {
        Value::String(s) => println!("{s}"),
        other => println!("{other}"),
    }
    Value::Unit
}

/// Global registry of all primitive procedures.
///
/// Each implementation is wired through the same adapter layer used for
/// custom primitive registration, once, at initialization time.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn builtin<Args, R, F>(id: &'static str, params: &'static [&'static str], f: F) -> BuiltinOp
    where
        F: IntoOperation<Args, R>,
    {
        debug_assert_eq!(
            params.len(),
            <F as IntoOperation<Args, R>>::ARITY,
            "parameter names of {id}"
        );
        BuiltinOp {
            id,
            params,
            func: <F as IntoOperation<Args, R>>::into_operation(f),
        }
    }

    const AB: &[&str] = &["a", "b"];

    vec![
        // Arithmetic
        builtin::<(Number, Number), _, _>("+", AB, builtin_add),
        builtin::<(Number, Number), _, _>("-", AB, builtin_sub),
        builtin::<(Number, Number), _, _>("*", AB, builtin_mul),
        builtin::<(Number, Number), _, _>("/", AB, builtin_div),
        builtin::<(Number, Number), _, _>("//", AB, builtin_floor_div),
        // Comparison
        builtin::<(Value, Value), _, _>(">", AB, builtin_gt),
        builtin::<(Value, Value), _, _>("<", AB, builtin_lt),
        builtin::<(Value, Value), _, _>(">=", AB, builtin_ge),
        builtin::<(Value, Value), _, _>("<=", AB, builtin_le),
        builtin::<(Value, Value), _, _>("=", AB, builtin_eq),
        // Collections
        builtin::<(Value, Value, Value), _, _>("bnd", &["m", "k", "v"], builtin_bnd),
        builtin::<(Value, Value), _, _>("idx", &["m", "k"], builtin_idx),
        // I/O
        builtin::<(Value,), _, _>("print", &["x"], builtin_print),
    ]
});

/// Lazy static map from identifier to BuiltinOp (private - use find_builtin_op)
static BUILTIN_INDEX: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.id, op)).collect()
});

/// Get all builtin operations (for internal use by evaluator)
pub(crate) fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by its identifier
pub fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_INDEX.get(id).copied()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::parser::parse_one;
    use crate::value::{sym, val};

    /// Micro-helper for success cases in data-driven tests
    fn success<T: Into<Value>>(value: T) -> Option<Value> {
        Some(val(value))
    }

    /// Invoke a builtin through the registry using the erased signature,
    /// exercising the adapter layer rather than the typed helpers.
    fn call_builtin(name: &str, args: &[Value]) -> Result<Value, Error> {
        let op = find_builtin_op(name).unwrap();
        (op.func)(args.to_vec())
    }

    /// Macro to create test cases, invoking builtins via the registry.
    macro_rules! test {
        ($name:expr, $args:expr, $expected:expr) => {
            ($name, call_builtin($name, $args), $expected)
        };
    }

    #[test]
    fn test_builtin_ops_registry() {
        let add = find_builtin_op("+").unwrap();
        assert_eq!(add.params, &["a", "b"]);
        assert_eq!((add.func)(vec![val(1), val(2)]).unwrap(), val(3));

        assert_eq!(find_builtin_op("bnd").unwrap().params, &["m", "k", "v"]);
        assert_eq!(find_builtin_op("print").unwrap().params, &["x"]);

        // Special forms are not primitives
        for special in ["quote", "if", "def", "eval"] {
            assert!(find_builtin_op(special).is_none(), "{special} must not be registered");
        }
        assert!(find_builtin_op("unknown").is_none());

        let ids: Vec<&str> = get_builtin_ops().iter().map(|op| op.id).collect();
        for id in ["+", "-", "*", "/", "//", ">", "<", ">=", "<=", "=", "bnd", "idx", "print"] {
            assert!(ids.contains(&id), "missing primitive {id}");
        }

        match add.to_value() {
            Value::Primitive { id, params, .. } => {
                assert_eq!(id, "+");
                assert_eq!(params, vec!["a".to_owned(), "b".to_owned()]);
            }
            other => panic!("expected primitive, got {other:?}"),
        }
    }

    #[test]
    fn test_builtin_function_implementations() {
        type TestCase = (&'static str, Result<Value, Error>, Option<Value>);

        let map = Value::map(vec![(sym("a"), val(1)), (val("b"), val(2))]);
        let quoted_a = Value::Code(Expr::atom("a"));
        let quoted = |source: &str| Value::Code(parse_one(source).unwrap());
        let quoted_map = quoted("(a: 1, b: [x y], a: 3)");
        let quoted_call = quoted("(op: +, a: 1, b: 2)");
        let quoted_list = quoted("[x 2 (k: v)]");

        let test_cases: Vec<TestCase> = vec![
            // === ARITHMETIC ===
            test!("+", &[val(1), val(2)], success(3)),
            test!("+", &[val(-5), val(10)], success(5)),
            test!("+", &[val(1), val(0.5)], success(1.5)),
            test!("+", &[val(0.25), val(0.5)], success(0.75)),
            test!("+", &[val(i64::MAX), val(1)], None),
            test!("+", &[val("1"), val(2)], None),
            test!("-", &[val(10), val(3)], success(7)),
            test!("-", &[val(i64::MIN), val(1)], None),
            test!("-", &[val(1.5), val(1)], success(0.5)),
            test!("*", &[val(6), val(7)], success(42)),
            test!("*", &[val(2), val(0.5)], success(1.0)),
            test!("*", &[val(4_611_686_018_427_387_904i64), val(2)], None),
            test!("*", &[val(true), val(2)], None),
            // True division always yields a decimal
            test!("/", &[val(7), val(2)], success(3.5)),
            test!("/", &[val(6), val(3)], success(2.0)),
            test!("/", &[val(1), val(0)], None),
            test!("/", &[val(1.0), val(0.0)], None),
            // Floor division
            test!("//", &[val(7), val(2)], success(3)),
            test!("//", &[val(-7), val(2)], success(-4)),
            test!("//", &[val(7), val(-2)], success(-4)),
            test!("//", &[val(-7), val(-2)], success(3)),
            test!("//", &[val(6), val(-3)], success(-2)),
            test!("//", &[val(7.5), val(2)], success(3.0)),
            test!("//", &[val(-7.5), val(2)], success(-4.0)),
            test!("//", &[val(1), val(0)], None),
            test!("//", &[val(i64::MIN), val(-1)], None),
            // === COMPARISON ===
            test!(">", &[val(5), val(3)], success(true)),
            test!(">", &[val(3), val(5)], success(false)),
            test!("<", &[val(-5), val(-3)], success(true)),
            test!("<", &[val(1), val(1.5)], success(true)),
            test!(">=", &[val(5), val(5)], success(true)),
            test!(">=", &[val(4.9), val(5)], success(false)),
            test!("<=", &[val(5), val(5.0)], success(true)),
            test!("<", &[val("apple"), val("banana")], success(true)),
            test!(">", &[val("apple"), val("banana")], success(false)),
            test!("<", &[val(1), val("2")], None),
            test!(">", &[val(true), val(false)], None),
            // === EQUALITY ===
            test!("=", &[val(5), val(5)], success(true)),
            test!("=", &[val(5), val(6)], success(false)),
            test!("=", &[val(1), val(1.0)], success(true)),
            test!("=", &[val(1), val("1")], success(false)),
            test!("=", &[val("a"), val("a")], success(true)),
            test!("=", &[val([1, 2]), val([1, 2])], success(true)),
            test!("=", &[val([1, 2]), val([2, 1])], success(false)),
            test!("=", &[val(true), val(true)], success(true)),
            test!("=", &[Value::Unit, Value::Unit], success(true)),
            // === BND ===
            test!(
                "bnd",
                &[map.clone(), val("b"), val(20)],
                Some(Value::map(vec![(sym("a"), val(1)), (val("b"), val(20))]))
            ),
            test!(
                "bnd",
                &[map.clone(), quoted_a.clone(), val(10)],
                Some(Value::map(vec![(sym("a"), val(10)), (val("b"), val(2))]))
            ),
            test!(
                "bnd",
                &[Value::map(vec![]), val(1), val("one")],
                Some(Value::map(vec![(val(1), val("one"))]))
            ),
            test!("bnd", &[val([1, 2, 3]), val(1), val(20)], success([1, 20, 3])),
            test!("bnd", &[val([1, 2, 3]), val(3), val(0)], None),
            test!("bnd", &[val([1, 2, 3]), val(-1), val(0)], None),
            test!("bnd", &[val([1, 2, 3]), val("0"), val(0)], None),
            test!("bnd", &[val(5), val(0), val(0)], None),
            // === IDX ===
            test!("idx", &[map.clone(), quoted_a.clone()], success(1)),
            test!("idx", &[map.clone(), sym("a")], success(1)),
            test!("idx", &[map.clone(), val("b")], success(2)),
            test!("idx", &[map.clone(), val("a")], None),
            test!("idx", &[val([10, 20, 30]), val(2)], success(30)),
            test!("idx", &[val([10, 20, 30]), val(0)], success(10)),
            test!("idx", &[val([10]), val(1)], None),
            test!("idx", &[val("text"), val(0)], None),
            // === QUOTED CODE ===
            // Entries read as data: atoms as literals, subtrees as code
            test!("idx", &[quoted_map.clone(), quoted_a.clone()], success(3)),
            test!("idx", &[quoted_map.clone(), sym("b")], Some(quoted("[x y]"))),
            test!("idx", &[quoted_map.clone(), sym("c")], None),
            test!("idx", &[quoted_call.clone(), sym("op")], Some(sym("+"))),
            test!("idx", &[quoted_call.clone(), sym("b")], success(2)),
            test!("idx", &[quoted_list.clone(), val(0)], Some(sym("x"))),
            test!("idx", &[quoted_list.clone(), val(2)], Some(quoted("(k: v)"))),
            test!("idx", &[quoted_list.clone(), val(3)], None),
            test!("idx", &[quoted_a.clone(), val(0)], None),
            test!("idx", &[quoted("{1 2}"), val(0)], None),
            test!(
                "bnd",
                &[quoted_call.clone(), sym("b"), val(40)],
                Some(quoted("(op: +, a: 1, b: 40)"))
            ),
            test!(
                "bnd",
                &[quoted_map.clone(), sym("a"), val("s")],
                Some(quoted("(a: 1, b: [x y], a: \"s\")"))
            ),
            // Binding an operator key turns a literal map into a call
            test!(
                "bnd",
                &[quoted("(a: 1, b: 2)"), sym("op"), sym("-")],
                Some(quoted("(a: 1, b: 2, op: -)"))
            ),
            test!(
                "bnd",
                &[quoted_list.clone(), val(1), val([1, 2])],
                Some(quoted("[x [1 2] (k: v)]"))
            ),
            test!("bnd", &[quoted_call.clone(), sym("a"), Value::Unit], None),
            test!("bnd", &[quoted_list.clone(), val(5), val(0)], None),
            test!("bnd", &[quoted_a.clone(), val(0), val(0)], None),
            // === PRINT ===
            test!("print", &[val("hello")], Some(Value::Unit)),
            test!("print", &[val([1, 2])], Some(Value::Unit)),
        ];

        for (i, (name, result, expected)) in test_cases.into_iter().enumerate() {
            let test_id = format!("Builtin test #{} ({name})", i + 1);
            match (result, expected) {
                (Ok(actual), Some(expected)) => {
                    assert_eq!(actual, expected, "{test_id}: wrong result");
                }
                (Err(_), None) => {}
                (Ok(actual), None) => panic!("{test_id}: expected error, got {actual:?}"),
                (Err(e), Some(expected)) => {
                    panic!("{test_id}: expected {expected:?}, got error {e}");
                }
            }
        }
    }

    #[test]
    fn test_error_kinds() {
        assert!(matches!(
            call_builtin("+", &[val("x"), val(1)]),
            Err(Error::TypeError(_))
        ));
        assert!(matches!(
            call_builtin("/", &[val(1), val(0)]),
            Err(Error::EvalError(msg)) if msg.contains("division by zero")
        ));
        assert!(matches!(
            call_builtin("+", &[val(i64::MAX), val(1)]),
            Err(Error::EvalError(msg)) if msg.contains("overflow")
        ));
        assert!(matches!(
            call_builtin("idx", &[Value::map(vec![]), val(1)]),
            Err(Error::EvalError(msg)) if msg.contains("not found")
        ));
        assert!(matches!(
            call_builtin("<", &[val([1]), val([2])]),
            Err(Error::TypeError(_))
        ));
        assert!(matches!(
            call_builtin("bnd", &[Value::Code(Expr::atom("x")), val(0), val(1)]),
            Err(Error::TypeError(msg)) if msg.contains("quoted x")
        ));
    }

    #[test]
    fn test_bnd_leaves_the_original_untouched() {
        let original = val([1, 2, 3]);
        let updated = call_builtin("bnd", &[original.clone(), val(0), val(9)]).unwrap();
        assert_eq!(original, val([1, 2, 3]));
        assert_eq!(updated, val([9, 2, 3]));

        let call = Value::Code(parse_one("(op: +, a: 1, b: 2)").unwrap());
        let rebound = call_builtin("bnd", &[call.clone(), sym("op"), sym("*")]).unwrap();
        let Value::Code(Expr::Invocation(inv)) = rebound else {
            panic!("expected a call, got {rebound:?}");
        };
        assert_eq!(inv.operator(), &Expr::atom("*"));
        assert_eq!(call, Value::Code(parse_one("(op: +, a: 1, b: 2)").unwrap()));
    }
}
