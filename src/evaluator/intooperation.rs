use crate::Error;
use crate::value::Value;
use std::sync::Arc;

// Adapter layer that turns strongly-typed Rust functions into the
// erased `OperationFn` stored in `Value::Primitive`.
//
// The evaluator gathers a primitive's arguments in the order of its
// declared parameter names, so by the time an `OperationFn` runs the
// argument vector is positional and complete. The adapters only have
// to convert each slot to the Rust parameter type.

/// Canonical erased primitive function type used by the evaluator.
///
/// Primitives receive ownership of their argument vector, in declared
/// parameter order.
pub type OperationFn = dyn Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync;

/// Converts one positional argument into a typed parameter.
pub(crate) trait FromParam {
    /// The parameter type as seen by the primitive for a given lifetime
    /// of the local argument slots.
    type Param<'a>;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error>;
}

impl FromParam for Value {
    type Param<'a> = Value;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        // Move out so primitives can consume maps and lists without cloning
        Ok(std::mem::replace(value, Value::Unit))
    }
}

// By-value parameters obtained through `TryInto` on `Value`: `i64`,
// `bool` and `Number` (see `value.rs`).
impl<T> FromParam for T
where
    Value: std::convert::TryInto<T, Error = Error>,
{
    type Param<'a> = T;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        let owned = std::mem::replace(value, Value::Unit);
        <Value as std::convert::TryInto<T>>::try_into(owned)
    }
}

impl FromParam for &str {
    type Param<'a> = &'a str;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        if let Value::String(s) = value {
            Ok(s.as_str())
        } else {
            Err(Error::TypeError(format!(
                "expected string, got {}",
                value.kind()
            )))
        }
    }
}

/// Normalizes primitive return types to `Result<Value, Error>`.
pub(crate) trait IntoValueResult {
    fn into_value_result(self) -> Result<Value, Error>;
}

impl<T> IntoValueResult for Result<T, Error>
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        self.map(Into::into)
    }
}

impl<T> IntoValueResult for T
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        Ok(self.into())
    }
}

/// Converts a strongly-typed Rust function or closure into the erased
/// [`OperationFn`], parameterized by its argument tuple and return type.
pub trait IntoOperation<Args, R> {
    /// Number of positional parameters the function takes
    const ARITY: usize;

    fn into_operation(self) -> Arc<OperationFn>;
}

fn argument_count_error(expected: usize, got: usize) -> Error {
    Error::EvalError(format!(
        "primitive expects {expected} argument(s), got {got}"
    ))
}

/// Implements `IntoOperation` for one arity. The owned argument vector is
/// destructured into local slots so `FromParam` can borrow from or consume
/// each argument before the function is invoked.
macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        #[allow(private_bounds)]
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ ), R> for F
        where
            F: for<'a> Fn( $( <$A as FromParam>::Param<'a> ),+ ) -> R
                + Send
                + Sync
                + 'static,
            $( $A: FromParam, )+
            R: IntoValueResult,
        {
            const ARITY: usize = $arity;

            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        &mut [ $( ref mut $v ),+ ] => {
                            $(
                                let $p: <$A as FromParam>::Param<'_> =
                                    <$A as FromParam>::from_arg($v)?;
                            )+

                            let result: R = (self)( $( $p ),+ );
                            result.into_value_result()
                        }
                        _ => Err(argument_count_error($arity, len)),
                    }
                })
            }
        }
    };
}

// 0-arg functions / closures
#[allow(private_bounds)]
impl<F, R> IntoOperation<(), R> for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    const ARITY: usize = 0;

    fn into_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| {
            if !args.is_empty() {
                return Err(argument_count_error(0, args.len()));
            }

            let result: R = (self)();
            result.into_value_result()
        })
    }
}

impl_into_operation_for_arity!(1, v0, p0: A1);
impl_into_operation_for_arity!(2, v0, p0: A1, v1, p1: A2);
impl_into_operation_for_arity!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);
