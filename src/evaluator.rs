//! Environments and the trampolined evaluation loop.
//!
//! [`eval_step`] performs one step of evaluation and either finishes with a
//! value or hands back the next `(expression, environment)` pair to continue
//! with. [`eval`] drives those steps in a loop, so procedure bodies and the
//! branches of `if` are evaluated in tail position without growing the host
//! stack. Only genuinely nested evaluations (arguments, predicates, map and
//! collection members) recurse, and those are bounded by [`MAX_EVAL_DEPTH`].
//! Values built along the way are bounded by [`MAX_VALUE_DEPTH`], since their
//! equality, hashing and display recurse into their members.

pub mod intooperation;

use crate::ast::{AtomClass, Expr, Form, Invocation, SpecialForm, classify_atom};
use crate::builtinops::get_builtin_ops;
use crate::value::Value;
use crate::{Error, MAX_EVAL_DEPTH, MAX_VALUE_DEPTH};
use intooperation::{IntoOperation, OperationFn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

struct Frame {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Environment>,
}

/// Environment for variable bindings.
///
/// A cheap, shared handle to one scope frame. Cloning an `Environment` shares
/// the frame, which is how closures capture the scope they were defined in.
#[derive(Clone)]
pub struct Environment(Rc<Frame>);

impl Environment {
    pub fn new() -> Self {
        Environment(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
        }))
    }

    /// A fresh, empty frame whose lookups fall back to `parent`
    pub fn with_parent(parent: &Environment) -> Self {
        Environment(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        }))
    }

    /// Bind `name` in this frame only, replacing any previous binding here
    pub fn define(&self, name: String, value: Value) {
        self.0.bindings.borrow_mut().insert(name, value);
    }

    /// Resolve `name` in the nearest frame that binds it
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.0.bindings.borrow().get(name) {
                return Some(value.clone());
            }
            frame = frame.0.parent.as_ref()?;
        }
    }

    /// Like [`Environment::get`], failing with `UnboundSymbol`
    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        self.get(name)
            .ok_or_else(|| Error::UnboundSymbol(name.to_owned()))
    }

    /// Register a custom primitive in this frame.
    ///
    /// This is the low-level API: `func` receives the evaluated arguments as a
    /// slice, in the order of `params`. For most new code, prefer
    /// [`Environment::register_builtin_operation`].
    ///
    /// # Example
    /// ```
    /// use tali::evaluator::create_global_env;
    /// use tali::parser::parse_one;
    /// use tali::value::Value;
    /// use tali::{Error, eval};
    ///
    /// fn first_of(args: &[Value]) -> Result<Value, Error> {
    ///     match args {
    ///         [Value::List(items), ..] => Ok(items.first().cloned().unwrap_or(Value::Unit)),
    ///         _ => Err(Error::TypeError("first expects a list".into())),
    ///     }
    /// }
    ///
    /// let env = create_global_env();
    /// env.register_builtin_function("first", &["l"], first_of);
    /// let expr = parse_one("(op: first, l: [7 8])")?;
    /// assert_eq!(eval(&expr, &env)?, Value::Integer(7));
    /// # Ok::<(), Error>(())
    /// ```
    pub fn register_builtin_function(
        &self,
        name: &str,
        params: &[&str],
        func: fn(&[Value]) -> Result<Value, Error>,
    ) {
        let wrapped: Arc<OperationFn> = Arc::new(move |args: Vec<Value>| func(&args));
        self.define_primitive(name, params, wrapped);
    }

    /// Register a strongly-typed Rust function or closure as a primitive,
    /// with automatic argument extraction and result conversion.
    ///
    /// ```
    /// use tali::evaluator::create_global_env;
    /// use tali::parser::parse_one;
    /// use tali::value::Value;
    /// use tali::{Error, eval};
    ///
    /// fn add(a: i64, b: i64) -> i64 { a + b }
    ///
    /// let env = create_global_env();
    /// env.register_builtin_operation::<_, (i64, i64), _>("add", &["a", "b"], add);
    /// let expr = parse_one("(f: add, a: 1, b: 2)")?;
    /// assert_eq!(eval(&expr, &env)?, Value::Integer(3));
    /// # Ok::<(), Error>(())
    /// ```
    ///
    /// Supported parameter types: `i64`, `bool`, `Number`, `&str` and
    /// `Value`. Return types: anything `Into<Value>`, or `Result<R, Error>`
    /// of such a type. Conversion failures surface as `TypeError`.
    pub fn register_builtin_operation<F, Args, R>(&self, name: &str, params: &[&str], func: F)
    where
        F: IntoOperation<Args, R>,
    {
        if params.len() != <F as IntoOperation<Args, R>>::ARITY {
            log::warn!(
                "primitive {name} declares {} parameter(s) but takes {}",
                params.len(),
                <F as IntoOperation<Args, R>>::ARITY
            );
        }
        self.define_primitive(name, params, func.into_operation());
    }

    fn define_primitive(&self, name: &str, params: &[&str], func: Arc<OperationFn>) {
        self.define(
            name.to_owned(),
            Value::Primitive {
                id: name.to_owned(),
                params: params.iter().map(|p| (*p).to_owned()).collect(),
                func,
            },
        );
    }

    /// Get all bindings in this environment and its parents
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut frames = Vec::new();
        let mut frame = Some(self);
        while let Some(env) = frame {
            frames.push(env);
            frame = env.0.parent.as_ref();
        }

        // Outermost first, so inner bindings override
        let mut bindings = HashMap::new();
        for env in frames.into_iter().rev() {
            for (name, value) in env.0.bindings.borrow().iter() {
                bindings.insert(name.clone(), value.clone());
            }
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames are compared by identity
impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Environment {}

impl Hash for Environment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Rc::as_ptr(&self.0), state);
    }
}

// Bound values may close over this very frame, so only names are shown
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.0.bindings.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("names", &names)
            .field("has_parent", &self.0.parent.is_some())
            .finish()
    }
}

/// Outcome of one evaluation step
#[derive(Debug)]
pub enum Step {
    /// Evaluation finished with a value
    Done(Value),
    /// Continue with this expression in this environment (tail position)
    Tail(Expr, Environment),
}

/// Evaluate an expression (public API)
pub fn eval(expr: &Expr, env: &Environment) -> Result<Value, Error> {
    eval_with_depth_tracking(expr, env, 0)
}

/// Perform a single evaluation step without following tail positions
pub fn eval_step(expr: &Expr, env: &Environment) -> Result<Step, Error> {
    step(expr, env, 0)
}

/// Evaluate to completion, iterating over tail steps at a constant `depth`
fn eval_with_depth_tracking(expr: &Expr, env: &Environment, depth: usize) -> Result<Value, Error> {
    if depth >= MAX_EVAL_DEPTH {
        return Err(Error::EvalError(format!(
            "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
        )));
    }

    let mut current = step(expr, env, depth)?;
    loop {
        match current {
            Step::Done(value) => return Ok(value),
            Step::Tail(next, next_env) => {
                log::trace!("tail step: {next}");
                current = step(&next, &next_env, depth)?;
            }
        }
    }
}

fn step(expr: &Expr, env: &Environment, depth: usize) -> Result<Step, Error> {
    match expr {
        Expr::Atom(text) => eval_atom(text, env).map(Step::Done),

        // Map literal: keys are read, never evaluated
        Expr::Map(entries) => {
            let mut result = Vec::with_capacity(entries.len());
            for (key, value) in entries.iter() {
                let value = eval_with_depth_tracking(value, env, depth + 1)?;
                Value::map_insert(&mut result, Value::from_key(key), value);
            }
            bounded(Value::map(result)).map(Step::Done)
        }

        Expr::List(elements) => {
            let items = eval_all(elements, env, depth)?;
            bounded(Value::list(items)).map(Step::Done)
        }

        // Members are deduplicated only after evaluation
        Expr::Set(elements) => {
            let members = eval_all(elements, env, depth)?;
            bounded(Value::set_from(members)).map(Step::Done)
        }

        // Markers carry no evaluation semantics
        Expr::Meta(_, inner) => Ok(Step::Tail((**inner).clone(), env.clone())),

        Expr::Invocation(invocation) => {
            eval_invocation(invocation, env, depth).map_err(|err| add_context(err, expr))
        }
    }
}

fn eval_atom(text: &str, env: &Environment) -> Result<Value, Error> {
    match classify_atom(text) {
        AtomClass::Integer(n) => Ok(Value::Integer(n)),
        AtomClass::IntegerOutOfRange(literal) => Err(Error::EvalError(format!(
            "Integer literal out of range: {literal}"
        ))),
        AtomClass::Decimal(d) => Ok(Value::Decimal(d)),
        AtomClass::String(s) => Ok(Value::String(s.to_owned())),
        AtomClass::Bool(b) => Ok(Value::Bool(b)),
        AtomClass::Symbol(name) => env.lookup(name),
    }
}

/// Helper function to evaluate a sequence of expressions left to right
fn eval_all(elements: &[Expr], env: &Environment, depth: usize) -> Result<Vec<Value>, Error> {
    let mut values = Vec::with_capacity(elements.len());
    for elem in elements {
        values.push(eval_with_depth_tracking(elem, env, depth + 1)?);
    }
    Ok(values)
}

/// Refuse values nested deeper than [`MAX_VALUE_DEPTH`]
fn bounded(value: Value) -> Result<Value, Error> {
    if value.depth() > MAX_VALUE_DEPTH {
        return Err(Error::EvalError(format!(
            "Value nesting limit exceeded (max: {MAX_VALUE_DEPTH})"
        )));
    }
    Ok(value)
}

const CONTEXT_MARKER: &str = "\n  Context: ";

/// Helper function to add invocation context to errors.
/// Only the innermost invocation is recorded.
fn add_context(error: Error, expr: &Expr) -> Error {
    let annotate = |msg: String| {
        if msg.contains(CONTEXT_MARKER) {
            msg
        } else {
            format!("{msg}{CONTEXT_MARKER}while evaluating: {expr}")
        }
    };
    match error {
        Error::EvalError(msg) => Error::EvalError(annotate(msg)),
        Error::TypeError(msg) => Error::TypeError(annotate(msg)),
        // Unbound symbols, arity and operator errors already name their subject
        other => other,
    }
}

fn eval_invocation(inv: &Invocation, env: &Environment, depth: usize) -> Result<Step, Error> {
    match inv.form() {
        Form::Special(SpecialForm::Quote) => eval_quote(inv),
        Form::Special(SpecialForm::If) => eval_if(inv, env, depth),
        Form::Special(SpecialForm::Def) => eval_def(inv, env, depth),
        Form::Special(SpecialForm::Eval) => eval_eval(inv, env, depth),
        Form::Call => eval_call(inv, env, depth),
    }
}

/// Payload entry of a special form; absence is an arity error
fn payload<'a>(inv: &'a Invocation, form: SpecialForm, key: &str) -> Result<&'a Expr, Error> {
    inv.argument(key)
        .ok_or_else(|| Error::arity_error(form.name(), key))
}

/// Evaluate quote special form
fn eval_quote(inv: &Invocation) -> Result<Step, Error> {
    let quoted = payload(inv, SpecialForm::Quote, "q")?;
    Ok(Step::Done(Value::Code(quoted.clone())))
}

/// Evaluate if special form: only the selected branch is evaluated, in tail position
fn eval_if(inv: &Invocation, env: &Environment, depth: usize) -> Result<Step, Error> {
    let predicate = payload(inv, SpecialForm::If, "p")?;
    let then_branch = payload(inv, SpecialForm::If, "t")?;
    let else_branch = payload(inv, SpecialForm::If, "f")?;

    let condition = eval_with_depth_tracking(predicate, env, depth + 1)?;
    let branch = if condition.is_truthy() {
        then_branch
    } else {
        else_branch
    };
    Ok(Step::Tail(branch.clone(), env.clone()))
}

fn symbol_name(expr: &Expr) -> Option<&str> {
    match expr.as_atom().map(classify_atom) {
        Some(AtomClass::Symbol(name)) => Some(name),
        _ => None,
    }
}

fn parameter_names(params: &Expr) -> Result<Vec<String>, Error> {
    let Expr::List(elements) = params else {
        return Err(Error::TypeError(format!(
            "def parameters must be a list of symbols, got {params}"
        )));
    };

    let mut names: Vec<String> = Vec::with_capacity(elements.len());
    for param in elements.iter() {
        let Some(name) = symbol_name(param) else {
            return Err(Error::TypeError(format!(
                "def parameters must be symbols, got {param}"
            )));
        };
        if names.iter().any(|existing| existing == name) {
            return Err(Error::EvalError(format!("Duplicate parameter name: {name}")));
        }
        names.push(name.to_owned());
    }
    Ok(names)
}

/// Evaluate def special form.
///
/// With `p` the body under `f` is captured unevaluated as a procedure that
/// closes over `env`; without `p` the value of `f` is bound.
fn eval_def(inv: &Invocation, env: &Environment, depth: usize) -> Result<Step, Error> {
    let name_expr = payload(inv, SpecialForm::Def, "n")?;
    let Some(name) = symbol_name(name_expr) else {
        return Err(Error::TypeError(format!(
            "def requires a symbol name, got {name_expr}"
        )));
    };
    let body = payload(inv, SpecialForm::Def, "f")?;

    let value = match inv.argument("p") {
        Some(params) => Value::Procedure {
            params: parameter_names(params)?,
            body: body.clone(),
            env: env.clone(),
        },
        None => eval_with_depth_tracking(body, env, depth + 1)?,
    };

    log::debug!("def {name} = {value}");
    env.define(name.to_owned(), value);
    Ok(Step::Done(Value::Unit))
}

/// Evaluate eval special form: evaluate `e`, then continue with the result as code
fn eval_eval(inv: &Invocation, env: &Environment, depth: usize) -> Result<Step, Error> {
    let source = payload(inv, SpecialForm::Eval, "e")?;
    let value = eval_with_depth_tracking(source, env, depth + 1)?;
    match value.to_expr() {
        Some(code) => Ok(Step::Tail(code, env.clone())),
        None => Ok(Step::Done(value)),
    }
}

/// Evaluate the arguments a callee declares, in declared order
fn eval_arguments(
    inv: &Invocation,
    params: &[String],
    env: &Environment,
    depth: usize,
) -> Result<Vec<Value>, Error> {
    let mut args = Vec::with_capacity(params.len());
    for param in params {
        let arg = inv
            .argument(param)
            .ok_or_else(|| Error::arity_error(inv.operator().to_string(), param.clone()))?;
        args.push(eval_with_depth_tracking(arg, env, depth + 1)?);
    }
    Ok(args)
}

/// Generic call of a primitive or user procedure
fn eval_call(inv: &Invocation, env: &Environment, depth: usize) -> Result<Step, Error> {
    let operator = inv.operator();
    let callee = match symbol_name(operator) {
        Some(name) => env
            .get(name)
            .ok_or_else(|| Error::UnknownOperator(name.to_owned()))?,
        None => eval_with_depth_tracking(operator, env, depth + 1)?,
    };

    match callee {
        // Primitives always complete synchronously
        Value::Primitive { id, params, func } => {
            let args = eval_arguments(inv, &params, env, depth)?;
            log::trace!("primitive {id} called with {} argument(s)", args.len());
            func(args).and_then(bounded).map(Step::Done)
        }
        Value::Procedure {
            params,
            body,
            env: closure_env,
        } => {
            let args = eval_arguments(inv, &params, env, depth)?;

            // New frame under the closure's environment, not the caller's
            let frame = Environment::with_parent(&closure_env);
            for (param, arg) in params.into_iter().zip(args) {
                frame.define(param, arg);
            }
            log::trace!("entering procedure {operator}");
            Ok(Step::Tail(body, frame))
        }
        other => Err(Error::UnknownOperator(format!(
            "{operator} evaluates to a {} and cannot be called",
            other.kind()
        ))),
    }
}

/// Create a global environment with the primitive procedures
pub fn create_global_env() -> Environment {
    let env = Environment::new();
    for builtin_op in get_builtin_ops() {
        env.define(builtin_op.id.to_owned(), builtin_op.to_value());
    }
    env
}
