use rand::Rng;

use crate::error::{ErrorKind, RtResult};
use crate::heap::{Closure, Code};
use crate::runtime::Runtime;
use crate::types::{ty, NativeFn};
use crate::value::Value;

/// Native operations bound in the global scope of every runtime.
///
/// Each one finds its unevaluated argument list on top of the stack and
/// leaves exactly one result in its place. Special forms (`quote`, `define`,
/// `set`, `unbind`, `lambda`, `if`, `do`, `try`) look at the raw arguments;
/// everything else evaluates them first.
const NATIVES: &[(&str, NativeFn)] = &[
    ("quote", quote),
    ("define", define),
    ("set", set),
    ("unbind", unbind),
    ("lambda", lambda),
    ("if", if_form),
    ("do", do_form),
    ("list", list),
    ("cons", cons),
    ("head", head),
    ("tail", tail),
    ("empty?", is_empty),
    ("+", add),
    ("-", sub),
    ("*", mul),
    ("/", div),
    ("=", equal),
    ("<", less),
    (">", greater),
    ("not", not),
    ("error", error),
    ("try", try_form),
    ("on-unwind", on_unwind),
    ("collect", collect),
    ("type-of", type_of),
    ("coin", coin),
    ("random", random),
];

pub fn install(rt: &mut Runtime) {
    for &(name, native) in NATIVES {
        rt.define_native(name, native);
    }
}

// ============================================================================
// Special forms
// ============================================================================

/// (quote x)
fn quote(rt: &mut Runtime) -> RtResult<()> {
    let args = rt.arguments()?;
    rt.expect_arity(args.len(), 1)?;
    rt.finish(0, args[0])
}

/// (define name expr): bind in the current scope. Returns the previous value.
fn define(rt: &mut Runtime) -> RtResult<()> {
    let args = rt.arguments()?;
    rt.expect_arity(args.len(), 2)?;
    let name = rt.symbol_name(args[0])?;
    let value = rt.eval(args[1])?;
    let previous = rt.environment().bind(&name, value);
    rt.finish(0, previous.flatten())
}

/// (set name expr): rebind where the name is found along the scope chain.
fn set(rt: &mut Runtime) -> RtResult<()> {
    let args = rt.arguments()?;
    rt.expect_arity(args.len(), 2)?;
    let name = rt.symbol_name(args[0])?;
    let value = rt.eval(args[1])?;
    match rt.environment().assign(&name, value) {
        Some(previous) => rt.finish(0, previous),
        None => rt.raise(ErrorKind::UnboundSymbol(name)),
    }
}

/// (unbind name): drop a binding from the current scope.
fn unbind(rt: &mut Runtime) -> RtResult<()> {
    let args = rt.arguments()?;
    rt.expect_arity(args.len(), 1)?;
    let name = rt.symbol_name(args[0])?;
    let previous = rt.environment().unbind(&name);
    rt.finish(0, previous.flatten())
}

/// (lambda (params...) body...)
fn lambda(rt: &mut Runtime) -> RtResult<()> {
    let args = rt.peek(0)?;
    let cell = rt.cell(args)?;
    if cell.is_empty() {
        return rt.raise(ErrorKind::Arity {
            expected: 1,
            got: 0,
        });
    }

    let mut params = Vec::new();
    for param in rt.list_items(cell.value)? {
        params.push(rt.symbol_name(param)?);
    }
    let body = match cell.next {
        Some(body) => body,
        None => rt.empty_list(),
    };
    let closure = Closure {
        params,
        body,
        env: rt.environment(),
    };
    let function = rt.make_function("lambda", Code::User(closure))?;
    rt.finish(0, Some(function))
}

/// (if test then [else])
fn if_form(rt: &mut Runtime) -> RtResult<()> {
    let args = rt.arguments()?;
    if !(2..=3).contains(&args.len()) {
        let expected = if args.len() < 2 { 2 } else { 3 };
        return rt.raise(ErrorKind::Arity {
            expected,
            got: args.len(),
        });
    }
    let test = rt.eval(args[0])?;
    let branch = if rt.is_truthy(test) {
        Some(args[1])
    } else {
        args.get(2).copied()
    };
    let result = match branch {
        Some(form) => rt.eval(form)?,
        None => None,
    };
    rt.finish(0, result)
}

/// (do forms...): the value of the last form.
fn do_form(rt: &mut Runtime) -> RtResult<()> {
    let mut result = None;
    for form in rt.arguments()? {
        result = rt.eval(form)?;
    }
    rt.finish(0, result)
}

/// (try expr): the value of `expr`, or the Error object it raised.
fn try_form(rt: &mut Runtime) -> RtResult<()> {
    let args = rt.arguments()?;
    rt.expect_arity(args.len(), 1)?;
    let form = args[0];
    let result = match rt.protect(|rt| rt.eval(form))? {
        Ok(value) => value,
        Err(error) => Some(error),
    };
    rt.finish(0, result)
}

// ============================================================================
// Lists
// ============================================================================

fn list(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    let list = rt.list_from_stack(values.len())?;
    rt.finish(0, Some(list))
}

/// (cons x list)
fn cons(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    rt.expect_arity(values.len(), 2)?;
    rt.cell(values[1])?;
    let tail = match values[1] {
        Some(tail) => tail,
        None => return rt.raise(ErrorKind::TypeMismatch),
    };
    let cell = rt.make_cell(values[0], tail)?;
    rt.finish(2, Some(cell))
}

fn head(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    rt.expect_arity(values.len(), 1)?;
    let cell = rt.cell(values[0])?;
    let result = if cell.is_empty() { None } else { cell.value };
    rt.finish(1, result)
}

fn tail(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    rt.expect_arity(values.len(), 1)?;
    let cell = rt.cell(values[0])?;
    let result = match cell.next {
        Some(next) if !cell.is_empty() => next,
        _ => rt.empty_list(),
    };
    rt.finish(1, Some(result))
}

/// (empty? x): true for the empty list and nil.
fn is_empty(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    rt.expect_arity(values.len(), 1)?;
    let empty = match values[0] {
        None => true,
        value => rt.cell(value)?.is_empty(),
    };
    let result = rt.boolean(empty);
    rt.finish(1, result)
}

// ============================================================================
// Numbers
// ============================================================================

fn numbers(rt: &mut Runtime, values: &[Value]) -> RtResult<Vec<f64>> {
    values.iter().map(|&v| rt.number(v)).collect()
}

fn finish_number(rt: &mut Runtime, evaluated: usize, value: f64) -> RtResult<()> {
    let n = rt.make_number(value)?;
    rt.finish(evaluated, Some(n))
}

fn add(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    let sum = numbers(rt, &values)?.into_iter().sum();
    finish_number(rt, values.len(), sum)
}

fn mul(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    let product = numbers(rt, &values)?.into_iter().product();
    finish_number(rt, values.len(), product)
}

/// (- x) negates; (- x y...) subtracts from x.
fn sub(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    let nums = numbers(rt, &values)?;
    let result = match nums.split_first() {
        None => {
            return rt.raise(ErrorKind::Arity {
                expected: 1,
                got: 0,
            })
        }
        Some((x, [])) => -x,
        Some((x, rest)) => rest.iter().fold(*x, |acc, n| acc - n),
    };
    finish_number(rt, values.len(), result)
}

/// (/ x) is the reciprocal; (/ x y...) divides x.
fn div(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    let nums = numbers(rt, &values)?;
    let (first, rest) = match nums.split_first() {
        None => {
            return rt.raise(ErrorKind::Arity {
                expected: 1,
                got: 0,
            })
        }
        Some((x, [])) => (1.0, std::slice::from_ref(x)),
        Some((x, rest)) => (*x, rest),
    };
    if rest.iter().any(|&d| d == 0.0) {
        return rt.raise(ErrorKind::DivisionByZero);
    }
    let result = rest.iter().fold(first, |acc, d| acc / d);
    finish_number(rt, values.len(), result)
}

/// Numbers compare by value, symbols by name, anything else by identity.
fn equal(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    rt.expect_arity(values.len(), 2)?;
    let (a, b) = (values[0], values[1]);
    let same = match (a, b) {
        (Some(x), Some(y)) if rt.type_of(x) == ty::NUMBER && rt.type_of(y) == ty::NUMBER => {
            rt.number(a)? == rt.number(b)?
        }
        (Some(x), Some(y)) if rt.type_of(x) == ty::SYMBOL && rt.type_of(y) == ty::SYMBOL => {
            rt.symbol_name(a)? == rt.symbol_name(b)?
        }
        _ => a == b,
    };
    let result = rt.boolean(same);
    rt.finish(2, result)
}

fn compare(rt: &mut Runtime, holds: fn(f64, f64) -> bool) -> RtResult<()> {
    let values = rt.eval_args()?;
    rt.expect_arity(values.len(), 2)?;
    let nums = numbers(rt, &values)?;
    let result = rt.boolean(holds(nums[0], nums[1]));
    rt.finish(2, result)
}

fn less(rt: &mut Runtime) -> RtResult<()> {
    compare(rt, |a, b| a < b)
}

fn greater(rt: &mut Runtime) -> RtResult<()> {
    compare(rt, |a, b| a > b)
}

fn not(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    rt.expect_arity(values.len(), 1)?;
    let result = rt.boolean(!rt.is_truthy(values[0]));
    rt.finish(1, result)
}

// ============================================================================
// Errors and the collector
// ============================================================================

/// (error parts...): raise an Error whose message is the printed parts.
fn error(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    let mut parts = Vec::with_capacity(values.len());
    for value in values {
        parts.push(rt.print_to_string(value)?);
    }
    rt.raise(ErrorKind::User(parts.join(" ")))
}

/// (on-unwind f): call `f` with no arguments if an error is raised while it
/// is registered. Returns `f`.
fn on_unwind(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    rt.expect_arity(values.len(), 1)?;
    let action = match values[0] {
        Some(f) if rt.type_of(f) == ty::FUNCTION => f,
        _ => return rt.raise(ErrorKind::TypeMismatch),
    };
    rt.register_unwind_action(action);
    rt.finish(1, Some(action))
}

/// (collect): run the collector now. Returns the number of objects freed.
fn collect(rt: &mut Runtime) -> RtResult<()> {
    let args = rt.arguments()?;
    rt.expect_arity(args.len(), 0)?;
    let report = rt.collect();
    finish_number(rt, 0, report.freed as f64)
}

/// (type-of x): the name of x's type as a symbol.
fn type_of(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    rt.expect_arity(values.len(), 1)?;
    let name = match values[0] {
        Some(id) => rt.type_name(id),
        None => "nil",
    };
    let symbol = rt.make_symbol(name)?;
    rt.finish(1, Some(symbol))
}

// ============================================================================
// Randomness
// ============================================================================

/// (coin): t or nil with equal probability.
fn coin(rt: &mut Runtime) -> RtResult<()> {
    let args = rt.arguments()?;
    rt.expect_arity(args.len(), 0)?;
    let mut rng = rand::thread_rng();
    let result = rt.boolean(rng.gen::<bool>());
    rt.finish(0, result)
}

/// (random n): a number in [0, n).
fn random(rt: &mut Runtime) -> RtResult<()> {
    let values = rt.eval_args()?;
    rt.expect_arity(values.len(), 1)?;
    let bound = rt.number(values[0])?;
    if !(bound > 0.0 && bound.is_finite()) {
        return rt.raise(ErrorKind::TypeMismatch);
    }
    let mut rng = rand::thread_rng();
    finish_number(rt, 1, rng.gen_range(0.0..bound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fault;

    fn run(rt: &mut Runtime, source: &str) -> String {
        match rt.eval_str(source) {
            Ok(value) => rt.print_to_string(value).unwrap(),
            Err(Fault::Raised) => rt.recover(),
            Err(fault) => panic!("{}", fault),
        }
    }

    fn eval(source: &str) -> String {
        run(&mut Runtime::new(), source)
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval("(+ 1 2 3)"), "6.000000");
        assert_eq!(eval("(+)"), "0.000000");
        assert_eq!(eval("(- 10 4 1)"), "5.000000");
        assert_eq!(eval("(- 3)"), "-3.000000");
        assert_eq!(eval("(* 2 2.5)"), "5.000000");
        assert_eq!(eval("(/ 9 2)"), "4.500000");
        assert_eq!(eval("(/ 4)"), "0.250000");
        assert_eq!(eval("(/ 1 0)"), "Error: Division by zero");
        assert_eq!(eval("(+ 1 (quote a))"), "Error: Unexpected type");
    }

    #[test]
    fn comparison_and_truth() {
        assert_eq!(eval("(< 1 2)"), "t");
        assert_eq!(eval("(> 1 2)"), "nil");
        assert_eq!(eval("(= 2 2.0)"), "t");
        assert_eq!(eval("(= (quote a) (quote a))"), "t");
        assert_eq!(eval("(= (quote a) 1)"), "nil");
        assert_eq!(eval("(not ())"), "t");
        assert_eq!(eval("(not 0)"), "nil");
    }

    #[test]
    fn conditionals_and_sequencing() {
        assert_eq!(eval("(if (< 1 2) (quote yes) (quote no))"), "yes");
        assert_eq!(eval("(if () 1)"), "nil");
        assert_eq!(eval("(do 1 2 3)"), "3.000000");
        assert_eq!(eval("(do)"), "nil");
    }

    #[test]
    fn if_arity_names_the_nearest_valid_count() {
        assert_eq!(
            eval("(if t)"),
            "Error: Wrong number of arguments: expected 2, got 1"
        );
        assert_eq!(
            eval("(if t 1 2 3)"),
            "Error: Wrong number of arguments: expected 3, got 4"
        );
    }

    #[test]
    fn list_operations() {
        assert_eq!(eval("(list 1 (+ 1 1) 3)"), "(1.000000 2.000000 3.000000)");
        assert_eq!(eval("(list)"), "()");
        assert_eq!(eval("(cons 0 (list 1))"), "(0.000000 1.000000)");
        assert_eq!(eval("(cons 1 2)"), "Error: Unexpected type");
        assert_eq!(eval("(head (quote (a b)))"), "a");
        assert_eq!(eval("(tail (quote (a b)))"), "(b)");
        assert_eq!(eval("(tail (quote (a)))"), "()");
        assert_eq!(eval("(head ())"), "nil");
        assert_eq!(eval("(empty? ())"), "t");
        assert_eq!(eval("(empty? (list 1))"), "nil");
        assert_eq!(eval("(list nil)"), "(nil)");
    }

    #[test]
    fn define_returns_previous_binding() {
        let mut rt = Runtime::new();
        assert_eq!(run(&mut rt, "(define x 1)"), "nil");
        assert_eq!(run(&mut rt, "(define x 2)"), "1.000000");
        assert_eq!(run(&mut rt, "x"), "2.000000");
        assert_eq!(run(&mut rt, "(unbind x)"), "2.000000");
        assert_eq!(run(&mut rt, "x"), "Error: Unbound symbol: x");
    }

    #[test]
    fn set_rebinds_where_found() {
        let mut rt = Runtime::new();
        run(&mut rt, "(define counter 0)");
        run(&mut rt, "(define bump (lambda () (set counter (+ counter 1))))");
        run(&mut rt, "(bump)");
        run(&mut rt, "(bump)");
        assert_eq!(run(&mut rt, "counter"), "2.000000");
        assert_eq!(run(&mut rt, "(set nope 1)"), "Error: Unbound symbol: nope");
    }

    #[test]
    fn try_returns_the_error() {
        let mut rt = Runtime::new();
        assert_eq!(run(&mut rt, "(try (error (quote boom)))"), "#<Error boom>");
        assert_eq!(run(&mut rt, "(try (+ 1 1))"), "2.000000");
        assert_eq!(run(&mut rt, "(error (quote bad) 1)"), "Error: bad 1.000000");
    }

    #[test]
    fn type_of_names_the_type() {
        assert_eq!(eval("(type-of 1)"), "Number");
        assert_eq!(eval("(type-of (quote a))"), "Symbol");
        assert_eq!(eval("(type-of ())"), "List");
        assert_eq!(eval("(type-of +)"), "Function");
        assert_eq!(eval("(type-of (try (error 1)))"), "Error");
        assert_eq!(eval("(type-of nil)"), "nil");
    }

    #[test]
    fn randomness() {
        let mut rt = Runtime::new();
        for _ in 0..20 {
            let coin = run(&mut rt, "(coin)");
            assert!(coin == "t" || coin == "nil");
            let value = rt.eval_str("(random 10)").unwrap();
            let n = rt.number(value).unwrap();
            assert!((0.0..10.0).contains(&n));
        }
        assert_eq!(run(&mut rt, "(random 0)"), "Error: Unexpected type");
    }
}
