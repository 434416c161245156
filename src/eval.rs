use log::trace;

use crate::error::{ErrorKind, RtResult};
use crate::heap::{Closure, Code, Payload};
use crate::reader::Reader;
use crate::runtime::Runtime;
use crate::stream::StringStream;
use crate::value::{ObjId, Value};

impl Runtime {
    // ========================================================================
    // Entry points
    // ========================================================================

    /// Evaluate `value` in the innermost scope of the active context. Each
    /// call is one nesting level; see `Runtime::nested`.
    pub fn eval(&mut self, value: Value) -> RtResult<Value> {
        self.nested(|rt| {
            rt.push(value)?;
            evaluate_top(rt)?;
            rt.pop()
        })
    }

    /// Read and evaluate every form in `source`, returning the last result.
    pub fn eval_str(&mut self, source: &str) -> RtResult<Value> {
        let mut reader = Reader::new(StringStream::new(source));
        // The latest result stays on the stack while the next form is read.
        self.push(None)?;
        while let Some(form) = reader.read(self)? {
            let value = self.eval(Some(form))?;
            self.replace_top(value);
        }
        self.pop()
    }

    /// Apply `function` to the unevaluated argument list `args` through its
    /// type's apply operation.
    pub fn apply(&mut self, function: ObjId, args: ObjId) -> RtResult<Value> {
        let apply = match self.descriptor(self.type_of(function)).apply {
            Some(apply) => apply,
            None => {
                let name = self.type_name(function).to_string();
                return self.raise(ErrorKind::CannotApply(name));
            }
        };
        self.push(Some(args))?;
        self.push(Some(function))?;
        apply(self)?;
        self.pop()
    }

    // ========================================================================
    // Helpers for native operations
    //
    // A native finds its argument list on top of the stack. It may leave the
    // list there while it works, which keeps the arguments rooted, and ends
    // with `finish`.
    // ========================================================================

    /// The unevaluated arguments.
    pub fn arguments(&mut self) -> RtResult<Vec<Value>> {
        let args = self.peek(0)?;
        self.list_items(args)
    }

    /// Evaluate each argument in order and push the results above the
    /// argument list. Returns copies of the pushed values.
    pub fn eval_args(&mut self) -> RtResult<Vec<Value>> {
        let args = self.peek(0)?;
        self.push_evaluated(args)
    }

    fn push_evaluated(&mut self, list: Value) -> RtResult<Vec<Value>> {
        let items = self.list_items(list)?;
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            let value = self.eval(item)?;
            self.push(value)?;
            values.push(value);
        }
        Ok(values)
    }

    /// Drop `evaluated` values and the argument list below them, then push
    /// the native's result.
    pub fn finish(&mut self, evaluated: usize, result: Value) -> RtResult<()> {
        let depth = self.depth();
        if depth < evaluated + 1 {
            return self.raise(ErrorKind::StackUnderflow);
        }
        self.truncate(depth - evaluated - 1);
        self.push(result)
    }

    pub fn expect_arity(&mut self, got: usize, expected: usize) -> RtResult<()> {
        if got == expected {
            Ok(())
        } else {
            self.raise(ErrorKind::Arity { expected, got })
        }
    }
}

/// Replace the value on top of the stack with its evaluation. Kinds without
/// an evaluate operation, and nil, evaluate to themselves.
pub fn evaluate_top(rt: &mut Runtime) -> RtResult<()> {
    let Some(id) = rt.peek(0)? else {
        return Ok(());
    };
    trace!("eval {} {:?}", rt.type_name(id), id);
    match rt.descriptor(rt.type_of(id)).evaluate {
        Some(evaluate) => evaluate(rt),
        None => Ok(()),
    }
}

/// Evaluate operation of Symbol: look the name up along the scope chain.
pub fn eval_symbol(rt: &mut Runtime) -> RtResult<()> {
    let symbol = rt.pop_object()?;
    let name = rt.symbol_name(Some(symbol))?;
    match rt.environment().lookup(&name) {
        Some(value) => rt.push(value),
        None => rt.raise(ErrorKind::UnboundSymbol(name)),
    }
}

/// Evaluate operation of List. The empty list is left as it is. Otherwise
/// the head is evaluated and applied to the unevaluated tail.
pub fn eval_list(rt: &mut Runtime) -> RtResult<()> {
    // The form stays on the stack until the result replaces it.
    let form = rt.peek(0)?;
    let cell = rt.cell(form)?;
    if cell.is_empty() {
        return Ok(());
    }

    let function = match rt.eval(cell.value)? {
        Some(function) => function,
        None => return rt.raise(ErrorKind::CannotApplyNil),
    };
    let args = match cell.next {
        Some(next) => next,
        None => rt.empty_list(),
    };
    let result = rt.apply(function, args)?;
    rt.replace_top(result);
    Ok(())
}

/// Apply operation of Function. Pops the function; the argument list is
/// left below it.
pub fn apply_function(rt: &mut Runtime) -> RtResult<()> {
    let function = rt.pop_object()?;
    let code = match rt.payload(function) {
        Payload::Function(f) => f.code.clone(),
        _ => return rt.raise(ErrorKind::TypeMismatch),
    };
    match code {
        Code::Native(native) => native(rt),
        Code::User(closure) => apply_closure(rt, function, closure),
    }
}

/// Evaluate the arguments in the caller's scope, bind them in a fresh child
/// of the captured scope and run the body there.
fn apply_closure(rt: &mut Runtime, function: ObjId, closure: Closure) -> RtResult<()> {
    let args = rt.peek(0)?;
    let base = rt.depth() - 1;
    // Holds the body and the captured scope while arguments are evaluated.
    rt.push(Some(function))?;

    let values = rt.push_evaluated(args)?;
    rt.expect_arity(values.len(), closure.params.len())?;

    let scope = closure.env.child();
    for (name, value) in closure.params.iter().zip(&values) {
        scope.bind(name, *value);
    }
    rt.push_scope(scope);

    let body = rt.list_items(Some(closure.body))?;
    let mut result = None;
    for form in body {
        result = rt.eval(form)?;
    }

    rt.pop_scope();
    rt.truncate(base);
    rt.push(result)
}
