use crate::error::RtResult;
use crate::heap::{Code, Payload};
use crate::runtime::Runtime;
use crate::value::Value;

impl Runtime {
    /// Print a value to a string. Nil prints as `nil`.
    pub fn print_to_string(&mut self, value: Value) -> RtResult<String> {
        let mut out = String::new();
        self.push(value)?;
        print_top(self, &mut out)?;
        Ok(out)
    }
}

/// Pop the top of the stack and append its text, dispatching on its type's
/// print operation. Types without one print as `#<Name>`.
pub fn print_top(rt: &mut Runtime, out: &mut String) -> RtResult<()> {
    rt.nested(|rt| print_value(rt, out))
}

fn print_value(rt: &mut Runtime, out: &mut String) -> RtResult<()> {
    let Some(id) = rt.peek(0)? else {
        rt.pop()?;
        out.push_str("nil");
        return Ok(());
    };
    match rt.descriptor(rt.type_of(id)).print {
        Some(print) => print(rt, out),
        None => {
            rt.pop()?;
            out.push_str(&format!("#<{}>", rt.type_name(id)));
            Ok(())
        }
    }
}

pub fn print_symbol(rt: &mut Runtime, out: &mut String) -> RtResult<()> {
    let id = rt.pop_object()?;
    let name = rt.symbol_name(Some(id))?;
    out.push_str(&name);
    Ok(())
}

/// Six fractional digits, always.
pub fn print_number(rt: &mut Runtime, out: &mut String) -> RtResult<()> {
    let id = rt.pop_object()?;
    let value = rt.number(Some(id))?;
    out.push_str(&format!("{:.6}", value));
    Ok(())
}

pub fn print_list(rt: &mut Runtime, out: &mut String) -> RtResult<()> {
    // The list stays on the stack while its elements are printed.
    let list = rt.peek(0)?;
    let items = rt.list_items(list)?;
    out.push('(');
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        rt.push(item)?;
        print_top(rt, out)?;
    }
    out.push(')');
    rt.pop()?;
    Ok(())
}

pub fn print_function(rt: &mut Runtime, out: &mut String) -> RtResult<()> {
    let id = rt.pop_object()?;
    match rt.payload(id) {
        Payload::Function(f) => match &f.code {
            Code::Native(_) => out.push_str(&format!("#<builtin {}>", f.name)),
            Code::User(closure) => {
                out.push_str(&format!("#<function ({})>", closure.params.join(" ")))
            }
        },
        _ => out.push_str("#<Function>"),
    }
    Ok(())
}

pub fn print_error(rt: &mut Runtime, out: &mut String) -> RtResult<()> {
    let id = rt.pop_object()?;
    out.push_str(&format!("#<Error {}>", rt.error_message(id)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Custom;
    use crate::types::TypeDescriptor;

    fn show(source: &str) -> String {
        let mut rt = Runtime::new();
        let value = rt.eval_str(&format!("(quote {})", source)).unwrap();
        rt.print_to_string(value).unwrap()
    }

    #[test]
    fn numbers_print_with_six_decimals() {
        assert_eq!(show("3.5"), "3.500000");
        assert_eq!(show("-2"), "-2.000000");
        assert_eq!(show("1e3"), "1000.000000");
    }

    #[test]
    fn symbols_print_their_name() {
        assert_eq!(show("foo"), "foo");
        assert_eq!(show("3.5.1"), "3.5.1");
    }

    #[test]
    fn lists() {
        assert_eq!(show("()"), "()");
        assert_eq!(show("(1 2 3)"), "(1.000000 2.000000 3.000000)");
        assert_eq!(show("(a (b ()) c)"), "(a (b ()) c)");
    }

    #[test]
    fn nil_and_functions() {
        let mut rt = Runtime::new();
        assert_eq!(rt.print_to_string(None).unwrap(), "nil");
        let plus = rt.eval_str("+").unwrap();
        assert_eq!(rt.print_to_string(plus).unwrap(), "#<builtin +>");
        let f = rt.eval_str("(lambda (a b) a)").unwrap();
        assert_eq!(rt.print_to_string(f).unwrap(), "#<function (a b)>");
        assert_eq!(rt.depth(), 0);
    }

    #[test]
    fn deep_lists_stop_at_max_depth() {
        let mut rt = Runtime::with_config(crate::config::RuntimeConfig {
            max_depth: 100,
            ..Default::default()
        });
        let mut list = rt.empty_list();
        rt.push(Some(list)).unwrap();
        for _ in 0..200 {
            list = rt.make_cell(Some(list), rt.empty_list()).unwrap();
            rt.replace_top(Some(list));
        }
        assert!(rt.print_to_string(Some(list)).is_err());
        assert_eq!(rt.recover(), "Error: Stack overflow");
        assert_eq!(rt.nesting(), 0);
    }

    #[test]
    fn types_without_print_use_their_name() {
        let mut rt = Runtime::new();
        let id = rt.register_type(TypeDescriptor::opaque::<Custom>("Widget"));
        let w = rt.make_custom(id, Custom::default()).unwrap();
        assert_eq!(rt.print_to_string(Some(w)).unwrap(), "#<Widget>");
    }
}
