use std::mem;

use crate::error::RtResult;
use crate::eval;
use crate::heap::{Cell, ErrorData, Function, Number, Payload, Symbol};
use crate::printer;
use crate::runtime::Runtime;
use crate::value::TypeId;

/// A native operation. It takes its arguments from the active context's
/// evaluation stack and pushes its result there.
pub type NativeFn = fn(&mut Runtime) -> RtResult<()>;

/// Pops one object from the evaluation stack and appends its text to `out`.
pub type PrintFn = fn(&mut Runtime, &mut String) -> RtResult<()>;

/// Tears down a payload just before its slot is released.
pub type DeleteFn = fn(&mut Payload);

/// Static metadata for one kind of object.
///
/// A missing operation is not an error by itself: no `evaluate` means the
/// object evaluates to itself, no `delete` means nothing to tear down, no
/// `print` falls back to `#<Name>`. Only a missing `apply` is reported, when
/// the evaluator finds the object in operator position.
#[derive(Clone)]
pub struct TypeDescriptor {
    pub name: &'static str,
    /// Payload size in bytes.
    pub size: usize,
    /// Payload alignment; a power of two.
    pub align: usize,
    pub delete: Option<DeleteFn>,
    pub print: Option<PrintFn>,
    pub evaluate: Option<NativeFn>,
    pub apply: Option<NativeFn>,
}

impl TypeDescriptor {
    /// A descriptor with no operations, sized for the payload type `T`.
    pub fn opaque<T>(name: &'static str) -> Self {
        TypeDescriptor {
            name,
            size: mem::size_of::<T>(),
            align: mem::align_of::<T>(),
            delete: None,
            print: None,
            evaluate: None,
            apply: None,
        }
    }
}

/// Ids of the built-in kinds. They must match the order of registration in
/// `TypeRegistry::new()`.
pub mod ty {
    use crate::value::TypeId;

    pub const SYMBOL: TypeId = TypeId(0);
    pub const NUMBER: TypeId = TypeId(1);
    pub const LIST: TypeId = TypeId(2);
    pub const FUNCTION: TypeId = TypeId(3);
    pub const ERROR: TypeId = TypeId(4);
}

/// All type descriptors known to a runtime, indexed by `TypeId`.
pub struct TypeRegistry {
    types: Vec<TypeDescriptor>,
}

impl TypeRegistry {
    /// Registers the built-in kinds with their operation slots wired.
    pub fn new() -> Self {
        let symbol = TypeDescriptor {
            delete: Some(symbol_delete),
            print: Some(printer::print_symbol),
            evaluate: Some(eval::eval_symbol),
            ..TypeDescriptor::opaque::<Symbol>("Symbol")
        };

        let number = TypeDescriptor {
            // Numbers keep 8-byte payload alignment on every target.
            align: mem::size_of::<f64>(),
            print: Some(printer::print_number),
            ..TypeDescriptor::opaque::<Number>("Number")
        };

        let list = TypeDescriptor {
            print: Some(printer::print_list),
            evaluate: Some(eval::eval_list),
            ..TypeDescriptor::opaque::<Cell>("List")
        };

        let function = TypeDescriptor {
            print: Some(printer::print_function),
            apply: Some(eval::apply_function),
            ..TypeDescriptor::opaque::<Function>("Function")
        };

        let error = TypeDescriptor {
            delete: Some(error_delete),
            print: Some(printer::print_error),
            ..TypeDescriptor::opaque::<ErrorData>("Error")
        };

        TypeRegistry {
            types: vec![symbol, number, list, function, error],
        }
    }

    /// Adds an extension type and returns its id.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> TypeId {
        debug_assert!(descriptor.align.is_power_of_two());
        let id = TypeId(self.types.len() as u16);
        self.types.push(descriptor);
        id
    }

    #[inline]
    pub fn get(&self, id: TypeId) -> &TypeDescriptor {
        &self.types[id.index()]
    }

    pub fn count(&self) -> usize {
        self.types.len()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn symbol_delete(payload: &mut Payload) {
    if let Payload::Symbol(sym) = payload {
        sym.name = String::new();
    }
}

fn error_delete(payload: &mut Payload) {
    if let Payload::Error(err) = payload {
        err.message = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ids_follow_registration_order() {
        let types = TypeRegistry::new();
        assert_eq!(types.get(ty::SYMBOL).name, "Symbol");
        assert_eq!(types.get(ty::NUMBER).name, "Number");
        assert_eq!(types.get(ty::LIST).name, "List");
        assert_eq!(types.get(ty::FUNCTION).name, "Function");
        assert_eq!(types.get(ty::ERROR).name, "Error");
    }

    #[test]
    fn operation_slots() {
        let types = TypeRegistry::new();
        assert!(types.get(ty::NUMBER).evaluate.is_none());
        assert!(types.get(ty::NUMBER).apply.is_none());
        assert!(types.get(ty::SYMBOL).evaluate.is_some());
        assert!(types.get(ty::LIST).evaluate.is_some());
        assert!(types.get(ty::FUNCTION).apply.is_some());
        assert!(types.get(ty::ERROR).delete.is_some());
        assert_eq!(types.get(ty::NUMBER).align, 8);
    }

    #[test]
    fn register_extension_type() {
        let mut types = TypeRegistry::new();
        let id = types.register(TypeDescriptor::opaque::<u64>("Counter"));
        assert_eq!(id, TypeId(5));
        assert_eq!(types.get(id).name, "Counter");
        assert_eq!(types.count(), 6);
    }

    #[test]
    fn delete_clears_error_message() {
        let mut payload = Payload::Error(ErrorData {
            message: Some("boom".into()),
        });
        error_delete(&mut payload);
        match payload {
            Payload::Error(err) => assert!(err.message.is_none()),
            _ => unreachable!(),
        }
    }
}
