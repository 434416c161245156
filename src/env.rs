use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::value::{ObjId, Value};

const INITIAL_BINDINGS: usize = 16;

/// One lexical scope. `names` and `objects` are parallel: slot `i` binds
/// `names[i]` to `objects[i]`. A `None` name marks a free slot.
pub struct Scope {
    names: Vec<Option<String>>,
    objects: Vec<Value>,
    parent: Option<Environment>,
}

impl Scope {
    fn position(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .position(|slot| slot.as_deref() == Some(name))
    }
}

/// A shared handle to a scope. Cloning the handle shares the scope, which is
/// how closures capture the environment they were created in.
#[derive(Clone)]
pub struct Environment(Rc<RefCell<Scope>>);

impl Environment {
    /// A new outermost scope.
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    /// A new scope whose lookups fall back to `self`.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    fn with_parent(parent: Option<Environment>) -> Self {
        Environment(Rc::new(RefCell::new(Scope {
            names: vec![None; INITIAL_BINDINGS],
            objects: vec![None; INITIAL_BINDINGS],
            parent,
        })))
    }

    pub fn parent(&self) -> Option<Environment> {
        self.0.borrow().parent.clone()
    }

    /// Bind `name` in this scope. Overwrites an existing binding and returns
    /// the value it held; otherwise takes the first free slot, doubling the
    /// arrays when none is left, and returns `None`.
    pub fn bind(&self, name: &str, value: Value) -> Option<Value> {
        let mut scope = self.0.borrow_mut();
        if let Some(i) = scope.position(name) {
            return Some(std::mem::replace(&mut scope.objects[i], value));
        }
        let slot = match scope.names.iter().position(Option::is_none) {
            Some(free) => free,
            None => {
                let old = scope.names.len();
                let grown = (old * 2).max(INITIAL_BINDINGS);
                scope.names.resize(grown, None);
                scope.objects.resize(grown, None);
                old
            }
        };
        scope.names[slot] = Some(name.to_string());
        scope.objects[slot] = value;
        None
    }

    /// Remove a binding from this scope, freeing its slot.
    pub fn unbind(&self, name: &str) -> Option<Value> {
        let mut scope = self.0.borrow_mut();
        let i = scope.position(name)?;
        scope.names[i] = None;
        Some(scope.objects[i].take())
    }

    /// Find `name` here or in an enclosing scope. The outer `None` means
    /// unbound; `Some(None)` is a binding to nil.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut current = Some(self.clone());
        while let Some(env) = current {
            if let Some(value) = env.lookup_local(name) {
                return Some(value);
            }
            current = env.parent();
        }
        None
    }

    /// Find `name` in this scope only.
    pub fn lookup_local(&self, name: &str) -> Option<Value> {
        let scope = self.0.borrow();
        scope.position(name).map(|i| scope.objects[i])
    }

    /// Overwrite the nearest existing binding of `name` along the chain.
    /// Returns the previous value, or `None` if the name is unbound.
    pub fn assign(&self, name: &str, value: Value) -> Option<Value> {
        let mut current = Some(self.clone());
        while let Some(env) = current {
            if env.lookup_local(name).is_some() {
                return env.bind(name, value);
            }
            current = env.parent();
        }
        None
    }

    /// Number of names bound in this scope.
    pub fn len(&self) -> usize {
        self.0.borrow().names.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot capacity of this scope's arrays.
    pub fn capacity(&self) -> usize {
        self.0.borrow().names.len()
    }

    /// Every object bound in this scope.
    pub fn objects(&self) -> Vec<ObjId> {
        self.0.borrow().objects.iter().flatten().copied().collect()
    }

    /// Drop every binding whose object satisfies `pred`.
    pub fn retain(&self, mut keep: impl FnMut(ObjId) -> bool) {
        let mut scope = self.0.borrow_mut();
        let Scope { names, objects, .. } = &mut *scope;
        for (name, slot) in names.iter_mut().zip(objects.iter_mut()) {
            if let Some(id) = *slot {
                if !keep(id) {
                    *name = None;
                    *slot = None;
                }
            }
        }
    }

    /// Identity of the underlying scope, stable while the scope is alive.
    pub fn id(&self) -> *const RefCell<Scope> {
        Rc::as_ptr(&self.0)
    }

    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment({} bindings)", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_then_lookup() {
        let env = Environment::new();
        assert_eq!(env.bind("x", Some(ObjId(1))), None);
        assert_eq!(env.lookup("x"), Some(Some(ObjId(1))));
        assert_eq!(env.lookup("y"), None);
    }

    #[test]
    fn rebinding_returns_previous_and_keeps_count() {
        let env = Environment::new();
        env.bind("x", Some(ObjId(1)));
        env.bind("y", Some(ObjId(2)));
        assert_eq!(env.len(), 2);
        assert_eq!(env.bind("x", Some(ObjId(3))), Some(Some(ObjId(1))));
        assert_eq!(env.len(), 2);
        assert_eq!(env.lookup("x"), Some(Some(ObjId(3))));
    }

    // Lookups continue in enclosing scopes rather than stopping at the
    // innermost one.
    #[test]
    fn lookup_walks_the_parent_chain() {
        let global = Environment::new();
        global.bind("g", Some(ObjId(7)));
        let local = global.child();
        let inner = local.child();
        assert_eq!(inner.lookup("g"), Some(Some(ObjId(7))));
        assert_eq!(inner.lookup_local("g"), None);

        inner.bind("g", Some(ObjId(8)));
        assert_eq!(inner.lookup("g"), Some(Some(ObjId(8))));
        assert_eq!(local.lookup("g"), Some(Some(ObjId(7))));
    }

    #[test]
    fn binding_to_nil_is_not_unbound() {
        let env = Environment::new();
        env.bind("nothing", None);
        assert_eq!(env.lookup("nothing"), Some(None));
    }

    #[test]
    fn grows_by_doubling_and_reuses_free_slots() {
        let env = Environment::new();
        for i in 0..INITIAL_BINDINGS {
            env.bind(&format!("v{}", i), Some(ObjId(i as u32)));
        }
        assert_eq!(env.capacity(), INITIAL_BINDINGS);
        env.bind("extra", Some(ObjId(99)));
        assert_eq!(env.capacity(), INITIAL_BINDINGS * 2);

        assert_eq!(env.unbind("v3"), Some(Some(ObjId(3))));
        env.bind("reused", Some(ObjId(100)));
        assert_eq!(env.capacity(), INITIAL_BINDINGS * 2);
        assert_eq!(env.len(), INITIAL_BINDINGS + 1);
    }

    #[test]
    fn assign_updates_the_defining_scope() {
        let global = Environment::new();
        global.bind("x", Some(ObjId(1)));
        let local = global.child();
        assert_eq!(local.assign("x", Some(ObjId(2))), Some(Some(ObjId(1))));
        assert_eq!(global.lookup_local("x"), Some(Some(ObjId(2))));
        assert!(local.is_empty());
        assert_eq!(local.assign("missing", None), None);
    }

    #[test]
    fn retain_drops_matching_bindings() {
        let env = Environment::new();
        env.bind("a", Some(ObjId(1)));
        env.bind("b", Some(ObjId(2)));
        env.retain(|id| id != ObjId(1));
        assert_eq!(env.lookup("a"), None);
        assert_eq!(env.objects(), vec![ObjId(2)]);
    }
}
