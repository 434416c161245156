use std::fmt;

/// Index into the runtime's object slots. This is the GC handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub u32);

/// Index into the type registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u16);

/// Identifies one evaluation context owned by a runtime.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u32);

/// What lives on the evaluation stack and flows between operations.
/// `None` is the missing value, printed as `nil` at top level.
pub type Value = Option<ObjId>;

impl ObjId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ContextId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjId({})", self.0)
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId({})", self.0)
    }
}
