use std::fmt;
use std::mem;

use crate::env::Environment;
use crate::types::{NativeFn, TypeDescriptor};
use crate::value::{ContextId, ObjId, TypeId};

/// Per-object bookkeeping that precedes the payload.
#[derive(Debug, Clone)]
pub struct Header {
    pub marked: bool,
    pub type_id: TypeId,
    /// The context whose allocation list holds this object. `None` for
    /// objects pinned by the runtime itself.
    pub owner: Option<ContextId>,
    /// The object allocated just before this one in the same context.
    pub prev: Option<ObjId>,
}

/// Accounted size of a header. Payloads start at this offset rounded up to
/// their type's alignment.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Number {
    pub value: f64,
}

/// A list cell. The empty list is a cell with both fields empty.
#[derive(Debug, Clone, Copy)]
pub struct Cell {
    pub value: Option<ObjId>,
    pub next: Option<ObjId>,
}

impl Cell {
    pub const EMPTY: Cell = Cell {
        value: None,
        next: None,
    };

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.next.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub code: Code,
}

#[derive(Clone)]
pub enum Code {
    Native(NativeFn),
    User(Closure),
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Code::Native(_) => write!(f, "Native"),
            Code::User(closure) => write!(f, "User({:?})", closure.params),
        }
    }
}

/// A user-defined procedure and the scope it was created in.
#[derive(Debug, Clone)]
pub struct Closure {
    pub params: Vec<String>,
    /// List of body forms, evaluated in order.
    pub body: ObjId,
    pub env: Environment,
}

#[derive(Debug, Clone)]
pub struct ErrorData {
    /// `None` once the error has been torn down.
    pub message: Option<String>,
}

/// Payload of an extension type. `refs` are traced by the collector.
#[derive(Debug, Clone, Default)]
pub struct Custom {
    pub refs: Vec<ObjId>,
    pub word: u64,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Symbol(Symbol),
    Number(Number),
    List(Cell),
    Function(Function),
    Error(ErrorData),
    Custom(Custom),
}

impl Payload {
    /// Every object this payload refers to directly.
    pub fn references(&self, out: &mut Vec<ObjId>) {
        match self {
            Payload::List(cell) => {
                out.extend(cell.value);
                out.extend(cell.next);
            }
            Payload::Function(Function {
                code: Code::User(closure),
                ..
            }) => out.push(closure.body),
            Payload::Custom(custom) => out.extend_from_slice(&custom.refs),
            Payload::Symbol(_)
            | Payload::Number(_)
            | Payload::Function(_)
            | Payload::Error(_) => {}
        }
    }
}

pub struct Object {
    pub header: Header,
    pub payload: Payload,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({:?}, {:?})", self.header.type_id, self.payload)
    }
}

/// Round `offset` up to the next multiple of `on`, a power of two.
#[inline]
pub fn align_up(offset: usize, on: usize) -> usize {
    debug_assert!(on.is_power_of_two());
    (offset + (on - 1)) & !(on - 1)
}

/// Where a type's payload sits and how many bytes an allocation is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLayout {
    pub payload_offset: usize,
    /// Header, worst-case alignment padding, then payload.
    pub footprint: usize,
}

impl ObjectLayout {
    pub fn of(descriptor: &TypeDescriptor) -> Self {
        ObjectLayout {
            payload_offset: align_up(HEADER_SIZE, descriptor.align),
            footprint: HEADER_SIZE + descriptor.align - 1 + descriptor.size,
        }
    }
}

enum Slot {
    Occupied(Object),
    Free { next: Option<u32> },
}

/// Slot storage for every object of a runtime. `ObjId` is an index into
/// `slots`; freed slots are chained into a free list and reused.
pub struct Heap {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live: usize,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::with_capacity(1024),
            free_head: None,
            live: 0,
        }
    }

    /// Store an object, reusing a free slot when there is one.
    pub fn insert(&mut self, object: Object) -> ObjId {
        self.live += 1;
        match self.free_head {
            Some(idx) => {
                let slot = &mut self.slots[idx as usize];
                self.free_head = match slot {
                    Slot::Free { next } => *next,
                    Slot::Occupied(_) => panic!("corrupt free list"),
                };
                *slot = Slot::Occupied(object);
                ObjId(idx)
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(Slot::Occupied(object));
                ObjId(idx)
            }
        }
    }

    /// Take an object out of its slot and put the slot on the free list.
    pub fn release(&mut self, id: ObjId) -> Option<Object> {
        let slot = self.slots.get_mut(id.index())?;
        if let Slot::Free { .. } = slot {
            return None;
        }
        let old = mem::replace(
            slot,
            Slot::Free {
                next: self.free_head,
            },
        );
        self.free_head = Some(id.0);
        self.live -= 1;
        match old {
            Slot::Occupied(object) => Some(object),
            Slot::Free { .. } => None,
        }
    }

    pub fn get(&self, id: ObjId) -> Option<&Object> {
        match self.slots.get(id.index()) {
            Some(Slot::Occupied(object)) => Some(object),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: ObjId) -> Option<&mut Object> {
        match self.slots.get_mut(id.index()) {
            Some(Slot::Occupied(object)) => Some(object),
            _ => None,
        }
    }

    /// Access a live object. A freed or unknown id is an interpreter bug.
    #[inline]
    pub fn object(&self, id: ObjId) -> &Object {
        match &self.slots[id.index()] {
            Slot::Occupied(object) => object,
            Slot::Free { .. } => panic!("access to freed object {:?}", id),
        }
    }

    #[inline]
    pub fn object_mut(&mut self, id: ObjId) -> &mut Object {
        match &mut self.slots[id.index()] {
            Slot::Occupied(object) => object,
            Slot::Free { .. } => panic!("access to freed object {:?}", id),
        }
    }

    pub fn contains(&self, id: ObjId) -> bool {
        self.get(id).is_some()
    }

    // === GC methods ===

    /// Set the mark bit. Returns true if the object was not marked before.
    /// Pinned objects are permanently live and never take a mark.
    pub fn mark(&mut self, id: ObjId) -> bool {
        match self.get_mut(id) {
            Some(object) if object.header.owner.is_some() && !object.header.marked => {
                object.header.marked = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_marked(&self, id: ObjId) -> bool {
        self.get(id).map_or(false, |o| o.header.marked)
    }

    /// Remove every remaining object, for runtime teardown.
    pub fn drain(&mut self) -> Vec<Object> {
        let drained: Vec<Object> = mem::take(&mut self.slots)
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Occupied(object) => Some(object),
                Slot::Free { .. } => None,
            })
            .collect();
        self.free_head = None;
        self.live = 0;
        drained
    }

    /// Every live object with its id, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjId, &Object)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Occupied(object) => Some((ObjId(i as u32), object)),
                Slot::Free { .. } => None,
            })
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Number of slots ever created, live or free.
    pub fn total_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.slots.len() - self.live
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
