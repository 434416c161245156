use std::collections::HashSet;

use log::{debug, trace, warn};

use crate::builtins;
use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::env::Environment;
use crate::error::{ErrorKind, Fault, RtResult};
use crate::gc::{self, GcReport, GcStats, Trigger};
use crate::heap::{
    Cell, Code, Custom, ErrorData, Function, Header, Heap, Number, Object, ObjectLayout, Payload,
    Symbol,
};
use crate::types::{ty, NativeFn, TypeDescriptor, TypeRegistry};
use crate::value::{ContextId, ObjId, TypeId, Value};

/// Nesting levels an unwind action may use beyond the point of the raise.
const UNWIND_HEADROOM: usize = 64;

/// Owns every object, every context and the global scope.
/// All interpreter state lives here so the collector can find roots.
pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) types: TypeRegistry,
    pub(crate) global: Environment,
    pub(crate) contexts: Vec<Option<Context>>,
    active: ContextId,
    config: RuntimeConfig,
    pub(crate) stats: GcStats,
    empty_list: ObjId,
    out_of_memory: ObjId,
    truth: ObjId,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let global = Environment::new();
        let main = Context::new(ContextId(0), &global, config.gc_threshold);
        let mut rt = Runtime {
            heap: Heap::new(),
            types: TypeRegistry::new(),
            global,
            contexts: vec![Some(main)],
            active: ContextId(0),
            config,
            stats: GcStats::default(),
            empty_list: ObjId(0),
            out_of_memory: ObjId(0),
            truth: ObjId(0),
        };

        rt.empty_list = rt.pin(ty::LIST, Payload::List(Cell::EMPTY));
        rt.out_of_memory = rt.pin(
            ty::ERROR,
            Payload::Error(ErrorData {
                message: Some(ErrorKind::OutOfMemory.to_string()),
            }),
        );
        rt.truth = rt.pin(ty::SYMBOL, Payload::Symbol(Symbol { name: "t".into() }));
        rt.global.bind("t", Some(rt.truth));
        rt.global.bind("nil", None);
        builtins::install(&mut rt);

        debug!(
            "runtime ready: {} types, {} globals",
            rt.types.count(),
            rt.global.len()
        );
        rt
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Store an object outside every allocation list. Pinned objects are
    /// never collected.
    fn pin(&mut self, type_id: TypeId, payload: Payload) -> ObjId {
        self.heap.insert(Object {
            header: Header {
                marked: false,
                type_id,
                owner: None,
                prev: None,
            },
            payload,
        })
    }

    // ========================================================================
    // Contexts
    // ========================================================================

    pub fn ctx(&self) -> &Context {
        match self.contexts.get(self.active.index()) {
            Some(Some(ctx)) => ctx,
            _ => panic!("active context {:?} does not exist", self.active),
        }
    }

    pub fn ctx_mut(&mut self) -> &mut Context {
        let active = self.active;
        match self.contexts.get_mut(active.index()) {
            Some(Some(ctx)) => ctx,
            _ => panic!("active context {:?} does not exist", active),
        }
    }

    pub fn active_context(&self) -> ContextId {
        self.active
    }

    /// A fresh context whose top-level scope chains to the global scope.
    /// The active context does not change.
    pub fn create_context(&mut self) -> ContextId {
        let slot = self.contexts.iter().position(Option::is_none);
        let id = ContextId(slot.unwrap_or(self.contexts.len()) as u32);
        let ctx = Context::new(id, &self.global, self.config.gc_threshold);
        match slot {
            Some(i) => self.contexts[i] = Some(ctx),
            None => self.contexts.push(Some(ctx)),
        }
        debug!("created context {:?}", id);
        id
    }

    /// Make `id` the active context. Returns false if there is no such context.
    pub fn switch_context(&mut self, id: ContextId) -> bool {
        match self.contexts.get(id.index()) {
            Some(Some(_)) => {
                self.active = id;
                true
            }
            _ => false,
        }
    }

    /// Free every object `id` allocated and forget the context.
    ///
    /// Refused for the active context, and for a context whose objects are
    /// still held by the rest of the runtime: by another object, another
    /// context's stack, error slot or unwind list. Bindings to its objects
    /// are removed from every surviving scope.
    pub fn destroy_context(&mut self, id: ContextId) -> bool {
        if id == self.active || !matches!(self.contexts.get(id.index()), Some(Some(_))) {
            return false;
        }
        if self.referenced_from_outside(id) {
            warn!("context {:?} is still referenced, not destroying it", id);
            return false;
        }
        let heap = &self.heap;
        for scope in self.surviving_scopes(id) {
            scope.retain(|obj| heap.get(obj).map_or(true, |o| o.header.owner != Some(id)));
        }
        let freed = self.release_context_objects(id);
        self.contexts[id.index()] = None;
        debug!("destroyed context {:?}, freed {} objects", id, freed);
        true
    }

    fn referenced_from_outside(&self, id: ContextId) -> bool {
        let owned = |obj: ObjId| {
            self.heap
                .get(obj)
                .map_or(false, |o| o.header.owner == Some(id))
        };

        let mut refs = Vec::new();
        for (_, object) in self.heap.iter() {
            if object.header.owner == Some(id) {
                continue;
            }
            refs.clear();
            object.payload.references(&mut refs);
            if refs.iter().any(|&r| owned(r)) {
                return true;
            }
        }

        self.contexts
            .iter()
            .flatten()
            .filter(|ctx| ctx.id != id)
            .any(|ctx| {
                ctx.stack.iter().flatten().any(|&v| owned(v))
                    || ctx.error.map_or(false, |e| owned(e))
                    || ctx.unwind_actions.iter().any(|&a| owned(a))
            })
    }

    /// Scopes that outlive context `id`: the global chain, the frames of
    /// every other context and the scopes captured by surviving closures.
    fn surviving_scopes(&self, id: ContextId) -> Vec<Environment> {
        let mut roots = vec![self.global.clone()];
        for ctx in self.contexts.iter().flatten().filter(|ctx| ctx.id != id) {
            roots.extend(ctx.scopes.iter().cloned());
        }
        for (_, object) in self.heap.iter() {
            if object.header.owner == Some(id) {
                continue;
            }
            if let Payload::Function(Function {
                code: Code::User(closure),
                ..
            }) = &object.payload
            {
                roots.push(closure.env.clone());
            }
        }

        let mut seen = HashSet::new();
        let mut scopes = Vec::new();
        for root in roots {
            let mut current = Some(root);
            while let Some(scope) = current {
                if !seen.insert(scope.id()) {
                    break;
                }
                current = scope.parent();
                scopes.push(scope);
            }
        }
        scopes
    }

    pub fn context_ids(&self) -> Vec<ContextId> {
        self.contexts.iter().flatten().map(|ctx| ctx.id).collect()
    }

    /// Walk a context's allocation list, freeing everything on it.
    fn release_context_objects(&mut self, id: ContextId) -> usize {
        let mut cursor = match self.contexts.get_mut(id.index()) {
            Some(Some(ctx)) => {
                ctx.bytes_allocated = 0;
                ctx.last_object.take()
            }
            _ => return 0,
        };
        let mut freed = 0;
        while let Some(obj) = cursor {
            cursor = self.heap.get(obj).and_then(|o| o.header.prev);
            if self.free_object(obj).is_some() {
                freed += 1;
            }
        }
        freed
    }

    // ========================================================================
    // Object store
    // ========================================================================

    /// Allocate an object in the active context. May collect first; raises the
    /// static out-of-memory error when the heap limit would still be exceeded
    /// after a collection.
    pub fn allocate(&mut self, type_id: TypeId, payload: Payload) -> RtResult<ObjId> {
        let footprint = ObjectLayout::of(self.types.get(type_id)).footprint;

        let ctx = self.ctx();
        if ctx.bytes_allocated + footprint >= ctx.threshold {
            gc::collect(self, Trigger::Threshold);
            let ctx = self.ctx_mut();
            let needed = ctx.bytes_allocated + footprint;
            if needed >= ctx.threshold {
                ctx.threshold = (ctx.threshold * 2).max(needed * 2);
                debug!("gc threshold raised to {} bytes", ctx.threshold);
            }
        }

        if let Some(limit) = self.config.heap_limit {
            if self.bytes_in_use() + footprint > limit {
                gc::collect(self, Trigger::Threshold);
                if self.bytes_in_use() + footprint > limit {
                    warn!("heap limit of {} bytes reached", limit);
                    return self.raise_object(self.out_of_memory);
                }
            }
        }

        let owner = self.active;
        let prev = self.ctx().last_object;
        let id = self.heap.insert(Object {
            header: Header {
                marked: false,
                type_id,
                owner: Some(owner),
                prev,
            },
            payload,
        });
        let ctx = self.ctx_mut();
        ctx.last_object = Some(id);
        ctx.bytes_allocated += footprint;
        trace!(
            "alloc {} {:?} ({} bytes)",
            self.types.get(type_id).name,
            id,
            footprint
        );
        Ok(id)
    }

    /// Tear down and release one object. Returns the bytes it was charged.
    /// The caller unlinks it from its allocation list.
    pub(crate) fn free_object(&mut self, id: ObjId) -> Option<usize> {
        let mut object = self.heap.release(id)?;
        let descriptor = self.types.get(object.header.type_id);
        if let Some(delete) = descriptor.delete {
            delete(&mut object.payload);
        }
        Some(ObjectLayout::of(descriptor).footprint)
    }

    /// Bytes charged to all contexts together.
    pub fn bytes_in_use(&self) -> usize {
        self.contexts.iter().flatten().map(|c| c.bytes_allocated).sum()
    }

    pub fn collect(&mut self) -> GcReport {
        gc::collect(self, Trigger::Manual)
    }

    pub fn gc_stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn is_live(&self, id: ObjId) -> bool {
        self.heap.contains(id)
    }

    pub fn live_objects(&self) -> usize {
        self.heap.live_count()
    }

    pub fn type_of(&self, id: ObjId) -> TypeId {
        self.heap.object(id).header.type_id
    }

    pub fn type_name(&self, id: ObjId) -> &'static str {
        self.types.get(self.type_of(id)).name
    }

    pub fn descriptor(&self, type_id: TypeId) -> &TypeDescriptor {
        self.types.get(type_id)
    }

    /// Add an extension type. Its objects carry a `Payload::Custom`.
    pub fn register_type(&mut self, descriptor: TypeDescriptor) -> TypeId {
        let name = descriptor.name;
        let id = self.types.register(descriptor);
        debug!("registered type {} as {:?}", name, id);
        id
    }

    pub fn payload(&self, id: ObjId) -> &Payload {
        &self.heap.object(id).payload
    }

    pub fn payload_mut(&mut self, id: ObjId) -> &mut Payload {
        &mut self.heap.object_mut(id).payload
    }

    /// Where the payload of `id` starts, relative to its header.
    pub fn payload_offset(&self, id: ObjId) -> usize {
        ObjectLayout::of(self.types.get(self.type_of(id))).payload_offset
    }

    pub fn make_number(&mut self, value: f64) -> RtResult<ObjId> {
        self.allocate(ty::NUMBER, Payload::Number(Number { value }))
    }

    pub fn make_symbol(&mut self, name: &str) -> RtResult<ObjId> {
        self.allocate(
            ty::SYMBOL,
            Payload::Symbol(Symbol {
                name: name.to_string(),
            }),
        )
    }

    pub fn make_error(&mut self, message: &str) -> RtResult<ObjId> {
        self.allocate(
            ty::ERROR,
            Payload::Error(ErrorData {
                message: Some(message.to_string()),
            }),
        )
    }

    /// A list cell. `next` should be a list; the canonical empty list ends
    /// a proper list.
    pub fn make_cell(&mut self, value: Value, next: ObjId) -> RtResult<ObjId> {
        self.allocate(
            ty::LIST,
            Payload::List(Cell {
                value,
                next: Some(next),
            }),
        )
    }

    pub fn make_function(&mut self, name: &str, code: Code) -> RtResult<ObjId> {
        self.allocate(
            ty::FUNCTION,
            Payload::Function(Function {
                name: name.to_string(),
                code,
            }),
        )
    }

    pub fn make_custom(&mut self, type_id: TypeId, custom: Custom) -> RtResult<ObjId> {
        self.allocate(type_id, Payload::Custom(custom))
    }

    /// Replace the `count` topmost stack values with a list of them, first
    /// pushed first, and return it. The list is not pushed.
    pub fn list_from_stack(&mut self, count: usize) -> RtResult<ObjId> {
        let depth = self.depth();
        if count > depth {
            return self.raise(ErrorKind::StackUnderflow);
        }
        let base = depth - count;
        // The partial list rides on top of the stack so it stays rooted.
        let mut list = self.empty_list;
        self.push(Some(list))?;
        for i in (base..depth).rev() {
            let value = self.ctx().stack[i];
            list = self.make_cell(value, list)?;
            self.replace_top(Some(list));
        }
        self.truncate(base);
        Ok(list)
    }

    pub fn empty_list(&self) -> ObjId {
        self.empty_list
    }

    pub fn out_of_memory_error(&self) -> ObjId {
        self.out_of_memory
    }

    /// The symbol `t`.
    pub fn truth(&self) -> ObjId {
        self.truth
    }

    pub fn boolean(&self, b: bool) -> Value {
        if b {
            Some(self.truth)
        } else {
            None
        }
    }

    /// Nil and the empty list are false; everything else is true.
    pub fn is_truthy(&self, value: Value) -> bool {
        match value {
            None => false,
            Some(id) => !self.is_empty_list(id),
        }
    }

    pub fn is_empty_list(&self, id: ObjId) -> bool {
        matches!(self.payload(id), Payload::List(cell) if cell.is_empty())
    }

    pub fn number(&mut self, value: Value) -> RtResult<f64> {
        match value.map(|id| self.payload(id)) {
            Some(Payload::Number(n)) => Ok(n.value),
            _ => self.raise(ErrorKind::TypeMismatch),
        }
    }

    pub fn symbol_name(&mut self, value: Value) -> RtResult<String> {
        match value.map(|id| self.payload(id)) {
            Some(Payload::Symbol(sym)) => Ok(sym.name.clone()),
            _ => self.raise(ErrorKind::TypeMismatch),
        }
    }

    pub fn cell(&mut self, value: Value) -> RtResult<Cell> {
        match value.map(|id| self.payload(id)) {
            Some(Payload::List(cell)) => Ok(*cell),
            _ => self.raise(ErrorKind::TypeMismatch),
        }
    }

    /// The elements of a list, in order.
    pub fn list_items(&mut self, list: Value) -> RtResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut cell = self.cell(list)?;
        while !cell.is_empty() {
            items.push(cell.value);
            match cell.next {
                None => break,
                next => cell = self.cell(next)?,
            }
        }
        Ok(items)
    }

    /// Text of an Error object.
    pub fn error_message(&self, id: ObjId) -> String {
        match self.heap.get(id).map(|o| &o.payload) {
            Some(Payload::Error(ErrorData {
                message: Some(message),
            })) => message.clone(),
            Some(_) => format!("#<{}>", self.type_name(id)),
            None => "Unknown error".to_string(),
        }
    }

    // ========================================================================
    // Evaluation stack
    // ========================================================================

    pub fn push(&mut self, value: Value) -> RtResult<()> {
        if self.ctx().stack.len() >= self.config.stack_limit {
            return self.raise(ErrorKind::StackOverflow);
        }
        self.ctx_mut().stack.push(value);
        Ok(())
    }

    /// Pop the top value. An empty stack raises "Stack underflow".
    pub fn pop(&mut self) -> RtResult<Value> {
        match self.ctx_mut().stack.pop() {
            Some(value) => Ok(value),
            None => self.raise(ErrorKind::StackUnderflow),
        }
    }

    /// Pop a value that must be an object rather than nil.
    pub fn pop_object(&mut self) -> RtResult<ObjId> {
        match self.pop()? {
            Some(id) => Ok(id),
            None => self.raise(ErrorKind::TypeMismatch),
        }
    }

    /// The value `depth` entries below the top, without popping.
    pub fn peek(&mut self, depth: usize) -> RtResult<Value> {
        let stack = &self.ctx().stack;
        match stack.len().checked_sub(depth + 1) {
            Some(i) => Ok(stack[i]),
            None => self.raise(ErrorKind::StackUnderflow),
        }
    }

    /// Overwrite the top of the stack in place.
    pub fn replace_top(&mut self, value: Value) {
        if let Some(top) = self.ctx_mut().stack.last_mut() {
            *top = value;
        }
    }

    pub fn depth(&self) -> usize {
        self.ctx().stack.len()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.ctx_mut().stack.truncate(depth);
    }

    /// Run `body` one nesting level deeper. Raises "Stack overflow" instead
    /// when the active context is already at `max_depth`.
    pub fn nested<T, F>(&mut self, body: F) -> RtResult<T>
    where
        F: FnOnce(&mut Runtime) -> RtResult<T>,
    {
        if self.ctx().depth >= self.config.max_depth {
            return self.raise(ErrorKind::StackOverflow);
        }
        self.ctx_mut().depth += 1;
        let result = body(self);
        let ctx = self.ctx_mut();
        ctx.depth = ctx.depth.saturating_sub(1);
        result
    }

    pub fn nesting(&self) -> usize {
        self.ctx().depth
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    pub fn global(&self) -> &Environment {
        &self.global
    }

    /// The innermost scope of the active context.
    pub fn environment(&self) -> Environment {
        self.ctx().scope().clone()
    }

    pub fn push_scope(&mut self, scope: Environment) {
        self.ctx_mut().scopes.push(scope);
    }

    pub fn pop_scope(&mut self) {
        let ctx = self.ctx_mut();
        if ctx.scopes.len() > 1 {
            ctx.scopes.pop();
        }
    }

    /// Bind a native operation in the global scope. Natives are pinned.
    pub fn define_native(&mut self, name: &str, native: NativeFn) -> ObjId {
        let id = self.pin(
            ty::FUNCTION,
            Payload::Function(Function {
                name: name.to_string(),
                code: Code::Native(native),
            }),
        );
        self.global.bind(name, Some(id));
        id
    }

    // ========================================================================
    // Errors and unwinding
    // ========================================================================

    /// Allocate an Error for `kind` and raise it. Out of memory uses the
    /// preallocated Error and never allocates.
    pub fn raise<T>(&mut self, kind: ErrorKind) -> RtResult<T> {
        let error = match kind {
            ErrorKind::OutOfMemory => self.out_of_memory,
            kind => self.make_error(&kind.to_string())?,
        };
        self.raise_object(error)
    }

    /// Make `error` the pending error and run the unwind actions registered
    /// since the innermost handler frame, oldest first. Always returns
    /// `Err`: `Fault::Raised`, or `Fault::Fatal` if an action is not a
    /// Function.
    pub fn raise_object<T>(&mut self, error: ObjId) -> RtResult<T> {
        debug!("raise: {}", self.error_message(error));
        let floor = self.ctx().handlers.last().map_or(0, |h| h.unwind_len);
        self.ctx_mut().error = Some(error);
        while self.ctx().unwind_actions.len() > floor {
            let action = self.ctx_mut().unwind_actions.remove(floor);
            self.run_unwind_action(action, error)?;
        }
        Err(Fault::Raised)
    }

    fn run_unwind_action(&mut self, action: ObjId, error: ObjId) -> RtResult<()> {
        if self.type_of(action) != ty::FUNCTION {
            return Err(Fault::Fatal(format!(
                "unwind action is a {}, not a Function",
                self.type_name(action)
            )));
        }
        let base = self.depth();
        let ctx = self.ctx_mut();
        ctx.stack.push(Some(error));
        ctx.stack.push(Some(action));
        // An overflow unwinds from max_depth; leave the action room to run.
        let nesting = ctx.depth;
        ctx.depth = nesting.saturating_sub(UNWIND_HEADROOM);
        let empty = self.empty_list;
        let outcome = self.protect(|rt| rt.apply(action, empty));
        self.ctx_mut().depth = nesting;
        self.truncate(base);
        if let Err(nested) = outcome? {
            warn!(
                "discarding error raised by unwind action: {}",
                self.error_message(nested)
            );
        }
        self.ctx_mut().error = Some(error);
        Ok(())
    }

    /// Queue `action` to be called with no arguments if an error is raised
    /// before the enclosing handler frame completes.
    pub fn register_unwind_action(&mut self, action: ObjId) {
        self.ctx_mut().unwind_actions.push(action);
    }

    pub fn unwind_actions(&self) -> &[ObjId] {
        &self.ctx().unwind_actions
    }

    pub fn pending_error(&self) -> Option<ObjId> {
        self.ctx().error
    }

    /// Run `body` under a handler frame. A raised error is caught here: the
    /// stack, scopes and unwind list go back to where they were and the
    /// error object is returned as `Ok(Err(error))`. Fatal faults pass
    /// through. `body` must leave the same context active.
    pub fn protect<F>(&mut self, body: F) -> RtResult<Result<Value, ObjId>>
    where
        F: FnOnce(&mut Runtime) -> RtResult<Value>,
    {
        let frame = self.ctx().frame();
        self.ctx_mut().handlers.push(frame);
        let result = body(self);
        let ctx = self.ctx_mut();
        ctx.handlers.pop();
        match result {
            Ok(value) => {
                ctx.unwind_actions.truncate(frame.unwind_len);
                Ok(Ok(value))
            }
            Err(Fault::Raised) => {
                ctx.restore(frame);
                match ctx.error.take() {
                    Some(error) => Ok(Err(error)),
                    None => Err(Fault::Fatal(
                        "error raised with an empty error slot".to_string(),
                    )),
                }
            }
            Err(fatal) => Err(fatal),
        }
    }

    /// The top-level landing point. Takes the pending error, returns its
    /// report text and puts the active context back to a clean top level.
    pub fn recover(&mut self) -> String {
        let ctx = self.ctx_mut();
        let pending = ctx.error.take();
        ctx.reset();
        match pending {
            Some(error) => format!("Error: {}", self.error_message(error)),
            None => "Unknown error".to_string(),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let ids = self.context_ids();
        for id in ids {
            self.release_context_objects(id);
        }
        self.contexts.clear();
        for mut object in self.heap.drain() {
            if let Some(delete) = self.types.get(object.header.type_id).delete {
                delete(&mut object.payload);
            }
        }
        self.global.retain(|_| false);
    }
}
