use crate::env::Environment;
use crate::value::{ContextId, ObjId, Value};

/// What a handler frame restores when an error unwinds to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerFrame {
    pub stack_depth: usize,
    pub scope_depth: usize,
    pub unwind_len: usize,
}

/// One thread of evaluation.
pub struct Context {
    pub id: ContextId,
    /// Operand stack shared by the evaluator and native operations.
    pub stack: Vec<Value>,
    /// Active scopes, innermost last. `scopes[0]` is the context's own
    /// top-level scope, a child of the global scope.
    pub scopes: Vec<Environment>,
    /// Head of the intrusive allocation list: the newest object this context
    /// allocated. Older objects follow through `Header::prev`.
    pub last_object: Option<ObjId>,
    pub bytes_allocated: usize,
    pub threshold: usize,
    /// The pending error, if any.
    pub error: Option<ObjId>,
    /// Functions to call, oldest first, when an error is raised.
    pub unwind_actions: Vec<ObjId>,
    pub handlers: Vec<HandlerFrame>,
    /// Current nesting of evaluations, list reads and list prints.
    pub depth: usize,
}

impl Context {
    pub fn new(id: ContextId, global: &Environment, threshold: usize) -> Self {
        Context {
            id,
            stack: Vec::with_capacity(256),
            scopes: vec![global.child()],
            last_object: None,
            bytes_allocated: 0,
            threshold,
            error: None,
            unwind_actions: Vec::new(),
            handlers: Vec::new(),
            depth: 0,
        }
    }

    /// The innermost active scope.
    pub fn scope(&self) -> &Environment {
        // scopes[0] is never popped
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn top_level(&self) -> &Environment {
        &self.scopes[0]
    }

    /// Everything a handler frame would need to restore to this point.
    pub fn frame(&self) -> HandlerFrame {
        HandlerFrame {
            stack_depth: self.stack.len(),
            scope_depth: self.scopes.len(),
            unwind_len: self.unwind_actions.len(),
        }
    }

    /// Roll the stack, scopes and unwind list back to `frame`.
    pub fn restore(&mut self, frame: HandlerFrame) {
        self.stack.truncate(frame.stack_depth);
        self.scopes.truncate(frame.scope_depth.max(1));
        self.unwind_actions.truncate(frame.unwind_len);
    }

    /// Back to a clean top level: empty stack, only the top-level scope, no
    /// unwind actions, no handlers and no nesting. The pending error is left
    /// alone.
    pub fn reset(&mut self) {
        self.depth = 0;
        self.stack.clear();
        self.scopes.truncate(1);
        self.unwind_actions.clear();
        self.handlers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_scope_chains_to_global() {
        let global = Environment::new();
        global.bind("g", Some(ObjId(1)));
        let ctx = Context::new(ContextId(0), &global, 1024);
        assert_eq!(ctx.scope().lookup("g"), Some(Some(ObjId(1))));
        assert!(ctx.scope().ptr_eq(ctx.top_level()));
    }

    #[test]
    fn restore_rolls_back_to_frame() {
        let global = Environment::new();
        let mut ctx = Context::new(ContextId(0), &global, 1024);
        ctx.stack.push(Some(ObjId(1)));
        let frame = ctx.frame();

        ctx.stack.push(Some(ObjId(2)));
        ctx.stack.push(None);
        let inner = ctx.scope().child();
        ctx.scopes.push(inner);
        ctx.unwind_actions.push(ObjId(3));

        ctx.restore(frame);
        assert_eq!(ctx.stack, vec![Some(ObjId(1))]);
        assert_eq!(ctx.scopes.len(), 1);
        assert!(ctx.unwind_actions.is_empty());
    }

    #[test]
    fn reset_keeps_pending_error() {
        let global = Environment::new();
        let mut ctx = Context::new(ContextId(0), &global, 1024);
        ctx.error = Some(ObjId(9));
        ctx.stack.push(None);
        ctx.depth = 12;
        let frame = ctx.frame();
        ctx.handlers.push(frame);
        ctx.reset();
        assert_eq!(ctx.depth, 0);
        assert!(ctx.stack.is_empty());
        assert!(ctx.handlers.is_empty());
        assert_eq!(ctx.error, Some(ObjId(9)));
    }
}
