use std::cell::RefCell;
use std::collections::HashSet;
use std::time::Instant;

use log::debug;

use crate::env::{Environment, Scope};
use crate::heap::{Code, Function, Heap, Payload};
use crate::runtime::Runtime;
use crate::value::{ObjId, Value};

/// Why a collection ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// An allocation would have crossed the context's byte threshold.
    Threshold,
    Manual,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Threshold => "threshold",
            Trigger::Manual => "manual",
        }
    }
}

/// Outcome of one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcReport {
    /// Objects reached from the roots, pinned objects excluded.
    pub marked: usize,
    pub freed: usize,
    pub freed_bytes: usize,
    /// Objects left in the heap, pinned ones included.
    pub live: usize,
    pub elapsed_sec: f64,
}

#[derive(Debug, Clone, Default)]
pub struct GcStats {
    pub collections: u64,
    pub auto_triggers: u64,
    pub manual_triggers: u64,
    pub total_freed: usize,
    pub total_freed_bytes: usize,
    pub total_gc_time_sec: f64,
    pub last_marked: usize,
    pub last_freed: usize,
    pub last_live: usize,
}

impl GcStats {
    pub fn record_cycle(&mut self, report: &GcReport, trigger: Trigger) {
        self.collections = self.collections.saturating_add(1);
        match trigger {
            Trigger::Threshold => self.auto_triggers = self.auto_triggers.saturating_add(1),
            Trigger::Manual => self.manual_triggers = self.manual_triggers.saturating_add(1),
        }
        self.total_freed = self.total_freed.saturating_add(report.freed);
        self.total_freed_bytes = self.total_freed_bytes.saturating_add(report.freed_bytes);
        self.total_gc_time_sec += report.elapsed_sec;
        self.last_marked = report.marked;
        self.last_freed = report.freed;
        self.last_live = report.live;
    }
}

/// Mark from every root of every context, then sweep every allocation list.
/// Nothing is allocated until the sweep is done.
pub fn collect(rt: &mut Runtime, trigger: Trigger) -> GcReport {
    let start = Instant::now();
    let marked = mark(rt);
    let (freed, freed_bytes) = sweep(rt);
    let report = GcReport {
        marked,
        freed,
        freed_bytes,
        live: rt.heap.live_count(),
        elapsed_sec: start.elapsed().as_secs_f64(),
    };
    rt.stats.record_cycle(&report, trigger);
    debug!(
        "gc ({}): marked {}, freed {} ({} bytes), {} live, {:.3}ms",
        trigger.as_str(),
        report.marked,
        report.freed,
        report.freed_bytes,
        report.live,
        report.elapsed_sec * 1000.0
    );
    report
}

#[derive(Default)]
struct Marker {
    worklist: Vec<ObjId>,
    /// Scopes already traced this cycle.
    seen: HashSet<*const RefCell<Scope>>,
    refs: Vec<ObjId>,
    marked: usize,
}

impl Marker {
    fn value(&mut self, heap: &mut Heap, value: Value) {
        if let Some(id) = value {
            if heap.mark(id) {
                self.marked += 1;
                self.worklist.push(id);
            }
        }
    }

    /// Mark every binding of `env` and of each enclosing scope.
    fn scope_chain(&mut self, heap: &mut Heap, env: &Environment) {
        let mut current = Some(env.clone());
        while let Some(scope) = current {
            if !self.seen.insert(scope.id()) {
                // Its parents were traced along with it.
                break;
            }
            for id in scope.objects() {
                self.value(heap, Some(id));
            }
            current = scope.parent();
        }
    }

    fn process_worklist(&mut self, heap: &mut Heap) {
        while let Some(id) = self.worklist.pop() {
            // Collect children first, the heap is borrowed while we look.
            let payload = &heap.object(id).payload;
            self.refs.clear();
            payload.references(&mut self.refs);
            let captured = match payload {
                Payload::Function(Function {
                    code: Code::User(closure),
                    ..
                }) => Some(closure.env.clone()),
                _ => None,
            };

            let refs = std::mem::take(&mut self.refs);
            for &child in &refs {
                self.value(heap, Some(child));
            }
            self.refs = refs;
            if let Some(env) = captured {
                self.scope_chain(heap, &env);
            }
        }
    }
}

fn mark(rt: &mut Runtime) -> usize {
    let mut marker = Marker::default();
    let heap = &mut rt.heap;

    marker.scope_chain(heap, &rt.global);
    for ctx in rt.contexts.iter().flatten() {
        for &value in &ctx.stack {
            marker.value(heap, value);
        }
        for scope in &ctx.scopes {
            marker.scope_chain(heap, scope);
        }
        marker.value(heap, ctx.error);
        for &action in &ctx.unwind_actions {
            marker.value(heap, Some(action));
        }
    }

    marker.process_worklist(heap);
    marker.marked
}

/// Free unmarked objects from each context's allocation list, unlinking them
/// as we go, and clear the marks of the survivors.
fn sweep(rt: &mut Runtime) -> (usize, usize) {
    let mut freed = 0;
    let mut freed_bytes = 0;

    for index in 0..rt.contexts.len() {
        let mut cursor = match &rt.contexts[index] {
            Some(ctx) => ctx.last_object,
            None => continue,
        };
        // The closest newer survivor, whose `prev` link we patch.
        let mut newer: Option<ObjId> = None;
        let mut context_bytes = 0;

        while let Some(id) = cursor {
            let header = &rt.heap.object(id).header;
            let (marked, prev) = (header.marked, header.prev);
            cursor = prev;

            if marked {
                rt.heap.object_mut(id).header.marked = false;
                newer = Some(id);
                continue;
            }

            match newer {
                Some(survivor) => rt.heap.object_mut(survivor).header.prev = prev,
                None => {
                    if let Some(ctx) = rt.contexts[index].as_mut() {
                        ctx.last_object = prev;
                    }
                }
            }
            if let Some(bytes) = rt.free_object(id) {
                freed += 1;
                context_bytes += bytes;
            }
        }

        if let Some(ctx) = rt.contexts[index].as_mut() {
            ctx.bytes_allocated = ctx.bytes_allocated.saturating_sub(context_bytes);
        }
        freed_bytes += context_bytes;
    }

    (freed, freed_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_objects_are_freed() {
        let mut rt = Runtime::new();
        let garbage = rt.make_number(1.0).unwrap();
        let kept = rt.make_number(2.0).unwrap();
        rt.push(Some(kept)).unwrap();

        let report = rt.collect();
        assert_eq!(report.freed, 1);
        assert!(!rt.is_live(garbage));
        assert!(rt.is_live(kept));
        assert_eq!(rt.ctx().last_object, Some(kept));
        assert!(!rt.heap.is_marked(kept));
    }

    #[test]
    fn bindings_are_roots() {
        let mut rt = Runtime::new();
        let n = rt.make_number(7.0).unwrap();
        rt.environment().bind("seven", Some(n));
        rt.collect();
        assert!(rt.is_live(n));
        assert_eq!(rt.number(Some(n)).unwrap(), 7.0);
    }

    #[test]
    fn list_children_are_traced() {
        let mut rt = Runtime::new();
        let a = rt.make_number(1.0).unwrap();
        rt.push(Some(a)).unwrap();
        let b = rt.make_number(2.0).unwrap();
        rt.push(Some(b)).unwrap();
        let list = rt.list_from_stack(2).unwrap();
        rt.push(Some(list)).unwrap();

        rt.collect();
        assert!(rt.is_live(a));
        assert!(rt.is_live(b));
        assert!(rt.is_live(list));
    }

    #[test]
    fn sweep_unlinks_from_the_middle_of_the_list() {
        let mut rt = Runtime::new();
        let oldest = rt.make_number(1.0).unwrap();
        let middle = rt.make_number(2.0).unwrap();
        let newest = rt.make_number(3.0).unwrap();
        rt.push(Some(oldest)).unwrap();
        rt.push(Some(newest)).unwrap();

        let before = rt.ctx().bytes_allocated;
        let report = rt.collect();
        assert!(!rt.is_live(middle));
        assert_eq!(rt.heap.object(newest).header.prev, Some(oldest));
        assert_eq!(rt.ctx().bytes_allocated, before - report.freed_bytes);
        assert_eq!(rt.gc_stats().manual_triggers, 1);
    }
}
