use std::cell::Cell as Counter;

use cinder::heap::{Custom, Payload};
use cinder::types::TypeDescriptor;
use cinder::{Runtime, RuntimeConfig, TypeId};

thread_local! {
    static DELETED: Counter<usize> = Counter::new(0);
}

fn deleted() -> usize {
    DELETED.with(|d| d.get())
}

fn reset_deleted() {
    DELETED.with(|d| d.set(0));
}

fn count_delete(payload: &mut Payload) {
    if let Payload::Custom(custom) = payload {
        custom.refs.clear();
    }
    DELETED.with(|d| d.set(d.get() + 1));
}

fn tracked_type(rt: &mut Runtime) -> TypeId {
    rt.register_type(TypeDescriptor {
        delete: Some(count_delete),
        ..TypeDescriptor::opaque::<Custom>("Tracked")
    })
}

fn word(rt: &Runtime, id: cinder::ObjId) -> u64 {
    match rt.payload(id) {
        Payload::Custom(custom) => custom.word,
        other => panic!("not a custom payload: {:?}", other),
    }
}

#[test]
fn unreachable_objects_are_deleted_exactly_once() {
    reset_deleted();
    let mut rt = Runtime::new();
    let tracked = tracked_type(&mut rt);

    let mut on_stack = Vec::new();
    let mut bound = Vec::new();
    let mut garbage = Vec::new();
    for i in 0..10u64 {
        let id = rt
            .make_custom(tracked, Custom { refs: Vec::new(), word: i })
            .unwrap();
        match i % 3 {
            0 => {
                rt.push(Some(id)).unwrap();
                on_stack.push(id);
            }
            1 => {
                rt.environment().bind(&format!("obj{}", i), Some(id));
                bound.push(id);
            }
            _ => garbage.push(id),
        }
    }

    let report = rt.collect();
    assert_eq!(report.freed, garbage.len());
    assert_eq!(deleted(), garbage.len());
    for &id in on_stack.iter().chain(&bound) {
        assert!(rt.is_live(id));
    }
    assert_eq!(word(&rt, on_stack[1]), 3);
    assert_eq!(word(&rt, bound[0]), 1);

    // Survivors had their marks cleared, so a second cycle frees nothing.
    assert_eq!(rt.collect().freed, 0);
    assert_eq!(deleted(), garbage.len());

    drop(rt);
    assert_eq!(deleted(), 10);
}

#[test]
fn custom_references_are_traced() {
    reset_deleted();
    let mut rt = Runtime::new();
    let tracked = tracked_type(&mut rt);

    let child = rt.make_custom(tracked, Custom::default()).unwrap();
    rt.push(Some(child)).unwrap();
    let holder = rt
        .make_custom(tracked, Custom { refs: vec![child], word: 42 })
        .unwrap();
    rt.pop().unwrap();
    rt.global().bind("holder", Some(holder));

    rt.collect();
    assert!(rt.is_live(child));
    assert!(rt.is_live(holder));
    assert_eq!(deleted(), 0);

    rt.global().unbind("holder");
    rt.collect();
    assert!(!rt.is_live(holder));
    assert!(!rt.is_live(child));
    assert_eq!(deleted(), 2);
}

#[test]
fn closures_keep_their_captured_scope_alive() {
    let mut rt = Runtime::new();
    rt.eval_str("(define make (lambda (items) (lambda () items)))")
        .unwrap();
    rt.eval_str("(define keep (make (list 1 2)))").unwrap();
    rt.collect();
    rt.collect();
    let value = rt.eval_str("(keep)").unwrap();
    assert_eq!(rt.print_to_string(value).unwrap(), "(1.000000 2.000000)");
}

#[test]
fn threshold_triggers_collection_during_evaluation() {
    let mut rt = Runtime::with_config(RuntimeConfig {
        gc_threshold: 4096,
        ..RuntimeConfig::default()
    });
    rt.eval_str("(define keep (list 7 8 9))").unwrap();
    for _ in 0..500 {
        let value = rt.eval_str("(list 1 (+ 1 1) 3)").unwrap();
        assert_eq!(
            rt.print_to_string(value).unwrap(),
            "(1.000000 2.000000 3.000000)"
        );
    }
    assert!(rt.gc_stats().auto_triggers > 0);
    assert!(rt.gc_stats().total_freed > 0);
    let kept = rt.eval_str("keep").unwrap();
    assert_eq!(
        rt.print_to_string(kept).unwrap(),
        "(7.000000 8.000000 9.000000)"
    );
}

#[test]
fn recursion_survives_collections() {
    let mut rt = Runtime::with_config(RuntimeConfig {
        gc_threshold: 2048,
        ..RuntimeConfig::default()
    });
    rt.eval_str(
        "(define build (lambda (n acc) (if (= n 0) acc (build (- n 1) (cons n acc)))))",
    )
    .unwrap();
    let value = rt.eval_str("(build 60 ())").unwrap();
    let items = rt.list_items(value).unwrap();
    assert_eq!(items.len(), 60);
    assert_eq!(rt.number(items[0]).unwrap(), 1.0);
    assert_eq!(rt.number(items[59]).unwrap(), 60.0);
    assert!(rt.gc_stats().collections > 0);
}

#[test]
fn threshold_grows_when_everything_is_live() {
    let mut rt = Runtime::with_config(RuntimeConfig {
        gc_threshold: 256,
        ..RuntimeConfig::default()
    });
    for i in 0..100 {
        let n = rt.make_number(i as f64).unwrap();
        rt.push(Some(n)).unwrap();
    }
    assert!(rt.ctx().threshold > 256);
    assert!(rt.ctx().bytes_allocated < rt.ctx().threshold);
    assert_eq!(rt.depth(), 100);
}

#[test]
fn roots_of_every_context_are_honored() {
    let mut rt = Runtime::new();
    let main = rt.active_context();
    let other = rt.create_context();

    rt.switch_context(other);
    let theirs = rt.make_number(1.0).unwrap();
    rt.push(Some(theirs)).unwrap();
    let dropped = rt.make_number(2.0).unwrap();

    rt.switch_context(main);
    rt.collect();
    assert!(rt.is_live(theirs));
    assert!(!rt.is_live(dropped));
}

#[test]
fn heap_limit_collects_before_giving_up() {
    let mut rt = Runtime::with_config(RuntimeConfig {
        heap_limit: Some(4096),
        ..RuntimeConfig::default()
    });
    for i in 0..1000 {
        rt.make_number(i as f64).unwrap();
    }
    assert!(rt.gc_stats().collections > 0);
    assert!(rt.bytes_in_use() <= 4096);
}

#[test]
fn bindings_of_an_inactive_context_are_roots() {
    let mut rt = Runtime::new();
    let main = rt.active_context();
    let other = rt.create_context();

    rt.switch_context(other);
    rt.eval_str("(define kept (list 4 5))").unwrap();
    let kept = rt.environment().lookup("kept").unwrap().unwrap();
    assert_eq!(rt.global().lookup("kept"), None);

    rt.switch_context(main);
    for i in 0..50 {
        rt.make_number(i as f64).unwrap();
    }
    let report = rt.collect();
    assert!(report.freed >= 50);
    assert!(rt.is_live(kept));

    rt.switch_context(other);
    let value = rt.eval_str("kept").unwrap();
    assert_eq!(value, Some(kept));
    assert_eq!(
        rt.print_to_string(value).unwrap(),
        "(4.000000 5.000000)"
    );
}
