use std::cell::RefCell;

use super::*;
use crate::adapter::NullAdapter;

#[test]
fn enqueue_then_process_preserves_fifo_order() {
    let queue = EventQueue::new();
    for i in 1..=5u8 {
        assert!(queue.enqueue(Event::new_event(
            CaptureId(0),
            ClassRef(1),
            ObjectRef(i as usize)
        )));
    }

    let seen = RefCell::new(Vec::new());
    queue.process_all(|event| seen.borrow_mut().push(event.object.0));

    assert_eq!(seen.into_inner(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn events_arriving_during_consumption_land_on_next_pass() {
    let queue = EventQueue::new();
    queue.enqueue(Event::new_event(CaptureId(0), ClassRef(1), ObjectRef(1)));

    let mut first_pass = Vec::new();
    queue.process_all(|event| {
        first_pass.push(event.object.0);
        // Simulate a producer firing mid-drain: lands in the new
        // available side, not visible to this pass.
        queue.enqueue(Event::new_event(CaptureId(0), ClassRef(1), ObjectRef(2)));
    });
    assert_eq!(first_pass, vec![1]);

    let mut second_pass = Vec::new();
    queue.process_all(|event| second_pass.push(event.object.0));
    assert_eq!(second_pass, vec![2]);
}

#[test]
fn slots_are_cleared_after_processing() {
    let queue = EventQueue::new();
    queue.enqueue(Event::new_event(CaptureId(0), ClassRef(1), ObjectRef(1)));
    queue.process_all(|_| {});
    assert_eq!(queue.len(), 0);
}

#[test]
fn max_events_drops_newest_on_overflow() {
    let queue = EventQueue::new().with_max_events(2);
    assert!(queue.enqueue(Event::new_event(CaptureId(0), ClassRef(1), ObjectRef(1))));
    assert!(queue.enqueue(Event::new_event(CaptureId(0), ClassRef(1), ObjectRef(2))));
    assert!(!queue.enqueue(Event::new_event(CaptureId(0), ClassRef(1), ObjectRef(3))));
    assert_eq!(queue.len(), 2);
}

#[test]
fn handler_panic_does_not_abort_the_drain() {
    // Initialized here (rather than globally) so `RUST_LOG=retain_track=warn
    // cargo test handler_panic -- --nocapture` surfaces the absorbed-panic
    // warning this test provokes.
    let _ = env_logger::try_init();
    let queue = EventQueue::new();
    queue.enqueue(Event::new_event(CaptureId(0), ClassRef(1), ObjectRef(1)));
    queue.enqueue(Event::new_event(CaptureId(0), ClassRef(1), ObjectRef(2)));

    let seen = RefCell::new(Vec::new());
    queue.process_all(|event| {
        if event.object.0 == 1 {
            panic!("simulated user callback panic");
        }
        seen.borrow_mut().push(event.object.0);
    });

    assert_eq!(seen.into_inner(), vec![2]);
    assert_eq!(queue.len(), 0);
}

#[test]
fn free_event_object_is_not_marked() {
    let queue = EventQueue::new();
    queue.enqueue(Event::free_event(CaptureId(0), ObjectRef(7)));

    let mut marked = Vec::new();
    queue.mark_refs(|r| marked.push(r.0));
    assert!(!marked.contains(&7));
}

#[test]
fn new_event_object_and_class_are_marked() {
    let queue = EventQueue::new();
    queue.enqueue(Event::new_event(CaptureId(0), ClassRef(9), ObjectRef(7)));

    let mut marked = Vec::new();
    queue.mark_refs(|r| marked.push(r.0));
    assert!(marked.contains(&7));
    assert!(marked.contains(&9));
}

#[test]
fn relocate_refs_rewrites_new_event_object() {
    let queue = EventQueue::new();
    queue.enqueue(Event::new_event(CaptureId(0), ClassRef(9), ObjectRef(7)));

    let adapter = NullAdapter::new();
    adapter.set_relocation(7, 700);
    queue.relocate_refs(&adapter);

    let mut seen = Vec::new();
    queue.process_all(|e| seen.push(e.object.0));
    assert_eq!(seen, vec![700]);
}
