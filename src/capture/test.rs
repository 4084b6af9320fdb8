use super::*;
use crate::adapter::NullAdapter;

fn fire_new(adapter: &NullAdapter, object: usize, class: usize) {
    adapter.set_class(object, class);
    adapter.fire(HookKind::New, RawTraceArg(object));
}

fn fire_free(adapter: &NullAdapter, object: usize) {
    adapter.fire(HookKind::Free, RawTraceArg(object));
}

#[test]
fn start_refuses_when_already_running() {
    let adapter = Arc::new(NullAdapter::new());
    let capture: Capture<()> = Capture::new(adapter);
    capture.start().unwrap();
    assert!(matches!(capture.start(), Err(EngineError::AlreadyRunning)));
}

#[test]
fn stop_refuses_when_not_running() {
    let adapter = Arc::new(NullAdapter::new());
    let capture: Capture<()> = Capture::new(adapter);
    assert!(matches!(capture.stop(), Err(EngineError::NotRunning)));
}

#[test]
fn clear_refuses_while_running() {
    let adapter = Arc::new(NullAdapter::new());
    let capture: Capture<()> = Capture::new(adapter);
    capture.start().unwrap();
    assert!(matches!(capture.clear(), Err(EngineError::ClearWhileRunning)));
}

#[test]
fn new_then_free_round_trips_through_table() {
    let adapter = Arc::new(NullAdapter::new());
    let capture: Capture<()> = Capture::new(adapter.clone());
    capture.start().unwrap();

    fire_new(&adapter, 8, 1);
    capture.drain();
    assert_eq!(capture.new_count(), 1);
    assert_eq!(capture.retained_count_of(ClassRef(1)), 1);

    fire_free(&adapter, 8);
    capture.drain();
    assert_eq!(capture.free_count(), 1);
    assert_eq!(capture.retained_count_of(ClassRef(1)), 0);
}

#[test]
fn free_for_unknown_object_is_silently_absorbed() {
    let adapter = Arc::new(NullAdapter::new());
    let capture: Capture<()> = Capture::new(adapter.clone());
    capture.start().unwrap();

    fire_free(&adapter, 999);
    capture.drain();
    assert_eq!(capture.free_count(), 1);
    assert_eq!(capture.retained_count(), 0);
}

#[test]
fn untrackable_object_never_reaches_the_table() {
    let adapter = Arc::new(NullAdapter::new());
    adapter.mark_untrackable(8);
    let capture: Capture<()> = Capture::new(adapter.clone());
    capture.start().unwrap();

    fire_new(&adapter, 8, 1);
    capture.drain();
    assert_eq!(capture.new_count(), 0);
    assert_eq!(capture.statistics().object_table_size, 0);
}

#[test]
fn callback_return_value_round_trips_from_new_to_free() {
    let adapter = Arc::new(NullAdapter::new());
    let capture: Capture<u32> = Capture::new(adapter.clone());
    capture.start().unwrap();
    capture.track(
        ClassRef(1),
        Some(Box::new(|_, event, data| match event {
            CallbackEvent::New => Some(42),
            CallbackEvent::Free => {
                assert_eq!(data, Some(42));
                None
            }
        })),
    );

    fire_new(&adapter, 8, 1);
    capture.drain();
    fire_free(&adapter, 8);
    capture.drain();

    assert_eq!(capture.free_count(), 1);
}

#[test]
fn reentrant_new_from_inside_callback_is_dropped() {
    let adapter = Arc::new(NullAdapter::new());
    let capture: Capture<()> = Capture::new(adapter.clone());
    capture.start().unwrap();

    let callback_adapter = adapter.clone();
    capture.track(
        ClassRef(1),
        Some(Box::new(move |_, _, _| {
            // Simulate the callback itself allocating; the runtime would
            // fire the NEW hook again on the same thread here.
            callback_adapter.fire(HookKind::New, RawTraceArg(999));
            None
        })),
    );

    fire_new(&adapter, 8, 1);
    capture.drain();

    assert_eq!(capture.paused_depth(), 0);
    assert_eq!(capture.new_count(), 1);

    let mut seen = Vec::new();
    capture.each_object(None, |object, _| seen.push(object.0));
    assert!(!seen.contains(&999));
}

#[test]
fn each_object_filters_by_class_and_drains_first() {
    let adapter = Arc::new(NullAdapter::new());
    let capture: Capture<()> = Capture::new(adapter.clone());
    capture.start().unwrap();

    fire_new(&adapter, 8, 1);
    fire_new(&adapter, 16, 2);

    let mut seen = Vec::new();
    capture.each_object(Some(ClassRef(1)), |object, _| seen.push(object.0));
    assert_eq!(seen, vec![8]);
    assert!(adapter.collection_is_enabled());
}

#[test]
fn statistics_report_tracked_and_table_counts() {
    let adapter = Arc::new(NullAdapter::new());
    let capture: Capture<()> = Capture::new(adapter.clone());
    capture.start().unwrap();
    capture.track(ClassRef(1), None);

    fire_new(&adapter, 8, 1);
    capture.drain();

    let stats = capture.statistics();
    assert_eq!(stats.tracked_count, 1);
    assert_eq!(stats.object_table_size, 1);
}

#[test]
fn new_count_survives_a_queue_full_drop() {
    let adapter = Arc::new(NullAdapter::new());
    let capture: Capture<()> = Capture::with_max_events(adapter.clone(), 1);
    capture.start().unwrap();

    // Second NEW is dropped by the queue (capacity 1), but the producer
    // still bumped `new_count` before attempting to enqueue it.
    fire_new(&adapter, 8, 1);
    fire_new(&adapter, 16, 1);
    capture.drain();

    assert_eq!(capture.new_count(), 2);
    assert_eq!(capture.statistics().object_table_size, 1);
}

#[test]
fn untrack_removes_allocations_entry() {
    let adapter = Arc::new(NullAdapter::new());
    let capture: Capture<()> = Capture::new(adapter);
    capture.track(ClassRef(1), None);
    assert!(capture.get(ClassRef(1)).is_some());
    capture.untrack(ClassRef(1));
    assert!(capture.get(ClassRef(1)).is_none());
}
