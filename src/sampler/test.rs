use std::sync::Arc;

use super::*;
use crate::adapter::{HookKind, NullAdapter, RawTraceArg};

fn frame(n: usize) -> Frame {
    Frame {
        path: "alloc_site.rs".to_string(),
        line: n as u32,
        label: Some(format!("frame{n}")),
    }
}

fn fire_new(adapter: &NullAdapter, object: usize, class: usize) {
    adapter.set_class(object, class);
    adapter.fire(HookKind::New, RawTraceArg(object));
}

fn fire_free(adapter: &NullAdapter, object: usize) {
    adapter.fire(HookKind::Free, RawTraceArg(object));
}

/// Shared starting point for the tests below: depth 8, a two-crossing
/// escalation threshold, and a call tree that won't prune mid-test.
fn test_opts() -> SamplerOpts {
    let mut opts = SamplerOpts::default();
    opts.depth = 8;
    opts.increases_threshold = 2;
    opts.prune_limit = 100;
    opts.prune_threshold = 1000;
    opts
}

#[test]
fn increases_bumps_only_past_threshold_and_max_observed_is_monotonic() {
    let adapter = Arc::new(NullAdapter::new());
    let capture = Arc::new(Capture::new(adapter.clone()));
    capture.start().unwrap();
    let mut opts = test_opts();
    opts.threshold = 10;
    let sampler = Sampler::new(capture.clone(), opts);
    sampler.track(ClassRef(1));

    for i in 0..5u64 {
        fire_new(&adapter, 100 + i as usize, 1);
    }
    capture.drain();

    let mut increased_flags = Vec::new();
    sampler.sample(|sample, increased| increased_flags.push((sample.max_observed, increased)));
    assert_eq!(increased_flags, vec![(5, true)]);

    // A second sample with no growth must not bump increases again.
    let mut second = Vec::new();
    sampler.sample(|sample, increased| second.push((sample.increases, increased)));
    assert_eq!(second, vec![(1, false)]);
}

#[test]
fn escalation_installs_stack_capturing_callback_after_threshold_crossings() {
    let adapter = Arc::new(NullAdapter::new());
    let capture = Arc::new(Capture::new(adapter.clone()));
    capture.start().unwrap();
    let mut opts = test_opts();
    opts.threshold = 10;
    let sampler = Sampler::new(capture.clone(), opts);
    sampler.track(ClassRef(1));
    adapter.set_stack(vec![frame(1), frame(2)]);

    for i in 0..5u64 {
        fire_new(&adapter, 100 + i as usize, 1);
    }
    capture.drain();
    sampler.sample(|_, _| {});
    assert!(!capture.tracking(ClassRef(1)));

    for i in 5..10u64 {
        fire_new(&adapter, 100 + i as usize, 1);
    }
    capture.drain();
    sampler.sample(|_, _| {});
    assert!(capture.tracking(ClassRef(1)));
}

#[test]
fn escalated_free_decrements_call_tree_retained_count() {
    let adapter = Arc::new(NullAdapter::new());
    let capture = Arc::new(Capture::new(adapter.clone()));
    capture.start().unwrap();
    let mut opts = test_opts();
    opts.increases_threshold = 1;
    opts.threshold = 0;
    let sampler = Sampler::new(capture.clone(), opts);
    sampler.track(ClassRef(1));
    adapter.set_stack(vec![frame(1)]);

    fire_new(&adapter, 100, 1);
    capture.drain();
    sampler.sample(|_, _| {});
    assert!(capture.tracking(ClassRef(1)));

    fire_new(&adapter, 101, 1);
    capture.drain();

    let report_before = sampler.analyze(ClassRef(1), true, None, 0).unwrap();
    let roots_before = report_before.allocation_roots.unwrap();
    assert_eq!(roots_before.top_paths[0].retained, 1);

    fire_free(&adapter, 101);
    capture.drain();

    let report_after = sampler.analyze(ClassRef(1), true, None, 0).unwrap();
    let roots_after = report_after.allocation_roots.unwrap();
    assert_eq!(roots_after.top_paths[0].retained, 0);
    assert_eq!(roots_after.top_paths[0].total, 1);
}

#[test]
fn analyze_returns_none_below_retained_minimum() {
    let adapter = Arc::new(NullAdapter::new());
    let capture = Arc::new(Capture::new(adapter.clone()));
    capture.start().unwrap();
    let sampler = Sampler::new(capture.clone(), test_opts());
    sampler.track(ClassRef(1));

    fire_new(&adapter, 100, 1);
    capture.drain();

    assert!(sampler.analyze(ClassRef(1), false, None, 5).is_none());
    assert!(sampler.analyze(ClassRef(1), false, None, 1).is_some());
}

#[test]
fn analyze_retained_addresses_are_hex_formatted() {
    let adapter = Arc::new(NullAdapter::new());
    let capture = Arc::new(Capture::new(adapter.clone()));
    capture.start().unwrap();
    let sampler = Sampler::new(capture.clone(), test_opts());
    sampler.track(ClassRef(1));

    fire_new(&adapter, 0x10, 1);
    capture.drain();

    let report = sampler.analyze(ClassRef(1), false, Some(10), 0).unwrap();
    assert_eq!(report.retained_addresses.unwrap(), vec!["0x10".to_string()]);
}

#[test]
fn untrack_removes_sample_and_tree_state() {
    let adapter = Arc::new(NullAdapter::new());
    let capture = Arc::new(Capture::new(adapter));
    let sampler = Sampler::new(capture, test_opts());
    sampler.track(ClassRef(1));
    sampler.untrack(ClassRef(1));

    let mut ticks = 0;
    sampler.sample(|_, _| ticks += 1);
    assert_eq!(ticks, 0);
}

#[test]
fn default_opts_match_documented_values() {
    let opts = SamplerOpts::default();
    assert_eq!(opts.depth, 32);
    assert!(opts.filter.is_none());
    assert_eq!(opts.increases_threshold, 10);
    assert_eq!(opts.prune_limit, 1000);
    assert_eq!(opts.prune_threshold, 10_000);
    assert!(!opts.gc);
    assert_eq!(opts.threshold, DEFAULT_THRESHOLD);
}

#[cfg(feature = "serde")]
#[test]
fn analyze_report_serializes_to_json() {
    let adapter = Arc::new(NullAdapter::new());
    let capture = Arc::new(Capture::new(adapter.clone()));
    capture.start().unwrap();
    let sampler = Sampler::new(capture.clone(), test_opts());
    sampler.track(ClassRef(1));
    adapter.set_stack(vec![frame(1)]);

    fire_new(&adapter, 0x20, 1);
    capture.drain();

    let report = sampler.analyze(ClassRef(1), true, Some(5), 0).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["allocations"]["retained"], 1);
    assert_eq!(json["retained_addresses"][0], "0x20");
}
