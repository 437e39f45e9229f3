//! Property-based tests for the watchdog and the frame formatter

use overrun::call_site::MethodCall;
use overrun::clock::ManualClock;
use overrun::sink::{Instruments, MemorySink, SinkLevel};
use overrun::stack_trace::{render_frame, render_trace, CallFrame};
use overrun::thread_probe::FixedProbe;
use overrun::time_unit::TimeUnit;
use overrun::watchdog::{ExecutionWatchdog, WatchSettings};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn frame_strategy() -> impl Strategy<Value = CallFrame> {
    ("[a-z:]{1,12}", "[a-z_]{1,8}", 0u32..10_000)
        .prop_map(|(scope, op, line)| CallFrame::new(scope, op, line))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_render_frame_shape(frame in frame_strategy()) {
        let text = render_frame(&frame);
        prop_assert_eq!(text, format!("{}#{}[{}]", frame.scope, frame.operation, frame.line));
    }

    #[test]
    fn prop_render_trace_joins_frames(frames in prop::collection::vec(frame_strategy(), 0..8)) {
        let expected: Vec<String> = frames.iter().map(render_frame).collect();
        prop_assert_eq!(render_trace(&frames), expected.join(", "));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Arbitrary poll schedules: logged cycle never decreases, strictly rises on
    // every escalation, and the number of warnings matches the final cycle's
    // distinct escalations.
    #[test]
    fn prop_escalation_is_monotonic_and_deduplicated(
        limit in 1i64..200,
        steps in prop::collection::vec(0u64..150, 1..60),
    ) {
        let clock = ManualClock::new();
        let sink = Arc::new(MemorySink::new());
        let watchdog = ExecutionWatchdog::observe(
            MethodCall::new("app::Prop", "run"),
            WatchSettings::new(TimeUnit::Milliseconds, limit),
            FixedProbe::new("t", Vec::new()),
            Instruments::new(Arc::new(clock.clone()), sink.clone()),
        );

        let mut last = watchdog.last_logged_cycle();
        let mut escalations = 0;
        for step in steps {
            clock.advance(Duration::from_millis(step));
            let outcome = watchdog.check().unwrap();
            let now = watchdog.last_logged_cycle();
            prop_assert!(now >= last);
            match outcome {
                Some(escalation) => {
                    prop_assert!(escalation.cycle > last);
                    prop_assert_eq!(escalation.cycle, now);
                    escalations += 1;
                }
                None => prop_assert_eq!(now, last),
            }
            last = now;

            let age = watchdog.elapsed().as_millis() as i64;
            let expected = ((age - limit).div_euclid(limit)).max(0);
            prop_assert_eq!(now, expected);
        }

        prop_assert_eq!(sink.count(SinkLevel::Warn), escalations);
        prop_assert_eq!(sink.count(SinkLevel::Debug), escalations);
    }

    #[test]
    fn prop_checks_within_one_cycle_emit_at_most_once(
        limit in 1i64..100,
        cycle in 1i64..20,
        repeats in 1usize..50,
    ) {
        let clock = ManualClock::new();
        let sink = Arc::new(MemorySink::new());
        let watchdog = ExecutionWatchdog::observe(
            MethodCall::new("app::Prop", "run"),
            WatchSettings::new(TimeUnit::Milliseconds, limit),
            FixedProbe::new("t", Vec::new()),
            Instruments::new(Arc::new(clock.clone()), sink.clone()),
        );

        clock.advance(Duration::from_millis(((cycle + 1) * limit) as u64));
        for _ in 0..repeats {
            watchdog.check().unwrap();
        }

        prop_assert_eq!(sink.count(SinkLevel::Warn), 1);
        prop_assert_eq!(watchdog.last_logged_cycle(), cycle);
    }
}
