//! Tests for clock utilities

use std::time::Duration;

use chatwatch_engine::util::clock::{now_ms, system_clock, Clock, ManualClock};

#[test]
fn test_manual_clock_advances() {
    let clock = ManualClock::new(1_000);
    assert_eq!(clock.now_ms(), 1_000);
    clock.advance(Duration::from_secs(2));
    assert_eq!(clock.now_ms(), 3_000);
    clock.set(50);
    assert_eq!(clock.now_ms(), 50);
}

#[test]
fn test_system_clock_tracks_wall_time() {
    let clock = system_clock();
    let before = now_ms();
    let read = clock.now_ms();
    assert!(read >= before);
    assert!(read - before < 60_000);
}
