//! Tests for lifecycle event sinks

use chatwatch_engine::core::{
    EventSink, InMemoryEventSink, LifecycleAction, LifecycleEvent, TaskCategory, TaskId,
    TracingEventSink,
};
use chatwatch_engine::util::telemetry::init_tracing;

fn make_event(task_id: TaskId, action: LifecycleAction) -> LifecycleEvent {
    LifecycleEvent {
        task_id,
        category: TaskCategory::UserCache,
        action,
        attempts: 1,
        at_ms: 42,
    }
}

#[test]
fn test_in_memory_sink_records_in_order() {
    let sink = InMemoryEventSink::new(10);
    let id = TaskId::new();
    sink.record(make_event(id, LifecycleAction::Submitted));
    sink.record(make_event(id, LifecycleAction::Dispatched));
    sink.record(make_event(id, LifecycleAction::Retrying));

    let events = sink.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[2].action, LifecycleAction::Retrying);
    assert_eq!(events[0].category, TaskCategory::UserCache);
}

#[test]
fn test_zero_capacity_sink_keeps_nothing() {
    let sink = InMemoryEventSink::new(0);
    sink.record(make_event(TaskId::new(), LifecycleAction::Finished));
    assert!(sink.events().is_empty());
}

#[test]
fn test_event_serializes_snake_case() {
    let event = make_event(TaskId::new(), LifecycleAction::Aborted);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["action"], "aborted");
    assert_eq!(json["category"], "user_cache");
}

#[test]
fn test_tracing_sink_accepts_events() {
    init_tracing();
    init_tracing();
    TracingEventSink.record(make_event(TaskId::new(), LifecycleAction::Failed));
}
