//! Tests for runtime spawners

use std::time::Duration;

use chatwatch_engine::core::Spawn;
use chatwatch_engine::runtime::{ThreadSpawner, TokioSpawner};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::current().expect("inside runtime");

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner
        .spawn(
            "test",
            Box::new(move || {
                tx.send(123).unwrap();
            }),
        )
        .unwrap();

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[test]
fn test_tokio_spawner_outside_runtime() {
    assert!(TokioSpawner::current().is_err());
}

#[test]
fn test_thread_spawner_names_threads() {
    let spawner = ThreadSpawner::with_stack_size(256 * 1024);
    let (tx, rx) = crossbeam_channel::bounded(1);
    spawner
        .spawn(
            "slot-0",
            Box::new(move || {
                tx.send(std::thread::current().name().map(str::to_owned)).ok();
            }),
        )
        .unwrap();
    let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(name.as_deref(), Some("cw-slot-0-0"));
}
