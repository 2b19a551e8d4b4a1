// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Sources running on a worker thread.
//!
//! Run with: cargo test --test worker_tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{collect_messages, Format, SCENARIO};
use roboplay::io::{
    open_source, GetBackfillMessagesArgs, InitArgs, Initialization, IterableSource,
    IteratorResult, MessageIterator, MessageIteratorArgs, TopicFilter,
};
use roboplay::worker::{serve_source, InitWorker, WorkerHandle, WorkerIterableSource};
use roboplay::{PlaybackError, Result};

/// Source that initializes fine and then crashes its thread on first read.
struct CrashingSource;

impl IterableSource for CrashingSource {
    fn initialize(&mut self) -> Result<Initialization> {
        let mut init = Initialization::new("crashing");
        init.end = 10;
        Ok(init)
    }

    fn message_iterator(&self, _args: MessageIteratorArgs) -> Result<Box<dyn MessageIterator>> {
        panic!("simulated worker crash");
    }

    fn terminate(&mut self) -> Result<()> {
        Ok(())
    }
}

struct CrashingWorker;

impl InitWorker for CrashingWorker {
    fn spawn(&self, args: &InitArgs) -> Result<WorkerHandle> {
        WorkerHandle::spawn(args.name(), |requests| {
            serve_source(Ok(Box::new(CrashingSource)), requests)
        })
    }
}

/// Worker whose thread exits before answering anything.
struct DeadWorker;

impl InitWorker for DeadWorker {
    fn spawn(&self, args: &InitArgs) -> Result<WorkerHandle> {
        WorkerHandle::spawn(args.name(), drop)
    }
}

fn scenario_args(dir: &tempfile::TempDir) -> InitArgs {
    InitArgs::File(Format::Mcap.write(dir.path(), "scenario", SCENARIO))
}

#[test]
fn test_worker_matches_direct_source() {
    let dir = tempfile::tempdir().unwrap();
    let args = scenario_args(&dir);

    let mut direct = open_source(&args).unwrap();
    let direct_init = direct.initialize().unwrap();
    let mut worker = WorkerIterableSource::with_thread_worker(args);
    let worker_init = worker.initialize().unwrap();
    assert!(worker.is_running());

    assert_eq!(worker_init.start, direct_init.start);
    assert_eq!(worker_init.end, direct_init.end);
    assert_eq!(worker_init.topics, direct_init.topics);
    assert_eq!(worker_init.topic_stats, direct_init.topic_stats);

    for args in [
        MessageIteratorArgs::forward(TopicFilter::All),
        MessageIteratorArgs::forward(TopicFilter::include(["/a"])).reverse(),
        MessageIteratorArgs::forward(TopicFilter::All).start(3).end(9),
    ] {
        let expected: Vec<_> = direct
            .message_iterator(args.clone())
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        let got: Vec<_> = worker
            .message_iterator(args)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(got, expected);
    }

    let backfill = GetBackfillMessagesArgs {
        topics: vec!["/a".to_string(), "/b".to_string()],
        time: 6,
    };
    assert_eq!(
        worker.get_backfill_messages(backfill.clone()).unwrap(),
        direct.get_backfill_messages(backfill).unwrap()
    );

    worker.terminate().unwrap();
    assert!(!worker.is_running());
    direct.terminate().unwrap();
}

#[test]
fn test_small_batches_preserve_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut worker =
        WorkerIterableSource::with_thread_worker(scenario_args(&dir)).with_batch_budget(Duration::ZERO);
    worker.initialize().unwrap();
    let times: Vec<_> = collect_messages(&worker, MessageIteratorArgs::forward(TopicFilter::All))
        .into_iter()
        .map(|(_, t)| t)
        .collect();
    assert_eq!(times, vec![0, 2, 5, 8, 10]);
}

#[test]
fn test_worker_cursor_operations() {
    let dir = tempfile::tempdir().unwrap();
    let mut worker = WorkerIterableSource::with_thread_worker(scenario_args(&dir));
    worker.initialize().unwrap();

    let mut first = worker
        .get_message_cursor(MessageIteratorArgs::forward(TopicFilter::All))
        .unwrap();
    let mut second = worker
        .get_message_cursor(MessageIteratorArgs::forward(TopicFilter::include(["/b"])))
        .unwrap();

    let times = |batch: Option<Vec<IteratorResult>>| -> Vec<u64> {
        batch.unwrap().iter().filter_map(|r| r.time()).collect()
    };
    assert_eq!(times(first.read_until(5).unwrap()), vec![0, 2, 5]);
    assert_eq!(second.next().unwrap().and_then(|r| r.time()), Some(2));
    assert_eq!(times(first.read_until(100).unwrap()), vec![8, 10]);
    assert!(first.read_until(200).unwrap().is_none());

    let batch = second.next_batch(Duration::from_secs(1)).unwrap().unwrap();
    assert_eq!(batch.iter().filter_map(|r| r.time()).collect::<Vec<_>>(), vec![8]);

    first.end().unwrap();
    first.end().unwrap();
    assert!(first.next().unwrap().is_none());
    drop(second);

    worker.terminate().unwrap();
}

#[test]
fn test_open_failure_is_initialization_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"plain text").unwrap();

    let mut worker = WorkerIterableSource::with_thread_worker(InitArgs::File(path));
    assert!(matches!(
        worker.initialize(),
        Err(PlaybackError::Initialization { .. })
    ));
    worker.terminate().unwrap();
}

#[test]
fn test_worker_exit_before_initialize() {
    let mut worker = WorkerIterableSource::new(
        InitArgs::File("unused.mcap".into()),
        Arc::new(DeadWorker),
    );
    assert!(matches!(
        worker.initialize(),
        Err(PlaybackError::Initialization { .. })
    ));
    worker.terminate().unwrap();
}

#[test]
fn test_worker_crash_during_iteration() {
    let mut worker = WorkerIterableSource::new(
        InitArgs::File("unused.mcap".into()),
        Arc::new(CrashingWorker),
    );
    worker.initialize().unwrap();

    match worker.message_iterator(MessageIteratorArgs::forward(TopicFilter::All)) {
        Err(PlaybackError::Iteration { .. }) => {}
        Err(other) => panic!("Expected an iteration error, got {other}"),
        Ok(_) => panic!("Expected the crashed worker to fail"),
    }
    assert!(matches!(
        worker.get_backfill_messages(GetBackfillMessagesArgs {
            topics: vec!["/a".to_string()],
            time: 1,
        }),
        Err(PlaybackError::Iteration { .. })
    ));
    // Stopping a crashed worker succeeds
    worker.terminate().unwrap();
    worker.terminate().unwrap();
}

#[test]
fn test_requests_after_terminate_fail() {
    let dir = tempfile::tempdir().unwrap();
    let mut worker = WorkerIterableSource::with_thread_worker(scenario_args(&dir));
    worker.initialize().unwrap();
    worker.terminate().unwrap();
    assert!(matches!(
        worker.message_iterator(MessageIteratorArgs::forward(TopicFilter::All)),
        Err(PlaybackError::Closed)
    ));
}

#[test]
fn test_drop_stops_worker_with_open_iterator() {
    let dir = tempfile::tempdir().unwrap();
    let mut worker = WorkerIterableSource::with_thread_worker(scenario_args(&dir));
    worker.initialize().unwrap();
    let mut iter = worker
        .message_iterator(MessageIteratorArgs::forward(TopicFilter::All))
        .unwrap();
    assert!(iter.next().is_some());
    drop(worker);
    // The worker is gone; the iterator reports that instead of hanging
    let rest: Vec<_> = iter.collect();
    let errors: Vec<_> = rest.iter().filter_map(|r| r.as_ref().err()).collect();
    assert!(errors.len() <= 1);
    assert!(errors
        .iter()
        .all(|e| matches!(e, PlaybackError::Iteration { .. })));
}
