// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Several consecutive recordings played as one.
//!
//! Run with: cargo test --test multi_source_tests

mod common;

use common::{collect_messages, pairs, Format};
use roboplay::io::{
    open_source, AlertSeverity, GetBackfillMessagesArgs, InitArgs, MessageIteratorArgs,
    TopicFilter,
};
use roboplay::PlaybackError;

const FIRST: &[common::Fixture<'static>] = &[("/a", 0, b"a0"), ("/b", 4, b"b4"), ("/a", 10, b"a10")];
const SECOND: &[common::Fixture<'static>] =
    &[("/a", 10, b"a10'"), ("/b", 12, b"b12"), ("/a", 20, b"a20")];

fn files(format: Format, dir: &tempfile::TempDir) -> InitArgs {
    InitArgs::from_paths([
        format.write(dir.path(), "first", FIRST),
        format.write(dir.path(), "second", SECOND),
    ])
}

#[test]
fn test_adjacent_files_merge_in_order() {
    for format in Format::ALL {
        let dir = tempfile::tempdir().unwrap();
        let mut source = open_source(&files(format, &dir)).unwrap();
        let init = source.initialize().unwrap();
        assert_eq!((init.start, init.end), (0, 20), "{format:?}");
        assert_eq!(init.topic_stats["/a"].num_messages, 4, "{format:?}");
        assert_eq!(init.topic_stats["/b"].first_message_time, Some(4), "{format:?}");

        let messages = collect_messages(
            source.as_ref(),
            MessageIteratorArgs::forward(TopicFilter::All),
        );
        assert_eq!(
            messages,
            pairs(&[
                ("/a", 0),
                ("/b", 4),
                ("/a", 10),
                ("/a", 10),
                ("/b", 12),
                ("/a", 20),
            ]),
            "{format:?}"
        );
    }
}

#[test]
fn test_earlier_file_wins_equal_times() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = open_source(&files(Format::Mcap, &dir)).unwrap();
    source.initialize().unwrap();
    let payloads: Vec<_> = source
        .message_iterator(MessageIteratorArgs::forward(TopicFilter::include(["/a"])).start(10).end(10))
        .unwrap()
        .filter_map(|r| r.unwrap().into_message())
        .map(|m| m.message.as_raw().unwrap().to_vec())
        .collect();
    assert_eq!(payloads, vec![b"a10".to_vec(), b"a10'".to_vec()]);
}

#[test]
fn test_reverse_crosses_file_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = open_source(&files(Format::Bag, &dir)).unwrap();
    source.initialize().unwrap();
    let times: Vec<_> = collect_messages(
        source.as_ref(),
        MessageIteratorArgs::forward(TopicFilter::All).start(4).end(12).reverse(),
    )
    .into_iter()
    .map(|(_, t)| t)
    .collect();
    assert_eq!(times, vec![12, 10, 10, 4]);
}

#[test]
fn test_backfill_spans_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = open_source(&files(Format::Db3, &dir)).unwrap();
    source.initialize().unwrap();

    let backfill = source
        .get_backfill_messages(GetBackfillMessagesArgs {
            topics: vec!["/a".to_string(), "/b".to_string()],
            time: 15,
        })
        .unwrap();
    let got: Vec<_> = backfill
        .iter()
        .map(|m| (m.topic.clone(), m.receive_time))
        .collect();
    assert_eq!(got, pairs(&[("/a", 10), ("/b", 12)]));
    // On equal times the later file's message is the latest
    assert_eq!(&backfill[0].message.as_raw().unwrap()[..], b"a10'");

    let early = source
        .get_backfill_messages(GetBackfillMessagesArgs {
            topics: vec!["/b".to_string()],
            time: 11,
        })
        .unwrap();
    assert_eq!(early.len(), 1);
    assert_eq!(early[0].receive_time, 4);
}

#[test]
fn test_failed_file_becomes_alert() {
    let dir = tempfile::tempdir().unwrap();
    let good = Format::Mcap.write(dir.path(), "good", FIRST);
    let missing = dir.path().join("missing.mcap");
    let mut source = open_source(&InitArgs::from_paths([good, missing])).unwrap();

    let init = source.initialize().unwrap();
    assert_eq!(init.message_count(), 3);
    assert!(init
        .alerts
        .iter()
        .any(|a| a.severity == AlertSeverity::Error));
    assert_eq!(
        collect_messages(source.as_ref(), MessageIteratorArgs::forward(TopicFilter::All)).len(),
        3
    );
}

#[test]
fn test_all_files_failing_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = open_source(&InitArgs::from_paths([
        dir.path().join("a.mcap"),
        dir.path().join("b.mcap"),
    ]))
    .unwrap();
    assert!(matches!(
        source.initialize(),
        Err(PlaybackError::Initialization { .. })
    ));
}

#[test]
fn test_mixed_formats_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let args = InitArgs::from_paths([
        Format::Mcap.write(dir.path(), "first", FIRST),
        Format::Bag.write(dir.path(), "second", SECOND),
    ]);
    assert!(matches!(
        open_source(&args),
        Err(PlaybackError::InvalidArgument { .. })
    ));
}
