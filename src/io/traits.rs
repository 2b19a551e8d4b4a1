// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Core traits for iterable sources.
//!
//! This module defines the contract that every recording format, the
//! multi-source combinator and the worker wrapper implement, so that the
//! player can treat all of them alike.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::core::{Result, Time};

use super::cursor::{IteratorCursor, MessageCursor};
use super::filter::TopicFilter;
use super::metadata::{Initialization, IteratorResult, MessageEvent};

/// Arguments for [`IterableSource::message_iterator`].
#[derive(Debug, Clone, Default)]
pub struct MessageIteratorArgs {
    /// Topics to read
    pub topics: TopicFilter,
    /// Inclusive lower bound on receive time
    pub start: Option<Time>,
    /// Inclusive upper bound on receive time
    pub end: Option<Time>,
    /// Iterate from the end towards the start
    pub reverse: bool,
}

impl MessageIteratorArgs {
    /// Forward iteration over `topics` with no bounds.
    pub fn forward(topics: TopicFilter) -> Self {
        Self {
            topics,
            ..Default::default()
        }
    }

    /// Set the lower bound.
    pub fn start(mut self, start: Time) -> Self {
        self.start = Some(start);
        self
    }

    /// Set the upper bound.
    pub fn end(mut self, end: Time) -> Self {
        self.end = Some(end);
        self
    }

    /// Iterate in reverse.
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Whether `time` lies within the requested bounds.
    pub fn contains(&self, time: Time) -> bool {
        self.start.map_or(true, |s| time >= s) && self.end.map_or(true, |e| time <= e)
    }
}

/// Arguments for [`IterableSource::get_backfill_messages`].
#[derive(Debug, Clone, Default)]
pub struct GetBackfillMessagesArgs {
    /// Topics to backfill
    pub topics: Vec<String>,
    /// Backfill messages at or before this time
    pub time: Time,
}

/// Finite, non-restartable stream of iterator results.
///
/// The iterator owns everything it reads from and is `Send`, so it can be
/// moved to a read-ahead thread or a worker.
pub trait MessageIterator: Iterator<Item = Result<IteratorResult>> + Send {}

impl<T> MessageIterator for T where T: Iterator<Item = Result<IteratorResult>> + Send {}

/// A recording that can be initialized and iterated in time order.
///
/// # Example
///
/// ```no_run
/// use roboplay::io::traits::{IterableSource, MessageIteratorArgs};
/// use roboplay::io::filter::TopicFilter;
///
/// fn dump(source: &mut dyn IterableSource) -> roboplay::Result<()> {
///     let init = source.initialize()?;
///     println!("{} topics", init.topics.len());
///     for result in source.message_iterator(MessageIteratorArgs::forward(TopicFilter::All))? {
///         println!("{:?}", result?.time());
///     }
///     source.terminate()
/// }
/// ```
pub trait IterableSource: Send + Sync {
    /// Parse enough of the container to describe it.
    ///
    /// Fails with [`crate::PlaybackError::Initialization`] when the input is
    /// unreadable; recoverable corruption is reported as alerts.
    fn initialize(&mut self) -> Result<Initialization>;

    /// Open an iterator over `[start, end]` for the selected topics.
    ///
    /// Forward iterators yield non-decreasing receive times with ties in
    /// on-disk order; reverse iterators the mirror image.
    fn message_iterator(&self, args: MessageIteratorArgs) -> Result<Box<dyn MessageIterator>>;

    /// For each topic, the latest message at or before `args.time`.
    ///
    /// The result is sorted by receive time. Topics with no such message
    /// are omitted.
    fn get_backfill_messages(&self, args: GetBackfillMessagesArgs) -> Result<Vec<MessageEvent>> {
        backfill_from_reverse_iterator(self, args)
    }

    /// Open a cursor for one playback run.
    fn get_message_cursor(&self, args: MessageIteratorArgs) -> Result<Box<dyn MessageCursor>> {
        let iter = self.message_iterator(args)?;
        Ok(Box::new(IteratorCursor::new(iter)))
    }

    /// Release mapped files, connections and workers. Idempotent.
    fn terminate(&mut self) -> Result<()>;
}

/// Backfill by walking a reverse iterator until every topic has a message.
pub fn backfill_from_reverse_iterator<S>(
    source: &S,
    args: GetBackfillMessagesArgs,
) -> Result<Vec<MessageEvent>>
where
    S: IterableSource + ?Sized,
{
    if args.topics.is_empty() {
        return Ok(Vec::new());
    }

    let wanted = args.topics.len();
    let iter_args = MessageIteratorArgs {
        topics: TopicFilter::Include(args.topics),
        start: None,
        end: Some(args.time),
        reverse: true,
    };

    let mut found: HashMap<String, MessageEvent> = HashMap::new();
    for result in source.message_iterator(iter_args)? {
        match result? {
            IteratorResult::MessageEvent(ev) => {
                if ev.receive_time > args.time {
                    continue;
                }
                found.entry(ev.topic.clone()).or_insert(ev);
                if found.len() == wanted {
                    break;
                }
            }
            IteratorResult::Alert { connection_id, alert } => {
                warn!(
                    context = "backfill",
                    connection_id = ?connection_id,
                    message = %alert.message,
                    "Alert while reading backfill"
                );
            }
            IteratorResult::Stamp(_) => {}
        }
    }

    let mut messages: Vec<MessageEvent> = found.into_values().collect();
    messages.sort_by(|a, b| {
        a.receive_time
            .cmp(&b.receive_time)
            .then_with(|| a.topic.cmp(&b.topic))
    });
    debug!(
        context = "backfill",
        time = args.time,
        found = messages.len(),
        wanted,
        "Backfill complete"
    );
    Ok(messages)
}

/// Adapter that appends a [`IteratorResult::Stamp`] once a bounded forward
/// iterator is exhausted.
pub struct EndStamp<I> {
    inner: I,
    stamp: Option<Time>,
}

impl<I> EndStamp<I> {
    /// Wrap `inner`, emitting `Stamp(end)` after it when `args` is a
    /// bounded forward iteration.
    pub fn new(inner: I, args: &MessageIteratorArgs) -> Self {
        Self {
            inner,
            stamp: if args.reverse { None } else { args.end },
        }
    }
}

impl<I> Iterator for EndStamp<I>
where
    I: Iterator<Item = Result<IteratorResult>>,
{
    type Item = Result<IteratorResult>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(Err(e)) => {
                self.stamp = None;
                Some(Err(e))
            }
            Some(item) => Some(item),
            None => self.stamp.take().map(|t| Ok(IteratorResult::Stamp(t))),
        }
    }
}

/// Box an iterator, adding the end-of-range stamp when appropriate.
pub fn finish_iterator<I>(inner: I, args: &MessageIteratorArgs) -> Box<dyn MessageIterator>
where
    I: Iterator<Item = Result<IteratorResult>> + Send + 'static,
{
    Box::new(EndStamp::new(inner, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PlaybackError;
    use bytes::Bytes;

    fn event(topic: &str, t: Time) -> MessageEvent {
        MessageEvent::raw(topic, "test/Msg", t, Bytes::from_static(b"x"))
    }

    struct VecSource {
        events: Vec<MessageEvent>,
    }

    impl IterableSource for VecSource {
        fn initialize(&mut self) -> Result<Initialization> {
            Ok(Initialization::new("vec"))
        }

        fn message_iterator(&self, args: MessageIteratorArgs) -> Result<Box<dyn MessageIterator>> {
            let mut events: Vec<_> = self
                .events
                .iter()
                .filter(|e| args.topics.should_include(&e.topic) && args.contains(e.receive_time))
                .cloned()
                .collect();
            if args.reverse {
                events.reverse();
            }
            let iter = events.into_iter().map(|e| Ok(IteratorResult::MessageEvent(e)));
            Ok(finish_iterator(iter, &args))
        }

        fn terminate(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn scenario() -> VecSource {
        VecSource {
            events: vec![
                event("/a", 0),
                event("/b", 2),
                event("/a", 5),
                event("/b", 8),
                event("/a", 10),
            ],
        }
    }

    #[test]
    fn test_default_backfill() {
        let source = scenario();
        let msgs = source
            .get_backfill_messages(GetBackfillMessagesArgs {
                topics: vec!["/a".into(), "/b".into(), "/c".into()],
                time: 6,
            })
            .unwrap();
        let got: Vec<_> = msgs.iter().map(|m| (m.topic.as_str(), m.receive_time)).collect();
        assert_eq!(got, vec![("/b", 2), ("/a", 5)]);
    }

    #[test]
    fn test_backfill_includes_exact_time() {
        let source = scenario();
        let msgs = source
            .get_backfill_messages(GetBackfillMessagesArgs {
                topics: vec!["/a".into()],
                time: 5,
            })
            .unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].receive_time, 5);
    }

    #[test]
    fn test_backfill_empty_topics() {
        let source = scenario();
        let msgs = source
            .get_backfill_messages(GetBackfillMessagesArgs {
                topics: vec![],
                time: 100,
            })
            .unwrap();
        assert!(msgs.is_empty());
    }

    #[test]
    fn test_end_stamp_forward_bounded() {
        let source = scenario();
        let args = MessageIteratorArgs::forward(TopicFilter::All).start(1).end(8);
        let results: Vec<_> = source
            .message_iterator(args)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(results.len(), 4);
        assert_eq!(results.last(), Some(&IteratorResult::Stamp(8)));
    }

    #[test]
    fn test_no_stamp_when_reverse_or_unbounded() {
        let source = scenario();
        let results: Vec<_> = source
            .message_iterator(MessageIteratorArgs::forward(TopicFilter::All).end(8).reverse())
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert!(results.iter().all(|r| r.as_message().is_some()));

        let results: Vec<_> = source
            .message_iterator(MessageIteratorArgs::forward(TopicFilter::All))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert!(results.iter().all(|r| r.as_message().is_some()));
    }

    #[test]
    fn test_end_stamp_suppressed_after_error() {
        let inner = vec![Err(PlaybackError::iteration("truncated"))].into_iter();
        let args = MessageIteratorArgs::forward(TopicFilter::All).end(10);
        let mut iter = EndStamp::new(inner, &args);
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }
}
