// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Time-ordered iteration over chunked and in-memory record sets.
//!
//! Chunked formats (MCAP, ROS1 bag) describe each chunk by its time span in
//! the summary. [`ChunkMergeIterator`] keeps a heap of chunk spans and
//! decompresses a chunk only once the merge reaches its first (or, in
//! reverse, last) timestamp, so memory stays bounded by the number of
//! overlapping chunks. [`SortedRecordIter`] serves formats that are fully
//! indexed in memory.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::{Result, Time};

use super::filter::ConnectionFilter;
use super::metadata::{Alert, IteratorResult};
use super::traits::MessageIteratorArgs;

/// One message record before it is turned into a message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Connection (channel) ID
    pub connection_id: u32,
    /// Receive (log) time
    pub log_time: Time,
    /// Publish time, when the format records one
    pub publish_time: Option<Time>,
    /// Serialized message bytes
    pub data: Bytes,
}

/// Time span of a chunk as described by the file summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Position of the chunk in file order
    pub ordinal: usize,
    /// Earliest record time in the chunk
    pub start_time: Time,
    /// Latest record time in the chunk
    pub end_time: Time,
    /// Connections present in the chunk; empty when unknown
    pub connections: Vec<u32>,
}

impl ChunkSpan {
    /// Whether the chunk can hold records selected by `args` and `filter`.
    pub fn is_relevant(&self, args: &MessageIteratorArgs, filter: &ConnectionFilter) -> bool {
        if args.start.is_some_and(|s| self.end_time < s) {
            return false;
        }
        if args.end.is_some_and(|e| self.start_time > e) {
            return false;
        }
        self.connections.is_empty() || self.connections.iter().any(|c| filter.allows(*c))
    }
}

/// Turns records into iterator results.
pub trait RecordDecoder: Send + Sync {
    /// Convert a record into a message event, or an alert when the
    /// connection is unknown or the payload cannot be decoded.
    fn to_result(&self, record: ChunkRecord) -> IteratorResult;
}

/// Loads and decompresses chunks on demand.
pub trait ChunkLoader: RecordDecoder {
    /// Load every record of chunk `ordinal`, in on-disk order.
    fn load_chunk(&self, ordinal: usize) -> Result<Vec<ChunkRecord>>;
}

/// Heap key: (time, chunk ordinal, record index), inverted for reverse.
type Key = (u64, usize, usize);

fn key(reverse: bool, time: Time, ordinal: usize, index: usize) -> Key {
    if reverse {
        (u64::MAX - time, usize::MAX - ordinal, usize::MAX - index)
    } else {
        (time, ordinal, index)
    }
}

enum EntryBody {
    Unloaded(ChunkSpan),
    Loaded {
        ordinal: usize,
        records: VecDeque<(usize, ChunkRecord)>,
    },
}

struct Entry {
    key: Key,
    body: EntryBody,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// K-way merge over lazily loaded chunks.
///
/// Forward iteration yields non-decreasing log times; ties are broken by
/// chunk order, then by position inside the chunk. Reverse iteration yields
/// the exact mirror image.
pub struct ChunkMergeIterator<L: ChunkLoader> {
    loader: Arc<L>,
    filter: ConnectionFilter,
    start: Option<Time>,
    end: Option<Time>,
    reverse: bool,
    heap: BinaryHeap<Reverse<Entry>>,
}

impl<L: ChunkLoader> ChunkMergeIterator<L> {
    /// Create a merge over `spans`, skipping chunks outside the request.
    pub fn new(
        loader: Arc<L>,
        spans: &[ChunkSpan],
        filter: ConnectionFilter,
        args: &MessageIteratorArgs,
    ) -> Self {
        let mut heap = BinaryHeap::with_capacity(spans.len());
        for span in spans.iter().filter(|s| s.is_relevant(args, &filter)) {
            let k = if args.reverse {
                key(true, span.end_time, span.ordinal, usize::MAX)
            } else {
                key(false, span.start_time, span.ordinal, 0)
            };
            heap.push(Reverse(Entry {
                key: k,
                body: EntryBody::Unloaded(span.clone()),
            }));
        }
        debug!(
            context = "ChunkMergeIterator",
            chunks = heap.len(),
            reverse = args.reverse,
            "Prepared chunk merge"
        );
        Self {
            loader,
            filter,
            start: args.start,
            end: args.end,
            reverse: args.reverse,
            heap,
        }
    }

    fn in_range(&self, time: Time) -> bool {
        self.start.map_or(true, |s| time >= s) && self.end.map_or(true, |e| time <= e)
    }

    fn push_loaded(&mut self, ordinal: usize, records: VecDeque<(usize, ChunkRecord)>) {
        let front = if self.reverse {
            records.back()
        } else {
            records.front()
        };
        if let Some((index, record)) = front {
            let k = key(self.reverse, record.log_time, ordinal, *index);
            self.heap.push(Reverse(Entry {
                key: k,
                body: EntryBody::Loaded { ordinal, records },
            }));
        }
    }

    fn load(&mut self, span: ChunkSpan) -> Option<IteratorResult> {
        match self.loader.load_chunk(span.ordinal) {
            Ok(records) => {
                let mut selected: Vec<(usize, ChunkRecord)> = records
                    .into_iter()
                    .enumerate()
                    .filter(|(_, r)| self.filter.allows(r.connection_id) && self.in_range(r.log_time))
                    .collect();
                // Stable: equal times keep on-disk order
                selected.sort_by_key(|(_, r)| r.log_time);
                self.push_loaded(span.ordinal, selected.into());
                None
            }
            Err(e) => {
                warn!(
                    context = "ChunkMergeIterator",
                    chunk = span.ordinal,
                    error = %e,
                    "Skipping unreadable chunk"
                );
                Some(IteratorResult::Alert {
                    connection_id: None,
                    alert: Alert::error(format!(
                        "Failed to read chunk {} ({} to {})",
                        span.ordinal, span.start_time, span.end_time
                    ))
                    .with_error(e)
                    .with_tip("Messages stored in this chunk are skipped"),
                })
            }
        }
    }
}

impl<L: ChunkLoader> Iterator for ChunkMergeIterator<L> {
    type Item = Result<IteratorResult>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Reverse(entry) = self.heap.pop()?;
            match entry.body {
                EntryBody::Unloaded(span) => {
                    if let Some(alert) = self.load(span) {
                        return Some(Ok(alert));
                    }
                }
                EntryBody::Loaded {
                    ordinal,
                    mut records,
                } => {
                    let next = if self.reverse {
                        records.pop_back()
                    } else {
                        records.pop_front()
                    };
                    self.push_loaded(ordinal, records);
                    if let Some((_, record)) = next {
                        return Some(Ok(self.loader.to_result(record)));
                    }
                }
            }
        }
    }
}

/// Index range of `records` (sorted by time) that lies within bounds.
pub fn time_range<T, F>(records: &[T], start: Option<Time>, end: Option<Time>, time: F) -> Range<usize>
where
    F: Fn(&T) -> Time,
{
    let lo = start.map_or(0, |s| records.partition_point(|r| time(r) < s));
    let hi = end.map_or(records.len(), |e| records.partition_point(|r| time(r) <= e));
    lo..hi.max(lo)
}

/// Iterator over a slice of a shared, time-sorted record vector.
pub struct SortedRecordIter<T> {
    records: Arc<Vec<T>>,
    front: usize,
    back: usize,
    reverse: bool,
}

impl<T> SortedRecordIter<T> {
    /// Iterate `range` of `records`, back to front when `reverse`.
    pub fn new(records: Arc<Vec<T>>, range: Range<usize>, reverse: bool) -> Self {
        Self {
            records,
            front: range.start,
            back: range.end,
            reverse,
        }
    }
}

impl<T: Clone> Iterator for SortedRecordIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.front >= self.back {
            return None;
        }
        let index = if self.reverse {
            self.back -= 1;
            self.back
        } else {
            self.front += 1;
            self.front - 1
        };
        self.records.get(index).cloned()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.back.saturating_sub(self.front);
        (n, Some(n))
    }
}
