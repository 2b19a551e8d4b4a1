// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Multi-source combinator.
//!
//! Presents several homogeneous sources (e.g. a recording split into
//! consecutive files) as one. Children are initialized in parallel and
//! their iterators merged by receive time with a single look-ahead slot per
//! child.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::core::{PlaybackError, Result, Time};

use super::metadata::{Alert, Initialization, IteratorResult, MessageEvent};
use super::traits::{
    finish_iterator, GetBackfillMessagesArgs, IterableSource, MessageIterator, MessageIteratorArgs,
};

/// Combines an ordered list of sources into one.
pub struct MultiIterableSource {
    children: Vec<Box<dyn IterableSource>>,
    names: Vec<String>,
}

impl MultiIterableSource {
    /// Create a combinator over `children`, in tie-breaking order.
    pub fn new(children: Vec<Box<dyn IterableSource>>) -> Self {
        let names = (0..children.len()).map(|i| format!("source {i}")).collect();
        Self { children, names }
    }

    /// Number of children still taking part.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether no child is taking part.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Fold child initializations into one.
fn merge_initializations(inits: &[Initialization]) -> Initialization {
    let name = inits
        .iter()
        .map(|i| i.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let mut merged = Initialization::new(name);

    let start = inits.iter().map(|i| i.start).min();
    let end = inits.iter().map(|i| i.end).max();

    for init in inits {
        for topic in &init.topics {
            if !merged.add_topic(topic.clone()) {
                merged.alerts.push(Alert::warn(format!(
                    "Topic {} has different schemas across sources ({} in {})",
                    topic.name, topic.schema_name, init.name
                )));
            }
        }
        for (topic, stats) in &init.topic_stats {
            merged
                .topic_stats
                .entry(topic.clone())
                .or_default()
                .merge(stats);
        }
        for (name, schema) in &init.datatypes {
            merged
                .datatypes
                .entry(name.clone())
                .or_insert_with(|| schema.clone());
        }
        for (key, value) in &init.metadata {
            merged
                .metadata
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        if merged.profile.is_none() {
            merged.profile = init.profile.clone();
        }
        merged.alerts.extend(init.alerts.iter().cloned());
    }

    merged.start = start.unwrap_or(0);
    merged.end = end.unwrap_or(merged.start);
    merged.topics.sort();
    merged
}

impl IterableSource for MultiIterableSource {
    fn initialize(&mut self) -> Result<Initialization> {
        if self.children.is_empty() {
            return Err(PlaybackError::initialization(
                "multiple sources",
                "No sources to combine",
            ));
        }

        let results: Vec<Result<Initialization>> = self
            .children
            .par_iter_mut()
            .map(|child| child.initialize())
            .collect();

        let mut kept = Vec::new();
        let mut names = Vec::new();
        let mut inits = Vec::new();
        let mut failures = Vec::new();
        for (mut child, result) in std::mem::take(&mut self.children).into_iter().zip(results) {
            match result {
                Ok(init) => {
                    names.push(init.name.clone());
                    inits.push(init);
                    kept.push(child);
                }
                Err(e) => {
                    warn!(
                        context = "MultiIterableSource",
                        error = %e,
                        "Excluding source that failed to initialize"
                    );
                    let _ = child.terminate();
                    failures.push(e);
                }
            }
        }

        if kept.is_empty() {
            let message = failures
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PlaybackError::initialization("multiple sources", message));
        }

        self.children = kept;
        self.names = names;

        let mut merged = merge_initializations(&inits);
        for e in failures {
            merged.alerts.push(
                Alert::error("A source failed to initialize and was excluded").with_error(e),
            );
        }

        debug!(
            context = "MultiIterableSource",
            sources = self.children.len(),
            start = merged.start,
            end = merged.end,
            topics = merged.topics.len(),
            "Initialized combined source"
        );
        Ok(merged)
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> Result<Box<dyn MessageIterator>> {
        let mut children = Vec::with_capacity(self.children.len());
        for (child, name) in self.children.iter().zip(&self.names) {
            children.push(ChildCursor {
                name: name.clone(),
                iter: Some(child.message_iterator(args.clone())?),
                slot: None,
                last_time: None,
            });
        }
        let merge = MergeIterator {
            children,
            reverse: args.reverse,
            failed: false,
        };
        Ok(finish_iterator(merge, &args))
    }

    fn get_backfill_messages(&self, args: GetBackfillMessagesArgs) -> Result<Vec<MessageEvent>> {
        let mut latest: HashMap<String, MessageEvent> = HashMap::new();
        for child in &self.children {
            for msg in child.get_backfill_messages(args.clone())? {
                match latest.get(&msg.topic) {
                    // Later children win ties
                    Some(existing) if existing.receive_time > msg.receive_time => {}
                    _ => {
                        latest.insert(msg.topic.clone(), msg);
                    }
                }
            }
        }

        let mut messages: Vec<MessageEvent> = latest.into_values().collect();
        messages.sort_by(|a, b| {
            a.receive_time
                .cmp(&b.receive_time)
                .then_with(|| a.topic.cmp(&b.topic))
        });
        Ok(messages)
    }

    fn terminate(&mut self) -> Result<()> {
        let mut first_error = None;
        for child in &mut self.children {
            if let Err(e) = child.terminate() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

struct ChildCursor {
    name: String,
    iter: Option<Box<dyn MessageIterator>>,
    /// Look-ahead: the child's next message, not yet emitted
    slot: Option<MessageEvent>,
    last_time: Option<Time>,
}

/// K-way merge holding exactly one look-ahead message per child.
struct MergeIterator {
    children: Vec<ChildCursor>,
    reverse: bool,
    failed: bool,
}

impl MergeIterator {
    /// Fill empty slots. Returns an alert to pass through, if one was read.
    fn fill(&mut self) -> Result<Option<IteratorResult>> {
        let reverse = self.reverse;
        for child in &mut self.children {
            if child.slot.is_some() {
                continue;
            }
            while let Some(iter) = child.iter.as_mut() {
                match iter.next() {
                    None => child.iter = None,
                    Some(Err(e)) => {
                        return Err(PlaybackError::iteration(format!(
                            "{} failed: {e}",
                            child.name
                        )))
                    }
                    Some(Ok(IteratorResult::Stamp(_))) => {}
                    Some(Ok(alert @ IteratorResult::Alert { .. })) => return Ok(Some(alert)),
                    Some(Ok(IteratorResult::MessageEvent(ev))) => {
                        let t = ev.receive_time;
                        let out_of_order = child
                            .last_time
                            .is_some_and(|last| if reverse { t > last } else { t < last });
                        if out_of_order {
                            return Err(PlaybackError::iteration(format!(
                                "{} produced messages out of order ({t} after {})",
                                child.name,
                                child.last_time.unwrap_or_default()
                            )));
                        }
                        child.last_time = Some(t);
                        child.slot = Some(ev);
                        break;
                    }
                }
            }
        }
        Ok(None)
    }

    fn pick(&self) -> Option<usize> {
        let mut best: Option<(usize, Time)> = None;
        for (i, child) in self.children.iter().enumerate() {
            let Some(ev) = &child.slot else { continue };
            let t = ev.receive_time;
            let better = match best {
                None => true,
                // Forward: strict, so earlier children win ties.
                // Reverse: non-strict, so later children win ties.
                Some((_, bt)) if self.reverse => t >= bt,
                Some((_, bt)) => t < bt,
            };
            if better {
                best = Some((i, t));
            }
        }
        best.map(|(i, _)| i)
    }
}

impl Iterator for MergeIterator {
    type Item = Result<IteratorResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.fill() {
            Ok(Some(alert)) => return Some(Ok(alert)),
            Ok(None) => {}
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        }
        let index = self.pick()?;
        self.children[index]
            .slot
            .take()
            .map(|ev| Ok(IteratorResult::MessageEvent(ev)))
    }
}
