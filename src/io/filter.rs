// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Topic and connection filtering for message iterators.
//!
//! A [`TopicFilter`] expresses the subscription of a player or CLI run;
//! [`ConnectionFilter`] resolves it once against a source's connection
//! table so that chunk loaders can drop records by id without string
//! comparisons.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Filter for selecting topics during iteration.
#[derive(Clone, Default)]
pub enum TopicFilter {
    /// Read all topics (no filtering)
    #[default]
    All,
    /// Read only specific topics; an empty list selects nothing
    Include(Vec<String>),
    /// Exclude specific topics
    Exclude(Vec<String>),
    /// Include topics matching regex pattern
    RegexInclude(Arc<regex::Regex>),
    /// Custom filter function
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl fmt::Debug for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.debug_tuple("All").finish(),
            Self::Include(v) => f.debug_tuple("Include").field(v).finish(),
            Self::Exclude(v) => f.debug_tuple("Exclude").field(v).finish(),
            Self::RegexInclude(re) => f.debug_tuple("RegexInclude").field(&re.as_str()).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl TopicFilter {
    /// Check if a topic should be included.
    pub fn should_include(&self, topic: &str) -> bool {
        match self {
            TopicFilter::All => true,
            TopicFilter::Include(topics) => topics.iter().any(|t| t == topic),
            TopicFilter::Exclude(topics) => !topics.iter().any(|t| t == topic),
            TopicFilter::RegexInclude(re) => re.is_match(topic),
            TopicFilter::Custom(f) => f(topic),
        }
    }

    /// Create an include filter from topic names.
    pub fn include<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Include(topics.into_iter().map(Into::into).collect())
    }

    /// Create an exclude filter from topic names.
    pub fn exclude<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exclude(topics.into_iter().map(Into::into).collect())
    }

    /// Create a regex include filter.
    pub fn regex_include(pattern: &str) -> Result<Self, regex::Error> {
        regex::Regex::new(pattern).map(|re| Self::RegexInclude(Arc::new(re)))
    }

    /// Create a custom filter from a function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Whether the filter can never select a topic.
    pub fn is_empty(&self) -> bool {
        matches!(self, TopicFilter::Include(topics) if topics.is_empty())
    }

    /// Explicit topic list, when the filter is a plain include list.
    pub fn topics(&self) -> Option<&[String]> {
        match self {
            TopicFilter::Include(topics) => Some(topics),
            _ => None,
        }
    }
}

/// Connection filter mapping topic names to connection IDs.
#[derive(Debug, Clone, Default)]
pub struct ConnectionFilter {
    allowed: HashSet<u32>,
    topic_to_connections: HashMap<String, Vec<u32>>,
}

impl ConnectionFilter {
    /// Resolve a topic filter against `(connection id, topic)` pairs.
    pub fn from_topic_filter<'a, I>(filter: &TopicFilter, connections: I) -> Self
    where
        I: IntoIterator<Item = (u32, &'a str)>,
    {
        let mut result = Self::default();
        for (id, topic) in connections {
            if filter.should_include(topic) {
                result.allowed.insert(id);
                result
                    .topic_to_connections
                    .entry(topic.to_string())
                    .or_default()
                    .push(id);
            }
        }
        result
    }

    /// Check if a connection ID is allowed.
    pub fn allows(&self, connection_id: u32) -> bool {
        self.allowed.contains(&connection_id)
    }

    /// Get the number of allowed connections.
    pub fn connection_count(&self) -> usize {
        self.allowed.len()
    }

    /// Get all connection IDs for a topic.
    pub fn connections_for_topic(&self, topic: &str) -> &[u32] {
        self.topic_to_connections
            .get(topic)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}
