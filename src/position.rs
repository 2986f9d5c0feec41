// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Log Positions
//!
//! Two orderings exist side by side:
//! - [`StreamPosition`] orders events inside one stream (0-based version)
//! - [`GlobalPosition`] orders events across every stream of the log
//!
//! A subscription reads exactly one of them, chosen by its [`LogTarget`].
//! [`LogPosition`] is the value the subscription machinery compares; it adds
//! an `End` sentinel that sorts after every concrete position.

use core::cmp::Ordering;
use core::fmt;
use serde::{Deserialize, Serialize};

use crate::event::StoredEventRecord;

/// Position of an event inside its own stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamPosition(pub u64);

/// Position of an event in the global (all streams) log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalPosition(pub u64);

impl StreamPosition {
    pub const START: StreamPosition = StreamPosition(0);

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> StreamPosition {
        StreamPosition(self.0 + 1)
    }
}

impl GlobalPosition {
    pub const START: GlobalPosition = GlobalPosition(0);

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> GlobalPosition {
        GlobalPosition(self.0 + 1)
    }
}

impl fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GlobalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A comparable position in whichever log a subscription reads.
///
/// `End` always compares greatest, so "nothing is newer than End" holds for
/// every comparison the supervisor performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogPosition {
    At(u64),
    End,
}

impl Ord for LogPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (LogPosition::At(a), LogPosition::At(b)) => a.cmp(b),
            (LogPosition::At(_), LogPosition::End) => Ordering::Less,
            (LogPosition::End, LogPosition::At(_)) => Ordering::Greater,
            (LogPosition::End, LogPosition::End) => Ordering::Equal,
        }
    }
}

impl PartialOrd for LogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl LogPosition {
    pub fn is_end(&self) -> bool {
        matches!(self, LogPosition::End)
    }

    /// Concrete value, `None` for the sentinel.
    pub fn value(&self) -> Option<u64> {
        match self {
            LogPosition::At(v) => Some(*v),
            LogPosition::End => None,
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogPosition::At(v) => write!(f, "{}", v),
            LogPosition::End => write!(f, "end"),
        }
    }
}

/// Which underlying log a subscription reads.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogTarget {
    /// The global log; positions are [`GlobalPosition`]s.
    All,
    /// A single stream; positions are [`StreamPosition`]s.
    Stream(String),
}

impl LogTarget {
    /// Position of `record` in this target's ordering.
    pub fn position_of(&self, record: &StoredEventRecord) -> LogPosition {
        match self {
            LogTarget::All => LogPosition::At(record.global_position.0),
            LogTarget::Stream(_) => LogPosition::At(record.stream_position.0),
        }
    }

    /// Whether `record` belongs to this target.
    pub fn contains(&self, record: &StoredEventRecord) -> bool {
        match self {
            LogTarget::All => true,
            LogTarget::Stream(name) => record.stream == *name,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            LogTarget::All => "$all",
            LogTarget::Stream(name) => name,
        }
    }
}

impl Default for LogTarget {
    fn default() -> Self {
        LogTarget::All
    }
}

/// Where a new subscription begins when no checkpoint exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StartFrom {
    /// Replay from the first event, inclusive.
    #[default]
    Start,
    /// Skip history, deliver only events appended after subscribing.
    End,
    /// Resume strictly after the given position.
    After(u64),
}

impl StartFrom {
    /// The exclusive lower bound handed to the log source.
    pub fn exclusive_bound(self) -> Option<LogPosition> {
        match self {
            StartFrom::Start => None,
            StartFrom::End => Some(LogPosition::End),
            StartFrom::After(p) => Some(LogPosition::At(p)),
        }
    }
}

/// Bookmark handed to hosts for external checkpointing.
///
/// Derived from the last successfully handled record; both orderings are
/// kept so one bookmark can resume either kind of target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionPosition {
    pub stream: StreamPosition,
    pub global: GlobalPosition,
}

impl SubscriptionPosition {
    pub fn of(record: &StoredEventRecord) -> Self {
        Self {
            stream: record.stream_position,
            global: record.global_position,
        }
    }

    pub fn for_target(&self, target: &LogTarget) -> LogPosition {
        match target {
            LogTarget::All => LogPosition::At(self.global.0),
            LogTarget::Stream(_) => LogPosition::At(self.stream.0),
        }
    }
}

impl fmt::Display for SubscriptionPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream={} global={}", self.stream, self.global)
    }
}
