//! Dual-stream round aggregation
//!
//! The pose and face detectors process the same submitted frame but finish
//! at arbitrary times and in either order. The aggregator pairs their issue
//! sets by frame timestamp and closes each round exactly once:
//!
//! ```text
//! open_round(t) ──► AwaitingBoth(t) ──contribute(A, t)──► Partial(t, A)
//!                                                            │
//!                                     contribute(B, t) ──────┴──► Complete: emit A ∪ B
//! ```
//!
//! Opening a newer round abandons an unfinished older one. Contributions
//! tagged with a timestamp older than the open round are stale and dropped.
//! A stream marked unavailable contributes the empty set implicitly, so the
//! remaining stream completes rounds on its own.
//!
//! The aggregator is a plain state machine; callers serialize access to it
//! (see [`crate::monitor::PostureMonitor`]).

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{FrameTimestamp, IssueSet, StreamKind};

/// Merged result of one completed round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRound {
    pub timestamp: FrameTimestamp,
    pub issues: IssueSet,
    /// True when a stream was unavailable and contributed implicitly
    pub degraded: bool,
}

/// Outcome of opening a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Round opened; carries the timestamp of an unfinished round it replaced
    Opened { abandoned: Option<FrameTimestamp> },
    /// Timestamp not newer than the latest opened round
    NotMonotonic,
    /// Neither stream is available
    NoStreams,
    /// Aggregator has been closed
    Closed,
}

/// Outcome of a stream contribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContributionOutcome {
    /// Stored; waiting for the other stream
    Pending,
    /// Both contributions present; the round is closed
    Completed(MergedRound),
    /// Older than the open round, or its round already closed
    Stale,
    /// No round was ever opened for this timestamp
    Unmatched,
    /// The contributing stream is marked unavailable
    StreamUnavailable,
    /// Aggregator has been closed
    Closed,
}

/// Phase of the open round, for inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundPhase {
    AwaitingBoth(FrameTimestamp),
    Partial {
        timestamp: FrameTimestamp,
        stream: StreamKind,
    },
}

/// Aggregation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorStats {
    pub rounds_opened: u64,
    pub rounds_completed: u64,
    pub rounds_abandoned: u64,
    pub stale_discarded: u64,
    pub unmatched_discarded: u64,
}

#[derive(Debug)]
struct OpenRound {
    timestamp: FrameTimestamp,
    pending: [Option<IssueSet>; 2],
}

impl OpenRound {
    fn new(timestamp: FrameTimestamp) -> Self {
        Self {
            timestamp,
            pending: [None, None],
        }
    }

    fn contributed(&self, stream: StreamKind) -> bool {
        self.pending[stream.index()].is_some()
    }
}

/// Round-keyed state machine pairing pose and face contributions
#[derive(Debug)]
pub struct RoundAggregator {
    open: Option<OpenRound>,
    latest_opened: Option<FrameTimestamp>,
    available: [bool; 2],
    closed: bool,
    stats: AggregatorStats,
}

impl Default for RoundAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundAggregator {
    pub fn new() -> Self {
        Self {
            open: None,
            latest_opened: None,
            available: [true, true],
            closed: false,
            stats: AggregatorStats::default(),
        }
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_available(&self, stream: StreamKind) -> bool {
        self.available[stream.index()]
    }

    /// Phase of the currently open round, if any
    pub fn phase(&self) -> Option<RoundPhase> {
        let round = self.open.as_ref()?;
        let reported: Vec<StreamKind> = StreamKind::ALL
            .into_iter()
            .filter(|s| round.contributed(*s))
            .collect();
        match reported.as_slice() {
            [stream] => Some(RoundPhase::Partial {
                timestamp: round.timestamp,
                stream: *stream,
            }),
            _ => Some(RoundPhase::AwaitingBoth(round.timestamp)),
        }
    }

    /// Open a round for a frame submitted to both detectors
    pub fn open_round(&mut self, timestamp: FrameTimestamp) -> OpenOutcome {
        if self.closed {
            return OpenOutcome::Closed;
        }
        if !self.available.iter().any(|a| *a) {
            return OpenOutcome::NoStreams;
        }
        if self.latest_opened.is_some_and(|latest| timestamp <= latest) {
            warn!(%timestamp, "frame timestamp is not newer than the open round");
            return OpenOutcome::NotMonotonic;
        }

        let abandoned = self.open.take().map(|round| {
            self.stats.rounds_abandoned += 1;
            debug!(superseded = %round.timestamp, %timestamp, "round abandoned by newer frame");
            round.timestamp
        });

        self.open = Some(OpenRound::new(timestamp));
        self.latest_opened = Some(timestamp);
        self.stats.rounds_opened += 1;
        OpenOutcome::Opened { abandoned }
    }

    /// Record one stream's issue set for the frame at `timestamp`
    pub fn contribute(
        &mut self,
        stream: StreamKind,
        timestamp: FrameTimestamp,
        issues: IssueSet,
    ) -> ContributionOutcome {
        if self.closed {
            return ContributionOutcome::Closed;
        }
        if !self.is_available(stream) {
            warn!(%stream, %timestamp, "contribution from unavailable stream ignored");
            return ContributionOutcome::StreamUnavailable;
        }

        let matches_open = self
            .open
            .as_ref()
            .is_some_and(|round| round.timestamp == timestamp);
        if !matches_open {
            return self.discard(stream, timestamp);
        }

        // A repeated contribution from the same stream replaces the earlier one.
        if let Some(round) = self.open.as_mut() {
            round.pending[stream.index()] = Some(issues);
        }
        self.try_complete()
            .map(ContributionOutcome::Completed)
            .unwrap_or(ContributionOutcome::Pending)
    }

    /// Mark a stream unavailable (detector setup failed or torn down).
    ///
    /// If the open round was only waiting on that stream it completes now.
    pub fn mark_unavailable(&mut self, stream: StreamKind) -> Option<MergedRound> {
        if !self.is_available(stream) {
            return None;
        }
        warn!(%stream, "stream unavailable, continuing in single-stream mode");
        self.available[stream.index()] = false;
        if self.closed {
            return None;
        }

        if let Some(round) = self.open.as_mut() {
            round.pending[stream.index()] = None;
        }
        if !self.available.iter().any(|a| *a) {
            if self.open.take().is_some() {
                self.stats.rounds_abandoned += 1;
            }
            return None;
        }
        self.try_complete()
    }

    /// Mark a stream available again
    pub fn mark_available(&mut self, stream: StreamKind) {
        self.available[stream.index()] = true;
    }

    /// Close the aggregator; every later call is fenced off
    pub fn close(&mut self) {
        if self.open.take().is_some() {
            self.stats.rounds_abandoned += 1;
        }
        self.closed = true;
    }

    /// Reset to a fresh session state with both streams available
    pub fn restart(&mut self) {
        *self = Self::new();
    }

    fn discard(&mut self, stream: StreamKind, timestamp: FrameTimestamp) -> ContributionOutcome {
        let is_stale = self.latest_opened.is_some_and(|latest| timestamp <= latest);
        if is_stale {
            self.stats.stale_discarded += 1;
            debug!(%stream, %timestamp, "stale contribution discarded");
            ContributionOutcome::Stale
        } else {
            self.stats.unmatched_discarded += 1;
            warn!(%stream, %timestamp, "contribution for a frame that was never submitted");
            ContributionOutcome::Unmatched
        }
    }

    fn try_complete(&mut self) -> Option<MergedRound> {
        let available = self.available;
        let round = self.open.as_ref()?;
        let ready = StreamKind::ALL
            .into_iter()
            .all(|s| !available[s.index()] || round.contributed(s));
        if !ready {
            return None;
        }

        let round = self.open.take()?;
        let issues = round
            .pending
            .iter()
            .flatten()
            .fold(IssueSet::new(), |merged, issues| merged.union(issues));
        self.stats.rounds_completed += 1;
        debug!(timestamp = %round.timestamp, issues = issues.len(), "round complete");

        Some(MergedRound {
            timestamp: round.timestamp,
            issues,
            degraded: available.iter().any(|a| !*a),
        })
    }
}
