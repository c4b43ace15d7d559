//! # Driver Trace
//!
//! Bounded in-memory history of what the driver saw and did. Every dispatch
//! appends a [`TraceKind::Transition`] record carrying the event, the state
//! it was dispatched in and the fast-register snapshot taken just before.
//! Interrupt batches, anomalies, control requests and a fatal transition,
//! should one occur, are recorded alongside.
//! Once full, the oldest record is overwritten.

use crate::error::Anomaly;
use crate::radio::fsm::{Event, State};
use crate::radio::irq::{FastRegisters, PendingFlags};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceKind {
    Transition {
        event: Event,
        state: State,
        frr: FastRegisters,
    },
    Interrupt {
        pending: PendingFlags,
    },
    Anomaly {
        anomaly: Anomaly,
    },
    Control {
        request: String,
        outcome: String,
    },
    /// The dispatch that stopped the driver
    Fatal {
        event: Event,
        state: State,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TraceKind,
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.at.format("%H:%M:%S%.3f"))?;
        match &self.kind {
            TraceKind::Transition { event, state, frr } => {
                write!(
                    f,
                    "{:<14} in {:<12} frr={}",
                    event.to_string(),
                    state.to_string(),
                    frr
                )
            }
            TraceKind::Interrupt { pending } => write!(f, "interrupt {}", pending),
            TraceKind::Anomaly { anomaly } => write!(f, "anomaly {}", anomaly),
            TraceKind::Control { request, outcome } => {
                write!(f, "control {} -> {}", request, outcome)
            }
            TraceKind::Fatal { event, state } => {
                write!(f, "FATAL {} undefined in {}", event, state)
            }
        }
    }
}

/// Ring buffer of trace records
#[derive(Debug)]
pub struct Trace {
    records: VecDeque<TraceRecord>,
    depth: usize,
}

impl Trace {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            records: VecDeque::with_capacity(depth.min(4096)),
            depth,
        }
    }

    pub fn add(&mut self, kind: TraceKind) {
        if self.records.len() == self.depth {
            self.records.pop_front();
        }
        self.records.push_back(TraceRecord {
            at: Utc::now(),
            kind,
        });
    }

    /// The newest `n` records, oldest first
    pub fn recent(&self, n: usize) -> Vec<TraceRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraceRecord> {
        self.records.iter()
    }

    /// Records of one kind, by predicate
    pub fn count(&self, pred: impl Fn(&TraceKind) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.kind)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(n: usize) -> TraceKind {
        TraceKind::Control {
            request: format!("r{n}"),
            outcome: "ok".to_string(),
        }
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let mut trace = Trace::new(3);
        for n in 0..5 {
            trace.add(control(n));
        }
        assert_eq!(trace.len(), 3);
        let recent = trace.recent(10);
        assert_eq!(recent[0].kind, control(2));
        assert_eq!(recent[2].kind, control(4));
    }

    #[test]
    fn test_recent_returns_newest_oldest_first() {
        let mut trace = Trace::new(10);
        for n in 0..4 {
            trace.add(control(n));
        }
        let recent = trace.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, control(2));
        assert_eq!(recent[1].kind, control(3));
    }

    #[test]
    fn test_record_serializes_flat() {
        let mut trace = Trace::new(2);
        trace.add(TraceKind::Anomaly {
            anomaly: Anomaly::CrcMismatch,
        });
        let json = serde_json::to_value(&trace.recent(1)[0]).unwrap();
        assert_eq!(json["kind"], "anomaly");
        assert!(json["at"].is_string());
    }
}
