//! # Driver State Machine
//!
//! The Si446x driver is a table-driven finite state machine. Each entry of
//! [`TRANSITIONS`] maps a `(State, Event)` pair to an ordered list of
//! [`Action`]s and the state committed once those actions have run.
//!
//! ```text
//!  ShutDown --TurnOn--> PowerOnWait --WaitDone--> PowerUpWait --WaitDone--> ConfigWait
//!                                                                              |
//!                                                                         ConfigDone
//!                                                                              v
//!  Standby <--Standby-- RxIdle <--PacketRx/CrcError/WaitDone-- RxActive <--SyncDetect-- RxIdle
//!                          |                                                     ^
//!                       Transmit --> TxActive --PacketSent/WaitDone--------------+
//! ```
//!
//! The interpreter does not know what an action does; the caller supplies a
//! closure that performs each action in order. Any pair missing from the
//! table is a [`DriverError::FatalTransition`].

use crate::error::DriverError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

/// Driver states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Chip held in shutdown (SDN asserted)
    ShutDown,
    /// Waiting for the chip to come out of shutdown
    PowerOnWait,
    /// Waiting for POWER_UP to complete
    PowerUpWait,
    /// Configuration streamed, waiting for the completion event
    ConfigWait,
    /// Configured, chip sleeping
    Standby,
    /// Receiver armed, nothing in flight
    RxIdle,
    /// Sync word seen, packet being drained
    RxActive,
    /// Packet being streamed out
    TxActive,
    /// Catch-all kept for table completeness checks; never entered
    Default,
}

impl State {
    pub const ALL: [State; 9] = [
        State::ShutDown,
        State::PowerOnWait,
        State::PowerUpWait,
        State::ConfigWait,
        State::Standby,
        State::RxIdle,
        State::RxActive,
        State::TxActive,
        State::Default,
    ];

    /// Coarse status label published to observers
    pub fn status_label(self) -> &'static str {
        match self {
            State::ShutDown => "OFF",
            State::Standby => "STANDBY",
            _ => "ON",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Stimuli accepted by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    TurnOn,
    TurnOff,
    Standby,
    Transmit,
    ConfigDone,
    WaitDone,
    SyncDetect,
    PreambleDetect,
    InvalidSync,
    CrcError,
    PacketRx,
    PacketSent,
    RxThresh,
    TxThresh,
    Nop,
}

impl Event {
    pub const ALL: [Event; 15] = [
        Event::TurnOn,
        Event::TurnOff,
        Event::Standby,
        Event::Transmit,
        Event::ConfigDone,
        Event::WaitDone,
        Event::SyncDetect,
        Event::PreambleDetect,
        Event::InvalidSync,
        Event::CrcError,
        Event::PacketRx,
        Event::PacketSent,
        Event::RxThresh,
        Event::TxThresh,
        Event::Nop,
    ];
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Action handler identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Unshut,
    Config,
    Ready,
    PwrUp,
    PwrDn,
    RxStart,
    RxDrainFifo,
    RxComplete,
    RxCrcCount,
    RxTimeout,
    TxStart,
    TxFillFifo,
    TxComplete,
    TxTimeout,
    ClearSync,
    GotoStandby,
    Nop,
}

/// One row of the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: State,
    pub event: Event,
    pub actions: &'static [Action],
    pub to: State,
}

const fn t(from: State, event: Event, actions: &'static [Action], to: State) -> Transition {
    Transition {
        from,
        event,
        actions,
        to,
    }
}

/// The complete transition table
pub static TRANSITIONS: [Transition; 28] = [
    t(State::TxActive, Event::TxThresh, &[Action::TxFillFifo], State::TxActive),
    t(State::RxIdle, Event::InvalidSync, &[Action::ClearSync], State::RxIdle),
    t(State::RxActive, Event::InvalidSync, &[Action::ClearSync], State::RxActive),
    t(State::RxActive, Event::PacketRx, &[Action::RxComplete], State::RxIdle),
    t(State::ShutDown, Event::TurnOn, &[Action::Unshut], State::PowerOnWait),
    t(State::ShutDown, Event::Nop, &[Action::Nop], State::ShutDown),
    t(State::Standby, Event::TurnOn, &[Action::Ready], State::RxIdle),
    t(State::TxActive, Event::PacketSent, &[Action::TxComplete], State::RxIdle),
    t(State::RxIdle, Event::Transmit, &[Action::TxStart], State::TxActive),
    t(State::ConfigWait, Event::ConfigDone, &[Action::Ready], State::RxIdle),
    t(State::RxActive, Event::RxThresh, &[Action::RxDrainFifo], State::RxActive),
    t(State::ShutDown, Event::Standby, &[Action::Config], State::Standby),
    t(State::RxIdle, Event::Standby, &[Action::GotoStandby], State::Standby),
    t(State::RxActive, Event::Standby, &[Action::GotoStandby], State::Standby),
    t(State::TxActive, Event::Standby, &[Action::GotoStandby], State::Standby),
    t(State::PowerOnWait, Event::WaitDone, &[Action::PwrUp], State::PowerUpWait),
    t(State::RxActive, Event::WaitDone, &[Action::RxTimeout], State::RxIdle),
    t(State::TxActive, Event::WaitDone, &[Action::TxTimeout], State::RxIdle),
    t(State::PowerUpWait, Event::WaitDone, &[Action::Config], State::ConfigWait),
    t(State::Default, Event::Nop, &[Action::Nop], State::Default),
    t(State::RxActive, Event::CrcError, &[Action::RxCrcCount], State::RxIdle),
    t(State::RxIdle, Event::PreambleDetect, &[Action::Nop], State::RxIdle),
    t(State::RxActive, Event::PreambleDetect, &[Action::Nop], State::RxActive),
    t(State::RxIdle, Event::SyncDetect, &[Action::RxStart], State::RxActive),
    t(State::RxIdle, Event::TurnOff, &[Action::PwrDn], State::ShutDown),
    t(State::RxActive, Event::TurnOff, &[Action::PwrDn], State::ShutDown),
    t(State::TxActive, Event::TurnOff, &[Action::PwrDn], State::ShutDown),
    t(State::Standby, Event::TurnOff, &[Action::PwrDn], State::ShutDown),
];

/// Problems found while validating a transition table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("duplicate transition for ({0:?}, {1:?})")]
    Duplicate(State, Event),

    #[error("state {0:?} is reachable but has no outgoing transition")]
    DeadEnd(State),

    #[error("state {0:?} is not reachable from {1:?}")]
    Unreachable(State, State),
}

/// Check a table for duplicate keys and for completeness over the states
/// reachable from `initial`. `Default` is exempt from reachability.
pub fn validate_table(table: &[Transition], initial: State) -> Result<(), TableError> {
    let mut seen = HashSet::new();
    for row in table {
        if !seen.insert((row.from, row.event)) {
            return Err(TableError::Duplicate(row.from, row.event));
        }
    }

    let mut reached = HashSet::from([initial]);
    let mut queue = VecDeque::from([initial]);
    while let Some(state) = queue.pop_front() {
        let mut outgoing = false;
        for row in table.iter().filter(|row| row.from == state) {
            outgoing = true;
            if reached.insert(row.to) {
                queue.push_back(row.to);
            }
        }
        if !outgoing {
            return Err(TableError::DeadEnd(state));
        }
    }

    for state in State::ALL {
        if state != State::Default && !reached.contains(&state) {
            return Err(TableError::Unreachable(state, initial));
        }
    }
    Ok(())
}

static INDEX: Lazy<HashMap<(State, Event), &'static Transition>> = Lazy::new(|| {
    TRANSITIONS
        .iter()
        .map(|row| ((row.from, row.event), row))
        .collect()
});

/// Look up the transition for a pair; `None` means the pair is undefined.
pub fn lookup(state: State, event: Event) -> Option<&'static Transition> {
    INDEX.get(&(state, event)).copied()
}

/// The state machine interpreter
#[derive(Debug)]
pub struct StateMachine {
    state: State,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a machine in `ShutDown`, validating the static table once.
    pub fn new() -> Self {
        if let Err(e) = validate_table(&TRANSITIONS, State::ShutDown) {
            // The table is static data; a failure here is a build defect.
            log::error!("transition table invalid: {e}");
        }
        Self {
            state: State::ShutDown,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Force the machine back to `ShutDown` without running any action.
    /// Only for a teardown that has already powered the chip off.
    pub fn reset(&mut self) {
        log::debug!("fsm {:?} reset to ShutDown", self.state);
        self.state = State::ShutDown;
    }

    /// Whether `event` is accepted in the current state
    pub fn accepts(&self, event: Event) -> bool {
        lookup(self.state, event).is_some()
    }

    /// Run the transition for `event`: every action in order through
    /// `perform`, then commit the target state.
    pub fn receive<F>(&mut self, event: Event, mut perform: F) -> Result<&'static Transition, DriverError>
    where
        F: FnMut(Action, Event),
    {
        let transition = lookup(self.state, event).ok_or(DriverError::FatalTransition {
            state: self.state,
            event,
        })?;

        for &action in transition.actions {
            perform(action, event);
        }

        log::debug!("fsm {:?} --{:?}--> {:?}", self.state, event, transition.to);
        self.state = transition.to;
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_valid() {
        assert_eq!(validate_table(&TRANSITIONS, State::ShutDown), Ok(()));
        assert_eq!(TRANSITIONS.len(), 28);
    }

    #[test]
    fn test_duplicate_detected() {
        let table = [
            t(State::ShutDown, Event::Nop, &[Action::Nop], State::ShutDown),
            t(State::ShutDown, Event::Nop, &[Action::Nop], State::ShutDown),
        ];
        assert_eq!(
            validate_table(&table, State::ShutDown),
            Err(TableError::Duplicate(State::ShutDown, Event::Nop))
        );
    }

    #[test]
    fn test_dead_end_detected() {
        let table = [t(State::ShutDown, Event::TurnOn, &[Action::Unshut], State::PowerOnWait)];
        assert_eq!(
            validate_table(&table, State::ShutDown),
            Err(TableError::DeadEnd(State::PowerOnWait))
        );
    }

    #[test]
    fn test_receive_runs_actions_then_commits() {
        let mut fsm = StateMachine::new();
        let mut seen = Vec::new();
        let row = fsm
            .receive(Event::TurnOn, |action, event| seen.push((action, event)))
            .unwrap();
        assert_eq!(row.to, State::PowerOnWait);
        assert_eq!(fsm.state(), State::PowerOnWait);
        assert_eq!(seen, vec![(Action::Unshut, Event::TurnOn)]);
    }

    #[test]
    fn test_reset_returns_to_shutdown() {
        let mut fsm = StateMachine::new();
        fsm.receive(Event::TurnOn, |_, _| {}).unwrap();
        fsm.reset();
        assert_eq!(fsm.state(), State::ShutDown);
        assert!(fsm.accepts(Event::TurnOn));
    }

    #[test]
    fn test_undefined_pair_is_fatal_and_keeps_state() {
        let mut fsm = StateMachine::new();
        let mut ran = false;
        let err = fsm.receive(Event::PacketRx, |_, _| ran = true).unwrap_err();
        assert!(err.is_fatal());
        assert!(!ran);
        assert_eq!(fsm.state(), State::ShutDown);
    }

    #[test]
    fn test_default_state_never_targeted() {
        assert!(TRANSITIONS
            .iter()
            .all(|row| row.to != State::Default || row.from == State::Default));
    }
}
