//! Transition table and interpreter tests

use si446x_rs::radio::fsm::validate_table;
use si446x_rs::radio::{lookup, Action, Event, State, StateMachine, TRANSITIONS};
use si446x_rs::DriverError;

const TO_RX_IDLE: &[Event] = &[Event::TurnOn, Event::WaitDone, Event::WaitDone, Event::ConfigDone];

/// Event sequence from ShutDown to `state`; `None` for the catch-all state
fn path_to(state: State) -> Option<Vec<Event>> {
    let path = match state {
        State::ShutDown => vec![],
        State::PowerOnWait => vec![Event::TurnOn],
        State::PowerUpWait => vec![Event::TurnOn, Event::WaitDone],
        State::ConfigWait => vec![Event::TurnOn, Event::WaitDone, Event::WaitDone],
        State::Standby => vec![Event::Standby],
        State::RxIdle => TO_RX_IDLE.to_vec(),
        State::RxActive => [TO_RX_IDLE, &[Event::SyncDetect][..]].concat(),
        State::TxActive => [TO_RX_IDLE, &[Event::Transmit][..]].concat(),
        State::Default => return None,
    };
    Some(path)
}

fn machine_in(state: State) -> Option<StateMachine> {
    let mut fsm = StateMachine::new();
    for event in path_to(state)? {
        fsm.receive(event, |_, _| {}).unwrap();
    }
    assert_eq!(fsm.state(), state);
    Some(fsm)
}

#[test]
fn test_power_up_sequence_reaches_rx_idle() {
    let mut fsm = StateMachine::new();
    let mut actions = Vec::new();
    for &event in TO_RX_IDLE {
        fsm.receive(event, |action, _| actions.push(action)).unwrap();
    }
    assert_eq!(fsm.state(), State::RxIdle);
    assert_eq!(
        actions,
        vec![Action::Unshut, Action::PwrUp, Action::Config, Action::Ready]
    );
}

#[test]
fn test_every_undefined_pair_is_fatal() {
    let mut checked = 0;
    for state in State::ALL {
        for event in Event::ALL {
            if lookup(state, event).is_some() {
                continue;
            }
            let Some(mut fsm) = machine_in(state) else {
                continue;
            };
            let mut ran = false;
            let err = fsm.receive(event, |_, _| ran = true).unwrap_err();
            assert!(
                matches!(err, DriverError::FatalTransition { state: s, event: e } if s == state && e == event),
                "({state:?}, {event:?}) gave {err:?}"
            );
            assert!(!ran, "actions ran for undefined ({state:?}, {event:?})");
            assert_eq!(fsm.state(), state);
            checked += 1;
        }
    }
    // 8 reachable states x 15 events, less the 27 rows leaving them
    assert_eq!(checked, 8 * 15 - 27);
}

#[test]
fn test_table_shape() {
    assert_eq!(TRANSITIONS.len(), 28);
    assert_eq!(validate_table(&TRANSITIONS, State::ShutDown), Ok(()));
    for row in TRANSITIONS.iter() {
        assert_eq!(row.actions.len(), 1);
        assert_eq!(lookup(row.from, row.event), Some(row));
    }
}

#[test]
fn test_control_events_only_where_listed() {
    assert!(lookup(State::RxIdle, Event::TurnOn).is_none());
    assert!(lookup(State::ShutDown, Event::TurnOff).is_none());
    assert!(lookup(State::Standby, Event::Standby).is_none());
    assert!(lookup(State::RxActive, Event::Transmit).is_none());
    assert_eq!(
        lookup(State::ShutDown, Event::Standby).map(|t| t.to),
        Some(State::Standby)
    );
}

#[test]
fn test_timeouts_return_to_rx_idle() {
    for state in [State::RxActive, State::TxActive] {
        let mut fsm = machine_in(state).unwrap();
        fsm.receive(Event::WaitDone, |_, _| {}).unwrap();
        assert_eq!(fsm.state(), State::RxIdle);
    }
}

#[test]
fn test_status_labels() {
    assert_eq!(State::ShutDown.status_label(), "OFF");
    assert_eq!(State::Standby.status_label(), "STANDBY");
    for state in [State::PowerOnWait, State::RxIdle, State::RxActive, State::TxActive] {
        assert_eq!(state.status_label(), "ON");
    }
}
