//! Shared rig for driver integration tests: a driver over the simulated
//! chip with a hand-driven scheduler.

#![allow(dead_code)]

use si446x_rs::radio::dispatch::InterruptReport;
use si446x_rs::radio::{
    Driver, Event, ManualScheduler, MockTransport, ModemPend, Notification, PhPend, RadioConfig,
    State, TraceKind,
};

pub type TestDriver = Driver<MockTransport, ManualScheduler>;

pub struct Rig {
    pub driver: TestDriver,
    pub chip: MockTransport,
    pub sched: ManualScheduler,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(&RadioConfig::default())
    }

    pub fn with_config(config: &RadioConfig) -> Self {
        let chip = MockTransport::new();
        let sched = ManualScheduler::new();
        let driver = Driver::new(chip.clone(), sched.clone(), config).expect("valid config");
        Self {
            driver,
            chip,
            sched,
        }
    }

    /// Powered up and receiving, notifications drained
    pub fn powered() -> Self {
        let mut rig = Self::new();
        rig.driver.control("TURNON").unwrap();
        rig.settle();
        assert_eq!(rig.driver.state(), State::RxIdle);
        rig.driver.take_notifications();
        rig
    }

    /// Deliver deferred events and timers until none are left
    pub fn settle(&mut self) {
        while let Some(event) = self.sched.next_event() {
            self.driver.on_scheduler_event(event).unwrap();
        }
    }

    /// Fire the armed timer, if any
    pub fn fire_timer(&mut self) {
        if let Some(id) = self.sched.fire() {
            self.driver.on_timer(id).unwrap();
        }
    }

    pub fn ph(&mut self, flags: PhPend) -> InterruptReport {
        self.chip.chip().raise_ph(flags);
        self.driver.on_interrupt().unwrap()
    }

    pub fn modem(&mut self, flags: ModemPend) -> InterruptReport {
        self.chip.chip().raise_modem(flags);
        self.driver.on_interrupt().unwrap()
    }

    pub fn notifications(&mut self) -> Vec<Notification> {
        self.driver.take_notifications()
    }

    pub fn count_trace(&self, pred: impl Fn(&TraceKind) -> bool) -> usize {
        self.driver.trace().count(pred)
    }

    /// Events in dispatch order, from the trace
    pub fn dispatched(&self) -> Vec<Event> {
        self.driver
            .trace()
            .iter()
            .filter_map(|r| match r.kind {
                TraceKind::Transition { event, .. } => Some(event),
                _ => None,
            })
            .collect()
    }
}
