//! # Driver Service
//!
//! Runs a [`Driver`] on one tokio task. Callers talk to it through a
//! cloneable [`DriverHandle`]; replies come back on oneshot channels. Timer
//! firings arrive from the [`TokioScheduler`] on a second channel and are
//! multiplexed onto the same task, so the driver only ever sees one
//! stimulus at a time.
//!
//! The chip's NIRQ edge arrives on whatever thread the GPIO layer uses.
//! [`InterruptLine::raise`] only posts a message; repeated raises before the
//! task gets to them collapse into one service pass.
//!
//! ```rust,no_run
//! use si446x_rs::radio::{MockTransport, RadioConfig, ServiceBuilder};
//!
//! # async fn demo() -> Result<(), si446x_rs::error::DriverError> {
//! let mut service = ServiceBuilder::new().spawn(MockTransport::new(), &RadioConfig::default())?;
//! service.handle.control("TURNON").await?;
//! while let Some(notification) = service.notifications.recv().await {
//!     println!("{:?}", notification);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::DriverError;
use crate::radio::actions::Notification;
use crate::radio::config::RadioConfig;
use crate::radio::driver::{Driver, Outcome, StatusReport};
use crate::radio::hal::Transport;
use crate::radio::timer::{Scheduler, TimerEvent, TokioScheduler};
use crate::radio::trace::TraceRecord;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Requests accepted by the service task
#[derive(Debug)]
pub enum DriverInput {
    Control {
        request: String,
        reply: oneshot::Sender<Outcome>,
    },
    Send {
        buffer: Bytes,
        power: u8,
        reply: oneshot::Sender<Outcome>,
    },
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
    ClearStatus {
        reply: oneshot::Sender<StatusReport>,
    },
    /// Latched RSSI and whether it is under the CCA threshold
    Cca {
        reply: oneshot::Sender<(u8, bool)>,
    },
    DumpTrace {
        n: usize,
        reply: oneshot::Sender<Vec<TraceRecord>>,
    },
    Interrupt,
    /// Power the chip down and stop the task
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Raises the driver's interrupt from any thread
#[derive(Debug, Clone)]
pub struct InterruptLine {
    tx: UnboundedSender<DriverInput>,
    pending: Arc<AtomicBool>,
}

impl InterruptLine {
    pub fn raise(&self) {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.tx.send(DriverInput::Interrupt).is_err() {
            log::debug!("interrupt raised after driver stopped");
        }
    }
}

/// Async front end to a running driver
#[derive(Debug, Clone)]
pub struct DriverHandle {
    tx: UnboundedSender<DriverInput>,
    pending: Arc<AtomicBool>,
}

impl DriverHandle {
    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> DriverInput,
    ) -> Result<R, DriverError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| DriverError::ChannelClosed)?;
        rx.await.map_err(|_| DriverError::ChannelClosed)
    }

    pub async fn control(&self, request: &str) -> Result<Outcome, DriverError> {
        let request = request.to_string();
        self.request(|reply| DriverInput::Control { request, reply })
            .await
    }

    pub async fn send(&self, buffer: Bytes, power: u8) -> Result<Outcome, DriverError> {
        self.request(|reply| DriverInput::Send {
            buffer,
            power,
            reply,
        })
        .await
    }

    pub async fn status(&self) -> Result<StatusReport, DriverError> {
        self.request(|reply| DriverInput::Status { reply }).await
    }

    pub async fn clear_status(&self) -> Result<StatusReport, DriverError> {
        self.request(|reply| DriverInput::ClearStatus { reply }).await
    }

    pub async fn cca(&self) -> Result<u8, DriverError> {
        let (rssi, _) = self.request(|reply| DriverInput::Cca { reply }).await?;
        Ok(rssi)
    }

    pub async fn channel_clear(&self) -> Result<bool, DriverError> {
        let (_, clear) = self.request(|reply| DriverInput::Cca { reply }).await?;
        Ok(clear)
    }

    pub async fn dump_trace(&self, n: usize) -> Result<Vec<TraceRecord>, DriverError> {
        self.request(|reply| DriverInput::DumpTrace { n, reply })
            .await
    }

    /// Power down and stop the service
    pub async fn shutdown(&self) -> Result<(), DriverError> {
        self.request(|reply| DriverInput::Shutdown { reply }).await
    }

    pub fn interrupt_line(&self) -> InterruptLine {
        InterruptLine {
            tx: self.tx.clone(),
            pending: self.pending.clone(),
        }
    }
}

/// A spawned service
#[derive(Debug)]
pub struct Service {
    pub handle: DriverHandle,
    pub notifications: UnboundedReceiver<Notification>,
    /// Ends with `Err` only on a fatal transition
    pub task: JoinHandle<Result<(), DriverError>>,
}

/// Creates the input queue ahead of the transport, so a hardware transport
/// can be given the [`InterruptLine`] at construction
#[derive(Debug)]
pub struct ServiceBuilder {
    tx: UnboundedSender<DriverInput>,
    rx: UnboundedReceiver<DriverInput>,
    pending: Arc<AtomicBool>,
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceBuilder {
    pub fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            tx,
            rx,
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn interrupt_line(&self) -> InterruptLine {
        InterruptLine {
            tx: self.tx.clone(),
            pending: self.pending.clone(),
        }
    }

    /// Build the driver and start its task. Must be called inside a tokio
    /// runtime.
    pub fn spawn<T>(self, transport: T, config: &RadioConfig) -> Result<Service, DriverError>
    where
        T: Transport + Send + 'static,
    {
        let (timer_tx, timer_rx) = unbounded_channel();
        let driver = Driver::new(transport, TokioScheduler::new(timer_tx), config)?;
        let (notify_tx, notify_rx) = unbounded_channel();

        let handle = DriverHandle {
            tx: self.tx,
            pending: self.pending.clone(),
        };
        let task = tokio::spawn(run(
            driver,
            self.rx,
            timer_rx,
            self.pending,
            notify_tx,
            config.start_on_boot,
        ));

        Ok(Service {
            handle,
            notifications: notify_rx,
            task,
        })
    }
}

fn publish<T: Transport, S: Scheduler>(
    driver: &mut Driver<T, S>,
    notify: &UnboundedSender<Notification>,
) {
    for notification in driver.take_notifications() {
        log::debug!("notify {:?}", notification);
        // nobody listening is fine
        let _ = notify.send(notification);
    }
}

/// Handle one input; `Ok(false)` stops the loop
fn handle_input<T: Transport, S: Scheduler>(
    driver: &mut Driver<T, S>,
    input: DriverInput,
    pending: &AtomicBool,
) -> Result<bool, DriverError> {
    match input {
        DriverInput::Control { request, reply } => {
            let outcome = driver.control(&request)?;
            let _ = reply.send(outcome);
        }
        DriverInput::Send {
            buffer,
            power,
            reply,
        } => {
            let outcome = driver.send(buffer, power)?;
            let _ = reply.send(outcome);
        }
        DriverInput::Status { reply } => {
            let _ = reply.send(driver.status());
        }
        DriverInput::ClearStatus { reply } => {
            let _ = reply.send(driver.clear_status());
        }
        DriverInput::Cca { reply } => {
            let _ = reply.send((driver.cca(), driver.channel_clear()));
        }
        DriverInput::DumpTrace { n, reply } => {
            let _ = reply.send(driver.dump_trace(n));
        }
        DriverInput::Interrupt => {
            // later raises must queue a fresh pass
            pending.store(false, Ordering::Release);
            driver.on_interrupt()?;
        }
        DriverInput::Shutdown { reply } => {
            driver.power_down()?;
            let _ = reply.send(());
            return Ok(false);
        }
    }
    Ok(true)
}

async fn run<T: Transport>(
    mut driver: Driver<T, TokioScheduler>,
    mut inputs: UnboundedReceiver<DriverInput>,
    mut timers: UnboundedReceiver<TimerEvent>,
    pending: Arc<AtomicBool>,
    notify: UnboundedSender<Notification>,
    start_on_boot: bool,
) -> Result<(), DriverError> {
    log::info!("driver service started in {}", driver.state());
    let _ = notify.send(Notification::NewStatus(driver.state().status_label()));

    if start_on_boot {
        driver.control("TURNON")?;
        publish(&mut driver, &notify);
    }

    loop {
        let result = tokio::select! {
            biased;
            Some(event) = timers.recv() => driver.on_scheduler_event(event).map(|_| true),
            input = inputs.recv() => match input {
                Some(input) => handle_input(&mut driver, input, &pending),
                None => {
                    log::info!("all driver handles dropped");
                    Ok(false)
                }
            },
        };
        publish(&mut driver, &notify);

        match result {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                log::error!("driver stopped: {}", e);
                for record in driver.dump_trace(16) {
                    log::error!("  {}", record);
                }
                return Err(e);
            }
        }
    }

    log::info!("driver service stopped in {}", driver.state());
    Ok(())
}
