//! Command dispatcher.
//!
//! A single pending slot in front of the actuator. A newer command replaces the pending
//! one, out-of-order arrivals are refused, and consecutive actuator calls are spaced at
//! least `min_interval` apart (measured from the end of the previous call). A failed call
//! marks the link disconnected; nothing is sent again until `reconnect` succeeds.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::actuator::{Actuator, ConnectionState};
use crate::command::MotionCommand;
use crate::config::DispatcherSettings;
use crate::error::ActuatorError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// Took the slot from an older pending command, which will never be sent.
    Replaced { superseded: u64 },
    /// Sequence not newer than one already accepted.
    Stale,
    /// Link is down; call `reconnect` first.
    Disconnected,
    /// Produced by a tracking epoch that has since been switched off.
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Poll {
    Ready(MotionCommand),
    Wait(Duration),
    Idle,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    pub sent: u64,
    pub superseded: u64,
    pub stale: u64,
    pub cancelled: u64,
    pub failed: u64,
}

/// A command the actuator failed to execute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActuatorFailure {
    pub sequence: u64,
    pub error: ActuatorError,
}

// ----------------------------------------------------------------------------
// Dispatch core (clock supplied by the caller)
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct DispatchCore {
    min_interval: Duration,
    pending: Option<MotionCommand>,
    highest_accepted: Option<u64>,
    last_completed: Option<Instant>,
    in_progress: bool,
    connection: ConnectionState,
    counters: DispatchCounters,
    /// Automatic commands from tracking epochs below this are refused.
    open_epoch: u64,
}

impl DispatchCore {
    pub fn new(settings: &DispatcherSettings) -> Self {
        Self {
            min_interval: settings.min_interval,
            pending: None,
            highest_accepted: None,
            last_completed: None,
            in_progress: false,
            connection: ConnectionState::Connected,
            counters: DispatchCounters::default(),
            open_epoch: 0,
        }
    }

    pub fn submit(&mut self, command: MotionCommand) -> Submission {
        if !self.connection.is_connected() {
            return Submission::Disconnected;
        }
        if self
            .highest_accepted
            .is_some_and(|highest| command.sequence <= highest)
        {
            self.counters.stale += 1;
            return Submission::Stale;
        }
        self.highest_accepted = Some(command.sequence);
        match self.pending.replace(command) {
            Some(old) => {
                self.counters.superseded += 1;
                Submission::Replaced {
                    superseded: old.sequence,
                }
            }
            None => Submission::Queued,
        }
    }

    /// Submit an automatic command produced during tracking epoch `epoch`.
    pub fn submit_for_epoch(&mut self, command: MotionCommand, epoch: u64) -> Submission {
        if epoch < self.open_epoch {
            self.counters.cancelled += 1;
            return Submission::Cancelled;
        }
        self.submit(command)
    }

    /// Refuse automatic commands from epochs before `epoch` and drop the pending command.
    /// Epochs only move forward.
    pub fn close_epochs_before(&mut self, epoch: u64) -> Option<MotionCommand> {
        self.open_epoch = self.open_epoch.max(epoch);
        self.pending.take()
    }

    /// Take the pending command if the actuator may be called now.
    pub fn poll(&mut self, now: Instant) -> Poll {
        if self.in_progress || !self.connection.is_connected() || self.pending.is_none() {
            return Poll::Idle;
        }
        if let Some(last) = self.last_completed {
            let ready_at = last + self.min_interval;
            if now < ready_at {
                return Poll::Wait(ready_at - now);
            }
        }
        match self.pending.take() {
            Some(command) => {
                self.in_progress = true;
                Poll::Ready(command)
            }
            None => Poll::Idle,
        }
    }

    /// Record the outcome of the call started by the last `Ready`.
    pub fn finish(&mut self, result: &Result<(), ActuatorError>, now: Instant) {
        self.in_progress = false;
        self.last_completed = Some(now);
        match result {
            Ok(()) => self.counters.sent += 1,
            Err(err) => {
                self.counters.failed += 1;
                self.pending = None;
                self.connection = ConnectionState::Disconnected {
                    reason: err.to_string(),
                };
            }
        }
    }

    pub fn set_connection(&mut self, connection: ConnectionState) {
        self.connection = connection;
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn counters(&self) -> DispatchCounters {
        self.counters
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

// ----------------------------------------------------------------------------
// Dispatcher thread
// ----------------------------------------------------------------------------

struct Shared {
    core: Mutex<DispatchCore>,
    wake: Condvar,
    actuator: Mutex<Box<dyn Actuator>>,
    shutdown: AtomicBool,
}

impl Shared {
    fn core(&self) -> MutexGuard<'_, DispatchCore> {
        self.core.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn actuator(&self) -> MutexGuard<'_, Box<dyn Actuator>> {
        self.actuator.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Cloneable submission side of a running dispatcher.
#[derive(Clone)]
pub struct DispatchHandle {
    shared: Arc<Shared>,
}

impl DispatchHandle {
    pub fn submit(&self, command: MotionCommand) -> Submission {
        let outcome = self.shared.core().submit(command);
        self.after_submit(command, outcome)
    }

    /// Like `submit`, but checked against the open tracking epoch under the same lock that
    /// `close_epochs_before` takes, so nothing from a switched-off epoch gets queued.
    pub fn submit_for_epoch(&self, command: MotionCommand, epoch: u64) -> Submission {
        let outcome = self.shared.core().submit_for_epoch(command, epoch);
        self.after_submit(command, outcome)
    }

    /// Forget the pending command and refuse automatic commands from older epochs. A call
    /// already in progress still completes.
    pub fn close_epochs_before(&self, epoch: u64) {
        if let Some(dropped) = self.shared.core().close_epochs_before(epoch) {
            log::debug!("dispatch: cleared pending command {}", dropped);
        }
    }

    fn after_submit(&self, command: MotionCommand, outcome: Submission) -> Submission {
        match outcome {
            Submission::Queued | Submission::Replaced { .. } => self.shared.wake.notify_all(),
            Submission::Stale => log::debug!("dispatch: dropping stale command {}", command),
            Submission::Disconnected => {
                log::debug!("dispatch: actuator disconnected, refusing {}", command)
            }
            Submission::Cancelled => {
                log::debug!("dispatch: tracking switched off, refusing {}", command)
            }
        }
        outcome
    }

    pub fn connection(&self) -> ConnectionState {
        self.shared.core().connection().clone()
    }

    pub fn counters(&self) -> DispatchCounters {
        self.shared.core().counters()
    }

    /// Explicit reconnection after a failure. Waits for any call in progress.
    pub fn reconnect(&self) -> Result<(), ActuatorError> {
        let result = self.shared.actuator().reconnect();
        let mut core = self.shared.core();
        match &result {
            Ok(()) => {
                log::info!("dispatch: actuator reconnected");
                core.set_connection(ConnectionState::Connected);
            }
            Err(err) => {
                log::warn!("dispatch: reconnect failed: {}", err);
                core.set_connection(ConnectionState::Disconnected {
                    reason: err.to_string(),
                });
            }
        }
        drop(core);
        self.shared.wake.notify_all();
        result
    }
}

pub struct Dispatcher {
    handle: DispatchHandle,
    failures: Receiver<ActuatorFailure>,
    join: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(actuator: Box<dyn Actuator>, settings: &DispatcherSettings) -> Result<Self> {
        let shared = Arc::new(Shared {
            core: Mutex::new(DispatchCore::new(settings)),
            wake: Condvar::new(),
            actuator: Mutex::new(actuator),
            shutdown: AtomicBool::new(false),
        });
        let (failure_tx, failure_rx) = mpsc::channel();
        let thread_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name("ptz-dispatch".to_string())
            .spawn(move || run_dispatch(&thread_shared, &failure_tx))
            .context("spawn dispatcher thread")?;

        Ok(Self {
            handle: DispatchHandle { shared },
            failures: failure_rx,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    pub fn submit(&self, command: MotionCommand) -> Submission {
        self.handle.submit(command)
    }

    pub fn submit_for_epoch(&self, command: MotionCommand, epoch: u64) -> Submission {
        self.handle.submit_for_epoch(command, epoch)
    }

    /// Next unreported actuator failure, if any.
    pub fn try_failure(&self) -> Option<ActuatorFailure> {
        self.failures.try_recv().ok()
    }

    /// Stop the thread after any call in progress; a pending command is discarded.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.handle.shared.shutdown.store(true, Ordering::SeqCst);
        self.handle.shared.wake.notify_all();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("dispatcher thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("{}", err);
        }
    }
}

fn run_dispatch(shared: &Shared, failures: &Sender<ActuatorFailure>) {
    loop {
        let command = {
            let mut core = shared.core();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                match core.poll(Instant::now()) {
                    Poll::Ready(command) => break command,
                    Poll::Wait(delay) => {
                        core = shared
                            .wake
                            .wait_timeout(core, delay)
                            .map(|(guard, _)| guard)
                            .unwrap_or_else(|p| p.into_inner().0);
                    }
                    Poll::Idle => {
                        core = shared.wake.wait(core).unwrap_or_else(|p| p.into_inner());
                    }
                }
            }
        };

        let result = shared.actuator().send(&command);
        shared.core().finish(&result, Instant::now());
        match result {
            Ok(()) => log::debug!("dispatch: sent {}", command),
            Err(error) => {
                log::error!("dispatch: command {} failed: {}", command.sequence, error);
                let _ = failures.send(ActuatorFailure {
                    sequence: command.sequence,
                    error,
                });
            }
        }
    }
}
