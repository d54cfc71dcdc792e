//! Delivery of OS device-removal events to the open devices they concern.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::os::{Backend, RemovalEvent, Unsubscribe};
use crate::registry::DeviceRegistry;
use crate::{HidError, HidResult, OsError};

/* Upper bound on how long stop() waits for a subscription that never
   disconnects its channel. */
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierState {
    Idle,
    Listening,
    Stopped,
}

struct Running {
    unsubscribe: Unsubscribe,
    stopped: Arc<AtomicBool>,
    dispatcher: JoinHandle<()>,
}

/// Owns the removal subscription and the thread dispatching its events.
pub struct RemovalNotifier {
    state: Arc<Mutex<NotifierState>>,
    running: Mutex<Option<Running>>,
}

impl RemovalNotifier {
    pub fn new() -> RemovalNotifier {
        RemovalNotifier {
            state: Arc::new(Mutex::new(NotifierState::Idle)),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> NotifierState {
        *self.state.lock()
    }

    /// Subscribe to removal events and start dispatching them into
    /// `registry`. Only valid from `Idle`; any other state is left as is.
    pub fn start<B: Backend>(
        &self,
        backend: &B,
        registry: Arc<DeviceRegistry>,
        thread_name: &str,
    ) -> HidResult<()> {
        let mut state = self.state.lock();
        if *state != NotifierState::Idle {
            log::warn!("Removal notifier already started ({:?})", *state);
            return Ok(());
        }

        let subscription = backend.subscribe_removals().map_err(HidError::SubscriptionFailure)?;
        let stopped = Arc::new(AtomicBool::new(false));

        let events = subscription.events;
        let flag = stopped.clone();
        let notifier_state = self.state.clone();
        let dispatcher = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                dispatch(events, registry, &flag);
                if !flag.load(Ordering::Acquire) {
                    log::error!("Removal notifications ended unexpectedly, no longer watching for removals");
                    *notifier_state.lock() = NotifierState::Stopped;
                }
            })
            .map_err(|err| HidError::SubscriptionFailure(OsError::new("spawn", err)))?;

        *self.running.lock() = Some(Running {
            unsubscribe: subscription.unsubscribe,
            stopped,
            dispatcher,
        });
        *state = NotifierState::Listening;
        log::info!("Listening for hid device removals");
        Ok(())
    }

    /// Unsubscribe and stop dispatching. Events still buffered are dropped.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        let running = self.running.lock().take();
        *state = NotifierState::Stopped;
        drop(state);

        if let Some(Running { unsubscribe, stopped, dispatcher }) = running {
            stopped.store(true, Ordering::Release);
            drop(unsubscribe);
            // Stopping from a removal listener: the dispatcher winds down on
            // its own once the listener returns.
            if dispatcher.thread().id() != thread::current().id() && dispatcher.join().is_err() {
                log::error!("Removal dispatcher panicked");
            }
            log::debug!("Removal notifier stopped");
        }
    }
}

impl Default for RemovalNotifier {
    fn default() -> RemovalNotifier {
        RemovalNotifier::new()
    }
}

impl Drop for RemovalNotifier {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch(events: Receiver<RemovalEvent>, registry: Arc<DeviceRegistry>, stopped: &AtomicBool) {
    while !stopped.load(Ordering::Acquire) {
        let event = match events.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if stopped.load(Ordering::Acquire) {
            break;
        }
        let closed = registry.device_removed(&event.instance_id);
        if closed > 0 {
            log::info!("{} removed, closed {} device(s)", event.instance_id, closed);
        } else {
            log::trace!("Ignoring removal of {}", event.instance_id);
        }
    }
}
