//! # Fall Notifiers
//!
//! The seam to whatever delivers alerts. A notifier is invoked once per
//! `fall-detected` result, on the ingesting thread; delivery and retries are
//! its own business. Notifiers that do I/O belong behind a
//! [`BackgroundNotifier`] so a slow sink never holds up an ingest.

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use fall_core::Outcome;
use log::{debug, warn};
use parking_lot::Mutex;

pub trait FallNotifier: Send + Sync {
    fn name(&self) -> &str;
    fn notify(&self, device_id: &str, outcome: &Outcome) -> Result<()>;
}

/// Writes the fall to the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl FallNotifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&self, device_id: &str, outcome: &Outcome) -> Result<()> {
        warn!(
            "fall alert for device={device_id} at={} pitch={:?}",
            outcome.at, outcome.debug.pitch_now
        );
        Ok(())
    }
}

/// A fall handed over to an in-process consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct FallNotice {
    pub device_id: String,
    pub outcome: Outcome,
}

/// Forwards falls over a channel, e.g. to a delivery thread.
#[derive(Debug)]
pub struct ChannelNotifier {
    tx: Mutex<Sender<FallNotice>>,
}

impl ChannelNotifier {
    pub fn new(tx: Sender<FallNotice>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl FallNotifier for ChannelNotifier {
    fn name(&self) -> &str {
        "channel"
    }

    fn notify(&self, device_id: &str, outcome: &Outcome) -> Result<()> {
        self.tx
            .lock()
            .send(FallNotice {
                device_id: device_id.to_string(),
                outcome: outcome.clone(),
            })
            .map_err(|_| anyhow!("fall notice receiver dropped"))
    }
}

/// Runs another notifier on its own worker thread.
///
/// `notify` only queues the fall and returns. Dropping the wrapper closes the
/// queue and waits for the worker to deliver what is still pending.
pub struct BackgroundNotifier {
    name: String,
    tx: Mutex<Option<Sender<FallNotice>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundNotifier {
    pub fn spawn(inner: Box<dyn FallNotifier>) -> Result<Self> {
        let name = inner.name().to_string();
        let (tx, rx) = mpsc::channel::<FallNotice>();
        let worker = thread::Builder::new()
            .name(format!("notify-{name}"))
            .spawn(move || {
                for notice in rx {
                    if let Err(e) = inner.notify(&notice.device_id, &notice.outcome) {
                        warn!(
                            "notifier {} failed for device={}: {e:#}",
                            inner.name(),
                            notice.device_id
                        );
                    }
                }
                debug!("notifier {} drained", inner.name());
            })
            .with_context(|| format!("spawning worker for notifier {name}"))?;

        Ok(Self {
            name,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }
}

impl FallNotifier for BackgroundNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn notify(&self, device_id: &str, outcome: &Outcome) -> Result<()> {
        let tx = self.tx.lock();
        let tx = tx.as_ref().ok_or_else(|| anyhow!("notifier {} is shut down", self.name))?;
        tx.send(FallNotice {
            device_id: device_id.to_string(),
            outcome: outcome.clone(),
        })
        .map_err(|_| anyhow!("worker for notifier {} stopped", self.name))
    }
}

impl Drop for BackgroundNotifier {
    fn drop(&mut self) {
        self.tx.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("worker for notifier {} panicked", self.name);
            }
        }
    }
}
