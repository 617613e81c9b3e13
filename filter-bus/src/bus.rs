use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::message::Message;

/// Asynchronous message channel from pipeline elements to the application.
///
/// Any thread may post; messages are drained either by a [`BusWatch`] running
/// on a [`MainLoop`] or by polling with [`Bus::pop`].
#[derive(Clone)]
pub struct Bus {
    tx: mpsc::UnboundedSender<Message>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    watched: Arc<AtomicBool>,
}

impl Bus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            watched: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn post(&self, message: Message) {
        log::debug!("bus: {}", message);
        // the receiver lives as long as the bus itself
        let _ = self.tx.send(message);
    }

    /// Takes a pending message without waiting. None while a watch is running.
    pub fn pop(&self) -> Option<Message> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }

    /// Waits up to `timeout` for the next message.
    pub async fn timed_pop(&self, timeout: Duration) -> Option<Message> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    async fn recv(&self) -> Option<Message> {
        self.rx.lock().await.recv().await
    }

    /// Installs `handler` as the single watch of this bus. The handler runs on
    /// the main loop the watch is handed to; returning `false` removes it.
    pub fn add_watch<F>(&self, handler: F) -> anyhow::Result<BusWatch>
    where
        F: FnMut(&Message) -> bool + Send + 'static,
    {
        if self.watched.swap(true, Ordering::SeqCst) {
            anyhow::bail!("bus already has a watch");
        }
        Ok(BusWatch {
            bus: self.clone(),
            handler: Some(Box::new(handler)),
        })
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BusWatch {
    bus: Bus,
    handler: Option<Box<dyn FnMut(&Message) -> bool + Send>>,
}

impl Drop for BusWatch {
    fn drop(&mut self) {
        self.bus.watched.store(false, Ordering::SeqCst);
    }
}

/// Cooperative loop that dispatches bus messages until [`MainLoop::quit`].
#[derive(Clone)]
pub struct MainLoop {
    cancel: CancellationToken,
}

impl MainLoop {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    pub fn quit(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Dispatches every message of the watched bus, one at a time, until quit.
    pub async fn run(&self, mut watch: BusWatch) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    break;
                },
                message = watch.bus.recv(), if watch.handler.is_some() => {
                    let Some(message) = message else {
                        anyhow::bail!("bus closed while the main loop was running");
                    };
                    if let Some(handler) = watch.handler.as_mut() {
                        if !handler(&message) {
                            log::debug!("bus watch removed");
                            watch.handler = None;
                        }
                    }
                },
            }
        }
        Ok(())
    }
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}
