//! # Event Listeners
//!
//! A registered watch is represented by a [`WatchHandle`]. Consumers that let the
//! watcher create the delivery channel get an [`EventListener`] instead: it owns the
//! receiving end, unregisters itself when dropped, and can be consumed as a stream.

pub use crate::dispatcher::WatchId;
use crate::dispatcher::WatcherCommand;
pub use crate::events::RawEvent;
use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;

/// Identifies a registered watch and allows unregistering it.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    id: WatchId,
    command_tx: mpsc::Sender<WatcherCommand>,
}

impl WatchHandle {
    pub(crate) fn new(id: WatchId, command_tx: mpsc::Sender<WatcherCommand>) -> Self {
        Self { id, command_tx }
    }

    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Asks the watcher to remove the watch. Takes effect at the next batch boundary.
    pub async fn unregister(self) {
        if self
            .command_tx
            .send(WatcherCommand::Unregister(self.id))
            .await
            .is_err()
        {
            tracing::debug!(watch = %self.id, "Watcher already stopped; nothing to unregister");
        }
    }

    /// Non-async unregistration for `Drop` paths.
    fn unregister_detached(&self) {
        let command = WatcherCommand::Unregister(self.id);
        match self.command_tx.try_send(command) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(command)) => {
                let tx = self.command_tx.clone();
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    runtime.spawn(async move {
                        tx.send(command).await.ok();
                    });
                }
            }
        }
    }
}

/// A watch together with its delivery channel.
///
/// Events arrive in ledger order. Dropping the listener, or calling
/// [`EventListener::unsubscribe`], stops deliveries to it without affecting
/// other watches.
#[derive(Debug)]
pub struct EventListener {
    rx: mpsc::Receiver<RawEvent>,
    /// This is an `Option` to allow for manual unsubscription by taking the value.
    handle: Option<WatchHandle>,
}

impl EventListener {
    pub(crate) fn new(rx: mpsc::Receiver<RawEvent>, handle: WatchHandle) -> Self {
        Self {
            rx,
            handle: Some(handle),
        }
    }

    pub fn id(&self) -> Option<WatchId> {
        self.handle.as_ref().map(WatchHandle::id)
    }

    /// Receives the next matching event. Returns `None` once the watcher has stopped.
    pub async fn next_event(&mut self) -> Option<RawEvent> {
        self.rx.recv().await
    }

    /// Returns an already delivered event without waiting.
    pub fn try_next_event(&mut self) -> Option<RawEvent> {
        self.rx.try_recv().ok()
    }

    /// Manually unsubscribes the listener from the watcher.
    ///
    /// This method consumes the listener. The automatic `Drop` implementation will
    /// not attempt to unsubscribe a second time.
    pub async fn unsubscribe(mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(watch = %handle.id(), "Manual unsubscribe");
            handle.unregister().await;
        }
    }

    /// Turns the listener into a `Stream` of events. The watch is unregistered when
    /// the stream is dropped.
    pub fn into_stream(mut self) -> ListenerStream {
        let handle = self.handle.take();
        let (_, placeholder) = mpsc::channel(1);
        let rx = std::mem::replace(&mut self.rx, placeholder);
        ListenerStream {
            inner: ReceiverStream::new(rx),
            _guard: UnsubscribeOnDrop(handle),
        }
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        // Only perform automatic unsubscription if it hasn't been done manually.
        if let Some(handle) = self.handle.take() {
            tracing::debug!(watch = %handle.id(), "Automatic unsubscribe (on drop)");
            handle.unregister_detached();
        }
    }
}

#[derive(Debug)]
struct UnsubscribeOnDrop(Option<WatchHandle>);

impl Drop for UnsubscribeOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.unregister_detached();
        }
    }
}

/// Stream adapter returned by [`EventListener::into_stream`].
#[derive(Debug)]
pub struct ListenerStream {
    inner: ReceiverStream<RawEvent>,
    _guard: UnsubscribeOnDrop,
}

impl Stream for ListenerStream {
    type Item = RawEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}
