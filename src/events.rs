//! Store event notification.

/// Events dispatched after successful state transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    /// An incremental edit, save, or discard changed the visible data.
    DataChange,
    /// The visible data was refreshed wholesale (undo, redo, bulk load),
    /// as opposed to a single-path edit.
    DataPush,
}

/// Observer notified synchronously after every state-changing operation.
///
/// Passed into the store at construction; implementations must be cheap and
/// non-blocking, the store calls them inline.
pub trait EventNotifier: Send + Sync {
    fn dispatch(&self, event: StoreEvent);
}
