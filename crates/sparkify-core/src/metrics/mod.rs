//! Metrics emitted by the engine.
//!
//! Events are plain counters on the global `metrics` recorder. The batch
//! binary installs no exporter; an embedding application can install any
//! recorder to collect them.

pub mod events;

/// Emit an internal event.
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
