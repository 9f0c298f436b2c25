//! Metrics and observability infrastructure.

pub mod events;

/// Macro for emitting metric events.
///
/// Calls the `InternalEvent::emit()` method on the given event, which
/// records the corresponding counter metric.
///
/// # Example
///
/// ```ignore
/// use avalanche::metrics::events::RowsWritten;
///
/// emit!(RowsWritten { count: 100 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
