//! Metrics and observability infrastructure.
//!
//! - `events`: Internal event types and the `InternalEvent` trait
//! - `server`: Prometheus exporter initialization

pub mod events;
pub mod server;

pub use server::{DEFAULT_METRICS_ADDR, init_global};

/// Emit a metric event.
///
/// Calls `InternalEvent::emit()` on the given event, which records the
/// corresponding metric with whatever recorder is installed.
///
/// ```ignore
/// use skyshard_core::metrics::events::RowsRead;
///
/// emit!(RowsRead { count: 100, target: "worker-0".into() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
