//! Ports - trait definitions for external dependencies.
//! These are the "interfaces" that infrastructure must implement.

mod counter_store;
mod metrics;

pub use counter_store::{CounterStore, StoreError, WindowReservation};
pub use metrics::{MetricRecord, MetricsRecorder};
