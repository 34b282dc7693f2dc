//! Telemetry for admission and cached computation.
//!
//! Events flow through sinks implemented as `tower::Service<GuardEvent>`. Emission is
//! always best-effort: a failing sink never fails the request it describes.
//!
//! # Event Types
//!
//! - **Admission**: `Allowed`, `Denied`
//! - **Cache**: `Hit`, `Miss`, `Stored`, `Invalidated`, `BackendFailure`
//! - **Compute**: `Success`, `Failure`, `TimedOut`
//!
//! Operators who only need logs can ignore this module; everything here is also
//! reported through `tracing`.

pub mod events;
pub mod sinks;

pub use events::{AdmissionEvent, CacheEvent, ComputeOutcome, GuardEvent};
pub use sinks::{box_sink, emit_best_effort, BoxSink, LogSink, MemorySink, NullSink};
