// Port Layer - Interfaces for external collaborators

pub mod gpu_query;
pub mod kernel_monitor;
pub mod probe_builder;
pub mod process_capture;
pub mod system_snapshot;

// Re-exports
pub use gpu_query::{GpuQuery, QueryError};
pub use kernel_monitor::{KernelMonitor, MonitorHandle};
pub use probe_builder::{BuildError, ProbeBuilder};
pub use process_capture::{CaptureError, ProcessCapture};
pub use system_snapshot::SystemSnapshot;
