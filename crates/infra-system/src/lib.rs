// gpuval Infrastructure - System Adapters
// Implements: ProcessCapture, KernelMonitor, ProbeBuilder, GpuQuery, SystemSnapshot

pub mod host_snapshot;
pub mod kernel_monitor;
pub mod make_builder;
pub mod nvidia_smi;
pub mod tee_capture;

pub use host_snapshot::{HostFacts, HostSnapshot};
pub use kernel_monitor::DmesgMonitor;
pub use make_builder::MakeBuilder;
pub use nvidia_smi::NvidiaSmiQuery;
pub use tee_capture::{tee_process, TeeCapture, TeeRun};
