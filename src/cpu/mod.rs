//! The CPU-backed execution engine: device, worker pool, backing buffers
//! and the work-group machinery.

pub mod buffer;
pub mod builtins;
pub mod device;
pub mod kernel;
pub(crate) mod worker;

pub use self::buffer::CpuBuffer;
pub use self::device::{CpuDevice, DeviceData, SendPtr};
pub use self::kernel::{CpuKernelEvent, ImageDescriptor, WorkGroup};
