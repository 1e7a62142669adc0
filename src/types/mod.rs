//! Enumerators and bitfields shared across the runtime.

mod enums;
mod flags;

pub use self::enums::{
    AddressSpace, ArgKind, CommandExecutionStatus, CommandType, ImageChannelDataType,
    ImageChannelOrder, ImageFormat, ObjectType, ProfilingInfo, Status,
};
pub use self::flags::{
    CommandQueueProperties, DeviceExecCapabilities, MapFlags, MemFenceFlags, MemFlags,
};
