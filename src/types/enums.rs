//! C-style enumerators: API status codes, command types, execution statuses.
//!
//! Numeric values track the conventional OpenCL constants so that statuses
//! and command types round-trip through the raw `i32` surface unchanged.

use std::fmt;

enum_from_primitive! {
    /// The status of an API call or of a failed event. Negative values are
    /// error codes; `Success` is zero.
    #[repr(i32)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum Status {
        Success                             = 0,
        DeviceNotFound                      = -1,
        DeviceNotAvailable                  = -2,
        CompilerNotAvailable                = -3,
        MemObjectAllocationFailure          = -4,
        OutOfResources                      = -5,
        OutOfHostMemory                     = -6,
        ProfilingInfoNotAvailable           = -7,
        MemCopyOverlap                      = -8,
        BuildProgramFailure                 = -11,
        MapFailure                          = -12,
        MisalignedSubBufferOffset           = -13,
        ExecStatusErrorForEventsInWaitList  = -14,
        InvalidValue                        = -30,
        InvalidDevice                       = -33,
        InvalidContext                      = -34,
        InvalidQueueProperties              = -35,
        InvalidCommandQueue                 = -36,
        InvalidHostPtr                      = -37,
        InvalidMemObject                    = -38,
        InvalidImageFormatDescriptor        = -39,
        InvalidImageSize                    = -40,
        InvalidSampler                      = -41,
        InvalidBinary                       = -42,
        InvalidBuildOptions                 = -43,
        InvalidProgram                      = -44,
        InvalidProgramExecutable            = -45,
        InvalidKernelName                   = -46,
        InvalidKernelDefinition             = -47,
        InvalidKernel                       = -48,
        InvalidArgIndex                     = -49,
        InvalidArgValue                     = -50,
        InvalidArgSize                      = -51,
        InvalidKernelArgs                   = -52,
        InvalidWorkDimension                = -53,
        InvalidWorkGroupSize                = -54,
        InvalidWorkItemSize                 = -55,
        InvalidGlobalOffset                 = -56,
        InvalidEventWaitList                = -57,
        InvalidEvent                        = -58,
        InvalidOperation                    = -59,
        InvalidBufferSize                   = -61,
        InvalidGlobalWorkSize               = -63,
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?} ({})", self, *self as i32)
    }
}

enum_from_primitive! {
    /// The execution state of an event. Statuses advance by *decreasing*
    /// numeric value (`Queued` → `Submitted` → `Running` → `Complete`);
    /// errors collapse the raw status to a negative `Status` code.
    #[repr(i32)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum CommandExecutionStatus {
        Complete  = 0,
        Running   = 1,
        Submitted = 2,
        Queued    = 3,
    }
}

enum_from_primitive! {
    /// The command an event stands for.
    #[repr(i32)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum CommandType {
        NdRangeKernel   = 0x11F0,
        Task            = 0x11F1,
        NativeKernel    = 0x11F2,
        ReadBuffer      = 0x11F3,
        WriteBuffer     = 0x11F4,
        CopyBuffer      = 0x11F5,
        ReadImage       = 0x11F6,
        WriteImage      = 0x11F7,
        CopyImage       = 0x11F8,
        MapBuffer       = 0x11FB,
        UnmapMemObject  = 0x11FD,
        Marker          = 0x11FE,
        ReadBufferRect  = 0x1201,
        WriteBufferRect = 0x1202,
        User            = 0x1204,
        Barrier         = 0x1205,
        WaitForEvents   = 0x1206,
    }
}

/// The type tag carried by every registered runtime object. Also the key
/// half of the `is_a` boundary predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Device,
    CommandQueue,
    Event,
    Context,
    Kernel,
    MemObject,
    Program,
    Sampler,
}

/// Event profiling counters, each a nanosecond reading of the process
/// monotonic clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProfilingInfo {
    /// When the event was enqueued on its command queue.
    Queued,
    /// When the event was submitted to the device.
    Submit,
    /// When a worker began executing the command.
    Start,
    /// When the command finished executing.
    End,
}

/// The lowered type of one kernel argument slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Buffer,
    Image2d,
    Image3d,
    Sampler,
}

impl ArgKind {
    /// Size in bytes of one lane of this kind, or `None` for non-scalar
    /// kinds.
    pub fn lane_size(self) -> Option<usize> {
        match self {
            ArgKind::Int8 => Some(1),
            ArgKind::Int16 => Some(2),
            ArgKind::Int32 | ArgKind::Float => Some(4),
            ArgKind::Int64 | ArgKind::Double => Some(8),
            ArgKind::Sampler => Some(4),
            ArgKind::Buffer | ArgKind::Image2d | ArgKind::Image3d => None,
        }
    }
}

/// The address space a kernel argument lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Private,
    Global,
    Local,
    Constant,
}

enum_from_primitive! {
    /// Number and layout of image channels.
    #[repr(i32)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum ImageChannelOrder {
        R         = 0x10B0,
        A         = 0x10B1,
        Rg        = 0x10B2,
        Ra        = 0x10B3,
        Rgb       = 0x10B4,
        Rgba      = 0x10B5,
        Bgra      = 0x10B6,
        Argb      = 0x10B7,
        Intensity = 0x10B8,
        Luminance = 0x10B9,
    }
}

enum_from_primitive! {
    /// Per-channel storage format of an image.
    #[repr(i32)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum ImageChannelDataType {
        SnormInt8     = 0x10D0,
        SnormInt16    = 0x10D1,
        UnormInt8     = 0x10D2,
        UnormInt16    = 0x10D3,
        SignedInt8    = 0x10D7,
        SignedInt16   = 0x10D8,
        SignedInt32   = 0x10D9,
        UnsignedInt8  = 0x10DA,
        UnsignedInt16 = 0x10DB,
        UnsignedInt32 = 0x10DC,
        HalfFloat     = 0x10DD,
        Float         = 0x10DE,
    }
}

/// An image pixel format: channel order plus per-channel data type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageFormat {
    pub channel_order: ImageChannelOrder,
    pub channel_data_type: ImageChannelDataType,
}

impl ImageFormat {
    pub fn new(channel_order: ImageChannelOrder, channel_data_type: ImageChannelDataType) -> ImageFormat {
        ImageFormat { channel_order, channel_data_type }
    }

    /// Bytes occupied by one pixel of this format, or zero for combinations
    /// this runtime does not lay out.
    pub fn pixel_size(&self) -> usize {
        let channels = match self.channel_order {
            ImageChannelOrder::R
            | ImageChannelOrder::A
            | ImageChannelOrder::Intensity
            | ImageChannelOrder::Luminance => 1,
            ImageChannelOrder::Rg | ImageChannelOrder::Ra => 2,
            ImageChannelOrder::Rgb => 3,
            ImageChannelOrder::Rgba | ImageChannelOrder::Argb | ImageChannelOrder::Bgra => 4,
        };

        let per_channel = match self.channel_data_type {
            ImageChannelDataType::SnormInt8
            | ImageChannelDataType::UnormInt8
            | ImageChannelDataType::SignedInt8
            | ImageChannelDataType::UnsignedInt8 => 1,
            ImageChannelDataType::SnormInt16
            | ImageChannelDataType::UnormInt16
            | ImageChannelDataType::SignedInt16
            | ImageChannelDataType::UnsignedInt16
            | ImageChannelDataType::HalfFloat => 2,
            ImageChannelDataType::SignedInt32
            | ImageChannelDataType::UnsignedInt32
            | ImageChannelDataType::Float => 4,
        };

        channels * per_channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enum_primitive::FromPrimitive;

    #[test]
    fn status_round_trips_through_i32() {
        assert_eq!(Status::from_i32(-13), Some(Status::MisalignedSubBufferOffset));
        assert_eq!(Status::from_i32(-14), Some(Status::ExecStatusErrorForEventsInWaitList));
        assert_eq!(Status::from_i32(1), None);
        assert_eq!(Status::MemObjectAllocationFailure as i32, -4);
    }

    #[test]
    fn execution_statuses_are_ordered_downward() {
        assert!((CommandExecutionStatus::Complete as i32) < (CommandExecutionStatus::Running as i32));
        assert!((CommandExecutionStatus::Running as i32) < (CommandExecutionStatus::Submitted as i32));
        assert!((CommandExecutionStatus::Submitted as i32) < (CommandExecutionStatus::Queued as i32));
    }

    #[test]
    fn pixel_sizes() {
        let rgba8 = ImageFormat::new(ImageChannelOrder::Rgba, ImageChannelDataType::UnsignedInt8);
        assert_eq!(rgba8.pixel_size(), 4);
        let rf = ImageFormat::new(ImageChannelOrder::R, ImageChannelDataType::Float);
        assert_eq!(rf.pixel_size(), 4);
    }
}
