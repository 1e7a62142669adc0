//! Bitfields.

bitflags! {
    /// Memory object access and host-pointer disposition flags.
    pub struct MemFlags: u64 {
        const READ_WRITE = 1;
        const WRITE_ONLY = 1 << 1;
        const READ_ONLY = 1 << 2;
        const USE_HOST_PTR = 1 << 3;
        const ALLOC_HOST_PTR = 1 << 4;
        const COPY_HOST_PTR = 1 << 5;
    }
}

impl Default for MemFlags {
    fn default() -> MemFlags {
        MemFlags::READ_WRITE
    }
}

bitflags! {
    /// Command queue properties.
    pub struct CommandQueueProperties: u64 {
        const OUT_OF_ORDER_EXEC_MODE_ENABLE = 1;
        const PROFILING_ENABLE = 1 << 1;
    }
}

impl CommandQueueProperties {
    #[inline]
    pub fn new() -> CommandQueueProperties {
        CommandQueueProperties::empty()
    }

    #[inline]
    pub fn out_of_order(self) -> CommandQueueProperties {
        self | CommandQueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE
    }

    #[inline]
    pub fn profiling(self) -> CommandQueueProperties {
        self | CommandQueueProperties::PROFILING_ENABLE
    }
}

impl Default for CommandQueueProperties {
    fn default() -> CommandQueueProperties {
        CommandQueueProperties::empty()
    }
}

bitflags! {
    /// Buffer mapping flags.
    pub struct MapFlags: u64 {
        const READ = 1;
        const WRITE = 1 << 1;
    }
}

bitflags! {
    /// Memory fence flags accepted by the in-kernel barrier builtin.
    pub struct MemFenceFlags: u32 {
        const LOCAL = 1;
        const GLOBAL = 1 << 1;
    }
}

bitflags! {
    /// Kinds of kernels a device can execute.
    pub struct DeviceExecCapabilities: u64 {
        const KERNEL = 1;
        const NATIVE_KERNEL = 1 << 1;
    }
}
