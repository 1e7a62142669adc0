//! Memory objects: buffers, sub-buffers and images.
//!
//! A memory object owns one lazily-allocated backing buffer per device in
//! its context. Allocation happens on first use by a device (a transfer or
//! a kernel launch touching the object); `COPY_HOST_PTR` data is staged in
//! an owned copy which is released once every device has allocated.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::core::object::{new_object, Handle, Object, ObjectCore};
use crate::core::Context;
use crate::cpu::{CpuBuffer, CpuDevice};
use crate::error::{api_error, Result};
use crate::types::{ImageFormat, MemFlags, ObjectType, Status};

/// Callback invoked when a memory object is destroyed.
pub type MemDestructorCallback = Box<dyn FnOnce(usize) + Send>;

/// The per-variant payload of a memory object.
pub enum MemKind {
    Buffer {
        size: usize,
    },
    SubBuffer {
        parent: Handle<MemObject>,
        offset: usize,
        size: usize,
    },
    Image2d {
        format: ImageFormat,
        width: usize,
        height: usize,
        row_pitch: usize,
    },
    Image3d {
        format: ImageFormat,
        width: usize,
        height: usize,
        depth: usize,
        row_pitch: usize,
        slice_pitch: usize,
    },
}

struct DeviceBufferSlot {
    device: Handle<CpuDevice>,
    buffer: CpuBuffer,
    /// Whether this device has been counted against `devices_to_allocate`.
    counted: Mutex<bool>,
}

/// A buffer, sub-buffer or image, with per-device backing storage.
pub struct MemObject {
    core: ObjectCore,
    kind: MemKind,
    flags: MemFlags,
    host_ptr: *mut u8,
    /// Owned copy of the host data for deferred multi-device allocation.
    staging: Mutex<Option<Vec<u8>>>,
    devices_to_allocate: AtomicUsize,
    device_buffers: Vec<DeviceBufferSlot>,
    dtor_callbacks: Mutex<Vec<MemDestructorCallback>>,
}

unsafe impl Send for MemObject {}
unsafe impl Sync for MemObject {}

unsafe impl Object for MemObject {
    const TYPE: ObjectType = ObjectType::MemObject;

    fn object_core(&self) -> &ObjectCore {
        &self.core
    }
}

impl Drop for MemObject {
    fn drop(&mut self) {
        let callbacks = std::mem::take(&mut *self.dtor_callbacks.lock().unwrap());
        let addr = self as *const MemObject as usize;

        // Reverse registration order.
        for cb in callbacks.into_iter().rev() {
            cb(addr);
        }
    }
}

fn check_flags(flags: MemFlags, host_ptr: *mut u8, fn_name: &'static str) -> Result<()> {
    if flags.contains(MemFlags::ALLOC_HOST_PTR | MemFlags::USE_HOST_PTR)
        || flags.contains(MemFlags::COPY_HOST_PTR | MemFlags::USE_HOST_PTR)
    {
        return api_error(Status::InvalidValue, fn_name);
    }

    let wants_host_ptr = flags.intersects(MemFlags::USE_HOST_PTR | MemFlags::COPY_HOST_PTR);

    if wants_host_ptr && host_ptr.is_null() {
        return api_error(Status::InvalidHostPtr, fn_name);
    }

    if !wants_host_ptr && !host_ptr.is_null() {
        return api_error(Status::InvalidHostPtr, fn_name);
    }

    Ok(())
}

impl MemObject {
    fn build(
        context: &Handle<Context>,
        parent: Option<&Handle<MemObject>>,
        kind: MemKind,
        flags: MemFlags,
        host_ptr: *mut u8,
    ) -> Result<Handle<MemObject>> {
        let parent_raw = parent.map(|p| p.raw()).unwrap_or_else(|| context.raw());

        let device_buffers = context
            .devices()
            .iter()
            .map(|d| DeviceBufferSlot {
                device: d.clone(),
                buffer: CpuBuffer::new(),
                counted: Mutex::new(false),
            })
            .collect::<Vec<_>>();

        let num_devices = device_buffers.len();

        let mem = new_object(MemObject {
            core: ObjectCore::new(ObjectType::MemObject, Some(parent_raw)),
            kind,
            flags,
            host_ptr,
            staging: Mutex::new(None),
            devices_to_allocate: AtomicUsize::new(num_devices),
            device_buffers,
            dtor_callbacks: Mutex::new(Vec::new()),
        });

        // With several devices the allocations are deferred to first use,
        // past the point where the caller's host pointer may have gone
        // away. Stage a copy now so the lazy allocations have a source.
        if num_devices > 1 && flags.contains(MemFlags::COPY_HOST_PTR) {
            let src = unsafe { std::slice::from_raw_parts(host_ptr, mem.size()) };
            *mem.staging.lock().unwrap() = Some(src.to_vec());
        }

        // A single device can allocate immediately.
        if num_devices == 1 {
            let device = mem.device_buffers[0].device.clone();
            mem.allocate(&device)?;
        }

        Ok(mem)
    }

    /// Creates a buffer of `size` bytes.
    pub fn create_buffer(
        context: &Handle<Context>,
        flags: MemFlags,
        size: usize,
        host_ptr: *mut u8,
    ) -> Result<Handle<MemObject>> {
        check_flags(flags, host_ptr, "MemObject::create_buffer")?;

        if size == 0 {
            return api_error(Status::InvalidBufferSize, "MemObject::create_buffer");
        }

        MemObject::build(context, None, MemKind::Buffer { size }, flags, host_ptr)
    }

    /// Creates a sub-buffer: a view of `parent` at `offset`, sharing the
    /// parent's per-device storage.
    pub fn create_sub_buffer(
        parent: &Handle<MemObject>,
        flags: MemFlags,
        offset: usize,
        size: usize,
    ) -> Result<Handle<MemObject>> {
        const FN: &str = "MemObject::create_sub_buffer";

        let parent_size = match parent.kind {
            MemKind::Buffer { size } => size,
            _ => return api_error(Status::InvalidMemObject, FN),
        };

        if size == 0 || offset + size > parent_size {
            return api_error(Status::InvalidBufferSize, FN);
        }

        // A sub-buffer has no host pointer of its own.
        if flags.intersects(
            MemFlags::USE_HOST_PTR | MemFlags::ALLOC_HOST_PTR | MemFlags::COPY_HOST_PTR,
        ) {
            return api_error(Status::InvalidValue, FN);
        }

        // Access must not contradict the parent.
        let parent_flags = parent.flags;
        if parent_flags.contains(MemFlags::WRITE_ONLY)
            && flags.intersects(MemFlags::READ_WRITE | MemFlags::READ_ONLY)
        {
            return api_error(Status::InvalidValue, FN);
        }
        if parent_flags.contains(MemFlags::READ_ONLY)
            && flags.intersects(MemFlags::READ_WRITE | MemFlags::WRITE_ONLY)
        {
            return api_error(Status::InvalidValue, FN);
        }

        let context = parent
            .context()
            .expect("sub-buffer parent must outlive the context link");

        MemObject::build(
            &context,
            Some(parent),
            MemKind::SubBuffer { parent: parent.clone(), offset, size },
            flags,
            std::ptr::null_mut(),
        )
    }

    /// Creates a 2D image. A zero `row_pitch` defaults to the tightly
    /// packed width.
    pub fn create_image_2d(
        context: &Handle<Context>,
        flags: MemFlags,
        format: ImageFormat,
        width: usize,
        height: usize,
        row_pitch: usize,
        host_ptr: *mut u8,
    ) -> Result<Handle<MemObject>> {
        const FN: &str = "MemObject::create_image_2d";

        check_flags(flags, host_ptr, FN)?;

        let pixel_size = format.pixel_size();
        if pixel_size == 0 {
            return api_error(Status::InvalidImageFormatDescriptor, FN);
        }
        if width == 0 || height == 0 {
            return api_error(Status::InvalidImageSize, FN);
        }

        let row_pitch = if row_pitch == 0 { width * pixel_size } else { row_pitch };

        MemObject::build(
            context,
            None,
            MemKind::Image2d { format, width, height, row_pitch },
            flags,
            host_ptr,
        )
    }

    /// Creates a 3D image. Zero pitches default to tight packing.
    pub fn create_image_3d(
        context: &Handle<Context>,
        flags: MemFlags,
        format: ImageFormat,
        width: usize,
        height: usize,
        depth: usize,
        row_pitch: usize,
        slice_pitch: usize,
        host_ptr: *mut u8,
    ) -> Result<Handle<MemObject>> {
        const FN: &str = "MemObject::create_image_3d";

        check_flags(flags, host_ptr, FN)?;

        let pixel_size = format.pixel_size();
        if pixel_size == 0 {
            return api_error(Status::InvalidImageFormatDescriptor, FN);
        }
        if width == 0 || height == 0 || depth == 0 {
            return api_error(Status::InvalidImageSize, FN);
        }

        let row_pitch = if row_pitch == 0 { width * pixel_size } else { row_pitch };
        let slice_pitch = if slice_pitch == 0 { row_pitch * height } else { slice_pitch };

        MemObject::build(
            context,
            None,
            MemKind::Image3d { format, width, height, depth, row_pitch, slice_pitch },
            flags,
            host_ptr,
        )
    }

    pub fn kind(&self) -> &MemKind {
        &self.kind
    }

    pub fn flags(&self) -> MemFlags {
        self.flags
    }

    pub fn host_ptr(&self) -> *mut u8 {
        self.host_ptr
    }

    /// Device-independent size in bytes.
    pub fn size(&self) -> usize {
        match self.kind {
            MemKind::Buffer { size } => size,
            MemKind::SubBuffer { size, .. } => size,
            MemKind::Image2d { height, row_pitch, .. } => height * row_pitch,
            MemKind::Image3d { depth, slice_pitch, .. } => depth * slice_pitch,
        }
    }

    pub fn is_sub_buffer(&self) -> bool {
        matches!(self.kind, MemKind::SubBuffer { .. })
    }

    pub fn is_image(&self) -> bool {
        matches!(self.kind, MemKind::Image2d { .. } | MemKind::Image3d { .. })
    }

    /// Offset of a sub-buffer into its parent; zero for everything else.
    pub fn offset(&self) -> usize {
        match self.kind {
            MemKind::SubBuffer { offset, .. } => offset,
            _ => 0,
        }
    }

    /// The owning context (resolved through the object graph).
    pub fn context(&self) -> Option<Handle<Context>> {
        let mut link = self.core.parent()?;

        // Sub-buffers reach the context through their parent buffer.
        while link.object_type() == ObjectType::MemObject {
            let parent = link.upgrade::<MemObject>()?;
            link = parent.core.parent()?;
        }

        link.upgrade::<Context>()
    }

    fn slot(&self, device: &Handle<CpuDevice>) -> Option<&DeviceBufferSlot> {
        self.device_buffers.iter().find(|s| &s.device == device)
    }

    /// Lazily and idempotently allocates this object's storage on
    /// `device`. Sub-buffers allocate their parent first and bind a view
    /// into it.
    pub fn allocate(&self, device: &Handle<CpuDevice>) -> Result<()> {
        const FN: &str = "MemObject::allocate";

        let slot = match self.slot(device) {
            Some(s) => s,
            None => return api_error(Status::InvalidDevice, FN),
        };

        let newly_bound = match self.kind {
            MemKind::SubBuffer { ref parent, offset, .. } => {
                parent.allocate(device)?;
                let base = parent
                    .device_data(device)
                    .expect("parent allocation just succeeded");
                slot.buffer.bind_view(base, offset)
            }
            _ => {
                if self.flags.contains(MemFlags::USE_HOST_PTR) {
                    let ptr = NonNull::new(self.host_ptr)
                        .expect("USE_HOST_PTR checked non-null at creation");
                    slot.buffer.adopt_host_ptr(ptr)
                } else if self.flags.contains(MemFlags::COPY_HOST_PTR) {
                    let staging = self.staging.lock().unwrap();
                    let src_slice;
                    let src: &[u8] = match *staging {
                        Some(ref vec) => vec,
                        None => {
                            src_slice =
                                unsafe { std::slice::from_raw_parts(self.host_ptr, self.size()) };
                            src_slice
                        }
                    };
                    slot.buffer.allocate(self.size(), Some(src))?
                } else {
                    slot.buffer.allocate(self.size(), None)?
                }
            }
        };

        if newly_bound {
            self.device_allocated(slot);
        }

        Ok(())
    }

    /// Bookkeeping for the staged host copy: once every device has
    /// allocated, the staging copy has served its purpose.
    fn device_allocated(&self, slot: &DeviceBufferSlot) {
        let mut counted = slot.counted.lock().unwrap();
        if *counted {
            return;
        }
        *counted = true;

        let remaining = self.devices_to_allocate.fetch_sub(1, Ordering::AcqRel) - 1;

        if remaining == 0 && self.device_buffers.len() > 1 && self.flags.contains(MemFlags::COPY_HOST_PTR)
        {
            *self.staging.lock().unwrap() = None;
        }
    }

    /// The data pointer of this object's storage on `device`, if
    /// allocated.
    pub fn device_data(&self, device: &Handle<CpuDevice>) -> Option<NonNull<u8>> {
        self.slot(device).and_then(|s| s.buffer.data())
    }

    pub fn allocated_on(&self, device: &Handle<CpuDevice>) -> bool {
        self.device_data(device).is_some()
    }

    /// Registers a callback to run when this object is destroyed, invoked
    /// with the object's (then stale) raw address. Callbacks run in
    /// reverse registration order.
    pub fn set_destructor_callback(&self, callback: MemDestructorCallback) {
        self.dtor_callbacks.lock().unwrap().push(callback);
    }

    /// Geometry of an image object: (width, height, depth, row_pitch,
    /// slice_pitch, pixel_size). Depth is 1 and slice pitch spans the
    /// whole plane for 2D images.
    pub fn image_geometry(&self) -> Option<(usize, usize, usize, usize, usize, usize)> {
        match self.kind {
            MemKind::Image2d { format, width, height, row_pitch } => {
                Some((width, height, 1, row_pitch, row_pitch * height, format.pixel_size()))
            }
            MemKind::Image3d { format, width, height, depth, row_pitch, slice_pitch } => {
                Some((width, height, depth, row_pitch, slice_pitch, format.pixel_size()))
            }
            _ => None,
        }
    }
}
