//! Per-device backing storage for memory objects.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::error::{api_error, Result};
use crate::types::Status;

/// Alignment of every device allocation, in bytes. Matches the device's
/// reported base-address alignment.
pub const BUFFER_ALIGN: usize = 16;

/// A zero-initialized, 16-byte-aligned heap allocation.
pub(crate) struct AlignedAlloc {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for AlignedAlloc {}
unsafe impl Sync for AlignedAlloc {}

impl AlignedAlloc {
    pub(crate) fn new(size: usize) -> Option<AlignedAlloc> {
        let layout = Layout::from_size_align(size.max(1), BUFFER_ALIGN).ok()?;
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?;
        Some(AlignedAlloc { ptr, layout })
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for AlignedAlloc {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[derive(Default)]
struct CpuBufferState {
    /// Address handed to transfers and kernels once allocated.
    data: Option<NonNull<u8>>,
    /// Present when the storage is owned by this buffer (not a host
    /// pointer and not a view into a parent allocation).
    owned: Option<AlignedAlloc>,
}

unsafe impl Send for CpuBufferState {}

/// The CPU rendition of a device buffer: storage is a plain allocation,
/// a borrowed host pointer, or a pointer-derived view into the parent
/// buffer's storage (sub-buffers).
pub struct CpuBuffer {
    state: Mutex<CpuBufferState>,
}

impl CpuBuffer {
    pub(crate) fn new() -> CpuBuffer {
        CpuBuffer { state: Mutex::new(CpuBufferState::default()) }
    }

    /// Data pointer, if allocated.
    pub fn data(&self) -> Option<NonNull<u8>> {
        self.state.lock().unwrap().data
    }

    pub fn allocated(&self) -> bool {
        self.data().is_some()
    }

    /// Idempotently allocates `size` bytes, copying from `init` when
    /// given. Returns `true` when this call performed the allocation.
    pub(crate) fn allocate(&self, size: usize, init: Option<&[u8]>) -> Result<bool> {
        if size == 0 {
            return api_error(Status::MemObjectAllocationFailure, "CpuBuffer::allocate");
        }

        let mut state = self.state.lock().unwrap();

        if state.data.is_some() {
            return Ok(false);
        }

        let alloc = match AlignedAlloc::new(size) {
            Some(a) => a,
            None => return api_error(Status::MemObjectAllocationFailure, "CpuBuffer::allocate"),
        };

        if let Some(src) = init {
            debug_assert!(src.len() <= size);
            unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr(), alloc.ptr.as_ptr(), src.len());
            }
        }

        state.data = Some(alloc.ptr);
        state.owned = Some(alloc);

        Ok(true)
    }

    /// Adopts a caller-owned host pointer as the storage (`USE_HOST_PTR`).
    /// Returns `true` when this call bound the pointer.
    pub(crate) fn adopt_host_ptr(&self, ptr: NonNull<u8>) -> bool {
        let mut state = self.state.lock().unwrap();

        if state.data.is_some() {
            return false;
        }

        state.data = Some(ptr);
        true
    }

    /// Binds this buffer to a view at `base + offset` (sub-buffers share
    /// the parent's storage). Returns `true` when this call bound it.
    pub(crate) fn bind_view(&self, base: NonNull<u8>, offset: usize) -> bool {
        let mut state = self.state.lock().unwrap();

        if state.data.is_some() {
            return false;
        }

        let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) };
        state.data = Some(ptr);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_idempotent_and_zeroed() {
        let buf = CpuBuffer::new();
        assert!(!buf.allocated());

        assert!(buf.allocate(32, None).unwrap());
        let ptr = buf.data().unwrap();
        assert_eq!(ptr.as_ptr() as usize % BUFFER_ALIGN, 0);
        assert_eq!(unsafe { *ptr.as_ptr() }, 0);

        assert!(!buf.allocate(32, None).unwrap());
        assert_eq!(buf.data().unwrap(), ptr);
    }

    #[test]
    fn allocation_copies_initial_contents() {
        let buf = CpuBuffer::new();
        buf.allocate(4, Some(b"abcd")).unwrap();
        let ptr = buf.data().unwrap().as_ptr();
        let copied = unsafe { std::slice::from_raw_parts(ptr, 4) };
        assert_eq!(copied, b"abcd");
    }

    #[test]
    fn views_are_offset_into_the_parent() {
        let parent = CpuBuffer::new();
        parent.allocate(64, None).unwrap();
        let base = parent.data().unwrap();

        let sub = CpuBuffer::new();
        assert!(sub.bind_view(base, 16));
        assert_eq!(sub.data().unwrap().as_ptr() as usize, base.as_ptr() as usize + 16);
    }
}
