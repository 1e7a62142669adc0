//! The kernel work-group engine.
//!
//! A kernel launch walks its work-groups through a shared cursor; each
//! work-group walks its work-items either in a simple loop or, once the
//! kernel hits a barrier, by switching cooperatively between per-item
//! stackful contexts. Kernel arguments are lowered once per launch into a
//! call frame (rebuilt per group when local scratch is involved) and the
//! JIT-resolved entry point is invoked with it.

use std::cell::{Cell, UnsafeCell};
use std::mem;
use std::os::raw::c_void;
use std::sync::{Arc, Mutex};

use crate::core::object::Handle;
use crate::core::program::KernelFn;
use crate::core::{Event, EventKind, Kernel};
use crate::cpu::buffer::AlignedAlloc;
use crate::cpu::{builtins, CpuDevice};
use crate::error::{api_error, Result};
use crate::types::{AddressSpace, ArgKind, Status};
use crate::util::{inc_vec, vec_product};
use crate::MAX_WORK_DIMS;

/// Stack bytes handed to each suspended work-item context.
const WORK_ITEM_STACK_SIZE: usize = 1 << 16;

/// The image argument descriptor handed to kernels: enough geometry to
/// address any pixel of the image's device storage.
#[repr(C)]
pub struct ImageDescriptor {
    pub data: *mut u8,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub row_pitch: usize,
    pub slice_pitch: usize,
    pub pixel_size: usize,
}

/// A lowered argument frame: one slot per kernel argument.
///
/// Global and constant buffers become their device data pointer, local
/// buffers become freshly allocated scratch, images become a pointer to
/// an [`ImageDescriptor`], and scalars/vectors/samplers become a pointer
/// to their inline bytes.
pub struct KernelFrame {
    slots: Vec<*const c_void>,
    scalars: Vec<Box<[u8]>>,
    images: Vec<Box<ImageDescriptor>>,
    locals: Vec<AlignedAlloc>,
    entry: KernelFn,
}

unsafe impl Send for KernelFrame {}
unsafe impl Sync for KernelFrame {}

impl KernelFrame {
    /// Lowers the kernel's bound arguments for execution on `device`.
    /// Memory objects touched by the launch are allocated here if a
    /// transfer has not already done so.
    fn build(kernel: &Kernel, device: &Handle<CpuDevice>) -> Result<KernelFrame> {
        const FN: &str = "KernelFrame::build";

        let args = kernel.args_snapshot();
        let mut frame = KernelFrame {
            slots: Vec::with_capacity(args.len()),
            scalars: Vec::new(),
            images: Vec::new(),
            locals: Vec::new(),
            entry: kernel.def().entry(),
        };

        for arg in &args {
            if !arg.is_set() {
                return api_error(Status::InvalidKernelArgs, FN);
            }

            let slot: *const c_void = match arg.kind() {
                ArgKind::Buffer if arg.address_space() == AddressSpace::Local => {
                    let scratch = match AlignedAlloc::new(arg.runtime_alloc()) {
                        Some(a) => a,
                        None => return api_error(Status::MemObjectAllocationFailure, FN),
                    };
                    let ptr = scratch.as_ptr() as *const c_void;
                    frame.locals.push(scratch);
                    ptr
                }
                ArgKind::Buffer => {
                    let mem = arg.mem().expect("set buffer arg carries a mem object");
                    mem.allocate(device)?;
                    mem.device_data(device)
                        .expect("allocation just succeeded")
                        .as_ptr() as *const c_void
                }
                ArgKind::Image2d | ArgKind::Image3d => {
                    let mem = arg.mem().expect("set image arg carries a mem object");
                    mem.allocate(device)?;
                    let data = mem
                        .device_data(device)
                        .expect("allocation just succeeded")
                        .as_ptr();
                    let (width, height, depth, row_pitch, slice_pitch, pixel_size) = mem
                        .image_geometry()
                        .expect("image arg validated at bind time");
                    let desc = Box::new(ImageDescriptor {
                        data,
                        width,
                        height,
                        depth,
                        row_pitch,
                        slice_pitch,
                        pixel_size,
                    });
                    let ptr = &*desc as *const ImageDescriptor as *const c_void;
                    frame.images.push(desc);
                    ptr
                }
                _ => {
                    let bytes: Box<[u8]> = arg.value().to_vec().into_boxed_slice();
                    let ptr = bytes.as_ptr() as *const c_void;
                    frame.scalars.push(bytes);
                    ptr
                }
            };

            frame.slots.push(slot);
        }

        Ok(frame)
    }

    /// Invokes the kernel entry point on this frame. The caller must have
    /// published the active work-group first.
    ///
    /// # Safety
    ///
    /// Kernel code is untrusted by nature; the frame must match the
    /// kernel's signature (guaranteed by construction from its own arg
    /// vector).
    unsafe fn call(&self) {
        (self.entry)(self.slots.as_ptr());
    }
}

struct Cursor {
    index: [usize; MAX_WORK_DIMS],
    issued: usize,
    finished: usize,
    /// First error any work-group hit; the launch collapses to it once
    /// the cursor drains.
    error: Option<i32>,
}

/// Per-launch scheduling state attached to a kernel event as its device
/// data: the work-group cursor plus the cached argument frame.
pub struct CpuKernelEvent {
    kernel: Handle<Kernel>,
    device: Handle<CpuDevice>,
    work_dim: usize,
    global_offset: [usize; MAX_WORK_DIMS],
    global_size: [usize; MAX_WORK_DIMS],
    local_size: [usize; MAX_WORK_DIMS],
    /// Per-axis highest group index (count minus one).
    max_groups: [usize; MAX_WORK_DIMS],
    num_groups: usize,
    has_locals: bool,
    cursor: Mutex<Cursor>,
    frame_cache: Mutex<Option<Arc<KernelFrame>>>,
}

/// A claim on one work-group.
pub(crate) struct GroupClaim {
    pub index: [usize; MAX_WORK_DIMS],
    /// Whether this claim exhausted the launch (the event can leave the
    /// device FIFO).
    pub last: bool,
}

impl CpuKernelEvent {
    /// Launch setup: derives the group geometry from the event's payload.
    pub(crate) fn new(event: &Event, device: Handle<CpuDevice>) -> CpuKernelEvent {
        let (kernel, work_dim, global_offset, global_size, local_size) = match *event.kind() {
            EventKind::Kernel {
                ref kernel,
                work_dim,
                global_offset,
                global_size,
                local_size,
                ..
            } => (kernel.clone(), work_dim as usize, global_offset, global_size, local_size),
            _ => unreachable!("kernel device data on a non-kernel event"),
        };

        let mut max_groups = [0usize; MAX_WORK_DIMS];
        let mut groups = [1usize; MAX_WORK_DIMS];

        for i in 0..work_dim {
            groups[i] = global_size[i] / local_size[i];
            max_groups[i] = groups[i] - 1;
        }

        let has_locals = kernel.has_locals();

        CpuKernelEvent {
            kernel,
            device,
            work_dim,
            global_offset,
            global_size,
            local_size,
            max_groups,
            num_groups: vec_product(work_dim, &groups),
            has_locals,
            cursor: Mutex::new(Cursor {
                index: [0; MAX_WORK_DIMS],
                issued: 0,
                finished: 0,
                error: None,
            }),
            frame_cache: Mutex::new(None),
        }
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn finished_groups(&self) -> usize {
        self.cursor.lock().unwrap().finished
    }

    /// Reserves the next work-group, recording whether it was the last to
    /// hand out.
    pub(crate) fn claim(&self) -> Option<GroupClaim> {
        let mut cursor = self.cursor.lock().unwrap();

        if cursor.issued == self.num_groups {
            return None;
        }

        let index = cursor.index;
        inc_vec(self.work_dim, &mut cursor.index, &self.max_groups);
        cursor.issued += 1;

        Some(GroupClaim { index, last: cursor.issued == self.num_groups })
    }

    /// Counts one finished group; true when it was the final one (the
    /// caller then owns the terminal transition).
    pub(crate) fn finish_group(&self) -> bool {
        let mut cursor = self.cursor.lock().unwrap();
        cursor.finished += 1;
        cursor.finished == self.num_groups
    }

    /// Records the first error a work-group hit.
    pub(crate) fn record_error(&self, code: i32) {
        let mut cursor = self.cursor.lock().unwrap();
        if cursor.error.is_none() {
            cursor.error = Some(code);
        }
    }

    pub(crate) fn error(&self) -> Option<i32> {
        self.cursor.lock().unwrap().error
    }

    /// The argument frame for one group: shared across the launch, unless
    /// the kernel takes local scratch, which is freshly allocated per
    /// group.
    fn frame(&self) -> Result<Arc<KernelFrame>> {
        if self.has_locals {
            return Ok(Arc::new(KernelFrame::build(&self.kernel, &self.device)?));
        }

        let mut cache = self.frame_cache.lock().unwrap();

        if let Some(ref frame) = *cache {
            return Ok(frame.clone());
        }

        let frame = Arc::new(KernelFrame::build(&self.kernel, &self.device)?);
        *cache = Some(frame.clone());
        Ok(frame)
    }
}

/// One work-item's suspended execution state.
struct WorkItemContext {
    local_id: [usize; MAX_WORK_DIMS],
    initialized: bool,
    finished: bool,
    uc: libc::ucontext_t,
}

/// The cooperative contexts of one work-group: one slot per work-item
/// (slot zero holds the group driver's own saved state) plus a contiguous
/// stack arena.
struct FiberArena {
    slots: Box<[WorkItemContext]>,
    stacks: AlignedAlloc,
}

impl FiberArena {
    fn new(num_items: usize, first_local_id: [usize; MAX_WORK_DIMS]) -> Option<FiberArena> {
        let mut slots = Vec::with_capacity(num_items);

        for _ in 0..num_items {
            // getcontext initializes the ucontext before any use.
            let mut slot: WorkItemContext = unsafe { mem::zeroed() };
            slot.initialized = false;
            slot.finished = false;
            slots.push(slot);
        }

        slots[0].local_id = first_local_id;
        slots[0].initialized = true;

        Some(FiberArena {
            slots: slots.into_boxed_slice(),
            stacks: AlignedAlloc::new(num_items * WORK_ITEM_STACK_SIZE)?,
        })
    }

    fn stack_of(&self, index: usize) -> *mut u8 {
        unsafe { self.stacks.as_ptr().add(index * WORK_ITEM_STACK_SIZE) }
    }
}

/// One work-group in flight on a worker thread.
///
/// Self-contained: every piece of geometry the builtins can ask for is
/// copied in at construction, so the thread-local active-group slot can
/// hold a plain pointer for the duration of [`WorkGroup::run`].
pub struct WorkGroup {
    work_dim: usize,
    group_index: [usize; MAX_WORK_DIMS],
    num_groups_by_axis: [usize; MAX_WORK_DIMS],
    global_offset: [usize; MAX_WORK_DIMS],
    global_size: [usize; MAX_WORK_DIMS],
    local_size: [usize; MAX_WORK_DIMS],
    /// Per-axis highest local id.
    max_local_id: [usize; MAX_WORK_DIMS],
    /// Global id of this group's (0, …, 0) work-item.
    global_id_start: [usize; MAX_WORK_DIMS],
    num_items: usize,
    frame: Arc<KernelFrame>,
    // Work-item walk state. The kernel mutates these through the
    // thread-local group pointer while `run` is on the stack, hence the
    // interior mutability.
    current_item: Cell<usize>,
    had_barrier: Cell<bool>,
    dummy_local_id: Cell<[usize; MAX_WORK_DIMS]>,
    fibers: UnsafeCell<Option<FiberArena>>,
}

impl WorkGroup {
    pub(crate) fn new(launch: &CpuKernelEvent, group_index: [usize; MAX_WORK_DIMS]) -> Result<WorkGroup> {
        let dims = launch.work_dim;
        let mut max_local_id = [0usize; MAX_WORK_DIMS];
        let mut global_id_start = [0usize; MAX_WORK_DIMS];
        let mut num_groups_by_axis = [1usize; MAX_WORK_DIMS];

        for i in 0..dims {
            max_local_id[i] = launch.local_size[i] - 1;
            global_id_start[i] =
                group_index[i] * launch.local_size[i] + launch.global_offset[i];
            num_groups_by_axis[i] = launch.max_groups[i] + 1;
        }

        Ok(WorkGroup {
            work_dim: dims,
            group_index,
            num_groups_by_axis,
            global_offset: launch.global_offset,
            global_size: launch.global_size,
            local_size: launch.local_size,
            max_local_id,
            global_id_start,
            num_items: vec_product(dims, &launch.local_size),
            frame: launch.frame()?,
            current_item: Cell::new(0),
            had_barrier: Cell::new(false),
            dummy_local_id: Cell::new([0; MAX_WORK_DIMS]),
            fibers: UnsafeCell::new(None),
        })
    }

    /// Runs every work-item of this group to completion.
    ///
    /// Fast path: the work-items are invoked back to back in this thread's
    /// own context, carrying the local-id vector between calls. The first
    /// barrier switches the group over to cooperative contexts (see
    /// [`WorkGroup::barrier`]); the remaining items are then resumed in
    /// order until each has finished.
    pub(crate) fn run(&self) -> Result<()> {
        builtins::set_active_work_group(Some(self));

        loop {
            unsafe { self.frame.call() };

            if self.had_barrier.get() {
                break;
            }

            let mut id = self.dummy_local_id.get();
            let overflowed = inc_vec(self.work_dim, &mut id, &self.max_local_id);
            self.dummy_local_id.set(id);

            if overflowed {
                break;
            }
        }

        if self.had_barrier.get() {
            // Work-item zero has just finished; resume every remaining
            // suspended item until it runs out too. Finished items return
            // here through their context's successor link. No borrow may
            // live across a context switch, so the slot pointers are
            // re-derived each round.
            for i in 1..self.num_items {
                let (skip, driver, item) = unsafe {
                    let arena = (*self.fibers.get())
                        .as_mut()
                        .expect("a barrier initializes the context arena");
                    let skip = arena.slots[i].finished || !arena.slots[i].initialized;
                    let driver = &mut arena.slots[0].uc as *mut libc::ucontext_t;
                    let item = &mut arena.slots[i].uc as *mut libc::ucontext_t;
                    (skip, driver, item)
                };

                if skip {
                    continue;
                }

                self.current_item.set(i);
                unsafe { libc::swapcontext(driver, item) };
            }
        }

        builtins::set_active_work_group(None);
        Ok(())
    }

    pub fn work_dim(&self) -> u32 {
        self.work_dim as u32
    }

    fn axis_ok(&self, dim: u32) -> bool {
        (dim as usize) < self.work_dim
    }

    /// The executing work-item's local id along `dim`.
    pub fn local_id(&self, dim: u32) -> usize {
        if !self.axis_ok(dim) {
            return 0;
        }

        let arena = unsafe { &*self.fibers.get() };
        match arena {
            Some(arena) => arena.slots[self.current_item.get()].local_id[dim as usize],
            None => self.dummy_local_id.get()[dim as usize],
        }
    }

    pub fn global_id(&self, dim: u32) -> usize {
        if !self.axis_ok(dim) {
            return 0;
        }
        self.global_id_start[dim as usize] + self.local_id(dim)
    }

    pub fn global_size(&self, dim: u32) -> usize {
        if !self.axis_ok(dim) {
            return 1;
        }
        self.global_size[dim as usize]
    }

    pub fn local_size(&self, dim: u32) -> usize {
        if !self.axis_ok(dim) {
            return 1;
        }
        self.local_size[dim as usize]
    }

    pub fn group_id(&self, dim: u32) -> usize {
        if !self.axis_ok(dim) {
            return 0;
        }
        self.group_index[dim as usize]
    }

    pub fn num_groups(&self, dim: u32) -> usize {
        if !self.axis_ok(dim) {
            return 1;
        }
        self.num_groups_by_axis[dim as usize]
    }

    pub fn global_offset(&self, dim: u32) -> usize {
        if !self.axis_ok(dim) {
            return 0;
        }
        self.global_offset[dim as usize]
    }

    /// The in-kernel barrier: yields this work-item and switches to the
    /// next one, lazily giving it a fresh context on its first arrival.
    /// The wrap back to work-item zero only happens after every item has
    /// reached the barrier, which resumes it past the barrier — the
    /// ordering the programming model demands. Memory fences are implied
    /// by the switch itself: the group's items share one thread.
    pub fn barrier(&self, _flags: crate::types::MemFenceFlags) {
        self.had_barrier.set(true);

        if self.num_items == 1 {
            return;
        }

        let current = self.current_item.get();
        let next = (current + 1) % self.num_items;

        let (from, to) = unsafe {
            let arena_slot = &mut *self.fibers.get();

            if arena_slot.is_none() {
                *arena_slot = Some(
                    FiberArena::new(self.num_items, self.dummy_local_id.get())
                        .expect("work-item context arena allocation"),
                );
            }

            let arena = arena_slot.as_mut().unwrap();

            if next != 0 && !arena.slots[next].initialized {
                // First arrival: set up a fresh context one local id past
                // the current one, entering through the work-item shim. A
                // context that runs to completion falls through to the
                // driver's saved state in slot zero.
                let mut local_id = arena.slots[current].local_id;
                inc_vec(self.work_dim, &mut local_id, &self.max_local_id);

                let link: *mut libc::ucontext_t = &mut arena.slots[0].uc;
                let stack = arena.stack_of(next);

                let slot = &mut arena.slots[next];
                slot.local_id = local_id;
                slot.initialized = true;

                libc::getcontext(&mut slot.uc);
                slot.uc.uc_stack.ss_sp = stack as *mut c_void;
                slot.uc.uc_stack.ss_size = WORK_ITEM_STACK_SIZE;
                slot.uc.uc_stack.ss_flags = 0;
                slot.uc.uc_link = link;
                libc::makecontext(&mut slot.uc, work_item_entry, 0);
            }

            let from = &mut arena.slots[current].uc as *mut libc::ucontext_t;
            let to = &mut arena.slots[next].uc as *mut libc::ucontext_t;
            (from, to)
        };

        self.current_item.set(next);

        unsafe { libc::swapcontext(from, to) };
    }

    /// Body of a non-zero work-item's context: one trampoline call for
    /// its local id, then a finished mark. Returning lands in the group
    /// driver via the context's successor link.
    fn run_work_item(&self) {
        unsafe { self.frame.call() };

        let arena = unsafe { &mut *self.fibers.get() }
            .as_mut()
            .expect("work-item contexts exist while one is running");
        arena.slots[self.current_item.get()].finished = true;
    }
}

/// Context entry shim: resolves the active group from worker-thread-local
/// state (a `makecontext` entry cannot carry a pointer portably).
extern "C" fn work_item_entry() {
    let group = builtins::active_work_group()
        .expect("work-item context runs with its group published");
    group.run_work_item();
}
