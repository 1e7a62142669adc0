//! Events: the unit of scheduled work.
//!
//! An event carries a command payload, a status that only ever advances
//! (`Queued` → `Submitted` → `Running` → `Complete`) or collapses once to
//! a negative error code, a retained wait list, four profiling
//! timestamps, and a multimap of callbacks keyed by status. Completion
//! re-enters the parent queue so now-unblocked successors can advance.

use std::collections::BTreeMap;
use std::os::raw::c_void;
use std::sync::{Condvar, Mutex, OnceLock};
use std::time::Instant;

use crate::core::object::{new_object, Handle, Object, ObjectCore};
use crate::core::{CommandQueue, Context, Kernel, MemObject};
use crate::cpu::DeviceData;
use crate::error::{api_error, Error, Result};
use crate::types::{
    CommandExecutionStatus, CommandType, MapFlags, ObjectType, ProfilingInfo, Status,
};
use crate::util::pitched_offset;
use crate::MAX_WORK_DIMS;

lazy_static! {
    /// Origin of the profiling clock. All timestamps are nanoseconds from
    /// this single monotonic point.
    static ref CLOCK_ORIGIN: Instant = Instant::now();
}

pub(crate) fn now_ns() -> u64 {
    CLOCK_ORIGIN.elapsed().as_nanos() as u64
}

/// Raw status value of [`CommandExecutionStatus::Complete`].
pub const COMPLETE: i32 = CommandExecutionStatus::Complete as i32;
/// Raw status value of [`CommandExecutionStatus::Queued`].
pub const QUEUED: i32 = CommandExecutionStatus::Queued as i32;
/// Raw status value of [`CommandExecutionStatus::Submitted`].
pub const SUBMITTED: i32 = CommandExecutionStatus::Submitted as i32;
/// Raw status value of [`CommandExecutionStatus::Running`].
pub const RUNNING: i32 = CommandExecutionStatus::Running as i32;

/// A native kernel: a host function invoked once on its argument block.
pub type NativeKernelFn = unsafe extern "C" fn(args: *mut c_void);

/// A status callback. Fires exactly once, with the event and its status
/// at firing time, while the event's state mutex is held — callbacks must
/// not call back into the queue on the same event.
pub type EventCallback = Box<dyn FnOnce(&Event, i32) + Send>;

/// The per-command payload of an event.
pub enum EventKind {
    ReadBuffer {
        buffer: Handle<MemObject>,
        offset: usize,
        size: usize,
        ptr: *mut u8,
    },
    WriteBuffer {
        buffer: Handle<MemObject>,
        offset: usize,
        size: usize,
        ptr: *const u8,
    },
    CopyBuffer {
        src: Handle<MemObject>,
        dst: Handle<MemObject>,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
    },
    ReadBufferRect(RectTransfer),
    WriteBufferRect(RectTransfer),
    MapBuffer {
        buffer: Handle<MemObject>,
        offset: usize,
        size: usize,
        flags: MapFlags,
    },
    UnmapMemObject {
        buffer: Handle<MemObject>,
        mapped_ptr: *mut u8,
    },
    ReadImage(ImageTransfer),
    WriteImage(ImageTransfer),
    CopyImage {
        src: Handle<MemObject>,
        dst: Handle<MemObject>,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        region: [usize; 3],
    },
    Kernel {
        kernel: Handle<Kernel>,
        work_dim: u32,
        global_offset: [usize; MAX_WORK_DIMS],
        global_size: [usize; MAX_WORK_DIMS],
        local_size: [usize; MAX_WORK_DIMS],
        /// Distinguishes a task (1×1 specialization) from an ND-range.
        task: bool,
    },
    NativeKernel {
        func: NativeKernelFn,
        args: Mutex<Vec<u8>>,
        relocations: Vec<(usize, Handle<MemObject>)>,
    },
    Marker,
    Barrier,
    WaitForEvents,
    User {
        context: Handle<Context>,
    },
}

/// Payload of a pitched three-axis buffer transfer.
pub struct RectTransfer {
    pub buffer: Handle<MemObject>,
    pub buffer_origin: [usize; 3],
    pub host_origin: [usize; 3],
    pub region: [usize; 3],
    pub buffer_row_pitch: usize,
    pub buffer_slice_pitch: usize,
    pub host_row_pitch: usize,
    pub host_slice_pitch: usize,
    pub ptr: *mut u8,
}

/// Payload of an image read or write.
pub struct ImageTransfer {
    pub image: Handle<MemObject>,
    pub origin: [usize; 3],
    pub region: [usize; 3],
    pub host_row_pitch: usize,
    pub host_slice_pitch: usize,
    pub ptr: *mut u8,
}

struct EventState {
    status: i32,
    timing: [Option<u64>; 4],
    callbacks: BTreeMap<i32, Vec<EventCallback>>,
}

/// The unit of scheduled work.
pub struct Event {
    core: ObjectCore,
    kind: EventKind,
    wait_list: Vec<Handle<Event>>,
    state: Mutex<EventState>,
    state_cond: Condvar,
    device_data: OnceLock<DeviceData>,
    /// Queues holding events blocked on this one, beyond the parent:
    /// user-event dependents and cross-queue waiters. Each is nudged when
    /// this event reaches a terminal status.
    dependent_queues: Mutex<Vec<Handle<CommandQueue>>>,
}

unsafe impl Send for Event {}
unsafe impl Sync for Event {}

unsafe impl Object for Event {
    const TYPE: ObjectType = ObjectType::Event;

    fn object_core(&self) -> &ObjectCore {
        &self.core
    }
}

impl Event {
    /// Common construction path: validates and retains the wait list,
    /// records user-event dependencies, links the parent queue.
    fn new_event(
        queue: Option<&Handle<CommandQueue>>,
        initial_status: i32,
        wait_list: &[Handle<Event>],
        kind: EventKind,
    ) -> Result<Handle<Event>> {
        for ev in wait_list {
            if ev.status() < 0 {
                return api_error(Status::ExecStatusErrorForEventsInWaitList, "Event::new");
            }
        }

        // A dependency living in another queue (or in none, for user
        // events) completes without ever nudging this queue; record the
        // reverse edge so its completion can.
        if let Some(queue) = queue {
            for ev in wait_list {
                let same_queue = ev
                    .parent_queue()
                    .map(|q| q == *queue)
                    .unwrap_or(false);

                if !same_queue {
                    let mut queues = ev.dependent_queues.lock().unwrap();
                    if !queues.iter().any(|q| q == queue) {
                        queues.push(queue.clone());
                    }
                }
            }
        }

        Ok(new_object(Event {
            core: ObjectCore::new(ObjectType::Event, queue.map(|q| q.raw())),
            kind,
            wait_list: wait_list.to_vec(),
            state: Mutex::new(EventState {
                status: initial_status,
                timing: [None; 4],
                callbacks: BTreeMap::new(),
            }),
            state_cond: Condvar::new(),
            device_data: OnceLock::new(),
            dependent_queues: Mutex::new(Vec::new()),
        }))
    }

    /// Validation shared by every event touching one memory object:
    /// context match, sub-buffer alignment, image limits, and the lazy
    /// allocation contract (the object is allocated on the queue's device
    /// before the event exists).
    fn check_buffer(
        queue: &Handle<CommandQueue>,
        buffer: &Handle<MemObject>,
        fn_name: &'static str,
    ) -> Result<()> {
        let q_ctx = queue.context();
        match buffer.context() {
            Some(ref ctx) if *ctx == q_ctx => {}
            _ => return api_error(Status::InvalidContext, fn_name),
        }

        let device = queue.device();

        if buffer.is_sub_buffer() {
            let align_bytes = ((device.mem_base_addr_align() / 8) as usize).max(1);
            if buffer.offset() % align_bytes != 0 {
                return api_error(Status::MisalignedSubBufferOffset, fn_name);
            }
        }

        if let Some((w, h, d, _, _, _)) = buffer.image_geometry() {
            let (max_w, max_h, max_d) = device.max_image_sizes();
            if w > max_w || h > max_h || d > max_d {
                return api_error(Status::InvalidImageSize, fn_name);
            }
        }

        if buffer.allocate(&device).is_err() {
            return api_error(Status::MemObjectAllocationFailure, fn_name);
        }

        Ok(())
    }

    pub fn read_buffer(
        queue: &Handle<CommandQueue>,
        buffer: &Handle<MemObject>,
        offset: usize,
        size: usize,
        ptr: *mut u8,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        const FN: &str = "Event::read_buffer";

        Event::check_buffer(queue, buffer, FN)?;
        if ptr.is_null() || offset + size > buffer.size() {
            return api_error(Status::InvalidValue, FN);
        }

        Event::new_event(
            Some(queue),
            QUEUED,
            wait_list,
            EventKind::ReadBuffer { buffer: buffer.clone(), offset, size, ptr },
        )
    }

    pub fn write_buffer(
        queue: &Handle<CommandQueue>,
        buffer: &Handle<MemObject>,
        offset: usize,
        size: usize,
        ptr: *const u8,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        const FN: &str = "Event::write_buffer";

        Event::check_buffer(queue, buffer, FN)?;
        if ptr.is_null() || offset + size > buffer.size() {
            return api_error(Status::InvalidValue, FN);
        }

        Event::new_event(
            Some(queue),
            QUEUED,
            wait_list,
            EventKind::WriteBuffer { buffer: buffer.clone(), offset, size, ptr },
        )
    }

    pub fn copy_buffer(
        queue: &Handle<CommandQueue>,
        src: &Handle<MemObject>,
        dst: &Handle<MemObject>,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        const FN: &str = "Event::copy_buffer";

        Event::check_buffer(queue, src, FN)?;
        Event::check_buffer(queue, dst, FN)?;

        if size == 0 || src_offset + size > src.size() || dst_offset + size > dst.size() {
            return api_error(Status::InvalidValue, FN);
        }

        if src == dst {
            let (lo, hi) = if src_offset <= dst_offset {
                (src_offset, dst_offset)
            } else {
                (dst_offset, src_offset)
            };
            if lo + size > hi {
                return api_error(Status::MemCopyOverlap, FN);
            }
        }

        Event::new_event(
            Some(queue),
            QUEUED,
            wait_list,
            EventKind::CopyBuffer {
                src: src.clone(),
                dst: dst.clone(),
                src_offset,
                dst_offset,
                size,
            },
        )
    }

    fn rect_bounds_ok(
        origin: &[usize; 3],
        region: &[usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
        total: usize,
    ) -> bool {
        if region.iter().any(|&r| r == 0) {
            return false;
        }
        let last = pitched_offset(
            origin[0] + region[0] - 1,
            origin[1] + region[1] - 1,
            origin[2] + region[2] - 1,
            row_pitch,
            slice_pitch,
            1,
        );
        last < total
    }

    /// Applies the zero-means-tightly-packed pitch defaults.
    fn normalize_pitches(
        region: &[usize; 3],
        row_pitch: &mut usize,
        slice_pitch: &mut usize,
        element_size: usize,
    ) {
        if *row_pitch == 0 {
            *row_pitch = region[0] * element_size;
        }
        if *slice_pitch == 0 {
            *slice_pitch = *row_pitch * region[1];
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn buffer_rect(
        queue: &Handle<CommandQueue>,
        buffer: &Handle<MemObject>,
        buffer_origin: [usize; 3],
        host_origin: [usize; 3],
        region: [usize; 3],
        mut buffer_row_pitch: usize,
        mut buffer_slice_pitch: usize,
        mut host_row_pitch: usize,
        mut host_slice_pitch: usize,
        ptr: *mut u8,
        wait_list: &[Handle<Event>],
        read: bool,
        fn_name: &'static str,
    ) -> Result<Handle<Event>> {
        Event::check_buffer(queue, buffer, fn_name)?;

        if ptr.is_null() {
            return api_error(Status::InvalidValue, fn_name);
        }

        Event::normalize_pitches(&region, &mut buffer_row_pitch, &mut buffer_slice_pitch, 1);
        Event::normalize_pitches(&region, &mut host_row_pitch, &mut host_slice_pitch, 1);

        if !Event::rect_bounds_ok(
            &buffer_origin,
            &region,
            buffer_row_pitch,
            buffer_slice_pitch,
            buffer.size(),
        ) {
            return api_error(Status::InvalidValue, fn_name);
        }

        let transfer = RectTransfer {
            buffer: buffer.clone(),
            buffer_origin,
            host_origin,
            region,
            buffer_row_pitch,
            buffer_slice_pitch,
            host_row_pitch,
            host_slice_pitch,
            ptr,
        };

        let kind = if read {
            EventKind::ReadBufferRect(transfer)
        } else {
            EventKind::WriteBufferRect(transfer)
        };

        Event::new_event(Some(queue), QUEUED, wait_list, kind)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn read_buffer_rect(
        queue: &Handle<CommandQueue>,
        buffer: &Handle<MemObject>,
        buffer_origin: [usize; 3],
        host_origin: [usize; 3],
        region: [usize; 3],
        buffer_row_pitch: usize,
        buffer_slice_pitch: usize,
        host_row_pitch: usize,
        host_slice_pitch: usize,
        ptr: *mut u8,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        Event::buffer_rect(
            queue,
            buffer,
            buffer_origin,
            host_origin,
            region,
            buffer_row_pitch,
            buffer_slice_pitch,
            host_row_pitch,
            host_slice_pitch,
            ptr,
            wait_list,
            true,
            "Event::read_buffer_rect",
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn write_buffer_rect(
        queue: &Handle<CommandQueue>,
        buffer: &Handle<MemObject>,
        buffer_origin: [usize; 3],
        host_origin: [usize; 3],
        region: [usize; 3],
        buffer_row_pitch: usize,
        buffer_slice_pitch: usize,
        host_row_pitch: usize,
        host_slice_pitch: usize,
        ptr: *const u8,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        Event::buffer_rect(
            queue,
            buffer,
            buffer_origin,
            host_origin,
            region,
            buffer_row_pitch,
            buffer_slice_pitch,
            host_row_pitch,
            host_slice_pitch,
            ptr as *mut u8,
            wait_list,
            false,
            "Event::write_buffer_rect",
        )
    }

    pub fn map_buffer(
        queue: &Handle<CommandQueue>,
        buffer: &Handle<MemObject>,
        flags: MapFlags,
        offset: usize,
        size: usize,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        const FN: &str = "Event::map_buffer";

        Event::check_buffer(queue, buffer, FN)?;

        if flags.is_empty() || offset + size > buffer.size() {
            return api_error(Status::InvalidValue, FN);
        }

        Event::new_event(
            Some(queue),
            QUEUED,
            wait_list,
            EventKind::MapBuffer { buffer: buffer.clone(), offset, size, flags },
        )
    }

    pub fn unmap(
        queue: &Handle<CommandQueue>,
        buffer: &Handle<MemObject>,
        mapped_ptr: *mut u8,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        const FN: &str = "Event::unmap";

        Event::check_buffer(queue, buffer, FN)?;

        if mapped_ptr.is_null() {
            return api_error(Status::InvalidValue, FN);
        }

        Event::new_event(
            Some(queue),
            QUEUED,
            wait_list,
            EventKind::UnmapMemObject { buffer: buffer.clone(), mapped_ptr },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn image_transfer(
        queue: &Handle<CommandQueue>,
        image: &Handle<MemObject>,
        origin: [usize; 3],
        region: [usize; 3],
        mut host_row_pitch: usize,
        mut host_slice_pitch: usize,
        ptr: *mut u8,
        wait_list: &[Handle<Event>],
        read: bool,
        fn_name: &'static str,
    ) -> Result<Handle<Event>> {
        Event::check_buffer(queue, image, fn_name)?;

        let (w, h, d, _, _, pixel_size) = match image.image_geometry() {
            Some(geom) => geom,
            None => return api_error(Status::InvalidMemObject, fn_name),
        };

        if ptr.is_null()
            || region.iter().any(|&r| r == 0)
            || origin[0] + region[0] > w
            || origin[1] + region[1] > h
            || origin[2] + region[2] > d
        {
            return api_error(Status::InvalidValue, fn_name);
        }

        Event::normalize_pitches(&region, &mut host_row_pitch, &mut host_slice_pitch, pixel_size);

        let transfer = ImageTransfer {
            image: image.clone(),
            origin,
            region,
            host_row_pitch,
            host_slice_pitch,
            ptr,
        };

        let kind = if read { EventKind::ReadImage(transfer) } else { EventKind::WriteImage(transfer) };

        Event::new_event(Some(queue), QUEUED, wait_list, kind)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn read_image(
        queue: &Handle<CommandQueue>,
        image: &Handle<MemObject>,
        origin: [usize; 3],
        region: [usize; 3],
        host_row_pitch: usize,
        host_slice_pitch: usize,
        ptr: *mut u8,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        Event::image_transfer(
            queue,
            image,
            origin,
            region,
            host_row_pitch,
            host_slice_pitch,
            ptr,
            wait_list,
            true,
            "Event::read_image",
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn write_image(
        queue: &Handle<CommandQueue>,
        image: &Handle<MemObject>,
        origin: [usize; 3],
        region: [usize; 3],
        host_row_pitch: usize,
        host_slice_pitch: usize,
        ptr: *const u8,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        Event::image_transfer(
            queue,
            image,
            origin,
            region,
            host_row_pitch,
            host_slice_pitch,
            ptr as *mut u8,
            wait_list,
            false,
            "Event::write_image",
        )
    }

    pub fn copy_image(
        queue: &Handle<CommandQueue>,
        src: &Handle<MemObject>,
        dst: &Handle<MemObject>,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        region: [usize; 3],
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        const FN: &str = "Event::copy_image";

        Event::check_buffer(queue, src, FN)?;
        Event::check_buffer(queue, dst, FN)?;

        let (sw, sh, sd, _, _, sp) = match src.image_geometry() {
            Some(geom) => geom,
            None => return api_error(Status::InvalidMemObject, FN),
        };
        let (dw, dh, dd, _, _, dp) = match dst.image_geometry() {
            Some(geom) => geom,
            None => return api_error(Status::InvalidMemObject, FN),
        };

        if sp != dp {
            return api_error(Status::InvalidValue, FN);
        }

        if region.iter().any(|&r| r == 0)
            || src_origin[0] + region[0] > sw
            || src_origin[1] + region[1] > sh
            || src_origin[2] + region[2] > sd
            || dst_origin[0] + region[0] > dw
            || dst_origin[1] + region[1] > dh
            || dst_origin[2] + region[2] > dd
        {
            return api_error(Status::InvalidValue, FN);
        }

        Event::new_event(
            Some(queue),
            QUEUED,
            wait_list,
            EventKind::CopyImage {
                src: src.clone(),
                dst: dst.clone(),
                src_origin,
                dst_origin,
                region,
            },
        )
    }

    /// An ND-range kernel launch. With no caller-supplied local size the
    /// device heuristic picks one per axis.
    pub fn kernel(
        queue: &Handle<CommandQueue>,
        kernel: &Handle<Kernel>,
        work_dim: u32,
        global_offset: Option<[usize; MAX_WORK_DIMS]>,
        global_size: [usize; MAX_WORK_DIMS],
        local_size: Option<[usize; MAX_WORK_DIMS]>,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        Event::kernel_inner(queue, kernel, work_dim, global_offset, global_size, local_size, wait_list, false)
    }

    /// A task: the 1×1 single-work-item kernel specialization.
    pub fn task(
        queue: &Handle<CommandQueue>,
        kernel: &Handle<Kernel>,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        Event::kernel_inner(queue, kernel, 1, None, [1, 1, 1], Some([1, 1, 1]), wait_list, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn kernel_inner(
        queue: &Handle<CommandQueue>,
        kernel: &Handle<Kernel>,
        work_dim: u32,
        global_offset: Option<[usize; MAX_WORK_DIMS]>,
        global_size: [usize; MAX_WORK_DIMS],
        local_size: Option<[usize; MAX_WORK_DIMS]>,
        wait_list: &[Handle<Event>],
        task: bool,
    ) -> Result<Handle<Event>> {
        const FN: &str = "Event::kernel";

        let device = queue.device();

        // Kernel and queue must share a context.
        let k_ctx = kernel.program().and_then(|p| p.context());
        match k_ctx {
            Some(ref ctx) if *ctx == queue.context() => {}
            _ => return api_error(Status::InvalidContext, FN),
        }

        if !kernel.args_specified() {
            return api_error(Status::InvalidKernelArgs, FN);
        }

        let max_dims = device.max_work_item_dimensions();
        if work_dim == 0 || work_dim > max_dims {
            return api_error(Status::InvalidWorkDimension, FN);
        }

        let dims = work_dim as usize;
        let max_item_sizes = device.max_work_item_sizes();
        let max_group_size = device.max_work_group_size();

        let global_offset = global_offset.unwrap_or([0; MAX_WORK_DIMS]);
        let mut resolved_local = [1usize; MAX_WORK_DIMS];
        let mut group_size = 1usize;

        for i in 0..dims {
            if global_size[i] == 0 {
                return api_error(Status::InvalidGlobalWorkSize, FN);
            }

            match local_size {
                None => {
                    resolved_local[i] = device.guess_work_group_size(work_dim, global_size[i]);
                }
                Some(local) => {
                    if global_size[i] % local[i] != 0 {
                        return api_error(Status::InvalidWorkGroupSize, FN);
                    }
                    if local[i] > max_item_sizes[i] {
                        return api_error(Status::InvalidWorkItemSize, FN);
                    }
                    resolved_local[i] = local[i];
                }
            }

            group_size *= resolved_local[i];
        }

        if group_size > max_group_size {
            return api_error(Status::InvalidWorkGroupSize, FN);
        }

        // Bind-time checks on the bound arguments: sub-buffer alignment
        // and image limits, and the allocation contract for every memory
        // object the launch will touch.
        for arg in kernel.args_snapshot() {
            if let Some(mem) = arg.mem() {
                Event::check_buffer(queue, mem, FN)?;
            }
        }

        Event::new_event(
            Some(queue),
            QUEUED,
            wait_list,
            EventKind::Kernel {
                kernel: kernel.clone(),
                work_dim,
                global_offset,
                global_size,
                local_size: resolved_local,
                task,
            },
        )
    }

    /// A native kernel: `func` invoked once on `args`, with each
    /// relocation slot patched to the corresponding buffer's device
    /// pointer before the call.
    pub fn native_kernel(
        queue: &Handle<CommandQueue>,
        func: NativeKernelFn,
        args: Vec<u8>,
        relocations: Vec<(usize, Handle<MemObject>)>,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        const FN: &str = "Event::native_kernel";

        if !queue
            .device()
            .exec_capabilities()
            .contains(crate::types::DeviceExecCapabilities::NATIVE_KERNEL)
        {
            return api_error(Status::InvalidOperation, FN);
        }

        if args.is_empty() && !relocations.is_empty() {
            return api_error(Status::InvalidValue, FN);
        }

        let ptr_size = std::mem::size_of::<usize>();
        for &(offset, _) in &relocations {
            if offset + ptr_size > args.len() {
                return api_error(Status::InvalidValue, FN);
            }
        }

        Event::new_event(
            Some(queue),
            QUEUED,
            wait_list,
            EventKind::NativeKernel { func, args: Mutex::new(args), relocations },
        )
    }

    pub fn marker(queue: &Handle<CommandQueue>) -> Result<Handle<Event>> {
        Event::new_event(Some(queue), QUEUED, &[], EventKind::Marker)
    }

    pub fn barrier(queue: &Handle<CommandQueue>) -> Result<Handle<Event>> {
        Event::new_event(Some(queue), QUEUED, &[], EventKind::Barrier)
    }

    pub fn wait_for_events(
        queue: &Handle<CommandQueue>,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        if wait_list.is_empty() {
            return api_error(Status::InvalidEventWaitList, "Event::wait_for_events");
        }
        Event::new_event(Some(queue), QUEUED, wait_list, EventKind::WaitForEvents)
    }

    /// A user event: no parent queue, starts `Submitted`, completed (or
    /// failed) explicitly by the host.
    pub fn user(context: &Handle<Context>) -> Result<Handle<Event>> {
        Event::new_event(
            None,
            SUBMITTED,
            &[],
            EventKind::User { context: context.clone() },
        )
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn command_type(&self) -> CommandType {
        match self.kind {
            EventKind::ReadBuffer { .. } => CommandType::ReadBuffer,
            EventKind::WriteBuffer { .. } => CommandType::WriteBuffer,
            EventKind::CopyBuffer { .. } => CommandType::CopyBuffer,
            EventKind::ReadBufferRect(_) => CommandType::ReadBufferRect,
            EventKind::WriteBufferRect(_) => CommandType::WriteBufferRect,
            EventKind::MapBuffer { .. } => CommandType::MapBuffer,
            EventKind::UnmapMemObject { .. } => CommandType::UnmapMemObject,
            EventKind::ReadImage(_) => CommandType::ReadImage,
            EventKind::WriteImage(_) => CommandType::WriteImage,
            EventKind::CopyImage { .. } => CommandType::CopyImage,
            EventKind::Kernel { task: false, .. } => CommandType::NdRangeKernel,
            EventKind::Kernel { task: true, .. } => CommandType::Task,
            EventKind::NativeKernel { .. } => CommandType::NativeKernel,
            EventKind::Marker => CommandType::Marker,
            EventKind::Barrier => CommandType::Barrier,
            EventKind::WaitForEvents => CommandType::WaitForEvents,
            EventKind::User { .. } => CommandType::User,
        }
    }

    /// Dummy events have no device-side work and complete as soon as they
    /// reach the head of their queue.
    pub fn is_dummy(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Marker | EventKind::Barrier | EventKind::WaitForEvents | EventKind::User { .. }
        )
    }

    pub fn wait_list(&self) -> &[Handle<Event>] {
        &self.wait_list
    }

    pub fn parent_queue(&self) -> Option<Handle<CommandQueue>> {
        self.core.parent()?.upgrade::<CommandQueue>()
    }

    /// The context this event belongs to: its queue's for command events,
    /// the recorded one for user events.
    pub fn context(&self) -> Option<Handle<Context>> {
        match self.kind {
            EventKind::User { ref context, .. } => Some(context.clone()),
            _ => self.parent_queue().map(|q| q.context()),
        }
    }

    /// The raw status: a `CommandExecutionStatus` value, or a negative
    /// error code once failed.
    pub fn status(&self) -> i32 {
        self.state.lock().unwrap().status
    }

    pub fn is_complete(&self) -> bool {
        self.status() == COMPLETE
    }

    /// Complete or failed.
    pub fn is_terminal(&self) -> bool {
        self.status() <= COMPLETE
    }

    /// The status as an enum, or the failure as an error.
    pub fn execution_status(&self) -> Result<CommandExecutionStatus> {
        use enum_primitive::FromPrimitive;

        let raw = self.status();
        match CommandExecutionStatus::from_i32(raw) {
            Some(status) => Ok(status),
            None => Err(Error::EventFailed(raw)),
        }
    }

    /// Moves the event to `status`, broadcasts the change, fires the
    /// matching callbacks, and — once terminal — re-enters the parent
    /// queue (or, for user events, every recorded dependent queue) so
    /// unblocked successors can advance.
    pub(crate) fn set_status(&self, status: i32) {
        #[cfg(feature = "event_debug_print")]
        println!(
            "softcl: event {:p} [{:?}] -> status {}",
            self,
            self.command_type(),
            status
        );

        {
            let mut state = self.state.lock().unwrap();
            state.status = status;
            self.state_cond.notify_all();

            // Fire callbacks registered at this status or any it has now
            // passed, earliest registration first within a key.
            let fire_from = status.max(COMPLETE);
            let keys: Vec<i32> = state
                .callbacks
                .range(fire_from..)
                .map(|(&k, _)| k)
                .collect();

            for key in keys.into_iter().rev() {
                if let Some(callbacks) = state.callbacks.remove(&key) {
                    for cb in callbacks {
                        cb(self, status);
                    }
                }
            }
        }

        if status <= COMPLETE {
            if let Some(queue) = self.parent_queue() {
                queue.push_events();
            }

            let dependents = self.dependent_queues.lock().unwrap().clone();
            for queue in dependents {
                queue.push_events();
            }
        }
    }

    /// Completes or fails a user event. Only the transition out of
    /// `Submitted` into a terminal status is legal.
    pub fn set_user_status(&self, status: i32) -> Result<()> {
        const FN: &str = "Event::set_user_status";

        match self.kind {
            EventKind::User { .. } => {}
            _ => return api_error(Status::InvalidEvent, FN),
        }

        if status > COMPLETE {
            return api_error(Status::InvalidValue, FN);
        }

        {
            let state = self.state.lock().unwrap();
            if state.status != SUBMITTED {
                return api_error(Status::InvalidOperation, FN);
            }
        }

        self.set_status(status);
        Ok(())
    }

    /// Registers `callback` to fire when `status` is reached. If the
    /// event already reached (or passed, or collapsed from) that status,
    /// the callback fires immediately.
    pub fn set_callback(&self, status: CommandExecutionStatus, callback: EventCallback) {
        let key = status as i32;
        let mut state = self.state.lock().unwrap();

        if state.status <= key {
            let current = state.status;
            drop(state);
            callback(self, current);
            return;
        }

        state.callbacks.entry(key).or_default().push(callback);
    }

    /// Blocks until the event is complete; a failed event surfaces its
    /// error code.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        while state.status > COMPLETE {
            state = self.state_cond.wait(state).unwrap();
        }

        if state.status < COMPLETE {
            return Err(Error::EventFailed(state.status));
        }

        Ok(())
    }

    /// Blocks until the event reaches `status` (or fails).
    pub fn wait_for_status(&self, status: CommandExecutionStatus) {
        let target = status as i32;
        let mut state = self.state.lock().unwrap();

        while state.status != target && state.status > COMPLETE {
            state = self.state_cond.wait(state).unwrap();
        }
    }

    /// Stamps `timing` with the monotonic clock, once; later calls are
    /// ignored (a kernel event's Start is stamped by its first worker
    /// only).
    pub fn update_timing(&self, timing: ProfilingInfo) {
        let mut state = self.state.lock().unwrap();
        let slot = &mut state.timing[timing as usize];

        if slot.is_none() {
            *slot = Some(now_ns());
        }
    }

    /// A profiling counter in nanoseconds. Unavailable until the event
    /// completes on a profiling-enabled queue; user events have none.
    pub fn profiling_info(&self, timing: ProfilingInfo) -> Result<u64> {
        const FN: &str = "Event::profiling_info";

        if matches!(self.kind, EventKind::User { .. }) {
            return api_error(Status::ProfilingInfoNotAvailable, FN);
        }

        let profiled = self
            .parent_queue()
            .map(|q| {
                q.properties()
                    .contains(crate::types::CommandQueueProperties::PROFILING_ENABLE)
            })
            .unwrap_or(false);

        if !profiled || !self.is_complete() {
            return api_error(Status::ProfilingInfoNotAvailable, FN);
        }

        let state = self.state.lock().unwrap();
        match state.timing[timing as usize] {
            Some(ns) => Ok(ns),
            None => api_error(Status::ProfilingInfoNotAvailable, FN),
        }
    }

    /// Back-end scratch attached by the device's event-data initializer.
    pub(crate) fn set_device_data(&self, data: DeviceData) {
        let _ = self.device_data.set(data);
    }

    pub(crate) fn device_data(&self) -> Option<&DeviceData> {
        self.device_data.get()
    }

    /// The mapped host pointer of a completed (or initialized) map
    /// command.
    pub fn map_ptr(&self) -> Option<*mut u8> {
        match self.device_data() {
            Some(DeviceData::Mapping(ptr)) => Some(ptr.as_ptr()),
            _ => None,
        }
    }
}
