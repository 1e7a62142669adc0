//! The command queue: per-device ordered (or unordered) event list.
//!
//! The queue owns the readiness scan: it walks its event list from the
//! head, submits ready events to the device, completes dummy events in
//! place, and fails events whose dependencies have failed. `flushed` is a
//! tentative decision revised during the walk — the queue is flushed when
//! nothing unsubmitted remains.

use std::sync::{Condvar, Mutex};

use crate::core::event::{COMPLETE, QUEUED, SUBMITTED};
use crate::core::object::{
    destroy_if_unreferenced, new_object, self_handle, Handle, Object, ObjectCore,
};
use crate::core::{Context, Event, EventKind};
use crate::cpu::CpuDevice;
use crate::error::{api_error, Result};
use crate::types::{CommandQueueProperties, ObjectType, ProfilingInfo, Status};

struct QueueState {
    events: Vec<Handle<Event>>,
    flushed: bool,
    properties: CommandQueueProperties,
}

/// A per-device command queue.
pub struct CommandQueue {
    core: ObjectCore,
    device: Handle<CpuDevice>,
    state: Mutex<QueueState>,
    state_cond: Condvar,
}

unsafe impl Object for CommandQueue {
    const TYPE: ObjectType = ObjectType::CommandQueue;

    fn object_core(&self) -> &ObjectCore {
        &self.core
    }
}

impl CommandQueue {
    /// Creates a queue bound to `device`, which must belong to `context`.
    pub fn create(
        context: &Handle<Context>,
        device: Handle<CpuDevice>,
        properties: CommandQueueProperties,
    ) -> Result<Handle<CommandQueue>> {
        const FN: &str = "CommandQueue::create";

        if !context.has_device(&device) {
            return api_error(Status::InvalidDevice, FN);
        }

        if !device.queue_properties().contains(properties) {
            return api_error(Status::InvalidQueueProperties, FN);
        }

        Ok(new_object(CommandQueue {
            core: ObjectCore::new(ObjectType::CommandQueue, Some(context.raw())),
            device,
            state: Mutex::new(QueueState {
                events: Vec::new(),
                flushed: true,
                properties,
            }),
            state_cond: Condvar::new(),
        }))
    }

    pub fn context(&self) -> Handle<Context> {
        self.core
            .parent()
            .and_then(|p| p.upgrade::<Context>())
            .expect("a queue's context outlives it")
    }

    pub fn device(&self) -> Handle<CpuDevice> {
        self.device.clone()
    }

    pub fn properties(&self) -> CommandQueueProperties {
        self.state.lock().unwrap().properties
    }

    /// Enables or disables `properties`, returning the previous set.
    /// Rejected when the device does not support the resulting mask.
    pub fn set_property(
        &self,
        properties: CommandQueueProperties,
        enable: bool,
    ) -> Result<CommandQueueProperties> {
        let mut state = self.state.lock().unwrap();
        let old = state.properties;

        let new = if enable { old | properties } else { old - properties };

        if !self.device.queue_properties().contains(new) {
            return api_error(Status::InvalidQueueProperties, "CommandQueue::set_property");
        }

        state.properties = new;
        Ok(old)
    }

    fn profiling_enabled(&self) -> bool {
        self.properties()
            .contains(CommandQueueProperties::PROFILING_ENABLE)
    }

    /// Enqueues `event`: the device initializes its per-event data first
    /// (failing fast on error), then the event is appended, stamped, and
    /// the readiness scan runs.
    pub fn enqueue(&self, event: &Handle<Event>) -> Result<()> {
        const FN: &str = "CommandQueue::enqueue";

        match event.parent_queue() {
            Some(ref q) if std::ptr::eq(&**q as *const CommandQueue, self) => {}
            _ => return api_error(Status::InvalidValue, FN),
        }

        self.device.init_event_device_data(event)?;

        {
            let mut state = self.state.lock().unwrap();
            state.events.push(event.clone());
            state.flushed = false;
        }

        if self.profiling_enabled() {
            event.update_timing(ProfilingInfo::Queued);
        }

        self.push_events();

        Ok(())
    }

    /// The readiness scan. Walks the event list from the head and, for
    /// each candidate still `Queued`:
    ///
    /// - in-order queues stop at the first non-terminal event that is not
    ///   the effective head;
    /// - a barrier anywhere but the head halts the walk;
    /// - an unsatisfied wait list skips the candidate (and halts the walk
    ///   entirely for wait-for-events markers);
    /// - a failed dependency fails the candidate with the distinguished
    ///   wait-list error;
    /// - ready device events are stamped, marked `Submitted` and pushed;
    ///   ready dummy events are completed with the queue unlocked, since
    ///   completion re-enters this scan.
    pub fn push_events(&self) {
        let mut failed: Vec<Handle<Event>> = Vec::new();
        let mut dummy_ready: Option<Handle<Event>> = None;

        {
            let mut state = self.state.lock().unwrap();
            let out_of_order = state
                .properties
                .contains(CommandQueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE);
            let profiling = state
                .properties
                .contains(CommandQueueProperties::PROFILING_ENABLE);

            // Assume we will submit everything; the walk revises this.
            let mut flushed = true;
            let mut first = true;

            for event in state.events.iter() {
                let status = event.status();

                // Terminal events await the sweep.
                if status <= COMPLETE {
                    continue;
                }

                // In-order: later events cannot overtake the head.
                if !out_of_order && !first {
                    flushed = false;
                    break;
                }

                // A barrier anywhere but the head blocks everything after
                // it.
                if matches!(event.kind(), EventKind::Barrier) && !first {
                    flushed = false;
                    break;
                }

                first = false;

                if status != QUEUED {
                    continue;
                }

                let mut blocked = false;
                let mut dep_failed = false;

                for dep in event.wait_list() {
                    let dep_status = dep.status();
                    if dep_status < COMPLETE {
                        dep_failed = true;
                        break;
                    }
                    if dep_status > COMPLETE {
                        blocked = true;
                        break;
                    }
                }

                if dep_failed {
                    failed.push(event.clone());
                    continue;
                }

                if blocked {
                    flushed = false;

                    // Nothing may pass an unsatisfied wait-for-events.
                    if matches!(event.kind(), EventKind::WaitForEvents) {
                        break;
                    }
                    continue;
                }

                if !event.is_dummy() {
                    if profiling {
                        event.update_timing(ProfilingInfo::Submit);
                    }
                    event.set_status(SUBMITTED);
                    self.device.push_event(event);
                } else {
                    // Completing the dummy re-enters this scan, which
                    // continues our work; hand off outside the lock.
                    dummy_ready = Some(event.clone());
                    break;
                }
            }

            state.flushed = flushed;

            if flushed && dummy_ready.is_none() {
                self.state_cond.notify_all();
            }
        }

        // Failing an event is a terminal transition, which nudges this
        // queue again on its own — successors and flush waiters observe
        // the collapse through that rescan.
        for event in &failed {
            event.set_status(Status::ExecStatusErrorForEventsInWaitList as i32);
        }

        if let Some(event) = dummy_ready {
            event.set_status(COMPLETE);
        }
    }

    /// Sweeps terminal events out of the list. An event destroyed by the
    /// sweep must not recursively destroy the queue sweeping it, so the
    /// release-parent flag is disabled when the sweep holds the last
    /// reference; afterwards the queue reaps itself if fully released.
    pub fn clean_events(&self) {
        let mut removed: Vec<Handle<Event>> = Vec::new();

        {
            let mut state = self.state.lock().unwrap();

            state.events.retain(|event| {
                if event.is_terminal() {
                    removed.push(event.clone());
                    false
                } else {
                    true
                }
            });

            if state.events.is_empty() {
                self.state_cond.notify_all();
            }
        }

        for event in removed {
            // Two handles exist here at minimum: ours and the list's
            // (already dropped by retain). references()==1 means ours is
            // the last and dropping it destroys the event.
            if event.references() == 1 {
                event.object_core().set_release_parent(false);
            }
            drop(event);
        }

        // Self-reap: the sweep may have released the queue's last
        // retaining events while every handle is already gone.
        destroy_if_unreferenced(unsafe { self_handle(self) });
    }

    /// Blocks until every queued event has been submitted to the device.
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap();

        while !state.flushed {
            state = self.state_cond.wait(state).unwrap();
        }
    }

    /// Blocks until the event list is empty. Terminal events are swept
    /// here (and again on every wakeup) since the scan leaves them in
    /// place.
    pub fn finish(&self) {
        loop {
            self.clean_events();

            let state = self.state.lock().unwrap();

            if state.events.is_empty() {
                return;
            }

            // Any progress broadcast wakes us to re-sweep.
            let _unused = self.state_cond.wait(state).unwrap();
        }
    }

    /// A retained snapshot of the live event list.
    pub fn events(&self) -> Vec<Handle<Event>> {
        self.state.lock().unwrap().events.clone()
    }

    /// Number of events currently in the list.
    pub fn num_events(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }
}

/// Construct-and-enqueue conveniences over the event constructors.
impl Handle<CommandQueue> {
    fn submit(&self, event: Handle<Event>) -> Result<Handle<Event>> {
        self.enqueue(&event)?;
        Ok(event)
    }

    /// # Safety
    ///
    /// `ptr` must stay valid for `size` bytes of writes until the event
    /// completes.
    pub unsafe fn enqueue_read_buffer(
        &self,
        buffer: &Handle<crate::core::MemObject>,
        offset: usize,
        size: usize,
        ptr: *mut u8,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        self.submit(Event::read_buffer(self, buffer, offset, size, ptr, wait_list)?)
    }

    /// # Safety
    ///
    /// `ptr` must stay valid for `size` bytes of reads until the event
    /// completes.
    pub unsafe fn enqueue_write_buffer(
        &self,
        buffer: &Handle<crate::core::MemObject>,
        offset: usize,
        size: usize,
        ptr: *const u8,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        self.submit(Event::write_buffer(self, buffer, offset, size, ptr, wait_list)?)
    }

    pub fn enqueue_copy_buffer(
        &self,
        src: &Handle<crate::core::MemObject>,
        dst: &Handle<crate::core::MemObject>,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        self.submit(
            Event::copy_buffer(self, src, dst, src_offset, dst_offset, size, wait_list)?,
        )
    }

    /// # Safety
    ///
    /// `ptr` must cover the host region described by the origins, region
    /// and pitches until the event completes.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn enqueue_read_buffer_rect(
        &self,
        buffer: &Handle<crate::core::MemObject>,
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
        self.submit(
            Event::read_buffer_rect(
                self,
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
            )?,
        )
    }

    /// # Safety
    ///
    /// `ptr` must cover the host region described by the origins, region
    /// and pitches until the event completes.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn enqueue_write_buffer_rect(
        &self,
        buffer: &Handle<crate::core::MemObject>,
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
        self.submit(
            Event::write_buffer_rect(
                self,
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
            )?,
        )
    }

    /// Returns the event and the mapped host pointer, which is valid once
    /// the event completes.
    pub fn enqueue_map_buffer(
        &self,
        buffer: &Handle<crate::core::MemObject>,
        flags: crate::types::MapFlags,
        offset: usize,
        size: usize,
        wait_list: &[Handle<Event>],
    ) -> Result<(Handle<Event>, *mut u8)> {
        let event = self.submit(
            Event::map_buffer(self, buffer, flags, offset, size, wait_list)?,
        )?;
        let ptr = event.map_ptr().expect("map event data set at enqueue");
        Ok((event, ptr))
    }

    pub fn enqueue_unmap(
        &self,
        buffer: &Handle<crate::core::MemObject>,
        mapped_ptr: *mut u8,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        self.submit(Event::unmap(self, buffer, mapped_ptr, wait_list)?)
    }

    /// # Safety
    ///
    /// `ptr` must cover the host pixel region until the event completes.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn enqueue_read_image(
        &self,
        image: &Handle<crate::core::MemObject>,
        origin: [usize; 3],
        region: [usize; 3],
        host_row_pitch: usize,
        host_slice_pitch: usize,
        ptr: *mut u8,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        self.submit(
            Event::read_image(
                self,
                image,
                origin,
                region,
                host_row_pitch,
                host_slice_pitch,
                ptr,
                wait_list,
            )?,
        )
    }

    /// # Safety
    ///
    /// `ptr` must cover the host pixel region until the event completes.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn enqueue_write_image(
        &self,
        image: &Handle<crate::core::MemObject>,
        origin: [usize; 3],
        region: [usize; 3],
        host_row_pitch: usize,
        host_slice_pitch: usize,
        ptr: *const u8,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        self.submit(
            Event::write_image(
                self,
                image,
                origin,
                region,
                host_row_pitch,
                host_slice_pitch,
                ptr,
                wait_list,
            )?,
        )
    }

    pub fn enqueue_copy_image(
        &self,
        src: &Handle<crate::core::MemObject>,
        dst: &Handle<crate::core::MemObject>,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        region: [usize; 3],
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        self.submit(
            Event::copy_image(self, src, dst, src_origin, dst_origin, region, wait_list)?,
        )
    }

    /// Launches an ND-range kernel.
    ///
    /// # Safety
    ///
    /// Kernel code is untrusted by nature; the bound arguments must match
    /// what the kernel actually dereferences.
    pub unsafe fn enqueue_kernel(
        &self,
        kernel: &Handle<crate::core::Kernel>,
        work_dim: u32,
        global_offset: Option<[usize; crate::MAX_WORK_DIMS]>,
        global_size: [usize; crate::MAX_WORK_DIMS],
        local_size: Option<[usize; crate::MAX_WORK_DIMS]>,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        self.submit(
            Event::kernel(self, kernel, work_dim, global_offset, global_size, local_size, wait_list)?,
        )
    }

    /// Launches a task (single work-item kernel).
    ///
    /// # Safety
    ///
    /// See [`CommandQueue::enqueue_kernel`].
    pub unsafe fn enqueue_task(
        &self,
        kernel: &Handle<crate::core::Kernel>,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        self.submit(Event::task(self, kernel, wait_list)?)
    }

    /// # Safety
    ///
    /// `func` must treat its argument block per the relocation contract.
    pub unsafe fn enqueue_native_kernel(
        &self,
        func: crate::core::NativeKernelFn,
        args: Vec<u8>,
        relocations: Vec<(usize, Handle<crate::core::MemObject>)>,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        self.submit(Event::native_kernel(self, func, args, relocations, wait_list)?)
    }

    pub fn enqueue_marker(&self) -> Result<Handle<Event>> {
        self.submit(Event::marker(self)?)
    }

    pub fn enqueue_barrier(&self) -> Result<Handle<Event>> {
        self.submit(Event::barrier(self)?)
    }

    pub fn enqueue_wait_for_events(
        &self,
        wait_list: &[Handle<Event>],
    ) -> Result<Handle<Event>> {
        self.submit(Event::wait_for_events(self, wait_list)?)
    }
}
