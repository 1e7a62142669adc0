//! The CPU device: capability surface, event FIFO and worker pool.

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::core::object::{new_object, Handle, Object, ObjectCore};
use crate::core::{Event, EventKind};
use crate::cpu::kernel::{CpuKernelEvent, GroupClaim};
use crate::cpu::worker;
use crate::error::{api_error, Result};
use crate::types::{CommandQueueProperties, DeviceExecCapabilities, ObjectType, Status};
use crate::MAX_WORK_DIMS;

/// Divisor search cap of the local-size heuristic, in multiples of the
/// core count.
const WORK_GROUP_SIZE_SLACK: usize = 32;

/// A mapped host pointer held as event device data.
pub struct SendPtr(NonNull<u8>);

unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}

impl SendPtr {
    pub(crate) fn new(ptr: NonNull<u8>) -> SendPtr {
        SendPtr(ptr)
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.0.as_ptr()
    }
}

/// Back-end scratch attached to an event by the device's event-data
/// initializer.
pub enum DeviceData {
    /// Work-group cursor and frame cache of a kernel launch.
    Kernel(CpuKernelEvent),
    /// The host pointer a map command returns.
    Mapping(SendPtr),
}

/// A non-owning event pointer carried through the device FIFO. The queue
/// owns every event until it reaches a terminal status and is swept, and
/// workers finish touching an event before making it terminal, so the
/// pointee outlives its time in the FIFO.
#[derive(Clone, Copy)]
pub(crate) struct EventRef(NonNull<Event>);

unsafe impl Send for EventRef {}

impl EventRef {
    fn new(event: &Event) -> EventRef {
        EventRef(NonNull::from(event))
    }

    pub(crate) unsafe fn get<'a>(self) -> &'a Event {
        &*self.0.as_ptr()
    }
}

/// What a worker pulled off the FIFO.
pub(crate) enum WorkerTask {
    /// A single-step event, removed from the FIFO.
    Single(EventRef),
    /// One claimed work-group of a kernel event; the event leaves the
    /// FIFO with its last claim.
    KernelGroup(EventRef, [usize; MAX_WORK_DIMS]),
}

struct DeviceFifo {
    events: VecDeque<EventRef>,
    stop: bool,
}

/// FIFO state shared between the device object and its workers. Workers
/// hold it through an `Arc` so a teardown racing a worker's final loop
/// iteration cannot pull the queue out from under it.
pub(crate) struct WorkerShared {
    fifo: Mutex<DeviceFifo>,
    fifo_cond: Condvar,
}

impl WorkerShared {
    /// Blocks until work or shutdown. Single-step events are removed on
    /// the spot; a kernel event stays at the head, handing one work-group
    /// to each caller, and leaves with its last claim.
    pub(crate) fn get_task(&self) -> Option<WorkerTask> {
        let mut fifo = self.fifo.lock().unwrap();

        loop {
            if fifo.stop {
                return None;
            }

            let head = match fifo.events.front() {
                Some(&head) => head,
                None => {
                    fifo = self.fifo_cond.wait(fifo).unwrap();
                    continue;
                }
            };

            let event = unsafe { head.get() };

            if matches!(event.kind(), EventKind::Kernel { .. }) {
                let launch = match event.device_data() {
                    Some(DeviceData::Kernel(launch)) => launch,
                    _ => unreachable!("kernel events carry their launch state"),
                };

                match launch.claim() {
                    Some(GroupClaim { index, last }) => {
                        if last {
                            fifo.events.pop_front();
                        }
                        return Some(WorkerTask::KernelGroup(head, index));
                    }
                    None => {
                        // Fully claimed by racing workers; drop it.
                        fifo.events.pop_front();
                        continue;
                    }
                }
            }

            fifo.events.pop_front();
            return Some(WorkerTask::Single(head));
        }
    }
}

/// The CPU device. Owns a pool of worker threads, one per logical CPU,
/// that drain the event FIFO.
pub struct CpuDevice {
    core: ObjectCore,
    num_cpus: usize,
    shared: Arc<WorkerShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

unsafe impl Object for CpuDevice {
    const TYPE: ObjectType = ObjectType::Device;

    fn object_core(&self) -> &ObjectCore {
        &self.core
    }
}

impl CpuDevice {
    /// Creates a device and starts its worker pool.
    pub fn create() -> Handle<CpuDevice> {
        let num_cpus = num_cpus_online();

        let shared = Arc::new(WorkerShared {
            fifo: Mutex::new(DeviceFifo { events: VecDeque::new(), stop: false }),
            fifo_cond: Condvar::new(),
        });

        let workers = (0..num_cpus)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || worker::worker_loop(&shared))
            })
            .collect();

        new_object(CpuDevice {
            core: ObjectCore::new(ObjectType::Device, None),
            num_cpus,
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Number of worker threads (and logical CPUs).
    pub fn num_cpus(&self) -> usize {
        self.num_cpus
    }

    pub fn max_compute_units(&self) -> usize {
        self.num_cpus
    }

    pub fn max_work_item_dimensions(&self) -> u32 {
        MAX_WORK_DIMS as u32
    }

    pub fn max_work_group_size(&self) -> usize {
        4096
    }

    pub fn max_work_item_sizes(&self) -> [usize; MAX_WORK_DIMS] {
        [4096; MAX_WORK_DIMS]
    }

    /// Base-address alignment requirement, in bits.
    pub fn mem_base_addr_align(&self) -> u32 {
        (crate::cpu::buffer::BUFFER_ALIGN * 8) as u32
    }

    /// (max width, max height, max depth) an image may have on this
    /// device.
    pub fn max_image_sizes(&self) -> (usize, usize, usize) {
        (8192, 8192, 2048)
    }

    pub fn exec_capabilities(&self) -> DeviceExecCapabilities {
        DeviceExecCapabilities::KERNEL | DeviceExecCapabilities::NATIVE_KERNEL
    }

    /// Resolution of the profiling clock, in nanoseconds.
    pub fn profiling_timer_resolution(&self) -> u64 {
        1
    }

    /// Queue properties this device accepts.
    pub fn queue_properties(&self) -> CommandQueueProperties {
        CommandQueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE
            | CommandQueueProperties::PROFILING_ENABLE
    }

    pub fn name(&self) -> &'static str {
        "CPU"
    }

    pub fn vendor(&self) -> &'static str {
        "softcl"
    }

    pub fn version(&self) -> &'static str {
        concat!("softcl ", env!("CARGO_PKG_VERSION"))
    }

    /// Picks a local size for one axis when the caller supplied none: the
    /// largest divisor of `global_size` no bigger than a small multiple
    /// of the core count, so the launch splits into enough groups to keep
    /// the pool busy without drowning it. Prime or tiny sizes degrade to
    /// single-item groups.
    pub fn guess_work_group_size(&self, _work_dim: u32, global_size: usize) -> usize {
        let cap = self.num_cpus * WORK_GROUP_SIZE_SLACK;

        if global_size <= cap {
            return global_size;
        }

        for candidate in (1..=cap).rev() {
            if global_size % candidate == 0 {
                return candidate;
            }
        }

        1
    }

    /// Prepares an event's device-side data at enqueue time: the mapped
    /// pointer of a map command, the patched argument block of a native
    /// kernel, the work-group cursor of a kernel launch.
    pub(crate) fn init_event_device_data(&self, event: &Handle<Event>) -> Result<()> {
        const FN: &str = "CpuDevice::init_event_device_data";

        let device = match event.parent_queue() {
            Some(queue) => queue.device(),
            None => return api_error(Status::InvalidCommandQueue, FN),
        };

        match *event.kind() {
            EventKind::MapBuffer { ref buffer, offset, .. } => {
                buffer.allocate(&device)?;
                let base = buffer
                    .device_data(&device)
                    .expect("allocation just succeeded");
                let mapped = unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) };
                event.set_device_data(DeviceData::Mapping(SendPtr::new(mapped)));
            }
            EventKind::NativeKernel { ref args, ref relocations, .. } => {
                let mut blob = args.lock().unwrap();

                for &(arg_offset, ref mem) in relocations.iter() {
                    mem.allocate(&device)?;
                    let ptr = mem
                        .device_data(&device)
                        .expect("allocation just succeeded")
                        .as_ptr() as usize;
                    blob[arg_offset..arg_offset + std::mem::size_of::<usize>()]
                        .copy_from_slice(&ptr.to_ne_bytes());
                }
            }
            EventKind::Kernel { .. } => {
                event.set_device_data(DeviceData::Kernel(CpuKernelEvent::new(event, device)));
            }
            _ => {}
        }

        Ok(())
    }

    /// Appends a submitted event to the FIFO and wakes a worker.
    pub(crate) fn push_event(&self, event: &Handle<Event>) {
        let mut fifo = self.shared.fifo.lock().unwrap();
        fifo.events.push_back(EventRef::new(event));
        self.shared.fifo_cond.notify_all();
    }
}

impl Drop for CpuDevice {
    fn drop(&mut self) {
        {
            let mut fifo = self.shared.fifo.lock().unwrap();
            fifo.stop = true;
            self.shared.fifo_cond.notify_all();
        }

        // A teardown cascading out of a worker's own final release cannot
        // join that worker; it exits on its own right after (it shares
        // the FIFO state through `shared`).
        let current = std::thread::current().id();

        for handle in self.workers.lock().unwrap().drain(..) {
            if handle.thread().id() != current {
                let _unused = handle.join();
            }
        }
    }
}

fn num_cpus_online() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 {
        1
    } else {
        n as usize
    }
}
