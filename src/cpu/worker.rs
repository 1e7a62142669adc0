//! The worker thread body: pull, dispatch, complete.

use std::os::raw::c_void;
use std::panic::{self, AssertUnwindSafe};

use crate::core::event::{COMPLETE, RUNNING, SUBMITTED};
use crate::core::object::{retain_handle, Handle};
use crate::core::{Event, EventKind, MemObject};
use crate::cpu::device::{DeviceData, WorkerShared, WorkerTask};
use crate::cpu::kernel::WorkGroup;
use crate::cpu::CpuDevice;
use crate::error::{Error, Result};
use crate::types::{CommandQueueProperties, ProfilingInfo, Status};
use crate::util::pitched_offset;

pub(crate) fn worker_loop(shared: &WorkerShared) {
    loop {
        let task = match shared.get_task() {
            Some(task) => task,
            None => break,
        };

        let (event_ref, group_index) = match task {
            WorkerTask::Single(event) => (event, None),
            WorkerTask::KernelGroup(event, index) => (event, Some(index)),
        };

        // Event and queue are retained for the whole dispatch: the event
        // so a host-side sweep racing its completion cannot free it under
        // us, the queue so the completion nudge cannot race its teardown.
        let event = retain_handle(unsafe { event_ref.get() });
        let queue = event.parent_queue();

        let profiling = queue
            .as_ref()
            .map(|q| q.properties().contains(CommandQueueProperties::PROFILING_ENABLE))
            .unwrap_or(false);

        if profiling {
            event.update_timing(ProfilingInfo::Start);
        }

        if event.status() == SUBMITTED {
            event.set_status(RUNNING);
        }

        let device = queue.as_ref().map(|q| q.device());

        // A kernel launch already poisoned by a sibling group skips the
        // work but still retires its claim.
        let poisoned = match event.device_data() {
            Some(DeviceData::Kernel(launch)) => launch.error().is_some(),
            _ => false,
        };

        // One failing (or panicking) event must not take the pool down.
        let error_code = if poisoned {
            None
        } else {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                execute(&event, device.as_ref(), group_index)
            }));

            match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(error_status(&err)),
                Err(_panic) => Some(Status::OutOfResources as i32),
            }
        };

        match (group_index, event.device_data()) {
            (Some(_), Some(DeviceData::Kernel(launch))) => {
                // Kernel events retire one claim per dispatch and reach a
                // terminal status only with the final one, so sibling
                // workers never observe a swept event mid-launch.
                if let Some(code) = error_code {
                    launch.record_error(code);
                }

                if launch.finish_group() {
                    if profiling {
                        event.update_timing(ProfilingInfo::End);
                    }
                    event.set_status(launch.error().unwrap_or(COMPLETE));

                    if let Some(ref queue) = queue {
                        queue.clean_events();
                    }
                }
            }
            _ => {
                if profiling {
                    event.update_timing(ProfilingInfo::End);
                }
                event.set_status(error_code.unwrap_or(COMPLETE));

                if let Some(ref queue) = queue {
                    queue.clean_events();
                }
            }
        }
    }
}

fn error_status(err: &Error) -> i32 {
    err.api_status()
        .map(|s| s as i32)
        .unwrap_or(Status::OutOfResources as i32)
}

/// The data pointer of `mem` on `device`; allocation happened at event
/// construction.
fn data_ptr(mem: &Handle<MemObject>, device: &Handle<CpuDevice>) -> Result<*mut u8> {
    mem.allocate(device)?;
    Ok(mem
        .device_data(device)
        .expect("allocation just succeeded")
        .as_ptr())
}

/// Dispatches one unit of work by command type.
fn execute(
    event: &Event,
    device: Option<&Handle<CpuDevice>>,
    group_index: Option<[usize; crate::MAX_WORK_DIMS]>,
) -> Result<()> {
    let device = match device {
        Some(device) => device,
        None => return Err(Error::from(Status::InvalidCommandQueue)),
    };

    match *event.kind() {
        EventKind::ReadBuffer { ref buffer, offset, size, ptr } => {
            let data = data_ptr(buffer, device)?;
            unsafe { std::ptr::copy_nonoverlapping(data.add(offset), ptr, size) };
        }

        EventKind::WriteBuffer { ref buffer, offset, size, ptr } => {
            let data = data_ptr(buffer, device)?;
            unsafe { std::ptr::copy_nonoverlapping(ptr, data.add(offset), size) };
        }

        EventKind::CopyBuffer { ref src, ref dst, src_offset, dst_offset, size } => {
            let src_data = data_ptr(src, device)?;
            let dst_data = data_ptr(dst, device)?;
            unsafe {
                std::ptr::copy(src_data.add(src_offset), dst_data.add(dst_offset), size)
            };
        }

        EventKind::ReadBufferRect(ref rect) | EventKind::WriteBufferRect(ref rect) => {
            let read = matches!(*event.kind(), EventKind::ReadBufferRect(_));
            let data = data_ptr(&rect.buffer, device)?;

            // One row copy per (y, z) pair, addressed through the host
            // and buffer pitches independently.
            for z in 0..rect.region[2] {
                for y in 0..rect.region[1] {
                    let host = unsafe {
                        rect.ptr.add(pitched_offset(
                            rect.host_origin[0],
                            y + rect.host_origin[1],
                            z + rect.host_origin[2],
                            rect.host_row_pitch,
                            rect.host_slice_pitch,
                            1,
                        ))
                    };
                    let buf = unsafe {
                        data.add(pitched_offset(
                            rect.buffer_origin[0],
                            y + rect.buffer_origin[1],
                            z + rect.buffer_origin[2],
                            rect.buffer_row_pitch,
                            rect.buffer_slice_pitch,
                            1,
                        ))
                    };

                    unsafe {
                        if read {
                            std::ptr::copy_nonoverlapping(buf, host, rect.region[0]);
                        } else {
                            std::ptr::copy_nonoverlapping(host, buf, rect.region[0]);
                        }
                    }
                }
            }
        }

        EventKind::MapBuffer { .. } | EventKind::UnmapMemObject { .. } => {
            // Host memory is the device memory here: mapping was fully
            // prepared by the event-data initializer.
        }

        EventKind::ReadImage(ref xfer) | EventKind::WriteImage(ref xfer) => {
            let read = matches!(*event.kind(), EventKind::ReadImage(_));
            let data = data_ptr(&xfer.image, device)?;
            let (_, _, _, row_pitch, slice_pitch, pixel_size) = xfer
                .image
                .image_geometry()
                .expect("image transfer carries an image");

            let row_bytes = xfer.region[0] * pixel_size;

            for z in 0..xfer.region[2] {
                for y in 0..xfer.region[1] {
                    let host = unsafe {
                        xfer.ptr.add(pitched_offset(
                            0,
                            y,
                            z,
                            xfer.host_row_pitch,
                            xfer.host_slice_pitch,
                            pixel_size,
                        ))
                    };
                    let img = unsafe {
                        data.add(pitched_offset(
                            xfer.origin[0],
                            y + xfer.origin[1],
                            z + xfer.origin[2],
                            row_pitch,
                            slice_pitch,
                            pixel_size,
                        ))
                    };

                    unsafe {
                        if read {
                            std::ptr::copy_nonoverlapping(img, host, row_bytes);
                        } else {
                            std::ptr::copy_nonoverlapping(host, img, row_bytes);
                        }
                    }
                }
            }
        }

        EventKind::CopyImage { ref src, ref dst, src_origin, dst_origin, region } => {
            let src_data = data_ptr(src, device)?;
            let dst_data = data_ptr(dst, device)?;
            let (_, _, _, s_row, s_slice, pixel_size) =
                src.image_geometry().expect("image copy source is an image");
            let (_, _, _, d_row, d_slice, _) =
                dst.image_geometry().expect("image copy destination is an image");

            let row_bytes = region[0] * pixel_size;

            for z in 0..region[2] {
                for y in 0..region[1] {
                    let from = unsafe {
                        src_data.add(pitched_offset(
                            src_origin[0],
                            y + src_origin[1],
                            z + src_origin[2],
                            s_row,
                            s_slice,
                            pixel_size,
                        ))
                    };
                    let to = unsafe {
                        dst_data.add(pitched_offset(
                            dst_origin[0],
                            y + dst_origin[1],
                            z + dst_origin[2],
                            d_row,
                            d_slice,
                            pixel_size,
                        ))
                    };

                    unsafe { std::ptr::copy(from, to, row_bytes) };
                }
            }
        }

        EventKind::NativeKernel { func, ref args, .. } => {
            let mut blob = args.lock().unwrap();
            unsafe { func(blob.as_mut_ptr() as *mut c_void) };
        }

        EventKind::Kernel { .. } => {
            let index = group_index.expect("kernel dispatch carries a group claim");
            let launch = match event.device_data() {
                Some(DeviceData::Kernel(launch)) => launch,
                _ => return Err(Error::from(Status::InvalidProgramExecutable)),
            };

            WorkGroup::new(launch, index)?.run()?;
        }

        EventKind::Marker
        | EventKind::Barrier
        | EventKind::WaitForEvents
        | EventKind::User { .. } => {
            // Dummy events never reach the device FIFO.
            unreachable!("dummy event dispatched to a worker");
        }
    }

    Ok(())
}
