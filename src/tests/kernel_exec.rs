//! Kernel dispatch: ND-ranges, tasks, the local-size heuristic and the
//! in-kernel barrier.

use crate::core::{ArgVal, Kernel, MemObject, Program};
use crate::cpu::DeviceData;
use crate::tests::{setup, test_module};
use crate::types::{CommandQueueProperties, MemFlags, ProfilingInfo};

#[test]
fn nd_range_covers_the_whole_index_space() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let program = Program::from_module(&context, test_module()).unwrap();
    let kernel = Kernel::create(&program, "fill_global_id").unwrap();

    let n = 256usize;
    let buffer = MemObject::create_buffer(
        &context,
        MemFlags::READ_WRITE,
        n * std::mem::size_of::<u32>(),
        std::ptr::null_mut(),
    )
    .unwrap();

    kernel.set_arg(0, ArgVal::mem(&buffer)).unwrap();

    // No local size: the device heuristic splits the range.
    let event = unsafe {
        queue
            .enqueue_kernel(&kernel, 1, None, [n, 1, 1], None, &[])
            .unwrap()
    };
    event.wait().unwrap();

    let mut out = vec![0u32; n];
    let read = unsafe {
        queue
            .enqueue_read_buffer(&buffer, 0, n * 4, out.as_mut_ptr() as *mut u8, &[])
            .unwrap()
    };
    read.wait().unwrap();

    for (i, &v) in out.iter().enumerate() {
        assert_eq!(v, i as u32);
    }

    queue.finish();
}

#[test]
fn task_runs_one_work_item() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let program = Program::from_module(&context, test_module()).unwrap();
    let kernel = Kernel::create(&program, "add_scalar").unwrap();

    let mut value = 1.5f32;
    let buffer = MemObject::create_buffer(
        &context,
        MemFlags::READ_WRITE | MemFlags::COPY_HOST_PTR,
        4,
        &mut value as *mut f32 as *mut u8,
    )
    .unwrap();

    kernel.set_arg(0, ArgVal::mem(&buffer)).unwrap();
    kernel.set_arg(1, ArgVal::scalar(&2.25f32)).unwrap();

    let event = unsafe { queue.enqueue_task(&kernel, &[]).unwrap() };
    event.wait().unwrap();

    let mut out = 0.0f32;
    let read = unsafe {
        queue
            .enqueue_read_buffer(&buffer, 0, 4, &mut out as *mut f32 as *mut u8, &[])
            .unwrap()
    };
    read.wait().unwrap();

    assert_eq!(out, 3.75);

    queue.finish();
}

#[test]
fn work_group_barrier_synchronizes_items() {
    let (_device, context, queue) = setup(CommandQueueProperties::new().profiling());

    let program = Program::from_module(&context, test_module()).unwrap();
    let kernel = Kernel::create(&program, "sum_neighbors").unwrap();

    // global (4, 4), local (2, 2): four groups of four items.
    let buffer = MemObject::create_buffer(
        &context,
        MemFlags::READ_WRITE,
        16 * std::mem::size_of::<u32>(),
        std::ptr::null_mut(),
    )
    .unwrap();

    kernel.set_arg(0, ArgVal::mem(&buffer)).unwrap();
    kernel
        .set_arg(1, ArgVal::local(4 * std::mem::size_of::<u32>()))
        .unwrap();

    let event = unsafe {
        queue
            .enqueue_kernel(&kernel, 2, None, [4, 4, 1], Some([2, 2, 1]), &[])
            .unwrap()
    };
    event.wait().unwrap();

    // Every cell sums its whole group: all fours.
    let mut out = vec![0u32; 16];
    let read = unsafe {
        queue
            .enqueue_read_buffer(&buffer, 0, 64, out.as_mut_ptr() as *mut u8, &[])
            .unwrap()
    };
    read.wait().unwrap();

    assert_eq!(out, vec![4u32; 16]);

    // The cursor accounted for each group exactly once and the event
    // completed exactly once.
    match event.device_data() {
        Some(DeviceData::Kernel(launch)) => {
            assert_eq!(launch.num_groups(), 4);
            assert_eq!(launch.finished_groups(), 4);
        }
        _ => panic!("kernel event lost its launch state"),
    }

    let start = event.profiling_info(ProfilingInfo::Start).unwrap();
    let end = event.profiling_info(ProfilingInfo::End).unwrap();
    assert!(start <= end);

    queue.finish();
}

#[test]
fn repeated_barriers_keep_items_in_lockstep() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let program = Program::from_module(&context, test_module()).unwrap();
    let kernel = Kernel::create(&program, "rotate_twice").unwrap();

    let n = 8usize;
    let local = 4usize;
    let buffer = MemObject::create_buffer(
        &context,
        MemFlags::READ_WRITE,
        n * std::mem::size_of::<u32>(),
        std::ptr::null_mut(),
    )
    .unwrap();

    kernel.set_arg(0, ArgVal::mem(&buffer)).unwrap();
    kernel
        .set_arg(1, ArgVal::local(local * std::mem::size_of::<u32>()))
        .unwrap();

    let event = unsafe {
        queue
            .enqueue_kernel(&kernel, 1, None, [n, 1, 1], Some([local, 1, 1]), &[])
            .unwrap()
    };
    event.wait().unwrap();

    let mut out = vec![0u32; n];
    let read = unsafe {
        queue
            .enqueue_read_buffer(&buffer, 0, n * 4, out.as_mut_ptr() as *mut u8, &[])
            .unwrap()
    };
    read.wait().unwrap();

    // Two rotations through local scratch: each item ends up with the
    // id two places over.
    for g in 0..n {
        let l = g % local;
        assert_eq!(out[g], ((l + 2) % local) as u32);
    }

    queue.finish();
}

#[test]
fn unset_args_block_the_launch() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let program = Program::from_module(&context, test_module()).unwrap();
    let kernel = Kernel::create(&program, "fill_global_id").unwrap();

    assert!(!kernel.args_specified());

    let result = unsafe { queue.enqueue_kernel(&kernel, 1, None, [8, 1, 1], None, &[]) };

    assert_eq!(
        result.err().and_then(|e| e.api_status()),
        Some(crate::types::Status::InvalidKernelArgs)
    );
}

#[test]
fn indivisible_local_size_is_rejected() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let program = Program::from_module(&context, test_module()).unwrap();
    let kernel = Kernel::create(&program, "fill_global_id").unwrap();

    let buffer =
        MemObject::create_buffer(&context, MemFlags::READ_WRITE, 64, std::ptr::null_mut()).unwrap();
    kernel.set_arg(0, ArgVal::mem(&buffer)).unwrap();

    let result = unsafe {
        queue.enqueue_kernel(&kernel, 1, None, [10, 1, 1], Some([4, 1, 1]), &[])
    };

    assert_eq!(
        result.err().and_then(|e| e.api_status()),
        Some(crate::types::Status::InvalidWorkGroupSize)
    );
}

#[test]
fn offset_launch_shifts_global_ids() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let program = Program::from_module(&context, test_module()).unwrap();
    let kernel = Kernel::create(&program, "fill_global_id").unwrap();

    let n = 32usize;
    let buffer = MemObject::create_buffer(
        &context,
        MemFlags::READ_WRITE,
        n * std::mem::size_of::<u32>(),
        std::ptr::null_mut(),
    )
    .unwrap();

    kernel.set_arg(0, ArgVal::mem(&buffer)).unwrap();

    // Cover [16, 32) only.
    let event = unsafe {
        queue
            .enqueue_kernel(&kernel, 1, Some([16, 0, 0]), [16, 1, 1], Some([8, 1, 1]), &[])
            .unwrap()
    };
    event.wait().unwrap();

    let mut out = vec![0u32; n];
    let read = unsafe {
        queue
            .enqueue_read_buffer(&buffer, 0, n * 4, out.as_mut_ptr() as *mut u8, &[])
            .unwrap()
    };
    read.wait().unwrap();

    for (i, &v) in out.iter().enumerate() {
        if i < 16 {
            assert_eq!(v, 0);
        } else {
            assert_eq!(v, i as u32);
        }
    }

    queue.finish();
}
