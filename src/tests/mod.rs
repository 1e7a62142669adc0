//! End-to-end tests against the in-process CPU device.
//!
//! Each module exercises one slice of the runtime; the helpers here
//! stand up a device/context/queue triple and the shared module of
//! native test kernels.

pub mod concurrent;
pub mod event_order;
pub mod image_ops;
pub mod kernel_exec;
pub mod refcount;

use std::os::raw::c_void;

use crate::core::{CommandQueue, Context, Handle, Module};
use crate::cpu::{builtins, CpuDevice};
use crate::types::{CommandQueueProperties, MemFenceFlags};

pub fn setup(
    properties: CommandQueueProperties,
) -> (Handle<CpuDevice>, Handle<Context>, Handle<CommandQueue>) {
    let device = CpuDevice::create();
    let context = Context::create(vec![device.clone()]).unwrap();
    let queue = CommandQueue::create(&context, device.clone(), properties).unwrap();
    (device, context, queue)
}

/// `out[get_global_id(0)] = get_global_id(0)`
pub unsafe extern "C" fn fill_global_id(args: *const *const c_void) {
    let out = *args as *mut u32;
    let gid = builtins::get_global_id(0);
    *out.add(gid) = gid as u32;
}

/// `out[0] += addend` (single work-item)
pub unsafe extern "C" fn add_scalar(args: *const *const c_void) {
    let out = *args as *mut f32;
    let addend = *(*args.add(1) as *const f32);
    *out += addend;
}

/// Every work-item posts a one into local scratch, the group barriers,
/// then each item stores the group-wide sum: every output cell must end
/// up equal to the work-group size.
pub unsafe extern "C" fn sum_neighbors(args: *const *const c_void) {
    let out = *args as *mut u32;
    let scratch = *args.add(1) as *mut u32;

    let lx = builtins::get_local_id(0);
    let ly = builtins::get_local_id(1);
    let lw = builtins::get_local_size(0);
    let lh = builtins::get_local_size(1);

    *scratch.add(ly * lw + lx) = 1;

    builtins::barrier(MemFenceFlags::LOCAL);

    let mut sum = 0u32;
    for i in 0..lw * lh {
        sum += *scratch.add(i);
    }

    let gx = builtins::get_global_id(0);
    let gy = builtins::get_global_id(1);
    let gw = builtins::get_global_size(0);

    *out.add(gy * gw + gx) = sum;
}

/// Rotates values through local scratch across three barriers; checks
/// that every item of a group passes each barrier before any moves on.
pub unsafe extern "C" fn rotate_twice(args: *const *const c_void) {
    let out = *args as *mut u32;
    let scratch = *args.add(1) as *mut u32;

    let l = builtins::get_local_id(0);
    let n = builtins::get_local_size(0);

    *scratch.add(l) = l as u32;
    builtins::barrier(MemFenceFlags::LOCAL);

    let first = *scratch.add((l + 1) % n);
    builtins::barrier(MemFenceFlags::LOCAL);

    *scratch.add(l) = first;
    builtins::barrier(MemFenceFlags::LOCAL);

    let second = *scratch.add((l + 1) % n);
    *out.add(builtins::get_global_id(0)) = second;
}

pub fn test_module() -> Module {
    use crate::core::ArgInfo;
    use crate::types::ArgKind;

    Module::builder()
        .kernel("fill_global_id", vec![ArgInfo::global_buffer()], fill_global_id)
        .kernel(
            "add_scalar",
            vec![ArgInfo::global_buffer(), ArgInfo::scalar(ArgKind::Float)],
            add_scalar,
        )
        .kernel(
            "sum_neighbors",
            vec![ArgInfo::global_buffer(), ArgInfo::local_buffer()],
            sum_neighbors,
        )
        .kernel(
            "rotate_twice",
            vec![ArgInfo::global_buffer(), ArgInfo::local_buffer()],
            rotate_twice,
        )
        .build()
}
