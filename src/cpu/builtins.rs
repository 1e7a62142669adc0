//! Work-item builtins.
//!
//! Kernel code resolves its position in the index space (and the barrier)
//! through the worker thread's active work-group, published immediately
//! before the trampoline is invoked. Outside a kernel the id getters fall
//! back to the values the programming model defines for out-of-range
//! queries (zero ids, unit sizes).

use std::cell::Cell;
use std::ptr;

use crate::cpu::kernel::WorkGroup;
use crate::types::MemFenceFlags;

thread_local! {
    static ACTIVE_WORK_GROUP: Cell<*const WorkGroup> = Cell::new(ptr::null());
}

/// Publishes (or clears) the work-group executing on this thread.
pub(crate) fn set_active_work_group(group: Option<&WorkGroup>) {
    let ptr = group.map_or(ptr::null(), |g| g as *const WorkGroup);
    ACTIVE_WORK_GROUP.with(|slot| slot.set(ptr));
}

/// The work-group executing on this thread, if any.
///
/// The returned reference is only valid for the duration of the group's
/// `run` call that published it; kernel code, which runs strictly inside
/// that window, may hold it freely.
pub(crate) fn active_work_group() -> Option<&'static WorkGroup> {
    ACTIVE_WORK_GROUP.with(|slot| {
        let ptr = slot.get();
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    })
}

/// Number of dimensions of the executing kernel's index space.
pub fn get_work_dim() -> u32 {
    active_work_group().map_or(1, |g| g.work_dim())
}

/// The executing work-item's global id along `dim`.
pub fn get_global_id(dim: u32) -> usize {
    active_work_group().map_or(0, |g| g.global_id(dim))
}

/// Extent of the global index space along `dim`.
pub fn get_global_size(dim: u32) -> usize {
    active_work_group().map_or(1, |g| g.global_size(dim))
}

/// The launch's global offset along `dim`.
pub fn get_global_offset(dim: u32) -> usize {
    active_work_group().map_or(0, |g| g.global_offset(dim))
}

/// The executing work-item's id within its work-group along `dim`.
pub fn get_local_id(dim: u32) -> usize {
    active_work_group().map_or(0, |g| g.local_id(dim))
}

/// Extent of one work-group along `dim`.
pub fn get_local_size(dim: u32) -> usize {
    active_work_group().map_or(1, |g| g.local_size(dim))
}

/// The executing work-group's index along `dim`.
pub fn get_group_id(dim: u32) -> usize {
    active_work_group().map_or(0, |g| g.group_id(dim))
}

/// Number of work-groups along `dim`.
pub fn get_num_groups(dim: u32) -> usize {
    active_work_group().map_or(1, |g| g.num_groups(dim))
}

/// The work-group barrier: every work-item of the group must reach it
/// before any proceeds past it. Outside a kernel this is a no-op.
pub fn barrier(flags: MemFenceFlags) {
    if let Some(group) = active_work_group() {
        group.barrier(flags);
    }
}
