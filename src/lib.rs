//! # softcl
//!
//! A CPU-backed OpenCL-style compute runtime: the command/event
//! scheduling core and an execution engine that dispatches transfers,
//! native calls and JIT-compiled kernels onto a per-device worker pool.
//!
//! The pieces, bottom up:
//!
//! - a process-wide object registry with reference counting,
//!   parent/child retention and a liveness-checked `is_a` predicate
//!   ([`core::object`]);
//! - buffers, sub-buffers and images with lazy per-device backing
//!   storage ([`core::mem`]);
//! - events with wait lists, callbacks and profiling timestamps
//!   ([`core::event`]);
//! - in-order and out-of-order command queues driving event readiness
//!   ([`core::queue`]);
//! - the CPU device: one worker thread per logical core pulling ready
//!   events from a FIFO ([`cpu::device`], [`cpu::worker`]);
//! - the work-group engine: argument lowering into a call frame and an
//!   N-dimensional work-item walk with cooperative (stackful) barrier
//!   contexts ([`cpu::kernel`], [`cpu::builtins`]).
//!
//! Kernel source compilation is out of scope: a [`Compiler`]
//! implementation lowers source to a [`Module`] of native entry points,
//! and [`Module::builder`] assembles one directly (the binary-load
//! path). See the tests for end-to-end usage.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate enum_primitive;
#[macro_use]
extern crate lazy_static;

pub mod core;
pub mod cpu;
pub mod error;
pub mod types;
pub mod util;

#[cfg(test)]
mod tests;

pub use crate::core::{
    is_live_object, Arg, ArgInfo, ArgVal, CommandQueue, Compiler, Context, Event, EventCallback,
    EventKind, Handle, Kernel, KernelDef, KernelFn, MemKind, MemObject, Module, ModuleBuilder,
    NativeKernelFn, Program,
};
pub use crate::cpu::{builtins, CpuDevice, ImageDescriptor};
pub use crate::error::{Error, Result};
pub use crate::types::{
    AddressSpace, ArgKind, CommandExecutionStatus, CommandQueueProperties, CommandType,
    DeviceExecCapabilities, ImageChannelDataType, ImageChannelOrder, ImageFormat, MapFlags,
    MemFenceFlags, MemFlags, ObjectType, ProfilingInfo, Status,
};

/// Highest number of dimensions an index space may have.
pub const MAX_WORK_DIMS: usize = 3;
