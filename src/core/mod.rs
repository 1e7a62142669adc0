//! The scheduling core: object registry, contexts, memory objects,
//! events, command queues, kernels and programs.

pub mod context;
pub mod event;
pub mod kernel;
pub mod mem;
pub mod object;
pub mod program;
pub mod queue;

pub use self::context::Context;
pub use self::event::{Event, EventCallback, EventKind, ImageTransfer, NativeKernelFn, RectTransfer};
pub use self::kernel::{Arg, ArgVal, Kernel};
pub use self::mem::{MemDestructorCallback, MemKind, MemObject};
pub use self::object::{is_live_object, Handle, Object, ObjectCore};
pub use self::program::{ArgInfo, Compiler, KernelDef, KernelFn, Module, ModuleBuilder, Program};
pub use self::queue::CommandQueue;
