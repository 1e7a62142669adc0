//! Kernels and their argument vectors.

use std::sync::Mutex;

use crate::core::object::{new_object, Handle, Object, ObjectCore};
use crate::core::program::{ArgInfo, KernelDef, Program};
use crate::core::MemObject;
use crate::error::{api_error, Result};
use crate::types::{AddressSpace, ArgKind, ObjectType, Status};

/// A value being bound to a kernel argument slot.
pub enum ArgVal<'a> {
    /// A buffer or image in the global/constant address space.
    Mem(&'a Handle<MemObject>),
    /// A local (per-work-group) scratch allocation of the given size.
    LocalSize(usize),
    /// Inline scalar or vector bytes, lanes packed tightly.
    Scalar(&'a [u8]),
    /// A sampler state word.
    Sampler(u32),
}

impl<'a> ArgVal<'a> {
    /// Convenience for plain scalars.
    pub fn scalar<T: Copy>(value: &'a T) -> ArgVal<'a> {
        let bytes = unsafe {
            std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>())
        };
        ArgVal::Scalar(bytes)
    }

    pub fn mem(mem: &'a Handle<MemObject>) -> ArgVal<'a> {
        ArgVal::Mem(mem)
    }

    pub fn local(size: usize) -> ArgVal<'a> {
        ArgVal::LocalSize(size)
    }
}

/// A bound (or not-yet-bound) kernel argument.
#[derive(Clone)]
pub struct Arg {
    info: ArgInfo,
    /// Inline value bytes for scalar/vector/sampler kinds.
    value: Vec<u8>,
    /// Retained memory object for global/constant buffer and image kinds.
    mem: Option<Handle<MemObject>>,
    /// Bytes to allocate per work-group for local pointers.
    runtime_alloc: usize,
    set: bool,
}

impl Arg {
    fn new(info: ArgInfo) -> Arg {
        Arg { info, value: Vec::new(), mem: None, runtime_alloc: 0, set: false }
    }

    pub fn info(&self) -> ArgInfo {
        self.info
    }

    pub fn kind(&self) -> ArgKind {
        self.info.kind
    }

    pub fn address_space(&self) -> AddressSpace {
        self.info.address_space
    }

    pub fn is_set(&self) -> bool {
        self.set
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn mem(&self) -> Option<&Handle<MemObject>> {
        self.mem.as_ref()
    }

    pub fn runtime_alloc(&self) -> usize {
        self.runtime_alloc
    }

    /// Size in bytes of the inline value this argument expects.
    pub fn expected_size(&self) -> Option<usize> {
        self.info.kind.lane_size().map(|l| l * self.info.vec_dim as usize)
    }
}

/// A kernel: an entry point from a program's module plus an argument
/// vector. Eligible for launch only once every argument is set.
pub struct Kernel {
    core: ObjectCore,
    def: KernelDef,
    args: Mutex<Vec<Arg>>,
}

unsafe impl Object for Kernel {
    const TYPE: ObjectType = ObjectType::Kernel;

    fn object_core(&self) -> &ObjectCore {
        &self.core
    }
}

impl Kernel {
    /// Looks up `name` in the program's module.
    pub fn create(program: &Handle<Program>, name: &str) -> Result<Handle<Kernel>> {
        let def = match program.module().kernel(name) {
            Some(def) => def.clone(),
            None => return api_error(Status::InvalidKernelName, "Kernel::create"),
        };

        let args = def.args().iter().map(|&info| Arg::new(info)).collect();

        Ok(new_object(Kernel {
            core: ObjectCore::new(ObjectType::Kernel, Some(program.raw())),
            def,
            args: Mutex::new(args),
        }))
    }

    pub fn name(&self) -> &str {
        self.def.name()
    }

    pub fn def(&self) -> &KernelDef {
        &self.def
    }

    pub fn num_args(&self) -> usize {
        self.def.args().len()
    }

    pub fn program(&self) -> Option<Handle<Program>> {
        self.core.parent()?.upgrade::<Program>()
    }

    /// Binds `value` to argument `index`, validating it against the
    /// declared signature.
    pub fn set_arg(&self, index: usize, value: ArgVal) -> Result<()> {
        const FN: &str = "Kernel::set_arg";

        let mut args = self.args.lock().unwrap();

        let arg = match args.get_mut(index) {
            Some(a) => a,
            None => return api_error(Status::InvalidArgIndex, FN),
        };

        match value {
            ArgVal::Mem(mem) => {
                let kind_ok = matches!(
                    arg.info.kind,
                    ArgKind::Buffer | ArgKind::Image2d | ArgKind::Image3d
                );
                if !kind_ok || arg.info.address_space == AddressSpace::Local {
                    return api_error(Status::InvalidArgValue, FN);
                }
                if (arg.info.kind == ArgKind::Image2d || arg.info.kind == ArgKind::Image3d)
                    && !mem.is_image()
                {
                    return api_error(Status::InvalidArgValue, FN);
                }
                arg.mem = Some(mem.clone());
                arg.value.clear();
            }
            ArgVal::LocalSize(size) => {
                if arg.info.address_space != AddressSpace::Local {
                    return api_error(Status::InvalidArgValue, FN);
                }
                if size == 0 {
                    return api_error(Status::InvalidArgSize, FN);
                }
                arg.runtime_alloc = size;
                arg.mem = None;
            }
            ArgVal::Scalar(bytes) => {
                match arg.expected_size() {
                    Some(expected) if expected == bytes.len() => {}
                    _ => return api_error(Status::InvalidArgSize, FN),
                }
                if arg.info.kind == ArgKind::Sampler {
                    return api_error(Status::InvalidArgValue, FN);
                }
                arg.value = bytes.to_vec();
                arg.mem = None;
            }
            ArgVal::Sampler(state) => {
                if arg.info.kind != ArgKind::Sampler {
                    return api_error(Status::InvalidArgValue, FN);
                }
                arg.value = state.to_le_bytes().to_vec();
                arg.mem = None;
            }
        }

        arg.set = true;
        Ok(())
    }

    /// Whether every argument has been set (launch eligibility).
    pub fn args_specified(&self) -> bool {
        self.args.lock().unwrap().iter().all(|a| a.set)
    }

    /// Whether any argument is a local pointer, forcing per-work-group
    /// call-frame rebuilds.
    pub fn has_locals(&self) -> bool {
        self.args
            .lock()
            .unwrap()
            .iter()
            .any(|a| a.address_space() == AddressSpace::Local)
    }

    /// Snapshot of the argument vector as currently bound.
    pub fn args_snapshot(&self) -> Vec<Arg> {
        self.args.lock().unwrap().clone()
    }

    /// The largest work-group this kernel can launch on `device`.
    pub fn work_group_size(&self, device: &crate::core::Handle<crate::cpu::CpuDevice>) -> usize {
        device.max_work_group_size()
    }

    /// Preferred work-group size granularity. The CPU engine walks items
    /// sequentially, so any size performs alike.
    pub fn preferred_work_group_size_multiple(&self) -> usize {
        1
    }

    /// Bytes of local memory one work-group of this kernel consumes, as
    /// currently bound.
    pub fn local_mem_size(&self) -> usize {
        self.args
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.address_space() == AddressSpace::Local)
            .map(|a| a.runtime_alloc())
            .sum()
    }
}
