//! Programs and the compiler/JIT seam.
//!
//! The source front-end lives outside this crate: a [`Compiler`] lowers
//! kernel source to a [`Module`], and a module hands out native entry
//! points for its kernels. The runtime consumes nothing else.

use std::os::raw::c_void;
use std::sync::Arc;

use crate::core::object::{new_object, Handle, Object, ObjectCore};
use crate::core::Context;
use crate::error::{api_error, Error, Result};
use crate::types::{AddressSpace, ArgKind, ObjectType, Status};

/// A compiled kernel entry point.
///
/// The single parameter is an array of argument slots, one per kernel
/// argument: buffer and local arguments are passed as the pointer value
/// itself, image arguments as a pointer to an image descriptor, and
/// scalar/vector/sampler arguments as a pointer to their inline bytes.
/// The entry point may call the work-item builtins, which resolve through
/// the executing worker's thread-local active work-group.
pub type KernelFn = unsafe extern "C" fn(args: *const *const c_void);

/// Declared type of one kernel argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArgInfo {
    pub kind: ArgKind,
    /// Vector dimension, 1..=16 (1 for plain scalars).
    pub vec_dim: u16,
    pub address_space: AddressSpace,
}

impl ArgInfo {
    pub fn scalar(kind: ArgKind) -> ArgInfo {
        ArgInfo { kind, vec_dim: 1, address_space: AddressSpace::Private }
    }

    pub fn vector(kind: ArgKind, vec_dim: u16) -> ArgInfo {
        ArgInfo { kind, vec_dim, address_space: AddressSpace::Private }
    }

    pub fn global_buffer() -> ArgInfo {
        ArgInfo { kind: ArgKind::Buffer, vec_dim: 1, address_space: AddressSpace::Global }
    }

    pub fn constant_buffer() -> ArgInfo {
        ArgInfo { kind: ArgKind::Buffer, vec_dim: 1, address_space: AddressSpace::Constant }
    }

    pub fn local_buffer() -> ArgInfo {
        ArgInfo { kind: ArgKind::Buffer, vec_dim: 1, address_space: AddressSpace::Local }
    }

    pub fn image_2d() -> ArgInfo {
        ArgInfo { kind: ArgKind::Image2d, vec_dim: 1, address_space: AddressSpace::Global }
    }

    pub fn image_3d() -> ArgInfo {
        ArgInfo { kind: ArgKind::Image3d, vec_dim: 1, address_space: AddressSpace::Global }
    }
}

/// One kernel within a module: name, signature and native address.
#[derive(Clone)]
pub struct KernelDef {
    name: String,
    args: Vec<ArgInfo>,
    entry: KernelFn,
}

impl KernelDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[ArgInfo] {
        &self.args
    }

    /// The JIT-resolved native address of this kernel, callable from any
    /// worker thread.
    pub fn entry(&self) -> KernelFn {
        self.entry
    }
}

/// An immutable set of built kernels, the unit the compiler hands back.
#[derive(Clone)]
pub struct Module {
    kernels: Arc<Vec<KernelDef>>,
}

impl Module {
    pub fn builder() -> ModuleBuilder {
        ModuleBuilder { kernels: Vec::new() }
    }

    pub fn kernel(&self, name: &str) -> Option<&KernelDef> {
        self.kernels.iter().find(|k| k.name == name)
    }

    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.iter().map(|k| k.name.as_str())
    }
}

/// Assembles a [`Module`] from native kernels — the binary-load path of
/// the program API.
pub struct ModuleBuilder {
    kernels: Vec<KernelDef>,
}

impl ModuleBuilder {
    pub fn kernel<S: Into<String>>(mut self, name: S, args: Vec<ArgInfo>, entry: KernelFn) -> ModuleBuilder {
        self.kernels.push(KernelDef { name: name.into(), args, entry });
        self
    }

    pub fn build(self) -> Module {
        Module { kernels: Arc::new(self.kernels) }
    }
}

/// The compiler front-end interface. Implementations live outside this
/// crate; the runtime only consumes the module they produce.
pub trait Compiler {
    fn compile(&self, source: &str, options: &str) -> std::result::Result<Module, String>;
}

/// A program: a built module attached to a context.
pub struct Program {
    core: ObjectCore,
    module: Module,
}

unsafe impl Object for Program {
    const TYPE: ObjectType = ObjectType::Program;

    fn object_core(&self) -> &ObjectCore {
        &self.core
    }
}

impl Program {
    /// Attaches an already-built module to `context` (the parse-binary
    /// path).
    pub fn from_module(context: &Handle<Context>, module: Module) -> Result<Handle<Program>> {
        if module.kernels.is_empty() {
            return api_error(Status::InvalidBinary, "Program::from_module");
        }

        Ok(new_object(Program {
            core: ObjectCore::new(ObjectType::Program, Some(context.raw())),
            module,
        }))
    }

    /// Compiles `source` with the supplied compiler and attaches the
    /// result. A failed build surfaces the build log.
    pub fn build_source(
        context: &Handle<Context>,
        compiler: &dyn Compiler,
        source: &str,
        options: &str,
    ) -> Result<Handle<Program>> {
        match compiler.compile(source, options) {
            Ok(module) => Program::from_module(context, module),
            Err(log) => Err(Error::ProgramBuild(log)),
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn context(&self) -> Option<Handle<Context>> {
        self.core.parent()?.upgrade::<Context>()
    }
}
