//! A context: the sharing domain for queues, memory objects and programs.

use crate::core::object::{new_object, Handle, Object, ObjectCore};
use crate::cpu::CpuDevice;
use crate::error::{api_error, Result};
use crate::types::{ObjectType, Status};

/// A collection of devices that memory objects and programs are shared
/// across. Queues bind to a single device that must belong to their
/// context.
pub struct Context {
    core: ObjectCore,
    devices: Vec<Handle<CpuDevice>>,
}

unsafe impl Object for Context {
    const TYPE: ObjectType = ObjectType::Context;

    fn object_core(&self) -> &ObjectCore {
        &self.core
    }
}

impl Context {
    /// Creates a context over `devices`. The devices are retained for the
    /// context's lifetime.
    pub fn create(devices: Vec<Handle<CpuDevice>>) -> Result<Handle<Context>> {
        if devices.is_empty() {
            return api_error(Status::InvalidValue, "Context::create");
        }

        Ok(new_object(Context {
            core: ObjectCore::new(ObjectType::Context, None),
            devices,
        }))
    }

    pub fn devices(&self) -> &[Handle<CpuDevice>] {
        &self.devices
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    /// Whether `device` belongs to this context.
    pub fn has_device(&self, device: &Handle<CpuDevice>) -> bool {
        self.devices.iter().any(|d| d == device)
    }
}
