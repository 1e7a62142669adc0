//! Process-wide object bookkeeping: liveness registry, reference counting
//! and parent/child retention.
//!
//! Every externally addressable entity (context, queue, event, memory
//! object, program, kernel, device) embeds an [`ObjectCore`] and lives on
//! the heap behind a [`Handle`]. A `Handle` retains on clone and releases
//! on drop; releasing the last reference destroys the object, dereferences
//! its parent and, when the release-parent flag is set and the parent's
//! count reached zero, destroys the parent recursively.
//!
//! The live-object set maps raw addresses to type tags. [`is_live_object`]
//! combines membership with a tag check and is the defense against
//! use-after-free on the host-API boundary: a stale or garbage address is
//! simply not in the set.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::types::ObjectType;

lazy_static! {
    static ref LIVE_OBJECTS: Mutex<HashMap<usize, ObjectType>> = Mutex::new(HashMap::new());
}

/// Sentinel stored in the refcount by whichever thread claims destruction
/// of an object already sitting at zero references.
const CLAIMED: u32 = u32::MAX;

/// Implemented by every registered runtime object.
///
/// # Safety
///
/// Implementors must be heap-allocated through [`new_object`] only, must
/// report a stable [`ObjectCore`] for their whole lifetime, and must be
/// safe to share across threads behind a shared reference.
pub unsafe trait Object: Send + Sync + 'static {
    const TYPE: ObjectType;

    fn object_core(&self) -> &ObjectCore;
}

/// The header embedded in every registered object.
#[derive(Debug)]
pub struct ObjectCore {
    ty: ObjectType,
    references: AtomicU32,
    parent: Option<RawHandle>,
    release_parent: AtomicBool,
}

impl ObjectCore {
    /// A header with one initial reference. `parent`, if present, is
    /// retained here and dereferenced when this object is destroyed.
    pub fn new(ty: ObjectType, parent: Option<RawHandle>) -> ObjectCore {
        if let Some(p) = parent {
            p.retain();
        }

        ObjectCore {
            ty,
            references: AtomicU32::new(1),
            parent,
            release_parent: AtomicBool::new(true),
        }
    }

    pub fn object_type(&self) -> ObjectType {
        self.ty
    }

    pub fn references(&self) -> u32 {
        match self.references.load(Ordering::Acquire) {
            CLAIMED => 0,
            n => n,
        }
    }

    pub fn parent(&self) -> Option<RawHandle> {
        self.parent
    }

    /// Controls whether destroying this object may recursively destroy its
    /// parent. Disabled by a queue sweeping its own events.
    pub fn set_release_parent(&self, release: bool) {
        self.release_parent.store(release, Ordering::Release);
    }

    fn retain(&self) {
        self.references.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements and reports whether the caller is now responsible for
    /// destruction.
    fn release(&self) -> bool {
        self.references.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Claims destruction of an object resting at zero references (the
    /// deref-without-destroy aftermath of a disabled release-parent flag).
    /// At most one caller ever wins.
    fn try_claim_zero(&self) -> bool {
        self.references
            .compare_exchange(0, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// A type-erased, non-owning pointer to a registered object. Used for
/// parent links, where the child outlives neither the link nor the
/// parent's refcount contribution it carries.
#[derive(Clone, Copy, Debug)]
pub struct RawHandle {
    ptr: NonNull<()>,
    ty: ObjectType,
    core_of: unsafe fn(NonNull<()>) -> NonNull<ObjectCore>,
    drop_in_place: unsafe fn(NonNull<()>),
}

unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

impl RawHandle {
    fn new<T: Object>(ptr: NonNull<T>) -> RawHandle {
        RawHandle {
            ptr: ptr.cast(),
            ty: T::TYPE,
            core_of: core_of::<T>,
            drop_in_place: drop_in_place::<T>,
        }
    }

    pub fn object_type(&self) -> ObjectType {
        self.ty
    }

    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    fn core(&self) -> &ObjectCore {
        // Valid while the refcount this link participates in is held.
        unsafe { (self.core_of)(self.ptr).as_ref() }
    }

    fn retain(&self) {
        self.core().retain();
    }

    /// Releases one reference, destroying the object when it was the last.
    pub(crate) fn release(&self) {
        if self.core().release() {
            unsafe { destroy(*self) };
        }
    }

    /// Resolves this link into a typed handle, retaining the object.
    pub(crate) fn upgrade<T: Object>(&self) -> Option<Handle<T>> {
        if self.ty != T::TYPE {
            return None;
        }
        self.retain();
        Some(Handle { ptr: self.ptr.cast(), _marker: PhantomData })
    }
}

unsafe fn core_of<T: Object>(ptr: NonNull<()>) -> NonNull<ObjectCore> {
    NonNull::from(ptr.cast::<T>().as_ref().object_core())
}

unsafe fn drop_in_place<T: Object>(ptr: NonNull<()>) {
    drop(Box::from_raw(ptr.cast::<T>().as_ptr()));
}

/// Unregisters and frees an object, then walks the parent cascade: the
/// parent is always dereferenced; it is destroyed only when that brought
/// its count to zero *and* the child's release-parent flag was still set.
unsafe fn destroy(handle: RawHandle) {
    let core = handle.core();
    let parent = core.parent;
    let release_parent = core.release_parent.load(Ordering::Acquire);

    LIVE_OBJECTS.lock().unwrap().remove(&handle.addr());
    (handle.drop_in_place)(handle.ptr);

    if let Some(parent) = parent {
        if parent.core().release() && release_parent {
            destroy(parent);
        }
    }
}

/// Allocates `obj` on the heap, registers it in the live-object set and
/// returns the initial handle (carrying the constructor's reference).
pub(crate) fn new_object<T: Object>(obj: T) -> Handle<T> {
    let ptr = NonNull::from(Box::leak(Box::new(obj)));
    LIVE_OBJECTS.lock().unwrap().insert(ptr.as_ptr() as usize, T::TYPE);
    Handle { ptr, _marker: PhantomData }
}

/// The boundary `is_a` predicate: true only when `addr` is currently a
/// registered object *and* its type tag matches.
pub fn is_live_object(addr: usize, ty: ObjectType) -> bool {
    LIVE_OBJECTS.lock().unwrap().get(&addr) == Some(&ty)
}

/// A reference-counted pointer to a registered runtime object.
///
/// Cloning retains; dropping releases (and destroys at zero).
#[derive(Debug)]
pub struct Handle<T: Object> {
    ptr: NonNull<T>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Object> Send for Handle<T> {}
unsafe impl<T: Object> Sync for Handle<T> {}

impl<T: Object> Handle<T> {
    /// The raw address of the object, usable with [`is_live_object`] even
    /// after every handle is gone.
    pub fn as_raw_addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub(crate) fn raw(&self) -> RawHandle {
        RawHandle::new(self.ptr)
    }

    /// Reference count as observed right now.
    pub fn references(&self) -> u32 {
        self.object_core().references()
    }

    fn object_core(&self) -> &ObjectCore {
        unsafe { self.ptr.as_ref() }.object_core()
    }

    /// Wraps a raw object pointer *without* retaining it. The caller must
    /// own the reference being transferred.
    pub(crate) unsafe fn from_raw(ptr: NonNull<T>) -> Handle<T> {
        Handle { ptr, _marker: PhantomData }
    }
}

impl<T: Object> Clone for Handle<T> {
    fn clone(&self) -> Handle<T> {
        self.object_core().retain();
        Handle { ptr: self.ptr, _marker: PhantomData }
    }
}

impl<T: Object> Drop for Handle<T> {
    fn drop(&mut self) {
        self.raw().release();
    }
}

impl<T: Object> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Object> PartialEq for Handle<T> {
    fn eq(&self, other: &Handle<T>) -> bool {
        self.ptr == other.ptr
    }
}

impl<T: Object> Eq for Handle<T> {}

/// A raw handle to `obj` itself, for self-directed bookkeeping.
///
/// # Safety
///
/// The object must have been created through [`new_object`].
pub(crate) unsafe fn self_handle<T: Object>(obj: &T) -> RawHandle {
    RawHandle::new(NonNull::from(obj))
}

/// Promotes a borrowed object into an owning handle by retaining it.
pub(crate) fn retain_handle<T: Object>(obj: &T) -> Handle<T> {
    obj.object_core().retain();
    unsafe { Handle::from_raw(NonNull::from(obj)) }
}

/// Destroys an object found resting at zero references (see
/// [`ObjectCore::try_claim_zero`]). No-op when another thread got there
/// first or the count is nonzero.
pub(crate) fn destroy_if_unreferenced(handle: RawHandle) {
    if handle.core().try_claim_zero() {
        unsafe { destroy(handle) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        core: ObjectCore,
    }

    unsafe impl Object for Probe {
        const TYPE: ObjectType = ObjectType::Sampler;

        fn object_core(&self) -> &ObjectCore {
            &self.core
        }
    }

    #[test]
    fn live_set_tracks_creation_and_destruction() {
        let h = new_object(Probe { core: ObjectCore::new(ObjectType::Sampler, None) });
        let addr = h.as_raw_addr();

        assert!(is_live_object(addr, ObjectType::Sampler));
        assert!(!is_live_object(addr, ObjectType::Event));
        assert_eq!(h.references(), 1);

        let h2 = h.clone();
        assert_eq!(h.references(), 2);
        drop(h2);
        drop(h);

        assert!(!is_live_object(addr, ObjectType::Sampler));
    }

    #[test]
    fn parent_is_retained_by_child_and_released_on_destroy() {
        let parent = new_object(Probe { core: ObjectCore::new(ObjectType::Sampler, None) });
        let parent_addr = parent.as_raw_addr();

        let child = new_object(Probe {
            core: ObjectCore::new(ObjectType::Sampler, Some(parent.raw())),
        });
        assert_eq!(parent.references(), 2);

        drop(parent);
        assert!(is_live_object(parent_addr, ObjectType::Sampler));

        drop(child);
        assert!(!is_live_object(parent_addr, ObjectType::Sampler));
    }

    #[test]
    fn disabled_release_parent_leaves_parent_alive() {
        let parent = new_object(Probe { core: ObjectCore::new(ObjectType::Sampler, None) });
        let parent_addr = parent.as_raw_addr();
        let parent_raw = parent.raw();

        let child = new_object(Probe {
            core: ObjectCore::new(ObjectType::Sampler, Some(parent.raw())),
        });

        // The sweep pattern: the parent gives up its own handle, the child
        // is destroyed with the cascade disabled, then the parent is
        // reaped explicitly.
        drop(parent);
        child.object_core().set_release_parent(false);
        drop(child);

        assert!(is_live_object(parent_addr, ObjectType::Sampler));

        let parent_ref = parent_raw.upgrade::<Probe>().unwrap();
        // upgrade retained: 0 -> 1; drop returns to zero and destroys.
        drop(parent_ref);
        assert!(!is_live_object(parent_addr, ObjectType::Sampler));
    }
}
