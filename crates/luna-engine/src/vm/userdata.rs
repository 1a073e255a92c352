//! Userdata: host payloads living inside the runtime.

use std::any::{Any, TypeId};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;

use super::memory::Charge;
use super::table::TableRef;

/// Failure to access a userdata payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    /// The payload has a different type
    #[error("userdata holds a {found}, not a {expected}")]
    TypeMismatch {
        /// Requested type
        expected: &'static str,
        /// Stored type
        found: &'static str,
    },

    /// The payload is already borrowed incompatibly
    #[error("userdata payload is already borrowed")]
    Borrowed,

    /// The payload was dropped by its finalizer
    #[error("userdata has been finalized")]
    Finalized,
}

/// A host value owned by the runtime.
///
/// The payload's exact [`TypeId`] is recorded at construction and is the
/// only type it can be accessed as.
pub struct UserData {
    payload: RefCell<Box<dyn Any>>,
    type_id: TypeId,
    type_name: &'static str,
    finalized: Cell<bool>,
    metatable: RefCell<Option<TableRef>>,
    _charge: Option<Charge>,
}

impl UserData {
    pub(crate) fn new<T: Any>(value: T, charge: Option<Charge>) -> Self {
        Self {
            payload: RefCell::new(Box::new(value)),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            finalized: Cell::new(false),
            metatable: RefCell::new(None),
            _charge: charge,
        }
    }

    /// Whether the payload is exactly a `T`.
    pub fn is<T: Any>(&self) -> bool {
        !self.finalized.get() && self.type_id == TypeId::of::<T>()
    }

    /// `TypeId` of the payload.
    pub fn payload_type(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name of the payload.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Shared access to the payload.
    pub fn borrow<T: Any>(&self) -> Result<Ref<'_, T>, AccessError> {
        self.check::<T>()?;
        let payload = self.payload.try_borrow().map_err(|_| AccessError::Borrowed)?;
        Ref::filter_map(payload, |b| b.downcast_ref::<T>()).map_err(|_| self.mismatch::<T>())
    }

    /// Exclusive access to the payload.
    pub fn borrow_mut<T: Any>(&self) -> Result<RefMut<'_, T>, AccessError> {
        self.check::<T>()?;
        let payload = self
            .payload
            .try_borrow_mut()
            .map_err(|_| AccessError::Borrowed)?;
        RefMut::filter_map(payload, |b| b.downcast_mut::<T>()).map_err(|_| self.mismatch::<T>())
    }

    /// The metatable, if any.
    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.borrow().clone()
    }

    /// Replace the metatable.
    pub fn set_metatable(&self, metatable: Option<TableRef>) {
        *self.metatable.borrow_mut() = metatable;
    }

    /// Drop the payload now. Returns false if it was already finalized or
    /// is currently borrowed.
    pub fn finalize(&self) -> bool {
        if self.finalized.get() {
            return false;
        }
        let Ok(mut payload) = self.payload.try_borrow_mut() else {
            return false;
        };
        self.finalized.set(true);
        let old = std::mem::replace(&mut *payload, Box::new(()));
        drop(payload);
        drop(old);
        true
    }

    /// Whether [`finalize`](Self::finalize) already ran.
    pub fn is_finalized(&self) -> bool {
        self.finalized.get()
    }

    fn check<T: Any>(&self) -> Result<(), AccessError> {
        if self.finalized.get() {
            return Err(AccessError::Finalized);
        }
        if self.type_id != TypeId::of::<T>() {
            return Err(self.mismatch::<T>());
        }
        Ok(())
    }

    fn mismatch<T: Any>(&self) -> AccessError {
        AccessError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            found: self.type_name,
        }
    }
}

impl fmt::Debug for UserData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserData")
            .field("type", &self.type_name)
            .field("finalized", &self.finalized.get())
            .finish()
    }
}
