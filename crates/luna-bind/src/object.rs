//! Host objects: the opaque-object category and its reference shapes.
//!
//! A host type opts in by implementing [`UserData`] (usually through
//! `#[derive(UserData)]`). It can then be written in five shapes, each with
//! its own type identity and registration table:
//!
//! | Shape | Meaning |
//! |---|---|
//! | `T` | value, owned by the runtime |
//! | `Weak<RefCell<T>>` | pointer |
//! | `Weak<T>` | const pointer |
//! | `Rc<RefCell<T>>` | shared |
//! | `Rc<T>` | const shared |
//!
//! Reading an object checks the exact shape: a `Foo` is never read as a
//! `Bar`, and a `Foo` value is not read as an `Rc<RefCell<Foo>>`.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use luna_engine::{AccessError, State, UserData as RawUserData, Value};

use crate::dispatch::{Category, Marshal};
use crate::error::{BindError, BindResult};
use crate::reader::FromStack;
use crate::registry;
use crate::writer::Push;

/// A host type that can be bound as an opaque script object.
pub trait UserData: Any {
    /// Name shown to scripts, for instance in `tostring` output.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// One of the reference shapes a bound object can have.
pub trait Shape: Any + Sized {
    /// The object type behind the reference
    type Target: UserData;

    /// Whether methods taking `&mut Target` can run through this shape
    const MUTABLE: bool;

    /// Run `f` on a shared view of the target.
    fn access<R>(&self, f: impl FnOnce(&Self::Target) -> R) -> BindResult<R>;

    /// Run `f` on an exclusive view of the target.
    fn access_mut<R>(&mut self, f: impl FnOnce(&mut Self::Target) -> R) -> BindResult<R>;
}

fn dangling<T: UserData>() -> BindError {
    BindError::execution(format!("{} reference is dangling", T::type_name()))
}

fn busy<T: UserData>() -> BindError {
    BindError::execution(format!("{} is already borrowed", T::type_name()))
}

fn immutable<T: UserData>() -> BindError {
    BindError::execution(format!("cannot mutate a const {}", T::type_name()))
}

pub(crate) fn access_error(err: AccessError) -> BindError {
    BindError::execution(err.to_string())
}

impl<T: UserData> Shape for T {
    type Target = T;
    const MUTABLE: bool = true;

    fn access<R>(&self, f: impl FnOnce(&T) -> R) -> BindResult<R> {
        Ok(f(self))
    }

    fn access_mut<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> BindResult<R> {
        Ok(f(self))
    }
}

impl<T: UserData> Shape for Rc<RefCell<T>> {
    type Target = T;
    const MUTABLE: bool = true;

    fn access<R>(&self, f: impl FnOnce(&T) -> R) -> BindResult<R> {
        let target = self.try_borrow().map_err(|_| busy::<T>())?;
        Ok(f(&target))
    }

    fn access_mut<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> BindResult<R> {
        let mut target = self.try_borrow_mut().map_err(|_| busy::<T>())?;
        Ok(f(&mut target))
    }
}

impl<T: UserData> Shape for Weak<RefCell<T>> {
    type Target = T;
    const MUTABLE: bool = true;

    fn access<R>(&self, f: impl FnOnce(&T) -> R) -> BindResult<R> {
        let shared = self.upgrade().ok_or_else(dangling::<T>)?;
        <Rc<RefCell<T>> as Shape>::access(&shared, f)
    }

    fn access_mut<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> BindResult<R> {
        let mut shared = self.upgrade().ok_or_else(dangling::<T>)?;
        <Rc<RefCell<T>> as Shape>::access_mut(&mut shared, f)
    }
}

impl<T: UserData> Shape for Rc<T> {
    type Target = T;
    const MUTABLE: bool = false;

    fn access<R>(&self, f: impl FnOnce(&T) -> R) -> BindResult<R> {
        Ok(f(self))
    }

    fn access_mut<R>(&mut self, _f: impl FnOnce(&mut T) -> R) -> BindResult<R> {
        Err(immutable::<T>())
    }
}

impl<T: UserData> Shape for Weak<T> {
    type Target = T;
    const MUTABLE: bool = false;

    fn access<R>(&self, f: impl FnOnce(&T) -> R) -> BindResult<R> {
        let target = self.upgrade().ok_or_else(dangling::<T>)?;
        Ok(f(&target))
    }

    fn access_mut<R>(&mut self, _f: impl FnOnce(&mut T) -> R) -> BindResult<R> {
        Err(immutable::<T>())
    }
}

/// Whether the slot holds a live object of exactly shape `S`.
pub(crate) fn is_object<S: Shape>(state: &State, idx: i32) -> bool {
    state.to_userdata(idx).is_some_and(|ud| ud.is::<S>())
}

fn object_at<S: Shape>(state: &State, idx: i32) -> BindResult<Rc<RawUserData>> {
    match state.to_userdata(idx) {
        Some(ud) if ud.is::<S>() => Ok(ud),
        _ => Err(crate::reader::wrong_type::<S>(state, idx)),
    }
}

/// Clone the shape payload stored at `idx`.
fn clone_payload<S: Shape + Clone>(state: &State, idx: i32) -> BindResult<S> {
    let ud = object_at::<S>(state, idx)?;
    let payload = ud.borrow::<S>().map_err(access_error)?;
    Ok(payload.clone())
}

impl<T: UserData> Marshal for T {
    const CATEGORY: Category = Category::Object;
}

impl<T: UserData> Push for T {
    fn push(self, state: &State) -> BindResult<usize> {
        registry::push_object(state, self)
    }
}

impl<T: UserData + Clone> FromStack for T {
    fn test(state: &State, idx: i32) -> bool {
        is_object::<T>(state, idx)
    }

    fn read(state: &State, idx: i32) -> BindResult<Self> {
        clone_payload::<T>(state, idx)
    }
}

macro_rules! impl_reference_shape {
    ($shape:ty, $category:expr) => {
        impl<T: UserData> Marshal for $shape {
            const CATEGORY: Category = $category;
        }

        impl<T: UserData> Push for $shape {
            fn push(self, state: &State) -> BindResult<usize> {
                registry::push_object(state, self)
            }
        }

        impl<T: UserData> FromStack for $shape {
            fn test(state: &State, idx: i32) -> bool {
                is_object::<$shape>(state, idx)
            }

            fn read(state: &State, idx: i32) -> BindResult<Self> {
                clone_payload::<$shape>(state, idx)
            }
        }
    };
}

impl_reference_shape!(Rc<RefCell<T>>, Category::SmartPointer);
impl_reference_shape!(Rc<T>, Category::SmartPointer);
impl_reference_shape!(Weak<RefCell<T>>, Category::Object);
impl_reference_shape!(Weak<T>, Category::Object);

/// A uniquely owned object.
///
/// Writing it moves the value into an `Rc<RefCell<T>>`, which is the shape
/// scripts and later reads see.
#[derive(Debug)]
pub struct Unique<T>(pub Box<T>);

impl<T> Unique<T> {
    /// Box a value.
    pub fn new(value: T) -> Self {
        Unique(Box::new(value))
    }

    /// The shared form this value is written as.
    pub fn into_shared(self) -> Rc<RefCell<T>> {
        Rc::new(RefCell::new(*self.0))
    }
}

impl<T> From<Box<T>> for Unique<T> {
    fn from(boxed: Box<T>) -> Self {
        Unique(boxed)
    }
}

impl<T: UserData> Marshal for Unique<T> {
    const CATEGORY: Category = Category::SmartPointer;
}

impl<T: UserData> Push for Unique<T> {
    fn push(self, state: &State) -> BindResult<usize> {
        self.into_shared().push(state)
    }
}

/// A bound object read in place.
///
/// Unlike reading `T` itself, which clones the payload, an `ObjectRef`
/// refers to the very instance the script holds, and writing it back pushes
/// that same instance.
pub struct ObjectRef<S> {
    ud: Rc<RawUserData>,
    _shape: PhantomData<S>,
}

impl<S: Shape> ObjectRef<S> {
    /// Borrow the target.
    pub fn with_ref<R>(&self, f: impl FnOnce(&S::Target) -> R) -> BindResult<R> {
        let payload = self.ud.borrow::<S>().map_err(access_error)?;
        S::access(&payload, f)
    }

    /// Mutably borrow the target.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut S::Target) -> R) -> BindResult<R> {
        let mut payload = self.ud.borrow_mut::<S>().map_err(access_error)?;
        S::access_mut(&mut payload, f)
    }

    /// Whether both handles refer to the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.ud, &other.ud)
    }
}

impl<S> Clone for ObjectRef<S> {
    fn clone(&self) -> Self {
        Self {
            ud: Rc::clone(&self.ud),
            _shape: PhantomData,
        }
    }
}

impl<S: Shape> fmt::Debug for ObjectRef<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("type", &S::Target::type_name())
            .finish()
    }
}

impl<S: Shape> Marshal for ObjectRef<S> {
    const CATEGORY: Category = Category::Object;
}

impl<S: Shape> Push for ObjectRef<S> {
    fn push(self, state: &State) -> BindResult<usize> {
        state.push(Value::UserData(self.ud))?;
        Ok(1)
    }
}

impl<S: Shape> FromStack for ObjectRef<S> {
    fn test(state: &State, idx: i32) -> bool {
        is_object::<S>(state, idx)
    }

    fn read(state: &State, idx: i32) -> BindResult<Self> {
        Ok(Self {
            ud: object_at::<S>(state, idx)?,
            _shape: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        value: i32,
    }

    impl UserData for Counter {
        fn type_name() -> &'static str {
            "Counter"
        }
    }

    #[test]
    fn test_shared_shape_access() {
        let mut shared = Rc::new(RefCell::new(Counter { value: 1 }));
        shared.access_mut(|c| c.value += 1).unwrap();
        assert_eq!(shared.access(|c| c.value).unwrap(), 2);

        let guard = shared.borrow_mut();
        let err = shared.access(|c| c.value).unwrap_err();
        assert_eq!(err.to_string(), "Counter is already borrowed");
        drop(guard);
    }

    #[test]
    fn test_dangling_weak_is_an_error() {
        let shared = Rc::new(RefCell::new(Counter { value: 1 }));
        let mut weak = Rc::downgrade(&shared);
        assert_eq!(weak.access(|c| c.value).unwrap(), 1);
        drop(shared);
        let err = weak.access_mut(|c| c.value = 5).unwrap_err();
        assert_eq!(err.to_string(), "Counter reference is dangling");
    }

    #[test]
    fn test_const_shapes_reject_mutation() {
        let mut constant = Rc::new(Counter { value: 3 });
        assert_eq!(constant.access(|c| c.value).unwrap(), 3);
        assert!(constant.access_mut(|c| c.value = 4).is_err());
        assert!(!<Rc<Counter> as Shape>::MUTABLE);
        assert!(<Weak<RefCell<Counter>> as Shape>::MUTABLE);
    }

    #[test]
    fn test_unique_normalizes_to_shared() {
        let unique = Unique::new(Counter { value: 7 });
        let shared = unique.into_shared();
        assert_eq!(shared.borrow().value, 7);
    }
}
