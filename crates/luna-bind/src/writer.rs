//! Host to script conversion.

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::hash::BuildHasher;

use luna_engine::{State, Value};

use crate::dispatch::{cmax, cmin, AssertSingleSlot, Category, EmptyArray, Marshal, Nil, Pairs};
use crate::error::{BindError, BindResult, HostError};

/// Writes a host value onto the stack.
///
/// `push` returns the number of slots written. It either succeeds completely
/// or leaves the stack as it found it.
pub trait Push: Marshal + Sized {
    /// Push `self` and report how many slots it took.
    fn push(self, state: &State) -> BindResult<usize>;
}

impl Marshal for bool {
    const CATEGORY: Category = Category::Bool;
}

impl Push for bool {
    fn push(self, state: &State) -> BindResult<usize> {
        state.push(self)?;
        Ok(1)
    }
}

macro_rules! impl_push_number {
    ($($ty:ty),*) => {$(
        impl Marshal for $ty {
            const CATEGORY: Category = Category::Number;
        }

        impl Push for $ty {
            fn push(self, state: &State) -> BindResult<usize> {
                state.push(self as f64)?;
                Ok(1)
            }
        }
    )*};
}

impl_push_number!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl Marshal for String {
    const CATEGORY: Category = Category::String;
}

impl Push for String {
    fn push(self, state: &State) -> BindResult<usize> {
        state.push(self)?;
        Ok(1)
    }
}

impl Marshal for &str {
    const CATEGORY: Category = Category::String;
}

impl Push for &str {
    fn push(self, state: &State) -> BindResult<usize> {
        state.push(self)?;
        Ok(1)
    }
}

impl Push for Nil {
    fn push(self, state: &State) -> BindResult<usize> {
        state.push_nil()?;
        Ok(1)
    }
}

impl Push for EmptyArray {
    fn push(self, state: &State) -> BindResult<usize> {
        state.new_table()?;
        Ok(1)
    }
}

impl Marshal for Value {
    const CATEGORY: Category = Category::Dynamic;
}

impl Push for Value {
    fn push(self, state: &State) -> BindResult<usize> {
        state.push(self)?;
        Ok(1)
    }
}

/// Push a new table and fill it from `entries`, popping the table again if an
/// entry fails.
fn push_table<K, V>(state: &State, entries: impl IntoIterator<Item = (K, V)>) -> BindResult<usize>
where
    K: Push,
    V: Push,
{
    let () = AssertSingleSlot::<K>::OK;
    let () = AssertSingleSlot::<V>::OK;

    let base = state.top();
    state.new_table()?;
    let table = state.abs_index(-1);
    for (key, value) in entries {
        let filled = key
            .push(state)
            .and_then(|_| value.push(state))
            .and_then(|_| state.set_table(table).map_err(BindError::from));
        if let Err(err) = filled {
            state.set_top(base);
            return Err(err);
        }
    }
    Ok(1)
}

impl<T: Marshal> Marshal for Vec<T> {
    const CATEGORY: Category = Category::Sequence;
}

impl<T: Push> Push for Vec<T> {
    fn push(self, state: &State) -> BindResult<usize> {
        push_table(state, (1i64..).zip(self))
    }
}

impl<K: Marshal, V: Marshal, S> Marshal for HashMap<K, V, S> {
    const CATEGORY: Category = Category::AssocMap;
}

impl<K: Push, V: Push, S: BuildHasher> Push for HashMap<K, V, S> {
    fn push(self, state: &State) -> BindResult<usize> {
        push_table(state, self)
    }
}

impl<K: Marshal, V: Marshal> Marshal for BTreeMap<K, V> {
    const CATEGORY: Category = Category::AssocMap;
}

impl<K: Push, V: Push> Push for BTreeMap<K, V> {
    fn push(self, state: &State) -> BindResult<usize> {
        push_table(state, self)
    }
}

impl<K: Push, V: Push> Push for Pairs<K, V> {
    fn push(self, state: &State) -> BindResult<usize> {
        push_table(state, self.0)
    }
}

impl<T: Marshal> Marshal for Option<T> {
    const CATEGORY: Category = Category::Optional;
    const MIN_SLOTS: usize = cmin(1, T::MIN_SLOTS);
    const MAX_SLOTS: usize = cmax(1, T::MAX_SLOTS);
}

impl<T: Push> Push for Option<T> {
    fn push(self, state: &State) -> BindResult<usize> {
        match self {
            Some(value) => value.push(state),
            None => {
                state.push_nil()?;
                Ok(1)
            }
        }
    }
}

/// A failed result is raised as a script error carrying the host error.
impl<T: Marshal, E> Marshal for Result<T, E> {
    const CATEGORY: Category = T::CATEGORY;
    const MIN_SLOTS: usize = T::MIN_SLOTS;
    const MAX_SLOTS: usize = T::MAX_SLOTS;
}

impl<T, E> Push for Result<T, E>
where
    T: Push,
    E: Into<Box<dyn Error + 'static>>,
{
    fn push(self, state: &State) -> BindResult<usize> {
        match self {
            Ok(value) => value.push(state),
            Err(err) => Err(BindError::Host(HostError::new(err))),
        }
    }
}

impl Marshal for () {
    const CATEGORY: Category = Category::Tuple;
    const MIN_SLOTS: usize = 0;
    const MAX_SLOTS: usize = 0;
}

impl Push for () {
    fn push(self, _state: &State) -> BindResult<usize> {
        Ok(0)
    }
}

macro_rules! impl_push_tuple {
    ($($name:ident)+) => {
        impl<$($name: Marshal),+> Marshal for ($($name,)+) {
            const CATEGORY: Category = Category::Tuple;
            const MIN_SLOTS: usize = 0 $(+ $name::MIN_SLOTS)+;
            const MAX_SLOTS: usize = 0 $(+ $name::MAX_SLOTS)+;
        }

        impl<$($name: Push),+> Push for ($($name,)+) {
            #[allow(non_snake_case)]
            fn push(self, state: &State) -> BindResult<usize> {
                let base = state.top();
                let ($($name,)+) = self;
                let mut written = 0;
                $(
                    match $name.push(state) {
                        Ok(n) => written += n,
                        Err(err) => {
                            state.set_top(base);
                            return Err(err);
                        }
                    }
                )+
                Ok(written)
            }
        }
    };
}

impl_push_tuple!(A);
impl_push_tuple!(A B);
impl_push_tuple!(A B C);
impl_push_tuple!(A B C D);
impl_push_tuple!(A B C D E);
impl_push_tuple!(A B C D E F);
impl_push_tuple!(A B C D E F G);
impl_push_tuple!(A B C D E F G H);

#[cfg(test)]
mod tests {
    use super::*;
    use luna_engine::Type;

    #[test]
    fn test_primitives_take_one_slot() {
        let state = State::new();
        assert_eq!(true.push(&state).unwrap(), 1);
        assert_eq!(42i32.push(&state).unwrap(), 1);
        assert_eq!("hi".push(&state).unwrap(), 1);
        assert_eq!(Nil.push(&state).unwrap(), 1);
        assert_eq!(state.top(), 4);
        assert_eq!(state.to_number(2), Some(42.0));
        assert!(state.is_nil(4));
    }

    #[test]
    fn test_sequence_is_one_based() {
        let state = State::new();
        Push::push(vec![10, 20, 30], &state).unwrap();
        assert_eq!(state.type_of(-1), Type::Table);
        state.raw_get_index(-1, 1).unwrap();
        assert_eq!(state.to_number(-1), Some(10.0));
        state.pop(1);
        state.raw_get_index(-1, 3).unwrap();
        assert_eq!(state.to_number(-1), Some(30.0));
    }

    #[test]
    fn test_tuple_counts_slots() {
        let state = State::new();
        assert_eq!((1, "two", (3.0, false)).push(&state).unwrap(), 4);
        assert_eq!(().push(&state).unwrap(), 0);
        assert_eq!(state.top(), 4);
        assert_eq!(<(i32, (f64, bool))>::MAX_SLOTS, 3);
    }

    #[test]
    fn test_failed_tuple_write_restores_stack() {
        let state = State::new();
        state.push(1.0).unwrap();
        let value: (i32, Result<i32, String>) = (5, Err("refused".to_string()));
        let err = value.push(&state).unwrap_err();
        assert!(matches!(err, BindError::Host(_)));
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_optional_writes_nil() {
        let state = State::new();
        assert_eq!(None::<i32>.push(&state).unwrap(), 1);
        assert!(state.is_nil(-1));
        assert_eq!(<Option<i32>>::MIN_SLOTS, 1);
    }
}
