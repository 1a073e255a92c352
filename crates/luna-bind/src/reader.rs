//! Script to host conversion.
//!
//! Reading follows four access modes: [`FromStack::test`] is a pure
//! predicate, [`FromStack::read`] extracts assuming the test passed, and the
//! combined [`test_read`](FromStack::test_read) and
//! [`read_safe`](FromStack::read_safe) report a mismatch as `None` or as a
//! [`BindError::WrongType`] respectively.
//!
//! Numbers are only read as integers when they have no fractional part.
//! Strings holding numbers read as numbers and numbers read as strings.

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use luna_engine::{State, Type, Value};

use crate::dispatch::{required_slots, AssertSingleSlot, EmptyArray, Marshal, Nil, Pairs};
use crate::error::{BindError, BindResult};

/// Reads a host value from the stack.
pub trait FromStack: Marshal + Sized {
    /// Whether an argument of this type may be left out of a call
    const OPTIONAL: bool = false;

    /// Whether the slot(s) starting at `idx` hold a value of this type.
    fn test(state: &State, idx: i32) -> bool;

    /// Extract the value, assuming [`test`](Self::test) passed.
    fn read(state: &State, idx: i32) -> BindResult<Self>;

    /// Test and read, `None` on mismatch.
    fn test_read(state: &State, idx: i32) -> Option<Self> {
        if Self::test(state, idx) {
            Self::read(state, idx).ok()
        } else {
            None
        }
    }

    /// Test and read, [`BindError::WrongType`] on mismatch.
    fn read_safe(state: &State, idx: i32) -> BindResult<Self> {
        if Self::test(state, idx) {
            Self::read(state, idx)
        } else {
            Err(wrong_type::<Self>(state, idx))
        }
    }

    /// Value used when an optional trailing argument was not provided.
    fn absent() -> Option<Self> {
        None
    }
}

/// The error for reading the slot at `idx` as a `T`.
pub fn wrong_type<T: ?Sized>(state: &State, idx: i32) -> BindError {
    BindError::WrongType {
        observed: state.type_name(idx).to_string(),
        target: std::any::type_name::<T>(),
    }
}

impl FromStack for bool {
    fn test(state: &State, idx: i32) -> bool {
        state.is_boolean(idx)
    }

    fn read(state: &State, idx: i32) -> BindResult<Self> {
        Ok(state.to_boolean(idx))
    }
}

/// The number at `idx` if it is whole and within `min..end`.
///
/// `end` is one past the type's maximum. For 64-bit types `MAX as f64`
/// already rounds up to `2^63` or `2^64`, and adding one leaves it there.
fn integral(state: &State, idx: i32, min: f64, end: f64) -> Option<f64> {
    state
        .to_number(idx)
        .filter(|n| n % 1.0 == 0.0 && *n >= min && *n < end)
}

macro_rules! impl_read_integer {
    ($($ty:ty),*) => {$(
        impl FromStack for $ty {
            fn test(state: &State, idx: i32) -> bool {
                integral(state, idx, <$ty>::MIN as f64, <$ty>::MAX as f64 + 1.0).is_some()
            }

            fn read(state: &State, idx: i32) -> BindResult<Self> {
                integral(state, idx, <$ty>::MIN as f64, <$ty>::MAX as f64 + 1.0)
                    .map(|n| n as $ty)
                    .ok_or_else(|| wrong_type::<$ty>(state, idx))
            }
        }
    )*};
}

impl_read_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_read_float {
    ($($ty:ty),*) => {$(
        impl FromStack for $ty {
            fn test(state: &State, idx: i32) -> bool {
                state.to_number(idx).is_some()
            }

            fn read(state: &State, idx: i32) -> BindResult<Self> {
                state
                    .to_number(idx)
                    .map(|n| n as $ty)
                    .ok_or_else(|| wrong_type::<$ty>(state, idx))
            }
        }
    )*};
}

impl_read_float!(f32, f64);

impl FromStack for String {
    fn test(state: &State, idx: i32) -> bool {
        matches!(state.type_of(idx), Type::String | Type::Number)
    }

    fn read(state: &State, idx: i32) -> BindResult<Self> {
        state
            .to_string(idx)
            .map(|s| s.to_string())
            .ok_or_else(|| wrong_type::<String>(state, idx))
    }
}

impl FromStack for Nil {
    const OPTIONAL: bool = true;

    fn test(state: &State, idx: i32) -> bool {
        state.is_none_or_nil(idx)
    }

    fn read(_state: &State, _idx: i32) -> BindResult<Self> {
        Ok(Nil)
    }

    fn absent() -> Option<Self> {
        Some(Nil)
    }
}

impl FromStack for EmptyArray {
    fn test(state: &State, idx: i32) -> bool {
        state
            .to_table(idx)
            .is_some_and(|t| t.borrow().is_empty())
    }

    fn read(_state: &State, _idx: i32) -> BindResult<Self> {
        Ok(EmptyArray)
    }
}

impl FromStack for Value {
    fn test(_state: &State, _idx: i32) -> bool {
        true
    }

    fn read(state: &State, idx: i32) -> BindResult<Self> {
        Ok(state.value(idx))
    }
}

/// Visit every key/value pair of the table at `idx`.
///
/// During `visit` the key sits at -2 and the value at -1. Returning `false`
/// from `visit` (or an error) stops the traversal; both leave the stack as
/// it was before the call.
fn traverse(
    state: &State,
    idx: i32,
    mut visit: impl FnMut() -> BindResult<bool>,
) -> BindResult<bool> {
    let table = state.abs_index(idx);
    let base = state.top();
    state.push_nil()?;
    loop {
        let more = match state.next(table) {
            Ok(more) => more,
            Err(err) => {
                state.set_top(base);
                return Err(err.into());
            }
        };
        if !more {
            return Ok(true);
        }
        match visit() {
            Ok(true) => state.pop(1),
            Ok(false) => {
                state.set_top(base);
                return Ok(false);
            }
            Err(err) => {
                state.set_top(base);
                return Err(err);
            }
        }
    }
}

/// Position of a sequence key: an integer number of at least 1.
fn sequence_position(state: &State, idx: i32) -> Option<usize> {
    match state.value(idx) {
        Value::Number(n) if n >= 1.0 && n % 1.0 == 0.0 => Some(n as usize),
        _ => None,
    }
}

impl<T: FromStack> FromStack for Vec<T> {
    fn test(state: &State, idx: i32) -> bool {
        let () = AssertSingleSlot::<T>::OK;
        if !state.is_table(idx) {
            return false;
        }
        // Distinct integer keys all within 1..=count are exactly 1..=count
        let mut positions = Vec::new();
        let all = traverse(state, idx, || {
            match sequence_position(state, -2) {
                Some(at) if T::test(state, -1) => positions.push(at),
                _ => return Ok(false),
            }
            Ok(true)
        });
        let count = positions.len();
        matches!(all, Ok(true)) && positions.iter().all(|&at| at <= count)
    }

    fn read(state: &State, idx: i32) -> BindResult<Self> {
        let mut items = Vec::new();
        traverse(state, idx, || {
            let at = sequence_position(state, -2).ok_or_else(|| wrong_type::<Self>(state, -2))?;
            items.push((at, T::read_safe(state, -1)?));
            Ok(true)
        })?;

        items.sort_by_key(|(at, _)| *at);
        if items.iter().enumerate().any(|(i, (at, _))| *at != i + 1) {
            return Err(wrong_type::<Self>(state, idx));
        }
        Ok(items.into_iter().map(|(_, item)| item).collect())
    }
}

fn test_entries<K: FromStack, V: FromStack>(state: &State, idx: i32) -> bool {
    let () = AssertSingleSlot::<K>::OK;
    let () = AssertSingleSlot::<V>::OK;
    state.is_table(idx)
        && matches!(
            traverse(state, idx, || Ok(K::test(state, -2) && V::test(state, -1))),
            Ok(true)
        )
}

fn read_entries<K: FromStack, V: FromStack>(
    state: &State,
    idx: i32,
    mut insert: impl FnMut(K, V),
) -> BindResult<()> {
    traverse(state, idx, || {
        let key = K::read_safe(state, -2)?;
        let value = V::read_safe(state, -1)?;
        insert(key, value);
        Ok(true)
    })?;
    Ok(())
}

impl<K, V, S> FromStack for HashMap<K, V, S>
where
    K: FromStack + Eq + Hash,
    V: FromStack,
    S: BuildHasher + Default,
{
    fn test(state: &State, idx: i32) -> bool {
        test_entries::<K, V>(state, idx)
    }

    fn read(state: &State, idx: i32) -> BindResult<Self> {
        let mut map = HashMap::default();
        read_entries(state, idx, |k, v| {
            map.insert(k, v);
        })?;
        Ok(map)
    }
}

impl<K, V> FromStack for BTreeMap<K, V>
where
    K: FromStack + Ord,
    V: FromStack,
{
    fn test(state: &State, idx: i32) -> bool {
        test_entries::<K, V>(state, idx)
    }

    fn read(state: &State, idx: i32) -> BindResult<Self> {
        let mut map = BTreeMap::new();
        read_entries(state, idx, |k, v| {
            map.insert(k, v);
        })?;
        Ok(map)
    }
}

impl<K: FromStack, V: FromStack> FromStack for Pairs<K, V> {
    fn test(state: &State, idx: i32) -> bool {
        test_entries::<K, V>(state, idx)
    }

    fn read(state: &State, idx: i32) -> BindResult<Self> {
        let mut pairs = Vec::new();
        read_entries(state, idx, |k, v| pairs.push((k, v)))?;
        Ok(Pairs(pairs))
    }
}

impl<T: FromStack> FromStack for Option<T> {
    const OPTIONAL: bool = true;

    fn test(state: &State, idx: i32) -> bool {
        state.is_none_or_nil(idx) || T::test(state, idx)
    }

    fn read(state: &State, idx: i32) -> BindResult<Self> {
        if state.is_none_or_nil(idx) {
            Ok(None)
        } else {
            T::read(state, idx).map(Some)
        }
    }

    fn absent() -> Option<Self> {
        Some(None)
    }
}

impl FromStack for () {
    fn test(_state: &State, _idx: i32) -> bool {
        true
    }

    fn read(_state: &State, _idx: i32) -> BindResult<Self> {
        Ok(())
    }
}

macro_rules! impl_read_tuple {
    ($($name:ident)+) => {
        impl<$($name: FromStack),+> FromStack for ($($name,)+) {
            fn test(state: &State, idx: i32) -> bool {
                let mut at = state.abs_index(idx);
                $(
                    if !$name::test(state, at) {
                        return false;
                    }
                    at += $name::MAX_SLOTS as i32;
                )+
                let _ = at;
                true
            }

            fn read(state: &State, idx: i32) -> BindResult<Self> {
                let mut at = state.abs_index(idx);
                let value = ($({
                    let item = $name::read_safe(state, at)?;
                    at += $name::MAX_SLOTS as i32;
                    item
                },)+);
                let _ = at;
                Ok(value)
            }
        }
    };
}

impl_read_tuple!(A);
impl_read_tuple!(A B);
impl_read_tuple!(A B C);
impl_read_tuple!(A B C D);
impl_read_tuple!(A B C D E);
impl_read_tuple!(A B C D E F);
impl_read_tuple!(A B C D E F G);
impl_read_tuple!(A B C D E F G H);

/// A host function's argument list.
///
/// Implemented for tuples of [`FromStack`] types. `MIN` and `MAX` bound the
/// number of arguments a call may provide.
pub trait FromArgs: Sized {
    /// Fewest arguments a caller must provide
    const MIN: usize;

    /// Most arguments a caller may provide
    const MAX: usize;

    /// Decode the `provided` arguments starting at slot `first`.
    ///
    /// Optional parameters past the provided ones take their absent value.
    /// On failure returns the 1-based position of the offending parameter.
    fn read_args(state: &State, first: i32, provided: usize) -> Result<Self, (usize, BindError)>;
}

/// Read one argument, or its absent value when the window is used up.
fn read_arg<T: FromStack>(
    state: &State,
    first: i32,
    provided: usize,
    offset: &mut usize,
    position: usize,
) -> Result<T, (usize, BindError)> {
    if *offset >= provided {
        return T::absent().ok_or_else(|| {
            (
                position,
                BindError::WrongType {
                    observed: Type::None.name().to_string(),
                    target: std::any::type_name::<T>(),
                },
            )
        });
    }
    let value = T::read_safe(state, first + *offset as i32).map_err(|e| (position, e))?;
    *offset += T::MAX_SLOTS;
    Ok(value)
}

impl FromArgs for () {
    const MIN: usize = 0;
    const MAX: usize = 0;

    fn read_args(_state: &State, _first: i32, _provided: usize) -> Result<Self, (usize, BindError)> {
        Ok(())
    }
}

macro_rules! impl_from_args {
    ($($name:ident $position:literal)+) => {
        impl<$($name: FromStack),+> FromArgs for ($($name,)+) {
            const MIN: usize = required_slots(&[$(($name::MIN_SLOTS, $name::OPTIONAL)),+]);
            const MAX: usize = 0 $(+ $name::MAX_SLOTS)+;

            fn read_args(
                state: &State,
                first: i32,
                provided: usize,
            ) -> Result<Self, (usize, BindError)> {
                let mut offset = 0;
                Ok(($(read_arg::<$name>(state, first, provided, &mut offset, $position)?,)+))
            }
        }
    };
}

impl_from_args!(A 1);
impl_from_args!(A 1 B 2);
impl_from_args!(A 1 B 2 C 3);
impl_from_args!(A 1 B 2 C 3 D 4);
impl_from_args!(A 1 B 2 C 3 D 4 E 5);
impl_from_args!(A 1 B 2 C 3 D 4 E 5 F 6);
impl_from_args!(A 1 B 2 C 3 D 4 E 5 F 6 G 7);
impl_from_args!(A 1 B 2 C 3 D 4 E 5 F 6 G 7 H 8);

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(state: &State, source: &str) {
        assert_eq!(state.load(source, "test"), luna_engine::Status::Ok);
        state.call(0, Some(1)).unwrap();
    }

    #[test]
    fn test_integers_require_zero_fraction() {
        let state = State::new();
        state.push(3.0).unwrap();
        state.push(3.5).unwrap();
        state.push("12").unwrap();
        state.push(300.0).unwrap();
        assert_eq!(i32::read_safe(&state, 1).unwrap(), 3);
        assert!(!i32::test(&state, 2));
        assert_eq!(i64::read_safe(&state, 3).unwrap(), 12);
        assert!(u8::test_read(&state, 4).is_none());
        assert_eq!(f64::read_safe(&state, 2).unwrap(), 3.5);
    }

    #[test]
    fn test_integer_range_edges() {
        let state = State::new();
        state.push(2f64.powi(63)).unwrap();
        state.push(2f64.powi(64)).unwrap();
        state.push(-(2f64.powi(63))).unwrap();
        state.push(2f64.powi(31)).unwrap();
        assert!(!i64::test(&state, 1));
        assert!(u64::test(&state, 1));
        assert!(!u64::test(&state, 2));
        assert_eq!(i64::read_safe(&state, 3).unwrap(), i64::MIN);
        assert!(!i32::test(&state, 4));
        assert_eq!(u32::read_safe(&state, 4).unwrap(), 1 << 31);
    }

    #[test]
    fn test_strings_accept_numbers() {
        let state = State::new();
        state.push(24.0).unwrap();
        assert_eq!(String::read_safe(&state, -1).unwrap(), "24");
        state.push(true).unwrap();
        let err = String::read_safe(&state, -1).unwrap_err();
        assert!(matches!(err, BindError::WrongType { ref observed, .. } if observed == "boolean"));
    }

    #[test]
    fn test_sequence_order_and_holes() {
        let state = State::new();
        eval(&state, "return { [2] = 'b', [1] = 'a', [3] = 'c' }");
        assert_eq!(
            Vec::<String>::read_safe(&state, -1).unwrap(),
            vec!["a", "b", "c"]
        );
        assert_eq!(state.top(), 1);

        eval(&state, "return { [1] = 1, [3] = 3 }");
        assert!(!Vec::<i32>::test(&state, -1));
        assert!(Vec::<i32>::read(&state, -1).is_err());
        assert_eq!(state.top(), 2);
    }

    #[test]
    fn test_failed_element_read_keeps_stack_balanced() {
        let state = State::new();
        eval(&state, "return { 1, 2, 'three' }");
        assert!(Vec::<i32>::read(&state, -1).is_err());
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_optional_and_tuple() {
        let state = State::new();
        state.push_nil().unwrap();
        state.push(5.0).unwrap();
        state.push("x").unwrap();
        let (a, b, c) = <(Option<i32>, i32, String)>::read_safe(&state, 1).unwrap();
        assert_eq!((a, b, c.as_str()), (None, 5, "x"));
        assert_eq!(Option::<i32>::absent(), Some(None));
    }

    #[test]
    fn test_argument_bounds() {
        assert_eq!(<(i32, Option<i32>, Option<f64>)>::MIN, 1);
        assert_eq!(<(i32, Option<i32>, Option<f64>)>::MAX, 3);
        assert_eq!(<(Option<i32>, i32)>::MIN, 2);
        assert_eq!(<()>::MAX, 0);
    }

    #[test]
    fn test_missing_required_argument_reports_position() {
        let state = State::new();
        state.push(1.0).unwrap();
        let (position, _) = <(i32, i32)>::read_args(&state, 1, 1).unwrap_err();
        assert_eq!(position, 2);
        let (a, b) = <(i32, Option<f64>)>::read_args(&state, 1, 1).unwrap();
        assert_eq!((a, b), (1, None));
    }
}
