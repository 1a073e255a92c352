//! Type categories and stack-slot accounting.
//!
//! Every marshalable host type implements [`Marshal`], which fixes its
//! [`Category`] and the range of stack slots its script form occupies. The
//! writer ([`Push`](crate::Push)) and reader ([`FromStack`](crate::FromStack))
//! traits build on it; adding a category means adding impls, never editing
//! existing ones.

use std::marker::PhantomData;

/// Marshaling category of a host type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// `bool`
    Bool,
    /// Strings and string slices
    String,
    /// Integers and floats
    Number,
    /// The [`Nil`] marker
    Nil,
    /// Fieldless enums marshaled as their discriminant
    Enum,
    /// `Vec<T>` and [`EmptyArray`]
    Sequence,
    /// `HashMap<K, V>` and `BTreeMap<K, V>`
    AssocMap,
    /// [`Pairs<K, V>`]
    SequenceOfPairs,
    /// `Option<T>`
    Optional,
    /// `OneOf2` to `OneOf5`
    SumType,
    /// Tuples, including `()`
    Tuple,
    /// Host closures and script callables
    Function,
    /// Shared or uniquely owned host objects
    SmartPointer,
    /// Any other host object
    Object,
    /// Untyped runtime value
    Dynamic,
}

/// Compile-time description of how a type crosses the boundary.
pub trait Marshal {
    /// Category this type is dispatched as
    const CATEGORY: Category;

    /// Fewest stack slots the marshaled form occupies
    const MIN_SLOTS: usize = 1;

    /// Most stack slots the marshaled form occupies
    const MAX_SLOTS: usize = 1;
}

/// Fails to compile when `T` does not occupy exactly one slot.
pub(crate) struct AssertSingleSlot<T>(PhantomData<T>);

impl<T: Marshal> AssertSingleSlot<T> {
    pub(crate) const OK: () = assert!(
        T::MIN_SLOTS == 1 && T::MAX_SLOTS == 1,
        "value must occupy exactly one stack slot"
    );
}

pub(crate) const fn cmin(a: usize, b: usize) -> usize {
    if a < b {
        a
    } else {
        b
    }
}

pub(crate) const fn cmax(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

/// Slots an argument list needs when every optional suffix is omitted.
///
/// Each entry is `(min_slots, optional)`. An optional parameter only lowers
/// the count if every parameter after it is optional too.
pub(crate) const fn required_slots(items: &[(usize, bool)]) -> usize {
    let mut required = 0;
    let mut i = 0;
    while i < items.len() {
        if !items[i].1 {
            required = i + 1;
        }
        i += 1;
    }

    let mut slots = 0;
    i = 0;
    while i < required {
        slots += items[i].0;
        i += 1;
    }
    slots
}

/// The script `nil` value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nil;

impl Marshal for Nil {
    const CATEGORY: Category = Category::Nil;
}

/// Writes a new empty table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmptyArray;

impl Marshal for EmptyArray {
    const CATEGORY: Category = Category::Sequence;
}

/// Key/value pairs marshaled as a table, kept in traversal order when read.
#[derive(Debug, Clone, PartialEq)]
pub struct Pairs<K, V>(pub Vec<(K, V)>);

impl<K, V> Default for Pairs<K, V> {
    fn default() -> Self {
        Pairs(Vec::new())
    }
}

impl<K, V> From<Vec<(K, V)>> for Pairs<K, V> {
    fn from(pairs: Vec<(K, V)>) -> Self {
        Pairs(pairs)
    }
}

impl<K: Marshal, V: Marshal> Marshal for Pairs<K, V> {
    const CATEGORY: Category = Category::SequenceOfPairs;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_slots() {
        assert_eq!(required_slots(&[]), 0);
        assert_eq!(required_slots(&[(1, false), (1, true), (1, true)]), 1);
        assert_eq!(required_slots(&[(1, true), (1, false)]), 2);
        assert_eq!(required_slots(&[(1, true), (1, true)]), 0);
        assert_eq!(required_slots(&[(2, false), (1, true)]), 2);
    }

    #[test]
    fn test_const_min_max() {
        assert_eq!(cmin(1, 2), 1);
        assert_eq!(cmax(1, 2), 2);
        assert_eq!(cmax(3, 3), 3);
    }
}
