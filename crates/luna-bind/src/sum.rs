//! Sum types.
//!
//! `OneOfN` holds one of N alternatives. Reading tries the alternatives from
//! left to right and takes the first whose test passes, so the declared order
//! decides ambiguous values: a script string `"12"` read as
//! `OneOf2<i32, String>` is `A(12)`.

use luna_engine::State;

use crate::dispatch::{cmax, cmin, Category, Marshal};
use crate::error::BindResult;
use crate::reader::{wrong_type, FromStack};
use crate::writer::Push;

macro_rules! one_of {
    ($(#[$doc:meta])* $name:ident { $first:ident = $first_index:literal $(, $variant:ident = $index:literal)+ }) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $name<$first $(, $variant)+> {
            #[allow(missing_docs)]
            $first($first),
            $(
                #[allow(missing_docs)]
                $variant($variant),
            )+
        }

        impl<$first $(, $variant)+> $name<$first $(, $variant)+> {
            /// Zero-based position of the held alternative.
            pub fn index(&self) -> usize {
                match self {
                    $name::$first(_) => $first_index,
                    $($name::$variant(_) => $index,)+
                }
            }
        }

        impl<$first: Marshal $(, $variant: Marshal)+> Marshal for $name<$first $(, $variant)+> {
            const CATEGORY: Category = Category::SumType;
            const MIN_SLOTS: usize = {
                let min = $first::MIN_SLOTS;
                $(let min = cmin(min, $variant::MIN_SLOTS);)+
                min
            };
            const MAX_SLOTS: usize = {
                let max = $first::MAX_SLOTS;
                $(let max = cmax(max, $variant::MAX_SLOTS);)+
                max
            };
        }

        impl<$first: Push $(, $variant: Push)+> Push for $name<$first $(, $variant)+> {
            fn push(self, state: &State) -> BindResult<usize> {
                match self {
                    $name::$first(value) => value.push(state),
                    $($name::$variant(value) => value.push(state),)+
                }
            }
        }

        impl<$first: FromStack $(, $variant: FromStack)+> FromStack for $name<$first $(, $variant)+> {
            fn test(state: &State, idx: i32) -> bool {
                $first::test(state, idx) $(|| $variant::test(state, idx))+
            }

            fn read(state: &State, idx: i32) -> BindResult<Self> {
                if $first::test(state, idx) {
                    return $first::read(state, idx).map($name::$first);
                }
                $(
                    if $variant::test(state, idx) {
                        return $variant::read(state, idx).map($name::$variant);
                    }
                )+
                Err(wrong_type::<Self>(state, idx))
            }
        }
    };
}

one_of! {
    /// One of two alternatives.
    OneOf2 { A = 0, B = 1 }
}

one_of! {
    /// One of three alternatives.
    OneOf3 { A = 0, B = 1, C = 2 }
}

one_of! {
    /// One of four alternatives.
    OneOf4 { A = 0, B = 1, C = 2, D = 3 }
}

one_of! {
    /// One of five alternatives.
    OneOf5 { A = 0, B = 1, C = 2, D = 3, E = 4 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_matching_alternative_wins() {
        let state = State::new();
        state.push("hello").unwrap();
        let value = OneOf3::<bool, i32, String>::read_safe(&state, -1).unwrap();
        assert_eq!(value, OneOf3::C("hello".to_string()));
        assert_eq!(value.index(), 2);

        state.push("12").unwrap();
        let value = OneOf2::<i32, String>::read_safe(&state, -1).unwrap();
        assert_eq!(value, OneOf2::A(12));
    }

    #[test]
    fn test_no_alternative_matches() {
        let state = State::new();
        state.push(1.5).unwrap();
        assert!(OneOf2::<bool, i32>::read_safe(&state, -1).is_err());
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_writes_held_alternative() {
        let state = State::new();
        let value: OneOf2<i32, String> = OneOf2::B("x".to_string());
        assert_eq!(value.push(&state).unwrap(), 1);
        assert_eq!(state.to_string(-1).as_deref(), Some("x"));
    }
}
