//! Native and script function values.

use std::fmt;
use std::rc::Rc;

use super::interpreter::Scope;
use super::state::State;
use super::VmResult;
use crate::parser::FunctionBody;

/// Signature of a native function.
///
/// Arguments are the slots of the callee frame (index 1 is the first
/// argument). The function pushes its results and returns how many there are.
pub type NativeFn = dyn Fn(&State) -> VmResult<usize>;

/// A host function callable from scripts.
pub struct NativeFunction {
    pub(crate) func: Box<NativeFn>,
}

/// A script function together with its captured environment.
pub struct Closure {
    pub(crate) body: Rc<FunctionBody>,
    pub(crate) env: Rc<Scope>,
    pub(crate) chunk: Rc<str>,
}

/// A callable runtime value.
#[derive(Clone)]
pub enum Function {
    /// Host function
    Native(Rc<NativeFunction>),
    /// Script closure
    Script(Rc<Closure>),
}

impl Function {
    /// Wrap a host closure as a runtime function.
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&State) -> VmResult<usize> + 'static,
    {
        Function::Native(Rc::new(NativeFunction { func: Box::new(f) }))
    }

    pub(crate) fn ptr_eq(&self, other: &Function) -> bool {
        match (self, other) {
            (Function::Native(a), Function::Native(b)) => Rc::ptr_eq(a, b),
            (Function::Script(a), Function::Script(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn address(&self) -> usize {
        match self {
            Function::Native(f) => Rc::as_ptr(f) as usize,
            Function::Script(f) => Rc::as_ptr(f) as usize,
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Native(_) => write!(f, "function: builtin: 0x{:x}", self.address()),
            Function::Script(_) => write!(f, "function: 0x{:x}", self.address()),
        }
    }
}
