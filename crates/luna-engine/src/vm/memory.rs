//! Memory accounting for tables and userdata.

use std::cell::Cell;
use std::rc::Rc;

use super::{VmError, VmResult};

/// Byte counter shared by every charged object of one runtime.
#[derive(Debug)]
pub(crate) struct Meter {
    used: Cell<usize>,
    limit: Option<usize>,
}

impl Meter {
    pub(crate) fn new(limit: Option<usize>) -> Rc<Self> {
        Rc::new(Self {
            used: Cell::new(0),
            limit,
        })
    }

    pub(crate) fn used(&self) -> usize {
        self.used.get()
    }

    /// Reserve `bytes`, released when the returned guard drops.
    pub(crate) fn charge(self: &Rc<Self>, bytes: usize) -> VmResult<Charge> {
        let used = self.used.get().saturating_add(bytes);
        if matches!(self.limit, Some(limit) if used > limit) {
            return Err(VmError::OutOfMemory);
        }
        self.used.set(used);
        Ok(Charge {
            meter: Rc::clone(self),
            bytes,
        })
    }

    /// Check that `bytes` would fit without reserving them.
    pub(crate) fn check(&self, bytes: usize) -> VmResult<()> {
        match self.limit {
            Some(limit) if self.used.get().saturating_add(bytes) > limit => {
                Err(VmError::OutOfMemory)
            }
            _ => Ok(()),
        }
    }
}

/// Reservation held by a live object.
#[derive(Debug)]
pub(crate) struct Charge {
    meter: Rc<Meter>,
    bytes: usize,
}

impl Drop for Charge {
    fn drop(&mut self) {
        let used = self.meter.used.get();
        self.meter.used.set(used.saturating_sub(self.bytes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_is_released_on_drop() {
        let meter = Meter::new(Some(100));
        let charge = meter.charge(60).unwrap();
        assert_eq!(meter.used(), 60);
        assert!(matches!(meter.charge(50), Err(VmError::OutOfMemory)));
        drop(charge);
        assert_eq!(meter.used(), 0);
        assert!(meter.charge(50).is_ok());
    }

    #[test]
    fn test_unlimited() {
        let meter = Meter::new(None);
        assert!(meter.charge(usize::MAX / 2).is_ok());
        assert!(meter.check(usize::MAX).is_ok());
    }
}
