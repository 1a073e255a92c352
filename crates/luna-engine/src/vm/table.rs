//! Script tables.
//!
//! Entries are kept in insertion order so that `next` traversal is stable.
//! Removing a key leaves a vacant entry behind; vacant entries are compacted
//! away when a new key is inserted and they outnumber the live ones.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::memory::Charge;
use super::value::Value;
use super::{VmError, VmResult};

/// Shared handle to a table.
pub type TableRef = Rc<RefCell<Table>>;

/// Hashable projection of a key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum HashKey {
    Boolean(bool),
    Number(u64),
    String(Rc<str>),
    Ref(usize),
}

impl HashKey {
    fn of(key: &Value) -> Option<HashKey> {
        match key {
            Value::Nil => None,
            Value::Boolean(b) => Some(HashKey::Boolean(*b)),
            Value::Number(n) if n.is_nan() => None,
            // +0 and -0 are the same key
            Value::Number(n) => Some(HashKey::Number((*n + 0.0).to_bits())),
            Value::String(s) => Some(HashKey::String(s.clone())),
            other => other.address().map(HashKey::Ref),
        }
    }
}

/// An associative array with an optional metatable.
#[derive(Default)]
pub struct Table {
    entries: Vec<(Value, Value)>,
    index: FxHashMap<HashKey, usize>,
    vacant: usize,
    metatable: Option<TableRef>,
    _charge: Option<Charge>,
}

impl Table {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_charge(charge: Charge) -> Self {
        Self {
            _charge: Some(charge),
            ..Self::default()
        }
    }

    /// Raw lookup, `nil` when absent.
    pub fn get(&self, key: &Value) -> Value {
        HashKey::of(key)
            .and_then(|k| self.index.get(&k))
            .map(|&i| self.entries[i].1.clone())
            .unwrap_or(Value::Nil)
    }

    /// Raw lookup by string key.
    pub fn get_str(&self, key: &str) -> Value {
        self.index
            .get(&HashKey::String(Rc::from(key)))
            .map(|&i| self.entries[i].1.clone())
            .unwrap_or(Value::Nil)
    }

    /// Raw store. Storing `nil` removes the key.
    pub fn set(&mut self, key: Value, value: Value) -> VmResult<()> {
        let hash = match HashKey::of(&key) {
            Some(hash) => hash,
            None if key.is_nil() => return Err(VmError::Runtime("table index is nil".into())),
            None => return Err(VmError::Runtime("table index is NaN".into())),
        };

        if let Some(&i) = self.index.get(&hash) {
            let slot = &mut self.entries[i].1;
            match (slot.is_nil(), value.is_nil()) {
                (false, true) => self.vacant += 1,
                (true, false) => self.vacant -= 1,
                _ => {}
            }
            *slot = value;
            return Ok(());
        }

        if value.is_nil() {
            return Ok(());
        }
        if self.vacant > 0 && self.vacant * 2 >= self.entries.len() {
            self.compact();
        }
        self.index.insert(hash, self.entries.len());
        self.entries.push((key, value));
        Ok(())
    }

    /// Entry following `key` in traversal order; `nil` starts the traversal.
    pub fn next(&self, key: &Value) -> VmResult<Option<(Value, Value)>> {
        let start = if key.is_nil() {
            0
        } else {
            match HashKey::of(key).and_then(|k| self.index.get(&k)) {
                Some(&i) => i + 1,
                None => return Err(VmError::Runtime("invalid key to 'next'".into())),
            }
        };
        Ok(self.entries[start.min(self.entries.len())..]
            .iter()
            .find(|(_, v)| !v.is_nil())
            .cloned())
    }

    /// Border of the array part: `n` such that `t[n]` is non-nil and
    /// `t[n + 1]` is nil, searching upward from 1.
    pub fn len(&self) -> usize {
        let mut n = 0;
        while !self.get(&Value::Number((n + 1) as f64)).is_nil() {
            n += 1;
        }
        n
    }

    /// Whether the table has no live entries.
    pub fn is_empty(&self) -> bool {
        self.entries.len() == self.vacant
    }

    /// Live entries in traversal order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries
            .iter()
            .filter(|(_, v)| !v.is_nil())
            .map(|(k, v)| (k, v))
    }

    /// The metatable, if any.
    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.clone()
    }

    /// Replace the metatable.
    pub fn set_metatable(&mut self, metatable: Option<TableRef>) {
        self.metatable = metatable;
    }

    /// Drop every entry and the metatable.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.vacant = 0;
        self.metatable = None;
    }

    fn compact(&mut self) {
        self.entries.retain(|(_, v)| !v.is_nil());
        self.index.clear();
        for (i, (key, _)) in self.entries.iter().enumerate() {
            if let Some(hash) = HashKey::of(key) {
                self.index.insert(hash, i);
            }
        }
        self.vacant = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn test_set_get_remove() {
        let mut t = Table::new();
        t.set("a".into(), num(1.0)).unwrap();
        t.set(num(1.0), "x".into()).unwrap();
        assert!(matches!(t.get(&"a".into()), Value::Number(n) if n == 1.0));
        assert_eq!(t.get_str("a").to_number(), Some(1.0));

        t.set("a".into(), Value::Nil).unwrap();
        assert!(t.get(&"a".into()).is_nil());
        assert_eq!(t.iter().count(), 1);
    }

    #[test]
    fn test_invalid_keys() {
        let mut t = Table::new();
        assert!(t.set(Value::Nil, num(1.0)).is_err());
        assert!(t.set(num(f64::NAN), num(1.0)).is_err());
    }

    #[test]
    fn test_negative_zero_key() {
        let mut t = Table::new();
        t.set(num(0.0), "zero".into()).unwrap();
        assert_eq!(t.get(&num(-0.0)).to_str().as_deref(), Some("zero"));
    }

    #[test]
    fn test_next_traversal_in_insertion_order() {
        let mut t = Table::new();
        t.set("b".into(), num(2.0)).unwrap();
        t.set("a".into(), num(1.0)).unwrap();
        t.set("c".into(), num(3.0)).unwrap();

        let mut keys = Vec::new();
        let mut key = Value::Nil;
        while let Some((k, _)) = t.next(&key).unwrap() {
            keys.push(k.to_str().unwrap().to_string());
            key = k;
        }
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert!(t.next(&"zzz".into()).is_err());
    }

    #[test]
    fn test_removal_during_traversal() {
        let mut t = Table::new();
        for i in 1..=4 {
            t.set(num(i as f64), num(i as f64)).unwrap();
        }
        let mut key = Value::Nil;
        let mut seen = 0;
        while let Some((k, _)) = t.next(&key).unwrap() {
            t.set(k.clone(), Value::Nil).unwrap();
            seen += 1;
            key = k;
        }
        assert_eq!(seen, 4);
        assert!(t.is_empty());
    }

    #[test]
    fn test_length_border() {
        let mut t = Table::new();
        for i in 1..=3 {
            t.set(num(i as f64), num(0.0)).unwrap();
        }
        t.set(num(5.0), num(0.0)).unwrap();
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_compaction_keeps_lookups_valid() {
        let mut t = Table::new();
        for i in 0..10 {
            t.set(num(i as f64), num(i as f64)).unwrap();
        }
        for i in 0..8 {
            t.set(num(i as f64), Value::Nil).unwrap();
        }
        t.set("new".into(), num(1.0)).unwrap();
        assert_eq!(t.get(&num(9.0)).to_number(), Some(9.0));
        assert_eq!(t.iter().count(), 3);
    }
}
