//! Open-addressing hash table keyed by interned string handles, used for globals, class
//! method tables, instance field tables, and the heap's own string-interning set.
//!
//! Linear probing with tombstones, grown at a 0.75 max load factor. Because keys are
//! interned `StringRef`s, comparing keys is a pointer compare, not a byte compare.

use crate::object::StringRef;
use crate::value::Value;

const MAX_LOAD: f64 = 0.75;

#[derive(Clone, Copy)]
enum Slot {
    Empty,
    Tombstone,
    Occupied(StringRef, Value),
}

pub struct Table {
    entries: Vec<Slot>,
    count: usize, // occupied + tombstones
    len: usize,   // occupied only
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Table { entries: Vec::new(), count: 0, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, key: StringRef) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        match self.find_slot(&self.entries, key) {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    /// Inserts `key` → `value`, returning `true` if this created a brand-new key.
    pub fn set(&mut self, key: StringRef, value: Value) -> bool {
        if self.count + 1 > ((self.entries.len() as f64) * MAX_LOAD) as usize {
            self.grow();
        }
        let cap = self.entries.len();
        let mut index = (hash_ptr(key) as usize) % cap;
        let mut first_tombstone: Option<usize> = None;
        loop {
            match self.entries[index] {
                Slot::Empty => {
                    let target = first_tombstone.unwrap_or(index);
                    let is_new = matches!(self.entries[target], Slot::Empty);
                    if is_new {
                        self.count += 1;
                    }
                    self.entries[target] = Slot::Occupied(key, value);
                    self.len += 1;
                    return true;
                }
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Slot::Occupied(k, _) if ptr_eq(k, key) => {
                    self.entries[index] = Slot::Occupied(key, value);
                    return false;
                }
                Slot::Occupied(..) => {}
            }
            index = (index + 1) % cap;
        }
    }

    /// Removes `key`, leaving a tombstone so later probe chains stay intact.
    pub fn delete(&mut self, key: StringRef) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let cap = self.entries.len();
        let mut index = (hash_ptr(key) as usize) % cap;
        loop {
            match self.entries[index] {
                Slot::Empty => return false,
                Slot::Occupied(k, _) if ptr_eq(k, key) => {
                    self.entries[index] = Slot::Tombstone;
                    self.len -= 1;
                    return true;
                }
                _ => {}
            }
            index = (index + 1) % cap;
        }
    }

    /// Looks up a key by raw bytes and precomputed hash, for the heap's interning table,
    /// which needs to find a match before it has allocated a `StringRef` to compare against.
    pub fn find_interned(&self, chars: &str, hash: u32) -> Option<StringRef> {
        if self.entries.is_empty() {
            return None;
        }
        let cap = self.entries.len();
        let mut index = (hash as usize) % cap;
        loop {
            match self.entries[index] {
                Slot::Empty => return None,
                Slot::Occupied(k, _) => {
                    let s = unsafe { &k.as_ref().data };
                    if s.hash == hash && s.data == chars {
                        return Some(k);
                    }
                }
                Slot::Tombstone => {}
            }
            index = (index + 1) % cap;
        }
    }

    fn find_slot<'a>(&self, entries: &'a [Slot], key: StringRef) -> &'a Slot {
        let cap = entries.len();
        let mut index = (hash_ptr(key) as usize) % cap;
        loop {
            match &entries[index] {
                Slot::Empty => return &entries[index],
                Slot::Occupied(k, _) if ptr_eq(*k, key) => return &entries[index],
                _ => {}
            }
            index = (index + 1) % cap;
        }
    }

    fn grow(&mut self) {
        let new_cap = if self.entries.is_empty() { 8 } else { self.entries.len() * 2 };
        let old = std::mem::replace(&mut self.entries, vec![Slot::Empty; new_cap]);
        self.count = 0;
        self.len = 0;
        for slot in old {
            if let Slot::Occupied(k, v) = slot {
                self.set(k, v);
            }
        }
    }

    /// Iterates live entries; used by the GC to mark every key and value this table roots.
    pub fn iter(&self) -> impl Iterator<Item = (StringRef, Value)> + '_ {
        self.entries.iter().filter_map(|slot| match slot {
            Slot::Occupied(k, v) => Some((*k, *v)),
            _ => None,
        })
    }

    /// Removes every entry whose key is not reachable, per `is_marked`. Used between the
    /// mark and sweep phases to purge the string-interning table of dead strings without
    /// keeping them alive by virtue of being interned.
    pub fn retain_marked(&mut self, is_marked: impl Fn(StringRef) -> bool) {
        for slot in self.entries.iter_mut() {
            if let Slot::Occupied(k, _) = slot {
                if !is_marked(*k) {
                    *slot = Slot::Tombstone;
                    self.len -= 1;
                }
            }
        }
    }
}

fn hash_ptr(key: StringRef) -> u32 {
    unsafe { key.as_ref().data.hash }
}

fn ptr_eq(a: StringRef, b: StringRef) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{fnv1a, GCObject, LoxString, ObjKind};
    use std::ptr::NonNull;

    fn make_string(s: &str) -> StringRef {
        let boxed = Box::new(GCObject {
            mark: false,
            kind: ObjKind::String,
            next: std::ptr::null_mut(),
            data: LoxString { data: s.to_string(), hash: fnv1a(s.as_bytes()) },
        });
        NonNull::new(Box::into_raw(boxed)).unwrap()
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut t = Table::new();
        let key = make_string("answer");
        assert!(t.set(key, Value::Number(42.0)));
        assert_eq!(t.get(key), Some(Value::Number(42.0)));
    }

    #[test]
    fn set_existing_key_returns_false_and_overwrites() {
        let mut t = Table::new();
        let key = make_string("x");
        assert!(t.set(key, Value::Number(1.0)));
        assert!(!t.set(key, Value::Number(2.0)));
        assert_eq!(t.get(key), Some(Value::Number(2.0)));
    }

    #[test]
    fn delete_leaves_other_entries_reachable() {
        let mut t = Table::new();
        let a = make_string("a");
        let b = make_string("b");
        t.set(a, Value::Number(1.0));
        t.set(b, Value::Number(2.0));
        assert!(t.delete(a));
        assert_eq!(t.get(a), None);
        assert_eq!(t.get(b), Some(Value::Number(2.0)));
    }

    #[test]
    fn grows_past_load_factor_without_losing_entries() {
        let mut t = Table::new();
        let mut keys = Vec::new();
        for i in 0..64 {
            let key = make_string(&format!("k{i}"));
            t.set(key, Value::Number(i as f64));
            keys.push(key);
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(t.get(*key), Some(Value::Number(i as f64)));
        }
    }
}
