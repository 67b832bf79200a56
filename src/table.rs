//! # Hash Table Keyed by Strings
//!
//! Open-addressed table with linear probing, used for the VM's globals.
//!
//! ## Layout
//! - Buckets are `(key, value)` pairs; an absent key with a `nil` value is
//!   an empty bucket, an absent key with `true` is a tombstone left by a
//!   deletion. Tombstones keep probe chains intact.
//! - `count` includes tombstones; growing rehashes only live entries and
//!   re-derives the count, so tombstones are dropped there.
//!
//! ## Sizing
//! Capacity starts at 8 and doubles whenever an insert would push the load
//! factor over 0.75.
//!
//! Keys compare by byte content; the stored hash is only the probe seed.

use std::rc::Rc;

use crate::object::ObjString;
use crate::value::Value;

const TABLE_MAX_LOAD: f64 = 0.75;

struct Entry {
    key: Option<Rc<ObjString>>,
    value: Value,
}

/// String-keyed map for globals. Process-lifetime; grows without bound.
pub struct Table {
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Self {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    /// Insert or overwrite. Returns true iff the key was not present.
    pub fn set(&mut self, key: Rc<ObjString>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * TABLE_MAX_LOAD {
            let capacity = grow(self.entries.len());
            self.adjust_capacity(capacity);
        }

        let index = find_entry(&self.entries, &key);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_none();
        // A reused tombstone was already counted.
        if is_new_key && matches!(entry.value, Value::Nil) {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    /// Look up a value by key content.
    pub fn get(&self, key: &ObjString) -> Option<&Value> {
        if self.entries.is_empty() {
            return None;
        }
        let entry = &self.entries[find_entry(&self.entries, key)];
        if entry.key.is_some() {
            Some(&entry.value)
        } else {
            None
        }
    }

    /// Remove a key, leaving a tombstone. Returns true if it was present.
    pub fn delete(&mut self, key: &ObjString) -> bool {
        if self.count == 0 || self.entries.is_empty() {
            return false;
        }

        let index = find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }

        entry.key = None;
        entry.value = Value::Bool(true);
        true
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let fresh = (0..capacity)
            .map(|_| Entry {
                key: None,
                value: Value::Nil,
            })
            .collect();
        let old = std::mem::replace(&mut self.entries, fresh);

        self.count = 0;
        for entry in old {
            if let Some(key) = entry.key {
                let index = find_entry(&self.entries, &key);
                self.entries[index].key = Some(key);
                self.entries[index].value = entry.value;
                self.count += 1;
            }
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}

/// Locate the bucket for `key`: the live entry holding it, else the first
/// tombstone passed on the way (for insert reuse), else the empty bucket
/// that terminated the probe.
fn find_entry(entries: &[Entry], key: &ObjString) -> usize {
    let mut index = key.hash as usize % entries.len();
    let mut tombstone: Option<usize> = None;

    loop {
        let entry = &entries[index];
        match &entry.key {
            None => {
                if matches!(entry.value, Value::Nil) {
                    return tombstone.unwrap_or(index);
                }
                if tombstone.is_none() {
                    tombstone = Some(index);
                }
            }
            Some(existing) if existing.chars == key.chars => return index,
            Some(_) => {}
        }
        index = (index + 1) % entries.len();
    }
}

fn grow(capacity: usize) -> usize {
    if capacity < 8 {
        8
    } else {
        capacity * 2
    }
}
