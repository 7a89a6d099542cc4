use crate::error::ValueError;
use crate::value::IdleValue;
use lull_scheduler::IdleScheduler;
use rustc_hash::FxHashMap;
use std::cell::Ref;
use std::hash::Hash;
use std::rc::Rc;

/// A set of named idle values sharing one idle scheduler. Each entry is
/// initialized independently, in its own idle callback or on first read.
pub struct IdleMap<K, V: 'static> {
    idle: Rc<dyn IdleScheduler>,
    entries: FxHashMap<K, IdleValue<V>>,
}

impl<K: Eq + Hash, V: 'static> IdleMap<K, V> {
    pub fn new(idle: Rc<dyn IdleScheduler>) -> Self {
        Self {
            idle,
            entries: FxHashMap::default(),
        }
    }

    /// Defines (or redefines) `key`. Redefining drops the old entry and its
    /// pending idle initialization.
    pub fn define<F>(&mut self, key: K, init: F)
    where
        F: FnOnce() -> V + 'static,
    {
        let value = IdleValue::new(self.idle.clone(), init);
        self.entries.insert(key, value);
    }

    pub fn try_define<F>(&mut self, key: K, init: F)
    where
        F: FnMut() -> anyhow::Result<V> + 'static,
    {
        let value = IdleValue::try_new(self.idle.clone(), init);
        self.entries.insert(key, value);
    }

    pub fn define_all<I, F>(&mut self, inits: I)
    where
        I: IntoIterator<Item = (K, F)>,
        F: FnOnce() -> V + 'static,
    {
        for (key, init) in inits {
            self.define(key, init);
        }
    }

    pub fn get(&self, key: &K) -> Option<Result<Ref<'_, V>, ValueError>> {
        self.entries.get(key).map(IdleValue::get_value)
    }

    /// Overrides the value for `key`, defining it if it does not exist yet.
    pub fn set(&mut self, key: K, value: V) {
        match self.entries.get(&key) {
            Some(entry) => entry.set_value(value),
            None => {
                let entry = IdleValue::with_value(self.idle.clone(), value);
                self.entries.insert(key, entry);
            }
        }
    }

    pub fn remove(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_initialized(&self, key: &K) -> bool {
        self.entries.get(key).is_some_and(IdleValue::is_initialized)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
