//! Logging levels and the registries that remember them.
//!
//! Every `Level` ever created is registered in a process-wide registry so it
//! can be looked up by name or value. The host keeps that registry strongly,
//! which pins every level (and whatever loaded it) forever. The weak
//! registries here forget a level once its creator drops it.

use crate::sequence::WeakSequence;
use core::fmt;
use core::hash::Hash;
use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Level {
    name: String,
    value: i32,
}

impl Level {
    pub fn new(name: impl Into<String>, value: i32) -> Arc<Level> {
        Arc::new(Level {
            name: name.into(),
            value,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    pub fn off() -> Arc<Level> {
        OFF.clone()
    }

    /// The nine standard levels, most severe first.
    pub fn standard() -> Vec<Arc<Level>> {
        [
            &OFF, &SEVERE, &WARNING, &INFO, &CONFIG, &FINE, &FINER, &FINEST, &ALL,
        ]
        .into_iter()
        .map(|l| Arc::clone(l))
        .collect()
    }

    /// Closest `tracing` verbosity for this level.
    pub fn as_tracing(&self) -> tracing::Level {
        match self.value {
            v if v >= 1000 => tracing::Level::ERROR,
            v if v >= 900 => tracing::Level::WARN,
            v if v >= 800 => tracing::Level::INFO,
            v if v >= 500 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

impl fmt::Debug for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.value)
    }
}

pub static OFF: Lazy<Arc<Level>> = Lazy::new(|| Level::new("OFF", i32::MAX));
pub static SEVERE: Lazy<Arc<Level>> = Lazy::new(|| Level::new("SEVERE", 1000));
pub static WARNING: Lazy<Arc<Level>> = Lazy::new(|| Level::new("WARNING", 900));
pub static INFO: Lazy<Arc<Level>> = Lazy::new(|| Level::new("INFO", 800));
pub static CONFIG: Lazy<Arc<Level>> = Lazy::new(|| Level::new("CONFIG", 700));
pub static FINE: Lazy<Arc<Level>> = Lazy::new(|| Level::new("FINE", 500));
pub static FINER: Lazy<Arc<Level>> = Lazy::new(|| Level::new("FINER", 400));
pub static FINEST: Lazy<Arc<Level>> = Lazy::new(|| Level::new("FINEST", 300));
pub static ALL: Lazy<Arc<Level>> = Lazy::new(|| Level::new("ALL", i32::MIN));

/// Registry of known levels.
pub trait KnownLevels: Send + Sync {
    fn register(&self, level: &Arc<Level>);
    fn find_by_name(&self, name: &str) -> Option<Arc<Level>>;
    fn find_by_value(&self, value: i32) -> Option<Arc<Level>>;
    /// Every registered level that is still reachable.
    fn snapshot(&self) -> Vec<Arc<Level>>;
    fn len(&self) -> usize;
}

/// The host's single-list registry. Holds levels strongly.
#[derive(Default)]
pub struct StrongLevelList {
    levels: Mutex<Vec<Arc<Level>>>,
}

impl StrongLevelList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_standard() -> Self {
        let list = Self::new();
        for l in Level::standard() {
            list.register(&l);
        }
        list
    }
}

impl KnownLevels for StrongLevelList {
    fn register(&self, level: &Arc<Level>) {
        self.levels.lock().push(level.clone());
    }
    fn find_by_name(&self, name: &str) -> Option<Arc<Level>> {
        self.levels.lock().iter().find(|l| l.name == name).cloned()
    }
    fn find_by_value(&self, value: i32) -> Option<Arc<Level>> {
        self.levels.lock().iter().find(|l| l.value == value).cloned()
    }
    fn snapshot(&self) -> Vec<Arc<Level>> {
        self.levels.lock().clone()
    }
    fn len(&self) -> usize {
        self.levels.lock().len()
    }
}

/// The host's two-map registry, keyed by name and by value. Holds levels
/// strongly.
#[derive(Default)]
pub struct StrongLevelMaps {
    inner: Mutex<StrongMaps>,
}

#[derive(Default)]
struct StrongMaps {
    order: Vec<Arc<Level>>,
    by_name: HashMap<String, Vec<Arc<Level>>>,
    by_value: HashMap<i32, Vec<Arc<Level>>>,
}

impl StrongLevelMaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_standard() -> Self {
        let maps = Self::new();
        for l in Level::standard() {
            maps.register(&l);
        }
        maps
    }
}

impl KnownLevels for StrongLevelMaps {
    fn register(&self, level: &Arc<Level>) {
        let mut m = self.inner.lock();
        m.order.push(level.clone());
        m.by_name
            .entry(level.name.clone())
            .or_default()
            .push(level.clone());
        m.by_value.entry(level.value).or_default().push(level.clone());
    }
    fn find_by_name(&self, name: &str) -> Option<Arc<Level>> {
        let m = self.inner.lock();
        m.by_name.get(name).and_then(|v| v.first().cloned())
    }
    fn find_by_value(&self, value: i32) -> Option<Arc<Level>> {
        let m = self.inner.lock();
        m.by_value.get(&value).and_then(|v| v.first().cloned())
    }
    fn snapshot(&self) -> Vec<Arc<Level>> {
        self.inner.lock().order.clone()
    }
    fn len(&self) -> usize {
        self.inner.lock().order.len()
    }
}

impl KnownLevels for WeakSequence<Level> {
    fn register(&self, level: &Arc<Level>) {
        self.add(level);
    }
    fn find_by_name(&self, name: &str) -> Option<Arc<Level>> {
        self.create_strong_list().into_iter().find(|l| l.name == name)
    }
    fn find_by_value(&self, value: i32) -> Option<Arc<Level>> {
        self.create_strong_list().into_iter().find(|l| l.value == value)
    }
    fn snapshot(&self) -> Vec<Arc<Level>> {
        self.create_strong_list()
    }
    fn len(&self) -> usize {
        WeakSequence::len(self)
    }
}

/// One key space of the weak two-map registry: key -> weak list of levels.
pub struct WeakLevelMap<K> {
    sentinel: Arc<Level>,
    lists: Mutex<HashMap<K, Arc<WeakSequence<Level>>>>,
}

impl<K: Eq + Hash + Clone> WeakLevelMap<K> {
    pub fn new(sentinel: Arc<Level>) -> Self {
        Self {
            sentinel,
            lists: Mutex::new(HashMap::new()),
        }
    }

    /// The list for `key`, created empty if missing.
    pub fn entry(&self, key: K) -> Arc<WeakSequence<Level>> {
        self.lists
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(WeakSequence::new(self.sentinel.clone())))
            .clone()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<Arc<WeakSequence<Level>>>
    where
        K: core::borrow::Borrow<Q>,
        Q: ?Sized + Eq + Hash,
    {
        self.lists.lock().get(key).cloned()
    }

    /// Keys with at least one live level. Empty lists are dropped.
    pub fn len(&self) -> usize {
        let mut lists = self.lists.lock();
        lists.retain(|_, seq| !seq.is_empty());
        lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Weak replacement for `StrongLevelMaps`.
pub struct WeakLevelMaps {
    by_name: WeakLevelMap<String>,
    by_value: WeakLevelMap<i32>,
}

impl WeakLevelMaps {
    pub fn new(sentinel: Arc<Level>) -> Self {
        Self {
            by_name: WeakLevelMap::new(sentinel.clone()),
            by_value: WeakLevelMap::new(sentinel),
        }
    }

    pub fn by_name(&self) -> &WeakLevelMap<String> {
        &self.by_name
    }

    pub fn by_value(&self) -> &WeakLevelMap<i32> {
        &self.by_value
    }
}

impl KnownLevels for WeakLevelMaps {
    fn register(&self, level: &Arc<Level>) {
        self.by_name.entry(level.name.clone()).add(level);
        self.by_value.entry(level.value).add(level);
    }
    fn find_by_name(&self, name: &str) -> Option<Arc<Level>> {
        self.by_name
            .get(name)
            .and_then(|seq| seq.create_strong_list().into_iter().next())
    }
    fn find_by_value(&self, value: i32) -> Option<Arc<Level>> {
        self.by_value
            .get(&value)
            .and_then(|seq| seq.create_strong_list().into_iter().next())
    }
    fn snapshot(&self) -> Vec<Arc<Level>> {
        let lists: Vec<_> = self.by_name.lists.lock().values().cloned().collect();
        lists
            .iter()
            .flat_map(|seq| seq.create_strong_list())
            .collect()
    }
    fn len(&self) -> usize {
        self.by_value.len();
        self.by_name.len();
        self.snapshot().len()
    }
}
