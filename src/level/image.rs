//! Per-level rendering cache.
//!
//! [`MultiLevelImage`] memoizes the renderings of a [`MultiLevelSource`]:
//! - Each level is computed at most once until [`MultiLevelImage::reset`]
//! - Repeated lookups hand out the identical `Arc<Raster>`
//! - Each level has its own lock, so unrelated levels and images never wait on each other
//!
//! The image also owns a property bag with synchronous change listeners.

use crate::core::error::{IndexError, TileGraphResult};
use crate::core::raster::Raster;
use crate::core::types::{Value, ValueType};
use crate::level::model::MultiLevelModel;
use crate::level::source::{MultiLevelSource, SharedSource};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Handle returned when registering a property listener.
pub type ListenerId = u64;

/// Callback invoked after a property was set or removed.
pub type PropertyListener = Arc<dyn Fn(&PropertyChangeEvent) + Send + Sync>;

/// A property change.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChangeEvent {
    /// Property name.
    pub name: String,
    /// Value before the change, `None` if the property was unset.
    pub old_value: Option<Value>,
    /// Value after the change, `None` if the property was removed.
    pub new_value: Option<Value>,
}

/// One slot per level. Swapped out as a whole on reset.
struct LevelSlots {
    slots: Vec<Mutex<Option<Arc<Raster>>>>,
}

impl LevelSlots {
    fn new(level_count: usize) -> Self {
        Self {
            slots: (0..level_count).map(|_| Mutex::new(None)).collect(),
        }
    }
}

/// Caching, multi-level view of a [`MultiLevelSource`].
pub struct MultiLevelImage {
    source: SharedSource,
    levels: RwLock<Arc<LevelSlots>>,
    properties: RwLock<IndexMap<String, Value>>,
    listeners: Mutex<Vec<(ListenerId, PropertyListener)>>,
    next_listener: AtomicU64,
    computations: AtomicUsize,
}

impl MultiLevelImage {
    /// Create an image caching renderings of `source`.
    pub fn new(source: SharedSource) -> Self {
        let level_count = source.model().level_count();
        Self {
            source,
            levels: RwLock::new(Arc::new(LevelSlots::new(level_count))),
            properties: RwLock::new(IndexMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            computations: AtomicUsize::new(0),
        }
    }

    /// The wrapped source.
    pub fn source(&self) -> &SharedSource {
        &self.source
    }

    /// Geometry of the pyramid.
    pub fn model(&self) -> &MultiLevelModel {
        self.source.model()
    }

    /// Number of levels.
    pub fn level_count(&self) -> usize {
        self.model().level_count()
    }

    /// Get the rendering of `level`, computing it on first access.
    ///
    /// Concurrent callers asking for the same uncomputed level wait for a
    /// single computation and all receive its result. A failed computation
    /// leaves the level uncached.
    pub fn get_image(&self, level: usize) -> TileGraphResult<Arc<Raster>> {
        let levels = Arc::clone(&*self.levels.read());
        let slot = levels.slots.get(level).ok_or(IndexError::LevelOutOfRange {
            level,
            level_count: levels.slots.len(),
        })?;

        let mut cached = slot.lock();
        if let Some(raster) = cached.as_ref() {
            return Ok(Arc::clone(raster));
        }

        let raster = self.source.create_image(level)?;
        self.computations.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Computed level {} ({}x{})",
            level,
            raster.width(),
            raster.height()
        );
        *cached = Some(Arc::clone(&raster));
        Ok(raster)
    }

    /// Whether `level` currently holds a cached rendering.
    pub fn is_cached(&self, level: usize) -> bool {
        let levels = Arc::clone(&*self.levels.read());
        levels
            .slots
            .get(level)
            .is_some_and(|slot| slot.lock().is_some())
    }

    /// Discard every cached level. Levels are recomputed lazily on next access.
    ///
    /// Also resets the source's own intermediate state.
    pub fn reset(&self) {
        let fresh = Arc::new(LevelSlots::new(self.level_count()));
        let mut levels = self.levels.write();
        self.source.reset();
        *levels = fresh;
        drop(levels);
        log::debug!("Reset multi-level image cache");
    }

    /// Number of level renderings computed so far, across resets.
    pub fn computation_count(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }

    // ===== Properties =====

    /// Get a property.
    pub fn get_property(&self, name: &str) -> Option<Value> {
        self.properties.read().get(name).cloned()
    }

    /// Type of a property's current value.
    pub fn property_type(&self, name: &str) -> Option<ValueType> {
        self.properties.read().get(name).map(Value::get_type)
    }

    /// All property names in insertion order.
    pub fn property_names(&self) -> Vec<String> {
        self.properties.read().keys().cloned().collect()
    }

    /// Property names starting with `prefix`.
    pub fn property_names_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.properties
            .read()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Set a property and notify listeners.
    pub fn set_property(&self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        let old_value = self
            .properties
            .write()
            .insert(name.clone(), value.clone());
        self.notify(PropertyChangeEvent {
            name,
            old_value,
            new_value: Some(value),
        });
    }

    /// Remove a property, notifying listeners if it existed.
    pub fn remove_property(&self, name: &str) -> Option<Value> {
        let old_value = self.properties.write().shift_remove(name);
        if old_value.is_some() {
            self.notify(PropertyChangeEvent {
                name: name.to_string(),
                old_value: old_value.clone(),
                new_value: None,
            });
        }
        old_value
    }

    /// Register a property listener.
    pub fn add_property_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&PropertyChangeEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Unregister a property listener. Returns whether it was registered.
    pub fn remove_property_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    fn notify(&self, event: PropertyChangeEvent) {
        let listeners: Vec<PropertyListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }
}

impl MultiLevelSource for MultiLevelImage {
    fn model(&self) -> &MultiLevelModel {
        self.source.model()
    }

    fn create_image(&self, level: usize) -> TileGraphResult<Arc<Raster>> {
        self.get_image(level)
    }
}

impl fmt::Debug for MultiLevelImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiLevelImage")
            .field("model", self.model())
            .field("computations", &self.computation_count())
            .field("properties", &self.property_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DataType;
    use crate::level::model::AffineTransform;
    use std::time::Duration;

    struct CountingSource {
        model: MultiLevelModel,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingSource {
        fn new(delay: Duration) -> Self {
            Self {
                model: MultiLevelModel::new(2, AffineTransform::identity(), 256, 256).unwrap(),
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl MultiLevelSource for CountingSource {
        fn model(&self) -> &MultiLevelModel {
            &self.model
        }

        fn create_image(&self, level: usize) -> TileGraphResult<Arc<Raster>> {
            let (width, height) = self.model.level_size(level)?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(Arc::new(Raster::new(width, height, DataType::UInt8)))
        }
    }

    fn image() -> MultiLevelImage {
        MultiLevelImage::new(Arc::new(CountingSource::new(Duration::ZERO)))
    }

    #[test]
    fn test_level_instances_are_stable_until_reset() {
        let mli = image();
        let a0 = mli.get_image(0).unwrap();
        assert!(Arc::ptr_eq(&a0, &mli.get_image(0).unwrap()));
        let a1 = mli.get_image(1).unwrap();
        assert_eq!((a1.width(), a1.height()), (128, 128));
        assert!(Arc::ptr_eq(&a1, &mli.get_image(1).unwrap()));
        assert_eq!(mli.computation_count(), 2);

        mli.reset();
        assert!(!mli.is_cached(0));

        let b0 = mli.get_image(0).unwrap();
        assert!(Arc::ptr_eq(&b0, &mli.get_image(0).unwrap()));
        assert!(!Arc::ptr_eq(&a0, &b0));
        let b1 = mli.get_image(1).unwrap();
        assert!(!Arc::ptr_eq(&a1, &b1));
        assert_eq!(mli.computation_count(), 4);
    }

    #[test]
    fn test_level_out_of_range() {
        let mli = image();
        assert!(mli.get_image(2).is_err());
        assert!(!mli.is_cached(2));
    }

    #[test]
    fn test_concurrent_callers_share_one_computation() {
        let source = Arc::new(CountingSource::new(Duration::from_millis(20)));
        let mli = MultiLevelImage::new(source.clone());

        let results: Vec<Arc<Raster>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| mli.get_image(0).unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[test]
    fn test_properties_and_listeners() {
        let mli = image();
        let trace = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&trace);
        let id = mli.add_property_listener(move |event| {
            sink.lock().push_str(&format!("{};", event.name));
        });

        assert_eq!(mli.get_property("_x"), None);
        mli.set_property("_x", 4384);
        assert_eq!(mli.get_property("_x"), Some(Value::Integer(4384)));
        assert_eq!(mli.property_type("_x"), Some(ValueType::Integer));
        assert_eq!(trace.lock().as_str(), "_x;");

        mli.set_property("other", "value");
        assert_eq!(mli.property_names(), vec!["_x", "other"]);
        assert_eq!(mli.property_names_with_prefix("_"), vec!["_x"]);

        assert_eq!(mli.remove_property("_x"), Some(Value::Integer(4384)));
        assert_eq!(mli.get_property("_x"), None);
        assert_eq!(trace.lock().as_str(), "_x;other;_x;");

        assert!(mli.remove_property_listener(id));
        assert!(!mli.remove_property_listener(id));
        mli.set_property("quiet", true);
        assert_eq!(trace.lock().as_str(), "_x;other;_x;");
    }

    #[test]
    fn test_image_acts_as_source() {
        let mli = Arc::new(image());
        let as_source: SharedSource = mli.clone();
        let level = as_source.create_image(1).unwrap();
        assert!(Arc::ptr_eq(&level, &mli.get_image(1).unwrap()));
    }
}
