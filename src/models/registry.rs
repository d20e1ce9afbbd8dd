//! Model registry for lazily constructed embedding models
//!
//! Each model name maps to a slot that is either ready or loading. A loading
//! slot holds a shared future, so every caller that asks for an unseen name
//! while it is being built awaits the same construction and receives the
//! same handle (or the same error). Failed loads leave no trace in the map,
//! which lets a later request try again.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::models::model::{ModelHandle, ModelLoader};
use crate::models::{EmbeddingError, EmbeddingResult};

type LoadFuture = Shared<BoxFuture<'static, EmbeddingResult<ModelHandle>>>;

enum Slot {
    Ready(ModelHandle),
    Loading(LoadFuture),
}

type Slots = Arc<RwLock<HashMap<String, Slot>>>;

/// Process-wide mapping from model name to model handle
pub struct ModelRegistry {
    loader: Arc<dyn ModelLoader>,
    allowed_models: Option<HashSet<String>>,
    slots: Slots,
}

impl ModelRegistry {
    /// Create a new model registry
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            allowed_models: None,
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Restrict the registry to the given names. An empty list allows all.
    pub fn with_allowed_models<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        self.allowed_models = if names.is_empty() { None } else { Some(names) };
        self
    }

    /// Get the handle for `model_name`, constructing it on first use.
    ///
    /// Already loaded models are served under a shared read lock. The first
    /// caller for an unseen name starts the construction on a blocking
    /// thread; concurrent callers for that name await the same load.
    pub async fn get_or_create(&self, model_name: &str) -> EmbeddingResult<ModelHandle> {
        let pending = match self.lookup(model_name) {
            Some(Slot::Ready(handle)) => return Ok(handle),
            Some(Slot::Loading(load)) => load,
            None => {
                self.check_allowed(model_name)?;
                match self.lookup_or_start(model_name) {
                    Slot::Ready(handle) => return Ok(handle),
                    Slot::Loading(load) => load,
                }
            }
        };

        debug!("Waiting for model {} to load", model_name);
        pending.await
    }

    fn lookup(&self, model_name: &str) -> Option<Slot> {
        self.read_slots().get(model_name).map(Slot::share)
    }

    fn lookup_or_start(&self, model_name: &str) -> Slot {
        let mut slots = self.write_slots();
        if let Some(slot) = slots.get(model_name) {
            return slot.share();
        }

        info!("Loading model: {}", model_name);
        let load = Self::load_future(
            Arc::clone(&self.loader),
            Arc::clone(&self.slots),
            model_name.to_string(),
        );
        slots.insert(model_name.to_string(), Slot::Loading(load.clone()));
        Slot::Loading(load)
    }

    /// Runs the load on its own task, so the slot settles even when every
    /// waiter has gone away.
    fn load_future(loader: Arc<dyn ModelLoader>, slots: Slots, model_name: String) -> LoadFuture {
        let name = model_name.clone();
        let task = tokio::spawn(async move {
            let loading = model_name.clone();
            let result = match tokio::task::spawn_blocking(move || loader.load(&loading)).await {
                Ok(result) => result,
                Err(e) => Err(EmbeddingError::load(
                    &model_name,
                    format!("loader task failed: {}", e),
                )),
            };
            settle(&slots, &model_name, &result);
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(EmbeddingError::load(&name, format!("loader task failed: {}", e))),
            }
        }
        .boxed()
        .shared()
    }

    fn check_allowed(&self, model_name: &str) -> EmbeddingResult<()> {
        match &self.allowed_models {
            Some(allowed) if !allowed.contains(model_name) => {
                Err(EmbeddingError::load(model_name, "model is not in the allowed list"))
            }
            _ => Ok(()),
        }
    }

    /// Check if a model is loaded and ready
    pub fn is_loaded(&self, model_name: &str) -> bool {
        matches!(self.read_slots().get(model_name), Some(Slot::Ready(_)))
    }

    /// Names of all ready models, sorted
    pub fn loaded_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .read_slots()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of ready models
    pub fn len(&self) -> usize {
        self.read_slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<String, Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, HashMap<String, Slot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Slot {
    fn share(&self) -> Slot {
        match self {
            Slot::Ready(handle) => Slot::Ready(Arc::clone(handle)),
            Slot::Loading(load) => Slot::Loading(load.clone()),
        }
    }
}

/// Replace the loading slot with the outcome of the load
fn settle(slots: &Slots, model_name: &str, result: &EmbeddingResult<ModelHandle>) {
    let mut slots = slots.write().unwrap_or_else(PoisonError::into_inner);
    match result {
        Ok(handle) => {
            info!("Model {} loaded", model_name);
            slots.insert(model_name.to_string(), Slot::Ready(Arc::clone(handle)));
        }
        Err(e) => {
            warn!("Model {} failed to load: {}", model_name, e);
            slots.remove(model_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mock::MockModelLoader;
    use futures::future::join_all;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    fn registry_with(loader: &Arc<MockModelLoader>) -> ModelRegistry {
        ModelRegistry::new(Arc::clone(loader) as Arc<dyn ModelLoader>)
    }

    #[tokio::test]
    async fn test_registry_creation() {
        let registry = registry_with(&Arc::new(MockModelLoader::new(4)));
        assert!(registry.is_empty());
        assert!(!registry.is_loaded("test-model"));
        assert!(registry.loaded_models().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_constructs_once() {
        let loader = Arc::new(MockModelLoader::new(4).with_load_delay(Duration::from_millis(100)));
        let registry = Arc::new(registry_with(&loader));

        let tasks = (0..8).map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_or_create("shared-model").await })
        });
        let handles: Vec<ModelHandle> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(loader.constructions(), 1);
        for handle in &handles[1..] {
            assert!(Arc::ptr_eq(&handles[0], handle));
        }
        assert_eq!(registry.loaded_models(), vec!["shared-model".to_string()]);
    }

    #[tokio::test]
    async fn test_loaded_model_is_reused() {
        let loader = Arc::new(MockModelLoader::new(4));
        let registry = registry_with(&loader);

        let first = registry.get_or_create("m").await.unwrap();
        for _ in 0..5 {
            let again = registry.get_or_create("m").await.unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }
        assert_eq!(loader.constructions(), 1);
        assert!(registry.is_loaded("m"));
        assert_eq!(first.info().name, "m");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_load_is_shared_then_retryable() {
        let loader = Arc::new(
            MockModelLoader::new(4)
                .with_load_delay(Duration::from_millis(50))
                .failing("broken"),
        );
        let registry = Arc::new(registry_with(&loader));

        let attempts = (0..4).map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_or_create("broken").await })
        });
        let results: Vec<_> = join_all(attempts).await.into_iter().map(|j| j.unwrap()).collect();

        assert_eq!(loader.constructions(), 1);
        for result in &results {
            assert!(matches!(result, Err(EmbeddingError::ModelLoadError { .. })));
        }
        assert!(!registry.is_loaded("broken"));

        loader.heal("broken");
        assert!(registry.get_or_create("broken").await.is_ok());
        assert_eq!(loader.constructions(), 2);
    }

    #[tokio::test]
    async fn test_load_settles_after_waiter_is_cancelled() {
        let loader = Arc::new(MockModelLoader::new(4).with_load_delay(Duration::from_millis(50)));
        let registry = registry_with(&loader);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), registry.get_or_create("m")).await;
        assert!(abandoned.is_err());

        for _ in 0..100 {
            if registry.is_loaded("m") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_loaded("m"));
        assert_eq!(registry.loaded_models(), vec!["m".to_string()]);
        assert_eq!(loader.constructions(), 1);
    }

    #[tokio::test]
    async fn test_allowed_models() {
        let loader = Arc::new(MockModelLoader::new(4));
        let registry = registry_with(&loader).with_allowed_models(["ok-model"]);

        let err = registry.get_or_create("other").await.err().unwrap();
        assert!(matches!(err, EmbeddingError::ModelLoadError { .. }));
        assert_eq!(loader.constructions(), 0);

        assert!(registry.get_or_create("ok-model").await.is_ok());
    }

    /// Loader whose "slow" model blocks until the test releases it.
    struct GatedLoader {
        inner: MockModelLoader,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl ModelLoader for GatedLoader {
        fn load(&self, model_name: &str) -> EmbeddingResult<ModelHandle> {
            if model_name == "slow" {
                let gate = self.gate.lock().unwrap();
                gate.recv().unwrap();
            }
            self.inner.load(model_name)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unrelated_loads_do_not_wait_on_each_other() {
        let (release, gate) = mpsc::channel();
        let loader = GatedLoader {
            inner: MockModelLoader::new(4),
            gate: Mutex::new(gate),
        };
        let registry = Arc::new(ModelRegistry::new(Arc::new(loader)));

        let slow = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_or_create("slow").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fast = tokio::time::timeout(Duration::from_secs(2), registry.get_or_create("fast")).await;
        assert!(fast.expect("fast model must not wait for slow").is_ok());
        assert!(!slow.is_finished());
        assert!(!registry.is_loaded("slow"));

        release.send(()).unwrap();
        assert!(slow.await.unwrap().is_ok());
        assert_eq!(registry.len(), 2);
    }
}
