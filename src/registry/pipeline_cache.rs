//! # Pipeline Cache
//!
//! Building an inference pipeline loads a whole model, so built pipelines are
//! kept and reused per model location. The cache is bounded: once it holds
//! `capacity` pipelines, inserting another evicts the least recently used one.
//!
//! ## Thread Safety:
//! The lock is only held for lookups and inserts. Builds happen outside it,
//! so a slow model load never blocks callers using other models. If two
//! callers build the same pipeline at once, the first one inserted is kept
//! and returned to both.

use crate::engine::Pipeline;
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Default)]
struct CacheState {
    pipelines: HashMap<String, Arc<dyn Pipeline>>,
    /// Least recently used at the front.
    recency: VecDeque<String>,
}

impl CacheState {
    fn touch(&mut self, key: &str) {
        if let Some(position) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(position);
        }
        self.recency.push_back(key.to_string());
    }
}

pub struct PipelineCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl PipelineCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().pipelines.len()
    }

    /// Cached model locations, least recently used first.
    pub fn locations(&self) -> Vec<String> {
        self.state.lock().recency.iter().cloned().collect()
    }

    pub fn get(&self, model_location: &str) -> Option<Arc<dyn Pipeline>> {
        let mut state = self.state.lock();
        let pipeline = state.pipelines.get(model_location).cloned()?;
        state.touch(model_location);
        Some(pipeline)
    }

    /// Return the cached pipeline for `model_location`, or build and cache one.
    pub fn get_or_build(
        &self,
        model_location: &str,
        build: impl FnOnce() -> Result<Arc<dyn Pipeline>>,
    ) -> Result<Arc<dyn Pipeline>> {
        if let Some(pipeline) = self.get(model_location) {
            debug!(model = %model_location, "Using cached pipeline");
            return Ok(pipeline);
        }

        info!(model = %model_location, "Building new pipeline");
        let built = build()?;

        let mut state = self.state.lock();
        if let Some(existing) = state.pipelines.get(model_location).cloned() {
            state.touch(model_location);
            return Ok(existing);
        }

        while state.pipelines.len() >= self.capacity {
            let Some(evicted) = state.recency.pop_front() else {
                break;
            };
            state.pipelines.remove(&evicted);
            info!(model = %evicted, "Evicted pipeline from cache");
        }

        state.pipelines.insert(model_location.to_string(), built.clone());
        state.touch(model_location);
        Ok(built)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.pipelines.clear();
        state.recency.clear();
    }
}
