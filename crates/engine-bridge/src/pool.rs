//! Engine pool: a cache of live adapters for one configured pool, plus the
//! policy deciding which of them serves the next request.

use std::collections::HashMap;
use std::sync::Arc;

use chess_core::Position;
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::adapter::{AdapterSettings, EngineAdapter};
use crate::error::EngineError;
use crate::record::{
    renumber, AnalysisResult, MoveRecord, SearchBudget, SearchOptions, SearchRequest,
};
use crate::registry::{EngineId, Registry};
use crate::selection::{SelectionStrategy, Selector};

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub strategy: SelectionStrategy,
    /// Switch engines every N analyses; 0 disables switching
    pub switch_interval: u32,
    pub adapter: AdapterSettings,
    pub default_budget: SearchBudget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Uninitialized,
    Initializing,
    Ready,
    Switching,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub pool: String,
    pub state: PoolState,
    pub strategy: SelectionStrategy,
    pub current: Option<EngineId>,
    pub current_name: Option<String>,
    pub members: Vec<EngineId>,
    pub move_count: u64,
}

/// True when the analysis numbered `move_count` (0-based) must be served by a
/// freshly selected engine.
pub fn switch_due(strategy: SelectionStrategy, interval: u32, move_count: u64) -> bool {
    strategy.allows_switching()
        && interval > 0
        && move_count > 0
        && move_count % interval as u64 == 0
}

struct Selection {
    /// Active members; engines that failed to start are gone for good
    members: Vec<EngineId>,
    /// Parallel to `members`
    weights: Option<Vec<f64>>,
    selector: Selector,
    current: Option<EngineId>,
    state: PoolState,
    move_count: u64,
}

type Slot = Arc<OnceCell<Arc<EngineAdapter>>>;

pub struct EnginePool {
    name: String,
    registry: Arc<Registry>,
    settings: PoolSettings,
    selection: Mutex<Selection>,
    /// One once-cell per engine serialises its initialisation
    cache: Mutex<HashMap<EngineId, Slot>>,
}

impl EnginePool {
    pub fn new(
        registry: Arc<Registry>,
        pool: &str,
        settings: PoolSettings,
    ) -> Result<Self, EngineError> {
        Self::build(registry, pool, settings, Selector::new(settings.strategy))
    }

    /// Same as `new`, with reproducible random and weighted picks.
    pub fn seeded(
        registry: Arc<Registry>,
        pool: &str,
        settings: PoolSettings,
        seed: u64,
    ) -> Result<Self, EngineError> {
        Self::build(registry, pool, settings, Selector::seeded(settings.strategy, seed))
    }

    fn build(
        registry: Arc<Registry>,
        pool: &str,
        settings: PoolSettings,
        selector: Selector,
    ) -> Result<Self, EngineError> {
        let config = registry.pool(pool)?;

        // Weights only count when there is exactly one per engine.
        let configured = config.weights.as_ref().filter(|w| {
            let fits = w.len() == config.engines.len();
            if !fits {
                warn!(
                    pool,
                    weights = w.len(),
                    engines = config.engines.len(),
                    "Ignoring weights that do not match the engine list"
                );
            }
            fits
        });

        let mut members = Vec::with_capacity(config.engines.len());
        let mut weights = configured.map(|_| Vec::new());
        for (i, id) in config.engines.iter().enumerate() {
            if !registry.engine(id)?.enabled {
                warn!(pool, engine = %id, "Skipping disabled engine");
                continue;
            }
            members.push(id.clone());
            if let (Some(kept), Some(all)) = (weights.as_mut(), configured) {
                kept.push(all[i]);
            }
        }
        if members.is_empty() {
            return Err(EngineError::PoolExhausted(pool.to_string()));
        }

        Ok(Self {
            name: pool.to_string(),
            registry,
            settings,
            selection: Mutex::new(Selection {
                members,
                weights,
                selector,
                current: None,
                state: PoolState::Uninitialized,
                move_count: 0,
            }),
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Select and start the first engine, falling back through the pool
    /// until one starts.
    pub async fn initialize(&self) -> Result<EngineId, EngineError> {
        self.set_state(PoolState::Initializing).await;
        let result = self.select_with_fallback().await;
        self.settle(&result).await;
        result
    }

    /// Pick the next engine by strategy and make sure it is running.
    ///
    /// A failing engine is dropped from the pool and its error returned; call
    /// again to fall back to the remaining members.
    pub async fn select_engine(&self) -> Result<EngineId, EngineError> {
        let id = {
            let mut guard = self.selection.lock().await;
            let selection = &mut *guard;
            let index = selection
                .selector
                .pick(selection.members.len(), selection.weights.as_deref())
                .ok_or_else(|| EngineError::PoolExhausted(self.name.clone()))?;
            selection.members[index].clone()
        };

        match self.adapter_for(&id).await {
            Ok(_) => {
                self.selection.lock().await.current = Some(id.clone());
                Ok(id)
            }
            Err(e) => {
                self.demote(&id).await;
                Err(e)
            }
        }
    }

    /// Whether the next analysis will switch engines first.
    pub async fn should_switch(&self) -> bool {
        let selection = self.selection.lock().await;
        switch_due(
            selection.selector.strategy(),
            self.settings.switch_interval,
            selection.move_count,
        )
    }

    pub async fn analyze_position(
        &self,
        position: Position,
        options: &SearchOptions,
    ) -> Result<AnalysisResult, EngineError> {
        let adapter = self.prepare_for_move().await?;
        let request = SearchRequest::new(position, options.resolve(self.settings.default_budget));
        adapter.search(&request).await
    }

    /// Candidate moves from the current engine. Does not count as a move.
    pub async fn get_candidate_moves(
        &self,
        position: Position,
        count: u32,
        options: &SearchOptions,
    ) -> Result<Vec<MoveRecord>, EngineError> {
        if self.state().await == PoolState::Uninitialized {
            self.initialize().await?;
        }
        let adapter = self.current_adapter().await?;
        let request = SearchRequest::new(position, options.resolve(self.settings.default_budget));
        let mut candidates = adapter.search_multi_variation(count, &request).await?;
        renumber(&mut candidates);
        Ok(candidates)
    }

    pub async fn stop_analysis(&self) -> Result<(), EngineError> {
        self.current_adapter().await?.stop().await
    }

    pub async fn state(&self) -> PoolState {
        self.selection.lock().await.state
    }

    pub async fn members(&self) -> Vec<EngineId> {
        self.selection.lock().await.members.clone()
    }

    pub async fn status(&self) -> PoolStatus {
        let (state, strategy, current, members, move_count) = {
            let selection = self.selection.lock().await;
            (
                selection.state,
                selection.selector.strategy(),
                selection.current.clone(),
                selection.members.clone(),
                selection.move_count,
            )
        };
        let current_name = match &current {
            Some(id) => self.registry.engine(id).ok().map(|c| c.name.clone()),
            None => None,
        };
        PoolStatus {
            pool: self.name.clone(),
            state,
            strategy,
            current,
            current_name,
            members,
            move_count,
        }
    }

    /// Quit and forget the current engine, e.g. after it crashed. The next
    /// analysis selects again, which may restart the same engine.
    pub async fn evict_current(&self) {
        let current = {
            let mut selection = self.selection.lock().await;
            selection.state = PoolState::Uninitialized;
            selection.current.take()
        };
        let Some(id) = current else {
            return;
        };
        let slot = self.cache.lock().await.remove(&id);
        if let Some(adapter) = slot.as_ref().and_then(|s| s.get()) {
            adapter.quit().await;
        }
        info!(pool = %self.name, engine = %id, "Evicted engine");
    }

    /// Quit every cached engine.
    pub async fn cleanup(&self) {
        let slots: Vec<Slot> = self.cache.lock().await.drain().map(|(_, s)| s).collect();
        for slot in slots {
            if let Some(adapter) = slot.get() {
                adapter.quit().await;
            }
        }
        let mut selection = self.selection.lock().await;
        selection.current = None;
        selection.state = PoolState::Uninitialized;
    }

    async fn prepare_for_move(&self) -> Result<Arc<EngineAdapter>, EngineError> {
        let (state, switch) = {
            let selection = self.selection.lock().await;
            let switch = switch_due(
                selection.selector.strategy(),
                self.settings.switch_interval,
                selection.move_count,
            );
            (selection.state, switch)
        };

        if state == PoolState::Uninitialized {
            self.initialize().await?;
        } else if switch {
            let previous = self.selection.lock().await.current.clone();
            self.set_state(PoolState::Switching).await;
            let result = self.select_with_fallback().await;
            self.settle(&result).await;
            let id = result?;
            info!(pool = %self.name, from = ?previous, to = %id, "Switched engine");
        }

        let adapter = self.current_adapter().await?;
        self.selection.lock().await.move_count += 1;
        Ok(adapter)
    }

    async fn select_with_fallback(&self) -> Result<EngineId, EngineError> {
        loop {
            match self.select_engine().await {
                Ok(id) => return Ok(id),
                Err(e @ EngineError::PoolExhausted(_)) => return Err(e),
                Err(e) => {
                    warn!(pool = %self.name, error = %e, "Pool engine failed, trying another");
                }
            }
        }
    }

    async fn adapter_for(&self, id: &EngineId) -> Result<Arc<EngineAdapter>, EngineError> {
        let slot = self.cache.lock().await.entry(id.clone()).or_default().clone();
        slot.get_or_try_init(|| async {
            let config = self.registry.engine(id)?;
            info!(pool = %self.name, engine = %id, "Starting pool engine");
            EngineAdapter::launch(id.clone(), config, self.settings.adapter)
                .await
                .map(Arc::new)
        })
        .await
        .cloned()
    }

    async fn current_adapter(&self) -> Result<Arc<EngineAdapter>, EngineError> {
        let current = self.selection.lock().await.current.clone();
        let id = current.ok_or_else(|| EngineError::NotReady(EngineId::new(self.name.clone())))?;
        let slot = self.cache.lock().await.get(&id).cloned();
        slot.and_then(|s| s.get().cloned())
            .ok_or(EngineError::NotReady(id))
    }

    /// Drop every occurrence of `id` from the pool for the rest of the session.
    async fn demote(&self, id: &EngineId) {
        self.cache.lock().await.remove(id);

        let mut guard = self.selection.lock().await;
        let selection = &mut *guard;
        let keep: Vec<bool> = selection.members.iter().map(|m| m != id).collect();
        if let Some(weights) = selection.weights.as_mut() {
            let mut flags = keep.iter();
            weights.retain(|_| *flags.next().unwrap_or(&true));
        }
        selection.members.retain(|m| m != id);
        if selection.current.as_ref() == Some(id) {
            selection.current = None;
        }
        warn!(
            pool = %self.name,
            engine = %id,
            remaining = selection.members.len(),
            "Removed engine from pool"
        );
    }

    async fn set_state(&self, state: PoolState) {
        self.selection.lock().await.state = state;
    }

    async fn settle(&self, result: &Result<EngineId, EngineError>) {
        let state = if result.is_ok() {
            PoolState::Ready
        } else {
            PoolState::Uninitialized
        };
        self.set_state(state).await;
    }
}
