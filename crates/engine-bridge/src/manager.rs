//! Single-engine façade with a rolling analysis history.

use std::collections::VecDeque;
use std::sync::Arc;

use chess_core::Position;
use serde::Serialize;
use tracing::info;

use crate::adapter::{AdapterSettings, EngineAdapter};
use crate::error::EngineError;
use crate::record::{
    renumber, AnalysisResult, MoveRecord, SearchBudget, SearchOptions, SearchRequest,
};
use crate::registry::{EngineId, Registry};

/// Analyses kept in memory; the oldest is evicted first.
pub const HISTORY_CAPACITY: usize = 100;

/// Snapshot for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub ready: bool,
    pub engine: Option<EngineId>,
    pub current_position: Option<Position>,
    /// Best line's score from the last analysis, in pawns
    pub last_evaluation: Option<f64>,
    pub history_size: usize,
}

/// Cloneable handle for stopping a search from another task.
#[derive(Clone)]
pub struct StopHandle(Arc<EngineAdapter>);

impl StopHandle {
    pub async fn stop(&self) -> Result<(), EngineError> {
        self.0.stop().await
    }
}

pub struct EngineManager {
    registry: Arc<Registry>,
    settings: AdapterSettings,
    default_budget: SearchBudget,
    adapter: Option<Arc<EngineAdapter>>,
    history: VecDeque<AnalysisResult>,
    current_position: Option<Position>,
    last_evaluation: Option<f64>,
}

impl EngineManager {
    pub fn new(
        registry: Arc<Registry>,
        settings: AdapterSettings,
        default_budget: SearchBudget,
    ) -> Self {
        Self {
            registry,
            settings,
            default_budget,
            adapter: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            current_position: None,
            last_evaluation: None,
        }
    }

    /// Launch `id`. Replaces nothing: use `switch_engine` when an engine is
    /// already running.
    pub async fn initialize(&mut self, id: &EngineId) -> Result<(), EngineError> {
        if let Some(adapter) = &self.adapter {
            if adapter.is_ready() {
                return Err(EngineError::Config(format!(
                    "Manager already runs {}; switch engines instead",
                    adapter.id()
                )));
            }
        }
        let config = self.registry.engine(id)?;
        let adapter = EngineAdapter::launch(id.clone(), config, self.settings).await?;
        self.adapter = Some(Arc::new(adapter));
        Ok(())
    }

    /// Quit the running engine and launch `id` in its place. If the new
    /// engine fails to start the manager is left without one.
    pub async fn switch_engine(&mut self, id: &EngineId) -> Result<(), EngineError> {
        if let Some(old) = self.adapter.take() {
            info!(from = %old.id(), to = %id, "Switching engine");
            old.quit().await;
        }
        self.initialize(id).await
    }

    pub async fn analyze_position(
        &mut self,
        position: Position,
        options: &SearchOptions,
    ) -> Result<AnalysisResult, EngineError> {
        let adapter = self.ready_adapter()?;
        self.current_position = Some(position.clone());

        let request = SearchRequest::new(position, options.resolve(self.default_budget));
        let result = adapter.search(&request).await?;

        self.last_evaluation = Some(result.best.score);
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(result.clone());
        Ok(result)
    }

    /// Top `count` moves, ranked 1..k.
    pub async fn get_candidate_moves(
        &mut self,
        position: Position,
        count: u32,
        options: &SearchOptions,
    ) -> Result<Vec<MoveRecord>, EngineError> {
        let adapter = self.ready_adapter()?;
        self.current_position = Some(position.clone());

        let request = SearchRequest::new(position, options.resolve(self.default_budget));
        let mut candidates = adapter.search_multi_variation(count, &request).await?;
        renumber(&mut candidates);
        Ok(candidates)
    }

    pub async fn stop_analysis(&self) -> Result<(), EngineError> {
        self.ready_adapter()?.stop().await
    }

    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.adapter.clone().map(StopHandle)
    }

    pub async fn new_game(&mut self) -> Result<(), EngineError> {
        self.ready_adapter()?.new_game().await?;
        self.current_position = None;
        Ok(())
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            ready: self.adapter.as_ref().is_some_and(|a| a.is_ready()),
            engine: self.adapter.as_ref().map(|a| a.id().clone()),
            current_position: self.current_position.clone(),
            last_evaluation: self.last_evaluation,
            history_size: self.history.len(),
        }
    }

    /// Past analyses, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &AnalysisResult> {
        self.history.iter()
    }

    pub async fn quit(&mut self) {
        if let Some(adapter) = &self.adapter {
            adapter.quit().await;
        }
    }

    fn ready_adapter(&self) -> Result<Arc<EngineAdapter>, EngineError> {
        match &self.adapter {
            Some(adapter) if adapter.is_ready() => Ok(adapter.clone()),
            Some(adapter) => Err(EngineError::NotReady(adapter.id().clone())),
            None => Err(EngineError::NotReady(EngineId::new("<none>"))),
        }
    }
}
