//! Orchestration of UCI chess engines: adapters over engine processes, a
//! single-engine manager, engine pools with selection strategies and a
//! multi-engine comparison coordinator.

pub mod adapter;
pub mod config;
pub mod coordinator;
pub mod embedded;
pub mod error;
pub mod manager;
pub mod pool;
pub mod protocol;
pub mod record;
pub mod registry;
pub mod selection;
pub mod session;

pub use adapter::{AdapterSettings, EngineAdapter};
pub use config::BridgeConfig;
pub use coordinator::{consensus, ComparisonReport, Consensus, Coordinator};
pub use error::EngineError;
pub use manager::{EngineManager, EngineStatus, StopHandle};
pub use pool::{EnginePool, PoolSettings, PoolState, PoolStatus};
pub use record::{AnalysisResult, MoveRecord, SearchBudget, SearchOptions, SearchRequest};
pub use registry::{EngineConfig, EngineFamily, EngineId, PoolConfig, Registry};
pub use selection::{SelectionStrategy, Selector};
pub use session::{AnalysisDisplay, Autoplay, AutoplayStats, BoardSource, MoveSink};
