//! Portfolio - Evidence Reconciliation & Caching Engine
//!
//! Tracks completion of vocational-qualification performance criteria by
//! reconciling evidence files in a remote folder hierarchy against the
//! qualification catalogue:
//! - Discovers evidence under `Evidence/<unit>/<criteria>/` with best-effort folder parsing
//! - Applies the one- or two-occasion policy to decide criterion completion
//! - Caches folder scans and site dashboards with independent TTLs
//! - Compiles a deterministic HTML portfolio with stable log sheet numbers
//!
//! # Architecture
//!
//! The system is organized into several layers:
//! - **Types**: Core data structures (EvidenceItem, CriterionCompletion, etc.)
//! - **Remote**: Store backends (Graph drive API, in-memory fixtures)
//! - **Engine**: Indexer, status store, reconciliation, caches
//! - **Service**: Query API consumed by the CLI and presentation layer
//!
//! # Example
//!
//! ```ignore
//! use portfolio_core::{AssessmentService, EngineConfig, SiteScope};
//!
//! #[tokio::main]
//! async fn main() -> portfolio_core::Result<()> {
//!     let config = EngineConfig::load(None)?;
//!     let service = AssessmentService::from_config(&config)?;
//!
//!     let completion = service.get_completion("contoso-site", "NETP3-01").await?;
//!     println!("{}%", completion.progress.percent());
//!
//!     let dashboard = service.get_dashboard(&SiteScope::All).await?;
//!     println!("{} pending", dashboard.pending_evidence_count);
//!     Ok(())
//! }
//! ```

pub mod assessment;
pub mod cache;
pub mod catalogue;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod indexer;
pub mod logsheet;
pub mod reconcile;
pub mod remote;
pub mod report;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use assessment::{AssessmentStatusStore, AssessmentUpdate};
pub use cache::{CacheManager, TtlCache};
pub use catalogue::{Catalogue, CrossReference, Unit};
pub use config::EngineConfig;
pub use dashboard::{Dashboard, SiteDashboard, SiteScope};
pub use error::{PortfolioError, Result};
pub use indexer::{EvidenceIndexer, ScanScope};
pub use logsheet::LogSheetAllocator;
pub use remote::{GraphStoreClient, InMemoryStore, RemoteStore};
pub use report::PortfolioCompiler;
pub use service::{AssessmentService, UnitCompletion};
pub use types::{
    AssessmentStatus, CriterionCompletion, EvidenceItem, EvidenceKind, IndexedEvidence, ScanGap,
    UnitProgress,
};
