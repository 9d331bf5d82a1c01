//! # routescout
//!
//! Network route analysis and tunnel automation.
//!
//! routescout discovers every candidate network path on the host (interfaces,
//! wireless networks, default-gateway routes), measures each one
//! periodically, ranks them by a weighted quality score and brings a
//! WireGuard tunnel up over the best path on request.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     CLI / Presentation Layer                    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                          Engine Facade                          │
//! ├────────────────────────────────┬────────────────────────────────┤
//! │          Analysis Loop         │     Connection Lifecycle       │
//! │  ┌─────────┐  ┌─────────────┐  │  ┌──────────┐  ┌────────────┐  │
//! │  │ Catalog │  │Metrics Cache│  │  │ Selector │  │Route Store │  │
//! │  └─────────┘  └─────────────┘  │  └──────────┘  └────────────┘  │
//! ├────────────────────────────────┼────────────────────────────────┤
//! │     ProbePort (ping, /sys)     │   TunnelProvisioner (wg-quick) │
//! └────────────────────────────────┴────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]       // Acceptable for stats
#![allow(clippy::suboptimal_flops)]          // Clarity over micro-optimization
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::option_if_let_else)]        // More readable in context
#![allow(clippy::use_self)]
#![allow(clippy::future_not_send)]
#![allow(clippy::match_same_arms)]           // Explicit arm per state is clearer
#![allow(clippy::return_self_not_must_use)]  // Builder methods don't need must_use

pub mod analysis;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod probe;
pub mod tunnel;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::analysis::{AnalysisConfig, AnalysisEvent, AnalysisLoop, CycleOutcome};
    pub use crate::catalog::{discover_routes, DiscoveryFilter};
    pub use crate::config::Config;
    pub use crate::connection::{ConnectionEvent, ConnectionManager};
    pub use crate::engine::Engine;
    pub use crate::error::{Error, Result};
    pub use crate::metrics::{score, MetricsCache, MetricsSample};
    pub use crate::probe::{ProbePort, SystemProbe};
    pub use crate::tunnel::{TunnelProvisioner, WgQuickProvisioner};
    pub use crate::types::*;
}
