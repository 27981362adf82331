//! # Terrawatch Service
//!
//! The stateful layer above the algorithms:
//!
//! - [`config`]: TOML-backed service configuration
//! - [`acquisition`]: imagery provider boundary and the cloud/scale fallback policy
//! - [`analysis`]: two-period change reports over acquired composites
//! - [`realtime`]: background training sessions with per-session progress events

pub mod acquisition;
pub mod analysis;
pub mod config;
pub mod realtime;

pub use acquisition::{AcquiredComposite, Acquisition, CompositeRequest, ImageryProvider, StaticProvider};
pub use analysis::ChangeAnalysis;
pub use config::ServiceConfig;
pub use realtime::{
    EventBus, ProgressEvent, SessionManager, SessionStatus, Stage, TrainingAck, TrainingPipeline,
    TrainingRequest,
};
