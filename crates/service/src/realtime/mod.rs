//! Realtime training sessions
//!
//! A session runs the full weak-label → train → classify → render workflow
//! on a background worker and publishes [`ProgressEvent`]s on a topic keyed
//! by its session id. Subscribe before starting a session: topics do not
//! replay events to late subscribers.
//!
//! - [`events`]: stages and the event payload
//! - [`bus`]: per-session broadcast topics
//! - [`reporter`]: per-stage progress bookkeeping
//! - [`pipeline`]: the staged workflow itself
//! - [`session`]: bounded registry, worker pool and cancellation
//! - [`visualization`]: PNG overlay and its metadata

pub mod bus;
pub mod events;
pub mod pipeline;
pub mod reporter;
pub mod session;
pub mod visualization;

pub use bus::{EventBus, ProgressSink};
pub use events::{ProgressEvent, Stage};
pub use pipeline::{PipelineContext, TrainingOutcome, TrainingPipeline, TrainingRequest};
pub use reporter::{ProgressReporter, StageReporter};
pub use session::{SessionInfo, SessionLimits, SessionManager, SessionStatus, TrainingAck};
pub use visualization::{render_overlay, OverlayMetadata};
