//! Service configuration
//!
//! Every field has a default, so an empty TOML file is a valid configuration:
//!
//! ```toml
//! output_dir = "exports"
//!
//! [realtime]
//! chunk_count = 10
//! max_sessions = 64
//!
//! [classifier.forest]
//! n_trees = 100
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use terrawatch_algorithms::classification::{ClassifierParams, ModelType};
use terrawatch_algorithms::scale::{ScaleSelector, DEFAULT_LADDER, DEFAULT_MAX_SIDE_PIXELS};
use terrawatch_core::{Band, Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub output_dir: PathBuf,
    pub model_dir: PathBuf,
    pub tiles_dir: PathBuf,
    pub realtime: RealtimeConfig,
    pub scale: ScaleConfig,
    pub acquisition: AcquisitionConfig,
    pub classifier: ClassifierParams,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("exports"),
            model_dir: PathBuf::from("models"),
            tiles_dir: PathBuf::from("map_tiles"),
            realtime: RealtimeConfig::default(),
            scale: ScaleConfig::default(),
            acquisition: AcquisitionConfig::default(),
            classifier: ClassifierParams::default(),
        }
    }
}

/// Session and event-channel limits for realtime training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Progress events per chunked stage
    pub chunk_count: usize,
    /// Registry capacity, running and finished sessions together
    pub max_sessions: usize,
    /// Finished sessions older than this are evicted
    pub session_ttl_secs: u64,
    /// Sessions running at once; the rest wait for a slot
    pub worker_limit: usize,
    /// Per-session broadcast buffer
    pub event_capacity: usize,
    pub model_type: ModelType,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            chunk_count: 10,
            max_sessions: 64,
            session_ttl_secs: 3600,
            worker_limit: 4,
            event_capacity: 1024,
            model_type: ModelType::RandomForest,
        }
    }
}

impl RealtimeConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    /// Candidate resolutions in metres, ascending
    pub ladder: Vec<f64>,
    pub max_side_pixels: u64,
    /// Fixed provider resolution; bypasses the ladder when set
    pub native_resolution: Option<f64>,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            ladder: DEFAULT_LADDER.to_vec(),
            max_side_pixels: DEFAULT_MAX_SIDE_PIXELS,
            native_resolution: None,
        }
    }
}

impl ScaleConfig {
    pub fn selector(&self) -> Result<ScaleSelector> {
        match self.native_resolution {
            Some(resolution) => Ok(ScaleSelector::native(resolution)),
            None => ScaleSelector::new(self.ladder.clone(), self.max_side_pixels),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Maximum cloud cover in percent for the first request
    pub cloud_ceiling: f64,
    /// Ceiling for the single retry after no imagery matched
    pub relaxed_cloud_ceiling: f64,
    pub bands: Vec<Band>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            cloud_ceiling: 20.0,
            relaxed_cloud_ceiling: 50.0,
            bands: Band::ALL.to_vec(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Format(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| match e {
            Error::Format(msg) => Error::Format(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Load `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Format(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let rt = &self.realtime;
        for (name, value) in [
            ("realtime.chunk_count", rt.chunk_count),
            ("realtime.max_sessions", rt.max_sessions),
            ("realtime.worker_limit", rt.worker_limit),
            ("realtime.event_capacity", rt.event_capacity),
        ] {
            if value == 0 {
                return Err(Error::InvalidParameter {
                    name,
                    value: "0".into(),
                    reason: "must be positive".into(),
                });
            }
        }
        let acq = &self.acquisition;
        if !(0.0..=100.0).contains(&acq.cloud_ceiling) || acq.relaxed_cloud_ceiling < acq.cloud_ceiling {
            return Err(Error::InvalidParameter {
                name: "acquisition.cloud_ceiling",
                value: format!("{} / {}", acq.cloud_ceiling, acq.relaxed_cloud_ceiling),
                reason: "ceilings must lie in [0, 100] with the relaxed one not below the first".into(),
            });
        }
        self.scale.selector().map(|_| ())
    }
}
