use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PhysicsError, PhysicsResult};

/// Default number of sub-steps a body may take per frame.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Speeds below this stop a body (units per second).
pub const DEFAULT_MIN_SIMULATION_SPEED: f32 = 0.01;

/// Downward acceleration applied to bodies that use gravity.
pub const DEFAULT_GRAVITY: f32 = 9.81;

/// Solver settings, read once when the solver is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Upper bound on sub-steps per body per frame (>= 1).
    pub max_iterations: u32,
    /// A body slower than this after a sub-step stops simulating.
    pub minimum_simulation_speed: f32,
    /// Gravity magnitude, acting along -Z.
    pub gravity: f32,
    /// Fill `SolverTiming` each tick (small overhead when true).
    pub enable_timing: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            minimum_simulation_speed: DEFAULT_MIN_SIMULATION_SPEED,
            gravity: DEFAULT_GRAVITY,
            enable_timing: false,
        }
    }
}

impl SolverConfig {
    /// Parse settings from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> PhysicsResult<Self> {
        let cfg: SolverConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a TOML settings file.
    pub fn load(path: impl AsRef<Path>) -> PhysicsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PhysicsError::SettingsIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> PhysicsResult<()> {
        if self.max_iterations == 0 {
            return Err(PhysicsError::InvalidSettings(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !self.minimum_simulation_speed.is_finite() || self.minimum_simulation_speed < 0.0 {
            return Err(PhysicsError::InvalidSettings(format!(
                "minimum_simulation_speed must be finite and >= 0, got {}",
                self.minimum_simulation_speed
            )));
        }
        if !self.gravity.is_finite() {
            return Err(PhysicsError::InvalidSettings(format!(
                "gravity must be finite, got {}",
                self.gravity
            )));
        }
        Ok(())
    }
}
