use crate::types::BodyHandle;

/// Errors from loading or validating solver settings and body presets.
#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    #[error("failed to read settings from {path}: {source}")]
    SettingsIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    SettingsParse(#[from] toml::de::Error),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// Reasons a pairwise collision cannot be resolved between two bodies.
///
/// These are recoverable: the solver treats the contact as a bounce off an
/// immovable surface instead.
#[derive(Copy, Clone, Debug, PartialEq, thiserror::Error)]
pub enum CollisionError {
    #[error("body {0:?} has no collision radius")]
    MissingCollisionRadius(BodyHandle),

    #[error("bodies {0:?} and {1:?} share a center")]
    CoincidentCenters(BodyHandle, BodyHandle),
}

pub type PhysicsResult<T> = Result<T, PhysicsError>;
