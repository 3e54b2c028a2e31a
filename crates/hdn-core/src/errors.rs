use crate::domain::EntityId;

/// Core error type for the notifier.
///
/// Adapter crates map their transport errors into `Delivery`/`Timeout` so the
/// flush pipeline can log every failure with the same shape.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("cannot resolve entity {entity}: {reason}")]
    Resolution { entity: EntityId, reason: String },

    #[error("{channel} delivery failed: {reason}")]
    Delivery {
        channel: &'static str,
        reason: String,
    },

    #[error("{channel} delivery timed out")]
    Timeout { channel: &'static str },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn resolution(entity: EntityId, reason: impl Into<String>) -> Self {
        Self::Resolution {
            entity,
            reason: reason.into(),
        }
    }

    pub fn delivery(channel: &'static str, reason: impl Into<String>) -> Self {
        Self::Delivery {
            channel,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
