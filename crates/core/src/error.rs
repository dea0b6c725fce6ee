use crate::delta::DeltaError;
use crate::model::MetricType;
use std::time::Duration;
use thiserror::Error;

/// Core errors for the recorder
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{metric} provider failed: {message}")]
    Provider { metric: MetricType, message: String },

    #[error("{metric} provider did not answer within {timeout:?}")]
    ProviderTimeout { metric: MetricType, timeout: Duration },

    #[error("{0} provider is still busy with an earlier call")]
    ProviderBusy(MetricType),

    #[error("Delta computation failed: {0}")]
    Delta(#[from] DeltaError),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("{metric} sink error: {message}")]
    Sink { metric: MetricType, message: String },

    #[error("{metric} sink failed {consecutive_failures} writes in a row")]
    SinkUnhealthy {
        metric: MetricType,
        consecutive_failures: u32,
    },

    #[error("{component} did not stop within {grace:?}")]
    ShutdownTimeout { component: String, grace: Duration },

    #[error("{component} task failed: {message}")]
    TaskFailed { component: String, message: String },

    #[error("Feature not supported on this platform: {0}")]
    UnsupportedPlatform(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(all(target_os = "linux", feature = "linux_procfs"))]
    #[error("Procfs error: {0}")]
    Procfs(#[from] procfs::ProcError),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn provider<S: Into<String>>(metric: MetricType, msg: S) -> Self {
        Self::Provider {
            metric,
            message: msg.into(),
        }
    }

    pub fn dispatch<S: Into<String>>(msg: S) -> Self {
        Self::Dispatch(msg.into())
    }

    pub fn sink<S: Into<String>>(metric: MetricType, msg: S) -> Self {
        Self::Sink {
            metric,
            message: msg.into(),
        }
    }

    pub fn unsupported_platform<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedPlatform(msg.into())
    }
}
