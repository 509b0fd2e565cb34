//! Unified error type.
//!
//! Every subsystem keeps its own fine-grained error enum for callers that
//! need domain detail (`OtaError`, `TransportError`, `AppError`,
//! `SchedulerError`, `CacheError`, `ConfigError`). This module folds all of
//! them into one [`Error`] via `From` so code crossing subsystem boundaries
//! can use `?` without matching on each domain enum by hand.

use core::fmt;

use crate::appmgr::AppError;
use crate::config::ConfigError;
use crate::ota::OtaError;
use crate::scheduler::SchedulerError;
use crate::transport::TransportError;
use crate::wasm::CacheError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Ota(OtaError),
    Transport(TransportError),
    App(AppError),
    Scheduler(SchedulerError),
    Cache(CacheError),
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ota(e) => write!(f, "ota: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::App(e) => write!(f, "app: {e}"),
            Self::Scheduler(e) => write!(f, "scheduler: {e}"),
            Self::Cache(e) => write!(f, "cache: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<OtaError> for Error {
    fn from(e: OtaError) -> Self {
        Self::Ota(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<AppError> for Error {
    fn from(e: AppError) -> Self {
        Self::App(e)
    }
}

impl From<SchedulerError> for Error {
    fn from(e: SchedulerError) -> Self {
        Self::Scheduler(e)
    }
}

impl From<CacheError> for Error {
    fn from(e: CacheError) -> Self {
        Self::Cache(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
