//! Error handling for plugin repository operations.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised while building the HTTP client of a repository.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("invalid value for header '{name}'")]
    InvalidHeader {
        name: &'static str,
        #[source]
        source: reqwest::header::InvalidHeaderValue,
    },
    #[error("could not build HTTP client")]
    Build(#[source] reqwest::Error),
}

/// Reasons a single refresh of a repository failed.
///
/// These never escape [crate::PluginRepository::refresh],
/// which logs them and reports [crate::RepositoryState::Fail] instead.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("request failed")]
    Transport(#[source] reqwest::Error),
    #[error("request timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("server responded with {status} for {url}")]
    Status { status: StatusCode, url: String },
    #[error("could not parse plugin list")]
    Parse(#[source] serde_json::Error),
    #[error("plugin list deserialized to null")]
    NullDocument,
}

/// Why a raw catalog entry was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidManifest {
    #[error("plugin is missing a valid internal name")]
    MissingInternalName,
    #[error("plugin '{internal_name}' is missing a valid name")]
    MissingName { internal_name: String },
    #[error("plugin '{internal_name}' is missing a valid assembly version")]
    MissingAssemblyVersion { internal_name: String },
}
