//! Remote plugin repositories.
//!
//! This crate provides:
//! - [PluginRepository]: one remote plugin list, refreshed on demand and
//!   published as immutable [CatalogSnapshot]s
//! - manifest validation applied to every entry before it is published
//! - HTTP client construction with product and device identification
//! - the migration of retired main repository URLs
//!
//! ## Usage
//!
//! ```ignore
//! use plugin_repository::migration::migrate_main_repo_url;
//! use plugin_repository::{HttpTransport, PluginRepository, StaticDeviceId};
//!
//! let transport = HttpTransport::default();
//! migrate_main_repo_url(&mut config.main_repo_url, &mut config_store)?;
//! let repo = PluginRepository::main(
//!     &transport,
//!     config.main_repo_url.clone(),
//!     &StaticDeviceId(device_id),
//! )?;
//!
//! match repo.refresh().await {
//!     RepositoryState::Success => render(&repo.snapshot().plugin_master),
//!     _ => render_retry(),
//! }
//! ```

mod client;
mod config;
mod error;
mod identity;
mod manifest;
pub mod migration;
mod repository;

/// Target of all log events emitted by this crate.
pub const LOG_TARGET: &str = "PLUGINR";

pub use client::{HttpTransport, MACHINE_TOKEN_HEADER};
pub use config::{
    default_user_agent,
    RepositoryClientConfig,
    RepositoryKind,
    DEFAULT_REQUEST_TIMEOUT,
    PRODUCT_NAME,
    PRODUCT_VERSION,
};
pub use error::{ClientBuildError, InvalidManifest, RefreshError};
pub use identity::{
    DeviceIdError,
    DeviceIdentity,
    PersistedDeviceId,
    StaticDeviceId,
    DEVICE_ID_FILE_NAME,
};
pub use manifest::{
    validate_manifest,
    AssemblyVersion,
    ParseVersionError,
    RawPluginManifest,
    RemotePluginManifest,
};
pub use repository::{CatalogSnapshot, PluginRepository, RepositorySource, RepositoryState};
