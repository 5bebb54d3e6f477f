//! Configuration types for repository construction.

use std::time::Duration;

use once_cell::sync::Lazy;

/// Product name sent in the `User-Agent` header.
pub const PRODUCT_NAME: &str = "Dalamud";

/// Version sent in the `User-Agent` header.
///
/// Can be overridden with `PLUGINMASTER_VERSION`, e.g. to impersonate a
/// specific release against a staging server.
pub static PRODUCT_VERSION: Lazy<String> = Lazy::new(|| {
    std::env::var("PLUGINMASTER_VERSION").unwrap_or(env!("CARGO_PKG_VERSION").to_string())
});

/// Timeout applied to both the dedicated client and every catalog request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Whether a repository is the designated main repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RepositoryKind {
    Main,
    #[default]
    ThirdParty,
}

/// Configuration for [crate::PluginRepository] construction.
///
/// Only the URL, the enabled flag and the kind are up to the caller,
/// the client identity and timeout are fixed.
#[derive(Debug, Clone)]
pub struct RepositoryClientConfig {
    /// URL of the plugin list document.
    pub url: String,
    /// Whether the repository is enabled by the user.
    pub enabled: bool,
    pub kind: RepositoryKind,
    /// Value of the `User-Agent` header, `<product>/<version>`.
    ///
    /// Fixed to [default_user_agent] outside of this crate.
    pub(crate) user_agent: String,
    /// Upper bound for a single catalog request.
    ///
    /// Fixed to [DEFAULT_REQUEST_TIMEOUT] outside of this crate,
    /// see [crate::PluginRepository::refresh_with_timeout] to override it per refresh.
    pub(crate) request_timeout: Duration,
}

impl RepositoryClientConfig {
    /// A third-party repository with the default identity and timeout.
    pub fn new(url: impl Into<String>, enabled: bool) -> Self {
        Self {
            url: url.into(),
            enabled,
            kind: RepositoryKind::ThirdParty,
            user_agent: default_user_agent(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub fn default_user_agent() -> String {
    format!("{PRODUCT_NAME}/{}", &*PRODUCT_VERSION)
}
