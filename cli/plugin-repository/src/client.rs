//! HTTP plumbing for plugin repositories.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::{debug, instrument};

use crate::config::RepositoryClientConfig;
use crate::error::{ClientBuildError, RefreshError};
use crate::identity::DeviceIdentity;
use crate::LOG_TARGET;

/// Header carrying the device id.
pub const MACHINE_TOKEN_HEADER: &str = "x-machine-token";

/// Connection strategy shared by all repositories of a process.
///
/// Each repository builds its own client with its own default headers,
/// but they all connect the same way.
/// Clients built from it are safe to use from concurrent requests.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Upper bound for establishing a connection.
    ///
    /// Dual-stack hosts are raced, falling back to the other address family
    /// if the preferred one doesn't connect quickly.
    pub connect_timeout: Duration,
    /// Bind outgoing connections to this address.
    pub local_address: Option<IpAddr>,
    pub pool_idle_timeout: Option<Duration>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            local_address: None,
            pool_idle_timeout: Some(Duration::from_secs(90)),
        }
    }
}

impl HttpTransport {
    fn configure(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        builder
            .connect_timeout(self.connect_timeout)
            .local_address(self.local_address)
            .pool_idle_timeout(self.pool_idle_timeout)
    }
}

/// Build the dedicated client of a repository.
///
/// Responses are decompressed transparently, every request asks for fresh
/// JSON and identifies the product and the device.
pub(crate) fn build_http_client(
    transport: &HttpTransport,
    config: &RepositoryClientConfig,
    identity: &dyn DeviceIdentity,
) -> Result<reqwest::Client, ClientBuildError> {
    let mut headers = HeaderMap::new();

    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        MACHINE_TOKEN_HEADER,
        HeaderValue::from_str(&identity.device_id()).map_err(|source| {
            ClientBuildError::InvalidHeader {
                name: MACHINE_TOKEN_HEADER,
                source,
            }
        })?,
    );

    debug!(
        target: LOG_TARGET,
        url = %config.url,
        user_agent = %config.user_agent,
        "building repository HTTP client"
    );

    let client_builder = transport.configure(reqwest::Client::builder());

    client_builder
        .default_headers(headers)
        .user_agent(&config.user_agent)
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .zstd(true)
        .timeout(config.request_timeout)
        .build()
        .map_err(ClientBuildError::Build)
}

/// GET the plugin list at `url` and return the response body.
///
/// The whole exchange, including reading the body, is cancelled once
/// `timeout` elapses.
#[instrument(target = "PLUGINR", skip(client))]
pub(crate) async fn get_plugin_master(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<String, RefreshError> {
    let request = async {
        let response = client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .header(header::CACHE_CONTROL, "no-cache")
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| map_transport_error(err, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Status {
                status,
                url: url.to_string(),
            });
        }

        response
            .text()
            .await
            .map_err(|err| map_transport_error(err, timeout))
    };

    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| RefreshError::Timeout(timeout))?
}

fn map_transport_error(err: reqwest::Error, timeout: Duration) -> RefreshError {
    if err.is_timeout() {
        RefreshError::Timeout(timeout)
    } else {
        RefreshError::Transport(err)
    }
}
