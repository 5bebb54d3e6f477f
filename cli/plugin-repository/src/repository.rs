//! A single remote plugin repository and its published catalog.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{error, info};

use crate::client::{build_http_client, get_plugin_master, HttpTransport};
use crate::config::{RepositoryClientConfig, RepositoryKind};
use crate::error::{ClientBuildError, RefreshError};
use crate::identity::DeviceIdentity;
use crate::manifest::{cmp_by_name, validate_manifest, RawPluginManifest, RemotePluginManifest};
use crate::LOG_TARGET;

/// Identity of a repository, shared by every manifest it publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySource {
    pub url: String,
    pub kind: RepositoryKind,
}

impl RepositorySource {
    pub fn is_third_party(&self) -> bool {
        self.kind == RepositoryKind::ThirdParty
    }
}

/// Progress of the most recent refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RepositoryState {
    /// No refresh was attempted yet.
    #[default]
    NotStarted,
    InProgress,
    Success,
    Fail,
}

/// State and catalog of a repository, published together.
///
/// The catalog is empty unless `state` is [RepositoryState::Success].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSnapshot {
    pub state: RepositoryState,
    /// Validated manifests, ordered by name.
    pub plugin_master: Vec<RemotePluginManifest>,
}

impl CatalogSnapshot {
    fn empty(state: RepositoryState) -> Self {
        Self {
            state,
            plugin_master: Vec::new(),
        }
    }

    /// Manifests that should be offered to the user.
    ///
    /// Skips manifests hidden by the repository and those whose internal name
    /// the user chose to hide.
    pub fn visible<'a>(
        &'a self,
        hidden_internal_names: &'a [String],
    ) -> impl Iterator<Item = &'a RemotePluginManifest> + 'a {
        self.plugin_master.iter().filter(move |manifest| {
            !manifest.is_hide && !hidden_internal_names.contains(&manifest.internal_name)
        })
    }
}

/// A remote plugin list, periodically refreshed by its owner.
///
/// Readers get consistent [CatalogSnapshot]s at any time without waiting for
/// a refresh to finish.
/// Refreshes of the same instance are not serialized:
/// if two run concurrently, whichever finishes last determines the published
/// snapshot.
/// Callers needing stronger guarantees have to serialize refreshes themselves.
#[derive(Debug)]
pub struct PluginRepository {
    source: Arc<RepositorySource>,
    enabled: bool,
    request_timeout: Duration,
    client: reqwest::Client,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
}

impl PluginRepository {
    /// Create a repository with a dedicated HTTP client.
    pub fn new(
        transport: &HttpTransport,
        config: RepositoryClientConfig,
        identity: &dyn DeviceIdentity,
    ) -> Result<Self, ClientBuildError> {
        let client = build_http_client(transport, &config, identity)?;

        Ok(Self {
            source: Arc::new(RepositorySource {
                url: config.url,
                kind: config.kind,
            }),
            enabled: config.enabled,
            request_timeout: config.request_timeout,
            client,
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::default())),
        })
    }

    /// Create the main repository.
    ///
    /// The main repository is always enabled.
    /// Building has no side effects: `url` is used as is,
    /// run [crate::migration::migrate_main_repo_url] on it first.
    pub fn main(
        transport: &HttpTransport,
        url: impl Into<String>,
        identity: &dyn DeviceIdentity,
    ) -> Result<Self, ClientBuildError> {
        let config = RepositoryClientConfig {
            kind: RepositoryKind::Main,
            ..RepositoryClientConfig::new(url, true)
        };
        Self::new(transport, config, identity)
    }

    pub fn url(&self) -> &str {
        &self.source.url
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_third_party(&self) -> bool {
        self.source.is_third_party()
    }

    /// The identity attached to every manifest of this repository.
    pub fn source(&self) -> &Arc<RepositorySource> {
        &self.source
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn state(&self) -> RepositoryState {
        self.snapshot().state
    }

    fn publish(&self, snapshot: CatalogSnapshot) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(snapshot);
    }

    /// Refresh the catalog with the configured request timeout.
    ///
    /// See [Self::refresh_with_timeout].
    pub async fn refresh(&self) -> RepositoryState {
        self.refresh_with_timeout(self.request_timeout).await
    }

    /// Fetch, validate and publish the plugin list.
    ///
    /// The catalog is cleared as soon as the refresh starts,
    /// and stays empty if the refresh fails.
    /// Failures are logged and reported as [RepositoryState::Fail],
    /// use [Self::fetch_catalog] to inspect the cause.
    pub async fn refresh_with_timeout(&self, timeout: Duration) -> RepositoryState {
        self.publish(CatalogSnapshot::empty(RepositoryState::InProgress));

        let url = self.url();
        info!(target: LOG_TARGET, %url, "fetching plugin list");

        match self.fetch_catalog(timeout).await {
            Ok(plugin_master) => {
                info!(
                    target: LOG_TARGET,
                    %url,
                    count = plugin_master.len(),
                    "fetched plugin list"
                );
                self.publish(CatalogSnapshot {
                    state: RepositoryState::Success,
                    plugin_master,
                });
                RepositoryState::Success
            },
            Err(err) => {
                error!(
                    target: LOG_TARGET,
                    %url,
                    error = &err as &(dyn std::error::Error + 'static),
                    "could not fetch plugin list"
                );
                self.publish(CatalogSnapshot::empty(RepositoryState::Fail));
                RepositoryState::Fail
            },
        }
    }

    /// Fetch and validate the plugin list without publishing it.
    ///
    /// Entries are ordered by name, attached to this repository,
    /// and invalid entries are dropped.
    /// Entries of the main repository can't be hidden by the repository.
    pub async fn fetch_catalog(
        &self,
        timeout: Duration,
    ) -> Result<Vec<RemotePluginManifest>, RefreshError> {
        let body = get_plugin_master(&self.client, self.url(), timeout).await?;
        let mut raw_manifests = parse_plugin_master(&body)?;

        raw_manifests.sort_by(cmp_by_name);

        let mut plugin_master = raw_manifests
            .into_iter()
            .filter_map(|raw| validate_manifest(raw, &self.source).ok())
            .collect::<Vec<_>>();

        if !self.is_third_party() {
            for manifest in &mut plugin_master {
                manifest.is_hide = false;
            }
        }

        Ok(plugin_master)
    }
}

fn parse_plugin_master(body: &str) -> Result<Vec<RawPluginManifest>, RefreshError> {
    let parsed: Option<Vec<RawPluginManifest>> =
        serde_json::from_str(body).map_err(RefreshError::Parse)?;
    parsed.ok_or(RefreshError::NullDocument)
}

#[cfg(test)]
mod tests {
    use httpmock::MockServer;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::identity::StaticDeviceId;

    const PATH: &str = "/pluginmaster.json";

    fn third_party(server: &MockServer) -> PluginRepository {
        PluginRepository::new(
            &HttpTransport::default(),
            RepositoryClientConfig::new(server.url(PATH), true),
            &StaticDeviceId("test-device".to_string()),
        )
        .unwrap()
    }

    fn main_repo(server: &MockServer) -> PluginRepository {
        PluginRepository::main(
            &HttpTransport::default(),
            server.url(PATH),
            &StaticDeviceId("test-device".to_string()),
        )
        .unwrap()
    }

    fn entry(internal_name: &str, name: &str) -> serde_json::Value {
        json!({
            "InternalName": internal_name,
            "Name": name,
            "AssemblyVersion": "1.0.0.0",
        })
    }

    fn names(snapshot: &CatalogSnapshot) -> Vec<&str> {
        snapshot
            .plugin_master
            .iter()
            .map(|manifest| manifest.name.as_str())
            .collect()
    }

    #[tokio::test]
    async fn new_repository_has_not_started() {
        let server = MockServer::start_async().await;
        let repo = third_party(&server);
        assert_eq!(repo.state(), RepositoryState::NotStarted);
        assert!(repo.snapshot().plugin_master.is_empty());
        assert!(repo.is_enabled());
        assert!(repo.is_third_party());
        assert!(!main_repo(&server).is_third_party());
    }

    #[tokio::test]
    async fn drops_entry_with_blank_internal_name() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.path(PATH);
            then.status(200).body(
                r#"[{"InternalName":"","Name":"X","AssemblyVersion":"1.0"},
                    {"InternalName":"b","Name":"B","AssemblyVersion":"1.0"}]"#,
            );
        });

        let repo = third_party(&server);
        assert_eq!(repo.refresh().await, RepositoryState::Success);
        mock.assert();

        let snapshot = repo.snapshot();
        assert_eq!(snapshot.state, RepositoryState::Success);
        assert_eq!(snapshot.plugin_master.len(), 1);
        assert_eq!(snapshot.plugin_master[0].internal_name, "b");
        assert_eq!(snapshot.plugin_master[0].name, "B");
        assert_eq!(
            snapshot.plugin_master[0].assembly_version.to_string(),
            "1.0"
        );
    }

    #[tokio::test]
    async fn sorts_by_ordinal_name() {
        let server = MockServer::start_async().await;
        server.mock(|_, then| {
            then.status(200).json_body(json!([
                entry("zeta", "Zeta"),
                entry("alpha", "alpha"),
                entry("beta", "Beta"),
            ]));
        });

        let repo = third_party(&server);
        repo.refresh().await;
        assert_eq!(names(&repo.snapshot()), vec!["Beta", "Zeta", "alpha"]);
    }

    #[tokio::test]
    async fn drops_incomplete_entries() {
        let server = MockServer::start_async().await;
        server.mock(|_, then| {
            then.status(200).json_body(json!([
                {"Name": "No Internal Name", "AssemblyVersion": "1.0"},
                {"InternalName": "noname", "AssemblyVersion": "1.0"},
                {"InternalName": "noversion", "Name": "No Version"},
                {"InternalName": "blank", "Name": "  ", "AssemblyVersion": "1.0"},
                entry("ok", "Ok"),
            ]));
        });

        let repo = third_party(&server);
        assert_eq!(repo.refresh().await, RepositoryState::Success);
        assert_eq!(names(&repo.snapshot()), vec!["Ok"]);
    }

    #[tokio::test]
    async fn manifests_reference_their_repository() {
        let server = MockServer::start_async().await;
        server.mock(|_, then| {
            then.status(200)
                .json_body(json!([entry("a", "A"), entry("b", "B")]));
        });

        let repo = third_party(&server);
        repo.refresh().await;

        let snapshot = repo.snapshot();
        assert_eq!(snapshot.plugin_master.len(), 2);
        for manifest in &snapshot.plugin_master {
            assert!(Arc::ptr_eq(&manifest.source_repo, repo.source()));
            assert!(manifest.is_third_party());
        }
    }

    #[tokio::test]
    async fn main_repository_entries_cannot_hide() {
        let server = MockServer::start_async().await;
        server.mock(|_, then| {
            then.status(200).json_body(json!([
                {"InternalName": "a", "Name": "A", "AssemblyVersion": "1.0", "IsHide": true},
                {"InternalName": "b", "Name": "B", "AssemblyVersion": "1.0", "IsHide": false},
            ]));
        });

        let main = main_repo(&server);
        main.refresh().await;
        let hidden = main
            .snapshot()
            .plugin_master
            .iter()
            .map(|manifest| manifest.is_hide)
            .collect::<Vec<_>>();
        assert_eq!(hidden, vec![false, false]);

        let third_party = third_party(&server);
        third_party.refresh().await;
        let hidden = third_party
            .snapshot()
            .plugin_master
            .iter()
            .map(|manifest| manifest.is_hide)
            .collect::<Vec<_>>();
        assert_eq!(hidden, vec![true, false]);
    }

    #[tokio::test]
    async fn server_error_fails_with_empty_catalog() {
        let server = MockServer::start_async().await;
        server.mock(|_, then| {
            then.status(500).body("oops");
        });

        let repo = third_party(&server);
        assert_eq!(repo.refresh().await, RepositoryState::Fail);
        assert_eq!(*repo.snapshot(), CatalogSnapshot::empty(RepositoryState::Fail));

        let err = repo
            .fetch_catalog(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::Status { .. }));
    }

    #[tokio::test]
    async fn invalid_json_fails_with_empty_catalog() {
        let server = MockServer::start_async().await;
        server.mock(|_, then| {
            then.status(200).body("<html>not json</html>");
        });

        let repo = third_party(&server);
        assert_eq!(repo.refresh().await, RepositoryState::Fail);
        assert!(repo.snapshot().plugin_master.is_empty());

        let err = repo
            .fetch_catalog(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::Parse(_)));
    }

    #[tokio::test]
    async fn empty_and_null_documents_fail() {
        for (body, null) in [("", false), ("null", true)] {
            let server = MockServer::start_async().await;
            server.mock(|_, then| {
                then.status(200).body(body);
            });

            let repo = third_party(&server);
            assert_eq!(repo.refresh().await, RepositoryState::Fail);

            let err = repo
                .fetch_catalog(Duration::from_secs(5))
                .await
                .unwrap_err();
            assert_eq!(matches!(err, RefreshError::NullDocument), null);
        }
    }

    #[tokio::test]
    async fn timeout_fails_with_empty_catalog() {
        let server = MockServer::start_async().await;
        server.mock(|_, then| {
            then.status(200)
                .json_body(json!([entry("a", "A")]))
                .delay(Duration::from_secs(2));
        });

        let repo = third_party(&server);
        let state = repo.refresh_with_timeout(Duration::from_millis(100)).await;
        assert_eq!(state, RepositoryState::Fail);
        assert!(repo.snapshot().plugin_master.is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_discards_previous_catalog() {
        let server = MockServer::start_async().await;
        let mut ok = server.mock(|_, then| {
            then.status(200).json_body(json!([entry("a", "A")]));
        });

        let repo = third_party(&server);
        assert_eq!(repo.refresh().await, RepositoryState::Success);
        assert_eq!(names(&repo.snapshot()), vec!["A"]);

        ok.delete();
        server.mock(|_, then| {
            then.status(502);
        });

        assert_eq!(repo.refresh().await, RepositoryState::Fail);
        assert!(repo.snapshot().plugin_master.is_empty());
    }

    #[tokio::test]
    async fn repeated_refresh_is_stable() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|_, then| {
            then.status(200).json_body(json!([
                entry("b", "B"),
                entry("a", "A"),
                {"InternalName": "c", "Name": "C", "AssemblyVersion": "1.0", "TestingAssemblyVersion": "2.0"},
            ]));
        });

        let repo = third_party(&server);
        repo.refresh().await;
        let first = repo.snapshot();
        repo.refresh().await;
        let second = repo.snapshot();

        mock.assert_hits(2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_testing_api_level_keeps_entry() {
        let server = MockServer::start_async().await;
        server.mock(|_, then| {
            then.status(200).json_body(json!([{
                "InternalName": "a",
                "Name": "A",
                "AssemblyVersion": "1.0.0.0",
                "TestingAssemblyVersion": "1.1.0.0",
            }]));
        });

        let repo = third_party(&server);
        assert_eq!(repo.refresh().await, RepositoryState::Success);

        let snapshot = repo.snapshot();
        assert_eq!(names(&snapshot), vec!["A"]);
        assert!(snapshot.plugin_master[0].is_missing_testing_api_level());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn catalog_is_cleared_while_in_progress() {
        let server = MockServer::start_async().await;
        let mut ok = server.mock(|_, then| {
            then.status(200).json_body(json!([entry("a", "A")]));
        });

        let repo = Arc::new(third_party(&server));
        repo.refresh().await;
        assert_eq!(names(&repo.snapshot()), vec!["A"]);

        ok.delete();
        server.mock(|_, then| {
            then.status(200)
                .json_body(json!([entry("a", "A")]))
                .delay(Duration::from_secs(2));
        });

        let refresh = tokio::spawn({
            let repo = Arc::clone(&repo);
            async move { repo.refresh().await }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            *repo.snapshot(),
            CatalogSnapshot::empty(RepositoryState::InProgress)
        );

        assert_eq!(refresh.await.unwrap(), RepositoryState::Success);
        assert_eq!(names(&repo.snapshot()), vec!["A"]);
    }

    #[tokio::test]
    async fn visible_skips_hidden_entries() {
        let server = MockServer::start_async().await;
        server.mock(|_, then| {
            then.status(200).json_body(json!([
                entry("a", "A"),
                {"InternalName": "b", "Name": "B", "AssemblyVersion": "1.0", "IsHide": true},
                entry("c", "C"),
            ]));
        });

        let repo = third_party(&server);
        repo.refresh().await;

        let snapshot = repo.snapshot();
        let user_hidden = vec!["c".to_string()];
        let visible = snapshot
            .visible(&user_hidden)
            .map(|manifest| manifest.internal_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(visible, vec!["a"]);
        assert_eq!(snapshot.plugin_master.len(), 3);
    }
}
