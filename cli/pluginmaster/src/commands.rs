use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use bpaf::Bpaf;
use futures::future::join_all;
use indoc::indoc;
use plugin_repository::migration::{migrate_main_repo_url, Migration};
use plugin_repository::{
    CatalogSnapshot,
    HttpTransport,
    PersistedDeviceId,
    PluginRepository,
    RemotePluginManifest,
    RepositoryClientConfig,
    RepositoryState,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, UserConfigStore};

static PLUGINMASTER_DESCRIPTION: &str = indoc! {"
    Fetch and validate plugin repositories.

    Refreshes the main repository and all configured third-party repositories
    and lists the plugins they offer."
};

fn vec_len<T>(x: Vec<T>) -> usize {
    Vec::len(&x)
}

#[derive(Bpaf, Clone, Copy, Debug)]
pub enum Verbosity {
    Verbose(
        /// Increase logging verbosity
        ///
        /// Invoke multiple times for increasing detail.
        #[bpaf(short('v'), long("verbose"), req_flag(()), many, map(vec_len))]
        usize,
    ),

    /// Silence logs except for errors
    #[bpaf(short, long)]
    Quiet,
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Verbose(0)
    }
}

#[derive(Bpaf, Debug)]
#[bpaf(options, version, descr(PLUGINMASTER_DESCRIPTION))]
pub struct PluginmasterArgs {
    #[bpaf(external, fallback(Default::default()))]
    pub verbosity: Verbosity,

    /// Print the catalogs as JSON
    #[bpaf(long)]
    pub json: bool,

    /// Include plugins hidden by their repository or by the user
    #[bpaf(long)]
    pub show_hidden: bool,

    /// Abort each repository request after this many seconds
    #[bpaf(long, argument("SECONDS"))]
    pub timeout: Option<u64>,
}

/// Outcome of refreshing one repository, as reported to the user
#[derive(Debug, Serialize)]
struct RepositoryReport<'a> {
    url: &'a str,
    third_party: bool,
    enabled: bool,
    state: &'static str,
    plugins: Vec<PluginReport<'a>>,
}

#[derive(Debug, Serialize)]
struct PluginReport<'a> {
    internal_name: &'a str,
    name: &'a str,
    version: String,
    testing: bool,
}

impl<'a> PluginReport<'a> {
    fn new(manifest: &'a RemotePluginManifest, testing_opt_in: bool) -> Self {
        let version = manifest.effective_version(testing_opt_in);
        Self {
            internal_name: &manifest.internal_name,
            name: &manifest.name,
            version: version.to_string(),
            testing: version != manifest.assembly_version,
        }
    }
}

fn state_name(state: RepositoryState) -> &'static str {
    match state {
        RepositoryState::NotStarted => "disabled",
        RepositoryState::InProgress => "in progress",
        RepositoryState::Success => "ok",
        RepositoryState::Fail => "failed",
    }
}

impl PluginmasterArgs {
    pub async fn handle(self, mut config: Config) -> Result<()> {
        let mut store = UserConfigStore::new(&config);
        match migrate_main_repo_url(&mut config.main_repo_url, &mut store) {
            Migration::Unchanged => {},
            Migration::Migrated { persisted: Ok(()) } => {
                info!(url = %config.main_repo_url, "main repository was migrated");
            },
            Migration::Migrated {
                persisted: Err(err),
            } => {
                warn!(
                    url = %config.main_repo_url,
                    error = &err as &(dyn std::error::Error + 'static),
                    "main repository was migrated but could not be saved"
                );
            },
        }

        let identity = PersistedDeviceId::load_or_create(&config.data_dir)
            .await
            .context("Could not initialize device id")?;
        let transport = HttpTransport::default();

        let mut repositories = vec![
            PluginRepository::main(&transport, config.main_repo_url.clone(), &identity)
                .context("Could not create main repository")?,
        ];
        for settings in &config.third_repo_list {
            let repository = PluginRepository::new(
                &transport,
                RepositoryClientConfig::new(settings.url.clone(), settings.is_enabled),
                &identity,
            )
            .with_context(|| format!("Could not create repository '{}'", settings.url))?;
            repositories.push(repository);
        }

        let timeout = self.timeout.map(Duration::from_secs);
        let refreshes = repositories
            .iter()
            .filter(|repository| repository.is_enabled())
            .map(|repository| async move {
                match timeout {
                    Some(timeout) => repository.refresh_with_timeout(timeout).await,
                    None => repository.refresh().await,
                }
            });
        let states = join_all(refreshes).await;
        debug!(?states, "refreshed repositories");

        let snapshots = repositories
            .iter()
            .map(|repository| repository.snapshot())
            .collect::<Vec<_>>();

        let reports = repositories
            .iter()
            .zip(&snapshots)
            .map(|(repository, snapshot)| self.report(repository, snapshot, &config))
            .collect::<Vec<_>>();

        let mut stdout = std::io::stdout().lock();
        if self.json {
            serde_json::to_writer_pretty(&mut stdout, &reports)?;
            writeln!(stdout)?;
        } else {
            for report in &reports {
                print_report(&mut stdout, report)?;
            }
        }

        for report in &reports {
            if report.enabled && report.state != state_name(RepositoryState::Success) {
                warn!(url = report.url, "repository could not be refreshed, try again later");
            }
        }

        Ok(())
    }

    fn report<'a>(
        &self,
        repository: &'a PluginRepository,
        snapshot: &'a CatalogSnapshot,
        config: &'a Config,
    ) -> RepositoryReport<'a> {
        let plugins = if self.show_hidden {
            snapshot.plugin_master.iter().collect::<Vec<_>>()
        } else {
            snapshot
                .visible(&config.hidden_plugin_internal_names)
                .collect::<Vec<_>>()
        };

        RepositoryReport {
            url: repository.url(),
            third_party: repository.is_third_party(),
            enabled: repository.is_enabled(),
            state: state_name(snapshot.state),
            plugins: plugins
                .into_iter()
                .map(|manifest| PluginReport::new(manifest, config.do_plugin_test))
                .collect(),
        }
    }
}

fn print_report(out: &mut impl Write, report: &RepositoryReport<'_>) -> Result<()> {
    let kind = if report.third_party { "third-party" } else { "main" };
    writeln!(out, "{} ({kind}, {})", report.url, report.state)?;
    for plugin in &report.plugins {
        let testing = if plugin.testing { " [testing]" } else { "" };
        writeln!(
            out,
            "  {} ({}) {}{testing}",
            plugin.name, plugin.internal_name, plugin.version
        )?;
    }
    Ok(())
}
