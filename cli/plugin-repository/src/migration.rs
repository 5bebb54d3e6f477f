//! Main repository addresses and the migration away from retired ones.

use tracing::info;

use crate::LOG_TARGET;

/// The default main repository.
pub const MAIN_REPO_URL: &str =
    "https://raw.githubusercontent.com/yanmucorp/PluginDistD17/refs/heads/main/pluginmaster.json";

/// The upstream main repository, selectable as an alternative.
pub const MAIN_REPO_URL_UPSTREAM: &str = "https://kamori.goats.dev/Plugin/PluginMaster";

/// A main repository that has been shut down.
pub const RETIRED_MAIN_REPO_URL: &str = "https://aonyx.ffxiv.wang/Plugin/PluginMaster";

/// Persists a rewritten main repository URL.
pub trait ConfigStore {
    type Error;

    fn save_main_repo_url(&mut self, url: &str) -> Result<(), Self::Error>;
}

/// Whether `url` points at the retired main repository.
///
/// Matches case-insensitively anywhere in the URL,
/// so variants with query strings or different casing are caught as well.
pub fn is_retired_main_repo_url(url: &str) -> bool {
    url.to_lowercase()
        .contains(&RETIRED_MAIN_REPO_URL.to_lowercase())
}

/// Result of [migrate_main_repo_url].
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum Migration<E> {
    /// The URL is not retired and was left alone.
    Unchanged,
    /// The URL was rewritten, `persisted` reports whether saving it worked.
    Migrated { persisted: Result<(), E> },
}

/// Replace a retired main repository URL with [MAIN_REPO_URL].
///
/// Run once before building the main repository.
/// The new URL is always written to `url`, even if `store` can't persist it,
/// so the main repository is never built against the retired address.
pub fn migrate_main_repo_url<S: ConfigStore>(
    url: &mut String,
    store: &mut S,
) -> Migration<S::Error> {
    if !is_retired_main_repo_url(url) {
        return Migration::Unchanged;
    }

    info!(
        target: LOG_TARGET,
        from = %url,
        to = MAIN_REPO_URL,
        "migrating retired main repository"
    );

    *url = MAIN_REPO_URL.to_string();
    Migration::Migrated {
        persisted: store.save_main_repo_url(MAIN_REPO_URL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingStore(Vec<String>);

    impl ConfigStore for RecordingStore {
        type Error = std::convert::Infallible;

        fn save_main_repo_url(&mut self, url: &str) -> Result<(), Self::Error> {
            self.0.push(url.to_string());
            Ok(())
        }
    }

    struct FailingStore;

    impl ConfigStore for FailingStore {
        type Error = &'static str;

        fn save_main_repo_url(&mut self, _url: &str) -> Result<(), Self::Error> {
            Err("read-only")
        }
    }

    #[test]
    fn retired_url_is_migrated_and_saved() {
        let mut store = RecordingStore::default();
        let mut url = "HTTPS://AONYX.FFXIV.WANG/Plugin/PluginMaster?api=11".to_string();

        let migration = migrate_main_repo_url(&mut url, &mut store);

        assert_eq!(migration, Migration::Migrated { persisted: Ok(()) });
        assert_eq!(url, MAIN_REPO_URL);
        assert_eq!(store.0, vec![MAIN_REPO_URL.to_string()]);
    }

    #[test]
    fn current_urls_are_left_alone() {
        for current in [MAIN_REPO_URL, MAIN_REPO_URL_UPSTREAM] {
            let mut store = RecordingStore::default();
            let mut url = current.to_string();

            let migration = migrate_main_repo_url(&mut url, &mut store);

            assert_eq!(migration, Migration::Unchanged);
            assert_eq!(url, current);
            assert!(store.0.is_empty());
        }
    }

    #[test]
    fn url_is_migrated_even_if_saving_fails() {
        let mut url = RETIRED_MAIN_REPO_URL.to_string();
        let migration = migrate_main_repo_url(&mut url, &mut FailingStore);
        assert_eq!(migration, Migration::Migrated {
            persisted: Err("read-only")
        });
        assert_eq!(url, MAIN_REPO_URL);
    }
}
