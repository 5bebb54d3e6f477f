use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{Context, Result};
use config::{Config as HierarchicalConfig, Environment};
use plugin_repository::migration::{ConfigStore, MAIN_REPO_URL};
use serde::{Deserialize, Serialize};
use tempfile::PersistError;
use thiserror::Error;
use toml_edit::{DocumentMut, Item, Key, Table};
use tracing::{debug, trace};

/// Name of pluginmaster managed directories (config, data)
pub const PLUGINMASTER_DIR_NAME: &str = "pluginmaster";
pub const PLUGINMASTER_CONFIG_DIR_VAR: &str = "PLUGINMASTER_CONFIG_DIR";
pub const PLUGINMASTER_CONFIG_FILE: &str = "pluginmaster.toml";
const ENV_PREFIX: &str = "PLUGINMASTER";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// URL of the main plugin repository
    pub main_repo_url: String,

    /// Additional repositories maintained by third parties
    #[serde(default)]
    pub third_repo_list: Vec<ThirdRepoSettings>,

    /// Offer testing builds of plugins where available
    #[serde(default)]
    pub do_plugin_test: bool,

    /// Internal names of plugins the user hid from the catalog
    #[serde(default)]
    pub hidden_plugin_internal_names: Vec<String>,

    /// Directory where pluginmaster stores persistent data (default:
    /// `$XDG_DATA_HOME/pluginmaster`)
    pub data_dir: PathBuf,

    /// Directory where pluginmaster loads its configuration file from (default:
    /// `$XDG_CONFIG_HOME/pluginmaster`)
    pub config_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            main_repo_url: MAIN_REPO_URL.to_string(),
            third_repo_list: Vec::new(),
            do_plugin_test: false,
            hidden_plugin_internal_names: Vec::new(),
            data_dir: PathBuf::new(),
            config_dir: PathBuf::new(),
        }
    }
}

/// A user configured third-party repository
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ThirdRepoSettings {
    pub url: String,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Error returned when updating the user configuration
#[derive(Debug, Error)]
pub enum ReadWriteError {
    #[error("Invalid config key: '{}'", display_key(.0))]
    InvalidKey(Vec<Key>),
    #[error("Config key '{}' not in user configuration", display_key(.0))]
    NotAUserValue(Vec<Key>),
    #[error(transparent)]
    TomlEdit(#[from] toml_edit::TomlError),
    #[error(transparent)]
    TomlSer(#[from] toml_edit::ser::Error),
    #[error(transparent)]
    TomlDe(#[from] toml_edit::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Could not read config file: {0}")]
    ReadConfig(std::io::Error),
    #[error("Could not write config file: {0}")]
    WriteConfig(std::io::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

fn display_key(path: &[Key]) -> String {
    path.iter()
        .map(|key| key.display_repr().into_owned())
        .collect::<Vec<_>>()
        .join(".")
}

impl Config {
    /// Creates a [Config] from defaults, config files and the environment
    ///
    /// Later sources take precedence:
    /// `/etc/pluginmaster.toml`, the user config file,
    /// then `PLUGINMASTER_*` variables.
    pub fn parse() -> Result<Config> {
        let data_dir = dirs::data_dir()
            .context("Could not determine data directory")?
            .join(PLUGINMASTER_DIR_NAME);

        let config_dir: PathBuf = match env::var(PLUGINMASTER_CONFIG_DIR_VAR) {
            Ok(v) => {
                debug!("`${PLUGINMASTER_CONFIG_DIR_VAR}` set: {v}");
                v.into()
            },
            Err(_) => {
                let config_dir = dirs::config_dir()
                    .context("Could not determine config directory")?
                    .join(PLUGINMASTER_DIR_NAME);
                debug!("`${PLUGINMASTER_CONFIG_DIR_VAR}` not set, using {config_dir:?}");
                config_dir
            },
        };
        fs::create_dir_all(&config_dir)
            .context(format!("Could not create config directory: {config_dir:?}"))?;

        let builder = HierarchicalConfig::builder()
            .set_default("main_repo_url", MAIN_REPO_URL)?
            .set_default("data_dir", data_dir.to_string_lossy().into_owned())?
            // The config file cannot change the directory it is read from
            .set_override("config_dir", config_dir.to_string_lossy().into_owned())?
            .add_source(
                config::File::from(PathBuf::from("/etc").join(PLUGINMASTER_CONFIG_FILE))
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::File::from(config_dir.join(PLUGINMASTER_CONFIG_FILE))
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: Config = builder
            .build()?
            .try_deserialize()
            .context("Could not parse config")?;
        Ok(config)
    }

    /// Path of the user config file
    pub fn user_config_file(&self) -> PathBuf {
        self.config_dir.join(PLUGINMASTER_CONFIG_FILE)
    }

    /// Append, update or remove a key in the toml representation of a partial config
    ///
    /// The result is validated against [Config], comments and formatting
    /// of the existing document are preserved.
    pub fn write_to<V: Serialize>(
        config_file: Option<String>,
        path: &[Key],
        value: Option<V>,
    ) -> Result<String, ReadWriteError> {
        let Some((key, parents)) = path.split_last() else {
            return Err(ReadWriteError::InvalidKey(path.to_vec()));
        };

        let mut validation_document = toml_edit::ser::to_document(&Config::default())?;

        let mut document = match config_file {
            Some(content) => content.parse::<DocumentMut>()?,
            None => DocumentMut::new(),
        };

        let (mut handle, mut validation) =
            (document.as_table_mut(), validation_document.as_table_mut());

        for segment in parents {
            trace!("stepping into path segment {}", segment);

            for table in [&mut *handle, &mut *validation] {
                if !table.contains_table(segment) {
                    table.insert(segment, Item::Table(Table::new()));
                }
            }

            handle = handle
                .get_mut(segment)
                .and_then(Item::as_table_mut)
                .ok_or_else(|| ReadWriteError::InvalidKey(path.to_vec()))?;
            validation = validation
                .get_mut(segment)
                .and_then(Item::as_table_mut)
                .ok_or_else(|| ReadWriteError::InvalidKey(path.to_vec()))?;
        }

        trace!("write value for key '{}'", key.display_repr());

        match value {
            None => {
                handle
                    .remove(key.get())
                    .ok_or_else(|| ReadWriteError::NotAUserValue(path.to_vec()))?;
            },
            Some(ref value) => {
                if !validation.contains_key(key.get()) {
                    return Err(ReadWriteError::InvalidKey(path.to_vec()));
                }
                let value = value.serialize(toml_edit::ser::ValueSerializer::default())?;
                validation.insert(key.get(), Item::Value(value.clone()));
                handle.insert(key.get(), Item::Value(value));

                trace!("try parsing the new virtual config (validation)");
                let _: Config = toml_edit::de::from_document(validation_document)?;
            },
        }

        Ok(document.to_string())
    }

    /// Update a key of the config file at `config_file_path`
    ///
    /// The file is replaced atomically through a tempfile in `temp_dir`.
    pub fn write_to_in<V: Serialize>(
        config_file_path: impl AsRef<Path>,
        temp_dir: impl AsRef<Path>,
        query: &[Key],
        value: Option<V>,
    ) -> Result<(), ReadWriteError> {
        let config_file_contents = match fs::read_to_string(&config_file_path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "No existing user config file found in {:?}, creating it now",
                    config_file_path.as_ref()
                );
                Ok(None)
            },
            Err(e) => Err(e),
        }
        .map_err(ReadWriteError::ReadConfig)?;

        let config_file_contents = Self::write_to(config_file_contents, query, value)?;

        let tempfile = tempfile::Builder::new().tempfile_in(temp_dir)?;
        fs::write(&tempfile, config_file_contents).map_err(ReadWriteError::WriteConfig)?;
        tempfile.persist(config_file_path)?;

        Ok(())
    }
}

/// Persists migrated settings to the user config file
#[derive(Debug, Clone)]
pub struct UserConfigStore {
    config_file: PathBuf,
    config_dir: PathBuf,
}

impl UserConfigStore {
    pub fn new(config: &Config) -> Self {
        Self {
            config_file: config.user_config_file(),
            config_dir: config.config_dir.clone(),
        }
    }
}

impl ConfigStore for UserConfigStore {
    type Error = ReadWriteError;

    fn save_main_repo_url(&mut self, url: &str) -> Result<(), Self::Error> {
        Config::write_to_in(
            &self.config_file,
            &self.config_dir,
            &Key::parse("main_repo_url")?,
            Some(url),
        )
    }
}
