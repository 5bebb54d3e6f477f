//! Plugin manifest types and validation.
//!
//! A plugin list is a JSON array of [RawPluginManifest]s.
//! Entries are validated into [RemotePluginManifest]s before a repository
//! publishes them; see [validate_manifest].

use std::cmp::Ordering;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::{error, warn};

use crate::error::InvalidManifest;
use crate::repository::RepositorySource;
use crate::LOG_TARGET;

// ---------------------------------------------------------------------------
// Assembly versions
// ---------------------------------------------------------------------------

/// A `major.minor[.build[.revision]]` assembly version.
///
/// Components that are not present sort before any present value,
/// so `1.0 < 1.0.0 < 1.0.0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssemblyVersion {
    pub major: u32,
    pub minor: u32,
    pub build: Option<u32>,
    pub revision: Option<u32>,
}

impl AssemblyVersion {
    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build: Some(build),
            revision: Some(revision),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid assembly version '{0}'")]
pub struct ParseVersionError(String);

impl FromStr for AssemblyVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseVersionError(s.to_string());

        let components = s
            .trim()
            .split('.')
            .map(|part| part.trim().parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        match components.as_slice() {
            [major, minor] => Ok(Self {
                major: *major,
                minor: *minor,
                build: None,
                revision: None,
            }),
            [major, minor, build] => Ok(Self {
                major: *major,
                minor: *minor,
                build: Some(*build),
                revision: None,
            }),
            [major, minor, build, revision] => Ok(Self::new(*major, *minor, *build, *revision)),
            _ => Err(invalid()),
        }
    }
}

impl Display for AssemblyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{build}")?;
            if let Some(revision) = self.revision {
                write!(f, ".{revision}")?;
            }
        }
        Ok(())
    }
}

impl Serialize for AssemblyVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Versions are usually serialized as strings,
/// but some generators emit the component object instead.
/// Undefined components are `-1` in that form.
#[derive(Deserialize)]
#[serde(untagged)]
enum VersionRepr {
    Text(String),
    #[serde(rename_all = "PascalCase")]
    Components {
        major: u32,
        minor: u32,
        #[serde(default = "undefined_component")]
        build: i64,
        #[serde(default = "undefined_component")]
        revision: i64,
    },
}

fn undefined_component() -> i64 {
    -1
}

impl<'de> Deserialize<'de> for AssemblyVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match VersionRepr::deserialize(deserializer)? {
            VersionRepr::Text(text) => text.parse().map_err(serde::de::Error::custom),
            VersionRepr::Components {
                major,
                minor,
                build,
                revision,
            } => {
                let build = u32::try_from(build).ok();
                // A revision without a build can't be expressed in text form
                let revision = build.and(u32::try_from(revision).ok());
                Ok(Self {
                    major,
                    minor,
                    build,
                    revision,
                })
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Manifests
// ---------------------------------------------------------------------------

/// A catalog entry as it appears in the plugin list, before validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawPluginManifest {
    pub internal_name: Option<String>,
    pub name: Option<String>,
    pub assembly_version: Option<AssemblyVersion>,
    pub testing_assembly_version: Option<AssemblyVersion>,
    pub testing_dalamud_api_level: Option<i32>,
    pub dalamud_api_level: Option<i32>,
    pub is_hide: bool,
    pub is_testing_exclusive: bool,
    pub author: Option<String>,
    pub description: Option<String>,
    pub punchline: Option<String>,
    pub repo_url: Option<String>,
    pub download_link_install: Option<String>,
    pub download_link_testing: Option<String>,
    pub tags: Option<Vec<String>>,
    pub download_count: u64,
    pub last_update: i64,
}

/// A validated plugin descriptor published by a [crate::PluginRepository].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemotePluginManifest {
    pub internal_name: String,
    pub name: String,
    pub assembly_version: AssemblyVersion,
    pub testing_assembly_version: Option<AssemblyVersion>,
    pub testing_dalamud_api_level: Option<i32>,
    pub dalamud_api_level: Option<i32>,
    pub is_hide: bool,
    pub is_testing_exclusive: bool,
    pub author: Option<String>,
    pub description: Option<String>,
    pub punchline: Option<String>,
    pub repo_url: Option<String>,
    pub download_link_install: Option<String>,
    pub download_link_testing: Option<String>,
    pub tags: Vec<String>,
    pub download_count: u64,
    pub last_update: i64,

    /// The repository this manifest was published by.
    #[serde(skip)]
    pub source_repo: Arc<RepositorySource>,
}

impl RemotePluginManifest {
    /// Whether the manifest was published by a third-party repository.
    pub fn is_third_party(&self) -> bool {
        self.source_repo.is_third_party()
    }

    /// Whether a testing build newer than the release build is available.
    pub fn has_newer_testing_version(&self) -> bool {
        self.testing_assembly_version
            .is_some_and(|testing| testing > self.assembly_version)
    }

    /// A newer testing build exists but doesn't declare the API level it targets.
    ///
    /// Installers fall back to the release build in that case.
    pub fn is_missing_testing_api_level(&self) -> bool {
        self.has_newer_testing_version() && self.testing_dalamud_api_level.is_none()
    }

    /// The version an installer should pick.
    ///
    /// The testing version is only used if the user opted into testing builds
    /// and it is newer than the release version.
    pub fn effective_version(&self, testing_opt_in: bool) -> AssemblyVersion {
        match self.testing_assembly_version {
            Some(testing) if testing_opt_in && testing > self.assembly_version => testing,
            _ => self.assembly_version,
        }
    }
}

/// Validate a raw entry and attach it to `source`.
///
/// Rules are checked in order and the first failing rule rejects the entry:
/// a non-blank internal name, a non-blank name, an assembly version.
/// A newer testing version without a testing API level is only warned about.
///
/// Every rejection is logged with the repository URL.
pub fn validate_manifest(
    raw: RawPluginManifest,
    source: &Arc<RepositorySource>,
) -> Result<RemotePluginManifest, InvalidManifest> {
    let url = source.url.as_str();

    let internal_name = match raw.internal_name {
        Some(internal_name) if !internal_name.trim().is_empty() => internal_name,
        _ => {
            error!(target: LOG_TARGET, %url, "plugin in repository is missing a valid internal name");
            return Err(InvalidManifest::MissingInternalName);
        },
    };

    let name = match raw.name {
        Some(name) if !name.trim().is_empty() => name,
        _ => {
            error!(target: LOG_TARGET, %url, %internal_name, "plugin in repository is missing a valid name");
            return Err(InvalidManifest::MissingName { internal_name });
        },
    };

    let Some(assembly_version) = raw.assembly_version else {
        error!(
            target: LOG_TARGET,
            %url,
            %internal_name,
            "plugin in repository is missing a valid assembly version"
        );
        return Err(InvalidManifest::MissingAssemblyVersion { internal_name });
    };

    let manifest = RemotePluginManifest {
        internal_name,
        name,
        assembly_version,
        testing_assembly_version: raw.testing_assembly_version,
        testing_dalamud_api_level: raw.testing_dalamud_api_level,
        dalamud_api_level: raw.dalamud_api_level,
        is_hide: raw.is_hide,
        is_testing_exclusive: raw.is_testing_exclusive,
        author: raw.author,
        description: raw.description,
        punchline: raw.punchline,
        repo_url: raw.repo_url,
        download_link_install: raw.download_link_install,
        download_link_testing: raw.download_link_testing,
        tags: raw.tags.unwrap_or_default(),
        download_count: raw.download_count,
        last_update: raw.last_update,
        source_repo: Arc::clone(source),
    };

    if manifest.is_missing_testing_api_level() {
        warn!(
            target: LOG_TARGET,
            %url,
            internal_name = %manifest.internal_name,
            "plugin has a testing version available but no 'TestingDalamudApiLevel'"
        );
    }

    Ok(manifest)
}

/// Ordinal comparison of display names.
///
/// Compares UTF-16 code units, so uppercase sorts before lowercase,
/// characters outside the BMP sort before `U+E000..=U+FFFF`
/// and the result does not depend on the locale.
/// Missing names sort first.
pub(crate) fn cmp_by_name(a: &RawPluginManifest, b: &RawPluginManifest) -> Ordering {
    match (a.name.as_deref(), b.name.as_deref()) {
        (Some(a), Some(b)) => a.encode_utf16().cmp(b.encode_utf16()),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}
