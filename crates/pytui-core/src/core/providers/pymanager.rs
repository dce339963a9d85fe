//! Platform-native runtime provider, backed by the python.org install
//! manager (`pymanager`). Communicates via `list ... --format=json`.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use pep440_rs::Version;
use serde::Deserialize;
use which::which;

use super::{
    filter_downloads, host_arch, normalize_arch, ProviderKind, RuntimeListing, RuntimeProvider,
    Variant,
};
use crate::core::errors::Error;
use crate::core::process;

pub struct PyManagerProvider {
    executable: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ListDocument {
    #[serde(default)]
    versions: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    id: String,
    #[serde(rename = "sort-version")]
    sort_version: String,
    tag: String,
    company: String,
    #[serde(default)]
    executable: Option<String>,
}

impl PyManagerProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            executable: which("pymanager").ok(),
        }
    }

    fn run_list(&self, mode: &str) -> Result<ListDocument> {
        let Some(exe) = self.executable.as_deref() else {
            return Err(Error::ProviderUnavailable {
                organisation: ProviderKind::PyManager.organisation(),
            }
            .into());
        };
        let exe = exe.to_string_lossy().to_string();
        let args = vec![
            "list".to_string(),
            mode.to_string(),
            "--format=json".to_string(),
        ];
        let cwd = std::env::current_dir().context("working directory unavailable")?;
        let output = process::run_checked(&exe, &args, &[], &cwd)?;
        serde_json::from_str(&output.stdout).context("invalid pymanager list payload")
    }
}

impl Default for PyManagerProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeProvider for PyManagerProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::PyManager
    }

    fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    fn runtime_dir(&self) -> Option<&Path> {
        // pymanager does not report its storage folder; matching falls back
        // to the per-listing executable directories.
        None
    }

    fn fetch_installed(&self) -> Result<Vec<RuntimeListing>> {
        let document = self.run_list("--only-managed")?;
        Ok(document
            .versions
            .iter()
            .filter_map(|entry| listing_from_entry(entry).ok())
            .filter(RuntimeListing::installed)
            .collect())
    }

    /// `all_versions` has no meaning for this backend; the online index is
    /// always complete.
    fn fetch_downloads(&self, _all_versions: bool) -> Result<Vec<RuntimeListing>> {
        let installed_keys: HashSet<String> = self
            .fetch_installed()?
            .into_iter()
            .map(|listing| listing.key)
            .collect();

        let document = self.run_list("--online")?;
        let candidates = document
            .versions
            .iter()
            // PythonEmbed and PythonTest carry embedded/test builds.
            .filter(|entry| entry.company == "PythonCore")
            .filter_map(|entry| listing_from_entry(entry).ok())
            .collect();
        Ok(filter_downloads(candidates, &installed_keys, &host_arch()))
    }

    fn install(&self, listing: &RuntimeListing) -> Result<Option<String>> {
        if listing.installed() {
            return Ok(None);
        }
        let Some(exe) = self.executable.as_deref() else {
            return Err(Error::ProviderUnavailable {
                organisation: self.organisation(),
            }
            .into());
        };
        let exe = exe.to_string_lossy().to_string();
        let tag = tag_from_key(&listing.key);
        let args = vec!["install".to_string(), tag, "-y".to_string()];
        let cwd = std::env::current_dir().context("working directory unavailable")?;
        process::run_checked(&exe, &args, &[], &cwd)?;
        Ok(Some(format!("{exe} {}", args.join(" "))))
    }

    fn uninstall(&self, listing: &RuntimeListing) -> Result<Option<String>> {
        let still_present = listing.path.as_deref().is_some_and(Path::exists);
        if !still_present {
            return Ok(None);
        }
        let Some(exe) = self.executable.as_deref() else {
            return Err(Error::ProviderUnavailable {
                organisation: self.organisation(),
            }
            .into());
        };
        let exe = exe.to_string_lossy().to_string();
        let tag = tag_from_key(&listing.key);
        let args = vec!["uninstall".to_string(), tag, "-y".to_string()];
        let cwd = std::env::current_dir().context("working directory unavailable")?;
        process::run_checked(&exe, &args, &[], &cwd)?;
        Ok(Some(format!("{exe} {}", args.join(" "))))
    }
}

fn listing_from_entry(entry: &ListEntry) -> Result<RuntimeListing> {
    let version = Version::from_str(&entry.sort_version)
        .map_err(|err| anyhow::anyhow!("bad version {}: {err}", entry.sort_version))?;

    // Paths reported for uninstalled or stale entries may not exist.
    let path = entry
        .executable
        .as_deref()
        .map(PathBuf::from)
        .filter(|path| path.exists());

    let variant = if is_freethreaded_tag(&entry.tag) {
        Variant::Freethreaded
    } else {
        Variant::Default
    };

    let arch = if entry.id.contains("-32") {
        "x86".to_string()
    } else if entry.id.contains("-arm64") {
        normalize_arch("arm64")
    } else {
        "x86_64".to_string()
    };

    Ok(RuntimeListing {
        provider: ProviderKind::PyManager,
        key: entry.id.clone(),
        version,
        implementation: "cpython".to_string(),
        variant,
        arch,
        path,
    })
}

/// The install/uninstall argument is the version tag. The id is
/// `<company>-<tag>` for managed entries, plain `<tag>` online.
fn tag_from_key(key: &str) -> String {
    key.strip_prefix("pythoncore-")
        .unwrap_or(key)
        .to_string()
}

/// A tag like `3.13t` or `3.14t-arm64` marks a free-threaded build.
fn is_freethreaded_tag(tag: &str) -> bool {
    let rest = tag.trim_start_matches(|c: char| c.is_ascii_digit());
    if rest.len() == tag.len() {
        return false;
    }
    let Some(minor) = rest.strip_prefix('.') else {
        return false;
    };
    let rest = minor.trim_start_matches(|c: char| c.is_ascii_digit());
    rest.len() != minor.len() && rest.starts_with('t')
}
