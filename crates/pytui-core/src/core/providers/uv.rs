//! Third-party-manager provider backed by uv's `python` subcommands.

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

pub struct UvProvider {
    executable: Option<PathBuf>,
    runtime_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct UvEntry {
    key: String,
    version: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    implementation: Option<String>,
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    arch: Option<String>,
}

impl UvProvider {
    #[must_use]
    pub fn new() -> Self {
        let executable = which("uv").ok();
        let runtime_dir = executable.as_deref().and_then(resolve_runtime_dir);
        Self {
            executable,
            runtime_dir,
        }
    }

    fn run_python_list(&self, extra_args: &[&str]) -> Result<Vec<UvEntry>> {
        let Some(exe) = self.executable.as_deref() else {
            return Err(Error::ProviderUnavailable {
                organisation: ProviderKind::Uv.organisation(),
            }
            .into());
        };
        let exe = exe.to_string_lossy().to_string();
        let mut args = vec![
            "python".to_string(),
            "list".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ];
        args.extend(extra_args.iter().map(ToString::to_string));
        let cwd = std::env::current_dir().context("working directory unavailable")?;
        let output = process::run_checked(&exe, &args, &[], &cwd)?;
        serde_json::from_str(&output.stdout).context("invalid uv python list payload")
    }

    fn run_python_action(&self, action: &str, key: &str) -> Result<String> {
        let Some(exe) = self.executable.as_deref() else {
            return Err(Error::ProviderUnavailable {
                organisation: self.organisation(),
            }
            .into());
        };
        let exe = exe.to_string_lossy().to_string();
        let args = vec![
            "python".to_string(),
            action.to_string(),
            key.to_string(),
            "--color".to_string(),
            "never".to_string(),
            "--no-progress".to_string(),
        ];
        let cwd = std::env::current_dir().context("working directory unavailable")?;
        process::run_checked(&exe, &args, &[], &cwd)?;
        Ok(format!("{exe} {}", args.join(" ")))
    }
}

impl Default for UvProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeProvider for UvProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Uv
    }

    fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    fn runtime_dir(&self) -> Option<&Path> {
        self.runtime_dir.as_deref()
    }

    fn fetch_installed(&self) -> Result<Vec<RuntimeListing>> {
        let entries = self.run_python_list(&[
            "--only-installed",
            "--python-preference",
            "only-managed",
            "--all-versions",
        ])?;
        Ok(entries
            .iter()
            .filter_map(|entry| listing_from_entry(entry, self.runtime_dir()).ok())
            .filter(RuntimeListing::installed)
            .collect())
    }

    fn fetch_downloads(&self, all_versions: bool) -> Result<Vec<RuntimeListing>> {
        let installed_keys: HashSet<String> = self
            .fetch_installed()?
            .into_iter()
            .map(|listing| listing.key)
            .collect();

        let mut args = vec!["--only-downloads"];
        if all_versions {
            args.push("--all-versions");
        }
        let entries = self.run_python_list(&args)?;
        let candidates = entries
            .iter()
            .filter_map(|entry| listing_from_entry(entry, self.runtime_dir()).ok())
            .collect();
        Ok(filter_downloads(candidates, &installed_keys, &host_arch()))
    }

    fn install(&self, listing: &RuntimeListing) -> Result<Option<String>> {
        if listing.installed() {
            return Ok(None);
        }
        self.run_python_action("install", &listing.key).map(Some)
    }

    fn uninstall(&self, listing: &RuntimeListing) -> Result<Option<String>> {
        if !listing.installed() {
            return Ok(None);
        }
        self.run_python_action("uninstall", &listing.key).map(Some)
    }
}

fn resolve_runtime_dir(exe: &Path) -> Option<PathBuf> {
    let exe = exe.to_string_lossy().to_string();
    let args = vec!["python".to_string(), "dir".to_string()];
    let cwd = std::env::current_dir().ok()?;
    let output = process::run_command(&exe, &args, &[], &cwd).ok()?;
    if !output.success() {
        return None;
    }
    let dir = output.stdout.trim();
    (!dir.is_empty()).then(|| PathBuf::from(dir))
}

fn listing_from_entry(entry: &UvEntry, runtime_dir: Option<&Path>) -> Result<RuntimeListing> {
    let version = Version::from_str(&entry.version)
        .map_err(|err| anyhow::anyhow!("bad version {}: {err}", entry.version))?;

    // uv can report paths relative to the working directory.
    let path = entry.path.as_deref().map(|raw| {
        let path = Path::new(raw);
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    });

    let key = reconcile_key(&entry.key, path.as_deref(), runtime_dir);

    let implementation = entry
        .implementation
        .clone()
        .or_else(|| entry.key.split('-').next().map(str::to_string))
        .unwrap_or_else(|| "cpython".to_string());

    let variant = match entry.variant.as_deref() {
        Some("freethreaded") => Variant::Freethreaded,
        _ => Variant::Default,
    };

    let arch = entry
        .arch
        .as_deref()
        .map_or_else(host_arch, normalize_arch);

    Ok(RuntimeListing {
        provider: ProviderKind::Uv,
        key,
        version,
        implementation,
        variant,
        arch,
        path,
    })
}

/// uv's reported key and the on-disk folder name can diverge when the
/// upstream metadata was mistyped. The folder name is what governs
/// reinstallation, so it wins; this compensates for an upstream defect and
/// is not general policy.
fn reconcile_key(key: &str, path: Option<&Path>, runtime_dir: Option<&Path>) -> String {
    let Some((path, dir)) = path.zip(runtime_dir) else {
        return key.to_string();
    };
    let Ok(relative) = path.strip_prefix(dir) else {
        return key.to_string();
    };
    let Some(folder) = relative
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
    else {
        return key.to_string();
    };
    if folder != key {
        tracing::debug!("uv key {key} disagrees with folder {folder}; using folder");
        return folder;
    }
    key.to_string()
}
