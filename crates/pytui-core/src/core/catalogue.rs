//! Merged view over every runtime source: provider-managed installs plus
//! interpreters found on PATH, deduplicated by canonical executable path.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use pep440_rs::Version;
use serde::Deserialize;

use crate::core::errors::Error;
use crate::core::process;
use crate::core::providers::{
    default_providers, RuntimeInstall, RuntimeListing, RuntimeProvider,
};

pub struct Catalogue {
    providers: Vec<Box<dyn RuntimeProvider>>,
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    version: String,
    implementation: String,
}

impl Catalogue {
    #[must_use]
    pub fn new(providers: Vec<Box<dyn RuntimeProvider>>) -> Self {
        Self { providers }
    }

    #[must_use]
    pub fn with_default_providers() -> Self {
        Self::new(default_providers())
    }

    #[must_use]
    pub fn providers(&self) -> &[Box<dyn RuntimeProvider>] {
        &self.providers
    }

    /// Every install the host knows about: provider-managed runtimes first,
    /// then unmanaged interpreters discovered on PATH. One entry per
    /// canonical executable path; the first source to report a path wins.
    ///
    /// Providers whose backend tool is absent are skipped. With
    /// `query_executables` set, unmanaged interpreters are probed for their
    /// real version and implementation; otherwise both are guessed from the
    /// executable name.
    ///
    /// # Errors
    /// Propagates provider failures other than an absent backend.
    pub fn list_installed(&self, query_executables: bool) -> Result<Vec<RuntimeInstall>> {
        let mut merged: IndexMap<PathBuf, RuntimeInstall> = IndexMap::new();

        for provider in &self.providers {
            let listings = match provider.fetch_installed() {
                Ok(listings) => listings,
                Err(err) if Error::is_provider_unavailable(&err) => {
                    tracing::debug!("skipping {}: backend not installed", provider.organisation());
                    continue;
                }
                Err(err) => return Err(err),
            };
            for listing in listings {
                let Some(path) = listing.path.clone() else {
                    continue;
                };
                let canonical = canonical_exe(&path);
                merged.entry(canonical).or_insert_with(|| RuntimeInstall {
                    executable: path,
                    version: Some(listing.version.clone()),
                    implementation: listing.implementation.clone(),
                    managed_by: Some(provider.organisation().to_string()),
                });
            }
        }

        let path_var = std::env::var("PATH").unwrap_or_default();
        for executable in scan_path_executables(&path_var) {
            let canonical = canonical_exe(&executable);
            if merged.contains_key(&canonical) {
                continue;
            }
            let install = match self.describe_unmanaged(&executable, query_executables) {
                Some(install) => install,
                None => continue,
            };
            merged.insert(canonical, install);
        }

        Ok(merged.into_values().collect())
    }

    /// Download candidates from every available provider, in provider
    /// registration order.
    ///
    /// # Errors
    /// Propagates provider failures other than an absent backend.
    pub fn list_downloads(&self, all_versions: bool) -> Result<Vec<RuntimeListing>> {
        let mut downloads = Vec::new();
        for provider in &self.providers {
            match provider.fetch_downloads(all_versions) {
                Ok(listings) => downloads.extend(listings),
                Err(err) if Error::is_provider_unavailable(&err) => {
                    tracing::debug!("skipping {}: backend not installed", provider.organisation());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(downloads)
    }

    /// Finds a download candidate by key, searching providers in
    /// registration order.
    ///
    /// # Errors
    /// Propagates provider failures other than an absent backend.
    pub fn find_download(&self, key: &str, all_versions: bool) -> Result<Option<RuntimeListing>> {
        Ok(self
            .list_downloads(all_versions)?
            .into_iter()
            .find(|listing| listing.key == key))
    }

    /// Finds an installed provider-managed runtime by key.
    ///
    /// # Errors
    /// Propagates provider failures other than an absent backend.
    pub fn find_installed(&self, key: &str) -> Result<Option<RuntimeListing>> {
        for provider in &self.providers {
            let listings = match provider.fetch_installed() {
                Ok(listings) => listings,
                Err(err) if Error::is_provider_unavailable(&err) => continue,
                Err(err) => return Err(err),
            };
            if let Some(listing) = listings.into_iter().find(|listing| listing.key == key) {
                return Ok(Some(listing));
            }
        }
        Ok(None)
    }

    /// The provider, if any, that owns `key` among its installed runtimes.
    ///
    /// # Errors
    /// Propagates provider failures other than an absent backend.
    pub fn provider_for_installed(&self, key: &str) -> Result<Option<&dyn RuntimeProvider>> {
        for provider in &self.providers {
            let listings = match provider.fetch_installed() {
                Ok(listings) => listings,
                Err(err) if Error::is_provider_unavailable(&err) => continue,
                Err(err) => return Err(err),
            };
            if listings.iter().any(|listing| listing.key == key) {
                return Ok(Some(provider.as_ref()));
            }
        }
        Ok(None)
    }

    fn describe_unmanaged(
        &self,
        executable: &Path,
        query_executables: bool,
    ) -> Option<RuntimeInstall> {
        let mut install = RuntimeInstall {
            executable: executable.to_path_buf(),
            version: None,
            implementation: implementation_from_filename(executable),
            managed_by: None,
        };

        // A runtime can sit on PATH and still belong to a provider; the
        // first provider whose storage folder contains it claims it.
        for provider in &self.providers {
            if let Some(listing) = provider.find_matching_listing(&install) {
                install.version = Some(listing.version);
                install.implementation = listing.implementation;
                install.managed_by = Some(provider.organisation().to_string());
                return Some(install);
            }
        }

        if query_executables {
            match inspect_python(executable) {
                Ok(report) => {
                    install.version = Version::from_str(&report.version).ok();
                    install.implementation = report.implementation.to_lowercase();
                }
                Err(err) => {
                    tracing::debug!(
                        "dropping {}: interpreter probe failed: {err:#}",
                        executable.display()
                    );
                    return None;
                }
            }
        } else {
            install.version = version_from_filename(executable);
        }
        Some(install)
    }
}

/// Runs a one-line script under the interpreter to read its identity.
///
/// # Errors
/// Returns an error when the executable cannot run the script or reports
/// unparseable JSON.
pub fn inspect_python(executable: &Path) -> Result<ProbeInfo> {
    const SCRIPT: &str = "import json,platform,sys;print(json.dumps({\
        'version':platform.python_version(),\
        'implementation':platform.python_implementation(),\
        'executable':sys.executable}))";
    let exe = executable.to_string_lossy().to_string();
    let args = vec!["-c".to_string(), SCRIPT.to_string()];
    let cwd = std::env::current_dir().context("working directory unavailable")?;
    let output = process::run_checked(&exe, &args, &[], &cwd)?;
    let report: ProbeReport =
        serde_json::from_str(output.stdout.trim()).context("invalid interpreter probe payload")?;
    Ok(ProbeInfo {
        version: report.version,
        implementation: report.implementation,
    })
}

#[derive(Debug, Clone)]
pub struct ProbeInfo {
    pub version: String,
    pub implementation: String,
}

/// Collects python-like executables from a PATH-style string, one per
/// canonical target, in PATH order.
#[must_use]
pub fn scan_path_executables(path_var: &str) -> Vec<PathBuf> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut found = Vec::new();
    for dir in std::env::split_paths(path_var) {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !is_python_like(name) || !is_executable_file(&path) {
                continue;
            }
            if seen.insert(canonical_exe(&path)) {
                found.push(path);
            }
        }
    }
    found
}

/// Name filter for PATH discovery. Versioned names are accepted, config
/// helpers like `python3-config` are not.
fn is_python_like(name: &str) -> bool {
    let stem = name.strip_suffix(".exe").unwrap_or(name);
    for prefix in ["python", "pypy", "graalpy"] {
        if let Some(rest) = stem.strip_prefix(prefix) {
            return rest.chars().all(|c| c.is_ascii_digit() || c == '.' || c == 't');
        }
    }
    false
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(windows)]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
}

fn canonical_exe(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn implementation_from_filename(executable: &Path) -> String {
    let stem = executable
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("");
    for name in ["pypy", "graalpy"] {
        if stem.starts_with(name) {
            return name.to_string();
        }
    }
    "cpython".to_string()
}

// `file_stem` would treat the minor version as an extension (`python3.12`
// stems to `python3`), so only a literal `.exe` is stripped here.
fn version_from_filename(executable: &Path) -> Option<Version> {
    let name = executable.file_name()?.to_str()?;
    let name = name.strip_suffix(".exe").unwrap_or(name);
    let digits = name.trim_start_matches(|c: char| !c.is_ascii_digit());
    if digits.is_empty() {
        return None;
    }
    let digits = digits.trim_end_matches('t');
    Version::from_str(digits).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::providers::{ProviderKind, Variant};
    use std::fs;
    use tempfile::TempDir;

    struct FakeProvider {
        installed: Vec<RuntimeListing>,
    }

    impl RuntimeProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Uv
        }

        fn executable(&self) -> Option<&Path> {
            None
        }

        fn runtime_dir(&self) -> Option<&Path> {
            None
        }

        fn fetch_installed(&self) -> Result<Vec<RuntimeListing>> {
            Ok(self.installed.clone())
        }

        fn fetch_downloads(&self, _all_versions: bool) -> Result<Vec<RuntimeListing>> {
            Ok(Vec::new())
        }

        fn install(&self, _listing: &RuntimeListing) -> Result<Option<String>> {
            Ok(None)
        }

        fn uninstall(&self, _listing: &RuntimeListing) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn managed_listing(key: &str, path: &Path) -> RuntimeListing {
        RuntimeListing {
            provider: ProviderKind::Uv,
            key: key.to_string(),
            version: Version::from_str("3.12.3").unwrap(),
            implementation: "cpython".to_string(),
            variant: Variant::Default,
            arch: "x86_64".to_string(),
            path: Some(path.to_path_buf()),
        }
    }

    #[cfg(unix)]
    fn touch_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::write(path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn python_like_names_are_filtered() {
        assert!(is_python_like("python"));
        assert!(is_python_like("python3.12"));
        assert!(is_python_like("python3.13t"));
        assert!(is_python_like("pypy3"));
        assert!(is_python_like("python.exe"));
        assert!(!is_python_like("python3-config"));
        assert!(!is_python_like("pythonw-helper"));
        assert!(!is_python_like("ruby"));
    }

    #[test]
    fn filename_version_fallback() {
        assert_eq!(
            version_from_filename(Path::new("/usr/bin/python3.12")),
            Some(Version::from_str("3.12").unwrap())
        );
        assert_eq!(
            version_from_filename(Path::new("/usr/bin/python3.13t")),
            Some(Version::from_str("3.13").unwrap())
        );
        assert_eq!(
            version_from_filename(Path::new("C:\\py\\python3.12.exe")),
            Some(Version::from_str("3.12").unwrap())
        );
        assert_eq!(version_from_filename(Path::new("/usr/bin/python")), None);
    }

    #[cfg(unix)]
    #[test]
    fn path_scan_dedups_symlink_targets() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("python3.12");
        touch_executable(&real);
        std::os::unix::fs::symlink(&real, dir.path().join("python3")).unwrap();
        std::os::unix::fs::symlink(&real, dir.path().join("python")).unwrap();
        fs::write(dir.path().join("python3-config"), "").unwrap();

        let found = scan_path_executables(&dir.path().to_string_lossy());
        assert_eq!(found.len(), 1, "one entry per canonical target: {found:?}");
    }

    #[cfg(unix)]
    #[test]
    fn managed_install_is_attributed_to_its_provider() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("python3.12");
        touch_executable(&exe);

        let catalogue = Catalogue::new(vec![Box::new(FakeProvider {
            installed: vec![managed_listing("cpython-3.12.3", &exe)],
        })]);
        let install = RuntimeInstall {
            executable: exe.clone(),
            version: None,
            implementation: "cpython".to_string(),
            managed_by: None,
        };

        let matched = catalogue.providers()[0].find_matching_listing(&install);
        assert!(matched.is_some());
        assert_eq!(matched.unwrap().key, "cpython-3.12.3");
    }

    #[cfg(unix)]
    #[test]
    fn unmanaged_install_keeps_filename_metadata() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("pypy3.10");
        touch_executable(&exe);

        let catalogue = Catalogue::new(vec![Box::new(FakeProvider { installed: vec![] })]);
        let install = catalogue.describe_unmanaged(&exe, false).unwrap();
        assert_eq!(install.managed_by, None);
        assert_eq!(install.implementation, "pypy");
        assert_eq!(install.version, Some(Version::from_str("3.10").unwrap()));
    }
}
