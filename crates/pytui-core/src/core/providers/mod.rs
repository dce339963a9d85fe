pub mod pymanager;
pub mod uv;

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use anyhow::Result;
use pep440_rs::Version;

/// Identifies a runtime provider backend. Listings carry this instead of a
/// reference to the provider itself, keeping the back-reference non-owning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    PyManager,
    Uv,
}

impl ProviderKind {
    #[must_use]
    pub fn organisation(self) -> &'static str {
        match self {
            Self::PyManager => "PythonCore",
            Self::Uv => "Astral UV",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    Default,
    Freethreaded,
}

/// A Python runtime a provider knows about, installed or downloadable.
#[derive(Clone, Debug)]
pub struct RuntimeListing {
    pub provider: ProviderKind,
    /// Unique within the provider's namespace.
    pub key: String,
    pub version: Version,
    pub implementation: String,
    pub variant: Variant,
    pub arch: String,
    /// `Some` iff the runtime is actually installed on disk.
    pub path: Option<PathBuf>,
}

impl RuntimeListing {
    #[must_use]
    pub fn installed(&self) -> bool {
        self.path.is_some()
    }

    #[must_use]
    pub fn full_key(&self) -> String {
        format!("{} / {}", self.provider.organisation(), self.key)
    }
}

/// An interpreter present on the host, however it was discovered.
#[derive(Clone, Debug)]
pub struct RuntimeInstall {
    pub executable: PathBuf,
    pub version: Option<Version>,
    pub implementation: String,
    /// Organisation of the provider that manages this install, if any.
    pub managed_by: Option<String>,
}

/// A backend that can enumerate and (un)install Python runtimes.
///
/// Backend executable and runtime-storage paths are resolved once at
/// construction and cached in plain fields.
pub trait RuntimeProvider {
    fn kind(&self) -> ProviderKind;

    fn organisation(&self) -> &'static str {
        self.kind().organisation()
    }

    /// Path to the backend tool, or `None` when it is not installed.
    fn executable(&self) -> Option<&Path>;

    /// Folder holding the runtimes this backend manages, when known.
    fn runtime_dir(&self) -> Option<&Path>;

    /// Lists installed runtimes (all with non-null paths).
    ///
    /// # Errors
    /// [`crate::core::errors::Error::ProviderUnavailable`] when the backend
    /// executable is missing; a process error when the tool fails.
    fn fetch_installed(&self) -> Result<Vec<RuntimeListing>>;

    /// Lists download candidates: never a key present in the installed set,
    /// never an architecture other than the host's canonical token.
    ///
    /// # Errors
    /// Same failure modes as [`Self::fetch_installed`].
    fn fetch_downloads(&self, all_versions: bool) -> Result<Vec<RuntimeListing>>;

    /// Resolves an externally-discovered install back to this provider's
    /// own listing by directory containment. `None` means the install was
    /// not produced by this provider.
    fn find_matching_listing(&self, install: &RuntimeInstall) -> Option<RuntimeListing> {
        let listings = self.fetch_installed().ok()?;
        let index = listings_by_parent_dir(listings);
        let parent = canonical_parent(&install.executable)?;
        index.get(&parent).cloned()
    }

    /// Installs the runtime behind `listing`. Idempotent: returns `Ok(None)`
    /// without running anything when it is already installed, otherwise the
    /// command line that was run.
    ///
    /// # Errors
    /// A process error when the backend invocation fails.
    fn install(&self, listing: &RuntimeListing) -> Result<Option<String>>;

    /// Uninstalls the runtime behind `listing`. Idempotent: `Ok(None)` when
    /// it is not installed.
    ///
    /// # Errors
    /// A process error when the backend invocation fails.
    fn uninstall(&self, listing: &RuntimeListing) -> Result<Option<String>>;
}

/// The provider set in registration order; this order is the tie-break used
/// when attributing installs to providers.
#[must_use]
pub fn default_providers() -> Vec<Box<dyn RuntimeProvider>> {
    vec![
        Box::new(pymanager::PyManagerProvider::new()),
        Box::new(uv::UvProvider::new()),
    ]
}

/// Collapses architecture aliases onto one canonical token per family.
#[must_use]
pub fn normalize_arch(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "amd64" | "x64" | "x86_64" => "x86_64".to_string(),
        "arm64" | "aarch64" => "aarch64".to_string(),
        other => other.to_string(),
    }
}

#[must_use]
pub fn host_arch() -> String {
    normalize_arch(std::env::consts::ARCH)
}

/// Shared download filter: drops already-installed keys and foreign
/// architectures, and strips any path so the result is download-only.
pub(crate) fn filter_downloads(
    listings: Vec<RuntimeListing>,
    installed_keys: &HashSet<String>,
    host_arch: &str,
) -> Vec<RuntimeListing> {
    listings
        .into_iter()
        .filter(|listing| !installed_keys.contains(&listing.key))
        .filter(|listing| listing.arch == host_arch)
        .map(|mut listing| {
            listing.path = None;
            listing
        })
        .collect()
}

/// Indexes installed listings by the canonicalised folder holding their
/// executable. Executable names can differ between discovery paths (python
/// vs pypy), the folder is what matches.
pub(crate) fn listings_by_parent_dir(
    listings: Vec<RuntimeListing>,
) -> HashMap<PathBuf, RuntimeListing> {
    let mut index = HashMap::new();
    for listing in listings {
        let Some(path) = listing.path.as_deref() else {
            continue;
        };
        if let Some(parent) = canonical_parent(path) {
            index.entry(parent).or_insert(listing);
        }
    }
    index
}

pub(crate) fn canonical_parent(executable: &Path) -> Option<PathBuf> {
    let canonical = executable
        .canonicalize()
        .unwrap_or_else(|_| executable.to_path_buf());
    canonical.parent().map(Path::to_path_buf)
}
