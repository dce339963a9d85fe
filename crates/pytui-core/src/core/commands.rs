//! Command layer: one request struct and one function per user-facing
//! operation, each returning an [`ExecutionOutcome`] for the front end to
//! render.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use which::which;

use crate::core::activate;
use crate::core::catalogue::{self, Catalogue};
use crate::core::errors::Error;
use crate::core::outcome::ExecutionOutcome;
use crate::core::process;
use crate::core::providers::{RuntimeInstall, RuntimeListing, RuntimeProvider, Variant};
use crate::core::shell;
use crate::core::venv::{self, VEnv};

pub struct ShellInfoRequest;

#[derive(Clone, Debug)]
pub struct RuntimeListRequest {
    pub query_executables: bool,
}

#[derive(Clone, Debug)]
pub struct DownloadListRequest {
    pub all_versions: bool,
    /// Restrict to one provider, matched on organisation name.
    pub provider: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RuntimeInstallRequest {
    pub key: String,
}

#[derive(Clone, Debug)]
pub struct RuntimeUninstallRequest {
    pub key: String,
}

#[derive(Clone, Debug)]
pub struct VenvListRequest {
    pub base_dir: Option<PathBuf>,
    pub recursive: bool,
    pub search_parents: bool,
}

#[derive(Clone, Debug)]
pub struct VenvCreateRequest {
    pub path: PathBuf,
    pub python: Option<PathBuf>,
    pub include_pip: bool,
    pub latest_pip: bool,
}

#[derive(Clone, Debug)]
pub struct VenvDeleteRequest {
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct VenvPackagesRequest {
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct RequirementsInstallRequest {
    pub path: PathBuf,
    pub requirements: PathBuf,
    pub no_deps: bool,
}

#[derive(Clone, Debug)]
pub struct VenvShellRequest {
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ReplRequest {
    pub path: Option<PathBuf>,
}

/// Reports the shell activation would use.
///
/// # Errors
/// Returns an error when no enclosing shell can be determined.
pub fn shell_info(_request: &ShellInfoRequest) -> Result<ExecutionOutcome> {
    let identity = shell::detect()?;
    Ok(ExecutionOutcome::success(
        format!(
            "enclosing shell: {} ({})",
            identity.kind.label(),
            identity.path.display()
        ),
        json!({
            "shell": identity.kind.label(),
            "path": identity.path.display().to_string(),
        }),
    ))
}

/// Lists every Python install the host knows about.
///
/// # Errors
/// Returns an error when an available provider backend fails.
pub fn runtime_list(
    catalogue: &Catalogue,
    request: &RuntimeListRequest,
) -> Result<ExecutionOutcome> {
    let installs = catalogue.list_installed(request.query_executables)?;
    let details: Vec<Value> = installs.iter().map(install_to_json).collect();
    if installs.is_empty() {
        return Ok(ExecutionOutcome::success(
            "no Python runtimes found",
            json!({ "runtimes": details }),
        ));
    }
    let summary = installs
        .iter()
        .map(|install| {
            format!(
                "{:<10} {:<10} {}",
                install
                    .version
                    .as_ref()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string),
                install.managed_by.as_deref().unwrap_or("-"),
                install.executable.display()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    Ok(ExecutionOutcome::success(
        format!("installed runtimes:\n{summary}"),
        json!({ "runtimes": details }),
    ))
}

/// Lists runtimes available to download, across all available providers.
///
/// # Errors
/// Returns an error when an available provider backend fails.
pub fn download_list(
    catalogue: &Catalogue,
    request: &DownloadListRequest,
) -> Result<ExecutionOutcome> {
    let mut downloads = catalogue.list_downloads(request.all_versions)?;
    if let Some(wanted) = &request.provider {
        downloads.retain(|listing| {
            listing
                .provider
                .organisation()
                .eq_ignore_ascii_case(wanted)
        });
    }
    let details: Vec<Value> = downloads.iter().map(listing_to_json).collect();
    if downloads.is_empty() {
        return Ok(ExecutionOutcome::success(
            "no downloadable runtimes reported",
            json!({ "downloads": details }),
        ));
    }
    let summary = downloads
        .iter()
        .map(|listing| format!("{:<12} {}", listing.version, listing.full_key()))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(ExecutionOutcome::success(
        format!("available downloads:\n{summary}"),
        json!({ "downloads": details }),
    ))
}

/// Installs a downloadable runtime by provider key.
///
/// # Errors
/// Returns an error when provider enumeration or the install itself fails.
pub fn runtime_install(
    catalogue: &Catalogue,
    request: &RuntimeInstallRequest,
) -> Result<ExecutionOutcome> {
    // Downloads are the set difference against installed keys, so an
    // already-installed key has to be recognised here to stay a no-op.
    if let Some(listing) = catalogue.find_installed(&request.key)? {
        return Ok(ExecutionOutcome::success(
            format!("{} is already installed", listing.full_key()),
            json!({ "key": listing.key }),
        ));
    }
    let Some(listing) = catalogue.find_download(&request.key, true)? else {
        return Ok(ExecutionOutcome::user_error(
            format!("no downloadable runtime matches '{}'", request.key),
            json!({ "key": request.key }),
        ));
    };
    let provider = provider_for(catalogue, &listing)?;
    match provider.install(&listing)? {
        Some(command) => Ok(ExecutionOutcome::success(
            format!("installed {}", listing.full_key()),
            json!({ "key": listing.key, "command": command }),
        )),
        None => Ok(ExecutionOutcome::success(
            format!("{} is already installed", listing.full_key()),
            json!({ "key": listing.key }),
        )),
    }
}

/// Uninstalls a provider-managed runtime by key.
///
/// # Errors
/// Returns an error when provider enumeration or the uninstall itself fails.
pub fn runtime_uninstall(
    catalogue: &Catalogue,
    request: &RuntimeUninstallRequest,
) -> Result<ExecutionOutcome> {
    let Some(listing) = catalogue.find_installed(&request.key)? else {
        return Ok(ExecutionOutcome::user_error(
            format!("no installed runtime matches '{}'", request.key),
            json!({ "key": request.key }),
        ));
    };
    let provider = provider_for(catalogue, &listing)?;
    match provider.uninstall(&listing)? {
        Some(command) => Ok(ExecutionOutcome::success(
            format!("uninstalled {}", listing.full_key()),
            json!({ "key": listing.key, "command": command }),
        )),
        None => Ok(ExecutionOutcome::success(
            format!("{} was not installed", listing.full_key()),
            json!({ "key": listing.key }),
        )),
    }
}

/// Lists virtual environments reachable from a base directory.
///
/// # Errors
/// Returns an error when the base directory cannot be resolved.
pub fn venv_list(request: &VenvListRequest) -> Result<ExecutionOutcome> {
    let base_dir = match &request.base_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("working directory unavailable")?,
    };
    let venvs: Vec<VEnv> =
        venv::discover(&base_dir, request.recursive, request.search_parents).collect();
    let details: Vec<Value> = venvs.iter().map(venv_to_json).collect();
    if venvs.is_empty() {
        return Ok(ExecutionOutcome::success(
            format!("no virtual environments under {}", base_dir.display()),
            json!({ "venvs": details }),
        ));
    }
    let summary = venvs
        .iter()
        .map(|venv| format!("{:<10} {}", venv.version, venv.folder.display()))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(ExecutionOutcome::success(
        format!("virtual environments:\n{summary}"),
        json!({ "venvs": details }),
    ))
}

/// Creates a virtual environment.
///
/// # Errors
/// Returns an error when no base interpreter can be found or creation
/// fails for reasons other than the target already existing.
pub fn venv_create(request: &VenvCreateRequest) -> Result<ExecutionOutcome> {
    let python = match &request.python {
        Some(python) => python.clone(),
        None => default_python()?,
    };
    let version: Option<pep440_rs::Version> = catalogue::inspect_python(&python)
        .ok()
        .and_then(|probe| probe.version.parse().ok());

    let created = venv::create(
        &python,
        version.as_ref(),
        &request.path,
        request.include_pip,
        request.latest_pip,
    );
    match created {
        Ok(venv) => Ok(ExecutionOutcome::success(
            format!("created {}", venv.folder.display()),
            venv_to_json(&venv),
        )),
        Err(err) if Error::is_already_exists(&err) => Ok(ExecutionOutcome::user_error(
            format!("{} already exists", request.path.display()),
            json!({ "path": request.path.display().to_string() }),
        )),
        Err(err) => Err(err),
    }
}

/// Deletes a virtual environment after confirming the target is one.
///
/// # Errors
/// Returns an error when the folder exists but cannot be inspected.
pub fn venv_delete(request: &VenvDeleteRequest) -> Result<ExecutionOutcome> {
    if !request.path.exists() {
        return Ok(ExecutionOutcome::user_error(
            format!("{} does not exist", request.path.display()),
            json!({ "path": request.path.display().to_string() }),
        ));
    }
    // Refuse to recursively remove anything that is not a venv.
    if VEnv::from_folder(&request.path).is_err() {
        return Ok(ExecutionOutcome::user_error(
            format!(
                "{} is not a virtual environment (no readable pyvenv.cfg)",
                request.path.display()
            ),
            json!({ "path": request.path.display().to_string() }),
        ));
    }
    venv::delete(&request.path);
    Ok(ExecutionOutcome::success(
        format!("deleted {}", request.path.display()),
        json!({ "path": request.path.display().to_string() }),
    ))
}

/// Lists the packages installed in a virtual environment.
///
/// # Errors
/// Returns an error when pip cannot be run inside the venv.
pub fn venv_packages(request: &VenvPackagesRequest) -> Result<ExecutionOutcome> {
    let Some(venv) = load_venv(&request.path) else {
        return Ok(not_a_venv(&request.path));
    };
    let packages = venv.list_packages()?;
    let details: Vec<Value> = packages
        .iter()
        .map(|package| json!({ "name": package.name, "version": package.version }))
        .collect();
    let summary = packages
        .iter()
        .map(|package| format!("{:<30} {}", package.name, package.version))
        .collect::<Vec<_>>()
        .join("\n");
    let message = if packages.is_empty() {
        format!("no packages installed in {}", venv.name())
    } else {
        format!("packages in {}:\n{summary}", venv.name())
    };
    Ok(ExecutionOutcome::success(
        message,
        json!({ "packages": details }),
    ))
}

/// Installs a requirements file into a virtual environment.
///
/// # Errors
/// Returns an error when the pip invocation fails.
pub fn requirements_install(request: &RequirementsInstallRequest) -> Result<ExecutionOutcome> {
    let Some(venv) = load_venv(&request.path) else {
        return Ok(not_a_venv(&request.path));
    };
    if !request.requirements.is_file() {
        return Ok(ExecutionOutcome::user_error(
            format!("requirements file {} not found", request.requirements.display()),
            json!({ "requirements": request.requirements.display().to_string() }),
        ));
    }
    venv.install_requirements(&request.requirements, request.no_deps)?;
    Ok(ExecutionOutcome::success(
        format!(
            "installed {} into {}",
            request.requirements.display(),
            venv.name()
        ),
        json!({
            "requirements": request.requirements.display().to_string(),
            "venv": venv.folder.display().to_string(),
        }),
    ))
}

/// Opens an interactive shell with the virtual environment activated.
///
/// # Errors
/// Returns an error when shell detection or the session launch fails.
pub fn venv_shell(request: &VenvShellRequest) -> Result<ExecutionOutcome> {
    let Some(venv) = load_venv(&request.path) else {
        return Ok(not_a_venv(&request.path));
    };
    let code = activate::activate(&venv)?;
    Ok(ExecutionOutcome::success(
        format!("shell session ended with status {code}"),
        json!({ "venv": venv.folder.display().to_string(), "exit_code": code }),
    ))
}

/// Starts a Python REPL, in a venv's interpreter when one is given.
///
/// # Errors
/// Returns an error when the interpreter cannot be started.
pub fn repl(request: &ReplRequest) -> Result<ExecutionOutcome> {
    let executable = match &request.path {
        Some(path) => {
            let Some(venv) = load_venv(path) else {
                return Ok(not_a_venv(path));
            };
            venv.executable
        }
        None => default_python()?,
    };
    let exe = executable.to_string_lossy().to_string();
    let cwd = std::env::current_dir().context("working directory unavailable")?;
    let output = process::run_passthrough(&exe, &[], &[], &cwd)?;
    Ok(ExecutionOutcome::success(
        format!("REPL exited with status {}", output.code),
        json!({ "executable": exe, "exit_code": output.code }),
    ))
}

fn default_python() -> Result<PathBuf> {
    which("python3")
        .or_else(|_| which("python"))
        .context("no python interpreter found on PATH")
}

fn load_venv(path: &Path) -> Option<VEnv> {
    VEnv::from_folder(path).ok()
}

fn not_a_venv(path: &Path) -> ExecutionOutcome {
    ExecutionOutcome::user_error(
        format!(
            "{} is not a virtual environment (no readable pyvenv.cfg)",
            path.display()
        ),
        json!({ "path": path.display().to_string() }),
    )
}

fn install_to_json(install: &RuntimeInstall) -> Value {
    json!({
        "executable": install.executable.display().to_string(),
        "version": install.version.as_ref().map(ToString::to_string),
        "implementation": install.implementation,
        "managed_by": install.managed_by,
    })
}

fn listing_to_json(listing: &RuntimeListing) -> Value {
    json!({
        "key": listing.key,
        "full_key": listing.full_key(),
        "version": listing.version.to_string(),
        "implementation": listing.implementation,
        "freethreaded": listing.variant == Variant::Freethreaded,
        "arch": listing.arch,
    })
}

fn venv_to_json(venv: &VEnv) -> Value {
    json!({
        "folder": venv.folder.display().to_string(),
        "version": venv.version,
        "executable": venv.executable.display().to_string(),
        "parent_executable": venv.parent_executable.display().to_string(),
    })
}

fn provider_for<'a>(
    catalogue: &'a Catalogue,
    listing: &RuntimeListing,
) -> Result<&'a dyn RuntimeProvider> {
    catalogue
        .providers()
        .iter()
        .find(|provider| provider.kind() == listing.provider)
        .map(AsRef::as_ref)
        .with_context(|| format!("no provider registered for {}", listing.provider.organisation()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::outcome::CommandStatus;
    use std::fs;
    use tempfile::TempDir;

    fn fake_venv(dir: &Path) -> PathBuf {
        let root = dir.join(".venv");
        fs::create_dir_all(&root).unwrap();
        fs::write(
            root.join("pyvenv.cfg"),
            "home = /usr/bin\nversion = 3.12.3\n",
        )
        .unwrap();
        root
    }

    #[test]
    fn venv_list_reports_discovered_environments() {
        let dir = TempDir::new().unwrap();
        let root = fake_venv(dir.path());

        let outcome = venv_list(&VenvListRequest {
            base_dir: Some(dir.path().to_path_buf()),
            recursive: false,
            search_parents: false,
        })
        .unwrap();
        assert_eq!(outcome.status, CommandStatus::Ok);
        let venvs = outcome.details.get("venvs").unwrap().as_array().unwrap();
        assert_eq!(venvs.len(), 1);
        // Discovery reports canonical folder paths.
        assert_eq!(
            venvs[0].get("folder").unwrap().as_str().unwrap(),
            root.canonicalize().unwrap().display().to_string()
        );
    }

    #[test]
    fn venv_delete_refuses_plain_folders() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("not-a-venv");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("data.txt"), "keep").unwrap();

        let outcome = venv_delete(&VenvDeleteRequest {
            path: target.clone(),
        })
        .unwrap();
        assert_eq!(outcome.status, CommandStatus::UserError);
        assert!(target.join("data.txt").exists());
    }

    #[test]
    fn venv_delete_removes_real_venvs() {
        let dir = TempDir::new().unwrap();
        let root = fake_venv(dir.path());

        let outcome = venv_delete(&VenvDeleteRequest { path: root.clone() }).unwrap();
        assert_eq!(outcome.status, CommandStatus::Ok);
        assert!(!root.exists());
    }

    #[test]
    fn venv_delete_reports_missing_path() {
        let dir = TempDir::new().unwrap();
        let outcome = venv_delete(&VenvDeleteRequest {
            path: dir.path().join("absent"),
        })
        .unwrap();
        assert_eq!(outcome.status, CommandStatus::UserError);
    }

    #[test]
    fn packages_of_non_venv_is_a_user_error() {
        let dir = TempDir::new().unwrap();
        let outcome = venv_packages(&VenvPackagesRequest {
            path: dir.path().to_path_buf(),
        })
        .unwrap();
        assert_eq!(outcome.status, CommandStatus::UserError);
    }

    #[test]
    fn requirements_file_must_exist() {
        let dir = TempDir::new().unwrap();
        let root = fake_venv(dir.path());

        let outcome = requirements_install(&RequirementsInstallRequest {
            path: root,
            requirements: dir.path().join("requirements.txt"),
            no_deps: false,
        })
        .unwrap();
        assert_eq!(outcome.status, CommandStatus::UserError);
    }

    #[test]
    fn download_list_honours_provider_filter() {
        use crate::core::providers::ProviderKind;

        struct DownloadsOnly;

        impl RuntimeProvider for DownloadsOnly {
            fn kind(&self) -> ProviderKind {
                ProviderKind::Uv
            }

            fn executable(&self) -> Option<&Path> {
                None
            }

            fn runtime_dir(&self) -> Option<&Path> {
                None
            }

            fn fetch_installed(&self) -> anyhow::Result<Vec<RuntimeListing>> {
                Ok(Vec::new())
            }

            fn fetch_downloads(&self, _all_versions: bool) -> anyhow::Result<Vec<RuntimeListing>> {
                Ok(vec![RuntimeListing {
                    provider: ProviderKind::Uv,
                    key: "cpython-3.13.0".to_string(),
                    version: "3.13.0".parse().unwrap(),
                    implementation: "cpython".to_string(),
                    variant: Variant::Default,
                    arch: "x86_64".to_string(),
                    path: None,
                }])
            }

            fn install(&self, _listing: &RuntimeListing) -> anyhow::Result<Option<String>> {
                Ok(None)
            }

            fn uninstall(&self, _listing: &RuntimeListing) -> anyhow::Result<Option<String>> {
                Ok(None)
            }
        }

        let catalogue = Catalogue::new(vec![Box::new(DownloadsOnly)]);

        let all = download_list(
            &catalogue,
            &DownloadListRequest {
                all_versions: false,
                provider: None,
            },
        )
        .unwrap();
        assert_eq!(all.details.get("downloads").unwrap().as_array().unwrap().len(), 1);

        let filtered = download_list(
            &catalogue,
            &DownloadListRequest {
                all_versions: false,
                provider: Some("PythonCore".to_string()),
            },
        )
        .unwrap();
        assert!(filtered
            .details
            .get("downloads")
            .unwrap()
            .as_array()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn installing_an_installed_key_is_a_no_op() {
        use crate::core::providers::ProviderKind;

        struct InstalledOnly;

        impl RuntimeProvider for InstalledOnly {
            fn kind(&self) -> ProviderKind {
                ProviderKind::Uv
            }

            fn executable(&self) -> Option<&Path> {
                None
            }

            fn runtime_dir(&self) -> Option<&Path> {
                None
            }

            fn fetch_installed(&self) -> anyhow::Result<Vec<RuntimeListing>> {
                Ok(vec![RuntimeListing {
                    provider: ProviderKind::Uv,
                    key: "cpython-3.12.3".to_string(),
                    version: "3.12.3".parse().unwrap(),
                    implementation: "cpython".to_string(),
                    variant: Variant::Default,
                    arch: "x86_64".to_string(),
                    path: Some(PathBuf::from("/py/cpython-3.12.3/bin/python")),
                }])
            }

            fn fetch_downloads(&self, _all_versions: bool) -> anyhow::Result<Vec<RuntimeListing>> {
                Ok(Vec::new())
            }

            fn install(&self, _listing: &RuntimeListing) -> anyhow::Result<Option<String>> {
                panic!("install must not run for an installed key");
            }

            fn uninstall(&self, _listing: &RuntimeListing) -> anyhow::Result<Option<String>> {
                Ok(None)
            }
        }

        let catalogue = Catalogue::new(vec![Box::new(InstalledOnly)]);
        let outcome = runtime_install(
            &catalogue,
            &RuntimeInstallRequest {
                key: "cpython-3.12.3".to_string(),
            },
        )
        .unwrap();
        assert_eq!(outcome.status, CommandStatus::Ok);
        assert!(outcome.message.contains("already installed"));
    }

    #[test]
    fn unknown_download_key_is_a_user_error() {
        let catalogue = Catalogue::new(Vec::new());
        let outcome = runtime_install(
            &catalogue,
            &RuntimeInstallRequest {
                key: "cpython-0.0.0".to_string(),
            },
        )
        .unwrap();
        assert_eq!(outcome.status, CommandStatus::UserError);
    }

    #[test]
    fn unknown_installed_key_is_a_user_error() {
        let catalogue = Catalogue::new(Vec::new());
        let outcome = runtime_uninstall(
            &catalogue,
            &RuntimeUninstallRequest {
                key: "cpython-0.0.0".to_string(),
            },
        )
        .unwrap();
        assert_eq!(outcome.status, CommandStatus::UserError);
    }
}
