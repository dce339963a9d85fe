#![deny(clippy::all, warnings)]

mod core;

pub use crate::core::activate::activate;
pub use crate::core::catalogue::{inspect_python, scan_path_executables, Catalogue, ProbeInfo};
pub use crate::core::commands::{
    download_list, repl, requirements_install, runtime_install, runtime_list, runtime_uninstall,
    shell_info, venv_create, venv_delete, venv_list, venv_packages, venv_shell,
    DownloadListRequest, ReplRequest, RequirementsInstallRequest, RuntimeInstallRequest,
    RuntimeListRequest, RuntimeUninstallRequest, ShellInfoRequest, VenvCreateRequest,
    VenvDeleteRequest, VenvListRequest, VenvPackagesRequest, VenvShellRequest,
};
pub use crate::core::errors::Error;
pub use crate::core::outcome::{CommandStatus, ExecutionOutcome};
pub use crate::core::process::RunOutput;
pub use crate::core::providers::{
    default_providers, ProviderKind, RuntimeInstall, RuntimeListing, RuntimeProvider, Variant,
};
pub use crate::core::shell::{
    dedup_path, transform, EnvMap, ShellCommand, ShellIdentity, ShellKind,
};
pub use crate::core::venv::{discover, DiscoveredVenvs, PythonPackage, VEnv};
