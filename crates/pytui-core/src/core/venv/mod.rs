mod discover;

pub use discover::{discover, DiscoveredVenvs};

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use pep440_rs::Version;
use serde::Deserialize;

use crate::core::errors::Error;
use crate::core::process;

/// A virtual environment backed by a readable `pyvenv.cfg`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VEnv {
    pub folder: PathBuf,
    pub executable: PathBuf,
    pub parent_executable: PathBuf,
    pub version: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PythonPackage {
    pub name: String,
    pub version: String,
}

impl VEnv {
    /// Reads a venv from its `pyvenv.cfg`.
    ///
    /// # Errors
    /// Returns [`Error::MalformedConfig`] when the file is unreadable or is
    /// missing the fields a venv config must carry.
    pub fn from_cfg(cfg_path: &Path) -> Result<Self> {
        let malformed = || Error::MalformedConfig(cfg_path.to_path_buf());
        let contents = fs::read_to_string(cfg_path).map_err(|_| malformed())?;

        let mut home: Option<String> = None;
        let mut version: Option<String> = None;
        let mut parent_exe: Option<String> = None;
        for line in contents.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "home" => home = Some(value.to_string()),
                // `version` in stdlib venvs, `version_info` in uv-created ones
                "version" | "version_info" => version = Some(value.to_string()),
                "executable" => parent_exe = Some(value.to_string()),
                _ => {}
            }
        }

        let home = home.ok_or_else(malformed)?;
        let version = version.ok_or_else(malformed)?;
        let folder = cfg_path.parent().ok_or_else(malformed)?.to_path_buf();

        let parent_executable = match parent_exe {
            Some(exe) => PathBuf::from(exe),
            None => python_in_home(Path::new(&home)),
        };

        Ok(Self {
            executable: venv_python(&folder),
            folder,
            parent_executable,
            version,
        })
    }

    /// Reads a venv given its root folder.
    ///
    /// # Errors
    /// Returns [`Error::MalformedConfig`] when `pyvenv.cfg` is absent or bad.
    pub fn from_folder(folder: &Path) -> Result<Self> {
        Self::from_cfg(&folder.join("pyvenv.cfg"))
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.folder
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.folder.display().to_string())
    }

    /// Directory holding the venv's executables, the one prepended to PATH.
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        self.executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.folder.clone())
    }

    /// Lists packages installed in the venv via `pip list --format=json`.
    ///
    /// # Errors
    /// Returns an error when pip cannot be invoked or emits invalid JSON.
    pub fn list_packages(&self) -> Result<Vec<PythonPackage>> {
        let args = vec![
            "-m".to_string(),
            "pip".to_string(),
            "list".to_string(),
            "--format=json".to_string(),
        ];
        let exe = self.executable.to_string_lossy().to_string();
        let output = process::run_checked(&exe, &args, &[], &self.folder)?;
        serde_json::from_str(&output.stdout).context("invalid pip list payload")
    }

    /// Installs a requirements file into this venv. pip runs under the
    /// parent interpreter and is pointed at the venv with `--python`, so a
    /// venv created without pip can still receive packages.
    ///
    /// # Errors
    /// Returns an error when the pip invocation fails.
    pub fn install_requirements(&self, requirements: &Path, no_deps: bool) -> Result<()> {
        let mut args = vec![
            "-m".to_string(),
            "pip".to_string(),
            "--python".to_string(),
            self.executable.to_string_lossy().to_string(),
            "install".to_string(),
            "-r".to_string(),
            requirements.to_string_lossy().to_string(),
        ];
        if no_deps {
            args.push("--no-deps".to_string());
        }
        let exe = self.parent_executable.to_string_lossy().to_string();
        process::run_checked(&exe, &args, &[], &self.folder)?;
        Ok(())
    }
}

/// Creates a venv at `path` using the chosen runtime's own venv tooling.
///
/// pip bootstrapping is a secondary step run under the fresh venv's
/// interpreter, except for runtimes below the 3.9 floor (single-step
/// creation only) and graalpy, which bundles a pip that must not be
/// skipped.
///
/// # Errors
/// Returns [`Error::AlreadyExists`] when `path` exists (nothing is touched),
/// or a process error when the interpreter invocations fail.
pub fn create(
    python_exe: &Path,
    python_version: Option<&Version>,
    path: &Path,
    include_pip: bool,
    latest_pip: bool,
) -> Result<VEnv> {
    if path.exists() {
        return Err(Error::AlreadyExists(path.to_path_buf()).into());
    }

    let exe = python_exe.to_string_lossy().to_string();
    let target = path.to_string_lossy().to_string();
    let cwd = std::env::current_dir().context("working directory unavailable")?;

    let single_step = bundles_pip(python_exe) || below_bootstrap_floor(python_version);
    let mut args = vec!["-m".to_string(), "venv".to_string()];
    if include_pip {
        if !single_step {
            args.push("--without-pip".to_string());
        } else if latest_pip && below_bootstrap_floor(python_version) {
            args.push("--upgrade-deps".to_string());
        }
    } else {
        args.push("--without-pip".to_string());
    }
    args.push(target);
    process::run_checked(&exe, &args, &[], &cwd)?;

    let venv = VEnv::from_folder(&absolute(path))?;

    if include_pip && !single_step {
        bootstrap_pip(&venv, latest_pip)?;
    }
    Ok(venv)
}

fn bootstrap_pip(venv: &VEnv, latest_pip: bool) -> Result<()> {
    let exe = venv.executable.to_string_lossy().to_string();
    let ensure = vec![
        "-m".to_string(),
        "ensurepip".to_string(),
        "--default-pip".to_string(),
    ];
    process::run_checked(&exe, &ensure, &[], &venv.folder)?;
    if latest_pip {
        let upgrade = vec![
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
            "--upgrade".to_string(),
            "pip".to_string(),
        ];
        process::run_checked(&exe, &upgrade, &[], &venv.folder)?;
    }
    Ok(())
}

/// Best-effort recursive removal of a venv folder.
///
/// Missing entries and races with concurrent filesystem access are
/// tolerated silently.
pub fn delete(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("could not fully remove {}: {err}", path.display());
        }
    }
}

fn below_bootstrap_floor(version: Option<&Version>) -> bool {
    let Some(version) = version else {
        return false;
    };
    let floor = Version::from_str("3.9").expect("static version");
    *version < floor
}

fn bundles_pip(python_exe: &Path) -> bool {
    python_exe
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.starts_with("graalpy"))
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

pub(crate) fn venv_python(folder: &Path) -> PathBuf {
    if cfg!(windows) {
        folder.join("Scripts").join("python.exe")
    } else {
        folder.join("bin").join("python")
    }
}

fn python_in_home(home: &Path) -> PathBuf {
    if cfg!(windows) {
        home.join("python.exe")
    } else {
        home.join("python")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_cfg(folder: &Path, contents: &str) {
        fs::create_dir_all(folder).unwrap();
        fs::write(folder.join("pyvenv.cfg"), contents).unwrap();
    }

    #[test]
    fn reads_stdlib_style_cfg() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join(".venv");
        write_cfg(
            &root,
            "home = /usr/bin\ninclude-system-site-packages = false\nversion = 3.12.3\n",
        );

        let venv = VEnv::from_folder(&root).unwrap();
        assert_eq!(venv.version, "3.12.3");
        assert_eq!(venv.folder, root);
        assert_eq!(venv.parent_executable, PathBuf::from("/usr/bin/python"));
        assert!(venv.executable.starts_with(&root));
    }

    #[test]
    fn prefers_executable_key_for_parent() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("env");
        write_cfg(
            &root,
            "home = /opt/py/bin\nversion_info = 3.13.1\nexecutable = /opt/py/bin/python3.13\n",
        );

        let venv = VEnv::from_folder(&root).unwrap();
        assert_eq!(venv.version, "3.13.1");
        assert_eq!(
            venv.parent_executable,
            PathBuf::from("/opt/py/bin/python3.13")
        );
    }

    #[test]
    fn malformed_cfg_is_typed() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("broken");
        write_cfg(&root, "no venv fields at all\n");

        let err = VEnv::from_folder(&root).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::MalformedConfig(_))
        ));
    }

    #[test]
    fn create_refuses_existing_path_without_mutation() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("taken");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep.txt"), "data").unwrap();

        let err = create(Path::new("python3"), None, &target, true, false).unwrap_err();
        assert!(Error::is_already_exists(&err));
        assert_eq!(fs::read_to_string(target.join("keep.txt")).unwrap(), "data");
    }

    #[test]
    fn delete_tolerates_missing_path() {
        let dir = TempDir::new().unwrap();
        delete(&dir.path().join("never-created"));
    }

    #[test]
    fn graalpy_bundles_pip() {
        assert!(bundles_pip(Path::new("/opt/graalpy-24.1/bin/graalpy")));
        assert!(!bundles_pip(Path::new("/usr/bin/python3.12")));
    }

    #[test]
    fn bootstrap_floor_is_three_nine() {
        let old = Version::from_str("3.8.19").unwrap();
        let new = Version::from_str("3.9.0").unwrap();
        assert!(below_bootstrap_floor(Some(&old)));
        assert!(!below_bootstrap_floor(Some(&new)));
        assert!(!below_bootstrap_floor(None));
    }
}
