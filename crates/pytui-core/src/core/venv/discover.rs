use std::{
    collections::{HashSet, VecDeque},
    fs,
    path::{Path, PathBuf},
};

use super::VEnv;

/// Lazily discovers virtual environments around `base_dir`.
///
/// `recursive` walks subdirectories; `search_parents` additionally inspects
/// every ancestor folder up to the filesystem root. Results are deduplicated
/// by canonical folder path regardless of which direction found them first,
/// and folders with an unreadable or malformed `pyvenv.cfg` are skipped.
///
/// The iterator is finite and restartable: each call builds a fresh scan.
pub fn discover(base_dir: &Path, recursive: bool, search_parents: bool) -> DiscoveredVenvs {
    let mut scan_queue = VecDeque::new();
    let walker = if recursive {
        Some(walkdir::WalkDir::new(base_dir).follow_links(false).into_iter())
    } else {
        scan_queue.push_back(base_dir.to_path_buf());
        None
    };
    if search_parents {
        for ancestor in base_dir.ancestors().skip(1) {
            scan_queue.push_back(ancestor.to_path_buf());
        }
    }
    DiscoveredVenvs {
        walker,
        candidates: VecDeque::new(),
        scan_queue,
        seen: HashSet::new(),
    }
}

pub struct DiscoveredVenvs {
    walker: Option<walkdir::IntoIter>,
    candidates: VecDeque<PathBuf>,
    scan_queue: VecDeque<PathBuf>,
    seen: HashSet<PathBuf>,
}

impl DiscoveredVenvs {
    fn check_candidate(&mut self, folder: &Path) -> Option<VEnv> {
        let cfg = folder.join("pyvenv.cfg");
        if !cfg.is_file() {
            return None;
        }
        let canonical = folder.canonicalize().unwrap_or_else(|_| folder.to_path_buf());
        if !self.seen.insert(canonical.clone()) {
            return None;
        }
        match VEnv::from_cfg(&canonical.join("pyvenv.cfg")) {
            Ok(venv) => Some(venv),
            Err(err) => {
                tracing::debug!("skipping {}: {err}", folder.display());
                None
            }
        }
    }
}

impl Iterator for DiscoveredVenvs {
    type Item = VEnv;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(folder) = self.candidates.pop_front() {
                if let Some(venv) = self.check_candidate(&folder) {
                    return Some(venv);
                }
                continue;
            }

            if let Some(walker) = self.walker.as_mut() {
                match walker.next() {
                    Some(Ok(entry)) => {
                        if entry.file_type().is_file()
                            && entry.file_name().to_str() == Some("pyvenv.cfg")
                        {
                            if let Some(folder) = entry.path().parent() {
                                self.candidates.push_back(folder.to_path_buf());
                            }
                        }
                    }
                    Some(Err(err)) => {
                        tracing::debug!("walk error: {err}");
                    }
                    None => {
                        self.walker = None;
                    }
                }
                continue;
            }

            let dir = self.scan_queue.pop_front()?;
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    self.candidates.push_back(path);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_venv(folder: &Path) {
        fs::create_dir_all(folder).unwrap();
        fs::write(
            folder.join("pyvenv.cfg"),
            "home = /usr/bin\nversion = 3.12.1\n",
        )
        .unwrap();
    }

    #[test]
    fn finds_project_root_venv_once_from_nested_folder() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("project");
        let nested = project.join("src").join("app");
        fs::create_dir_all(&nested).unwrap();
        make_venv(&project.join(".venv"));
        make_venv(&nested.join(".venv"));

        let found: Vec<VEnv> = discover(&nested, false, true).collect();
        let root_venv = project.join(".venv").canonicalize().unwrap();
        let hits = found.iter().filter(|v| v.folder == root_venv).count();
        assert_eq!(hits, 1);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn recursive_walk_reaches_deep_venvs() {
        let dir = TempDir::new().unwrap();
        let deep = dir.path().join("a").join("b").join("c");
        make_venv(&deep.join("env"));

        let found: Vec<VEnv> = discover(dir.path(), true, false).collect();
        assert_eq!(found.len(), 1);
        assert!(found[0].folder.ends_with("env"));
    }

    #[test]
    fn malformed_configs_are_excluded() {
        let dir = TempDir::new().unwrap();
        make_venv(&dir.path().join("good"));
        let bad = dir.path().join("bad");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join("pyvenv.cfg"), "not a venv config\n").unwrap();

        let found: Vec<VEnv> = discover(dir.path(), false, false).collect();
        assert_eq!(found.len(), 1);
        assert!(found[0].folder.ends_with("good"));
    }

    #[test]
    fn discovery_is_restartable() {
        let dir = TempDir::new().unwrap();
        make_venv(&dir.path().join(".venv"));

        let first: Vec<VEnv> = discover(dir.path(), false, false).collect();
        let second: Vec<VEnv> = discover(dir.path(), false, false).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }
}
