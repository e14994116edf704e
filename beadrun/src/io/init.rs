//! Initialization helpers for `.beads/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::{RunConfig, write_config};
use crate::io::file_store::write_bead_set;
use crate::io::store::BeadSet;

const BEADS_GITIGNORE: &str = "cancel\n*.tmp\n*.lock\n";

/// All canonical paths within `.beads/` for a project root.
#[derive(Debug, Clone)]
pub struct BeadsPaths {
    pub root: PathBuf,
    pub beads_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub store_path: PathBuf,
    pub config_path: PathBuf,
    /// Creating this file asks a running scheduler to stop gracefully.
    pub cancel_flag_path: PathBuf,
}

impl BeadsPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let beads_dir = root.join(".beads");
        Self {
            root: root.clone(),
            beads_dir: beads_dir.clone(),
            gitignore_path: beads_dir.join(".gitignore"),
            store_path: beads_dir.join("beads.json"),
            config_path: beads_dir.join("config.toml"),
            cancel_flag_path: beads_dir.join("cancel"),
        }
    }
}

/// Options for `init_beads`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing config and bead document.
    pub force: bool,
}

/// Create `.beads/` scaffolding in `root`.
///
/// Fails if `.beads/` already exists unless `options.force` is set.
pub fn init_beads(root: &Path, options: &InitOptions) -> Result<BeadsPaths> {
    let paths = BeadsPaths::new(root);
    if paths.beads_dir.exists() && !options.force {
        return Err(anyhow!(
            "beadrun init: .beads already exists (use --force to overwrite)"
        ));
    }
    if paths.beads_dir.exists() && !paths.beads_dir.is_dir() {
        return Err(anyhow!("beadrun init: .beads exists but is not a directory"));
    }

    fs::create_dir_all(&paths.beads_dir)
        .with_context(|| format!("create {}", paths.beads_dir.display()))?;
    fs::write(&paths.gitignore_path, BEADS_GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &RunConfig::default())?;
    write_bead_set(&paths.store_path, &BeadSet::default())?;

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;
    use crate::io::file_store::load_bead_set;

    #[test]
    fn init_creates_config_and_empty_store() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_beads(temp.path(), &InitOptions { force: false }).expect("init");

        assert_eq!(load_config(&paths.config_path).expect("config"), RunConfig::default());
        assert_eq!(load_bead_set(&paths.store_path).expect("store"), BeadSet::default());
        assert!(paths.gitignore_path.exists());
    }

    #[test]
    fn init_refuses_to_clobber_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_beads(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_beads(temp.path(), &InitOptions { force: false }).expect_err("exists");
        assert!(err.to_string().contains("already exists"));
        init_beads(temp.path(), &InitOptions { force: true }).expect("force init");
    }
}
