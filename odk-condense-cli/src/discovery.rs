//! Instance discovery
//!
//! ODK Briefcase stores pulled submissions as
//! `<storage>/ODK Briefcase Storage/forms/<form title>/instances/<instance id>/`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const BRIEFCASE_STORAGE: &str = "ODK Briefcase Storage";

/// Directory holding one subdirectory per instance
///
/// With `literal`, the storage directory is the instances directory itself.
/// Otherwise the form title names the Briefcase form folder.
pub fn instances_dir(storage: &Path, form_title: Option<&str>, literal: bool) -> Result<PathBuf> {
    match (form_title, literal) {
        (_, true) => Ok(storage.to_path_buf()),
        (Some(title), false) => Ok(storage
            .join(BRIEFCASE_STORAGE)
            .join("forms")
            .join(title)
            .join("instances")),
        (None, false) => anyhow::bail!(
            "Cannot locate instances under {:?} without a form title; use --storage-literal",
            storage
        ),
    }
}

/// Instance directories under `dir`, sorted by name
pub fn discover_instances(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).with_context(|| {
        format!(
            "Unable to find ODK instances directory: {:?}. Check --storage-directory and --storage-literal",
            dir
        )
    })?;

    let mut instances = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {:?}", dir))?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type()?.is_dir() {
            instances.push(entry.path());
        }
    }
    instances.sort();

    log::debug!("Discovered {} instance(s) in {:?}", instances.len(), dir);
    Ok(instances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_briefcase_layout() {
        let dir = instances_dir(Path::new("/data"), Some("Household"), false).unwrap();
        assert_eq!(
            dir,
            PathBuf::from("/data/ODK Briefcase Storage/forms/Household/instances")
        );
        assert_eq!(
            instances_dir(Path::new("/data"), Some("Household"), true).unwrap(),
            PathBuf::from("/data")
        );
        assert_eq!(
            instances_dir(Path::new("/data"), None, true).unwrap(),
            PathBuf::from("/data")
        );
        assert!(instances_dir(Path::new("/data"), None, false).is_err());
    }

    #[test]
    fn test_discover_sorted_directories() {
        let root = TempDir::new().unwrap();
        for name in ["uuidc", "uuida", "uuidb", ".hidden"] {
            std::fs::create_dir(root.path().join(name)).unwrap();
        }
        std::fs::write(root.path().join("stray.txt"), "x").unwrap();

        let found = discover_instances(root.path()).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["uuida", "uuidb", "uuidc"]);
    }

    #[test]
    fn test_missing_instances_dir() {
        let root = TempDir::new().unwrap();
        assert!(discover_instances(&root.path().join("nope")).is_err());
    }
}
