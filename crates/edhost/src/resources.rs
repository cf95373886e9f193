use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;

use crate::locked;

/// Prefix of every logical resource path.
pub const PACKAGES_PREFIX: &str = "Packages/";

/// Splits a `Packages/<package>/<relative>` logical path into its package
/// and relative components. Malformed paths yield `None` instead of an
/// error, so callers can treat them as simply not existing.
pub fn split_package_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix(PACKAGES_PREFIX)?;
    let (package, relative) = rest.split_once('/')?;
    if package.is_empty() || relative.is_empty() {
        return None;
    }
    Some((package, relative))
}

/// Read access to the host's package resources.
///
/// Logical paths take the `Packages/<package>/<relative>` form regardless
/// of where the host actually stores the files.
pub trait ResourceHost: Send + Sync {
    /// Every logical path whose file name is exactly `file_name`.
    fn find_resources(&self, file_name: &str) -> Vec<String>;

    /// Whether `relative` exists inside the package `package`.
    fn package_file_exists(&self, package: &str, relative: &str) -> bool;

    /// Reads `relative` from `package`, if present.
    fn read_package_file(&self, package: &str, relative: &str) -> Option<String>;

    /// Reads a `Packages/<package>/<relative>` logical path.
    fn load_resource(&self, path: &str) -> Result<String> {
        let (package, relative) = split_package_path(path)
            .ok_or_else(|| anyhow::anyhow!("不正なリソースパスです: {}", path))?;
        self.read_package_file(package, relative)
            .ok_or_else(|| anyhow::anyhow!("リソースが見つかりません: {}", path))
    }
}

/// In-memory resource index, keyed by logical path.
#[derive(Default)]
pub struct MemoryResources {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource under its logical path.
    pub fn add_file(&self, path: &str, contents: &str) {
        locked(&self.files).insert(path.to_string(), contents.to_string());
    }

    pub fn remove_file(&self, path: &str) {
        locked(&self.files).remove(path);
    }

    /// Drops every resource the package supplies, as if it were deleted.
    pub fn remove_package(&self, package: &str) {
        let prefix = format!("{}{}/", PACKAGES_PREFIX, package);
        locked(&self.files).retain(|path, _| !path.starts_with(&prefix));
    }
}

impl ResourceHost for MemoryResources {
    fn find_resources(&self, file_name: &str) -> Vec<String> {
        locked(&self.files)
            .keys()
            .filter(|path| path.rsplit('/').next() == Some(file_name))
            .cloned()
            .collect()
    }

    fn package_file_exists(&self, package: &str, relative: &str) -> bool {
        let path = format!("{}{}/{}", PACKAGES_PREFIX, package, relative);
        locked(&self.files).contains_key(&path)
    }

    fn read_package_file(&self, package: &str, relative: &str) -> Option<String> {
        let path = format!("{}{}/{}", PACKAGES_PREFIX, package, relative);
        locked(&self.files).get(&path).cloned()
    }
}

/// Resource index over a `Packages/` directory on disk.
///
/// Each immediate subdirectory of the root is a package; logical paths map
/// directly onto files below it.
pub struct DiskResources {
    root: PathBuf,
}

impl DiskResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Relative paths must stay inside their package directory
    fn checked_relative(relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative);
        if relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            Some(relative.to_path_buf())
        } else {
            None
        }
    }

    fn collect_matches(&self, dir: &Path, package: &str, file_name: &str, found: &mut Vec<String>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.collect_matches(&path, package, file_name, found);
            } else if entry.file_name().to_string_lossy() == file_name {
                if let Ok(relative) = path.strip_prefix(self.root.join(package)) {
                    found.push(format!(
                        "{}{}/{}",
                        PACKAGES_PREFIX,
                        package,
                        relative.to_string_lossy().replace('\\', "/")
                    ));
                }
            }
        }
    }
}

impl ResourceHost for DiskResources {
    fn find_resources(&self, file_name: &str) -> Vec<String> {
        let mut found = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return found,
        };

        let mut packages: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        // Directory iteration order is platform-dependent
        packages.sort();

        for package in packages {
            self.collect_matches(&self.root.join(&package), &package, file_name, &mut found);
        }
        found
    }

    fn package_file_exists(&self, package: &str, relative: &str) -> bool {
        match Self::checked_relative(relative) {
            Some(relative) => self.root.join(package).join(relative).is_file(),
            None => false,
        }
    }

    fn read_package_file(&self, package: &str, relative: &str) -> Option<String> {
        let relative = Self::checked_relative(relative)?;
        fs::read_to_string(self.root.join(package).join(relative)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_package_path() {
        assert_eq!(
            split_package_path("Packages/Foo/x.tmLanguage"),
            Some(("Foo", "x.tmLanguage"))
        );
        assert_eq!(
            split_package_path("Packages/Foo/sub/dir/scheme.tmTheme"),
            Some(("Foo", "sub/dir/scheme.tmTheme"))
        );
        assert_eq!(split_package_path("NotPackages/x"), None);
        assert_eq!(split_package_path("Packages/Foo"), None);
        assert_eq!(split_package_path("Packages//x"), None);
        assert_eq!(split_package_path("Packages/Foo/"), None);
    }

    #[test]
    fn test_memory_resources_find_by_file_name() {
        let resources = MemoryResources::new();
        resources.add_file("Packages/A/Mariana.sublime-color-scheme", "{}");
        resources.add_file("Packages/B/schemes/Mariana.sublime-color-scheme", "{}");
        resources.add_file("Packages/C/Mariana.txt", "");

        let found = resources.find_resources("Mariana.sublime-color-scheme");
        assert_eq!(
            found,
            vec![
                "Packages/A/Mariana.sublime-color-scheme".to_string(),
                "Packages/B/schemes/Mariana.sublime-color-scheme".to_string(),
            ]
        );
    }

    #[test]
    fn test_memory_resources_remove_package() {
        let resources = MemoryResources::new();
        resources.add_file("Packages/A/Mariana.tmTheme", "");
        resources.add_file("Packages/AB/Mariana.tmTheme", "");
        resources.remove_package("A");

        assert!(!resources.package_file_exists("A", "Mariana.tmTheme"));
        assert!(resources.package_file_exists("AB", "Mariana.tmTheme"));
    }

    #[test]
    fn test_load_resource_rejects_malformed_path() {
        let resources = MemoryResources::new();
        assert!(resources.load_resource("NotPackages/x").is_err());
    }

    #[test]
    fn test_disk_resources_find_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("Theme - Default")).unwrap();
        std::fs::create_dir_all(root.join("User/nested")).unwrap();
        std::fs::write(root.join("Theme - Default/Default.sublime-theme"), "{}").unwrap();
        std::fs::write(root.join("User/nested/Default.sublime-theme"), "{}").unwrap();

        let resources = DiskResources::new(root);
        let found = resources.find_resources("Default.sublime-theme");
        assert_eq!(
            found,
            vec![
                "Packages/Theme - Default/Default.sublime-theme".to_string(),
                "Packages/User/nested/Default.sublime-theme".to_string(),
            ]
        );

        assert!(resources.package_file_exists("User", "nested/Default.sublime-theme"));
        assert_eq!(
            resources.read_package_file("Theme - Default", "Default.sublime-theme"),
            Some("{}".to_string())
        );
    }

    #[test]
    fn test_disk_resources_reject_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("Packages");
        std::fs::create_dir_all(root.join("A")).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "secret").unwrap();

        let resources = DiskResources::new(&root);
        assert!(!resources.package_file_exists("A", "../../secret.txt"));
        assert_eq!(resources.read_package_file("A", "../../secret.txt"), None);
    }
}
