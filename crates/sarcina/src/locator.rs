use std::collections::BTreeSet;

use edhost::{split_package_path, ResourceHost};

/// Extensions a color scheme may use. Legacy and modern formats coexist
/// and a file in either format counts toward the owning set.
const COLOR_SCHEME_EXTENSIONS: [&str; 2] = [".sublime-color-scheme", ".tmTheme"];

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn bare_name(path: &str) -> &str {
    let file_name = file_name(path);
    match file_name.rfind('.') {
        Some(dot) => &file_name[..dot],
        None => file_name,
    }
}

fn owners_of(resources: &dyn ResourceHost, file_name: &str) -> BTreeSet<String> {
    let mut owners = BTreeSet::new();
    for path in resources.find_resources(file_name) {
        if let Some((package, _)) = split_package_path(&path) {
            owners.insert(package.to_string());
        }
    }
    owners
}

/// Finds every package currently supplying a color scheme with the same
/// bare name as `path`, in either format.
///
/// Returns the bare name and the owning packages, e.g.
/// `("Mariana", {"Color Scheme - Default", "User"})`.
pub fn find_color_scheme_packages(
    resources: &dyn ResourceHost,
    path: &str,
) -> (String, BTreeSet<String>) {
    let name = bare_name(path);
    let mut owners = BTreeSet::new();
    for extension in COLOR_SCHEME_EXTENSIONS {
        owners.extend(owners_of(resources, &format!("{}{}", name, extension)));
    }
    (name.to_string(), owners)
}

/// Finds every package currently supplying a theme with the exact file
/// name of `path`.
///
/// Theme files are named uniquely per format revision, so the full file
/// name is matched rather than the bare name.
pub fn find_theme_packages(
    resources: &dyn ResourceHost,
    path: &str,
) -> (String, BTreeSet<String>) {
    let owners = owners_of(resources, file_name(path));
    (bare_name(path).to_string(), owners)
}

/// Whether a `Packages/<package>/<relative>` path resolves to an existing
/// file. Malformed paths are treated as non-existent rather than errors.
pub fn resource_exists(resources: &dyn ResourceHost, path: &str) -> bool {
    match split_package_path(path) {
        Some((package, relative)) => resources.package_file_exists(package, relative),
        None => false,
    }
}
