use edhost::ResourceHost;
use serde::Deserialize;

/// File a package installer writes next to the package contents.
pub const METADATA_FILE: &str = "package-metadata.json";

/// Version reported when a package has no readable metadata.
pub const UNKNOWN_VERSION: &str = "unknown version";

/// The slice of the metadata file consumed here; installers write more
/// fields, which deserialization ignores.
#[derive(Debug, Deserialize)]
struct PackageMetadata {
    #[serde(default)]
    version: Option<String>,
}

/// Resolves the installed version of `package` from its metadata file.
///
/// A missing file, unreadable JSON or an absent field all degrade to
/// [`UNKNOWN_VERSION`]; a package without metadata is not an error.
pub fn package_version(resources: &dyn ResourceHost, package: &str) -> String {
    let metadata_json = match resources.read_package_file(package, METADATA_FILE) {
        Some(metadata_json) => metadata_json,
        None => return UNKNOWN_VERSION.to_string(),
    };

    match serde_json::from_str::<PackageMetadata>(&metadata_json) {
        Ok(PackageMetadata {
            version: Some(version),
        }) => version,
        Ok(_) => {
            log::warn!("Package metadata for {} has no version field", package);
            UNKNOWN_VERSION.to_string()
        }
        Err(e) => {
            log::warn!("Failed to parse package metadata for {}: {}", package, e);
            UNKNOWN_VERSION.to_string()
        }
    }
}
