//! Header File Resolver
//!
//! Resolves `#include` paths against an ordered list of search directories,
//! and provides the search directories themselves through a
//! [`SearchPathProvider`] so SDK discovery stays outside the core.

use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::directive::IncludeSpec;
use hdrbind_core::{Error, Result};

/// Source of include search directories
pub trait SearchPathProvider {
    /// Ordered list of directories; earlier entries win
    fn provide_search_paths(&self) -> Result<Vec<PathBuf>>;
}

/// Search paths supplied directly by the caller
#[derive(Debug, Clone, Default)]
pub struct StaticSearchPaths {
    paths: Vec<PathBuf>,
}

impl StaticSearchPaths {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl SearchPathProvider for StaticSearchPaths {
    fn provide_search_paths(&self) -> Result<Vec<PathBuf>> {
        Ok(self.paths.clone())
    }
}

/// Include directories of an installed Windows SDK.
///
/// Expects the `Windows Kits/10` layout: `Include/<version>/{um,shared,ucrt,winrt}`.
/// The highest version directory wins.
#[derive(Debug, Clone)]
pub struct SdkIncludeScan {
    root: PathBuf,
}

/// Subdirectories searched, in order
const SDK_SUBDIRS: &[&str] = &["um", "shared", "ucrt", "winrt"];

impl SdkIncludeScan {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn latest_version_dir(&self) -> Option<PathBuf> {
        let include = self.root.join("Include");
        WalkDir::new(&include)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.into_path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with(|c: char| c.is_ascii_digit()))
            })
            .max_by_key(|p| version_key(p))
    }
}

/// Numeric ordering for `10.0.19041.0` style directory names
fn version_key(path: &Path) -> Vec<u64> {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect()
}

impl SearchPathProvider for SdkIncludeScan {
    fn provide_search_paths(&self) -> Result<Vec<PathBuf>> {
        let version_dir = self
            .latest_version_dir()
            .ok_or_else(|| Error::Config(format!("no SDK include directory under {}", self.root.display())))?;
        info!("Using SDK headers from {}", version_dir.display());

        Ok(SDK_SUBDIRS
            .iter()
            .map(|sub| version_dir.join(sub))
            .filter(|p| p.is_dir())
            .collect())
    }
}

/// Header file resolver
#[derive(Debug, Clone)]
pub struct HeaderResolver {
    /// Include search paths
    include_paths: Vec<PathBuf>,
}

impl HeaderResolver {
    /// Create a resolver. An empty list, or a directory that cannot be
    /// read, is fatal for the run.
    pub fn new(include_paths: Vec<PathBuf>) -> Result<Self> {
        if include_paths.is_empty() {
            return Err(Error::NoSearchPaths);
        }
        let mut resolver = Self {
            include_paths: Vec::with_capacity(include_paths.len()),
        };
        for path in include_paths {
            std::fs::read_dir(&path).map_err(|e| Error::fatal_io(&path, e))?;
            resolver.add_include_path(path);
        }
        Ok(resolver)
    }

    /// Create a resolver from a provider
    pub fn from_provider(provider: &dyn SearchPathProvider) -> Result<Self> {
        Self::new(provider.provide_search_paths()?)
    }

    /// Add an include path
    pub fn add_include_path(&mut self, path: PathBuf) {
        if !self.include_paths.contains(&path) {
            self.include_paths.push(path);
        }
    }

    /// Get all include paths
    pub fn include_paths(&self) -> &[PathBuf] {
        &self.include_paths
    }

    /// Resolve an include directive issued from `from_file`.
    ///
    /// Quoted includes try the including header's directory first. Both
    /// forms then search the include paths in order.
    pub fn resolve(&self, spec: &IncludeSpec, from_file: &Path) -> Option<PathBuf> {
        let (header, quoted) = match spec {
            IncludeSpec::Quoted(h) => (h.as_str(), true),
            IncludeSpec::System(h) => (h.as_str(), false),
            IncludeSpec::Computed(_) => return None,
        };

        if quoted {
            if let Some(parent) = from_file.parent() {
                let relative_path = parent.join(header);
                if relative_path.is_file() {
                    debug!("Resolved {} relative to {:?}", header, from_file);
                    return Some(relative_path);
                }
            }
        }

        for include_path in &self.include_paths {
            let full_path = include_path.join(header);
            if full_path.is_file() {
                debug!("Resolved {} in {:?}", header, include_path);
                return Some(full_path);
            }
        }

        // Windows headers are spelled case-insensitively
        for include_path in &self.include_paths {
            if let Some(found) = find_case_insensitive(include_path, header) {
                debug!("Resolved {} case-insensitively in {:?}", header, include_path);
                return Some(found);
            }
        }

        debug!("Failed to resolve header: {}", header);
        None
    }
}

/// Look up a single-component header name ignoring ASCII case
fn find_case_insensitive(dir: &Path, header: &str) -> Option<PathBuf> {
    if header.contains(['/', '\\']) {
        return None;
    }
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.eq_ignore_ascii_case(header))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_sdk_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        for version in ["10.0.17763.0", "10.0.19041.0", "10.0.9600.0"] {
            fs::create_dir_all(root.join("Include").join(version).join("um")).unwrap();
            fs::create_dir_all(root.join("Include").join(version).join("shared")).unwrap();
        }
        fs::write(root.join("Include/10.0.19041.0/um/fileapi.h"), "// fileapi").unwrap();
        fs::write(root.join("Include/10.0.19041.0/shared/minwindef.h"), "// minwindef").unwrap();

        temp
    }

    #[test]
    fn test_sdk_scan_picks_latest_version() {
        let temp = create_sdk_tree();
        let paths = SdkIncludeScan::new(temp.path()).provide_search_paths().unwrap();

        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("10.0.19041.0/um"));
        assert!(paths[1].ends_with("10.0.19041.0/shared"));
    }

    #[test]
    fn test_sdk_scan_without_include_dir() {
        let temp = TempDir::new().unwrap();
        assert!(SdkIncludeScan::new(temp.path()).provide_search_paths().is_err());
    }

    #[test]
    fn test_resolve_in_order() {
        let temp = create_sdk_tree();
        let provider = SdkIncludeScan::new(temp.path());
        let resolver = HeaderResolver::from_provider(&provider).unwrap();
        let from = temp.path().join("entry.h");

        let resolved = resolver
            .resolve(&IncludeSpec::System("minwindef.h".into()), &from)
            .unwrap();
        assert!(resolved.ends_with("shared/minwindef.h"));

        assert!(resolver
            .resolve(&IncludeSpec::System("missing.h".into()), &from)
            .is_none());
    }

    #[test]
    fn test_quoted_prefers_including_directory() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("local");
        let search = temp.path().join("search");
        fs::create_dir_all(&local).unwrap();
        fs::create_dir_all(&search).unwrap();
        fs::write(local.join("common.h"), "// local").unwrap();
        fs::write(search.join("common.h"), "// search").unwrap();

        let resolver = HeaderResolver::new(vec![search.clone()]).unwrap();
        let from = local.join("entry.h");

        let quoted = resolver
            .resolve(&IncludeSpec::Quoted("common.h".into()), &from)
            .unwrap();
        assert_eq!(quoted, local.join("common.h"));

        let system = resolver
            .resolve(&IncludeSpec::System("common.h".into()), &from)
            .unwrap();
        assert_eq!(system, search.join("common.h"));
    }

    #[test]
    fn test_case_insensitive_fallback() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("WinDef.h"), "// windef").unwrap();
        let resolver = HeaderResolver::new(vec![temp.path().to_path_buf()]).unwrap();

        let resolved = resolver
            .resolve(&IncludeSpec::System("windef.h".into()), &temp.path().join("x.h"))
            .unwrap();
        let name = resolved.file_name().unwrap().to_str().unwrap();
        assert!(name.eq_ignore_ascii_case("windef.h"));
    }

    #[test]
    fn test_fatal_search_paths() {
        assert!(matches!(HeaderResolver::new(vec![]), Err(Error::NoSearchPaths)));

        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("does-not-exist");
        assert!(matches!(
            HeaderResolver::new(vec![missing]),
            Err(Error::FatalIo { .. })
        ));
    }
}
