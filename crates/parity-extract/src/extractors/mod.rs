//! Route extractors for server source trees
//!
//! An extractor claims files by path and turns a batch of them into
//! [`ExtractedRoute`]s. Extractors see all their files at once so prefixes
//! and shared schemas can cross file boundaries.

use crate::error::{ExtractError, ExtractResult, ExtractWarning};
use parity_model::ExtractedRoute;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

mod typescript;

pub use typescript::TypeScriptExtractor;

/// Directories never descended into
const SKIP_DIRS: &[&str] = &["node_modules", "dist", "build", "coverage", "out", "vendor"];

/// One source file handed to an extractor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute or root-joined path
    pub path: PathBuf,
    /// File contents
    pub text: String,
}

/// Routes and warnings from one extraction run
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Recovered routes, in discovery order
    pub routes: Vec<ExtractedRoute>,
    /// Registrations that were skipped
    pub warnings: Vec<ExtractWarning>,
}

impl Extraction {
    /// Append another extraction
    pub fn merge(&mut self, other: Self) {
        self.routes.extend(other.routes);
        self.warnings.extend(other.warnings);
    }

    /// Keep the first registration of each `METHOD path` key
    pub fn dedupe(&mut self) {
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        let mut kept = Vec::with_capacity(self.routes.len());
        for route in std::mem::take(&mut self.routes) {
            let key = route.key();
            if let Some(&idx) = first_seen.get(&key) {
                let first: &ExtractedRoute = &kept[idx];
                self.warnings.push(ExtractWarning::new(
                    &route.source.file,
                    route.source.line,
                    format!("duplicate registration of {key} (first at {})", first.source),
                ));
                continue;
            }
            first_seen.insert(key, kept.len());
            kept.push(route);
        }
        self.routes = kept;
    }
}

/// Extractor trait for one family of source languages
///
/// Implement this trait to support another server framework language.
pub trait RouteSchemaExtractor: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Supported file extensions (without dot)
    fn extensions(&self) -> &[&str];

    /// Check if this extractor handles the given path
    fn can_extract(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions().contains(&ext))
    }

    /// Priority (higher = tried first when multiple extractors match)
    fn priority(&self) -> i32 {
        0
    }

    /// Extract routes from every claimed file under `root`
    ///
    /// # Errors
    ///
    /// Fails only when the extractor itself cannot run; per-registration
    /// problems become warnings.
    fn extract(&self, root: &Path, sources: &[SourceFile]) -> ExtractResult<Extraction>;
}

/// Ordered set of extractors
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn RouteSchemaExtractor>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field(
                "extractors",
                &self.extractors.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ExtractorRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Register an extractor
    pub fn register<E: RouteSchemaExtractor + 'static>(&mut self, extractor: E) {
        self.extractors.push(Box::new(extractor));
        self.extractors
            .sort_by_key(|e| std::cmp::Reverse(e.priority()));
    }

    /// First extractor claiming `path`
    #[must_use]
    pub fn find_for_path(&self, path: &Path) -> Option<&dyn RouteSchemaExtractor> {
        self.extractors
            .iter()
            .find(|e| e.can_extract(path))
            .map(|e| &**e)
    }

    /// Number of registered extractors
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    /// True when nothing is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Walk `root` and extract every route the registered extractors find
    ///
    /// Files are visited in path order, so the result is deterministic for a
    /// given tree. Duplicate `METHOD path` keys keep the first registration.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Root`] when `root` is not a readable
    /// directory and [`ExtractError::NoSources`] when no file is claimed.
    pub fn extract_tree(&self, root: &Path) -> ExtractResult<Extraction> {
        if !root.is_dir() {
            return Err(ExtractError::root(root, "not a directory"));
        }

        let mut batches: Vec<Vec<SourceFile>> = vec![Vec::new(); self.extractors.len()];
        let mut out = Extraction::default();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(root).to_path_buf();
                    warn!(path = %path.display(), error = %err, "unreadable entry");
                    out.warnings.push(ExtractWarning::new(path, 0, err.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(idx) = self
                .extractors
                .iter()
                .position(|e| e.can_extract(entry.path()))
            else {
                continue;
            };
            match std::fs::read_to_string(entry.path()) {
                Ok(text) => batches[idx].push(SourceFile {
                    path: entry.into_path(),
                    text,
                }),
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "unreadable source");
                    out.warnings
                        .push(ExtractWarning::new(entry.path(), 0, err.to_string()));
                }
            }
        }

        if batches.iter().all(Vec::is_empty) {
            return Err(ExtractError::NoSources(root.to_path_buf()));
        }

        for (extractor, sources) in self.extractors.iter().zip(&batches) {
            if sources.is_empty() {
                continue;
            }
            debug!(extractor = extractor.name(), files = sources.len(), "extracting");
            let part = extractor.extract(root, sources)?;
            info!(
                extractor = extractor.name(),
                files = sources.len(),
                routes = part.routes.len(),
                warnings = part.warnings.len(),
                "extraction finished"
            );
            out.merge(part);
        }
        out.dedupe();
        Ok(out)
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref())
}

/// Create default registry with built-in extractors
#[inline]
#[must_use]
pub fn default_extractors() -> ExtractorRegistry {
    let mut registry = ExtractorRegistry::new();
    registry.register(TypeScriptExtractor::new());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_model::HttpMethod;

    struct FixedExtractor;

    impl RouteSchemaExtractor for FixedExtractor {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn extensions(&self) -> &[&str] {
            &["routes"]
        }

        fn extract(&self, _root: &Path, sources: &[SourceFile]) -> ExtractResult<Extraction> {
            let routes = sources
                .iter()
                .flat_map(|s| s.text.lines())
                .map(|line| ExtractedRoute::new(HttpMethod::Get, line.trim()))
                .collect();
            Ok(Extraction {
                routes,
                warnings: Vec::new(),
            })
        }
    }

    #[test]
    fn extractor_claims_by_extension() {
        assert!(FixedExtractor.can_extract(Path::new("a/b.routes")));
        assert!(!FixedExtractor.can_extract(Path::new("a/b.ts")));
    }

    #[test]
    fn registry_orders_by_priority() {
        let mut registry = ExtractorRegistry::new();
        registry.register(FixedExtractor);
        registry.register(TypeScriptExtractor::new());
        assert_eq!(registry.len(), 2);
        let found = registry.find_for_path(Path::new("x.ts")).unwrap();
        assert_eq!(found.name(), "typescript");
        assert!(format!("{registry:?}").contains("typescript"));
    }

    #[test]
    fn tree_walk_skips_vendor_dirs_and_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.routes"), "/a\n/b\n").unwrap();
        std::fs::write(dir.path().join("b.routes"), "/b\n").unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/c.routes"), "/c\n").unwrap();

        let mut registry = ExtractorRegistry::new();
        registry.register(FixedExtractor);
        let out = registry.extract_tree(dir.path()).unwrap();
        let keys: Vec<_> = out.routes.iter().map(ExtractedRoute::key).collect();
        assert_eq!(keys, vec!["GET /a", "GET /b"]);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].message.contains("duplicate"));
    }

    #[test]
    fn missing_root_and_empty_tree_fail() {
        let registry = default_extractors();
        assert!(matches!(
            registry.extract_tree(Path::new("/definitely/not/here")),
            Err(ExtractError::Root { .. })
        ));
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            registry.extract_tree(dir.path()),
            Err(ExtractError::NoSources(_))
        ));
    }
}
