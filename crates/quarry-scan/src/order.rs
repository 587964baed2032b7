//! The ordered, de-duplicated classpath under construction.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::{LoaderRef, ScanLog};

/// A user-supplied element filter; returning `false` rejects the resolved
/// element string.
pub type ElementFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// One normalised entry in the ordered classpath.
///
/// Equality and hashing use the resolved string only, so the same element
/// reached through different raw spellings occupies one slot.
pub struct ClasspathElement {
    raw: String,
    resolved: String,
    loaders: Vec<LoaderRef>,
    file: OnceLock<PathBuf>,
    canonical: OnceLock<PathBuf>,
}

impl ClasspathElement {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The resolved string; may contain `!` nested-archive separators.
    pub fn resolved(&self) -> &str {
        &self.resolved
    }

    /// Classloaders this element originated from, in discovery order.
    pub fn loaders(&self) -> &[LoaderRef] {
        &self.loaders
    }

    /// The physical file backing this element, once materialised.
    pub fn file(&self) -> Option<&Path> {
        self.file.get().map(PathBuf::as_path)
    }

    pub fn canonical_path(&self) -> Option<&Path> {
        self.canonical.get().map(PathBuf::as_path)
    }

    pub(crate) fn set_file(&self, path: PathBuf) {
        let _ = self.file.set(path);
    }

    pub(crate) fn set_canonical(&self, path: PathBuf) {
        let _ = self.canonical.set(path);
    }
}

impl PartialEq for ClasspathElement {
    fn eq(&self, other: &Self) -> bool {
        self.resolved == other.resolved
    }
}

impl Eq for ClasspathElement {}

impl Hash for ClasspathElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resolved.hash(state);
    }
}

impl std::fmt::Debug for ClasspathElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClasspathElement")
            .field("raw", &self.raw)
            .field("resolved", &self.resolved)
            .field("loaders", &self.loaders.len())
            .finish()
    }
}

/// String-ish input for [`ClasspathOrderBuilder::add_any`], covering the
/// shapes reflective interop produces: a single string, or arbitrarily
/// nested collections of strings.
pub enum ElementSource {
    One(String),
    Many(Vec<ElementSource>),
}

impl From<&str> for ElementSource {
    fn from(value: &str) -> Self {
        ElementSource::One(value.to_string())
    }
}

impl From<String> for ElementSource {
    fn from(value: String) -> Self {
        ElementSource::One(value)
    }
}

impl From<Vec<String>> for ElementSource {
    fn from(values: Vec<String>) -> Self {
        ElementSource::Many(values.into_iter().map(ElementSource::One).collect())
    }
}

/// Accumulates classpath elements from handlers, manifests, wildcard
/// directories and system properties into a single ordered, duplicate-free
/// sequence. Iteration order is first-insertion order.
pub struct ClasspathOrderBuilder {
    base_path: Option<String>,
    filters: Arc<Vec<ElementFilter>>,
    log: ScanLog,
    elements: Vec<Arc<ClasspathElement>>,
    seen: HashSet<String>,
}

impl ClasspathOrderBuilder {
    pub fn new(log: ScanLog) -> Self {
        Self {
            base_path: None,
            filters: Arc::new(Vec::new()),
            log,
            elements: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Relative elements resolve against this path.
    pub fn with_base_path(mut self, base: impl Into<String>) -> Self {
        self.base_path = Some(base.into());
        self
    }

    pub fn with_filters(mut self, filters: Arc<Vec<ElementFilter>>) -> Self {
        self.filters = filters;
        self
    }

    /// Add one element. Returns `false` for empty, filtered and duplicate
    /// elements.
    pub fn add(&mut self, raw: &str, loaders: &[LoaderRef]) -> bool {
        let raw = raw.trim();
        if raw.is_empty() {
            return false;
        }

        // `X/*` means every file in directory X; a bare `*` means `./*`.
        if raw == "*" {
            return self.add_wildcard(Path::new("."), loaders);
        }
        if let Some(dir) = raw.strip_suffix("/*").or_else(|| raw.strip_suffix("\\*")) {
            return self.add_wildcard(Path::new(dir), loaders);
        }

        let resolved = quarry_path::resolve(self.base_path.as_deref(), raw);
        if resolved.is_empty() {
            return false;
        }
        for filter in self.filters.iter() {
            if !filter(&resolved) {
                self.log
                    .log(format_args!("classpath element filtered out: {resolved}"));
                return false;
            }
        }
        if self.seen.contains(&resolved) {
            self.log
                .log(format_args!("duplicate classpath element: {resolved}"));
            return false;
        }

        self.seen.insert(resolved.clone());
        self.elements.push(Arc::new(ClasspathElement {
            raw: raw.to_string(),
            resolved,
            loaders: loaders.to_vec(),
            file: OnceLock::new(),
            canonical: OnceLock::new(),
        }));
        true
    }

    fn add_wildcard(&mut self, dir: &Path, loaders: &[LoaderRef]) -> bool {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                self.log.error(
                    format_args!("cannot list wildcard directory {}", dir.display()),
                    &err,
                );
                return false;
            }
        };
        let mut any = false;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == "." || name == ".." {
                continue;
            }
            let path = entry.path();
            if path.is_file() {
                any |= self.add(&path.to_string_lossy(), loaders);
            }
        }
        any
    }

    /// Split `list` on the platform path separator (URL-aware on `:`
    /// platforms) and add every part.
    pub fn add_delimited(&mut self, list: &str, loaders: &[LoaderRef]) -> bool {
        let mut any = false;
        for part in quarry_path::split_path_list(list) {
            any |= self.add(part, loaders);
        }
        any
    }

    pub fn add_any(&mut self, source: &ElementSource, loaders: &[LoaderRef]) -> bool {
        match source {
            ElementSource::One(value) => self.add(value, loaders),
            ElementSource::Many(values) => {
                let mut any = false;
                for value in values {
                    any |= self.add_any(value, loaders);
                }
                any
            }
        }
    }

    /// Append another order after this one, dropping duplicates.
    pub fn merge(&mut self, other: ClasspathOrderBuilder) {
        for element in other.elements {
            if self.seen.insert(element.resolved().to_string()) {
                self.elements.push(element);
            } else {
                self.log.log(format_args!(
                    "duplicate classpath element: {}",
                    element.resolved()
                ));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements in first-insertion order.
    pub fn elements(&self) -> &[Arc<ClasspathElement>] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<Arc<ClasspathElement>> {
        self.elements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ClasspathOrderBuilder {
        ClasspathOrderBuilder::new(ScanLog::silent())
    }

    #[test]
    fn rejects_empty_and_duplicate_elements() {
        let mut order = builder();
        assert!(!order.add("", &[]));
        assert!(!order.add("   ", &[]));
        assert!(order.add("/a/b.jar", &[]));
        assert!(!order.add("/a/b.jar", &[]));
        // Different spelling, same resolved string.
        assert!(!order.add("file:///a/b.jar", &[]));
        assert_eq!(order.len(), 1);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut order = builder();
        order.add_delimited("/z.jar:/a.jar:/m.jar", &[]);
        let resolved: Vec<&str> = order.elements().iter().map(|e| e.resolved()).collect();
        assert_eq!(resolved, vec!["/z.jar", "/a.jar", "/m.jar"]);
    }

    #[test]
    fn filters_reject_before_insertion() {
        let filters: Arc<Vec<ElementFilter>> =
            Arc::new(vec![Box::new(|resolved: &str| !resolved.ends_with(".zip"))]);
        let mut order = builder().with_filters(filters);
        assert!(order.add("/keep.jar", &[]));
        assert!(!order.add("/drop.zip", &[]));
        assert_eq!(order.len(), 1);
    }

    #[test]
    fn base_path_applies_to_relative_elements() {
        let mut order = builder().with_base_path("/base");
        order.add("lib/a.jar", &[]);
        assert_eq!(order.elements()[0].resolved(), "/base/lib/a.jar");
    }

    #[test]
    fn merge_appends_without_duplicates() {
        let mut first = builder();
        first.add("/a.jar", &[]);
        first.add("/b.jar", &[]);

        let mut second = builder();
        second.add("/b.jar", &[]);
        second.add("/c.jar", &[]);

        first.merge(second);
        let resolved: Vec<&str> = first.elements().iter().map(|e| e.resolved()).collect();
        assert_eq!(resolved, vec!["/a.jar", "/b.jar", "/c.jar"]);
    }

    #[test]
    fn add_any_flattens_nested_sources() {
        let mut order = builder();
        let source = ElementSource::Many(vec![
            ElementSource::from("/a.jar"),
            ElementSource::from(vec!["/b.jar".to_string(), "/c.jar".to_string()]),
        ]);
        assert!(order.add_any(&source, &[]));
        assert_eq!(order.len(), 3);
    }
}
