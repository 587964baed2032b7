//! The canonicalised view of an archive: multi-release masking and
//! repackaged-framework layouts.

use std::cmp::Reverse;
use std::collections::HashSet;

use crate::directory::LogicalArchive;

/// The logical version of entries outside `META-INF/versions/`.
pub const BASE_VERSION: u32 = 8;

const VERSIONS_PREFIX: &str = "META-INF/versions/";

/// Directory prefixes under which repackaged applications keep classes.
/// The Spring-Boot prefix is configurable through the manifest and is
/// consulted separately.
pub const CLASSES_PREFIXES: [&str; 1] = ["WEB-INF/classes/"];

/// Directory prefixes under which repackaged applications keep library
/// jars. The Spring-Boot prefix is configurable through the manifest and
/// is consulted separately.
pub const LIB_PREFIXES: [&str; 3] = ["WEB-INF/lib/", "WEB-INF/lib-provided/", "lib/"];

/// One entry surviving the masking passes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisibleEntry {
    /// Index into [`LogicalArchive::entries`].
    pub index: usize,
    /// Effective multi-release version (8 for base entries).
    pub version: u32,
    /// Unversioned path with framework classes prefixes stripped.
    pub path: String,
}

/// What manifest mining produced for one archive.
#[derive(Clone, Debug, Default)]
pub struct MinedLayout {
    /// The archive is part of the platform runtime.
    pub system_archive: bool,
    /// Multi-release processing was enabled by the manifest.
    pub multi_release: bool,
    /// Raw `Class-Path` manifest elements, resolved by the caller
    /// relative to the archive's own location.
    pub class_path_hints: Vec<String>,
    /// Effective file per logical path, ordered by `(−version, path)`.
    pub visible: Vec<VisibleEntry>,
    /// In-archive paths of `*.jar` entries under the lib prefixes; each
    /// becomes a nested classpath element `outer!path`.
    pub nested_lib_jars: Vec<String>,
}

impl MinedLayout {
    pub(crate) fn build(archive: &LogicalArchive, runtime_version: u32) -> Self {
        let manifest = archive.manifest();

        // Annotate entries with their effective version and unversioned
        // path, dropping versioned entries the runtime cannot see.
        let mut candidates: Vec<(u32, String, usize)> = Vec::new();
        for (index, entry) in archive.entries().iter().enumerate() {
            let name = entry.name();
            let (version, unversioned) = if manifest.multi_release {
                match versioned_path(name, runtime_version) {
                    Some(split) => split,
                    None => continue,
                }
            } else {
                (BASE_VERSION, name)
            };
            candidates.push((version, unversioned.to_string(), index));
        }

        // Highest applicable version first, then lexicographic path; the
        // sort is stable, so equal keys keep central-directory order.
        candidates.sort_by(|a, b| (Reverse(a.0), &a.1).cmp(&(Reverse(b.0), &b.1)));

        let mut seen: HashSet<&str> = HashSet::new();
        let mut masked: Vec<&(u32, String, usize)> = Vec::new();
        for candidate in &candidates {
            if seen.insert(candidate.1.as_str()) {
                masked.push(candidate);
            }
        }

        // Second pass: peel framework prefixes off class paths and mask
        // again on the stripped path; lib jars are routed to their own
        // list instead.
        let mut visible = Vec::with_capacity(masked.len());
        let mut nested_lib_jars = Vec::new();
        let mut seen_stripped: HashSet<String> = HashSet::new();
        for &(version, ref path, index) in masked.iter().copied() {
            if is_lib_jar(path, &manifest.lib_prefix) {
                nested_lib_jars.push(archive.entries()[index].name().to_string());
                continue;
            }
            let stripped = strip_classes_prefix(path, &manifest.classes_prefix);
            if seen_stripped.insert(stripped.to_string()) {
                visible.push(VisibleEntry {
                    index,
                    version,
                    path: stripped.to_string(),
                });
            }
        }

        Self {
            system_archive: manifest.system_archive,
            multi_release: manifest.multi_release,
            class_path_hints: manifest.class_path.clone(),
            visible,
            nested_lib_jars,
        }
    }
}

/// Split a `META-INF/versions/V/...` name into its effective version and
/// unversioned path.
///
/// Returns `None` when the entry is invisible at `runtime_version`
/// (version out of range or unparsable). The `META-INF` directory itself
/// is not versionable, so `META-INF/versions/V/META-INF/...` stays a base
/// entry at its literal path.
fn versioned_path(name: &str, runtime_version: u32) -> Option<(u32, &str)> {
    let Some(rest) = name.strip_prefix(VERSIONS_PREFIX) else {
        return Some((BASE_VERSION, name));
    };
    let Some((version, path)) = rest.split_once('/') else {
        // A plain file under `META-INF/versions/` is not a versioned tree.
        return Some((BASE_VERSION, name));
    };
    let version: u32 = version.parse().ok()?;
    if path.starts_with("META-INF/") {
        return Some((BASE_VERSION, name));
    }
    if !(9..=runtime_version).contains(&version) {
        return None;
    }
    Some((version, path))
}

fn is_lib_jar(path: &str, manifest_lib_prefix: &str) -> bool {
    if !path.ends_with(".jar") {
        return false;
    }
    if !manifest_lib_prefix.is_empty() && path.starts_with(manifest_lib_prefix) {
        return true;
    }
    LIB_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

fn strip_classes_prefix<'a>(path: &'a str, manifest_classes_prefix: &str) -> &'a str {
    if !manifest_classes_prefix.is_empty() {
        if let Some(stripped) = path.strip_prefix(manifest_classes_prefix) {
            return stripped;
        }
    }
    for prefix in CLASSES_PREFIXES {
        if let Some(stripped) = path.strip_prefix(prefix) {
            return stripped;
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_paths_respect_runtime_bounds() {
        assert_eq!(versioned_path("foo/X.class", 11), Some((8, "foo/X.class")));
        assert_eq!(
            versioned_path("META-INF/versions/11/foo/X.class", 11),
            Some((11, "foo/X.class"))
        );
        assert_eq!(versioned_path("META-INF/versions/17/foo/X.class", 11), None);
        assert_eq!(versioned_path("META-INF/versions/8/foo/X.class", 11), None);
        assert_eq!(versioned_path("META-INF/versions/x/foo/X.class", 11), None);
    }

    #[test]
    fn meta_inf_is_not_versionable() {
        assert_eq!(
            versioned_path("META-INF/versions/9/META-INF/extra.properties", 11),
            Some((8, "META-INF/versions/9/META-INF/extra.properties"))
        );
    }

    #[test]
    fn lib_jars_are_recognised_under_all_prefixes() {
        assert!(is_lib_jar("BOOT-INF/lib/dep.jar", "BOOT-INF/lib/"));
        assert!(is_lib_jar("WEB-INF/lib/dep.jar", "BOOT-INF/lib/"));
        assert!(is_lib_jar("WEB-INF/lib-provided/dep.jar", "BOOT-INF/lib/"));
        assert!(is_lib_jar("lib/dep.jar", "BOOT-INF/lib/"));
        assert!(!is_lib_jar("BOOT-INF/lib/notes.txt", "BOOT-INF/lib/"));
        assert!(!is_lib_jar("other/dep.jar", "BOOT-INF/lib/"));
    }

    #[test]
    fn classes_prefixes_are_stripped() {
        assert_eq!(
            strip_classes_prefix("BOOT-INF/classes/a/B.class", "BOOT-INF/classes/"),
            "a/B.class"
        );
        assert_eq!(
            strip_classes_prefix("WEB-INF/classes/a/B.class", "BOOT-INF/classes/"),
            "a/B.class"
        );
        assert_eq!(strip_classes_prefix("a/B.class", "BOOT-INF/classes/"), "a/B.class");
    }
}
