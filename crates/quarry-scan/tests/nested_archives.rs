use std::path::Path;
use std::sync::Arc;

use quarry_scan::{NestedArchiveCache, ScanError, ScanLog, TempFileRegistry};
use quarry_zip::fixtures::ZipBuilder;
use tempfile::TempDir;

fn cache() -> (NestedArchiveCache, Arc<TempFileRegistry>) {
    let temp = Arc::new(TempFileRegistry::new());
    let cache = NestedArchiveCache::new(Arc::clone(&temp), ScanLog::silent());
    (cache, temp)
}

fn canonical_str(path: &Path) -> String {
    dunce::canonicalize(path)
        .unwrap()
        .to_string_lossy()
        .into_owned()
}

fn inner_jar() -> Vec<u8> {
    ZipBuilder::new()
        .deflated("pkg/X.class", b"\xca\xfe\xba\xbe")
        .stored("pkg/data.txt", b"payload")
        .build()
}

#[test]
fn stored_inner_archive_resolves_in_place_without_temp_files() {
    let dir = TempDir::new().unwrap();
    let outer = dir.path().join("outer.jar");
    ZipBuilder::new()
        .stored("inner.jar", &inner_jar())
        .write_to(&outer)
        .unwrap();
    let outer_key = canonical_str(&outer);

    let (cache, temp) = cache();
    let resolution = cache
        .resolve(&format!("{outer_key}!inner.jar!pkg/"))
        .unwrap();

    // The stored inner archive is read through a slice of the outer
    // file: same physical file, `pkg` pinned as package root, no
    // extraction.
    assert_eq!(canonical_str(&resolution.file), outer_key);
    assert_eq!(resolution.package_roots, vec!["pkg"]);
    assert_eq!(temp.count(), 0);

    // Descent into the slice works: the inner entries are reachable.
    let handle = cache.open_archive(resolution.archive_key()).unwrap();
    assert!(handle.logical().entry("pkg/X.class").is_some());
}

#[test]
fn deflated_inner_archive_extracts_exactly_one_temp_file() {
    let dir = TempDir::new().unwrap();
    let outer = dir.path().join("outer.jar");
    ZipBuilder::new()
        .deflated("inner.jar", &inner_jar())
        .write_to(&outer)
        .unwrap();
    let outer_key = canonical_str(&outer);

    let (cache, temp) = cache();
    let resolution = cache
        .resolve(&format!("{outer_key}!inner.jar!pkg/"))
        .unwrap();

    assert_ne!(canonical_str(&resolution.file), outer_key);
    assert_eq!(resolution.package_roots, vec!["pkg"]);
    assert_eq!(temp.count(), 1);

    // Repeated and differently-spelled resolutions reuse the extraction.
    cache
        .resolve(&format!("{outer_key}!inner.jar!pkg/"))
        .unwrap();
    cache.resolve(&format!("{outer_key}!inner.jar")).unwrap();
    assert_eq!(temp.count(), 1);

    // The inner temp file maps back to the outermost archive.
    assert_eq!(
        cache.outermost_file(&resolution.file).unwrap(),
        dunce::canonicalize(&outer).unwrap()
    );

    // Extracted bytes form the same archive.
    let handle = cache.open_archive(resolution.archive_key()).unwrap();
    let entry = handle.logical().entry("pkg/data.txt").unwrap();
    assert_eq!(handle.logical().read_entry(entry).unwrap(), b"payload");
}

#[test]
fn non_canonical_keys_are_rewritten_before_descent() {
    let dir = TempDir::new().unwrap();
    let outer = dir.path().join("outer.jar");
    ZipBuilder::new()
        .deflated("inner.jar", &inner_jar())
        .write_to(&outer)
        .unwrap();

    // A relative, separator-heavy spelling of the same outer file.
    let raw = format!(
        "{}//./outer.jar!inner.jar",
        dir.path().to_string_lossy()
    );
    let (cache, temp) = cache();
    let first = cache.resolve(&raw).unwrap();
    let second = cache
        .resolve(&format!("{}!inner.jar", canonical_str(&outer)))
        .unwrap();

    assert_eq!(first.file, second.file);
    assert_eq!(temp.count(), 1);
}

#[test]
fn missing_entries_and_directories_are_reported() {
    let dir = TempDir::new().unwrap();
    let outer = dir.path().join("outer.jar");
    ZipBuilder::new()
        .stored("present.txt", b"x")
        .write_to(&outer)
        .unwrap();
    let outer_key = canonical_str(&outer);

    let (cache, _temp) = cache();
    let err = cache
        .resolve(&format!("{outer_key}!absent.jar"))
        .unwrap_err();
    assert!(matches!(err, ScanError::MissingNestedEntry { .. }));

    let err = cache.resolve("/does/not/exist.jar").unwrap_err();
    assert!(matches!(err, ScanError::Canonicalize { .. }));
}

#[test]
fn plain_directories_resolve_to_themselves() {
    let dir = TempDir::new().unwrap();
    let classes = dir.path().join("classes");
    std::fs::create_dir_all(classes.join("com/example")).unwrap();

    let (cache, temp) = cache();
    let resolution = cache.resolve(&classes.to_string_lossy()).unwrap();
    assert_eq!(resolution.file, dunce::canonicalize(&classes).unwrap());
    assert!(resolution.package_roots.is_empty());
    assert_eq!(temp.count(), 0);
}

#[test]
fn three_levels_of_nesting_resolve() {
    let dir = TempDir::new().unwrap();
    let innermost = ZipBuilder::new().stored("deep/Y.class", b"y").build();
    let middle = ZipBuilder::new().deflated("leaf.jar", &innermost).build();
    let outer = dir.path().join("outer.jar");
    ZipBuilder::new()
        .stored("mid.jar", &middle)
        .write_to(&outer)
        .unwrap();
    let outer_key = canonical_str(&outer);

    let (cache, temp) = cache();
    // outer (stored mid.jar, sliced in place) -> mid (deflated leaf.jar,
    // extracted) -> leaf.
    let resolution = cache
        .resolve(&format!("{outer_key}!mid.jar!leaf.jar"))
        .unwrap();
    assert_eq!(temp.count(), 1);

    let handle = cache.open_archive(resolution.archive_key()).unwrap();
    assert!(handle.logical().entry("deep/Y.class").is_some());
}
