//! Well-known platform archive directories.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Existing directories where platform runtimes keep their archives.
///
/// Probed from `$JRE_HOME`/`$JAVA_HOME` plus the standard OS locations;
/// directories that do not exist are silently skipped.
pub fn platform_archive_dirs() -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for var in ["JRE_HOME", "JAVA_HOME"] {
        if let Ok(home) = std::env::var(var) {
            if home.is_empty() {
                continue;
            }
            let home = PathBuf::from(home);
            push_dir(&mut out, &mut seen, home.clone());
            push_dir(&mut out, &mut seen, home.join("lib"));
            push_dir(&mut out, &mut seen, home.join("lib/ext"));
            if let Some(parent) = home.parent() {
                push_dir(&mut out, &mut seen, parent.to_path_buf());
            }
        }
    }

    if cfg!(target_os = "macos") {
        push_children(&mut out, &mut seen, Path::new("/System/Library/Java"), "");
    }
    if cfg!(unix) {
        push_children(&mut out, &mut seen, Path::new("/usr/java"), "packages");
        push_children(&mut out, &mut seen, Path::new("/usr/jdk"), "packages");
    }
    if cfg!(windows) {
        if let Ok(system_root) = std::env::var("SystemRoot") {
            for vendor in ["Sun", "Oracle"] {
                let base = Path::new(&system_root).join(vendor).join("Java");
                push_children(&mut out, &mut seen, &base, "");
            }
        }
    }

    out
}

/// Archive files found under the platform directories, in a stable
/// order. Extension directories historically nest one level of vendor
/// subdirectories, so the walk stays shallow.
pub fn platform_archives() -> Vec<PathBuf> {
    let mut out = Vec::new();
    for dir in platform_archive_dirs() {
        let mut found: Vec<PathBuf> = walkdir::WalkDir::new(&dir)
            .follow_links(false)
            .max_depth(2)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("jar") || ext.eq_ignore_ascii_case("zip"))
            })
            .collect();
        // WalkDir does not guarantee ordering.
        found.sort();
        out.extend(found);
    }
    out
}

fn push_dir(out: &mut Vec<PathBuf>, seen: &mut HashSet<PathBuf>, dir: PathBuf) {
    if dir.is_dir() && seen.insert(dir.clone()) {
        out.push(dir);
    }
}

/// Child directories of `parent` whose name starts with `prefix` (the
/// `dir*` probe patterns).
fn push_children(out: &mut Vec<PathBuf>, seen: &mut HashSet<PathBuf>, parent: &Path, prefix: &str) {
    let Ok(entries) = std::fs::read_dir(parent) else {
        return;
    };
    for entry in entries.flatten() {
        if !prefix.is_empty() && !entry.file_name().to_string_lossy().starts_with(prefix) {
            continue;
        }
        let path = entry.path();
        push_dir(out, seen, path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jre_home_probe_finds_archives() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("lib/ext")).unwrap();
        std::fs::write(dir.path().join("lib/rt.jar"), b"x").unwrap();
        std::fs::write(dir.path().join("lib/ext/vendor.zip"), b"x").unwrap();
        std::fs::write(dir.path().join("lib/notes.txt"), b"x").unwrap();
        std::env::set_var("JRE_HOME", dir.path());

        let dirs = platform_archive_dirs();
        assert!(dirs.contains(&dir.path().to_path_buf()));
        assert!(dirs.contains(&dir.path().join("lib")));
        assert!(dirs.contains(&dir.path().join("lib/ext")));

        let archives = platform_archives();
        assert!(archives.iter().any(|p| p.ends_with("rt.jar")));
        assert!(archives.iter().any(|p| p.ends_with("vendor.zip")));
        assert!(!archives.iter().any(|p| p.ends_with("notes.txt")));

        std::env::remove_var("JRE_HOME");
    }
}
