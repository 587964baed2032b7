//! Conversions between dotted class names and in-archive paths.

/// `com.example.Foo` → `com/example/Foo.class`.
pub fn class_name_to_path(class_name: &str) -> String {
    let mut path = class_name.replace('.', "/");
    path.push_str(".class");
    path
}

/// `com/example/Foo.class` → `com.example.Foo`.
///
/// Returns `None` when the path does not carry a `.class` suffix or is
/// empty once separators are stripped.
pub fn path_to_class_name(path: &str) -> Option<String> {
    let stem = path.strip_suffix(".class")?;
    let stem = stem.trim_matches('/');
    if stem.is_empty() {
        return None;
    }
    Some(stem.replace('/', "."))
}

/// Dotted or slashed package name → slashed path with no leading or
/// trailing separators.
pub fn package_to_path(package: &str) -> String {
    package
        .trim_matches(|c| c == '.' || c == '/')
        .replace('.', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_name_round_trip() {
        assert_eq!(class_name_to_path("com.example.Foo"), "com/example/Foo.class");
        assert_eq!(
            path_to_class_name("com/example/Foo.class").as_deref(),
            Some("com.example.Foo")
        );
        assert_eq!(
            path_to_class_name("/com/example/Foo.class").as_deref(),
            Some("com.example.Foo")
        );
    }

    #[test]
    fn non_class_paths_are_rejected() {
        assert_eq!(path_to_class_name("com/example/Foo.txt"), None);
        assert_eq!(path_to_class_name(".class"), None);
    }

    #[test]
    fn package_paths_are_trimmed() {
        assert_eq!(package_to_path("com.example."), "com/example");
        assert_eq!(package_to_path("/com/example/"), "com/example");
        assert_eq!(package_to_path(""), "");
    }
}
