//! Platform path-list splitting.

/// Split a delimited path list on the platform separator.
///
/// On `;` platforms this is a plain split. On `:` platforms a colon does
/// not split when it terminates a URL scheme at the start of a segment
/// (`jar:`, `file:`, `http://`, `https://`) or when escaped as `\:`, so
/// URL-shaped elements survive intact.
pub fn split_path_list(list: &str) -> Vec<&str> {
    let separator = if cfg!(windows) { ';' } else { ':' };
    split_path_list_with_separator(list, separator)
}

/// Worker behind [`split_path_list`] with an explicit separator, so the
/// URL-aware `:` rules can be exercised on any host.
pub fn split_path_list_with_separator(list: &str, separator: char) -> Vec<&str> {
    if separator != ':' {
        return list
            .split(separator)
            .filter(|part| !part.is_empty())
            .collect();
    }

    let bytes = list.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b != b':' {
            continue;
        }
        if i > 0 && bytes[i - 1] == b'\\' {
            continue;
        }
        if colon_is_scheme(list, start, i) {
            continue;
        }
        if i > start {
            parts.push(&list[start..i]);
        }
        start = i + 1;
    }
    if start < list.len() {
        parts.push(&list[start..]);
    }
    parts
}

/// A colon terminates a scheme when the alphanumeric word before it is one
/// of the recognised scheme names and that word starts at the segment
/// boundary or directly after another scheme's colon (`jar:file:`).
fn colon_is_scheme(list: &str, segment_start: usize, colon: usize) -> bool {
    let bytes = list.as_bytes();
    let mut word_start = colon;
    while word_start > segment_start && bytes[word_start - 1].is_ascii_alphanumeric() {
        word_start -= 1;
    }
    let word = &list[word_start..colon];
    let is_scheme = ["jar", "file", "http", "https"]
        .iter()
        .any(|s| word.eq_ignore_ascii_case(s));
    if !is_scheme {
        return false;
    }
    word_start == segment_start || bytes[word_start - 1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_split_keeps_urls_together() {
        assert_eq!(
            split_path_list_with_separator("/a/a.jar:jar:file:/x.jar:http://h/b.jar", ':'),
            vec!["/a/a.jar", "jar:file:/x.jar", "http://h/b.jar"]
        );
    }

    #[test]
    fn unix_split_handles_escapes_and_empties() {
        assert_eq!(
            split_path_list_with_separator("a\\:b:c", ':'),
            vec!["a\\:b", "c"]
        );
        assert_eq!(split_path_list_with_separator("::a::b:", ':'), vec!["a", "b"]);
    }

    #[test]
    fn scheme_words_inside_names_still_split() {
        // `.jar` endings must not be mistaken for a `jar:` scheme.
        assert_eq!(
            split_path_list_with_separator("/x/y.jar:/z.jar", ':'),
            vec!["/x/y.jar", "/z.jar"]
        );
        assert_eq!(
            split_path_list_with_separator("https://h/a.jar:/b.jar", ':'),
            vec!["https://h/a.jar", "/b.jar"]
        );
    }

    #[test]
    fn windows_split_is_plain() {
        assert_eq!(
            split_path_list_with_separator("C:\\a.jar;D:\\b.jar;", ';'),
            vec!["C:\\a.jar", "D:\\b.jar"]
        );
    }
}
