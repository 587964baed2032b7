//! Archive manifest (`META-INF/MANIFEST.MF`) parsing.
//!
//! Only the attributes that influence scanning are extracted. Attribute
//! names are matched case-insensitively; values are compared exactly.

/// Titles that identify a platform runtime archive.
const SYSTEM_TITLES: [&str; 2] = ["Java Runtime Environment", "Java Platform API Specification"];

pub(crate) const DEFAULT_CLASSES_PREFIX: &str = "BOOT-INF/classes/";
pub(crate) const DEFAULT_LIB_PREFIX: &str = "BOOT-INF/lib/";

#[derive(Clone, Debug)]
pub struct ManifestInfo {
    /// The archive belongs to the platform runtime rather than user code.
    pub system_archive: bool,
    /// `Multi-Release: true` was present.
    pub multi_release: bool,
    /// Elements of the `Class-Path` attribute, in order.
    pub class_path: Vec<String>,
    /// Where repackaged application classes live, e.g. `BOOT-INF/classes/`.
    pub classes_prefix: String,
    /// Where repackaged library jars live, e.g. `BOOT-INF/lib/`.
    pub lib_prefix: String,
}

impl Default for ManifestInfo {
    fn default() -> Self {
        Self {
            system_archive: false,
            multi_release: false,
            class_path: Vec::new(),
            classes_prefix: DEFAULT_CLASSES_PREFIX.to_string(),
            lib_prefix: DEFAULT_LIB_PREFIX.to_string(),
        }
    }
}

impl ManifestInfo {
    /// Parse raw manifest bytes.
    ///
    /// Manifest lines may end in CR, LF or CRLF, and any line beginning
    /// with a space continues the previous attribute's value.
    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let mut info = Self::default();

        let mut key: Option<String> = None;
        let mut value = String::new();
        for line in split_manifest_lines(&text) {
            if let Some(continuation) = line.strip_prefix(' ') {
                value.push_str(continuation);
                continue;
            }
            if let Some(key) = key.take() {
                info.apply(&key, &value);
            }
            value.clear();
            match line.split_once(':') {
                Some((name, rest)) => {
                    key = Some(name.trim().to_ascii_lowercase());
                    value.push_str(rest.strip_prefix(' ').unwrap_or(rest));
                }
                None => {
                    key = None;
                }
            }
        }
        if let Some(key) = key.take() {
            info.apply(&key, &value);
        }

        info
    }

    fn apply(&mut self, key: &str, value: &str) {
        let value = value.trim_end();
        match key {
            "class-path" => {
                self.class_path = value.split_whitespace().map(str::to_string).collect();
            }
            "multi-release" => {
                self.multi_release = value.eq_ignore_ascii_case("true");
            }
            "spring-boot-classes" => {
                self.classes_prefix = normalize_prefix(value);
            }
            "spring-boot-lib" => {
                self.lib_prefix = normalize_prefix(value);
            }
            "implementation-title" | "specification-title" => {
                if SYSTEM_TITLES.contains(&value) {
                    self.system_archive = true;
                }
            }
            _ => {}
        }
    }
}

fn normalize_prefix(value: &str) -> String {
    let trimmed = value.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

fn split_manifest_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let end = rest
            .find(['\r', '\n'])
            .unwrap_or(rest.len());
        let line = &rest[..end];
        let mut tail = &rest[end..];
        if let Some(stripped) = tail.strip_prefix("\r\n") {
            tail = stripped;
        } else if let Some(stripped) = tail.strip_prefix(['\r', '\n']) {
            tail = stripped;
        }
        rest = tail;
        Some(line)
    })
}
