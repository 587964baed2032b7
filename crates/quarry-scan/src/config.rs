//! Scan configuration.

use serde::{Deserialize, Serialize};

fn default_system_module_prefixes() -> Vec<String> {
    ["java.", "jdk.", "sun.", "javax.", "oracle.", "com.sun.", "com.oracle."]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Options that control graph ordering, multi-release resolution and the
/// worker pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Java feature release of the scanned runtime (8, 11, 17, ...).
    /// Multi-release archives resolve `META-INF/versions/<n>/` overlays
    /// against this value.
    pub runtime_release: u32,

    /// Module-name prefixes treated as platform modules.
    pub system_module_prefixes: Vec<String>,

    /// Drop module layers that are ancestors of other layers in the
    /// input, mirroring the ancestor removal applied to classloaders.
    pub ignore_ancestor_layers: bool,

    /// Also probe the well-known platform archive directories
    /// (`$JRE_HOME/lib`, `/usr/java/packages`, ...).
    pub include_platform_dirs: bool,

    /// Worker threads for the element-opening stage. Workers block on
    /// file and network I/O, so the pool is sized above the CPU count.
    pub worker_threads: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            runtime_release: 8,
            system_module_prefixes: default_system_module_prefixes(),
            ignore_ancestor_layers: false,
            include_platform_dirs: false,
            worker_threads: parallelism * 2,
        }
    }
}

impl ScanConfig {
    /// True when `module_name` belongs to the platform.
    pub fn is_system_module(&self, module_name: &str) -> bool {
        self.system_module_prefixes
            .iter()
            .any(|prefix| module_name.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prefixes_cover_platform_modules() {
        let config = ScanConfig::default();
        assert!(config.is_system_module("java.base"));
        assert!(config.is_system_module("jdk.compiler"));
        assert!(config.is_system_module("com.sun.jna.platform"));
        assert!(!config.is_system_module("org.example.app"));
    }
}
