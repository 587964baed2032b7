//! Classpath discovery: loader/module graph ordering, classpath element
//! accumulation, nested-archive materialisation and the scan session that
//! drives them.
//!
//! The crate does not parse classfiles and owns no concrete classloader
//! handlers; hosts supply both through the [`LoaderNode`]/[`LoaderHandler`]
//! protocol and consume the ordered elements (with their mined archive
//! layouts) that [`ScanSession::scan`] produces.

mod cache;
mod config;
mod graph;
mod loader;
mod log;
mod order;
mod session;
mod sysdirs;
mod temp;

pub use cache::{ArchiveHandle, NestedArchiveCache, NestedResolution};
pub use config::ScanConfig;
pub use graph::{order_loaders, LoaderGraphInput, LoaderOrder};
pub use loader::{
    DelegationOrder, HandlerRegistry, LayerRef, LoaderHandler, LoaderNode, LoaderRef,
    ModuleLayerNode, ModuleOpener, ModuleReader, ModuleRef, NoOpHandler,
};
pub use log::ScanLog;
pub use order::{ClasspathElement, ClasspathOrderBuilder, ElementFilter, ElementSource};
pub use session::{ElementContent, ScanResult, ScanSession, ScannedElement};
pub use sysdirs::{platform_archive_dirs, platform_archives};
pub use temp::TempFileRegistry;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] quarry_zip::ZipError),

    #[error(transparent)]
    Interrupted(#[from] quarry_sync::Interrupted),

    #[error("failed to fetch {url}: {message}")]
    Http { url: String, message: String },

    #[error("{}: not a regular file", .path.display())]
    NotAFile { path: PathBuf },

    #[error("{}: cannot canonicalize: {}", .path.display(), .source)]
    Canonicalize {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("archive {key}: no entry or directory named {entry}")]
    MissingNestedEntry { key: String, entry: String },

    #[error("{key}: resolution failed in another thread")]
    Poisoned { key: String },
}

impl ScanError {
    pub(crate) fn from_singleton(err: quarry_sync::SingletonError<ScanError>, key: &str) -> Self {
        match err {
            quarry_sync::SingletonError::Init(inner) => inner,
            quarry_sync::SingletonError::Poisoned => ScanError::Poisoned {
                key: key.to_string(),
            },
        }
    }
}
