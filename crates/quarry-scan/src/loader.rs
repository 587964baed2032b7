//! The typed protocol between the host runtime and the scanner.
//!
//! Classloader and module internals are not introspected reflectively;
//! the host exposes what the scanner needs through these traits. The
//! scanner owns no concrete handlers; it ships only the registry, the
//! matching rules and a no-op fallback.

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::order::ClasspathOrderBuilder;
use crate::{ScanConfig, ScanError, ScanLog};

/// A classloader as seen by the host runtime.
pub trait LoaderNode: Send + Sync {
    /// Delegation parent, if any.
    fn parent(&self) -> Option<LoaderRef>;

    /// Fully-qualified class names of the loader's implementation,
    /// most-derived first. Handler matching walks this chain.
    fn class_names(&self) -> Vec<String>;

    /// A human-readable identifier for logs.
    fn display_name(&self) -> String {
        self.class_names().first().cloned().unwrap_or_default()
    }
}

pub type LoaderRef = Arc<dyn LoaderNode>;

/// Stable identity for set membership. Two refs to the same node compare
/// equal; distinct nodes never collide while alive.
pub(crate) fn loader_key(loader: &LoaderRef) -> usize {
    Arc::as_ptr(loader) as *const () as usize
}

/// A module layer: a group of named modules with parent layers forming a
/// DAG.
pub trait ModuleLayerNode: Send + Sync {
    fn parents(&self) -> Vec<LayerRef>;
    fn modules(&self) -> Vec<Arc<ModuleRef>>;
}

pub type LayerRef = Arc<dyn ModuleLayerNode>;

pub(crate) fn layer_key(layer: &LayerRef) -> usize {
    Arc::as_ptr(layer) as *const () as usize
}

/// Streamed access to one module's contents, as exposed by the host
/// runtime (e.g. a jrt image reader). Not thread-safe; workers pool these
/// through the session.
pub trait ModuleReader: Send {
    /// Resource paths inside the module, `/`-separated.
    fn resource_paths(&mut self) -> std::io::Result<Vec<String>>;

    /// Open one resource for reading.
    fn open_resource(&mut self, path: &str) -> std::io::Result<Box<dyn std::io::Read + Send>>;
}

impl quarry_sync::Recyclable for Box<dyn ModuleReader> {}

/// Opens fresh [`ModuleReader`]s for a module.
pub type ModuleOpener = Arc<dyn Fn() -> std::io::Result<Box<dyn ModuleReader>> + Send + Sync>;

/// A module reference from a module layer.
#[derive(Clone)]
pub struct ModuleRef {
    pub name: String,
    /// Location string (a path, `file:` or `jrt:/` URI), when known.
    pub location: Option<String>,
    /// Host-supplied access to the module's contents, when available.
    pub opener: Option<ModuleOpener>,
}

impl ModuleRef {
    pub fn new(name: impl Into<String>, location: Option<String>) -> Self {
        Self {
            name: name.into(),
            location,
            opener: None,
        }
    }

    pub fn with_opener(mut self, opener: ModuleOpener) -> Self {
        self.opener = Some(opener);
        self
    }
}

impl std::fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRef")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("openable", &self.opener.is_some())
            .finish()
    }
}

impl PartialEq for ModuleRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.location == other.location
    }
}

impl Eq for ModuleRef {}

/// The order in which a handler visits a loader's delegation parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelegationOrder {
    ParentFirst,
    ParentLast,
}

/// Produces classpath elements for one family of classloaders.
///
/// Handlers are matched by fully-qualified loader class name, walking up
/// the reported class hierarchy; the first match wins.
pub trait LoaderHandler: Send + Sync {
    /// Class names this handler is registered for.
    fn matches(&self, class_name: &str) -> bool;

    fn delegation_order(&self, _loader: &LoaderRef) -> DelegationOrder {
        DelegationOrder::ParentFirst
    }

    /// An adapter loader wrapped inside `loader`, to be ordered in its
    /// place before it.
    fn embedded(&self, _loader: &LoaderRef) -> Option<LoaderRef> {
        None
    }

    /// Contribute `loader`'s elements to the order being built.
    fn handle(
        &self,
        config: &ScanConfig,
        loader: &LoaderRef,
        order: &mut ClasspathOrderBuilder,
        log: &ScanLog,
    ) -> Result<(), ScanError>;
}

/// Fallback for loader classes nothing is registered for: contributes no
/// elements and delegates parent-first.
pub struct NoOpHandler;

impl LoaderHandler for NoOpHandler {
    fn matches(&self, _class_name: &str) -> bool {
        true
    }

    fn handle(
        &self,
        _config: &ScanConfig,
        loader: &LoaderRef,
        _order: &mut ClasspathOrderBuilder,
        log: &ScanLog,
    ) -> Result<(), ScanError> {
        log.log(format_args!(
            "no handler registered for {}",
            loader.display_name()
        ));
        Ok(())
    }
}

/// Registered handlers plus the fallback. Read-mostly: built once at
/// session construction (or taken from the process-wide default).
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn LoaderHandler>>,
    fallback: Arc<dyn LoaderHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            fallback: Arc::new(NoOpHandler),
        }
    }

    pub fn with_fallback(fallback: Arc<dyn LoaderHandler>) -> Self {
        Self {
            handlers: Vec::new(),
            fallback,
        }
    }

    pub fn register(&mut self, handler: Arc<dyn LoaderHandler>) {
        self.handlers.push(handler);
    }

    /// The handler for `loader`: the first registered handler matching
    /// any class name in the loader's hierarchy chain, else the fallback.
    pub fn find(&self, loader: &LoaderRef) -> Arc<dyn LoaderHandler> {
        for class_name in loader.class_names() {
            for handler in &self.handlers {
                if handler.matches(&class_name) {
                    return Arc::clone(handler);
                }
            }
        }
        Arc::clone(&self.fallback)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide registry used when a session is not given its own.
pub(crate) fn default_registry() -> Arc<HandlerRegistry> {
    static DEFAULT: Lazy<Arc<HandlerRegistry>> = Lazy::new(|| Arc::new(HandlerRegistry::new()));
    Arc::clone(&DEFAULT)
}
