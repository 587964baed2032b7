//! The top-level scan lifecycle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_sync::{
    InterruptionState, QueueError, Recycler, RecyclerHandle, SingletonMap, WorkQueue,
};
use quarry_zip::MinedLayout;

use crate::cache::{ArchiveHandle, NestedArchiveCache};
use crate::graph::{order_loaders, LoaderGraphInput};
use crate::loader::{default_registry, ModuleReader};
use crate::order::{ClasspathOrderBuilder, ElementFilter};
use crate::sysdirs::platform_archives;
use crate::temp::TempFileRegistry;
use crate::{ClasspathElement, HandlerRegistry, ModuleRef, ScanConfig, ScanError, ScanLog};

/// What one classpath element turned out to contain.
#[derive(Debug)]
pub enum ElementContent {
    /// A directory of loose classfiles.
    Directory { path: PathBuf },
    /// An archive (possibly nested); `archive_key` re-opens it through
    /// the session's cache and `layout` is its mined, masked view.
    Archive {
        archive_key: String,
        package_roots: Vec<String>,
        layout: MinedLayout,
    },
    /// The element could not be materialised; the scan carried on.
    Skipped { reason: String },
}

#[derive(Debug)]
pub struct ScannedElement {
    pub element: Arc<ClasspathElement>,
    pub content: ElementContent,
}

/// The ordered scan output, ready for a classfile parser.
pub struct ScanResult {
    pub elements: Vec<ScannedElement>,
    pub system_modules: Vec<Arc<ModuleRef>>,
    pub non_system_modules: Vec<Arc<ModuleRef>>,
}

/// Owns every resource a scan uses: the temp-file registry, the nested
/// archive cache (with its pooled readers), the interruption flag and the
/// worker pool configuration. Dropping the session closes all of it.
pub struct ScanSession {
    config: ScanConfig,
    log: ScanLog,
    registry: Arc<HandlerRegistry>,
    filters: Arc<Vec<ElementFilter>>,
    temp: Arc<TempFileRegistry>,
    cache: NestedArchiveCache,
    module_readers: SingletonMap<usize, Recycler<Box<dyn ModuleReader>>>,
    interruption: Arc<InterruptionState<ScanError>>,
    closed: AtomicBool,
}

impl ScanSession {
    pub fn new(config: ScanConfig) -> Self {
        Self::with_registry_and_log(config, default_registry(), ScanLog::root())
    }

    pub fn with_registry_and_log(
        config: ScanConfig,
        registry: Arc<HandlerRegistry>,
        log: ScanLog,
    ) -> Self {
        let temp = Arc::new(TempFileRegistry::new());
        let cache = NestedArchiveCache::new(Arc::clone(&temp), log.child("nested"));
        Self {
            config,
            log,
            registry,
            filters: Arc::new(Vec::new()),
            temp,
            cache,
            module_readers: SingletonMap::new(),
            interruption: Arc::new(InterruptionState::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Add a classpath-element filter; rejected elements never enter the
    /// order.
    pub fn with_filter(mut self, filter: ElementFilter) -> Self {
        Arc::get_mut(&mut self.filters)
            .expect("filters are configured before the session is shared")
            .push(filter);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Shared cancellation flag; interrupting it stops a running scan at
    /// the workers' next poll.
    pub fn interruption(&self) -> &Arc<InterruptionState<ScanError>> {
        &self.interruption
    }

    pub fn temp_files(&self) -> &Arc<TempFileRegistry> {
        &self.temp
    }

    pub fn cache(&self) -> &NestedArchiveCache {
        &self.cache
    }

    /// Re-open a scanned archive by the key reported in
    /// [`ElementContent::Archive`].
    pub fn open_archive(&self, archive_key: &str) -> Result<Arc<ArchiveHandle>, ScanError> {
        self.cache.open_archive(archive_key)
    }

    /// A pooled reader over `module`'s contents, when the host exposed
    /// one. Each module keeps its own pool; the handle returns the reader
    /// on drop.
    pub fn module_reader(
        &self,
        module: &Arc<ModuleRef>,
    ) -> Result<Option<RecyclerHandle<Box<dyn ModuleReader>>>, ScanError> {
        let Some(opener) = module.opener.clone() else {
            return Ok(None);
        };
        let pool = self
            .module_readers
            .get_or_create(Arc::as_ptr(module) as usize, || {
                Ok::<_, ScanError>(Recycler::new())
            })
            .map_err(|err| ScanError::from_singleton(err, &module.name))?;
        let handle = pool.acquire_with(|| opener().map_err(ScanError::Io))?;
        Ok(Some(handle))
    }

    /// Run the full pipeline: order loaders and layers, collect elements
    /// from handlers, then materialise every element in parallel, feeding
    /// manifest `Class-Path` references and nested lib jars back into the
    /// order until it stops growing.
    pub fn scan(&self, input: &LoaderGraphInput) -> Result<ScanResult, ScanError> {
        let order = order_loaders(input, &self.registry, &self.config, &self.log);

        let mut builder = ClasspathOrderBuilder::new(self.log.child("classpath"))
            .with_filters(Arc::clone(&self.filters));

        for (loader, handler) in &order.loaders {
            if let Err(err) = handler.handle(&self.config, loader, &mut builder, &self.log) {
                self.log.error(
                    format_args!("handler failed for {}", loader.display_name()),
                    &err,
                );
            }
        }

        // Non-system modules contribute their locations. `jrt:/` modules
        // live inside the runtime image, not on disk; they stay in the
        // module lists only.
        for module in &order.non_system_modules {
            if let Some(location) = &module.location {
                if !location.to_ascii_lowercase().starts_with("jrt:") {
                    builder.add(location, &[]);
                }
            }
        }

        if self.config.include_platform_dirs {
            for archive in platform_archives() {
                builder.add(&archive.to_string_lossy(), &[]);
            }
        }

        let builder = Mutex::new(builder);
        let outcomes: Mutex<HashMap<String, ElementContent>> = Mutex::new(HashMap::new());
        let queue: WorkQueue<Arc<ClasspathElement>, ScanError> =
            WorkQueue::new(Arc::clone(&self.interruption));
        queue.add_all(builder.lock().elements().iter().cloned());

        let run = queue.run(self.config.worker_threads, |element, queue| {
            self.interruption.check()?;
            let content = self.open_element(&element, &builder, queue);
            outcomes.lock().insert(element.resolved().to_string(), content);
            Ok::<(), ScanError>(())
        });
        match run {
            Ok(()) => {}
            Err(QueueError::Worker(err)) => return Err(err),
            Err(QueueError::Interrupted(interrupted)) => return Err(interrupted.into()),
        }

        let mut outcomes = outcomes.into_inner();
        let elements = builder
            .into_inner()
            .into_elements()
            .into_iter()
            .map(|element| {
                let content = outcomes.remove(element.resolved()).unwrap_or_else(|| {
                    ElementContent::Skipped {
                        reason: "not processed".to_string(),
                    }
                });
                ScannedElement { element, content }
            })
            .collect();

        Ok(ScanResult {
            elements,
            system_modules: order.system_modules,
            non_system_modules: order.non_system_modules,
        })
    }

    fn open_element(
        &self,
        element: &Arc<ClasspathElement>,
        builder: &Mutex<ClasspathOrderBuilder>,
        queue: &WorkQueue<Arc<ClasspathElement>, ScanError>,
    ) -> ElementContent {
        let log = self.log.child(element.resolved());

        let resolution = match self.cache.resolve(element.resolved()) {
            Ok(resolution) => resolution,
            Err(err) => {
                log.error("cannot materialise classpath element", &err);
                return ElementContent::Skipped {
                    reason: err.to_string(),
                };
            }
        };
        element.set_file(resolution.file.clone());
        element.set_canonical(resolution.file.clone());

        if resolution.package_roots.is_empty() && resolution.file.is_dir() {
            return ElementContent::Directory {
                path: resolution.file.clone(),
            };
        }

        let handle = match self.cache.open_archive(resolution.archive_key()) {
            Ok(handle) => handle,
            Err(err) => {
                log.error("cannot open archive", &err);
                return ElementContent::Skipped {
                    reason: err.to_string(),
                };
            }
        };
        let layout = handle.logical().mined(self.config.runtime_release);

        // Manifest-derived elements feed back into the order; the queue's
        // in-flight accounting keeps workers alive until the fixpoint.
        if !layout.class_path_hints.is_empty() || !layout.nested_lib_jars.is_empty() {
            // `Class-Path` references resolve relative to the archive's
            // own directory.
            let base = resolution
                .file
                .parent()
                .map(|parent| parent.to_string_lossy().into_owned());
            let mut guard = builder.lock();
            let before = guard.len();
            for hint in &layout.class_path_hints {
                let resolved = quarry_path::resolve(base.as_deref(), hint);
                guard.add(&resolved, element.loaders());
            }
            for lib_jar in &layout.nested_lib_jars {
                guard.add(&format!("{}!{lib_jar}", element.resolved()), element.loaders());
            }
            let discovered: Vec<Arc<ClasspathElement>> = guard.elements()[before..].to_vec();
            drop(guard);
            if !discovered.is_empty() {
                log.log(format_args!(
                    "{} element(s) discovered via manifest",
                    discovered.len()
                ));
                queue.add_all(discovered);
            }
        }

        ElementContent::Archive {
            archive_key: resolution.archive_key().to_string(),
            package_roots: resolution.package_roots.clone(),
            layout,
        }
    }

    /// Close pooled readers and archives, then delete temp files in
    /// reverse creation order. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for pool in self.module_readers.drain() {
            pool.force_close();
        }
        self.cache.close();
        self.temp.close();
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.close();
    }
}
