//! Host-side stand-ins for the loader/module protocol.
//!
//! Each test binary compiles its own copy and uses a different subset.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_scan::{
    ClasspathOrderBuilder, DelegationOrder, LayerRef, LoaderHandler, LoaderNode, LoaderRef,
    ModuleLayerNode, ModuleRef, ScanConfig, ScanError, ScanLog,
};

pub struct TestLoader {
    name: String,
    class_name: String,
    parent: Mutex<Option<LoaderRef>>,
}

impl TestLoader {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_class(name, "test.StaticLoader")
    }

    pub fn with_class(name: &str, class_name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            class_name: class_name.to_string(),
            parent: Mutex::new(None),
        })
    }

    pub fn set_parent(&self, parent: LoaderRef) {
        *self.parent.lock() = Some(parent);
    }
}

impl LoaderNode for TestLoader {
    fn parent(&self) -> Option<LoaderRef> {
        self.parent.lock().clone()
    }

    fn class_names(&self) -> Vec<String> {
        vec![self.class_name.clone()]
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }
}

pub fn as_loader(loader: &Arc<TestLoader>) -> LoaderRef {
    Arc::clone(loader) as LoaderRef
}

/// A handler that contributes a fixed element list per loader name.
pub struct StaticHandler {
    pub elements: HashMap<String, Vec<String>>,
    pub order: DelegationOrder,
    pub embedded: HashMap<String, LoaderRef>,
}

impl StaticHandler {
    pub fn new() -> Self {
        Self {
            elements: HashMap::new(),
            order: DelegationOrder::ParentFirst,
            embedded: HashMap::new(),
        }
    }

    pub fn with_elements(mut self, loader_name: &str, elements: &[&str]) -> Self {
        self.elements.insert(
            loader_name.to_string(),
            elements.iter().map(|s| s.to_string()).collect(),
        );
        self
    }
}

impl LoaderHandler for StaticHandler {
    fn matches(&self, class_name: &str) -> bool {
        class_name == "test.StaticLoader"
    }

    fn delegation_order(&self, _loader: &LoaderRef) -> DelegationOrder {
        self.order
    }

    fn embedded(&self, loader: &LoaderRef) -> Option<LoaderRef> {
        self.embedded.get(&loader.display_name()).cloned()
    }

    fn handle(
        &self,
        _config: &ScanConfig,
        loader: &LoaderRef,
        order: &mut ClasspathOrderBuilder,
        _log: &ScanLog,
    ) -> Result<(), ScanError> {
        if let Some(elements) = self.elements.get(&loader.display_name()) {
            for element in elements {
                order.add(element, std::slice::from_ref(loader));
            }
        }
        Ok(())
    }
}

pub struct TestLayer {
    parents: Vec<LayerRef>,
    modules: Vec<Arc<ModuleRef>>,
}

impl TestLayer {
    pub fn new(parents: Vec<LayerRef>, modules: Vec<Arc<ModuleRef>>) -> Arc<Self> {
        Arc::new(Self { parents, modules })
    }
}

impl ModuleLayerNode for TestLayer {
    fn parents(&self) -> Vec<LayerRef> {
        self.parents.clone()
    }

    fn modules(&self) -> Vec<Arc<ModuleRef>> {
        self.modules.clone()
    }
}

pub fn module(name: &str, location: Option<&str>) -> Arc<ModuleRef> {
    Arc::new(ModuleRef::new(name, location.map(str::to_string)))
}

pub fn as_layer(layer: &Arc<TestLayer>) -> LayerRef {
    Arc::clone(layer) as LayerRef
}
