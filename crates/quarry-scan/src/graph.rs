//! Ordering the classloader forest and module layers into one
//! deterministic sequence.

use std::collections::HashSet;
use std::sync::Arc;

use crate::loader::{layer_key, loader_key, HandlerRegistry, LoaderHandler};
use crate::{DelegationOrder, LayerRef, LoaderRef, ModuleRef, ScanConfig, ScanLog};

/// The loaders and layers a scan starts from.
///
/// When `override_loaders` is set it replaces the discovered seeds
/// entirely; otherwise the seed order is system loader, callstack loaders
/// (deepest frame first), context loader, then user-added loaders.
#[derive(Default)]
pub struct LoaderGraphInput {
    pub override_loaders: Option<Vec<LoaderRef>>,
    pub system_loader: Option<LoaderRef>,
    pub callstack_loaders: Vec<LoaderRef>,
    pub context_loader: Option<LoaderRef>,
    pub added_loaders: Vec<LoaderRef>,
    pub layers: Vec<LayerRef>,
}

/// The ordered result: loader-plus-handler pairs in delegation order and
/// the partitioned module lists.
pub struct LoaderOrder {
    pub loaders: Vec<(LoaderRef, Arc<dyn LoaderHandler>)>,
    pub system_modules: Vec<Arc<ModuleRef>>,
    pub non_system_modules: Vec<Arc<ModuleRef>>,
}

/// Order the loader forest and module layers deterministically: seed
/// loaders are de-duplicated, ancestors of other seeds are removed, each
/// survivor is expanded through its handler's delegation order, and
/// module layers are walked parents-first with modules partitioned into
/// system and non-system lists.
pub fn order_loaders(
    input: &LoaderGraphInput,
    registry: &HandlerRegistry,
    config: &ScanConfig,
    log: &ScanLog,
) -> LoaderOrder {
    let seeds = remove_ancestors(seed_loaders(input));

    let mut loaders = Vec::new();
    let mut visited: HashSet<usize> = HashSet::new();
    for seed in seeds {
        add_delegation_chain(seed, registry, &mut loaders, &mut visited, log);
    }

    let layers = order_layers(&input.layers, config.ignore_ancestor_layers);
    let mut system_modules = Vec::new();
    let mut non_system_modules = Vec::new();
    let mut seen_modules: HashSet<usize> = HashSet::new();
    for layer in layers {
        let mut modules = layer.modules();
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        for module in modules {
            // First layer naming a module wins.
            if !seen_modules.insert(Arc::as_ptr(&module) as usize) {
                continue;
            }
            if config.is_system_module(&module.name) {
                system_modules.push(module);
            } else {
                non_system_modules.push(module);
            }
        }
    }

    LoaderOrder {
        loaders,
        system_modules,
        non_system_modules,
    }
}

fn seed_loaders(input: &LoaderGraphInput) -> Vec<LoaderRef> {
    let mut seeds: Vec<LoaderRef> = Vec::new();
    let mut seen: HashSet<usize> = HashSet::new();
    let mut push = |loader: &LoaderRef, seeds: &mut Vec<LoaderRef>| {
        if seen.insert(loader_key(loader)) {
            seeds.push(Arc::clone(loader));
        }
    };

    if let Some(overrides) = &input.override_loaders {
        for loader in overrides {
            push(loader, &mut seeds);
        }
        return seeds;
    }

    if let Some(system) = &input.system_loader {
        push(system, &mut seeds);
    }
    for loader in &input.callstack_loaders {
        push(loader, &mut seeds);
    }
    if let Some(context) = &input.context_loader {
        push(context, &mut seeds);
    }
    for loader in &input.added_loaders {
        push(loader, &mut seeds);
    }
    seeds
}

/// Every transitive parent of `loader`, excluding itself. Tolerates
/// cyclic parent graphs.
fn ancestor_keys(loader: &LoaderRef) -> HashSet<usize> {
    let mut out = HashSet::new();
    let mut seen = HashSet::new();
    seen.insert(loader_key(loader));
    let mut current = loader.parent();
    while let Some(parent) = current {
        let key = loader_key(&parent);
        if !seen.insert(key) {
            break;
        }
        out.insert(key);
        current = parent.parent();
    }
    out
}

/// Drop every seed that is a transitive parent of another seed; only
/// leaves survive, since delegation will visit the ancestors anyway.
fn remove_ancestors(seeds: Vec<LoaderRef>) -> Vec<LoaderRef> {
    let mut ancestral: HashSet<usize> = HashSet::new();
    for seed in &seeds {
        ancestral.extend(ancestor_keys(seed));
    }
    seeds
        .into_iter()
        .filter(|seed| !ancestral.contains(&loader_key(seed)))
        .collect()
}

fn add_delegation_chain(
    loader: LoaderRef,
    registry: &HandlerRegistry,
    out: &mut Vec<(LoaderRef, Arc<dyn LoaderHandler>)>,
    visited: &mut HashSet<usize>,
    log: &ScanLog,
) {
    if !visited.insert(loader_key(&loader)) {
        return;
    }
    let handler = registry.find(&loader);

    if let Some(embedded) = handler.embedded(&loader) {
        if visited.contains(&loader_key(&embedded)) {
            log.log(format_args!(
                "embedded classloader cycle at {}; skipping branch",
                loader.display_name()
            ));
        } else {
            add_delegation_chain(embedded, registry, out, visited, log);
        }
    }

    match handler.delegation_order(&loader) {
        DelegationOrder::ParentFirst => {
            if let Some(parent) = loader.parent() {
                add_delegation_chain(parent, registry, out, visited, log);
            }
            out.push((loader, handler));
        }
        DelegationOrder::ParentLast => {
            out.push((Arc::clone(&loader), handler));
            if let Some(parent) = loader.parent() {
                add_delegation_chain(parent, registry, out, visited, log);
            }
        }
    }
}

/// Topological order over the layer DAG: depth-first with post-order
/// push, so every parent precedes its children. Optionally drops layers
/// that are strict ancestors of the supplied ones.
fn order_layers(layers: &[LayerRef], ignore_ancestors: bool) -> Vec<LayerRef> {
    let mut order: Vec<LayerRef> = Vec::new();
    let mut visited: HashSet<usize> = HashSet::new();
    for layer in layers {
        visit_layer(layer, &mut order, &mut visited);
    }

    if ignore_ancestors {
        let mut ancestral: HashSet<usize> = HashSet::new();
        for layer in &order {
            mark_ancestors(layer, &mut ancestral);
        }
        order.retain(|layer| !ancestral.contains(&layer_key(layer)));
    }
    order
}

fn mark_ancestors(layer: &LayerRef, ancestral: &mut HashSet<usize>) {
    for parent in layer.parents() {
        if ancestral.insert(layer_key(&parent)) {
            mark_ancestors(&parent, ancestral);
        }
    }
}

fn visit_layer(layer: &LayerRef, order: &mut Vec<LayerRef>, visited: &mut HashSet<usize>) {
    if !visited.insert(layer_key(layer)) {
        return;
    }
    for parent in layer.parents() {
        visit_layer(&parent, order, visited);
    }
    order.push(Arc::clone(layer));
}
