mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{as_layer, as_loader, module, StaticHandler, TestLayer, TestLoader};
use quarry_scan::{
    order_loaders, DelegationOrder, HandlerRegistry, LoaderGraphInput, LoaderRef, ScanConfig,
    ScanLog,
};

fn registry_with(handler: StaticHandler) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(handler));
    registry
}

fn ordered_names(input: &LoaderGraphInput, registry: &HandlerRegistry) -> Vec<String> {
    let order = order_loaders(input, registry, &ScanConfig::default(), &ScanLog::silent());
    order
        .loaders
        .iter()
        .map(|(loader, _)| loader.display_name())
        .collect()
}

#[test]
fn ancestors_of_other_seeds_are_removed_then_revisited_by_delegation() {
    // bootstrap <- platform <- app; seeding all three keeps only the
    // leaf, and delegation re-lists the chain parent-first.
    let bootstrap = TestLoader::new("bootstrap");
    let platform = TestLoader::new("platform");
    platform.set_parent(as_loader(&bootstrap));
    let app = TestLoader::new("app");
    app.set_parent(as_loader(&platform));

    let input = LoaderGraphInput {
        callstack_loaders: vec![as_loader(&bootstrap), as_loader(&platform), as_loader(&app)],
        ..Default::default()
    };
    let registry = registry_with(StaticHandler::new());

    let names = ordered_names(&input, &registry);
    assert_eq!(names, vec!["bootstrap", "platform", "app"]);

    // No surviving member is an ancestor of another member: each name
    // appears exactly once even though ancestors were re-added.
    let unique: HashSet<&String> = names.iter().collect();
    assert_eq!(unique.len(), names.len());
}

#[test]
fn override_loaders_replace_discovered_seeds() {
    let discovered = TestLoader::new("discovered");
    let chosen = TestLoader::new("chosen");

    let input = LoaderGraphInput {
        override_loaders: Some(vec![as_loader(&chosen)]),
        context_loader: Some(as_loader(&discovered)),
        ..Default::default()
    };
    let registry = registry_with(StaticHandler::new());

    assert_eq!(ordered_names(&input, &registry), vec!["chosen"]);
}

#[test]
fn parent_last_delegation_lists_the_loader_before_its_parent() {
    let parent = TestLoader::new("parent");
    let child = TestLoader::new("child");
    child.set_parent(as_loader(&parent));

    let mut handler = StaticHandler::new();
    handler.order = DelegationOrder::ParentLast;
    let registry = registry_with(handler);

    let input = LoaderGraphInput {
        context_loader: Some(as_loader(&child)),
        ..Default::default()
    };
    assert_eq!(ordered_names(&input, &registry), vec!["child", "parent"]);
}

#[test]
fn cyclic_parent_graphs_are_linearised() {
    // a -> b -> a, as seen in some embedded runtimes.
    let a = TestLoader::new("a");
    let b = TestLoader::new("b");
    a.set_parent(as_loader(&b));
    b.set_parent(as_loader(&a));

    let input = LoaderGraphInput {
        context_loader: Some(as_loader(&a)),
        ..Default::default()
    };
    let registry = registry_with(StaticHandler::new());

    // Both loaders are ancestors of each other; the seed must survive
    // and each node appears at most once.
    let names = ordered_names(&input, &registry);
    assert!(!names.is_empty());
    let unique: HashSet<&String> = names.iter().collect();
    assert_eq!(unique.len(), names.len());
}

#[test]
fn embedded_loader_cycles_are_broken() {
    let outer = TestLoader::new("outer");
    let inner = TestLoader::new("inner");

    let mut handler = StaticHandler::new();
    handler
        .embedded
        .insert("outer".to_string(), as_loader(&inner));
    handler
        .embedded
        .insert("inner".to_string(), as_loader(&outer));
    let registry = registry_with(handler);

    let input = LoaderGraphInput {
        context_loader: Some(as_loader(&outer)),
        ..Default::default()
    };
    let names = ordered_names(&input, &registry);
    assert_eq!(names, vec!["inner", "outer"]);
}

#[test]
fn layers_are_topo_sorted_with_first_wins_module_dedup() {
    let base_module = module("java.base", Some("jrt:/java.base"));
    let shared = module("org.shared", Some("/mods/shared.jar"));
    let parent_layer = TestLayer::new(vec![], vec![Arc::clone(&base_module), Arc::clone(&shared)]);
    let child_layer = TestLayer::new(
        vec![as_layer(&parent_layer)],
        vec![
            Arc::clone(&shared), // same reference: deduplicated
            module("org.zebra", Some("/mods/zebra.jar")),
            module("org.alpha", Some("/mods/alpha.jar")),
        ],
    );

    let input = LoaderGraphInput {
        layers: vec![as_layer(&child_layer)],
        ..Default::default()
    };
    let order = order_loaders(
        &input,
        &HandlerRegistry::new(),
        &ScanConfig::default(),
        &ScanLog::silent(),
    );

    let system: Vec<&str> = order.system_modules.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(system, vec!["java.base"]);

    // Parent layer first, modules sorted by name within each layer, the
    // duplicate reference dropped.
    let non_system: Vec<&str> = order
        .non_system_modules
        .iter()
        .map(|m| m.name.as_str())
        .collect();
    assert_eq!(non_system, vec!["org.shared", "org.alpha", "org.zebra"]);
}

#[test]
fn unmatched_loader_classes_fall_back_without_elements() {
    let odd = TestLoader::with_class("odd", "com.example.OddLoader");
    let input = LoaderGraphInput {
        context_loader: Some(as_loader(&odd)),
        ..Default::default()
    };
    let registry = registry_with(StaticHandler::new());
    let order = order_loaders(
        &input,
        &registry,
        &ScanConfig::default(),
        &ScanLog::silent(),
    );
    assert_eq!(order.loaders.len(), 1);

    let loader: &LoaderRef = &order.loaders[0].0;
    assert_eq!(loader.display_name(), "odd");
}
