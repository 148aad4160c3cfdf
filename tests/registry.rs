mod common;

use std::sync::{Arc, Barrier, Mutex, OnceLock, Weak};
use std::thread;

use common::type_with_id;
use indy_linker::error::{LoadError, RegistrationError};
use indy_linker::prelude::*;
use indy_linker::ModuleRegistry;

fn module(name: &str, advices: &[&str], helpers: &[&str]) -> Arc<ModuleDescriptor> {
    let mut source = MemorySource::new();
    for n in advices.iter().chain(helpers) {
        source = source.with_definition(type_with_id(n, "module"));
    }
    let mut builder = ModuleDescriptor::builder(name, source);
    for a in advices {
        builder = builder.advice(*a);
    }
    for h in helpers {
        builder = builder.helper(*h);
    }
    builder.build()
}

#[test]
fn registered_modules_load_every_helper() {
    let agent = common::agent();
    agent.register_module(module("es", &["es/Advice"], &["es/H1", "es/H2"])).unwrap();
    agent.register_module(module("kafka", &["kafka/Advice"], &["kafka/H"])).unwrap();

    let app = agent.host_context("App1");
    for (name, types) in [("es", ["es/Advice", "es/H1", "es/H2"].as_slice()), ("kafka", ["kafka/Advice", "kafka/H"].as_slice())] {
        let ctx = agent.registry().resolve_context(name, &app).unwrap();
        for ty in types {
            assert_eq!(ctx.load_type(ty).unwrap().namespace(), ctx.label());
        }
    }
    assert_eq!(agent.registry().module_for_advice("kafka/Advice").unwrap().name(), "kafka");
    assert_eq!(agent.registry().modules().len(), 2);
}

#[test]
fn duplicate_and_conflicting_modules_are_rejected() {
    let agent = common::agent();
    agent.register_module(module("es", &["es/Advice"], &[])).unwrap();

    assert_eq!(
        agent.register_module(module("es", &["es/Other"], &[])),
        Err(RegistrationError::DuplicateModule("es".into()))
    );
    assert_eq!(
        agent.register_module(module("es-copy", &["es/Fresh", "es/Advice"], &[])),
        Err(RegistrationError::AdviceConflict {
            advice: "es/Advice".into(),
            module: "es-copy".into(),
            owner: "es".into(),
        })
    );
    assert!(agent.registry().module("es-copy").is_none());
    assert_eq!(agent.registry().module_for_advice("es/Advice").unwrap().name(), "es");

    let accepted = agent.register_modules([module("a", &["a/A"], &[]), module("b", &["a/A"], &[]), module("c", &[], &[])]);
    assert_eq!(accepted, 2);
}

#[test]
fn concurrent_registration_is_serialized() {
    let agent = Arc::new(common::agent());
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let (agent, barrier) = (agent.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                agent.register_module(module(&format!("m{i}"), &["shared/Advice"], &[])).is_ok()
            })
        })
        .collect();
    let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
    assert_eq!(winners, 1);
}

#[test]
fn concurrent_first_use_constructs_one_context() {
    let agent = Arc::new(common::agent());
    agent.register_module(module("es", &["es/Advice"], &["es/H"])).unwrap();
    let app = agent.host_context("App1");

    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let (agent, app, barrier) = (agent.clone(), app.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                let ctx = agent.registry().resolve_context("es", &app).unwrap();
                // concurrent first use of a type defines it once as well
                let helper = ctx.load_type("es/H").unwrap();
                (ctx, helper)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let (first_ctx, first_helper) = &results[0];
    for (ctx, helper) in &results {
        assert!(Arc::ptr_eq(ctx, first_ctx));
        assert!(Arc::ptr_eq(helper, first_helper));
    }
    assert_eq!(agent.registry().constructed_contexts(), 1);
    assert_eq!(agent.registry().live_contexts(), 1);
}

#[test]
fn contexts_are_per_hosting_context() {
    let agent = common::agent();
    agent.register_module(module("es", &["es/Advice"], &[])).unwrap();
    let app1 = agent.host_context("App1");
    let app2 = agent.host_context("App2");

    let ctx1 = agent.registry().resolve_context("es", &app1).unwrap();
    let ctx2 = agent.registry().resolve_context("es", &app2).unwrap();
    assert!(!Arc::ptr_eq(&ctx1, &ctx2));
    assert_eq!(ctx1.label(), "es@App1");
    assert_eq!(ctx2.host_id(), app2.id());
    assert!(!Arc::ptr_eq(&ctx1.load_type("es/Advice").unwrap(), &ctx2.load_type("es/Advice").unwrap()));
}

#[test]
fn modules_of_a_group_share_one_context() {
    let agent = common::agent();
    let rest = ModuleDescriptor::builder("es-rest", MemorySource::new().with_definition(type_with_id("es/RestHelper", "rest")))
        .helper("es/RestHelper")
        .group("elasticsearch")
        .build();
    let transport =
        ModuleDescriptor::builder("es-transport", MemorySource::new().with_definition(type_with_id("es/TransportHelper", "transport")))
            .helper("es/TransportHelper")
            .group("elasticsearch")
            .build();
    agent.register_module(rest).unwrap();
    agent.register_module(transport).unwrap();

    let app = agent.host_context("App1");
    let a = agent.registry().resolve_context("es-rest", &app).unwrap();
    let b = agent.registry().resolve_context("es-transport", &app).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.group(), "elasticsearch");
    assert_eq!(a.modules(), ["es-rest", "es-transport"]);
    assert_eq!(common::call_id(&a.load_type("es/TransportHelper").unwrap()), "transport");
    assert_eq!(common::call_id(&a.load_type("es/RestHelper").unwrap()), "rest");
}

#[test]
fn modules_joining_a_group_reach_its_existing_contexts() {
    let agent = common::agent();
    let grouped = |name: &str, advice: &str| {
        ModuleDescriptor::builder(name, MemorySource::new().with_definition(type_with_id(advice, "module")))
            .advice(advice)
            .group("g")
            .build()
    };
    agent.register_module(grouped("a", "g/A")).unwrap();
    let app = agent.host_context("App1");
    let site = agent.advice_call_site(&app, "a", "g/A", "id", "()Ljava/lang/String;").unwrap();
    assert_eq!(site.invoke(&[]).unwrap().as_str(), Some("module"));
    let existing = agent.registry().resolve_context("a", &app).unwrap();
    assert!(!existing.is_injected("g/B"));

    agent.register_module(grouped("b", "g/B")).unwrap();
    let ctx = agent.registry().resolve_context("b", &app).unwrap();
    assert!(Arc::ptr_eq(&ctx, &existing));
    assert_eq!(ctx.modules(), ["a", "b"]);
    assert_eq!(ctx.load_type("g/B").unwrap().namespace(), "g@App1");
    assert_eq!(agent.registry().group("g").unwrap().member_names(), ["a", "b"]);
    assert_eq!(agent.registry().constructed_contexts(), 1);

    let late = agent.advice_call_site(&app, "b", "g/B", "id", "()Ljava/lang/String;").unwrap();
    assert_eq!(late.invoke(&[]).unwrap().as_str(), Some("module"));
}

#[test]
fn module_code_may_resolve_its_own_context() {
    let agent = common::agent();
    let slot: Arc<OnceLock<(Weak<ModuleRegistry>, Weak<HostContext>)>> = Arc::new(OnceLock::new());
    let seen = Arc::new(Mutex::new(None));

    let (handles, resolved) = (slot.clone(), seen.clone());
    let source = MemorySource::new().with_supplier("m/Reentrant", move || {
        if let Some((registry, host)) = handles.get() {
            if let (Some(registry), Some(host)) = (registry.upgrade(), host.upgrade()) {
                let outcome = registry.resolve_context("M", &host);
                *resolved.lock().unwrap() = Some(outcome.map(|c| c.label().to_string()).map_err(|e| e.to_string()));
            }
        }
        Ok(TypeDefinition::builder("m/Reentrant").build()?)
    });
    agent.register_module(ModuleDescriptor::builder("M", source).helper("m/Reentrant").build()).unwrap();
    let app = agent.host_context("App1");
    slot.set((Arc::downgrade(agent.registry()), Arc::downgrade(&app))).unwrap();

    let ctx = agent.registry().resolve_context("M", &app).unwrap();
    ctx.load_type("m/Reentrant").unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(Ok("M@App1".to_string())));
    assert_eq!(agent.registry().constructed_contexts(), 1);
}

#[test]
fn unknown_module_is_a_load_error() {
    let agent = common::agent();
    let app = agent.host_context("App1");
    assert!(matches!(agent.registry().resolve_context("nope", &app), Err(LoadError::UnknownModule(m)) if m == "nope"));
}

#[test]
fn dropped_hosts_release_their_contexts() {
    let agent = common::agent();
    agent.register_module(module("es", &["es/Advice"], &["es/H"])).unwrap();
    let app = agent.host_context("App1");

    let site = agent.advice_call_site(&app, "es", "es/Advice", "id", "()Ljava/lang/String;").unwrap();
    assert_eq!(site.invoke(&[]).unwrap().as_str(), Some("module"));
    let ctx = Arc::downgrade(&agent.registry().resolve_context("es", &app).unwrap());
    assert_eq!(agent.registry().live_contexts(), 1);
    assert_eq!(app.retained_contexts(), 1);

    drop(site);
    drop(app);
    assert_eq!(agent.registry().purge(), 1);
    assert!(ctx.upgrade().is_none());
    assert_eq!(agent.registry().live_contexts(), 0);
    assert_eq!(agent.registry().cached_entries(), 0);

    // a new hosting context starts over
    let app = agent.host_context("App1");
    agent.registry().resolve_context("es", &app).unwrap();
    assert_eq!(agent.registry().constructed_contexts(), 2);
}
