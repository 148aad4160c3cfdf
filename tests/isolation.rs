mod common;

use std::sync::{Arc, Mutex, OnceLock, Weak};

use common::{call_id, define_with_id, type_with_id};
use indy_linker::context::LOOKUP_EXPOSER;
use indy_linker::descriptor::FieldType;
use indy_linker::error::{InvocationError, LoadError, SourceError};
use indy_linker::prelude::*;
use indy_linker::IsolatedContext;

fn helper_module() -> Arc<ModuleDescriptor> {
    let source = MemorySource::new().with_definition(type_with_id("m/H", "module"));
    ModuleDescriptor::builder("M", source).helper("m/H").build()
}

#[test]
fn module_types_shadow_same_named_host_types() {
    let agent = common::agent();
    agent.register_module(helper_module()).unwrap();
    let app1 = agent.host_context("App1");
    let app2 = agent.host_context("App2");
    define_with_id(&app1, "m/H", "host");

    let ctx1 = agent.registry().resolve_context("M", &app1).unwrap();
    let ctx2 = agent.registry().resolve_context("M", &app2).unwrap();
    let in_ctx1 = ctx1.load_type("m/H").unwrap();
    let in_ctx2 = ctx2.load_type("m/H").unwrap();

    assert_eq!(in_ctx1.namespace(), "M@App1");
    assert_eq!(call_id(&in_ctx1), "module");
    assert_eq!(in_ctx2.namespace(), "M@App2");
    assert!(!Arc::ptr_eq(&in_ctx1, &in_ctx2));

    // the host still sees its own copy
    let in_host = app1.namespace().find_local("m/H").unwrap();
    assert_eq!(in_host.namespace(), "App1");
    assert_eq!(call_id(&in_host), "host");

    // defined once, then served from the context
    assert!(Arc::ptr_eq(&in_ctx1, &ctx1.load_type("m/H").unwrap()));
}

#[test]
fn injected_types_are_defined_lazily() {
    let agent = common::agent();
    agent.register_module(helper_module()).unwrap();
    let app = agent.host_context("App1");

    let ctx = agent.registry().resolve_context("M", &app).unwrap();
    assert!(ctx.defined_types().is_empty());
    assert!(ctx.is_injected("m/H"));
    assert!(ctx.is_injected(LOOKUP_EXPOSER));
    ctx.load_type("m/H").unwrap();
    assert_eq!(ctx.defined_types(), ["m/H"]);
}

#[test]
fn hidden_packages_skip_the_agent_namespace() {
    let agent = IndyAgent::start(
        AgentConfig { hidden_packages: vec!["com/acme/shaded/".into()], ..AgentConfig::default() },
        TypeNamespace::new("agent"),
    );
    for name in ["org/slf4j/Logger", "com/acme/AgentUtil", "com/acme/shaded/Json"] {
        agent.agent_namespace().define(type_with_id(name, "agent")).unwrap();
    }
    let hiding = ModuleDescriptor::builder("hiding", MemorySource::new()).hide_package("org.slf4j").build();
    let plain = ModuleDescriptor::builder("plain", MemorySource::new()).build();
    agent.register_modules([hiding, plain]);

    let app = agent.host_context("App1");
    define_with_id(&app, "org/slf4j/Logger", "host");
    define_with_id(&app, "com/acme/shaded/Json", "host");

    let hiding = agent.registry().resolve_context("hiding", &app).unwrap();
    assert_eq!(call_id(&hiding.load_type("org/slf4j/Logger").unwrap()), "host");
    assert_eq!(call_id(&hiding.load_type("com/acme/AgentUtil").unwrap()), "agent");

    let plain = agent.registry().resolve_context("plain", &app).unwrap();
    assert_eq!(call_id(&plain.load_type("org/slf4j/Logger").unwrap()), "agent");
    // hidden for every module by the agent options
    assert_eq!(call_id(&plain.load_type("com/acme/shaded/Json").unwrap()), "host");
}

#[test]
fn unknown_names_fall_back_to_the_host() {
    let agent = common::agent();
    agent.register_module(helper_module()).unwrap();
    let container = TypeNamespace::new("container");
    container.define(type_with_id("javax/servlet/Servlet", "container")).unwrap();
    let app = HostContext::with_parent("webapp", container);
    define_with_id(&app, "org/acme/Lib", "host");

    let ctx = agent.registry().resolve_context("M", &app).unwrap();
    let lib = ctx.load_type("org/acme/Lib").unwrap();
    assert_eq!(lib.namespace(), "webapp");
    assert_eq!(ctx.load_type("javax/servlet/Servlet").unwrap().namespace(), "container");
    assert!(matches!(ctx.load_type("org/acme/Nope"), Err(LoadError::TypeNotFound(n)) if n == "org/acme/Nope"));
    assert!(!ctx.is_defined("org/acme/Lib"));
}

#[test]
fn supplier_failures_surface_with_their_cause() {
    let agent = common::agent();
    let source = MemorySource::new()
        .with_supplier("m/Renamed", || Ok(TypeDefinition::builder("m/Other").build()?))
        .with_supplier("m/Gone", || Err(SourceError::Missing("m/Gone.class".into())));
    agent
        .register_module(ModuleDescriptor::builder("M", source).helper("m/Renamed").helper("m/Gone").helper("m/Unsupplied").build())
        .unwrap();
    let app = agent.host_context("App1");
    let ctx = agent.registry().resolve_context("M", &app).unwrap();

    assert!(matches!(
        ctx.load_type("m/Renamed"),
        Err(LoadError::WrongName { requested, declared }) if requested == "m/Renamed" && declared == "m/Other"
    ));
    assert!(matches!(
        ctx.load_type("m/Gone"),
        Err(LoadError::Source { name, source: SourceError::Missing(what) }) if name == "m/Gone" && what == "m/Gone.class"
    ));
    assert!(matches!(
        ctx.load_type("m/Unsupplied"),
        Err(LoadError::Source { source: SourceError::Missing(_), .. })
    ));
    assert!(ctx.defined_types().is_empty());
}

#[test]
fn exposed_lookup_is_scoped_to_the_context() {
    let agent = common::agent();
    agent.register_module(helper_module()).unwrap();
    let app = agent.host_context("App1");
    define_with_id(&app, "m/H", "host");
    let ctx = agent.registry().resolve_context("M", &app).unwrap();

    let lookup = ctx.lookup().unwrap();
    assert_eq!(lookup.namespace(), "M@App1");
    assert!(ctx.is_defined(LOOKUP_EXPOSER));
    assert_eq!(call_id(&lookup.load_type("m/H").unwrap()), "module");
    assert_eq!(ctx.load_type(LOOKUP_EXPOSER).unwrap().namespace(), "M@App1");
}

#[test]
fn defining_a_type_from_its_own_supplier_is_circular() {
    let agent = common::agent();
    let slot: Arc<OnceLock<Weak<IsolatedContext>>> = Arc::new(OnceLock::new());
    let outcome = Arc::new(Mutex::new(None));

    let (ctx_slot, seen) = (slot.clone(), outcome.clone());
    let source = MemorySource::new().with_supplier("m/A", move || {
        if let Some(ctx) = ctx_slot.get().and_then(Weak::upgrade) {
            let nested = ctx.load_type("m/A");
            *seen.lock().unwrap() = Some(matches!(nested, Err(LoadError::Circular(n)) if n == "m/A"));
        }
        Ok(TypeDefinition::builder("m/A").build()?)
    });
    agent.register_module(ModuleDescriptor::builder("M", source).helper("m/A").build()).unwrap();
    let app = agent.host_context("App1");
    let ctx = agent.registry().resolve_context("M", &app).unwrap();
    slot.set(Arc::downgrade(&ctx)).unwrap();

    assert_eq!(ctx.load_type("m/A").unwrap().namespace(), "M@App1");
    assert_eq!(*outcome.lock().unwrap(), Some(true));
}

#[test]
fn same_named_host_objects_fail_module_casts() {
    let agent = common::agent();
    let take = TypeDefinition::builder("m/Take")
        .static_method("take", "(Lm/H;)I", |_, _| Ok(Value::Int(1)))
        .build()
        .unwrap();
    let source = MemorySource::new().with_definition(type_with_id("m/H", "module")).with_definition(take);
    agent.register_module(ModuleDescriptor::builder("M", source).helper("m/H").advice("m/Take").build()).unwrap();
    let app = agent.host_context("App1");
    define_with_id(&app, "m/H", "host");

    let host_h = Value::Object(JObject::new(&app.namespace().find_local("m/H").unwrap(), ()));
    // by name alone the host copy would pass
    assert!(host_h.conforms_to(&FieldType::reference("m/H")));

    let site = agent.advice_call_site(&app, "M", "m/Take", "take", "(Lm/H;)I").unwrap();
    assert!(matches!(
        site.invoke(&[host_h]),
        Err(InvocationError::ClassCast { value, target }) if value == "m/H@App1" && target == "Lm/H;"
    ));

    let ctx = agent.registry().resolve_context("M", &app).unwrap();
    let module_h = Value::Object(JObject::new(&ctx.load_type("m/H").unwrap(), ()));
    assert_eq!(site.invoke(&[module_h]).unwrap().as_int(), Some(1));
    assert!(site.is_bound());
}
