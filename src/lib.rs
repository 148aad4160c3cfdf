//! # indy-linker
//!
//! Module isolation and call-site linking for a bytecode instrumentation
//! agent.
//!
//! An instrumentation agent rewrites application methods so that they call
//! out to *advice* code. This crate is the part that decides what such a
//! call actually reaches:
//! - every instrumentation module gets its own **isolated context** per
//!   hosting application namespace, so its helpers never resolve to an
//!   application's same-named types and two applications never share a copy
//! - an instrumented **call site** links itself on first execution and then
//!   dispatches directly to the bound handle
//! - contexts live exactly as long as the application namespace using them;
//!   the registry only holds weak references
//!
//! ## Features
//!
//! - **Self-first isolation**: defined, injected, agent, then host namespace
//! - **Exactly-once linking**: concurrent first invocations of a call site,
//!   and concurrent first use of a context key, do the work once
//! - **No escaping failures**: link errors and panics are logged and leave
//!   the call site uninstrumented
//! - **Real class files**: injected types may be decoded from `.class` bytes,
//!   or read from a jar with the `jar` feature
//!
//! ## Quick Start
//!
//! ```rust
//! use indy_linker::prelude::*;
//!
//! // Advice and helper types of one module. Bodies are native closures.
//! let advice = TypeDefinition::builder("es/RestAdvice")
//!     .static_method("onEnter", "(Ljava/lang/String;)I", |_, args| {
//!         Ok(Value::Int(args[0].as_str().map_or(0, |s| s.len() as i32)))
//!     })
//!     .build()
//!     .unwrap();
//! let module = ModuleDescriptor::builder("elasticsearch", MemorySource::new().with_definition(advice))
//!     .advice("es/RestAdvice")
//!     .build();
//!
//! let agent = IndyAgent::start(AgentConfig::default(), TypeNamespace::new("agent"));
//! agent.register_module(module).unwrap();
//!
//! // An instrumented call site inside application "App1".
//! let app = agent.host_context("App1");
//! let site = agent
//!     .advice_call_site(&app, "elasticsearch", "es/RestAdvice", "onEnter", "(Ljava/lang/String;)I")
//!     .unwrap();
//! assert_eq!(site.invoke(&[Value::str("GET /")]).unwrap().as_int(), Some(5));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        IndyAgent                         │
//! │        start / register_module / shutdown                │
//! ├─────────────────────────────────────────────────────────┤
//! │   CallSite ──► CallSiteLinker ◄── ProxyDispatchFactory   │
//! │        LinkRequest, ReentrancyGuard, Adaptation          │
//! ├─────────────────────────────────────────────────────────┤
//! │                     ModuleRegistry                       │
//! │   modules, advice owners, weak (group, host) cache       │
//! ├─────────────────────────────────────────────────────────┤
//! │                    IsolatedContext                       │
//! │   defined → injected → agent → host resolution           │
//! ├─────────────────────────────────────────────────────────┤
//! │   TypeNamespace / HostContext   TypeSource   classfile   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`agent`] | The agent service: start, registration, call sites, shutdown |
//! | [`registry`] | Module registry and weak context cache |
//! | [`context`] | Isolated contexts and the lookup exposer |
//! | [`linker`] | Link requests, the linker, call sites |
//! | [`proxy`] | Proxy dispatch factory |
//! | [`guard`] | Per-thread reentrancy counters |
//! | [`handle`] | Method handles, lookups, signature adaptation |
//! | [`descriptor`] | JVM descriptors and call-site erasure |
//! | [`classfile`] | Class file parser |
//! | [`types`], [`value`], [`namespace`], [`source`] | The runtime model |
//! | [`config`] | Agent option parsing |
//!
//! ## Logging
//!
//! Everything is logged through the [`log`] facade; install any logger you
//! like. Linking failures are logged at `error`, nested linkage at `warn`,
//! context construction at `debug`.

pub mod agent;
pub mod classfile;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod guard;
pub mod handle;
pub mod linker;
pub mod module;
pub mod namespace;
pub mod prelude;
pub mod proxy;
pub mod registry;
pub mod source;
pub mod types;
pub mod value;

mod sync;

pub use agent::IndyAgent;
pub use config::AgentConfig;
pub use context::IsolatedContext;
pub use error::{ConfigError, InvocationError, LinkError, LoadError, ProxyError, RegistrationError};
pub use handle::{Lookup, MethodHandle};
pub use linker::{CallSite, CallSiteLinker, LinkRequest};
pub use module::ModuleDescriptor;
pub use namespace::{HostContext, TypeNamespace};
pub use registry::ModuleRegistry;
pub use value::Value;
