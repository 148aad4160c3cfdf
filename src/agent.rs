//! The agent service tying registry and linker together.

use std::sync::Arc;

use log::{error, info, warn};

use crate::config::AgentConfig;
use crate::descriptor::MethodDescriptor;
use crate::error::{ConfigError, DescriptorError, LoadError, RegistrationError};
use crate::linker::{CallSite, CallSiteLinker, LinkRequest};
use crate::module::ModuleDescriptor;
use crate::namespace::{HostContext, TypeNamespace, TypeResolver};
use crate::proxy::ProxyDispatchFactory;
use crate::registry::ModuleRegistry;
use crate::value::Value;

/// Owns the module registry and the call-site linker of one agent.
///
/// Constructed explicitly at startup; there is no global instance. Dropping
/// the agent does not invalidate handles that were already bound.
pub struct IndyAgent {
    config: AgentConfig,
    agent_namespace: Arc<TypeNamespace>,
    registry: Arc<ModuleRegistry>,
    linker: Arc<CallSiteLinker>,
}

impl IndyAgent {
    pub fn start(config: AgentConfig, agent_namespace: Arc<TypeNamespace>) -> Self {
        let registry = Arc::new(ModuleRegistry::new(agent_namespace.clone(), config.hidden_packages.clone()));
        let linker = Arc::new(
            CallSiteLinker::new(registry.clone())
                .with_stack_capture(config.capture_stacks)
                .with_verbose(config.verbose),
        );
        info!(
            "indy agent started (agent namespace {}, {} hidden packages)",
            agent_namespace.label(),
            config.hidden_packages.len()
        );
        Self { config, agent_namespace, registry, linker }
    }

    /// Starts the agent from a JVM agent option string.
    pub fn from_options(options: &str, agent_namespace: Arc<TypeNamespace>) -> Result<Self, ConfigError> {
        let config = AgentConfig::parse(options)?;
        Ok(Self::start(config, agent_namespace))
    }

    /// Registers one module. Failures are logged and returned; they never
    /// affect modules registered before.
    pub fn register_module(&self, module: Arc<ModuleDescriptor>) -> Result<(), RegistrationError> {
        let name = module.name().to_string();
        self.registry.register(module).map_err(|e| {
            error!("failed to register instrumentation module {name}: {e}");
            e
        })
    }

    /// Registers every module it can, returning how many were accepted.
    pub fn register_modules(&self, modules: impl IntoIterator<Item = Arc<ModuleDescriptor>>) -> usize {
        modules.into_iter().filter(|m| self.register_module(m.clone()).is_ok()).count()
    }

    pub fn host_context(&self, name: impl Into<String>) -> Arc<HostContext> {
        HostContext::new(name)
    }

    /// An instrumented call site in `caller` with raw bootstrap constants.
    pub fn call_site(
        &self,
        caller: &Arc<HostContext>,
        name: &str,
        erased: MethodDescriptor,
        args: Vec<Value>,
    ) -> CallSite {
        CallSite::new(self.linker.clone(), caller.clone(), name, erased, args)
    }

    /// The call site the rewriter emits for advice method `name` with
    /// `descriptor` on `advice_type`. The site's own signature is the erased
    /// descriptor.
    pub fn advice_call_site(
        &self,
        caller: &Arc<HostContext>,
        module: &str,
        advice_type: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<CallSite, DescriptorError> {
        let erased = MethodDescriptor::parse(descriptor)?.erase();
        let request = LinkRequest::Advice {
            module: module.to_string(),
            descriptor: descriptor.to_string(),
            advice_type: advice_type.to_string(),
        };
        Ok(self.call_site(caller, name, erased, request.to_args()))
    }

    pub fn proxy_factory(&self, module: impl Into<String>) -> ProxyDispatchFactory {
        ProxyDispatchFactory::new(module)
    }

    /// Notifies the agent that `module` instrumented a type of `host`.
    pub fn type_instrumented(&self, module: &str, host: &Arc<HostContext>) -> Result<(), LoadError> {
        let result = if self.config.eager_advice {
            self.registry.load_advices(module, host).map(drop)
        } else {
            self.registry.on_type_instrumented(module, host)
        };
        if let Err(e) = &result {
            warn!("eager advice loading of {module} for {} failed: {e}", host.name());
        }
        result
    }

    /// Stops linking. Already bound call sites keep working; sites that
    /// have not linked yet stay uninstrumented.
    pub fn shutdown(&self) {
        self.linker.shut_down();
        let purged = self.registry.purge();
        info!("indy agent shut down ({purged} dead contexts purged, {} live)", self.registry.live_contexts());
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn agent_namespace(&self) -> &Arc<TypeNamespace> {
        &self.agent_namespace
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn linker(&self) -> &Arc<CallSiteLinker> {
        &self.linker
    }
}
