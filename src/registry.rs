//! The module registry and its weak context cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use log::{debug, info, trace};

use crate::context::IsolatedContext;
use crate::error::{LoadError, RegistrationError};
use crate::module::{ModuleDescriptor, ModuleGroup};
use crate::namespace::{HostContext, HostId, TypeResolver};
use crate::sync::{read, write, Claim, InFlight};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ContextKey {
    group: String,
    host: HostId,
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.group, self.host)
    }
}

/// Neither side is owned: the hosting context keeps the isolated context
/// alive, the entry only lets it be found again.
struct CacheEntry {
    host: Weak<HostContext>,
    context: Weak<IsolatedContext>,
}

impl CacheEntry {
    fn live(&self) -> Option<Arc<IsolatedContext>> {
        if self.host.strong_count() == 0 {
            return None;
        }
        self.context.upgrade()
    }
}

#[derive(Default)]
struct Modules {
    by_name: HashMap<String, Arc<ModuleDescriptor>>,
    advice_owner: HashMap<String, String>,
    groups: HashMap<String, Arc<ModuleGroup>>,
}

pub struct ModuleRegistry {
    agent: Arc<dyn TypeResolver>,
    hidden: Vec<String>,
    modules: RwLock<Modules>,
    cache: RwLock<HashMap<ContextKey, CacheEntry>>,
    construction: InFlight<ContextKey>,
    constructed: AtomicUsize,
}

impl ModuleRegistry {
    /// `agent` is the agent's own namespace; `hidden` are package prefixes
    /// never resolved through it, for every module.
    pub fn new(agent: Arc<dyn TypeResolver>, hidden: Vec<String>) -> Self {
        Self {
            agent,
            hidden,
            modules: RwLock::new(Modules::default()),
            cache: RwLock::new(HashMap::new()),
            construction: InFlight::new(),
            constructed: AtomicUsize::new(0),
        }
    }

    pub fn register(&self, module: Arc<ModuleDescriptor>) -> Result<(), RegistrationError> {
        if !module.isolation_enabled() {
            return Err(RegistrationError::IsolationDisabled(module.name().to_string()));
        }
        let mut modules = write(&self.modules);
        if modules.by_name.contains_key(module.name()) {
            return Err(RegistrationError::DuplicateModule(module.name().to_string()));
        }
        if let Some((advice, owner)) = module
            .advice_names()
            .find_map(|a| modules.advice_owner.get(a).map(|owner| (a, owner)))
        {
            return Err(RegistrationError::AdviceConflict {
                advice: advice.to_string(),
                module: module.name().to_string(),
                owner: owner.clone(),
            });
        }

        for advice in module.advice_names() {
            modules.advice_owner.insert(advice.to_string(), module.name().to_string());
        }
        modules
            .groups
            .entry(module.group_key().to_string())
            .or_insert_with(|| ModuleGroup::new(module.group_key()))
            .add(module.clone());
        modules.by_name.insert(module.name().to_string(), module.clone());
        info!(
            "registered instrumentation module {} (group {}, {} advices, {} helpers)",
            module.name(),
            module.group_key(),
            module.advice_names().count(),
            module.helper_names().count()
        );
        Ok(())
    }

    pub fn module(&self, name: &str) -> Option<Arc<ModuleDescriptor>> {
        read(&self.modules).by_name.get(name).cloned()
    }

    pub fn module_for_advice(&self, advice: &str) -> Option<Arc<ModuleDescriptor>> {
        let modules = read(&self.modules);
        let owner = modules.advice_owner.get(advice)?;
        modules.by_name.get(owner).cloned()
    }

    pub fn modules(&self) -> Vec<Arc<ModuleDescriptor>> {
        let mut all: Vec<_> = read(&self.modules).by_name.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// The isolated context of `module`'s group inside `host`, constructed
    /// on first use. Concurrent callers for the same key get the same
    /// instance.
    pub fn resolve_context(&self, module: &str, host: &Arc<HostContext>) -> Result<Arc<IsolatedContext>, LoadError> {
        let module = self.module(module).ok_or_else(|| LoadError::UnknownModule(module.to_string()))?;
        let key = ContextKey { group: module.group_key().to_string(), host: host.id() };
        loop {
            if let Some(context) = self.cached(&key) {
                return Ok(context);
            }
            match self.construction.claim(&key, || self.cached(&key).is_some()) {
                Claim::Finished => continue,
                // construction below never calls back into the registry, so
                // only a caller already inside this section can get here
                Claim::Recursive => return Err(LoadError::Circular(format!("isolated context {key}"))),
                Claim::Owned(_section) => {
                    let group = self
                        .group(&key.group)
                        .ok_or_else(|| LoadError::UnknownModule(module.name().to_string()))?;
                    let context = IsolatedContext::new(group, self.agent.clone(), host, &self.hidden);
                    write(&self.cache).insert(
                        key.clone(),
                        CacheEntry { host: Arc::downgrade(host), context: Arc::downgrade(&context) },
                    );
                    self.constructed.fetch_add(1, Ordering::Relaxed);
                    debug!("created isolated context {} for modules {:?}", context.label(), context.modules());
                    self.purge();
                    return Ok(context);
                }
            }
        }
    }

    /// Called once a type of `host` has been instrumented by `module`.
    /// Modules asking for eager advice loading get their advices loaded
    /// right away instead of on first link.
    pub fn on_type_instrumented(&self, module: &str, host: &Arc<HostContext>) -> Result<(), LoadError> {
        let descriptor = self.module(module).ok_or_else(|| LoadError::UnknownModule(module.to_string()))?;
        if descriptor.eager_advice_load() {
            self.load_advices(module, host)?;
        }
        Ok(())
    }

    /// Loads every advice of `module` into its context for `host`, which
    /// then retains the context.
    pub fn load_advices(&self, module: &str, host: &Arc<HostContext>) -> Result<Arc<IsolatedContext>, LoadError> {
        let descriptor = self.module(module).ok_or_else(|| LoadError::UnknownModule(module.to_string()))?;
        let context = self.resolve_context(module, host)?;
        for advice in descriptor.advice_names() {
            context.load_type(advice)?;
        }
        host.retain(context.clone());
        Ok(context)
    }

    /// Drops cache entries whose hosting context or isolated context is
    /// gone. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut cache = write(&self.cache);
        let before = cache.len();
        cache.retain(|_, entry| entry.live().is_some());
        let removed = before - cache.len();
        if removed > 0 {
            trace!("purged {removed} dead isolated contexts");
        }
        removed
    }

    /// Isolated contexts that are still reachable.
    pub fn live_contexts(&self) -> usize {
        read(&self.cache).values().filter(|e| e.live().is_some()).count()
    }

    /// Cache entries, dead ones included until the next purge.
    pub fn cached_entries(&self) -> usize {
        read(&self.cache).len()
    }

    /// Total number of contexts ever constructed.
    pub fn constructed_contexts(&self) -> usize {
        self.constructed.load(Ordering::Relaxed)
    }

    pub fn agent_namespace(&self) -> &Arc<dyn TypeResolver> {
        &self.agent
    }

    fn cached(&self, key: &ContextKey) -> Option<Arc<IsolatedContext>> {
        read(&self.cache).get(key).and_then(CacheEntry::live)
    }

    /// The live member list of group `key`, shared with its contexts.
    pub fn group(&self, key: &str) -> Option<Arc<ModuleGroup>> {
        read(&self.modules).groups.get(key).cloned()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &read(&self.modules).by_name.len())
            .field("live_contexts", &self.live_contexts())
            .finish()
    }
}
