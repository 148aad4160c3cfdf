//! Isolated execution contexts.
//!
//! Each (module group, hosting context) pair gets its own private namespace.
//! Resolution is self-first: types already defined here win, then injected
//! types are defined from their module's source, then the agent namespace is
//! asked (unless the package is hidden) and finally the hosting namespace.
//! Two applications using the same module therefore see distinct copies of
//! its helpers, each linked against that application's own library types.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use log::trace;

use crate::descriptor::MethodDescriptor;
use crate::error::{LinkError, LoadError};
use crate::handle::Lookup;
use crate::module::{is_hidden, ModuleGroup};
use crate::namespace::{HostContext, HostId, TypeNamespace, TypeResolver};
use crate::sync::{read, write, Claim, InFlight};
use crate::types::{supertype_closure, LoadedType, TypeDefinition};
use crate::value::{JObject, Value};

/// Injected into every isolated context; exposes a lookup scoped to it.
pub const LOOKUP_EXPOSER: &str = "indy/LookupExposer";
pub const LOOKUP_TYPE: &str = "java/lang/invoke/MethodHandles$Lookup";
const GET_LOOKUP: &str = "getLookup";
const GET_LOOKUP_DESCRIPTOR: &str = "()Ljava/lang/invoke/MethodHandles$Lookup;";

fn lookup_exposer() -> Result<TypeDefinition, LoadError> {
    TypeDefinition::builder(LOOKUP_EXPOSER)
        .static_method(GET_LOOKUP, GET_LOOKUP_DESCRIPTOR, |frame, _| {
            Ok(Value::Object(JObject::platform(LOOKUP_TYPE, frame.lookup()?)))
        })
        .build()
        .map_err(|e| LoadError::Source { name: LOOKUP_EXPOSER.to_string(), source: e.into() })
}

pub struct IsolatedContext {
    label: String,
    group: Arc<ModuleGroup>,
    host: HostId,
    hidden: Vec<String>,
    agent: Arc<dyn TypeResolver>,
    host_namespace: Arc<TypeNamespace>,
    defined: RwLock<HashMap<String, Arc<LoadedType>>>,
    defining: InFlight<String>,
    me: Weak<IsolatedContext>,
}

impl IsolatedContext {
    /// Builds the context of `group` in `host`. Every module of the group,
    /// including ones registered after construction, contributes its
    /// helpers and advices; the first module naming a type supplies it.
    pub(crate) fn new(
        group: Arc<ModuleGroup>,
        agent: Arc<dyn TypeResolver>,
        host: &HostContext,
        hidden: &[String],
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| IsolatedContext {
            label: format!("{}@{}", group.key(), host.name()),
            group,
            host: host.id(),
            hidden: hidden.to_vec(),
            agent,
            host_namespace: host.namespace().clone(),
            defined: RwLock::new(HashMap::new()),
            defining: InFlight::new(),
            me: me.clone(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn group(&self) -> &str {
        self.group.key()
    }

    pub fn host_id(&self) -> HostId {
        self.host
    }

    /// Names of the modules whose types this context injects.
    pub fn modules(&self) -> Vec<String> {
        self.group.member_names()
    }

    pub fn is_injected(&self, name: &str) -> bool {
        name == LOOKUP_EXPOSER || self.group.source_for(name).is_some()
    }

    pub fn is_defined(&self, name: &str) -> bool {
        read(&self.defined).contains_key(name)
    }

    /// Names of the types defined in this context so far, sorted.
    pub fn defined_types(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.defined).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn load_type(&self, name: &str) -> Result<Arc<LoadedType>, LoadError> {
        if let Some(ty) = read(&self.defined).get(name) {
            return Ok(ty.clone());
        }
        if self.is_injected(name) {
            return self.define_injected(name);
        }
        if !is_hidden(&self.hidden, name) && !self.group.hides(name) {
            match self.agent.resolve(name) {
                Err(LoadError::TypeNotFound(_)) => {}
                other => return other,
            }
        }
        self.host_namespace.resolve(name)
    }

    /// A lookup scoped to this context, obtained through the injected
    /// lookup exposer the same way module code would obtain one.
    pub fn lookup(&self) -> Result<Lookup, LinkError> {
        let exposer = self.load_type(LOOKUP_EXPOSER)?;
        let own = exposer
            .defining_lookup()
            .ok_or_else(|| LinkError::LookupUnavailable(self.label.clone()))?;
        let descriptor = MethodDescriptor::parse(GET_LOOKUP_DESCRIPTOR)?;
        let result = own.find_static(&exposer, GET_LOOKUP, &descriptor)?.invoke(&[])?;
        result
            .as_object()
            .and_then(|obj| obj.downcast_ref::<Lookup>())
            .cloned()
            .ok_or_else(|| LinkError::LookupUnavailable(result.type_label()))
    }

    fn define_injected(&self, name: &str) -> Result<Arc<LoadedType>, LoadError> {
        let key = name.to_string();
        match self.defining.claim(&key, || self.is_defined(name)) {
            Claim::Finished => {
                read(&self.defined).get(name).cloned().ok_or(LoadError::TypeNotFound(key))
            }
            Claim::Recursive => Err(LoadError::Circular(key)),
            Claim::Owned(_section) => {
                let def = self.supply(name)?;
                if def.name() != name {
                    return Err(LoadError::WrongName { requested: key, declared: def.name().to_string() });
                }
                let supertypes = supertype_closure(&def, self);
                let definer: Weak<dyn TypeResolver> = self.me.clone();
                let ty = Arc::new(LoadedType::define(def, &self.label, supertypes, definer));
                write(&self.defined).insert(key, ty.clone());
                trace!("defined {name} in {}", self.label);
                Ok(ty)
            }
        }
    }

    fn supply(&self, name: &str) -> Result<TypeDefinition, LoadError> {
        if name == LOOKUP_EXPOSER {
            return lookup_exposer();
        }
        let source = self.group.source_for(name).ok_or_else(|| LoadError::TypeNotFound(name.to_string()))?;
        source.locate(name).map_err(|source| LoadError::Source { name: name.to_string(), source })
    }
}

impl TypeResolver for IsolatedContext {
    fn label(&self) -> &str {
        &self.label
    }

    fn resolve(&self, name: &str) -> Result<Arc<LoadedType>, LoadError> {
        self.load_type(name)
    }
}

impl fmt::Debug for IsolatedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolatedContext")
            .field("label", &self.label)
            .field("host", &self.host)
            .field("modules", &self.modules())
            .field("defined", &self.defined_types())
            .finish()
    }
}
