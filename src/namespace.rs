//! Flat type namespaces: the agent's own namespace and the namespaces of
//! hosting applications.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use log::debug;

use crate::context::IsolatedContext;
use crate::error::LoadError;
use crate::sync::{lock, read, write};
use crate::types::{supertype_closure, LoadedType, TypeDefinition};

/// Anything types can be resolved through.
pub trait TypeResolver: Send + Sync {
    /// Human readable label, also stamped on every type the resolver defines.
    fn label(&self) -> &str;

    fn resolve(&self, name: &str) -> Result<Arc<LoadedType>, LoadError>;
}

/// A conventional parent-first namespace whose types are defined up front.
pub struct TypeNamespace {
    label: String,
    parent: Option<Arc<dyn TypeResolver>>,
    types: RwLock<HashMap<String, Arc<LoadedType>>>,
    me: Weak<TypeNamespace>,
}

impl TypeNamespace {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Self::build(label.into(), None)
    }

    pub fn with_parent(label: impl Into<String>, parent: Arc<dyn TypeResolver>) -> Arc<Self> {
        Self::build(label.into(), Some(parent))
    }

    fn build(label: String, parent: Option<Arc<dyn TypeResolver>>) -> Arc<Self> {
        Arc::new_cyclic(|me| TypeNamespace {
            label,
            parent,
            types: RwLock::new(HashMap::new()),
            me: me.clone(),
        })
    }

    /// Defines `def` here. Its supertypes resolve through this namespace, so
    /// they should be defined first.
    pub fn define(&self, def: TypeDefinition) -> Result<Arc<LoadedType>, LoadError> {
        let supertypes = supertype_closure(&def, self);
        let mut types = write(&self.types);
        if types.contains_key(def.name()) {
            return Err(LoadError::AlreadyDefined(def.name().to_string()));
        }
        let name = def.name().to_string();
        let definer: Weak<dyn TypeResolver> = self.me.clone();
        let ty = Arc::new(LoadedType::define(def, &self.label, supertypes, definer));
        types.insert(name, ty.clone());
        Ok(ty)
    }

    /// Types defined directly in this namespace, ignoring the parent.
    pub fn find_local(&self, name: &str) -> Option<Arc<LoadedType>> {
        read(&self.types).get(name).cloned()
    }

    pub fn len(&self) -> usize {
        read(&self.types).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TypeResolver for TypeNamespace {
    fn label(&self) -> &str {
        &self.label
    }

    fn resolve(&self, name: &str) -> Result<Arc<LoadedType>, LoadError> {
        if let Some(parent) = &self.parent {
            match parent.resolve(name) {
                Err(LoadError::TypeNotFound(_)) => {}
                other => return other,
            }
        }
        self.find_local(name).ok_or_else(|| LoadError::TypeNotFound(name.to_string()))
    }
}

impl fmt::Debug for TypeNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeNamespace").field("label", &self.label).field("types", &self.len()).finish()
    }
}

static NEXT_HOST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(u64);

impl HostId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host#{}", self.0)
    }
}

/// The namespace scope of instrumented application code.
///
/// A hosting context keeps the isolated contexts it uses alive, the
/// registry only refers to both weakly. Isolated contexts point back at the
/// hosting *namespace*, not at this struct, so dropping the last strong
/// reference to a hosting context releases everything hanging off it.
pub struct HostContext {
    id: HostId,
    namespace: Arc<TypeNamespace>,
    retained: Mutex<Vec<Arc<IsolatedContext>>>,
}

impl HostContext {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::from_namespace(TypeNamespace::new(name))
    }

    /// A hosting context whose namespace delegates parent-first to `parent`,
    /// e.g. a web application under a shared container namespace.
    pub fn with_parent(name: impl Into<String>, parent: Arc<dyn TypeResolver>) -> Arc<Self> {
        Self::from_namespace(TypeNamespace::with_parent(name, parent))
    }

    pub fn from_namespace(namespace: Arc<TypeNamespace>) -> Arc<Self> {
        let id = HostId(NEXT_HOST_ID.fetch_add(1, Ordering::Relaxed));
        debug!("created hosting context {} ({id})", namespace.label());
        Arc::new(HostContext { id, namespace, retained: Mutex::new(Vec::new()) })
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.namespace.label()
    }

    pub fn namespace(&self) -> &Arc<TypeNamespace> {
        &self.namespace
    }

    pub fn define(&self, def: TypeDefinition) -> Result<Arc<LoadedType>, LoadError> {
        self.namespace.define(def)
    }

    /// Keeps `context` alive for as long as this hosting context lives.
    pub fn retain(&self, context: Arc<IsolatedContext>) {
        let mut retained = lock(&self.retained);
        if !retained.iter().any(|c| Arc::ptr_eq(c, &context)) {
            retained.push(context);
        }
    }

    pub fn retained_contexts(&self) -> usize {
        lock(&self.retained).len()
    }
}

impl TypeResolver for HostContext {
    fn label(&self) -> &str {
        self.namespace.label()
    }

    fn resolve(&self, name: &str) -> Result<Arc<LoadedType>, LoadError> {
        self.namespace.resolve(name)
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext").field("id", &self.id).field("name", &self.name()).finish()
    }
}
