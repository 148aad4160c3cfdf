//! Type definitions and loaded types.
//!
//! A [`TypeDefinition`] is what a namespace is handed when a type is
//! injected: the stand-in for class bytes. Member bodies are native
//! closures. Definitions are either built with [`TypeBuilder`] or decoded
//! from a real `.class` file, in which case bodies come from a
//! [`NativeTable`] keyed by name and descriptor, like JNI native
//! registration.
//!
//! Defining a definition in a namespace produces a [`LoadedType`], whose
//! identity is the pair (name, defining namespace).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::classfile::ClassFile;
use crate::descriptor::{MethodDescriptor, OBJECT};
use crate::error::{DescriptorError, InvocationError, SourceError};
use crate::handle::Lookup;
use crate::namespace::TypeResolver;
use crate::value::{JObject, Value};

pub const CONSTRUCTOR_NAME: &str = "<init>";
pub const INITIALIZER_NAME: &str = "<clinit>";

/// Body of a member. Instance members and constructors receive the receiver
/// (instance members only) followed by the declared arguments.
pub type NativeFn = Arc<dyn Fn(&Frame<'_>, &[Value]) -> Result<Value, InvocationError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Static,
    Constructor,
    Virtual,
    /// Static initializer; never linkable.
    Initializer,
}

impl MemberKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberKind::Static => "static",
            MemberKind::Constructor => "constructor",
            MemberKind::Virtual => "virtual",
            MemberKind::Initializer => "initializer",
        }
    }
}

#[derive(Clone)]
pub struct MemberDefinition {
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub kind: MemberKind,
    pub body: Option<NativeFn>,
}

impl fmt::Debug for MemberDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberDefinition")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor.to_string())
            .field("kind", &self.kind)
            .field("bound", &self.body.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TypeDefinition {
    name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    members: Vec<MemberDefinition>,
}

impl TypeDefinition {
    pub fn builder(name: impl Into<String>) -> TypeBuilder {
        TypeBuilder {
            def: TypeDefinition {
                name: name.into(),
                super_name: Some(OBJECT.to_string()),
                interfaces: Vec::new(),
                members: Vec::new(),
            },
            error: None,
        }
    }

    /// Decodes `bytes` and binds every method that has an entry in `natives`.
    /// Methods without a binding are kept so that they can be found, but
    /// invoking them fails with [`InvocationError::UnsatisfiedLink`].
    pub fn from_class_file(bytes: &[u8], natives: &NativeTable) -> Result<Self, SourceError> {
        let class = ClassFile::parse(bytes)?;
        let name = class.class_name()?.to_string();
        let super_name = class.super_name()?.map(str::to_string);
        let interfaces = class.interface_names()?.into_iter().map(str::to_string).collect();

        let mut members = Vec::with_capacity(class.methods.len());
        for method in &class.methods {
            let member_name = class.member_name(method)?;
            let raw_descriptor = class.member_descriptor(method)?;
            let descriptor = MethodDescriptor::parse(raw_descriptor)?;
            let kind = match member_name {
                CONSTRUCTOR_NAME => MemberKind::Constructor,
                INITIALIZER_NAME => MemberKind::Initializer,
                _ if method.is_static() => MemberKind::Static,
                _ => MemberKind::Virtual,
            };
            members.push(MemberDefinition {
                name: member_name.to_string(),
                kind,
                body: natives.get(member_name, raw_descriptor),
                descriptor,
            });
        }

        Ok(TypeDefinition { name, super_name, interfaces, members })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn super_name(&self) -> Option<&str> {
        self.super_name.as_deref()
    }

    pub fn members(&self) -> &[MemberDefinition] {
        &self.members
    }
}

/// Builder for programmatic definitions. Descriptor errors are collected
/// and reported by [`TypeBuilder::build`].
pub struct TypeBuilder {
    def: TypeDefinition,
    error: Option<DescriptorError>,
}

impl TypeBuilder {
    pub fn extends(mut self, super_name: impl Into<String>) -> Self {
        self.def.super_name = Some(super_name.into());
        self
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.def.interfaces.push(interface.into());
        self
    }

    pub fn static_method<F>(self, name: &str, descriptor: &str, body: F) -> Self
    where
        F: Fn(&Frame<'_>, &[Value]) -> Result<Value, InvocationError> + Send + Sync + 'static,
    {
        self.member(name, descriptor, MemberKind::Static, Some(Arc::new(body)))
    }

    pub fn constructor<F>(self, descriptor: &str, body: F) -> Self
    where
        F: Fn(&Frame<'_>, &[Value]) -> Result<Value, InvocationError> + Send + Sync + 'static,
    {
        self.member(CONSTRUCTOR_NAME, descriptor, MemberKind::Constructor, Some(Arc::new(body)))
    }

    pub fn virtual_method<F>(self, name: &str, descriptor: &str, body: F) -> Self
    where
        F: Fn(&Frame<'_>, &[Value]) -> Result<Value, InvocationError> + Send + Sync + 'static,
    {
        self.member(name, descriptor, MemberKind::Virtual, Some(Arc::new(body)))
    }

    pub fn static_initializer(self) -> Self {
        self.member(INITIALIZER_NAME, "()V", MemberKind::Initializer, None)
    }

    fn member(mut self, name: &str, descriptor: &str, kind: MemberKind, body: Option<NativeFn>) -> Self {
        match MethodDescriptor::parse(descriptor) {
            Ok(descriptor) => self.def.members.push(MemberDefinition {
                name: name.to_string(),
                descriptor,
                kind,
                body,
            }),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    pub fn build(self) -> Result<TypeDefinition, DescriptorError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.def),
        }
    }
}

/// Native bodies for class-file-backed definitions.
#[derive(Clone, Default)]
pub struct NativeTable {
    bodies: HashMap<(String, String), NativeFn>,
}

impl NativeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind<F>(mut self, name: &str, descriptor: &str, body: F) -> Self
    where
        F: Fn(&Frame<'_>, &[Value]) -> Result<Value, InvocationError> + Send + Sync + 'static,
    {
        self.bodies.insert((name.to_string(), descriptor.to_string()), Arc::new(body));
        self
    }

    pub fn get(&self, name: &str, descriptor: &str) -> Option<NativeFn> {
        self.bodies.get(&(name.to_string(), descriptor.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

pub struct Member {
    name: String,
    descriptor: MethodDescriptor,
    kind: MemberKind,
    body: Option<NativeFn>,
}

impl Member {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    pub fn is_bound(&self) -> bool {
        self.body.is_some()
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{}", self.kind.as_str(), self.name, self.descriptor)
    }
}

/// A supertype of a loaded type. `namespace` is the label of the namespace
/// that defined it, or `None` when the defining resolver could not find it
/// (platform types), in which case only its name is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    name: Arc<str>,
    namespace: Option<Arc<str>>,
}

impl TypeRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Whether this is `name` as defined by `namespace`. A `None` namespace
    /// matches any reference of the same name.
    pub fn is(&self, name: &str, namespace: Option<&str>) -> bool {
        *self.name == *name && (namespace.is_none() || self.namespace() == namespace)
    }
}

/// Every supertype of `def` other than `java/lang/Object`, transitively,
/// each resolved through `resolver`.
pub(crate) fn supertype_closure(def: &TypeDefinition, resolver: &dyn TypeResolver) -> Vec<TypeRef> {
    let mut closure: Vec<TypeRef> = Vec::new();
    for direct in def.super_name.iter().chain(def.interfaces.iter()) {
        if direct == OBJECT || closure.iter().any(|t| *t.name == **direct) {
            continue;
        }
        match resolver.resolve(direct) {
            Ok(ty) => {
                closure.push(TypeRef { name: ty.name_arc(), namespace: Some(ty.namespace_arc()) });
                for inherited in ty.supertypes.iter() {
                    if !closure.iter().any(|t| t.name == inherited.name) {
                        closure.push(inherited.clone());
                    }
                }
            }
            Err(_) => closure.push(TypeRef { name: Arc::from(direct.as_str()), namespace: None }),
        }
    }
    closure
}

/// A type defined in some namespace.
pub struct LoadedType {
    name: Arc<str>,
    namespace: Arc<str>,
    supertypes: Arc<[TypeRef]>,
    members: Vec<Member>,
    definer: Weak<dyn TypeResolver>,
}

impl LoadedType {
    /// `supertypes` is the closure computed by [`supertype_closure`].
    pub(crate) fn define(
        def: TypeDefinition,
        namespace: &str,
        supertypes: Vec<TypeRef>,
        definer: Weak<dyn TypeResolver>,
    ) -> Self {
        let members = def
            .members
            .into_iter()
            .map(|m| Member { name: m.name, descriptor: m.descriptor, kind: m.kind, body: m.body })
            .collect();
        Self {
            name: Arc::from(def.name.as_str()),
            namespace: Arc::from(namespace),
            supertypes: Arc::from(supertypes),
            members,
            definer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Label of the defining namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Direct and inherited supertypes, `java/lang/Object` excluded.
    pub fn supertypes(&self) -> &[TypeRef] {
        &self.supertypes
    }

    pub fn is_subtype_of(&self, name: &str) -> bool {
        name == OBJECT || *self.name == *name || self.supertypes.iter().any(|s| *s.name == *name)
    }

    pub(crate) fn find_member(&self, kind: MemberKind, name: &str, descriptor: &MethodDescriptor) -> Option<usize> {
        self.members
            .iter()
            .position(|m| m.kind == kind && m.name == name && m.descriptor == *descriptor)
    }

    /// A lookup scoped to the namespace that defined this type, if that
    /// namespace is still alive.
    pub fn defining_lookup(&self) -> Option<Lookup> {
        self.definer.upgrade().map(Lookup::new)
    }

    pub(crate) fn invoke_member(self: &Arc<Self>, index: usize, args: &[Value]) -> Result<Value, InvocationError> {
        let member = &self.members[index];
        let body = member.body.as_ref().ok_or_else(|| InvocationError::UnsatisfiedLink {
            owner: self.name.to_string(),
            name: member.name.clone(),
            descriptor: member.descriptor.to_string(),
        })?;
        body(&Frame { declaring: self }, args)
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.name.clone()
    }

    pub(crate) fn namespace_arc(&self) -> Arc<str> {
        self.namespace.clone()
    }

    pub(crate) fn supertypes_arc(&self) -> Arc<[TypeRef]> {
        self.supertypes.clone()
    }
}

impl fmt::Debug for LoadedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedType")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("members", &self.members)
            .finish()
    }
}

/// What a member body sees of its invocation.
pub struct Frame<'a> {
    declaring: &'a Arc<LoadedType>,
}

impl<'a> Frame<'a> {
    pub fn declaring_type(&self) -> &Arc<LoadedType> {
        self.declaring
    }

    /// Lookup scoped to the declaring type's own namespace, never the
    /// caller's.
    pub fn lookup(&self) -> Result<Lookup, InvocationError> {
        self.declaring
            .defining_lookup()
            .ok_or_else(|| InvocationError::NamespaceGone(self.declaring.namespace().to_string()))
    }

    /// Creates an instance of the declaring type; for constructor bodies.
    pub fn new_object<T: std::any::Any + Send + Sync>(&self, payload: T) -> Value {
        Value::Object(JObject::new(self.declaring, payload))
    }
}
