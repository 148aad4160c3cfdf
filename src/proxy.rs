//! Forwarding entry points into isolated contexts.
//!
//! Agent code cannot refer to types that only exist inside an isolated
//! context. A proxy mirrors one member of such a type; its body is a call
//! site whose bootstrap constants form a `proxy` link request, so the real
//! member is only resolved when the proxy first runs.

use std::sync::Arc;

use crate::descriptor::{FieldType, MethodDescriptor};
use crate::error::ProxyError;
use crate::linker::{CallSite, CallSiteLinker, DispatchShape, LinkRequest};
use crate::namespace::HostContext;
use crate::types::{LoadedType, Member, MemberKind};
use crate::value::Value;

/// A generated forwarding member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyMethod {
    name: String,
    descriptor: MethodDescriptor,
    shape: DispatchShape,
    request: LinkRequest,
}

impl ProxyMethod {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The proxy's own signature: constructors return `java/lang/Object`,
    /// instance members take a leading `java/lang/Object` receiver.
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn shape(&self) -> DispatchShape {
        self.shape
    }

    pub fn request(&self) -> &LinkRequest {
        &self.request
    }

    pub fn bootstrap_args(&self) -> Vec<Value> {
        self.request.to_args()
    }

    /// The deferring body of this proxy as seen from `caller`.
    pub fn call_site(&self, linker: Arc<CallSiteLinker>, caller: Arc<HostContext>) -> CallSite {
        CallSite::new(linker, caller, self.name.clone(), self.descriptor.clone(), self.bootstrap_args())
    }
}

/// Creates proxies for the types of one module.
#[derive(Debug, Clone)]
pub struct ProxyDispatchFactory {
    module: String,
}

impl ProxyDispatchFactory {
    pub fn new(module: impl Into<String>) -> Self {
        Self { module: module.into() }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn proxy_member(&self, target: &LoadedType, member: &Member) -> Result<ProxyMethod, ProxyError> {
        let (shape, descriptor) = match member.kind() {
            MemberKind::Constructor => {
                (DispatchShape::Constructor, member.descriptor().with_return(Some(FieldType::object())))
            }
            MemberKind::Static => (DispatchShape::Static, member.descriptor().clone()),
            MemberKind::Virtual => (DispatchShape::Virtual, member.descriptor().with_leading(FieldType::object())),
            MemberKind::Initializer => return Err(ProxyError::UnknownMemberShape(member.name().to_string())),
        };
        Ok(ProxyMethod {
            name: member.name().to_string(),
            descriptor,
            shape,
            request: LinkRequest::Proxy {
                module: self.module.clone(),
                proxied_type: target.name().to_string(),
                shape,
            },
        })
    }

    /// Proxies for every member of `target` that can be proxied.
    pub fn proxy_type(&self, target: &LoadedType) -> Vec<ProxyMethod> {
        target.members().iter().filter_map(|m| self.proxy_member(target, m).ok()).collect()
    }
}
