//! Common imports for wiring modules and call sites.
//!
//! This prelude is intentionally small. It covers the types most agents and
//! module authors use while avoiding over-broad re-exports.

pub use crate::agent::IndyAgent;
pub use crate::config::AgentConfig;
pub use crate::descriptor::MethodDescriptor;
pub use crate::linker::{CallSite, LinkRequest};
pub use crate::module::ModuleDescriptor;
pub use crate::namespace::{HostContext, TypeNamespace, TypeResolver};
pub use crate::source::{MemorySource, TypeSource};
pub use crate::types::{Frame, NativeTable, TypeDefinition};
pub use crate::value::{JObject, Value};
#[cfg(feature = "jar")]
pub use crate::source::JarSource;
