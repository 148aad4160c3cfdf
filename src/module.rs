//! Instrumentation module descriptors.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::source::TypeSource;
use crate::sync::{read, write};

/// A registered unit of instrumentation: the advice entry points it links
/// call sites to and the helper types those advices use.
///
/// Immutable once built; share it behind an `Arc`.
pub struct ModuleDescriptor {
    name: String,
    advice_names: BTreeSet<String>,
    helper_names: BTreeSet<String>,
    isolation_enabled: bool,
    eager_advice_load: bool,
    group_key: Option<String>,
    hidden_packages: Vec<String>,
    source: Arc<dyn TypeSource>,
}

impl ModuleDescriptor {
    pub fn builder(name: impl Into<String>, source: impl TypeSource + 'static) -> ModuleBuilder {
        Self::builder_with_source(name, Arc::new(source))
    }

    pub fn builder_with_source(name: impl Into<String>, source: Arc<dyn TypeSource>) -> ModuleBuilder {
        ModuleBuilder {
            module: ModuleDescriptor {
                name: name.into(),
                advice_names: BTreeSet::new(),
                helper_names: BTreeSet::new(),
                isolation_enabled: true,
                eager_advice_load: false,
                group_key: None,
                hidden_packages: Vec::new(),
                source,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn advice_names(&self) -> impl Iterator<Item = &str> {
        self.advice_names.iter().map(String::as_str)
    }

    pub fn helper_names(&self) -> impl Iterator<Item = &str> {
        self.helper_names.iter().map(String::as_str)
    }

    /// Every type name this module injects into its isolated context.
    pub fn injected_names(&self) -> impl Iterator<Item = &str> {
        self.helper_names().chain(self.advice_names())
    }

    pub fn injects(&self, name: &str) -> bool {
        self.helper_names.contains(name) || self.advice_names.contains(name)
    }

    pub fn isolation_enabled(&self) -> bool {
        self.isolation_enabled
    }

    pub fn eager_advice_load(&self) -> bool {
        self.eager_advice_load
    }

    /// Modules with the same key share one isolated context per hosting
    /// context. Defaults to the module name.
    pub fn group_key(&self) -> &str {
        self.group_key.as_deref().unwrap_or(&self.name)
    }

    /// Internal-name prefixes (`com/acme/`) that are never resolved through
    /// the agent namespace.
    pub fn hidden_packages(&self) -> &[String] {
        &self.hidden_packages
    }

    pub fn source(&self) -> &Arc<dyn TypeSource> {
        &self.source
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("group", &self.group_key())
            .field("advices", &self.advice_names)
            .field("helpers", &self.helper_names)
            .field("isolation_enabled", &self.isolation_enabled)
            .field("eager_advice_load", &self.eager_advice_load)
            .finish()
    }
}

pub struct ModuleBuilder {
    module: ModuleDescriptor,
}

impl ModuleBuilder {
    pub fn advice(mut self, name: impl Into<String>) -> Self {
        self.module.advice_names.insert(name.into());
        self
    }

    pub fn helper(mut self, name: impl Into<String>) -> Self {
        self.module.helper_names.insert(name.into());
        self
    }

    pub fn isolation(mut self, enabled: bool) -> Self {
        self.module.isolation_enabled = enabled;
        self
    }

    pub fn eager_advice_load(mut self, eager: bool) -> Self {
        self.module.eager_advice_load = eager;
        self
    }

    pub fn group(mut self, key: impl Into<String>) -> Self {
        self.module.group_key = Some(key.into());
        self
    }

    /// Hides a package, given in dotted (`com.acme`) or internal
    /// (`com/acme`) form, from agent namespace resolution.
    pub fn hide_package(mut self, package: &str) -> Self {
        self.module.hidden_packages.push(package_prefix(package));
        self
    }

    pub fn build(self) -> Arc<ModuleDescriptor> {
        Arc::new(self.module)
    }
}

/// The modules sharing one group key, in registration order.
///
/// The registry and every isolated context of the group hold the same
/// instance, so a module registered into the group later is visible to
/// contexts that already exist.
pub struct ModuleGroup {
    key: String,
    members: RwLock<Vec<Arc<ModuleDescriptor>>>,
}

impl ModuleGroup {
    pub(crate) fn new(key: impl Into<String>) -> Arc<Self> {
        Arc::new(ModuleGroup { key: key.into(), members: RwLock::new(Vec::new()) })
    }

    pub(crate) fn add(&self, module: Arc<ModuleDescriptor>) {
        write(&self.members).push(module);
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn members(&self) -> Vec<Arc<ModuleDescriptor>> {
        read(&self.members).clone()
    }

    pub fn member_names(&self) -> Vec<String> {
        read(&self.members).iter().map(|m| m.name().to_string()).collect()
    }

    /// Source of the first member injecting `name`.
    pub fn source_for(&self, name: &str) -> Option<Arc<dyn TypeSource>> {
        read(&self.members).iter().find(|m| m.injects(name)).map(|m| m.source().clone())
    }

    /// Whether some member hides the package of `name`.
    pub fn hides(&self, name: &str) -> bool {
        read(&self.members).iter().any(|m| is_hidden(m.hidden_packages(), name))
    }
}

impl fmt::Debug for ModuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleGroup").field("key", &self.key).field("members", &self.member_names()).finish()
    }
}

pub(crate) fn package_prefix(package: &str) -> String {
    let mut prefix = package.trim_end_matches(['.', '/']).replace('.', "/");
    prefix.push('/');
    prefix
}

pub(crate) fn is_hidden(prefixes: &[String], name: &str) -> bool {
    prefixes.iter().any(|p| name.starts_with(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    #[test]
    fn group_key_defaults_to_name() {
        let m = ModuleDescriptor::builder("es", MemorySource::new()).build();
        assert_eq!(m.group_key(), "es");
        let m = ModuleDescriptor::builder("es-rest", MemorySource::new()).group("es").build();
        assert_eq!(m.group_key(), "es");
    }

    #[test]
    fn hidden_packages_normalize() {
        let m = ModuleDescriptor::builder("m", MemorySource::new())
            .hide_package("com.acme.")
            .hide_package("org/lib")
            .build();
        assert_eq!(m.hidden_packages(), ["com/acme/", "org/lib/"]);
        assert!(is_hidden(m.hidden_packages(), "com/acme/Util"));
        assert!(!is_hidden(m.hidden_packages(), "com/acmex/Util"));
    }

    #[test]
    fn injected_names_cover_helpers_then_advices() {
        let m = ModuleDescriptor::builder("m", MemorySource::new())
            .advice("m/Advice")
            .helper("m/Helper")
            .build();
        assert_eq!(m.injected_names().collect::<Vec<_>>(), ["m/Helper", "m/Advice"]);
        assert!(m.injects("m/Advice") && !m.injects("m/Other"));
    }

    #[test]
    fn first_group_member_supplies_a_shared_name() {
        let group = ModuleGroup::new("g");
        let first = ModuleDescriptor::builder("a", MemorySource::new()).helper("g/Shared").build();
        let second = ModuleDescriptor::builder("b", MemorySource::new())
            .helper("g/Shared")
            .hide_package("org.lib")
            .build();
        group.add(first.clone());
        assert!(!group.hides("org/lib/Util"));
        group.add(second);

        assert_eq!(group.member_names(), ["a", "b"]);
        assert!(Arc::ptr_eq(&group.source_for("g/Shared").unwrap(), first.source()));
        assert!(group.source_for("g/Absent").is_none());
        assert!(group.hides("org/lib/Util"));
    }
}
