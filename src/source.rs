//! Suppliers of injected type definitions.
//!
//! A module does not hand its types over eagerly. It names them, and a
//! [`TypeSource`] produces a definition the first time an isolated context
//! actually needs one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::SourceError;
use crate::types::{NativeTable, TypeDefinition};

pub trait TypeSource: Send + Sync {
    /// Produces a fresh definition of `name`. Called at most once per
    /// isolated context and type name.
    fn locate(&self, name: &str) -> Result<TypeDefinition, SourceError>;
}

type Supplier = Arc<dyn Fn() -> Result<TypeDefinition, SourceError> + Send + Sync>;

/// Definitions held in memory, either ready-made, as raw class bytes that
/// are decoded on demand, or behind an arbitrary supplier.
#[derive(Clone, Default)]
pub struct MemorySource {
    entries: HashMap<String, Supplier>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definition(self, def: TypeDefinition) -> Self {
        let name = def.name().to_string();
        self.with_supplier(name, move || Ok(def.clone()))
    }

    /// Registers `.class` bytes under `name`; decoding happens on `locate`.
    pub fn with_class_bytes(self, name: impl Into<String>, bytes: Vec<u8>, natives: NativeTable) -> Self {
        let bytes: Arc<[u8]> = Arc::from(bytes);
        self.with_supplier(name, move || TypeDefinition::from_class_file(&bytes, &natives))
    }

    pub fn with_supplier<F>(mut self, name: impl Into<String>, supplier: F) -> Self
    where
        F: Fn() -> Result<TypeDefinition, SourceError> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(supplier));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

impl TypeSource for MemorySource {
    fn locate(&self, name: &str) -> Result<TypeDefinition, SourceError> {
        let supplier = self.entries.get(name).ok_or_else(|| SourceError::Missing(name.to_string()))?;
        supplier()
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("MemorySource").field("types", &names).finish()
    }
}

#[cfg(feature = "jar")]
pub use jar::JarSource;

#[cfg(feature = "jar")]
mod jar {
    use std::fs::File;
    use std::io::Read;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use zip::ZipArchive;

    use super::TypeSource;
    use crate::error::SourceError;
    use crate::sync::lock;
    use crate::types::{NativeTable, TypeDefinition};

    /// Reads `<name>.class` entries from a jar and binds their methods from a
    /// native table.
    pub struct JarSource {
        path: PathBuf,
        archive: Mutex<ZipArchive<File>>,
        natives: NativeTable,
    }

    impl JarSource {
        pub fn open(path: impl AsRef<Path>, natives: NativeTable) -> Result<Self, SourceError> {
            let path = path.as_ref().to_path_buf();
            let archive = ZipArchive::new(File::open(&path)?)?;
            Ok(Self { path, archive: Mutex::new(archive), natives })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Internal names of every class entry in the jar.
        pub fn class_names(&self) -> Vec<String> {
            let archive = lock(&self.archive);
            let mut names: Vec<String> = archive
                .file_names()
                .filter_map(|n| n.strip_suffix(".class"))
                .map(str::to_string)
                .collect();
            names.sort();
            names
        }
    }

    impl TypeSource for JarSource {
        fn locate(&self, name: &str) -> Result<TypeDefinition, SourceError> {
            let mut bytes = Vec::new();
            {
                let mut archive = lock(&self.archive);
                let mut entry = match archive.by_name(&format!("{name}.class")) {
                    Ok(entry) => entry,
                    Err(zip::result::ZipError::FileNotFound) => return Err(SourceError::Missing(name.to_string())),
                    Err(e) => return Err(e.into()),
                };
                entry.read_to_end(&mut bytes)?;
            }
            TypeDefinition::from_class_file(&bytes, &self.natives)
        }
    }
}
