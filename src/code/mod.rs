pub mod conflicts;

use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{EngineError, Result};

/// Compiled bytes for a single class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bytecode {
    class_name: String,
    bytes: Arc<[u8]>,
}

impl Bytecode {
    pub fn new(class_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Result<Self> {
        let class_name = class_name.into();
        if class_name.is_empty() {
            return Err(EngineError::invalid_argument("Class name is empty."));
        }
        Ok(Self {
            class_name,
            bytes: bytes.into(),
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// What a single source contributed to a compilation: its main class,
/// every class it produced and the stamp it carried when compiled.
#[derive(Debug, Clone)]
pub struct CompiledSourceInfo {
    source_id: String,
    main_class_name: String,
    class_names: BTreeSet<String>,
    last_modified_at_compile_time: i64,
}

impl CompiledSourceInfo {
    pub fn new(
        source_id: impl Into<String>,
        main_class_name: impl Into<String>,
        class_names: BTreeSet<String>,
        last_modified_at_compile_time: i64,
    ) -> Result<Self> {
        let source_id = source_id.into();
        let main_class_name = main_class_name.into();
        if source_id.is_empty() {
            return Err(EngineError::invalid_argument("Source id is empty."));
        }
        if main_class_name.is_empty() {
            return Err(EngineError::invalid_argument("Main class name is empty."));
        }
        if !class_names.contains(&main_class_name) {
            return Err(EngineError::invalid_argument(format!(
                "Main class '{main_class_name}' is not among the class names of source '{source_id}'."
            )));
        }
        Ok(Self {
            source_id,
            main_class_name,
            class_names,
            last_modified_at_compile_time,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn main_class_name(&self) -> &str {
        &self.main_class_name
    }

    pub fn class_names(&self) -> &BTreeSet<String> {
        &self.class_names
    }

    pub fn last_modified_at_compile_time(&self) -> i64 {
        self.last_modified_at_compile_time
    }
}

/// Immutable output of compiling one or more sources together.
///
/// Frozen at construction; lookups go through two indices, source id to
/// [`CompiledSourceInfo`] and class name to [`Bytecode`].
#[derive(Debug)]
pub struct Code {
    name: String,
    infos: AHashMap<String, CompiledSourceInfo>,
    bytecodes: AHashMap<String, Arc<Bytecode>>,
}

impl Code {
    /// Builds a code artifact, validating that class names are unique and
    /// that every declared class name has bytecode.
    pub fn new(
        name: impl Into<String>,
        infos: Vec<CompiledSourceInfo>,
        bytecodes: Vec<Bytecode>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(EngineError::invalid_argument("Code name is empty."));
        }
        let mut by_class = AHashMap::with_capacity(bytecodes.len());
        for bytecode in bytecodes {
            let class_name = bytecode.class_name().to_owned();
            if by_class.insert(class_name.clone(), Arc::new(bytecode)).is_some() {
                return Err(EngineError::invalid_argument(format!(
                    "Duplicate bytecode for class '{class_name}'."
                )));
            }
        }
        let mut by_source = AHashMap::with_capacity(infos.len());
        for info in infos {
            for class_name in info.class_names() {
                if !by_class.contains_key(class_name) {
                    return Err(EngineError::invalid_argument(format!(
                        "Class '{}' of source '{}' has no bytecode.",
                        class_name,
                        info.source_id()
                    )));
                }
            }
            let source_id = info.source_id().to_owned();
            if by_source.insert(source_id.clone(), info).is_some() {
                return Err(EngineError::invalid_argument(format!(
                    "Duplicate source '{source_id}'."
                )));
            }
        }
        Ok(Self {
            name,
            infos: by_source,
            bytecodes: by_class,
        })
    }

    /// Label for diagnostics, typically derived from the compiled sources.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_for_source(&self, source_id: &str) -> bool {
        self.infos.contains_key(source_id)
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.infos.keys().map(String::as_str)
    }

    pub fn info_for(&self, source_id: &str) -> Option<&CompiledSourceInfo> {
        self.infos.get(source_id)
    }

    pub fn main_class_name_for(&self, source_id: &str) -> Option<&str> {
        self.infos.get(source_id).map(|i| i.main_class_name())
    }

    pub fn class_names_for(&self, source_id: &str) -> Option<&BTreeSet<String>> {
        self.infos.get(source_id).map(|i| i.class_names())
    }

    pub fn last_modified_at_compile_time_for(&self, source_id: &str) -> Option<i64> {
        self.infos
            .get(source_id)
            .map(|i| i.last_modified_at_compile_time())
    }

    pub fn defines_class(&self, class_name: &str) -> bool {
        self.bytecodes.contains_key(class_name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.bytecodes.keys().map(String::as_str)
    }

    pub fn bytecode_for(&self, class_name: &str) -> Option<Arc<Bytecode>> {
        self.bytecodes.get(class_name).cloned()
    }
}
