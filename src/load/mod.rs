pub mod loader;
pub mod resolver;
pub mod top_cache;

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::code::{Bytecode, Code};

pub use loader::{EngineId, Loader};
pub use resolver::LayeredResolver;
pub use top_cache::{DefaultTopCodeCacheFactory, TopCodeCache, TopCodeCacheBuilder, TopCodeCacheFactory};

/// Resolution order between the external parent and the current view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    ParentFirst,
    CurrentFirst,
}

/// A resolved class: its bytecode, plus a strong reference to the owning
/// [`Code`] when the class came out of a weak-valued cache, so the cache
/// entry stays live for as long as the class is in use.
#[derive(Debug, Clone)]
pub struct ClassHandle {
    bytecode: Arc<Bytecode>,
    origin_code: Option<Arc<Code>>,
}

impl ClassHandle {
    pub fn new(bytecode: Arc<Bytecode>) -> Self {
        Self {
            bytecode,
            origin_code: None,
        }
    }

    pub(crate) fn with_origin(bytecode: Arc<Bytecode>, code: Arc<Code>) -> Self {
        Self {
            bytecode,
            origin_code: Some(code),
        }
    }

    pub fn class_name(&self) -> &str {
        self.bytecode.class_name()
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytecode.bytes()
    }

    pub fn bytecode(&self) -> &Arc<Bytecode> {
        &self.bytecode
    }

    /// The code artifact the class was served from, if it was served from
    /// an on-demand compilation.
    pub fn origin_code(&self) -> Option<&Arc<Code>> {
        self.origin_code.as_ref()
    }
}

/// External class lookup the engine delegates to.
///
/// Absence is the only negative answer; the probe cannot fail, so parent
/// errors never propagate into resolution.
pub trait ParentResolver: Send + Sync {
    fn resolve(&self, class_name: &str) -> Option<ClassHandle>;
}

/// Parent resolver that defines nothing.
pub struct EmptyParent;

impl EmptyParent {
    pub fn shared() -> Arc<dyn ParentResolver> {
        static SHARED: Lazy<Arc<EmptyParent>> = Lazy::new(|| Arc::new(EmptyParent));
        Arc::clone(&*SHARED) as Arc<dyn ParentResolver>
    }
}

impl ParentResolver for EmptyParent {
    fn resolve(&self, _class_name: &str) -> Option<ClassHandle> {
        None
    }
}
