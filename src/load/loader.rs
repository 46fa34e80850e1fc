use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::load::resolver::LayeredResolver;

/// Opaque capability tag proving a loader belongs to a specific engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(u64);

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

impl EngineId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity-tagged handle to a [`LayeredResolver`].
///
/// An attached loader's resolver is replaced whenever its engine replaces
/// the code layers; a detached loader keeps the resolver it was born with.
/// Only the owning engine, proving itself with the matching [`EngineId`],
/// can reach or swap the resolver.
pub struct Loader {
    engine_id: EngineId,
    number: u64,
    attached: bool,
    resolver: RwLock<Arc<LayeredResolver>>,
}

impl Loader {
    pub(crate) fn new(
        engine_id: EngineId,
        number: u64,
        attached: bool,
        resolver: Arc<LayeredResolver>,
    ) -> Self {
        Self {
            engine_id,
            number,
            attached,
            resolver: RwLock::new(resolver),
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Current resolver snapshot, without the capability check. Only for
    /// loaders the engine itself holds on to.
    pub(crate) fn snapshot(&self) -> Arc<LayeredResolver> {
        Arc::clone(&self.resolver.read())
    }

    pub(crate) fn resolver(&self, engine_id: EngineId) -> Result<Arc<LayeredResolver>> {
        self.check_engine(engine_id)?;
        Ok(self.snapshot())
    }

    pub(crate) fn set_resolver(
        &self,
        engine_id: EngineId,
        resolver: Arc<LayeredResolver>,
    ) -> Result<()> {
        self.check_engine(engine_id)?;
        if !self.attached {
            return Err(EngineError::invalid_state(
                "Cannot set the resolver of a detached loader.",
            ));
        }
        *self.resolver.write() = resolver;
        Ok(())
    }

    fn check_engine(&self, engine_id: EngineId) -> Result<()> {
        if engine_id != self.engine_id {
            return Err(EngineError::invalid_state("Loader not from this engine."));
        }
        Ok(())
    }
}

impl PartialEq for Loader {
    fn eq(&self, other: &Self) -> bool {
        self.engine_id == other.engine_id && self.number == other.number
    }
}

impl Eq for Loader {}

impl Hash for Loader {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.engine_id.hash(state);
        self.number.hash(state);
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("engine_id", &self.engine_id)
            .field("number", &self.number)
            .field("attached", &self.attached)
            .finish()
    }
}
