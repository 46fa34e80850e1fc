//! On-demand compilation cache for sources that live outside the layers.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace};

use crate::code::Code;
use crate::compile::Compiler;
use crate::error::{EngineError, Result};
use crate::load::{EmptyParent, ParentResolver};
use crate::source::Source;

/// Result slot shared between the thread compiling a source and the
/// threads waiting for that compilation.
struct InFlight {
    done: Mutex<Option<Result<Arc<Code>>>>,
    condvar: Condvar,
}

impl InFlight {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            done: Mutex::new(None),
            condvar: Condvar::new(),
        })
    }

    fn wait(&self) -> Result<Arc<Code>> {
        let mut done = self.done.lock();
        loop {
            if let Some(result) = done.as_ref() {
                return result.clone();
            }
            self.condvar.wait(&mut done);
        }
    }

    fn complete(&self, result: Result<Arc<Code>>) {
        *self.done.lock() = Some(result);
        self.condvar.notify_all();
    }
}

enum Slot {
    /// Published compilation; the value is weak so code nobody uses
    /// anymore can be purged by dropping its last strong reference.
    Ready { stamp: i64, code: Weak<Code> },
    InFlight(Arc<InFlight>),
}

/// Outcome of the locked lookup phase of `get_up_to_date`.
enum Found {
    Hit(Arc<Code>),
    Wait(Arc<InFlight>),
    Lead(Arc<InFlight>),
}

/// Eviction-free cache of on-demand compilations, keyed by source id.
///
/// An entry is up to date while its recorded stamp equals the source's
/// current modification stamp; stale entries are recompiled on access.
/// Concurrent requests for the same source id compile at most once.
pub struct TopCodeCache {
    compiler: Arc<dyn Compiler>,
    parent: RwLock<Arc<dyn ParentResolver>>,
    entries: Mutex<HashMap<String, Slot>>,
}

impl TopCodeCache {
    pub fn builder(compiler: Arc<dyn Compiler>) -> TopCodeCacheBuilder {
        TopCodeCacheBuilder::new(compiler)
    }

    fn new(compiler: Arc<dyn Compiler>, parent: Arc<dyn ParentResolver>) -> Self {
        Self {
            compiler,
            parent: RwLock::new(parent),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Swaps the parent resolver used by subsequent compilations.
    /// Compilations already in flight keep the parent they started with.
    pub fn set_parent(&self, parent: Arc<dyn ParentResolver>) {
        *self.parent.write() = parent;
    }

    /// Returns code compiled from the source at its current modification
    /// stamp, compiling if the cache has nothing live for that stamp.
    pub fn get_up_to_date(&self, source: &Arc<dyn Source>) -> Result<Arc<Code>> {
        let id = source.id().to_owned();
        let stamp = source.modification_stamp();

        let found = {
            let mut entries = self.entries.lock();
            let existing = match entries.get(&id) {
                Some(Slot::Ready {
                    stamp: cached_stamp,
                    code,
                }) if *cached_stamp == stamp => {
                    // A dead weak reference means the entry was purged.
                    code.upgrade().map(Found::Hit)
                }
                Some(Slot::InFlight(flight)) => Some(Found::Wait(Arc::clone(flight))),
                _ => None,
            };
            existing.unwrap_or_else(|| {
                let flight = InFlight::new();
                entries.insert(id.clone(), Slot::InFlight(Arc::clone(&flight)));
                Found::Lead(flight)
            })
        };

        let flight = match found {
            Found::Hit(code) => {
                trace!(source = %id, "top cache hit");
                return Ok(code);
            }
            Found::Wait(flight) => {
                trace!(source = %id, "awaiting in-flight compilation");
                return flight.wait();
            }
            Found::Lead(flight) => flight,
        };

        debug!(source = %id, stamp, "compiling source for top cache");
        let parent = Arc::clone(&*self.parent.read());
        let result = self
            .compiler
            .compile(parent.as_ref(), std::slice::from_ref(source))
            .map(Arc::new)
            .map_err(|err| match err {
                err @ EngineError::Compile { .. } => err,
                other => EngineError::compile(&id, other.to_string()),
            });

        {
            let mut entries = self.entries.lock();
            match &result {
                Ok(code) => {
                    entries.insert(
                        id,
                        Slot::Ready {
                            stamp,
                            code: Arc::downgrade(code),
                        },
                    );
                }
                // Failures are not cached; the next call retries.
                Err(_) => {
                    entries.remove(&id);
                }
            }
        }

        flight.complete(result.clone());
        result
    }

    /// A new cache with no entries, sharing this cache's compiler and
    /// current parent resolver.
    pub fn clone_empty(&self) -> Self {
        Self::new(
            Arc::clone(&self.compiler),
            Arc::clone(&*self.parent.read()),
        )
    }
}

/// Creates top code caches for an engine; lets callers substitute their
/// own cache configuration at engine build time.
pub trait TopCodeCacheFactory: Send + Sync {
    fn new_top_code_cache(&self, parent: Arc<dyn ParentResolver>) -> TopCodeCache;
}

pub struct DefaultTopCodeCacheFactory {
    compiler: Arc<dyn Compiler>,
}

impl DefaultTopCodeCacheFactory {
    pub fn new(compiler: Arc<dyn Compiler>) -> Self {
        Self { compiler }
    }
}

impl TopCodeCacheFactory for DefaultTopCodeCacheFactory {
    fn new_top_code_cache(&self, parent: Arc<dyn ParentResolver>) -> TopCodeCache {
        TopCodeCache::new(Arc::clone(&self.compiler), parent)
    }
}

/// One-shot builder: after the first `build`, setters refuse further
/// changes and `build` keeps returning equivalent instances.
pub struct TopCodeCacheBuilder {
    committed: bool,
    compiler: Arc<dyn Compiler>,
    parent: Option<Arc<dyn ParentResolver>>,
}

impl TopCodeCacheBuilder {
    pub fn new(compiler: Arc<dyn Compiler>) -> Self {
        Self {
            committed: false,
            compiler,
            parent: None,
        }
    }

    pub fn parent(&mut self, parent: Arc<dyn ParentResolver>) -> Result<&mut Self> {
        self.check()?;
        self.parent = Some(parent);
        Ok(self)
    }

    pub fn build(&mut self) -> TopCodeCache {
        self.committed = true;
        let parent = self.parent.get_or_insert_with(EmptyParent::shared);
        TopCodeCache::new(Arc::clone(&self.compiler), Arc::clone(parent))
    }

    fn check(&self) -> Result<()> {
        if self.committed {
            return Err(EngineError::invalid_state("Builder already used."));
        }
        Ok(())
    }
}

impl std::fmt::Debug for TopCodeCacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopCodeCacheBuilder")
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}
