//! Loader lifecycles and atomic layer replacement.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use crate::code::{conflicts, Code};
use crate::compile::Compiler;
use crate::error::{EngineError, Result};
use crate::load::loader::{EngineId, Loader};
use crate::load::resolver::LayeredResolver;
use crate::load::top_cache::{DefaultTopCodeCacheFactory, TopCodeCache, TopCodeCacheFactory};
use crate::load::{ClassHandle, EmptyParent, LoadMode, ParentResolver};
use crate::source::Source;

struct EngineInner {
    next_loader_number: u64,
    /// Weakly held so the engine never keeps a loader alive past its last
    /// external reference; dead entries are swept on writer operations.
    attached: Vec<Weak<Loader>>,
}

impl EngineInner {
    fn sweep(&mut self) {
        self.attached.retain(|weak| weak.strong_count() > 0);
    }
}

/// Serves consistent views of a stack of code layers to any number of
/// concurrent loaders.
///
/// Load operations are readers and layer replacement is a writer under a
/// single readers-writer lock, so a load observes either the stack from
/// before a replacement or the stack from after it, never a mixture.
pub struct LayeredEngine {
    engine_id: EngineId,
    parent: Arc<dyn ParentResolver>,
    layer_mode: LoadMode,
    top_mode: LoadMode,
    allow_same_names_across_layers: bool,
    allow_same_names_in_parent_and_layers: bool,
    compiler: Arc<dyn Compiler>,
    top_cache: Option<Arc<TopCodeCache>>,
    default_loader: Arc<Loader>,
    inner: RwLock<EngineInner>,
}

impl LayeredEngine {
    pub fn builder(compiler: Arc<dyn Compiler>) -> LayeredEngineBuilder {
        LayeredEngineBuilder::new(compiler)
    }

    fn from_builder(builder: &LayeredEngineBuilder) -> Self {
        let engine_id = EngineId::next();
        let parent = builder
            .parent
            .clone()
            .unwrap_or_else(EmptyParent::shared);
        let compiler = Arc::clone(&builder.compiler);
        let top_cache = if builder.with_top_cache {
            let factory = builder
                .top_cache_factory
                .clone()
                .unwrap_or_else(|| Arc::new(DefaultTopCodeCacheFactory::new(Arc::clone(&compiler))));
            Some(Arc::new(factory.new_top_code_cache(EmptyParent::shared())))
        } else {
            None
        };

        let resolver = Arc::new(LayeredResolver::new(
            Arc::clone(&parent),
            builder.layer_mode,
            builder.top_mode,
            Arc::new(Vec::new()),
            top_cache.as_ref().map(Arc::clone),
        ));
        if let Some(top) = &top_cache {
            top.set_parent(Arc::clone(&resolver) as Arc<dyn ParentResolver>);
        }

        let default_loader = Arc::new(Loader::new(engine_id, 0, true, resolver));
        let inner = EngineInner {
            next_loader_number: 1,
            attached: vec![Arc::downgrade(&default_loader)],
        };

        debug!(engine_id = ?engine_id, "layered engine created");
        Self {
            engine_id,
            parent,
            layer_mode: builder.layer_mode,
            top_mode: builder.top_mode,
            allow_same_names_across_layers: builder.allow_same_names_across_layers,
            allow_same_names_in_parent_and_layers: builder.allow_same_names_in_parent_and_layers,
            compiler,
            top_cache,
            default_loader,
            inner: RwLock::new(inner),
        }
    }

    /// The default loader, attached, loader number zero. Its identity
    /// never changes over the engine's life.
    pub fn default_loader(&self) -> Arc<Loader> {
        Arc::clone(&self.default_loader)
    }

    /// A new attached loader over the current layers, sharing the engine's
    /// top cache. It will follow every future layer replacement.
    pub fn new_attached_loader(&self) -> Arc<Loader> {
        let mut inner = self.inner.write();
        inner.sweep();
        let number = inner.next_loader_number;
        inner.next_loader_number += 1;
        let resolver = Arc::new(self.default_loader.snapshot().clone_shared());
        let loader = Arc::new(Loader::new(self.engine_id, number, true, resolver));
        inner.attached.push(Arc::downgrade(&loader));
        debug!(loader = number, "attached loader created");
        loader
    }

    /// A new detached loader: same layers as of now, but its own top cache
    /// instance, and layer replacements will never touch it.
    pub fn new_detached_loader(&self) -> Arc<Loader> {
        let mut inner = self.inner.write();
        inner.sweep();
        let number = inner.next_loader_number;
        inner.next_loader_number += 1;
        let resolver = Arc::new(self.default_loader.snapshot().clone_with_separate_top_cache());
        debug!(loader = number, "detached loader created");
        Arc::new(Loader::new(self.engine_id, number, false, resolver))
    }

    fn resolver_of(&self, loader: &Loader) -> Result<Arc<LayeredResolver>> {
        let _guard = self.inner.read();
        loader.resolver(self.engine_id)
    }

    pub fn load_class(&self, loader: &Loader, class_name: &str) -> Result<ClassHandle> {
        self.resolver_of(loader)?.load_class(class_name)
    }

    pub fn load_main_class(&self, loader: &Loader, source: &Arc<dyn Source>) -> Result<ClassHandle> {
        self.resolver_of(loader)?.load_main_class(source)
    }

    pub fn load_class_from_source(
        &self,
        loader: &Loader,
        source: &Arc<dyn Source>,
        class_name: &str,
    ) -> Result<ClassHandle> {
        self.resolver_of(loader)?
            .load_class_from_source(source, class_name)
    }

    /// Replaces the layer stack for every attached loader.
    ///
    /// Conflict checks run before anything is touched; on failure the
    /// engine is unchanged. On success every attached loader atomically
    /// receives a resolver over the new stack, and the top cache is
    /// re-parented onto the default loader's new resolver.
    pub fn set_code_layers(&self, layers: Vec<Arc<Code>>) -> Result<()> {
        let mut n_conflicts = 0;
        let mut across_layers = None;
        if !self.allow_same_names_across_layers {
            let map = conflicts::same_names_across_layers(&layers);
            n_conflicts += map.len();
            across_layers = Some(map);
        }
        let mut parent_and_layers = None;
        if !self.allow_same_names_in_parent_and_layers {
            let map = conflicts::same_names_in_parent_and_layers(self.parent.as_ref(), &layers);
            n_conflicts += map.len();
            parent_and_layers = Some(map);
        }
        if n_conflicts > 0 {
            return Err(EngineError::ClassNameConflict {
                across_layers,
                parent_and_layers,
            });
        }

        let layers = Arc::new(layers);
        let mut inner = self.inner.write();
        inner.sweep();
        let loaders: Vec<Arc<Loader>> = inner
            .attached
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for loader in &loaders {
            let resolver = Arc::new(self.new_resolver(Arc::clone(&layers)));
            loader.set_resolver(self.engine_id, resolver)?;
        }
        if let Some(top) = &self.top_cache {
            top.set_parent(self.default_loader.snapshot());
        }
        debug!(
            layers = layers.len(),
            loaders = loaders.len(),
            "code layers replaced"
        );
        Ok(())
    }

    /// Compiles each source bundle into a layer, each against a view of
    /// the layers below it, then replaces the stack.
    pub fn set_code_layers_by_source(
        &self,
        source_layers: Vec<Vec<Arc<dyn Source>>>,
    ) -> Result<()> {
        let mut code_layers: Vec<Arc<Code>> = Vec::with_capacity(source_layers.len());
        for sources in &source_layers {
            let below = LayeredResolver::new(
                Arc::clone(&self.parent),
                self.layer_mode,
                self.top_mode,
                Arc::new(code_layers.clone()),
                None,
            );
            let code = self.compiler.compile(&below, sources)?;
            code_layers.push(Arc::new(code));
        }
        self.set_code_layers(code_layers)
    }

    fn new_resolver(&self, layers: Arc<Vec<Arc<Code>>>) -> LayeredResolver {
        LayeredResolver::new(
            Arc::clone(&self.parent),
            self.layer_mode,
            self.top_mode,
            layers,
            self.top_cache.as_ref().map(Arc::clone),
        )
    }
}

impl Drop for LayeredEngine {
    fn drop(&mut self) {
        // The shared top cache holds the default loader's resolver as its
        // parent while that resolver holds the cache; reset the parent so
        // the pair, and the layer stack behind it, can be freed.
        if let Some(top) = &self.top_cache {
            top.set_parent(EmptyParent::shared());
        }
    }
}

/// One-shot builder for [`LayeredEngine`]: after the first `build`,
/// setters refuse further changes and `build` keeps producing engines
/// with the same configuration.
pub struct LayeredEngineBuilder {
    committed: bool,
    compiler: Arc<dyn Compiler>,
    parent: Option<Arc<dyn ParentResolver>>,
    layer_mode: LoadMode,
    top_mode: LoadMode,
    with_top_cache: bool,
    top_cache_factory: Option<Arc<dyn TopCodeCacheFactory>>,
    allow_same_names_across_layers: bool,
    allow_same_names_in_parent_and_layers: bool,
}

impl LayeredEngineBuilder {
    pub fn new(compiler: Arc<dyn Compiler>) -> Self {
        Self {
            committed: false,
            compiler,
            parent: None,
            layer_mode: LoadMode::CurrentFirst,
            top_mode: LoadMode::ParentFirst,
            with_top_cache: true,
            top_cache_factory: None,
            allow_same_names_across_layers: true,
            allow_same_names_in_parent_and_layers: true,
        }
    }

    pub fn parent(&mut self, parent: Arc<dyn ParentResolver>) -> Result<&mut Self> {
        self.check()?;
        self.parent = Some(parent);
        Ok(self)
    }

    pub fn layer_mode(&mut self, mode: LoadMode) -> Result<&mut Self> {
        self.check()?;
        self.layer_mode = mode;
        Ok(self)
    }

    pub fn top_mode(&mut self, mode: LoadMode) -> Result<&mut Self> {
        self.check()?;
        self.top_mode = mode;
        Ok(self)
    }

    pub fn with_top_cache(&mut self, enabled: bool) -> Result<&mut Self> {
        self.check()?;
        self.with_top_cache = enabled;
        Ok(self)
    }

    pub fn top_cache_factory(
        &mut self,
        factory: Arc<dyn TopCodeCacheFactory>,
    ) -> Result<&mut Self> {
        self.check()?;
        self.top_cache_factory = Some(factory);
        Ok(self)
    }

    pub fn allow_same_names_across_layers(&mut self, allow: bool) -> Result<&mut Self> {
        self.check()?;
        self.allow_same_names_across_layers = allow;
        Ok(self)
    }

    pub fn allow_same_names_in_parent_and_layers(&mut self, allow: bool) -> Result<&mut Self> {
        self.check()?;
        self.allow_same_names_in_parent_and_layers = allow;
        Ok(self)
    }

    pub fn build(&mut self) -> LayeredEngine {
        if !self.committed {
            if self.parent.is_none() {
                self.parent = Some(EmptyParent::shared());
            }
            if self.with_top_cache && self.top_cache_factory.is_none() {
                self.top_cache_factory = Some(Arc::new(DefaultTopCodeCacheFactory::new(
                    Arc::clone(&self.compiler),
                )));
            }
            self.committed = true;
        }
        LayeredEngine::from_builder(self)
    }

    fn check(&self) -> Result<()> {
        if self.committed {
            return Err(EngineError::invalid_state("Builder already used."));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LayeredEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredEngineBuilder")
            .field("committed", &self.committed)
            .field("layer_mode", &self.layer_mode)
            .field("top_mode", &self.top_mode)
            .field("with_top_cache", &self.with_top_cache)
            .finish_non_exhaustive()
    }
}
