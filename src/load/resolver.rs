//! Class name resolution across a parent resolver, a layer stack and an
//! optional top code cache.

use std::sync::Arc;

use ahash::AHashMap;

use crate::code::Code;
use crate::error::{EngineError, Result};
use crate::load::top_cache::TopCodeCache;
use crate::load::{ClassHandle, LoadMode, ParentResolver};
use crate::source::Source;

/// Walks a stack of [`Code`] layers for class definitions, arbitrating
/// between the parent resolver and the layers with `layer_mode`, and
/// between the layered view and the top cache with `top_mode`.
///
/// The layer stack is immutable and shared by reference; clones are cheap.
pub struct LayeredResolver {
    parent: Arc<dyn ParentResolver>,
    layer_mode: LoadMode,
    top_mode: LoadMode,
    layers: Arc<Vec<Arc<Code>>>,
    /// Source id to the topmost layer that compiled it.
    source_layers: AHashMap<String, usize>,
    top_cache: Option<Arc<TopCodeCache>>,
}

impl LayeredResolver {
    pub fn new(
        parent: Arc<dyn ParentResolver>,
        layer_mode: LoadMode,
        top_mode: LoadMode,
        layers: Arc<Vec<Arc<Code>>>,
        top_cache: Option<Arc<TopCodeCache>>,
    ) -> Self {
        let mut source_layers = AHashMap::new();
        for (index, code) in layers.iter().enumerate() {
            for source_id in code.source_ids() {
                source_layers.insert(source_id.to_owned(), index);
            }
        }
        Self {
            parent,
            layer_mode,
            top_mode,
            layers,
            source_layers,
            top_cache,
        }
    }

    pub fn layer_mode(&self) -> LoadMode {
        self.layer_mode
    }

    pub fn top_mode(&self) -> LoadMode {
        self.top_mode
    }

    pub fn layers(&self) -> &Arc<Vec<Arc<Code>>> {
        &self.layers
    }

    pub fn top_cache(&self) -> Option<&Arc<TopCodeCache>> {
        self.top_cache.as_ref()
    }

    /// Resolves a class by name alone, against parent and layers only.
    /// The top cache never answers name-only lookups.
    pub fn load_class(&self, class_name: &str) -> Result<ClassHandle> {
        if class_name.is_empty() {
            return Err(EngineError::invalid_argument("Class name is empty."));
        }
        match self.layer_mode {
            LoadMode::ParentFirst => match self.parent.resolve(class_name) {
                Some(handle) => Ok(handle),
                None => self.find_in_layers(class_name),
            },
            LoadMode::CurrentFirst => self
                .find_in_layers(class_name)
                .or_else(|_| self.resolve_in_parent(class_name)),
        }
    }

    /// Resolves the main class of a source.
    pub fn load_main_class(&self, source: &Arc<dyn Source>) -> Result<ClassHandle> {
        self.load_from_source(source, None)
    }

    /// Resolves a class declared by a source. Asking for a class the
    /// source does not declare fails even if other layers define it.
    pub fn load_class_from_source(
        &self,
        source: &Arc<dyn Source>,
        class_name: &str,
    ) -> Result<ClassHandle> {
        if class_name.is_empty() {
            return Err(EngineError::invalid_argument("Class name is empty."));
        }
        self.load_from_source(source, Some(class_name))
    }

    fn load_from_source(
        &self,
        source: &Arc<dyn Source>,
        class_name: Option<&str>,
    ) -> Result<ClassHandle> {
        let layer = self.source_layers.get(source.id()).copied();
        match self.top_mode {
            LoadMode::ParentFirst => {
                let mut layer_err = None;
                if let Some(index) = layer {
                    // A class outside the layered source's declared set
                    // fails here; the top cache only serves sources that
                    // are in no layer.
                    let target = self
                        .target_class(&self.layers[index], source, class_name)?
                        .to_owned();
                    match self.load_class(&target) {
                        Err(err @ EngineError::Load { .. }) => layer_err = Some(err),
                        other => return other,
                    }
                }
                match &self.top_cache {
                    Some(top) => self.load_from_top(top, source, class_name),
                    None => Err(layer_err.unwrap_or_else(|| self.source_not_found(source))),
                }
            }
            LoadMode::CurrentFirst => match &self.top_cache {
                Some(top) => match self.load_from_top(top, source, class_name) {
                    Err(err @ EngineError::Load { .. }) => match layer {
                        Some(index) => self.load_from_layer(index, source, class_name),
                        None => Err(err),
                    },
                    other => other,
                },
                None => match layer {
                    Some(index) => self.load_from_layer(index, source, class_name),
                    None => Err(self.source_not_found(source)),
                },
            },
        }
    }

    /// A clone sharing the layer stack and the same top cache instance.
    pub fn clone_shared(&self) -> Self {
        Self {
            parent: Arc::clone(&self.parent),
            layer_mode: self.layer_mode,
            top_mode: self.top_mode,
            layers: Arc::clone(&self.layers),
            source_layers: self.source_layers.clone(),
            top_cache: self.top_cache.as_ref().map(Arc::clone),
        }
    }

    /// A clone sharing the layer stack but with a fresh, empty top cache,
    /// so later updates to either cache stay invisible to the other.
    pub fn clone_with_separate_top_cache(&self) -> Self {
        Self {
            top_cache: self
                .top_cache
                .as_ref()
                .map(|top| Arc::new(top.clone_empty())),
            ..self.clone_shared()
        }
    }

    fn resolve_in_parent(&self, class_name: &str) -> Result<ClassHandle> {
        self.parent.resolve(class_name).ok_or_else(|| {
            EngineError::load(format!("Could not load class '{class_name}'."))
        })
    }

    /// Topmost definition wins.
    fn find_in_layers(&self, class_name: &str) -> Result<ClassHandle> {
        for code in self.layers.iter().rev() {
            if let Some(bytecode) = code.bytecode_for(class_name) {
                return Ok(ClassHandle::new(bytecode));
            }
        }
        Err(EngineError::load(format!(
            "Could not load class '{class_name}'."
        )))
    }

    fn load_from_layer(
        &self,
        index: usize,
        source: &Arc<dyn Source>,
        class_name: Option<&str>,
    ) -> Result<ClassHandle> {
        let code = &self.layers[index];
        let target = self.target_class(code, source, class_name)?.to_owned();
        self.load_class(&target)
    }

    fn load_from_top(
        &self,
        top: &Arc<TopCodeCache>,
        source: &Arc<dyn Source>,
        class_name: Option<&str>,
    ) -> Result<ClassHandle> {
        let code = top.get_up_to_date(source)?;
        let target = self.target_class(&code, source, class_name)?.to_owned();
        let from_code = |code: &Arc<Code>| {
            code.bytecode_for(&target)
                .map(|bytecode| ClassHandle::with_origin(bytecode, Arc::clone(code)))
                .ok_or_else(|| {
                    EngineError::load(format!("Could not load class '{target}'."))
                })
        };
        match self.top_mode {
            LoadMode::ParentFirst => self.load_class(&target).or_else(|_| from_code(&code)),
            LoadMode::CurrentFirst => from_code(&code).or_else(|_| self.load_class(&target)),
        }
    }

    fn target_class<'a>(
        &self,
        code: &'a Arc<Code>,
        source: &Arc<dyn Source>,
        class_name: Option<&'a str>,
    ) -> Result<&'a str> {
        let info = code.info_for(source.id()).ok_or_else(|| {
            EngineError::load(format!("Source not found: '{}'.", source.id()))
        })?;
        match class_name {
            None => Ok(info.main_class_name()),
            Some(name) if info.class_names().contains(name) => Ok(name),
            Some(name) => Err(EngineError::load(format!(
                "Class '{}' is not a class of source '{}'.",
                name,
                source.id()
            ))),
        }
    }

    fn source_not_found(&self, source: &Arc<dyn Source>) -> EngineError {
        EngineError::load(format!("Source not found: '{}'.", source.id()))
    }
}

impl ParentResolver for LayeredResolver {
    fn resolve(&self, class_name: &str) -> Option<ClassHandle> {
        self.load_class(class_name).ok()
    }
}
