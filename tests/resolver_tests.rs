use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use strata::{
    Bytecode, ClassHandle, Code, Compiler, CompiledSourceInfo, EmptyParent, EngineError,
    LayeredResolver, LoadMode, MemorySource, ParentResolver, Source, TopCodeCache,
};

fn layer(label: &str, source_id: &str, stamp: i64, classes: &[(&str, &str)]) -> Arc<Code> {
    let names: BTreeSet<String> = classes.iter().map(|(n, _)| n.to_string()).collect();
    let info =
        CompiledSourceInfo::new(source_id, classes[0].0, names, stamp).expect("valid info");
    let bytecodes = classes
        .iter()
        .map(|(n, t)| Bytecode::new(*n, t.as_bytes().to_vec()).expect("valid bytecode"))
        .collect();
    Arc::new(Code::new(label, vec![info], bytecodes).expect("valid code"))
}

fn stack(layers: Vec<Arc<Code>>) -> Arc<Vec<Arc<Code>>> {
    Arc::new(layers)
}

struct MapParent(HashMap<String, Arc<Bytecode>>);

impl MapParent {
    fn of(classes: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self(
            classes
                .iter()
                .map(|(n, t)| {
                    let bc =
                        Bytecode::new(*n, t.as_bytes().to_vec()).expect("valid bytecode");
                    (n.to_string(), Arc::new(bc))
                })
                .collect(),
        ))
    }
}

impl ParentResolver for MapParent {
    fn resolve(&self, class_name: &str) -> Option<ClassHandle> {
        self.0.get(class_name).cloned().map(ClassHandle::new)
    }
}

fn resolver(
    parent: Arc<dyn ParentResolver>,
    layer_mode: LoadMode,
    layers: Vec<Arc<Code>>,
) -> LayeredResolver {
    LayeredResolver::new(parent, layer_mode, LoadMode::ParentFirst, stack(layers), None)
}

/// Compiles any source into `<id>_Main` with bytes `top:<id>@<stamp>`.
struct TopCompiler {
    calls: AtomicUsize,
}

impl TopCompiler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Compiler for TopCompiler {
    fn compile(
        &self,
        _parent: &dyn ParentResolver,
        sources: &[Arc<dyn Source>],
    ) -> strata::Result<Code> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let source = &sources[0];
        let main = format!("{}_Main", source.id());
        let stamp = source.modification_stamp();
        let info = CompiledSourceInfo::new(
            source.id(),
            &main,
            BTreeSet::from([main.clone()]),
            stamp,
        )?;
        let bytecode = Bytecode::new(&main, format!("top:{}@{}", source.id(), stamp).into_bytes())?;
        Code::new("top", vec![info], vec![bytecode])
    }
}

fn adhoc(id: &str) -> Arc<dyn Source> {
    Arc::new(MemorySource::new(id, "print 1").expect("valid source")) as Arc<dyn Source>
}

#[test]
fn current_first_returns_topmost_definition() -> anyhow::Result<()> {
    let v1 = layer("l0", "s0", 0, &[("A", "v1")]);
    let v2 = layer("l1", "s1", 0, &[("A", "v2")]);

    let r = resolver(EmptyParent::shared(), LoadMode::CurrentFirst, vec![v1.clone(), v2.clone()]);
    assert_eq!(r.load_class("A")?.bytes(), b"v2");

    let r = resolver(EmptyParent::shared(), LoadMode::CurrentFirst, vec![v2, v1]);
    assert_eq!(r.load_class("A")?.bytes(), b"v1");
    Ok(())
}

#[test]
fn parent_first_prefers_parent_when_it_defines_the_class() -> anyhow::Result<()> {
    let layers = vec![layer("l0", "s0", 0, &[("A", "layer")])];
    let parent = MapParent::of(&[("A", "parent")]);

    let r = resolver(parent, LoadMode::ParentFirst, layers);
    assert_eq!(r.load_class("A")?.bytes(), b"parent");
    Ok(())
}

#[test]
fn parent_first_falls_back_to_topmost_layer() -> anyhow::Result<()> {
    let layers = vec![
        layer("l0", "s0", 0, &[("A", "bottom")]),
        layer("l1", "s1", 0, &[("A", "top")]),
    ];
    let parent = MapParent::of(&[("Other", "x")]);

    let r = resolver(parent, LoadMode::ParentFirst, layers);
    assert_eq!(r.load_class("A")?.bytes(), b"top");
    Ok(())
}

#[test]
fn current_first_falls_back_to_parent() -> anyhow::Result<()> {
    let parent = MapParent::of(&[("Only", "parent")]);
    let r = resolver(parent, LoadMode::CurrentFirst, vec![layer("l0", "s0", 0, &[("A", "a")])]);
    assert_eq!(r.load_class("Only")?.bytes(), b"parent");
    Ok(())
}

#[test]
fn missing_class_fails_with_its_name() {
    let r = resolver(EmptyParent::shared(), LoadMode::CurrentFirst, vec![]);
    let err = r.load_class("Ghost").unwrap_err();
    assert!(matches!(err, EngineError::Load { .. }));
    assert!(err.to_string().contains("Ghost"));
}

#[test]
fn empty_class_name_is_rejected() {
    let r = resolver(EmptyParent::shared(), LoadMode::CurrentFirst, vec![]);
    assert!(matches!(
        r.load_class("").unwrap_err(),
        EngineError::InvalidArgument { .. }
    ));
}

#[test]
fn main_class_of_layered_source_honors_layer_override() -> anyhow::Result<()> {
    // The source lives in layer 0, but a higher layer redefines its class.
    let layers = vec![
        layer("l0", "script", 0, &[("Script_Main", "old")]),
        layer("l1", "other", 0, &[("Script_Main", "new")]),
    ];
    let r = resolver(EmptyParent::shared(), LoadMode::CurrentFirst, layers);

    let source = adhoc("script");
    assert_eq!(r.load_main_class(&source)?.bytes(), b"new");
    Ok(())
}

#[test]
fn class_from_source_is_restricted_to_declared_names() {
    let layers = vec![
        layer("l0", "script", 0, &[("Script_Main", "s")]),
        layer("l1", "other", 0, &[("Unrelated", "u")]),
    ];
    let r = resolver(EmptyParent::shared(), LoadMode::CurrentFirst, layers);

    let source = adhoc("script");
    let err = r.load_class_from_source(&source, "Unrelated").unwrap_err();
    assert!(matches!(err, EngineError::Load { .. }));
    assert!(err.to_string().contains("not a class of source"));
}

#[test]
fn unknown_source_without_top_cache_is_not_found() {
    let r = resolver(EmptyParent::shared(), LoadMode::CurrentFirst, vec![]);
    let err = r.load_main_class(&adhoc("nowhere")).unwrap_err();
    assert!(matches!(err, EngineError::Load { .. }));
    assert!(err.to_string().contains("Source not found"));
}

fn resolver_with_top(
    layer_mode: LoadMode,
    top_mode: LoadMode,
    layers: Vec<Arc<Code>>,
    compiler: Arc<TopCompiler>,
) -> LayeredResolver {
    let cache = Arc::new(TopCodeCache::builder(compiler).build());
    LayeredResolver::new(
        EmptyParent::shared(),
        layer_mode,
        top_mode,
        stack(layers),
        Some(cache),
    )
}

#[test]
fn adhoc_source_is_served_from_the_top_cache() -> anyhow::Result<()> {
    let compiler = TopCompiler::new();
    let r = resolver_with_top(
        LoadMode::CurrentFirst,
        LoadMode::ParentFirst,
        vec![],
        Arc::clone(&compiler),
    );

    let source = adhoc("snippet");
    let handle = r.load_main_class(&source)?;
    assert_eq!(handle.bytes(), b"top:snippet@0");
    assert!(handle.origin_code().is_some());
    assert_eq!(compiler.calls(), 1);

    // A named class of the same ad-hoc source resolves too.
    let named = r.load_class_from_source(&source, "snippet_Main")?;
    assert_eq!(named.bytes(), b"top:snippet@0");
    assert_eq!(compiler.calls(), 1);
    Ok(())
}

#[test]
fn name_only_lookups_never_consult_the_top_cache() -> anyhow::Result<()> {
    let compiler = TopCompiler::new();
    let r = resolver_with_top(
        LoadMode::CurrentFirst,
        LoadMode::ParentFirst,
        vec![],
        Arc::clone(&compiler),
    );

    let source = adhoc("snippet");
    let _held = r.load_main_class(&source)?;
    assert_eq!(compiler.calls(), 1);

    // The class exists in the top cache, but a name-only lookup misses.
    let err = r.load_class("snippet_Main").unwrap_err();
    assert!(matches!(err, EngineError::Load { .. }));
    Ok(())
}

#[test]
fn top_mode_parent_first_prefers_the_layers() -> anyhow::Result<()> {
    let compiler = TopCompiler::new();
    let layers = vec![layer("l0", "script", 0, &[("script_Main", "layer")])];
    let r = resolver_with_top(
        LoadMode::CurrentFirst,
        LoadMode::ParentFirst,
        layers,
        Arc::clone(&compiler),
    );

    let source = adhoc("script");
    assert_eq!(r.load_main_class(&source)?.bytes(), b"layer");
    // The layers answered, so nothing was compiled.
    assert_eq!(compiler.calls(), 0);
    Ok(())
}

#[test]
fn undeclared_class_of_layered_source_is_not_recompiled() -> anyhow::Result<()> {
    let compiler = TopCompiler::new();
    let layers = vec![layer("l0", "script", 0, &[("script_Main", "layer")])];
    let r = resolver_with_top(
        LoadMode::CurrentFirst,
        LoadMode::ParentFirst,
        layers,
        Arc::clone(&compiler),
    );

    let source = adhoc("script");
    let err = r.load_class_from_source(&source, "Elsewhere").unwrap_err();
    assert!(matches!(err, EngineError::Load { .. }));
    assert!(err.to_string().contains("not a class of source"));
    // The source lives in a layer, so the top cache is never asked.
    assert_eq!(compiler.calls(), 0);
    Ok(())
}

#[test]
fn top_mode_current_first_prefers_the_top_cache() -> anyhow::Result<()> {
    let compiler = TopCompiler::new();
    let layers = vec![layer("l0", "script", 0, &[("script_Main", "layer")])];
    let r = resolver_with_top(
        LoadMode::CurrentFirst,
        LoadMode::CurrentFirst,
        layers,
        Arc::clone(&compiler),
    );

    let source = adhoc("script");
    assert_eq!(r.load_main_class(&source)?.bytes(), b"top:script@0");
    assert_eq!(compiler.calls(), 1);
    Ok(())
}

#[test]
fn shared_clone_reuses_the_top_cache() -> anyhow::Result<()> {
    let compiler = TopCompiler::new();
    let r = resolver_with_top(
        LoadMode::CurrentFirst,
        LoadMode::ParentFirst,
        vec![],
        Arc::clone(&compiler),
    );

    let source = adhoc("snippet");
    let _held = r.load_main_class(&source)?;

    let clone = r.clone_shared();
    let _also = clone.load_main_class(&source)?;
    assert_eq!(compiler.calls(), 1);
    Ok(())
}

#[test]
fn separate_top_cache_clone_compiles_on_its_own() -> anyhow::Result<()> {
    let compiler = TopCompiler::new();
    let r = resolver_with_top(
        LoadMode::CurrentFirst,
        LoadMode::ParentFirst,
        vec![],
        Arc::clone(&compiler),
    );

    let source = adhoc("snippet");
    let _held = r.load_main_class(&source)?;
    assert_eq!(compiler.calls(), 1);

    let detached = r.clone_with_separate_top_cache();
    let _detached_held = detached.load_main_class(&source)?;
    assert_eq!(compiler.calls(), 2);

    // The original keeps serving its own live entry.
    let _again = r.load_main_class(&source)?;
    assert_eq!(compiler.calls(), 2);
    Ok(())
}
