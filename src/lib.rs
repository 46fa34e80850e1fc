//! # strata
//!
//! Layered code cache and loader engine for dynamic scripts.
//!
//! Scripts are compiled on demand into immutable [`Code`] artifacts,
//! stacked into layers with configurable name-resolution order, and served
//! to concurrent consumers through loader handles. Ad-hoc sources that are
//! not part of any layer go through a weak-valued top code cache instead.
//!
//! - **source**: script identity and modification stamps
//! - **code**: compiled artifacts and duplicate-name analysis
//! - **compile**: the compiler contract
//! - **load**: name resolution across parent, layers and top cache
//! - **engine**: loader lifecycles and atomic layer replacement

pub mod code;
pub mod compile;
pub mod engine;
pub mod error;
pub mod load;
pub mod source;

pub use code::{Bytecode, Code, CompiledSourceInfo};
pub use compile::Compiler;
pub use engine::{LayeredEngine, LayeredEngineBuilder};
pub use error::{ConflictMap, EngineError, Result};
pub use load::{
    ClassHandle, DefaultTopCodeCacheFactory, EmptyParent, EngineId, LayeredResolver, LoadMode,
    Loader, ParentResolver, TopCodeCache, TopCodeCacheBuilder, TopCodeCacheFactory,
};
pub use source::{FileSource, MemorySource, Source};
