use std::sync::Arc;

use crate::code::Code;
use crate::error::Result;
use crate::load::ParentResolver;
use crate::source::Source;

/// Compiles a set of sources into a [`Code`] artifact.
///
/// Implementations resolve already-known classes through `parent` and must
/// record, per source, the main class name, every produced class name and
/// the modification stamp observed at compile time. Failures surface as
/// [`EngineError::Compile`](crate::error::EngineError::Compile) carrying
/// the offending source id.
pub trait Compiler: Send + Sync {
    fn compile(&self, parent: &dyn ParentResolver, sources: &[Arc<dyn Source>]) -> Result<Code>;
}
