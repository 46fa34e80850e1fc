//! Duplicate class name analysis over layer stacks.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::code::Code;
use crate::error::ConflictMap;
use crate::load::ParentResolver;

fn names_to_layers(layers: &[Arc<Code>]) -> BTreeMap<String, Vec<usize>> {
    let mut map: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, code) in layers.iter().enumerate() {
        for class_name in code.class_names() {
            map.entry(class_name.to_owned()).or_default().push(index);
        }
    }
    map
}

/// Class names defined in two or more layers, each mapped to the full
/// ordered list of defining layer indices.
pub fn same_names_across_layers(layers: &[Arc<Code>]) -> ConflictMap {
    let mut map = names_to_layers(layers);
    map.retain(|_, indices| indices.len() >= 2);
    map
}

/// Class names any layer defines that the parent resolver also defines,
/// each mapped to the defining layer indices. A parent probe that comes
/// back empty counts as "parent does not define it".
pub fn same_names_in_parent_and_layers(
    parent: &dyn ParentResolver,
    layers: &[Arc<Code>],
) -> ConflictMap {
    let mut map = names_to_layers(layers);
    map.retain(|class_name, _| parent.resolve(class_name).is_some());
    map
}
