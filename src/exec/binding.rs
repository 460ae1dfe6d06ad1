//! 源库所与展平库所之间的显式绑定表。
use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::net::NodeId;

/// A place of one node's net, addressed by its local id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourcePlace {
    pub node: NodeId,
    pub place: String,
}

impl SourcePlace {
    pub fn new(node: NodeId, place: impl Into<String>) -> Self {
        Self {
            node,
            place: place.into(),
        }
    }
}

/// Source place <-> flattened place.
///
/// Several sources can share one flattened place: the home place of an
/// interface comes first, the materialized copies in consumer nodes
/// follow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    to_flat: HashMap<SourcePlace, String>,
    to_source: IndexMap<String, Vec<SourcePlace>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, source: SourcePlace, flat: impl Into<String>) {
        let flat = flat.into();
        if let Some(previous) = self.to_flat.insert(source.clone(), flat.clone()) {
            if let Some(sources) = self.to_source.get_mut(&previous) {
                sources.retain(|s| s != &source);
            }
        }
        self.to_source.entry(flat).or_default().push(source);
    }

    /// Moves every source of `from` onto `to`, after the sources `to`
    /// already has.
    pub fn redirect(&mut self, from: &str, to: &str) {
        let Some(sources) = self.to_source.shift_remove(from) else {
            return;
        };
        for source in &sources {
            self.to_flat.insert(source.clone(), to.to_string());
        }
        self.to_source.entry(to.to_string()).or_default().extend(sources);
    }

    pub fn flat_of(&self, node: NodeId, place: &str) -> Option<&str> {
        self.to_flat
            .get(&SourcePlace::new(node, place))
            .map(String::as_str)
    }

    pub fn sources_of(&self, flat: &str) -> &[SourcePlace] {
        self.to_source.get(flat).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The source whose tokens a flattened place starts from.
    pub fn primary(&self, flat: &str) -> Option<&SourcePlace> {
        self.sources_of(flat).first()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[SourcePlace])> {
        self.to_source
            .iter()
            .map(|(flat, sources)| (flat.as_str(), sources.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.to_flat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_flat.is_empty()
    }
}
