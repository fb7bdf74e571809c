use std::rc::Rc;

use super::graph::ScriptGraph;
use super::ivalue::IValue;

/// A scripted module: named attributes plus, for the top-level module, its
/// inlined forward graph.
#[derive(Debug, Clone, Default)]
pub struct ScriptModule {
    name: String,
    attributes: Vec<(String, IValue)>,
    graph: Option<Rc<ScriptGraph>>,
}

impl ScriptModule {
    /// An empty module with the given qualified class name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add or replace an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<IValue>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => *slot = value,
            None => self.attributes.push((name, value)),
        }
        self
    }

    /// Attach the inlined graph.
    pub fn with_graph(mut self, graph: ScriptGraph) -> Self {
        self.graph = Some(Rc::new(graph));
        self
    }

    /// Qualified class name, such as `__torch__.Net`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an attribute by name.
    pub fn attr(&self, name: &str) -> Option<&IValue> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// The inlined forward graph, if one was attached.
    pub fn inlined_graph(&self) -> Option<&Rc<ScriptGraph>> {
        self.graph.as_ref()
    }
}
