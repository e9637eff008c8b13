mod builder;
mod compiler;

use std::fmt;
use std::sync::Arc;

use crate::component::{Assertion, PostProcessor, PreProcessor, SampleListener, Sampler, Timer};
use crate::controller::Controller;
use crate::element::Element;
use crate::pipeline::SamplePackage;

pub use builder::PlanBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-thread element data paired with its shared behaviour.
pub struct Component<T: ?Sized> {
    pub(crate) element: Element,
    pub(crate) behavior: Arc<T>,
}

impl<T: ?Sized> Component<T> {
    pub(crate) fn new(element: Element, behavior: Arc<T>) -> Self {
        Self { element, behavior }
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn behavior(&self) -> &Arc<T> {
        &self.behavior
    }
}

impl<T: ?Sized> Clone for Component<T> {
    fn clone(&self) -> Self {
        Self {
            element: self.element.clone(),
            behavior: Arc::clone(&self.behavior),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Component<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("element", &self.element)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Controller(Controller),
    Sampler(Component<dyn Sampler>),
    Config(Element),
    Timer(Component<dyn Timer>),
    Assertion(Component<dyn Assertion>),
    PreProcessor(Component<dyn PreProcessor>),
    PostProcessor(Component<dyn PostProcessor>),
    Listener(Component<dyn SampleListener>),
}

impl Node {
    pub fn element(&self) -> &Element {
        match self {
            Self::Controller(ctl) => &ctl.element,
            Self::Config(el) => el,
            Self::Sampler(c) => &c.element,
            Self::Timer(c) => &c.element,
            Self::Assertion(c) => &c.element,
            Self::PreProcessor(c) => &c.element,
            Self::PostProcessor(c) => &c.element,
            Self::Listener(c) => &c.element,
        }
    }

    pub fn element_mut(&mut self) -> &mut Element {
        match self {
            Self::Controller(ctl) => &mut ctl.element,
            Self::Config(el) => el,
            Self::Sampler(c) => &mut c.element,
            Self::Timer(c) => &mut c.element,
            Self::Assertion(c) => &mut c.element,
            Self::PreProcessor(c) => &mut c.element,
            Self::PostProcessor(c) => &mut c.element,
            Self::Listener(c) => &mut c.element,
        }
    }

    pub fn name(&self) -> &str {
        self.element().name()
    }

    fn is_controller(&self) -> bool {
        matches!(self, Self::Controller(_))
    }

    fn is_sampler(&self) -> bool {
        matches!(self, Self::Sampler(_))
    }
}

/// A compiled plan: an arena of nodes plus the per-sampler packages.
///
/// Cloning a plan gives an independent copy of every element and traversal cursor; behaviours and
/// packages stay shared. Each thread runs its own clone.
#[derive(Debug, Clone)]
pub struct TestPlan {
    nodes: Vec<Node>,
    root: Option<NodeId>,
    packages: Arc<ahash::AHashMap<NodeId, SamplePackage>>,
    preorder: Arc<[NodeId]>,
}

impl TestPlan {
    pub fn builder() -> PlanBuilder {
        PlanBuilder::new()
    }

    /// `None` when the root was disabled.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.node(id).map(Node::element)
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        self.node_mut(id).map(Node::element_mut)
    }

    pub fn controller(&self, id: NodeId) -> Option<&Controller> {
        match self.node(id)? {
            Node::Controller(ctl) => Some(ctl),
            _ => None,
        }
    }

    pub(crate) fn controller_mut(&mut self, id: NodeId) -> Option<&mut Controller> {
        match self.node_mut(id)? {
            Node::Controller(ctl) => Some(ctl),
            _ => None,
        }
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(Node::name)
    }

    /// First live node named `name`, in pre-order.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.preorder
            .iter()
            .copied()
            .find(|id| self.name(*id) == Some(name))
    }

    pub fn package(&self, sampler: NodeId) -> Option<&SamplePackage> {
        self.packages.get(&sampler)
    }

    pub(crate) fn packages(&self) -> Arc<ahash::AHashMap<NodeId, SamplePackage>> {
        self.packages.clone()
    }

    /// Live nodes in pre-order (parents before their children, siblings in insertion order).
    pub fn preorder(&self) -> &[NodeId] {
        &self.preorder
    }
}
