use std::sync::Arc;

use super::{Component, Node, NodeId, TestPlan, compiler};
use crate::component::{
    Assertion, IterationListener, PostProcessor, PreProcessor, SampleListener, Sampler, Timer,
};
use crate::controller::{Controller, ControllerKind, Listener};
use crate::element::Element;
use crate::error::{Error, Result};

/// Assembles a plan tree.
///
/// Controllers and samplers hang off controllers. Configs, timers, assertions, processors and
/// listeners hang off either: attached to a controller they apply to every sampler below it,
/// attached to a sampler they apply to that sampler alone.
pub struct PlanBuilder {
    pub(super) nodes: Vec<Node>,
    pub(super) children: Vec<Vec<NodeId>>,
    pub(super) parents: Vec<Option<NodeId>>,
    pub(super) root: Option<NodeId>,
    auto_wire: bool,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            children: Vec::new(),
            parents: Vec::new(),
            root: None,
            auto_wire: true,
        }
    }
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether once-only controllers added from now on listen to their parent's iterations.
    /// On by default.
    pub fn auto_wire_once_only(&mut self, enabled: bool) -> &mut Self {
        self.auto_wire = enabled;
        self
    }

    pub fn root(&mut self, element: impl Into<Element>, kind: ControllerKind) -> Result<NodeId> {
        if self.root.is_some() {
            return Err(Error::RootAlreadySet);
        }
        let id = self.push(None, Node::Controller(Controller::new(element.into(), kind)));
        self.root = Some(id);
        Ok(id)
    }

    pub fn controller(
        &mut self,
        parent: NodeId,
        element: impl Into<Element>,
        kind: ControllerKind,
    ) -> Result<NodeId> {
        self.require_controller(parent)?;
        let once_only = kind.is_once_only();
        let id = self.push(
            Some(parent),
            Node::Controller(Controller::new(element.into(), kind)),
        );
        if once_only && self.auto_wire {
            self.listen(parent, id)?;
        }
        Ok(id)
    }

    pub fn sampler<S>(
        &mut self,
        parent: NodeId,
        element: impl Into<Element>,
        sampler: S,
    ) -> Result<NodeId>
    where
        S: Sampler + 'static,
    {
        self.require_controller(parent)?;
        let behavior: Arc<dyn Sampler> = Arc::new(sampler);
        Ok(self.push(
            Some(parent),
            Node::Sampler(Component::new(element.into(), behavior)),
        ))
    }

    pub fn config(&mut self, parent: NodeId, element: impl Into<Element>) -> Result<NodeId> {
        self.require_scope(parent)?;
        Ok(self.push(Some(parent), Node::Config(element.into())))
    }

    pub fn timer<T>(&mut self, parent: NodeId, element: impl Into<Element>, timer: T) -> Result<NodeId>
    where
        T: Timer + 'static,
    {
        self.require_scope(parent)?;
        let behavior: Arc<dyn Timer> = Arc::new(timer);
        Ok(self.push(
            Some(parent),
            Node::Timer(Component::new(element.into(), behavior)),
        ))
    }

    pub fn assertion<A>(
        &mut self,
        parent: NodeId,
        element: impl Into<Element>,
        assertion: A,
    ) -> Result<NodeId>
    where
        A: Assertion + 'static,
    {
        self.require_scope(parent)?;
        let behavior: Arc<dyn Assertion> = Arc::new(assertion);
        Ok(self.push(
            Some(parent),
            Node::Assertion(Component::new(element.into(), behavior)),
        ))
    }

    pub fn pre_processor<P>(
        &mut self,
        parent: NodeId,
        element: impl Into<Element>,
        processor: P,
    ) -> Result<NodeId>
    where
        P: PreProcessor + 'static,
    {
        self.require_scope(parent)?;
        let behavior: Arc<dyn PreProcessor> = Arc::new(processor);
        Ok(self.push(
            Some(parent),
            Node::PreProcessor(Component::new(element.into(), behavior)),
        ))
    }

    pub fn post_processor<P>(
        &mut self,
        parent: NodeId,
        element: impl Into<Element>,
        processor: P,
    ) -> Result<NodeId>
    where
        P: PostProcessor + 'static,
    {
        self.require_scope(parent)?;
        let behavior: Arc<dyn PostProcessor> = Arc::new(processor);
        Ok(self.push(
            Some(parent),
            Node::PostProcessor(Component::new(element.into(), behavior)),
        ))
    }

    pub fn listener<L>(
        &mut self,
        parent: NodeId,
        element: impl Into<Element>,
        listener: L,
    ) -> Result<NodeId>
    where
        L: SampleListener + 'static,
    {
        self.require_scope(parent)?;
        let behavior: Arc<dyn SampleListener> = Arc::new(listener);
        Ok(self.push(
            Some(parent),
            Node::Listener(Component::new(element.into(), behavior)),
        ))
    }

    /// Makes controller `target` an iteration listener of controller `source`.
    pub fn listen(&mut self, source: NodeId, target: NodeId) -> Result<&mut Self> {
        self.require_controller(target)?;
        self.controller_mut(source)?
            .add_listener(Listener::Controller(target));
        Ok(self)
    }

    /// Forwards iteration events of `source` to an external observer.
    pub fn observe(
        &mut self,
        source: NodeId,
        observer: Arc<dyn IterationListener>,
    ) -> Result<&mut Self> {
        self.controller_mut(source)?
            .add_listener(Listener::Observer(observer));
        Ok(self)
    }

    /// Mutable access to an element before the plan is compiled (to disable it, for instance).
    pub fn element_mut(&mut self, id: NodeId) -> Result<&mut Element> {
        self.nodes
            .get_mut(id.index())
            .map(Node::element_mut)
            .ok_or(Error::UnknownNode(id))
    }

    pub fn build(self) -> Result<TestPlan> {
        compiler::compile(self)
    }

    fn push(&mut self, parent: Option<NodeId>, node: Node) -> NodeId {
        let id = NodeId::new(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(node);
        self.children.push(Vec::new());
        self.parents.push(parent);
        if let Some(parent) = parent
            && let Some(siblings) = self.children.get_mut(parent.index())
        {
            siblings.push(id);
        }
        id
    }

    fn controller_mut(&mut self, id: NodeId) -> Result<&mut Controller> {
        match self.nodes.get_mut(id.index()) {
            Some(Node::Controller(ctl)) => Ok(ctl),
            Some(_) => Err(Error::NotAController(id)),
            None => Err(Error::UnknownNode(id)),
        }
    }

    fn require_controller(&self, id: NodeId) -> Result<()> {
        match self.nodes.get(id.index()) {
            Some(node) if node.is_controller() => Ok(()),
            Some(_) => Err(Error::NotAContainer(id)),
            None => Err(Error::UnknownNode(id)),
        }
    }

    fn require_scope(&self, id: NodeId) -> Result<()> {
        match self.nodes.get(id.index()) {
            Some(node) if node.is_controller() || node.is_sampler() => Ok(()),
            Some(_) => Err(Error::NotAContainer(id)),
            None => Err(Error::UnknownNode(id)),
        }
    }
}
