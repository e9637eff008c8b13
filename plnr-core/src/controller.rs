mod traversal;

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;

use crate::component::IterationListener;
use crate::element::Element;
use crate::plan::NodeId;

/// Repetition count of a loop controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    Finite(u64),
    Forever,
}

impl LoopCount {
    /// Whether another pass may start once `completed` passes have finished.
    #[must_use]
    pub fn allows(self, completed: u64) -> bool {
        match self {
            Self::Finite(target) => completed < target,
            Self::Forever => true,
        }
    }
}

impl From<i64> for LoopCount {
    /// Negative counts mean "forever".
    fn from(count: i64) -> Self {
        u64::try_from(count).map_or(Self::Forever, Self::Finite)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerKind {
    Generic,

    Loop {
        target: LoopCount,
        /// Finished passes in the current repetition set.
        completed: u64,
    },

    /// Children are admitted only in the pass the controller was (re)armed for.
    OnceOnly,

    /// Repeats its children until `budget_secs` have elapsed since the first `next()`.
    RunTime {
        budget_secs: i64,
        started_at: Option<Instant>,
        passes: u64,
    },
}

impl ControllerKind {
    pub fn looping(target: impl Into<LoopCount>) -> Self {
        Self::Loop {
            target: target.into(),
            completed: 0,
        }
    }

    pub fn run_time(budget_secs: i64) -> Self {
        Self::RunTime {
            budget_secs,
            started_at: None,
            passes: 0,
        }
    }

    #[must_use]
    pub fn is_once_only(&self) -> bool {
        matches!(self, Self::OnceOnly)
    }

    fn reset(&mut self) {
        match self {
            Self::Generic | Self::OnceOnly => {}
            Self::Loop { completed, .. } => *completed = 0,
            Self::RunTime {
                started_at, passes, ..
            } => {
                *started_at = None;
                *passes = 0;
            }
        }
    }
}

/// Notification that `source` started a new pass over its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationEvent {
    pub source: NodeId,
    pub iteration: u64,
}

#[derive(Clone)]
pub enum Listener {
    /// Another controller of the same plan. Only once-only controllers react.
    Controller(NodeId),
    Observer(Arc<dyn IterationListener>),
}

impl Listener {
    fn same_as(&self, other: &Listener) -> bool {
        match (self, other) {
            (Self::Controller(a), Self::Controller(b)) => a == b,
            (Self::Observer(a), Self::Observer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Controller(id) => f.debug_tuple("Controller").field(id).finish(),
            Self::Observer(_) => f.write_str("Observer(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Controller {
    pub(crate) element: Element,
    pub(crate) kind: ControllerKind,
    pub(crate) children: Vec<NodeId>,
    pub(crate) cursor: usize,
    pub(crate) at_start: bool,
    pub(crate) done: bool,
    /// Passes since the last `initialize`, 1-based.
    pub(crate) pass: u64,
    /// Whether the current pass produced at least one sampler.
    pub(crate) yielded: bool,
    pub(crate) listeners: Vec<Listener>,
}

impl Controller {
    pub(crate) fn new(element: Element, kind: ControllerKind) -> Self {
        Self {
            element,
            kind,
            children: Vec::new(),
            cursor: 0,
            at_start: true,
            done: false,
            pass: 1,
            yielded: false,
            listeners: Vec::new(),
        }
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn kind(&self) -> &ControllerKind {
        &self.kind
    }

    /// Live children (controllers and samplers) in traversal order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        match self.kind {
            ControllerKind::RunTime { budget_secs, .. }
                if budget_secs <= 0 || self.children.is_empty() =>
            {
                true
            }
            ControllerKind::Loop {
                target: LoopCount::Finite(0),
                ..
            } => true,
            _ => self.done,
        }
    }

    /// Iteration number reported to listeners when the current pass starts.
    #[must_use]
    pub fn iteration(&self) -> u64 {
        match self.kind {
            ControllerKind::Loop { completed, .. } => completed.saturating_add(1),
            ControllerKind::RunTime { passes, .. } => passes.saturating_add(1),
            ControllerKind::Generic | ControllerKind::OnceOnly => self.pass,
        }
    }

    /// Registers `listener` unless an identical one is already present.
    pub(crate) fn add_listener(&mut self, listener: Listener) -> bool {
        if self.listeners.iter().any(|l| l.same_as(&listener)) {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    fn rewind(&mut self) {
        self.cursor = 0;
        self.at_start = true;
        self.done = false;
        self.yielded = false;
    }
}
