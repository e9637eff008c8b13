use std::time::Duration;

use super::{Controller, ControllerKind, IterationEvent, Listener};
use crate::error::{Error, Result};
use crate::plan::{Node, NodeId, TestPlan};

enum Exhausted {
    Retry,
    Finished,
}

impl TestPlan {
    /// Next sampler of the root controller, in depth-first order.
    pub fn next(&mut self) -> Option<NodeId> {
        let root = self.root()?;
        self.advance(root)
    }

    pub fn next_from(&mut self, id: NodeId) -> Result<Option<NodeId>> {
        self.checked_controller(id)?;
        Ok(self.advance(id))
    }

    /// A plan without a usable root is always done.
    pub fn is_done(&self) -> bool {
        self.root()
            .and_then(|root| self.controller(root))
            .is_none_or(Controller::is_done)
    }

    pub fn is_controller_done(&self, id: NodeId) -> Result<bool> {
        Ok(self.checked_controller(id)?.is_done())
    }

    /// Resets the whole tree, once-only controllers included.
    pub fn initialize(&mut self) {
        if let Some(root) = self.root() {
            self.initialize_controller(root);
        }
    }

    pub fn initialize_from(&mut self, id: NodeId) -> Result<()> {
        self.checked_controller(id)?;
        self.initialize_controller(id);
        Ok(())
    }

    /// Starts another pass over the root's children.
    pub fn re_initialize(&mut self) {
        if let Some(root) = self.root() {
            self.re_initialize_controller(root);
        }
    }

    pub fn re_initialize_from(&mut self, id: NodeId) -> Result<()> {
        self.checked_controller(id)?;
        self.re_initialize_controller(id);
        Ok(())
    }

    pub fn add_iteration_listener(&mut self, source: NodeId, listener: Listener) -> Result<bool> {
        if let Listener::Controller(target) = &listener {
            self.checked_controller(*target)?;
        }
        let ctl = self
            .controller_mut(source)
            .ok_or(Error::NotAController(source))?;
        Ok(ctl.add_listener(listener))
    }

    fn checked_controller(&self, id: NodeId) -> Result<&Controller> {
        match self.node(id) {
            Some(Node::Controller(ctl)) => Ok(ctl),
            Some(_) => Err(Error::NotAController(id)),
            None => Err(Error::UnknownNode(id)),
        }
    }

    fn advance(&mut self, id: NodeId) -> Option<NodeId> {
        loop {
            let ctl = self.controller_mut(id)?;
            if ctl.is_done() {
                return None;
            }

            if let ControllerKind::RunTime { started_at, .. } = &mut ctl.kind
                && started_at.is_none()
            {
                *started_at = Some(tokio::time::Instant::now());
            }

            if ctl.at_start {
                ctl.at_start = false;
                self.fire_iteration(id);
            }

            if let Some(sampler) = self.step(id) {
                if let Some(ctl) = self.controller_mut(id) {
                    ctl.yielded = true;
                }
                return Some(sampler);
            }

            match self.exhausted(id) {
                Exhausted::Retry => continue,
                Exhausted::Finished => return None,
            }
        }
    }

    /// Walks children from the cursor. `None` means the cursor ran past the last child.
    fn step(&mut self, id: NodeId) -> Option<NodeId> {
        loop {
            let child = {
                let ctl = self.controller(id)?;
                *ctl.children.get(ctl.cursor)?
            };

            if self.controller(child).is_some() {
                if let Some(sampler) = self.advance(child) {
                    return Some(sampler);
                }
                self.controller_mut(id)?.cursor += 1;
            } else {
                self.controller_mut(id)?.cursor += 1;
                return Some(child);
            }
        }
    }

    fn exhausted(&mut self, id: NodeId) -> Exhausted {
        let Some(ctl) = self.controller_mut(id) else {
            return Exhausted::Finished;
        };

        let yielded = ctl.yielded;
        let retry = match &mut ctl.kind {
            ControllerKind::Generic | ControllerKind::OnceOnly => false,
            ControllerKind::Loop { target, completed } => {
                *completed = completed.saturating_add(1);
                // A pass without samplers means every later pass is empty too.
                if yielded && target.allows(*completed) {
                    true
                } else {
                    *completed = 0;
                    false
                }
            }
            ControllerKind::RunTime {
                budget_secs,
                started_at,
                passes,
            } => {
                *passes = passes.saturating_add(1);
                let budget = Duration::from_secs(u64::try_from(*budget_secs).unwrap_or(0));
                let expired = started_at.is_none_or(|t| t.elapsed() >= budget);
                if yielded && !expired {
                    true
                } else {
                    tracing::debug!(controller = %id, passes = *passes, "run-time budget spent");
                    *started_at = None;
                    *passes = 0;
                    false
                }
            }
        };

        if retry {
            self.rearm(id);
            Exhausted::Retry
        } else {
            if let Some(ctl) = self.controller_mut(id) {
                ctl.done = true;
            }
            Exhausted::Finished
        }
    }

    fn fire_iteration(&mut self, id: NodeId) {
        let Some(ctl) = self.controller_mut(id) else {
            return;
        };
        if ctl.listeners.is_empty() {
            return;
        }

        let event = IterationEvent {
            source: id,
            iteration: ctl.iteration(),
        };
        let listeners = std::mem::take(&mut ctl.listeners);
        for listener in &listeners {
            match listener {
                Listener::Controller(target) => self.controller_iteration_start(*target, &event),
                Listener::Observer(observer) => observer.iteration_start(&event),
            }
        }
        if let Some(ctl) = self.controller_mut(id) {
            ctl.listeners = listeners;
        }
    }

    fn controller_iteration_start(&mut self, target: NodeId, event: &IterationEvent) {
        let rearm = self
            .controller(target)
            .is_some_and(|ctl| ctl.kind.is_once_only() && event.iteration == 1);
        if rearm {
            tracing::trace!(controller = %target, source = %event.source, "once-only re-armed");
            self.initialize_controller(target);
        }
    }

    pub(crate) fn initialize_controller(&mut self, id: NodeId) {
        let Some(ctl) = self.controller_mut(id) else {
            return;
        };
        ctl.rewind();
        ctl.pass = 1;
        ctl.kind.reset();

        let children = ctl.children.clone();
        for child in children {
            if self.controller(child).is_some() {
                self.initialize_controller(child);
            }
        }
    }

    fn re_initialize_controller(&mut self, id: NodeId) {
        self.rearm(id);
        if let Some(ctl) = self.controller_mut(id) {
            ctl.pass = ctl.pass.saturating_add(1);
        }
    }

    /// Rewinds `id` for another pass and re-initializes its child controllers. Once-only children
    /// are left alone: iteration events decide when they come back.
    fn rearm(&mut self, id: NodeId) {
        let Some(ctl) = self.controller_mut(id) else {
            return;
        };
        ctl.rewind();

        let children = ctl.children.clone();
        for child in children {
            let nested = self
                .controller(child)
                .is_some_and(|c| !c.kind.is_once_only());
            if nested {
                self.re_initialize_controller(child);
            }
        }
    }
}
