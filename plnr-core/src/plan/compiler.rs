use std::sync::Arc;

use super::builder::PlanBuilder;
use super::{Node, NodeId, TestPlan};
use crate::controller::Listener;
use crate::error::{Error, Result};
use crate::pipeline::SamplePackage;

/// Turns builder output into a runnable plan: prunes disabled subtrees, fills controller child
/// lists and builds one package per live sampler.
pub(super) fn compile(builder: PlanBuilder) -> Result<TestPlan> {
    let PlanBuilder {
        mut nodes,
        children,
        root,
        ..
    } = builder;
    let root = root.ok_or(Error::MissingRoot)?;

    let live = liveness(&nodes, &children, root);
    let is_live = |id: NodeId| live.get(id.index()).copied().unwrap_or(false);

    let mut preorder = Vec::new();
    if is_live(root) {
        collect_preorder(&children, root, &is_live, &mut preorder);
    }

    for id in &preorder {
        let traversable: Vec<NodeId> = children
            .get(id.index())
            .into_iter()
            .flatten()
            .copied()
            .filter(|child| {
                is_live(*child)
                    && nodes
                        .get(child.index())
                        .is_some_and(|n| n.is_controller() || n.is_sampler())
            })
            .collect();

        if let Some(Node::Controller(ctl)) = nodes.get_mut(id.index()) {
            ctl.children = traversable;
            ctl.listeners.retain(|l| match l {
                Listener::Controller(target) => is_live(*target),
                Listener::Observer(_) => true,
            });
        }
    }

    let mut packages = ahash::AHashMap::new();
    let mut path = Vec::new();
    if is_live(root) {
        build_packages(&nodes, &children, root, &is_live, &mut path, &mut packages);
    }

    tracing::debug!(
        nodes = nodes.len(),
        live = preorder.len(),
        samplers = packages.len(),
        "plan compiled"
    );

    Ok(TestPlan {
        nodes,
        root: is_live(root).then_some(root),
        packages: Arc::new(packages),
        preorder: Arc::from(preorder),
    })
}

/// A node is live when it and every ancestor are enabled.
fn liveness(nodes: &[Node], children: &[Vec<NodeId>], root: NodeId) -> Vec<bool> {
    let mut live = vec![false; nodes.len()];
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let enabled = nodes
            .get(id.index())
            .is_some_and(|n| n.element().is_enabled());
        if !enabled {
            continue;
        }
        if let Some(slot) = live.get_mut(id.index()) {
            *slot = true;
        }
        if let Some(kids) = children.get(id.index()) {
            stack.extend(kids.iter().copied());
        }
    }
    live
}

fn collect_preorder(
    children: &[Vec<NodeId>],
    id: NodeId,
    is_live: &impl Fn(NodeId) -> bool,
    out: &mut Vec<NodeId>,
) {
    out.push(id);
    for child in children.get(id.index()).into_iter().flatten() {
        if is_live(*child) {
            collect_preorder(children, *child, is_live, out);
        }
    }
}

fn build_packages(
    nodes: &[Node],
    children: &[Vec<NodeId>],
    controller: NodeId,
    is_live: &impl Fn(NodeId) -> bool,
    path: &mut Vec<NodeId>,
    out: &mut ahash::AHashMap<NodeId, SamplePackage>,
) {
    path.push(controller);
    for child in children.get(controller.index()).into_iter().flatten() {
        if !is_live(*child) {
            continue;
        }
        match nodes.get(child.index()) {
            Some(Node::Controller(_)) => {
                build_packages(nodes, children, *child, is_live, path, out);
            }
            Some(Node::Sampler(_)) => {
                let mut package = SamplePackage::new(*child, path.clone());
                // Outermost scope first, the sampler's own components last.
                for scope in path.iter().chain(std::iter::once(child)) {
                    for id in children.get(scope.index()).into_iter().flatten() {
                        if is_live(*id)
                            && let Some(node) = nodes.get(id.index())
                        {
                            package.add(*id, node);
                        }
                    }
                }
                out.insert(*child, package);
            }
            _ => {}
        }
    }
    path.pop();
}
