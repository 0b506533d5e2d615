//! Post-order traversal of the dependency graph.
//!
//! The walker is pull-based: each `next()` call yields the next node whose
//! children have all been yielded.  It keeps an explicit stack rather than
//! recursing, so deep chains don't overflow.  The children of a node are
//! requested from the caller when the node is first entered, which lets the
//! caller scan the node at that point.

use crate::graph::NodeId;
use rustc_hash::FxHashSet;

struct Frame {
    id: NodeId,
    kids: Vec<NodeId>,
    next: usize,
}

pub struct Walker {
    /// The root, until the first next() enters it.
    root: Option<NodeId>,
    stack: Vec<Frame>,
    /// Nodes on the stack, for cycle detection.
    on_path: FxHashSet<NodeId>,
    /// Nodes already yielded.
    visited: FxHashSet<NodeId>,
}

impl Walker {
    pub fn new(root: NodeId) -> Self {
        Walker {
            root: Some(root),
            stack: Vec::new(),
            on_path: FxHashSet::default(),
            visited: FxHashSet::default(),
        }
    }

    fn enter(&mut self, id: NodeId, kids: &mut dyn FnMut(NodeId) -> Vec<NodeId>) {
        let kids = kids(id);
        self.on_path.insert(id);
        self.stack.push(Frame { id, kids, next: 0 });
    }

    /// Yield the next node in post order, or None when the walk is over.
    ///
    /// A child that is already on the path being walked closes a cycle:
    /// `cycle` is called with that child and the path from the root, and
    /// the edge is treated as satisfied.
    pub fn next(
        &mut self,
        kids: &mut dyn FnMut(NodeId) -> Vec<NodeId>,
        cycle: &mut dyn FnMut(NodeId, &[NodeId]),
    ) -> Option<NodeId> {
        if let Some(root) = self.root.take() {
            self.enter(root, kids);
        }
        while let Some(top) = self.stack.last_mut() {
            if top.next < top.kids.len() {
                let kid = top.kids[top.next];
                top.next += 1;
                if self.on_path.contains(&kid) {
                    let path: Vec<NodeId> = self.stack.iter().map(|f| f.id).collect();
                    cycle(kid, &path);
                    continue;
                }
                if self.visited.contains(&kid) {
                    continue;
                }
                self.enter(kid, kids);
            } else {
                let id = top.id;
                self.stack.pop();
                self.on_path.remove(&id);
                self.visited.insert(id);
                return Some(id);
            }
        }
        None
    }

    pub fn is_done(&self) -> bool {
        self.root.is_none() && self.stack.is_empty()
    }
}
