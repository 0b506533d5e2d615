//! The build graph: nodes in an arena, connected by index edges.
//!
//! Edges never own their targets, so dependency cycles (which are user
//! errors, reported by the walker) can't turn into ownership cycles, and
//! the waiting-parents back edges are plain indices too.

use crate::builder::{Builder, Env, Executor, Invocation};
use crate::densemap::{self, DenseMap};
use crate::error::Error;
use crate::fs::FileSystem;
use crate::info::{BuildInfo, NodeInfo};
use rustc_hash::FxHashMap;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl densemap::Index for NodeId {
    fn index(&self) -> usize {
        self.0
    }
}

impl From<usize> for NodeId {
    fn from(u: usize) -> NodeId {
        NodeId(u)
    }
}

/// Where a node is in its lifecycle for the current run.  Ordered: later
/// states compare greater.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    #[default]
    NoState,
    /// Scheduled by the walker, waiting on children.
    Pending,
    /// Its action is running.
    Executing,
    /// Found current; no action ran.
    UpToDate,
    /// Its action ran and succeeded.
    Executed,
    Failed,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeState::UpToDate | NodeState::Executed | NodeState::Failed
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Backed by the content reader.
    File,
    /// A pseudo-target.  Always exists; its content is the names of its
    /// children.
    Alias,
}

pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    state: NodeState,

    /// Explicit build inputs.
    pub sources: Vec<NodeId>,
    /// Explicit extra dependencies.
    pub depends: Vec<NodeId>,
    /// Dependencies discovered by scanning.  None until scanned.
    pub implicit: Option<Vec<NodeId>>,
    /// Dependencies excluded from children().
    pub ignore: Vec<NodeId>,
    /// Incidental outputs of this node's action.
    pub side_effects: Vec<NodeId>,
    /// For a side effect, the nodes whose actions produce it.
    pub producers: Vec<NodeId>,

    pub always_build: bool,
    pub noclean: bool,
    pub precious: bool,
    pub side_effect: bool,

    builder: Option<Arc<Builder>>,
    explicit_builder: bool,
    pub env: Option<Env>,
    executor: Option<Executor>,

    /// Build info generated during this run.
    pub(crate) binfo: Option<BuildInfo>,
    /// Memoized signature of this node's current content.
    pub(crate) ninfo: Option<NodeInfo>,
    /// Set when a scan skipped a source that was yet to be built; the
    /// implicit list is incomplete until the node is scanned again.
    pub(crate) rescan: bool,

    /// Nodes waiting on this one to finish.  Insertion ordered, no repeats.
    waiting_parents: Vec<NodeId>,
}

impl Node {
    fn new(name: String, kind: NodeKind) -> Self {
        Node {
            name,
            kind,
            state: NodeState::NoState,
            sources: Vec::new(),
            depends: Vec::new(),
            implicit: None,
            ignore: Vec::new(),
            side_effects: Vec::new(),
            producers: Vec::new(),
            always_build: false,
            noclean: false,
            precious: false,
            side_effect: false,
            builder: None,
            explicit_builder: false,
            env: None,
            executor: None,
            binfo: None,
            ninfo: None,
            rescan: false,
            waiting_parents: Vec::new(),
        }
    }

    pub fn get_state(&self) -> NodeState {
        self.state
    }

    pub fn set_state(&mut self, state: NodeState) {
        tracing::debug!(node = %self.name, from = ?self.state, to = ?state, "state");
        self.state = state;
    }

    pub fn builder(&self) -> Option<&Arc<Builder>> {
        self.builder.as_ref()
    }

    pub fn has_builder(&self) -> bool {
        self.builder.is_some()
    }

    pub fn has_explicit_builder(&self) -> bool {
        self.builder.is_some() && self.explicit_builder
    }

    /// True for artifacts the build produces, as opposed to plain sources.
    pub fn is_derived(&self) -> bool {
        self.has_builder() || self.side_effect
    }

    pub fn set_always_build(&mut self, always_build: bool) {
        self.always_build = always_build;
    }

    pub fn set_noclean(&mut self, noclean: bool) {
        self.noclean = noclean;
    }

    pub fn set_precious(&mut self, precious: bool) {
        self.precious = precious;
    }

    /// The key under which an environment registers a scanner for this
    /// node: its file extension, without the dot.
    pub fn scanner_key(&self) -> &str {
        let base = self.name.rsplit('/').next().unwrap_or(&self.name);
        match base.rfind('.') {
            Some(i) if i > 0 => &base[i + 1..],
            _ => "",
        }
    }

    pub fn binfo(&self) -> Option<&BuildInfo> {
        self.binfo.as_ref()
    }

    pub fn del_binfo(&mut self) {
        self.binfo = None;
    }

    /// Drop all state computed from the node's content or its inputs, so
    /// that it will be recomputed.
    pub fn clear(&mut self) {
        self.binfo = None;
        self.ninfo = None;
        self.implicit = None;
        self.executor = None;
        self.rescan = false;
    }

    /// Forget the memoized content signature, because the content changed.
    pub fn built(&mut self) {
        self.ninfo = None;
    }

    pub fn waiting_parents(&self) -> &[NodeId] {
        &self.waiting_parents
    }

    /// Returns true if the parent wasn't already waiting.
    pub fn add_to_waiting_parents(&mut self, parent: NodeId) -> bool {
        if self.waiting_parents.contains(&parent) {
            return false;
        }
        self.waiting_parents.push(parent);
        true
    }

    /// Called once the node is finished with; drops the waiting parents.
    pub fn postprocess(&mut self) {
        self.waiting_parents.clear();
    }
}

/// Append the entries of `new` to `list`, skipping any already present.
fn add_child(list: &mut Vec<NodeId>, new: &[NodeId]) {
    for &id in new {
        if !list.contains(&id) {
            list.push(id);
        }
    }
}

#[derive(Default)]
pub struct Graph {
    nodes: DenseMap<NodeId, Node>,
    by_name: FxHashMap<String, NodeId>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    fn add(&mut self, name: &str, kind: NodeKind) -> NodeId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.nodes.push(Node::new(name.to_owned(), kind));
        self.by_name.insert(name.to_owned(), id);
        id
    }

    /// Look up or create the file node with a given name.
    pub fn file(&mut self, name: &str) -> NodeId {
        self.add(name, NodeKind::File)
    }

    /// Look up or create the alias node with a given name.  If the name is
    /// already known, the existing node is returned unchanged.
    pub fn alias(&mut self, name: &str) -> NodeId {
        self.add(name, NodeKind::Alias)
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id].name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn all_ids(&self) -> impl Iterator<Item = NodeId> {
        self.nodes.all_ids()
    }

    pub fn add_source(&mut self, id: NodeId, sources: &[NodeId]) {
        add_child(&mut self.nodes[id].sources, sources);
    }

    pub fn add_dependency(&mut self, id: NodeId, depends: &[NodeId]) {
        add_child(&mut self.nodes[id].depends, depends);
    }

    pub fn add_ignore(&mut self, id: NodeId, ignore: &[NodeId]) {
        add_child(&mut self.nodes[id].ignore, ignore);
    }

    /// Append to the implicit list, which must already exist (i.e. the node
    /// is being scanned).
    pub fn add_implicit(&mut self, id: NodeId, implicit: &[NodeId]) {
        let list = self.nodes[id].implicit.get_or_insert_with(Vec::new);
        add_child(list, implicit);
    }

    /// Record `side` as an incidental output of `id`'s action.
    pub fn add_side_effect(&mut self, id: NodeId, side: NodeId) {
        let node = &mut self.nodes[side];
        node.side_effect = true;
        add_child(&mut node.producers, &[id]);
        add_child(&mut self.nodes[id].side_effects, &[side]);
    }

    /// Attach a builder inferred from context; replaces any previous one.
    pub fn builder_set(&mut self, id: NodeId, builder: Arc<Builder>) {
        let node = &mut self.nodes[id];
        node.builder = Some(builder);
        node.explicit_builder = false;
        node.executor = None;
    }

    /// Attach a builder the user declared.  Two different explicit builders
    /// for one node is an error.
    pub fn set_explicit_builder(&mut self, id: NodeId, builder: Arc<Builder>) -> Result<(), Error> {
        let node = &mut self.nodes[id];
        if node.explicit_builder {
            if let Some(existing) = &node.builder {
                if !Arc::ptr_eq(existing, &builder) {
                    return Err(Error::stop(format!(
                        "Multiple ways to build the same target were specified for: {}",
                        node.name
                    )));
                }
            }
        }
        node.builder = Some(builder);
        node.explicit_builder = true;
        node.executor = None;
        Ok(())
    }

    pub fn env_set(&mut self, id: NodeId, env: Env) {
        let node = &mut self.nodes[id];
        node.env = Some(env);
        node.executor = None;
    }

    /// The dependencies that matter for building and currency: sources,
    /// depends and implicit, in that order, without ignored nodes or
    /// repeats.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let node = &self.nodes[id];
        let mut kids = Vec::new();
        for &kid in self.all_children_iter(id) {
            if kid != id && !node.ignore.contains(&kid) && !kids.contains(&kid) {
                kids.push(kid);
            }
        }
        kids
    }

    /// What must finish before this node can: its children and, for a side
    /// effect, the nodes that produce it.
    pub fn waits_on(&self, id: NodeId) -> Vec<NodeId> {
        let mut kids = self.children(id);
        add_child(&mut kids, &self.nodes[id].producers);
        kids.retain(|&kid| kid != id);
        kids
    }

    /// Every dependency, ignored ones included.
    pub fn all_children(&self, id: NodeId) -> Vec<NodeId> {
        let mut kids = Vec::new();
        add_child(&mut kids, &self.all_children_iter(id).copied().collect::<Vec<_>>());
        kids
    }

    fn all_children_iter(&self, id: NodeId) -> impl Iterator<Item = &NodeId> {
        let node = &self.nodes[id];
        node.sources
            .iter()
            .chain(node.depends.iter())
            .chain(node.implicit.iter().flatten())
    }

    /// Bind the node's builder to it, if it has one.  Cached until the
    /// builder or environment changes.
    pub fn get_executor(&mut self, id: NodeId) -> Option<Executor> {
        if let Some(executor) = &self.nodes[id].executor {
            return Some(executor.clone());
        }
        let node = &self.nodes[id];
        let builder = node.builder.as_ref()?;
        let base = node.env.as_ref().unwrap_or(&builder.env);
        let invocation = Invocation {
            targets: vec![node.name.clone()],
            sources: node.sources.iter().map(|&s| self.name(s).to_owned()).collect(),
            env: base.override_with(&builder.overrides),
        };
        let executor = Executor {
            actions: builder.actions.clone(),
            invocation,
        };
        self.nodes[id].executor = Some(executor.clone());
        Some(executor)
    }

    /// Content of a node that isn't backed by the content reader.
    pub fn alias_contents(&self, id: NodeId) -> String {
        self.children(id)
            .iter()
            .map(|&kid| self.name(kid))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn exists(&self, id: NodeId, fs: &dyn FileSystem) -> Result<bool, Error> {
        let node = &self.nodes[id];
        match node.kind {
            NodeKind::Alias => Ok(true),
            NodeKind::File => fs
                .stat(&node.name)
                .map(|stat| stat.exists())
                .map_err(|err| Error::stop(format!("{}: {}", node.name, err))),
        }
    }

    /// Check that every child either exists or can be built.
    pub fn prepare(&self, id: NodeId, fs: &dyn FileSystem) -> Result<(), Error> {
        for kid in self.children(id) {
            if self.nodes[kid].is_derived() {
                continue;
            }
            if !self.exists(kid, fs)? {
                return Err(Error::stop(format!(
                    "Source `{}' not found, needed by target `{}'.",
                    self.name(kid),
                    self.name(id)
                )));
            }
        }
        Ok(())
    }

    /// Call `f` on the node itself, then on each node waiting on it.
    pub fn call_for_all_waiting_parents(&self, id: NodeId, mut f: impl FnMut(NodeId)) {
        f(id);
        for &parent in &self.nodes[id].waiting_parents {
            f(parent);
        }
    }
}
