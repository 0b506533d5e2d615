//! Build runner: choosing which nodes to build, in which order, and
//! running their actions.
//!
//! `want()` walks the graph below a target, scanning each node as it is
//! entered, and schedules every node it yields with a count of children it
//! still waits on.  `run()` then repeatedly takes a ready node, decides
//! whether it is current, and if not hands its action to the runner.  When
//! a node reaches a terminal state its waiting parents are notified; a
//! parent whose count drops to zero becomes ready.
//!
//! All graph state is owned by the thread calling `run()`.  Runner threads
//! only ever see an owned `Invocation`.

use crate::context::Context;
use crate::decide;
use crate::error::{BuildError, Error};
use crate::graph::{Graph, NodeId, NodeKind, NodeState};
use crate::progress::Progress;
use crate::scan;
use crate::task::{FinishedTask, Runner, Termination};
use crate::walk::Walker;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::hash::{BuildHasher, Hasher};

/// What a run did.
#[derive(Debug, Default)]
pub struct Summary {
    /// Nodes whose action ran and succeeded.
    pub executed: usize,
    /// Nodes found current.
    pub up_to_date: usize,
    pub failures: Vec<BuildError>,
    /// Each dependency cycle found, as the path from the walk root to the
    /// node that closes it, followed by that node.
    pub cycles: Vec<Vec<String>>,
}

/// Sibling shuffling for `Options::random`: xorshift, seeded from the
/// standard library's per-process hash keys.
struct Shuffle(u64);

impl Shuffle {
    fn new() -> Self {
        let seed = std::collections::hash_map::RandomState::new()
            .build_hasher()
            .finish();
        Shuffle(seed | 1)
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = (self.next() % (i as u64 + 1)) as usize;
            items.swap(i, j);
        }
    }
}

/// Scan a node as the walk enters it, and return what it waits on.  Nodes
/// an earlier walk already scheduled aren't descended into.  Only the first
/// scan error is kept.
fn enter(graph: &mut Graph, id: NodeId, ctx: &Context, err: &mut Option<Error>) -> Vec<NodeId> {
    if graph.node(id).get_state() != NodeState::NoState {
        return Vec::new();
    }
    if err.is_none() {
        if let Err(e) = scan::scan(graph, id, ctx) {
            *err = Some(e);
        }
    }
    graph.waits_on(id)
}

impl Summary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn the first failure, if any, into an error.
    pub fn into_result(mut self) -> Result<Summary, Error> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        Err(Error::Build(self.failures.remove(0)))
    }
}

pub struct Work<'a> {
    graph: &'a mut Graph,
    ctx: &'a Context<'a>,
    progress: &'a mut dyn Progress,
    runner: Runner,

    /// Outstanding child count for each scheduled node that waits on any.
    pending: FxHashMap<NodeId, usize>,
    /// Nodes whose children are all terminal.
    ready: VecDeque<NodeId>,
    /// Edges (parent, child) that close a cycle; treated as satisfied.
    cycle_edges: FxHashSet<(NodeId, NodeId)>,
    /// Plain source nodes scheduled since the last prefetch.
    leaves: Vec<NodeId>,
    /// Descriptions of running actions, for progress output.
    running: FxHashMap<NodeId, String>,
    shuffle: Option<Shuffle>,

    failures: usize,
    summary: Summary,
}

impl<'a> Work<'a> {
    pub fn new(graph: &'a mut Graph, ctx: &'a Context<'a>, progress: &'a mut dyn Progress) -> Self {
        Work {
            graph,
            ctx,
            progress,
            runner: Runner::new(ctx.options.parallelism),
            pending: FxHashMap::default(),
            ready: VecDeque::new(),
            cycle_edges: FxHashSet::default(),
            leaves: Vec::new(),
            running: FxHashMap::default(),
            shuffle: if ctx.options.random {
                Some(Shuffle::new())
            } else {
                None
            },
            failures: 0,
            summary: Summary::default(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &*self.graph
    }

    fn report_cycle(&mut self, kid: NodeId, path: &[NodeId]) {
        let last = match path.last() {
            Some(&last) => last,
            None => return,
        };
        // Walks from several targets can run into the same cycle.
        if !self.cycle_edges.insert((last, kid)) {
            return;
        }
        let names: Vec<&str> = path.iter().map(|&id| self.graph.name(id)).collect();
        let kid_name = self.graph.name(kid);
        tracing::warn!(node = kid_name, path = ?names, "dependency cycle");
        self.progress.cycle(kid_name, &names);
        let mut cycle: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        cycle.push(kid_name.to_owned());
        self.summary.cycles.push(cycle);
    }

    /// Add a node yielded by the walk to the schedule.
    fn schedule(&mut self, id: NodeId) {
        if self.graph.node(id).get_state() != NodeState::NoState {
            return;
        }
        self.graph.node_mut(id).set_state(NodeState::Pending);
        let outstanding = self.wait_on_children(id);
        if outstanding == 0 {
            self.ready.push_back(id);
        } else {
            self.pending.insert(id, outstanding);
        }
        if !self.graph.node(id).is_derived() {
            self.leaves.push(id);
        }
    }

    /// Register `id` with each unfinished node it waits on; returns how many
    /// there were.
    fn wait_on_children(&mut self, id: NodeId) -> usize {
        let mut outstanding = 0;
        for kid in self.graph.waits_on(id) {
            if self.cycle_edges.contains(&(id, kid)) {
                continue;
            }
            if self.graph.node(kid).get_state().is_terminal() {
                continue;
            }
            if self.graph.node_mut(kid).add_to_waiting_parents(id) {
                outstanding += 1;
            }
        }
        outstanding
    }

    /// Schedule `target` and everything it depends on.
    pub fn want(&mut self, target: NodeId) -> Result<(), Error> {
        let ctx = self.ctx;
        ctx.trace.scope("walk", || self.walk(target))?;
        let leaves = std::mem::take(&mut self.leaves);
        let graph = &mut *self.graph;
        ctx.trace
            .scope("prefetch", || decide::prefetch(graph, &leaves, ctx));
        Ok(())
    }

    fn walk(&mut self, target: NodeId) -> Result<(), Error> {
        let ctx = self.ctx;
        let mut walker = Walker::new(target);
        let mut scan_err: Option<Error> = None;
        let mut cycles: Vec<(NodeId, Vec<NodeId>)> = Vec::new();
        loop {
            let graph = &mut *self.graph;
            let shuffle = &mut self.shuffle;
            let next = walker.next(
                &mut |id: NodeId| {
                    let mut kids = enter(graph, id, ctx, &mut scan_err);
                    if let Some(shuffle) = shuffle.as_mut() {
                        shuffle.shuffle(&mut kids);
                    }
                    kids
                },
                &mut |kid: NodeId, path: &[NodeId]| cycles.push((kid, path.to_vec())),
            );
            if let Some(err) = scan_err.take() {
                return Err(err);
            }
            for (kid, path) in std::mem::take(&mut cycles) {
                self.report_cycle(kid, &path);
            }
            match next {
                Some(id) => self.schedule(id),
                None => return Ok(()),
            }
        }
    }

    /// True once enough actions failed that no more should start.
    fn cancelled(&self) -> bool {
        let limit = self.ctx.options.keep_going;
        limit > 0 && self.failures >= limit
    }

    /// Record a terminal state and notify the nodes waiting on this one.
    fn finish(&mut self, id: NodeId, state: NodeState) {
        let node = self.graph.node_mut(id);
        node.set_state(state);
        match state {
            NodeState::UpToDate => self.summary.up_to_date += 1,
            NodeState::Executed => self.summary.executed += 1,
            _ => {}
        }
        self.progress.node_finished(&node.name, state);

        let pending = &mut self.pending;
        let ready = &mut self.ready;
        self.graph.call_for_all_waiting_parents(id, |waiting| {
            if let Some(count) = pending.get_mut(&waiting) {
                *count -= 1;
                if *count == 0 {
                    pending.remove(&waiting);
                    ready.push_back(waiting);
                }
            }
        });
        self.graph.node_mut(id).postprocess();
    }

    /// A node without a builder: fine if it exists, otherwise nothing knows
    /// how to make it.
    fn check_leaf(&mut self, id: NodeId) -> Result<(), Error> {
        let node = self.graph.node(id);
        if node.side_effect || node.kind == NodeKind::Alias {
            return Ok(());
        }
        if self.graph.exists(id, self.ctx.fs)? {
            return Ok(());
        }
        Err(match node.waiting_parents().first() {
            Some(&parent) => Error::stop(format!(
                "Source `{}' not found, needed by target `{}'.",
                node.name,
                self.graph.name(parent)
            )),
            None => Error::stop(format!("Do not know how to make target `{}'.", node.name)),
        })
    }

    /// Take a ready node: finish it right away if possible, otherwise start
    /// its action.
    fn start(&mut self, id: NodeId) -> Result<(), Error> {
        let ctx = self.ctx;
        let failed_child = self
            .graph
            .waits_on(id)
            .into_iter()
            .any(|kid| self.graph.node(kid).get_state() == NodeState::Failed);
        if failed_child {
            self.finish(id, NodeState::Failed);
            return Ok(());
        }

        if !self.graph.node(id).has_builder() {
            self.check_leaf(id)?;
            self.finish(id, NodeState::UpToDate);
            return Ok(());
        }

        if self.graph.node(id).rescan && self.rescan(id)? {
            return Ok(());
        }

        self.graph.prepare(id, ctx.fs)?;
        if decide::is_current(self.graph, id, ctx)? {
            tracing::debug!(node = self.graph.name(id), "up to date");
            self.finish(id, NodeState::UpToDate);
            return Ok(());
        }

        if ctx.options.explain {
            if let Some(msg) = decide::explain(self.graph, id, ctx)? {
                self.progress.log(msg.trim_end());
            }
        }

        let node = self.graph.node(id);
        if node.kind == NodeKind::File && !node.precious {
            ctx.fs.remove(&node.name).map_err(|source| Error::Io {
                path: node.name.clone(),
                source,
            })?;
        }

        let executor = match self.graph.get_executor(id) {
            Some(executor) => executor,
            None => {
                self.finish(id, NodeState::UpToDate);
                return Ok(());
            }
        };
        let message = executor.describe();
        self.graph.node_mut(id).set_state(NodeState::Executing);
        self.progress.task_started(self.graph.name(id), &message);
        self.running.insert(id, message);
        self.runner.start(id, executor.actions, executor.invocation);
        Ok(())
    }

    /// Scan a node again now that its generated sources exist.  Anything
    /// newly found is scheduled; returns true if the node has to wait for
    /// it, in which case it is started again once that is done.
    fn rescan(&mut self, id: NodeId) -> Result<bool, Error> {
        let node = self.graph.node_mut(id);
        node.implicit = None;
        node.del_binfo();
        scan::scan(self.graph, id, self.ctx)?;
        for kid in self.graph.waits_on(id) {
            if self.graph.node(kid).get_state() == NodeState::NoState {
                self.want(kid)?;
            }
        }
        let outstanding = self.wait_on_children(id);
        if outstanding == 0 {
            return Ok(false);
        }
        tracing::debug!(node = self.graph.name(id), outstanding, "waiting on new dependencies");
        self.pending.insert(id, outstanding);
        Ok(true)
    }

    /// Record the outcome of a finished action.
    fn finish_task(&mut self, task: FinishedTask) -> Result<(), Error> {
        let ctx = self.ctx;
        let id = task.id;
        let name = self.graph.name(id).to_owned();
        ctx.trace
            .write_complete(&name, task.tid, task.span.0, task.span.1);
        let message = self.running.remove(&id).unwrap_or_default();
        self.progress.task_finished(&name, &message, &task.result);

        if task.result.termination != Termination::Success {
            self.failures += 1;
            self.summary.failures.push(BuildError {
                node: name,
                termination: task.result.termination,
                output: task.result.output,
            });
            self.finish(id, NodeState::Failed);
            return Ok(());
        }

        // The action rewrote the target and its side effects.
        self.graph.node_mut(id).built();
        for side in self.graph.node(id).side_effects.clone() {
            self.graph.node_mut(side).built();
        }
        let mut binfo = decide::gen_binfo(self.graph, id, ctx);
        let own = decide::node_info(self.graph, id, ctx);
        binfo.ninfo.merge(&own);
        self.graph.node_mut(id).binfo = Some(binfo);
        let stored = decide::store_info(self.graph, id, ctx);
        self.finish(id, NodeState::Executed);
        stored
    }

    fn run_loop(&mut self) -> Result<(), Error> {
        let mut stop: Option<Error> = None;
        loop {
            while stop.is_none() && !self.cancelled() && self.runner.can_start_more() {
                let id = match self.ready.pop_front() {
                    Some(id) => id,
                    None => break,
                };
                if let Err(err) = self.start(id) {
                    stop = Some(err);
                }
            }
            // Drain in-flight actions even when stopping.
            match self.runner.wait() {
                Some(task) => {
                    if let Err(err) = self.finish_task(task) {
                        stop.get_or_insert(err);
                    }
                }
                None => break,
            }
        }
        match stop {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Build everything wanted.  Action failures are collected in the
    /// returned summary; structural problems are errors.
    pub fn run(&mut self) -> Result<Summary, Error> {
        let ctx = self.ctx;
        ctx.trace.scope("run", || self.run_loop())?;
        if self.cancelled() {
            tracing::debug!(failures = self.failures, "stopped after failures");
        }
        Ok(std::mem::take(&mut self.summary))
    }

    /// Whether everything below `targets` is current, without running any
    /// action.
    pub fn question(&mut self, targets: &[NodeId]) -> Result<bool, Error> {
        let ctx = self.ctx;
        for &target in targets {
            let mut walker = Walker::new(target);
            let mut scan_err: Option<Error> = None;
            loop {
                let graph = &mut *self.graph;
                let next = walker.next(
                    &mut |id: NodeId| enter(graph, id, ctx, &mut scan_err),
                    &mut |_: NodeId, _: &[NodeId]| {},
                );
                if let Some(err) = scan_err.take() {
                    return Err(err);
                }
                let id = match next {
                    Some(id) => id,
                    None => break,
                };
                let node = graph.node(id);
                let current = if node.has_builder() {
                    decide::is_current(graph, id, ctx)?
                } else {
                    node.side_effect || graph.exists(id, ctx.fs)?
                };
                if !current {
                    tracing::debug!(node = graph.name(id), "not current");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Remove the derived files below `targets`, except those marked
    /// noclean.  Returns the names removed.
    pub fn clean(&mut self, targets: &[NodeId]) -> Result<Vec<String>, Error> {
        let ctx = self.ctx;
        let mut removed = Vec::new();
        for &target in targets {
            let mut walker = Walker::new(target);
            loop {
                let graph = &mut *self.graph;
                let next = walker.next(
                    &mut |id: NodeId| graph.children(id),
                    &mut |_: NodeId, _: &[NodeId]| {},
                );
                let id = match next {
                    Some(id) => id,
                    None => break,
                };
                let node = graph.node(id);
                if node.kind != NodeKind::File || !node.is_derived() || node.noclean {
                    continue;
                }
                if removed.contains(&node.name) || !graph.exists(id, ctx.fs)? {
                    continue;
                }
                let name = node.name.clone();
                ctx.fs.remove(&name).map_err(|source| Error::Io {
                    path: name.clone(),
                    source,
                })?;
                tracing::debug!(node = %name, "removed");
                graph.node_mut(id).clear();
                removed.push(name);
            }
        }
        Ok(removed)
    }
}
