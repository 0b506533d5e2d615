//! The incremental-build decision: is a node current, and if not, why.
//!
//! A node is current when everything recorded in its stored Build-Info
//! (which inputs it had, what their signatures were, what the action was)
//! still matches what a fresh computation gives.

use crate::context::Context;
use crate::error::Error;
use crate::graph::{Graph, NodeId, NodeKind};
use crate::info::{BuildInfo, NodeInfo};
use crate::sig::Digest;

pub fn new_binfo() -> BuildInfo {
    BuildInfo::default()
}

/// The signature of a node's current content, memoized until the node is
/// built or cleared.
pub fn node_info(graph: &mut Graph, id: NodeId, ctx: &Context) -> NodeInfo {
    if let Some(info) = &graph.node(id).ninfo {
        return info.clone();
    }
    let info = match graph.node(id).kind {
        NodeKind::File => ctx.calc.file_info(graph.name(id), ctx.fs),
        NodeKind::Alias => {
            let contents = graph.alias_contents(id);
            ctx.calc.contents_info(graph.name(id), contents.as_bytes())
        }
    };
    graph.node_mut(id).ninfo = Some(info.clone());
    info
}

/// Compute the signatures of many plain source files in parallel, so the
/// scheduler finds them memoized.
pub fn prefetch(graph: &mut Graph, ids: &[NodeId], ctx: &Context) {
    let todo: Vec<NodeId> = ids
        .iter()
        .copied()
        .filter(|&id| {
            let node = graph.node(id);
            node.kind == NodeKind::File && !node.is_derived() && node.ninfo.is_none()
        })
        .collect();
    if todo.is_empty() {
        return;
    }
    let names: Vec<&str> = todo.iter().map(|&id| graph.name(id)).collect();
    let infos = ctx.calc.file_infos(&names, ctx.fs);
    for (id, info) in todo.into_iter().zip(infos) {
        graph.node_mut(id).ninfo = Some(info);
    }
}

/// The children that count toward Build-Info, per kind: sources, depends,
/// implicit.  Ignored children are left out.
fn dep_lists(graph: &Graph, id: NodeId) -> [Vec<NodeId>; 3] {
    let node = graph.node(id);
    let keep = |list: &[NodeId]| -> Vec<NodeId> {
        list.iter()
            .copied()
            .filter(|kid| *kid != id && !node.ignore.contains(kid))
            .collect()
    };
    let implicit = match &node.implicit {
        Some(implicit) => keep(implicit),
        None => panic!("{}: build info generated before scanning", node.name),
    };
    [keep(&node.sources), keep(&node.depends), implicit]
}

fn names(graph: &Graph, ids: &[NodeId]) -> Vec<String> {
    ids.iter().map(|&id| graph.name(id).to_owned()).collect()
}

/// The action's text for this node, if it has a builder.
fn action_contents(graph: &mut Graph, id: NodeId) -> Option<String> {
    graph.get_executor(id).map(|x| x.contents())
}

/// Fill in and cache the Build-Info for a node from its current inputs.
///
/// Panics if the node hasn't been scanned: before that the implicit list
/// isn't final, and recording a partial list would make the node look
/// current when it isn't.
pub fn gen_binfo(graph: &mut Graph, id: NodeId, ctx: &Context) -> BuildInfo {
    let [sources, depends, implicit] = dep_lists(graph, id);
    let mut sig_of = |ids: &[NodeId]| -> Vec<NodeInfo> {
        ids.iter().map(|&kid| node_info(graph, kid, ctx)).collect()
    };
    let sourcesigs = sig_of(&sources);
    let dependsigs = sig_of(&depends);
    let implicitsigs = sig_of(&implicit);

    let bact = action_contents(graph, id);
    let bactsig = bact.as_ref().map(|act| Digest::of(act.as_bytes()));

    let mut binfo = new_binfo();
    binfo.bsources = Some(names(graph, &sources));
    binfo.bsourcesigs = Some(sourcesigs);
    binfo.bdepends = Some(names(graph, &depends));
    binfo.bdependsigs = Some(dependsigs);
    binfo.bimplicit = Some(names(graph, &implicit));
    binfo.bimplicitsigs = Some(implicitsigs);
    binfo.bact = bact;
    binfo.bactsig = bactsig;

    let inputs = binfo
        .dep_lists()
        .into_iter()
        .flat_map(|(names, sigs)| names.iter().map(|n| n.as_str()).zip(sigs.iter()));
    let action = bactsig.unwrap_or_else(|| Digest::of(b""));
    binfo.ninfo.bsig = Some(ctx.calc.bsig(inputs, &action));

    graph.node_mut(id).binfo = Some(binfo.clone());
    binfo
}

pub fn get_stored_info(graph: &Graph, id: NodeId, ctx: &Context) -> Option<BuildInfo> {
    ctx.store.get(graph.name(id))
}

/// Persist the node's Build-Info for this run, if it has any.
pub fn store_info(graph: &Graph, id: NodeId, ctx: &Context) -> Result<(), Error> {
    match graph.node(id).binfo() {
        Some(binfo) => ctx.store.put(graph.name(id), binfo.clone()),
        None => Ok(()),
    }
}

/// Whether the recorded inputs of one kind match the current ones: same
/// names in the same order, and no signature changed.
fn list_unchanged(
    graph: &mut Graph,
    ctx: &Context,
    cur: &[NodeId],
    (old_names, old_sigs): (&[String], &[NodeInfo]),
) -> bool {
    if cur.len() != old_names.len() || old_sigs.len() != old_names.len() {
        return false;
    }
    for ((&kid, old_name), old_sig) in cur.iter().zip(old_names).zip(old_sigs) {
        if graph.name(kid) != old_name.as_str() {
            return false;
        }
        let sig = node_info(graph, kid, ctx);
        if ctx.calc.changed(old_sig, &sig) {
            return false;
        }
    }
    true
}

/// True if the explicit inputs (sources and depends) recorded in `stored`
/// are unchanged; decides whether cached implicit dependencies are reused.
pub fn explicit_inputs_unchanged(
    graph: &mut Graph,
    id: NodeId,
    ctx: &Context,
    stored: &BuildInfo,
) -> bool {
    let node = graph.node(id);
    let keep = |list: &[NodeId]| -> Vec<NodeId> {
        list.iter()
            .copied()
            .filter(|kid| *kid != id && !node.ignore.contains(kid))
            .collect()
    };
    let sources = keep(&node.sources);
    let depends = keep(&node.depends);
    let [old_sources, old_depends, _] = stored.dep_lists();
    list_unchanged(graph, ctx, &sources, old_sources)
        && list_unchanged(graph, ctx, &depends, old_depends)
}

/// Whether the node can be left as is.  Nodes that aren't derived are
/// current when they exist.
pub fn is_current(graph: &mut Graph, id: NodeId, ctx: &Context) -> Result<bool, Error> {
    let node = graph.node(id);
    if node.always_build {
        return Ok(false);
    }
    if !node.is_derived() {
        return graph.exists(id, ctx.fs);
    }
    if !graph.exists(id, ctx.fs)? {
        return Ok(false);
    }
    let stored = match get_stored_info(graph, id, ctx) {
        Some(stored) => stored,
        None => return Ok(false),
    };
    let cur = dep_lists(graph, id);
    for (cur, old) in cur.iter().zip(stored.dep_lists()) {
        if !list_unchanged(graph, ctx, cur, old) {
            return Ok(false);
        }
    }
    let action = action_contents(graph, id).map(|act| Digest::of(act.as_bytes()));
    Ok(action == stored.bactsig)
}

fn indent(title: &str, text: &str) -> String {
    let mut out = String::new();
    for (i, line) in text.lines().enumerate() {
        let prefix = if i == 0 { title } else { "" };
        out.push_str(&format!("  {:>5}{}\n", prefix, line));
    }
    if out.is_empty() {
        out.push_str(&format!("  {:>5}\n", title));
    }
    out
}

/// A human-readable reason why the node is (about to be) rebuilt.  None for
/// plain sources that exist.  Fails only if the node can't be stat()ed.
pub fn explain(graph: &mut Graph, id: NodeId, ctx: &Context) -> Result<Option<String>, Error> {
    let name = graph.name(id).to_owned();
    if !graph.exists(id, ctx.fs)? {
        return Ok(Some(format!("building `{}' because it doesn't exist\n", name)));
    }
    let node = graph.node(id);
    if !node.is_derived() {
        return Ok(None);
    }
    if node.always_build {
        return Ok(Some(format!(
            "building `{}' because AlwaysBuild() is specified\n",
            name
        )));
    }
    let old = match get_stored_info(graph, id, ctx) {
        Some(old) => old,
        None => {
            return Ok(Some(format!(
                "Cannot explain why `{}' is being rebuilt: No previous build information found\n",
                name
            )))
        }
    };

    let mut old_kids: Vec<(&str, &NodeInfo)> = Vec::new();
    for (names, sigs) in old.dep_lists() {
        old_kids.extend(names.iter().map(|n| n.as_str()).zip(sigs.iter()));
    }
    let new_kids: Vec<NodeId> = dep_lists(graph, id).into_iter().flatten().collect();
    let new_names = names(graph, &new_kids);

    let mut lines = Vec::new();
    for (old_name, _) in &old_kids {
        if !new_names.iter().any(|n| n.as_str() == *old_name) {
            lines.push(format!("`{}' is no longer a dependency\n", old_name));
        }
    }
    for (&kid, kid_name) in new_kids.iter().zip(&new_names) {
        match old_kids.iter().find(|(n, _)| *n == kid_name.as_str()) {
            None => lines.push(format!("`{}' is a new dependency\n", kid_name)),
            Some((_, old_sig)) => {
                let sig = node_info(graph, kid, ctx);
                if ctx.calc.changed(old_sig, &sig) {
                    lines.push(format!("`{}' changed\n", kid_name));
                }
            }
        }
    }
    let old_names: Vec<&str> = old_kids.iter().map(|(n, _)| *n).collect();
    if lines.is_empty() && old_names != new_names {
        lines.push(format!(
            "the dependency order changed:\n  old: {:?}\n  new: {:?}\n",
            old_names, new_names
        ));
    }
    if lines.is_empty() {
        let new_act = action_contents(graph, id);
        if new_act != old.bact {
            let mut msg = String::from("the build action changed:\n");
            msg.push_str(&indent("old: ", old.bact.as_deref().unwrap_or("")));
            msg.push_str(&indent("new: ", new_act.as_deref().unwrap_or("")));
            lines.push(msg);
        }
    }

    let preamble = format!("rebuilding `{}' because", name);
    Ok(Some(match lines.len() {
        0 => format!("rebuilding `{}' for unknown reasons\n", name),
        1 => format!("{} {}", preamble, lines[0]),
        _ => {
            let mut msg = format!("{}:\n", preamble);
            for line in lines {
                msg.push_str("           ");
                msg.push_str(&line);
            }
            msg
        }
    }))
}
