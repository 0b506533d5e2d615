//! Implicit dependency discovery.
//!
//! A `Scanner` looks at one artifact and names the artifacts it depends on
//! (e.g. the headers a C file includes).  Discovered names are expanded
//! breadth-first: each newly found dependency is scanned in turn unless the
//! scanner's `recurse` filter declines it.

use crate::builder::Env;
use crate::context::Context;
use crate::decide;
use crate::error::Error;
use crate::fs::FileSystem;
use crate::graph::{Graph, NodeId, NodeKind};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::sync::Arc;

pub trait Scanner: Send + Sync {
    /// The names `name` depends on.  `env` is the environment the dependent
    /// target is built in.
    fn scan(&self, name: &str, env: &Env, fs: &dyn FileSystem) -> anyhow::Result<Vec<String>>;

    /// Whether the dependencies of a discovered `name` should be scanned too.
    fn recurse(&self, _name: &str) -> bool {
        true
    }
}

fn scan_one(
    graph: &mut Graph,
    id: NodeId,
    scanner: &dyn Scanner,
    env: &Env,
    fs: &dyn FileSystem,
) -> Result<Vec<NodeId>, Error> {
    let name = graph.name(id);
    let found = scanner
        .scan(name, env, fs)
        .map_err(|err| Error::stop(format!("{}: {}", name, err)))?;
    Ok(found.iter().map(|dep| graph.file(dep)).collect())
}

/// Scan `root` and, recursively, what it depends on.  Returns the
/// dependencies in discovery order, without repeats.  Dependencies that
/// don't exist (yet) are included but not scanned themselves.
pub fn get_implicit_deps(
    graph: &mut Graph,
    root: NodeId,
    scanner: &dyn Scanner,
    env: &Env,
    fs: &dyn FileSystem,
) -> Result<Vec<NodeId>, Error> {
    let mut deps = Vec::new();
    let mut seen = FxHashSet::default();
    seen.insert(root);
    let mut queue = VecDeque::from([root]);
    while let Some(id) = queue.pop_front() {
        if id != root && !graph.exists(id, fs)? {
            continue;
        }
        for dep in scan_one(graph, id, scanner, env, fs)? {
            if !seen.insert(dep) {
                continue;
            }
            deps.push(dep);
            if scanner.recurse(graph.name(dep)) {
                queue.push_back(dep);
            }
        }
    }
    Ok(deps)
}

/// Try to reuse the implicit dependencies recorded by the previous run.
/// Returns true if they were reused.
fn reuse_cached(graph: &mut Graph, id: NodeId, ctx: &Context) -> bool {
    let opts = &ctx.options;
    if !opts.implicit_cache || opts.implicit_deps_changed {
        return false;
    }
    let stored = match decide::get_stored_info(graph, id, ctx) {
        Some(stored) => stored,
        None => return false,
    };
    let names = match &stored.bimplicit {
        Some(names) => names,
        None => return false,
    };
    let ids: Vec<NodeId> = names.iter().map(|n| graph.file(n)).collect();
    graph.add_implicit(id, &ids);
    if opts.implicit_deps_unchanged || decide::explicit_inputs_unchanged(graph, id, ctx, &stored)
    {
        tracing::debug!(node = graph.name(id), count = ids.len(), "reusing cached implicit deps");
        return true;
    }
    // An input changed, so what it includes may have too.
    let node = graph.node_mut(id);
    node.implicit = Some(Vec::new());
    node.del_binfo();
    false
}

/// Discover the node's implicit dependencies.  Idempotent: a node that has
/// an implicit list already isn't scanned again.
///
/// Each source is scanned with the builder's source scanner, or else the
/// scanner its environment registers for the source's scanner key; then
/// the target itself with the builder's target scanner.
pub fn scan(graph: &mut Graph, id: NodeId, ctx: &Context) -> Result<(), Error> {
    if graph.node(id).implicit.is_some() {
        return Ok(());
    }
    let node = graph.node_mut(id);
    node.implicit = Some(Vec::new());
    node.rescan = false;
    let builder = match graph.node(id).builder() {
        Some(builder) => builder.clone(),
        None => return Ok(()),
    };
    if reuse_cached(graph, id, ctx) {
        return Ok(());
    }

    let env = match graph.get_executor(id) {
        Some(executor) => executor.invocation.env,
        None => Env::default(),
    };
    for src in graph.node(id).sources.clone() {
        let node = graph.node(src);
        if node.kind == NodeKind::Alias {
            continue;
        }
        let scanner: Option<Arc<dyn Scanner>> = builder
            .source_scanner
            .clone()
            .or_else(|| env.scanner(node.scanner_key()).cloned());
        let scanner = match scanner {
            Some(scanner) => scanner,
            None => continue,
        };
        if !graph.exists(src, ctx.fs)? {
            // A generated source is scanned once it has been built.
            if graph.node(src).is_derived() {
                graph.node_mut(id).rescan = true;
            }
            continue;
        }
        let deps = get_implicit_deps(graph, src, scanner.as_ref(), &env, ctx.fs)?;
        graph.add_implicit(id, &deps);
    }
    if let Some(scanner) = &builder.target_scanner {
        let deps = get_implicit_deps(graph, id, scanner.as_ref(), &env, ctx.fs)?;
        graph.add_implicit(id, &deps);
    }
    tracing::debug!(
        node = graph.name(id),
        implicit = graph.node(id).implicit.as_ref().map_or(0, |i| i.len()),
        "scanned"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::context::Options;
    use crate::db::{MemoryStore, Store};
    use crate::info::BuildInfo;
    use crate::testutil::{Includes, MemFs};

    fn names(g: &Graph, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|&id| g.name(id).to_owned()).collect()
    }

    #[test]
    fn implicit_deps_breadth_first() {
        let fs = MemFs::default();
        fs.write("nnn", "d1 d2");
        fs.write("d1", "eee fff");
        fs.write("d2", "eee fff");
        fs.write("eee", "");
        fs.write("fff", "ggg");
        fs.write("ggg", "");
        let env = Env::new();
        let mut g = Graph::new();
        let nnn = g.file("nnn");

        let deps = get_implicit_deps(&mut g, nnn, &Includes::default(), &env, &fs).unwrap();
        assert_eq!(names(&g, &deps), vec!["d1", "d2", "eee", "fff", "ggg"]);

        // Cycles among includes don't repeat anything.
        fs.write("eee", "fff nnn");
        let deps = get_implicit_deps(&mut g, nnn, &Includes::default(), &env, &fs).unwrap();
        assert_eq!(names(&g, &deps), vec!["d1", "d2", "eee", "fff", "ggg"]);

        // The filter can keep a dependency from being scanned.
        let no_f = Includes::skipping(|name| name.starts_with('f'));
        let deps = get_implicit_deps(&mut g, nnn, &no_f, &env, &fs).unwrap();
        assert_eq!(names(&g, &deps), vec!["d1", "d2", "eee", "fff"]);

        // Or short-circuit recursion entirely.
        let none = Includes::skipping(|_| true);
        let deps = get_implicit_deps(&mut g, nnn, &none, &env, &fs).unwrap();
        assert_eq!(names(&g, &deps), vec!["d1", "d2"]);
    }

    #[test]
    fn missing_deps_kept_but_not_scanned() {
        let fs = MemFs::default();
        fs.write("a.c", "gen.h");
        let mut g = Graph::new();
        let a = g.file("a.c");
        let deps = get_implicit_deps(&mut g, a, &Includes::default(), &Env::new(), &fs).unwrap();
        assert_eq!(names(&g, &deps), vec!["gen.h"]);
    }

    #[test]
    fn scanner_error_stops() {
        let fs = MemFs::default();
        fs.write("a.c", "");
        fs.set_unreadable("a.c");
        let mut g = Graph::new();
        let a = g.file("a.c");
        let err = get_implicit_deps(&mut g, a, &Includes::default(), &Env::new(), &fs)
            .unwrap_err();
        assert!(err.is_stop());
        assert!(err.to_string().starts_with("a.c: "));
    }

    fn ctx_with<'a>(fs: &'a MemFs, store: &'a MemoryStore, options: Options) -> Context<'a> {
        Context::new(fs, store, options)
    }

    #[test]
    fn scan_sources_and_target() {
        let fs = MemFs::default();
        fs.write("a.c", "a.h");
        fs.write("a.h", "");
        fs.write("b.x", "b.h");
        fs.write("b.h", "");
        let store = MemoryStore::new();
        let ctx = ctx_with(&fs, &store, Options::default());

        let mut g = Graph::new();
        let out = g.file("out");
        let a = g.file("a.c");
        let b = g.file("b.x");
        g.add_source(out, &[a, b]);
        let mut builder = Builder::default();
        builder.env.add_scanner("c", Arc::new(Includes::default()));
        builder.target_scanner = Some(Arc::new(Includes::fixed(&["libm"])));
        g.builder_set(out, Arc::new(builder));

        assert_eq!(g.node(out).implicit, None);
        scan(&mut g, out, &ctx).unwrap();
        // b.x has no scanner registered for its key.
        let implicit = g.node(out).implicit.clone().unwrap();
        assert_eq!(names(&g, &implicit), vec!["a.h", "libm"]);

        // Scanning again changes nothing.
        fs.write("a.c", "a.h other.h");
        scan(&mut g, out, &ctx).unwrap();
        assert_eq!(g.node(out).implicit.as_ref().unwrap().len(), 2);

        // Non-derived nodes get an empty list.
        scan(&mut g, a, &ctx).unwrap();
        assert_eq!(g.node(a).implicit, Some(vec![]));
    }

    #[test]
    fn generated_source_marks_rescan() {
        let fs = MemFs::default();
        let store = MemoryStore::new();
        let ctx = ctx_with(&fs, &store, Options::default());
        let mut g = Graph::new();
        let out = g.file("out");
        let gen = g.file("gen.c");
        g.add_source(out, &[gen]);
        g.builder_set(gen, Arc::new(Builder::default()));
        let mut builder = Builder::default();
        builder.env.add_scanner("c", Arc::new(Includes::default()));
        g.builder_set(out, Arc::new(builder));

        scan(&mut g, out, &ctx).unwrap();
        assert!(g.node(out).rescan);
        assert_eq!(g.node(out).implicit, Some(vec![]));

        // Once it exists, scanning again finds its includes.
        fs.write("gen.c", "a.h");
        g.node_mut(out).implicit = None;
        scan(&mut g, out, &ctx).unwrap();
        assert!(!g.node(out).rescan);
        let implicit = g.node(out).implicit.clone().unwrap();
        assert_eq!(names(&g, &implicit), vec!["a.h"]);
    }

    #[test]
    fn source_scanner_wins_over_env() {
        let fs = MemFs::default();
        fs.write("a.c", "a.h");
        let store = MemoryStore::new();
        let ctx = ctx_with(&fs, &store, Options::default());
        let mut g = Graph::new();
        let out = g.file("out");
        let a = g.file("a.c");
        g.add_source(out, &[a]);
        let mut builder = Builder::default();
        builder.env.add_scanner("c", Arc::new(Includes::default()));
        builder.source_scanner = Some(Arc::new(Includes::fixed(&["from_builder"])));
        g.builder_set(out, Arc::new(builder));
        scan(&mut g, out, &ctx).unwrap();
        let implicit = g.node(out).implicit.clone().unwrap();
        assert_eq!(names(&g, &implicit), vec!["from_builder"]);
    }

    fn cached_graph() -> (Graph, NodeId) {
        let mut g = Graph::new();
        let out = g.file("out");
        let a = g.file("a.c");
        g.add_source(out, &[a]);
        let mut builder = Builder::default();
        builder.env.add_scanner("c", Arc::new(Includes::default()));
        g.builder_set(out, Arc::new(builder));
        (g, out)
    }

    #[test]
    fn implicit_cache() {
        let fs = MemFs::default();
        fs.write("a.c", "a.h");
        let store = MemoryStore::new();
        let options = Options {
            implicit_cache: true,
            ..Default::default()
        };
        let ctx = ctx_with(&fs, &store, options.clone());

        // First run: nothing cached, so scan and record.
        let (mut g, out) = cached_graph();
        scan(&mut g, out, &ctx).unwrap();
        decide::gen_binfo(&mut g, out, &ctx);
        decide::store_info(&g, out, &ctx).unwrap();

        // Unchanged source: the stored list is reused even though scanning
        // would now find something else.
        store
            .put(
                "out",
                BuildInfo {
                    bimplicit: Some(vec!["cached.h".to_owned()]),
                    ..store.get("out").unwrap()
                },
            )
            .unwrap();
        let (mut g, out) = cached_graph();
        scan(&mut g, out, &ctx).unwrap();
        let implicit = g.node(out).implicit.clone().unwrap();
        assert_eq!(names(&g, &implicit), vec!["cached.h"]);

        // Changed source: rescanned.
        fs.write("a.c", "b.h");
        let (mut g, out) = cached_graph();
        scan(&mut g, out, &ctx).unwrap();
        let implicit = g.node(out).implicit.clone().unwrap();
        assert_eq!(names(&g, &implicit), vec!["b.h"]);

        // Changed source, but told to trust the cache.
        let ctx = ctx_with(
            &fs,
            &store,
            Options {
                implicit_deps_unchanged: true,
                ..options.clone()
            },
        );
        let (mut g, out) = cached_graph();
        scan(&mut g, out, &ctx).unwrap();
        let implicit = g.node(out).implicit.clone().unwrap();
        assert_eq!(names(&g, &implicit), vec!["cached.h"]);

        // Told to ignore the cache.
        fs.write("a.c", "a.h");
        let ctx = ctx_with(
            &fs,
            &store,
            Options {
                implicit_deps_changed: true,
                ..options
            },
        );
        let (mut g, out) = cached_graph();
        scan(&mut g, out, &ctx).unwrap();
        let implicit = g.node(out).implicit.clone().unwrap();
        assert_eq!(names(&g, &implicit), vec!["a.h"]);
    }

    #[test]
    fn stale_cache_rescans_to_empty() {
        let fs = MemFs::default();
        fs.write("a.c", "");
        let store = MemoryStore::new();
        store
            .put(
                "out",
                BuildInfo {
                    bimplicit: Some(vec!["implicit1".to_owned(), "implicit2".to_owned()]),
                    ..Default::default()
                },
            )
            .unwrap();
        let options = Options {
            implicit_cache: true,
            ..Default::default()
        };
        let ctx = ctx_with(&fs, &store, options);
        let (mut g, out) = cached_graph();
        scan(&mut g, out, &ctx).unwrap();
        assert_eq!(g.node(out).implicit, Some(vec![]));
        assert_eq!(g.children(out), vec![g.lookup("a.c").unwrap()]);
    }
}
