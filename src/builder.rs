//! Builders: how a derived node is made.
//!
//! A `Builder` carries the actions to run plus the environment they run in.
//! The graph binds a builder to a concrete node as an `Executor`, which
//! resolves the environment (node env or builder env, builder overrides on
//! top) and names the target and sources.

use crate::scan::Scanner;
use crate::task::TaskResult;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Construction variables plus the scanners registered for source files,
/// keyed by scanner key (file extension).
#[derive(Clone, Default)]
pub struct Env {
    vars: BTreeMap<String, String>,
    scanners: Vec<(String, Arc<dyn Scanner>)>,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("vars", &self.vars)
            .field(
                "scanners",
                &self.scanners.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Env {
    pub fn new() -> Self {
        Env::default()
    }

    pub fn with(mut self, key: &str, val: &str) -> Self {
        self.set(key, val);
        self
    }

    pub fn set(&mut self, key: &str, val: &str) {
        self.vars.insert(key.to_owned(), val.to_owned());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|v| v.as_str())
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn add_scanner(&mut self, key: &str, scanner: Arc<dyn Scanner>) {
        match self.scanners.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = scanner,
            None => self.scanners.push((key.to_owned(), scanner)),
        }
    }

    pub fn scanner(&self, key: &str) -> Option<&Arc<dyn Scanner>> {
        self.scanners
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, s)| s)
    }

    /// A copy of self with every variable and scanner of `overrides` laid
    /// on top.
    pub fn override_with(&self, overrides: &Env) -> Env {
        let mut env = self.clone();
        for (k, v) in &overrides.vars {
            env.vars.insert(k.clone(), v.clone());
        }
        for (k, s) in &overrides.scanners {
            env.add_scanner(k, s.clone());
        }
        env
    }
}

/// Everything an action needs to run, owned so it can cross to a runner
/// thread.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub targets: Vec<String>,
    pub sources: Vec<String>,
    pub env: Env,
}

impl Invocation {
    /// The first target, which names the node being built.
    pub fn target(&self) -> &str {
        self.targets.first().map_or("", |t| t.as_str())
    }
}

/// One build step.
pub trait Action: Send + Sync {
    /// Run the step.  Returning Err() signals an internal error, distinct
    /// from the step running and failing.
    fn execute(&self, inv: &Invocation) -> anyhow::Result<TaskResult>;

    /// Text identifying what the step does; digested into the build
    /// signature, so any change here rebuilds the target.
    fn contents(&self, inv: &Invocation) -> String;

    /// Message shown when the step starts.
    fn describe(&self, inv: &Invocation) -> String {
        self.contents(inv)
    }
}

/// The actions of a builder, run in order.
#[derive(Clone, Default)]
pub enum Actions {
    #[default]
    None,
    Single(Arc<dyn Action>),
    List(Vec<Arc<dyn Action>>),
}

impl Actions {
    pub fn single(action: impl Action + 'static) -> Self {
        Actions::Single(Arc::new(action))
    }

    pub fn as_slice(&self) -> &[Arc<dyn Action>] {
        match self {
            Actions::None => &[],
            Actions::Single(a) => std::slice::from_ref(a),
            Actions::List(list) => list,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Concatenate two action lists.
    pub fn append(self, other: Actions) -> Actions {
        let mut all = match self {
            Actions::None => Vec::new(),
            Actions::Single(a) => vec![a],
            Actions::List(list) => list,
        };
        all.extend_from_slice(other.as_slice());
        Actions::List(all)
    }
}

#[derive(Clone, Default)]
pub struct Builder {
    pub actions: Actions,
    pub env: Env,
    /// Variables that take precedence over whatever environment the target
    /// would otherwise be built in.
    pub overrides: Env,
    pub target_scanner: Option<Arc<dyn Scanner>>,
    pub source_scanner: Option<Arc<dyn Scanner>>,
}

impl Builder {
    pub fn new(actions: Actions) -> Self {
        Builder {
            actions,
            ..Default::default()
        }
    }

    pub fn get_actions(&self) -> &Actions {
        &self.actions
    }

    /// The contents of all actions for a given invocation.
    pub fn get_contents(&self, inv: &Invocation) -> String {
        actions_contents(&self.actions, inv)
    }
}

fn actions_contents(actions: &Actions, inv: &Invocation) -> String {
    actions
        .as_slice()
        .iter()
        .map(|a| a.contents(inv))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A builder bound to one node.
#[derive(Clone)]
pub struct Executor {
    pub actions: Actions,
    pub invocation: Invocation,
}

impl Executor {
    pub fn contents(&self) -> String {
        actions_contents(&self.actions, &self.invocation)
    }

    pub fn describe(&self) -> String {
        self.actions
            .as_slice()
            .iter()
            .map(|a| a.describe(&self.invocation))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Termination;

    struct Echo(&'static str);
    impl Action for Echo {
        fn execute(&self, _inv: &Invocation) -> anyhow::Result<TaskResult> {
            Ok(TaskResult {
                termination: Termination::Success,
                output: self.0.as_bytes().to_vec(),
            })
        }
        fn contents(&self, inv: &Invocation) -> String {
            format!("echo {} > {}", self.0, inv.target())
        }
    }

    fn inv() -> Invocation {
        Invocation {
            targets: vec!["out".to_owned()],
            sources: vec![],
            env: Env::new(),
        }
    }

    #[test]
    fn env_override_wins() {
        let base = Env::new().with("CC", "cc").with("CFLAGS", "-O");
        let over = Env::new().with("CC", "clang");
        let env = base.override_with(&over);
        assert_eq!(env.get("CC"), Some("clang"));
        assert_eq!(env.get("CFLAGS"), Some("-O"));
        assert_eq!(base.get("CC"), Some("cc"));
    }

    #[test]
    fn actions_append() {
        let a = Actions::single(Echo("a"));
        let b = Actions::List(vec![Arc::new(Echo("b")), Arc::new(Echo("c"))]);
        let all = a.append(b).append(Actions::None);
        assert_eq!(all.len(), 3);
        let inv = inv();
        let contents: Vec<String> = all.as_slice().iter().map(|a| a.contents(&inv)).collect();
        assert_eq!(
            contents,
            vec!["echo a > out", "echo b > out", "echo c > out"]
        );
        assert!(Actions::None.is_empty());
    }

    #[test]
    fn builder_contents() {
        let builder = Builder::new(Actions::single(Echo("a")).append(Actions::single(Echo("b"))));
        assert_eq!(builder.get_contents(&inv()), "echo a > out\necho b > out");
        assert_eq!(builder.get_actions().len(), 2);
    }
}
