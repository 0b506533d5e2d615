//! An `Action` that runs a shell command.

use crate::builder::{Action, Invocation};
use crate::task::{TaskResult, Termination};

/// Runs `command` via `/bin/sh -c` after substituting `$TARGET`, `$TARGETS`,
/// `$SOURCE`, `$SOURCES` and environment variables (`$NAME` or `${NAME}`).
/// `$$` is a literal dollar sign.
pub struct CommandAction {
    pub command: String,
}

impl CommandAction {
    pub fn new(command: impl Into<String>) -> Self {
        CommandAction {
            command: command.into(),
        }
    }
}

fn lookup(name: &str, inv: &Invocation) -> String {
    match name {
        "TARGET" => inv.target().to_owned(),
        "TARGETS" => inv.targets.join(" "),
        "SOURCE" => inv.sources.first().cloned().unwrap_or_default(),
        "SOURCES" => inv.sources.join(" "),
        _ => inv.env.get(name).unwrap_or_default().to_owned(),
    }
}

/// Expand variable references in a command template.
pub fn subst(template: &str, inv: &Invocation) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];
        if let Some(after) = rest.strip_prefix('$') {
            out.push('$');
            rest = after;
            continue;
        }
        let (name, after) = match rest.strip_prefix('{') {
            Some(inner) => match inner.find('}') {
                Some(end) => (&inner[..end], &inner[end + 1..]),
                None => ("", rest),
            },
            None => {
                let end = rest
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(rest.len());
                (&rest[..end], &rest[end..])
            }
        };
        if name.is_empty() {
            out.push('$');
            continue;
        }
        out.push_str(&lookup(name, inv));
        rest = after;
    }
    out.push_str(rest);
    out
}

#[cfg(unix)]
fn termination(status: std::process::ExitStatus, output: &mut Vec<u8>) -> Termination {
    use std::os::unix::process::ExitStatusExt;
    if status.success() {
        return Termination::Success;
    }
    if let Some(sig) = status.signal() {
        return match sig {
            libc::SIGINT => {
                output.extend_from_slice(b"interrupted");
                Termination::Interrupted
            }
            _ => {
                output.extend_from_slice(format!("signal {}", sig).as_bytes());
                Termination::Failure(None)
            }
        };
    }
    Termination::Failure(status.code())
}

#[cfg(not(unix))]
fn termination(status: std::process::ExitStatus, _output: &mut Vec<u8>) -> Termination {
    if status.success() {
        Termination::Success
    } else {
        Termination::Failure(status.code())
    }
}

impl Action for CommandAction {
    fn execute(&self, inv: &Invocation) -> anyhow::Result<TaskResult> {
        let cmdline = subst(&self.command, inv);
        let mut cmd = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(&cmdline)
            .envs(inv.env.vars())
            .output()?;
        let mut output = Vec::new();
        output.append(&mut cmd.stdout);
        output.append(&mut cmd.stderr);
        let termination = termination(cmd.status, &mut output);
        Ok(TaskResult {
            termination,
            output,
        })
    }

    fn contents(&self, inv: &Invocation) -> String {
        subst(&self.command, inv)
    }
}
