//! Error kinds surfaced by the engine.
//!
//! Signature failures never appear here: an unreadable input is an unknown
//! signature, and unknown means "rebuild".

use crate::task::Termination;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structural problem that halts the whole run, e.g. a missing input
    /// that nothing knows how to build.
    #[error("{0}")]
    Stop(String),

    /// A node's action failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The persisted store could not be read or written.
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn stop(msg: impl Into<String>) -> Self {
        Error::Stop(msg.into())
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Error::Stop(_))
    }
}

/// The failure of a single node's action.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{node}] {termination}")]
pub struct BuildError {
    pub node: String,
    pub termination: Termination,
    /// Console output of the failing action.
    pub output: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        let err = Error::from(BuildError {
            node: "f1.out".to_owned(),
            termination: Termination::Failure(Some(1)),
            output: Vec::new(),
        });
        assert_eq!(err.to_string(), "[f1.out] Error 1");
        assert!(!err.is_stop());

        let err = Error::stop("Source `in' not found, needed by target `out'.");
        assert!(err.is_stop());
        assert_eq!(
            err.to_string(),
            "Source `in' not found, needed by target `out'."
        );
    }
}
