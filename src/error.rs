//! crate wide error kinds. All workers propagate to the orchestrator,
//! nothing is swallowed or silently downgraded.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SketchError {
    /// unsupported parameter combination, detected before any work starts
    #[error("configuration error : {0}")]
    Config(String),

    /// an input file is missing or unparseable
    #[error("input error on {path} : {msg}")]
    Input { path: String, msg: String },

    /// a cached sketch file does not match what we expect
    #[error("corrupted sketch cache at {path} : {msg}")]
    CacheCorruption { path: String, msg: String },

    /// the operation is not defined for the sketch family
    #[error("unsupported operation for this sketch family : {0}")]
    Unsupported(String),

    /// short write or stream error
    #[error("io failure : {0}")]
    Io(#[from] std::io::Error),
}

impl SketchError {
    pub fn input<P: AsRef<str>, M: Into<String>>(path: P, msg: M) -> Self {
        SketchError::Input {
            path: path.as_ref().to_string(),
            msg: msg.into(),
        }
    }

    pub fn cache<P: AsRef<str>, M: Into<String>>(path: P, msg: M) -> Self {
        SketchError::CacheCorruption {
            path: path.as_ref().to_string(),
            msg: msg.into(),
        }
    }
}
