use thiserror::Error;

/// Errors surfaced by the client, tagged with the pipeline step that failed
/// so callers can tell a nonce fetch apart from a sponsorship or submission
/// failure without inspecting internals.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Missing or invalid construction parameters.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Transport or JSON-RPC failure against the chain node, paymaster or
    /// bundler.
    #[error("{step} failed: {source}")]
    Rpc {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// ABI or byte-level packing failure. Indicates a protocol/version
    /// mismatch rather than a transient condition.
    #[error("{step}: encoding failed: {message}")]
    Encoding {
        step: &'static str,
        message: String,
    },

    /// Malformed response from an upstream service.
    #[error("{step}: decoding failed: {message}")]
    Decoding {
        step: &'static str,
        message: String,
    },
}

impl ClientError {
    pub(crate) fn rpc(step: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Rpc {
            step,
            source: source.into(),
        }
    }

    pub(crate) fn encoding(step: &'static str, message: impl Into<String>) -> Self {
        Self::Encoding {
            step,
            message: message.into(),
        }
    }

    pub(crate) fn decoding(step: &'static str, message: impl Into<String>) -> Self {
        Self::Decoding {
            step,
            message: message.into(),
        }
    }
}
