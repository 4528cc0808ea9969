use std::io;
use std::path::PathBuf;

/// Errors raised while building, persisting or searching an index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A query term is not part of the closed vocabulary.
    #[error("term not indexed: {0}")]
    UnknownTerm(String),

    /// A persisted index line could not be parsed.
    #[error("format error at line {line}: {message}")]
    Format { line: usize, message: String },

    /// The lattice is not consistent with the node ordering used to build a
    /// confusion network.
    #[error("graph invariant violated: {0}")]
    GraphInvariant(String),

    #[error("cannot open {}: {source}", path.display())]
    ResourceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid lattice: {0}")]
    InvalidLattice(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Errors reported by rustfst.
    #[error(transparent)]
    Fst(#[from] anyhow::Error),
}

impl IndexError {
    pub(crate) fn format(line: usize, message: impl Into<String>) -> Self {
        IndexError::Format {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        IndexError::ResourceOpen {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
