use thiserror::Error;

/// Errors raised by the fixed point engine when an analysis breaks its
/// contract.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AnalysisError {
    #[error("Transfer or merge is not monotonic at block 0x{block:X}")]
    NonMonotonic { block: usize },
    #[error("No fixed point at block 0x{block:X} after {iterations} iterations")]
    NonConvergence { block: usize, iterations: usize },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Malformed program at `{construct}`: {reason}")]
    MalformedProgram { construct: String, reason: String },
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("Invalid IR: {0}")]
    InvalidIr(String),
    #[error("The control flow graph has no entry")]
    ControlFlowGraphEntryNotFound,
    #[error("Unable to find successor for block 0x{0:X}")]
    ControlFlowGraphSuccessorNotFound(usize),
    #[error("Graph vertex 0x{0:X} not found")]
    GraphVertexNotFound(usize),
    #[error("Graph edge 0x{0:X} -> 0x{1:X} not found")]
    GraphEdgeNotFound(usize, usize),
    #[error("Instruction {1} not found in block 0x{0:X}")]
    InstructionNotFound(usize, usize),
    #[error("Solver unavailable: {0}")]
    SolverUnavailable(String),
    #[error("Solver protocol error: {0}")]
    SolverProtocol(String),
    #[error("Solver timed out: {0}")]
    SolverTimeout(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Build a `MalformedProgram` error for the given construct.
    pub fn malformed<C: Into<String>, R: Into<String>>(construct: C, reason: R) -> Error {
        Error::MalformedProgram {
            construct: construct.into(),
            reason: reason.into(),
        }
    }

    /// Structural errors abort analysis of the input they were raised for.
    pub fn is_structural(&self) -> bool {
        matches!(self, Error::Parse(_) | Error::MalformedProgram { .. })
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Error {
        Error::Custom(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Error {
        Error::Custom(s)
    }
}
