use thiserror::Error;

#[derive(Error, Debug)]
pub enum IrrepsError {
    #[error("cannot parse irrep `{0}`")]
    Parse(String),
    #[error("irreps {irreps} expect {expected} channels, got {actual}")]
    DimMismatch {
        irreps: String,
        expected: usize,
        actual: usize,
    },
    #[error("irreps {0} do not share a single multiplicity")]
    MixedMultiplicity(String),
    #[error("no coupling path produces any of {0}")]
    NoPaths(String),
}

#[derive(Error, Debug)]
pub enum MaceError {
    #[error(transparent)]
    Irreps(#[from] IrrepsError),
    #[error("invalid MACE configuration: {0}")]
    Config(String),
    #[error("edge {edge} has invalid length {length}")]
    InvalidEdgeLength { edge: usize, length: f32 },
    #[error("edge {0} has zero length; self loops are not allowed")]
    DegenerateEdge(usize),
    #[error("nodes {0:?} are isolated in the graph")]
    IsolatedNodes(Vec<u32>),
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, MaceError>;
