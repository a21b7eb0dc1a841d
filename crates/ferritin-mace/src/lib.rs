//! ferritin-mace
//!
//! E(3)-equivariant message passing on atomic graphs, after
//! [MACE](https://arxiv.org/abs/2206.07697), written against candle.
//!
//! - [`Irreps`]: irreducible representation signatures and their algebra
//! - [`coupling`]: Clebsch-Gordan tables in the real harmonic basis
//! - [`layers`]: tensor product convolution, many-body product block, equivariant linear and batch norm
//! - [`MaceModel`]: the full encoder stack
//!
pub use config::{Aggregation, MaceConfig, Pooling};
pub use error::{IrrepsError, MaceError, Result};
pub use graph::{build_graph, build_graphs, find_isolated_nodes, AtomicGraph, Edge, GraphBatch, GraphParams};
pub use harmonics::SphericalHarmonics;
pub use irreps::{Irrep, Irreps, MulIrrep, Parity};
pub use model::MaceModel;
pub use radial::RadialEmbeddingBlock;

pub mod config;
pub mod coupling;
pub mod error;
pub mod graph;
pub mod harmonics;
pub mod irreps;
pub mod layers;
pub mod model;
pub mod radial;
