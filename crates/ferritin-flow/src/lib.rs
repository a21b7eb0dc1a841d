//! ferritin-flow
//!
//! The multi-modal flow-matching step for protein backbone generation. Sequence
//! embeddings from a frozen language model, structure embeddings of the noisy frames
//! and a [MACE](ferritin_mace) embedding of the self-conditioning residue graph are
//! fused and decoded into rotation and translation vector fields.
//!
//! The structure network, language model, trunk, flow matcher and backbone builder are
//! supplied through the traits in [`contracts`].
pub use adapters::{
    MaceEncoderToTrunkNetwork, ProjectConcatRepresentation, RepresentationBundle,
    RepresentationSource, SequenceToTrunkNetwork, TrunkToDecoderNetwork,
};
pub use batch::FlowBatch;
pub use checkpoint::Checkpoint;
pub use config::{BlockDims, FlowModelConfig, GraphConfig};
pub use error::{FlowError, Result};
pub use masking::sequence_mask_pattern;
pub use mode::{GenerationMode, ModeState};
pub use model::{FF2Dependencies, FF2Model, FlowOutput};
pub use rigid::Rigid;

pub mod adapters;
pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod contracts;
pub mod error;
pub mod masking;
pub mod mode;
pub mod model;
pub mod rigid;
