//! Pipeline-parallel checkpoint reshard planning.
//!
//! A checkpoint written under one `pp_degree x vpp_degree` layout names its
//! tensors positionally per stage. Moving to a new layout means re-segmenting
//! the structural layers across stages and re-deriving every stage's internal
//! tensor names. This module plans that move from the checkpoint metadata;
//! shard bytes are handled by the framework.

mod layout;
mod plan;
mod rename;

pub use layout::{assign_segments, segment_boundaries, ModelLayout, SegmentMethod};
pub use plan::{build_plan, CheckpointMeta, ParamMove, ReshardPlan, ReshardSpec};
pub use rename::LayerRenamer;

/// Errors from reshard planning.
#[derive(Debug, thiserror::Error)]
pub enum ReshardError {
    /// The metadata lacks an expected `tpXX_ppYY` shard entry.
    #[error("Checkpoint metadata is missing shard {0:?}")]
    MissingShard(String),

    /// A parameter name matches no structural layer.
    #[error("Parameter {0:?} does not belong to a known structural layer")]
    UnknownLayer(String),

    /// A tensor name starts with no known sublayer prefix.
    #[error("Tensor name {0:?} has no known sublayer prefix")]
    UnknownSublayer(String),

    /// The requested destination layout cannot hold the model.
    #[error("Invalid pipeline layout: {0}")]
    InvalidLayout(String),
}
