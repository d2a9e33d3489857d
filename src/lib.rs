#[cfg(feature = "pretrained")]
mod download;
#[cfg(feature = "pretrained")]
pub(crate) use download::download;

pub mod activation;
pub mod alignment;
pub mod features;
pub mod graph;
pub mod layers;
pub mod schedule;
pub mod tiler;
pub mod topology;
pub mod weights;

mod error;
pub use error::{DenoiseError, Result};

mod model;
pub use model::*;

pub use schedule::{ChannelSchedule, ModelKind, SizeVariant, Topology};
pub use topology::Network;
pub use weights::NetworkWeights;
