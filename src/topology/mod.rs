pub mod unet;
pub mod unet_large;

pub use unet::UNet;
pub use unet_large::UNetLarge;

use burn::{
    module::Module,
    nn::Initializer,
    tensor::{backend::Backend, Tensor},
};

use crate::{
    error::{DenoiseError, Result},
    graph::NetworkGraph,
    layers::{Conv3x3, Conv3x3Config},
};

/// A denoising network whose convolutions are addressable by their layer name.
pub trait Network<B: Backend>: Module<B> {
    /// Maps `[N, in, H, W]` to `[N, out, H, W]`; H and W must be multiples of 16.
    fn forward(&self, x: Tensor<B, 4>) -> Result<Tensor<B, 4>>;

    /// Convolutions in evaluation order.
    fn layers(&self) -> Vec<(&'static str, &Conv3x3<B>)>;

    fn layers_mut(&mut self) -> Vec<(&'static str, &mut Conv3x3<B>)>;

    fn in_channels(&self) -> usize {
        self.layers()
            .first()
            .map_or(0, |(_, layer)| layer.channels()[0])
    }

    fn out_channels(&self) -> usize {
        self.layers()
            .last()
            .map_or(0, |(_, layer)| layer.channels()[1])
    }
}

pub(crate) fn init_layer<B: Backend>(
    graph: &NetworkGraph,
    name: &str,
    initializer: Option<&Initializer>,
    device: &B::Device,
) -> Result<Conv3x3<B>> {
    let spec = graph.layer(name).ok_or_else(|| {
        DenoiseError::InvalidGraph(format!("{} has no layer `{name}`", graph.kind()))
    })?;

    Ok(Conv3x3Config::from_spec(spec)
        .with_initializer(initializer.cloned())
        .init(device))
}
