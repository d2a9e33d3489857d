mod label;
mod tza;

pub use label::*;
pub use tza::*;

use std::path::Path;

use burn::{
    module::Module,
    record::{FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor, TensorData},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

use crate::{
    error::{DenoiseError, Result},
    model::DenoiseModel,
    topology::{Network, UNet, UNetLarge},
};

/// Convolution weights are stored output-channel major, as burn expects.
const WEIGHT_LAYOUT: &str = "oihw";

/// Moves parameters between a network and a [`TensorArchive`], keyed as
/// `<layer>.weight` (OIHW) and `<layer>.bias`.
pub trait NetworkWeights<B: Backend>: Network<B> + Sized {
    fn load_archive(self, archive: &TensorArchive) -> Result<Self>;

    fn to_archive(&self) -> Result<TensorArchive>;
}

impl<B: Backend, N: Network<B>> NetworkWeights<B> for N {
    fn load_archive(mut self, archive: &TensorArchive) -> Result<Self> {
        let mut used = 0;
        for (name, layer) in self.layers_mut() {
            let weight = archive_tensor(archive, &format!("{name}.weight"), 4)?;
            if weight.layout != WEIGHT_LAYOUT {
                return Err(DenoiseError::Weights(format!(
                    "`{name}.weight` is stored as `{}`, expected `{WEIGHT_LAYOUT}`",
                    weight.layout
                )));
            }
            let bias = archive_tensor(archive, &format!("{name}.bias"), 1)?;
            let device = layer.weight().device();

            layer
                .set_params(
                    Tensor::from_data(
                        TensorData::new(weight.data.clone(), weight.shape.clone()),
                        &device,
                    ),
                    Tensor::from_data(
                        TensorData::new(bias.data.clone(), bias.shape.clone()),
                        &device,
                    ),
                )
                .map_err(|err| match err {
                    DenoiseError::ShapeMismatch(detail) => {
                        DenoiseError::ShapeMismatch(format!("layer `{name}`: {detail}"))
                    }
                    other => other,
                })?;
            used += 2;
        }

        if used < archive.len() {
            tracing::warn!(
                "{} tensors in the weights blob have no matching layer",
                archive.len() - used
            );
        }
        tracing::info!("loaded {used} tensors into {} layers", used / 2);

        Ok(self)
    }

    fn to_archive(&self) -> Result<TensorArchive> {
        let mut archive = TensorArchive::new();
        for (name, layer) in self.layers() {
            let weight = layer.weight();
            let [out_channels, ..] = weight.dims();
            let shape = weight.dims().to_vec();
            archive.insert(
                format!("{name}.weight"),
                TzaTensor::new(shape, WEIGHT_LAYOUT, tensor_values(weight)?)?,
            );

            let bias = match layer.bias() {
                Some(bias) => tensor_values(bias)?,
                None => vec![0.0; out_channels],
            };
            archive.insert(
                format!("{name}.bias"),
                TzaTensor::new(vec![out_channels], "x", bias)?,
            );
        }
        Ok(archive)
    }
}

fn archive_tensor<'a>(archive: &'a TensorArchive, key: &str, ndims: usize) -> Result<&'a TzaTensor> {
    let tensor = archive
        .get(key)
        .ok_or_else(|| DenoiseError::MissingWeight(key.to_string()))?;
    if tensor.shape.len() != ndims {
        return Err(DenoiseError::ShapeMismatch(format!(
            "`{key}` has shape {:?}, expected {ndims} dimensions",
            tensor.shape
        )));
    }
    Ok(tensor)
}

fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| DenoiseError::Weights(format!("could not read tensor data: {err:?}")))
}

/// Loads a PyTorch training checkpoint into a module record.
///
/// Checkpoint keys are `<layer>.weight` / `<layer>.bias`; `top_level_key`
/// selects the state dict inside a checkpoint dictionary (e.g. `model_state`).
pub fn load_pytorch_record<B: Backend, M: Module<B>>(
    path: impl AsRef<Path>,
    top_level_key: Option<&str>,
    device: &B::Device,
) -> Result<M::Record> {
    let mut args = LoadArgs::new(path.as_ref().into())
        // Map <layer>.weight -> <layer>.conv.weight
        .with_key_remap("^([a-z0-9_]+)\\.(weight|bias)$", "$1.conv.$2");
    if let Some(key) = top_level_key {
        args = args.with_top_level_key(key);
    }

    let record = PyTorchFileRecorder::<FullPrecisionSettings>::new()
        .load(args, device)
        .map_err(|err| DenoiseError::Recorder(format!("{err:?}")))?;
    tracing::info!("loaded PyTorch checkpoint {}", path.as_ref().display());

    Ok(record)
}

impl<B: Backend> DenoiseModel<B> {
    /// Replaces all parameters with those of a PyTorch training checkpoint.
    pub fn load_pytorch_checkpoint(
        self,
        path: impl AsRef<Path>,
        top_level_key: Option<&str>,
        device: &B::Device,
    ) -> Result<Self> {
        Ok(match self {
            Self::UNet(m) => {
                let record = load_pytorch_record::<B, UNet<B>>(path, top_level_key, device)?;
                Self::UNet(m.load_record(record))
            }
            Self::UNetLarge(m) => {
                let record = load_pytorch_record::<B, UNetLarge<B>>(path, top_level_key, device)?;
                Self::UNetLarge(m.load_record(record))
            }
        })
    }
}

/// Downloads (once) and parses a weights blob.
#[cfg(feature = "pretrained")]
pub fn fetch_archive(url: &str) -> Result<TensorArchive> {
    let path = crate::download("oidn", url)?;
    TensorArchive::read(path)
}
