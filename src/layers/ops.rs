use burn::{
    nn::pool::{MaxPool2d, MaxPool2dConfig},
    prelude::*,
    tensor::ops::{InterpolateMode, InterpolateOptions},
};

use crate::error::{DenoiseError, Result};

/// 2x2 max-pool with stride 2 and no padding.
pub fn max_pool() -> MaxPool2d {
    MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init()
}

/// Nearest-neighbor upsample by 2 in both spatial dimensions.
pub fn upsample<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    burn::tensor::module::interpolate(
        x,
        [height * 2, width * 2],
        InterpolateOptions::new(InterpolateMode::Nearest),
    )
}

/// Concatenates `skip` after `x` along the channel axis.
pub fn concat<B: Backend>(x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
    let [batch, _, height, width] = x.dims();
    let [skip_batch, _, skip_height, skip_width] = skip.dims();
    if (batch, height, width) != (skip_batch, skip_height, skip_width) {
        return Err(DenoiseError::ShapeMismatch(format!(
            "cannot concatenate {:?} with skip {:?}",
            x.dims(),
            skip.dims()
        )));
    }

    Ok(Tensor::cat(vec![x, skip], 1))
}
