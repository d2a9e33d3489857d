//! Padding of arbitrary image sizes to the network alignment.

use burn::prelude::*;

use crate::{
    error::{DenoiseError, Result},
    topology::Network,
};

/// Zero padding added around an image, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Padding {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Padding {
    /// Splits the padding that brings `height` x `width` up to a multiple of
    /// `alignment`; odd amounts put the extra pixel at the bottom/right.
    pub fn for_extent(height: usize, width: usize, alignment: usize) -> Result<Self> {
        if alignment == 0 {
            return Err(DenoiseError::Configuration("alignment must be positive".into()));
        }
        let vertical = height.next_multiple_of(alignment) - height;
        let horizontal = width.next_multiple_of(alignment) - width;

        Ok(Self {
            top: vertical / 2,
            bottom: vertical - vertical / 2,
            left: horizontal / 2,
            right: horizontal - horizontal / 2,
        })
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Removes the padding from a `[N, C, H, W]` tensor.
    pub fn crop<B: Backend>(&self, x: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        let [batch, channels, height, width] = x.dims();
        if self.top + self.bottom > height || self.left + self.right > width {
            return Err(DenoiseError::ShapeMismatch(format!(
                "cannot remove {self:?} from a {height}x{width} image"
            )));
        }
        if self.is_zero() {
            return Ok(x);
        }

        Ok(x.slice([
            0..batch,
            0..channels,
            self.top..height - self.bottom,
            self.left..width - self.right,
        ]))
    }
}

/// Zero-pads H and W of `x` up to the next multiple of `alignment`.
pub fn pad_to_alignment<B: Backend>(
    x: Tensor<B, 4>,
    alignment: usize,
) -> Result<(Tensor<B, 4>, Padding)> {
    let [_, _, height, width] = x.dims();
    let padding = Padding::for_extent(height, width, alignment)?;
    if padding.is_zero() {
        return Ok((x, padding));
    }

    let padded = x.pad(
        (padding.left, padding.right, padding.top, padding.bottom),
        0.0,
    );
    Ok((padded, padding))
}

/// Runs `model` on an image of any size by padding it to the model's
/// alignment and cropping the result back.
pub fn forward_padded<B: Backend, N: Network<B>>(model: &N, x: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
    let (padded, padding) = pad_to_alignment(x, crate::graph::ALIGNMENT)?;
    padding.crop(model.forward(padded)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn padding_is_split_evenly() {
        let padding = Padding::for_extent(15, 21, 16).unwrap();
        assert_eq!(
            padding,
            Padding {
                top: 0,
                bottom: 1,
                left: 5,
                right: 6
            }
        );
        assert!(Padding::for_extent(32, 48, 16).unwrap().is_zero());
        assert!(Padding::for_extent(32, 48, 0).is_err());
    }

    #[test]
    fn pad_then_crop_restores_the_image() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 3, 15, 21], &device);

        let (padded, padding) = pad_to_alignment(x, 16).unwrap();
        assert_eq!(padded.dims(), [1, 3, 16, 32]);
        // Only the original pixels are non-zero.
        assert_eq!(padded.clone().sum().into_scalar(), (3 * 15 * 21) as f32);

        let cropped = padding.crop(padded).unwrap();
        assert_eq!(cropped.dims(), [1, 3, 15, 21]);
        assert_eq!(cropped.sum().into_scalar(), (3 * 15 * 21) as f32);
    }

    #[test]
    fn crop_rejects_oversized_padding() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::zeros([1, 1, 4, 4], &device);
        let padding = Padding {
            top: 3,
            bottom: 2,
            ..Default::default()
        };
        assert!(matches!(padding.crop(x), Err(DenoiseError::ShapeMismatch(_))));
    }

    #[test]
    fn padded_forward_accepts_unaligned_images() {
        let device = Default::default();
        let model = crate::model::DenoiseModelConfig::new(crate::schedule::ModelKind::UnetSmall, 3, 3)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::zeros([1, 3, 15, 16], &device);

        assert!(model.forward(x.clone()).is_err());
        assert_eq!(forward_padded(&model, x).unwrap().dims(), [1, 3, 15, 16]);
    }
}
