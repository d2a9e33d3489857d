//! Tiled evaluation of images too large to run in one pass.

use burn::prelude::*;

use crate::{
    error::{DenoiseError, Result},
    graph::ALIGNMENT,
    topology::Network,
};

/// Splits an image into overlapping square tiles, evaluates each tile and
/// blends the results back together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Tiler {
    tile_size: usize,
    overlap: usize,
}

impl Tiler {
    pub fn new(tile_size: usize, overlap: usize) -> Result<Self> {
        if tile_size == 0 || tile_size % ALIGNMENT != 0 {
            return Err(DenoiseError::Configuration(format!(
                "tile size {tile_size} is not a positive multiple of {ALIGNMENT}"
            )));
        }
        if overlap >= tile_size {
            return Err(DenoiseError::Configuration(format!(
                "overlap {overlap} must be smaller than the tile size {tile_size}"
            )));
        }
        Ok(Self { tile_size, overlap })
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Start offsets of the tiles covering `extent` pixels along one axis.
    pub fn positions(&self, extent: usize) -> Vec<usize> {
        if extent <= self.tile_size {
            return vec![0];
        }

        let stride = self.tile_size - self.overlap;
        let last = extent - self.tile_size;
        let mut positions: Vec<usize> = (0..last).step_by(stride).collect();
        positions.push(last);
        positions
    }

    /// Evaluates `model` tile by tile over a `[N, C, H, W]` image of any size.
    pub fn process<B: Backend, N: Network<B>>(
        &self,
        model: &N,
        input: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>> {
        let [batch, channels, height, width] = input.dims();
        if height == 0 || width == 0 {
            return Err(DenoiseError::ShapeMismatch(format!(
                "cannot tile an empty {height}x{width} image"
            )));
        }
        let out_channels = model.out_channels();
        let device = input.device();

        let rows = self.positions(height);
        let cols = self.positions(width);
        tracing::info!(
            "processing {height}x{width} image in {} tiles of {}",
            rows.len() * cols.len(),
            self.tile_size
        );

        let mut output = Tensor::<B, 4>::zeros([batch, out_channels, height, width], &device);
        let mut weights = vec![0.0f32; height * width];

        for &y in &rows {
            let tile_h = self.tile_size.min(height - y);
            let ramp_y = self.ramp(y, tile_h, height);

            for &x in &cols {
                let tile_w = self.tile_size.min(width - x);
                let ramp_x = self.ramp(x, tile_w, width);

                let tile = input
                    .clone()
                    .slice([0..batch, 0..channels, y..y + tile_h, x..x + tile_w])
                    .pad(
                        (0, self.tile_size - tile_w, 0, self.tile_size - tile_h),
                        0.0,
                    );
                let result = model
                    .forward(tile)?
                    .slice([0..batch, 0..out_channels, 0..tile_h, 0..tile_w]);

                let mut mask = Vec::with_capacity(tile_h * tile_w);
                for (row, wy) in ramp_y.iter().enumerate() {
                    for (col, wx) in ramp_x.iter().enumerate() {
                        let w = wy * wx;
                        mask.push(w);
                        weights[(y + row) * width + x + col] += w;
                    }
                }
                let mask = Tensor::<B, 4>::from_data(
                    TensorData::new(mask, [1, 1, tile_h, tile_w]),
                    &device,
                )
                .expand([batch, out_channels, tile_h, tile_w]);

                let region = [0..batch, 0..out_channels, y..y + tile_h, x..x + tile_w];
                let blended = output.clone().slice(region.clone()) + result * mask;
                output = output.slice_assign(region, blended);
            }
        }

        let weights = Tensor::<B, 4>::from_data(
            TensorData::new(weights, [1, 1, height, width]),
            &device,
        )
        .expand([batch, out_channels, height, width]);

        Ok(output / weights)
    }

    /// Blend weights of one tile along one axis: a linear ramp over the
    /// overlap on every side shared with a neighboring tile, 1 elsewhere.
    fn ramp(&self, start: usize, len: usize, extent: usize) -> Vec<f32> {
        let ramp = (self.overlap + 1) as f32;
        (0..len)
            .map(|i| {
                let mut w = 1.0f32;
                if start > 0 {
                    w = w.min((i + 1) as f32 / ramp);
                }
                if start + len < extent {
                    w = w.min((len - i) as f32 / ramp);
                }
                w
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::DenoiseModelConfig, schedule::ModelKind};
    use burn::{backend::NdArray, nn::Initializer, tensor::Distribution};

    type TestBackend = NdArray;

    #[test]
    fn rejects_invalid_tiling() {
        assert!(Tiler::new(0, 0).is_err());
        assert!(Tiler::new(24, 0).is_err());
        assert!(Tiler::new(32, 32).is_err());
        assert!(Tiler::new(32, 8).is_ok());
    }

    #[test]
    fn positions_cover_the_extent() {
        let tiler = Tiler::new(32, 8).unwrap();
        assert_eq!(tiler.positions(20), vec![0]);
        assert_eq!(tiler.positions(32), vec![0]);
        assert_eq!(tiler.positions(50), vec![0, 18]);
        assert_eq!(tiler.positions(80), vec![0, 24, 48]);
    }

    #[test]
    fn ramp_only_fades_shared_edges() {
        let tiler = Tiler::new(16, 3).unwrap();
        assert!(tiler.ramp(0, 16, 16).iter().all(|w| *w == 1.0));

        let leading = tiler.ramp(0, 16, 40);
        assert_eq!(leading[0], 1.0);
        assert_eq!(leading[15], 0.25);

        let middle = tiler.ramp(13, 16, 40);
        assert_eq!(middle[0], 0.25);
        assert_eq!(middle[7], 1.0);
    }

    #[test]
    fn tiling_matches_a_pointwise_network() {
        // Zero weights make every output pixel equal the bias, independent of
        // the tile it came from.
        let device = Default::default();
        let model = DenoiseModelConfig::new(ModelKind::UnetSmall, 3, 3)
            .with_initializer(Some(Initializer::Zeros))
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::random([1, 3, 40, 56], Distribution::Default, &device);

        let tiled = Tiler::new(32, 8).unwrap().process(&model, x).unwrap();
        assert_eq!(tiled.dims(), [1, 3, 40, 56]);

        let values = tiled.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() < 1e-6), "{:?}", &values[..4]);
    }

    #[test]
    fn single_tile_equals_direct_evaluation() {
        let device = Default::default();
        let model = DenoiseModelConfig::new(ModelKind::Unet, 3, 3)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);

        let direct = model.forward(x.clone()).unwrap().into_data().to_vec::<f32>().unwrap();
        let tiled = Tiler::new(32, 4)
            .unwrap()
            .process(&model, x)
            .unwrap()
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        for (a, b) in direct.iter().zip(&tiled) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
