use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Initializer, PaddingConfig2d,
    },
    prelude::*,
};

use crate::{
    activation::Activation,
    error::{DenoiseError, Result},
    graph::LayerSpec,
};

/// 3x3 convolution, stride 1, padding 1, optionally followed by ReLU.
#[derive(Module, Debug)]
pub struct Conv3x3<B: Backend> {
    pub(crate) conv: Conv2d<B>,
    relu: bool,
}

impl<B: Backend> Conv3x3<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        self.activation().forward(x)
    }

    pub fn activation(&self) -> Activation {
        if self.relu {
            Activation::Relu
        } else {
            Activation::Identity
        }
    }

    /// `[in_channels, out_channels]`
    pub fn channels(&self) -> [usize; 2] {
        let [out_channels, in_channels, _, _] = self.conv.weight.dims();
        [in_channels, out_channels]
    }

    pub fn weight(&self) -> Tensor<B, 4> {
        self.conv.weight.val()
    }

    pub fn bias(&self) -> Option<Tensor<B, 1>> {
        self.conv.bias.as_ref().map(|bias| bias.val())
    }

    /// Replaces the parameters; `weight` is `[out, in, 3, 3]`.
    pub fn set_params(&mut self, weight: Tensor<B, 4>, bias: Tensor<B, 1>) -> Result<()> {
        let expected = self.conv.weight.dims();
        if weight.dims() != expected {
            return Err(DenoiseError::ShapeMismatch(format!(
                "weight {:?} does not fit convolution {:?}",
                weight.dims(),
                expected
            )));
        }
        if bias.dims() != [expected[0]] {
            return Err(DenoiseError::ShapeMismatch(format!(
                "bias {:?} does not fit {} output channels",
                bias.dims(),
                expected[0]
            )));
        }

        self.conv.weight = Param::from_tensor(weight);
        self.conv.bias = Some(Param::from_tensor(bias));
        Ok(())
    }
}

#[derive(Config, Debug)]
pub struct Conv3x3Config {
    in_channels: usize,
    out_channels: usize,
    #[config(default = "Activation::Relu")]
    activation: Activation,
    /// Falls back to burn's convolution initializer when unset.
    #[config(default = "None")]
    initializer: Option<Initializer>,
}

impl Conv3x3Config {
    pub fn from_spec(spec: &LayerSpec) -> Self {
        Self::new(spec.in_channels, spec.out_channels).with_activation(spec.activation)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Conv3x3<B> {
        let mut conv = Conv2dConfig::new([self.in_channels, self.out_channels], [3, 3])
            .with_stride([1, 1])
            .with_padding(PaddingConfig2d::Explicit(1, 1));
        if let Some(initializer) = &self.initializer {
            conv = conv.with_initializer(initializer.clone());
        }

        Conv3x3 {
            conv: conv.init(device),
            relu: self.activation == Activation::Relu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn keeps_spatial_size() {
        let device = Default::default();
        let conv = Conv3x3Config::new(4, 7).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::ones([2, 4, 16, 24], &device);

        assert_eq!(conv.forward(x).dims(), [2, 7, 16, 24]);
        assert_eq!(conv.channels(), [4, 7]);
    }

    #[test]
    fn identity_activation_keeps_negative_values() {
        let device = Default::default();
        let mut conv = Conv3x3Config::new(1, 1)
            .with_activation(Activation::Identity)
            .init::<TestBackend>(&device);
        conv.set_params(
            Tensor::zeros([1, 1, 3, 3], &device),
            Tensor::from_floats([-2.0], &device),
        )
        .unwrap();

        let y = conv.forward(Tensor::zeros([1, 1, 4, 4], &device));
        let values = y.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| *v == -2.0));
    }

    #[test]
    fn relu_clamps_negative_values() {
        let device = Default::default();
        let mut conv = Conv3x3Config::new(1, 1).init::<TestBackend>(&device);
        conv.set_params(
            Tensor::zeros([1, 1, 3, 3], &device),
            Tensor::from_floats([-2.0], &device),
        )
        .unwrap();

        let y = conv.forward(Tensor::zeros([1, 1, 4, 4], &device));
        let values = y.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn rejects_wrong_parameter_shapes() {
        let device = Default::default();
        let mut conv = Conv3x3Config::new(2, 3).init::<TestBackend>(&device);

        let err = conv
            .set_params(Tensor::zeros([3, 3, 3, 3], &device), Tensor::zeros([3], &device))
            .unwrap_err();
        assert!(matches!(err, DenoiseError::ShapeMismatch(_)));

        let err = conv
            .set_params(Tensor::zeros([3, 2, 3, 3], &device), Tensor::zeros([2], &device))
            .unwrap_err();
        assert!(matches!(err, DenoiseError::ShapeMismatch(_)));
    }
}
