use burn::{
    nn::{pool::MaxPool2d, Initializer},
    prelude::*,
};

use crate::{
    error::Result,
    graph::{check_input, GraphBuilder, NetworkGraph, ALIGNMENT, INPUT},
    layers::{concat, max_pool, upsample, Conv3x3},
    schedule::ModelKind,
};

use super::{init_layer, Network};

/// Describes the `unet` / `unet_small` forward pass.
pub(crate) fn graph(kind: ModelKind, in_channels: usize, out_channels: usize) -> Result<NetworkGraph> {
    let s = kind.schedule();

    GraphBuilder::new(kind, in_channels)
        // Encoder
        .conv("enc_conv0", s.ec1)
        .conv("enc_conv1", s.ec1)
        .pool_saving("pool1")
        .conv("enc_conv2", s.ec2)
        .pool_saving("pool2")
        .conv("enc_conv3", s.ec3)
        .pool_saving("pool3")
        .conv("enc_conv4", s.ec4)
        .pool()
        // Bottleneck
        .conv("enc_conv5a", s.ec5)
        .conv("enc_conv5b", s.ec5)
        // Decoder
        .upsample()
        .concat("pool3")
        .conv("dec_conv4a", s.dc4)
        .conv("dec_conv4b", s.dc4)
        .upsample()
        .concat("pool2")
        .conv("dec_conv3a", s.dc3)
        .conv("dec_conv3b", s.dc3)
        .upsample()
        .concat("pool1")
        .conv("dec_conv2a", s.dc2a)
        .conv("dec_conv2b", s.dc2b)
        .upsample()
        .concat(INPUT)
        .conv("dec_conv1a", s.dc1a)
        .conv("dec_conv1b", s.dc1b)
        .conv_linear("dec_conv0", out_channels)
        .finish()
}

/// U-Net with one convolution per encoder stage and a linear output layer.
///
/// Field names match the parameter names of the training checkpoints.
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    enc_conv0: Conv3x3<B>,
    enc_conv1: Conv3x3<B>,
    enc_conv2: Conv3x3<B>,
    enc_conv3: Conv3x3<B>,
    enc_conv4: Conv3x3<B>,
    enc_conv5a: Conv3x3<B>,
    enc_conv5b: Conv3x3<B>,
    dec_conv4a: Conv3x3<B>,
    dec_conv4b: Conv3x3<B>,
    dec_conv3a: Conv3x3<B>,
    dec_conv3b: Conv3x3<B>,
    dec_conv2a: Conv3x3<B>,
    dec_conv2b: Conv3x3<B>,
    dec_conv1a: Conv3x3<B>,
    dec_conv1b: Conv3x3<B>,
    dec_conv0: Conv3x3<B>,
    pool: MaxPool2d,
}

impl<B: Backend> UNet<B> {
    pub(crate) fn init(
        graph: &NetworkGraph,
        initializer: Option<&Initializer>,
        device: &B::Device,
    ) -> Result<Self> {
        let conv = |name: &str| init_layer::<B>(graph, name, initializer, device);

        Ok(Self {
            enc_conv0: conv("enc_conv0")?,
            enc_conv1: conv("enc_conv1")?,
            enc_conv2: conv("enc_conv2")?,
            enc_conv3: conv("enc_conv3")?,
            enc_conv4: conv("enc_conv4")?,
            enc_conv5a: conv("enc_conv5a")?,
            enc_conv5b: conv("enc_conv5b")?,
            dec_conv4a: conv("dec_conv4a")?,
            dec_conv4b: conv("dec_conv4b")?,
            dec_conv3a: conv("dec_conv3a")?,
            dec_conv3b: conv("dec_conv3b")?,
            dec_conv2a: conv("dec_conv2a")?,
            dec_conv2b: conv("dec_conv2b")?,
            dec_conv1a: conv("dec_conv1a")?,
            dec_conv1b: conv("dec_conv1b")?,
            dec_conv0: conv("dec_conv0")?,
            pool: max_pool(),
        })
    }
}

impl<B: Backend> Network<B> for UNet<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        check_input(input.dims(), self.in_channels(), ALIGNMENT)?;

        // Encoder
        let x = self.enc_conv0.forward(input.clone());
        let x = self.enc_conv1.forward(x);
        let pool1 = self.pool.forward(x);

        let x = self.enc_conv2.forward(pool1.clone());
        let pool2 = self.pool.forward(x);

        let x = self.enc_conv3.forward(pool2.clone());
        let pool3 = self.pool.forward(x);

        let x = self.enc_conv4.forward(pool3.clone());
        let x = self.pool.forward(x);

        // Bottleneck
        let x = self.enc_conv5a.forward(x);
        let x = self.enc_conv5b.forward(x);

        // Decoder
        let x = concat(upsample(x), pool3)?;
        let x = self.dec_conv4a.forward(x);
        let x = self.dec_conv4b.forward(x);

        let x = concat(upsample(x), pool2)?;
        let x = self.dec_conv3a.forward(x);
        let x = self.dec_conv3b.forward(x);

        let x = concat(upsample(x), pool1)?;
        let x = self.dec_conv2a.forward(x);
        let x = self.dec_conv2b.forward(x);

        // The last skip is the raw input, not an encoder activation.
        let x = concat(upsample(x), input)?;
        let x = self.dec_conv1a.forward(x);
        let x = self.dec_conv1b.forward(x);

        Ok(self.dec_conv0.forward(x))
    }

    fn layers(&self) -> Vec<(&'static str, &Conv3x3<B>)> {
        vec![
            ("enc_conv0", &self.enc_conv0),
            ("enc_conv1", &self.enc_conv1),
            ("enc_conv2", &self.enc_conv2),
            ("enc_conv3", &self.enc_conv3),
            ("enc_conv4", &self.enc_conv4),
            ("enc_conv5a", &self.enc_conv5a),
            ("enc_conv5b", &self.enc_conv5b),
            ("dec_conv4a", &self.dec_conv4a),
            ("dec_conv4b", &self.dec_conv4b),
            ("dec_conv3a", &self.dec_conv3a),
            ("dec_conv3b", &self.dec_conv3b),
            ("dec_conv2a", &self.dec_conv2a),
            ("dec_conv2b", &self.dec_conv2b),
            ("dec_conv1a", &self.dec_conv1a),
            ("dec_conv1b", &self.dec_conv1b),
            ("dec_conv0", &self.dec_conv0),
        ]
    }

    fn layers_mut(&mut self) -> Vec<(&'static str, &mut Conv3x3<B>)> {
        vec![
            ("enc_conv0", &mut self.enc_conv0),
            ("enc_conv1", &mut self.enc_conv1),
            ("enc_conv2", &mut self.enc_conv2),
            ("enc_conv3", &mut self.enc_conv3),
            ("enc_conv4", &mut self.enc_conv4),
            ("enc_conv5a", &mut self.enc_conv5a),
            ("enc_conv5b", &mut self.enc_conv5b),
            ("dec_conv4a", &mut self.dec_conv4a),
            ("dec_conv4b", &mut self.dec_conv4b),
            ("dec_conv3a", &mut self.dec_conv3a),
            ("dec_conv3b", &mut self.dec_conv3b),
            ("dec_conv2a", &mut self.dec_conv2a),
            ("dec_conv2b", &mut self.dec_conv2b),
            ("dec_conv1a", &mut self.dec_conv1a),
            ("dec_conv1b", &mut self.dec_conv1b),
            ("dec_conv0", &mut self.dec_conv0),
        ]
    }
}
