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

/// Describes the `unet_large` / `unet_xl` forward pass.
pub(crate) fn graph(kind: ModelKind, in_channels: usize, out_channels: usize) -> Result<NetworkGraph> {
    let s = kind.schedule();

    GraphBuilder::new(kind, in_channels)
        // Encoder
        .conv("enc_conv1a", s.ec1)
        .conv("enc_conv1b", s.ec1)
        .pool_saving("pool1")
        .conv("enc_conv2a", s.ec2)
        .conv("enc_conv2b", s.ec2)
        .pool_saving("pool2")
        .conv("enc_conv3a", s.ec3)
        .conv("enc_conv3b", s.ec3)
        .pool_saving("pool3")
        .conv("enc_conv4a", s.ec4)
        .conv("enc_conv4b", s.ec4)
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
        // Unlike `unet`, the output layer keeps its ReLU.
        .conv("dec_conv1c", out_channels)
        .finish()
}

/// U-Net with two convolutions per encoder stage and a non-negative output.
#[derive(Module, Debug)]
pub struct UNetLarge<B: Backend> {
    enc_conv1a: Conv3x3<B>,
    enc_conv1b: Conv3x3<B>,
    enc_conv2a: Conv3x3<B>,
    enc_conv2b: Conv3x3<B>,
    enc_conv3a: Conv3x3<B>,
    enc_conv3b: Conv3x3<B>,
    enc_conv4a: Conv3x3<B>,
    enc_conv4b: Conv3x3<B>,
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
    dec_conv1c: Conv3x3<B>,
    pool: MaxPool2d,
}

impl<B: Backend> UNetLarge<B> {
    pub(crate) fn init(
        graph: &NetworkGraph,
        initializer: Option<&Initializer>,
        device: &B::Device,
    ) -> Result<Self> {
        let conv = |name: &str| init_layer::<B>(graph, name, initializer, device);

        Ok(Self {
            enc_conv1a: conv("enc_conv1a")?,
            enc_conv1b: conv("enc_conv1b")?,
            enc_conv2a: conv("enc_conv2a")?,
            enc_conv2b: conv("enc_conv2b")?,
            enc_conv3a: conv("enc_conv3a")?,
            enc_conv3b: conv("enc_conv3b")?,
            enc_conv4a: conv("enc_conv4a")?,
            enc_conv4b: conv("enc_conv4b")?,
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
            dec_conv1c: conv("dec_conv1c")?,
            pool: max_pool(),
        })
    }
}

impl<B: Backend> Network<B> for UNetLarge<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        check_input(input.dims(), self.in_channels(), ALIGNMENT)?;

        // Encoder
        let x = self.enc_conv1a.forward(input.clone());
        let x = self.enc_conv1b.forward(x);
        let pool1 = self.pool.forward(x);

        let x = self.enc_conv2a.forward(pool1.clone());
        let x = self.enc_conv2b.forward(x);
        let pool2 = self.pool.forward(x);

        let x = self.enc_conv3a.forward(pool2.clone());
        let x = self.enc_conv3b.forward(x);
        let pool3 = self.pool.forward(x);

        let x = self.enc_conv4a.forward(pool3.clone());
        let x = self.enc_conv4b.forward(x);
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

        let x = concat(upsample(x), input)?;
        let x = self.dec_conv1a.forward(x);
        let x = self.dec_conv1b.forward(x);

        Ok(self.dec_conv1c.forward(x))
    }

    fn layers(&self) -> Vec<(&'static str, &Conv3x3<B>)> {
        vec![
            ("enc_conv1a", &self.enc_conv1a),
            ("enc_conv1b", &self.enc_conv1b),
            ("enc_conv2a", &self.enc_conv2a),
            ("enc_conv2b", &self.enc_conv2b),
            ("enc_conv3a", &self.enc_conv3a),
            ("enc_conv3b", &self.enc_conv3b),
            ("enc_conv4a", &self.enc_conv4a),
            ("enc_conv4b", &self.enc_conv4b),
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
            ("dec_conv1c", &self.dec_conv1c),
        ]
    }

    fn layers_mut(&mut self) -> Vec<(&'static str, &mut Conv3x3<B>)> {
        vec![
            ("enc_conv1a", &mut self.enc_conv1a),
            ("enc_conv1b", &mut self.enc_conv1b),
            ("enc_conv2a", &mut self.enc_conv2a),
            ("enc_conv2b", &mut self.enc_conv2b),
            ("enc_conv3a", &mut self.enc_conv3a),
            ("enc_conv3b", &mut self.enc_conv3b),
            ("enc_conv4a", &mut self.enc_conv4a),
            ("enc_conv4b", &mut self.enc_conv4b),
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
            ("dec_conv1c", &mut self.dec_conv1c),
        ]
    }
}
