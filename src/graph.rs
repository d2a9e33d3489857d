//! Data description of a denoising network.
//!
//! A [`NetworkGraph`] is the ordered list of operator applications of one
//! forward pass. Tensors that later stages reuse are saved under a name and
//! every concatenation is recorded as an explicit [`SkipEdge`] from the
//! saved tensor to the convolution that consumes it. Building a graph walks
//! the steps and checks that every convolution declares exactly the channel
//! count it will receive.
//!
//! ```text
//! input ─ enc ─ pool1 ─ enc ─ pool2 ─ ... ─ bottleneck
//!   │             │                              │
//!   │             └──────────── concat ◄── up ◄──┘ ...
//!   └────────────────────────── concat ◄── up ◄── dec
//! ```

use std::{collections::HashMap, fmt};

use crate::{
    activation::Activation,
    error::{DenoiseError, Result},
    schedule::ModelKind,
    topology::{unet, unet_large},
};

/// Input height and width must be a multiple of this value: four 2x2 pools
/// run before the first upsample.
pub const ALIGNMENT: usize = 16;

/// Name under which the raw network input is available to skip edges.
pub const INPUT: &str = "input";

/// A 3x3 convolution of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSpec {
    pub name: &'static str,
    pub in_channels: usize,
    pub out_channels: usize,
    pub activation: Activation,
}

impl LayerSpec {
    /// Weight and bias element count.
    pub fn num_params(&self) -> usize {
        self.in_channels * self.out_channels * 9 + self.out_channels
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Conv(LayerSpec),
    /// 2x2 max-pool, optionally keeping the result for a later concatenation.
    Pool { save_as: Option<&'static str> },
    /// 2x nearest-neighbor upsample.
    Upsample,
    /// Channel concatenation of the running tensor with a saved one.
    Concat { skip: &'static str },
}

/// A saved tensor reused by a decoder convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipEdge {
    pub producer: &'static str,
    pub consumer: &'static str,
}

/// Validated forward computation of one network configuration.
#[derive(Debug, Clone)]
pub struct NetworkGraph {
    kind: ModelKind,
    in_channels: usize,
    out_channels: usize,
    steps: Vec<Step>,
    skips: Vec<SkipEdge>,
}

impl NetworkGraph {
    /// Describes the network selected by `kind`.
    pub fn new(kind: ModelKind, in_channels: usize, out_channels: usize) -> Result<Self> {
        if in_channels == 0 || out_channels == 0 {
            return Err(DenoiseError::Configuration(format!(
                "channel counts must be positive, got {in_channels} in / {out_channels} out"
            )));
        }
        let graph = match kind {
            ModelKind::Unet | ModelKind::UnetSmall => unet::graph(kind, in_channels, out_channels),
            ModelKind::UnetLarge | ModelKind::UnetXl => {
                unet_large::graph(kind, in_channels, out_channels)
            }
        }?;
        Ok(graph)
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn skips(&self) -> &[SkipEdge] {
        &self.skips
    }

    pub fn layers(&self) -> impl Iterator<Item = &LayerSpec> {
        self.steps.iter().filter_map(|step| match step {
            Step::Conv(spec) => Some(spec),
            _ => None,
        })
    }

    pub fn layer(&self, name: &str) -> Option<&LayerSpec> {
        self.layers().find(|spec| spec.name == name)
    }

    pub fn num_params(&self) -> usize {
        self.layers().map(LayerSpec::num_params).sum()
    }

    /// Spatial multiple required of the input, `2^pools`.
    pub fn alignment(&self) -> usize {
        let pools = self
            .steps
            .iter()
            .filter(|step| matches!(step, Step::Pool { .. }))
            .count();
        1 << pools
    }

    /// Checks an `[N, C, H, W]` input against the graph.
    pub fn check_input(&self, dims: [usize; 4]) -> Result<()> {
        check_input(dims, self.in_channels, self.alignment())
    }

    /// Output shape `[C, H, W]` of every convolution for an `height` x `width` input.
    pub fn trace(&self, height: usize, width: usize) -> Result<Vec<(&'static str, [usize; 3])>> {
        self.check_input([1, self.in_channels, height, width])?;

        let mut shape = [self.in_channels, height, width];
        let mut saved = HashMap::from([(INPUT, shape)]);
        let mut out = Vec::new();

        for step in &self.steps {
            match *step {
                Step::Conv(spec) => {
                    shape[0] = spec.out_channels;
                    out.push((spec.name, shape));
                }
                Step::Pool { save_as } => {
                    shape = [shape[0], shape[1] / 2, shape[2] / 2];
                    if let Some(name) = save_as {
                        saved.insert(name, shape);
                    }
                }
                Step::Upsample => shape = [shape[0], shape[1] * 2, shape[2] * 2],
                Step::Concat { skip } => {
                    let other = saved.get(skip).ok_or_else(|| {
                        DenoiseError::InvalidGraph(format!("unknown skip tensor `{skip}`"))
                    })?;
                    if other[1..] != shape[1..] {
                        return Err(DenoiseError::ShapeMismatch(format!(
                            "cannot concatenate {:?} with `{skip}` {:?}",
                            shape, other
                        )));
                    }
                    shape[0] += other[0];
                }
            }
        }

        Ok(out)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} convolutions, {} skip edges, {} params, {} -> {} channels",
            self.kind,
            self.layers().count(),
            self.skips.len(),
            self.num_params(),
            self.in_channels,
            self.out_channels,
        )
    }

    /// Walks the steps and checks channel bookkeeping, resolution levels and
    /// the recorded skip edges.
    fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(DenoiseError::InvalidGraph("graph has no steps".into()));
        }

        let mut channels = self.in_channels;
        let mut level = 0usize;
        let mut deepest = 0usize;
        let mut saved: HashMap<&str, (usize, usize)> = HashMap::from([(INPUT, (channels, 0))]);
        let mut names = Vec::new();
        let mut derived_skips = Vec::new();
        let mut pending: Option<&'static str> = None;

        for step in &self.steps {
            match *step {
                Step::Conv(spec) => {
                    if names.contains(&spec.name) {
                        return Err(DenoiseError::InvalidGraph(format!(
                            "duplicate layer `{}`",
                            spec.name
                        )));
                    }
                    if spec.in_channels != channels {
                        return Err(DenoiseError::InvalidGraph(format!(
                            "layer `{}` declares {} input channels but receives {}",
                            spec.name, spec.in_channels, channels
                        )));
                    }
                    if let Some(producer) = pending.take() {
                        derived_skips.push(SkipEdge {
                            producer,
                            consumer: spec.name,
                        });
                    }
                    names.push(spec.name);
                    channels = spec.out_channels;
                }
                Step::Pool { save_as } => {
                    level += 1;
                    deepest = deepest.max(level);
                    if let Some(name) = save_as {
                        if saved.insert(name, (channels, level)).is_some() {
                            return Err(DenoiseError::InvalidGraph(format!(
                                "tensor `{name}` saved twice"
                            )));
                        }
                    }
                }
                Step::Upsample => {
                    level = level.checked_sub(1).ok_or_else(|| {
                        DenoiseError::InvalidGraph("upsample above input resolution".into())
                    })?;
                }
                Step::Concat { skip } => {
                    let (skip_channels, skip_level) = *saved.get(skip).ok_or_else(|| {
                        DenoiseError::InvalidGraph(format!("unknown skip tensor `{skip}`"))
                    })?;
                    if skip_level != level {
                        return Err(DenoiseError::InvalidGraph(format!(
                            "skip tensor `{skip}` is at level {skip_level}, decoder is at level {level}"
                        )));
                    }
                    if pending.replace(skip).is_some() {
                        return Err(DenoiseError::InvalidGraph(
                            "two concatenations without a consuming convolution".into(),
                        ));
                    }
                    channels += skip_channels;
                }
            }
        }

        if level != 0 {
            return Err(DenoiseError::InvalidGraph(format!(
                "graph ends at level {level} instead of input resolution"
            )));
        }
        if pending.is_some() {
            return Err(DenoiseError::InvalidGraph(
                "graph ends with an unconsumed concatenation".into(),
            ));
        }
        if channels != self.out_channels {
            return Err(DenoiseError::InvalidGraph(format!(
                "graph produces {channels} channels, expected {}",
                self.out_channels
            )));
        }
        if 1 << deepest != ALIGNMENT {
            return Err(DenoiseError::InvalidGraph(format!(
                "graph requires alignment {}, expected {ALIGNMENT}",
                1 << deepest
            )));
        }
        if derived_skips != self.skips {
            return Err(DenoiseError::InvalidGraph(format!(
                "recorded skip edges {:?} do not match concatenations {:?}",
                self.skips, derived_skips
            )));
        }

        Ok(())
    }
}

impl fmt::Display for NetworkGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for step in &self.steps {
            match step {
                Step::Conv(spec) => writeln!(
                    f,
                    "  conv {:<11} {:>4} -> {:<4} {:?}",
                    spec.name, spec.in_channels, spec.out_channels, spec.activation
                )?,
                Step::Pool { save_as: Some(name) } => writeln!(f, "  pool -> {name}")?,
                Step::Pool { save_as: None } => writeln!(f, "  pool")?,
                Step::Upsample => writeln!(f, "  upsample")?,
                Step::Concat { skip } => writeln!(f, "  concat {skip}")?,
            }
        }
        Ok(())
    }
}

/// Checks an `[N, C, H, W]` input for channel count and spatial alignment.
pub fn check_input(dims: [usize; 4], in_channels: usize, alignment: usize) -> Result<()> {
    let [_, channels, height, width] = dims;
    if channels != in_channels {
        return Err(DenoiseError::ShapeMismatch(format!(
            "expected {in_channels} input channels, got {channels}"
        )));
    }
    if height == 0 || width == 0 || height % alignment != 0 || width % alignment != 0 {
        return Err(DenoiseError::ShapeMismatch(format!(
            "input {height}x{width} is not a multiple of {alignment}"
        )));
    }
    Ok(())
}

/// Accumulates steps while tracking the running channel count, so topology
/// definitions only state output widths.
pub(crate) struct GraphBuilder {
    kind: ModelKind,
    in_channels: usize,
    channels: usize,
    saved: HashMap<&'static str, usize>,
    steps: Vec<Step>,
    skips: Vec<SkipEdge>,
    pending: Option<&'static str>,
}

impl GraphBuilder {
    pub(crate) fn new(kind: ModelKind, in_channels: usize) -> Self {
        Self {
            kind,
            in_channels,
            channels: in_channels,
            saved: HashMap::from([(INPUT, in_channels)]),
            steps: Vec::new(),
            skips: Vec::new(),
            pending: None,
        }
    }

    pub(crate) fn conv(mut self, name: &'static str, out_channels: usize) -> Self {
        self.push_conv(name, out_channels, Activation::Relu);
        self
    }

    pub(crate) fn conv_linear(mut self, name: &'static str, out_channels: usize) -> Self {
        self.push_conv(name, out_channels, Activation::Identity);
        self
    }

    pub(crate) fn pool(mut self) -> Self {
        self.steps.push(Step::Pool { save_as: None });
        self
    }

    pub(crate) fn pool_saving(mut self, name: &'static str) -> Self {
        self.saved.insert(name, self.channels);
        self.steps.push(Step::Pool {
            save_as: Some(name),
        });
        self
    }

    pub(crate) fn upsample(mut self) -> Self {
        self.steps.push(Step::Upsample);
        self
    }

    /// Unknown skip names add no channels; `finish` reports them.
    pub(crate) fn concat(mut self, skip: &'static str) -> Self {
        self.channels += self.saved.get(skip).copied().unwrap_or(0);
        self.pending = Some(skip);
        self.steps.push(Step::Concat { skip });
        self
    }

    pub(crate) fn finish(self) -> Result<NetworkGraph> {
        let graph = NetworkGraph {
            kind: self.kind,
            in_channels: self.in_channels,
            out_channels: self.channels,
            steps: self.steps,
            skips: self.skips,
        };
        graph.validate()?;
        Ok(graph)
    }

    fn push_conv(&mut self, name: &'static str, out_channels: usize, activation: Activation) {
        if let Some(producer) = self.pending.take() {
            self.skips.push(SkipEdge {
                producer,
                consumer: name,
            });
        }
        self.steps.push(Step::Conv(LayerSpec {
            name,
            in_channels: self.channels,
            out_channels,
            activation,
        }));
        self.channels = out_channels;
    }
}
