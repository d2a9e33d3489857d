use burn::{nn::Initializer, prelude::*};

use crate::{
    error::{DenoiseError, Result},
    features::FeatureSet,
    graph::NetworkGraph,
    layers::Conv3x3,
    schedule::{ModelKind, SizeVariant, Topology},
    topology::{Network, UNet, UNetLarge},
};

/// A constructed denoising network of either topology.
#[derive(Module, Debug)]
pub enum DenoiseModel<B: Backend> {
    UNet(UNet<B>),
    UNetLarge(UNetLarge<B>),
}

impl<B: Backend> DenoiseModel<B> {
    pub fn topology(&self) -> Topology {
        match self {
            Self::UNet(_) => Topology::UNet,
            Self::UNetLarge(_) => Topology::UNetLarge,
        }
    }
}

impl<B: Backend> Network<B> for DenoiseModel<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        match self {
            Self::UNet(m) => m.forward(x),
            Self::UNetLarge(m) => m.forward(x),
        }
    }

    fn layers(&self) -> Vec<(&'static str, &Conv3x3<B>)> {
        match self {
            Self::UNet(m) => m.layers(),
            Self::UNetLarge(m) => m.layers(),
        }
    }

    fn layers_mut(&mut self) -> Vec<(&'static str, &mut Conv3x3<B>)> {
        match self {
            Self::UNet(m) => m.layers_mut(),
            Self::UNetLarge(m) => m.layers_mut(),
        }
    }
}

#[derive(Config, Debug)]
pub struct DenoiseModelConfig {
    kind: ModelKind,
    in_channels: usize,
    out_channels: usize,
    /// Weight initializer for every convolution; burn's default when unset.
    #[config(default = "None")]
    initializer: Option<Initializer>,
}

impl DenoiseModelConfig {
    /// Derives the channel counts from a feature selection.
    pub fn from_features(kind: ModelKind, features: &FeatureSet) -> Self {
        Self::new(kind, features.in_channels(), features.out_channels())
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// The validated graph the model is built from.
    pub fn graph(&self) -> Result<NetworkGraph> {
        NetworkGraph::new(self.kind, self.in_channels, self.out_channels)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DenoiseModel<B>> {
        let graph = self.graph()?;
        let initializer = self.initializer.as_ref();

        let model = match self.kind.topology() {
            Topology::UNet => DenoiseModel::UNet(UNet::init(&graph, initializer, device)?),
            Topology::UNetLarge => {
                DenoiseModel::UNetLarge(UNetLarge::init(&graph, initializer, device)?)
            }
        };
        tracing::debug!("initialized {}", graph.summary());

        Ok(model)
    }
}

/// Builds the network for `topology` at `size` with freshly initialized weights.
pub fn build<B: Backend>(
    topology: Topology,
    size: SizeVariant,
    in_channels: usize,
    out_channels: usize,
    device: &B::Device,
) -> Result<DenoiseModel<B>> {
    let kind = ModelKind::from_parts(topology, size)?;
    DenoiseModelConfig::new(kind, in_channels, out_channels).init(device)
}

/// Model choice as written in a training or inference configuration,
/// e.g. `{ "model": "unet_small", "features": ["hdr", "alb", "nrm"] }`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ModelSelection {
    pub model: String,
    pub features: Vec<String>,
}

impl ModelSelection {
    pub fn to_config(&self) -> Result<DenoiseModelConfig> {
        let kind: ModelKind = self.model.parse()?;
        let features = FeatureSet::parse(&self.features)?;
        Ok(DenoiseModelConfig::from_features(kind, &features))
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DenoiseModel<B>> {
        self.to_config()?.init(device)
    }
}

impl TryFrom<&ModelSelection> for ModelKind {
    type Error = DenoiseError;

    fn try_from(selection: &ModelSelection) -> Result<Self> {
        selection.model.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    type TestBackend = NdArray;

    #[test]
    fn build_selects_topology() {
        let device = Default::default();

        let model =
            build::<TestBackend>(Topology::UNet, SizeVariant::Small, 9, 3, &device).unwrap();
        assert_eq!(model.topology(), Topology::UNet);
        assert_eq!((model.in_channels(), model.out_channels()), (9, 3));

        let model =
            build::<TestBackend>(Topology::UNetLarge, SizeVariant::Normal, 3, 3, &device).unwrap();
        assert_eq!(model.topology(), Topology::UNetLarge);
        assert_eq!(model.layers().len(), 19);
    }

    #[test]
    fn build_rejects_variant_of_other_topology() {
        let device = Default::default();
        let err = build::<TestBackend>(Topology::UNet, SizeVariant::Xl, 3, 3, &device).unwrap_err();
        assert!(matches!(err, DenoiseError::Configuration(_)));
    }

    #[test]
    fn selection_derives_channels_from_features() {
        let selection: ModelSelection = serde_json::from_str(
            r#"{ "model": "unet_small", "features": ["hdr", "alb", "nrm"] }"#,
        )
        .unwrap();

        let config = selection.to_config().unwrap();
        assert_eq!(config.kind(), ModelKind::UnetSmall);
        let graph = config.graph().unwrap();
        assert_eq!((graph.in_channels(), graph.out_channels()), (9, 3));
    }

    #[test]
    fn invalid_model_name_is_a_configuration_error() {
        let selection = ModelSelection {
            model: "unet_tiny".into(),
            features: vec!["ldr".into()],
        };
        assert!(matches!(
            selection.init::<TestBackend>(&Default::default()),
            Err(DenoiseError::Configuration(_))
        ));
        assert!(ModelKind::try_from(&selection).is_err());
    }

    #[test]
    fn config_survives_json_round_trip() {
        let config = DenoiseModelConfig::new(ModelKind::UnetXl, 6, 3)
            .with_initializer(Some(Initializer::Zeros));
        let json = serde_json::to_string(&config).unwrap();
        let restored: DenoiseModelConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.kind(), ModelKind::UnetXl);
        assert_eq!(restored.graph().unwrap().num_params(), config.graph().unwrap().num_params());
    }

    #[test]
    fn initializer_is_applied_to_every_layer() {
        let device = Default::default();
        let model = DenoiseModelConfig::new(ModelKind::UnetSmall, 3, 3)
            .with_initializer(Some(Initializer::Constant { value: 0.5 }))
            .init::<TestBackend>(&device)
            .unwrap();

        for (_, layer) in model.layers() {
            let weight = layer.weight().into_data().to_vec::<f32>().unwrap();
            assert!(weight.iter().all(|v| *v == 0.5));
        }
    }

    /// Counts debug events emitted while it is the default subscriber.
    struct DebugCounter(Arc<AtomicUsize>);

    impl tracing::Subscriber for DebugCounter {
        fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }

        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}

        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}

        fn event(&self, event: &tracing::Event<'_>) {
            let metadata = event.metadata();
            if *metadata.level() == tracing::Level::DEBUG
                && metadata.target().starts_with("denoise_models_burn")
            {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn enter(&self, _: &tracing::span::Id) {}

        fn exit(&self, _: &tracing::span::Id) {}
    }

    #[test]
    fn init_logs_the_summary_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let config = DenoiseModelConfig::new(ModelKind::UnetSmall, 3, 3);

        tracing::subscriber::with_default(DebugCounter(count.clone()), || {
            config.init::<TestBackend>(&Default::default()).unwrap();
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
