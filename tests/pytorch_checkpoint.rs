use burn::{backend::NdArray, tensor::Tensor};
use denoise_models_burn::{
    activation::Activation, DenoiseError, DenoiseModel, DenoiseModelConfig, ModelKind, Network,
};

type B = NdArray;

/// Written by `tests/fixtures/unet_small_checkpoint.py`.
const CHECKPOINT: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/unet_small_checkpoint.pth"
);

/// Every checkpoint tensor starts at element 0 of this sequence.
fn stored(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| ((i % 97) as f32 - 48.0) / 1024.0)
        .collect()
}

fn unet_small() -> DenoiseModel<B> {
    DenoiseModelConfig::new(ModelKind::UnetSmall, 3, 3)
        .init::<B>(&Default::default())
        .unwrap()
}

#[test]
fn checkpoint_parameters_replace_initial_weights() {
    let device = Default::default();
    let model = unet_small()
        .load_pytorch_checkpoint(CHECKPOINT, Some("model_state"), &device)
        .unwrap();

    for (name, layer) in model.layers() {
        let [in_channels, out_channels] = layer.channels();
        let weight = layer.weight().into_data().to_vec::<f32>().unwrap();
        assert_eq!(weight, stored(out_channels * in_channels * 9), "{name}");

        let bias = layer.bias().unwrap().into_data().to_vec::<f32>().unwrap();
        assert_eq!(bias, stored(out_channels), "{name}");
    }
}

#[test]
fn checkpoint_keeps_activations_and_evaluates() {
    let device = Default::default();
    let model = unet_small()
        .load_pytorch_checkpoint(CHECKPOINT, Some("model_state"), &device)
        .unwrap();

    for (name, layer) in model.layers() {
        let expected = if name == "dec_conv0" {
            Activation::Identity
        } else {
            Activation::Relu
        };
        assert_eq!(layer.activation(), expected, "{name}");
    }

    let y = model
        .forward(Tensor::ones([1, 3, 16, 16], &device))
        .unwrap();
    assert_eq!(y.dims(), [1, 3, 16, 16]);
}

#[test]
fn unknown_top_level_key_is_a_recorder_error() {
    let err = unet_small()
        .load_pytorch_checkpoint(CHECKPOINT, Some("state_dict"), &Default::default())
        .unwrap_err();
    assert!(matches!(err, DenoiseError::Recorder(_)));
}
