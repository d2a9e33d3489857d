//! Mapping from image features to network channels.
//!
//! The network input is the channel concatenation of every selected feature;
//! the output reproduces only the main feature.

use core::{fmt, str::FromStr};

use burn::prelude::*;

use crate::error::{DenoiseError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Feature {
    /// High dynamic range color.
    #[serde(rename = "hdr")]
    Hdr,
    /// Low dynamic range color.
    #[serde(rename = "ldr")]
    Ldr,
    #[serde(rename = "alb")]
    Albedo,
    /// Shading normal, expected in `[-1, 1]`.
    #[serde(rename = "nrm")]
    Normal,
}

impl Feature {
    pub fn channels(&self) -> usize {
        3
    }

    pub fn is_color(&self) -> bool {
        matches!(self, Self::Hdr | Self::Ldr)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hdr => "hdr",
            Self::Ldr => "ldr",
            Self::Albedo => "alb",
            Self::Normal => "nrm",
        }
    }
}

impl FromStr for Feature {
    type Err = DenoiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hdr" => Ok(Self::Hdr),
            "ldr" => Ok(Self::Ldr),
            "alb" | "albedo" => Ok(Self::Albedo),
            "nrm" | "normal" => Ok(Self::Normal),
            other => Err(DenoiseError::Features(format!("unknown feature `{other}`"))),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, duplicate-free selection of features with a well-defined main feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSet {
    features: Vec<Feature>,
    main: Feature,
}

impl FeatureSet {
    pub fn new(features: impl IntoIterator<Item = Feature>) -> Result<Self> {
        let mut list: Vec<Feature> = Vec::new();
        for feature in features {
            if list.contains(&feature) {
                return Err(DenoiseError::Features(format!(
                    "feature `{feature}` listed twice"
                )));
            }
            list.push(feature);
        }

        let colors: Vec<_> = list.iter().copied().filter(Feature::is_color).collect();
        let main = match (colors.as_slice(), list.as_slice()) {
            (_, []) => return Err(DenoiseError::Features("no features selected".into())),
            ([color], _) => *color,
            ([], [aux]) => *aux,
            ([], _) => {
                return Err(DenoiseError::Features(
                    "auxiliary features need a color feature".into(),
                ))
            }
            (_, _) => {
                return Err(DenoiseError::Features(
                    "`hdr` and `ldr` cannot be combined".into(),
                ))
            }
        };

        Ok(Self {
            features: list,
            main,
        })
    }

    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let features = names
            .iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<Feature>>>()?;
        Self::new(features)
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// The feature the network reconstructs.
    pub fn main_feature(&self) -> Feature {
        self.main
    }

    pub fn in_channels(&self) -> usize {
        self.features.iter().map(Feature::channels).sum()
    }

    pub fn out_channels(&self) -> usize {
        self.main.channels()
    }
}

/// Per-feature image tensors waiting to be stacked into a network input.
#[derive(Debug)]
pub struct FeatureInputs<B: Backend> {
    inputs: Vec<(Feature, Tensor<B, 4>)>,
}

impl<B: Backend> Default for FeatureInputs<B> {
    fn default() -> Self {
        Self { inputs: Vec::new() }
    }
}

impl<B: Backend> FeatureInputs<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `[N, C, H, W]` image of `feature`, replacing any earlier one.
    pub fn with(mut self, feature: Feature, image: Tensor<B, 4>) -> Self {
        self.inputs.retain(|(f, _)| *f != feature);
        self.inputs.push((feature, image));
        self
    }

    /// Concatenates the images in the order of `set`.
    pub fn assemble(mut self, set: &FeatureSet) -> Result<Tensor<B, 4>> {
        if let Some((extra, _)) = self.inputs.iter().find(|(f, _)| !set.contains(*f)) {
            return Err(DenoiseError::Features(format!(
                "`{extra}` was provided but is not part of the feature set"
            )));
        }

        let mut ordered = Vec::with_capacity(set.features().len());
        let mut extent: Option<[usize; 3]> = None;
        for feature in set.features() {
            let index = self
                .inputs
                .iter()
                .position(|(f, _)| f == feature)
                .ok_or_else(|| DenoiseError::Features(format!("missing `{feature}` image")))?;
            let (_, image) = self.inputs.swap_remove(index);

            let [batch, channels, height, width] = image.dims();
            if channels != feature.channels() {
                return Err(DenoiseError::ShapeMismatch(format!(
                    "`{feature}` image has {channels} channels, expected {}",
                    feature.channels()
                )));
            }
            match extent {
                Some(expected) if expected != [batch, height, width] => {
                    return Err(DenoiseError::ShapeMismatch(format!(
                        "`{feature}` image is {:?}, expected {:?}",
                        [batch, height, width],
                        expected
                    )))
                }
                _ => extent = Some([batch, height, width]),
            }
            ordered.push(image);
        }

        Ok(Tensor::cat(ordered, 1))
    }
}

/// Maps normals stored in `[0, 1]` to `[-1, 1]`.
pub fn normal_to_signed<B: Backend>(normal: Tensor<B, 4>) -> Tensor<B, 4> {
    normal.sub_scalar(0.5).mul_scalar(2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn channel_counts_follow_the_main_feature() {
        let set = FeatureSet::parse(&["hdr", "alb", "nrm"]).unwrap();
        assert_eq!(set.main_feature(), Feature::Hdr);
        assert_eq!(set.in_channels(), 9);
        assert_eq!(set.out_channels(), 3);

        let set = FeatureSet::parse(&["alb", "ldr"]).unwrap();
        assert_eq!(set.main_feature(), Feature::Ldr);
        assert_eq!(set.in_channels(), 6);
    }

    #[test]
    fn auxiliary_feature_alone_is_its_own_main_feature() {
        let set = FeatureSet::parse(&["nrm"]).unwrap();
        assert_eq!(set.main_feature(), Feature::Normal);
        assert_eq!(set.in_channels(), 3);
    }

    #[test]
    fn invalid_sets_are_rejected() {
        let empty: [&str; 0] = [];
        for names in [
            &["hdr", "ldr"][..],
            &["alb", "nrm"][..],
            &["hdr", "hdr"][..],
            &["hdr", "depth"][..],
            &empty[..],
        ] {
            assert!(
                matches!(FeatureSet::parse(names), Err(DenoiseError::Features(_))),
                "{names:?}"
            );
        }
    }

    #[test]
    fn assemble_orders_by_feature_set() {
        let device = Default::default();
        let set = FeatureSet::parse(&["ldr", "alb"]).unwrap();

        let input = FeatureInputs::<TestBackend>::new()
            .with(Feature::Albedo, Tensor::ones([1, 3, 4, 4], &device))
            .with(Feature::Ldr, Tensor::zeros([1, 3, 4, 4], &device))
            .assemble(&set)
            .unwrap();

        assert_eq!(input.dims(), [1, 6, 4, 4]);
        let color = input.clone().slice([0..1, 0..3, 0..4, 0..4]);
        let albedo = input.slice([0..1, 3..6, 0..4, 0..4]);
        assert_eq!(color.sum().into_scalar(), 0.0);
        assert_eq!(albedo.sum().into_scalar(), 48.0);
    }

    #[test]
    fn assemble_rejects_missing_extra_and_mismatched_images() {
        let device = Default::default();
        let set = FeatureSet::parse(&["ldr", "nrm"]).unwrap();

        let missing = FeatureInputs::<TestBackend>::new()
            .with(Feature::Ldr, Tensor::zeros([1, 3, 4, 4], &device))
            .assemble(&set);
        assert!(matches!(missing, Err(DenoiseError::Features(_))));

        let extra = FeatureInputs::<TestBackend>::new()
            .with(Feature::Ldr, Tensor::zeros([1, 3, 4, 4], &device))
            .with(Feature::Normal, Tensor::zeros([1, 3, 4, 4], &device))
            .with(Feature::Albedo, Tensor::zeros([1, 3, 4, 4], &device))
            .assemble(&set);
        assert!(matches!(extra, Err(DenoiseError::Features(_))));

        let mismatched = FeatureInputs::<TestBackend>::new()
            .with(Feature::Ldr, Tensor::zeros([1, 3, 4, 4], &device))
            .with(Feature::Normal, Tensor::zeros([1, 3, 8, 4], &device))
            .assemble(&set);
        assert!(matches!(mismatched, Err(DenoiseError::ShapeMismatch(_))));
    }

    #[test]
    fn normals_are_mapped_to_signed_range() {
        let device = Default::default();
        let normal = Tensor::<TestBackend, 4>::ones([1, 3, 2, 2], &device);
        let signed = normal_to_signed(normal).into_data().to_vec::<f32>().unwrap();
        assert!(signed.iter().all(|v| *v == 1.0));
    }
}
