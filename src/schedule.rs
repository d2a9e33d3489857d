use core::{fmt, str::FromStr};

use crate::error::{DenoiseError, Result};

/// Network family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Topology {
    /// Single-conv encoder stages, linear output.
    #[serde(rename = "unet")]
    UNet,
    /// Double-conv encoder stages, three-conv final stage with ReLU output.
    #[serde(rename = "unet_large")]
    UNetLarge,
}

impl FromStr for Topology {
    type Err = DenoiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unet" => Ok(Self::UNet),
            "unet_large" => Ok(Self::UNetLarge),
            other => Err(DenoiseError::Configuration(format!(
                "unknown topology `{other}`"
            ))),
        }
    }
}

/// Width variant of a topology. `Small` pairs with [`Topology::UNet`],
/// `Xl` with [`Topology::UNetLarge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeVariant {
    #[default]
    Normal,
    Small,
    Xl,
}

impl FromStr for SizeVariant {
    type Err = DenoiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" | "default" => Ok(Self::Normal),
            "small" => Ok(Self::Small),
            "xl" => Ok(Self::Xl),
            other => Err(DenoiseError::Configuration(format!(
                "unknown size variant `{other}`"
            ))),
        }
    }
}

/// One of the four fixed network configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Unet,
    UnetSmall,
    UnetLarge,
    UnetXl,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Unet,
        ModelKind::UnetSmall,
        ModelKind::UnetLarge,
        ModelKind::UnetXl,
    ];

    /// Pairs a topology with a size variant. Pairings that have no
    /// schedule (`unet` + `xl`, `unet_large` + `small`) are rejected.
    pub fn from_parts(topology: Topology, size: SizeVariant) -> Result<Self> {
        match (topology, size) {
            (Topology::UNet, SizeVariant::Normal) => Ok(Self::Unet),
            (Topology::UNet, SizeVariant::Small) => Ok(Self::UnetSmall),
            (Topology::UNetLarge, SizeVariant::Normal) => Ok(Self::UnetLarge),
            (Topology::UNetLarge, SizeVariant::Xl) => Ok(Self::UnetXl),
            (topology, size) => Err(DenoiseError::Configuration(format!(
                "size variant {size:?} is not available for {topology:?}"
            ))),
        }
    }

    pub fn topology(&self) -> Topology {
        match self {
            Self::Unet | Self::UnetSmall => Topology::UNet,
            Self::UnetLarge | Self::UnetXl => Topology::UNetLarge,
        }
    }

    pub fn size(&self) -> SizeVariant {
        match self {
            Self::Unet | Self::UnetLarge => SizeVariant::Normal,
            Self::UnetSmall => SizeVariant::Small,
            Self::UnetXl => SizeVariant::Xl,
        }
    }

    pub fn schedule(&self) -> &'static ChannelSchedule {
        match self {
            Self::Unet => &ChannelSchedule::UNET,
            Self::UnetSmall => &ChannelSchedule::UNET_SMALL,
            Self::UnetLarge => &ChannelSchedule::UNET_LARGE,
            Self::UnetXl => &ChannelSchedule::UNET_XL,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unet => "unet",
            Self::UnetSmall => "unet_small",
            Self::UnetLarge => "unet_large",
            Self::UnetXl => "unet_xl",
        }
    }
}

impl FromStr for ModelKind {
    type Err = DenoiseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DenoiseError::Configuration(format!("invalid model `{s}`")))
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage channel widths.
///
/// `UNetLarge` uses a single width per decoder stage, so its records repeat
/// `dc2a == dc2b` and `dc1a == dc1b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSchedule {
    pub ec1: usize,
    pub ec2: usize,
    pub ec3: usize,
    pub ec4: usize,
    pub ec5: usize,
    pub dc4: usize,
    pub dc3: usize,
    pub dc2a: usize,
    pub dc2b: usize,
    pub dc1a: usize,
    pub dc1b: usize,
}

impl ChannelSchedule {
    pub const UNET: Self = Self {
        ec1: 32,
        ec2: 48,
        ec3: 64,
        ec4: 80,
        ec5: 96,
        dc4: 112,
        dc3: 96,
        dc2a: 64,
        dc2b: 64,
        dc1a: 64,
        dc1b: 32,
    };

    pub const UNET_SMALL: Self = Self {
        ec1: 32,
        ec2: 32,
        ec3: 32,
        ec4: 32,
        ec5: 32,
        dc4: 64,
        dc3: 64,
        dc2a: 64,
        dc2b: 32,
        dc1a: 32,
        dc1b: 32,
    };

    pub const UNET_LARGE: Self = Self {
        ec1: 64,
        ec2: 96,
        ec3: 128,
        ec4: 192,
        ec5: 256,
        dc4: 192,
        dc3: 128,
        dc2a: 96,
        dc2b: 96,
        dc1a: 64,
        dc1b: 64,
    };

    pub const UNET_XL: Self = Self {
        ec1: 96,
        ec2: 128,
        ec3: 192,
        ec4: 256,
        ec5: 384,
        dc4: 256,
        dc3: 192,
        dc2a: 128,
        dc2b: 128,
        dc1a: 96,
        dc1b: 96,
    };
}
