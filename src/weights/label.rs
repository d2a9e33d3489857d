use core::fmt;

use crate::{
    error::{DenoiseError, Result},
    schedule::ModelKind,
};

/// Speed/quality trade-off of a weight set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Fast,
    #[default]
    Balanced,
    High,
}

/// Weight sets trained with a `_small` variant.
const HAS_SMALL: &[&str] = &[
    "rt_hdr",
    "rt_ldr",
    "rt_hdr_alb",
    "rt_ldr_alb",
    "rt_hdr_alb_nrm",
    "rt_ldr_alb_nrm",
    "rt_hdr_calb_cnrm",
    "rt_ldr_calb_cnrm",
];

/// Weight sets trained with a `_large` variant.
const HAS_LARGE: &[&str] = &["rt_alb", "rt_nrm", "rt_hdr_calb_cnrm", "rt_ldr_calb_cnrm"];

/// Which inputs a weight set is selected for.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WeightSetRequest {
    /// Filter family prefix, e.g. `rt`.
    pub filter: String,
    /// Denoise a color image (`hdr`/`ldr`) rather than a lone auxiliary image.
    pub color: bool,
    pub hdr: bool,
    pub albedo: bool,
    pub normal: bool,
    /// Albedo and normal are noise free; only honored when both are present.
    pub clean_aux: bool,
    pub quality: Quality,
}

impl Default for WeightSetRequest {
    fn default() -> Self {
        Self {
            filter: "rt".into(),
            color: true,
            hdr: false,
            albedo: false,
            normal: false,
            clean_aux: false,
            quality: Quality::Balanced,
        }
    }
}

/// Resolved weight set name and the network it was trained for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightSet {
    pub label: String,
    pub kind: ModelKind,
}

impl WeightSet {
    pub fn resolve(request: &WeightSetRequest) -> Result<Self> {
        let mut base = request.filter.clone();

        if request.color {
            base.push_str(if request.hdr { "_hdr" } else { "_ldr" });
            if request.albedo && request.normal && request.clean_aux {
                base.push_str("_calb_cnrm");
            } else {
                if request.albedo {
                    base.push_str("_alb");
                }
                if request.normal {
                    base.push_str("_nrm");
                }
            }
        } else {
            match (request.albedo, request.normal) {
                (true, false) => base.push_str("_alb"),
                (false, true) => base.push_str("_nrm"),
                _ => {
                    return Err(DenoiseError::Configuration(
                        "an auxiliary weight set needs exactly one of albedo or normal".into(),
                    ))
                }
            }
        }

        let (label, kind) = match request.quality {
            Quality::Fast if HAS_SMALL.contains(&base.as_str()) => {
                (format!("{base}_small"), ModelKind::UnetSmall)
            }
            Quality::High if HAS_LARGE.contains(&base.as_str()) => {
                (format!("{base}_large"), ModelKind::UnetLarge)
            }
            _ => (base, ModelKind::Unet),
        };

        Ok(Self { label, kind })
    }

    /// File name of the weights blob.
    pub fn file_name(&self) -> String {
        format!("{}.tza", self.label)
    }
}

impl fmt::Display for WeightSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.kind)
    }
}
