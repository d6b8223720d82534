//! Parameter sets handed to the simulation/reconstruction submission.
//!
//! The elastic-scattering parameters are read back from the JSON files the
//! original production wrote next to the data (`sim_params.config`,
//! `reco_params.config`). Fields this crate does not interpret are kept in
//! `extra` so that they round-trip to the submission untouched.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolError;

/// Lower edge of the box-generator polar angle range.
pub const BOX_THETA_MIN_MRAD: f64 = 2.7;
/// Upper edge of the box-generator polar angle range.
pub const BOX_THETA_MAX_MRAD: f64 = 13.0;

/// Run-size parameters shared by simulation and reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneralRunParams {
    pub num_events_per_sample: u64,
    pub num_samples: u64,
    pub lab_momentum: f64,
}

impl GeneralRunParams {
    pub fn new(num_events_per_sample: u64, num_samples: u64, lab_momentum: f64) -> Self {
        Self {
            num_events_per_sample,
            num_samples,
            lab_momentum,
        }
    }
}

/// Event generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    #[serde(default)]
    pub sim_type: String,
    #[serde(default)]
    pub theta_min_in_mrad: f64,
    #[serde(default)]
    pub theta_max_in_mrad: f64,
    #[serde(default)]
    pub num_events_per_sample: u64,
    #[serde(default)]
    pub num_samples: u64,
    #[serde(default)]
    pub lab_momentum: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SimulationParams {
    /// Box-generator parameters over the default polar angle range.
    pub fn box_generator() -> Self {
        Self {
            sim_type: "box".to_string(),
            theta_min_in_mrad: BOX_THETA_MIN_MRAD,
            theta_max_in_mrad: BOX_THETA_MAX_MRAD,
            num_events_per_sample: 0,
            num_samples: 0,
            lab_momentum: 0.0,
            extra: Map::new(),
        }
    }

    /// Widens the polar angle range by `shift` on both sides.
    pub fn widen_theta_range(&mut self, shift: f64) {
        self.theta_min_in_mrad -= shift;
        self.theta_max_in_mrad += shift;
    }

    pub fn apply_general(&mut self, general: &GeneralRunParams) {
        self.num_events_per_sample = general.num_events_per_sample;
        self.num_samples = general.num_samples;
        self.lab_momentum = general.lab_momentum;
    }
}

/// Track reconstruction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionParams {
    #[serde(default)]
    pub use_xy_cut: bool,
    #[serde(default)]
    pub use_m_cut: bool,
    #[serde(default)]
    pub reco_ip_offset: [f64; 3],
    #[serde(default)]
    pub num_events_per_sample: u64,
    #[serde(default)]
    pub num_samples: u64,
    #[serde(default)]
    pub lab_momentum: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ReconstructionParams {
    fn default() -> Self {
        Self {
            use_xy_cut: false,
            use_m_cut: false,
            reco_ip_offset: [0.0; 3],
            num_events_per_sample: 0,
            num_samples: 0,
            lab_momentum: 0.0,
            extra: Map::new(),
        }
    }
}

impl ReconstructionParams {
    /// Enables the xy and m cuts and applies the interaction-point offset.
    pub fn with_ip_cuts(mut self, ip_offset: [f64; 3]) -> Self {
        self.use_xy_cut = true;
        self.use_m_cut = true;
        self.reco_ip_offset = ip_offset;
        self
    }

    pub fn apply_general(&mut self, general: &GeneralRunParams) {
        self.num_events_per_sample = general.num_events_per_sample;
        self.num_samples = general.num_samples;
        self.lab_momentum = general.lab_momentum;
    }
}

/// Detector (mis)alignment parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment_matrices_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misalignment_matrices_path: Option<String>,
    #[serde(default)]
    pub use_point_transform_misalignment: bool,
}

impl AlignmentParams {
    /// Extracts the alignment settings stored alongside reconstruction
    /// parameters, so a re-reconstruction sees the same detector geometry.
    pub fn from_reconstruction(reco: &ReconstructionParams) -> Self {
        let string_field = |key: &str| {
            reco.extra
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            alignment_matrices_path: string_field("alignment_matrices_path"),
            misalignment_matrices_path: string_field("misalignment_matrices_path"),
            use_point_transform_misalignment: reco
                .extra
                .get("use_point_transform_misalignment")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

/// Reads a JSON parameter file.
pub fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ToolError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_box_generator_widening() {
        let mut sim = SimulationParams::box_generator();
        sim.widen_theta_range(0.25);
        assert!((sim.theta_min_in_mrad - 2.45).abs() < 1e-9);
        assert!((sim.theta_max_in_mrad - 13.25).abs() < 1e-9);
    }

    #[test]
    fn test_reconstruction_params_preserve_unknown_fields() {
        let raw = json!({
            "use_xy_cut": false,
            "num_samples": 500,
            "lab_momentum": 1.5,
            "track_search_algorithm": "CA",
            "alignment_matrices_path": "/align/matrices.json"
        });
        let reco: ReconstructionParams = serde_json::from_value(raw).expect("parse");
        assert_eq!(reco.num_samples, 500);
        assert_eq!(reco.extra["track_search_algorithm"], "CA");

        let reco = reco.with_ip_cuts([0.1, -0.2, 0.0]);
        let back = serde_json::to_value(&reco).expect("serialize");
        assert_eq!(back["use_m_cut"], true);
        assert_eq!(back["track_search_algorithm"], "CA");
        assert_eq!(back["reco_ip_offset"], json!([0.1, -0.2, 0.0]));
    }

    #[test]
    fn test_alignment_from_reconstruction() {
        let raw = json!({
            "alignment_matrices_path": "/align/matrices.json",
            "use_point_transform_misalignment": true
        });
        let reco: ReconstructionParams = serde_json::from_value(raw).expect("parse");
        let alignment = AlignmentParams::from_reconstruction(&reco);
        assert_eq!(
            alignment.alignment_matrices_path.as_deref(),
            Some("/align/matrices.json")
        );
        assert!(alignment.misalignment_matrices_path.is_none());
        assert!(alignment.use_point_transform_misalignment);
    }

    #[test]
    fn test_apply_general() {
        let general = GeneralRunParams::new(500_000, 100, 4.06);
        let mut sim = SimulationParams::box_generator();
        sim.apply_general(&general);
        let mut reco = ReconstructionParams::default();
        reco.apply_general(&general);
        assert_eq!(sim.num_samples, 100);
        assert_eq!(reco.num_events_per_sample, 500_000);
        assert!((reco.lab_momentum - 4.06).abs() < f64::EPSILON);
    }
}
