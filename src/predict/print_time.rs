//! Print-time estimation from STL geometry plus print parameters.

use crate::error::PredictError;
use crate::features::stl::StlMetrics;
use crate::models::FamilyMetadata;
use crate::predict::artifact::LinearModel;
use crate::predict::PredictionOutcome;
use serde_json::json;
use std::collections::HashMap;

/// Symmetric confidence margin applied to the estimate.
pub const CONFIDENCE_MARGIN: f64 = 0.15;

pub const MAX_STL_BYTES: usize = 50 * 1024 * 1024;

pub const MATERIALS: [&str; 8] = ["PLA", "ABS", "PETG", "TPU", "Nylon", "HIPS", "ASA", "PC"];

#[derive(Debug, Clone)]
pub struct PrintTimeRequest {
    /// Raw binary STL payload.
    pub geometry: Vec<u8>,
    pub file_name: String,
    pub material: String,
    /// Material density in g/cm3.
    pub density: f64,
    pub printer_model: String,
    /// mm/s.
    pub print_speed: f64,
    /// mm.
    pub layer_height: f64,
    /// Celsius.
    pub nozzle_temperature: f64,
    /// Celsius.
    pub bed_temperature: f64,
    /// Percent.
    pub infill_percentage: f64,
}

impl PrintTimeRequest {
    pub fn validate(&self) -> Result<(), PredictError> {
        let mut errors = Vec::new();

        if self.geometry.is_empty() {
            errors.push("geometry payload is empty".to_string());
        }
        if self.geometry.len() > MAX_STL_BYTES {
            errors.push(format!(
                "geometry payload {} bytes exceeds {} byte limit",
                self.geometry.len(),
                MAX_STL_BYTES
            ));
        }
        if !self.file_name.to_lowercase().ends_with(".stl") {
            errors.push(format!("file {} must have .stl extension", self.file_name));
        }
        if !MATERIALS.contains(&self.material.as_str()) {
            errors.push(format!(
                "material {} not supported (expected one of {})",
                self.material,
                MATERIALS.join(", ")
            ));
        }
        if !(self.density > 0.0 && self.density <= 20.0) {
            errors.push(format!("density {} must be in (0, 20] g/cm3", self.density));
        }
        if self.printer_model.is_empty() || self.printer_model.len() > 100 {
            errors.push("printer model must be 1-100 characters".to_string());
        }
        if !(self.print_speed > 0.0 && self.print_speed <= 500.0) {
            errors.push(format!("print speed {} must be in (0, 500] mm/s", self.print_speed));
        }
        if !(self.layer_height > 0.0 && self.layer_height <= 1.0) {
            errors.push(format!("layer height {} must be in (0, 1] mm", self.layer_height));
        }
        if !(150.0..=300.0).contains(&self.nozzle_temperature) {
            errors.push(format!(
                "nozzle temperature {} must be in [150, 300] C",
                self.nozzle_temperature
            ));
        }
        if !(0.0..=150.0).contains(&self.bed_temperature) {
            errors.push(format!(
                "bed temperature {} must be in [0, 150] C",
                self.bed_temperature
            ));
        }
        if !(0.0..=100.0).contains(&self.infill_percentage) {
            errors.push(format!(
                "infill {} must be in [0, 100] percent",
                self.infill_percentage
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PredictError::Validation(errors))
        }
    }

    /// Cache-key inputs. The geometry contributes its byte hash so hits
    /// never pay for a mesh parse.
    pub fn fingerprint_inputs(&self, geometry_sha256: &str) -> serde_json::Value {
        json!({
            "stl_sha256": geometry_sha256,
            "material": self.material,
            "density": self.density,
            "printer_model": self.printer_model,
            "print_speed": self.print_speed,
            "layer_height": self.layer_height,
            "nozzle_temperature": self.nozzle_temperature,
            "bed_temperature": self.bed_temperature,
            "infill_percentage": self.infill_percentage,
        })
    }
}

/// Model feature vector for one request.
pub fn feature_vector(req: &PrintTimeRequest, metrics: &StlMetrics) -> HashMap<String, f64> {
    HashMap::from([
        ("volume".to_string(), metrics.volume),
        ("surface_area".to_string(), metrics.surface_area),
        ("layer_count".to_string(), metrics.layer_count as f64),
        ("support_pct".to_string(), metrics.support_pct),
        ("complexity".to_string(), metrics.complexity),
        ("print_speed".to_string(), req.print_speed),
        ("layer_height".to_string(), req.layer_height),
        ("infill_pct".to_string(), req.infill_percentage),
        ("density".to_string(), req.density),
    ])
}

pub fn predict(
    model: &LinearModel,
    req: &PrintTimeRequest,
    metrics: &StlMetrics,
) -> Result<PredictionOutcome, PredictError> {
    let features = feature_vector(req, metrics);
    let raw = model.predict(&features);
    if !raw.is_finite() {
        return Err(PredictError::Internal(format!(
            "print-time model produced non-finite estimate {raw}"
        )));
    }
    let predicted = raw.max(0.0);
    let margin = predicted * CONFIDENCE_MARGIN;

    let explanation = format!(
        "Estimated {:.0} min: volume {:.1} across {} layers, {:.0}% support, \
         complexity {:.0}/100, at {:.0} mm/s and {:.0}% infill",
        predicted,
        metrics.volume,
        metrics.layer_count,
        metrics.support_pct,
        metrics.complexity,
        req.print_speed,
        req.infill_percentage,
    );

    Ok(PredictionOutcome {
        predicted,
        unit: "minutes".to_string(),
        lower: (predicted - margin).max(0.0),
        upper: predicted + margin,
        explanation,
        metadata: FamilyMetadata::PrintTime {
            triangle_count: metrics.triangle_count,
            volume: metrics.volume,
            surface_area: metrics.surface_area,
            layer_count: metrics.layer_count,
            support_pct: metrics.support_pct,
            complexity: metrics.complexity,
            material: req.material.clone(),
            infill_pct: req.infill_percentage,
        },
    })
}
