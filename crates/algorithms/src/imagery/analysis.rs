//! Condition summaries: vegetation health and soil moisture

use super::{msi, ndmi, ndvi, reduce_region, RegionStats};
use crate::rules::DecisionList;
use serde::{Deserialize, Serialize};
use std::fmt;
use terrawatch_core::raster::Raster;
use terrawatch_core::{Band, ImageComposite, Result};

/// Vegetation condition from mean NDVI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VegetationHealth {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl VegetationHealth {
    pub fn description(&self) -> &'static str {
        match self {
            VegetationHealth::Poor => "Poor (Barren/Urban)",
            VegetationHealth::Fair => "Fair (Sparse Vegetation)",
            VegetationHealth::Good => "Good (Moderate Vegetation)",
            VegetationHealth::Excellent => "Excellent (Dense Vegetation)",
        }
    }

    pub fn from_mean_ndvi(mean: f64) -> Self {
        vegetation_health_rules().evaluate(&mean)
    }
}

impl fmt::Display for VegetationHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Breakpoints over mean NDVI
pub fn vegetation_health_rules() -> DecisionList<f64, VegetationHealth> {
    DecisionList::<f64, VegetationHealth>::new(VegetationHealth::Excellent)
        .rule("ndvi_below_0.2", |v| *v < 0.2, VegetationHealth::Poor)
        .rule("ndvi_below_0.4", |v| *v < 0.4, VegetationHealth::Fair)
        .rule("ndvi_below_0.6", |v| *v < 0.6, VegetationHealth::Good)
}

/// Soil moisture class from mean NDMI and MSI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoistureStatus {
    High,
    Moderate,
    Low,
    VeryDry,
}

impl MoistureStatus {
    pub fn description(&self) -> &'static str {
        match self {
            MoistureStatus::High => "High Moisture",
            MoistureStatus::Moderate => "Moderate Moisture",
            MoistureStatus::Low => "Low Moisture",
            MoistureStatus::VeryDry => "Very Dry",
        }
    }

    pub fn classify(mean_ndmi: f64, mean_msi: f64) -> Self {
        moisture_rules().evaluate(&(mean_ndmi, mean_msi))
    }
}

impl fmt::Display for MoistureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Breakpoints over (mean NDMI, mean MSI); either index can qualify a class
pub fn moisture_rules() -> DecisionList<(f64, f64), MoistureStatus> {
    DecisionList::<(f64, f64), MoistureStatus>::new(MoistureStatus::VeryDry)
        .rule("high", |(ndmi, msi)| *ndmi > 0.4 || *msi < 0.5, MoistureStatus::High)
        .rule("moderate", |(ndmi, msi)| *ndmi > 0.2 || *msi < 0.8, MoistureStatus::Moderate)
        .rule("low", |(ndmi, msi)| *ndmi > 0.0 || *msi < 1.2, MoistureStatus::Low)
}

/// NDVI statistics and the derived health class
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VegetationAnalysis {
    pub ndvi: Option<RegionStats>,
    pub health: VegetationHealth,
    pub health_description: &'static str,
}

/// NDMI and MSI statistics and the derived moisture class
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoistureAnalysis {
    pub ndmi: Option<RegionStats>,
    pub msi: Option<RegionStats>,
    pub status: MoistureStatus,
    pub status_description: &'static str,
}

/// Mean of a region, 0 when the region holds no valid pixel
fn mean_or_zero(stats: &Option<RegionStats>) -> f64 {
    stats.map_or(0.0, |s| s.mean)
}

pub fn analyze_vegetation(
    composite: &ImageComposite,
    mask: Option<&Raster<u8>>,
) -> Result<VegetationAnalysis> {
    let index = ndvi(composite.band(Band::Nir)?, composite.band(Band::Red)?)?;
    let stats = reduce_region(&index, mask)?;
    let health = VegetationHealth::from_mean_ndvi(mean_or_zero(&stats));
    Ok(VegetationAnalysis {
        ndvi: stats,
        health,
        health_description: health.description(),
    })
}

pub fn analyze_moisture(
    composite: &ImageComposite,
    mask: Option<&Raster<u8>>,
) -> Result<MoistureAnalysis> {
    let nir = composite.band(Band::Nir)?;
    let swir = composite.band(Band::Swir)?;
    let ndmi_stats = reduce_region(&ndmi(nir, swir)?, mask)?;
    let msi_stats = reduce_region(&msi(swir, nir)?, mask)?;
    let status = MoistureStatus::classify(mean_or_zero(&ndmi_stats), mean_or_zero(&msi_stats));
    Ok(MoistureAnalysis {
        ndmi: ndmi_stats,
        msi: msi_stats,
        status,
        status_description: status.description(),
    })
}
