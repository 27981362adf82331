//! Change and condition reports over acquired composites

use crate::acquisition::{Acquisition, ImageryProvider};
use serde::Serialize;
use terrawatch_algorithms::imagery::{
    analyze_moisture, analyze_vegetation, aoi_mask, detect_forest_change, detect_urban_sprawl,
    detect_water, MoistureAnalysis, VegetationAnalysis,
};
use terrawatch_core::{AreaOfInterest, Band, DateRange, ImageComposite, Raster, Result};
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForestChangeReport {
    pub old_period: String,
    pub new_period: String,
    pub scale_m: f64,
    pub old_forest_km2: f64,
    pub new_forest_km2: f64,
    pub net_change_km2: f64,
    pub change_percentage: f64,
    pub loss_km2: f64,
    pub gain_km2: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrbanSprawlReport {
    pub old_period: String,
    pub new_period: String,
    pub scale_m: f64,
    pub old_urban_km2: f64,
    pub new_urban_km2: f64,
    pub growth_km2: f64,
    pub growth_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterReport {
    pub period: String,
    pub scale_m: f64,
    pub water_area_km2: f64,
    pub water_area_m2: f64,
    pub ndwi_threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VegetationReport {
    pub period: String,
    pub scale_m: f64,
    #[serde(flatten)]
    pub analysis: VegetationAnalysis,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoistureReport {
    pub period: String,
    pub scale_m: f64,
    #[serde(flatten)]
    pub analysis: MoistureAnalysis,
}

/// Runs each analysis end to end: acquire, compute, summarize
pub struct ChangeAnalysis<P> {
    acquisition: Acquisition<P>,
}

/// Pixel-centre AOI mask, only meaningful for composites in geographic coordinates
fn region_mask(composite: &ImageComposite, aoi: &AreaOfInterest) -> Option<Raster<u8>> {
    composite
        .crs()
        .filter(|crs| crs.is_geographic())
        .map(|_| aoi_mask(composite.template(), aoi))
}

impl<P: ImageryProvider> ChangeAnalysis<P> {
    pub fn new(acquisition: Acquisition<P>) -> Self {
        Self { acquisition }
    }

    pub fn acquisition(&self) -> &Acquisition<P> {
        &self.acquisition
    }

    fn acquire(&self, aoi: &AreaOfInterest, period: &DateRange, bands: &[Band]) -> Result<(ImageComposite, f64)> {
        let acquired = self.acquisition.acquire(aoi, period, bands)?;
        Ok((acquired.composite, acquired.request.scale_m))
    }

    /// Both periods on one grid, with the scale they share
    fn acquire_pair(
        &self,
        aoi: &AreaOfInterest,
        old: &DateRange,
        new: &DateRange,
        bands: &[Band],
    ) -> Result<(ImageComposite, ImageComposite, f64)> {
        let (first, second) = self.acquisition.acquire_pair(aoi, old, new, bands)?;
        Ok((first.composite, second.composite, first.request.scale_m))
    }

    pub fn forest_change(&self, aoi: &AreaOfInterest, old: &DateRange, new: &DateRange) -> Result<ForestChangeReport> {
        let bands = [Band::Red, Band::Nir];
        let (old_composite, new_composite, scale_m) = self.acquire_pair(aoi, old, new, &bands)?;
        let change = detect_forest_change(&old_composite, &new_composite)?;
        info!(loss_km2 = change.loss_km2, gain_km2 = change.gain_km2, "forest change computed");

        Ok(ForestChangeReport {
            old_period: old.to_string(),
            new_period: new.to_string(),
            scale_m,
            old_forest_km2: change.change.old_km2,
            new_forest_km2: change.change.new_km2,
            net_change_km2: change.change.delta_km2,
            change_percentage: change.change.percentage_change,
            loss_km2: change.loss_km2,
            gain_km2: change.gain_km2,
        })
    }

    pub fn urban_sprawl(&self, aoi: &AreaOfInterest, old: &DateRange, new: &DateRange) -> Result<UrbanSprawlReport> {
        let bands = [Band::Red, Band::Nir, Band::Swir];
        let (old_composite, new_composite, scale_m) = self.acquire_pair(aoi, old, new, &bands)?;
        let sprawl = detect_urban_sprawl(&old_composite, &new_composite)?;
        info!(growth_km2 = sprawl.growth_km2, "urban sprawl computed");

        Ok(UrbanSprawlReport {
            old_period: old.to_string(),
            new_period: new.to_string(),
            scale_m,
            old_urban_km2: sprawl.change.old_km2,
            new_urban_km2: sprawl.change.new_km2,
            growth_km2: sprawl.growth_km2,
            growth_percentage: sprawl.growth_percentage,
        })
    }

    pub fn water_bodies(&self, aoi: &AreaOfInterest, period: &DateRange) -> Result<WaterReport> {
        let (composite, scale_m) = self.acquire(aoi, period, &[Band::Green, Band::Nir])?;
        let water = detect_water(&composite)?;
        Ok(WaterReport {
            period: period.to_string(),
            scale_m,
            water_area_km2: water.area_km2,
            water_area_m2: water.area_m2,
            ndwi_threshold: water.ndwi_threshold,
        })
    }

    pub fn vegetation(&self, aoi: &AreaOfInterest, period: &DateRange) -> Result<VegetationReport> {
        let (composite, scale_m) = self.acquire(aoi, period, &[Band::Red, Band::Nir])?;
        let mask = region_mask(&composite, aoi);
        Ok(VegetationReport {
            period: period.to_string(),
            scale_m,
            analysis: analyze_vegetation(&composite, mask.as_ref())?,
        })
    }

    pub fn soil_moisture(&self, aoi: &AreaOfInterest, period: &DateRange) -> Result<MoistureReport> {
        let (composite, scale_m) = self.acquire(aoi, period, &[Band::Nir, Band::Swir])?;
        let mask = region_mask(&composite, aoi);
        Ok(MoistureReport {
            period: period.to_string(),
            scale_m,
            analysis: analyze_moisture(&composite, mask.as_ref())?,
        })
    }
}
