//! Imagery acquisition
//!
//! Providers sit behind [`ImageryProvider`]. [`Acquisition`] picks the export
//! scale and applies the fallback policy: when no imagery matches it retries
//! once with the relaxed cloud ceiling, and when the provider rejects the
//! export as too large it retries once at the next coarser ladder rung. Any
//! other error is returned unchanged.

use serde::Serialize;
use terrawatch_algorithms::scale::{ScaleChoice, ScaleSelector, ScaleSource};
use terrawatch_core::{AreaOfInterest, Band, DateRange, Error, ImageComposite, Result};
use tracing::{info, warn};

/// One composite request as sent to a provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeRequest {
    pub aoi: AreaOfInterest,
    pub date_range: DateRange,
    /// Maximum scene cloud cover, percent
    pub cloud_ceiling: f64,
    pub bands: Vec<Band>,
    /// Export resolution, metres per pixel
    pub scale_m: f64,
}

/// Source of multi-band composites
pub trait ImageryProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Fixed sensor resolution; `None` lets the ladder decide
    fn native_resolution(&self) -> Option<f64> {
        None
    }

    fn size_estimate(&self, aoi: &AreaOfInterest) -> Result<f64> {
        Ok(aoi.area_km2())
    }

    /// `ProviderUnavailable` when nothing matches, `SizeLimitExceeded` when
    /// the export is too large at the requested scale
    fn fetch_composite(&self, request: &CompositeRequest) -> Result<ImageComposite>;
}

/// A composite together with how it was obtained
#[derive(Debug, Clone)]
pub struct AcquiredComposite {
    pub composite: ImageComposite,
    pub scale: ScaleChoice,
    /// Request that finally succeeded
    pub request: CompositeRequest,
    pub relaxed_clouds: bool,
    pub coarsened: bool,
}

/// Scale selection plus the retry policy around one provider
pub struct Acquisition<P> {
    provider: P,
    selector: ScaleSelector,
    cloud_ceiling: f64,
    relaxed_cloud_ceiling: f64,
}

impl<P: ImageryProvider> Acquisition<P> {
    pub fn new(provider: P, selector: ScaleSelector) -> Self {
        Self {
            provider,
            selector,
            cloud_ceiling: 20.0,
            relaxed_cloud_ceiling: 50.0,
        }
    }

    pub fn with_cloud_ceilings(mut self, ceiling: f64, relaxed: f64) -> Self {
        self.cloud_ceiling = ceiling;
        self.relaxed_cloud_ceiling = relaxed.max(ceiling);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Scale for an AOI, honouring a provider's native resolution
    pub fn select_scale(&self, aoi: &AreaOfInterest) -> Result<ScaleChoice> {
        let area = self.provider.size_estimate(aoi)?;
        match self.provider.native_resolution() {
            Some(resolution) => ScaleSelector::native(resolution).select(area),
            None => self.selector.select(area),
        }
    }

    pub fn acquire(&self, aoi: &AreaOfInterest, date_range: &DateRange, bands: &[Band]) -> Result<AcquiredComposite> {
        let scale = self.select_scale(aoi)?;
        self.fetch(aoi, date_range, bands, scale, false)
    }

    /// Both periods of a change analysis on one grid.
    ///
    /// The later period is fetched at the scale the earlier one settled on. If
    /// it only fits at a coarser rung, both periods are fetched again there.
    pub fn acquire_pair(
        &self,
        aoi: &AreaOfInterest,
        old: &DateRange,
        new: &DateRange,
        bands: &[Band],
    ) -> Result<(AcquiredComposite, AcquiredComposite)> {
        let first = self.acquire(aoi, old, bands)?;
        match self.fetch(aoi, new, bands, first.scale, true) {
            Ok(second) => Ok((first, second)),
            Err(Error::SizeLimitExceeded { side_pixels, ceiling })
                if !first.coarsened && first.scale.source == ScaleSource::Ladder =>
            {
                let scale = self.coarsen(first.scale)?;
                warn!(
                    provider = self.provider.name(),
                    side_pixels,
                    ceiling,
                    to_m = scale.scale_m,
                    period = %new,
                    "later period too large, refetching both periods at a coarser scale"
                );
                let mut first = self.fetch(aoi, old, bands, scale, true)?;
                let mut second = self.fetch(aoi, new, bands, scale, true)?;
                first.coarsened = true;
                second.coarsened = true;
                Ok((first, second))
            }
            Err(e) => Err(e),
        }
    }

    /// Next ladder rung up, with the export side rescaled
    fn coarsen(&self, scale: ScaleChoice) -> Result<ScaleChoice> {
        let next = self.selector.coarser(scale.scale_m)?;
        Ok(ScaleChoice {
            scale_m: next,
            side_pixels: (scale.side_pixels as f64 * scale.scale_m / next).ceil() as u64,
            ..scale
        })
    }

    /// Request at `scale` with the cloud fallback, and the scale fallback unless `pinned`
    fn fetch(
        &self,
        aoi: &AreaOfInterest,
        date_range: &DateRange,
        bands: &[Band],
        mut scale: ScaleChoice,
        pinned: bool,
    ) -> Result<AcquiredComposite> {
        let mut request = CompositeRequest {
            aoi: *aoi,
            date_range: *date_range,
            cloud_ceiling: self.cloud_ceiling,
            bands: bands.to_vec(),
            scale_m: scale.scale_m,
        };
        let (mut relaxed_clouds, mut coarsened) = (false, false);

        loop {
            match self.provider.fetch_composite(&request) {
                Ok(composite) => {
                    info!(
                        provider = self.provider.name(),
                        scale_m = request.scale_m,
                        cloud_ceiling = request.cloud_ceiling,
                        period = %date_range,
                        "composite acquired"
                    );
                    return Ok(AcquiredComposite {
                        composite,
                        scale,
                        request,
                        relaxed_clouds,
                        coarsened,
                    });
                }
                Err(Error::ProviderUnavailable(reason))
                    if !relaxed_clouds && self.relaxed_cloud_ceiling > request.cloud_ceiling =>
                {
                    warn!(
                        provider = self.provider.name(),
                        %reason,
                        ceiling = self.relaxed_cloud_ceiling,
                        "no imagery matched, relaxing cloud filter"
                    );
                    request.cloud_ceiling = self.relaxed_cloud_ceiling;
                    relaxed_clouds = true;
                }
                Err(Error::SizeLimitExceeded { side_pixels, ceiling })
                    if !pinned && !coarsened && scale.source == ScaleSource::Ladder =>
                {
                    let next = self.coarsen(scale)?;
                    warn!(
                        provider = self.provider.name(),
                        side_pixels,
                        ceiling,
                        from_m = request.scale_m,
                        to_m = next.scale_m,
                        "export too large, retrying at a coarser scale"
                    );
                    scale = next;
                    request.scale_m = next.scale_m;
                    coarsened = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory provider
// ---------------------------------------------------------------------------

/// Serves composites from a fixed catalogue, for tests and offline runs.
///
/// A composite matches when its date range overlaps the request and its
/// cloud cover (0 when unknown) is within the ceiling; the clearest match
/// wins. With an export limit set, requests whose square side exceeds it at
/// the requested scale fail with `SizeLimitExceeded`.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    catalogue: Vec<ImageComposite>,
    native_resolution: Option<f64>,
    max_side_pixels: Option<u64>,
}

impl StaticProvider {
    pub fn new(catalogue: Vec<ImageComposite>) -> Self {
        Self {
            catalogue,
            ..Self::default()
        }
    }

    pub fn with_native_resolution(mut self, resolution_m: f64) -> Self {
        self.native_resolution = Some(resolution_m);
        self
    }

    pub fn with_export_limit(mut self, max_side_pixels: u64) -> Self {
        self.max_side_pixels = Some(max_side_pixels);
        self
    }

    fn select_bands(composite: &ImageComposite, bands: &[Band]) -> Result<ImageComposite> {
        let selected = bands
            .iter()
            .map(|&band| composite.band(band).map(|r| (band, r.clone())))
            .collect::<Result<Vec<_>>>()?;
        let mut out = ImageComposite::new(selected)?;
        if let Some(range) = composite.date_range() {
            out = out.with_date_range(*range);
        }
        if let Some(cloud) = composite.cloud_cover() {
            out = out.with_cloud_cover(cloud);
        }
        Ok(out)
    }
}

impl ImageryProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn native_resolution(&self) -> Option<f64> {
        self.native_resolution
    }

    fn fetch_composite(&self, request: &CompositeRequest) -> Result<ImageComposite> {
        if let Some(limit) = self.max_side_pixels {
            let side = ((request.aoi.area_km2() * 1e6).sqrt() / request.scale_m).ceil() as u64;
            if side > limit {
                return Err(Error::SizeLimitExceeded {
                    side_pixels: side,
                    ceiling: limit,
                });
            }
        }

        self.catalogue
            .iter()
            .filter(|c| c.date_range().map_or(true, |r| r.overlaps(&request.date_range)))
            .filter(|c| c.cloud_cover().unwrap_or(0.0) <= request.cloud_ceiling)
            .min_by(|a, b| {
                a.cloud_cover()
                    .unwrap_or(0.0)
                    .total_cmp(&b.cloud_cover().unwrap_or(0.0))
            })
            .ok_or_else(|| {
                Error::ProviderUnavailable(format!(
                    "no imagery for {} under {}% cloud cover",
                    request.date_range, request.cloud_ceiling
                ))
            })
            .and_then(|c| Self::select_bands(c, &request.bands))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrawatch_core::{GeoTransform, Raster};

    fn scene(cloud: f64, start: &str, end: &str) -> ImageComposite {
        let band = |v: f64| {
            let mut r = Raster::filled(4, 4, v);
            r.set_transform(GeoTransform::new(0.0, 4.0, 1.0, -1.0));
            r
        };
        ImageComposite::new(vec![(Band::Red, band(0.1)), (Band::Nir, band(0.5)), (Band::Swir, band(0.2))])
            .unwrap()
            .with_date_range(DateRange::parse(start, end).unwrap())
            .with_cloud_cover(cloud)
    }

    fn aoi() -> AreaOfInterest {
        AreaOfInterest::new(40.45, 40.40, -3.65, -3.70).unwrap()
    }

    fn period() -> DateRange {
        DateRange::parse("2023-06-01", "2023-08-31").unwrap()
    }

    #[test]
    fn picks_clearest_scene_and_requested_bands() {
        let provider = StaticProvider::new(vec![
            scene(15.0, "2023-06-01", "2023-06-30"),
            scene(5.0, "2023-07-01", "2023-07-31"),
            scene(1.0, "2019-07-01", "2019-07-31"),
        ]);
        let got = Acquisition::new(provider, ScaleSelector::default())
            .acquire(&aoi(), &period(), &[Band::Nir, Band::Red])
            .unwrap();

        assert_eq!(got.composite.cloud_cover(), Some(5.0));
        assert_eq!(got.composite.bands(), vec![Band::Nir, Band::Red]);
        assert_eq!(got.scale.scale_m, 10.0);
        assert!(!got.relaxed_clouds && !got.coarsened);
    }

    #[test]
    fn relaxes_cloud_ceiling_once() {
        let provider = StaticProvider::new(vec![scene(35.0, "2023-06-01", "2023-06-30")]);
        let got = Acquisition::new(provider, ScaleSelector::default())
            .acquire(&aoi(), &period(), &[Band::Red])
            .unwrap();
        assert!(got.relaxed_clouds);
        assert_eq!(got.request.cloud_ceiling, 50.0);

        let cloudy = StaticProvider::new(vec![scene(80.0, "2023-06-01", "2023-06-30")]);
        let err = Acquisition::new(cloudy, ScaleSelector::default())
            .acquire(&aoi(), &period(), &[Band::Red])
            .unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable(_)));
    }

    #[test]
    fn coarsens_scale_once() {
        // ~23.6 km² -> side ~4.86 km: 486 px at 10 m, 163 px at 30 m
        let provider = StaticProvider::new(vec![scene(5.0, "2023-06-01", "2023-06-30")]).with_export_limit(200);
        let got = Acquisition::new(provider, ScaleSelector::default())
            .acquire(&aoi(), &period(), &[Band::Red])
            .unwrap();
        assert!(got.coarsened);
        assert_eq!(got.request.scale_m, 30.0);

        let tiny_limit = StaticProvider::new(vec![scene(5.0, "2023-06-01", "2023-06-30")]).with_export_limit(10);
        let err = Acquisition::new(tiny_limit, ScaleSelector::default())
            .acquire(&aoi(), &period(), &[Band::Red])
            .unwrap_err();
        assert!(matches!(err, Error::SizeLimitExceeded { .. }));
    }

    /// Rejects exports of one period finer than `min_scale_m`
    struct PeriodLimited {
        inner: StaticProvider,
        period_start: &'static str,
        min_scale_m: f64,
    }

    impl ImageryProvider for PeriodLimited {
        fn name(&self) -> &str {
            "period-limited"
        }

        fn fetch_composite(&self, request: &CompositeRequest) -> Result<ImageComposite> {
            if request.date_range.start().to_string() == self.period_start && request.scale_m < self.min_scale_m {
                return Err(Error::SizeLimitExceeded {
                    side_pixels: 40_000,
                    ceiling: 30_000,
                });
            }
            self.inner.fetch_composite(request)
        }
    }

    #[test]
    fn pair_shares_the_coarser_scale() {
        let provider = PeriodLimited {
            inner: StaticProvider::new(vec![
                scene(5.0, "2019-06-01", "2019-08-31"),
                scene(5.0, "2023-06-01", "2023-08-31"),
            ]),
            period_start: "2023-06-01",
            min_scale_m: 30.0,
        };
        let old = DateRange::parse("2019-06-01", "2019-08-31").unwrap();
        let (first, second) = Acquisition::new(provider, ScaleSelector::default())
            .acquire_pair(&aoi(), &old, &period(), &[Band::Red, Band::Nir])
            .unwrap();

        assert_eq!(first.request.scale_m, 30.0);
        assert_eq!(second.request.scale_m, 30.0);
        assert_eq!(first.scale, second.scale);
        assert!(first.coarsened && second.coarsened);
        assert_eq!(first.composite.date_range(), Some(&old));
    }

    #[test]
    fn pair_keeps_the_first_scale_when_both_fit() {
        let provider = StaticProvider::new(vec![
            scene(5.0, "2019-06-01", "2019-08-31"),
            scene(5.0, "2023-06-01", "2023-08-31"),
        ])
        .with_export_limit(200);
        let old = DateRange::parse("2019-06-01", "2019-08-31").unwrap();
        let (first, second) = Acquisition::new(provider, ScaleSelector::default())
            .acquire_pair(&aoi(), &old, &period(), &[Band::Red])
            .unwrap();
        assert_eq!(first.scale, second.scale);
        assert_eq!(second.request.scale_m, 30.0);
    }

    #[test]
    fn native_resolution_bypasses_ladder() {
        let provider = StaticProvider::new(vec![scene(5.0, "2023-06-01", "2023-06-30")]).with_native_resolution(250.0);
        let got = Acquisition::new(provider, ScaleSelector::default())
            .acquire(&aoi(), &period(), &[Band::Red])
            .unwrap();
        assert_eq!(got.scale.scale_m, 250.0);
        assert_eq!(got.scale.source, ScaleSource::Native);
    }

    #[test]
    fn missing_band_propagates() {
        let provider = StaticProvider::new(vec![scene(5.0, "2023-06-01", "2023-06-30")]);
        let err = Acquisition::new(provider, ScaleSelector::default())
            .acquire(&aoi(), &period(), &[Band::Blue])
            .unwrap_err();
        assert!(matches!(err, Error::MissingBand(_)));
    }
}
