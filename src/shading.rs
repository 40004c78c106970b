//! Sampling ray-tracer for self-shading between the cells of one module.
//!
//! Each segment is split into `samples` points; a point is lit when its ray towards
//! the sun misses every other segment. Cost is O(samples * cells^2) per call.

use nalgebra::{Point2, Vector2};

use crate::geometry::{Segment, TiltedModule};
use crate::tools::sun::SunVector;

/// Determinant below which the ray and the segment are treated as parallel
const PARALLEL_EPSILON: f64 = 1e-12;
/// Tolerance on the ray and segment parameters of a hit
const HIT_EPSILON: f64 = 1e-9;

const REFERENCE_SAMPLES: usize = 500;
const BATCH_SAMPLES: usize = 120;

/// Number of sample points per segment.
///
/// The reference tier is used for validation and single evaluations, the batch tier
/// inside sweep loops. Both go through the same tracer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleDensity(usize);

impl SampleDensity {
    pub fn new(samples: usize) -> anyhow::Result<Self> {
        if samples == 0 {
            anyhow::bail!("Sample density must be at least one sample per segment");
        }
        Ok(SampleDensity(samples))
    }

    pub fn reference() -> Self {
        SampleDensity(REFERENCE_SAMPLES)
    }

    pub fn batch() -> Self {
        SampleDensity(BATCH_SAMPLES)
    }

    pub fn samples(&self) -> usize {
        self.0
    }
}

impl Default for SampleDensity {
    fn default() -> Self {
        SampleDensity::batch()
    }
}

/// Shading result for one segment.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SegmentExposure {
    /// Fraction of the sample points with a clear view of the sun, in [0, 1]
    pub visible_fraction: f64,
    /// |normal . light direction| clamped to [0, 1]
    pub cosine: f64,
}

/// Parametric position along the ray where it crosses the segment, if it does.
pub fn ray_hits_segment(
    origin: &Point2<f64>,
    direction: &Vector2<f64>,
    segment: &Segment,
) -> Option<f64> {
    let s = segment.b - segment.a;
    let r_cross_s = direction.perp(&s);
    if r_cross_s.abs() < PARALLEL_EPSILON {
        return None;
    }
    let q_p = segment.a - *origin;
    let t = q_p.perp(&s) / r_cross_s;
    let u = q_p.perp(direction) / r_cross_s;

    if t >= HIT_EPSILON && (-HIT_EPSILON..=1.0 + HIT_EPSILON).contains(&u) {
        Some(t)
    } else {
        None
    }
}

/// Trace every segment of the tilted module against the sun.
/// Entry `i` of the result corresponds to `module.segments[i]`.
pub fn trace(
    module: &TiltedModule,
    sun: &SunVector,
    density: SampleDensity,
) -> Vec<SegmentExposure> {
    if sun.is_degenerate() {
        // No ray can cross a segment and no segment faces the light
        let unlit = SegmentExposure {
            visible_fraction: 1.0,
            cosine: 0.0,
        };
        return vec![unlit; module.segments.len()];
    }

    let to_sun = sun.to_sun();
    let light = sun.light_direction();
    let samples = density.samples();

    module
        .segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            let visible_count = (0..samples)
                .filter(|&k| {
                    let point = segment.point_at((k as f64 + 0.5) / samples as f64);
                    !module
                        .segments
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .any(|(_, other)| ray_hits_segment(&point, &to_sun, other).is_some())
                })
                .count();

            SegmentExposure {
                visible_fraction: visible_count as f64 / samples as f64,
                cosine: segment.normal().dot(&light).abs().clamp(0.0, 1.0),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{CellSegment, ModuleGeometry, RearExposure};
    use approx::assert_abs_diff_eq;
    use test_case::test_case;
    use test_strategy::proptest;
    use uom::si::{
        angle::degree,
        f64::{Angle, Length},
        length::millimeter,
    };

    fn flat(name: &str, y: f64, x0: f64, x1: f64) -> CellSegment {
        CellSegment::new(name, 10.0, [x0, y], [x1, y], RearExposure::Diffuse)
    }

    fn geometry(cells: Vec<CellSegment>) -> ModuleGeometry {
        ModuleGeometry::new(cells, Length::new::<millimeter>(182.0))
    }

    /// A short cell at y = 0 under a wider cell 5 mm above it
    fn occluding_pair() -> ModuleGeometry {
        geometry(vec![flat("low", 0.0, 0.0, 10.0), flat("high", 5.0, -5.0, 15.0)])
    }

    fn deg(value: f64) -> Angle {
        Angle::new::<degree>(value)
    }

    #[test]
    fn ray_hit_in_front() {
        let segment = Segment {
            a: Point2::new(-1.0, 2.0),
            b: Point2::new(1.0, 2.0),
        };
        let t = ray_hits_segment(&Point2::origin(), &Vector2::new(0.0, 1.0), &segment);
        assert_abs_diff_eq!(t.unwrap(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn ray_does_not_hit_behind() {
        let segment = Segment {
            a: Point2::new(-1.0, -2.0),
            b: Point2::new(1.0, -2.0),
        };
        assert_eq!(
            ray_hits_segment(&Point2::origin(), &Vector2::new(0.0, 1.0), &segment),
            None
        );
    }

    #[test]
    fn parallel_ray_never_hits() {
        let segment = Segment {
            a: Point2::new(0.0, 0.0),
            b: Point2::new(0.0, 5.0),
        };
        assert_eq!(
            ray_hits_segment(&Point2::new(0.0, -1.0), &Vector2::new(0.0, 1.0), &segment),
            None
        );
    }

    #[test]
    fn ray_hits_segment_endpoint() {
        let segment = Segment {
            a: Point2::new(0.0, 2.0),
            b: Point2::new(1.0, 2.0),
        };
        assert!(ray_hits_segment(&Point2::origin(), &Vector2::new(0.0, 1.0), &segment).is_some());
    }

    #[test]
    fn zero_density_is_rejected() {
        assert!(SampleDensity::new(0).is_err());
        assert_eq!(SampleDensity::new(80).unwrap().samples(), 80);
    }

    #[test]
    fn isolated_segment_is_fully_visible() {
        let g = geometry(vec![flat("only", 0.0, 0.0, 10.0)]);
        let sun = SunVector::overhead();
        let exposure = trace(&g.at_tilt(deg(0.0)), &sun, SampleDensity::reference());
        assert_eq!(exposure[0].visible_fraction, 1.0);
        assert_abs_diff_eq!(exposure[0].cosine, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_sun_casts_no_shadow() {
        let g = occluding_pair();
        let sun = SunVector::from_components(0.0, 0.0);
        let exposure = trace(&g.at_tilt(deg(0.0)), &sun, SampleDensity::batch());
        assert_eq!(exposure.len(), 2);
        for segment in exposure {
            assert_eq!(segment.visible_fraction, 1.0);
            assert_eq!(segment.cosine, 0.0);
        }
    }

    #[test]
    fn zero_length_segment_contributes_nothing() {
        let g = geometry(vec![
            flat("lit", 0.0, 0.0, 10.0),
            CellSegment::new("dot", 1.0, [5.0, 5.0], [5.0, 5.0], RearExposure::Diffuse),
        ]);
        let sun = SunVector::overhead();
        let exposure = trace(&g.at_tilt(deg(0.0)), &sun, SampleDensity::batch());
        assert_eq!(exposure[0].visible_fraction, 1.0);
        assert_eq!(exposure[1].cosine, 0.0);
    }

    #[test]
    fn occluded_segment_opens_up_as_tilt_increases() {
        let g = occluding_pair();
        let sun = SunVector::overhead();
        let fractions: Vec<f64> = [0.0, 30.0, 50.0, 60.0, 70.0, 80.0]
            .iter()
            .map(|&tilt| trace(&g.at_tilt(deg(tilt)), &sun, SampleDensity::reference()))
            .map(|exposure| exposure[0].visible_fraction)
            .collect();

        assert_abs_diff_eq!(fractions[0], 0.0, epsilon = 1e-12);
        let opening = fractions.windows(2).all(|w| w[0] <= w[1]);
        assert!(opening, "{:?}", fractions);
        assert_abs_diff_eq!(fractions[5], 1.0, epsilon = 1e-12);
        // Analytic value at 60 degrees: (5 tan(60) - 5) / 10
        let analytic = (5.0 * 3f64.sqrt() - 5.0) / 10.0;
        assert_abs_diff_eq!(fractions[3], analytic, epsilon = 0.01);
    }

    #[test_case(0.0, 0.0, 30.0; "flat module, steep sun")]
    #[test_case(20.0, 40.0, 200.0; "tilted, sun off axis")]
    #[test_case(45.0, 70.0, 90.0; "low side sun")]
    #[test_case(60.0, 10.0, 180.0; "steep module")]
    fn reference_and_batch_tiers_agree(tilt: f64, zenith: f64, azimuth: f64) {
        let g = ModuleGeometry::reference();
        let module = g.at_tilt(deg(tilt));
        let sun = SunVector::from_angles(&deg(zenith), &deg(azimuth), &deg(180.0));

        let reference = trace(&module, &sun, SampleDensity::reference());
        let batch = trace(&module, &sun, SampleDensity::batch());

        for (r, b) in reference.iter().zip(batch.iter()) {
            assert_abs_diff_eq!(r.visible_fraction, b.visible_fraction, epsilon = 0.05);
            assert_eq!(r.cosine, b.cosine);
        }
    }

    #[test]
    fn trace_is_deterministic() {
        let g = ModuleGeometry::reference();
        let module = g.at_tilt(deg(25.0));
        let sun = SunVector::from_angles(&deg(35.0), &deg(160.0), &deg(180.0));
        assert_eq!(
            trace(&module, &sun, SampleDensity::batch()),
            trace(&module, &sun, SampleDensity::batch())
        );
    }

    #[proptest]
    fn exposure_stays_in_unit_range(
        #[strategy(proptest::collection::vec(proptest::arbitrary::any::<CellSegment>(), 1..8))]
        cells: Vec<CellSegment>,
        #[strategy(0f64..90f64)] tilt: f64,
        #[strategy(0f64..89f64)] zenith: f64,
        #[strategy(0f64..360f64)] azimuth: f64,
    ) {
        let g = geometry(cells);
        let sun = SunVector::from_angles(&deg(zenith), &deg(azimuth), &deg(180.0));
        for exposure in trace(&g.at_tilt(deg(tilt)), &sun, SampleDensity::new(40).unwrap()) {
            assert!((0.0..=1.0).contains(&exposure.visible_fraction));
            assert!((0.0..=1.0).contains(&exposure.cosine));
        }
    }
}
