use uom::si::{area::square_millimeter, f64::Area};

use crate::geometry::{RearExposure, TiltedModule};
use crate::shading::{trace, SampleDensity, SegmentExposure};
use crate::tools::round_to;
use crate::tools::sun::SunVector;

/// Decimal places of reported areas (in mm^2)
const AREA_PRECISION: i32 = 3;
/// Decimal places of the reported incidence cosine
const COSINE_PRECISION: i32 = 4;

/// Areas of one cell split into the four illumination buckets.
///
/// `direct + shaded` is the front area; exactly one of the rear buckets is non-zero.
#[derive(Clone, Debug, PartialEq)]
pub struct AreaMatrixRow {
    pub cell: String,
    pub direct: Area,
    pub shaded: Area,
    /// Rear side facing the ground, collects reflected light
    pub rear_albedo: Area,
    /// Rear side facing the sky, collects diffuse light only
    pub rear_diffuse: Area,
    pub cosine: f64,
}

impl AreaMatrixRow {
    pub fn total(&self) -> Area {
        self.direct + self.shaded + self.rear_albedo + self.rear_diffuse
    }

    fn from_exposure(
        cell: &str,
        front: Area,
        rear: RearExposure,
        exposure: &SegmentExposure,
    ) -> Self {
        let front_mm2 = front.get::<square_millimeter>();
        let rounded = |value: f64| Area::new::<square_millimeter>(round_to(value, AREA_PRECISION));
        let (rear_albedo, rear_diffuse) = match rear {
            RearExposure::Albedo => (front_mm2, 0.0),
            RearExposure::Diffuse => (0.0, front_mm2),
        };

        AreaMatrixRow {
            cell: cell.to_owned(),
            direct: rounded(exposure.visible_fraction * front_mm2),
            shaded: rounded((1.0 - exposure.visible_fraction) * front_mm2),
            rear_albedo: rounded(rear_albedo),
            rear_diffuse: rounded(rear_diffuse),
            cosine: round_to(exposure.cosine, COSINE_PRECISION),
        }
    }
}

pub type AreaMatrix = Vec<AreaMatrixRow>;

/// Shade the tilted module and split every cell into illumination buckets.
pub fn compute_area_matrix(
    module: &TiltedModule,
    sun: &SunVector,
    density: SampleDensity,
) -> AreaMatrix {
    let height = module.geometry.module_height;
    module
        .cells()
        .map(|(cell, _)| cell)
        .zip(trace(module, sun, density).iter())
        .map(|(cell, exposure)| {
            AreaMatrixRow::from_exposure(&cell.name, cell.front_area(height), cell.rear, exposure)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{CellSegment, ModuleGeometry};
    use approx::assert_abs_diff_eq;
    use test_strategy::proptest;
    use uom::si::{angle::degree, f64::Angle};

    fn deg(value: f64) -> Angle {
        Angle::new::<degree>(value)
    }

    #[test]
    fn overhead_sun_on_flat_reference_module() {
        let geometry = ModuleGeometry::reference();
        let matrix = compute_area_matrix(
            &geometry.at_tilt(deg(0.0)),
            &SunVector::overhead(),
            SampleDensity::reference(),
        );

        assert_eq!(matrix.len(), 8);
        let names: Vec<_> = matrix.iter().map(|r| r.cell.as_str()).collect();
        assert_eq!(names, vec!["C8", "C1", "C4", "C6", "C5", "C7", "C3", "C2"]);

        // C8 is vertical: its normal is horizontal, overhead light grazes it
        assert_eq!(matrix[0].cosine, 0.0);
        // C1 is the horizontal base, covered by the cells above it
        assert_eq!(matrix[1].cosine, 1.0);
        assert!(matrix[1].shaded > matrix[1].direct);
        assert!(matrix[1].shaded.get::<square_millimeter>() > 0.0);
    }

    #[test]
    fn rear_buckets_follow_exposure() {
        let geometry = ModuleGeometry::reference();
        let matrix = compute_area_matrix(
            &geometry.at_tilt(deg(15.0)),
            &SunVector::overhead(),
            SampleDensity::batch(),
        );
        let height = geometry.module_height;
        for (row, cell) in matrix.iter().zip(geometry.cells.iter()) {
            let front = cell.front_area(height).get::<square_millimeter>();
            let albedo = row.rear_albedo.get::<square_millimeter>();
            let diffuse = row.rear_diffuse.get::<square_millimeter>();
            match cell.rear {
                RearExposure::Albedo => {
                    assert_abs_diff_eq!(albedo, front, epsilon = 1e-6);
                    assert_eq!(diffuse, 0.0);
                }
                RearExposure::Diffuse => {
                    assert_eq!(albedo, 0.0);
                    assert_abs_diff_eq!(diffuse, front, epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn area_matrix_is_deterministic() {
        let geometry = ModuleGeometry::reference();
        let module = geometry.at_tilt(deg(35.0));
        let sun = SunVector::from_angles(&deg(50.0), &deg(220.0), &deg(180.0));
        assert_eq!(
            compute_area_matrix(&module, &sun, SampleDensity::batch()),
            compute_area_matrix(&module, &sun, SampleDensity::batch())
        );
    }

    #[proptest]
    fn front_area_is_split_between_direct_and_shaded(
        #[strategy(proptest::collection::vec(proptest::arbitrary::any::<CellSegment>(), 1..8))]
        cells: Vec<CellSegment>,
        #[strategy(0f64..60f64)] tilt: f64,
        #[strategy(0f64..89f64)] zenith: f64,
        #[strategy(90f64..270f64)] azimuth: f64,
    ) {
        let geometry = ModuleGeometry::new(cells, ModuleGeometry::reference().module_height);
        let sun = SunVector::from_angles(&deg(zenith), &deg(azimuth), &deg(180.0));
        let matrix = compute_area_matrix(
            &geometry.at_tilt(deg(tilt)),
            &sun,
            SampleDensity::new(50).unwrap(),
        );

        let height = geometry.module_height;
        for (row, cell) in matrix.iter().zip(geometry.cells.iter()) {
            let front = cell.front_area(height).get::<square_millimeter>();
            let split = (row.direct + row.shaded).get::<square_millimeter>();
            assert_abs_diff_eq!(split, front, epsilon = 2e-3);
            let rear_nonzero = [row.rear_albedo, row.rear_diffuse]
                .iter()
                .filter(|a| a.get::<square_millimeter>() != 0.0)
                .count();
            assert_eq!(rear_nonzero, 1);
        }
    }
}
