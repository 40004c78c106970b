//! Standard test condition sweep: sun overhead, module rotated through a range of tilts.

use serde::Serialize;
use tracing::info;
use uom::si::{
    angle::degree,
    f64::{Angle, HeatFluxDensity, ThermodynamicTemperature},
    heat_flux_density::watt_per_square_meter,
    thermodynamic_temperature::degree_celsius,
};

use crate::area_matrix::compute_area_matrix;
use crate::diode::{segment_parameters, solve_module, CellModel, IvCurve, PerformancePoint};
use crate::geometry::ModuleGeometry;
use crate::irradiance::{map_irradiance, AmbientLight, IrradianceModel};
use crate::shading::SampleDensity;
use crate::tilt::TiltGrid;
use crate::tools::sun::SunVector;

pub const STC_DIFFUSE_FRACTION: f64 = 0.1125;
const STC_TEMPERATURE: f64 = 25.0; // degC
const CURVE_PRECISION: i32 = 3;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StcPoint {
    /// Degrees
    pub tilt: f64,
    #[serde(flatten)]
    pub performance: PerformancePoint,
    pub iv_curve: IvCurve,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StcReport {
    /// W/m^2
    pub direct: f64,
    pub albedo: f64,
    pub diffuse: f64,
    pub total: f64,
    pub points: Vec<StcPoint>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StcSweep {
    pub geometry: ModuleGeometry,
    pub cell: CellModel,
    pub grid: TiltGrid,
    pub density: SampleDensity,
    pub diffuse_fraction: f64,
}

impl Default for StcSweep {
    fn default() -> Self {
        StcSweep {
            geometry: ModuleGeometry::reference(),
            cell: CellModel::stc(),
            grid: TiltGrid {
                start: Angle::new::<degree>(0.0),
                stop: Angle::new::<degree>(100.0),
                step: Angle::new::<degree>(5.0),
            },
            density: SampleDensity::reference(),
            diffuse_fraction: STC_DIFFUSE_FRACTION,
        }
    }
}

impl StcSweep {
    pub fn run(
        &self,
        direct: HeatFluxDensity,
        albedo: HeatFluxDensity,
    ) -> anyhow::Result<StcReport> {
        let light = AmbientLight::decompose(direct, albedo, self.diffuse_fraction)?;
        let model = IrradianceModel::standard_test();
        let sun = SunVector::overhead();
        let ambient = ThermodynamicTemperature::new::<degree_celsius>(STC_TEMPERATURE);
        let temperature = self.cell.temperature.cell_temperature(ambient, direct);

        let points = self
            .grid
            .candidates()
            .into_iter()
            .map(|tilt| {
                let areas = compute_area_matrix(&self.geometry.at_tilt(tilt), &sun, self.density);
                let illuminance = map_irradiance(&areas, &light, &model)?;
                let cells = segment_parameters(&areas, &illuminance, &self.cell)?;
                let solution = solve_module(&cells, &self.cell, temperature);
                Ok(StcPoint {
                    tilt: tilt.get::<degree>(),
                    performance: solution.performance,
                    iv_curve: solution.curve.rounded(CURVE_PRECISION),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        info!(tilts = points.len(), "Standard test sweep finished");

        let wm2 = |g: HeatFluxDensity| g.get::<watt_per_square_meter>();
        Ok(StcReport {
            direct: wm2(light.beam),
            albedo: wm2(light.ground_reflected),
            diffuse: wm2(light.diffuse),
            total: wm2(light.total()),
            points,
        })
    }
}
