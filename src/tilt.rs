//! Tilt strategies and the driver running them over a schedule of timesteps.
//!
//! Every timestep is evaluated twice: a flat plate at the analytic best tilt, and the
//! faceted module shaded by its own cells at a swept or fixed tilt.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, info};
use uom::si::{
    angle::{degree, radian},
    f64::{Angle, HeatFluxDensity, ThermodynamicTemperature},
    heat_flux_density::watt_per_square_meter,
    ratio::ratio,
    thermodynamic_temperature::degree_celsius,
};

use crate::area_matrix::compute_area_matrix;
use crate::diode::{flat_parameters, segment_parameters, solve_module, CellModel};
use crate::geometry::ModuleGeometry;
use crate::irradiance::{map_irradiance, AmbientLight, IrradianceModel};
use crate::report::{ModeResult, ReportBuilder, RunReport, TimestepRecord};
use crate::shading::SampleDensity;
use crate::tools::sun::{get_projection, SunVector};

/// Ambient conditions of one timestep, already resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct TimestepInput {
    pub timestamp_local: DateTime<FixedOffset>,
    pub timestamp_utc: DateTime<Utc>,
    pub zenith: Angle,
    pub azimuth: Angle,
    pub dni: HeatFluxDensity,
    pub dhi: HeatFluxDensity,
    pub ghi: HeatFluxDensity,
    pub ambient_temperature: ThermodynamicTemperature,
}

impl TimestepInput {
    pub fn is_below_horizon(&self) -> bool {
        self.zenith.get::<degree>() >= 90.0
    }
}

/// Tilt of a flat plate that faces the sun in the module cross-section plane.
///
/// `|atan(tan(zenith) * cos(solar_azimuth - module_azimuth))|`, zero for a sun below the horizon.
pub fn analytic_best_tilt(zenith: &Angle, solar_azimuth: &Angle, module_azimuth: &Angle) -> Angle {
    if zenith.get::<degree>() >= 90.0 {
        return Angle::new::<degree>(0.0);
    }
    let delta = (*solar_azimuth - *module_azimuth).get::<radian>();
    let tilt = (zenith.get::<radian>().tan() * delta.cos()).atan().abs();
    Angle::new::<radian>(tilt)
}

/// Front irradiance of a flat plate, including the bifacial ground term
/// `bifaciality * albedo * ghi * (1 - cos(tilt)) / 2`.
pub fn flat_plate_irradiance(
    input: &TimestepInput,
    tilt: &Angle,
    module_azimuth: &Angle,
    rear_albedo: f64,
    bifaciality: f64,
) -> HeatFluxDensity {
    let cos_theta = get_projection(module_azimuth, tilt, &input.azimuth, &input.zenith);
    let ground = bifaciality * rear_albedo * (1.0 - tilt.cos().get::<ratio>()) / 2.0;
    cos_theta * input.dni + input.dhi + ground * input.ghi
}

/// Largest number of tilts a grid may produce.
pub const MAX_TILT_CANDIDATES: usize = 10_000;

/// Closed range of candidate tilts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TiltGrid {
    pub start: Angle,
    pub stop: Angle,
    pub step: Angle,
}

impl TiltGrid {
    pub fn new(start: Angle, stop: Angle, step: Angle) -> anyhow::Result<Self> {
        let start_deg = start.get::<degree>();
        let stop_deg = stop.get::<degree>();
        let step_deg = step.get::<degree>();
        if !(start_deg.is_finite() && stop_deg.is_finite()) {
            anyhow::bail!(
                "Tilt grid bounds {} and {} degrees must be finite",
                start_deg,
                stop_deg
            );
        }
        if !step_deg.is_finite() || step_deg <= 0.0 {
            anyhow::bail!("Tilt grid step {} must be positive and finite", step_deg);
        }
        if stop_deg < start_deg {
            anyhow::bail!(
                "Tilt grid stops at {} degrees, before its start at {} degrees",
                stop_deg,
                start_deg
            );
        }
        let grid = TiltGrid { start, stop, step };
        if grid.candidate_count() > MAX_TILT_CANDIDATES as f64 {
            anyhow::bail!(
                "Tilt grid from {} to {} degrees in steps of {} exceeds {} candidates",
                start_deg,
                stop_deg,
                step_deg,
                MAX_TILT_CANDIDATES
            );
        }
        Ok(grid)
    }

    /// Number of grid points, infinite when the step vanishes against the span.
    fn candidate_count(&self) -> f64 {
        let span = (self.stop - self.start).get::<degree>();
        (span / self.step.get::<degree>() + 1e-9).floor() + 1.0
    }

    /// Grid tilts from `start` up to and including `stop`, at most [`MAX_TILT_CANDIDATES`].
    pub fn candidates(&self) -> Vec<Angle> {
        let count = (self.candidate_count() as usize).min(MAX_TILT_CANDIDATES);
        let start = self.start.get::<degree>();
        let step = self.step.get::<degree>();
        (0..count)
            .map(|k| Angle::new::<degree>(start + step * k as f64))
            .collect()
    }
}

impl Default for TiltGrid {
    fn default() -> Self {
        TiltGrid {
            start: Angle::new::<degree>(0.0),
            stop: Angle::new::<degree>(60.0),
            step: Angle::new::<degree>(5.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TiltStrategy {
    /// Evaluate every grid tilt and keep the one with the highest power
    Sweep(TiltGrid),
    /// Evaluate one caller supplied tilt
    Fixed(Angle),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TiltDriver {
    pub geometry: ModuleGeometry,
    pub shaded_cell: CellModel,
    pub flat_cell: CellModel,
    pub module_azimuth: Angle,
    pub rear_albedo: f64,
    pub density: SampleDensity,
    pub strategy: TiltStrategy,
}

impl TiltDriver {
    pub fn new(module_azimuth: Angle, rear_albedo: f64, strategy: TiltStrategy) -> Self {
        TiltDriver {
            geometry: ModuleGeometry::reference(),
            shaded_cell: CellModel::shaded(),
            flat_cell: CellModel::flat(),
            module_azimuth,
            rear_albedo,
            density: SampleDensity::batch(),
            strategy,
        }
    }

    /// Shaded facet model at one tilt.
    pub fn evaluate_tilt(&self, input: &TimestepInput, tilt: Angle) -> anyhow::Result<ModeResult> {
        let module = self.geometry.at_tilt(tilt);
        let sun = SunVector::from_angles(&input.zenith, &input.azimuth, &self.module_azimuth);
        let areas = compute_area_matrix(&module, &sun, self.density);

        let light = AmbientLight::field(input.dni, input.dhi, input.ghi);
        let model = IrradianceModel::field(self.rear_albedo);
        let illuminance = map_irradiance(&areas, &light, &model)?;
        let cells = segment_parameters(&areas, &illuminance, &self.shaded_cell)?;

        let temperature = self
            .shaded_cell
            .temperature
            .cell_temperature(input.ambient_temperature, input.dni);
        let solution = solve_module(&cells, &self.shaded_cell, temperature);

        Ok(ModeResult {
            tilt: tilt.get::<degree>(),
            performance: solution.performance,
        })
    }

    /// Flat plate at the analytic best tilt.
    pub fn evaluate_flat(&self, input: &TimestepInput) -> ModeResult {
        let tilt = analytic_best_tilt(&input.zenith, &input.azimuth, &self.module_azimuth);
        let irradiance = flat_plate_irradiance(
            input,
            &tilt,
            &self.module_azimuth,
            self.rear_albedo,
            self.flat_cell.bifaciality,
        );
        let cell = flat_parameters(irradiance, &self.flat_cell);
        let temperature = self
            .flat_cell
            .temperature
            .cell_temperature(input.ambient_temperature, input.dni);
        let solution = solve_module(&[cell], &self.flat_cell, temperature);

        ModeResult {
            tilt: tilt.get::<degree>(),
            performance: solution.performance,
        }
    }

    /// Best grid tilt. Ties keep the earlier candidate.
    pub fn sweep(&self, input: &TimestepInput, grid: &TiltGrid) -> anyhow::Result<ModeResult> {
        let mut best: Option<ModeResult> = None;
        for tilt in grid.candidates() {
            let result = self.evaluate_tilt(input, tilt)?;
            if best.map_or(true, |b| result.pmax() > b.pmax()) {
                best = Some(result);
            }
        }
        best.ok_or_else(|| anyhow::anyhow!("Tilt grid has no candidates"))
    }

    /// Evaluate both models, `None` when the sun is below the horizon.
    pub fn evaluate_timestep(
        &self,
        input: &TimestepInput,
    ) -> anyhow::Result<Option<TimestepRecord>> {
        if input.is_below_horizon() {
            debug!(timestamp_utc = %input.timestamp_utc, "Sun below horizon, skipping timestep");
            return Ok(None);
        }

        let flat = self.evaluate_flat(input);
        let shaded = match &self.strategy {
            TiltStrategy::Sweep(grid) => self.sweep(input, grid)?,
            TiltStrategy::Fixed(tilt) => self.evaluate_tilt(input, *tilt)?,
        };
        debug!(
            timestamp_utc = %input.timestamp_utc,
            flat_tilt = flat.tilt,
            shaded_tilt = shaded.tilt,
            flat_pmax = flat.pmax(),
            shaded_pmax = shaded.pmax(),
            "Evaluated timestep"
        );

        let wm2 = |g: HeatFluxDensity| g.get::<watt_per_square_meter>();
        Ok(Some(TimestepRecord {
            timestamp_local: input.timestamp_local,
            timestamp_utc: input.timestamp_utc,
            zenith: input.zenith.get::<degree>(),
            azimuth: input.azimuth.get::<degree>(),
            dni: wm2(input.dni),
            dhi: wm2(input.dhi),
            ghi: wm2(input.ghi),
            ambient_temperature: input.ambient_temperature.get::<degree_celsius>(),
            flat,
            shaded,
        }))
    }

    pub fn run(&self, inputs: &[TimestepInput]) -> anyhow::Result<RunReport> {
        let mut builder = ReportBuilder::new();
        for input in inputs {
            if let Some(record) = self.evaluate_timestep(input)? {
                builder.push(record);
            }
        }
        Ok(Self::finish(builder, inputs.len()))
    }

    /// Same as [`TiltDriver::run`] with one blocking task per timestep.
    pub async fn run_parallel(
        self: Arc<Self>,
        inputs: Vec<TimestepInput>,
    ) -> anyhow::Result<RunReport> {
        let timesteps = inputs.len();
        let handles: Vec<_> = inputs
            .into_iter()
            .map(|input| {
                let driver = Arc::clone(&self);
                tokio::task::spawn_blocking(move || driver.evaluate_timestep(&input))
            })
            .collect();

        let mut builder = ReportBuilder::new();
        for handle in handles {
            if let Some(record) = handle.await?? {
                builder.push(record);
            }
        }
        Ok(Self::finish(builder, timesteps))
    }

    fn finish(builder: ReportBuilder, timesteps: usize) -> RunReport {
        let report = builder.finish();
        info!(
            timesteps,
            evaluated = report.rows,
            flat_pmax_total = report.yearly_totals.flat_pmax_total,
            shaded_pmax_total = report.yearly_totals.shaded_pmax_total,
            "Tilt run finished"
        );
        report
    }
}
