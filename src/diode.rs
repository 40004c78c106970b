//! Single-diode (Bishop) equivalent circuit of the module cells.
//!
//! Every cell is solved for its current at each swept voltage and the cell currents are
//! summed in parallel to give the module I-V curve.

use serde::Serialize;
use tracing::warn;
use uom::si::{
    area::square_centimeter,
    electric_potential::volt,
    electrical_resistance::ohm,
    f64::{
        Area, ElectricPotential, ElectricalResistance, HeatFluxDensity, TemperatureInterval,
        ThermodynamicTemperature,
    },
    heat_flux_density::watt_per_square_meter,
    ratio::ratio,
    temperature_interval::kelvin as kelvin_interval,
    thermodynamic_temperature::{degree_celsius, kelvin},
};

use crate::area_matrix::AreaMatrix;
use crate::irradiance::IlluminanceRow;
use crate::tools::{linspace, round_to};

pub const BOLTZMANN_CONSTANT: f64 = 1.381e-23; // J/K
pub const ELEMENTARY_CHARGE: f64 = 1.602e-19; // C

const MAX_ITERATIONS: usize = 200;
const TOLERANCE: f64 = 1e-8;

/// Irradiance at which the reference current density is specified
const REFERENCE_IRRADIANCE: f64 = 1000.0; // W/m^2
/// Short circuit current of one full reference cell at 1000 W/m^2
const REFERENCE_CELL_CURRENT: f64 = 13.857; // A
/// Saturation current per unit of cell area
const SATURATION_CURRENT_DENSITY: f64 = 1e-12; // A/cm^2
/// Smallest area used for the saturation current of a cell
const MIN_SATURATION_AREA: f64 = 1e-6; // cm^2
/// Lower bound of the flat plate irradiance
const MIN_FLAT_IRRADIANCE: f64 = 1.0; // W/m^2

pub fn thermal_voltage(temperature: ThermodynamicTemperature) -> f64 {
    BOLTZMANN_CONSTANT * temperature.get::<kelvin>() / ELEMENTARY_CHARGE
}

/// Solve the implicit diode equation
/// `I = Iph - I0 * (exp((V + I * Rs) / (n * Vt)) - 1) - (V + I * Rs) / Rsh`
/// for `I` at the voltage `v`.
///
/// Newton iteration seeded at `iph`. The residual is convex and increasing in `I` and
/// non-negative at the seed, so the iterates approach the root from above.
/// Returns `None` if the iteration does not converge or leaves the finite range.
pub fn diode_current(v: f64, iph: f64, i0: f64, rs: f64, rsh: f64, n: f64, vt: f64) -> Option<f64> {
    let nvt = n * vt;
    let mut current = iph;
    for _ in 0..MAX_ITERATIONS {
        let junction = (v + current * rs) / nvt;
        let exp = junction.exp();
        let residual = current - iph + i0 * (exp - 1.0) + (v + current * rs) / rsh;
        let derivative = 1.0 + i0 * rs / nvt * exp + rs / rsh;
        let step = residual / derivative;
        current -= step;

        if !current.is_finite() {
            return None;
        }
        if step.abs() <= TOLERANCE * (1.0 + current.abs()) {
            return Some(current);
        }
    }
    None
}

/// How the cell temperature follows the ambient conditions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CellTemperatureModel {
    /// Cell held at a fixed temperature, ambient is ignored
    Fixed(ThermodynamicTemperature),
    /// ambient + offset + rise * beam / reference_beam
    Heated {
        offset: TemperatureInterval,
        rise: TemperatureInterval,
        reference_beam: HeatFluxDensity,
    },
}

impl CellTemperatureModel {
    pub fn heated(offset_k: f64) -> Self {
        CellTemperatureModel::Heated {
            offset: TemperatureInterval::new::<kelvin_interval>(offset_k),
            rise: TemperatureInterval::new::<kelvin_interval>(23.0),
            reference_beam: HeatFluxDensity::new::<watt_per_square_meter>(800.0),
        }
    }

    pub fn cell_temperature(
        &self,
        ambient: ThermodynamicTemperature,
        beam: HeatFluxDensity,
    ) -> ThermodynamicTemperature {
        match *self {
            CellTemperatureModel::Fixed(temperature) => temperature,
            CellTemperatureModel::Heated {
                offset,
                rise,
                reference_beam,
            } => {
                let beam_ratio = (beam / reference_beam).get::<ratio>();
                let heating = rise.get::<kelvin_interval>() * beam_ratio;
                ThermodynamicTemperature::new::<degree_celsius>(
                    ambient.get::<degree_celsius>() + offset.get::<kelvin_interval>() + heating,
                )
            }
        }
    }
}

/// Electrical constants of one cell technology.
#[derive(Clone, Debug, PartialEq)]
pub struct CellModel {
    pub open_circuit_voltage: ElectricPotential,
    pub series_resistance: ElectricalResistance,
    pub shunt_resistance: ElectricalResistance,
    pub ideality_factor: f64,
    /// Number of points of the voltage sweep over [0, Voc]
    pub voltage_samples: usize,
    /// Area of the full reference cell the current density is derived from
    pub reference_area: Area,
    /// Rear side photocurrent relative to the front side
    pub bifaciality: f64,
    /// Cells in series in the reported string metrics
    pub series_cells: usize,
    pub temperature: CellTemperatureModel,
}

impl CellModel {
    fn common(
        voc: f64,
        rs: f64,
        rsh: f64,
        samples: usize,
        temperature: CellTemperatureModel,
    ) -> Self {
        CellModel {
            open_circuit_voltage: ElectricPotential::new::<volt>(voc),
            series_resistance: ElectricalResistance::new::<ohm>(rs),
            shunt_resistance: ElectricalResistance::new::<ohm>(rsh),
            ideality_factor: 1.2,
            voltage_samples: samples,
            reference_area: Area::new::<square_centimeter>(182.0 * 182.0 / 100.0),
            bifaciality: 0.7,
            series_cells: 5,
            temperature,
        }
    }

    /// Faceted cells outdoors, heated 10 K above the flat plate.
    pub fn shaded() -> Self {
        let heating = CellTemperatureModel::heated(10.0);
        Self::common(0.763, 0.015, 2282.0, 500, heating)
    }

    /// Single full cell of the flat plate comparison.
    pub fn flat() -> Self {
        let heating = CellTemperatureModel::heated(0.0);
        Self::common(0.763, 0.0062, 2082.0, 500, heating)
    }

    /// Standard test conditions, 25 degC without heating.
    pub fn stc() -> Self {
        Self::common(
            0.729,
            0.0022,
            2082.0,
            400,
            CellTemperatureModel::Fixed(ThermodynamicTemperature::new::<degree_celsius>(25.0)),
        )
    }

    /// Photocurrent per cm^2 at every 1 W/m^2
    fn current_density(&self) -> f64 {
        REFERENCE_CELL_CURRENT
            / self.reference_area.get::<square_centimeter>()
            / REFERENCE_IRRADIANCE
    }

    fn saturation_current(area_cm2: f64) -> f64 {
        SATURATION_CURRENT_DENSITY * area_cm2.max(MIN_SATURATION_AREA)
    }
}

impl Default for CellModel {
    fn default() -> Self {
        CellModel::shaded()
    }
}

/// Circuit values of one cell at one operating condition, plain SI numbers.
#[derive(Clone, Debug, PartialEq)]
pub struct DiodeParameters {
    pub cell: String,
    /// A
    pub photocurrent: f64,
    /// A
    pub saturation_current: f64,
    /// Ohm
    pub series_resistance: f64,
    /// Ohm
    pub shunt_resistance: f64,
}

/// Derive the circuit of every cell from its bucket areas and irradiances.
///
/// Both rear buckets are weighted by the bifaciality of the model.
pub fn segment_parameters(
    areas: &AreaMatrix,
    illuminance: &[IlluminanceRow],
    model: &CellModel,
) -> anyhow::Result<Vec<DiodeParameters>> {
    if areas.len() != illuminance.len() {
        anyhow::bail!(
            "Area matrix has {} rows but illuminance has {}",
            areas.len(),
            illuminance.len()
        );
    }
    let density = model.current_density();
    let rs = model.series_resistance.get::<ohm>();
    let rsh = model.shunt_resistance.get::<ohm>();

    areas
        .iter()
        .zip(illuminance.iter())
        .map(|(area, light)| {
            if area.cell != light.cell {
                anyhow::bail!(
                    "Illuminance row {:?} does not match area row {:?}",
                    light.cell,
                    area.cell
                );
            }
            let cm2 = |a: Area| a.get::<square_centimeter>();
            let wm2 = |g: HeatFluxDensity| g.get::<watt_per_square_meter>();

            let front = cm2(area.direct) * wm2(light.direct) + cm2(area.shaded) * wm2(light.shaded);
            let rear = cm2(area.rear_albedo) * wm2(light.rear_albedo)
                + cm2(area.rear_diffuse) * wm2(light.rear_diffuse);

            Ok(DiodeParameters {
                cell: area.cell.clone(),
                photocurrent: density * (front + model.bifaciality * rear),
                saturation_current: CellModel::saturation_current(cm2(area.total())),
                series_resistance: rs,
                shunt_resistance: rsh,
            })
        })
        .collect()
}

/// One unshaded reference cell under a uniform irradiance.
pub fn flat_parameters(irradiance: HeatFluxDensity, model: &CellModel) -> DiodeParameters {
    let area = model.reference_area.get::<square_centimeter>();
    let g = irradiance
        .get::<watt_per_square_meter>()
        .max(MIN_FLAT_IRRADIANCE);
    DiodeParameters {
        cell: "Base".to_owned(),
        photocurrent: model.current_density() * g * area,
        saturation_current: CellModel::saturation_current(area),
        series_resistance: model.series_resistance.get::<ohm>(),
        shunt_resistance: model.shunt_resistance.get::<ohm>(),
    }
}

/// Module current over the voltage sweep.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IvCurve {
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
}

impl IvCurve {
    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    pub fn rounded(&self, places: i32) -> IvCurve {
        IvCurve {
            voltage: self.voltage.iter().map(|&v| round_to(v, places)).collect(),
            current: self.current.iter().map(|&i| round_to(i, places)).collect(),
        }
    }

    /// Index of the first sample with the highest power.
    fn max_power_index(&self) -> usize {
        self.voltage
            .iter()
            .zip(self.current.iter())
            .map(|(v, i)| v * i)
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (index, power)| {
                if power > best.1 {
                    (index, power)
                } else {
                    best
                }
            })
            .0
    }
}

/// Electrical parameters of the module at its maximum power point.
///
/// The `_series` fields scale the voltages by the number of series cells while the
/// currents stay those of the parallel sum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PerformancePoint {
    pub isc: f64,
    pub voc: f64,
    pub vmp: f64,
    pub imp: f64,
    pub fill_factor: f64,
    pub pmax: f64,
    pub voc_series: f64,
    pub vmp_series: f64,
    pub pmax_series: f64,
}

impl PerformancePoint {
    pub fn from_curve(curve: &IvCurve, voc: f64, series_cells: usize) -> Self {
        if curve.is_empty() {
            return PerformancePoint::default();
        }
        let index = curve.max_power_index();
        let isc = curve.current[0];
        let vmp = curve.voltage[index];
        let imp = curve.current[index];
        let fill_factor = if isc > 0.0 {
            vmp * imp / (voc * isc)
        } else {
            0.0
        };
        let cells = series_cells as f64;

        PerformancePoint {
            isc,
            voc,
            vmp,
            imp,
            fill_factor,
            pmax: vmp * imp,
            voc_series: voc * cells,
            vmp_series: vmp * cells,
            pmax_series: vmp * cells * imp,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModuleSolution {
    pub curve: IvCurve,
    pub performance: PerformancePoint,
    /// Number of (voltage, cell) root-finds that failed and were counted as 0 A
    pub non_converged: usize,
}

/// Solve all cells over the voltage sweep of `model` at the given cell temperature.
///
/// Cell currents are summed in parallel while the series metrics scale voltage by
/// `series_cells`, as if the module were one string of identical cells.
pub fn solve_module(
    cells: &[DiodeParameters],
    model: &CellModel,
    cell_temperature: ThermodynamicTemperature,
) -> ModuleSolution {
    let vt = thermal_voltage(cell_temperature);
    let n = model.ideality_factor;
    let voc = model.open_circuit_voltage.get::<volt>();
    let voltage = linspace(0.0, voc, model.voltage_samples);

    let mut non_converged = 0;
    let current = voltage
        .iter()
        .map(|&v| {
            cells
                .iter()
                .map(|cell| {
                    match diode_current(
                        v,
                        cell.photocurrent,
                        cell.saturation_current,
                        cell.series_resistance,
                        cell.shunt_resistance,
                        n,
                        vt,
                    ) {
                        Some(i) => i.max(0.0),
                        None => {
                            non_converged += 1;
                            0.0
                        }
                    }
                })
                .sum::<f64>()
        })
        .collect();

    if non_converged > 0 {
        warn!(
            non_converged,
            samples = voltage.len() * cells.len(),
            "Diode solver did not converge, samples counted as zero current"
        );
    }

    let curve = IvCurve { voltage, current };
    let performance = PerformancePoint::from_curve(&curve, voc, model.series_cells);
    ModuleSolution {
        curve,
        performance,
        non_converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area_matrix::compute_area_matrix;
    use crate::geometry::ModuleGeometry;
    use crate::irradiance::{map_irradiance, AmbientLight, IrradianceModel};
    use crate::shading::SampleDensity;
    use crate::tools::sun::SunVector;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use test_case::test_case;
    use test_strategy::proptest;
    use uom::si::{angle::degree, f64::Angle};

    fn celsius(value: f64) -> ThermodynamicTemperature {
        ThermodynamicTemperature::new::<degree_celsius>(value)
    }

    fn wm2(value: f64) -> HeatFluxDensity {
        HeatFluxDensity::new::<watt_per_square_meter>(value)
    }

    fn field_parameters(beam: f64) -> Vec<DiodeParameters> {
        let geometry = ModuleGeometry::reference();
        let sun = SunVector::from_angles(
            &Angle::new::<degree>(35.0),
            &Angle::new::<degree>(180.0),
            &Angle::new::<degree>(180.0),
        );
        let areas = compute_area_matrix(
            &geometry.at_tilt(Angle::new::<degree>(20.0)),
            &sun,
            SampleDensity::batch(),
        );
        let light = AmbientLight::field(wm2(beam), wm2(100.0), wm2(beam * 0.8 + 100.0));
        let rows = map_irradiance(&areas, &light, &IrradianceModel::field(0.3657)).unwrap();
        segment_parameters(&areas, &rows, &CellModel::shaded()).unwrap()
    }

    #[test]
    fn thermal_voltage_at_room_temperature() {
        assert_abs_diff_eq!(thermal_voltage(celsius(25.0)), 0.025_703, epsilon = 1e-5);
    }

    #[test_case(0.0, 5.0; "short circuit")]
    #[test_case(0.4, 5.0; "mid sweep")]
    #[test_case(0.7, 8.0; "near open circuit")]
    #[test_case(0.3, 0.0; "dark cell")]
    fn zero_series_resistance_matches_closed_form(v: f64, iph: f64) {
        let (i0, rsh, n, vt) = (3e-10, 2082.0, 1.2, 0.0257);
        let expected = iph - i0 * ((v / (n * vt)).exp() - 1.0) - v / rsh;
        let current = diode_current(v, iph, i0, 0.0, rsh, n, vt).unwrap();
        assert_relative_eq!(current, expected, epsilon = 1e-12, max_relative = 1e-10);
    }

    #[test]
    fn non_finite_input_does_not_converge() {
        let current = diode_current(0.5, f64::NAN, 1e-10, 0.01, 2000.0, 1.2, 0.0257);
        assert_eq!(current, None);
    }

    #[proptest]
    fn root_satisfies_diode_equation(
        #[strategy(0f64..0.763f64)] v: f64,
        #[strategy(0f64..15f64)] iph: f64,
        #[strategy(1e-13f64..1e-9f64)] i0: f64,
        #[strategy(0f64..0.05f64)] rs: f64,
        #[strategy(100f64..5000f64)] rsh: f64,
    ) {
        let (n, vt) = (1.2, 0.027);
        let i = diode_current(v, iph, i0, rs, rsh, n, vt).unwrap();
        let vd = v + i * rs;
        let residual = i - (iph - i0 * ((vd / (n * vt)).exp() - 1.0) - vd / rsh);
        assert!(residual.abs() < 1e-6, "residual {} at I = {}", residual, i);
        assert!(i <= iph + 1e-12);
    }

    #[test]
    fn heated_cell_temperature() {
        let shaded = CellModel::shaded().temperature;
        let t = shaded.cell_temperature(celsius(30.0), wm2(800.0));
        assert_abs_diff_eq!(t.get::<degree_celsius>(), 63.0, epsilon = 1e-9);

        let flat = CellModel::flat().temperature;
        let t = flat.cell_temperature(celsius(30.0), wm2(400.0));
        assert_abs_diff_eq!(t.get::<degree_celsius>(), 41.5, epsilon = 1e-9);
    }

    #[test]
    fn stc_temperature_ignores_ambient() {
        let t = CellModel::stc()
            .temperature
            .cell_temperature(celsius(-5.0), wm2(1000.0));
        assert_abs_diff_eq!(t.get::<degree_celsius>(), 25.0, epsilon = 1e-9);
    }

    #[test]
    fn full_reference_cell_at_1000_wm2() {
        let params = flat_parameters(wm2(1000.0), &CellModel::flat());
        assert_abs_diff_eq!(params.photocurrent, 13.857, epsilon = 1e-9);
        assert_abs_diff_eq!(params.saturation_current, 1e-12 * 331.24, epsilon = 1e-18);
    }

    #[test]
    fn flat_irradiance_is_floored() {
        let model = CellModel::flat();
        assert_eq!(
            flat_parameters(wm2(-20.0), &model),
            flat_parameters(wm2(1.0), &model)
        );
    }

    #[test]
    fn mismatched_rows_are_rejected() {
        let geometry = ModuleGeometry::reference();
        let areas = compute_area_matrix(
            &geometry.at_tilt(Angle::new::<degree>(0.0)),
            &SunVector::overhead(),
            SampleDensity::batch(),
        );
        assert!(segment_parameters(&areas, &[], &CellModel::shaded()).is_err());
    }

    #[test]
    fn short_circuit_current_is_bounded_by_photocurrent() {
        let params = field_parameters(850.0);
        let solution = solve_module(&params, &CellModel::shaded(), celsius(45.0));
        let total_photocurrent: f64 = params.iter().map(|p| p.photocurrent).sum();

        assert_eq!(solution.curve.voltage.len(), 500);
        assert_eq!(solution.non_converged, 0);
        assert!(solution.performance.isc <= total_photocurrent);
        assert!(solution.performance.isc > 0.0);
        assert!(solution.performance.fill_factor > 0.0 && solution.performance.fill_factor < 1.0);
    }

    #[test]
    fn more_beam_never_lowers_output() {
        let model = CellModel::shaded();
        let points: Vec<PerformancePoint> = [100.0, 300.0, 600.0, 900.0]
            .iter()
            .map(|&beam| solve_module(&field_parameters(beam), &model, celsius(25.0)).performance)
            .collect();

        for pair in points.windows(2) {
            assert!(pair[0].isc <= pair[1].isc);
            assert!(pair[0].pmax <= pair[1].pmax);
        }
    }

    #[test]
    fn series_scaling_leaves_currents_alone() {
        let params = field_parameters(700.0);
        let p = solve_module(&params, &CellModel::shaded(), celsius(30.0)).performance;
        assert_relative_eq!(p.voc_series, p.voc * 5.0);
        assert_relative_eq!(p.vmp_series, p.vmp * 5.0);
        assert_relative_eq!(p.pmax_series, p.vmp * 5.0 * p.imp);
        assert_relative_eq!(p.pmax, p.vmp * p.imp);
    }

    #[test]
    fn dark_module_has_zero_fill_factor() {
        let dark = DiodeParameters {
            cell: "dark".to_owned(),
            photocurrent: 0.0,
            saturation_current: 1e-10,
            series_resistance: 0.015,
            shunt_resistance: 2282.0,
        };
        let solution = solve_module(&[dark], &CellModel::shaded(), celsius(25.0));
        assert!(solution.curve.current.iter().all(|&i| i == 0.0));
        assert_eq!(solution.performance.fill_factor, 0.0);
        assert_eq!(solution.performance.vmp, 0.0);
    }

    #[test]
    fn max_power_takes_first_peak() {
        let curve = IvCurve {
            voltage: vec![0.0, 1.0, 2.0, 4.0],
            current: vec![3.0, 2.0, 1.0, 0.5],
        };
        let p = PerformancePoint::from_curve(&curve, 4.0, 5);
        assert_eq!(p.vmp, 1.0);
        assert_eq!(p.imp, 2.0);
    }

    #[test]
    fn solve_is_deterministic() {
        let params = field_parameters(640.0);
        let model = CellModel::shaded();
        assert_eq!(
            solve_module(&params, &model, celsius(40.0)),
            solve_module(&params, &model, celsius(40.0))
        );
    }
}
