use std::fs;
use std::path::{Path, PathBuf};

use uom::si::{
    angle::degree,
    electric_potential::volt,
    electrical_resistance::ohm,
    f64::{
        Angle, ElectricPotential, ElectricalResistance, HeatFluxDensity, Length,
        TemperatureInterval, ThermodynamicTemperature,
    },
    heat_flux_density::watt_per_square_meter,
    length::millimeter,
    temperature_interval::kelvin,
    thermodynamic_temperature::degree_celsius,
};

use crate::ambient::Schedule;
use crate::diode::{CellModel, CellTemperatureModel};
use crate::geometry::{CellSegment, ModuleGeometry, RearExposure};
use crate::shading::SampleDensity;
use crate::tilt::TiltGrid;

const DEFAULT_FALLBACK_TEMPERATURE: f64 = 45.0; // degC
const DEFAULT_REAR_ALBEDO: f64 = 0.3657;

/// Everything about a run that is not a request parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationConfig {
    pub geometry: ModuleGeometry,
    pub shaded_cell: CellModel,
    pub flat_cell: CellModel,
    pub stc_cell: CellModel,
    pub schedule: Schedule,
    pub tilt_grid: TiltGrid,
    pub batch_samples: SampleDensity,
    pub reference_samples: SampleDensity,
    /// Air temperature used for a whole run when the temperature source fails
    pub fallback_temperature: ThermodynamicTemperature,
    pub rear_albedo: f64,
    pub temperature_table: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            geometry: ModuleGeometry::reference(),
            shaded_cell: CellModel::shaded(),
            flat_cell: CellModel::flat(),
            stc_cell: CellModel::stc(),
            schedule: Schedule::default(),
            tilt_grid: TiltGrid::default(),
            batch_samples: SampleDensity::batch(),
            reference_samples: SampleDensity::reference(),
            fallback_temperature: ThermodynamicTemperature::new::<degree_celsius>(
                DEFAULT_FALLBACK_TEMPERATURE,
            ),
            rear_albedo: DEFAULT_REAR_ALBEDO,
            temperature_table: None,
        }
    }
}

impl SimulationConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let string = fs::read_to_string(path)?;
        Self::from_json(&string)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let loaded: as_loaded::SimulationConfig = json5::from_str(json)?;
        let converted = loaded.try_into()?;
        Ok(converted)
    }
}

impl TryFrom<as_loaded::SimulationConfig> for SimulationConfig {
    type Error = anyhow::Error;
    fn try_from(value: as_loaded::SimulationConfig) -> Result<Self, Self::Error> {
        let default = SimulationConfig::default();

        let geometry = match value.geometry {
            Some(geometry) => geometry.convert()?,
            None => default.geometry,
        };

        let thermal = value.thermal.unwrap_or_default();
        let mut shaded_cell = default.shaded_cell;
        let mut flat_cell = default.flat_cell;
        thermal.apply(&mut shaded_cell.temperature, true);
        thermal.apply(&mut flat_cell.temperature, false);

        let shaded_cell = apply_overrides(shaded_cell, value.shaded_cell, "shaded_cell")?;
        let flat_cell = apply_overrides(flat_cell, value.flat_cell, "flat_cell")?;
        let stc_cell = apply_overrides(default.stc_cell, value.stc_cell, "stc_cell")?;

        let schedule = match value.schedule {
            Some(schedule) => schedule.convert(default.schedule)?,
            None => default.schedule,
        };
        let tilt_grid = match value.tilt_grid {
            Some(grid) => grid.convert(default.tilt_grid)?,
            None => default.tilt_grid,
        };

        let batch_samples = match value.batch_samples {
            Some(samples) => SampleDensity::new(samples)?,
            None => default.batch_samples,
        };
        let reference_samples = match value.reference_samples {
            Some(samples) => SampleDensity::new(samples)?,
            None => default.reference_samples,
        };

        let rear_albedo = check_rear_albedo(value.rear_albedo.unwrap_or(default.rear_albedo))?;

        Ok(SimulationConfig {
            geometry,
            shaded_cell,
            flat_cell,
            stc_cell,
            schedule,
            tilt_grid,
            batch_samples,
            reference_samples,
            fallback_temperature: value
                .fallback_temperature_c
                .map(ThermodynamicTemperature::new::<degree_celsius>)
                .unwrap_or(default.fallback_temperature),
            rear_albedo,
            temperature_table: value.temperature_table,
        })
    }
}

/// Share of the global horizontal light reaching the rear side, must lie in [0, 1].
pub fn check_rear_albedo(rear_albedo: f64) -> anyhow::Result<f64> {
    if !(0.0..=1.0).contains(&rear_albedo) {
        anyhow::bail!("Rear albedo {} is outside of [0, 1]", rear_albedo);
    }
    Ok(rear_albedo)
}

fn apply_overrides(
    mut cell: CellModel,
    overrides: Option<as_loaded::CellModel>,
    label: &str,
) -> anyhow::Result<CellModel> {
    let overrides = match overrides {
        Some(overrides) => overrides,
        None => return Ok(cell),
    };
    if let Some(voc) = overrides.voc {
        if voc <= 0.0 {
            anyhow::bail!(
                "Cell model {:?} has non-positive open circuit voltage",
                label
            );
        }
        cell.open_circuit_voltage = ElectricPotential::new::<volt>(voc);
    }
    if let Some(rs) = overrides.rs {
        if rs < 0.0 {
            anyhow::bail!("Cell model {:?} has negative series resistance", label);
        }
        cell.series_resistance = ElectricalResistance::new::<ohm>(rs);
    }
    if let Some(rsh) = overrides.rsh {
        if rsh <= 0.0 {
            anyhow::bail!("Cell model {:?} has non-positive shunt resistance", label);
        }
        cell.shunt_resistance = ElectricalResistance::new::<ohm>(rsh);
    }
    if let Some(samples) = overrides.voltage_samples {
        if samples < 2 {
            anyhow::bail!("Cell model {:?} needs at least two voltage samples", label);
        }
        cell.voltage_samples = samples;
    }
    if let Some(n) = overrides.ideality {
        cell.ideality_factor = n;
    }
    if let Some(beta) = overrides.bifaciality {
        cell.bifaciality = beta;
    }
    if let Some(count) = overrides.series_cells {
        cell.series_cells = count;
    }
    Ok(cell)
}

mod as_loaded {
    use std::collections::HashSet;

    use serde::Deserialize;

    use super::*;

    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct SimulationConfig {
        pub geometry: Option<Geometry>,
        pub shaded_cell: Option<CellModel>,
        pub flat_cell: Option<CellModel>,
        pub stc_cell: Option<CellModel>,
        pub thermal: Option<Thermal>,
        pub schedule: Option<Schedule>,
        pub tilt_grid: Option<TiltGrid>,
        pub batch_samples: Option<usize>,
        pub reference_samples: Option<usize>,
        pub fallback_temperature_c: Option<f64>,
        pub rear_albedo: Option<f64>,
        pub temperature_table: Option<PathBuf>,
    }

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    pub struct Cell {
        pub name: String,
        pub width_mm: f64,
        pub top: [f64; 2],
        pub bottom: [f64; 2],
    }

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    pub struct Geometry {
        pub cells: Vec<Cell>,
        #[serde(default)]
        pub albedo_cells: Vec<String>,
        pub module_height_mm: Option<f64>,
    }

    impl Geometry {
        pub fn convert(self) -> anyhow::Result<super::ModuleGeometry> {
            if self.cells.is_empty() {
                anyhow::bail!("Geometry has no cells");
            }
            let mut names = HashSet::new();
            for cell in &self.cells {
                if !names.insert(cell.name.as_str()) {
                    anyhow::bail!("Cell {:?} is defined more than once", cell.name);
                }
                if cell.width_mm <= 0.0 {
                    anyhow::bail!("Cell {:?} has non-positive width", cell.name);
                }
            }
            for albedo in &self.albedo_cells {
                if !names.contains(albedo.as_str()) {
                    anyhow::bail!("Could not find albedo cell {:?}", albedo);
                }
            }
            let albedo: HashSet<&str> = self.albedo_cells.iter().map(String::as_str).collect();

            let reference_height = ModuleGeometry::reference().module_height;
            let height = self
                .module_height_mm
                .unwrap_or_else(|| reference_height.get::<millimeter>());
            if height <= 0.0 {
                anyhow::bail!("Module height {} mm is not positive", height);
            }

            let cells = self
                .cells
                .iter()
                .map(|cell| {
                    let rear = if albedo.contains(cell.name.as_str()) {
                        RearExposure::Albedo
                    } else {
                        RearExposure::Diffuse
                    };
                    CellSegment::new(
                        cell.name.clone(),
                        cell.width_mm,
                        cell.top,
                        cell.bottom,
                        rear,
                    )
                })
                .collect();
            Ok(ModuleGeometry::new(cells, Length::new::<millimeter>(height)))
        }
    }

    #[derive(Clone, Debug, Default, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    pub struct CellModel {
        pub voc: Option<f64>,
        pub rs: Option<f64>,
        pub rsh: Option<f64>,
        pub ideality: Option<f64>,
        pub voltage_samples: Option<usize>,
        pub bifaciality: Option<f64>,
        pub series_cells: Option<usize>,
    }

    /// Heating of the outdoor cells
    #[derive(Clone, Debug, Default, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    pub struct Thermal {
        /// Extra offset of the faceted cells, K
        pub offset_k: Option<f64>,
        pub rise_k: Option<f64>,
        pub reference_beam_wm2: Option<f64>,
    }

    impl Thermal {
        pub fn apply(&self, model: &mut CellTemperatureModel, with_offset: bool) {
            if let CellTemperatureModel::Heated {
                offset,
                rise,
                reference_beam,
            } = model
            {
                if with_offset {
                    if let Some(value) = self.offset_k {
                        *offset = TemperatureInterval::new::<kelvin>(value);
                    }
                }
                if let Some(value) = self.rise_k {
                    *rise = TemperatureInterval::new::<kelvin>(value);
                }
                if let Some(value) = self.reference_beam_wm2 {
                    *reference_beam = HeatFluxDensity::new::<watt_per_square_meter>(value);
                }
            }
        }
    }

    #[derive(Clone, Debug, Default, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    pub struct Schedule {
        pub year: Option<i32>,
        pub months: Option<Vec<u32>>,
        pub day: Option<u32>,
        pub hours: Option<Vec<u32>>,
    }

    impl Schedule {
        pub fn convert(self, default: super::Schedule) -> anyhow::Result<super::Schedule> {
            let months = self.months.unwrap_or(default.months);
            if let Some(month) = months.iter().find(|m| !(1..=12).contains(*m)) {
                anyhow::bail!("Schedule month {} is outside of 1..=12", month);
            }
            let hours = self.hours.unwrap_or(default.hours);
            if let Some(hour) = hours.iter().find(|h| **h > 23) {
                anyhow::bail!("Schedule hour {} is outside of 0..=23", hour);
            }
            let day = self.day.unwrap_or(default.day);
            if !(1..=31).contains(&day) {
                anyhow::bail!("Schedule day {} is outside of 1..=31", day);
            }
            Ok(super::Schedule {
                year: self.year.unwrap_or(default.year),
                months,
                day,
                hours,
            })
        }
    }

    #[derive(Clone, Debug, Default, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    pub struct TiltGrid {
        pub start_deg: Option<f64>,
        pub stop_deg: Option<f64>,
        pub step_deg: Option<f64>,
    }

    impl TiltGrid {
        pub fn convert(self, default: super::TiltGrid) -> anyhow::Result<super::TiltGrid> {
            let pick = |value: Option<f64>, fallback: Angle| {
                value.map(Angle::new::<degree>).unwrap_or(fallback)
            };
            super::TiltGrid::new(
                pick(self.start_deg, default.start),
                pick(self.stop_deg, default.stop),
                pick(self.step_deg, default.step),
            )
        }
    }
}
