//! Ambient conditions for a site: sun position, clear sky irradiance and air temperature.
//!
//! Everything here is resolved up front, before the tilt driver runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike, Utc};
use itertools::iproduct;
use tracing::{debug, warn};
use uom::si::{
    angle::degree,
    f64::{Angle, HeatFluxDensity, ThermodynamicTemperature},
    heat_flux_density::watt_per_square_meter,
    ratio::ratio,
    thermodynamic_temperature::degree_celsius,
};

use crate::tilt::TimestepInput;
use crate::tools::sun::get_extraterrestrial_radiation;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Site {
    /// Degrees, north positive
    pub latitude: f64,
    /// Degrees, east positive
    pub longitude: f64,
}

impl Site {
    pub fn new(latitude: f64, longitude: f64) -> anyhow::Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            anyhow::bail!("Latitude {} is outside of [-90, 90] degrees", latitude);
        }
        if !(-180.0..=180.0).contains(&longitude) {
            anyhow::bail!("Longitude {} is outside of [-180, 180] degrees", longitude);
        }
        Ok(Site {
            latitude,
            longitude,
        })
    }

    /// Modules face the equator.
    pub fn module_azimuth(&self) -> Angle {
        if self.latitude >= 0.0 {
            Angle::new::<degree>(180.0)
        } else {
            Angle::new::<degree>(0.0)
        }
    }

    /// Solar time zone of the site, whole hours from the longitude.
    pub fn utc_offset(&self) -> anyhow::Result<FixedOffset> {
        let hours = (self.longitude / 15.0).round() as i32;
        FixedOffset::east_opt(hours * 3600)
            .ok_or_else(|| anyhow::anyhow!("Invalid UTC offset of {} hours", hours))
    }
}

/// Sun position and irradiance at one instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolarConditions {
    pub zenith: Angle,
    pub azimuth: Angle,
    pub dni: HeatFluxDensity,
    pub dhi: HeatFluxDensity,
    pub ghi: HeatFluxDensity,
}

pub trait AmbientProvider {
    fn solar_conditions(
        &self,
        site: &Site,
        timestamp_utc: &DateTime<Utc>,
    ) -> anyhow::Result<SolarConditions>;
}

/// Atmosphere of the Bird-Hulstrom clear sky model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearSkyProvider {
    /// Aerosol optical depth at 380 nm
    pub aod380: f64,
    /// Aerosol optical depth at 500 nm
    pub aod500: f64,
    /// Total column water vapour, cm
    pub precipitable_water: f64,
    /// Ozone column, cm
    pub ozone: f64,
    /// Surface pressure, Pa
    pub pressure: f64,
    /// Share of the scattered radiation sent forward; 0.85 for rural sites
    pub asymmetry: f64,
    pub albedo: f64,
}

impl Default for ClearSkyProvider {
    fn default() -> Self {
        ClearSkyProvider {
            aod380: 0.15,
            aod500: 0.1,
            precipitable_water: 1.42,
            ozone: 0.3,
            pressure: 101325.0,
            asymmetry: 0.85,
            albedo: 0.2,
        }
    }
}

impl ClearSkyProvider {
    fn bird(&self, utc: &DateTime<Utc>, zenith: Angle) -> (f64, f64, f64) {
        let dni_extra = get_extraterrestrial_radiation(utc).get::<watt_per_square_meter>();
        let cos_zenith = zenith.cos().get::<ratio>();

        // air mass and pressure corrected air mass
        let airmass = 1.0 / (cos_zenith + 0.15 * (93.885 - zenith.get::<degree>()).powf(-1.25));
        let am_press = airmass * self.pressure / 101325.0;

        let t_rayleigh =
            (-0.0903 * am_press.powf(0.84) * (1.0 + am_press - am_press.powf(1.01))).exp();

        let am_o3 = airmass * self.ozone;
        let t_ozone = 1.0
            - 0.1611 * am_o3 * (1.0 + 139.48 * am_o3).powf(-0.3034)
            - 0.002715 * am_o3 / (1.0 + 0.044 * am_o3 + 0.0003 * am_o3.powi(2));

        let t_gases = (-0.0127 * am_press.powf(0.26)).exp();

        let am_h2o = airmass * self.precipitable_water;
        let t_water =
            1.0 - 2.4959 * am_h2o / ((1.0 + 79.034 * am_h2o).powf(0.6828) + 6.385 * am_h2o);

        let bird_hulstrom = 0.27583 * self.aod380 + 0.35 * self.aod500;
        let aerosol_depth = bird_hulstrom.powf(0.873)
            * (1.0 + bird_hulstrom - bird_hulstrom.powf(0.7088))
            * airmass.powf(0.9108);
        let t_aerosol = (-aerosol_depth).exp();
        let taa = 1.0 - 0.1 * (1.0 - airmass + airmass.powf(1.06)) * (1.0 - t_aerosol);
        let rs = 0.0685 + (1.0 - self.asymmetry) * (1.0 - t_aerosol / taa);

        let dni = 0.9662 * dni_extra * t_aerosol * t_water * t_gases * t_ozone * t_rayleigh;
        let direct_horizontal = dni * cos_zenith;

        let scattered = dni_extra
            * cos_zenith
            * 0.79
            * t_ozone
            * t_gases
            * t_water
            * taa
            * (0.5 * (1.0 - t_rayleigh) + self.asymmetry * (1.0 - t_aerosol / taa))
            / (1.0 - airmass + airmass.powf(1.02));
        let ghi = (direct_horizontal + scattered) / (1.0 - self.albedo * rs);

        (dni, ghi - direct_horizontal, ghi)
    }
}

impl AmbientProvider for ClearSkyProvider {
    fn solar_conditions(
        &self,
        site: &Site,
        utc: &DateTime<Utc>,
    ) -> anyhow::Result<SolarConditions> {
        let position = spa::calc_solar_position(*utc, site.latitude, site.longitude)
            .map_err(|e| anyhow::anyhow!("Solar position lookup failed for {}: {:?}", utc, e))?;
        let zenith = Angle::new::<degree>(position.zenith_angle);
        let azimuth = Angle::new::<degree>(position.azimuth);

        let (dni, dhi, ghi) = if position.zenith_angle < 90.0 {
            self.bird(utc, zenith)
        } else {
            (0.0, 0.0, 0.0)
        };
        let wm2 = HeatFluxDensity::new::<watt_per_square_meter>;

        Ok(SolarConditions {
            zenith,
            azimuth,
            dni: wm2(dni.max(0.0)),
            dhi: wm2(dhi.max(0.0)),
            ghi: wm2(ghi.max(0.0)),
        })
    }
}

pub trait TemperatureSource {
    fn air_temperature(
        &self,
        local: &DateTime<FixedOffset>,
    ) -> anyhow::Result<ThermodynamicTemperature>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedTemperature(pub ThermodynamicTemperature);

impl TemperatureSource for FixedTemperature {
    fn air_temperature(
        &self,
        _local: &DateTime<FixedOffset>,
    ) -> anyhow::Result<ThermodynamicTemperature> {
        Ok(self.0)
    }
}

/// Typical air temperature for every hour of a day, one day per month.
#[derive(Clone, Debug, PartialEq)]
pub struct TemperatureTable {
    /// Month 1..=12 -> 24 hourly values in degC
    pub hourly: BTreeMap<u32, Vec<f64>>,
}

impl TemperatureTable {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let string = fs::read_to_string(path)?;
        Self::from_json(&string)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let loaded: BTreeMap<String, Vec<f64>> = json5::from_str(json)?;
        let hourly = loaded
            .into_iter()
            .map(|(key, values)| {
                let month: u32 = key.parse().map_err(|_| {
                    anyhow::anyhow!("Temperature table key {:?} is not a month", key)
                })?;
                if !(1..=12).contains(&month) {
                    anyhow::bail!("Temperature table month {} is outside of 1..=12", month);
                }
                if values.len() != 24 {
                    anyhow::bail!(
                        "Temperature table month {} has {} hourly values instead of 24",
                        month,
                        values.len()
                    );
                }
                Ok((month, values))
            })
            .collect::<anyhow::Result<BTreeMap<_, _>>>()?;
        Ok(TemperatureTable { hourly })
    }
}

impl TemperatureSource for TemperatureTable {
    fn air_temperature(
        &self,
        local: &DateTime<FixedOffset>,
    ) -> anyhow::Result<ThermodynamicTemperature> {
        let month = local.month();
        let hours = self
            .hourly
            .get(&month)
            .ok_or_else(|| anyhow::anyhow!("No temperatures for month {}", month))?;
        Ok(ThermodynamicTemperature::new::<degree_celsius>(hours[local.hour() as usize]))
    }
}

/// Representative timesteps of the simulated year, in local solar time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    pub year: i32,
    pub months: Vec<u32>,
    pub day: u32,
    pub hours: Vec<u32>,
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule {
            year: 2024,
            months: (1..=12).collect(),
            day: 21,
            hours: (9..=16).collect(),
        }
    }
}

impl Schedule {
    pub fn local_timestamps(
        &self,
        offset: FixedOffset,
    ) -> anyhow::Result<Vec<DateTime<FixedOffset>>> {
        iproduct!(self.months.iter(), self.hours.iter())
            .map(|(&month, &hour)| {
                offset
                    .with_ymd_and_hms(self.year, month, self.day, hour, 0, 0)
                    .single()
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "Invalid timestamp {}-{:02}-{:02} {:02}:00",
                            self.year,
                            month,
                            self.day,
                            hour
                        )
                    })
            })
            .collect()
    }
}

/// Resolve sun, irradiance and air temperature for every timestep of the schedule.
///
/// A failing temperature source puts the run on `fallback` for every timestep.
pub fn resolve_inputs(
    site: &Site,
    schedule: &Schedule,
    provider: &dyn AmbientProvider,
    temperature: &dyn TemperatureSource,
    fallback: ThermodynamicTemperature,
) -> anyhow::Result<Vec<TimestepInput>> {
    let local = schedule.local_timestamps(site.utc_offset()?)?;

    let temperatures = match local
        .iter()
        .map(|t| temperature.air_temperature(t))
        .collect::<anyhow::Result<Vec<_>>>()
    {
        Ok(temperatures) => temperatures,
        Err(e) => {
            warn!(
                error = %e,
                fallback_c = fallback.get::<degree_celsius>(),
                "Air temperature unavailable, using the fallback for the whole run"
            );
            vec![fallback; local.len()]
        }
    };

    local
        .into_iter()
        .zip(temperatures)
        .map(|(timestamp_local, ambient_temperature)| {
            let timestamp_utc = timestamp_local.with_timezone(&Utc);
            let sun = provider.solar_conditions(site, &timestamp_utc)?;
            debug!(
                %timestamp_utc,
                zenith = sun.zenith.get::<degree>(),
                dni = sun.dni.get::<watt_per_square_meter>(),
                "Resolved timestep"
            );
            Ok(TimestepInput {
                timestamp_local,
                timestamp_utc,
                zenith: sun.zenith,
                azimuth: sun.azimuth,
                dni: sun.dni,
                dhi: sun.dhi,
                ghi: sun.ghi,
                ambient_temperature,
            })
        })
        .collect()
}
