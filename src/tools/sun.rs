use chrono::{DateTime, Datelike, Utc};
use nalgebra::{Vector2, Vector3};
use uom::si::{
    angle::degree,
    f64::{Angle, HeatFluxDensity},
    heat_flux_density::watt_per_square_meter,
    ratio::ratio,
};

const SOLAR_CONST: f64 = 1367.0; // W/m^2

/// Get three dimensional Vector from azimuth and zenith angle.
/// This can be used to get the normal vector of a tilted surface or the Sun.
///
/// Output vector coordinate system is following:
/// - north -> positive x axis / south -> negative x axis
/// - east -> positive y axis / west -> negative y axis
/// - z: up
///
/// # Arguments
/// * `azimuth` - angle between north and the surface normal / sun vector
/// * `zenith_angle` - angle between the vector and vertical axis
///
/// # Returns
/// * `Vector3<f64>` - three dimensional unit vector
pub fn get_vector_from_azimuth_zenith(azimuth: &Angle, zenith_angle: &Angle) -> Vector3<f64> {
    let x = azimuth.cos().get::<ratio>() * zenith_angle.sin().get::<ratio>();
    let y = azimuth.sin().get::<ratio>() * zenith_angle.sin().get::<ratio>();
    let z = zenith_angle.cos().get::<ratio>();
    Vector3::new(x, y, z).normalize()
}

/// Horizontal unit vector pointing towards the given azimuth.
fn get_horizontal_heading(azimuth: &Angle) -> Vector3<f64> {
    let x = azimuth.cos().get::<ratio>();
    let y = azimuth.sin().get::<ratio>();
    Vector3::new(x, y, 0.0)
}

/// Cosine of the angle of incidence of beam light on a flat plate.
///
/// # Arguments
/// * `surface_azimuth` - orientation of the plate
/// * `surface_tilt` - angle between the plate and the horizontal plane
/// * `solar_azimuth` - azimuth of the sun
/// * `solar_zenith` - zenith angle of the sun
///
/// # Returns
/// * `f64` - dot product of the plate normal and the sun vector, never negative
pub fn get_projection(
    surface_azimuth: &Angle,
    surface_tilt: &Angle,
    solar_azimuth: &Angle,
    solar_zenith: &Angle,
) -> f64 {
    let sun_vector = get_vector_from_azimuth_zenith(solar_azimuth, solar_zenith);
    let surface_normal = get_vector_from_azimuth_zenith(surface_azimuth, surface_tilt);
    sun_vector.dot(&surface_normal).max(0.0)
}

/// Direction towards the sun inside the module cross-section plane.
///
/// The cross-section is the vertical plane containing the module azimuth:
/// the first component runs horizontally towards the module azimuth, the second is up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunVector(Vector2<f64>);

impl SunVector {
    /// Project the sun onto the cross-section of a module facing `module_azimuth`.
    /// A sun with no component in the plane maps to the zero vector.
    pub fn from_angles(zenith: &Angle, azimuth: &Angle, module_azimuth: &Angle) -> Self {
        let sun = get_vector_from_azimuth_zenith(azimuth, zenith);
        let horizontal = sun.dot(&get_horizontal_heading(module_azimuth));
        Self::from_components(horizontal, sun.z)
    }

    /// Sun straight overhead, as used for standard test conditions.
    pub fn overhead() -> Self {
        SunVector(Vector2::new(0.0, 1.0))
    }

    pub fn from_components(horizontal: f64, vertical: f64) -> Self {
        let v = Vector2::new(horizontal, vertical);
        let norm = v.norm();
        if norm == 0.0 {
            SunVector(Vector2::zeros())
        } else {
            SunVector(v / norm)
        }
    }

    /// Unit vector pointing from the module towards the sun.
    pub fn to_sun(&self) -> Vector2<f64> {
        self.0
    }

    /// Direction light travels in (away from the sun).
    pub fn light_direction(&self) -> Vector2<f64> {
        -self.0
    }

    pub fn is_degenerate(&self) -> bool {
        self.0 == Vector2::zeros()
    }
}

// Calculate extraterrestrial solar radiation at any given time.
// Average value for a day is 1367 W/m^2 which is corrected by a distance between the earth and the sun
// Source: http://solardat.uoregon.edu/SolarRadiationBasics.html#Ref3
pub fn get_extraterrestrial_radiation(utc: &DateTime<Utc>) -> HeatFluxDensity {
    let day = f64::from(utc.ordinal()) - 1.0;
    let day_angle: Angle = Angle::new::<degree>(360.0 / 365.0 * day);
    // (R_avg / R)^2 -- R_avg is the mean sun-earth distance and R is the actual sun-earth distance
    let distances_ratio = 1.00011
        + 0.034221 * day_angle.cos().get::<ratio>()
        + 0.00128 * day_angle.sin().get::<ratio>()
        + 0.000719 * (2.0 * day_angle).cos().get::<ratio>()
        + 7.7e-05 * (2.0 * day_angle).sin().get::<ratio>();

    HeatFluxDensity::new::<watt_per_square_meter>(SOLAR_CONST * distances_ratio)
}
