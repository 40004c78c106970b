//! Assigns ambient irradiance components to the four area buckets of every cell.

use uom::si::{f64::HeatFluxDensity, heat_flux_density::watt_per_square_meter};

use crate::area_matrix::AreaMatrix;

/// Irradiance components reaching the module, all in W/m^2.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AmbientLight {
    /// Direct normal irradiance
    pub beam: HeatFluxDensity,
    /// Diffuse horizontal irradiance
    pub diffuse: HeatFluxDensity,
    /// Light reflected from the ground
    pub ground_reflected: HeatFluxDensity,
    pub global_horizontal: Option<HeatFluxDensity>,
}

impl AmbientLight {
    /// Light as reported by a weather or clear sky source.
    pub fn field(beam: HeatFluxDensity, diffuse: HeatFluxDensity, global: HeatFluxDensity) -> Self {
        AmbientLight {
            beam,
            diffuse,
            ground_reflected: HeatFluxDensity::new::<watt_per_square_meter>(0.0),
            global_horizontal: Some(global),
        }
    }

    /// Build the light field from direct and albedo levels and a diffuse fraction `n`.
    ///
    /// diffuse = n * (direct + albedo)
    pub fn decompose(
        direct: HeatFluxDensity,
        albedo: HeatFluxDensity,
        diffuse_fraction: f64,
    ) -> anyhow::Result<Self> {
        if !(0.0..1.0).contains(&diffuse_fraction) {
            anyhow::bail!(
                "Diffuse fraction {} is outside of the interval [0, 1)",
                diffuse_fraction
            );
        }
        Ok(AmbientLight {
            beam: direct,
            diffuse: diffuse_fraction * (direct + albedo),
            ground_reflected: albedo,
            global_horizontal: None,
        })
    }

    pub fn total(&self) -> HeatFluxDensity {
        self.beam + self.ground_reflected + self.diffuse
    }
}

/// Source of the light on the albedo-collecting rear bucket.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RearIrradiance {
    /// The `ground_reflected` level of the light field, independent of orientation
    Flat,
    /// `albedo` times the global horizontal irradiance
    GroundReflected { albedo: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IrradianceModel {
    /// Add the diffuse level on top of `beam * cosine` in the direct bucket
    pub direct_includes_diffuse: bool,
    pub rear: RearIrradiance,
}

impl IrradianceModel {
    /// Outdoor conditions: rear side sees a fraction of the global horizontal light.
    pub fn field(rear_albedo: f64) -> Self {
        IrradianceModel {
            direct_includes_diffuse: false,
            rear: RearIrradiance::GroundReflected {
                albedo: rear_albedo,
            },
        }
    }

    pub fn standard_test() -> Self {
        IrradianceModel {
            direct_includes_diffuse: true,
            rear: RearIrradiance::Flat,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IlluminanceRow {
    pub cell: String,
    pub direct: HeatFluxDensity,
    pub shaded: HeatFluxDensity,
    pub rear_albedo: HeatFluxDensity,
    pub rear_diffuse: HeatFluxDensity,
}

/// Irradiance on each bucket of each row of the area matrix, in row order.
pub fn map_irradiance(
    areas: &AreaMatrix,
    light: &AmbientLight,
    model: &IrradianceModel,
) -> anyhow::Result<Vec<IlluminanceRow>> {
    let rear_albedo = match model.rear {
        RearIrradiance::Flat => light.ground_reflected,
        RearIrradiance::GroundReflected { albedo } => {
            let global = light.global_horizontal.ok_or_else(|| {
                anyhow::anyhow!("Ground reflected rear model needs global horizontal irradiance")
            })?;
            albedo * global
        }
    };

    Ok(areas
        .iter()
        .map(|row| {
            let mut direct = row.cosine * light.beam;
            if model.direct_includes_diffuse {
                direct += light.diffuse;
            }
            IlluminanceRow {
                cell: row.cell.clone(),
                direct,
                shaded: light.diffuse,
                rear_albedo,
                rear_diffuse: light.diffuse,
            }
        })
        .collect())
}
