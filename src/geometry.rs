//! Cross-section geometry of a faceted module.
//!
//! Every cell is a 2D line segment in the module reference frame (millimetres,
//! x horizontal towards the module azimuth, y up). Tilting rotates copies of the
//! segments and never touches the reference layout.

use nalgebra::{Point2, Rotation2, Vector2};
use uom::si::{
    angle::radian,
    f64::{Angle, Area, Length},
    length::millimeter,
};

#[cfg(test)]
use proptest::{
    arbitrary::Arbitrary,
    prelude::prop,
    strategy::{BoxedStrategy, Strategy},
};

/// Which rear bucket a cell collects light into.
/// A cell faces either the ground (reflected albedo light) or the sky (diffuse only).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RearExposure {
    Albedo,
    Diffuse,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellSegment {
    pub name: String,
    /// Endpoints in millimetres
    pub top: Point2<f64>,
    pub bottom: Point2<f64>,
    pub width: Length,
    pub rear: RearExposure,
}

impl CellSegment {
    pub fn new(
        name: impl Into<String>,
        width_mm: f64,
        top: [f64; 2],
        bottom: [f64; 2],
        rear: RearExposure,
    ) -> Self {
        CellSegment {
            name: name.into(),
            top: Point2::from(top),
            bottom: Point2::from(bottom),
            width: Length::new::<millimeter>(width_mm),
            rear,
        }
    }

    /// Illuminated front area of the cell, width times the module height.
    pub fn front_area(&self, module_height: Length) -> Area {
        self.width * module_height
    }
}

#[cfg(test)]
impl Arbitrary for CellSegment {
    type Parameters = ();
    type Strategy = BoxedStrategy<CellSegment>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (
            "[A-Z][0-9]",
            1f64..150f64,
            (-150f64..150f64, -150f64..150f64),
            (-150f64..150f64, -150f64..150f64),
            prop::bool::ANY,
        )
            .prop_map(|(name, width, top, bottom, albedo)| {
                CellSegment::new(
                    name,
                    width,
                    [top.0, top.1],
                    [bottom.0, bottom.1],
                    if albedo {
                        RearExposure::Albedo
                    } else {
                        RearExposure::Diffuse
                    },
                )
            })
            .boxed()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModuleGeometry {
    pub cells: Vec<CellSegment>,
    pub module_height: Length,
}

impl ModuleGeometry {
    pub fn new(cells: Vec<CellSegment>, module_height: Length) -> Self {
        ModuleGeometry {
            cells,
            module_height,
        }
    }

    /// The eight-cell faceted reference module.
    pub fn reference() -> Self {
        use RearExposure::*;
        let cells = vec![
            CellSegment::new("C8", 112.6, [0.00, 113.91], [0.00, 1.31], Albedo),
            CellSegment::new("C1", 112.6, [114.23, 0.00], [1.63, 0.00], Albedo),
            CellSegment::new("C4", 43.2, [102.41, 97.91], [87.63, 55.46], Diffuse),
            CellSegment::new("C6", 47.8, [48.51, 100.55], [33.73, 55.10], Diffuse),
            CellSegment::new("C5", 37.0, [70.44, 104.80], [81.84, 69.59], Diffuse),
            CellSegment::new("C7", 37.0, [16.45, 104.07], [27.84, 68.87], Diffuse),
            CellSegment::new("C3", 32.4, [60.05, 59.95], [77.77, 32.82], Diffuse),
            CellSegment::new("C2", 32.4, [108.48, 46.73], [90.94, 19.49], Diffuse),
        ];
        ModuleGeometry::new(cells, Length::new::<millimeter>(182.0))
    }

    /// Rotate the whole cross-section by `tilt` (counter-clockwise about the origin).
    pub fn at_tilt(&self, tilt: Angle) -> TiltedModule<'_> {
        let rotation = Rotation2::new(tilt.get::<radian>());
        let segments = self
            .cells
            .iter()
            .map(|cell| Segment {
                a: rotation * cell.top,
                b: rotation * cell.bottom,
            })
            .collect();
        TiltedModule {
            geometry: self,
            segments,
        }
    }
}

impl Default for ModuleGeometry {
    fn default() -> Self {
        ModuleGeometry::reference()
    }
}

/// A segment after rotation, endpoints in millimetres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub a: Point2<f64>,
    pub b: Point2<f64>,
}

impl Segment {
    pub fn point_at(&self, t: f64) -> Point2<f64> {
        self.a + (self.b - self.a) * t
    }

    /// Unit tangent from `a` to `b`, zero for a zero-length segment.
    pub fn tangent(&self) -> Vector2<f64> {
        let d = self.b - self.a;
        let len = d.norm();
        if len == 0.0 {
            Vector2::zeros()
        } else {
            d / len
        }
    }

    /// Tangent rotated by +90 degrees.
    pub fn normal(&self) -> Vector2<f64> {
        let t = self.tangent();
        Vector2::new(-t.y, t.x)
    }
}

/// Reference geometry viewed at one tilt. Segment `i` belongs to `geometry.cells[i]`.
#[derive(Clone, Debug)]
pub struct TiltedModule<'a> {
    pub geometry: &'a ModuleGeometry,
    pub segments: Vec<Segment>,
}

impl TiltedModule<'_> {
    pub fn cells(&self) -> impl Iterator<Item = (&CellSegment, &Segment)> + '_ {
        self.geometry.cells.iter().zip(self.segments.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use uom::si::{angle::degree, area::square_millimeter};

    #[test]
    fn reference_module_layout() {
        let geometry = ModuleGeometry::reference();
        assert_eq!(geometry.cells.len(), 8);
        let albedo: Vec<_> = geometry
            .cells
            .iter()
            .filter(|c| c.rear == RearExposure::Albedo)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(albedo, vec!["C8", "C1"]);
    }

    #[test]
    fn front_area_uses_module_height() {
        let geometry = ModuleGeometry::reference();
        let area = geometry.cells[2].front_area(geometry.module_height);
        let area = area.get::<square_millimeter>();
        assert_abs_diff_eq!(area, 43.2 * 182.0, epsilon = 1e-6);
    }

    #[test]
    fn tilt_does_not_mutate_reference() {
        let geometry = ModuleGeometry::reference();
        let before = geometry.clone();
        let tilted = geometry.at_tilt(Angle::new::<degree>(90.0));
        assert_eq!(geometry, before);

        // C1 lies on the x axis, a quarter turn puts it on the y axis
        let c1 = tilted.segments[1];
        assert_abs_diff_eq!(c1.a, Point2::new(0.0, 114.23), epsilon = 1e-9);
        assert_abs_diff_eq!(c1.b, Point2::new(0.0, 1.63), epsilon = 1e-9);
    }

    #[test]
    fn zero_tilt_is_identity() {
        let geometry = ModuleGeometry::reference();
        let tilted = geometry.at_tilt(Angle::new::<degree>(0.0));
        for (cell, segment) in tilted.cells() {
            assert_abs_diff_eq!(segment.a, cell.top, epsilon = 1e-12);
            assert_abs_diff_eq!(segment.b, cell.bottom, epsilon = 1e-12);
        }
    }

    #[test]
    fn zero_length_segment_has_no_normal() {
        let s = Segment {
            a: Point2::new(1.0, 1.0),
            b: Point2::new(1.0, 1.0),
        };
        assert_eq!(s.normal(), Vector2::zeros());
    }

    #[test]
    fn normal_is_counter_clockwise() {
        let s = Segment {
            a: Point2::new(0.0, 0.0),
            b: Point2::new(2.0, 0.0),
        };
        assert_abs_diff_eq!(s.normal(), Vector2::new(0.0, 1.0), epsilon = 1e-12);
    }
}
