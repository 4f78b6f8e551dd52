pub mod command;
pub mod grid;
pub mod serializer;
pub mod session;

pub mod errors {
    use std::path::PathBuf;

    use cartogram_io::IoError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum CartogramError {
        #[error("no valid boundary polygon found in {path:?}")]
        InvalidBoundary { path: PathBuf },
        #[error("invalid parameter: {0}")]
        InvalidParameter(String),
        #[error("unsupported coordinate system: {0}")]
        UnsupportedSystem(String),
        #[error("failed to write cartogram {path:?}: {message}")]
        FileWrite { path: PathBuf, message: String },
        #[error(transparent)]
        Load(#[from] IoError),
        #[error("grid generation was cancelled")]
        Cancelled,
        #[error("no boundary loaded")]
        NoBoundary,
    }
}

pub mod system {
    use std::fmt;
    use std::str::FromStr;

    use serde::{Deserialize, Serialize};

    use crate::errors::CartogramError;

    /// 坐标量级达到此值即视为带有分带前缀的国家坐标。
    pub const NATIONAL_MAGNITUDE: f64 = 1_000_000.0;

    /// 图幅编号所用的坐标系。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum CoordinateSystem {
        /// СК-63，坐标带有分带/百万前缀。
        National,
        /// 地方坐标系（МСК）。
        Local,
    }

    /// 按坐标量级判断坐标系，任一坐标绝对值 ≥ 1 000 000 即为国家坐标系。
    pub fn detect_system(x: f64, y: f64) -> CoordinateSystem {
        if x.abs() >= NATIONAL_MAGNITUDE || y.abs() >= NATIONAL_MAGNITUDE {
            CoordinateSystem::National
        } else {
            CoordinateSystem::Local
        }
    }

    impl fmt::Display for CoordinateSystem {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                CoordinateSystem::National => f.write_str("СК63"),
                CoordinateSystem::Local => f.write_str("МСК"),
            }
        }
    }

    impl FromStr for CoordinateSystem {
        type Err = CartogramError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let normalized: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, '-' | '_' | ' '))
                .flat_map(char::to_lowercase)
                .collect();
            match normalized.as_str() {
                "ск63" | "sk63" | "national" => Ok(CoordinateSystem::National),
                "мск" | "msk" | "local" => Ok(CoordinateSystem::Local),
                _ => Err(CartogramError::UnsupportedSystem(s.trim().to_string())),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn magnitude_of_either_coordinate_selects_national() {
            assert_eq!(detect_system(500_000.0, 999_999.0), CoordinateSystem::Local);
            assert_eq!(detect_system(1_500_000.0, 500.0), CoordinateSystem::National);
            assert_eq!(detect_system(10.0, -1_000_000.0), CoordinateSystem::National);
            assert_eq!(detect_system(0.0, 0.0), CoordinateSystem::Local);
        }

        #[test]
        fn parses_names_case_insensitively() {
            assert_eq!("СК-63".parse::<CoordinateSystem>().unwrap(), CoordinateSystem::National);
            assert_eq!("sk63".parse::<CoordinateSystem>().unwrap(), CoordinateSystem::National);
            assert_eq!(" MSK ".parse::<CoordinateSystem>().unwrap(), CoordinateSystem::Local);
            assert_eq!("мск".parse::<CoordinateSystem>().unwrap(), CoordinateSystem::Local);
            assert_eq!("Local".parse::<CoordinateSystem>().unwrap(), CoordinateSystem::Local);

            let err = "wgs84".parse::<CoordinateSystem>().unwrap_err();
            assert!(matches!(err, CartogramError::UnsupportedSystem(name) if name == "wgs84"));
        }

        #[test]
        fn display_round_trips_through_from_str() {
            for system in [CoordinateSystem::National, CoordinateSystem::Local] {
                let parsed: CoordinateSystem = system.to_string().parse().unwrap();
                assert_eq!(parsed, system);
            }
        }
    }
}

pub mod boundary {
    use std::path::Path;

    use cartogram_core::document::Document;
    use cartogram_core::geometry::{Bounds2D, polygon_from_points};
    use cartogram_io::{DocumentLoader, DxfFacade};
    use geo::{BoundingRect, MultiPolygon, Polygon};
    use tracing::{debug, info};

    use crate::errors::CartogramError;
    use crate::system::{CoordinateSystem, detect_system};

    /// 测区边界：一个或多个互相独立的多边形。构造后不可变，且至少含一个多边形。
    #[derive(Debug, Clone, PartialEq)]
    pub struct Boundary {
        polygons: MultiPolygon<f64>,
        bounds: Bounds2D,
    }

    impl Boundary {
        /// 多边形列表为空时返回 `None`。
        pub fn new(polygons: Vec<Polygon<f64>>) -> Option<Self> {
            let polygons = MultiPolygon::new(polygons);
            let bounds = Bounds2D::from(polygons.bounding_rect()?);
            Some(Self { polygons, bounds })
        }

        #[inline]
        pub fn polygons(&self) -> &[Polygon<f64>] {
            &self.polygons.0
        }

        /// 全部外环的包围盒。
        #[inline]
        pub fn bounds(&self) -> Bounds2D {
            self.bounds
        }

        /// 以包围盒左下角判断坐标系。
        pub fn detect_system(&self) -> CoordinateSystem {
            let min = self.bounds.min();
            detect_system(min.x(), min.y())
        }
    }

    /// 读取 DXF 并提取全部闭合多段线作为边界多边形。
    pub fn parse_boundary(path: &Path) -> Result<Boundary, CartogramError> {
        let document = DxfFacade::new().load(path)?;
        let boundary = boundary_from_document(&document).ok_or_else(|| {
            CartogramError::InvalidBoundary {
                path: path.to_path_buf(),
            }
        })?;
        info!(
            path = %path.display(),
            polygon_count = boundary.polygons().len(),
            "边界读取完成"
        );
        Ok(boundary)
    }

    /// 每条闭合多段线各自成为一个无洞多边形；不合法的候选被丢弃。
    pub fn boundary_from_document(document: &Document) -> Option<Boundary> {
        let mut polygons = Vec::new();
        for (index, polyline) in document.polylines().enumerate() {
            if !polyline.is_effectively_closed() {
                continue;
            }
            match polygon_from_points(polyline.vertices.iter().copied()) {
                Ok(polygon) => polygons.push(polygon),
                Err(err) => {
                    debug!(index, layer = %polyline.layer, error = %err, "丢弃无效的边界多段线");
                }
            }
        }
        Boundary::new(polygons)
    }

    #[cfg(test)]
    mod tests {
        use std::fs;

        use cartogram_core::geometry::Point2;
        use geo::Area;

        use super::*;

        const CLOSED_SQUARE: &str = "0\nLWPOLYLINE\n8\nSITE\n90\n4\n70\n1\n10\n0\n20\n0\n10\n40\n20\n0\n10\n40\n20\n30\n10\n0\n20\n30\n";
        const FLAT: &str = "0\nLWPOLYLINE\n8\nFLAT\n90\n3\n70\n1\n10\n0\n20\n0\n10\n5\n20\n5\n10\n10\n20\n10\n";
        const BOW_TIE: &str = "0\nLWPOLYLINE\n8\nBOWTIE\n90\n4\n70\n1\n10\n0\n20\n0\n10\n10\n20\n10\n10\n10\n20\n0\n10\n0\n20\n5\n";
        const EMPTY_LWPOLYLINE: &str = "0\nLWPOLYLINE\n8\nEMPTY\n90\n0\n70\n1\n";

        fn write_dxf(dir: &tempfile::TempDir, name: &str, entities: &str) -> std::path::PathBuf {
            let path = dir.path().join(name);
            let content = if entities.is_empty() {
                String::new()
            } else {
                format!("0\nSECTION\n2\nENTITIES\n{entities}0\nENDSEC\n0\nEOF\n")
            };
            fs::write(&path, content).expect("write dxf");
            path
        }

        #[test]
        fn open_and_degenerate_polylines_are_discarded() {
            let mut document = Document::new();
            document.add_polyline(
                [
                    Point2::new(0.0, 0.0),
                    Point2::new(10.0, 0.0),
                    Point2::new(10.0, 10.0),
                ],
                false,
                "OPEN",
            );
            document.add_polyline(
                [
                    Point2::new(0.0, 0.0),
                    Point2::new(5.0, 5.0),
                    Point2::new(10.0, 10.0),
                ],
                true,
                "FLAT",
            );
            document.add_polyline(
                [
                    Point2::new(0.0, 0.0),
                    Point2::new(10.0, 10.0),
                    Point2::new(10.0, 0.0),
                    Point2::new(0.0, 5.0),
                ],
                true,
                "BOWTIE",
            );
            assert!(boundary_from_document(&document).is_none());

            document.add_polyline(
                [
                    Point2::new(0.0, 0.0),
                    Point2::new(40.0, 0.0),
                    Point2::new(40.0, 30.0),
                    Point2::new(0.0, 0.0),
                ],
                false,
                "SITE",
            );
            let boundary = boundary_from_document(&document).expect("one valid polygon");
            assert_eq!(boundary.polygons().len(), 1);
            assert!(boundary.polygons()[0].interiors().is_empty());
            assert!((boundary.polygons()[0].unsigned_area() - 600.0).abs() < 1e-9);
        }

        #[test]
        fn boundary_bounds_cover_every_polygon() {
            let square = |x: f64, y: f64| {
                polygon_from_points([
                    Point2::new(x, y),
                    Point2::new(x + 10.0, y),
                    Point2::new(x + 10.0, y + 10.0),
                    Point2::new(x, y + 10.0),
                ])
                .unwrap()
            };
            let boundary = Boundary::new(vec![square(0.0, 0.0), square(100.0, -50.0)]).unwrap();
            assert_eq!(boundary.bounds().extents(), (0.0, -50.0, 110.0, 10.0));
            assert_eq!(boundary.detect_system(), CoordinateSystem::Local);
            assert!(Boundary::new(Vec::new()).is_none());
        }

        #[test]
        fn empty_file_is_an_invalid_boundary() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_dxf(&dir, "empty.dxf", "");
            let err = parse_boundary(&path).unwrap_err();
            assert!(matches!(err, CartogramError::InvalidBoundary { path: p } if p == path));
        }

        #[test]
        fn file_with_only_invalid_polylines_is_an_invalid_boundary() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_dxf(
                &dir,
                "degenerate.dxf",
                &format!("{FLAT}{BOW_TIE}{EMPTY_LWPOLYLINE}"),
            );
            let err = parse_boundary(&path).unwrap_err();
            assert!(matches!(err, CartogramError::InvalidBoundary { .. }));
        }

        #[test]
        fn valid_polygon_survives_next_to_broken_entities() {
            let dir = tempfile::tempdir().unwrap();
            let heightless_text = "0\nTEXT\n8\nNOTE\n10\n5\n20\n5\n1\nno height\n";
            let path = write_dxf(
                &dir,
                "mixed.dxf",
                &format!("{EMPTY_LWPOLYLINE}{BOW_TIE}{CLOSED_SQUARE}{heightless_text}{FLAT}"),
            );
            let boundary = parse_boundary(&path).expect("one valid polygon");
            assert_eq!(boundary.polygons().len(), 1);
            assert_eq!(boundary.bounds().extents(), (0.0, 0.0, 40.0, 30.0));
        }
    }
}

pub mod nomenclature {
    use std::collections::{BTreeMap, BTreeSet};

    use serde::{Deserialize, Serialize};

    use crate::grid::GridCell;
    use crate::system::CoordinateSystem;

    /// 国家坐标系中去掉分带前缀所用的模数。
    pub const ZONE_MODULUS: f64 = 100_000.0;
    /// 图幅块边长。
    pub const BLOCK_SIZE: f64 = 1_000.0;
    /// 分幅边长，每个图幅块按 4×4 划分。
    pub const SUB_SHEET_SIZE: f64 = 250.0;
    const SUB_SHEETS_PER_SIDE: i64 = 4;

    /// 计算点所在分幅的编号，形如 `"YY+XX;NN"`。
    pub fn encode(x: f64, y: f64, system: CoordinateSystem) -> String {
        let (x, y) = match system {
            CoordinateSystem::National => (x.rem_euclid(ZONE_MODULUS), y.rem_euclid(ZONE_MODULUS)),
            CoordinateSystem::Local => (x, y),
        };
        let base_row = (y / BLOCK_SIZE).floor() as i64;
        let base_col = (x / BLOCK_SIZE).floor() as i64;
        let quadrant_col = quadrant(x);
        let quadrant_row = quadrant(y);
        let number = (SUB_SHEETS_PER_SIDE - 1 - quadrant_row) * SUB_SHEETS_PER_SIDE + quadrant_col + 1;
        format!("{base_row:02}+{base_col:02};{number:02}")
    }

    fn quadrant(value: f64) -> i64 {
        let within = value.rem_euclid(BLOCK_SIZE);
        ((within / SUB_SHEET_SIZE).floor() as i64).clamp(0, SUB_SHEETS_PER_SIDE - 1)
    }

    /// 同一图幅块内的分幅汇总。
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct NomenclatureInfo {
        pub base: String,
        pub numbers: Vec<String>,
        pub full_nomenclature: String,
    }

    /// 按图幅块分组，块名与分幅号均按字符串排序。
    pub fn aggregate(cells: &[GridCell]) -> Vec<NomenclatureInfo> {
        let mut groups: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for cell in cells {
            let mut parts = cell.nomenclature.split(';');
            if let (Some(base), Some(number), None) = (parts.next(), parts.next(), parts.next()) {
                groups.entry(base).or_default().insert(number);
            }
        }
        groups
            .into_iter()
            .map(|(base, numbers)| {
                let numbers: Vec<String> = numbers.into_iter().map(str::to_string).collect();
                NomenclatureInfo {
                    full_nomenclature: format!("{base};{}", numbers.join(",")),
                    base: base.to_string(),
                    numbers,
                }
            })
            .collect()
    }

}
