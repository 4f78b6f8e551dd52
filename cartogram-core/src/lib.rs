pub mod geometry {
    use geo::{Area, Contains, Coord, LineString, Polygon, Rect, Validation};
    use glam::DVec2;
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    /// 判定两个坐标重合时使用的绝对容差。
    pub const COINCIDENCE_TOLERANCE: f64 = 1e-9;

    /// 二维点，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }

        /// 在 `COINCIDENCE_TOLERANCE` 范围内判断两点是否重合。
        #[inline]
        pub fn coincides(self, other: Point2) -> bool {
            let delta = (self.0 - other.0).abs();
            delta.x <= COINCIDENCE_TOLERANCE && delta.y <= COINCIDENCE_TOLERANCE
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    impl From<Coord<f64>> for Point2 {
        fn from(value: Coord<f64>) -> Self {
            Self::new(value.x, value.y)
        }
    }

    impl From<Point2> for Coord<f64> {
        fn from(value: Point2) -> Self {
            Coord {
                x: value.x(),
                y: value.y(),
            }
        }
    }

    /// 轴对齐边界框，用于估算文档/实体范围以及网格单元的几何范围。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        #[inline]
        pub fn from_extents(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
            Self::new(Point2::new(min_x, min_y), Point2::new(max_x, max_y))
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        #[inline]
        pub fn width(&self) -> f64 {
            self.max.x() - self.min.x()
        }

        #[inline]
        pub fn height(&self) -> f64 {
            self.max.y() - self.min.y()
        }

        /// 以 `(min_x, min_y, max_x, max_y)` 形式返回范围。
        #[inline]
        pub fn extents(&self) -> (f64, f64, f64, f64) {
            (self.min.x(), self.min.y(), self.max.x(), self.max.y())
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            let center = (self.min.as_vec2() + self.max.as_vec2()) * 0.5;
            Point2::from_vec(center)
        }

        /// 每侧按给定距离向外扩展。
        pub fn expanded(&self, dx: f64, dy: f64) -> Bounds2D {
            let offset = DVec2::new(dx, dy);
            Bounds2D::new(
                Point2::from_vec(self.min.as_vec2() - offset),
                Point2::from_vec(self.max.as_vec2() + offset),
            )
        }

        /// 转为 `geo::Rect`，空范围返回 `None`。
        pub fn to_rect(&self) -> Option<Rect<f64>> {
            if self.is_empty() {
                None
            } else {
                Some(Rect::new(Coord::from(self.min), Coord::from(self.max)))
            }
        }
    }

    impl From<Rect<f64>> for Bounds2D {
        fn from(rect: Rect<f64>) -> Self {
            Self::new(rect.min().into(), rect.max().into())
        }
    }

    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum PolygonError {
        #[error("ring has {0} distinct vertices, at least 3 are required")]
        TooFewVertices(usize),
        #[error("ring vertex {0} has a non-finite coordinate")]
        NonFinite(usize),
        #[error("ring encloses zero area")]
        ZeroArea,
        #[error("hole {0} is not inside the exterior ring")]
        HoleOutsideExterior(usize),
        #[error("polygon is not simple (self-intersecting rings)")]
        NotSimple,
    }

    /// 去掉连续重复点与闭合点后的开放顶点序列，要求坐标有限且至少三个互异顶点。
    pub fn distinct_vertices<I>(points: I) -> Result<Vec<Point2>, PolygonError>
    where
        I: IntoIterator<Item = Point2>,
    {
        let mut normalized: Vec<Point2> = Vec::new();
        for (index, point) in points.into_iter().enumerate() {
            if !point.is_finite() {
                return Err(PolygonError::NonFinite(index));
            }
            if normalized.last().is_some_and(|last| last.coincides(point)) {
                continue;
            }
            normalized.push(point);
        }
        while normalized.len() > 1 && normalized[0].coincides(normalized[normalized.len() - 1]) {
            normalized.pop();
        }
        if normalized.len() < 3 {
            return Err(PolygonError::TooFewVertices(normalized.len()));
        }
        Ok(normalized)
    }

    fn ring_from_points<I>(points: I) -> Result<LineString<f64>, PolygonError>
    where
        I: IntoIterator<Item = Point2>,
    {
        let vertices = distinct_vertices(points)?;
        let mut ring: LineString<f64> = vertices.into_iter().map(Coord::from).collect();
        ring.close();
        if Polygon::new(ring.clone(), Vec::new()).unsigned_area() <= 0.0 {
            return Err(PolygonError::ZeroArea);
        }
        Ok(ring)
    }

    /// 从单个顶点序列构造无洞多边形。
    pub fn polygon_from_points<I>(points: I) -> Result<Polygon<f64>, PolygonError>
    where
        I: IntoIterator<Item = Point2>,
    {
        polygon_with_holes(points, Vec::<Vec<Point2>>::new())
    }

    /// 构造带洞多边形并做 OGC 有效性校验。每个洞必须位于外环之内。
    pub fn polygon_with_holes<I, H>(
        exterior: I,
        holes: Vec<H>,
    ) -> Result<Polygon<f64>, PolygonError>
    where
        I: IntoIterator<Item = Point2>,
        H: IntoIterator<Item = Point2>,
    {
        let exterior = ring_from_points(exterior)?;
        let shell = Polygon::new(exterior.clone(), Vec::new());
        let mut interiors = Vec::with_capacity(holes.len());
        for (index, hole) in holes.into_iter().enumerate() {
            let ring = ring_from_points(hole)?;
            if !shell.contains(&Polygon::new(ring.clone(), Vec::new())) {
                return Err(PolygonError::HoleOutsideExterior(index));
            }
            interiors.push(ring);
        }

        let polygon = Polygon::new(exterior, interiors);
        if !polygon.is_valid() {
            return Err(PolygonError::NotSimple);
        }
        Ok(polygon)
    }

    /// 环的开放顶点序列（不重复首点），便于输出为闭合多段线。
    pub fn ring_points(ring: &LineString<f64>) -> impl Iterator<Item = Point2> + '_ {
        let coords = ring.0.as_slice();
        let open = match coords.split_last() {
            Some((_, rest)) if ring.is_closed() => rest,
            _ => coords,
        };
        open.iter().map(|coord| Point2::from(*coord))
    }

    #[cfg(test)]
    mod tests {
        use geo::BoundingRect;

        use super::*;

        fn square(min: f64, max: f64) -> Vec<Point2> {
            vec![
                Point2::new(min, min),
                Point2::new(max, min),
                Point2::new(max, max),
                Point2::new(min, max),
            ]
        }

        #[test]
        fn ring_strips_closing_and_duplicate_vertices() {
            let mut points = square(0.0, 10.0);
            points.insert(1, Point2::new(0.0, 0.0));
            points.push(Point2::new(0.0, 0.0));
            assert_eq!(distinct_vertices(points.clone()).unwrap().len(), 4);

            let polygon = polygon_from_points(points).expect("valid polygon");
            assert!((polygon.unsigned_area() - 100.0).abs() < 1e-9);
            assert_eq!(polygon.exterior().0.len(), 5);
            assert_eq!(ring_points(polygon.exterior()).count(), 4);
        }

        #[test]
        fn degenerate_input_is_rejected() {
            let err =
                polygon_from_points([Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)]).unwrap_err();
            assert_eq!(err, PolygonError::TooFewVertices(2));

            let err = polygon_from_points([
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(2.0, 2.0),
            ])
            .unwrap_err();
            assert_eq!(err, PolygonError::ZeroArea);

            let err = polygon_from_points([
                Point2::new(0.0, 0.0),
                Point2::new(f64::NAN, 1.0),
                Point2::new(2.0, 0.0),
            ])
            .unwrap_err();
            assert_eq!(err, PolygonError::NonFinite(1));
        }

        #[test]
        fn bow_tie_is_not_simple() {
            let err = polygon_from_points([
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 10.0),
                Point2::new(10.0, 0.0),
                Point2::new(0.0, 5.0),
            ])
            .unwrap_err();
            assert_eq!(err, PolygonError::NotSimple);
        }

        #[test]
        fn tiny_polygons_are_still_valid() {
            let polygon = polygon_from_points(square(100.0, 100.005)).expect("tiny square");
            assert!(polygon.unsigned_area() > 0.0);
        }

        #[test]
        fn hole_must_lie_inside_exterior() {
            let err = polygon_with_holes(square(0.0, 10.0), vec![square(20.0, 30.0)]).unwrap_err();
            assert_eq!(err, PolygonError::HoleOutsideExterior(0));

            let polygon = polygon_with_holes(square(0.0, 10.0), vec![square(2.0, 4.0)]).unwrap();
            assert!((polygon.unsigned_area() - 96.0).abs() < 1e-9);
            assert_eq!(polygon.interiors().len(), 1);
        }

        #[test]
        fn bounds_convert_to_and_from_rect() {
            let bounds = Bounds2D::from_extents(0.0, 0.0, 10.0, 10.0);
            let grown = bounds.expanded(1.0, 2.0);
            assert_eq!(grown.extents(), (-1.0, -2.0, 11.0, 12.0));

            let rect = bounds.to_rect().expect("non-empty bounds");
            assert_eq!(Bounds2D::from(rect), bounds);
            assert!(Bounds2D::empty().to_rect().is_none());

            let polygon = polygon_from_points(square(-5.0, 5.0)).unwrap();
            let covered = polygon.bounding_rect().map(Bounds2D::from);
            assert_eq!(covered.map(|b| b.extents()), Some((-5.0, -5.0, 5.0, 5.0)));
        }
    }
}

pub mod document {
    use std::collections::HashMap;

    use serde::{Deserialize, Serialize};

    use crate::geometry::{Bounds2D, Point2};

    /// DXF 文字水平对齐：居中（组码 72 = 1）。
    pub const TEXT_HALIGN_CENTER: i16 = 1;
    /// DXF 文字垂直对齐：中部（组码 73 = 2）。
    pub const TEXT_VALIGN_MIDDLE: i16 = 2;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EntityId(u64);

    impl EntityId {
        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        /// 提供原始数值，便于序列化或日志输出。
        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Layer {
        pub name: String,
        pub is_visible: bool,
    }

    impl Layer {
        #[inline]
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                is_visible: true,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum Entity {
        Polyline(Polyline),
        Text(Text),
    }

    impl Entity {
        #[inline]
        pub fn layer_name(&self) -> &str {
            match self {
                Entity::Polyline(polyline) => &polyline.layer,
                Entity::Text(text) => &text.layer,
            }
        }

        /// 计算实体的 2D 轴对齐范围，文本退化为锚点。
        pub fn bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            match self {
                Entity::Polyline(polyline) => {
                    for vertex in &polyline.vertices {
                        bounds.include_point(*vertex);
                    }
                }
                Entity::Text(text) => {
                    bounds.include_point(text.anchor());
                }
            }
            if bounds.is_empty() {
                None
            } else {
                Some(bounds)
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Polyline {
        pub vertices: Vec<Point2>,
        pub is_closed: bool,
        pub layer: String,
    }

    impl Polyline {
        /// 带闭合标志，或首尾顶点重合。
        pub fn is_effectively_closed(&self) -> bool {
            if self.is_closed {
                return true;
            }
            match (self.vertices.first(), self.vertices.last()) {
                (Some(first), Some(last)) if self.vertices.len() > 2 => first.coincides(*last),
                _ => false,
            }
        }
    }

    /// 单行文字。`alignment_point` 仅在非默认对齐时有意义（DXF 组码 11/21）。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Text {
        pub insert: Point2,
        pub content: String,
        pub height: f64,
        pub rotation: f64,
        pub horizontal_alignment: i16,
        pub vertical_alignment: i16,
        pub alignment_point: Option<Point2>,
        pub layer: String,
    }

    impl Text {
        /// 文字的定位点：对齐文字取对齐点，否则取插入点。
        pub fn anchor(&self) -> Point2 {
            let aligned = self.horizontal_alignment != 0 || self.vertical_alignment != 0;
            match self.alignment_point {
                Some(point) if aligned => point,
                _ => self.insert,
            }
        }
    }

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    pub struct Document {
        layers: HashMap<String, Layer>,
        entities: Vec<(EntityId, Entity)>,
        next_entity_id: u64,
    }

    impl Document {
        pub fn new() -> Self {
            let mut doc = Self::default();
            doc.ensure_layer("0");
            doc
        }

        pub fn ensure_layer(&mut self, name: impl AsRef<str>) {
            let key = name.as_ref();
            self.layers
                .entry(key.to_string())
                .or_insert_with(|| Layer::new(key));
        }

        pub fn add_polyline<I>(
            &mut self,
            vertices: I,
            is_closed: bool,
            layer: impl Into<String>,
        ) -> EntityId
        where
            I: IntoIterator<Item = Point2>,
        {
            let layer = layer.into();
            self.ensure_layer(&layer);
            let id = self.next_id();
            self.entities.push((
                id,
                Entity::Polyline(Polyline {
                    vertices: vertices.into_iter().collect(),
                    is_closed,
                    layer,
                }),
            ));
            id
        }

        pub fn add_text(
            &mut self,
            insert: Point2,
            content: impl Into<String>,
            height: f64,
            rotation: f64,
            layer: impl Into<String>,
        ) -> EntityId {
            self.push_text(Text {
                insert,
                content: content.into(),
                height,
                rotation,
                horizontal_alignment: 0,
                vertical_alignment: 0,
                alignment_point: None,
                layer: layer.into(),
            })
        }

        /// 添加以 `center` 为中心（MIDDLE_CENTER 对齐）的文字。
        pub fn add_centered_text(
            &mut self,
            center: Point2,
            content: impl Into<String>,
            height: f64,
            layer: impl Into<String>,
        ) -> EntityId {
            self.push_text(Text {
                insert: center,
                content: content.into(),
                height,
                rotation: 0.0,
                horizontal_alignment: TEXT_HALIGN_CENTER,
                vertical_alignment: TEXT_VALIGN_MIDDLE,
                alignment_point: Some(center),
                layer: layer.into(),
            })
        }

        pub fn add_entity(&mut self, entity: Entity) -> EntityId {
            match entity {
                Entity::Polyline(polyline) => {
                    self.add_polyline(polyline.vertices, polyline.is_closed, polyline.layer)
                }
                Entity::Text(text) => self.push_text(text),
            }
        }

        #[inline]
        pub fn layers(&self) -> impl Iterator<Item = &Layer> {
            self.layers.values()
        }

        #[inline]
        pub fn entities(&self) -> impl Iterator<Item = &(EntityId, Entity)> {
            self.entities.iter()
        }

        pub fn polylines(&self) -> impl Iterator<Item = &Polyline> {
            self.entities.iter().filter_map(|(_, entity)| match entity {
                Entity::Polyline(polyline) => Some(polyline),
                _ => None,
            })
        }

        pub fn texts(&self) -> impl Iterator<Item = &Text> {
            self.entities.iter().filter_map(|(_, entity)| match entity {
                Entity::Text(text) => Some(text),
                _ => None,
            })
        }

        pub fn bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            let mut has = false;
            for (_, entity) in &self.entities {
                if let Some(entity_bounds) = entity.bounds() {
                    bounds.include_bounds(&entity_bounds);
                    has = true;
                }
            }
            if has { Some(bounds) } else { None }
        }

        fn push_text(&mut self, text: Text) -> EntityId {
            self.ensure_layer(&text.layer);
            let id = self.next_id();
            self.entities.push((id, Entity::Text(text)));
            id
        }

        #[inline]
        fn next_id(&mut self) -> EntityId {
            let id = self.next_entity_id;
            self.next_entity_id += 1;
            EntityId(id)
        }
    }

}
