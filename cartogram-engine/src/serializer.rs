use std::path::Path;

use cartogram_core::document::{Document, Polyline};
use cartogram_core::geometry::{
    Bounds2D, Point2, distinct_vertices, polygon_from_points, ring_points,
};
use cartogram_io::{DocumentLoader, DocumentSaver, DxfFacade};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::boundary::Boundary;
use crate::errors::CartogramError;
use crate::grid::GridCell;

pub const DEFAULT_LABEL_HEIGHT: f64 = 20.0;
pub const DEFAULT_GRID_LAYER: &str = "GRID";
pub const DEFAULT_LABEL_LAYER: &str = "NOMENCLATURE";
pub const DEFAULT_BOUNDARY_LAYER: &str = "BOUNDARY";

/// 输出图纸的文字高度与图层命名。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializeOptions {
    pub label_height: f64,
    pub grid_layer: String,
    pub label_layer: String,
    pub boundary_layer: String,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            label_height: DEFAULT_LABEL_HEIGHT,
            grid_layer: DEFAULT_GRID_LAYER.to_string(),
            label_layer: DEFAULT_LABEL_LAYER.to_string(),
            boundary_layer: DEFAULT_BOUNDARY_LAYER.to_string(),
        }
    }
}

pub fn save(cells: &[GridCell], boundary: &Boundary, path: &Path) -> Result<(), CartogramError> {
    save_with(cells, boundary, path, &SerializeOptions::default())
}

/// 写出全新的 DXF（覆盖已有文件）：先是全部单元矩形，然后是单元编号文字，最后是边界各环。
pub fn save_with(
    cells: &[GridCell],
    boundary: &Boundary,
    path: &Path,
    options: &SerializeOptions,
) -> Result<(), CartogramError> {
    let file_write = |message: String| CartogramError::FileWrite {
        path: path.to_path_buf(),
        message,
    };
    if !(options.label_height.is_finite() && options.label_height > 0.0) {
        return Err(CartogramError::InvalidParameter(format!(
            "label height must be a positive number, got {}",
            options.label_height
        )));
    }

    let document = build_document(cells, boundary, options).map_err(file_write)?;
    DxfFacade::new()
        .save(&document, path)
        .map_err(|err| file_write(err.to_string()))?;
    info!(
        path = %path.display(),
        cell_count = cells.len(),
        polygon_count = boundary.polygons().len(),
        "网格图已保存"
    );
    Ok(())
}

fn build_document(
    cells: &[GridCell],
    boundary: &Boundary,
    options: &SerializeOptions,
) -> Result<Document, String> {
    let mut document = Document::new();
    document.ensure_layer(&options.grid_layer);
    document.ensure_layer(&options.label_layer);
    document.ensure_layer(&options.boundary_layer);

    for (index, cell) in cells.iter().enumerate() {
        let (min_x, min_y, max_x, max_y) = cell.bounds.extents();
        let width = cell.bounds.width();
        let height = cell.bounds.height();
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(format!("cell {index} has degenerate bounds {:?}", cell.bounds));
        }
        document.add_polyline(
            [
                Point2::new(min_x, min_y),
                Point2::new(max_x, min_y),
                Point2::new(max_x, max_y),
                Point2::new(min_x, max_y),
            ],
            true,
            options.grid_layer.as_str(),
        );
    }

    for cell in cells {
        document.add_centered_text(
            cell.center,
            cell.nomenclature.as_str(),
            options.label_height,
            options.label_layer.as_str(),
        );
    }

    for polygon in boundary.polygons() {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            document.add_polyline(
                ring_points(ring),
                true,
                options.boundary_layer.as_str(),
            );
        }
    }
    Ok(document)
}

/// 回读的网格图。洞在写出时是独立的闭合环，回读后各自成为一个多边形。
#[derive(Debug, Clone)]
pub struct SavedCartogram {
    pub cells: Vec<GridCell>,
    pub boundary: Option<Boundary>,
}

pub fn load_cartogram(path: &Path) -> Result<SavedCartogram, CartogramError> {
    load_cartogram_with(path, &SerializeOptions::default())
}

/// 读取由 [`save_with`] 写出的文件：网格图层上的矩形成为单元，
/// 其编号取自定位点与单元中心重合的文字。
pub fn load_cartogram_with(
    path: &Path,
    options: &SerializeOptions,
) -> Result<SavedCartogram, CartogramError> {
    let document = DxfFacade::new().load(path)?;

    let labels: Vec<(Point2, &str)> = document
        .texts()
        .filter(|text| text.layer == options.label_layer)
        .map(|text| (text.anchor(), text.content.as_str()))
        .collect();

    let mut cells = Vec::new();
    let mut polygons = Vec::new();
    for polyline in document.polylines() {
        if polyline.layer == options.grid_layer {
            let Some(bounds) = rectangle_bounds(polyline) else {
                debug!(vertex_count = polyline.vertices.len(), "跳过非矩形的网格多段线");
                continue;
            };
            let center = bounds.center();
            let nomenclature = labels
                .iter()
                .find(|(anchor, _)| anchor.coincides(center))
                .map(|(_, content)| content.to_string())
                .unwrap_or_default();
            cells.push(GridCell {
                bounds,
                center,
                nomenclature,
            });
        } else if polyline.layer == options.boundary_layer && polyline.is_effectively_closed() {
            match polygon_from_points(polyline.vertices.iter().copied()) {
                Ok(polygon) => polygons.push(polygon),
                Err(err) => debug!(error = %err, "跳过无效的边界环"),
            }
        }
    }

    info!(
        path = %path.display(),
        cell_count = cells.len(),
        polygon_count = polygons.len(),
        "网格图读取完成"
    );
    Ok(SavedCartogram {
        cells,
        boundary: Boundary::new(polygons),
    })
}

/// 闭合的轴对齐矩形：四个互异顶点均位于包围盒角点上。
fn rectangle_bounds(polyline: &Polyline) -> Option<Bounds2D> {
    if !polyline.is_effectively_closed() {
        return None;
    }
    let corners = distinct_vertices(polyline.vertices.iter().copied()).ok()?;
    if corners.len() != 4 {
        return None;
    }
    let mut bounds = Bounds2D::empty();
    for corner in &corners {
        bounds.include_point(*corner);
    }
    let (min_x, min_y, max_x, max_y) = bounds.extents();
    if min_x == max_x || min_y == max_y {
        return None;
    }
    let on_corner = |p: &Point2| {
        let x = p.x();
        let y = p.y();
        (x == min_x || x == max_x) && (y == min_y || y == max_y)
    };
    corners.iter().all(on_corner).then_some(bounds)
}
