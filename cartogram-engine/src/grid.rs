use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cartogram_core::geometry::{Bounds2D, Point2};
use geo::{BoundingRect, Coord, Intersects, Polygon, Rect, Relate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::boundary::Boundary;
use crate::errors::CartogramError;
use crate::nomenclature::{SUB_SHEET_SIZE, encode};
use crate::system::CoordinateSystem;

/// 包围盒每侧外扩的比例。
pub const MARGIN_RATIO: f64 = 0.1;

/// 经过校验的网格边长：有限且为正。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct CellSize(f64);

impl CellSize {
    pub const DEFAULT: CellSize = CellSize(SUB_SHEET_SIZE);

    pub fn new(value: f64) -> Result<Self, CartogramError> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(CartogramError::InvalidParameter(format!(
                "cell size must be a positive number, got {value}"
            )))
        }
    }

    /// 解析用户输入。非数字、非有限值与非正数一律报错，不回退到默认值。
    pub fn parse(input: &str) -> Result<Self, CartogramError> {
        let trimmed = input.trim();
        let value = trimmed.parse::<f64>().map_err(|_| {
            CartogramError::InvalidParameter(format!("cell size \"{trimmed}\" is not a number"))
        })?;
        Self::new(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Default for CellSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for CellSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CellSize {
    type Err = CartogramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<f64> for CellSize {
    type Error = CartogramError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CellSize> for f64 {
    fn from(value: CellSize) -> Self {
        value.0
    }
}

/// 保留下来的网格单元。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub bounds: Bounds2D,
    pub center: Point2,
    pub nomenclature: String,
}

impl GridCell {
    #[inline]
    pub fn size(&self) -> f64 {
        self.bounds.width()
    }
}

/// 生成过程的进度回调与协作式取消。
pub trait GridObserver {
    /// 每完成一行单元调用一次。
    fn on_row(&mut self, _completed: usize, _total: usize) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl GridObserver for NoopObserver {}

/// 可跨线程共享的取消标记。
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl GridObserver for CancelToken {
    fn is_cancelled(&self) -> bool {
        CancelToken::is_cancelled(self)
    }
}

/// 对齐到网格边长整数倍的单元索引范围（左闭右开）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GridExtent {
    columns: (i64, i64),
    rows: (i64, i64),
}

impl GridExtent {
    fn covering(bounds: &Bounds2D, size: f64) -> Self {
        let expanded = bounds.expanded(bounds.width() * MARGIN_RATIO, bounds.height() * MARGIN_RATIO);
        let (min_x, min_y, max_x, max_y) = expanded.extents();
        Self {
            columns: ((min_x / size).floor() as i64, (max_x / size).ceil() as i64),
            rows: ((min_y / size).floor() as i64, (max_y / size).ceil() as i64),
        }
    }

    fn column_count(&self) -> usize {
        (self.columns.1 - self.columns.0).max(0) as usize
    }

    fn row_count(&self) -> usize {
        (self.rows.1 - self.rows.0).max(0) as usize
    }
}

pub fn generate_grid(
    boundary: &Boundary,
    cell_size: f64,
    system: CoordinateSystem,
) -> Result<Vec<GridCell>, CartogramError> {
    generate_grid_with(boundary, cell_size, system, &mut NoopObserver)
}

/// 按行优先（自下而上、自左而右）枚举单元，保留与边界有正面积重叠的单元。
///
/// 观察者在每行结束后收到进度；取消时返回 [`CartogramError::Cancelled`]，
/// 不会返回部分结果。
pub fn generate_grid_with(
    boundary: &Boundary,
    cell_size: f64,
    system: CoordinateSystem,
    observer: &mut dyn GridObserver,
) -> Result<Vec<GridCell>, CartogramError> {
    let size = CellSize::new(cell_size)?.get();
    if size != SUB_SHEET_SIZE {
        warn!(
            cell_size = size,
            "分幅编号固定按 250 划分，当前网格边长下编号仅供参考"
        );
    }

    let extent = GridExtent::covering(&boundary.bounds(), size);
    let total_rows = extent.row_count();
    info!(
        columns = extent.column_count(),
        rows = total_rows,
        cell_size = size,
        system = %system,
        "开始生成网格"
    );

    let mut cells = Vec::new();
    for (row_index, row) in (extent.rows.0..extent.rows.1).enumerate() {
        if observer.is_cancelled() {
            info!(completed_rows = row_index, "网格生成已取消");
            return Err(CartogramError::Cancelled);
        }
        let min_y = row as f64 * size;
        let max_y = (row + 1) as f64 * size;
        for column in extent.columns.0..extent.columns.1 {
            let cell = Rect::new(
                Coord {
                    x: column as f64 * size,
                    y: min_y,
                },
                Coord {
                    x: (column + 1) as f64 * size,
                    y: max_y,
                },
            );
            if !boundary
                .polygons()
                .iter()
                .any(|polygon| cell_belongs_to(polygon, &cell))
            {
                continue;
            }
            let bounds = Bounds2D::from(cell);
            let center = bounds.center();
            cells.push(GridCell {
                nomenclature: encode(center.x(), center.y(), system),
                bounds,
                center,
            });
        }
        observer.on_row(row_index + 1, total_rows);
    }

    if cells.is_empty() {
        warn!(cell_size = size, "边界小于一个网格单元，未生成任何单元");
    } else {
        debug!(cell_count = cells.len(), "网格生成完成");
    }
    Ok(cells)
}

/// 单元内部与多边形内部相交。多边形内部不含洞，因此整格落在洞里的单元被排除；
/// 仅边或角接触不算相交。
fn cell_belongs_to(polygon: &Polygon<f64>, cell: &Rect<f64>) -> bool {
    if !polygon
        .bounding_rect()
        .is_some_and(|extent| extent.intersects(cell))
    {
        return false;
    }
    let matrix = polygon.relate(&cell.to_polygon());
    matrix.is_intersects() && !matrix.is_touches()
}
