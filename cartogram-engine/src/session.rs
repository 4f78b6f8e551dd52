use std::path::{Path, PathBuf};

use cartogram_core::geometry::Bounds2D;
use tracing::{debug, info};

use crate::boundary::{Boundary, parse_boundary};
use crate::errors::CartogramError;
use crate::grid::{CellSize, GridCell, GridObserver, generate_grid_with};
use crate::nomenclature::{NomenclatureInfo, aggregate};
use crate::serializer::{SerializeOptions, save_with};
use crate::system::CoordinateSystem;

/// 一次交互流程中的网格图状态：边界、坐标系、网格边长以及最近一次生成的单元。
#[derive(Debug, Default)]
pub struct CartogramSession {
    boundary: Option<Boundary>,
    source: Option<PathBuf>,
    detected_system: Option<CoordinateSystem>,
    system_override: Option<CoordinateSystem>,
    cell_size: CellSize,
    cells: Vec<GridCell>,
    nomenclature: Vec<NomenclatureInfo>,
    options: SerializeOptions,
}

impl CartogramSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(cell_size: CellSize, options: SerializeOptions) -> Self {
        Self {
            cell_size,
            options,
            ..Self::default()
        }
    }

    /// 读取边界并重新检测坐标系。之前生成的单元被清空。
    pub fn load(&mut self, path: &Path) -> Result<&Boundary, CartogramError> {
        let boundary = parse_boundary(path)?;
        self.source = Some(path.to_path_buf());
        Ok(self.set_boundary(boundary))
    }

    pub fn set_boundary(&mut self, boundary: Boundary) -> &Boundary {
        let detected = boundary.detect_system();
        debug!(system = %detected, "已检测坐标系");
        self.detected_system = Some(detected);
        self.clear_cells();
        self.boundary.insert(boundary)
    }

    #[inline]
    pub fn boundary(&self) -> Option<&Boundary> {
        self.boundary.as_ref()
    }

    #[inline]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// 生效的坐标系：显式设置优先，否则为检测结果。
    pub fn system(&self) -> Option<CoordinateSystem> {
        self.system_override.or(self.detected_system)
    }

    #[inline]
    pub fn detected_system(&self) -> Option<CoordinateSystem> {
        self.detected_system
    }

    /// `None` 表示恢复自动检测。
    pub fn set_system(&mut self, system: Option<CoordinateSystem>) {
        if self.system_override != system {
            self.system_override = system;
            self.clear_cells();
        }
    }

    #[inline]
    pub fn cell_size(&self) -> CellSize {
        self.cell_size
    }

    pub fn set_cell_size(&mut self, cell_size: CellSize) {
        if self.cell_size != cell_size {
            self.cell_size = cell_size;
            self.clear_cells();
        }
    }

    #[inline]
    pub fn options(&self) -> &SerializeOptions {
        &self.options
    }

    /// 以当前设置生成网格并汇总编号。失败（含取消）时保留原有结果不变。
    pub fn generate(&mut self, observer: &mut dyn GridObserver) -> Result<&[GridCell], CartogramError> {
        let boundary = self.boundary.as_ref().ok_or(CartogramError::NoBoundary)?;
        let system = self.system_override.unwrap_or_else(|| boundary.detect_system());
        let cells = generate_grid_with(boundary, self.cell_size.get(), system, observer)?;
        self.nomenclature = aggregate(&cells);
        self.cells = cells;
        info!(
            cell_count = self.cells.len(),
            nomenclature_count = self.nomenclature.len(),
            "会话网格已更新"
        );
        Ok(&self.cells)
    }

    #[inline]
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    #[inline]
    pub fn nomenclature(&self) -> &[NomenclatureInfo] {
        &self.nomenclature
    }

    pub fn bounds(&self) -> Option<Bounds2D> {
        self.boundary.as_ref().map(Boundary::bounds)
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn nomenclature_count(&self) -> usize {
        self.nomenclature.len()
    }

    /// 保存边界与当前单元。尚未生成时只写出边界。
    pub fn save(&self, path: &Path) -> Result<(), CartogramError> {
        let boundary = self.boundary.as_ref().ok_or(CartogramError::NoBoundary)?;
        save_with(&self.cells, boundary, path, &self.options)
    }

    fn clear_cells(&mut self) {
        self.cells.clear();
        self.nomenclature.clear();
    }
}
