use std::fmt::Display;
use std::io::Write;

use cartogram_core::document::{Document, Entity, Layer, Polyline, Text};
use cartogram_core::geometry::Point2;

use crate::DxfError;

/// 输出 R2000 格式：LWPOLYLINE 需要 AC1015 及以上版本。
const ACAD_VERSION: &str = "AC1015";
/// `$INSUNITS` = 6，米。
const INSERTION_UNITS_METERS: i32 = 6;
const TEXT_STYLE: &str = "Standard";
const LAYER_COLOR: i32 = 7;
const FIRST_HANDLE: u32 = 0x20;

/// 将整个文档写为 DXF。写入前先校验全部实体，校验失败时不会输出任何内容。
pub(crate) fn write_document<W: Write>(document: &Document, out: &mut W) -> Result<(), DxfError> {
    for (id, entity) in document.entities() {
        validate_entity(entity).map_err(|message| {
            DxfError::invalid(format!(
                "实体 #{}（图层 {}）无法写入 DXF：{message}",
                id.get(),
                entity.layer_name()
            ))
        })?;
    }

    let mut writer = DxfWriter::new(out);
    writer.write_header()?;
    writer.write_tables(document)?;
    writer.write_entities(document)?;
    writer.pair(0, "EOF")
}

fn validate_entity(entity: &Entity) -> Result<(), String> {
    match entity {
        Entity::Polyline(polyline) => {
            if polyline.vertices.len() < 2 {
                return Err(format!("多段线仅有 {} 个顶点", polyline.vertices.len()));
            }
            if let Some(index) = polyline.vertices.iter().position(|p| !p.is_finite()) {
                return Err(format!("多段线顶点 {index} 坐标非有限值"));
            }
        }
        Entity::Text(text) => {
            if !text.anchor().is_finite() || !text.insert.is_finite() {
                return Err("文字定位点坐标非有限值".to_string());
            }
            if !(text.height.is_finite() && text.height > 0.0) {
                return Err(format!("文字高度 {} 非法", text.height));
            }
        }
    }
    Ok(())
}

struct DxfWriter<'a, W: Write> {
    out: &'a mut W,
    next_handle: u32,
}

impl<'a, W: Write> DxfWriter<'a, W> {
    fn new(out: &'a mut W) -> Self {
        Self {
            out,
            next_handle: FIRST_HANDLE,
        }
    }

    fn pair(&mut self, code: i32, value: impl Display) -> Result<(), DxfError> {
        writeln!(self.out, "{code}\n{value}").map_err(DxfError::Io)
    }

    fn point(&mut self, x_code: i32, point: Point2) -> Result<(), DxfError> {
        self.pair(x_code, point.x())?;
        self.pair(x_code + 10, point.y())
    }

    fn handle(&mut self) -> Result<(), DxfError> {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.pair(5, format!("{handle:X}"))
    }

    fn begin_section(&mut self, name: &str) -> Result<(), DxfError> {
        self.pair(0, "SECTION")?;
        self.pair(2, name)
    }

    fn end_section(&mut self) -> Result<(), DxfError> {
        self.pair(0, "ENDSEC")
    }

    fn write_header(&mut self) -> Result<(), DxfError> {
        self.begin_section("HEADER")?;
        self.pair(9, "$ACADVER")?;
        self.pair(1, ACAD_VERSION)?;
        self.pair(9, "$INSUNITS")?;
        self.pair(70, INSERTION_UNITS_METERS)?;
        self.end_section()
    }

    fn write_tables(&mut self, document: &Document) -> Result<(), DxfError> {
        let mut layers: Vec<&Layer> = document.layers().collect();
        layers.sort_by(|a, b| a.name.cmp(&b.name));

        self.begin_section("TABLES")?;
        self.pair(0, "TABLE")?;
        self.pair(2, "LAYER")?;
        self.handle()?;
        self.pair(100, "AcDbSymbolTable")?;
        self.pair(70, layers.len())?;
        for layer in layers {
            self.pair(0, "LAYER")?;
            self.handle()?;
            self.pair(100, "AcDbSymbolTableRecord")?;
            self.pair(100, "AcDbLayerTableRecord")?;
            self.pair(2, &layer.name)?;
            self.pair(70, 0)?;
            let color = if layer.is_visible {
                LAYER_COLOR
            } else {
                -LAYER_COLOR
            };
            self.pair(62, color)?;
        }
        self.pair(0, "ENDTAB")?;
        self.end_section()
    }

    fn write_entities(&mut self, document: &Document) -> Result<(), DxfError> {
        self.begin_section("ENTITIES")?;
        for (_, entity) in document.entities() {
            match entity {
                Entity::Polyline(polyline) => self.write_lwpolyline(polyline)?,
                Entity::Text(text) => self.write_text(text)?,
            }
        }
        self.end_section()
    }

    fn write_lwpolyline(&mut self, polyline: &Polyline) -> Result<(), DxfError> {
        self.pair(0, "LWPOLYLINE")?;
        self.handle()?;
        self.pair(100, "AcDbEntity")?;
        self.pair(8, &polyline.layer)?;
        self.pair(100, "AcDbPolyline")?;
        self.pair(90, polyline.vertices.len())?;
        self.pair(70, if polyline.is_closed { 1 } else { 0 })?;
        for vertex in &polyline.vertices {
            self.point(10, *vertex)?;
        }
        Ok(())
    }

    fn write_text(&mut self, text: &Text) -> Result<(), DxfError> {
        // TEXT 只能容纳单行内容
        let content = text.content.replace(['\r', '\n'], " ");
        self.pair(0, "TEXT")?;
        self.handle()?;
        self.pair(100, "AcDbEntity")?;
        self.pair(8, &text.layer)?;
        self.pair(100, "AcDbText")?;
        self.point(10, text.insert)?;
        self.pair(40, text.height)?;
        self.pair(1, content)?;
        if text.rotation != 0.0 {
            self.pair(50, text.rotation.to_degrees())?;
        }
        self.pair(7, TEXT_STYLE)?;
        if text.horizontal_alignment != 0 {
            self.pair(72, text.horizontal_alignment)?;
        }
        if let Some(alignment) = text.alignment_point {
            self.point(11, alignment)?;
        }
        self.pair(100, "AcDbText")?;
        if text.vertical_alignment != 0 {
            self.pair(73, text.vertical_alignment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_sections_in_order() {
        let mut document = Document::new();
        document.add_polyline(
            [
                Point2::new(0.0, 0.0),
                Point2::new(250.0, 0.0),
                Point2::new(250.0, 250.0),
            ],
            true,
            "GRID",
        );
        let mut buffer = Vec::new();
        write_document(&document, &mut buffer).expect("write");
        let text = String::from_utf8(buffer).unwrap();

        let header = text.find("HEADER").unwrap();
        let tables = text.find("TABLES").unwrap();
        let entities = text.find("ENTITIES").unwrap();
        assert!(header < tables && tables < entities);
        assert!(text.contains("AC1015"));
        assert!(text.contains("\n2\nGRID\n"));
        assert!(text.trim_end().ends_with("0\nEOF"));
    }

    #[test]
    fn rejects_polyline_with_single_vertex_before_writing() {
        let mut document = Document::new();
        document.add_polyline([Point2::new(0.0, 0.0)], false, "GRID");
        let mut buffer = Vec::new();
        let err = write_document(&document, &mut buffer).unwrap_err();
        match err {
            DxfError::Invalid { message } => assert!(message.contains("GRID")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn rejects_non_finite_text_height() {
        let mut document = Document::new();
        document.add_text(Point2::new(0.0, 0.0), "x", f64::NAN, 0.0, "0");
        let mut buffer = Vec::new();
        assert!(write_document(&document, &mut buffer).is_err());
    }
}
