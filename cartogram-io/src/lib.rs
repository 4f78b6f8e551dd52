use std::convert::TryFrom;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use cartogram_core::{
    document::{Document, Entity, Polyline, Text},
    geometry::Point2,
};
use thiserror::Error;
use tracing::debug;

mod writer;

use writer::write_document;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Document, IoError>;
}

pub trait DocumentSaver {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DxfFacade;

impl DxfFacade {
    pub fn new() -> Self {
        Self
    }

    /// 直接解析内存中的 DXF 文本。
    pub fn parse_str(&self, source: &str) -> Result<Document, IoError> {
        DxfParser::new(source).parse().map_err(IoError::from)
    }

    /// 将文档序列化为 DXF 文本。
    pub fn to_dxf_string(&self, document: &Document) -> Result<String, IoError> {
        let mut buffer = Vec::new();
        write_document(document, &mut buffer).map_err(IoError::from)?;
        String::from_utf8(buffer)
            .map_err(|err| IoError::InvalidDocument(format!("DXF 输出不是合法 UTF-8: {err}")))
    }
}

impl DocumentLoader for DxfFacade {
    fn load(&self, path: &Path) -> Result<Document, IoError> {
        let data = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let document = self.parse_str(&data)?;
        debug!(
            path = %path.display(),
            entity_count = document.entities().count(),
            extents = ?document.bounds().map(|bounds| bounds.extents()),
            "DXF 读取完成"
        );
        Ok(document)
    }
}

impl DocumentSaver for DxfFacade {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError> {
        let file = fs::File::create(path).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut out = BufWriter::new(file);
        write_document(document, &mut out)
            .and_then(|()| out.flush().map_err(DxfError::Io))
            .map_err(|err| match err {
                DxfError::Io(source) => IoError::WriteError {
                    path: path.to_path_buf(),
                    source,
                },
                DxfError::Invalid { message } => IoError::InvalidDocument(message),
            })?;
        debug!(
            path = %path.display(),
            entity_count = document.entities().count(),
            "DXF 写入完成"
        );
        Ok(())
    }
}

#[derive(Debug)]
enum DxfError {
    Invalid { message: String },
    Io(std::io::Error),
}

impl DxfError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

impl From<DxfError> for IoError {
    fn from(err: DxfError) -> Self {
        match err {
            DxfError::Invalid { message } => IoError::InvalidDocument(message),
            DxfError::Io(source) => IoError::InvalidDocument(source.to_string()),
        }
    }
}

struct DxfParser<'a> {
    reader: DxfReader<'a>,
}

impl<'a> DxfParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            reader: DxfReader::new(source),
        }
    }

    fn parse(mut self) -> Result<Document, DxfError> {
        let mut document = Document::new();
        while let Some((code, value)) = self.reader.next_pair()? {
            if code == 999 {
                // 注释行
                continue;
            }
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "意外的组码 {code}（期望 0 表示 SECTION/EOF）"
                )));
            }
            match value.trim() {
                "SECTION" => {
                    let (name_code, name) = self
                        .reader
                        .next_pair()?
                        .ok_or_else(|| DxfError::invalid("SECTION 缺少名称（组码 2）"))?;
                    if name_code != 2 {
                        return Err(DxfError::invalid(format!(
                            "SECTION 名称使用了组码 {name_code}（期望 2）"
                        )));
                    }
                    match name.trim() {
                        "ENTITIES" => self.parse_entities(&mut document)?,
                        "TABLES" => self.parse_tables(&mut document)?,
                        _ => self.skip_section()?,
                    }
                }
                "EOF" => break,
                unexpected => {
                    return Err(DxfError::invalid(format!(
                        "意外的标记 {unexpected}，期望 SECTION 或 EOF"
                    )));
                }
            }
        }
        Ok(document)
    }

    fn skip_section(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value.trim() == "ENDSEC" => break,
                Some(_) => continue,
                None => {
                    return Err(DxfError::invalid("SECTION 未找到 ENDSEC 终止标记"));
                }
            }
        }
        Ok(())
    }

    /// 只关心 LAYER 表：登记其中的图层名。
    fn parse_tables(&mut self, document: &mut Document) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("TABLES 段提前结束")),
            };
            if code != 0 {
                continue;
            }
            match value.trim() {
                "ENDSEC" => break,
                "LAYER" => {
                    let mut name = None;
                    loop {
                        match self.reader.next_pair()? {
                            Some((0, value)) => {
                                self.reader.put_back((0, value));
                                break;
                            }
                            Some((2, value)) => name = Some(value.trim().to_string()),
                            Some(_) => {}
                            None => return Err(DxfError::invalid("LAYER 记录未正确结束")),
                        }
                    }
                    if let Some(name) = name.filter(|name| !name.is_empty()) {
                        document.ensure_layer(name);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_entities(&mut self, document: &mut Document) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("ENTITIES 段提前结束")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "ENTITIES 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }

            match value.trim() {
                "ENDSEC" => break,
                "SEQEND" => {
                    self.skip_entity_body()?;
                }
                "POLYLINE" => {
                    if let Some(polyline) = self.parse_polyline_entity()? {
                        document.add_entity(Entity::Polyline(polyline));
                    }
                }
                "LWPOLYLINE" => {
                    if let Some(polyline) = self.parse_lwpolyline()? {
                        document.add_entity(Entity::Polyline(polyline));
                    }
                }
                "TEXT" => {
                    if let Some(text) = self.parse_text()? {
                        document.add_entity(Entity::Text(text));
                    }
                }
                other => {
                    debug!(entity = other, "跳过未处理的实体类型");
                    self.skip_entity_body()?;
                }
            }
        }
        Ok(())
    }

    /// 不完整的 LWPOLYLINE（缺顶点或坐标不成对）返回 `None`，由调用方跳过。
    fn parse_lwpolyline(&mut self) -> Result<Option<Polyline>, DxfError> {
        let mut layer = None;
        let mut is_closed = false;
        let mut vertices: Vec<Point2> = Vec::new();
        let mut pending_x: Option<f64> = None;
        let mut pending_y: Option<f64> = None;
        let mut unpaired = false;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    70 => {
                        let flag = parse_i32(&value, "LWPOLYLINE 标志")?;
                        is_closed = flag & 0x01 == 0x01;
                    }
                    10 => {
                        let x = parse_f64(&value, "LWPOLYLINE 顶点 X")?;
                        if let Some(y) = pending_y.take() {
                            vertices.push(Point2::new(x, y));
                        } else if pending_x.replace(x).is_some() {
                            unpaired = true;
                        }
                    }
                    20 => {
                        let y = parse_f64(&value, "LWPOLYLINE 顶点 Y")?;
                        if let Some(x) = pending_x.take() {
                            vertices.push(Point2::new(x, y));
                        } else if pending_y.replace(y).is_some() {
                            unpaired = true;
                        }
                    }
                    // 顶点数、标高、凸度：边界只取折线顶点
                    90 | 38 | 30 | 42 => {}
                    _ => {}
                },
                None => return Err(DxfError::invalid("LWPOLYLINE 未正确结束")),
            }
        }

        let layer = layer.unwrap_or_else(|| "0".to_string());
        if unpaired || pending_x.is_some() || pending_y.is_some() {
            debug!(layer = %layer, "跳过顶点坐标不成对的 LWPOLYLINE");
            return Ok(None);
        }
        if vertices.is_empty() {
            debug!(layer = %layer, "跳过没有顶点的 LWPOLYLINE");
            return Ok(None);
        }

        Ok(Some(Polyline {
            vertices,
            is_closed,
            layer,
        }))
    }

    /// 经典 POLYLINE/VERTEX/SEQEND 序列。仅支持二维折线，网格类变体被跳过。
    fn parse_polyline_entity(&mut self) -> Result<Option<Polyline>, DxfError> {
        let mut layer = None;
        let mut flags: i16 = 0;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    70 => flags = parse_i16(&value, "POLYLINE 标志（组码 70）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("POLYLINE 未正确结束")),
            }
        }

        if flags & (0x08 | 0x10 | 0x40) != 0 {
            debug!(flags, "跳过三维多段线或网格 POLYLINE");
            self.skip_polyline_sequence()?;
            return Ok(None);
        }

        let mut vertices = Vec::new();
        let mut incomplete = 0usize;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "VERTEX" => match self.parse_vertex()? {
                        Some(vertex) => vertices.push(vertex),
                        None => incomplete += 1,
                    },
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some(_) => continue,
                None => return Err(DxfError::invalid("POLYLINE 缺少 SEQEND")),
            }
        }

        let layer = layer.unwrap_or_else(|| "0".to_string());
        if incomplete > 0 || vertices.is_empty() {
            debug!(
                layer = %layer,
                vertex_count = vertices.len(),
                incomplete,
                "跳过顶点缺失或不完整的 POLYLINE"
            );
            return Ok(None);
        }

        Ok(Some(Polyline {
            vertices,
            is_closed: flags & 0x01 != 0,
            layer,
        }))
    }

    /// 缺少 X 或 Y 的顶点返回 `None`。
    fn parse_vertex(&mut self) -> Result<Option<Point2>, DxfError> {
        let mut x = None;
        let mut y = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((10, value)) => assign_coord(&mut x, &value, "VERTEX X（组码 10）")?,
                Some((20, value)) => assign_coord(&mut y, &value, "VERTEX Y（组码 20）")?,
                Some(_) => {}
                None => return Err(DxfError::invalid("VERTEX 未正确结束")),
            }
        }
        Ok(x.zip(y).map(|(x, y)| Point2::new(x, y)))
    }

    fn skip_polyline_sequence(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "VERTEX" => self.skip_entity_body()?,
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some(_) => continue,
                None => break,
            }
        }
        Ok(())
    }

    /// 缺少插入点、高度或内容的 TEXT 返回 `None`。
    fn parse_text(&mut self) -> Result<Option<Text>, DxfError> {
        let mut layer = None;
        let mut insert_x = None;
        let mut insert_y = None;
        let mut align_x = None;
        let mut align_y = None;
        let mut height = None;
        let mut rotation_deg = 0.0;
        let mut horizontal_alignment: i16 = 0;
        let mut vertical_alignment: i16 = 0;
        let mut text: Option<String> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut insert_x, &value, "TEXT 插入点 X（组码 10）")?,
                    20 => assign_coord(&mut insert_y, &value, "TEXT 插入点 Y（组码 20）")?,
                    11 => assign_coord(&mut align_x, &value, "TEXT 对齐点 X（组码 11）")?,
                    21 => assign_coord(&mut align_y, &value, "TEXT 对齐点 Y（组码 21）")?,
                    40 => assign_coord(&mut height, &value, "TEXT 高度（组码 40）")?,
                    50 => {
                        rotation_deg = parse_f64(&value, "TEXT 旋转角")?;
                    }
                    72 => horizontal_alignment = parse_i16(&value, "TEXT 水平对齐（组码 72）")?,
                    73 => vertical_alignment = parse_i16(&value, "TEXT 垂直对齐（组码 73）")?,
                    1 => match text {
                        Some(ref mut existing) => {
                            existing.push('\n');
                            existing.push_str(&value);
                        }
                        None => text = Some(value),
                    },
                    // 文字样式、子类标记、Z 坐标
                    7 | 100 | 30 | 31 => {}
                    _ => {}
                },
                None => return Err(DxfError::invalid("TEXT 未正确结束")),
            }
        }

        let layer = layer.unwrap_or_else(|| "0".to_string());
        let alignment_point = match (align_x, align_y) {
            (Some(x), Some(y)) => Some(Some(Point2::new(x, y))),
            (None, None) => Some(None),
            _ => None,
        };
        let (Some(ix), Some(iy), Some(height), Some(content), Some(alignment_point)) =
            (insert_x, insert_y, height, text, alignment_point)
        else {
            debug!(layer = %layer, "跳过缺少插入点、高度或内容的 TEXT");
            return Ok(None);
        };

        Ok(Some(Text {
            insert: Point2::new(ix, iy),
            content,
            height,
            rotation: rotation_deg.to_radians(),
            horizontal_alignment,
            vertical_alignment,
            alignment_point,
            layer,
        }))
    }

    fn skip_entity_body(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        Ok(())
    }
}

struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    buffer: Option<(i32, String)>,
    line_number: usize,
}

impl<'a> DxfReader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.trim_start_matches('\u{feff}').lines(),
            buffer: None,
            line_number: 0,
        }
    }

    fn next_pair(&mut self) -> Result<Option<(i32, String)>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }

        let code_line = loop {
            match self.lines.next() {
                Some(line) => {
                    self.line_number += 1;
                    // 文件末尾可能有空行
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Ok(None),
            }
        };

        let value_line = match self.lines.next() {
            Some(line) => {
                self.line_number += 1;
                line
            }
            None => {
                return Err(DxfError::invalid(format!(
                    "文件在第 {} 行结束，缺少与组码对应的值行",
                    self.line_number
                )));
            }
        };

        let code = code_line.trim().parse::<i32>().map_err(|_| {
            DxfError::invalid(format!(
                "第 {} 行的组码 \"{}\" 无法解析为整数",
                self.line_number - 1,
                code_line.trim()
            ))
        })?;
        let value = value_line.trim_end_matches('\r').to_string();
        Ok(Some((code, value)))
    }

    fn put_back(&mut self, pair: (i32, String)) {
        debug_assert!(self.buffer.is_none(), "DXF pair 只能回退一次");
        self.buffer = Some(pair);
    }
}

fn assign_coord(slot: &mut Option<f64>, raw: &str, context: &str) -> Result<(), DxfError> {
    if slot.is_some() {
        return Err(DxfError::invalid(format!("{context} 出现重复值")));
    }
    *slot = Some(parse_f64(raw, context)?);
    Ok(())
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, DxfError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i32(raw: &str, context: &str) -> Result<i32, DxfError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i16(raw: &str, context: &str) -> Result<i16, DxfError> {
    let value = parse_i32(raw, context)?;
    i16::try_from(value)
        .map_err(|_| DxfError::invalid(format!("{context} 超出 i16 范围（值：{value}）")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_skips_blank_trailing_lines() {
        let mut reader = DxfReader::new("0\nEOF\n\n\n");
        assert_eq!(reader.next_pair().unwrap(), Some((0, "EOF".to_string())));
        assert!(reader.next_pair().unwrap().is_none());
    }

    #[test]
    fn reader_reports_missing_value_line() {
        let mut reader = DxfReader::new("0\nSECTION\n2");
        reader.next_pair().unwrap();
        let err = reader.next_pair().unwrap_err();
        assert!(matches!(err, DxfError::Invalid { .. }));
    }

    #[test]
    fn reader_rejects_non_numeric_group_code() {
        let mut reader = DxfReader::new("zero\nSECTION\n");
        let err = reader.next_pair().unwrap_err();
        match err {
            DxfError::Invalid { message } => assert!(message.contains("zero")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_entities_are_skipped() {
        let source = "0\nSECTION\n2\nENTITIES\n0\nCIRCLE\n8\n0\n10\n1.0\n20\n2.0\n40\n3.0\n0\nLWPOLYLINE\n8\nB\n90\n3\n70\n1\n10\n0\n20\n0\n10\n5\n20\n0\n10\n5\n20\n5\n0\nENDSEC\n0\nEOF\n";
        let doc = DxfParser::new(source).parse().expect("parse");
        assert_eq!(doc.entities().count(), 1);
        let polyline = doc.polylines().next().expect("polyline");
        assert!(polyline.is_closed);
        assert_eq!(polyline.layer, "B");
        assert_eq!(polyline.vertices.len(), 3);
    }

    const SQUARE: &str = "0\nLWPOLYLINE\n8\nSITE\n90\n4\n70\n1\n10\n0\n20\n0\n10\n10\n20\n0\n10\n10\n20\n10\n10\n0\n20\n10\n";

    fn entities(body: &str) -> String {
        format!("0\nSECTION\n2\nENTITIES\n{SQUARE}{body}0\nENDSEC\n0\nEOF\n")
    }

    #[test]
    fn lwpolyline_with_dangling_coordinate_is_skipped() {
        let source = entities("0\nLWPOLYLINE\n10\n1\n20\n1\n10\n2\n");
        let doc = DxfParser::new(&source).parse().expect("parse");
        assert_eq!(doc.polylines().count(), 1);
        assert_eq!(doc.polylines().next().map(|p| p.layer.as_str()), Some("SITE"));
    }

    #[test]
    fn polylines_without_vertices_are_skipped() {
        let lwpolyline = "0\nLWPOLYLINE\n8\nEMPTY\n90\n0\n70\n1\n";
        let classic = "0\nPOLYLINE\n8\nEMPTY\n66\n1\n70\n1\n0\nSEQEND\n";
        let broken_vertex = "0\nPOLYLINE\n8\nBROKEN\n70\n1\n0\nVERTEX\n10\n1\n0\nVERTEX\n10\n2\n20\n2\n0\nSEQEND\n";
        let source = entities(&format!("{lwpolyline}{classic}{broken_vertex}"));
        let doc = DxfParser::new(&source).parse().expect("parse");
        let layers: Vec<&str> = doc.polylines().map(|p| p.layer.as_str()).collect();
        assert_eq!(layers, vec!["SITE"]);
    }

    #[test]
    fn incomplete_text_is_skipped() {
        let no_height = "0\nTEXT\n8\nNOTE\n10\n1\n20\n1\n1\nlabel\n";
        let half_alignment = "0\nTEXT\n8\nNOTE\n10\n1\n20\n1\n40\n2.5\n1\nlabel\n11\n1\n";
        let complete = "0\nTEXT\n8\nNOTE\n10\n3\n20\n4\n40\n2.5\n1\nkept\n";
        let source = entities(&format!("{no_height}{half_alignment}{complete}"));
        let doc = DxfParser::new(&source).parse().expect("parse");
        assert_eq!(doc.polylines().count(), 1);
        let texts: Vec<&str> = doc.texts().map(|t| t.content.as_str()).collect();
        assert_eq!(texts, vec!["kept"]);
    }

    #[test]
    fn malformed_group_code_stream_is_still_an_error() {
        let source = entities("0\nTEXT\n40\nhigh\n");
        let err = DxfParser::new(&source).parse().unwrap_err();
        assert!(matches!(err, DxfError::Invalid { .. }));
    }
}
