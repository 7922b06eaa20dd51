//! Label table export format.
//!
//! ```text
//! Video name,<name>
//! Video fps,<fps>
//! Total seconds,<s_0>,<s_1>,...
//! Total frames,<f_0>,<f_1>,...
//! Frame,<behavior_0>,<behavior_1>,...
//! 0,<bit>,<bit>,...
//! ```
//!
//! Lines are LF-terminated. Totals are derived from the matrix, seconds are
//! rounded to three decimals.

use std::io::{self, Write};

use tracing::debug;

use crate::{BehaviorSet, LabelError, LabelMatrix};

pub const HEADER_TOKEN: &str = "frame";

#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    pub video_name: String,
    pub fps: f64,
}

/// Result of a successful decode. Columns follow `behaviors` order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedTable {
    pub video_name: Option<String>,
    pub fps: Option<f64>,
    pub behaviors: BehaviorSet,
    pub matrix: LabelMatrix,
    pub skipped_rows: usize,
}

pub fn round3(v: f64) -> f64 { (v * 1000.0).round() / 1000.0 }

pub fn write<W: Write>(out: &mut W, meta: &TableMeta, behaviors: &BehaviorSet, matrix: &LabelMatrix) -> io::Result<()> {
    let fps = if meta.fps > 0.0 { meta.fps } else { 1.0 };
    writeln!(out, "Video name,{}", meta.video_name)?;
    writeln!(out, "Video fps,{}", meta.fps)?;

    write!(out, "Total seconds")?;
    for b in behaviors.iter() { write!(out, ",{}", round3(matrix.count(b.id) as f64 / fps))?; }
    writeln!(out)?;
    write!(out, "Total frames")?;
    for b in behaviors.iter() { write!(out, ",{}", matrix.count(b.id))?; }
    writeln!(out)?;

    write!(out, "Frame")?;
    for b in behaviors.iter() { write!(out, ",{}", b.name)?; }
    writeln!(out)?;

    let mut row = String::with_capacity(8 + behaviors.len() * 2);
    for frame in 0..matrix.total_frames() {
        row.clear();
        row.push_str(&frame.to_string());
        for b in behaviors.iter() {
            row.push(',');
            row.push(if matrix.get(b.id, frame) == 1 { '1' } else { '0' });
        }
        row.push('\n');
        out.write_all(row.as_bytes())?;
    }
    Ok(())
}

pub fn encode(meta: &TableMeta, behaviors: &BehaviorSet, matrix: &LabelMatrix) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write(&mut buf, meta, behaviors, matrix);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Parses a label table into a matrix of `total_frames` rows.
///
/// Metadata lines before the header are optional. Rows whose leading field is
/// not an integer are skipped, short rows read as 0, and frame indices outside
/// `0..total_frames` are ignored. Nothing is returned unless a header is found.
pub fn decode(text: &str, total_frames: usize) -> Result<ImportedTable, LabelError> {
    let mut lines = text.lines().map(|l| l.trim_end_matches('\r'));
    let mut video_name = None;
    let mut fps = None;

    let header = loop {
        let Some(line) = lines.next() else { return Err(LabelError::MissingHeader); };
        let mut fields = line.split(',');
        let lead = fields.next().unwrap_or("").trim();
        if lead.eq_ignore_ascii_case(HEADER_TOKEN) { break fields.map(str::trim).collect::<Vec<_>>(); }
        match lead {
            "Video name" => video_name = Some(fields.collect::<Vec<_>>().join(",")),
            "Video fps" => fps = fields.next().and_then(|v| v.trim().parse::<f64>().ok()),
            _ => {}
        }
    };

    let behaviors = BehaviorSet::define(header.iter())?;
    // Duplicate header names fold into the first column of that name.
    let column_ids: Vec<Option<usize>> = header.iter().map(|name| behaviors.position(name)).collect();
    let mut matrix = LabelMatrix::new(behaviors.len(), total_frames);
    let mut skipped_rows = 0usize;

    for line in lines {
        if line.trim().is_empty() { continue; }
        let mut fields = line.split(',');
        let Ok(frame) = fields.next().unwrap_or("").trim().parse::<i64>() else {
            skipped_rows += 1;
            continue;
        };
        if frame < 0 || frame as usize >= total_frames { continue; }
        for (col, field) in fields.enumerate() {
            let Some(Some(id)) = column_ids.get(col) else { continue; };
            if field.trim() == "1" { matrix.set(*id, frame as usize, true); }
        }
    }
    if skipped_rows > 0 { debug!(skipped_rows, "label table rows without a frame index were skipped"); }

    Ok(ImportedTable { video_name, fps, behaviors, matrix, skipped_rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (TableMeta, BehaviorSet, LabelMatrix) {
        let behaviors = BehaviorSet::define(["groom", "rear"]).unwrap();
        let mut m = LabelMatrix::new(2, 5);
        m.paint_range(0, 1, 3);
        m.set(1, 4, true);
        (TableMeta { video_name: "mouse.mp4".into(), fps: 2.0 }, behaviors, m)
    }

    #[test]
    fn test_encode_layout() {
        let (meta, behaviors, m) = sample();
        let text = encode(&meta, &behaviors, &m);
        let expected = "Video name,mouse.mp4\n\
                        Video fps,2\n\
                        Total seconds,1.5,0.5\n\
                        Total frames,3,1\n\
                        Frame,groom,rear\n\
                        0,0,0\n\
                        1,1,0\n\
                        2,1,0\n\
                        3,1,0\n\
                        4,0,1\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_decode_reproduces_encoded_matrix() {
        let (meta, behaviors, m) = sample();
        let table = decode(&encode(&meta, &behaviors, &m), 5).unwrap();
        assert_eq!(table.matrix, m);
        assert_eq!(table.behaviors, behaviors);
        assert_eq!(table.video_name.as_deref(), Some("mouse.mp4"));
        assert_eq!(table.fps, Some(2.0));
    }

    #[test]
    fn test_names_with_spaces_and_symbols_survive_decode() {
        let behaviors = BehaviorSet::define(["rear supported", "groom (face)", "wall-climb"]).unwrap();
        let mut m = LabelMatrix::new(3, 4);
        m.paint_range(0, 0, 1);
        m.set(2, 3, true);
        let meta = TableMeta { video_name: "cage 2.mp4".into(), fps: 25.0 };
        let table = decode(&encode(&meta, &behaviors, &m), 4).unwrap();
        assert_eq!(table.behaviors, behaviors);
        assert_eq!(table.matrix, m);
    }

    #[test]
    fn test_decode_rejects_quoted_header_name() {
        let text = "Frame,\"rear\",groom\n0,1,0\n";
        assert_eq!(decode(text, 1), Err(LabelError::InvalidName("\"rear\"".into())));
    }

    #[test]
    fn test_decode_requires_header() {
        let text = "Video name,x\n0,1,0\n1,0,1\n";
        assert_eq!(decode(text, 2), Err(LabelError::MissingHeader));
        assert_eq!(decode("", 2), Err(LabelError::MissingHeader));
    }

    #[test]
    fn test_decode_header_is_case_insensitive_and_metadata_optional() {
        let table = decode("FRAME,a\n0,1\n", 1).unwrap();
        assert_eq!(table.matrix.get(0, 0), 1);
        assert!(table.video_name.is_none());
    }

    #[test]
    fn test_decode_tolerates_short_and_bad_rows() {
        let text = "frame,a,b\n0,1\n1\nnope,1,1\n2,0,1,1\n\n-1,1,1\n9,1,1\n";
        let table = decode(text, 3).unwrap();
        assert_eq!(table.matrix.column(0).unwrap(), &[1, 0, 0]);
        assert_eq!(table.matrix.column(1).unwrap(), &[0, 0, 1]);
        assert_eq!(table.skipped_rows, 1);
    }

    #[test]
    fn test_decode_crlf_and_duplicate_columns() {
        let text = "Frame,a,a, b \r\n0,0,1,1\r\n";
        let table = decode(text, 1).unwrap();
        assert_eq!(table.behaviors.names(), vec!["a", "b"]);
        assert_eq!(table.matrix.get(0, 0), 1);
        assert_eq!(table.matrix.get(1, 0), 1);
    }

    #[test]
    fn test_decode_header_without_behaviors() {
        assert_eq!(decode("Frame\n0\n", 1), Err(LabelError::EmptyBehaviorList));
    }
}
