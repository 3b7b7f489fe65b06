//! Binary little-endian PLY codec for splat stores
//!
//! Record layout, one `float` per field in this order:
//! `x y z nx ny nz f_dc_0..2 f_rest_0..3K-1 opacity scale_0..2 rot_0..3 [filter_3D]`.
//!
//! `f_rest_*` is written channel-major (`f_rest_{c*K + k}`) while the store
//! keeps coefficient-major blocks, so both directions transpose. On read,
//! suffixed field groups are ordered by their numeric suffix rather than by
//! their position in the header.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use crate::error::{SplatError, SplatResult};
use crate::splat::{inverse_sigmoid, rest_coefficients, SplatRows};
use crate::store::SplatStore;

/// Name of the per-row filter radius field
pub const FILTER_FIELD: &str = "filter_3D";

/// Rows reserved up front; the header count is not trusted beyond this
const PREALLOC_ROWS: usize = 1 << 16;

/// Which flavour of record to write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlyVariant {
    /// Raw parameters plus a `filter_3D` column
    Filtered,
    /// No filter column; opacity and scale carry the filter compensation
    Fused,
}

/// Ordered field names for a store with `rest_len` color_rest floats per row
pub fn attribute_names(rest_len: usize, variant: PlyVariant) -> Vec<String> {
    let mut names: Vec<String> = ["x", "y", "z", "nx", "ny", "nz"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    names.extend((0..3).map(|i| format!("f_dc_{i}")));
    names.extend((0..rest_len).map(|i| format!("f_rest_{i}")));
    names.push("opacity".to_string());
    names.extend((0..3).map(|i| format!("scale_{i}")));
    names.extend((0..4).map(|i| format!("rot_{i}")));
    if variant == PlyVariant::Filtered {
        names.push(FILTER_FIELD.to_string());
    }
    names
}

/// Serialize a store as a binary PLY
pub fn write_ply<W: Write>(store: &SplatStore, writer: &mut W, variant: PlyVariant) -> SplatResult<()> {
    let rest_len = store.rest_len();
    let k = rest_len / 3;
    let names = attribute_names(rest_len, variant);

    let mut header = String::new();
    header.push_str("ply\nformat binary_little_endian 1.0\n");
    header.push_str(&format!("element vertex {}\n", store.len()));
    for name in &names {
        header.push_str(&format!("property float {name}\n"));
    }
    header.push_str("end_header\n");
    writer.write_all(header.as_bytes())?;

    let mut record: Vec<f32> = Vec::with_capacity(names.len());
    let mut bytes: Vec<u8> = Vec::with_capacity(names.len() * 4);
    for i in 0..store.len() {
        record.clear();
        record.extend_from_slice(&store.positions()[i]);
        record.extend_from_slice(&[0.0; 3]);
        record.extend_from_slice(&store.color_dc()[i]);

        let block = store.rest_block(i);
        for c in 0..3 {
            record.extend((0..k).map(|coef| block[coef * 3 + c]));
        }

        match variant {
            PlyVariant::Filtered => {
                record.push(store.opacity_logits()[i]);
                record.extend_from_slice(&store.log_scales()[i]);
            }
            PlyVariant::Fused => {
                record.push(inverse_sigmoid(store.effective_opacity(i)));
                record.extend(store.effective_scale(i).to_array().map(f32::ln));
            }
        }
        record.extend_from_slice(&store.rotations()[i]);
        if variant == PlyVariant::Filtered {
            record.push(store.filter_radius(i));
        }

        bytes.clear();
        for value in &record {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        writer.write_all(&bytes)?;
    }

    Ok(())
}

/// Parsed header: vertex count and ordered field names
#[derive(Clone, Debug, PartialEq)]
pub struct PlyHeader {
    pub vertex_count: usize,
    pub fields: Vec<String>,
}

impl PlyHeader {
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }
}

/// Read the ASCII header, leaving the reader at the first body byte
pub fn read_header<R: BufRead>(reader: &mut R) -> SplatResult<PlyHeader> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim() != "ply" {
        return Err(SplatError::InvalidHeader("not a PLY file".to_string()));
    }

    let mut vertex_count = None;
    let mut fields = Vec::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(SplatError::InvalidHeader("missing end_header".to_string()));
        }
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("format") => {
                let format = tokens.next().unwrap_or_default();
                if format != "binary_little_endian" {
                    return Err(SplatError::UnsupportedFormat(format.to_string()));
                }
            }
            Some("element") => {
                let name = tokens.next().unwrap_or_default();
                if name != "vertex" || vertex_count.is_some() {
                    return Err(SplatError::UnsupportedFormat(format!("element {name}")));
                }
                let count = tokens
                    .next()
                    .and_then(|c| c.parse::<usize>().ok())
                    .ok_or_else(|| SplatError::InvalidHeader(line.trim().to_string()))?;
                vertex_count = Some(count);
            }
            Some("property") => {
                if vertex_count.is_none() {
                    return Err(SplatError::InvalidHeader(
                        "property before element".to_string(),
                    ));
                }
                let kind = tokens.next().unwrap_or_default();
                if kind != "float" && kind != "float32" {
                    return Err(SplatError::UnsupportedFormat(format!("property type {kind}")));
                }
                let name = tokens
                    .next()
                    .ok_or_else(|| SplatError::InvalidHeader(line.trim().to_string()))?;
                fields.push(name.to_string());
            }
            Some("end_header") => break,
            Some("comment") | Some("obj_info") | None => {}
            Some(other) => {
                return Err(SplatError::InvalidHeader(format!("unexpected keyword {other}")));
            }
        }
    }

    let vertex_count =
        vertex_count.ok_or_else(|| SplatError::InvalidHeader("no vertex element".to_string()))?;
    Ok(PlyHeader {
        vertex_count,
        fields,
    })
}

/// Column indices of every field the store needs
struct ColumnLayout {
    position: [usize; 3],
    color_dc: Vec<usize>,
    color_rest: Vec<usize>,
    opacity: usize,
    scale: Vec<usize>,
    rotation: Vec<usize>,
    filter: Option<usize>,
}

impl ColumnLayout {
    fn resolve(header: &PlyHeader, rest_len: usize) -> SplatResult<Self> {
        let position = [
            column(header, "x")?,
            column(header, "y")?,
            column(header, "z")?,
        ];
        let color_dc = suffixed(header, "f_dc_");
        let color_rest = suffixed(header, "f_rest_");
        let scale = suffixed(header, "scale_");
        let rotation = suffixed(header, "rot_");

        if color_dc.is_empty() {
            return Err(SplatError::MissingField("f_dc_0".to_string()));
        }
        expect_count("f_dc_", 3, color_dc.len())?;
        if color_rest.len() != rest_len {
            return Err(SplatError::CoefficientCount {
                expected: rest_len,
                found: color_rest.len(),
            });
        }
        if scale.is_empty() {
            return Err(SplatError::MissingField("scale_0".to_string()));
        }
        expect_count("scale_", 3, scale.len())?;
        if rotation.is_empty() {
            return Err(SplatError::MissingField("rot_0".to_string()));
        }
        expect_count("rot_", 4, rotation.len())?;

        Ok(Self {
            position,
            color_dc,
            color_rest,
            opacity: column(header, "opacity")?,
            scale,
            rotation,
            filter: header.fields.iter().position(|f| f == FILTER_FIELD),
        })
    }
}

fn column(header: &PlyHeader, name: &str) -> SplatResult<usize> {
    header
        .fields
        .iter()
        .position(|f| f == name)
        .ok_or_else(|| SplatError::MissingField(name.to_string()))
}

/// Columns named `{prefix}{n}`, ordered by `n`
fn suffixed(header: &PlyHeader, prefix: &str) -> Vec<usize> {
    let mut found: Vec<(usize, usize)> = header
        .fields
        .iter()
        .enumerate()
        .filter_map(|(col, name)| {
            let suffix = name.strip_prefix(prefix)?.parse::<usize>().ok()?;
            Some((suffix, col))
        })
        .collect();
    found.sort_by_key(|&(suffix, _)| suffix);
    found.into_iter().map(|(_, col)| col).collect()
}

fn expect_count(prefix: &'static str, expected: usize, found: usize) -> SplatResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(SplatError::FieldCount {
            prefix,
            expected,
            found,
        })
    }
}

/// Deserialize a binary PLY into a store with the given maximum color degree
///
/// Files without a `filter_3D` column load with every filter radius at 0.
pub fn read_ply<R: BufRead>(reader: &mut R, max_sh_degree: u32) -> SplatResult<SplatStore> {
    let header = read_header(reader)?;
    let k = rest_coefficients(max_sh_degree);
    let rest_len = 3 * k;
    let layout = ColumnLayout::resolve(&header, rest_len)?;

    let n = header.vertex_count;
    let width = header.fields.len();
    let reserve = n.min(PREALLOC_ROWS);
    let mut rows = SplatRows::with_capacity(reserve, rest_len);
    let mut radii = Vec::with_capacity(reserve);
    let mut bytes = vec![0u8; width * 4];
    let mut record = vec![0.0f32; width];

    for read in 0..n {
        if let Err(err) = reader.read_exact(&mut bytes) {
            return Err(match err.kind() {
                ErrorKind::UnexpectedEof => SplatError::Truncated { expected: n, read },
                _ => SplatError::Io(err),
            });
        }
        for (value, chunk) in record.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        rows.positions.push(layout.position.map(|c| record[c]));
        rows.color_dc
            .push([record[layout.color_dc[0]], record[layout.color_dc[1]], record[layout.color_dc[2]]]);
        let rest_start = rows.color_rest.len();
        rows.color_rest.resize(rest_start + rest_len, 0.0);
        for (j, &col) in layout.color_rest.iter().enumerate() {
            let (c, coef) = (j / k, j % k);
            rows.color_rest[rest_start + coef * 3 + c] = record[col];
        }
        rows.opacity_logits.push(record[layout.opacity]);
        rows.log_scales
            .push([record[layout.scale[0]], record[layout.scale[1]], record[layout.scale[2]]]);
        rows.rotations.push([
            record[layout.rotation[0]],
            record[layout.rotation[1]],
            record[layout.rotation[2]],
            record[layout.rotation[3]],
        ]);
        radii.push(layout.filter.map_or(0.0, |c| record[c]));
    }

    let mut store = SplatStore::from_rows(max_sh_degree, rows)?;
    store.set_filter_radii(radii)?;
    store.set_active_sh_degree(max_sh_degree);
    Ok(store)
}

/// Write a store to `path`
pub fn save_ply(store: &SplatStore, path: &Path, variant: PlyVariant) -> SplatResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_ply(store, &mut writer, variant)?;
    writer.flush()?;
    tracing::info!("Saved {} splats ({:?}) to {:?}", store.len(), variant, path);
    Ok(())
}

/// Load a store from `path`
pub fn load_ply(path: &Path, max_sh_degree: u32) -> SplatResult<SplatStore> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let store = read_ply(&mut reader, max_sh_degree)?;
    tracing::info!("Loaded {} splats from {:?}", store.len(), path);
    Ok(store)
}
