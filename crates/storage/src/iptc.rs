//! IPTC-IIM keyword codec for JPEG files.
//!
//! Keywords are dataset 2:25 inside the IPTC resource (0x0404) of the
//! Photoshop 3.0 image resource block carried in APP13 segments. Only the
//! header segments are parsed; the entropy-coded scan is copied verbatim.

use crate::MetadataError;
use bytes::BufMut;

const MARKER_PREFIX: u8 = 0xFF;
const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP0: u8 = 0xE0;
const APP13: u8 = 0xED;
const APP15: u8 = 0xEF;

const PHOTOSHOP_SIGNATURE: &[u8] = b"Photoshop 3.0\0";
const RESOURCE_SIGNATURE: &[u8] = b"8BIM";
const IPTC_RESOURCE: u16 = 0x0404;
const IPTC_DIGEST_RESOURCE: u16 = 0x0425;

const TAG_MARKER: u8 = 0x1C;
const ENVELOPE_RECORD: u8 = 1;
const CODED_CHARSET: u8 = 90;
const APPLICATION_RECORD: u8 = 2;
const RECORD_VERSION: u8 = 0;
const KEYWORDS: u8 = 25;
const UTF8_CHARSET: &[u8] = b"\x1b%G";
const IIM_VERSION: &[u8] = &[0x00, 0x04];

pub const MAX_KEYWORD_BYTES: usize = 64;
const MAX_SEGMENT_PAYLOAD: usize = u16::MAX as usize - 2;

struct Segment<'a> {
    marker: u8,
    standalone: bool,
    payload: &'a [u8],
}

impl Segment<'_> {
    fn is_photoshop(&self) -> bool {
        self.marker == APP13 && self.payload.starts_with(PHOTOSHOP_SIGNATURE)
    }
}

struct JpegLayout<'a> {
    segments: Vec<Segment<'a>>,
    /// Everything from the SOS (or EOI) marker to the end of the file.
    scan: &'a [u8],
}

struct Resource<'a> {
    id: u16,
    name: &'a [u8],
    data: Vec<u8>,
}

#[derive(Clone)]
struct DataSet {
    record: u8,
    number: u8,
    value: Vec<u8>,
}

fn malformed(msg: impl Into<String>) -> MetadataError {
    MetadataError::Malformed(msg.into())
}

fn split_segments(data: &[u8]) -> Result<JpegLayout<'_>, MetadataError> {
    if data.len() < 4 || data[0] != MARKER_PREFIX || data[1] != SOI {
        return Err(MetadataError::NotJpeg);
    }
    let mut pos = 2;
    let mut segments = Vec::new();
    loop {
        if pos >= data.len() {
            return Err(malformed("header ended before the image scan"));
        }
        if data[pos] != MARKER_PREFIX {
            return Err(malformed(format!("expected marker at offset {pos}")));
        }
        let mut at = pos + 1;
        while at < data.len() && data[at] == MARKER_PREFIX {
            at += 1;
        }
        let marker = *data
            .get(at)
            .ok_or_else(|| malformed("truncated marker"))?;
        match marker {
            SOS | EOI => {
                return Ok(JpegLayout {
                    segments,
                    scan: &data[pos..],
                })
            }
            0x01 | 0xD0..=0xD7 => {
                segments.push(Segment {
                    marker,
                    standalone: true,
                    payload: &[],
                });
                pos = at + 1;
            }
            _ => {
                let len_at = at + 1;
                if len_at + 2 > data.len() {
                    return Err(malformed("truncated segment length"));
                }
                let len = u16::from_be_bytes([data[len_at], data[len_at + 1]]) as usize;
                if len < 2 || len_at + len > data.len() {
                    return Err(malformed(format!(
                        "segment 0x{marker:02X} overruns the file"
                    )));
                }
                segments.push(Segment {
                    marker,
                    standalone: false,
                    payload: &data[len_at + 2..len_at + len],
                });
                pos = len_at + len;
            }
        }
    }
}

fn padded(len: usize) -> usize {
    len + (len & 1)
}

fn parse_resources(mut rest: &[u8]) -> Result<Vec<Resource<'_>>, MetadataError> {
    let mut resources = Vec::new();
    while rest.len() >= RESOURCE_SIGNATURE.len() {
        if !rest.starts_with(RESOURCE_SIGNATURE) {
            if rest.iter().all(|b| *b == 0) {
                break;
            }
            return Err(malformed("image resource without 8BIM signature"));
        }
        if rest.len() < 7 {
            return Err(malformed("truncated image resource header"));
        }
        let id = u16::from_be_bytes([rest[4], rest[5]]);
        let name_len = padded(1 + rest[6] as usize);
        let size_at = 6 + name_len;
        if rest.len() < size_at + 4 {
            return Err(malformed("truncated image resource name"));
        }
        let size = u32::from_be_bytes([
            rest[size_at],
            rest[size_at + 1],
            rest[size_at + 2],
            rest[size_at + 3],
        ]) as usize;
        let data_at = size_at + 4;
        if rest.len() < data_at + size {
            return Err(malformed(format!("image resource 0x{id:04X} overruns block")));
        }
        resources.push(Resource {
            id,
            name: &rest[6..size_at],
            data: rest[data_at..data_at + size].to_vec(),
        });
        rest = &rest[(data_at + padded(size)).min(rest.len())..];
    }
    Ok(resources)
}

fn put_resource(out: &mut Vec<u8>, res: &Resource<'_>) {
    out.put_slice(RESOURCE_SIGNATURE);
    out.put_u16(res.id);
    if res.name.is_empty() {
        out.put_slice(&[0, 0]);
    } else {
        out.put_slice(res.name);
    }
    out.put_u32(res.data.len() as u32);
    out.put_slice(&res.data);
    if res.data.len() & 1 == 1 {
        out.put_u8(0);
    }
}

fn parse_datasets(data: &[u8]) -> Result<Vec<DataSet>, MetadataError> {
    let mut sets = Vec::new();
    let mut pos = 0;
    while pos < data.len() && data[pos] == TAG_MARKER {
        if pos + 5 > data.len() {
            return Err(malformed("truncated IPTC dataset header"));
        }
        let record = data[pos + 1];
        let number = data[pos + 2];
        let size = u16::from_be_bytes([data[pos + 3], data[pos + 4]]) as usize;
        if size & 0x8000 != 0 {
            return Err(malformed(format!(
                "extended IPTC dataset {record}:{number} is not supported"
            )));
        }
        let start = pos + 5;
        if start + size > data.len() {
            return Err(malformed(format!("IPTC dataset {record}:{number} overruns")));
        }
        sets.push(DataSet {
            record,
            number,
            value: data[start..start + size].to_vec(),
        });
        pos = start + size;
    }
    Ok(sets)
}

fn put_dataset(out: &mut Vec<u8>, set: &DataSet) {
    out.put_u8(TAG_MARKER);
    out.put_u8(set.record);
    out.put_u8(set.number);
    out.put_u16(set.value.len() as u16);
    out.put_slice(&set.value);
}

fn put_segment(out: &mut Vec<u8>, marker: u8, payload: &[u8]) -> Result<(), MetadataError> {
    if payload.len() > MAX_SEGMENT_PAYLOAD {
        return Err(MetadataError::SegmentTooLarge(payload.len()));
    }
    out.put_u8(MARKER_PREFIX);
    out.put_u8(marker);
    out.put_u16((payload.len() + 2) as u16);
    out.put_slice(payload);
    Ok(())
}

/// Concatenated resource blocks of every Photoshop APP13 segment.
fn photoshop_block(layout: &JpegLayout<'_>) -> Vec<u8> {
    layout
        .segments
        .iter()
        .filter(|s| s.is_photoshop())
        .flat_map(|s| s.payload[PHOTOSHOP_SIGNATURE.len()..].iter().copied())
        .collect()
}

fn decode_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => raw.iter().map(|&b| b as char).collect(),
    }
}

/// Truncates to the IIM keyword limit without splitting a character.
fn clamp_keyword(keyword: &str) -> &str {
    if keyword.len() <= MAX_KEYWORD_BYTES {
        return keyword;
    }
    let mut end = MAX_KEYWORD_BYTES;
    while !keyword.is_char_boundary(end) {
        end -= 1;
    }
    &keyword[..end]
}

/// Reads the keyword field. `Ok(None)` means the file has no keyword dataset.
pub fn read_keywords(data: &[u8]) -> Result<Option<Vec<String>>, MetadataError> {
    let layout = split_segments(data)?;
    let block = photoshop_block(&layout);
    let resources = parse_resources(&block)?;
    let Some(iptc) = resources.iter().find(|r| r.id == IPTC_RESOURCE) else {
        return Ok(None);
    };
    let keywords: Vec<String> = parse_datasets(&iptc.data)?
        .into_iter()
        .filter(|s| s.record == APPLICATION_RECORD && s.number == KEYWORDS)
        .map(|s| decode_text(&s.value))
        .collect();
    if keywords.is_empty() {
        Ok(None)
    } else {
        Ok(Some(keywords))
    }
}

fn build_iptc(existing: Option<&[u8]>, keywords: &[String]) -> Result<Vec<u8>, MetadataError> {
    let mut sets: Vec<DataSet> = match existing {
        Some(raw) => parse_datasets(raw)?
            .into_iter()
            .filter(|s| {
                !matches!(
                    (s.record, s.number),
                    (ENVELOPE_RECORD, CODED_CHARSET)
                        | (APPLICATION_RECORD, RECORD_VERSION)
                        | (APPLICATION_RECORD, KEYWORDS)
                )
            })
            .collect(),
        None => Vec::new(),
    };
    sets.push(DataSet {
        record: ENVELOPE_RECORD,
        number: CODED_CHARSET,
        value: UTF8_CHARSET.to_vec(),
    });
    sets.push(DataSet {
        record: APPLICATION_RECORD,
        number: RECORD_VERSION,
        value: IIM_VERSION.to_vec(),
    });
    for keyword in keywords {
        let keyword = clamp_keyword(keyword.trim());
        if keyword.is_empty() {
            continue;
        }
        sets.push(DataSet {
            record: APPLICATION_RECORD,
            number: KEYWORDS,
            value: keyword.as_bytes().to_vec(),
        });
    }
    // stable: repeated keyword datasets keep their order
    sets.sort_by_key(|s| (s.record, s.number));

    let mut out = Vec::new();
    for set in &sets {
        put_dataset(&mut out, set);
    }
    Ok(out)
}

/// Returns a copy of `data` whose keyword field is exactly `keywords`.
/// All other IPTC datasets, image resources and segments are kept.
pub fn write_keywords(data: &[u8], keywords: &[String]) -> Result<Vec<u8>, MetadataError> {
    let layout = split_segments(data)?;
    let block = photoshop_block(&layout);
    let resources = parse_resources(&block)?;

    let old_iptc = resources
        .iter()
        .find(|r| r.id == IPTC_RESOURCE)
        .map(|r| r.data.as_slice());
    let new_iptc = Resource {
        id: IPTC_RESOURCE,
        name: &[],
        data: build_iptc(old_iptc, keywords)?,
    };

    let mut payload = Vec::with_capacity(block.len() + new_iptc.data.len() + 32);
    payload.put_slice(PHOTOSHOP_SIGNATURE);
    let mut placed = false;
    for res in &resources {
        match res.id {
            IPTC_DIGEST_RESOURCE => {}
            IPTC_RESOURCE if !placed => {
                put_resource(&mut payload, &new_iptc);
                placed = true;
            }
            IPTC_RESOURCE => {}
            _ => put_resource(&mut payload, res),
        }
    }
    if !placed {
        put_resource(&mut payload, &new_iptc);
    }

    // new APP13 goes where the first Photoshop segment was, or after the
    // leading APPn run (JFIF/Exif must stay first)
    let insert_at = layout
        .segments
        .iter()
        .position(|s| s.is_photoshop())
        .unwrap_or_else(|| {
            layout
                .segments
                .iter()
                .take_while(|s| (APP0..=APP15).contains(&s.marker))
                .count()
        });

    let mut out = Vec::with_capacity(data.len() + payload.len());
    out.put_u8(MARKER_PREFIX);
    out.put_u8(SOI);
    for (idx, seg) in layout.segments.iter().enumerate() {
        if idx == insert_at {
            put_segment(&mut out, APP13, &payload)?;
        }
        if seg.is_photoshop() {
            continue;
        }
        if seg.standalone {
            out.put_u8(MARKER_PREFIX);
            out.put_u8(seg.marker);
        } else {
            put_segment(&mut out, seg.marker, seg.payload)?;
        }
    }
    if insert_at >= layout.segments.len() {
        put_segment(&mut out, APP13, &payload)?;
    }
    out.put_slice(layout.scan);
    Ok(out)
}
