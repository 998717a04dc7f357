//! Minimal ISOBMFF plumbing: structural validation of top-level boxes,
//! `sidx` parsing, and smooth-streaming `tfrf` extraction.

use aulos_index::{AddedSegment, ByteRange};

/// A top-level box header.
#[derive(Clone, Copy, Debug)]
struct BoxHeader {
    kind: [u8; 4],
    offset: usize,
    size: usize,
    header_size: usize,
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    data.get(at..at + 8).map(|b| {
        u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    })
}

fn read_boxes(data: &[u8]) -> Result<Vec<BoxHeader>, String> {
    let mut boxes = Vec::new();
    let mut offset = 0_usize;
    while offset < data.len() {
        if data.len() - offset < 8 {
            return Err(format!("truncated box header at offset {offset}"));
        }
        let size32 = read_u32(data, offset).unwrap_or(0) as usize;
        let kind = [
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ];
        let (size, header_size) = match size32 {
            0 => (data.len() - offset, 8),
            1 => {
                let Some(size64) = read_u64(data, offset + 8) else {
                    return Err(format!("truncated largesize at offset {offset}"));
                };
                (size64 as usize, 16)
            }
            n => (n, 8),
        };
        if size < header_size {
            return Err(format!("box at offset {offset} smaller than its header"));
        }
        if offset + size > data.len() {
            return Err(format!(
                "box `{}` at offset {offset} overruns the payload",
                String::from_utf8_lossy(&kind)
            ));
        }
        boxes.push(BoxHeader {
            kind,
            offset,
            size,
            header_size,
        });
        offset += size;
    }
    Ok(boxes)
}

/// Check that the payload is a clean sequence of top-level boxes.
///
/// Catches truncated downloads and mid-stream corruption before the bytes
/// are handed to the media pipeline.
pub fn validate_top_level_boxes(data: &[u8]) -> Result<(), String> {
    if data.is_empty() {
        return Err("empty payload".to_string());
    }
    read_boxes(data).map(|_| ())
}

/// Parse the `sidx` box out of an init payload.
///
/// `resource_offset` is the absolute offset of `data[0]` within the
/// resource, so the returned byte ranges address the resource directly.
/// Returns `None` when no `sidx` box is present.
#[must_use]
pub fn parse_sidx(data: &[u8], resource_offset: u64) -> Option<Vec<AddedSegment>> {
    let boxes = read_boxes(data).ok()?;
    let sidx = boxes.iter().find(|b| &b.kind == b"sidx")?;
    let body = &data[sidx.offset + sidx.header_size..sidx.offset + sidx.size];

    let version = *body.first()?;
    // version(1) + flags(3) + reference_ID(4) + timescale(4)
    let mut at = 12;
    let (earliest, first_offset) = if version == 0 {
        let e = read_u32(body, at)? as u64;
        let f = read_u32(body, at + 4)? as u64;
        at += 8;
        (e, f)
    } else {
        let e = read_u64(body, at)?;
        let f = read_u64(body, at + 8)?;
        at += 16;
        (e, f)
    };
    // reserved(2) + reference_count(2)
    let count = read_u32(body, at)? & 0xFFFF;
    at += 4;

    // References are relative to the first byte after the sidx box.
    let mut media_offset =
        resource_offset + (sidx.offset + sidx.size) as u64 + first_offset;
    let mut time = earliest;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let size_word = read_u32(body, at)?;
        let duration = read_u32(body, at + 4)? as u64;
        at += 12; // size + duration + SAP info
        let reference_type = size_word >> 31;
        let referenced_size = (size_word & 0x7FFF_FFFF) as u64;
        if reference_type == 0 {
            out.push(AddedSegment {
                start: time,
                duration,
                byte_range: Some(ByteRange::new(
                    media_offset,
                    Some(media_offset + referenced_size - 1),
                )),
            });
        }
        media_offset += referenced_size;
        time += duration;
    }
    Some(out)
}

/// The `tfrf` UUID box of a smooth fragment advertises the next fragments'
/// start times and durations.
const TFRF_UUID: [u8; 16] = [
    0xd4, 0x80, 0x7e, 0xf2, 0xca, 0x39, 0x46, 0x95, 0x8e, 0x54, 0x26, 0xcb, 0x9e, 0x46, 0xa7,
    0x9f,
];

/// Extract the successor list of a smooth fragment, for index patching.
#[must_use]
pub fn parse_smooth_next_segments(data: &[u8]) -> Vec<AddedSegment> {
    let Ok(boxes) = read_boxes(data) else {
        return Vec::new();
    };
    for top in &boxes {
        if &top.kind != b"moof" {
            continue;
        }
        let content = &data[top.offset + top.header_size..top.offset + top.size];
        let Ok(inner) = read_boxes(content) else {
            continue;
        };
        for traf in inner.iter().filter(|b| &b.kind == b"traf") {
            let traf_content = &content[traf.offset + traf.header_size..traf.offset + traf.size];
            let Ok(traf_boxes) = read_boxes(traf_content) else {
                continue;
            };
            for uuid_box in traf_boxes.iter().filter(|b| &b.kind == b"uuid") {
                let body =
                    &traf_content[uuid_box.offset + uuid_box.header_size..uuid_box.offset + uuid_box.size];
                if body.len() < 16 + 5 || body[..16] != TFRF_UUID {
                    continue;
                }
                let payload = &body[16..];
                let version = payload[0];
                let count = payload[4] as usize;
                let mut at = 5;
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    let (start, duration) = if version == 1 {
                        let Some(start) = read_u64(payload, at) else {
                            return out;
                        };
                        let Some(duration) = read_u64(payload, at + 8) else {
                            return out;
                        };
                        at += 16;
                        (start, duration)
                    } else {
                        let Some(start) = read_u32(payload, at) else {
                            return out;
                        };
                        let Some(duration) = read_u32(payload, at + 4) else {
                            return out;
                        };
                        at += 8;
                        (start as u64, duration as u64)
                    };
                    out.push(AddedSegment {
                        start,
                        duration,
                        byte_range: None,
                    });
                }
                return out;
            }
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn make_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(&(8 + body.len() as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out
    }

    fn sidx_v0(references: &[(u32, u32)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(0); // version
        body.extend_from_slice(&[0, 0, 0]); // flags
        body.extend_from_slice(&1_u32.to_be_bytes()); // reference_ID
        body.extend_from_slice(&90_000_u32.to_be_bytes()); // timescale
        body.extend_from_slice(&0_u32.to_be_bytes()); // earliest
        body.extend_from_slice(&0_u32.to_be_bytes()); // first_offset
        body.extend_from_slice(&0_u16.to_be_bytes()); // reserved
        body.extend_from_slice(&(references.len() as u16).to_be_bytes());
        for (size, duration) in references {
            body.extend_from_slice(&size.to_be_bytes());
            body.extend_from_slice(&duration.to_be_bytes());
            body.extend_from_slice(&0_u32.to_be_bytes()); // SAP
        }
        make_box(b"sidx", &body)
    }

    #[test]
    fn clean_box_sequence_validates() {
        let mut data = make_box(b"styp", b"isom");
        data.extend_from_slice(&make_box(b"free", b""));
        assert!(validate_top_level_boxes(&data).is_ok());
    }

    #[rstest]
    #[case::cut_mid_body(32)]
    #[case::cut_mid_header(7)]
    #[case::empty(0)]
    fn truncated_payload_fails_validation(#[case] keep: usize) {
        let data = make_box(b"mdat", &[0_u8; 64]);
        assert!(validate_top_level_boxes(&data[..keep]).is_err());
    }

    #[test]
    fn undersized_box_fails_validation() {
        let mut data = Vec::new();
        data.extend_from_slice(&4_u32.to_be_bytes()); // smaller than header
        data.extend_from_slice(b"free");
        assert!(validate_top_level_boxes(&data).is_err());
    }

    #[test]
    fn sidx_references_become_ranged_segments() {
        let mut data = make_box(b"ftyp", b"dash");
        let ftyp_len = data.len() as u64;
        let sidx = sidx_v0(&[(1_000, 90_000), (2_000, 90_000)]);
        let sidx_len = sidx.len() as u64;
        data.extend_from_slice(&sidx);

        let segments = parse_sidx(&data, 0).unwrap();
        assert_eq!(segments.len(), 2);

        let media_start = ftyp_len + sidx_len;
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments[0].duration, 90_000);
        assert_eq!(
            segments[0].byte_range,
            Some(ByteRange::new(media_start, Some(media_start + 999)))
        );
        assert_eq!(segments[1].start, 90_000);
        assert_eq!(
            segments[1].byte_range,
            Some(ByteRange::new(media_start + 1_000, Some(media_start + 2_999)))
        );
    }

    #[test]
    fn resource_offset_shifts_sidx_ranges() {
        let data = sidx_v0(&[(500, 90_000)]);
        let segments = parse_sidx(&data, 1_000).unwrap();
        let media_start = 1_000 + data.len() as u64;
        assert_eq!(
            segments[0].byte_range,
            Some(ByteRange::new(media_start, Some(media_start + 499)))
        );
    }

    #[test]
    fn payload_without_sidx_is_none() {
        let data = make_box(b"ftyp", b"dash");
        assert!(parse_sidx(&data, 0).is_none());
    }

    #[test]
    fn tfrf_successors_are_extracted() {
        // traf > uuid(tfrf v1) with two successors
        let mut tfrf_body = Vec::new();
        tfrf_body.extend_from_slice(&TFRF_UUID);
        tfrf_body.push(1); // version
        tfrf_body.extend_from_slice(&[0, 0, 0]); // flags
        tfrf_body.push(2); // fragment count
        tfrf_body.extend_from_slice(&200_000_000_u64.to_be_bytes());
        tfrf_body.extend_from_slice(&20_000_000_u64.to_be_bytes());
        tfrf_body.extend_from_slice(&220_000_000_u64.to_be_bytes());
        tfrf_body.extend_from_slice(&20_000_000_u64.to_be_bytes());

        let uuid = make_box(b"uuid", &tfrf_body);
        let traf = make_box(b"traf", &uuid);
        let moof = make_box(b"moof", &traf);

        let successors = parse_smooth_next_segments(&moof);
        assert_eq!(successors.len(), 2);
        assert_eq!(successors[0].start, 200_000_000);
        assert_eq!(successors[1].start, 220_000_000);
        assert_eq!(successors[0].duration, 20_000_000);
    }

    #[test]
    fn fragment_without_tfrf_yields_nothing() {
        let moof = make_box(b"moof", &make_box(b"traf", b""));
        assert!(parse_smooth_next_segments(&moof).is_empty());
    }
}
