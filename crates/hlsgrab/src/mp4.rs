//! Minimal ISO-BMFF helpers for fragmented MP4 output.

use bytes::{Bytes, BytesMut};

/// One remuxed fragment together with the initialization segment it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemuxedFragment {
    /// `ftyp` + `moov`.
    pub init_segment: Bytes,
    /// `moof` + `mdat`, with any `styp`/`sidx` boxes that precede them.
    pub media_segment: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: [u8; 4],
    /// Size of the whole box including the header. `None` if it extends to
    /// the end of the stream.
    pub size: Option<u64>,
    pub header_len: usize,
}

/// Read a box header at the start of `data`.
pub fn read_box_header(data: &[u8]) -> Option<BoxHeader> {
    if data.len() < 8 {
        return None;
    }
    let size = u32::from_be_bytes(data[0..4].try_into().ok()?);
    let box_type: [u8; 4] = data[4..8].try_into().ok()?;
    match size {
        0 => Some(BoxHeader {
            box_type,
            size: None,
            header_len: 8,
        }),
        1 => {
            if data.len() < 16 {
                return None;
            }
            let size = u64::from_be_bytes(data[8..16].try_into().ok()?);
            Some(BoxHeader {
                box_type,
                size: Some(size),
                header_len: 16,
            })
        }
        size => Some(BoxHeader {
            box_type,
            size: Some(size as u64),
            header_len: 8,
        }),
    }
}

/// Iterate over `(offset, header)` of the boxes directly inside `data`.
fn child_boxes(data: &[u8]) -> impl Iterator<Item = (usize, BoxHeader, usize)> + '_ {
    let mut offset = 0;
    std::iter::from_fn(move || {
        let header = read_box_header(&data[offset..])?;
        let len = match header.size {
            Some(size) => usize::try_from(size).ok()?,
            None => data.len() - offset,
        };
        if len < header.header_len || offset + len > data.len() {
            return None;
        }
        let item = (offset, header, len);
        offset += len;
        Some(item)
    })
}

/// Set the movie duration in `moov/mvhd` to `seconds`, expressed in the
/// movie timescale. Returns `false` if no patchable `mvhd` was found.
pub fn patch_mvhd_duration(init: &mut [u8], seconds: f64) -> bool {
    let Some((moov_offset, moov_header, moov_len)) =
        child_boxes(init).find(|(_, header, _)| &header.box_type == b"moov")
    else {
        return false;
    };

    let moov_body = moov_offset + moov_header.header_len;
    let moov_end = moov_offset + moov_len;
    let Some((mvhd_offset, mvhd_header, mvhd_len)) = child_boxes(&init[moov_body..moov_end])
        .find(|(_, header, _)| &header.box_type == b"mvhd")
    else {
        return false;
    };

    let start = moov_body + mvhd_offset + mvhd_header.header_len;
    let mvhd = &mut init[start..moov_body + mvhd_offset + mvhd_len];
    let Some(&version) = mvhd.first() else {
        return false;
    };

    // version(1) flags(3) creation modification timescale(4) duration
    let (timescale_at, duration_at, duration_len) = match version {
        0 => (12, 16, 4),
        1 => (20, 24, 8),
        _ => return false,
    };
    if mvhd.len() < duration_at + duration_len {
        return false;
    }
    let timescale = u32::from_be_bytes([
        mvhd[timescale_at],
        mvhd[timescale_at + 1],
        mvhd[timescale_at + 2],
        mvhd[timescale_at + 3],
    ]);
    if timescale == 0 {
        return false;
    }

    let duration = (seconds * timescale as f64).round().max(0.);
    if duration_len == 4 {
        let duration = duration.min(u32::MAX as f64) as u32;
        mvhd[duration_at..duration_at + 4].copy_from_slice(&duration.to_be_bytes());
    } else {
        let duration = duration as u64;
        mvhd[duration_at..duration_at + 8].copy_from_slice(&duration.to_be_bytes());
    }
    true
}

/// Splits a fragmented MP4 byte stream into its initialization segment and
/// a sequence of media segments as the bytes arrive.
#[derive(Default)]
pub struct FragmentSplitter {
    buffer: BytesMut,
    init: BytesMut,
    init_done: Option<Bytes>,
    pending: BytesMut,
}

impl FragmentSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes and collect every fragment completed by them.
    pub fn push(&mut self, data: &[u8]) -> Vec<RemuxedFragment> {
        self.buffer.extend_from_slice(data);

        let mut fragments = Vec::new();
        while let Some(header) = read_box_header(&self.buffer) {
            // a size-less box can only be consumed at end of stream
            let Some(size) = header.size else {
                break;
            };
            let Ok(size) = usize::try_from(size) else {
                break;
            };
            if size < header.header_len || self.buffer.len() < size {
                break;
            }

            let data = self.buffer.split_to(size).freeze();
            if let Some(fragment) = self.accept(header.box_type, data) {
                fragments.push(fragment);
            }
        }
        fragments
    }

    /// Consume whatever is left once the stream ended.
    pub fn finish(&mut self) -> Vec<RemuxedFragment> {
        let mut fragments = Vec::new();
        if let Some(header) = read_box_header(&self.buffer) {
            if header.size.is_none() {
                let data = self.buffer.split().freeze();
                if let Some(fragment) = self.accept(header.box_type, data) {
                    fragments.push(fragment);
                }
            }
        }
        if !self.buffer.is_empty() {
            tracing::warn!("{} trailing bytes ignored.", self.buffer.len());
            self.buffer.clear();
        }
        if !self.pending.is_empty() {
            tracing::warn!("Incomplete fragment of {} bytes ignored.", self.pending.len());
            self.pending.clear();
        }
        fragments
    }

    fn accept(&mut self, box_type: [u8; 4], data: Bytes) -> Option<RemuxedFragment> {
        match &box_type {
            b"ftyp" | b"moov" if self.init_done.is_none() => {
                self.init.extend_from_slice(&data);
                if &box_type == b"moov" {
                    self.init_done = Some(self.init.split().freeze());
                }
                None
            }
            b"mdat" => {
                let Some(init) = self.init_done.clone() else {
                    tracing::warn!("Dropped fragment before moov.");
                    self.pending.clear();
                    return None;
                };
                if self.pending.is_empty() {
                    tracing::warn!("Dropped mdat without moof.");
                    return None;
                }
                self.pending.extend_from_slice(&data);
                Some(RemuxedFragment {
                    init_segment: init,
                    media_segment: self.pending.split().freeze(),
                })
            }
            b"styp" | b"sidx" | b"prft" | b"emsg" | b"moof" => {
                self.pending.extend_from_slice(&data);
                None
            }
            // mfra, free, skip and anything unknown
            _ => None,
        }
    }
}
