//! AVI (RIFF) main-header reader. Only the `hdrl` list is parsed: frame
//! period, frame count and frame size. Stream data is never touched.

use crate::MscopeError;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

const AVIH_LEN: u32 = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AviHeader {
    pub micro_sec_per_frame: u32,
    pub total_frames: u32,
    pub streams: u32,
    pub width: u32,
    pub height: u32,
}

impl AviHeader {
    pub fn fps(&self) -> Option<f64> {
        if self.micro_sec_per_frame == 0 {
            None
        } else {
            Some(1_000_000.0 / self.micro_sec_per_frame as f64)
        }
    }
}

fn read_fourcc<R: Read>(r: &mut R) -> std::io::Result<[u8; 4]> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_u32<R: Read>(r: &mut R) -> std::io::Result<u32> {
    Ok(u32::from_le_bytes(read_fourcc(r)?))
}

fn invalid(path: &Path, msg: &str) -> MscopeError {
    MscopeError::Parse(format!("{}: {msg}", path.display()))
}

pub fn read_header(path: &Path) -> Result<AviHeader, MscopeError> {
    let mut r = BufReader::new(File::open(path)?);

    if &read_fourcc(&mut r)? != b"RIFF" {
        return Err(invalid(path, "not a RIFF file"));
    }
    let _riff_len = read_u32(&mut r)?;
    if &read_fourcc(&mut r)? != b"AVI " {
        return Err(invalid(path, "RIFF form is not AVI"));
    }

    // The first LIST in an AVI file must be hdrl.
    if &read_fourcc(&mut r)? != b"LIST" {
        return Err(invalid(path, "missing hdrl list"));
    }
    let hdrl_len = read_u32(&mut r)?;
    if &read_fourcc(&mut r)? != b"hdrl" {
        return Err(invalid(path, "missing hdrl list"));
    }
    let hdrl_end = r.stream_position()? + u64::from(hdrl_len) - 4;

    let mut header: Option<AviHeader> = None;
    let mut odml_frames: Option<u32> = None;

    while r.stream_position()? + 8 <= hdrl_end {
        let id = read_fourcc(&mut r)?;
        let len = read_u32(&mut r)?;
        let body_start = r.stream_position()?;
        match &id {
            b"avih" => {
                if len < AVIH_LEN {
                    return Err(invalid(path, "truncated avih chunk"));
                }
                let micro_sec_per_frame = read_u32(&mut r)?;
                let _max_bytes_per_sec = read_u32(&mut r)?;
                let _padding = read_u32(&mut r)?;
                let _flags = read_u32(&mut r)?;
                let total_frames = read_u32(&mut r)?;
                let _initial_frames = read_u32(&mut r)?;
                let streams = read_u32(&mut r)?;
                let _buffer = read_u32(&mut r)?;
                let width = read_u32(&mut r)?;
                let height = read_u32(&mut r)?;
                header = Some(AviHeader {
                    micro_sec_per_frame,
                    total_frames,
                    streams,
                    width,
                    height,
                });
            }
            b"LIST" => {
                // OpenDML files carry the true frame count in LIST odml / dmlh.
                if &read_fourcc(&mut r)? == b"odml" && &read_fourcc(&mut r)? == b"dmlh" {
                    let _dmlh_len = read_u32(&mut r)?;
                    odml_frames = Some(read_u32(&mut r)?);
                }
            }
            _ => {}
        }
        // Chunks are word aligned.
        let next = body_start + u64::from(len) + u64::from(len & 1);
        r.seek(SeekFrom::Start(next))?;
    }

    let mut header = header.ok_or_else(|| invalid(path, "missing avih chunk"))?;
    if let Some(frames) = odml_frames
        && frames > header.total_frames
    {
        header.total_frames = frames;
    }
    Ok(header)
}

/// `*.avi` files in `dir`, numeric stems first in numeric order (0.avi, 1.avi, ..., 10.avi).
pub fn list_avi_files(dir: &Path) -> Result<Vec<PathBuf>, MscopeError> {
    let dir_str = dir
        .to_str()
        .ok_or_else(|| MscopeError::Parse(format!("non-utf8 path: {}", dir.display())))?;
    let pattern = format!("{}/*.avi", glob::Pattern::escape(dir_str));
    let entries = glob::glob(&pattern)
        .map_err(|e| MscopeError::Parse(format!("glob {pattern}: {e}")))?;

    let mut files: Vec<PathBuf> = entries.filter_map(Result::ok).filter(|p| p.is_file()).collect();
    files.sort_by_key(|p| {
        let stem = p.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        (stem.parse::<u64>().map_err(|_| ()), stem)
    });
    Ok(files)
}

#[cfg(test)]
pub(crate) fn test_avi_bytes(frames: u32, width: u32, height: u32, micro_sec_per_frame: u32) -> Vec<u8> {
    let mut avih = Vec::new();
    for v in [micro_sec_per_frame, 0, 0, 0, frames, 0, 1, 0, width, height, 0, 0, 0, 0] {
        avih.extend_from_slice(&v.to_le_bytes());
    }
    let mut hdrl = Vec::new();
    hdrl.extend_from_slice(b"hdrl");
    hdrl.extend_from_slice(b"avih");
    hdrl.extend_from_slice(&(avih.len() as u32).to_le_bytes());
    hdrl.extend_from_slice(&avih);

    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((4 + 8 + hdrl.len()) as u32).to_le_bytes());
    out.extend_from_slice(b"AVI ");
    out.extend_from_slice(b"LIST");
    out.extend_from_slice(&(hdrl.len() as u32).to_le_bytes());
    out.extend_from_slice(&hdrl);
    out
}
