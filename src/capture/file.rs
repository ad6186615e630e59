use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::CaptureSource;
use crate::sync::Pacer;

/// Reads headerless raw video from a file, one frame per chunk
pub struct RawFileSource {
    path: PathBuf,
    reader: BufReader<File>,
    frame_size: usize,
    pacer: Option<Pacer>,
}

impl RawFileSource {
    pub fn open(path: &Path, frame_size: usize) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open input file: {:?}", path))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            frame_size,
            pacer: None,
        })
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = Some(pacer);
        self
    }
}

impl CaptureSource for RawFileSource {
    fn read_chunk(&mut self, dst: &mut [u8]) -> Result<usize> {
        let want = self.frame_size.min(dst.len());
        let mut filled = 0;
        while filled < want {
            match self.reader.read(&mut dst[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to read {:?}", self.path))
                }
            }
        }
        if filled > 0 {
            if let Some(pacer) = self.pacer.as_mut() {
                pacer.wait_for_next_frame();
            }
        }
        Ok(filled)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
