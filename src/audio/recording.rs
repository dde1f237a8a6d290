//! Diagnostic recording of the echo-cancellation streams
//!
//! Writes the captured, played and cancelled streams as headerless signed
//! 16-bit little endian PCM, one file per stream. Recording is advisory:
//! open and write failures are logged and recording of that stream stops,
//! the audio path is never affected.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::block::AudioBlock;

/// Captured (microphone) stream dump
pub const CAPTURED_FILE: &str = "aec_rec.sw";
/// Played (speaker reference) stream dump
pub const PLAYED_FILE: &str = "aec_play.sw";
/// Echo-cancelled output dump
pub const CANCELED_FILE: &str = "aec_out.sw";

/// One raw dump file
struct DumpFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
}

impl DumpFile {
    fn create(path: PathBuf) -> Self {
        let writer = match File::create(&path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                warn!("Failed to create AEC dump {}: {}", path.display(), e);
                None
            }
        };
        Self {
            path,
            writer,
            bytes_written: 0,
        }
    }

    fn write(&mut self, block: &AudioBlock) {
        if let Some(ref mut writer) = self.writer {
            if let Err(e) = writer.write_all(block.as_bytes()) {
                warn!(
                    "AEC dump {} failed, disabling it: {}",
                    self.path.display(),
                    e
                );
                self.writer = None;
                return;
            }
            self.bytes_written += block.len() as u64;
        }
    }

    fn flush(&mut self) {
        if let Some(ref mut writer) = self.writer {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush AEC dump {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Raw dumps of one echo-cancel session
pub struct AecRecorder {
    captured: DumpFile,
    played: DumpFile,
    canceled: DumpFile,
}

impl AecRecorder {
    /// Create the three dump files in `dir`
    pub fn create<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        info!("Creating AEC files in {}", dir.display());
        Self {
            captured: DumpFile::create(dir.join(CAPTURED_FILE)),
            played: DumpFile::create(dir.join(PLAYED_FILE)),
            canceled: DumpFile::create(dir.join(CANCELED_FILE)),
        }
    }

    /// Record one processed frame
    pub fn write_frame(&mut self, captured: &AudioBlock, played: &AudioBlock, canceled: &AudioBlock) {
        self.captured.write(captured);
        self.played.write(played);
        self.canceled.write(canceled);
    }

    /// Bytes written to (captured, played, canceled)
    pub fn bytes_written(&self) -> (u64, u64, u64) {
        (
            self.captured.bytes_written,
            self.played.bytes_written,
            self.canceled.bytes_written,
        )
    }

    /// Flush buffered data to disk
    pub fn flush(&mut self) {
        self.captured.flush();
        self.played.flush();
        self.canceled.flush();
    }
}

impl Drop for AecRecorder {
    fn drop(&mut self) {
        self.flush();
    }
}
