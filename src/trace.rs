use crate::address;
use color_eyre::eyre::{self, WrapErr};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Records buffered between flushes.
pub const MAX_TRACE_LEN: usize = 10_000;

/// In-memory ring capturing `(line_address, is_writeback)` pairs, flushed
/// to `<trace_dir>/<name>trace.bin` whenever it fills.
///
/// The file starts with a `u32` record count that is written as `0` and
/// never patched; consumers derive the real count from the file size.
#[derive(Debug)]
pub struct TraceSink {
    path: PathBuf,
    records: Vec<(address, u32)>,
}

impl TraceSink {
    pub fn create(trace_dir: &Path, name: &str) -> eyre::Result<Self> {
        let path = trace_dir.join(format!("{name}trace.bin"));
        let mut file = File::create(&path)
            .wrap_err_with(|| format!("cannot create trace file {}", path.display()))?;
        file.write_all(&0u32.to_le_bytes())?;
        Ok(Self {
            path,
            records: Vec::with_capacity(MAX_TRACE_LEN),
        })
    }

    pub fn record(&mut self, line_addr: address, is_writeback: bool) {
        self.records.push((line_addr, u32::from(is_writeback)));
        if self.records.len() == MAX_TRACE_LEN {
            if let Err(err) = self.flush() {
                log::warn!("dropping trace chunk for {}: {err}", self.path.display());
            }
            self.records.clear();
        }
    }

    fn flush(&mut self) -> eyre::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut out = BufWriter::new(file);
        for &(addr, kind) in &self.records {
            out.write_all(&addr.to_le_bytes())?;
            out.write_all(&kind.to_le_bytes())?;
        }
        out.flush()?;
        Ok(())
    }
}
