//! `.las` alignment files and the external sort/merge pass.
//!
//! Per-thread alignment files use the documented layout: an `i64` record
//! count and `i32` trace spacing, then per record the overlap fields (the
//! in-memory trace pointer is never on disk) followed by the trace bytes.
//! With the fixed spacing under 126 every trace value fits one byte.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::align::AlnPath;
use crate::types::TRACE_SPACING;

/// Flag bit: the a-contig was reverse-complemented for this alignment.
pub const COMP_FLAG: u32 = 0x1;

/// One local alignment between a contig pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    pub flags: u32,
    pub acont: u32,
    pub bcont: u32,
    pub path: AlnPath,
}

impl Overlap {
    pub fn is_comp(&self) -> bool {
        self.flags & COMP_FLAG != 0
    }
}

/// Sequential `.las` writer; the record count is patched on close.
pub struct LasWriter {
    path: PathBuf,
    w: BufWriter<File>,
    nels: u64,
}

impl LasWriter {
    pub fn create(path: &Path) -> Result<LasWriter> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create alignment file {}", path.display()))?;
        let mut w = BufWriter::new(file);
        w.write_all(&0i64.to_le_bytes())?;
        w.write_all(&(TRACE_SPACING as i32).to_le_bytes())?;
        Ok(LasWriter {
            path: path.to_path_buf(),
            w,
            nels: 0,
        })
    }

    pub fn put(&mut self, ovl: &Overlap) -> Result<()> {
        let p = &ovl.path;
        for v in [
            ovl.flags, ovl.acont, ovl.bcont, p.abpos, p.aepos, p.bbpos, p.bepos, p.diffs,
            p.trace.len() as u32,
        ] {
            self.w.write_all(&v.to_le_bytes())?;
        }
        self.w.write_all(&p.trace)?;
        self.nels += 1;
        Ok(())
    }

    pub fn nels(&self) -> u64 {
        self.nels
    }

    /// Flush, patch the header count, and close.
    pub fn close(mut self) -> Result<u64> {
        self.w
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        let mut file = self.w.into_inner().context("Failed to finish alignment file")?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&(self.nels as i64).to_le_bytes())?;
        Ok(self.nels)
    }
}

/// Load a whole `.las` file.
pub fn read_las(path: &Path) -> Result<Vec<Overlap>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open alignment file {}", path.display()))?;
    let mut r = BufReader::new(file);

    let mut b8 = [0u8; 8];
    r.read_exact(&mut b8)?;
    let nels = i64::from_le_bytes(b8);
    let mut b4 = [0u8; 4];
    r.read_exact(&mut b4)?;
    let tspace = i32::from_le_bytes(b4);
    if nels < 0 || tspace != TRACE_SPACING as i32 {
        bail!(
            "Alignment file {} has an incompatible header ({} records, spacing {})",
            path.display(),
            nels,
            tspace
        );
    }

    let mut out = Vec::with_capacity(nels as usize);
    for _ in 0..nels {
        let mut fields = [0u32; 9];
        for f in fields.iter_mut() {
            r.read_exact(&mut b4)?;
            *f = u32::from_le_bytes(b4);
        }
        let mut trace = vec![0u8; fields[8] as usize];
        r.read_exact(&mut trace)?;
        out.push(Overlap {
            flags: fields[0],
            acont: fields[1],
            bcont: fields[2],
            path: AlnPath {
                abpos: fields[3],
                aepos: fields[4],
                bbpos: fields[5],
                bepos: fields[6],
                diffs: fields[7],
                trace,
            },
        });
    }
    Ok(out)
}

/// Write an empty but valid `.las` file.
pub fn write_empty_las(path: &Path) -> Result<()> {
    LasWriter::create(path)?.close()?;
    Ok(())
}

fn run_tool(name: &str, args: &[&std::ffi::OsStr]) -> Result<()> {
    let status = Command::new(name)
        .args(args)
        .status()
        .with_context(|| format!("Failed to launch {} (is it on PATH?)", name))?;
    if !status.success() {
        bail!("{} exited with {}", name, status);
    }
    Ok(())
}

/// Sort each per-thread file and merge them into `<out_root>.las` with the
/// external utilities.
pub fn sort_and_merge(out_root: &Path, parts: &[PathBuf]) -> Result<()> {
    sort_and_merge_with(out_root, parts, "LAsort", "LAmerge")
}

/// Same as [`sort_and_merge`] with the tool names injectable, so tests can
/// exercise the failure path without touching the process environment.
fn sort_and_merge_with(out_root: &Path, parts: &[PathBuf], sorter: &str, merger: &str) -> Result<()> {
    let out = crate::index::suffixed(out_root, ".las");
    let mut sort_args: Vec<&std::ffi::OsStr> = vec!["-a".as_ref()];
    sort_args.extend(parts.iter().map(|p| p.as_os_str()));
    run_tool(sorter, &sort_args)?;

    let mut merge_args: Vec<&std::ffi::OsStr> = vec!["-a".as_ref(), out.as_os_str()];
    merge_args.extend(parts.iter().map(|p| p.as_os_str()));
    run_tool(merger, &merge_args)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(acont: u32, abpos: u32) -> Overlap {
        Overlap {
            flags: if acont % 2 == 1 { COMP_FLAG } else { 0 },
            acont,
            bcont: 7,
            path: AlnPath {
                abpos,
                aepos: abpos + 150,
                bbpos: 40,
                bepos: 190,
                diffs: 3,
                trace: vec![1, 60, 2, 90],
            },
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.las");

        let mut w = LasWriter::create(&path).unwrap();
        let ovls: Vec<Overlap> = (0..5).map(|i| sample(i, i * 1000)).collect();
        for o in &ovls {
            w.put(o).unwrap();
        }
        assert_eq!(w.close().unwrap(), 5);

        let got = read_las(&path).unwrap();
        assert_eq!(got, ovls);
        assert!(got[1].is_comp());
        assert!(!got[0].is_comp());
    }

    #[test]
    fn test_empty_file_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e.las");
        write_empty_las(&path).unwrap();
        let got = read_las(&path).unwrap();
        assert!(got.is_empty());
        // Header only: count + spacing.
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 12);
    }

    #[test]
    fn test_missing_tool_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        // Absolute paths into the empty temp directory cannot exist, so the
        // launch fails without touching the process environment.
        let sorter = dir.path().join("LAsort").display().to_string();
        let merger = dir.path().join("LAmerge").display().to_string();
        let err = sort_and_merge_with(&out, &[dir.path().join("x.las")], &sorter, &merger)
            .unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("LAsort"));
        assert!(msg.contains("PATH"));
    }
}
