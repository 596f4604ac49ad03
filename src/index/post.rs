//! Streaming cursor over the sharded position list.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::index::{shard_path, GenomeIndex};
use crate::types::get_le;

/// Shard header width: `nels: u64`.
pub(crate) const SHARD_HEADER: u64 = 8;

/// Entries per buffered read block.
const BLOCK_ENTRIES: usize = 1024;

/// Cursor over the whole position list of one index.
///
/// Supports O(log nthr) [`seek`](PostStream::seek) to any global entry and
/// sequential [`advance`](PostStream::advance) across shard boundaries.
pub struct PostStream {
    pbyte: usize,
    shards: Vec<(PathBuf, u64)>,
    /// Cumulative entry counts; `cum[p]` is the global index of shard p's
    /// first entry.
    cum: Vec<u64>,
    cur: usize,
    reader: Option<BufReader<File>>,
    left_in_shard: u64,
    entry: Vec<u8>,
}

impl PostStream {
    pub fn open(index: &GenomeIndex) -> Result<PostStream> {
        let nthr = index.nthr();
        let shards: Vec<(PathBuf, u64)> = (0..nthr)
            .map(|p| (shard_path(&index.root, ".post", p), index.post_shard_nels[p]))
            .collect();
        let mut cum = Vec::with_capacity(nthr + 1);
        let mut acc = 0u64;
        for s in &shards {
            cum.push(acc);
            acc += s.1;
        }
        cum.push(acc);
        Ok(PostStream {
            pbyte: index.pbyte,
            shards,
            cum,
            cur: usize::MAX,
            reader: None,
            left_in_shard: 0,
            entry: vec![0u8; index.pbyte],
        })
    }

    /// Total entries in the stream.
    pub fn nels(&self) -> u64 {
        *self.cum.last().unwrap()
    }

    /// Position the cursor so the next [`advance`] reads global entry `gidx`.
    pub fn seek(&mut self, gidx: u64) -> Result<()> {
        if gidx >= self.nels() {
            // Past the end: leave the cursor exhausted.
            self.cur = self.shards.len();
            self.left_in_shard = 0;
            self.reader = None;
            return Ok(());
        }
        let p = self.cum.partition_point(|&c| c <= gidx).saturating_sub(1);
        let (path, nels) = &self.shards[p];
        let within = gidx - self.cum[p];
        let file = File::open(path)
            .with_context(|| format!("Failed to open position shard {}", path.display()))?;
        let mut reader = BufReader::with_capacity(BLOCK_ENTRIES * self.pbyte, file);
        reader
            .seek(SeekFrom::Start(SHARD_HEADER + within * self.pbyte as u64))
            .with_context(|| format!("Failed to seek in {}", path.display()))?;
        self.cur = p;
        self.left_in_shard = nels - within;
        self.reader = Some(reader);
        Ok(())
    }

    /// Advance to the next entry. Returns `false` past the end.
    pub fn advance(&mut self) -> Result<bool> {
        while self.left_in_shard == 0 {
            let next = if self.cur == usize::MAX { 0 } else { self.cur + 1 };
            if next >= self.shards.len() || self.cum[next] >= self.nels() {
                return Ok(false);
            }
            self.seek(self.cum[next])?;
        }
        let reader = self.reader.as_mut().unwrap();
        reader
            .read_exact(&mut self.entry)
            .context("Truncated position shard")?;
        self.left_in_shard -= 1;
        Ok(true)
    }

    /// Raw little-endian value of the current entry.
    #[inline]
    pub fn entry(&self) -> u64 {
        get_le(&self.entry, self.pbyte)
    }
}
