//! Streaming cursor over the sharded k-mer table.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

use crate::index::{shard_path, GenomeIndex};
use crate::types::panel_of;

/// Shard header width: `kmer: u32`, `minval: u32`, `nels: u64`.
pub(crate) const SHARD_HEADER: u64 = 16;

/// Entries per buffered read block.
const BLOCK_ENTRIES: usize = 1024;

/// Cursor over k-mer shards `[s0, s1)` of one index.
///
/// The cursor starts positioned before the first entry; each successful
/// [`advance`](KtabStream::advance) makes one entry current. Refills cross
/// shard-file boundaries transparently.
pub struct KtabStream {
    kbyte: usize,
    width: usize,
    shards: Vec<(PathBuf, u64)>,
    cur: usize,
    reader: Option<BufReader<File>>,
    left_in_shard: u64,
    entry: Vec<u8>,
}

impl KtabStream {
    pub fn open(index: &GenomeIndex, s0: usize, s1: usize) -> Result<KtabStream> {
        let width = index.kbyte + 2;
        let shards = (s0..s1)
            .map(|p| (shard_path(&index.root, ".ktab", p), index.shard_nels[p]))
            .collect();
        Ok(KtabStream {
            kbyte: index.kbyte,
            width,
            shards,
            cur: 0,
            reader: None,
            left_in_shard: 0,
            entry: vec![0u8; width],
        })
    }

    /// Advance to the next entry. Returns `false` past the end of the range.
    pub fn advance(&mut self) -> Result<bool> {
        while self.left_in_shard == 0 {
            if self.reader.is_some() {
                self.cur += 1;
            }
            let Some((path, nels)) = self.shards.get(self.cur) else {
                return Ok(false);
            };
            let file = File::open(path)
                .with_context(|| format!("Failed to open k-mer shard {}", path.display()))?;
            let mut reader = BufReader::with_capacity(BLOCK_ENTRIES * self.width, file);
            let mut header = [0u8; SHARD_HEADER as usize];
            reader
                .read_exact(&mut header)
                .with_context(|| format!("Failed to read header of {}", path.display()))?;
            self.left_in_shard = *nels;
            self.reader = Some(reader);
        }
        let reader = self.reader.as_mut().unwrap();
        reader
            .read_exact(&mut self.entry)
            .context("Truncated k-mer shard")?;
        self.left_in_shard -= 1;
        Ok(true)
    }

    /// Packed bytes of the current k-mer.
    #[inline]
    pub fn kmer(&self) -> &[u8] {
        &self.entry[..self.kbyte]
    }

    /// Number of position entries belonging to the current k-mer.
    #[inline]
    pub fn count(&self) -> usize {
        self.entry[self.kbyte] as usize
    }

    /// Shared prefix in bases with the previous table entry; `0xFF` marks
    /// the first entry of a shard.
    #[inline]
    pub fn lcp(&self) -> u8 {
        self.entry[self.kbyte + 1]
    }

    /// 12-bit panel prefix of the current k-mer.
    #[inline]
    pub fn panel(&self) -> u16 {
        panel_of(self.kmer())
    }
}
