//! Readers for the pre-built genome indices.
//!
//! A source root `<src>` names three read-only artifacts: the sharded k-mer
//! table (`.ktab`), the sharded position list (`.post`), and the assembly
//! base pack (`.dam` + `.bps`). All three are opened and validated once per
//! run; worker threads then clone cheap streaming cursors over them.

pub mod assembly;
pub mod ktab;
pub mod post;

pub use assembly::{Assembly, AssemblyReader};
pub use ktab::KtabStream;
pub use post::PostStream;

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::types::NPANELS;

/// Read one little-endian `u32` header field.
pub(crate) fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

/// Read one little-endian `u64` header field.
pub(crate) fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

/// One opened genome index: header parameters plus the shard paths the
/// streaming cursors read from.
#[derive(Debug, Clone)]
pub struct GenomeIndex {
    /// Source root the index was opened from.
    pub root: PathBuf,
    /// K-mer length in bases.
    pub kmer: u32,
    /// Packed k-mer width in bytes.
    pub kbyte: usize,
    /// Shard grid edge; the table is cut into `nsqrt²` shard files.
    pub nsqrt: usize,
    /// Frequency cutoff the index was built with.
    pub freq: u32,
    /// Total k-mer entries across shards.
    pub nels: u64,
    /// K-mer entries per shard.
    pub shard_nels: Vec<u64>,
    /// Position entry width in bytes.
    pub pbyte: usize,
    /// Contig+flag bytes within a position entry.
    pub cbyte: usize,
    /// Largest within-contig position in the assembly.
    pub maxpos: u64,
    /// Contig permutation in I/O-locality order.
    pub perm: Vec<u32>,
    /// Cumulative position-entry count through each k-mer shard.
    pub neps: Vec<u64>,
    /// Position entries per position shard.
    pub post_shard_nels: Vec<u64>,
    /// Contig table and base pack.
    pub assembly: Assembly,
}

impl GenomeIndex {
    /// Open and validate every part of the index rooted at `root`.
    pub fn open(root: &Path) -> Result<GenomeIndex> {
        let ktab_stub = suffixed(root, ".ktab");
        let file = File::open(&ktab_stub)
            .with_context(|| format!("Failed to open k-mer table {}", ktab_stub.display()))?;
        let mut r = BufReader::new(file);

        let kmer = read_u32(&mut r)?;
        let nsqrt = read_u32(&mut r)? as usize;
        let freq = read_u32(&mut r)?;
        let nels = read_u64(&mut r)?;

        if kmer < 12 || kmer > 160 {
            bail!("Corrupt k-mer table {}: k = {}", ktab_stub.display(), kmer);
        }
        let nthr = nsqrt * nsqrt;
        if nsqrt == 0 || !nthr.is_power_of_two() || nthr > NPANELS {
            bail!(
                "Corrupt k-mer table {}: shard grid {}x{} is not a power-of-two cut of the panel space",
                ktab_stub.display(),
                nsqrt,
                nsqrt
            );
        }

        let mut shard_nels = Vec::with_capacity(nthr);
        for _ in 0..nthr {
            shard_nels.push(read_u64(&mut r)?);
        }
        if shard_nels.iter().sum::<u64>() != nels {
            bail!(
                "Corrupt k-mer table {}: shard counts disagree with the total",
                ktab_stub.display()
            );
        }

        let kbyte = (kmer as usize + 3) / 4;
        let kwidth = kbyte + 2;
        for p in 0..nthr {
            let path = shard_path(root, ".ktab", p);
            check_shard(&path, ktab::SHARD_HEADER, shard_nels[p], kwidth)?;
        }

        // Position list stub.
        let post_stub = suffixed(root, ".post");
        let file = File::open(&post_stub)
            .with_context(|| format!("Failed to open position list {}", post_stub.display()))?;
        let mut r = BufReader::new(file);

        let pbyte = read_u32(&mut r)? as usize;
        let cbyte = read_u32(&mut r)? as usize;
        let post_nsqrt = read_u32(&mut r)? as usize;
        let maxpos = read_u64(&mut r)?;
        let post_freq = read_u32(&mut r)?;
        let nctg = read_u32(&mut r)? as usize;

        if post_nsqrt != nsqrt {
            bail!(
                "Index {}: position list shard grid ({}) disagrees with the k-mer table ({})",
                root.display(),
                post_nsqrt,
                nsqrt
            );
        }
        if post_freq != freq {
            bail!(
                "Index {}: position list frequency cutoff ({}) disagrees with the k-mer table ({})",
                root.display(),
                post_freq,
                freq
            );
        }
        if cbyte == 0 || cbyte >= pbyte || pbyte > 16 {
            bail!("Corrupt position list {}: entry widths {}/{}", post_stub.display(), pbyte, cbyte);
        }

        let mut perm = Vec::with_capacity(nctg);
        for _ in 0..nctg {
            perm.push(read_u32(&mut r)?);
        }
        let mut neps = Vec::with_capacity(nthr);
        for _ in 0..nthr {
            neps.push(read_u64(&mut r)?);
        }

        let mut post_shard_nels = Vec::with_capacity(nthr);
        for p in 0..nthr {
            let path = shard_path(root, ".post", p);
            let file = File::open(&path)
                .with_context(|| format!("Failed to open position shard {}", path.display()))?;
            let mut hr = BufReader::new(file);
            let n = read_u64(&mut hr)?;
            check_shard(&path, post::SHARD_HEADER, n, pbyte)?;
            post_shard_nels.push(n);
        }
        let total_posts: u64 = post_shard_nels.iter().sum();
        if neps.last().copied().unwrap_or(0) != total_posts {
            bail!(
                "Corrupt position list {}: partition seek table disagrees with shard totals",
                post_stub.display()
            );
        }

        let assembly = Assembly::open(root)?;
        if assembly.ncontigs() != nctg {
            bail!(
                "Index {}: position list names {} contigs but the assembly holds {}",
                root.display(),
                nctg,
                assembly.ncontigs()
            );
        }

        Ok(GenomeIndex {
            root: root.to_path_buf(),
            kmer,
            kbyte,
            nsqrt,
            freq,
            nels,
            shard_nels,
            pbyte,
            cbyte,
            maxpos,
            perm,
            neps,
            post_shard_nels,
            assembly,
        })
    }

    /// Total shard count (`nsqrt²`).
    pub fn nthr(&self) -> usize {
        self.nsqrt * self.nsqrt
    }

    /// Global position-entry index at which k-mer shard `p` begins.
    pub fn post_base(&self, p: usize) -> u64 {
        if p == 0 {
            0
        } else {
            self.neps[p - 1]
        }
    }

    /// Cursor over k-mer shards `[s0, s1)`.
    pub fn ktab_stream(&self, s0: usize, s1: usize) -> Result<KtabStream> {
        KtabStream::open(self, s0, s1)
    }

    /// Cursor over the whole position list.
    pub fn post_stream(&self) -> Result<PostStream> {
        PostStream::open(self)
    }

    /// Reject index pairs the merge cannot walk together.
    pub fn check_compatible(&self, other: &GenomeIndex) -> Result<()> {
        if self.kmer != other.kmer {
            bail!(
                "K-mer sizes disagree: {} uses k={} but {} uses k={}",
                self.root.display(),
                self.kmer,
                other.root.display(),
                other.kmer
            );
        }
        if self.nsqrt != other.nsqrt {
            bail!(
                "Thread counts disagree: {} was cut for {} threads but {} for {}",
                self.root.display(),
                self.nsqrt,
                other.root.display(),
                other.nsqrt
            );
        }
        Ok(())
    }

    /// Decode a raw position entry into (position, contig, strand flag).
    #[inline]
    pub fn decode_post(&self, entry: u64) -> (u64, u32, bool) {
        let post_bits = 8 * (self.pbyte - self.cbyte);
        let post = entry & ((1u64 << post_bits) - 1);
        let rest = entry >> post_bits;
        let flag_bit = 8 * self.cbyte - 1;
        let flag = (rest >> flag_bit) & 1 == 1;
        let contig = (rest & !(1u64 << flag_bit)) as u32;
        (post, contig, flag)
    }
}

/// `<root><ext>` (the stub path).
pub(crate) fn suffixed(root: &Path, ext: &str) -> PathBuf {
    let mut s = root.as_os_str().to_os_string();
    s.push(ext);
    PathBuf::from(s)
}

/// `<root><ext>.<p+1>` (shard files are numbered from 1).
pub(crate) fn shard_path(root: &Path, ext: &str, p: usize) -> PathBuf {
    let mut s = root.as_os_str().to_os_string();
    s.push(format!("{}.{}", ext, p + 1));
    PathBuf::from(s)
}

/// Verify a shard file exists and its size matches its declared entry count.
fn check_shard(path: &Path, header: u64, nels: u64, width: usize) -> Result<()> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("Missing index shard {}", path.display()))?;
    let want = header + nels * width as u64;
    if meta.len() != want {
        bail!(
            "Index shard {} is {} bytes but its header implies {}",
            path.display(),
            meta.len(),
            want
        );
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::fixtures::{write_index, TestGenome};

    #[test]
    fn test_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let genome = TestGenome::from_strs(&["ACGTACGTACGTACGTACGTACGT"]);
        let root = write_index(dir.path(), "g1", &genome, 12, 1, 50).unwrap();

        let idx = GenomeIndex::open(&root).unwrap();
        assert_eq!(idx.kmer, 12);
        assert_eq!(idx.nsqrt, 1);
        assert_eq!(idx.assembly.ncontigs(), 1);
        assert_eq!(idx.assembly.contig_len(0), 24);
        // 13 k-mer starts on each strand.
        assert_eq!(idx.neps.last().copied().unwrap(), 26);
    }

    #[test]
    fn test_open_missing_root() {
        let err = GenomeIndex::open(Path::new("/nonexistent/genome")).unwrap_err();
        assert!(format!("{:#}", err).contains(".ktab"));
    }

    #[test]
    fn test_truncated_shard_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let genome = TestGenome::from_strs(&["ACGTACGTACGTACGTACGTACGT"]);
        let root = write_index(dir.path(), "g1", &genome, 12, 1, 50).unwrap();

        // Chop the single k-mer shard.
        let shard = shard_path(&root, ".ktab", 0);
        let data = std::fs::read(&shard).unwrap();
        std::fs::write(&shard, &data[..data.len() - 1]).unwrap();

        let err = GenomeIndex::open(&root).unwrap_err();
        assert!(format!("{:#}", err).contains("bytes"));
    }

    #[test]
    fn test_incompatible_kmer_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let genome = TestGenome::from_strs(&["ACGTACGTACGTACGTACGTACGTACGT"]);
        let r1 = write_index(dir.path(), "g1", &genome, 12, 1, 50).unwrap();
        let r2 = write_index(dir.path(), "g2", &genome, 16, 1, 50).unwrap();

        let i1 = GenomeIndex::open(&r1).unwrap();
        let i2 = GenomeIndex::open(&r2).unwrap();
        assert!(i1.check_compatible(&i2).is_err());
        assert!(i1.check_compatible(&i1.clone()).is_ok());
    }

    #[test]
    fn test_decode_post() {
        let dir = tempfile::tempdir().unwrap();
        let genome = TestGenome::from_strs(&["ACGTACGTACGTACGTACGTACGT"]);
        let root = write_index(dir.path(), "g1", &genome, 12, 1, 50).unwrap();
        let idx = GenomeIndex::open(&root).unwrap();

        let post_bits = 8 * (idx.pbyte - idx.cbyte) as u64;
        let flag_bit = 8 * idx.cbyte as u64 - 1;
        let raw = (1u64 << (post_bits + flag_bit)) | (0u64 << post_bits) | 17;
        let (post, contig, flag) = idx.decode_post(raw);
        assert_eq!(post, 17);
        assert_eq!(contig, 0);
        assert!(flag);
    }
}
