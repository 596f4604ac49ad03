//! Assembly base pack: contig table plus 2-bit-packed sequence.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::index::{read_u32, read_u64, suffixed};
use crate::types::{reverse_complement, unpack_bases};

/// Contig table of one assembly, validated against its `.bps` base pack.
#[derive(Debug, Clone)]
pub struct Assembly {
    lens: Vec<u64>,
    boffs: Vec<u64>,
    bps_path: PathBuf,
}

impl Assembly {
    pub fn open(root: &std::path::Path) -> Result<Assembly> {
        let dam_path = suffixed(root, ".dam");
        let file = File::open(&dam_path)
            .with_context(|| format!("Failed to open assembly {}", dam_path.display()))?;
        let mut r = BufReader::new(file);

        let nctg = read_u32(&mut r)? as usize;
        let mut lens = Vec::with_capacity(nctg);
        let mut boffs = Vec::with_capacity(nctg);
        for _ in 0..nctg {
            lens.push(read_u64(&mut r)?);
            boffs.push(read_u64(&mut r)?);
        }

        let bps_path = suffixed(root, ".bps");
        let meta = std::fs::metadata(&bps_path)
            .with_context(|| format!("Missing base pack {}", bps_path.display()))?;
        for i in 0..nctg {
            let need = boffs[i] + lens[i].div_ceil(4);
            if need > meta.len() {
                bail!(
                    "Base pack {} is shorter than contig {} requires",
                    bps_path.display(),
                    i
                );
            }
        }

        Ok(Assembly { lens, boffs, bps_path })
    }

    pub fn ncontigs(&self) -> usize {
        self.lens.len()
    }

    #[inline]
    pub fn contig_len(&self, contig: u32) -> u64 {
        self.lens[contig as usize]
    }

    pub fn total_len(&self) -> u64 {
        self.lens.iter().sum()
    }

    pub fn max_len(&self) -> u64 {
        self.lens.iter().copied().max().unwrap_or(0)
    }

    /// Open a private file handle for one worker thread.
    pub fn reader(&self) -> Result<AssemblyReader<'_>> {
        let file = File::open(&self.bps_path)
            .with_context(|| format!("Failed to open base pack {}", self.bps_path.display()))?;
        Ok(AssemblyReader {
            assembly: self,
            file,
            packed: Vec::new(),
        })
    }
}

/// Per-thread handle onto the base pack; each worker needs its own file
/// offset.
pub struct AssemblyReader<'a> {
    assembly: &'a Assembly,
    file: File,
    packed: Vec<u8>,
}

impl AssemblyReader<'_> {
    /// Load one contig as 2-bit base codes, reverse-complemented when
    /// `comp` is set.
    pub fn load(&mut self, contig: u32, comp: bool) -> Result<Vec<u8>> {
        let len = self.assembly.lens[contig as usize] as usize;
        let boff = self.assembly.boffs[contig as usize];
        let nbytes = len.div_ceil(4);

        self.packed.resize(nbytes, 0);
        self.file
            .seek(SeekFrom::Start(boff))
            .with_context(|| format!("Failed to seek base pack for contig {}", contig))?;
        self.file
            .read_exact(&mut self.packed)
            .with_context(|| format!("Failed to read bases of contig {}", contig))?;

        let mut bases = Vec::new();
        unpack_bases(&self.packed, 0, len, &mut bases);
        if comp {
            reverse_complement(&mut bases);
        }
        Ok(bases)
    }
}

#[cfg(test)]
mod tests {
    use crate::index::fixtures::{write_index, TestGenome};
    use crate::index::GenomeIndex;

    #[test]
    fn test_load_forward_and_comp() {
        let dir = tempfile::tempdir().unwrap();
        let genome = TestGenome::from_strs(&["ACGTTGCAACGTT", "GGGGCCCCAAAATTTT"]);
        let root = write_index(dir.path(), "g", &genome, 12, 1, 50).unwrap();
        let idx = GenomeIndex::open(&root).unwrap();

        let mut reader = idx.assembly.reader().unwrap();
        let fwd = reader.load(0, false).unwrap();
        assert_eq!(fwd, genome.contigs[0]);

        let mut expect = genome.contigs[1].clone();
        crate::types::reverse_complement(&mut expect);
        let comp = reader.load(1, true).unwrap();
        assert_eq!(comp, expect);
    }

    #[test]
    fn test_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let genome = TestGenome::from_strs(&["ACGTTGCAACGTT", "GGGGCCCCAAAATTTT"]);
        let root = write_index(dir.path(), "g", &genome, 12, 1, 50).unwrap();
        let idx = GenomeIndex::open(&root).unwrap();

        assert_eq!(idx.assembly.contig_len(0), 13);
        assert_eq!(idx.assembly.contig_len(1), 16);
        assert_eq!(idx.assembly.total_len(), 29);
        assert_eq!(idx.assembly.max_len(), 16);
    }
}
