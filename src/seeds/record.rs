//! Packed seed record layouts.
//!
//! Two fixed-width records flow between the pipeline stages. The *pair
//! record* written by the merger is `[lcp, a-entry, b-entry]` where the
//! entries are verbatim position-list encodings (post + contig + strand
//! bit). The *sort record* built at re-import is
//! `[lcp, diag-rem, a-post, diag-bucket, b-contig]`: the diagonal splits
//! into a bucket number and a 6-bit remainder, and only the bucket joins
//! the sort key, so each bucket run comes out in a-post order. A record's
//! a-contig and orientation are implicit in the shard being sorted.

use crate::index::GenomeIndex;
use crate::types::{bytes_for, get_le, put_le, Orient, BUCKET_WIDTH};

/// Field widths for one run, derived from the two index headers.
#[derive(Debug, Clone)]
pub struct SeedLayout {
    /// K-mer length in bases.
    pub kmer: u32,
    /// A-side position-entry width.
    pub ibyte: usize,
    /// B-side position-entry width.
    pub jbyte: usize,
    /// Pair record width: `1 + ibyte + jbyte`.
    pub pair_width: usize,
    /// A-post field width in the sort record.
    pub ipost: usize,
    /// Diagonal-bucket field width in the sort record.
    pub dbyte: usize,
    /// B-contig field width in the sort record.
    pub jcont: usize,
    /// Sort record width: `2 + ipost + dbyte + jcont`.
    pub swide: usize,
}

impl SeedLayout {
    pub fn new(idx1: &GenomeIndex, idx2: &GenomeIndex) -> SeedLayout {
        let ibyte = idx1.pbyte;
        let jbyte = idx2.pbyte;
        let ipost = idx1.pbyte - idx1.cbyte;
        let max_diag = idx1.assembly.max_len() + idx2.assembly.max_len();
        let dbyte = bytes_for(max_diag / BUCKET_WIDTH);
        let jcont = bytes_for(idx2.assembly.ncontigs().saturating_sub(1) as u64);
        SeedLayout {
            kmer: idx1.kmer,
            ibyte,
            jbyte,
            pair_width: 1 + ibyte + jbyte,
            ipost,
            dbyte,
            jcont,
            swide: 2 + ipost + dbyte + jcont,
        }
    }

    /// Pack one merger output record.
    #[inline]
    pub fn pack_pair(&self, buf: &mut [u8], lcp: u8, a_raw: u64, b_raw: u64) {
        buf[0] = lcp;
        put_le(&mut buf[1..], self.ibyte, a_raw);
        put_le(&mut buf[1 + self.ibyte..], self.jbyte, b_raw);
    }

    /// Unpack one merger output record into `(lcp, a_raw, b_raw)`.
    #[inline]
    pub fn unpack_pair(&self, buf: &[u8]) -> (u8, u64, u64) {
        let a = get_le(&buf[1..], self.ibyte);
        let b = get_le(&buf[1 + self.ibyte..], self.jbyte);
        (buf[0], a, b)
    }

    /// Pack one sort record.
    #[inline]
    pub fn pack_sort(&self, buf: &mut [u8], lcp: u8, apost: u64, diag: u64, bcont: u32) {
        buf[0] = lcp;
        buf[1] = (diag % BUCKET_WIDTH) as u8;
        put_le(&mut buf[2..], self.ipost, apost);
        put_le(&mut buf[2 + self.ipost..], self.dbyte, diag / BUCKET_WIDTH);
        put_le(&mut buf[2 + self.ipost + self.dbyte..], self.jcont, bcont as u64);
    }

    #[inline]
    pub fn sort_lcp(&self, buf: &[u8]) -> u8 {
        buf[0]
    }

    #[inline]
    pub fn sort_apost(&self, buf: &[u8]) -> u64 {
        get_le(&buf[2..], self.ipost)
    }

    /// Diagonal bucket number (the sorted key).
    #[inline]
    pub fn sort_bucket(&self, buf: &[u8]) -> u64 {
        get_le(&buf[2 + self.ipost..], self.dbyte)
    }

    /// Exact diagonal, reassembled from bucket and remainder.
    #[inline]
    pub fn sort_diag(&self, buf: &[u8]) -> u64 {
        self.sort_bucket(buf) * BUCKET_WIDTH + buf[1] as u64
    }

    #[inline]
    pub fn sort_bcont(&self, buf: &[u8]) -> u32 {
        get_le(&buf[2 + self.ipost + self.dbyte..], self.jcont) as u32
    }

    /// Sort-key byte offsets in radix-pass order (least significant first):
    /// a-post, then diagonal bucket, then b-contig. The remainder byte is
    /// payload, not key.
    pub fn sort_key_offsets(&self) -> Vec<usize> {
        (2..self.swide).collect()
    }
}

/// Diagonal of a seed, shifted to be non-negative.
///
/// Same-orientation seeds use `a-post − b-post` offset by the b-contig
/// length; opposite-orientation seeds use the anti-diagonal sum, which is
/// constant along a reverse pairing.
#[inline]
pub fn diagonal(orient: Orient, apost: u64, bpost: u64, blen: u64) -> u64 {
    match orient {
        Orient::Normal => apost + blen - bpost,
        Orient::Comp => apost + bpost,
    }
}

/// Recover the b-post of a sort record from its exact diagonal.
#[inline]
pub fn bpost_of(orient: Orient, apost: u64, diag: u64, blen: u64) -> u64 {
    match orient {
        Orient::Normal => apost + blen - diag,
        Orient::Comp => diag - apost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> SeedLayout {
        SeedLayout {
            kmer: 40,
            ibyte: 5,
            jbyte: 5,
            pair_width: 11,
            ipost: 4,
            dbyte: 3,
            jcont: 2,
            swide: 11,
        }
    }

    #[test]
    fn test_pair_round_trip() {
        let l = layout();
        let mut buf = vec![0u8; l.pair_width];
        l.pack_pair(&mut buf, 33, 0x12_3456_789a, 0xab_cdef_0123);
        let (lcp, a, b) = l.unpack_pair(&buf);
        assert_eq!(lcp, 33);
        assert_eq!(a, 0x12_3456_789a);
        assert_eq!(b, 0xab_cdef_0123);
    }

    #[test]
    fn test_sort_round_trip() {
        let l = layout();
        let mut buf = vec![0u8; l.swide];
        l.pack_sort(&mut buf, 17, 123_456, 9_876_543, 513);
        assert_eq!(l.sort_lcp(&buf), 17);
        assert_eq!(l.sort_apost(&buf), 123_456);
        assert_eq!(l.sort_diag(&buf), 9_876_543);
        assert_eq!(l.sort_bucket(&buf), 9_876_543 / BUCKET_WIDTH);
        assert_eq!(l.sort_bcont(&buf), 513);
    }

    #[test]
    fn test_diagonal_same_strand_nonnegative() {
        // b-post can exceed a-post; the b-length offset keeps diag >= 0.
        let d = diagonal(Orient::Normal, 0, 900, 1000);
        assert_eq!(d, 100);
        assert_eq!(bpost_of(Orient::Normal, 0, d, 1000), 900);
    }

    #[test]
    fn test_diagonal_comp_is_anti() {
        let d = diagonal(Orient::Comp, 300, 200, 1000);
        assert_eq!(d, 500);
        assert_eq!(bpost_of(Orient::Comp, 300, d, 1000), 200);
    }

    #[test]
    fn test_bucket_split() {
        let l = layout();
        let mut buf = vec![0u8; l.swide];
        for diag in [0u64, 63, 64, 127, 128, 100_000] {
            l.pack_sort(&mut buf, 0, 0, diag, 0);
            assert_eq!(l.sort_diag(&buf), diag);
            assert_eq!(l.sort_bucket(&buf), diag / 64);
        }
    }

    #[test]
    fn test_key_offsets_skip_remainder() {
        let l = layout();
        let offs = l.sort_key_offsets();
        assert_eq!(offs.first().copied(), Some(2));
        assert_eq!(offs.len(), l.swide - 2);
    }
}
