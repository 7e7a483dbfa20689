//! K-mer codec: packs a fixed-length DNA string into a 2-bit-per-base 64-bit
//! integer, computes its reverse complement in the same encoding, and
//! derives the canonical hash used as the node identity throughout the rest
//! of this crate.
//!
//! Encoding follows the convention used by the khmer/oxli C++ core this
//! crate's design is grounded on: `A=0, T=1, C=2, G=3` (`revtwobit_repr` /
//! `twobit_repr` in `kmer_hash.hh`). The complement of a base is the bit
//! pattern whose two low bits are a fixed XOR away: `A<->T` is `0<->1`,
//! `C<->G` is `2<->3`.

pub mod iterator;

use crate::error::{CoreError, Result};

pub use iterator::KmerIterator;

/// Largest k-mer size the 64-bit encoding can hold (`2 bits * 32 = 64`).
pub const MAX_KSIZE: u8 = 32;

/// A canonical k-mer hash: `min(forward_encoding, reverse_complement_encoding)`.
pub type KmerHash = u64;

#[inline(always)]
fn twobit_repr(base: u8) -> Result<u64> {
    match base {
        b'A' => Ok(0),
        b'T' => Ok(1),
        b'C' => Ok(2),
        b'G' => Ok(3),
        other => Err(CoreError::BadKmer(format!(
            "non-ACGT base '{}' in kmer",
            other as char
        ))),
    }
}

#[inline(always)]
fn twobit_comp(base: u8) -> Result<u64> {
    match base {
        b'A' => Ok(1),
        b'T' => Ok(0),
        b'C' => Ok(3),
        b'G' => Ok(2),
        other => Err(CoreError::BadKmer(format!(
            "non-ACGT base '{}' in kmer",
            other as char
        ))),
    }
}

#[inline(always)]
fn revtwobit_repr(code: u64) -> u8 {
    match code & 3 {
        0 => b'A',
        1 => b'T',
        2 => b'C',
        _ => b'G',
    }
}

/// Returns `true` for uppercase A/C/G/T. Callers are expected to uppercase
/// input before calling into this module; lowercase is rejected rather than
/// silently normalized so that normalization policy stays with the caller.
pub fn is_valid_base(base: u8) -> bool {
    matches!(base, b'A' | b'C' | b'G' | b'T')
}

/// Validates that `k` is in the representable range and `seq` is exactly `k`
/// uppercase ACGT characters.
fn validate(seq: &[u8], k: u8) -> Result<()> {
    if k == 0 || k > MAX_KSIZE {
        return Err(CoreError::BadKmer(format!(
            "k must be in 1..={MAX_KSIZE}, got {k}"
        )));
    }
    if seq.len() != k as usize {
        return Err(CoreError::WrongKmerLength {
            expected: k,
            actual: seq.len(),
        });
    }
    Ok(())
}

/// Encodes a k-mer string into its forward and reverse-complement 64-bit
/// representations. Mirrors `khmer::_hash(kmer, k, h, r)`.
pub fn encode(seq: &[u8], k: u8) -> Result<(u64, u64)> {
    validate(seq, k)?;

    let mut h: u64 = twobit_repr(seq[0])?;
    let mut r: u64 = twobit_comp(seq[k as usize - 1])?;

    for i in 1..k as usize {
        let j = (k as usize - 1) - i;
        h = (h << 2) | twobit_repr(seq[i])?;
        r = (r << 2) | twobit_comp(seq[j])?;
    }

    Ok((h, r))
}

/// `canonical(f, r) = min(f, r)`. A k-mer and its reverse complement always
/// collide to the same value.
#[inline(always)]
pub fn canonical(forward: u64, reverse: u64) -> KmerHash {
    forward.min(reverse)
}

/// Encodes a k-mer string directly to its canonical hash.
pub fn canonical_hash(seq: &[u8], k: u8) -> Result<KmerHash> {
    let (f, r) = encode(seq, k)?;
    Ok(canonical(f, r))
}

/// Decodes a 64-bit encoding (forward-orientation bits) back to its k-mer
/// string. When called on a canonical hash, the result is "a" string with
/// that canonical value, not necessarily the original forward orientation.
pub fn decode(hash: u64, k: u8) -> String {
    let mut buf = vec![0u8; k as usize];
    let mut h = hash;
    for i in (0..k as usize).rev() {
        buf[i] = revtwobit_repr(h);
        h >>= 2;
    }
    // SAFETY: revtwobit_repr only ever emits ASCII A/T/C/G.
    String::from_utf8(buf).expect("kmer decode always yields ASCII")
}

/// Reverse-complements a DNA string. Non-ACGT bytes are rejected.
pub fn reverse_complement(seq: &[u8]) -> Result<Vec<u8>> {
    seq.iter()
        .rev()
        .map(|&b| match b {
            b'A' => Ok(b'T'),
            b'T' => Ok(b'A'),
            b'C' => Ok(b'G'),
            b'G' => Ok(b'C'),
            other => Err(CoreError::BadKmer(format!(
                "non-ACGT base '{}' in sequence",
                other as char
            ))),
        })
        .collect()
}

/// `(1 << (2*k)) - 1`: masks a hash down to its low `2k` bits.
#[inline(always)]
pub fn bitmask(k: u8) -> u64 {
    if k == MAX_KSIZE {
        u64::MAX
    } else {
        (1u64 << (2 * k as u32)) - 1
    }
}

// ---------------------------------------------------------------------
// MurmurHash3 (x64, 128-bit variant, low 64 bits only) — the second,
// independent hash used by HyperLogLog and reserved for min-hash-style
// sketches. Mirrors `MurmurHash3_x64_128` as called from
// `khmer::_hash_murmur`.
// ---------------------------------------------------------------------

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

#[inline(always)]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

/// MurmurHash3_x64_128, returning only the low 64 bits (`out[0]` in the
/// reference implementation). `seed` is fixed at 0 to match
/// `khmer::_hash_murmur`'s call site.
fn murmur3_x64_128_low(data: &[u8], seed: u64) -> u64 {
    let mut h1 = seed;
    let mut h2 = seed;

    let nblocks = data.len() / 16;
    for i in 0..nblocks {
        let block = &data[i * 16..i * 16 + 16];
        let mut k1 = u64::from_le_bytes(block[0..8].try_into().unwrap());
        let mut k2 = u64::from_le_bytes(block[8..16].try_into().unwrap());

        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(31);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;

        h1 = h1.rotate_left(27);
        h1 = h1.wrapping_add(h2);
        h1 = h1.wrapping_mul(5).wrapping_add(0x52dc_e729);

        k2 = k2.wrapping_mul(C2);
        k2 = k2.rotate_left(33);
        k2 = k2.wrapping_mul(C1);
        h2 ^= k2;

        h2 = h2.rotate_left(31);
        h2 = h2.wrapping_add(h1);
        h2 = h2.wrapping_mul(5).wrapping_add(0x3849_5ab5);
    }

    let tail = &data[nblocks * 16..];
    let mut k1: u64 = 0;
    let mut k2: u64 = 0;

    if tail.len() > 8 {
        for i in (8..tail.len()).rev() {
            k2 ^= (tail[i] as u64) << (8 * (i - 8));
        }
        k2 = k2.wrapping_mul(C2);
        k2 = k2.rotate_left(33);
        k2 = k2.wrapping_mul(C1);
        h2 ^= k2;
    }
    if !tail.is_empty() {
        for i in (0..tail.len().min(8)).rev() {
            k1 ^= (tail[i] as u64) << (8 * i);
        }
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(31);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u64;
    h2 ^= data.len() as u64;

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    h1 = fmix64(h1);
    h2 = fmix64(h2);

    h1 = h1.wrapping_add(h2);
    // h2 = h2.wrapping_add(h1); // out[1], unused: reference only keeps out[0]

    h1
}

/// The second, MurmurHash3-based hash. Mirrors `khmer::_hash_murmur`:
/// `hash(canonical) = hash_murmur(forward) XOR hash_murmur(revcomp)`, so the
/// result is symmetric under reverse-complementation just like the codec
/// hash above.
pub fn murmur_hash(seq: &[u8]) -> Result<u64> {
    let rc = reverse_complement(seq)?;
    let h = murmur3_x64_128_low(seq, 0);
    let r = murmur3_x64_128_low(&rc, 0);
    Ok(h ^ r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let (f, _r) = encode(b"ACGT", 4).unwrap();
        assert_eq!(decode(f, 4), "ACGT");
    }

    #[test]
    fn canonical_hash_matches_reverse_complement() {
        let s = b"ACGTACGA";
        let rc = reverse_complement(s).unwrap();
        assert_eq!(
            canonical_hash(s, 8).unwrap(),
            canonical_hash(&rc, 8).unwrap()
        );
    }

    #[test]
    fn rejects_non_acgt() {
        assert!(encode(b"ACGN", 4).is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        match encode(b"ACG", 4) {
            Err(CoreError::WrongKmerLength { expected, actual }) => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 3);
            }
            other => panic!("expected WrongKmerLength, got {other:?}"),
        }
    }

    #[test]
    fn rejects_k_out_of_range() {
        assert!(encode(b"A", 0).is_err());
        assert!(encode(&[b'A'; 33], 33).is_err());
    }

    #[test]
    fn k_one_collapses_complementary_bases() {
        assert_eq!(
            canonical_hash(b"A", 1).unwrap(),
            canonical_hash(b"T", 1).unwrap()
        );
        assert_eq!(
            canonical_hash(b"C", 1).unwrap(),
            canonical_hash(b"G", 1).unwrap()
        );
    }

    #[test]
    fn k_thirty_two_fills_the_hash() {
        let seq = b"ACGTACGTACGTACGTACGTACGTACGTACGT";
        let (f, r) = encode(seq, 32).unwrap();
        assert_eq!(bitmask(32), u64::MAX);
        assert!(canonical(f, r) <= u64::MAX);
    }

    #[test]
    fn murmur_hash_is_symmetric_under_revcomp() {
        let s = b"GATTACAGATTACA";
        let rc = reverse_complement(s).unwrap();
        assert_eq!(murmur_hash(s).unwrap(), murmur_hash(&rc).unwrap());
    }

    #[test]
    fn murmur_hash_differs_for_different_sequences() {
        assert_ne!(
            murmur_hash(b"AAAAAAAAAA").unwrap(),
            murmur_hash(b"CCCCCCCCCC").unwrap()
        );
    }
}
