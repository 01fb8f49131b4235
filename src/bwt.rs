//! Burrows-Wheeler Transform.
//!
//! The BWT permutes a block so that bytes with similar right-context end up
//! adjacent, which is what makes the MTF + zero-length + entropy stages of
//! the block pipeline effective. It is fully reversible given one extra
//! integer, the **primary index**: the row of the original rotation in the
//! sorted rotation matrix.
//!
//! **Forward.** The rotation order is computed by prefix doubling directly
//! over the cyclic rotations: start from single-byte ranks, then repeatedly
//! sort by the rank pair at distance k and re-rank, doubling k until every
//! rotation has a distinct rank or k covers the block. Each round is two
//! linear passes (the shifted-order trick stands in for the second-key
//! sort), so the whole transform is O(n log n) with no recursion and no
//! sentinel handling. The last column of the sorted matrix plus the primary
//! index is the output.
//!
//! **Inverse.** One counting pass ranks every occurrence of every byte;
//! placing the last-column positions at those ranks yields the successor
//! permutation ψ, where ψ(r) is the last-column position whose row follows
//! row r's rotation. Walking ψ from the primary index replays the original
//! block front to back.
//!
//! A bijective variant (no primary index, used by the BWTS transform tag) is
//! also provided: the block is split into Lyndon factors with Duval's
//! algorithm and each factor is rotation-sorted independently. Every factor
//! is the smallest of its own rotations, so each inverts with primary
//! index 0.

use crate::{KzError, KzResult};

/// Result of a forward BWT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BwtResult {
    /// Last column of the sorted rotation matrix.
    pub data: Vec<u8>,
    /// Row of the original rotation in the sorted matrix; required to invert.
    pub primary_index: u32,
}

/// Sort the rotations of `input` by prefix doubling.
///
/// Returns the rotation order: `order[row]` is the start position of the
/// row-th smallest rotation. Rotations that compare equal (periodic input)
/// keep a consistent relative order, which is all the inverse needs.
fn rotation_order(input: &[u8]) -> Vec<usize> {
    let n = input.len();
    if n <= 1 {
        return (0..n).collect();
    }

    let mut rank: Vec<usize> = input.iter().map(|&b| b as usize).collect();
    let mut order: Vec<usize> = vec![0; n];
    let mut scratch: Vec<usize> = vec![0; n];
    let mut next_rank: Vec<usize> = vec![0; n];
    let mut buckets: Vec<usize> = vec![0; n.max(256) + 1];

    // Round zero: stable counting sort of positions by their first byte.
    for &b in input {
        buckets[b as usize + 1] += 1;
    }
    for c in 0..256 {
        buckets[c + 1] += buckets[c];
    }
    for (pos, &b) in input.iter().enumerate() {
        order[buckets[b as usize]] = pos;
        buckets[b as usize] += 1;
    }

    // Compact the byte ranks to 0..n so every later bucket pass is bounded
    // by the block length.
    next_rank[order[0]] = 0;
    for w in 1..n {
        let same = input[order[w]] == input[order[w - 1]];
        next_rank[order[w]] = next_rank[order[w - 1]] + usize::from(!same);
    }
    std::mem::swap(&mut rank, &mut next_rank);

    let mut k = 1;
    while k < n {
        // A rotation's sort key this round is (rank[i], rank[i + k]).
        // Shifting the rank-sorted order left by k lists positions already
        // ordered by the second component.
        for (slot, &pos) in scratch.iter_mut().zip(order.iter()) {
            *slot = (pos + n - k) % n;
        }

        // Stable counting sort by the first component on top of that.
        buckets[..=n].fill(0);
        for &pos in &scratch {
            buckets[rank[pos] + 1] += 1;
        }
        for r in 0..n {
            buckets[r + 1] += buckets[r];
        }
        for &pos in &scratch {
            order[buckets[rank[pos]]] = pos;
            buckets[rank[pos]] += 1;
        }

        // Re-rank: bump whenever the key pair changes.
        next_rank[order[0]] = 0;
        for w in 1..n {
            let prev = order[w - 1];
            let cur = order[w];
            let same =
                rank[cur] == rank[prev] && rank[(cur + k) % n] == rank[(prev + k) % n];
            next_rank[cur] = next_rank[prev] + usize::from(!same);
        }
        std::mem::swap(&mut rank, &mut next_rank);

        if rank[order[n - 1]] == n - 1 {
            break;
        }

        k <<= 1;
    }

    order
}

/// Forward Burrows-Wheeler Transform. Returns `None` for empty input.
pub fn encode(input: &[u8]) -> Option<BwtResult> {
    if input.is_empty() {
        return None;
    }

    let n = input.len();
    let order = rotation_order(input);

    let mut data = Vec::with_capacity(n);
    let mut primary_index = 0u32;

    for (row, &start) in order.iter().enumerate() {
        // The rotation's last byte is the one preceding its start.
        data.push(input[(start + n - 1) % n]);

        if start == 0 {
            primary_index = row as u32;
        }
    }

    Some(BwtResult {
        data,
        primary_index,
    })
}

/// Inverse Burrows-Wheeler Transform into a caller-provided buffer.
/// Returns the number of bytes written (`bwt.len()`).
pub fn decode_to_buf(bwt: &[u8], primary_index: u32, output: &mut [u8]) -> KzResult<usize> {
    if bwt.is_empty() {
        return Ok(0);
    }

    let n = bwt.len();
    if primary_index as usize >= n {
        return Err(KzError::Decode(format!(
            "BWT primary index {} out of range for block of {} bytes",
            primary_index, n
        )));
    }
    if output.len() < n {
        return Err(KzError::Argument(format!(
            "BWT output buffer too small: {} < {}",
            output.len(),
            n
        )));
    }

    // Where each byte's bucket begins in the (sorted) first column.
    let mut base = [0usize; 257];
    for &b in bwt {
        base[b as usize + 1] += 1;
    }
    for c in 0..256 {
        base[c + 1] += base[c];
    }

    // Successor permutation: the r-th row of the first column holds the
    // r-th occurrence (in last-column order) of its byte. ψ(r) points at
    // that occurrence's last-column position.
    let mut psi = vec![0u32; n];
    for (pos, &b) in bwt.iter().enumerate() {
        psi[base[b as usize]] = pos as u32;
        base[b as usize] += 1;
    }

    // Replay the block front to back from the original rotation's row.
    let mut row = primary_index as usize;
    for slot in output[..n].iter_mut() {
        row = psi[row] as usize;
        *slot = bwt[row];
    }

    Ok(n)
}

/// Inverse Burrows-Wheeler Transform, allocating the output.
pub fn decode(bwt: &[u8], primary_index: u32) -> KzResult<Vec<u8>> {
    let mut output = vec![0u8; bwt.len()];
    decode_to_buf(bwt, primary_index, &mut output)?;
    Ok(output)
}

// --- Bijective BWT via Lyndon factorization ---

/// Lengths of the Lyndon factors of `input`, left to right, by Duval's
/// algorithm. By the Chen-Fox-Lyndon theorem the factorization into
/// non-increasing Lyndon words is unique.
pub fn lyndon_factor_lengths(input: &[u8]) -> Vec<usize> {
    let n = input.len();
    let mut lengths = Vec::new();
    let mut start = 0;

    while start < n {
        // Extend a periodic run of some Lyndon word: the period grows when a
        // byte exceeds its counterpart one period back, and the run ends when
        // a byte falls below it.
        let mut period = 1;
        let mut scan = start + 1;

        while scan < n {
            let earlier = input[scan - period];

            if input[scan] > earlier {
                period = scan + 1 - start;
            } else if input[scan] < earlier {
                break;
            }

            scan += 1;
        }

        // Emit whole repetitions of the word; a leftover proper prefix is
        // re-examined as the next window.
        while start + period <= scan {
            lengths.push(period);
            start += period;
        }
    }

    lengths
}

/// Bijective BWT forward transform.
///
/// Returns (transformed data, factor lengths). The factor lengths are
/// required to invert; no primary index exists.
pub fn encode_bijective(input: &[u8]) -> Option<(Vec<u8>, Vec<usize>)> {
    if input.is_empty() {
        return None;
    }

    let lengths = lyndon_factor_lengths(input);
    let mut output = Vec::with_capacity(input.len());
    let mut start = 0;

    for &len in &lengths {
        let factor = &input[start..start + len];
        start += len;

        if len == 1 {
            output.push(factor[0]);
            continue;
        }

        // A Lyndon word's rotations are all distinct, so the order is
        // unambiguous.
        for &row_start in &rotation_order(factor) {
            output.push(factor[(row_start + len - 1) % len]);
        }
    }

    Some((output, lengths))
}

/// Bijective BWT inverse transform.
///
/// A Lyndon word is the smallest of its rotations, so in each factor's
/// sorted rotation matrix the original sits at row 0 and the standard
/// inverse applies with primary index 0.
pub fn decode_bijective(bwt: &[u8], factor_lengths: &[usize]) -> KzResult<Vec<u8>> {
    if bwt.is_empty() {
        return Ok(Vec::new());
    }

    let total: usize = factor_lengths.iter().sum();
    if total != bwt.len() {
        return Err(KzError::Decode(format!(
            "bijective BWT factor lengths sum to {}, block is {} bytes",
            total,
            bwt.len()
        )));
    }

    let mut output = vec![0u8; bwt.len()];
    let mut offset = 0;

    for &len in factor_lengths {
        decode_to_buf(&bwt[offset..offset + len], 0, &mut output[offset..])?;
        offset += len;
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rotation order by direct comparison sort, for cross-validation.
    fn rotation_order_naive(input: &[u8]) -> Vec<usize> {
        let n = input.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            for i in 0..n {
                let ca = input[(a + i) % n];
                let cb = input[(b + i) % n];
                match ca.cmp(&cb) {
                    std::cmp::Ordering::Equal => continue,
                    ord => return ord,
                }
            }
            a.cmp(&b)
        });
        order
    }

    #[test]
    fn test_encode_empty() {
        assert!(encode(&[]).is_none());
    }

    #[test]
    fn test_banana() {
        let result = encode(b"banana").unwrap();
        // Sorted rotations of "banana" end in n, n, b, a, a, a.
        assert_eq!(result.data, b"nnbaaa");
        assert_eq!(result.primary_index, 3);
        assert_eq!(decode(&result.data, result.primary_index).unwrap(), b"banana");
    }

    #[test]
    fn test_mississippi() {
        let result = encode(b"mississippi").unwrap();
        let decoded = decode(&result.data, result.primary_index).unwrap();
        assert_eq!(decoded, b"mississippi");
    }

    #[test]
    fn test_single_byte() {
        let result = encode(&[42]).unwrap();
        assert_eq!(result.data, &[42]);
        assert_eq!(result.primary_index, 0);
        assert_eq!(decode(&result.data, 0).unwrap(), &[42]);
    }

    #[test]
    fn test_all_same_bytes() {
        let input = vec![b'x'; 100];
        let result = encode(&input).unwrap();
        assert_eq!(result.data, input);
        let decoded = decode(&result.data, result.primary_index).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_periodic_input() {
        let input: Vec<u8> = b"abcabcabcabc".to_vec();
        let result = encode(&input).unwrap();
        let decoded = decode(&result.data, result.primary_index).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_bad_primary_index() {
        assert!(matches!(decode(b"abc", 10), Err(KzError::Decode(_))));
    }

    #[test]
    fn test_round_trip_binary() {
        let input: Vec<u8> = (0..2048).map(|i| ((i * 131 + 7) % 256) as u8).collect();
        let result = encode(&input).unwrap();
        let decoded = decode(&result.data, result.primary_index).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_doubling_matches_naive_rotation_sort() {
        // Periodic inputs have duplicate rotations that the two methods may
        // order differently (both orders invert correctly); compare only on
        // inputs whose rotations are all distinct.
        let cases: &[&[u8]] = &[
            b"banana",
            b"mississippi",
            b"zyxwvut",
            b"a",
            b"ab",
            b"ba",
            b"the quick brown fox",
        ];
        for &input in cases {
            assert_eq!(
                rotation_order(input),
                rotation_order_naive(input),
                "rotation order mismatch for {:?}",
                input
            );
        }
    }

    #[test]
    fn test_decode_to_buf_too_small() {
        let result = encode(b"banana").unwrap();
        let mut buf = [0u8; 2];
        assert!(matches!(
            decode_to_buf(&result.data, result.primary_index, &mut buf),
            Err(KzError::Argument(_))
        ));
    }

    #[test]
    fn test_lyndon_lengths_cover_input() {
        for input in [&b"banana"[..], b"aaaa", b"zyx", b"abcabcab"] {
            let lengths = lyndon_factor_lengths(input);
            assert_eq!(lengths.iter().sum::<usize>(), input.len());
        }
        // "banana" factors as b · an · an · a.
        assert_eq!(lyndon_factor_lengths(b"banana"), vec![1, 2, 2, 1]);
    }

    #[test]
    fn test_lyndon_factors_are_lyndon_words() {
        // Each factor must be strictly smaller than all of its own proper
        // rotations.
        let input = b"the quick brown fox jumps over the lazy dog";
        let lengths = lyndon_factor_lengths(input);
        let mut start = 0;

        for &len in &lengths {
            let w = &input[start..start + len];
            for r in 1..len {
                let rotated: Vec<u8> = w[r..].iter().chain(w[..r].iter()).copied().collect();
                assert!(w < &rotated[..], "factor {:?} is not a Lyndon word", w);
            }
            start += len;
        }
    }

    #[test]
    fn test_bijective_round_trip() {
        let cases: &[&[u8]] = &[
            b"banana",
            b"mississippi",
            b"aaaaaaaa",
            b"the quick brown fox jumps over the lazy dog",
            b"zzzzyyyyxxxx",
        ];
        for &input in cases {
            let (bwt, lengths) = encode_bijective(input).unwrap();
            let decoded = decode_bijective(&bwt, &lengths).unwrap();
            assert_eq!(decoded, input, "bijective round-trip failed for {:?}", input);
        }
    }

    #[test]
    fn test_bijective_bad_lengths() {
        let (bwt, _) = encode_bijective(b"banana").unwrap();
        assert!(matches!(
            decode_bijective(&bwt, &[2, 2]),
            Err(KzError::Decode(_))
        ));
    }

    #[test]
    fn test_bijective_round_trip_binary() {
        let input: Vec<u8> = (0..1500).map(|i| ((i * 37 + 11) % 251) as u8).collect();
        let (bwt, lengths) = encode_bijective(&input).unwrap();
        assert_eq!(decode_bijective(&bwt, &lengths).unwrap(), input);
    }
}
