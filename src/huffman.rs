//! Canonical Huffman coder.
//!
//! Works in chunks (64 KiB by default) so local statistics stay fresh inside
//! large blocks. Per chunk the encoder:
//!
//! 1. counts byte frequencies,
//! 2. builds a Huffman tree with the classic two-queue merge,
//! 3. derives canonical codes from the code lengths alone
//!    (sorted by decreasing length, then increasing symbol),
//! 4. transmits the lengths as signed first differences through Exp-Golomb,
//! 5. emits each symbol's code.
//!
//! The decoder rebuilds the identical canonical tree from the lengths —
//! code bits double as tree-construction keys, resolved in max-first order
//! through an [`IntBTree`] — and decodes by walking the tree. A 1024-entry
//! cache keyed by the next 10 bits supplies a pre-walked starting chain, so
//! most symbols resolve with at most a bit or two of follow-up; the last few
//! symbols of each chunk fall back to bit-by-bit walking so the batch read
//! can never cross into the next chunk's header.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::io::{Read, Write};

use crate::bitstream::{InputBitStream, OutputBitStream};
use crate::btree::IntBTree;
use crate::exp_golomb::{ExpGolombDecoder, ExpGolombEncoder};
use crate::frequency::FrequencyTable;
use crate::{KzError, KzResult};

/// Bits fetched per decoder cache lookup.
const DECODING_BATCH_SIZE: usize = 10;

/// Bytes per independently-modeled chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 16;

/// Longest admissible code. A 64 KiB chunk cannot produce a deeper canonical
/// tree, and the decoder's tree keys pack length and code into one integer.
const MAX_CODE_LENGTH: u32 = 24;

const NIL: usize = usize::MAX;

#[derive(Clone)]
struct TreeNode {
    symbol: u8,
    left: usize,
    right: usize,
}

impl TreeNode {
    fn leaf(symbol: u8) -> Self {
        Self {
            symbol,
            left: NIL,
            right: NIL,
        }
    }

    fn internal() -> Self {
        Self {
            symbol: 0,
            left: NIL,
            right: NIL,
        }
    }

    fn is_leaf(&self) -> bool {
        self.left == NIL && self.right == NIL
    }
}

/// Compute code lengths for `freqs` via the two-queue Huffman construction.
///
/// A lone distinct symbol gets a 1-bit code so every present symbol has a
/// transmittable, decodable length.
fn code_lengths_from_frequencies(freqs: &[u32; 256], sizes: &mut [u32; 256]) {
    struct BuildNode {
        weight: u64,
        symbol: u8,
        left: usize,
        right: usize,
    }

    *sizes = [0u32; 256];

    let mut arena: Vec<BuildNode> = Vec::new();
    let mut present: Vec<usize> = (0..256).filter(|&i| freqs[i] > 0).collect();

    if present.is_empty() {
        return;
    }

    if present.len() == 1 {
        sizes[present[0]] = 1;
        return;
    }

    // Leaves ordered by (weight, symbol) ascending.
    present.sort_by_key(|&i| (freqs[i], i));

    let mut queue1: VecDeque<usize> = VecDeque::new();
    let mut queue2: VecDeque<usize> = VecDeque::new();

    for &sym in &present {
        arena.push(BuildNode {
            weight: freqs[sym] as u64,
            symbol: sym as u8,
            left: NIL,
            right: NIL,
        });
        queue1.push_back(arena.len() - 1);
    }

    // Two-queue merge: the smallest node is always at the front of one of
    // the queues, merged nodes arrive in non-decreasing weight order.
    while queue1.len() + queue2.len() > 1 {
        let mut picked = [0usize; 2];

        for slot in picked.iter_mut() {
            *slot = match (queue1.front(), queue2.front()) {
                (None, _) => queue2.pop_front().unwrap(),
                (_, None) => queue1.pop_front().unwrap(),
                (Some(&a), Some(&b)) => {
                    if arena[a].weight <= arena[b].weight {
                        queue1.pop_front().unwrap()
                    } else {
                        queue2.pop_front().unwrap()
                    }
                }
            };
        }

        arena.push(BuildNode {
            weight: arena[picked[0]].weight + arena[picked[1]].weight,
            symbol: 0,
            left: picked[0],
            right: picked[1],
        });
        queue2.push_back(arena.len() - 1);
    }

    let root = queue1
        .pop_front()
        .or_else(|| queue2.pop_front())
        .unwrap();

    // Iterative depth-fill of the leaf lengths.
    let mut stack = vec![(root, 0u32)];
    while let Some((idx, depth)) = stack.pop() {
        let node = &arena[idx];
        if node.left == NIL && node.right == NIL {
            sizes[node.symbol as usize] = depth;
            continue;
        }
        if node.left != NIL {
            stack.push((node.left, depth + 1));
        }
        if node.right != NIL {
            stack.push((node.right, depth + 1));
        }
    }
}

/// Assign canonical codes from code lengths: symbols sorted by decreasing
/// length then increasing value, codes counted up and right-shifted at every
/// length step.
fn generate_canonical_codes(sizes: &[u32; 256]) -> [u32; 256] {
    let mut order: Vec<(u32, usize)> = (0..256)
        .filter(|&i| sizes[i] > 0)
        .map(|i| (sizes[i], i))
        .collect();

    // Decreasing length, increasing symbol.
    order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut codes = [0u32; 256];

    if order.is_empty() {
        return codes;
    }

    let mut code = 0u32;
    let mut length = order[0].0;

    for &(size, sym) in &order {
        while length > size {
            code >>= 1;
            length -= 1;
        }

        codes[sym] = code;
        code += 1;
    }

    codes
}

/// Decoder-side tree assembled from canonical (length, code) pairs.
///
/// Keys `(length << 24) | code` are drained largest-first from a BST; each
/// node hangs off the parent keyed by `(length - 1, code >> 1)`, creating
/// gap-filling internal parents on demand.
struct DecodingTree {
    nodes: Vec<TreeNode>,
    root: usize,
    /// Linked chains of pre-walked nodes, one list head per 10-bit prefix.
    cache_nodes: Vec<(usize, usize)>, // (tree node, next chain index)
    cache_heads: Vec<usize>,
    current: usize,
}

impl DecodingTree {
    fn new(sizes: &[u32; 256], codes: &[u32; 256]) -> KzResult<Self> {
        let mut nodes: Vec<TreeNode> = Vec::new();
        let mut key_map: HashMap<i64, usize> = HashMap::new();
        let mut tree = IntBTree::new();

        nodes.push(TreeNode::internal());
        key_map.insert(0, 0);
        tree.add(0);

        for i in 0..256 {
            if sizes[i] == 0 {
                continue;
            }

            let key = ((sizes[i] as i64) << 24) | codes[i] as i64;
            tree.add(key);
            nodes.push(TreeNode::leaf(i as u8));
            key_map.insert(key, nodes.len() - 1);
        }

        if key_map.len() == 1 {
            return Err(KzError::Decode(
                "Huffman chunk declares no symbols".to_string(),
            ));
        }

        // Attach every node to its parent, deepest codes first.
        while tree.size() > 1 {
            let key = tree.max().unwrap();
            tree.remove(key);

            let node = key_map[&key];
            let length = key >> 24;
            let code = key & 0xFF_FFFF;

            // Only the root lives at depth 0; anything else here means the
            // transmitted lengths were not a canonical code.
            if length < 1 {
                return Err(KzError::Decode(
                    "inconsistent Huffman code lengths".to_string(),
                ));
            }

            let up_key = ((length - 1) << 24) | (code >> 1);

            let up = match key_map.get(&up_key) {
                Some(&idx) => idx,
                None => {
                    nodes.push(TreeNode::internal());
                    let idx = nodes.len() - 1;
                    key_map.insert(up_key, idx);
                    tree.add(up_key);
                    idx
                }
            };

            if code & 1 == 1 {
                nodes[up].right = node;
            } else {
                nodes[up].left = node;
            }
        }

        let root = key_map[&0];

        let mut this = Self {
            nodes,
            root,
            cache_nodes: Vec::new(),
            cache_heads: Vec::new(),
            current: 0,
        };
        this.build_cache();
        Ok(this)
    }

    /// Pre-walk every 10-bit pattern from the root, recording the sequence
    /// of nodes it lands on: complete leaves, then the partial node the
    /// leftover bits reach, then a root sentinel that forces a fresh fetch.
    fn build_cache(&mut self) {
        let end = 1usize << DECODING_BATCH_SIZE;
        self.cache_nodes = Vec::with_capacity(end * 2);
        self.cache_heads = vec![0usize; end];

        // Entry 0 is the initial root sentinel.
        self.cache_nodes.push((self.root, NIL));
        self.current = 0;

        let mut previous = NIL;

        for val in 0..end {
            let mut shift = DECODING_BATCH_SIZE as isize - 1;
            let mut first_added = false;

            while shift >= 0 {
                let mut node = self.root;

                while shift >= 0 && !self.nodes[node].is_leaf() {
                    node = if (val >> shift) & 1 == 0 {
                        self.nodes[node].left
                    } else {
                        self.nodes[node].right
                    };
                    shift -= 1;

                    if node == NIL {
                        // This bit pattern is unreachable under a complete
                        // canonical tree; park the chain at the root.
                        node = self.root;
                        break;
                    }
                }

                self.cache_nodes.push((node, NIL));
                let idx = self.cache_nodes.len() - 1;

                if previous != NIL {
                    self.cache_nodes[previous].1 = idx;
                }
                previous = idx;

                if !first_added {
                    self.cache_heads[val] = idx;
                    first_added = true;
                }
            }

            // Trailing root sentinel for this pattern.
            self.cache_nodes.push((self.root, NIL));
            let sentinel = self.cache_nodes.len() - 1;
            self.cache_nodes[previous].1 = sentinel;
            previous = sentinel;
        }
    }

    /// Decode one symbol reading bit by bit (chunk-tail safe).
    fn decode_byte<R: Read>(&mut self, bitstream: &mut InputBitStream<R>) -> KzResult<u8> {
        let (mut node, next) = self.cache_nodes[self.current];

        if node != self.root {
            self.current = next;
        }

        while !self.nodes[node].is_leaf() {
            node = if bitstream.read_bit()? == 0 {
                self.nodes[node].left
            } else {
                self.nodes[node].right
            };

            if node == NIL {
                return Err(KzError::Decode(
                    "bit pattern reaches no Huffman leaf".to_string(),
                ));
            }
        }

        Ok(self.nodes[node].symbol)
    }

    /// Decode one symbol, fetching a 10-bit batch through the cache when the
    /// previous batch is exhausted. At least 10 more coded bits must exist.
    fn fast_decode_byte<R: Read>(&mut self, bitstream: &mut InputBitStream<R>) -> KzResult<u8> {
        let (mut node, _) = self.cache_nodes[self.current];

        if node == self.root {
            let idx = bitstream.read_bits(DECODING_BATCH_SIZE as u32)? as usize;
            self.current = self.cache_heads[idx];
            node = self.cache_nodes[self.current].0;
        }

        while !self.nodes[node].is_leaf() {
            node = if bitstream.read_bit()? == 0 {
                self.nodes[node].left
            } else {
                self.nodes[node].right
            };

            if node == NIL {
                return Err(KzError::Decode(
                    "bit pattern reaches no Huffman leaf".to_string(),
                ));
            }
        }

        self.current = self.cache_nodes[self.current].1;
        Ok(self.nodes[node].symbol)
    }
}

/// Chunked canonical Huffman encoder over a borrowed bitstream.
pub struct HuffmanEncoder<'a, W: Write> {
    bitstream: &'a mut OutputBitStream<W>,
    codes: [u32; 256],
    sizes: [u32; 256],
    chunk_size: usize,
}

impl<'a, W: Write> HuffmanEncoder<'a, W> {
    pub fn new(bitstream: &'a mut OutputBitStream<W>) -> Self {
        // Until the first chunk sets real statistics, symbols map to
        // themselves with 8-bit codes, mirroring the decoder's default tree.
        Self {
            bitstream,
            codes: std::array::from_fn(|i| i as u32),
            sizes: [8u32; 256],
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Rebuild the code table from a frequency count and transmit the new
    /// lengths as signed deltas.
    pub fn update_frequencies(&mut self, freqs: &FrequencyTable) -> KzResult<()> {
        code_lengths_from_frequencies(freqs.counts(), &mut self.sizes);
        self.codes = generate_canonical_codes(&self.sizes);

        let mut egenc = ExpGolombEncoder::new(self.bitstream, true);
        let mut prev_size = 1i32;

        for i in 0..256 {
            let next_size = self.sizes[i] as i32;
            egenc.encode_byte((next_size - prev_size) as u8)?;
            prev_size = next_size;
        }

        Ok(())
    }

    /// Code `val` with the current table. The table must cover it.
    pub fn encode_byte(&mut self, val: u8) -> KzResult<()> {
        let idx = val as usize;
        self.bitstream
            .write_bits(self.codes[idx] as u64, self.sizes[idx])?;
        Ok(())
    }

    pub fn encode(&mut self, block: &[u8]) -> KzResult<usize> {
        let mut freqs = FrequencyTable::new();

        for chunk in block.chunks(self.chunk_size) {
            freqs.tally(chunk);
            self.update_frequencies(&freqs)?;

            for &b in chunk {
                self.encode_byte(b)?;
            }
        }

        Ok(block.len())
    }

    pub fn dispose(&mut self) -> KzResult<()> {
        self.bitstream.flush()
    }
}

/// Chunked canonical Huffman decoder over a borrowed bitstream.
pub struct HuffmanDecoder<'a, R: Read> {
    bitstream: &'a mut InputBitStream<R>,
    sizes: [u32; 256],
    tree: DecodingTree,
    chunk_size: usize,
}

impl<'a, R: Read> HuffmanDecoder<'a, R> {
    pub fn new(bitstream: &'a mut InputBitStream<R>) -> Self {
        // Default tree: all 256 symbols at 8 bits, codes = symbol values.
        let sizes = [8u32; 256];
        let codes = generate_canonical_codes(&sizes);
        let tree = DecodingTree::new(&sizes, &codes).unwrap();

        Self {
            bitstream,
            sizes,
            tree,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Read the next chunk's code lengths and rebuild the decoding tree.
    pub fn read_lengths(&mut self) -> KzResult<()> {
        let mut egdec = ExpGolombDecoder::new(self.bitstream, true);
        let mut prev = 1i32;
        let mut any = false;

        for i in 0..256 {
            let delta = egdec.decode_byte()? as i8;
            let size = prev + delta as i32;

            if size < 0 || size > MAX_CODE_LENGTH as i32 {
                return Err(KzError::Decode(format!(
                    "invalid Huffman code length {} for symbol {}",
                    size, i
                )));
            }

            self.sizes[i] = size as u32;
            any |= size > 0;
            prev = size;
        }

        if !any {
            return Err(KzError::Decode(
                "Huffman chunk declares no symbols".to_string(),
            ));
        }

        let codes = generate_canonical_codes(&self.sizes);
        self.tree = DecodingTree::new(&self.sizes, &codes)?;
        Ok(())
    }

    pub fn decode_byte(&mut self) -> KzResult<u8> {
        self.tree.decode_byte(self.bitstream)
    }

    pub fn decode(&mut self, block: &mut [u8]) -> KzResult<usize> {
        let len = block.len();

        for chunk in block.chunks_mut(self.chunk_size) {
            self.read_lengths()?;

            // Batched decoding must stop short of the chunk tail: a 10-bit
            // fetch past the final code would swallow the next header.
            let end = chunk.len();
            let end_fast = end.saturating_sub(DECODING_BATCH_SIZE);
            let mut i = 0;

            while i < end_fast {
                chunk[i] = self.tree.fast_decode_byte(self.bitstream)?;
                i += 1;
            }

            while i < end {
                chunk[i] = self.tree.decode_byte(self.bitstream)?;
                i += 1;
            }
        }

        Ok(len)
    }

    pub fn dispose(&mut self) -> KzResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(input: &[u8]) -> usize {
        let mut obs = OutputBitStream::new(Vec::new(), 16384).unwrap();
        {
            let mut enc = HuffmanEncoder::new(&mut obs);
            enc.encode(input).unwrap();
            enc.dispose().unwrap();
        }
        obs.close().unwrap();
        let bytes = obs.into_inner();

        let mut ibs = InputBitStream::new(&bytes[..], 16384).unwrap();
        let mut dec = HuffmanDecoder::new(&mut ibs);
        let mut output = vec![0u8; input.len()];
        dec.decode(&mut output).unwrap();
        assert_eq!(output, input);
        bytes.len()
    }

    #[test]
    fn test_lengths_from_skewed_frequencies() {
        let mut freqs = [0u32; 256];
        freqs[b'a' as usize] = 50;
        freqs[b'b' as usize] = 30;
        freqs[b'c' as usize] = 15;
        freqs[b'd' as usize] = 5;

        let mut sizes = [0u32; 256];
        code_lengths_from_frequencies(&freqs, &mut sizes);

        assert!(sizes[b'a' as usize] <= sizes[b'b' as usize]);
        assert!(sizes[b'b' as usize] <= sizes[b'c' as usize]);
        assert!(sizes[b'c' as usize] <= sizes[b'd' as usize]);
        assert_eq!(sizes[b'z' as usize], 0);

        // Kraft sum of a complete binary code must be exactly 1.
        let kraft: f64 = (0..256)
            .filter(|&i| sizes[i] > 0)
            .map(|i| (0.5f64).powi(sizes[i] as i32))
            .sum();
        assert!((kraft - 1.0).abs() < 1e-9, "kraft sum {}", kraft);
    }

    #[test]
    fn test_single_symbol_gets_one_bit() {
        let mut freqs = [0u32; 256];
        freqs[7] = 1000;
        let mut sizes = [0u32; 256];
        code_lengths_from_frequencies(&freqs, &mut sizes);
        assert_eq!(sizes[7], 1);
    }

    #[test]
    fn test_canonical_codes_are_deterministic_and_prefix_free() {
        let mut freqs = [0u32; 256];
        for (i, f) in freqs.iter_mut().enumerate() {
            *f = (i as u32 % 17) + 1;
        }

        let mut sizes = [0u32; 256];
        code_lengths_from_frequencies(&freqs, &mut sizes);
        let codes_a = generate_canonical_codes(&sizes);
        let codes_b = generate_canonical_codes(&sizes);
        assert_eq!(codes_a[..], codes_b[..]);

        // Prefix-freedom: no code is a prefix of another.
        for i in 0..256 {
            for j in 0..256 {
                if i == j || sizes[i] == 0 || sizes[j] == 0 || sizes[i] > sizes[j] {
                    continue;
                }
                let shifted = codes_a[j] >> (sizes[j] - sizes[i]);
                assert!(
                    shifted != codes_a[i] || i == j,
                    "code {} is a prefix of code {}",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn test_round_trip_text() {
        round_trip(b"it was the best of times, it was the worst of times");
    }

    #[test]
    fn test_round_trip_single_symbol_block() {
        round_trip(&vec![b'#'; 2000]);
    }

    #[test]
    fn test_round_trip_two_symbols() {
        let input: Vec<u8> = (0..999).map(|i| if i % 3 == 0 { b'x' } else { b'y' }).collect();
        round_trip(&input);
    }

    #[test]
    fn test_round_trip_all_values() {
        let input: Vec<u8> = (0..=255).collect();
        round_trip(&input);
    }

    #[test]
    fn test_skewed_compresses() {
        let mut input = vec![b'e'; 9000];
        for i in (0..input.len()).step_by(9) {
            input[i] = b"abcdfghij"[(i / 9) % 9];
        }
        let size = round_trip(&input);
        assert!(size < input.len() / 2, "coded to {} bytes", size);
    }

    #[test]
    fn test_round_trip_across_chunks() {
        // Over one chunk, with a distribution shift at the boundary so the
        // second chunk genuinely retransmits different lengths.
        let mut input = vec![b'a'; DEFAULT_CHUNK_SIZE];
        input.extend(vec![b'z'; 3000]);
        input.extend((0..2000).map(|i| (i % 256) as u8));
        round_trip(&input);
    }

    #[test]
    fn test_round_trip_binary() {
        let input: Vec<u8> = (0..50_000).map(|i| ((i * 7 + i / 11) % 256) as u8).collect();
        round_trip(&input);
    }

    #[test]
    fn test_short_blocks() {
        round_trip(b"a");
        round_trip(b"ab");
        round_trip(b"abcabc");
        round_trip(&[0u8; 11]);
    }
}
