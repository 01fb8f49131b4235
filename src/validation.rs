//! Cross-module validation of the full container.
//!
//! Exercises every (transform, entropy coder) pair through the stream
//! engine, the self-description guarantees of the header, checksum-based
//! corruption detection, and a set of fixed end-to-end scenarios with
//! deterministic stream layouts.

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::entropy::{
        ANS_TYPE, FPAQ_TYPE, HUFFMAN_TYPE, NONE_TYPE as E_NONE, PAQ_TYPE, RANGE_TYPE,
    };
    use crate::stream::{CompressedInputStream, CompressedOutputStream};
    use crate::transform::{
        BWTS_TYPE, BWT_TYPE, LZ4_TYPE, NONE_TYPE as T_NONE, RLT_TYPE, SNAPPY_TYPE,
    };
    use crate::KzError;

    const TRANSFORMS: &[u8] = &[T_NONE, BWT_TYPE, BWTS_TYPE, LZ4_TYPE, SNAPPY_TYPE, RLT_TYPE];
    const CODERS: &[u8] = &[E_NONE, HUFFMAN_TYPE, RANGE_TYPE, PAQ_TYPE, FPAQ_TYPE, ANS_TYPE];

    fn compress(
        input: &[u8],
        transform: u8,
        coder: u8,
        block_size: usize,
        checksum: bool,
    ) -> Vec<u8> {
        let mut out =
            CompressedOutputStream::new(Vec::new(), transform, coder, block_size, checksum)
                .unwrap();
        out.write(input).unwrap();
        out.close().unwrap();
        out.into_inner()
    }

    fn decompress(stream: &[u8]) -> Result<Vec<u8>, KzError> {
        let mut input = CompressedInputStream::new(stream)?;
        let mut output = Vec::new();
        let mut buf = vec![0u8; 16384];

        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            output.extend_from_slice(&buf[..n]);
        }

        Ok(output)
    }

    fn mixed_corpus(len: usize) -> Vec<u8> {
        // Text, runs, and structured binary, so every stage gets something
        // to chew on and something to skip.
        let mut v = Vec::with_capacity(len);
        let mut i = 0usize;
        while v.len() < len {
            match i % 4 {
                0 => v.extend(b"a stream is a header, blocks, and a terminator. "),
                1 => v.extend(vec![0u8; 97]),
                2 => v.extend((0..64).map(|k| (k * 3 + i) as u8)),
                _ => v.extend(vec![b'%'; 41]),
            }
            i += 1;
        }
        v.truncate(len);
        v
    }

    // -----------------------------------------------------------------
    // Round-trip identity across the full matrix
    // -----------------------------------------------------------------

    #[test]
    fn test_round_trip_matrix_small_blocks() {
        let input = mixed_corpus(8 * 1024);

        for &t in TRANSFORMS {
            for &c in CODERS {
                let stream = compress(&input, t, c, 1024, true);
                let output = decompress(&stream)
                    .unwrap_or_else(|e| panic!("t={} c={}: {}", t, c as char, e));
                assert_eq!(output, input, "t={} c={} round trip", t, c as char);
            }
        }
    }

    #[test]
    fn test_round_trip_matrix_large_blocks() {
        // Two blocks at a 100 KiB block size.
        let input = mixed_corpus(150 * 1024);

        for &t in TRANSFORMS {
            let stream = compress(&input, t, HUFFMAN_TYPE, 100 * 1024, true);
            let output = decompress(&stream).unwrap_or_else(|e| panic!("t={}: {}", t, e));
            assert_eq!(output, input, "t={} large-block round trip", t);
        }
    }

    #[test]
    fn test_round_trip_exact_block_multiples() {
        // Input length exactly equal to, and one off from, block multiples.
        for len in [1024usize, 2048, 1023, 1025, 4096] {
            let input = mixed_corpus(len);
            let stream = compress(&input, BWT_TYPE, RANGE_TYPE, 1024, true);
            assert_eq!(decompress(&stream).unwrap(), input, "len {}", len);
        }
    }

    #[test]
    fn test_round_trip_random_data_all_coders() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        let input: Vec<u8> = (0..6000).map(|_| rng.gen()).collect();

        for &c in CODERS {
            let stream = compress(&input, BWT_TYPE, c, 2048, true);
            assert_eq!(
                decompress(&stream).unwrap(),
                input,
                "c={} random data",
                c as char
            );
        }
    }

    // -----------------------------------------------------------------
    // Framing and self-description
    // -----------------------------------------------------------------

    #[test]
    fn test_chunked_writes_match_single_write() {
        let input = mixed_corpus(10_000);
        let whole = compress(&input, LZ4_TYPE, ANS_TYPE, 2048, true);

        for step in [1usize, 7, 255, 2048, 4099] {
            let mut out =
                CompressedOutputStream::new(Vec::new(), LZ4_TYPE, ANS_TYPE, 2048, true).unwrap();
            for chunk in input.chunks(step) {
                out.write(chunk).unwrap();
            }
            out.close().unwrap();
            assert_eq!(out.into_inner(), whole, "chunk step {}", step);
        }
    }

    #[test]
    fn test_decoder_needs_no_configuration() {
        // The decoder learns transform, coder, block size, and checksumming
        // from the header alone.
        let input = mixed_corpus(5000);

        for &(t, c, bs, ck) in &[
            (BWT_TYPE, HUFFMAN_TYPE, 1024usize, true),
            (SNAPPY_TYPE, RANGE_TYPE, 4096, false),
            (RLT_TYPE, FPAQ_TYPE, 2048, true),
        ] {
            let stream = compress(&input, t, c, bs, ck);
            assert_eq!(decompress(&stream).unwrap(), input);
        }
    }

    // -----------------------------------------------------------------
    // Transform skip behavior
    // -----------------------------------------------------------------

    #[test]
    fn test_random_blocks_all_carry_skip_flag() {
        // Incompressible data: every non-small block must take the skip
        // path and store its bytes verbatim. With the null coder the layout
        // is fully predictable: [mode][len:3][cksum:4][payload] per block.
        let mut rng = StdRng::seed_from_u64(42);
        let block = 64 * 1024;
        let input: Vec<u8> = (0..2 * block).map(|_| rng.gen()).collect();

        let stream = compress(&input, BWT_TYPE, E_NONE, block, true);

        let frame = 1 + 3 + 4 + block;
        let mode0 = stream[10];
        let mode1 = stream[10 + frame];
        assert_eq!(mode0 & 0x80, 0);
        assert_ne!(mode0 & 0x40, 0, "first block not skipped");
        assert_ne!(mode1 & 0x40, 0, "second block not skipped");

        // Skipped payloads are the raw input bytes.
        assert_eq!(&stream[10 + 8..10 + 8 + 64], &input[..64]);
        assert_eq!(decompress(&stream).unwrap(), input);
    }

    // -----------------------------------------------------------------
    // Checksum corruption detection
    // -----------------------------------------------------------------

    #[test]
    fn test_random_bit_flips_are_caught() {
        let input = mixed_corpus(4000);
        let stream = compress(&input, BWT_TYPE, HUFFMAN_TYPE, 4096, true);

        // Flip bits inside the block frame (past the stream header, clear of
        // the end marker); decoding must never silently return wrong data.
        let mut rng = StdRng::seed_from_u64(7);
        let mut failures = 0usize;

        for _ in 0..100 {
            let mut corrupt = stream.clone();
            let byte = rng.gen_range(11..stream.len() - 2);
            let bit = rng.gen_range(0..8);
            corrupt[byte] ^= 1 << bit;

            match decompress(&corrupt) {
                Ok(output) => assert_eq!(output, input, "silent corruption at byte {}", byte),
                Err(_) => failures += 1,
            }
        }

        assert!(failures >= 90, "only {} of 100 flips were caught", failures);
    }

    #[test]
    fn test_checksum_field_corruption_is_checksum_error() {
        let input = mixed_corpus(2000);
        let stream = compress(&input, RLT_TYPE, RANGE_TYPE, 4096, true);

        // Offsets 10..13 are mode + 2-byte length; 13..17 is the checksum.
        let mut corrupt = stream.clone();
        corrupt[14] ^= 0xFF;

        assert!(matches!(
            decompress(&corrupt),
            Err(KzError::Checksum { .. })
        ));
    }

    // -----------------------------------------------------------------
    // Fixed end-to-end scenarios
    // -----------------------------------------------------------------

    #[test]
    fn test_scenario_mississippi() {
        // 11 bytes travel as a small block: header + mode + raw + marker.
        let input = b"mississippi";
        let stream = compress(input, BWT_TYPE, HUFFMAN_TYPE, 1024, true);
        assert_eq!(stream.len(), 10 + 1 + 11 + 1);
        assert_eq!(stream[10], 0x80 | 11);
        assert_eq!(&stream[11..22], input);
        assert_eq!(decompress(&stream).unwrap(), input);
    }

    #[test]
    fn test_scenario_three_hundred_thousand_zeros() {
        let input = vec![0u8; 300_000];
        let stream = compress(&input, BWT_TYPE, HUFFMAN_TYPE, 1024 * 1024, false);
        assert!(
            stream.len() < 200,
            "300k zeros compressed to {} bytes",
            stream.len()
        );
        assert_eq!(decompress(&stream).unwrap(), input);
    }

    #[test]
    fn test_scenario_byte_ramp_rle_range() {
        let mut input = Vec::new();
        for _ in 0..4 {
            input.extend(0..=255u8);
        }
        let stream = compress(&input, RLT_TYPE, RANGE_TYPE, 1024, true);
        assert_eq!(decompress(&stream).unwrap(), input);
    }

    #[test]
    fn test_scenario_corrupt_byte_never_decodes_wrong() {
        let mut input = Vec::new();
        for _ in 0..4 {
            input.extend(0..=255u8);
        }
        let stream = compress(&input, RLT_TYPE, RANGE_TYPE, 1024, true);

        let mut corrupt = stream.clone();
        corrupt[10 + 5] ^= 0x01;

        match decompress(&corrupt) {
            Err(KzError::Checksum { .. }) | Err(KzError::Format(_)) | Err(KzError::Decode(_))
            | Err(KzError::Io(_)) => {}
            Ok(output) => panic!(
                "corrupted stream decoded {} bytes without an error",
                output.len()
            ),
            Err(e) => panic!("unexpected error kind: {}", e),
        }
    }

    #[test]
    fn test_scenario_single_byte_layout() {
        let stream = compress(&[0x41], BWT_TYPE, HUFFMAN_TYPE, 1024, false);
        assert_eq!(&stream[10..], &[0x81, 0x41, 0x80]);
        assert_eq!(decompress(&stream).unwrap(), vec![0x41]);
    }

    #[test]
    fn test_streams_with_and_without_checksums_differ_per_block() {
        let input = mixed_corpus(3000);
        let with = compress(&input, LZ4_TYPE, HUFFMAN_TYPE, 1024, true);
        let without = compress(&input, LZ4_TYPE, HUFFMAN_TYPE, 1024, false);
        // 4 extra bytes per non-small block.
        assert!(with.len() > without.len());
        assert_eq!(decompress(&with).unwrap(), input);
        assert_eq!(decompress(&without).unwrap(), input);
    }
}
