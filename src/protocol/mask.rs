//! Payload masking (RFC 6455 section 5.3).

/// XOR `data` with the repeating 4-byte `mask`.
///
/// Masking is an involution: applying the same key twice restores the input.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    apply_mask_at(data, mask, 0);
}

/// XOR `data` with `mask` as if `data` started `offset` bytes into the payload.
///
/// Used when a payload arrives in several reads.
pub fn apply_mask_at(data: &mut [u8], mask: [u8; 4], offset: usize) {
    let key = rotate(mask, offset);
    let word = u32::from_ne_bytes(key);

    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ word;
        chunk.copy_from_slice(&val.to_ne_bytes());
    }
    for (byte, k) in chunks.into_remainder().iter_mut().zip(key) {
        *byte ^= k;
    }
}

#[inline]
fn rotate(mask: [u8; 4], offset: usize) -> [u8; 4] {
    let s = offset % 4;
    [mask[s], mask[(s + 1) % 4], mask[(s + 2) % 4], mask[(s + 3) % 4]]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(data: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    #[test]
    fn test_masking_example_from_rfc() {
        // "Hello" masked with 0x37fa213d (RFC 6455 section 5.7)
        let mut data = b"Hello".to_vec();
        apply_mask(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }

    #[test]
    fn test_masking_reversible_all_cycle_offsets() {
        let mask = [0xde, 0xad, 0xbe, 0xef];
        for len in 0..260 {
            let original: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let mut data = original.clone();
            apply_mask(&mut data, mask);
            apply_mask(&mut data, mask);
            assert_eq!(data, original, "len {len}");
        }
    }

    #[test]
    fn test_masking_matches_bytewise_reference() {
        let mask = [0x01, 0x02, 0x03, 0x04];
        for len in [0, 1, 3, 4, 5, 17, 64] {
            let mut fast: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let mut slow = fast.clone();
            apply_mask(&mut fast, mask);
            reference(&mut slow, mask);
            assert_eq!(fast, slow);
        }
    }

    #[test]
    fn test_masking_split_reads() {
        let mask = [0x11, 0x22, 0x33, 0x44];
        let original: Vec<u8> = (0..23).collect();

        let mut whole = original.clone();
        apply_mask(&mut whole, mask);

        let mut split = original.clone();
        let (head, tail) = split.split_at_mut(6);
        apply_mask_at(head, mask, 0);
        apply_mask_at(tail, mask, 6);
        assert_eq!(split, whole);
    }
}
