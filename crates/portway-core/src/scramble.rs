//! Reversible byte obfuscation keyed by connection id.
//!
//! XOR against a deterministic keystream derived from the cid. Applying the
//! transform twice with the same cid restores the input. This defends
//! against casual inspection only; it is not a cipher.

/// Obfuscate or restore `data` in place with the keystream for `cid`.
pub fn scramble(data: &mut [u8], cid: i32) {
    // Seed a xorshift64 stream from the cid; the |1 keeps the state
    // non-zero even for cid 0.
    let mut state = (cid as u32 as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
    for byte in data.iter_mut() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        *byte ^= (state >> 24) as u8;
    }
}

/// Convenience over [`scramble`] for owned buffers.
pub fn scrambled(mut data: Vec<u8>, cid: i32) -> Vec<u8> {
    scramble(&mut data, cid);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn involution() {
        for cid in [0, 1, 42, 0x7fff_ffff] {
            let original: Vec<u8> = (0u16..512).map(|i| (i % 251) as u8).collect();
            let mut data = original.clone();
            scramble(&mut data, cid);
            scramble(&mut data, cid);
            assert_eq!(data, original, "cid {cid}");
        }
    }

    #[test]
    fn changes_bytes() {
        for cid in [0, 1, 7, 1000, i32::MAX] {
            let original = vec![0u8; 64];
            let out = scrambled(original.clone(), cid);
            assert_ne!(out, original, "cid {cid} produced an identity keystream");
        }
    }

    #[test]
    fn distinct_cids_distinct_streams() {
        let data = vec![0u8; 64];
        let a = scrambled(data.clone(), 1);
        let b = scrambled(data, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_buffer() {
        let mut data: Vec<u8> = Vec::new();
        scramble(&mut data, 5);
        assert!(data.is_empty());
    }
}
