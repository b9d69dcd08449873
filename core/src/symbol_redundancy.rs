//! Nibble-level parity over GF(16)
//!
//! Every two data bytes (four nibbles) gain one parity byte holding two
//! check nibbles of a shortened Reed-Solomon code with generator roots
//! alpha and alpha^2. Any single bad nibble in a 3-byte group is corrected.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redundancy {
    None,
    Parity,
}

impl Redundancy {
    /// Length in bytes after protecting `len` data bytes
    pub fn protected_len(self, len: usize) -> usize {
        match self {
            Redundancy::None => len,
            Redundancy::Parity => len.div_ceil(2) * 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Redundancy::None => "none",
            Redundancy::Parity => "gf16-parity",
        }
    }
}

/// Data recovered from protected bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    pub data: Vec<u8>,
    /// Parity groups in which a nibble was repaired
    pub corrected: usize,
}

const GF16_EXP: [u8; 30] = [
    1, 2, 4, 8, 3, 6, 12, 11, 5, 10, 7, 14, 15, 13, 9, 1, 2, 4, 8, 3, 6, 12, 11, 5, 10, 7, 14, 15,
    13, 9,
];

const GF16_LOG: [i8; 16] = [-1, 0, 1, 4, 2, 8, 5, 10, 3, 14, 9, 7, 6, 13, 11, 12];
const RS_GEN_G1: u8 = 6; // alpha^1 + alpha^2
const RS_GEN_G0: u8 = 8; // alpha^1 * alpha^2

pub fn protect(data: &[u8], mode: Redundancy) -> Vec<u8> {
    match mode {
        Redundancy::None => data.to_vec(),
        Redundancy::Parity => {
            let mut output = Vec::with_capacity(mode.protected_len(data.len()));
            for pair in data.chunks(2) {
                let hi = pair[0];
                let lo = pair.get(1).copied().unwrap_or(0);
                let parity = parity_nibbles(&[hi >> 4, hi & 0x0F, lo >> 4, lo & 0x0F]);
                output.extend_from_slice(&[hi, lo, (parity[0] << 4) | parity[1]]);
            }
            output
        }
    }
}

/// Undo [`protect`]. With parity, a trailing partial group is ignored and the
/// result holds two bytes per complete group.
pub fn recover(bytes: &[u8], mode: Redundancy) -> Recovered {
    match mode {
        Redundancy::None => Recovered {
            data: bytes.to_vec(),
            corrected: 0,
        },
        Redundancy::Parity => {
            let mut data = Vec::with_capacity(bytes.len() / 3 * 2);
            let mut corrected = 0;
            for group in bytes.chunks_exact(3) {
                let mut nibbles = [
                    group[0] >> 4,
                    group[0] & 0x0F,
                    group[1] >> 4,
                    group[1] & 0x0F,
                    group[2] >> 4,
                    group[2] & 0x0F,
                ];
                if correct_single_nibble(&mut nibbles) {
                    corrected += 1;
                }
                data.push((nibbles[0] << 4) | nibbles[1]);
                data.push((nibbles[2] << 4) | nibbles[3]);
            }
            Recovered { data, corrected }
        }
    }
}

fn parity_nibbles(data: &[u8; 4]) -> [u8; 2] {
    let mut parity = [0u8; 2];
    for &symbol in data {
        let feedback = symbol ^ parity[0];
        parity[0] = parity[1] ^ gf16_mul(feedback, RS_GEN_G1);
        parity[1] = gf16_mul(feedback, RS_GEN_G0);
    }
    parity
}

/// Returns true when the group did not check and was rewritten.
fn correct_single_nibble(nibbles: &mut [u8; 6]) -> bool {
    let mut data = [nibbles[0], nibbles[1], nibbles[2], nibbles[3]];
    let parity = [nibbles[4], nibbles[5]];
    let expected = parity_nibbles(&data);

    if expected == parity {
        return false;
    }

    for idx in 0..4 {
        let original = data[idx];
        for candidate in 0..16 {
            if candidate == original {
                continue;
            }
            data[idx] = candidate;
            if parity_nibbles(&data) == parity {
                nibbles[..4].copy_from_slice(&data);
                return true;
            }
        }
        data[idx] = original;
    }

    // Damage confined to the parity nibbles; the data stands as received
    nibbles[4] = expected[0];
    nibbles[5] = expected[1];
    true
}

fn gf16_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let log_a = GF16_LOG[a as usize] as i32;
    let log_b = GF16_LOG[b as usize] as i32;
    GF16_EXP[((log_a + log_b) % 15) as usize]
}
