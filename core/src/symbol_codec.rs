//! Bytes to tone-index symbols and back
//!
//! Band 0 carries the high nibble of the first byte of a symbol, band 1 its
//! low nibble, and so on. A trailing partial symbol is zero padded.

use crate::error::{ModemError, Result};
use crate::protocol::ProtocolDescriptor;
use crate::symbol_redundancy::{self, Redundancy};

/// One symbol: the big-endian concatenation of its band nibbles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Symbol(u32);

impl Symbol {
    pub fn new(index: u32) -> Self {
        Symbol(index)
    }

    pub fn from_nibbles(nibbles: &[u8]) -> Self {
        Symbol(nibbles.iter().fold(0u32, |acc, &n| (acc << 4) | (n & 0x0F) as u32))
    }

    pub fn index(self) -> u32 {
        self.0
    }

    pub fn nibble(self, band: usize, bands: usize) -> u8 {
        ((self.0 >> (4 * (bands - 1 - band))) & 0x0F) as u8
    }

    pub fn nibbles(self, bands: usize) -> Vec<u8> {
        (0..bands).map(|band| self.nibble(band, bands)).collect()
    }
}

pub fn symbols_for_bytes(len: usize, bytes_per_symbol: usize) -> usize {
    len.div_ceil(bytes_per_symbol)
}

pub fn pack(bytes: &[u8], bytes_per_symbol: usize) -> Vec<Symbol> {
    bytes
        .chunks(bytes_per_symbol)
        .map(|chunk| {
            let index = (0..bytes_per_symbol).fold(0u32, |acc, i| {
                (acc << 8) | chunk.get(i).copied().unwrap_or(0) as u32
            });
            Symbol(index)
        })
        .collect()
}

pub fn unpack(symbols: &[Symbol], bytes_per_symbol: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(symbols.len() * bytes_per_symbol);
    for symbol in symbols {
        for i in (0..bytes_per_symbol).rev() {
            bytes.push((symbol.0 >> (8 * i)) as u8);
        }
    }
    bytes
}

/// Maps payloads of one protocol to body symbols.
#[derive(Debug, Clone, Copy)]
pub struct SymbolCodec {
    descriptor: &'static ProtocolDescriptor,
    ceiling: usize,
}

impl SymbolCodec {
    pub fn new(descriptor: &'static ProtocolDescriptor, ceiling: usize) -> Self {
        Self { descriptor, ceiling }
    }

    pub fn descriptor(&self) -> &'static ProtocolDescriptor {
        self.descriptor
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn alphabet_size(&self) -> u64 {
        self.descriptor.alphabet_size()
    }

    pub fn bits_per_symbol(&self) -> u32 {
        self.descriptor.bits_per_symbol()
    }

    pub fn redundancy(&self) -> Redundancy {
        self.descriptor.redundancy
    }

    pub fn body_symbol_count(&self, payload_len: usize) -> usize {
        symbols_for_bytes(
            self.redundancy().protected_len(payload_len),
            self.descriptor.bytes_per_symbol,
        )
    }

    pub fn payload_to_symbols(&self, payload: &[u8]) -> Result<Vec<Symbol>> {
        if payload.len() > self.ceiling {
            return Err(ModemError::InvalidPayloadLength {
                len: payload.len(),
                max: self.ceiling,
            });
        }
        let protected = symbol_redundancy::protect(payload, self.redundancy());
        Ok(pack(&protected, self.descriptor.bytes_per_symbol))
    }

    /// Inverse of [`payload_to_symbols`](Self::payload_to_symbols) for a
    /// payload of `payload_len` bytes.
    pub fn symbols_to_payload(&self, symbols: &[Symbol], payload_len: usize) -> Result<Vec<u8>> {
        if payload_len > self.ceiling {
            return Err(ModemError::InvalidPayloadLength {
                len: payload_len,
                max: self.ceiling,
            });
        }
        let bytes = unpack(symbols, self.descriptor.bytes_per_symbol);
        let protected_len = self.redundancy().protected_len(payload_len);
        if bytes.len() < protected_len {
            return Err(ModemError::InvalidPayloadLength {
                len: payload_len,
                max: bytes.len(),
            });
        }
        let mut recovered = symbol_redundancy::recover(&bytes[..protected_len], self.redundancy());
        recovered.data.truncate(payload_len);
        Ok(recovered.data)
    }
}
