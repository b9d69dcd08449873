//! Frame layout
//!
//! ```text
//! preamble | header | body | postamble
//! ```
//!
//! The header is six bytes (protocol id, payload length, payload CRC-16 and a
//! CRC-8 over the first five bytes) and is always parity protected. The body
//! is the payload with the protocol's own redundancy.

use crate::error::{FrameError, Result};
use crate::protocol::ProtocolId;
use crate::symbol_codec::{self, Symbol, SymbolCodec};
use crate::symbol_redundancy::{self, Redundancy};

pub const HEADER_BYTES: usize = 6;
const HEADER_REDUNDANCY: Redundancy = Redundancy::Parity;

/// CRC-16-CCITT for payload integrity verification
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u32 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u32) << 8;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x10000 != 0 {
                crc ^= 0x1021;
            }
        }
    }
    (crc & 0xFFFF) as u16
}

/// CRC-8 with polynomial 0xD5
pub fn crc8(data: &[u8]) -> u8 {
    const POLYNOMIAL: u8 = 0xD5;
    let mut crc = 0u8;

    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub protocol: ProtocolId,
    pub payload_len: u16,
    pub payload_crc: u16,
}

impl FrameHeader {
    pub fn for_payload(protocol: ProtocolId, payload: &[u8]) -> Self {
        Self {
            protocol,
            payload_len: payload.len() as u16,
            payload_crc: crc16(payload),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_BYTES] {
        let mut header = [0u8; HEADER_BYTES];
        header[0] = self.protocol.id();
        header[1..3].copy_from_slice(&self.payload_len.to_be_bytes());
        header[3..5].copy_from_slice(&self.payload_crc.to_be_bytes());
        header[5] = crc8(&header[..5]);
        header
    }

    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, FrameError> {
        if data.len() < HEADER_BYTES {
            return Err(FrameError::InvalidFrameSize);
        }
        if crc8(&data[..5]) != data[5] {
            return Err(FrameError::HeaderCrcMismatch);
        }
        let protocol = ProtocolId::from_id(data[0]).ok_or(FrameError::UnknownProtocol(data[0]))?;
        Ok(Self {
            protocol,
            payload_len: u16::from_be_bytes([data[1], data[2]]),
            payload_crc: u16::from_be_bytes([data[3], data[4]]),
        })
    }
}

/// Symbols needed for the protected header of a protocol
pub fn header_symbol_count(bytes_per_symbol: usize) -> usize {
    symbol_codec::symbols_for_bytes(HEADER_REDUNDANCY.protected_len(HEADER_BYTES), bytes_per_symbol)
}

/// A complete frame, ready for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub preamble: Vec<Symbol>,
    pub header_symbols: Vec<Symbol>,
    pub body: Vec<Symbol>,
    pub postamble: Vec<Symbol>,
}

impl Frame {
    pub fn symbol_count(&self) -> usize {
        self.preamble.len() + self.header_symbols.len() + self.body.len() + self.postamble.len()
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols = Vec::with_capacity(self.symbol_count());
        symbols.extend_from_slice(&self.preamble);
        symbols.extend_from_slice(&self.header_symbols);
        symbols.extend_from_slice(&self.body);
        symbols.extend_from_slice(&self.postamble);
        symbols
    }
}

pub struct FrameBuilder {
    codec: SymbolCodec,
}

impl FrameBuilder {
    pub fn new(codec: SymbolCodec) -> Self {
        Self { codec }
    }

    pub fn frame_symbol_count(&self, payload_len: usize) -> usize {
        let descriptor = self.codec.descriptor();
        2 * descriptor.marker_symbols
            + header_symbol_count(descriptor.bytes_per_symbol)
            + self.codec.body_symbol_count(payload_len)
    }

    pub fn build(&self, payload: &[u8]) -> Result<Frame> {
        let descriptor = self.codec.descriptor();
        let body = self.codec.payload_to_symbols(payload)?;
        let header = FrameHeader::for_payload(descriptor.id, payload);
        let protected = symbol_redundancy::protect(&header.to_bytes(), HEADER_REDUNDANCY);
        Ok(Frame {
            header,
            preamble: descriptor.preamble(),
            header_symbols: symbol_codec::pack(&protected, descriptor.bytes_per_symbol),
            body,
            postamble: descriptor.postamble(),
        })
    }
}

/// Incremental parser for the symbols between preamble and postamble.
pub struct FrameParser {
    codec: SymbolCodec,
    header_len: usize,
    header_symbols: Vec<Symbol>,
    header: Option<FrameHeader>,
    body_len: usize,
    body: Vec<Symbol>,
}

impl FrameParser {
    pub fn new(codec: SymbolCodec) -> Self {
        Self {
            codec,
            header_len: header_symbol_count(codec.descriptor().bytes_per_symbol),
            header_symbols: Vec::new(),
            header: None,
            body_len: 0,
            body: Vec::new(),
        }
    }

    pub fn header(&self) -> Option<&FrameHeader> {
        self.header.as_ref()
    }

    pub fn body_symbols_expected(&self) -> usize {
        self.body_len
    }

    /// Feed one header symbol; yields the header once all of them are in.
    pub fn push_header(&mut self, symbol: Symbol) -> std::result::Result<Option<FrameHeader>, FrameError> {
        if self.header.is_some() {
            return Err(FrameError::InvalidFrameSize);
        }
        self.header_symbols.push(symbol);
        if self.header_symbols.len() < self.header_len {
            return Ok(None);
        }

        let bytes = symbol_codec::unpack(&self.header_symbols, self.codec.descriptor().bytes_per_symbol);
        let protected_len = HEADER_REDUNDANCY.protected_len(HEADER_BYTES);
        let recovered = symbol_redundancy::recover(&bytes[..protected_len], HEADER_REDUNDANCY);
        let header = FrameHeader::from_bytes(&recovered.data)?;

        let expected = self.codec.descriptor().id;
        if header.protocol != expected {
            return Err(FrameError::ProtocolMismatch {
                expected: expected.id(),
                found: header.protocol.id(),
            });
        }
        let len = header.payload_len as usize;
        if len > self.codec.ceiling() {
            return Err(FrameError::LengthOverCeiling {
                len,
                max: self.codec.ceiling(),
            });
        }

        self.body_len = self.codec.body_symbol_count(len);
        self.header = Some(header);
        Ok(Some(header))
    }

    /// Feed one body symbol; returns true once the body is complete.
    pub fn push_body(&mut self, symbol: Symbol) -> std::result::Result<bool, FrameError> {
        if self.header.is_none() || self.body.len() >= self.body_len {
            return Err(FrameError::InvalidFrameSize);
        }
        self.body.push(symbol);
        Ok(self.body.len() == self.body_len)
    }

    /// Recover the payload and check it against the header CRC.
    pub fn finish(&self) -> std::result::Result<Vec<u8>, FrameError> {
        let header = self.header.ok_or(FrameError::InvalidFrameSize)?;
        if self.body.len() != self.body_len {
            return Err(FrameError::InvalidFrameSize);
        }
        let payload = self
            .codec
            .symbols_to_payload(&self.body, header.payload_len as usize)
            .map_err(|_| FrameError::InvalidFrameSize)?;
        if crc16(&payload) != header.payload_crc {
            return Err(FrameError::PayloadCrcMismatch);
        }
        Ok(payload)
    }

    pub fn reset(&mut self) {
        self.header_symbols.clear();
        self.header = None;
        self.body_len = 0;
        self.body.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModemError;

    fn parse(parser: &mut FrameParser, frame: &Frame) -> std::result::Result<Vec<u8>, FrameError> {
        let mut header = None;
        for symbol in &frame.header_symbols {
            header = parser.push_header(*symbol)?;
        }
        assert!(header.is_some());
        for symbol in &frame.body {
            parser.push_body(*symbol)?;
        }
        parser.finish()
    }

    #[test]
    fn test_crc16_ccitt_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_header_layout() {
        let header = FrameHeader::for_payload(ProtocolId::DualToneFast, b"hello");
        let bytes = header.to_bytes();
        assert_eq!(bytes[0], 7);
        assert_eq!(&bytes[1..3], &[0, 5]);
        assert_eq!(u16::from_be_bytes([bytes[3], bytes[4]]), crc16(b"hello"));
        assert_eq!(FrameHeader::from_bytes(&bytes), Ok(header));

        let mut broken = bytes;
        broken[2] ^= 0x01;
        assert_eq!(FrameHeader::from_bytes(&broken), Err(FrameError::HeaderCrcMismatch));
    }

    #[test]
    fn test_header_symbol_counts() {
        assert_eq!(header_symbol_count(3), 3);
        assert_eq!(header_symbol_count(1), 9);
    }

    #[test]
    fn test_build_then_parse_every_protocol() {
        let payload = b"framing layer";
        for protocol in ProtocolId::ALL {
            let codec = SymbolCodec::new(protocol.descriptor(), 64);
            let builder = FrameBuilder::new(codec);
            let frame = builder.build(payload).unwrap();
            assert_eq!(frame.symbol_count(), builder.frame_symbol_count(payload.len()));
            assert_eq!(frame.symbols().len(), frame.symbol_count());

            let mut parser = FrameParser::new(codec);
            assert_eq!(parse(&mut parser, &frame).unwrap(), payload, "{protocol}");
        }
    }

    #[test]
    fn test_empty_payload_frame() {
        let codec = SymbolCodec::new(ProtocolId::AudibleFast.descriptor(), 64);
        let frame = FrameBuilder::new(codec).build(&[]).unwrap();
        assert!(frame.body.is_empty());

        let mut parser = FrameParser::new(codec);
        assert_eq!(parse(&mut parser, &frame).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let codec = SymbolCodec::new(ProtocolId::AudibleFast.descriptor(), 8);
        let result = FrameBuilder::new(codec).build(&[0u8; 9]);
        assert_eq!(result, Err(ModemError::InvalidPayloadLength { len: 9, max: 8 }));
    }

    #[test]
    fn test_header_from_other_protocol_rejected() {
        let fast = SymbolCodec::new(ProtocolId::AudibleFast.descriptor(), 64);
        let fastest = SymbolCodec::new(ProtocolId::AudibleFastest.descriptor(), 64);
        let frame = FrameBuilder::new(fastest).build(b"abc").unwrap();

        let mut parser = FrameParser::new(fast);
        let mut result = Ok(None);
        for symbol in &frame.header_symbols {
            result = parser.push_header(*symbol);
        }
        assert_eq!(result, Err(FrameError::ProtocolMismatch { expected: 1, found: 2 }));
    }

    #[test]
    fn test_header_over_ceiling_rejected() {
        let sender = SymbolCodec::new(ProtocolId::AudibleFast.descriptor(), 64);
        let receiver = SymbolCodec::new(ProtocolId::AudibleFast.descriptor(), 4);
        let frame = FrameBuilder::new(sender).build(b"too long").unwrap();

        let mut parser = FrameParser::new(receiver);
        let mut result = Ok(None);
        for symbol in &frame.header_symbols {
            result = parser.push_header(*symbol);
        }
        assert_eq!(result, Err(FrameError::LengthOverCeiling { len: 8, max: 4 }));
    }

    #[test]
    fn test_corrupted_body_fails_crc() {
        let codec = SymbolCodec::new(ProtocolId::AudibleNormal.descriptor(), 64);
        let mut frame = FrameBuilder::new(codec).build(b"no parity here").unwrap();
        frame.body[2] = Symbol::new(frame.body[2].index() ^ 0xFFFFFF);

        let mut parser = FrameParser::new(codec);
        assert_eq!(parse(&mut parser, &frame), Err(FrameError::PayloadCrcMismatch));

        parser.reset();
        assert!(parser.header().is_none());
    }

    #[test]
    fn test_header_survives_one_bad_nibble() {
        let codec = SymbolCodec::new(ProtocolId::UltrasoundFast.descriptor(), 64);
        let mut frame = FrameBuilder::new(codec).build(b"header parity").unwrap();
        frame.header_symbols[1] = Symbol::new(frame.header_symbols[1].index() ^ 0x0000F0);

        let mut parser = FrameParser::new(codec);
        assert_eq!(parse(&mut parser, &frame).unwrap(), b"header parity");
    }
}
