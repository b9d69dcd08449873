//! Streaming frame detector for one protocol
//!
//! Analysis windows are one symbol long and start on a grid of `L / 8` hops
//! anchored at stream sample 0, so what is decoded does not depend on how the
//! input was split into chunks.
//!
//! While idle, every hop is scored against the preamble using the analyses
//! exactly one symbol apart. The best scoring hop wins once the scan has moved
//! half a symbol past it; from then on only symbol-aligned windows are read.
//! A failed frame rewinds the scan to the symbol after the preamble.

use std::collections::VecDeque;
use std::ops::Range;

use log::{debug, trace, warn};

use crate::error::FrameError;
use crate::framing::FrameParser;
use crate::protocol::{ProtocolDescriptor, ProtocolId};
use crate::spectrum::{BandEnergies, SpectrumAnalyzer};
use crate::symbol_codec::{Symbol, SymbolCodec};
use crate::HOPS_PER_SYMBOL;

/// A payload recovered from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub protocol: ProtocolId,
    pub payload: Vec<u8>,
    /// Stream sample where the preamble starts
    pub start: u64,
    /// Stream sample just past the postamble
    pub end: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorPhase {
    Idle,
    Synchronized,
    Receiving,
    Complete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub locks: u64,
    pub frames_decoded: u64,
    pub frames_rejected: u64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    position: u64,
    score: f32,
}

#[derive(Debug, Clone, Copy)]
struct Lock {
    preamble_start: u64,
    data_start: u64,
}

enum State {
    Idle {
        candidate: Option<Candidate>,
    },
    Synchronized,
    Receiving {
        body_left: usize,
        postamble_seen: usize,
        postamble_score: f32,
    },
    Complete(DecodedFrame),
}

pub struct Detector {
    descriptor: &'static ProtocolDescriptor,
    analyzer: SpectrumAnalyzer,
    parser: FrameParser,
    threshold: f32,
    symbol_len: usize,
    hop: usize,
    preamble: Vec<Symbol>,
    postamble: Vec<Symbol>,
    /// Retained samples, the first at stream position `buffer_start`
    buffer: Vec<f32>,
    buffer_start: u64,
    /// Start of the next analysis window
    cursor: u64,
    /// Idle analyses at consecutive hops, newest last
    history: VecDeque<(u64, BandEnergies)>,
    lock: Option<Lock>,
    state: State,
    stats: DetectorStats,
}

impl Detector {
    pub fn new(descriptor: &'static ProtocolDescriptor, payload_ceiling: usize, threshold: f32) -> Self {
        let symbol_len = descriptor.samples_per_symbol();
        Self {
            descriptor,
            analyzer: SpectrumAnalyzer::new(descriptor),
            parser: FrameParser::new(SymbolCodec::new(descriptor, payload_ceiling)),
            threshold,
            symbol_len,
            hop: symbol_len / HOPS_PER_SYMBOL,
            preamble: descriptor.preamble(),
            postamble: descriptor.postamble(),
            buffer: Vec::with_capacity(2 * symbol_len),
            buffer_start: 0,
            cursor: 0,
            history: VecDeque::with_capacity(Self::history_capacity(descriptor)),
            lock: None,
            state: State::Idle { candidate: None },
            stats: DetectorStats::default(),
        }
    }

    fn history_capacity(descriptor: &ProtocolDescriptor) -> usize {
        (descriptor.marker_symbols - 1) * HOPS_PER_SYMBOL + 1
    }

    pub fn protocol(&self) -> ProtocolId {
        self.descriptor.id
    }

    pub fn phase(&self) -> DetectorPhase {
        match self.state {
            State::Idle { .. } => DetectorPhase::Idle,
            State::Synchronized => DetectorPhase::Synchronized,
            State::Receiving { .. } => DetectorPhase::Receiving,
            State::Complete(_) => DetectorPhase::Complete,
        }
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
    }

    /// Stream position of the next analysis window
    pub fn position(&self) -> u64 {
        self.cursor
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(samples);
    }

    /// Run every analysis the buffered samples allow, stopping at the first
    /// completed frame.
    pub fn poll(&mut self) -> Option<DecodedFrame> {
        loop {
            if let State::Complete(_) = self.state {
                let finished = std::mem::replace(&mut self.state, State::Idle { candidate: None });
                self.trim();
                if let State::Complete(frame) = finished {
                    return Some(frame);
                }
            }
            if !self.step() {
                self.trim();
                return None;
            }
        }
    }

    fn window_range(&self, position: u64) -> Option<Range<usize>> {
        let start = usize::try_from(position.checked_sub(self.buffer_start)?).ok()?;
        let end = start + self.symbol_len;
        (end <= self.buffer.len()).then_some(start..end)
    }

    fn step(&mut self) -> bool {
        if let State::Complete(_) = self.state {
            return false;
        }
        let position = self.cursor;
        let Some(range) = self.window_range(position) else {
            return false;
        };

        let energies = match self.analyzer.analyze(&self.buffer[range]) {
            Ok(energies) => energies,
            Err(err) => {
                warn!("{}: analysis at sample {} failed: {}", self.descriptor.name, position, err);
                BandEnergies::silent(self.descriptor.bands())
            }
        };

        match self.state {
            State::Idle { candidate } => self.scan(position, energies, candidate),
            State::Synchronized => self.read_header(position, &energies),
            State::Receiving {
                body_left,
                postamble_seen,
                postamble_score,
            } => self.read_body(position, &energies, body_left, postamble_seen, postamble_score),
            State::Complete(_) => {}
        }
        true
    }

    fn scan(&mut self, position: u64, energies: BandEnergies, mut candidate: Option<Candidate>) {
        self.history.push_back((position, energies));
        while self.history.len() > Self::history_capacity(self.descriptor) {
            self.history.pop_front();
        }

        if let Some(score) = self.preamble_score(position) {
            if score >= self.threshold && candidate.map_or(true, |c| score > c.score) {
                trace!("{}: preamble candidate at {} (score {:.3})", self.descriptor.name, position, score);
                candidate = Some(Candidate { position, score });
            }
        }

        match candidate {
            Some(c) if position >= c.position + (self.symbol_len / 2) as u64 => self.synchronize(c),
            _ => {
                self.state = State::Idle { candidate };
                self.cursor = position + self.hop as u64;
            }
        }
    }

    /// Mean preamble score for a preamble whose last symbol starts at
    /// `position`, if every needed analysis is in the history.
    fn preamble_score(&self, position: u64) -> Option<f32> {
        let markers = self.preamble.len();
        let span = (markers - 1) * HOPS_PER_SYMBOL;
        if self.history.len() <= span {
            return None;
        }
        let newest = self.history.len() - 1;
        let mut total = 0.0;
        for (k, expected) in self.preamble.iter().enumerate() {
            let back = (markers - 1 - k) * HOPS_PER_SYMBOL;
            let (at, energies) = &self.history[newest - back];
            if *at + (back * self.hop) as u64 != position {
                return None;
            }
            total += energies.score(*expected);
        }
        Some(total / markers as f32)
    }

    fn synchronize(&mut self, candidate: Candidate) {
        let symbol_len = self.symbol_len as u64;
        let data_start = candidate.position + symbol_len;
        let preamble_start = candidate
            .position
            .saturating_sub(symbol_len * (self.preamble.len() as u64 - 1));
        debug!(
            "{}: preamble locked at sample {} (score {:.3})",
            self.descriptor.name, preamble_start, candidate.score
        );

        self.stats.locks += 1;
        self.lock = Some(Lock {
            preamble_start,
            data_start,
        });
        self.history.clear();
        self.parser.reset();
        self.state = State::Synchronized;
        self.cursor = data_start;
    }

    fn read_header(&mut self, position: u64, energies: &BandEnergies) {
        self.cursor = position + self.symbol_len as u64;
        match self.parser.push_header(energies.symbol()) {
            Ok(None) => {}
            Ok(Some(header)) => {
                trace!(
                    "{}: header ok, {} payload bytes",
                    self.descriptor.name,
                    header.payload_len
                );
                self.state = State::Receiving {
                    body_left: self.parser.body_symbols_expected(),
                    postamble_seen: 0,
                    postamble_score: 0.0,
                };
            }
            Err(err) => self.resync(err),
        }
    }

    fn read_body(
        &mut self,
        position: u64,
        energies: &BandEnergies,
        body_left: usize,
        postamble_seen: usize,
        postamble_score: f32,
    ) {
        let end = position + self.symbol_len as u64;
        self.cursor = end;

        if body_left > 0 {
            match self.parser.push_body(energies.symbol()) {
                Ok(_) => {
                    self.state = State::Receiving {
                        body_left: body_left - 1,
                        postamble_seen,
                        postamble_score,
                    }
                }
                Err(err) => self.resync(err),
            }
            return;
        }

        let postamble_score = postamble_score + energies.score(self.postamble[postamble_seen]);
        let postamble_seen = postamble_seen + 1;
        if postamble_seen < self.postamble.len() {
            self.state = State::Receiving {
                body_left,
                postamble_seen,
                postamble_score,
            };
            return;
        }

        let mean = postamble_score / self.postamble.len() as f32;
        if mean < self.threshold {
            self.resync(FrameError::PostambleNotFound);
            return;
        }
        match self.parser.finish() {
            Ok(payload) => self.complete(payload, end),
            Err(err) => self.resync(err),
        }
    }

    fn complete(&mut self, payload: Vec<u8>, end: u64) {
        let start = self.lock.map_or(end, |lock| lock.preamble_start);
        debug!(
            "{}: frame decoded, {} bytes over samples {}..{}",
            self.descriptor.name,
            payload.len(),
            start,
            end
        );
        self.stats.frames_decoded += 1;
        self.lock = None;
        self.parser.reset();
        self.history.clear();
        self.state = State::Complete(DecodedFrame {
            protocol: self.descriptor.id,
            payload,
            start,
            end,
        });
    }

    /// Drop the current frame and rescan from the symbol after its preamble.
    fn resync(&mut self, reason: FrameError) {
        let resume = self.lock.map_or(self.cursor, |lock| lock.data_start);
        debug!(
            "{}: dropping frame ({}), rescanning from sample {}",
            self.descriptor.name, reason, resume
        );
        self.stats.frames_rejected += 1;
        self.lock = None;
        self.parser.reset();
        self.history.clear();
        self.state = State::Idle { candidate: None };
        self.cursor = resume;
    }

    /// Release samples no future analysis or rewind can reach.
    fn trim(&mut self) {
        let keep = self.lock.map_or(self.cursor, |lock| lock.data_start.min(self.cursor));
        if keep <= self.buffer_start {
            return;
        }
        let drop = ((keep - self.buffer_start) as usize).min(self.buffer.len());
        if drop < self.hop && drop < self.buffer.len() {
            return;
        }
        self.buffer.drain(..drop);
        self.buffer_start += drop as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FrameBuilder;
    use crate::synth::Synthesizer;
    use crate::DEFAULT_DETECTION_THRESHOLD;

    fn render(protocol: ProtocolId, payload: &[u8]) -> Vec<f32> {
        let d = protocol.descriptor();
        let frame = FrameBuilder::new(SymbolCodec::new(d, 64)).build(payload).unwrap();
        Synthesizer::new(d, 48000.0).synthesize(&frame.symbols(), 50).unwrap()
    }

    fn detector(protocol: ProtocolId) -> Detector {
        Detector::new(protocol.descriptor(), 64, DEFAULT_DETECTION_THRESHOLD)
    }

    #[test]
    fn test_decodes_aligned_frame() {
        let samples = render(ProtocolId::AudibleFastest, b"detector");
        let mut det = detector(ProtocolId::AudibleFastest);
        det.push_samples(&samples);

        let frame = det.poll().expect("frame");
        assert_eq!(frame.payload, b"detector");
        assert_eq!(frame.protocol, ProtocolId::AudibleFastest);
        assert_eq!(frame.start, 0);
        assert_eq!(frame.end, samples.len() as u64);
        assert_eq!(det.phase(), DetectorPhase::Idle);
        assert_eq!(det.stats().frames_decoded, 1);
        assert!(det.poll().is_none());
    }

    #[test]
    fn test_phases_progress_with_input() {
        let samples = render(ProtocolId::DualToneFastest, b"ab");
        let symbol_len = ProtocolId::DualToneFastest.descriptor().samples_per_symbol();
        let mut det = detector(ProtocolId::DualToneFastest);

        // Seven of eight preamble symbols: nothing to lock on yet
        det.push_samples(&samples[..7 * symbol_len]);
        assert!(det.poll().is_none());
        assert_eq!(det.phase(), DetectorPhase::Idle);

        // Preamble plus the first header symbol
        det.push_samples(&samples[7 * symbol_len..9 * symbol_len]);
        assert!(det.poll().is_none());
        assert_eq!(det.phase(), DetectorPhase::Synchronized);

        // Header complete, body pending
        det.push_samples(&samples[9 * symbol_len..17 * symbol_len]);
        assert!(det.poll().is_none());
        assert_eq!(det.phase(), DetectorPhase::Receiving);

        det.push_samples(&samples[17 * symbol_len..]);
        assert_eq!(det.poll().map(|f| f.payload), Some(b"ab".to_vec()));
    }

    #[test]
    fn test_offset_frame_locks_to_best_hop() {
        let d = ProtocolId::AudibleFast.descriptor();
        let offset = 5 * d.samples_per_symbol() / 16 + 7;
        let mut samples = vec![0.0; offset];
        samples.extend(render(ProtocolId::AudibleFast, b"offset"));
        samples.extend(vec![0.0; d.samples_per_symbol()]);

        let mut det = detector(ProtocolId::AudibleFast);
        det.push_samples(&samples);
        let frame = det.poll().expect("frame");
        assert_eq!(frame.payload, b"offset");
        let hop = (d.samples_per_symbol() / HOPS_PER_SYMBOL) as u64;
        assert!(frame.start.abs_diff(offset as u64) <= hop, "start {}", frame.start);
    }

    #[test]
    fn test_buffer_is_trimmed_while_idle() {
        let d = ProtocolId::AudibleFastest.descriptor();
        let mut det = detector(ProtocolId::AudibleFastest);
        for _ in 0..50 {
            det.push_samples(&vec![0.0; 1000]);
            assert!(det.poll().is_none());
        }
        assert!(det.buffered() < 2 * d.samples_per_symbol());
        assert_eq!(det.stats(), DetectorStats::default());
    }

    #[test]
    fn test_ignores_other_protocol() {
        let samples = render(ProtocolId::AudibleFast, b"not for you");
        let mut det = detector(ProtocolId::AudibleFastest);
        det.push_samples(&samples);
        assert!(det.poll().is_none());
        assert_eq!(det.stats().frames_decoded, 0);
    }
}
