//! Modem session: configuration, encoding and streaming decode
//!
//! A session is created empty, configured with [`Session::init`] and torn
//! down with [`Session::close`]. Every operation on an unconfigured session
//! fails with [`ModemError::NotInitialized`].

use std::collections::VecDeque;

use log::{debug, info};

use crate::config::ModemConfig;
use crate::detector::{DecodedFrame, Detector};
use crate::error::{ModemError, Result};
use crate::framing::FrameBuilder;
use crate::pcm::{self, SampleReader};
use crate::protocol::ProtocolId;
use crate::symbol_codec::SymbolCodec;
use crate::synth::{self, Synthesizer};

/// Decoder counters since the session was configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Stream samples accepted by `feed`
    pub samples_consumed: u64,
    /// Payloads delivered to the caller
    pub frames_decoded: u64,
    /// Frame candidates dropped after a lock (bad CRC, missing postamble, ...)
    pub frames_rejected: u64,
    /// Payloads withheld by the duplicate window
    pub duplicates_suppressed: u64,
}

struct Active {
    config: ModemConfig,
    reader: SampleReader,
    detectors: Vec<Detector>,
    pending: VecDeque<Vec<u8>>,
    samples_consumed: u64,
    frames_decoded: u64,
    duplicates_suppressed: u64,
    last_delivered: Option<(Vec<u8>, u64)>,
}

impl Active {
    fn new(config: ModemConfig) -> Self {
        let detectors: Vec<Detector> = config
            .rx_protocols()
            .into_iter()
            .map(|protocol| Detector::new(protocol.descriptor(), config.payload_ceiling, config.detection_threshold))
            .collect();
        Self {
            reader: SampleReader::new(config.sample_format),
            detectors,
            pending: VecDeque::new(),
            samples_consumed: 0,
            frames_decoded: 0,
            duplicates_suppressed: 0,
            last_delivered: None,
            config,
        }
    }

    fn ingest(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        self.samples_consumed += samples.len() as u64;

        let mut completed: Vec<DecodedFrame> = Vec::new();
        for detector in &mut self.detectors {
            detector.push_samples(samples);
            while let Some(frame) = detector.poll() {
                completed.push(frame);
            }
        }

        // Stream order across protocols; registry order breaks ties
        completed.sort_by_key(|frame| (frame.end, frame.protocol));
        for frame in completed {
            self.deliver(frame);
        }
    }

    fn deliver(&mut self, frame: DecodedFrame) {
        if let (Some(window), Some((previous, previous_end))) =
            (self.config.dedup_window_samples(), self.last_delivered.as_ref())
        {
            if *previous == frame.payload && frame.end.saturating_sub(*previous_end) <= window {
                debug!("{}: suppressing repeated payload ending at sample {}", frame.protocol, frame.end);
                self.duplicates_suppressed += 1;
                return;
            }
        }

        info!("{}: received {} byte payload", frame.protocol, frame.payload.len());
        self.frames_decoded += 1;
        self.last_delivered = Some((frame.payload.clone(), frame.end));
        self.pending.push_back(frame.payload);
    }

    fn stats(&self) -> DecodeStats {
        DecodeStats {
            samples_consumed: self.samples_consumed,
            frames_decoded: self.frames_decoded,
            frames_rejected: self.detectors.iter().map(|d| d.stats().frames_rejected).sum(),
            duplicates_suppressed: self.duplicates_suppressed,
        }
    }
}

pub struct Session {
    active: Option<Active>,
}

impl Session {
    /// An unconfigured session
    pub fn new() -> Self {
        Self { active: None }
    }

    pub fn with_config(config: ModemConfig) -> Result<Self> {
        let mut session = Self::new();
        session.init(config)?;
        Ok(session)
    }

    /// Validate and apply a configuration, discarding any previous state.
    /// On error the session keeps whatever state it had before.
    pub fn init(&mut self, config: ModemConfig) -> Result<()> {
        config.validate()?;
        debug!(
            "session configured: mode {}, {} Hz, {} samples, {} decoders",
            config.mode,
            config.sample_rate,
            config.sample_format,
            config.rx_protocols().len()
        );
        self.active = Some(Active::new(config));
        Ok(())
    }

    /// Release all decoder state. Closing an unconfigured session is a no-op.
    pub fn close(&mut self) {
        if self.active.take().is_some() {
            debug!("session closed");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    fn active(&self) -> Result<&Active> {
        self.active.as_ref().ok_or(ModemError::NotInitialized)
    }

    fn active_mut(&mut self) -> Result<&mut Active> {
        self.active.as_mut().ok_or(ModemError::NotInitialized)
    }

    pub fn config(&self) -> Result<&ModemConfig> {
        Ok(&self.active()?.config)
    }

    pub fn stats(&self) -> Result<DecodeStats> {
        Ok(self.active()?.stats())
    }

    /// Abandon any partially received frame and queued payloads while keeping
    /// the configuration. Stream positions restart at zero.
    pub fn reset(&mut self) -> Result<()> {
        let config = self.active()?.config.clone();
        self.active = Some(Active::new(config));
        Ok(())
    }

    fn frame_builder(&self, protocol: ProtocolId) -> Result<(FrameBuilder, Synthesizer)> {
        let config = &self.active()?.config;
        let descriptor = config.check_protocol(protocol)?;
        Ok((
            FrameBuilder::new(SymbolCodec::new(descriptor, config.payload_ceiling)),
            Synthesizer::new(descriptor, config.sample_rate),
        ))
    }

    /// Exact byte length `encode` will produce for this payload and protocol.
    pub fn query_size(&self, payload: &[u8], protocol: ProtocolId) -> Result<usize> {
        let (builder, synth) = self.frame_builder(protocol)?;
        let ceiling = self.active()?.config.payload_ceiling;
        if payload.len() > ceiling {
            return Err(ModemError::InvalidPayloadLength {
                len: payload.len(),
                max: ceiling,
            });
        }
        let samples = synth.sample_count(builder.frame_symbol_count(payload.len()));
        let size = pcm::encoded_len(samples, self.active()?.config.sample_format);
        if size == 0 {
            return Err(ModemError::SynthesisFailure("empty waveform".to_string()));
        }
        Ok(size)
    }

    /// Render a payload as float samples in [-1, 1].
    pub fn encode_samples(&self, payload: &[u8], protocol: ProtocolId, volume: u8) -> Result<Vec<f32>> {
        synth::volume_to_amplitude(volume)?;
        let (builder, synth) = self.frame_builder(protocol)?;
        let frame = builder.build(payload)?;
        let samples = synth.synthesize(&frame.symbols(), volume)?;
        debug!(
            "{}: encoded {} bytes into {} symbols ({:.2} s)",
            protocol,
            payload.len(),
            frame.symbol_count(),
            synth.duration(frame.symbol_count()).as_secs_f32()
        );
        Ok(samples)
    }

    /// Render a payload as PCM bytes in the configured sample format.
    pub fn encode(&self, payload: &[u8], protocol: ProtocolId, volume: u8) -> Result<Vec<u8>> {
        let expected = self.query_size(payload, protocol)?;
        let samples = self.encode_samples(payload, protocol, volume)?;
        let bytes = pcm::encode_samples(&samples, self.active()?.config.sample_format);
        if bytes.len() != expected {
            return Err(ModemError::SynthesisFailure(format!(
                "rendered {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }
        Ok(bytes)
    }

    /// Render into a caller buffer of at least `query_size` bytes, returning
    /// the bytes written.
    pub fn render_into(&self, payload: &[u8], protocol: ProtocolId, volume: u8, out: &mut [u8]) -> Result<usize> {
        let expected = self.query_size(payload, protocol)?;
        if out.len() < expected {
            return Err(ModemError::SynthesisFailure(format!(
                "output buffer holds {} bytes, waveform needs {}",
                out.len(),
                expected
            )));
        }
        let samples = self.encode_samples(payload, protocol, volume)?;
        Ok(pcm::write_samples(&samples, self.active()?.config.sample_format, out))
    }

    /// Feed captured PCM bytes of any length. Returns the oldest payload
    /// completed so far; further payloads wait for `poll` or the next feed.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>> {
        let active = self.active_mut()?;
        let samples = active.reader.push(chunk);
        active.ingest(&samples);
        Ok(active.pending.pop_front())
    }

    /// Like [`feed`](Self::feed) for samples already converted to float.
    pub fn feed_samples(&mut self, samples: &[f32]) -> Result<Option<Vec<u8>>> {
        let active = self.active_mut()?;
        active.ingest(samples);
        Ok(active.pending.pop_front())
    }

    /// Next queued payload without feeding more audio
    pub fn poll(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.active_mut()?.pending.pop_front())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
