// ============================================================================
// INTEGRATION TESTS - PERFORMANCE NOTE
// ============================================================================
// Every test streams complete frames through one spectrum analysis per hop
// and per listening protocol. Sessions are configured for a single family
// where possible to keep debug builds quick; for the fastest run use:
//   cargo test -p datasound-core --test integration_test --release
// ============================================================================

use std::time::Duration;

use datasound_core::framing::FrameBuilder;
use datasound_core::pcm;
use datasound_core::symbol_codec::{Symbol, SymbolCodec};
use datasound_core::synth::Synthesizer;
use datasound_core::{
    ModemConfig, ModemError, OperatingMode, ProtocolFamily, ProtocolId, SampleFormat, Session,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn mode_for(protocol: ProtocolId) -> OperatingMode {
    match protocol.family() {
        ProtocolFamily::Audible => OperatingMode::Audible,
        ProtocolFamily::Ultrasound => OperatingMode::Ultrasound,
        ProtocolFamily::DualTone => OperatingMode::DualTone,
    }
}

fn session(mode: OperatingMode, format: SampleFormat) -> Session {
    Session::with_config(
        ModemConfig::default()
            .with_mode(mode)
            .with_sample_format(format),
    )
    .expect("valid configuration")
}

/// Feed `bytes` in slices of `chunk` bytes, then drain the queue.
fn decode_chunked(session: &mut Session, bytes: &[u8], chunk: usize) -> Vec<Vec<u8>> {
    let mut decoded = Vec::new();
    for piece in bytes.chunks(chunk.max(1)) {
        if let Some(payload) = session.feed(piece).expect("feed") {
            decoded.push(payload);
        }
    }
    while let Some(payload) = session.poll().expect("poll") {
        decoded.push(payload);
    }
    decoded
}

fn gaussian(len: usize, sigma: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, sigma).expect("valid sigma");
    (0..len).map(|_| normal.sample(&mut rng)).collect()
}

fn silence(samples: usize, format: SampleFormat) -> Vec<u8> {
    pcm::encode_samples(&vec![0.0; samples], format)
}

#[test]
fn test_round_trip_every_protocol() {
    let payload = b"datasound 01";

    for protocol in ProtocolId::ALL {
        let mode = mode_for(protocol);
        let encoder = session(mode, SampleFormat::I16);
        let bytes = encoder.encode(payload, protocol, 50).expect("encode");

        let mut whole = session(mode, SampleFormat::I16);
        assert_eq!(
            decode_chunked(&mut whole, &bytes, bytes.len()),
            vec![payload.to_vec()],
            "{protocol}: whole buffer"
        );

        let mut chunked = session(mode, SampleFormat::I16);
        assert_eq!(
            decode_chunked(&mut chunked, &bytes, 1001),
            vec![payload.to_vec()],
            "{protocol}: 1001-byte chunks"
        );
    }
}

#[test]
fn test_chunk_size_does_not_change_output() {
    let encoder = session(OperatingMode::Audible, SampleFormat::I16);
    let mut stream = encoder.encode(b"first frame", ProtocolId::AudibleFast, 50).unwrap();
    stream.extend(encoder.encode(b"second", ProtocolId::AudibleFastest, 50).unwrap());
    stream.extend(silence(9216, SampleFormat::I16));

    let expected = vec![b"first frame".to_vec(), b"second".to_vec()];
    for chunk in [stream.len(), 4096, 7, 1] {
        let mut decoder = session(OperatingMode::Audible, SampleFormat::I16);
        assert_eq!(decode_chunked(&mut decoder, &stream, chunk), expected, "chunk size {chunk}");
    }
}

#[test]
fn test_round_trip_every_sample_format() {
    let payload = b"\x00\x01\xfe\xff binary";
    for format in SampleFormat::ALL {
        let encoder = session(OperatingMode::Audible, format);
        let bytes = encoder.encode(payload, ProtocolId::AudibleFastest, 50).unwrap();
        assert_eq!(bytes.len() % format.bytes_per_sample(), 0);

        let mut decoder = session(OperatingMode::Audible, format);
        assert_eq!(decode_chunked(&mut decoder, &bytes, 999), vec![payload.to_vec()], "{format}");
    }
}

#[test]
fn test_amplitude_bound_every_format_and_volume() {
    let payload = b"amplitude";
    for format in SampleFormat::ALL {
        let encoder = session(OperatingMode::All, format);
        let tolerance = match format {
            SampleFormat::U8 | SampleFormat::I8 => 2.0 / 128.0,
            SampleFormat::U16 | SampleFormat::I16 => 2.0 / 32768.0,
            SampleFormat::F32 => 1e-6,
        };
        for volume in [0u8, 1, 25, 50, 99, 100] {
            for protocol in [ProtocolId::AudibleFastest, ProtocolId::DualToneFastest] {
                let floats = encoder.encode_samples(payload, protocol, volume).unwrap();
                let peak = floats.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
                assert!(
                    peak <= volume as f32 / 100.0 + 1e-6,
                    "{format} {protocol} volume {volume}: peak {peak}"
                );

                // Quantized output tracks the float waveform: nothing wrapped
                let decoded = pcm::decode_samples(&encoder.encode(payload, protocol, volume).unwrap(), format);
                assert_eq!(decoded.len(), floats.len());
                for (a, b) in floats.iter().zip(&decoded) {
                    assert!((a - b).abs() <= tolerance, "{format} volume {volume}: {a} vs {b}");
                }
            }
        }
    }
}

#[test]
fn test_size_query_matches_output() {
    let session = Session::with_config(ModemConfig::default().with_sample_format(SampleFormat::F32)).unwrap();
    for protocol in ProtocolId::ALL {
        for len in [0usize, 1, 2, 3, 17, 256] {
            let payload = vec![0xA5u8; len];
            let size = session.query_size(&payload, protocol).unwrap();
            assert!(size > 0);
            assert_eq!(size % 4, 0);
            if len <= 17 {
                assert_eq!(session.encode(&payload, protocol, 40).unwrap().len(), size, "{protocol} len {len}");
            }
        }
    }

    let payload = b"render into";
    let size = session.query_size(payload, ProtocolId::AudibleFast).unwrap();
    let mut buffer = vec![0u8; size + 16];
    assert_eq!(session.render_into(payload, ProtocolId::AudibleFast, 50, &mut buffer).unwrap(), size);
    assert_eq!(&buffer[..size], &session.encode(payload, ProtocolId::AudibleFast, 50).unwrap()[..]);

    let mut small = vec![0u8; size - 1];
    assert!(matches!(
        session.render_into(payload, ProtocolId::AudibleFast, 50, &mut small),
        Err(ModemError::SynthesisFailure(_))
    ));
    assert_eq!(
        session.query_size(&[0u8; 257], ProtocolId::AudibleFast),
        Err(ModemError::InvalidPayloadLength { len: 257, max: 256 })
    );
}

fn corrupted_frame(corrupt: impl Fn(&mut datasound_core::framing::Frame)) -> Vec<u8> {
    let descriptor = ProtocolId::AudibleNormal.descriptor();
    let mut frame = FrameBuilder::new(SymbolCodec::new(descriptor, 256))
        .build(b"corrupted payload")
        .unwrap();
    corrupt(&mut frame);
    let samples = Synthesizer::new(descriptor, 48000.0)
        .synthesize(&frame.symbols(), 50)
        .unwrap();
    pcm::encode_samples(&samples, SampleFormat::I16)
}

#[test]
fn test_resync_after_corrupted_body() {
    init_logging();
    let mut stream = corrupted_frame(|frame| {
        frame.body[1] = Symbol::new(frame.body[1].index() ^ 0xFFFFFF);
    });
    let encoder = session(OperatingMode::Audible, SampleFormat::I16);
    stream.extend(encoder.encode(b"clean payload", ProtocolId::AudibleNormal, 50).unwrap());

    let mut decoder = session(OperatingMode::Audible, SampleFormat::I16);
    assert_eq!(decode_chunked(&mut decoder, &stream, 4096), vec![b"clean payload".to_vec()]);
    assert!(decoder.stats().unwrap().frames_rejected >= 1);
}

#[test]
fn test_resync_after_corrupted_header() {
    init_logging();
    let mut stream = corrupted_frame(|frame| {
        frame.header_symbols[0] = Symbol::new(frame.header_symbols[0].index() ^ 0xFFFFFF);
    });
    let encoder = session(OperatingMode::Audible, SampleFormat::I16);
    stream.extend(encoder.encode(b"clean payload", ProtocolId::AudibleNormal, 50).unwrap());

    let mut decoder = session(OperatingMode::Audible, SampleFormat::I16);
    assert_eq!(decode_chunked(&mut decoder, &stream, 4096), vec![b"clean payload".to_vec()]);
}

#[test]
fn test_resync_after_truncated_frame() {
    init_logging();
    let encoder = session(OperatingMode::Audible, SampleFormat::I16);
    let cut = encoder.encode(b"cut short", ProtocolId::AudibleFast, 50).unwrap();
    let mut stream = cut[..cut.len() / 2].to_vec();
    stream.extend(silence(6144, SampleFormat::I16));
    stream.extend(encoder.encode(b"complete", ProtocolId::AudibleFast, 50).unwrap());

    let mut decoder = session(OperatingMode::Audible, SampleFormat::I16);
    assert_eq!(decode_chunked(&mut decoder, &stream, 2048), vec![b"complete".to_vec()]);
}

#[test]
fn test_idle_on_silence_and_noise() {
    let format = SampleFormat::I16;
    let mut stream = silence(48000, format);
    stream.extend(pcm::encode_samples(&gaussian(96000, 0.2, 11), format));

    let mut decoder = session(OperatingMode::All, format);
    for piece in stream.chunks(3000) {
        assert_eq!(decoder.feed(piece).unwrap(), None);
    }
    assert_eq!(decoder.poll().unwrap(), None);
    let stats = decoder.stats().unwrap();
    assert_eq!(stats.frames_decoded, 0);
    assert_eq!(stats.samples_consumed, 144000);
}

#[test]
fn test_noisy_offset_frame() {
    init_logging();
    let format = SampleFormat::F32;
    let encoder = session(OperatingMode::Audible, format);
    let frame = encoder.encode_samples(b"noisy channel", ProtocolId::AudibleFast, 50).unwrap();

    let mut samples = vec![0.0f32; 12345];
    samples.extend(frame);
    samples.extend(vec![0.0f32; 6144]);
    let n = samples.len();
    for (sample, noise) in samples.iter_mut().zip(gaussian(n, 0.05, 42)) {
        *sample += noise;
    }

    let mut decoder = session(OperatingMode::Audible, format);
    let bytes = pcm::encode_samples(&samples, format);
    assert_eq!(decode_chunked(&mut decoder, &bytes, 8000), vec![b"noisy channel".to_vec()]);
}

#[test]
fn test_clipped_audio() {
    let encoder = session(OperatingMode::Audible, SampleFormat::I16);
    let samples: Vec<f32> = encoder
        .encode_samples(b"clipped", ProtocolId::AudibleFast, 80)
        .unwrap()
        .into_iter()
        .map(|s| (s * 2.0).clamp(-1.0, 1.0))
        .collect();

    let mut decoder = session(OperatingMode::Audible, SampleFormat::I16);
    assert_eq!(decoder.feed_samples(&samples).unwrap(), Some(b"clipped".to_vec()));
}

#[test]
fn test_all_mode_decodes_each_family_in_order() {
    let encoder = session(OperatingMode::All, SampleFormat::I16);
    let mut stream = encoder.encode(b"audible", ProtocolId::AudibleFast, 50).unwrap();
    stream.extend(encoder.encode(b"dual", ProtocolId::DualToneFastest, 50).unwrap());
    stream.extend(encoder.encode(b"ultra", ProtocolId::UltrasoundFastest, 50).unwrap());
    stream.extend(silence(9216, SampleFormat::I16));

    let mut decoder = session(OperatingMode::All, SampleFormat::I16);
    assert_eq!(decoder.feed(&stream).unwrap(), Some(b"audible".to_vec()));
    assert_eq!(decoder.poll().unwrap(), Some(b"dual".to_vec()));
    assert_eq!(decoder.poll().unwrap(), Some(b"ultra".to_vec()));
    assert_eq!(decoder.poll().unwrap(), None);
}

#[test]
fn test_duplicate_window() {
    let encoder = session(OperatingMode::Audible, SampleFormat::I16);
    let once = encoder.encode(b"ping", ProtocolId::AudibleFastest, 50).unwrap();
    let twice = [once.clone(), once].concat();

    // Back-to-back repeats end 0.704 s apart
    let config = ModemConfig::default().with_mode(OperatingMode::Audible);
    let mut strict = Session::with_config(config.clone().with_dedup_window(Some(Duration::from_secs(1)))).unwrap();
    assert_eq!(decode_chunked(&mut strict, &twice, 4096), vec![b"ping".to_vec()]);
    assert_eq!(strict.stats().unwrap().duplicates_suppressed, 1);

    let mut loose = Session::with_config(config.with_dedup_window(Some(Duration::from_millis(500)))).unwrap();
    assert_eq!(decode_chunked(&mut loose, &twice, 4096), vec![b"ping".to_vec(), b"ping".to_vec()]);
}

#[test]
fn test_round_trip_at_44100() {
    let config = ModemConfig::default()
        .with_mode(OperatingMode::Audible)
        .with_sample_rate(44100.0);
    let encoder = Session::with_config(config.clone()).unwrap();
    let bytes = encoder.encode(b"CD rate", ProtocolId::AudibleFast, 50).unwrap();

    let mut decoder = Session::with_config(config).unwrap();
    assert_eq!(decode_chunked(&mut decoder, &bytes, 4410), vec![b"CD rate".to_vec()]);
}

#[test]
fn test_empty_and_large_payloads() {
    let config = ModemConfig::default()
        .with_mode(OperatingMode::Audible)
        .with_payload_ceiling(1024);
    let encoder = Session::with_config(config.clone()).unwrap();
    let large: Vec<u8> = (0..400u32).map(|i| (i * 37 % 251) as u8).collect();

    let mut stream = encoder.encode(b"", ProtocolId::AudibleFastest, 50).unwrap();
    stream.extend(encoder.encode(&large, ProtocolId::AudibleFastest, 50).unwrap());

    let mut decoder = Session::with_config(config).unwrap();
    assert_eq!(decode_chunked(&mut decoder, &stream, 16384), vec![Vec::new(), large]);
}

#[test]
fn test_invalid_configurations() {
    assert!(matches!(SampleFormat::try_from(0), Err(ModemError::InvalidConfiguration(_))));

    let mut session = Session::new();
    for config in [
        ModemConfig::default().with_sample_rate(0.0),
        ModemConfig::default().with_payload_ceiling(0),
        ModemConfig::default().with_detection_threshold(0.0),
        ModemConfig::default()
            .with_mode(OperatingMode::Ultrasound)
            .with_sample_rate(22050.0),
    ] {
        assert!(matches!(session.init(config), Err(ModemError::InvalidConfiguration(_))));
        assert!(!session.is_initialized());
    }

    session
        .init(ModemConfig::default().with_sample_rate(22050.0))
        .unwrap();
    assert!(matches!(
        session.encode(b"high", ProtocolId::UltrasoundFast, 50),
        Err(ModemError::InvalidConfiguration(_))
    ));
    assert!(session.encode(b"low", ProtocolId::AudibleFast, 50).is_ok());
}

#[test]
fn test_lifecycle() {
    let mut session = Session::new();
    assert_eq!(session.feed(&[0u8; 64]), Err(ModemError::NotInitialized));

    session.init(ModemConfig::default().with_mode(OperatingMode::Audible)).unwrap();
    let bytes = session.encode(b"lifecycle", ProtocolId::AudibleFastest, 50).unwrap();
    session.close();
    assert_eq!(session.feed(&bytes), Err(ModemError::NotInitialized));
    assert_eq!(session.poll(), Err(ModemError::NotInitialized));

    session.init(ModemConfig::default().with_mode(OperatingMode::Audible)).unwrap();
    assert_eq!(session.feed(&bytes).unwrap(), Some(b"lifecycle".to_vec()));
}
