use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Args, Parser, Subcommand};
use datasound_core::resample::{downmix, resample_linear};
use datasound_core::{ModemConfig, ModemError, OperatingMode, ProtocolId, SampleFormat, Session};
use hound::WavSpec;
use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

const DEFAULT_SAMPLE_RATE: f32 = 48000.0;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Modem(#[from] ModemError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported WAV file: {0}")]
    UnsupportedWav(String),

    #[error("No payload found in {0}")]
    NothingDecoded(String),
}

#[derive(Parser)]
#[command(name = "datasound")]
#[command(about = "Send short payloads over sound with multi-tone FSK")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct ModemArgs {
    /// Sample rate in Hz (decode: defaults to the WAV rate, resampling if it differs)
    #[arg(long)]
    sample_rate: Option<f32>,

    /// PCM sample format for raw audio: u8, i8, u16, i16, f32
    #[arg(long, default_value = "i16")]
    format: SampleFormat,

    /// Protocol families: audible, ultrasound, dual-tone, all
    #[arg(long, default_value = "all")]
    mode: OperatingMode,

    /// Largest payload in bytes
    #[arg(long, default_value_t = 256)]
    max_payload: usize,
}

impl ModemArgs {
    fn config(&self, sample_rate: f32) -> ModemConfig {
        ModemConfig::default()
            .with_mode(self.mode)
            .with_sample_rate(sample_rate)
            .with_sample_format(self.format)
            .with_payload_ceiling(self.max_payload)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a file or message to audio
    Encode {
        /// Input file, or the message itself with --text
        #[arg(value_name = "INPUT")]
        input: String,

        /// Output WAV file (raw PCM with --raw)
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Treat INPUT as a literal message
        #[arg(long)]
        text: bool,

        /// Protocol name or id (see `datasound protocols`)
        #[arg(short, long, default_value = "audible-fast")]
        protocol: ProtocolId,

        /// Volume, 0-100
        #[arg(short, long, default_value_t = 50)]
        volume: u8,

        /// Write raw PCM bytes in --format instead of WAV
        #[arg(long)]
        raw: bool,

        #[command(flatten)]
        modem: ModemArgs,
    },

    /// Decode every payload found in an audio file
    Decode {
        /// Input WAV file (raw PCM with --raw)
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Write the decoded payloads, concatenated, to this file
        #[arg(value_name = "OUTPUT.BIN")]
        output: Option<PathBuf>,

        /// Read raw PCM in --format at --sample-rate instead of WAV
        #[arg(long)]
        raw: bool,

        /// Samples (WAV) or bytes (raw) handed to the decoder per call
        #[arg(long, default_value_t = 4096)]
        chunk_size: usize,

        /// Print payloads as base64
        #[arg(long)]
        base64: bool,

        #[command(flatten)]
        modem: ModemArgs,
    },

    /// Print the encoded size of a payload without rendering it
    Size {
        /// Input file, or the message itself with --text
        #[arg(value_name = "INPUT")]
        input: String,

        /// Treat INPUT as a literal message
        #[arg(long)]
        text: bool,

        /// Protocol name or id
        #[arg(short, long, default_value = "audible-fast")]
        protocol: ProtocolId,

        #[command(flatten)]
        modem: ModemArgs,
    },

    /// List the available protocols
    Protocols {
        /// Sample rate used to report tone frequencies
        #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
        sample_rate: f32,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct ProtocolInfo {
    id: u8,
    name: &'static str,
    family: String,
    tones_per_symbol: usize,
    bytes_per_symbol: usize,
    symbol_ms: f32,
    low_hz: f32,
    high_hz: f32,
    redundancy: &'static str,
    payload_bytes_per_second: f32,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Encode {
            input,
            output,
            text,
            protocol,
            volume,
            raw,
            modem,
        } => encode_command(&input, text, &output, protocol, volume, raw, &modem),
        Commands::Decode {
            input,
            output,
            raw,
            chunk_size,
            base64,
            modem,
        } => decode_command(&input, output.as_deref(), raw, chunk_size, base64, &modem),
        Commands::Size {
            input,
            text,
            protocol,
            modem,
        } => size_command(&input, text, protocol, &modem),
        Commands::Protocols { sample_rate, json } => protocols_command(sample_rate, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn read_input(input: &str, text: bool) -> Result<Vec<u8>, CliError> {
    if text {
        return Ok(input.as_bytes().to_vec());
    }
    let data = std::fs::read(input)?;
    debug!("Read {} bytes from {}", data.len(), input);
    Ok(data)
}

fn encode_command(
    input: &str,
    text: bool,
    output_path: &Path,
    protocol: ProtocolId,
    volume: u8,
    raw: bool,
    modem: &ModemArgs,
) -> Result<(), CliError> {
    let data = read_input(input, text)?;
    let config = modem.config(modem.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE));
    let session = Session::with_config(config.clone())?;

    if raw {
        let bytes = session.encode(&data, protocol, volume)?;
        std::fs::write(output_path, &bytes)?;
        println!(
            "Encoded {} bytes with {} into {} bytes of {} PCM at {} Hz",
            data.len(),
            protocol,
            bytes.len(),
            config.sample_format,
            config.sample_rate
        );
        return Ok(());
    }

    let samples = session.encode_samples(&data, protocol, volume)?;
    write_wav(output_path, &samples, config.sample_rate, config.sample_format)?;
    println!(
        "Encoded {} bytes with {} into {} samples ({:.2} s)",
        data.len(),
        protocol,
        samples.len(),
        samples.len() as f32 / config.sample_rate
    );
    println!("Wrote {}", output_path.display());
    Ok(())
}

/// Write mono WAV at the bit depth closest to the sample format.
fn write_wav(path: &Path, samples: &[f32], sample_rate: f32, format: SampleFormat) -> Result<(), CliError> {
    let (bits_per_sample, sample_format) = match format {
        SampleFormat::U8 | SampleFormat::I8 => (8, hound::SampleFormat::Int),
        SampleFormat::U16 | SampleFormat::I16 => (16, hound::SampleFormat::Int),
        SampleFormat::F32 => (32, hound::SampleFormat::Float),
    };
    let spec = WavSpec {
        channels: 1,
        sample_rate: sample_rate.round() as u32,
        bits_per_sample,
        sample_format,
    };

    let file = File::create(path)?;
    let mut writer = hound::WavWriter::new(io::BufWriter::new(file), spec)?;
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        match bits_per_sample {
            8 => writer.write_sample((clamped * 127.0).round() as i8)?,
            16 => writer.write_sample((clamped * 32767.0).round() as i16)?,
            _ => writer.write_sample(clamped)?,
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Mono float samples and the sample rate of a WAV file.
fn read_wav(path: &Path) -> Result<(Vec<f32>, f32), CliError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    info!(
        "Read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (hound::SampleFormat::Int, bits @ 8..=32) => {
            let scale = 1.0 / (1u64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
        (format, bits) => {
            return Err(CliError::UnsupportedWav(format!("{bits}-bit {format:?} samples")));
        }
    };

    Ok((downmix(&interleaved, spec.channels as usize)?, spec.sample_rate as f32))
}

fn decode_command(
    input_path: &Path,
    output_path: Option<&Path>,
    raw: bool,
    chunk_size: usize,
    base64: bool,
    modem: &ModemArgs,
) -> Result<(), CliError> {
    let chunk_size = chunk_size.max(1);
    let mut payloads = Vec::new();

    let mut session = if raw {
        let bytes = std::fs::read(input_path)?;
        let mut session = Session::with_config(modem.config(modem.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)))?;
        for chunk in bytes.chunks(chunk_size) {
            payloads.extend(session.feed(chunk)?);
        }
        session
    } else {
        let (samples, wav_rate) = read_wav(input_path)?;
        let rate = modem.sample_rate.unwrap_or(wav_rate);
        let samples = if rate != wav_rate {
            info!("Resampling {} Hz to {} Hz", wav_rate, rate);
            resample_linear(&samples, wav_rate, rate)
        } else {
            samples
        };
        let mut session = Session::with_config(modem.config(rate))?;
        for chunk in samples.chunks(chunk_size) {
            payloads.extend(session.feed_samples(chunk)?);
        }
        session
    };

    while let Some(payload) = session.poll()? {
        payloads.push(payload);
    }
    let stats = session.stats()?;
    info!(
        "Decoded {} payloads from {} samples ({} rejected, {} duplicates)",
        stats.frames_decoded, stats.samples_consumed, stats.frames_rejected, stats.duplicates_suppressed
    );

    if payloads.is_empty() {
        return Err(CliError::NothingDecoded(input_path.display().to_string()));
    }

    for payload in &payloads {
        match std::str::from_utf8(payload) {
            Ok(text) if !base64 => println!("Decoded {} bytes: {}", payload.len(), text),
            _ => println!("Decoded {} bytes (base64): {}", payload.len(), BASE64.encode(payload)),
        }
    }

    if let Some(path) = output_path {
        std::fs::write(path, payloads.concat())?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn size_command(input: &str, text: bool, protocol: ProtocolId, modem: &ModemArgs) -> Result<(), CliError> {
    let data = read_input(input, text)?;
    let config = modem.config(modem.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE));
    let session = Session::with_config(config.clone())?;
    let size = session.query_size(&data, protocol)?;
    let samples = size / config.sample_format.bytes_per_sample();
    println!(
        "{} bytes of {} PCM ({} samples, {:.2} s at {} Hz)",
        size,
        config.sample_format,
        samples,
        samples as f32 / config.sample_rate,
        config.sample_rate
    );
    Ok(())
}

fn protocols_command(sample_rate: f32, json: bool) -> Result<(), CliError> {
    let infos: Vec<ProtocolInfo> = ProtocolId::ALL
        .iter()
        .map(|protocol| {
            let d = protocol.descriptor();
            let (low_hz, high_hz) = d.frequency_range(sample_rate);
            let symbol_secs = d.symbol_duration_secs(sample_rate);
            let payload_per_symbol = match d.redundancy {
                datasound_core::symbol_redundancy::Redundancy::None => d.bytes_per_symbol as f32,
                datasound_core::symbol_redundancy::Redundancy::Parity => d.bytes_per_symbol as f32 * 2.0 / 3.0,
            };
            ProtocolInfo {
                id: protocol.id(),
                name: d.name,
                family: d.family.to_string(),
                tones_per_symbol: d.bands(),
                bytes_per_symbol: d.bytes_per_symbol,
                symbol_ms: symbol_secs * 1000.0,
                low_hz,
                high_hz,
                redundancy: d.redundancy.name(),
                payload_bytes_per_second: payload_per_symbol / symbol_secs,
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    println!(
        "{:>2}  {:<20} {:>6} {:>9} {:>19} {:>8}  {}",
        "id", "name", "tones", "symbol", "band (Hz)", "B/s", "redundancy"
    );
    for info in &infos {
        println!(
            "{:>2}  {:<20} {:>6} {:>6.1} ms {:>8.0}-{:<10.0} {:>8.1}  {}",
            info.id,
            info.name,
            info.tones_per_symbol,
            info.symbol_ms,
            info.low_hz,
            info.high_hz,
            info.payload_bytes_per_second,
            info.redundancy
        );
    }
    Ok(())
}
