use lewton::inside_ogg::OggStreamReader;
use log::debug;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wav decode error: {0}")]
    Wav(#[from] hound::Error),
    #[error("ogg vorbis decode error: {0}")]
    Vorbis(#[from] lewton::VorbisError),
    #[error("unsupported audio format: {0}")]
    Unsupported(String),
    #[error("audio stream contains no samples")]
    Empty,
}

/// A fully decoded song held in memory as interleaved `f32` in [-1, 1].
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl DecodedAudio {
    #[inline(always)]
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f32 / self.sample_rate as f32
    }

    /// Averages all channels into one.
    pub fn to_mono(&self) -> Vec<f32> {
        let ch = self.channels.max(1) as usize;
        if ch == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks_exact(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    }
}

/// Decodes a `.wav` or `.ogg` file, chosen by extension.
pub fn decode_file(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let audio = match ext.as_str() {
        "wav" | "wave" => decode_wav(path)?,
        "ogg" | "oga" => decode_ogg(path)?,
        other => return Err(DecodeError::Unsupported(other.to_string())),
    };

    if audio.samples.is_empty() {
        return Err(DecodeError::Empty);
    }
    debug!(
        "Decoded '{}': {} Hz, {} ch, {:.2}s",
        path.display(),
        audio.sample_rate,
        audio.channels,
        audio.duration_seconds()
    );
    Ok(audio)
}

fn decode_wav(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|x| x as f32 / max))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(DecodedAudio {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    })
}

fn decode_ogg(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let file = File::open(path)?;
    let mut ogg = OggStreamReader::new(BufReader::new(file))?;
    let channels = ogg.ident_hdr.audio_channels as u16;
    let sample_rate = ogg.ident_hdr.audio_sample_rate;

    let mut samples = Vec::new();
    while let Some(pkt) = ogg.read_dec_packet_itl()? {
        samples.extend(pkt.iter().map(|&s| s as f32 / 32768.0));
    }

    Ok(DecodedAudio { samples, channels, sample_rate })
}
