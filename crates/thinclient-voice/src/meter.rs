//! Audio level metering.
//!
//! The level of a chunk is its mean absolute 16-bit sample magnitude,
//! normalized against slowly adapting lower and upper bounds so the meter
//! follows ambient volume. Every non-finite intermediate yields 0.

const WAV_HEADER_LEN: usize = 44;
const BOUND_STEP: f64 = 0.01;
const MIN_SPREAD: f64 = 0.001;
const FULL_SCALE: f64 = 32_768.0;

/// Drop a canonical 44-byte `RIFF`/`WAVE` header if present.
pub fn strip_wav_header(data: &[u8]) -> &[u8] {
    if data.len() >= WAV_HEADER_LEN && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        &data[WAV_HEADER_LEN..]
    } else {
        data
    }
}

/// Mean absolute magnitude of little-endian `i16` samples, in `[0, 1]`.
///
/// A trailing odd byte is ignored. `None` when there are no samples.
#[allow(clippy::cast_precision_loss)]
pub fn mean_magnitude(pcm: &[u8]) -> Option<f64> {
    let samples = pcm.chunks_exact(2);
    let count = samples.len();
    if count == 0 {
        return None;
    }
    let sum: u64 = samples
        .map(|pair| u64::from(i16::from_le_bytes([pair[0], pair[1]]).unsigned_abs()))
        .sum();
    Some(sum as f64 / count as f64 / FULL_SCALE)
}

/// Adaptive level meter. One per audio session.
#[derive(Clone, Debug)]
pub struct LevelMeter {
    lower: f64,
    upper: f64,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelMeter {
    /// A meter with no history.
    pub fn new() -> Self {
        Self {
            lower: f64::INFINITY,
            upper: f64::NEG_INFINITY,
        }
    }

    /// Normalized level of one chunk of raw PCM, in `[0, 1]`.
    pub fn analyze(&mut self, pcm: &[u8]) -> f64 {
        let Some(avg) = mean_magnitude(pcm) else {
            return 0.0;
        };
        if !avg.is_finite() {
            return 0.0;
        }

        if avg < self.lower {
            self.lower = avg;
        }
        if avg > self.upper {
            self.upper = avg;
        }
        self.lower += (avg - self.lower) * BOUND_STEP;
        self.upper += (avg - self.upper) * BOUND_STEP;
        if self.upper - self.lower < MIN_SPREAD {
            self.upper = self.lower + MIN_SPREAD;
        }

        let spread = self.upper - self.lower;
        if !spread.is_finite() || spread <= 0.0 {
            return 0.0;
        }
        let normalized = (avg - self.lower) / spread;
        if normalized.is_finite() {
            normalized.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Convenience: strip a WAV header, then [`analyze`](Self::analyze).
    pub fn analyze_chunk(&mut self, chunk: &[u8]) -> f64 {
        self.analyze(strip_wav_header(chunk))
    }
}
