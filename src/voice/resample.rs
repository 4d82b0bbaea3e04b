//! Sample rate conversion between device and pipeline rates

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Requested input frames per resampler call; rubato may round it up
const CHUNK_SIZE: usize = 1024;

const SUB_CHUNKS: usize = 2;

fn new_resampler(from_rate: u32, to_rate: u32) -> Result<FftFixedIn<f64>> {
    FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))
}

/// Resample a whole mono clip
///
/// The output holds `len * to_rate / from_rate` samples, aligned with the
/// input (the resampler's delay is removed).
///
/// # Errors
///
/// Returns error if the resampler cannot be built for these rates
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = new_resampler(from_rate, to_rate)?;
    let expected = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let delay = resampler.output_delay();
    let chunk_size = resampler.input_frames_next();

    let mut input = samples.iter().map(|&s| f64::from(s));
    let mut output = Vec::with_capacity(expected + delay);

    while output.len() < expected + delay {
        // Zero-pad the tail so the last partial chunk and the delay drain out
        let mut chunk: Vec<f64> = input.by_ref().take(chunk_size).collect();
        chunk.resize(chunk_size, 0.0);

        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        if result[0].is_empty() {
            break;
        }
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}

/// Incremental resampler for a live capture stream
///
/// Input is buffered until a full chunk is available, so output lags input by
/// at most one chunk.
pub struct StreamResampler {
    resampler: FftFixedIn<f64>,
    pending: Vec<f64>,
}

impl StreamResampler {
    /// # Errors
    ///
    /// Returns error if the resampler cannot be built for these rates
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        Ok(Self {
            resampler: new_resampler(from_rate, to_rate)?,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
        })
    }

    /// Feed samples, returning whatever output is ready
    ///
    /// # Errors
    ///
    /// Returns error if a chunk fails to resample
    #[allow(clippy::cast_possible_truncation)]
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend(samples.iter().map(|&s| f64::from(s)));

        let mut output = Vec::new();
        let chunk_size = self.resampler.input_frames_next();
        while self.pending.len() >= chunk_size {
            let chunk: Vec<f64> = self.pending.drain(..chunk_size).collect();
            let result = self
                .resampler
                .process(&[chunk], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            output.extend(result[0].iter().map(|&s| s as f32));
        }

        Ok(output)
    }
}
