//! Linear-interpolation resampling

use crate::{Error, Result};

/// Resample `input` from `sr_in` to `sr_out` using linear interpolation.
///
/// Output length is `floor(len * sr_out / sr_in)`; the last output sample
/// clamps to the final input sample. Equal rates return a copy.
///
/// # Errors
///
/// Returns error if either sample rate is zero.
pub fn resample(input: &[f32], sr_in: u32, sr_out: u32) -> Result<Vec<f32>> {
    if sr_in == 0 || sr_out == 0 {
        return Err(Error::Decoder(format!(
            "invalid sample rates: input={sr_in}, output={sr_out}"
        )));
    }

    if input.is_empty() {
        return Ok(Vec::new());
    }

    if sr_in == sr_out {
        return Ok(input.to_vec());
    }

    let out_len = (input.len() as u64 * u64::from(sr_out) / u64::from(sr_in)) as usize;
    let ratio = f64::from(sr_in) / f64::from(sr_out);
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let index = pos as usize;
        let fraction = (pos - index as f64) as f32;

        let sample = if index + 1 < input.len() {
            input[index] + fraction * (input[index + 1] - input[index])
        } else {
            input[input.len() - 1]
        };

        output.push(sample);
    }

    tracing::trace!(
        from = sr_in,
        to = sr_out,
        in_samples = input.len(),
        out_samples = output.len(),
        "resampled"
    );

    Ok(output)
}
