//! Output dropout.
//!
//! Applied once to a layer's final hidden sequence, never to the state that
//! feeds the next step.  With a noise source, each element is kept with
//! probability `1 - rate` (no rescale); without one, the sequence is scaled
//! by `1 - rate`, which is the expectation of the noisy path.

use std::fmt;

use ndarray::Array3;
use rand::{Rng, RngCore};
use rand_distr::Bernoulli;

use crate::error::{Result, RnnError};

/// Dropout settings for one forward pass.
pub struct Dropout<'r> {
    rate: f32,
    noise: Option<&'r mut dyn RngCore>,
}

impl<'r> Dropout<'r> {
    /// Deterministic rescale by `1 - rate`.
    pub fn deterministic(rate: f32) -> Result<Self> {
        check_rate(rate)?;
        Ok(Self { rate, noise: None })
    }

    /// Bernoulli keep-mask drawn from the caller's generator.
    pub fn with_noise(rate: f32, noise: &'r mut dyn RngCore) -> Result<Self> {
        check_rate(rate)?;
        Ok(Self {
            rate,
            noise: Some(noise),
        })
    }

    /// `use_noise` toggles between the two paths.
    pub fn new(rate: f32, use_noise: bool, noise: &'r mut dyn RngCore) -> Result<Self> {
        if use_noise {
            Self::with_noise(rate, noise)
        } else {
            Self::deterministic(rate)
        }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn uses_noise(&self) -> bool {
        self.noise.is_some()
    }

    pub fn apply(&mut self, x: &Array3<f32>) -> Result<Array3<f32>> {
        let rate = self.rate;
        let keep = 1.0 - rate;
        match self.noise.as_mut() {
            None => Ok(x * keep),
            Some(rng) => {
                let bernoulli = Bernoulli::new(f64::from(keep))
                    .map_err(|_| RnnError::InvalidDropoutRate { rate })?;
                let mask = Array3::from_shape_simple_fn(x.raw_dim(), || {
                    if rng.sample(bernoulli) {
                        1.0
                    } else {
                        0.0
                    }
                });
                Ok(x * &mask)
            }
        }
    }
}

impl fmt::Debug for Dropout<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dropout")
            .field("rate", &self.rate)
            .field("noise", &self.noise.is_some())
            .finish()
    }
}

fn check_rate(rate: f32) -> Result<()> {
    if !(0.0..1.0).contains(&rate) {
        return Err(RnnError::InvalidDropoutRate { rate });
    }
    Ok(())
}
