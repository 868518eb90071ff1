use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rodio::Source;
use std::time::Duration;

/// Near-silent tone that keeps the output device (and the process) awake.
/// A very low sine with a little dither so the device never sees pure zeros.
pub struct KeepAliveTone {
    sample_rate: u32,
    phase: f32,
    rng: StdRng,
}

const FREQUENCY_HZ: f32 = 30.0;
const AMPLITUDE: f32 = 0.002;
const DITHER: f32 = 0.0005;

impl KeepAliveTone {
    pub fn new() -> Self {
        Self {
            sample_rate: 44100,
            phase: 0.0,
            rng: StdRng::from_entropy(),
        }
    }
}

impl Iterator for KeepAliveTone {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        self.phase += std::f32::consts::TAU * FREQUENCY_HZ / self.sample_rate as f32;
        if self.phase > std::f32::consts::TAU {
            self.phase -= std::f32::consts::TAU;
        }
        let dither = self.rng.gen_range(-DITHER..DITHER);
        Some(self.phase.sin() * AMPLITUDE + dither)
    }
}

impl Source for KeepAliveTone {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_stays_near_silent() {
        let peak = KeepAliveTone::new()
            .take(44100)
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(peak > 0.0);
        assert!(peak <= AMPLITUDE + DITHER);
    }
}
