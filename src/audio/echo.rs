//! NLMS echo canceller: removes the played-back reference from the microphone signal.

use crate::config::EchoConfig;

/// Adaptive filter state. Owned and mutated only by the signal path.
#[derive(Debug, Clone)]
struct NlmsFilter {
    weights: Vec<f32>,
    /// Circular history of the reference signal, same length as `weights`
    history: Vec<f32>,
    /// Index of the most recent reference sample in `history`
    head: usize,
    /// Running sum of squares over `history`
    power: f64,
    step_size: f32,
    regularization: f32,
    weight_limit: f32,
}

impl NlmsFilter {
    fn new(config: &EchoConfig) -> Self {
        Self {
            weights: vec![0.0; config.taps],
            history: vec![0.0; config.taps],
            head: 0,
            power: 0.0,
            step_size: config.step_size,
            regularization: config.regularization,
            weight_limit: config.weight_limit,
        }
    }

    fn process(&mut self, mic: f32, reference: f32) -> f32 {
        let n = self.history.len();

        // Advance the ring: the oldest sample is overwritten by the newest.
        self.head = (self.head + 1) % n;
        let oldest = self.history[self.head];
        self.history[self.head] = reference;
        self.power += (reference as f64) * (reference as f64) - (oldest as f64) * (oldest as f64);
        if self.power < 0.0 {
            self.power = 0.0;
        }

        // weights[k] pairs with the reference delayed by k samples
        let mut echo = 0.0f32;
        for k in 0..n {
            echo += self.weights[k] * self.history[(self.head + n - k) % n];
        }

        let error = mic - echo;
        let gain = self.step_size / (self.power as f32 + self.regularization);
        let limit = self.weight_limit;
        for k in 0..n {
            let x = self.history[(self.head + n - k) % n];
            let w = self.weights[k] + gain * error * x;
            self.weights[k] = w.clamp(-limit, limit);
        }

        error
    }

    fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
        self.history.iter_mut().for_each(|h| *h = 0.0);
        self.head = 0;
        self.power = 0.0;
    }
}

/// Echo canceller. Without a reference stream it is a passthrough.
#[derive(Debug, Clone)]
pub struct EchoCanceller {
    filter: Option<NlmsFilter>,
}

impl EchoCanceller {
    pub fn new(config: &EchoConfig) -> Self {
        if !config.enabled || config.taps == 0 {
            return Self::passthrough();
        }
        Self {
            filter: Some(NlmsFilter::new(config)),
        }
    }

    pub fn passthrough() -> Self {
        Self { filter: None }
    }

    pub fn is_active(&self) -> bool {
        self.filter.is_some()
    }

    /// Return the microphone sample with the estimated reference echo removed.
    pub fn process_sample(&mut self, mic: f32, reference: f32) -> f32 {
        match self.filter.as_mut() {
            Some(filter) => filter.process(mic, reference),
            None => mic,
        }
    }

    /// Cancel a whole block into `out`. A missing `reference` is treated as silence.
    pub fn process_block(&mut self, mic: &[f32], reference: Option<&[f32]>, out: &mut [f32]) {
        let len = mic.len().min(out.len());
        match reference {
            Some(reference) => {
                for i in 0..len {
                    let r = reference.get(i).copied().unwrap_or(0.0);
                    out[i] = self.process_sample(mic[i], r);
                }
            }
            None => {
                for i in 0..len {
                    out[i] = self.process_sample(mic[i], 0.0);
                }
            }
        }
    }

    pub fn weights(&self) -> &[f32] {
        self.filter.as_ref().map_or(&[], |f| f.weights.as_slice())
    }

    pub fn reset(&mut self) {
        if let Some(filter) = self.filter.as_mut() {
            filter.reset();
        }
    }
}
