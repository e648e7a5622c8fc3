use std::f64::consts::PI;

/// First-order IIR high-pass filter, one instance per channel
///
/// The state is the previous input and output; nothing is shared between
/// channels. The first sample only primes the state and yields 0.0.
///
/// ```rust
/// use edfconv::filter::FirstOrderFilter;
///
/// let mut hpf = FirstOrderFilter::high_pass(0.1, 2048.0);
/// assert_eq!(hpf.process(5000), 0.0);
/// // a constant input decays towards zero
/// let settled = (0..100_000).map(|_| hpf.process(5000)).last().unwrap();
/// assert!(settled.abs() < 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct FirstOrderFilter {
    factor: f64,
    old_input: f64,
    old_output: f64,
    first_sample: bool,
}

impl FirstOrderFilter {
    pub fn high_pass(cutoff_frequency: f64, sample_frequency: f64) -> Self {
        FirstOrderFilter {
            factor: filter_factor(cutoff_frequency, sample_frequency),
            old_input: 0.0,
            old_output: 0.0,
            first_sample: true,
        }
    }

    pub fn process(&mut self, new_input: i32) -> f64 {
        let new_input = new_input as f64;

        if self.first_sample {
            self.first_sample = false;
            self.old_input = new_input;
            self.old_output = 0.0;
            return 0.0;
        }

        let new_output = self.old_output * (1.0 - 1.0 / self.factor) + new_input - self.old_input;

        self.old_input = new_input;
        self.old_output = new_output;
        new_output
    }
}

/// 1 / (1 - e^(-2πfc/fs))
fn filter_factor(cutoff_frequency: f64, sample_frequency: f64) -> f64 {
    let t = (-(cutoff_frequency * 2.0 * PI) / sample_frequency).exp();
    1.0 / (1.0 - t)
}
