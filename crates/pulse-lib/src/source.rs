use crate::{
    clock::{Clock, MonotonicClock},
    queue::SampleProducer,
    signal::{to_adc, Sample},
};
use crossbeam_channel::{bounded, Sender};
use log::{debug, info};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f64::consts::PI;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Something that can be read like the ADC pin at a given instant.
pub trait SampleSource {
    fn read(&mut self, at_ms: u64) -> u16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    /// Systolic peak followed by a smaller dicrotic wave, like a fingertip PPG.
    Pulse,
    Sine,
}

/// Deterministic PPG generator for simulations and tests.
#[derive(Debug, Clone)]
pub struct SyntheticPpg {
    pub bpm: f64,
    pub baseline: f64,
    pub amplitude: f64,
    /// Uniform noise as a fraction of `amplitude`.
    pub noise: f64,
    pub waveform: Waveform,
    rng: StdRng,
}

impl SyntheticPpg {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm,
            baseline: 30_000.0,
            amplitude: 8_000.0,
            noise: 0.0,
            waveform: Waveform::Pulse,
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn with_noise(mut self, noise: f64, seed: u64) -> Self {
        self.noise = noise.max(0.0);
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    fn shape(&self, at_ms: u64) -> f64 {
        let cycles = at_ms as f64 * self.bpm / 60_000.0;
        match self.waveform {
            Waveform::Sine => (2.0 * PI * cycles).sin(),
            Waveform::Pulse => {
                let phase = cycles.fract();
                let systolic = (-0.5 * ((phase - 0.15) / 0.06).powi(2)).exp();
                let dicrotic = 0.35 * (-0.5 * ((phase - 0.45) / 0.08).powi(2)).exp();
                systolic + dicrotic
            }
        }
    }
}

impl SampleSource for SyntheticPpg {
    fn read(&mut self, at_ms: u64) -> u16 {
        let mut value = self.baseline + self.amplitude * self.shape(at_ms);
        if self.noise > 0.0 {
            value += self.rng.gen_range(-1.0..=1.0) * self.noise * self.amplitude;
        }
        to_adc(value)
    }
}

/// Handle to a running sampler thread.
pub struct SamplerHandle {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl SamplerHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start a thread that reads `source` at `rate_hz`, timestamps each reading on
/// `clock` and pushes it into the queue.
pub fn spawn_sampler<S>(
    mut source: S,
    producer: SampleProducer,
    clock: MonotonicClock,
    rate_hz: u32,
) -> SamplerHandle
where
    S: SampleSource + Send + 'static,
{
    let (stop_tx, stop_rx) = bounded(1);
    let period = Duration::from_secs_f64(1.0 / rate_hz.max(1) as f64);
    let handle = std::thread::spawn(move || {
        info!("sampler started at {rate_hz} Hz");
        let mut next = Instant::now();
        let mut pushed = 0usize;
        loop {
            if stop_rx.try_recv().is_ok() {
                break;
            }
            let at_ms = clock.now_ms();
            if !producer.push(Sample::new(at_ms, source.read(at_ms))) {
                debug!("sample consumer gone, stopping sampler");
                break;
            }
            pushed += 1;
            next += period;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else {
                // fell behind; resynchronise instead of bursting
                next = now;
            }
        }
        info!(
            "sampler stopped after {pushed} samples ({} dropped)",
            producer.dropped()
        );
    });
    SamplerHandle {
        stop_tx,
        handle: Some(handle),
    }
}

/// Virtual hardware timer: a [`Clock`] whose `sleep` advances virtual time and
/// pushes every sample that falls due meanwhile.
pub struct VirtualTimer<S> {
    source: S,
    producer: SampleProducer,
    period_ms: f64,
    now_ms: u64,
    next_sample_ms: f64,
}

impl<S: SampleSource> VirtualTimer<S> {
    pub fn new(source: S, producer: SampleProducer, rate_hz: u32) -> Self {
        Self {
            source,
            producer,
            period_ms: 1000.0 / rate_hz.max(1) as f64,
            now_ms: 0,
            next_sample_ms: 0.0,
        }
    }

    /// Jump forward without waiting, emitting samples up to the new time.
    pub fn advance(&mut self, duration: Duration) {
        let target = self.now_ms + duration.as_millis() as u64;
        while self.next_sample_ms <= target as f64 {
            let at_ms = self.next_sample_ms.round() as u64;
            self.producer.push(Sample::new(at_ms, self.source.read(at_ms)));
            self.next_sample_ms += self.period_ms;
        }
        self.now_ms = target;
    }
}

impl<S: SampleSource> Clock for VirtualTimer<S> {
    fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn sleep(&mut self, duration: Duration) {
        self.advance(duration);
    }
}
