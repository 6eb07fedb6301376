//! # Progress Reporting Module
//!
//! A one-way notification side channel for long calculations. The engine
//! emits [`TuningEvent`]s into an injectable [`ProgressSink`]; sinks must
//! never block, and a [`NoProgress`] sink is a valid stand-in for headless
//! use.

use crossbeam_channel::{Sender, TrySendError};
use log::{debug, info};

use crate::engine::TuningCurve;

/// Something a running calculation has to say.
#[derive(Debug, Clone, PartialEq)]
pub enum TuningEvent {
    /// Completion percentage (0-100, non-decreasing) and a status line.
    Progress { percent: f32, message: String },
    /// The final curve. Always the last event of a calculation.
    Finished(Box<TuningCurve>),
}

/// Receives progress events. Implementations must return promptly.
pub trait ProgressSink {
    fn notify(&mut self, event: TuningEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn notify(&mut self, _event: TuningEvent) {}
}

/// Forwards events over a channel, dropping them if the channel is full or
/// the receiver is gone.
impl ProgressSink for Sender<TuningEvent> {
    fn notify(&mut self, event: TuningEvent) {
        match self.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("[PROGRESS] Channel full, event dropped"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Collects events in memory.
impl ProgressSink for Vec<TuningEvent> {
    fn notify(&mut self, event: TuningEvent) {
        self.push(event);
    }
}

/// Adapts a closure into a sink.
pub struct Callback<F>(pub F);

impl<F: FnMut(TuningEvent)> ProgressSink for Callback<F> {
    fn notify(&mut self, event: TuningEvent) {
        (self.0)(event)
    }
}

/// Wraps a sink and keeps the reported percentage monotonic.
pub struct ProgressReporter<'a> {
    sink: &'a mut dyn ProgressSink,
    percent: f32,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self { sink, percent: 0.0 }
    }

    /// Last percentage sent.
    pub fn percent(&self) -> f32 {
        self.percent
    }

    /// Sends a progress event. Values below the last one are raised to it.
    pub fn report(&mut self, percent: f32, message: impl Into<String>) {
        let percent = if percent.is_finite() {
            percent.clamp(self.percent, 100.0)
        } else {
            self.percent
        };
        self.percent = percent;
        let message = message.into();
        debug!("[PROGRESS] {:5.1}% {}", percent, message);
        self.sink.notify(TuningEvent::Progress { percent, message });
    }

    /// A sub-range of the overall progress, driven by fractions in `[0, 1]`.
    pub fn span<'r>(&'r mut self, start: f32, end: f32) -> ProgressSpan<'r, 'a> {
        ProgressSpan { reporter: self, start, end }
    }

    /// Sends the terminating event.
    pub fn finish(&mut self, curve: TuningCurve) {
        info!("[PROGRESS] Calculation finished ({})", curve.method);
        self.sink.notify(TuningEvent::Finished(Box::new(curve)));
    }
}

/// Maps fractions of one stage onto a slice of the percentage range.
pub struct ProgressSpan<'r, 'a> {
    reporter: &'r mut ProgressReporter<'a>,
    start: f32,
    end: f32,
}

impl ProgressSpan<'_, '_> {
    pub fn report(&mut self, fraction: f32, message: impl Into<String>) {
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        let percent = self.start + (self.end - self.start) * fraction;
        self.reporter.report(percent, message);
    }
}
