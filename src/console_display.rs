//! Headless console monitor for measurement progress.

use crate::physics::frequency_to_cents;
use crate::types::{AnalyzerEvent, NoteMeasurement};
use crossbeam_channel::Receiver;

/// Prints a one-line status for every measurement update and a banner on
/// auto-stop. Spectrum events are counted but not rendered.
pub struct ConsoleMonitor {
    rx: Receiver<AnalyzerEvent>,
}

impl ConsoleMonitor {
    pub fn new(rx: Receiver<AnalyzerEvent>) -> Self {
        Self { rx }
    }

    /// Run the monitor. Blocks the calling thread until the analyzer's
    /// event channel closes.
    pub fn run(&self) {
        let mut spectra: u64 = 0;
        for event in self.rx.iter() {
            match event {
                AnalyzerEvent::RawSpectrumUpdated(_) => spectra += 1,
                AnalyzerEvent::MeasurementUpdated(m) => {
                    println!("  {}", status_line(&m));
                }
                AnalyzerEvent::MeasurementAutoStopped(m) => {
                    println!("──────────────────────────────────────────────");
                    println!("  LOCKED {}", status_line(&m));
                    println!("──────────────────────────────────────────────");
                }
            }
        }
        log::debug!("Console monitor done after {} spectra", spectra);
    }
}

fn status_line(m: &NoteMeasurement) -> String {
    let cents = frequency_to_cents(m.calculated_fundamental, m.target_frequency);
    format!(
        "{:<4} f0={:8.3} Hz ({:+6.1}¢)  B={:.2e}  partials={:2} (anchor n={})  [{}]",
        m.note_name,
        m.calculated_fundamental,
        cents,
        m.inharmonicity_coefficient,
        m.detected_partials.len(),
        m.measured_partial_number,
        m.quality,
    )
}
