//! Destinations of streamed samples.
//!
//! A [`StreamSink`] receives the compiled signal of every streamable channel chunk by chunk.
//! It stands where the NI-DAQmx task sits on real hardware: [`StreamSink::start`] arms or starts a card,
//! [`StreamSink::write`] appends samples to the output buffer of one channel, [`StreamSink::stop`]
//! ends the run of a card.
//!
//! Two sinks are provided:
//! - [`MemorySink`] records everything, for dry runs and tests.
//! - [`LogSink`] reports every call through the `log` facade.
use parking_lot::Mutex;

use crate::error::SinkError;

/// Receiver of streamed samples. Called concurrently from one worker thread per card.
pub trait StreamSink: Send + Sync {
    /// Appends `samples` of channel `chan_id` on card `card_id`, clocked at `samp_rate`.
    ///
    /// Within one card, chunks arrive in time order and the channels of a chunk are written
    /// one after the other, in the card's compiled channel order.
    fn write(
        &self,
        card_id: &str,
        chan_id: &str,
        samples: &[f64],
        samp_rate: f64,
    ) -> Result<(), SinkError>;

    /// Starts card `card_id`. Cards importing a start trigger are started before the card
    /// exporting it.
    fn start(&self, _card_id: &str) -> Result<(), SinkError> {
        Ok(())
    }

    /// Stops card `card_id` after the last chunk of a repetition.
    fn stop(&self, _card_id: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

/// A single [`StreamSink::write`] call as recorded by [`MemorySink`]
#[derive(Clone, Debug, PartialEq)]
pub struct SinkWrite {
    pub card_id: String,
    pub chan_id: String,
    pub samples: Vec<f64>,
    pub samp_rate: f64,
}

/// Sink keeping every call in memory.
///
/// ```
/// use niexpctrl_backend::sink::*;
///
/// let sink = MemorySink::new();
/// sink.write("PXI1Slot3", "ao0", &[0., 1.], 1e6).unwrap();
/// sink.write("PXI1Slot3", "ao0", &[2.], 1e6).unwrap();
/// assert_eq!(sink.samples("PXI1Slot3", "ao0"), vec![0., 1., 2.]);
/// assert_eq!(sink.writes().len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct MemorySink {
    writes: Mutex<Vec<SinkWrite>>,
    starts: Mutex<Vec<String>>,
    stops: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<SinkWrite> {
        self.writes.lock().clone()
    }

    /// All samples written to a channel, concatenated in arrival order
    pub fn samples(&self, card_id: &str, chan_id: &str) -> Vec<f64> {
        self.writes
            .lock()
            .iter()
            .filter(|w| w.card_id == card_id && w.chan_id == chan_id)
            .flat_map(|w| w.samples.iter().copied())
            .collect()
    }

    /// Card names in the order they were started
    pub fn starts(&self) -> Vec<String> {
        self.starts.lock().clone()
    }

    pub fn stops(&self) -> Vec<String> {
        self.stops.lock().clone()
    }

    pub fn clear(&self) {
        self.writes.lock().clear();
        self.starts.lock().clear();
        self.stops.lock().clear();
    }
}

impl StreamSink for MemorySink {
    fn write(
        &self,
        card_id: &str,
        chan_id: &str,
        samples: &[f64],
        samp_rate: f64,
    ) -> Result<(), SinkError> {
        self.writes.lock().push(SinkWrite {
            card_id: card_id.to_string(),
            chan_id: chan_id.to_string(),
            samples: samples.to_vec(),
            samp_rate,
        });
        Ok(())
    }

    fn start(&self, card_id: &str) -> Result<(), SinkError> {
        self.starts.lock().push(card_id.to_string());
        Ok(())
    }

    fn stop(&self, card_id: &str) -> Result<(), SinkError> {
        self.stops.lock().push(card_id.to_string());
        Ok(())
    }
}

/// Sink discarding samples after logging each call at `info` level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl StreamSink for LogSink {
    fn write(
        &self,
        card_id: &str,
        chan_id: &str,
        samples: &[f64],
        samp_rate: f64,
    ) -> Result<(), SinkError> {
        log::info!(
            "{card_id}/{chan_id}: {} samples at {samp_rate} Sa/s",
            samples.len()
        );
        Ok(())
    }

    fn start(&self, card_id: &str) -> Result<(), SinkError> {
        log::info!("{card_id}: start");
        Ok(())
    }

    fn stop(&self, card_id: &str) -> Result<(), SinkError> {
        log::info!("{card_id}: stop");
        Ok(())
    }
}
