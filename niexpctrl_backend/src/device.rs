//! Implements the [`StreamableDevice`] trait for [`nicompiler_backend::Device`] to support streaming
//! compiled signals onto a [`StreamSink`].
//!
//! ## Overview:
//!
//! The [`StreamableDevice`] trait extends the [`nicompiler_backend::BaseDevice`] trait,
//! adding [`StreamableDevice::worker_loop`], which runs on a dedicated thread per device and streams
//! the compiled signal chunk by chunk whenever the controller posts a [`WorkerCmd::Stream`] command.
//!
//! ## Synchronization:
//!
//! The device exporting the start trigger (primary) must start last: secondaries importing the trigger
//! start first and then notify the primary through [`StartSync`], which waits for all of them before
//! starting itself.
use crossbeam::channel::{Receiver, Sender};
use ndarray::Array2;

use nicompiler_backend::*;

use crate::error::StreamError;
use crate::sink::StreamSink;
use crate::utils::{CancelToken, StreamCounter};
use crate::worker_cmd_chan::{CmdRecvr, WorkerCmd};

/// Start-trigger role of a device within one stream.
pub enum StartSync {
    /// Exports the start trigger: waits for every secondary before starting
    Primary(Vec<Receiver<()>>),
    /// Imports the start trigger: notifies the primary after starting
    Secondary(Sender<()>),
    None,
}

/// Streaming state of a worker, kept across repetitions.
pub struct StreamBundle {
    counter: StreamCounter,
    /// Chunk calculated and written ahead of the next start
    prefilled: bool,
}

pub trait StreamableDevice: BaseDevice + Sync + Send {
    /// Number of samples per streamed chunk for a buffer of `bufsize_ms` milliseconds,
    /// at least one and at most the whole sequence.
    fn chunk_size(&self, bufsize_ms: f64) -> usize {
        let buf_size = (bufsize_ms / 1000.0 * self.samp_rate()).round() as usize;
        buf_size.clamp(1, self.total_samps().max(1))
    }

    /// Calculates the samples of all streamable channels on `start_pos..end_pos` and writes them
    /// to `sink`, one call per channel.
    fn write_chunk(
        &self,
        sink: &dyn StreamSink,
        start_pos: usize,
        end_pos: usize,
        cancel: &CancelToken,
    ) -> Result<(), StreamError> {
        cancel.check()?;
        let signal: Array2<f64> = self
            .calc_signal_nsamps(start_pos, end_pos, end_pos - start_pos, true, false)
            .map_err(NiCompError::from)?;
        let chans = self.compiled_channels(true, false);
        for (chan, row) in chans.iter().zip(signal.rows()) {
            sink.write(self.name(), chan.name(), &row.to_vec(), self.samp_rate())
                .map_err(|source| StreamError::Sink {
                    card: self.name().to_string(),
                    chan: Some(chan.name().to_string()),
                    source,
                })?;
        }
        Ok(())
    }

    /// Streams the compiled signal of this device whenever `cmd_recvr` delivers a
    /// [`WorkerCmd::Stream`] command, until [`WorkerCmd::Close`].
    ///
    /// Protocol with the controller:
    /// 1. The worker prepares its stream, writes the first chunk ahead of the start and reports.
    /// 2. For every `Stream(calc_next)` command it runs one repetition (see
    ///    [`StreamableDevice::stream_run_`]) and reports.
    ///
    /// Errors end the loop and are returned to the caller, which forwards them to the controller.
    fn worker_loop(
        &self,
        sink: &dyn StreamSink,
        bufsize_ms: f64,
        mut cmd_recvr: CmdRecvr,
        report_sendr: &Sender<Result<(), StreamError>>,
        start_sync: StartSync,
        cancel: &CancelToken,
    ) -> Result<(), StreamError> {
        let mut bundle = self.cfg_run_(sink, bufsize_ms, cancel)?;
        report_sendr.send(Ok(()))?;

        loop {
            match cmd_recvr.recv()? {
                WorkerCmd::Stream(calc_next) => {
                    self.stream_run_(sink, &mut bundle, &start_sync, calc_next, cancel)?;
                    report_sendr.send(Ok(()))?;
                }
                WorkerCmd::Close => break,
            }
        }
        Ok(())
    }

    fn cfg_run_(
        &self,
        sink: &dyn StreamSink,
        bufsize_ms: f64,
        cancel: &CancelToken,
    ) -> Result<StreamBundle, StreamError> {
        let mut timer = TickTimer::new();
        let seq_len = self.check_total_samps().map_err(NiCompError::from)?;
        let mut bundle = StreamBundle {
            counter: StreamCounter::new(seq_len, self.chunk_size(bufsize_ms)),
            prefilled: false,
        };
        // Calc and write the initial chunk ahead of the start
        if let Some((start_pos, end_pos)) = bundle.counter.tick_next() {
            self.write_chunk(sink, start_pos, end_pos, cancel)?;
            bundle.prefilled = true;
        }
        timer.tick_print(&format!("{} cfg and initial chunk", self.name()));
        Ok(bundle)
    }

    /// Runs one repetition: synchronised start, remaining chunks, stop.
    ///
    /// With `calc_next`, the first chunk of the next repetition is written after the stop.
    fn stream_run_(
        &self,
        sink: &dyn StreamSink,
        bundle: &mut StreamBundle,
        start_sync: &StartSync,
        calc_next: bool,
        cancel: &CancelToken,
    ) -> Result<(), StreamError> {
        let mut timer = TickTimer::new();
        if !bundle.prefilled {
            bundle.counter.reset();
            if let Some((start_pos, end_pos)) = bundle.counter.tick_next() {
                self.write_chunk(sink, start_pos, end_pos, cancel)?;
            }
        }
        bundle.prefilled = false;

        let start = || {
            sink.start(self.name()).map_err(|source| StreamError::Sink {
                card: self.name().to_string(),
                chan: None,
                source,
            })
        };
        // Synchronise start with other workers
        match start_sync {
            StartSync::Primary(recvr_vec) => {
                for recvr in recvr_vec {
                    recvr.recv()?;
                }
                start()?;
            }
            StartSync::Secondary(sender) => {
                start()?;
                sender.send(())?;
            }
            StartSync::None => start()?,
        };
        timer.tick_print(&format!("{} start", self.name()));

        // Main streaming loop
        while let Some((start_pos, end_pos)) = bundle.counter.tick_next() {
            self.write_chunk(sink, start_pos, end_pos, cancel)?;
        }
        sink.stop(self.name()).map_err(|source| StreamError::Sink {
            card: self.name().to_string(),
            chan: None,
            source,
        })?;
        timer.tick_print(&format!("{} stream", self.name()));

        if calc_next {
            bundle.counter.reset();
            if let Some((start_pos, end_pos)) = bundle.counter.tick_next() {
                self.write_chunk(sink, start_pos, end_pos, cancel)?;
                bundle.prefilled = true;
            }
        }
        Ok(())
    }
}

impl StreamableDevice for Device {}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sink::MemorySink;
    use crate::worker_cmd_chan::CmdChan;

    fn compiled_ao_device() -> Device {
        let mut dev = Device::new("PXI1Slot3", TaskType::AO, 1e3);
        dev.add_channel("ao0", 0.).unwrap();
        dev.add_channel("ao1", 0.).unwrap();
        dev.chan_("ao0")
            .unwrap()
            .add_instr(Instruction::new_linramp(0., 9., 0., 9e-3), 0., Some((10e-3, true)))
            .unwrap();
        dev.chan_("ao1").unwrap().constant(2., 5e-3, Some((5e-3, false))).unwrap();
        dev.compile(20e-3).unwrap();
        dev
    }

    #[test]
    fn chunk_size() {
        let dev = compiled_ao_device();
        assert_eq!(dev.total_samps(), 20);
        assert_eq!(dev.chunk_size(5.), 5);
        assert_eq!(dev.chunk_size(1e-3), 1);
        assert_eq!(dev.chunk_size(1e3), 20);
    }

    #[test]
    fn worker_streams_whole_sequence() {
        let dev = compiled_ao_device();
        let sink = MemorySink::new();
        let cancel = CancelToken::new();
        let cmd_chan = CmdChan::new();
        let recvr = cmd_chan.new_recvr();
        let (report_sendr, report_recvr) = crossbeam::channel::unbounded();

        crossbeam::thread::scope(|s| {
            let handle = s.spawn(|_| {
                dev.worker_loop(&sink, 7., recvr, &report_sendr, StartSync::None, &cancel)
            });
            report_recvr.recv().unwrap().unwrap();
            cmd_chan.send(WorkerCmd::Stream(true));
            report_recvr.recv().unwrap().unwrap();
            cmd_chan.send(WorkerCmd::Stream(false));
            report_recvr.recv().unwrap().unwrap();
            cmd_chan.send(WorkerCmd::Close);
            handle.join().unwrap().unwrap();
        })
        .unwrap();

        let expected = dev.calc_signal_nsamps(0, 20, 20, true, false).unwrap();
        let once = expected.row(0).to_vec();
        let twice: Vec<f64> = once.iter().chain(once.iter()).copied().collect();
        assert_eq!(sink.samples("PXI1Slot3", "ao0"), twice);
        assert_eq!(sink.samples("PXI1Slot3", "ao1").len(), 40);
        // 3 chunks of at most 7 samples per repetition, for each of the 2 channels
        assert_eq!(sink.writes().len(), 12);
        assert_eq!(sink.starts().len(), 2);
    }

    #[test]
    fn cancelled_worker_stops_writing() {
        let dev = compiled_ao_device();
        let sink = MemorySink::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let cmd_chan = CmdChan::new();
        let (report_sendr, _report_recvr) = crossbeam::channel::unbounded();
        let result = dev.worker_loop(
            &sink,
            7.,
            cmd_chan.new_recvr(),
            &report_sendr,
            StartSync::None,
            &cancel,
        );
        assert_eq!(result, Err(StreamError::Cancelled));
        assert!(sink.writes().is_empty());
    }
}
