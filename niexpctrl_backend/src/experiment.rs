//! # Streaming compiled experiments with the `experiment` Module
//!
//! Building on the foundation of the [`nicompiler_backend::Experiment`] struct, this module
//! introduces an extended `Experiment` struct which streams compiled devices onto a [`StreamSink`].
//!
//! ## Key Features:
//!
//! - **Streaming:** [`Experiment::stream_exp`] streams all compiled devices concurrently, one worker
//!   thread per device, and blocks until done. [`Experiment::stream_exp_bg`] does the same in the
//!   background and returns a [`StreamHandle`] to wait for or cancel the stream.
//! - **Busy policy:** at most one stream is in flight per experiment. While streaming, requests for
//!   another stream fail with [`StreamError::Busy`], and compiling or clearing compile caches fail
//!   with [`CompileError::Busy`]. Requests are never queued.
//! - **Cancellation:** a [`CancelToken`] is checked before every chunk write, so a cancelled stream
//!   stops at the next chunk boundary.
//!
//! ## How to Use:
//!
//! 1. **Initialization:** Create an instance of the `Experiment` struct with [`Experiment::new`].
//! 2. **Experiment design:** Use the methods of the [`nicompiler_backend::BaseExperiment`] trait,
//!    then compile.
//! 3. **Streaming:** Call [`Experiment::stream_exp`] with a sink and a [`StreamCfg`].
//!
//! ```
//! use std::sync::Arc;
//! use niexpctrl_backend::*;
//!
//! let mut exp = Experiment::new();
//! exp.add_ao_device("PXI1Slot3", 1e3).unwrap();
//! exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();
//! exp.constant("PXI1Slot3", "ao0", 0., 0.1, 1.).unwrap();
//! exp.compile(Some(0.2)).unwrap();
//!
//! let sink = Arc::new(MemorySink::new());
//! exp.stream_exp(sink.clone(), &StreamCfg::default()).unwrap();
//! assert_eq!(sink.samples("PXI1Slot3", "ao0").len(), 200);
//! ```
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use indexmap::IndexMap;

use nicompiler_backend::*;

use crate::device::*;
use crate::error::StreamError;
use crate::sink::StreamSink;
use crate::utils::{BusyGuard, CancelToken};
use crate::worker_cmd_chan::{CmdChan, WorkerCmd};

/// Parameters of a stream run.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamCfg {
    /// Duration of one streamed chunk in milliseconds
    pub bufsize_ms: f64,
    /// Number of repetitions of the whole sequence
    pub nreps: usize,
    /// Longest time to wait for the workers to report on a command; `None` waits forever.
    /// On expiry the stream is cancelled and fails with [`StreamError::Timeout`].
    pub write_timeout: Option<Duration>,
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            bufsize_ms: 50.0,
            nreps: 1,
            write_timeout: None,
        }
    }
}

impl StreamCfg {
    pub fn validate(&self) -> Result<(), StreamError> {
        if !(self.bufsize_ms.is_finite() && self.bufsize_ms > 0.0) {
            return Err(StreamError::InvalidCfg(format!(
                "bufsize_ms must be positive, got {}",
                self.bufsize_ms
            )));
        }
        if self.nreps == 0 {
            return Err(StreamError::InvalidCfg("nreps must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// An extended version of the [`nicompiler_backend::Experiment`] struct that streams compiled
/// devices onto a [`StreamSink`].
///
/// For all editing and compiling behavior it relies on the default implementations of
/// [`nicompiler_backend::BaseExperiment`]; it only overrides [`BaseExperiment::busy`] to lock
/// the compile cache while a stream is in flight.
#[cfg_attr(feature = "python", pyo3::pyclass)]
#[derive(Default)]
pub struct Experiment {
    devices: IndexMap<String, Device>,
    busy: Arc<AtomicBool>,
}

impl BaseExperiment for Experiment {
    fn devices(&self) -> &IndexMap<String, Device> {
        &self.devices
    }
    fn devices_(&mut self) -> &mut IndexMap<String, Device> {
        &mut self.devices
    }
    fn busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

impl_exp_boilerplate!(Experiment);

impl Experiment {
    /// Creates an experiment with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the compiled devices, checked for consistency.
    fn stream_snapshot(&self, cfg: &StreamCfg) -> Result<Vec<Device>, StreamError> {
        cfg.validate()?;
        self.check_trig_config()?;
        let devs: Vec<Device> = self.compiled_devices().into_iter().cloned().collect();
        if devs.is_empty() {
            return Err(StreamError::NotCompiled);
        }
        for dev in &devs {
            dev.check_total_samps().map_err(NiCompError::from)?;
        }
        // An uncompiled exporter never fires the trigger the streamed importers wait for
        let streams_exporter = devs.iter().any(|dev| dev.export_trig() == Some(true));
        let importers: Vec<String> = devs
            .iter()
            .filter(|dev| dev.export_trig() == Some(false))
            .map(|dev| dev.name().to_string())
            .collect();
        if !streams_exporter && !importers.is_empty() {
            return Err(NiCompError::from(ConfigError::MissingTrigExporter { importers }).into());
        }
        Ok(devs)
    }

    /// Streams all compiled devices onto `sink` and blocks until done.
    ///
    /// Each device streams from its own worker thread. The device exporting the start trigger
    /// starts after all the others in every repetition.
    ///
    /// # Errors
    /// - [`StreamError::Busy`] if another stream of this experiment is in flight.
    /// - [`StreamError::NotCompiled`] if no device is compiled.
    /// - [`StreamError::InvalidCfg`] for a malformed `cfg`.
    /// - [`StreamError::Compile`] for an invalid trigger configuration, including compiled
    ///   trigger importers whose exporter has nothing to stream.
    /// - The first error reported by a worker, e.g. [`StreamError::Sink`].
    pub fn stream_exp(&self, sink: Arc<dyn StreamSink>, cfg: &StreamCfg) -> Result<(), StreamError> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let devs = self.stream_snapshot(cfg)?;
        stream_devices(&devs, sink.as_ref(), cfg, &CancelToken::new())
    }

    /// Background variant of [`Experiment::stream_exp`].
    ///
    /// The stream runs on a snapshot of the compiled devices, so the experiment can be edited
    /// meanwhile. Compiling stays locked until the stream finishes.
    pub fn stream_exp_bg(
        &self,
        sink: Arc<dyn StreamSink>,
        cfg: StreamCfg,
    ) -> Result<StreamHandle, StreamError> {
        let guard = BusyGuard::acquire(&self.busy)?;
        let devs = self.stream_snapshot(&cfg)?;
        let cancel = CancelToken::new();
        let (done_sendr, done_recvr) = crossbeam::channel::bounded::<()>(0);

        let worker_cancel = cancel.clone();
        let join = std::thread::spawn(move || {
            let _guard = guard;
            let _done_sendr = done_sendr;
            stream_devices(&devs, sink.as_ref(), &cfg, &worker_cancel)
        });
        Ok(StreamHandle {
            cancel,
            join,
            done: done_recvr,
        })
    }

    /// Returns `true` while a stream is in flight.
    pub fn is_streaming(&self) -> bool {
        self.busy()
    }
}

/// Handle of a background stream started by [`Experiment::stream_exp_bg`].
pub struct StreamHandle {
    cancel: CancelToken,
    join: JoinHandle<Result<(), StreamError>>,
    /// Disconnected once the stream thread finished
    done: Receiver<()>,
}

impl StreamHandle {
    /// Requests the stream to stop at the next chunk boundary.
    pub fn cancel(&self) {
        self.cancel.cancel()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Blocks until the stream is done and returns its result.
    pub fn wait(self) -> Result<(), StreamError> {
        self.join
            .join()
            .map_err(|_| StreamError::Worker("stream thread panicked".to_string()))?
    }

    /// Like [`StreamHandle::wait`], but gives up after `timeout`.
    ///
    /// On expiry the stream is cancelled and [`StreamError::Timeout`] is returned without waiting
    /// for the workers to wind down; the experiment stays busy until they have.
    pub fn wait_timeout(self, timeout: Duration) -> Result<(), StreamError> {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("stream did not finish within {timeout:?}, cancelling");
                self.cancel();
                Err(StreamError::Timeout)
            }
            _ => self.wait(),
        }
    }
}

/// Runs one worker per device and drives them through all repetitions.
fn stream_devices(
    devs: &[Device],
    sink: &dyn StreamSink,
    cfg: &StreamCfg,
    cancel: &CancelToken,
) -> Result<(), StreamError> {
    let mut timer = TickTimer::new();
    let cmd_chan = CmdChan::new();
    let (report_sendr, report_recvr) = crossbeam::channel::unbounded();
    let start_syncs = start_syncs(devs);

    let result = crossbeam::thread::scope(|s| {
        for (dev, start_sync) in devs.iter().zip(start_syncs) {
            let cmd_recvr = cmd_chan.new_recvr();
            let report_sendr = report_sendr.clone();
            s.spawn(move |_| {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    dev.worker_loop(
                        sink,
                        cfg.bufsize_ms,
                        cmd_recvr,
                        &report_sendr,
                        start_sync,
                        cancel,
                    )
                }))
                .unwrap_or_else(|payload| {
                    Err(StreamError::Worker(format!(
                        "worker of {} panicked: {}",
                        dev.name(),
                        panic_msg(payload.as_ref())
                    )))
                });
                if let Err(err) = result {
                    log::debug!("worker of {} exits with: {err}", dev.name());
                    // The controller may have returned already
                    let _ = report_sendr.send(Err(err));
                }
            });
        }
        // Reports disconnect once every worker is gone
        drop(report_sendr);

        let mut run = || -> Result<(), StreamError> {
            collect_reports(&report_recvr, devs.len(), cfg, cancel)?;
            timer.tick_print("workers ready");
            for rep in 0..cfg.nreps {
                cmd_chan.send(WorkerCmd::Stream(rep + 1 < cfg.nreps));
                collect_reports(&report_recvr, devs.len(), cfg, cancel)?;
                timer.tick_print(&format!("repetition {rep}"));
            }
            Ok(())
        };
        let result = run();
        cmd_chan.send(WorkerCmd::Close);
        result
    })
    .map_err(|_| StreamError::Worker("worker thread panicked".to_string()))?;

    match &result {
        Ok(()) => log::info!("streamed {} devices, {} repetitions", devs.len(), cfg.nreps),
        Err(StreamError::Cancelled) => log::warn!("stream cancelled"),
        Err(err) => log::warn!("stream failed: {err}"),
    }
    result
}

fn panic_msg(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}

/// Start-trigger roles: the exporter waits for every importer. Without exporter, all start freely.
fn start_syncs(devs: &[Device]) -> Vec<StartSync> {
    let has_primary = devs.iter().any(|dev| dev.export_trig() == Some(true));
    let mut recvrs = Vec::new();
    let mut syncs: Vec<StartSync> = devs
        .iter()
        .map(|dev| match dev.export_trig() {
            Some(false) if has_primary => {
                let (sendr, recvr) = crossbeam::channel::bounded(1);
                recvrs.push(recvr);
                StartSync::Secondary(sendr)
            }
            _ => StartSync::None,
        })
        .collect();
    if let Some(idx) = devs.iter().position(|dev| dev.export_trig() == Some(true)) {
        syncs[idx] = StartSync::Primary(recvrs);
    }
    syncs
}

/// Waits for one report per worker; the first error wins.
fn collect_reports(
    report_recvr: &Receiver<Result<(), StreamError>>,
    num_workers: usize,
    cfg: &StreamCfg,
    cancel: &CancelToken,
) -> Result<(), StreamError> {
    for _ in 0..num_workers {
        let report = match cfg.write_timeout {
            Some(timeout) => report_recvr.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => {
                    cancel.cancel();
                    StreamError::Timeout
                }
                RecvTimeoutError::Disconnected => {
                    StreamError::Worker("workers exited without report".to_string())
                }
            })?,
            None => report_recvr.recv()?,
        };
        report?;
    }
    Ok(())
}

#[cfg(feature = "python")]
#[pyo3::pymethods]
impl Experiment {
    /// Constructor for the python `Experiment` class, with no devices.
    #[new]
    fn py_new() -> Self {
        Self::new()
    }

    /// Streams the compiled experiment onto a logging sink (dry run).
    #[pyo3(name = "stream_exp", signature = (bufsize_ms=50.0, nreps=1))]
    fn py_stream_exp(&self, bufsize_ms: f64, nreps: usize) -> pyo3::PyResult<()> {
        let cfg = StreamCfg {
            bufsize_ms,
            nreps,
            write_timeout: None,
        };
        Ok(self.stream_exp(Arc::new(crate::sink::LogSink), &cfg)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn start_roles() {
        let mut exp = Experiment::new();
        exp.add_ao_device("Dev1", 1e3).unwrap();
        exp.add_ao_device("Dev2", 1e3).unwrap();
        exp.add_do_device("Dev3", 1e3).unwrap();
        exp.device_cfg_trig("Dev2", "PXI1_Trig0", true).unwrap();
        exp.device_cfg_trig("Dev3", "PXI1_Trig0", false).unwrap();
        let devs: Vec<Device> = exp.devices().values().cloned().collect();

        let syncs = start_syncs(&devs);
        assert!(matches!(syncs[0], StartSync::None));
        assert!(matches!(&syncs[1], StartSync::Primary(recvrs) if recvrs.len() == 1));
        assert!(matches!(syncs[2], StartSync::Secondary(_)));

        // Importers without exporter start freely
        let syncs = start_syncs(&devs[2..]);
        assert!(matches!(syncs[0], StartSync::None));
    }

    #[test]
    fn cfg_validation() {
        assert!(StreamCfg::default().validate().is_ok());
        let cfg = StreamCfg {
            nreps: 0,
            ..StreamCfg::default()
        };
        assert!(matches!(cfg.validate(), Err(StreamError::InvalidCfg(_))));
        let cfg = StreamCfg {
            bufsize_ms: 0.0,
            ..StreamCfg::default()
        };
        assert!(matches!(cfg.validate(), Err(StreamError::InvalidCfg(_))));
    }

    #[test]
    fn busy_flag_locks_compile() {
        let mut exp = Experiment::new();
        exp.add_ao_device("Dev1", 1e3).unwrap();
        exp.add_ao_channel("Dev1", 0, 0.).unwrap();
        exp.go_constant("Dev1", "ao0", 0., 1.).unwrap();

        let guard = BusyGuard::acquire(&exp.busy).unwrap();
        assert!(exp.is_streaming());
        assert_eq!(
            exp.compile(None).unwrap_err(),
            NiCompError::Compile(CompileError::Busy)
        );
        drop(guard);
        assert!(exp.compile(None).is_ok());
    }
}
