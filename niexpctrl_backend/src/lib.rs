//! Streaming control of experiments compiled with [`nicompiler_backend`].
//!
//! The streaming [`Experiment`] re-exposes the whole [`nicompiler_backend::BaseExperiment`] API and adds
//! [`Experiment::stream_exp`] / [`Experiment::stream_exp_bg`], which push compiled signals onto a
//! [`StreamSink`] from one worker thread per device.
pub mod device;
pub mod error;
pub mod experiment;
pub mod sink;
pub mod utils;
pub mod worker_cmd_chan;

pub use crate::device::StreamableDevice;
pub use crate::error::{SinkError, StreamError};
pub use crate::experiment::{Experiment, StreamCfg, StreamHandle};
pub use crate::sink::{LogSink, MemorySink, SinkWrite, StreamSink};
pub use crate::utils::CancelToken;
pub use nicompiler_backend::{
    BaseChannel, BaseDevice, BaseExperiment, CompileError, Device, NiCompError, TaskType,
};

#[cfg(feature = "python")]
#[pyo3::pymodule]
fn niexpctrl_backend(_py: pyo3::Python, m: &pyo3::types::PyModule) -> pyo3::PyResult<()> {
    m.add_class::<Experiment>()?;
    Ok(())
}
