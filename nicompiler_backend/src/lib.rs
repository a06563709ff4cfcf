//! Compiler backend for NI experiment control.
//!
//! Experiments are edited as per-channel timelines of waveform instructions
//! ([`instruction`], [`timeline`], [`channel`]) grouped into devices ([`device`]) and
//! compiled into sample-accurate instruction streams by an [`Experiment`].
//! Compiled streams are sampled on demand with the `calc_signal_nsamps` family of methods.
//!
//! All fallible operations report a typed error from [`error`].
//! With the `python` feature, the crate builds the `nicompiler_backend` python extension module.
pub mod channel;
pub mod device;
pub mod error;
pub mod experiment;
pub mod instruction;
pub mod timeline;
pub mod utils;

pub use channel::*;
pub use device::*;
pub use error::{CompileError, ConfigError, EditError, NiCompError, RegistryError, SignalError};
pub use experiment::*;
pub use instruction::*;
pub use timeline::*;
pub use utils::*;

#[cfg(feature = "python")]
#[pyo3::pymodule]
fn nicompiler_backend(_py: pyo3::Python, m: &pyo3::types::PyModule) -> pyo3::PyResult<()> {
    m.add_class::<Experiment>()?;
    Ok(())
}
