//! Error types of the compiler.
//!
//! Every failure is reported through one of the category enums below and carries enough
//! identity (device name, channel name, tick position) to pinpoint the offending edit.
//! Errors abort only the call that produced them: a failed edit leaves the timeline as it
//! was, and a failed compile leaves the previously published compile cache intact.
//!
//! [`NiCompError`] wraps all categories so that the experiment-level API can return a
//! single [`Result`] type.
use thiserror::Error;

/// Errors raised while adding instructions to a channel timeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    #[error("channel {chan}: instruction {new} overlaps with existing instruction {existing}")]
    Overlap {
        chan: String,
        new: String,
        existing: String,
    },
    #[error("channel {chan}: instruction interval {start_pos}..{end_pos} is empty (shorter than one clock tick)")]
    InvalidInterval {
        chan: String,
        start_pos: usize,
        end_pos: usize,
    },
    #[error("channel {chan}: invalid time argument {what} = {value}")]
    InvalidTime {
        chan: String,
        what: &'static str,
        value: f64,
    },
    #[error("instruction type {instr_type} requires argument `{key}`")]
    MissingArg { instr_type: String, key: String },
    #[error("{target}: reset position {reset_pos} is below the last instruction end position {last_end_pos}")]
    ResetTooEarly {
        target: String,
        reset_pos: usize,
        last_end_pos: usize,
    },
}

/// Errors raised while registering or looking up devices and channels.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("device {name} already registered")]
    DuplicateDevice { name: String },
    #[error("device {dev} already has channel {chan}")]
    DuplicateChannel { dev: String, chan: String },
    #[error("there is no device {name} registered. Registered devices are {registered:?}")]
    UnknownDevice {
        name: String,
        registered: Vec<String>,
    },
    #[error("device {dev} does not have channel {chan}. Registered channels are {registered:?}")]
    UnknownChannel {
        dev: String,
        chan: String,
        registered: Vec<String>,
    },
    #[error("expecting channels of format '{expected}' yet received channel name {name}")]
    InvalidChannelName { name: String, expected: String },
    #[error("device {dev} has task type {actual}, operation requires {expected}")]
    TaskTypeMismatch {
        dev: String,
        expected: String,
        actual: String,
    },
    #[error("channel {chan}: default value {value} is not allowed (digital lines accept 0 or 1)")]
    InvalidDefaultValue { chan: String, value: f64 },
    #[error("device {name}: sampling rate {samp_rate} must be positive and finite")]
    InvalidSampRate { name: String, samp_rate: f64 },
}

/// Errors raised by the synchronisation configuration of devices.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("device {dev} needs to explicitly acknowledge exporting 10MHz clk by setting ref_clk_rate=1e7 (got {rate})")]
    RefClkRate { dev: String, rate: f64 },
    #[error("only one device may export the start trigger, found exporters {exporters:?}")]
    MultipleTrigExporters { exporters: Vec<String> },
    #[error("devices {importers:?} import a start trigger but no device exports one")]
    MissingTrigExporter { importers: Vec<String> },
}

/// Errors raised during compilation. A failed compile publishes nothing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("attempting to compile channel {chan} with no instructions")]
    EmptyTimeline { chan: String },
    #[error("{target}: stop position {requested} is below the last instruction end position {required}")]
    StopTimeTooShort {
        target: String,
        requested: usize,
        required: usize,
    },
    #[error("channel {chan}: instruction index {idx} is out of range for instr_end of length {len}")]
    IndexMismatch { chan: String, idx: usize, len: usize },
    #[error("channels of device {dev} have unequal compiled lengths: {samps:?}")]
    UnequalLengths {
        dev: String,
        samps: Vec<(String, usize)>,
    },
    #[error("a stream is in flight, the compile cache is locked")]
    Busy,
}

/// Errors raised when sampling compiled signals.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("attempting to calculate signal on not-compiled channel {chan}")]
    NotCompiled { chan: String },
    #[error("{target}: invalid sampling interval {start_pos}..{end_pos}")]
    InvalidInterval {
        target: String,
        start_pos: usize,
        end_pos: usize,
    },
    #[error("channel {chan}: interval end {end_pos} exceeds compiled length {total_samps}")]
    OutOfRange {
        chan: String,
        end_pos: usize,
        total_samps: usize,
    },
    #[error("{target}: buffer has shape {actual:?}, expected {expected:?}")]
    BufferShape {
        target: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("device {dev} has no compiled channel with streamable={require_streamable}, editable={require_editable}")]
    NoChannels {
        dev: String,
        require_streamable: bool,
        require_editable: bool,
    },
}

/// Top-level error of the crate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NiCompError {
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Signal(#[from] SignalError),
}

pub type Result<T> = std::result::Result<T, NiCompError>;

#[cfg(feature = "python")]
impl From<NiCompError> for pyo3::PyErr {
    fn from(err: NiCompError) -> Self {
        pyo3::exceptions::PyValueError::new_err(err.to_string())
    }
}
