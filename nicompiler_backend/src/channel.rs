//! Implements struct and methods corresponding to NI channels. See [`BaseChannel`] for
//! implementation details.
//!
//! ## Editable and streamable channels
//!
//! A channel is *editable* if users add instructions to it, and *streamable* if its compiled
//! signal is what gets written to the card.
//!
//! - Analogue output channels (`ao<N>`) are both editable and streamable.
//! - Digital output lines (`port<P>/line<L>`) are editable but not streamable: NI-DAQmx writes
//!   whole ports. At compile time the device merges all lines of a port into one `port<P>`
//!   channel, which is streamable but not editable (see [`crate::device::BaseDevice::compile`]).
//!
//! ## Edit cache and compile cache
//!
//! The edit cache of a channel is its [`EditTimeline`]. The compile cache is the pair
//! `(instr_end, instr_val)`: `instr_val[i]` generates the signal on ticks
//! `instr_end[i - 1]..instr_end[i]` (with `instr_end[-1] = 0`). Compilation never touches the
//! timeline: [`BaseChannel::build_compile_cache`] reads it and returns a fresh [`CompileCache`],
//! [`BaseChannel::commit_compile_cache`] publishes it.

use ndarray::s;
use std::fmt;

use crate::error::{CompileError, EditError, SignalError};
use crate::instruction::*;
use crate::timeline::EditTimeline;
use crate::utils::time_to_tick;

/// Task type of a device, and of the channels it hosts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskType {
    AO,
    DO,
}
impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TaskType::AO => "AO",
                TaskType::DO => "DO",
            }
        )
    }
}

/// Result of compiling one channel against a given stop position.
///
/// `instr_end` is strictly increasing, ends at the stop position and has one entry per logical
/// segment: every edited instruction, every gap between instructions and the trailing hold.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompileCache {
    pub instr_end: Vec<usize>,
    pub instr_val: Vec<Instruction>,
}

pub trait BaseChannel {
    // Field methods
    fn samp_rate(&self) -> f64;
    fn task_type(&self) -> TaskType;
    fn name(&self) -> &str;
    fn default_value(&self) -> f64;
    fn reset_value(&self) -> f64;
    fn is_fresh_compiled(&self) -> bool;
    fn timeline(&self) -> &EditTimeline;
    fn instr_end(&self) -> &Vec<usize>;
    fn instr_val(&self) -> &Vec<Instruction>;
    // Mutable field references
    fn fresh_compiled_(&mut self) -> &mut bool;
    fn reset_value_(&mut self) -> &mut f64;
    fn timeline_(&mut self) -> &mut EditTimeline;
    fn instr_end_(&mut self) -> &mut Vec<usize>;
    fn instr_val_(&mut self) -> &mut Vec<Instruction>;

    /// Users add instructions to editable channels: all AO channels and DO line channels
    fn editable(&self) -> bool {
        match self.task_type() {
            TaskType::AO => true,
            TaskType::DO => self.name().contains('/'),
        }
    }
    /// Streamable channels are written to the card: all AO channels and DO port channels
    fn streamable(&self) -> bool {
        match self.task_type() {
            TaskType::AO => true,
            TaskType::DO => !self.name().contains('/'),
        }
    }

    // timeline tracks edits, while (instr_end, instr_val) tracks compilation results
    fn is_compiled(&self) -> bool {
        !self.instr_end().is_empty()
    }
    fn is_edited(&self) -> bool {
        !self.timeline().is_empty()
    }

    /// Effective end of the last instruction, `start_pos + 1` for a trailing "go" instruction.
    fn last_instr_end_pos(&self) -> usize {
        self.timeline().last_end_pos()
    }
    fn last_instr_end_time(&self) -> f64 {
        self.last_instr_end_pos() as f64 / self.samp_rate()
    }

    /// Number of samples of the compiled signal, `0` if not compiled
    fn total_samps(&self) -> usize {
        self.instr_end().last().copied().unwrap_or(0)
    }
    fn total_run_time(&self) -> f64 {
        self.total_samps() as f64 / self.samp_rate()
    }

    /// Expands the timeline into a contiguous instruction stream ending at `stop_pos`.
    ///
    /// Instructions are walked in start order while tracking the value to hold after the
    /// previous one (initially `default_value`):
    /// - A gap before an instruction becomes a `CONST` segment with the held value.
    /// - A "go" instruction spans until the next instruction starts, or until `stop_pos`.
    /// - After a finite instruction, the held value is its last-tick value if `keep_val`,
    ///   otherwise `default_value`.
    /// - If the stream ends before `stop_pos`, a trailing `CONST` segment with the held value
    ///   is appended so that every channel reaches `stop_pos`.
    ///
    /// Segments are never merged, so the result has one `instr_end` entry per logical segment.
    ///
    /// # Errors
    /// - [`CompileError::EmptyTimeline`] if there are no instructions.
    /// - [`CompileError::StopTimeTooShort`] if the last instruction ends after `stop_pos`.
    fn build_compile_cache(&self, stop_pos: usize) -> Result<CompileCache, CompileError> {
        if self.timeline().is_empty() {
            return Err(CompileError::EmptyTimeline {
                chan: self.name().to_string(),
            });
        }
        if self.last_instr_end_pos() > stop_pos {
            return Err(CompileError::StopTimeTooShort {
                target: format!("channel {}", self.name()),
                requested: stop_pos,
                required: self.last_instr_end_pos(),
            });
        }

        let samp_rate = self.samp_rate();
        let books: Vec<&InstrBook> = self.timeline().iter().collect();
        let mut cache = CompileCache::default();
        let mut last_val = self.default_value();
        let mut last_end = 0;

        for (i, book) in books.iter().enumerate() {
            if last_end < book.start_pos {
                cache.instr_val.push(Instruction::new_const(last_val));
                cache.instr_end.push(book.start_pos);
            }
            let end_pos = match book.end_pos() {
                Some(end_pos) => end_pos,
                None => books.get(i + 1).map_or(stop_pos, |next| next.start_pos),
            };
            cache.instr_val.push(book.instr.clone());
            cache.instr_end.push(end_pos);

            last_val = if book.keep_val() {
                match book.instr.const_value() {
                    Some(value) => value,
                    None => book.instr.eval_point((end_pos - 1) as f64 / samp_rate),
                }
            } else {
                self.default_value()
            };
            last_end = end_pos;
        }
        if last_end < stop_pos {
            cache.instr_val.push(Instruction::new_const(last_val));
            cache.instr_end.push(stop_pos);
        }
        Ok(cache)
    }

    /// Publishes a compile cache produced by [`BaseChannel::build_compile_cache`].
    fn commit_compile_cache(&mut self, cache: CompileCache) {
        *self.instr_end_() = cache.instr_end;
        *self.instr_val_() = cache.instr_val;
        *self.fresh_compiled_() = true;
    }

    /// Compiles the channel in place. Recompiling a freshly compiled channel with the same
    /// `stop_pos` is a no-op.
    fn compile(&mut self, stop_pos: usize) -> Result<(), CompileError> {
        if self.is_fresh_compiled() && self.total_samps() == stop_pos {
            return Ok(());
        }
        let cache = self.build_compile_cache(stop_pos)?;
        self.commit_compile_cache(cache);
        log::debug!(
            "compiled channel {} into {} segments",
            self.name(),
            self.instr_end().len()
        );
        Ok(())
    }

    /// Returns the least index `i` such that `instr_end[i] > pos`, i.e. the compiled
    /// instruction generating tick `pos`. Returns `instr_end.len()` if `pos` is past the end.
    fn binfind_first_intersect_instr(&self, pos: usize) -> usize {
        self.instr_end().partition_point(|&end| end <= pos)
    }

    fn clear_edit_cache(&mut self) {
        self.timeline_().clear();
        *self.fresh_compiled_() = false;
    }

    fn clear_compile_cache(&mut self) {
        self.instr_end_().clear();
        self.instr_val_().clear();
        *self.fresh_compiled_() = false;
    }

    /// Base method through which to add instructions.
    ///
    /// # Arguments
    /// - `instr`: waveform function
    /// - `t`: start time in seconds
    /// - `dur_spec`: `Some((duration, keep_val))` for a finite instruction, `None` for a "go" instruction
    ///
    /// Times are placed on the clock grid with [`time_to_tick`].
    ///
    /// # Errors
    /// - [`EditError::InvalidTime`] for negative or non-finite `t`, or non-positive `duration`.
    /// - [`EditError::InvalidInterval`] if the duration rounds to zero ticks.
    /// - [`EditError::Overlap`] if the instruction intersects an existing one.
    ///
    /// ```
    /// # use nicompiler_backend::channel::*;
    /// # use nicompiler_backend::instruction::Instruction;
    /// let mut chan = Channel::new(TaskType::AO, "ao0", 1e3, 0.0);
    /// chan.add_instr(Instruction::new_const(1.0), 0.0, Some((1.0, false))).unwrap();
    /// chan.add_instr(Instruction::new_const(2.0), 1.0, None).unwrap();
    /// assert_eq!(chan.last_instr_end_pos(), 1001);
    /// assert!(chan.add_instr(Instruction::new_const(3.0), 0.5, None).is_err());
    /// ```
    fn add_instr(
        &mut self,
        instr: Instruction,
        t: f64,
        dur_spec: Option<(f64, bool)>,
    ) -> Result<(), EditError> {
        let name = self.name().to_string();
        if !t.is_finite() || t < 0.0 {
            return Err(EditError::InvalidTime {
                chan: name,
                what: "t",
                value: t,
            });
        }
        if let Some((duration, _keep_val)) = dur_spec {
            if !duration.is_finite() || duration <= 0.0 {
                return Err(EditError::InvalidTime {
                    chan: name,
                    what: "duration",
                    value: duration,
                });
            }
        }

        let samp_rate = self.samp_rate();
        let start_pos = time_to_tick(t, samp_rate);
        let end_spec = dur_spec.map(|(duration, keep_val)| (time_to_tick(t + duration, samp_rate), keep_val));
        let book = InstrBook::new(start_pos, end_spec, instr).ok_or_else(|| EditError::InvalidInterval {
            chan: name.clone(),
            start_pos,
            end_pos: end_spec.map_or(start_pos, |(end_pos, _)| end_pos),
        })?;

        self.timeline_().add(&name, book)?;
        // Upon adding an instruction, the channel is not freshly compiled anymore
        *self.fresh_compiled_() = false;
        Ok(())
    }

    fn constant(&mut self, value: f64, t: f64, dur_spec: Option<(f64, bool)>) -> Result<(), EditError> {
        self.add_instr(Instruction::new_const(value), t, dur_spec)
    }

    /// Adds a "go" instruction with `reset_value` at tick `reset_pos`.
    fn add_reset_instr(&mut self, reset_pos: usize) -> Result<(), EditError> {
        let last_end_pos = self.last_instr_end_pos();
        if reset_pos < last_end_pos {
            return Err(EditError::ResetTooEarly {
                target: format!("channel {}", self.name()),
                reset_pos,
                last_end_pos,
            });
        }
        let name = self.name().to_string();
        let book = InstrBook {
            start_pos: reset_pos,
            end_spec: None,
            instr: Instruction::new_const(self.reset_value()),
        };
        self.timeline_().add(&name, book)?;
        *self.fresh_compiled_() = false;
        Ok(())
    }

    /// Samples the compiled signal on `nsamps` points spread uniformly over ticks
    /// `start_pos..end_pos` and writes them into `buffer`.
    ///
    /// Sample `j` is taken at position `start_pos + j * (end_pos - start_pos) / nsamps`.
    ///
    /// # Errors
    /// [`SignalError`] if the channel is not compiled, the interval is empty or exceeds the
    /// compiled length, or `buffer` does not hold `nsamps` elements.
    fn fill_signal_nsamps(
        &self,
        start_pos: usize,
        end_pos: usize,
        nsamps: usize,
        buffer: &mut ndarray::ArrayViewMut1<f64>,
    ) -> Result<(), SignalError> {
        if !self.is_compiled() {
            return Err(SignalError::NotCompiled {
                chan: self.name().to_string(),
            });
        }
        if end_pos <= start_pos {
            return Err(SignalError::InvalidInterval {
                target: format!("channel {}", self.name()),
                start_pos,
                end_pos,
            });
        }
        if end_pos > self.total_samps() {
            return Err(SignalError::OutOfRange {
                chan: self.name().to_string(),
                end_pos,
                total_samps: self.total_samps(),
            });
        }
        if buffer.len() != nsamps {
            return Err(SignalError::BufferShape {
                target: format!("channel {}", self.name()),
                expected: (1, nsamps),
                actual: (1, buffer.len()),
            });
        }

        let span = end_pos - start_pos;
        let samp_rate = self.samp_rate();
        // First buffer index whose sample position is at or after `pos`
        let cvt_idx = |pos: usize| ((pos - start_pos) * nsamps + span - 1) / span;
        for (j, t) in buffer.iter_mut().enumerate() {
            *t = (start_pos as f64 + j as f64 * span as f64 / nsamps as f64) / samp_rate;
        }

        let start_instr_idx = self.binfind_first_intersect_instr(start_pos);
        let mut cur_pos = start_pos;
        for i in start_instr_idx..self.instr_end().len() {
            if cur_pos >= end_pos {
                break;
            }
            let seg_end = std::cmp::min(end_pos, self.instr_end()[i]);
            let mut slice = buffer.slice_mut(s![cvt_idx(cur_pos)..cvt_idx(seg_end)]);
            self.instr_val()[i].eval_inplace(&mut slice);
            cur_pos = seg_end;
        }
        Ok(())
    }

    /// Convenience wrapper around [`BaseChannel::fill_signal_nsamps`] taking times in seconds.
    fn calc_signal_nsamps(
        &self,
        start_time: f64,
        end_time: f64,
        nsamps: usize,
    ) -> Result<Vec<f64>, SignalError> {
        let start_pos = time_to_tick(start_time, self.samp_rate());
        let end_pos = time_to_tick(end_time, self.samp_rate());
        let mut buffer = ndarray::Array1::<f64>::zeros(nsamps);
        self.fill_signal_nsamps(start_pos, end_pos, nsamps, &mut buffer.view_mut())?;
        Ok(buffer.to_vec())
    }
}

#[derive(Clone, Debug)]
pub struct Channel {
    samp_rate: f64,
    task_type: TaskType,
    fresh_compiled: bool,
    name: String,
    default_value: f64,
    reset_value: f64,
    timeline: EditTimeline,
    instr_end: Vec<usize>,
    instr_val: Vec<Instruction>,
}

impl BaseChannel for Channel {
    fn samp_rate(&self) -> f64 {
        self.samp_rate
    }
    fn task_type(&self) -> TaskType {
        self.task_type
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn default_value(&self) -> f64 {
        self.default_value
    }
    fn reset_value(&self) -> f64 {
        self.reset_value
    }
    fn is_fresh_compiled(&self) -> bool {
        self.fresh_compiled
    }
    fn timeline(&self) -> &EditTimeline {
        &self.timeline
    }
    fn instr_end(&self) -> &Vec<usize> {
        &self.instr_end
    }
    fn instr_val(&self) -> &Vec<Instruction> {
        &self.instr_val
    }
    fn fresh_compiled_(&mut self) -> &mut bool {
        &mut self.fresh_compiled
    }
    fn reset_value_(&mut self) -> &mut f64 {
        &mut self.reset_value
    }
    fn timeline_(&mut self) -> &mut EditTimeline {
        &mut self.timeline
    }
    fn instr_end_(&mut self) -> &mut Vec<usize> {
        &mut self.instr_end
    }
    fn instr_val_(&mut self) -> &mut Vec<Instruction> {
        &mut self.instr_val
    }
}

impl Channel {
    /// Creates a channel. `reset_value` starts out equal to `default_value`.
    pub fn new(task_type: TaskType, name: &str, samp_rate: f64, default_value: f64) -> Self {
        Self {
            samp_rate,
            task_type,
            fresh_compiled: false,
            name: name.to_string(),
            default_value,
            reset_value: default_value,
            timeline: EditTimeline::new(),
            instr_end: Vec::new(),
            instr_val: Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::channel::*;
    use crate::error::*;
    use crate::instruction::*;

    fn ao(samp_rate: f64) -> Channel {
        Channel::new(TaskType::AO, "ao0", samp_rate, 0.0)
    }

    #[test]
    fn editable_streamable() {
        assert!(ao(1.0).editable() && ao(1.0).streamable());
        let line = Channel::new(TaskType::DO, "port0/line3", 1.0, 0.0);
        assert!(line.editable() && !line.streamable());
        let port = Channel::new(TaskType::DO, "port0", 1.0, 0.0);
        assert!(!port.editable() && port.streamable());
    }

    #[test]
    fn gaps_and_trailing_hold() {
        let mut chan = ao(1.0);
        chan.constant(1.0, 2.0, Some((2.0, true))).unwrap();
        chan.constant(2.0, 6.0, Some((1.0, false))).unwrap();
        let cache = chan.build_compile_cache(10).unwrap();
        // pad(0) | 1.0 | hold 1.0 | 2.0 | default
        assert_eq!(cache.instr_end, vec![2, 4, 6, 7, 10]);
        let vals: Vec<Option<f64>> = cache.instr_val.iter().map(|i| i.const_value()).collect();
        assert_eq!(vals, vec![Some(0.0), Some(1.0), Some(1.0), Some(2.0), Some(0.0)]);

        // Building does not publish anything
        assert!(!chan.is_compiled());
        chan.commit_compile_cache(cache);
        assert_eq!(chan.total_samps(), 10);
    }

    #[test]
    fn default_value_padding() {
        let mut chan = Channel::new(TaskType::AO, "ao1", 1.0, -5.0);
        chan.constant(1.0, 1.0, Some((1.0, false))).unwrap();
        chan.compile(3).unwrap();
        let vals: Vec<Option<f64>> = chan.instr_val().iter().map(|i| i.const_value()).collect();
        assert_eq!(vals, vec![Some(-5.0), Some(1.0), Some(-5.0)]);
        assert_eq!(chan.instr_end(), &vec![1, 2, 3]);
    }

    #[test]
    fn go_instructions_span_to_next_edge() {
        let mut chan = ao(1.0);
        chan.add_instr(Instruction::new_const(1.0), 0.0, None).unwrap();
        chan.add_instr(Instruction::new_const(2.0), 5.0, None).unwrap();
        chan.compile(8).unwrap();
        assert_eq!(chan.instr_end(), &vec![5, 8]);
    }

    #[test]
    fn keep_val_holds_last_tick() {
        let mut chan = ao(10.0);
        // Ramp from 0 to 0.9 over ticks 0..10, last tick at t = 0.9
        chan.add_instr(Instruction::new_linramp(0.0, 0.9, 0.0, 0.9), 0.0, Some((1.0, true)))
            .unwrap();
        chan.compile(20).unwrap();
        assert_eq!(chan.instr_end(), &vec![10, 20]);
        let hold = chan.instr_val()[1].const_value().unwrap();
        assert!((hold - 0.9).abs() < 1e-12);
    }

    #[test]
    fn compile_errors() {
        let mut chan = ao(1.0);
        assert_eq!(
            chan.compile(10),
            Err(CompileError::EmptyTimeline {
                chan: "ao0".to_string()
            })
        );
        chan.constant(1.0, 0.0, Some((5.0, false))).unwrap();
        assert!(matches!(
            chan.compile(4),
            Err(CompileError::StopTimeTooShort {
                requested: 4,
                required: 5,
                ..
            })
        ));
        // Nothing was published
        assert!(!chan.is_compiled());
    }

    #[test]
    fn edit_errors() {
        let mut chan = ao(1e3);
        assert!(matches!(
            chan.constant(1.0, -1.0, None),
            Err(EditError::InvalidTime { what: "t", .. })
        ));
        assert!(matches!(
            chan.constant(1.0, 0.0, Some((0.0, false))),
            Err(EditError::InvalidTime { what: "duration", .. })
        ));
        // Shorter than one tick
        assert!(matches!(
            chan.constant(1.0, 0.0, Some((1e-4, false))),
            Err(EditError::InvalidInterval { .. })
        ));
        assert!(chan.timeline().is_empty());
    }

    #[test]
    fn recompile_is_idempotent() {
        let mut chan = ao(1e3);
        chan.add_instr(Instruction::new_sine(5.0, None, None, None), 0.1, Some((0.2, true)))
            .unwrap();
        chan.compile(1000).unwrap();
        let first = (chan.instr_end().clone(), chan.instr_val().clone());
        chan.compile(1000).unwrap();
        assert_eq!(first, (chan.instr_end().clone(), chan.instr_val().clone()));
        // A different stop position rebuilds
        chan.compile(2000).unwrap();
        assert_eq!(chan.total_samps(), 2000);
    }

    #[test]
    fn reset_instr() {
        let mut chan = ao(1.0);
        *chan.reset_value_() = 3.0;
        chan.constant(1.0, 0.0, Some((4.0, true))).unwrap();
        assert!(matches!(
            chan.add_reset_instr(3),
            Err(EditError::ResetTooEarly { .. })
        ));
        chan.add_reset_instr(4).unwrap();
        chan.compile(6).unwrap();
        assert_eq!(chan.instr_end(), &vec![4, 6]);
        assert_eq!(chan.instr_val()[1].const_value(), Some(3.0));
    }

    #[test]
    fn fill_signal() {
        let mut chan = ao(1.0);
        chan.constant(1.0, 2.0, Some((2.0, false))).unwrap();
        chan.compile(6).unwrap();

        let full = chan.calc_signal_nsamps(0.0, 6.0, 6).unwrap();
        assert_eq!(full, vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);

        // Downsampled: positions 0, 2, 4
        let coarse = chan.calc_signal_nsamps(0.0, 6.0, 3).unwrap();
        assert_eq!(coarse, vec![0.0, 1.0, 0.0]);

        // Sub-interval starting inside an instruction
        let part = chan.calc_signal_nsamps(3.0, 5.0, 2).unwrap();
        assert_eq!(part, vec![1.0, 0.0]);

        assert!(matches!(
            chan.calc_signal_nsamps(0.0, 7.0, 7),
            Err(SignalError::OutOfRange { .. })
        ));
        assert!(matches!(
            chan.calc_signal_nsamps(3.0, 3.0, 1),
            Err(SignalError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn fill_signal_sine_times() {
        let mut chan = ao(4.0);
        chan.add_instr(Instruction::new_sine(1.0, None, None, None), 0.0, Some((1.0, false)))
            .unwrap();
        chan.compile(4).unwrap();
        let sig = chan.calc_signal_nsamps(0.0, 1.0, 4).unwrap();
        let expected = [0.0, 1.0, 0.0, -1.0];
        for (a, b) in sig.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}
