//! Implements struct and methods corresponding to NI devices. See [`BaseDevice`] for
//! implementation details.
//!
//! A NI control system consists of one or both of the components:
//! 1. Devices (cards) directly attached the computer via PCIe/USB.
//! 2. A PCIe link card connected to a PXIe chassis, which hosts multiple PXIe cards.
//!
//! ## Device
//! In this library, every [`Device`] object corresponds to a particular task for
//! a physical device (e.g. analogue output for `PXI1Slot1`). A `Device` trivially implements the
//! [`BaseDevice`] trait by supplying field methods.
//!
//! [`Device`] fields keep track of the physical channels associated with the device
//! as well as device-wide data such as device name, trigger line, and synchronization behavior.
//! For editing and compiling behavior of devices, see the [`BaseDevice`] trait.
//!
//! ### Editable and streamable channels in devices
//! Library users create and edit editable channels. During compilation, based on the device's task type,
//! the library may internally add streamable channels.
//! For more details on editable and streamable channels, see the editable v.s. streamable section in
//! [`channel` module].
//!
//! ### Two-phase compilation
//! [`BaseDevice::prepare_compile`] only reads the device and returns a [`DeviceCompileCache`];
//! [`BaseDevice::commit_compile`] publishes it. The experiment runs the first phase for all devices
//! in parallel and commits only if every device succeeded.
//!
//! [`channel` module]: crate::channel

use indexmap::IndexMap;
use ndarray::{s, Array2};
use regex::Regex;
use std::collections::BTreeSet;

use crate::channel::*;
use crate::error::{CompileError, ConfigError, EditError, RegistryError, SignalError};
use crate::instruction::*;
use crate::utils::*;

/// Compile results of one device, ready to be published with [`BaseDevice::commit_compile`].
#[derive(Clone, Debug)]
pub struct DeviceCompileCache {
    /// Number of samples every compiled channel generates
    pub stop_pos: usize,
    /// Caches of the edited editable channels
    pub chans: Vec<(String, CompileCache)>,
    /// Streamable port channels merged from DO lines
    pub ports: Vec<Channel>,
}

/// Merges the compile caches of the lines of one DO port into a streamable port channel.
///
/// The port `instr_end` is the sorted union of all line `instr_end`s. On each interval the port
/// value is `base_value + Σ value_line * 2^line`, where `base_value` accounts for the lines of the
/// port that were not edited. Adjacent intervals with equal values are merged.
///
/// # Errors
/// [`CompileError::IndexMismatch`] if a line's compile cache does not cover the whole union, i.e.
/// its instruction index runs past its own `instr_end`.
///
/// ```
/// # use nicompiler_backend::channel::CompileCache;
/// # use nicompiler_backend::device::merge_port_lines;
/// # use nicompiler_backend::instruction::Instruction;
/// # use nicompiler_backend::channel::BaseChannel;
/// let line0 = CompileCache {
///     instr_end: vec![2, 4],
///     instr_val: vec![Instruction::new_const(1.0), Instruction::new_const(0.0)],
/// };
/// let line2 = CompileCache {
///     instr_end: vec![1, 4],
///     instr_val: vec![Instruction::new_const(0.0), Instruction::new_const(1.0)],
/// };
/// let port = merge_port_lines("port0", 1.0, 0.0, &[("port0/line0", 0, &line0), ("port0/line2", 2, &line2)]).unwrap();
/// assert_eq!(port.instr_end(), &vec![1, 2, 4]);
/// let vals: Vec<f64> = port.instr_val().iter().map(|i| i.const_value().unwrap()).collect();
/// assert_eq!(vals, vec![1.0, 5.0, 4.0]);
/// ```
pub fn merge_port_lines(
    port_name: &str,
    samp_rate: f64,
    base_value: f64,
    lines: &[(&str, usize, &CompileCache)],
) -> Result<Channel, CompileError> {
    let instr_end: Vec<usize> = lines
        .iter()
        .flat_map(|(_name, _line, cache)| cache.instr_end.iter().copied())
        .collect::<BTreeSet<usize>>()
        .into_iter()
        .collect();

    let mut instr_val = vec![base_value; instr_end.len()];
    for &(name, line, cache) in lines {
        let weight = 2.0f64.powi(line as i32);
        let mut chan_instr_idx = 0;
        let mut seg_start = 0;
        for (i, &end) in instr_end.iter().enumerate() {
            if chan_instr_idx >= cache.instr_end.len() {
                return Err(CompileError::IndexMismatch {
                    chan: name.to_string(),
                    idx: chan_instr_idx,
                    len: cache.instr_end.len(),
                });
            }
            let func = &cache.instr_val[chan_instr_idx];
            let value = match func.const_value() {
                Some(value) => value,
                None => func.eval_point(seg_start as f64 / samp_rate),
            };
            instr_val[i] += value * weight;
            if end == cache.instr_end[chan_instr_idx] {
                chan_instr_idx += 1;
            }
            seg_start = end;
        }
    }

    // Merge adjacent intervals with equal port values
    let mut merged = CompileCache::default();
    for (end, val) in instr_end.into_iter().zip(instr_val) {
        match merged.instr_val.last() {
            Some(last) if last.const_value() == Some(val) => {
                if let Some(last_end) = merged.instr_end.last_mut() {
                    *last_end = end;
                }
            }
            _ => {
                merged.instr_val.push(Instruction::new_const(val));
                merged.instr_end.push(end);
            }
        }
    }

    let mut port = Channel::new(TaskType::DO, port_name, samp_rate, base_value);
    port.commit_compile_cache(merged);
    Ok(port)
}

/// Operations shared by every NI card task: channel registry, clock/trigger configuration,
/// compilation and signal readout. Implementors only supply the field accessors.
///
/// - Sync config: [`BaseDevice::cfg_trig`], [`BaseDevice::cfg_ref_clk`],
///   [`BaseDevice::cfg_samp_clk_src`]; see [`Device`] for wiring examples.
/// - Registry: [`BaseDevice::add_channel`] plus the `editable_channels*` / `compiled_channels` views.
/// - State: [`BaseDevice::is_edited`], [`BaseDevice::is_compiled`], [`BaseDevice::is_fresh_compiled`],
///   and the matching `clear_*_cache` methods.
/// - Compile: [`BaseDevice::prepare_compile`] then [`BaseDevice::commit_compile`], or
///   [`BaseDevice::compile`] for both. DO line channels are merged into port channels here.
/// - Readout: [`BaseDevice::fill_signal_nsamps`] and [`BaseDevice::calc_signal_nsamps`] sample the
///   compiled instructions.
pub trait BaseDevice {
    // Immutable accessors (getters)
    fn channels(&self) -> &IndexMap<String, Channel>;
    fn name(&self) -> &str;
    fn task_type(&self) -> TaskType;
    fn samp_rate(&self) -> f64;
    fn samp_clk_src(&self) -> Option<&str>;
    fn trig_line(&self) -> Option<&str>;
    fn export_trig(&self) -> Option<bool>;
    fn ref_clk_line(&self) -> Option<&str>;
    fn export_ref_clk(&self) -> Option<bool>;
    fn ref_clk_rate(&self) -> Option<f64>;

    // Mutable accessors
    fn channels_(&mut self) -> &mut IndexMap<String, Channel>;
    fn samp_clk_src_(&mut self) -> &mut Option<String>;
    fn trig_line_(&mut self) -> &mut Option<String>;
    fn export_trig_(&mut self) -> &mut Option<bool>;
    fn ref_clk_line_(&mut self) -> &mut Option<String>;
    fn export_ref_clk_(&mut self) -> &mut Option<bool>;
    fn ref_clk_rate_(&mut self) -> &mut Option<f64>;

    /// Shortcut to borrow channel instance by name
    fn chan(&self, name: &str) -> Result<&Channel, RegistryError> {
        self.channels()
            .get(name)
            .ok_or_else(|| RegistryError::UnknownChannel {
                dev: self.name().to_string(),
                chan: name.to_string(),
                registered: self.channels().keys().cloned().collect(),
            })
    }
    /// Shortcut to mutably borrow channel instance by name
    fn chan_(&mut self, name: &str) -> Result<&mut Channel, RegistryError> {
        if !self.channels().contains_key(name) {
            return Err(RegistryError::UnknownChannel {
                dev: self.name().to_string(),
                chan: name.to_string(),
                registered: self.channels().keys().cloned().collect(),
            });
        }
        Ok(&mut self.channels_()[name])
    }

    /// Returns sample clock period calculated as `1.0 / self.samp_rate()`
    fn clock_period(&self) -> f64 {
        1.0 / self.samp_rate()
    }
    /// Configures the sample clock source for the device.
    ///
    /// # Arguments
    ///
    /// * `src` - The name of the sample clock source.
    fn cfg_samp_clk_src(&mut self, src: &str) {
        *(self.samp_clk_src_()) = Some(src.to_string());
    }

    /// Configures the trigger settings for the device.
    ///
    /// Depending on the value of `export_trig`, this method either:
    ///
    /// * Exports the device task's start trigger to `trig_line` (if `export_trig` is `true`), or
    /// * Imports the device task's start trigger from `trig_line` (if `export_trig` is `false`).
    fn cfg_trig(&mut self, trig_line: &str, export_trig: bool) {
        *(self.trig_line_()) = Some(trig_line.to_string());
        *(self.export_trig_()) = Some(export_trig);
    }

    /// Configures the reference clock settings for the device.
    ///
    /// If `export_ref_clk` is `true`, the device exports its 10MHz on-board reference clock to
    /// `ref_clk_line`, and `ref_clk_rate` must be set to 1e7 to acknowledge that.
    /// Otherwise the device phase-locks to the reference at `ref_clk_line` running at `ref_clk_rate`.
    ///
    /// # Errors
    /// [`ConfigError::RefClkRate`] if exporting with a rate other than 1e7.
    fn cfg_ref_clk(
        &mut self,
        ref_clk_line: &str,
        ref_clk_rate: f64,
        export_ref_clk: bool,
    ) -> Result<(), ConfigError> {
        if export_ref_clk && ref_clk_rate != 1e7 {
            return Err(ConfigError::RefClkRate {
                dev: self.name().to_string(),
                rate: ref_clk_rate,
            });
        }
        *(self.ref_clk_line_()) = Some(ref_clk_line.to_string());
        *(self.ref_clk_rate_()) = Some(ref_clk_rate);
        *(self.export_ref_clk_()) = Some(export_ref_clk);
        Ok(())
    }

    /// Returns a vector of references to editable channels
    fn editable_channels(&self) -> Vec<&Channel> {
        self.channels()
            .values()
            .filter(|&chan| chan.editable())
            .collect()
    }
    /// Returns a vector of mutable references to editable channels
    fn editable_channels_(&mut self) -> Vec<&mut Channel> {
        self.channels_()
            .values_mut()
            .filter(|chan| (*chan).editable())
            .collect()
    }

    /// Adds a new channel to the device.
    ///
    /// This base method validates the provided `name` based on the device's `task_type`
    /// to ensure it adheres to the expected naming convention for the respective task type.
    ///
    /// # Naming Conventions:
    /// - For `TaskType::AO`: Channels should be named following the pattern "ao(number)"
    ///   (e.g., "ao0", "ao1").
    /// - For `TaskType::DO`: Channels should be named following the pattern "port(number)/line(number)"
    ///   (e.g., "port0/line1").
    ///
    /// # Errors
    /// - [`RegistryError::InvalidChannelName`] if `name` does not follow the naming convention.
    /// - [`RegistryError::DuplicateChannel`] if a channel with the same `name` already exists.
    /// - [`RegistryError::InvalidDefaultValue`] for a DO line default other than 0 or 1, or a non-finite AO default.
    ///
    /// # Arguments
    /// - `name`: Name of the channel as seen by the NI driver.
    /// - `default_value`: signal value for not explicitly defined intervals.
    fn add_channel(&mut self, name: &str, default_value: f64) -> Result<(), RegistryError> {
        let (name_match_string, name_format_description) = match self.task_type() {
            TaskType::AO => (r"^ao\d+$", "ao(number)"),
            TaskType::DO => (r"^port\d+/line\d+$", "port(number)/line(number)"),
        };
        let name_matches = Regex::new(name_match_string)
            .map(|re| re.is_match(name))
            .unwrap_or(false);
        if !name_matches {
            return Err(RegistryError::InvalidChannelName {
                name: name.to_string(),
                expected: name_format_description.to_string(),
            });
        }
        if self.channels().contains_key(name) {
            return Err(RegistryError::DuplicateChannel {
                dev: self.name().to_string(),
                chan: name.to_string(),
            });
        }
        let valid_default = match self.task_type() {
            TaskType::AO => default_value.is_finite(),
            TaskType::DO => default_value == 0.0 || default_value == 1.0,
        };
        if !valid_default {
            return Err(RegistryError::InvalidDefaultValue {
                chan: name.to_string(),
                value: default_value,
            });
        }
        let new_channel = Channel::new(self.task_type(), name, self.samp_rate(), default_value);
        self.channels_().insert(name.to_string(), new_channel);
        Ok(())
    }

    /// Adds a "go" instruction with each editable channel's reset value at `reset_time`.
    ///
    /// # Errors
    /// [`EditError::ResetTooEarly`] if `reset_time` falls on a tick before the last instruction end.
    /// No channel is modified in that case.
    fn add_reset_instr(&mut self, reset_time: f64) -> Result<(), EditError> {
        let reset_pos = time_to_tick(reset_time, self.samp_rate());
        let last_end_pos = self.last_instr_end_pos();
        if reset_pos < last_end_pos {
            return Err(EditError::ResetTooEarly {
                target: format!("device {}", self.name()),
                reset_pos,
                last_end_pos,
            });
        }
        for chan in self.editable_channels_() {
            chan.add_reset_instr(reset_pos)?;
        }
        Ok(())
    }

    /// A device is compiled if any of its editable channels are compiled.
    /// Also see [`BaseChannel::is_compiled`]
    fn is_compiled(&self) -> bool {
        self.editable_channels()
            .iter()
            .any(|channel| channel.is_compiled())
    }
    /// A device is marked edited if any of its editable channels are edited.
    /// Also see [`BaseChannel::is_edited`]
    fn is_edited(&self) -> bool {
        self.editable_channels()
            .iter()
            .any(|channel| channel.is_edited())
    }
    /// A device is marked fresh-compiled if it is edited and the compile cache of every editable
    /// channel reflects its current timeline.
    /// Also see [`BaseChannel::is_fresh_compiled`]
    fn is_fresh_compiled(&self) -> bool {
        self.is_edited()
            && self.editable_channels().iter().all(|channel| {
                channel.is_fresh_compiled() || (!channel.is_edited() && !channel.is_compiled())
            })
    }
    /// Clears the edit-cache fields for all channels.
    /// Also see [`BaseChannel::clear_edit_cache`]
    fn clear_edit_cache(&mut self) {
        for chan in self.channels_().values_mut() {
            chan.clear_edit_cache()
        }
    }
    /// Clears the compile-cache fields for all channels.
    /// Also see [`BaseChannel::clear_compile_cache`]
    fn clear_compile_cache(&mut self) {
        // Remove all made-up "port" channels
        self.channels_().retain(|_name, chan| chan.editable());

        for chan in self.channels_().values_mut() {
            chan.clear_compile_cache()
        }
    }

    /// Returns `true` if the last instruction of some editable channel is a finite one ending
    /// exactly at `stop_tick`. "Go" instructions never count.
    fn check_end_clipped(&self, stop_tick: usize) -> bool {
        self.editable_channels()
            .iter()
            .filter_map(|chan| chan.timeline().last())
            .any(|last_instr| last_instr.end_pos() == Some(stop_tick))
    }

    /// Number of samples the device generates when compiled against `stop_time`.
    ///
    /// - If some channel's last finite instruction ends exactly on the stop tick, one extra sample is
    ///   generated so that the closing edge of that instruction is formed by its after-end padding.
    ///   Without it, NI cards simply keep the last generated value and the pulse has no closing edge.
    /// - Edited devices generate at least [`MIN_TOTAL_SAMPS`] samples.
    ///
    /// # Errors
    /// [`CompileError::StopTimeTooShort`] if `stop_time` falls before the last instruction end.
    fn compile_stop_pos(&self, stop_time: f64) -> Result<usize, CompileError> {
        let stop_tick = time_to_tick(stop_time, self.samp_rate());
        if stop_tick < self.last_instr_end_pos() {
            return Err(CompileError::StopTimeTooShort {
                target: format!("device {}", self.name()),
                requested: stop_tick,
                required: self.last_instr_end_pos(),
            });
        }
        let stop_pos = if self.check_end_clipped(stop_tick) {
            stop_tick + 1
        } else {
            stop_tick
        };
        Ok(std::cmp::max(stop_pos, MIN_TOTAL_SAMPS))
    }

    /// Compiles all edited editable channels against `stop_time` without modifying the device.
    ///
    /// Unedited channels are skipped. For DO devices all the line channels belonging to the same port
    /// are merged into a single, streamable port channel (see [`merge_port_lines`]). The `n`th bit of
    /// the integer value of a port instruction is the state of the `n`th line; lines of the port that
    /// were not edited contribute their default value.
    ///
    /// Returns `Ok(None)` if the device is freshly compiled against the same number of samples.
    /// Returns an empty cache for devices without edits.
    fn prepare_compile(&self, stop_time: f64) -> Result<Option<DeviceCompileCache>, CompileError> {
        if !self.is_edited() {
            return Ok(Some(DeviceCompileCache {
                stop_pos: 0,
                chans: Vec::new(),
                ports: Vec::new(),
            }));
        }
        let stop_pos = self.compile_stop_pos(stop_time)?;
        if self.is_fresh_compiled() && self.total_samps() == stop_pos {
            return Ok(None);
        }

        let mut chans = Vec::new();
        for chan in self.editable_channels().iter().filter(|chan| chan.is_edited()) {
            chans.push((chan.name().to_string(), chan.build_compile_cache(stop_pos)?));
        }

        let mut ports = Vec::new();
        if self.task_type() == TaskType::DO {
            for match_port in self.unique_port_numbers() {
                let mut base_value = 0.0;
                for chan in self.editable_channels() {
                    if let Some((port, line)) = extract_port_line_numbers(chan.name()) {
                        if port == match_port && !chan.is_edited() {
                            base_value += chan.default_value() * 2.0f64.powi(line as i32);
                        }
                    }
                }
                let lines: Vec<(&str, usize, &CompileCache)> = chans
                    .iter()
                    .filter_map(|(name, cache)| {
                        extract_port_line_numbers(name)
                            .filter(|(port, _line)| *port == match_port)
                            .map(|(_port, line)| (name.as_str(), line, cache))
                    })
                    .collect();
                ports.push(merge_port_lines(
                    &format!("port{match_port}"),
                    self.samp_rate(),
                    base_value,
                    &lines,
                )?);
            }
        }
        Ok(Some(DeviceCompileCache {
            stop_pos,
            chans,
            ports,
        }))
    }

    /// Publishes a cache produced by [`BaseDevice::prepare_compile`]. Compile results of a previous
    /// run, including port channels, are dropped first.
    fn commit_compile(&mut self, cache: DeviceCompileCache) {
        self.clear_compile_cache();
        for (name, chan_cache) in cache.chans {
            if let Some(chan) = self.channels_().get_mut(&name) {
                chan.commit_compile_cache(chan_cache);
            }
        }
        for port in cache.ports {
            self.channels_().insert(port.name().to_string(), port);
        }
        log::debug!(
            "device {} compiled to {} samples",
            self.name(),
            cache.stop_pos
        );
    }

    /// Compiles all editable channels to produce a continuous instruction stream.
    ///
    /// Combines [`BaseDevice::prepare_compile`] and [`BaseDevice::commit_compile`].
    /// Returns the total run time of the device.
    fn compile(&mut self, stop_time: f64) -> Result<f64, CompileError> {
        if let Some(cache) = self.prepare_compile(stop_time)? {
            self.commit_compile(cache);
        }
        Ok(self.total_run_time())
    }

    /// Returns a vector of compiled channels based on the given criteria.
    ///
    /// # Arguments
    /// - `require_streamable`: If `true`, only compiled channels marked as streamable will be included in the result.
    /// - `require_editable`: If `true`, only compiled channels marked as editable will be included in the result.
    fn compiled_channels(&self, require_streamable: bool, require_editable: bool) -> Vec<&Channel> {
        self.channels()
            .values()
            .filter(|chan| {
                chan.is_compiled()
                    && (!require_streamable || chan.streamable())
                    && (!require_editable || chan.editable())
            })
            .collect()
    }

    /// Returns the total number of samples the card will generate according to the current compile cache.
    ///
    /// All channels are driven by the same sample clock, see [`BaseDevice::check_total_samps`]
    /// for the consistency check.
    fn total_samps(&self) -> usize {
        self.channels()
            .values()
            .map(|chan| chan.total_samps())
            .fold(0, usize::max)
    }

    /// Verifies that all compiled channels have the same number of samples and returns it.
    ///
    /// # Errors
    /// [`CompileError::UnequalLengths`] if compiled channels disagree, which happens when individual
    /// channels were compiled directly instead of through the device.
    fn check_total_samps(&self) -> Result<usize, CompileError> {
        let samps_per_chan: Vec<(String, usize)> = self
            .channels()
            .iter()
            .filter(|(_chan_name, chan)| chan.is_compiled())
            .map(|(chan_name, chan)| (chan_name.to_string(), chan.total_samps()))
            .collect();
        match samps_per_chan.first() {
            None => Ok(0),
            Some(&(_, first_val)) => {
                if samps_per_chan.iter().all(|(_, samps)| *samps == first_val) {
                    Ok(first_val)
                } else {
                    Err(CompileError::UnequalLengths {
                        dev: self.name().to_string(),
                        samps: samps_per_chan,
                    })
                }
            }
        }
    }

    /// Run time of the compiled signal in seconds
    fn total_run_time(&self) -> f64 {
        self.total_samps() as f64 / self.samp_rate()
    }

    fn last_instr_end_pos(&self) -> usize {
        self.editable_channels()
            .iter()
            .map(|chan| chan.last_instr_end_pos())
            .fold(0, usize::max)
    }
    /// Latest instruction end time among all editable channels.
    /// See [`BaseChannel::last_instr_end_pos`] for how individual channel end positions are determined.
    fn last_instr_end_time(&self) -> f64 {
        self.last_instr_end_pos() as f64 / self.samp_rate()
    }

    /// Fills `buffer` with signal values sampled from the compiled instructions.
    ///
    /// # Arguments
    /// - `start_pos`, `end_pos`: tick interval to sample.
    /// - `nsamps`: The number of samples to generate.
    /// - `buffer`: 2D array, the first axis corresponds to the channel index (in
    ///    [`BaseDevice::compiled_channels`] order) and the second axis to the sample index.
    /// - `require_streamable`: If `true`, only signals from channels marked as streamable will be generated.
    /// - `require_editable`: If `true`, only signals from editable channels are generated, which is
    ///    useful for debugging editing intentions.
    ///
    /// # Errors
    /// [`SignalError::BufferShape`] if `buffer` does not match the number of channels and `nsamps`,
    /// as well as any error of [`BaseChannel::fill_signal_nsamps`].
    fn fill_signal_nsamps(
        &self,
        start_pos: usize,
        end_pos: usize,
        nsamps: usize,
        buffer: &mut Array2<f64>,
        require_streamable: bool,
        require_editable: bool,
    ) -> Result<(), SignalError> {
        let chans = self.compiled_channels(require_streamable, require_editable);
        if buffer.dim() != (chans.len(), nsamps) {
            return Err(SignalError::BufferShape {
                target: format!("device {}", self.name()),
                expected: (chans.len(), nsamps),
                actual: buffer.dim(),
            });
        }
        for (i, chan) in chans.iter().enumerate() {
            let mut channel_slice = buffer.slice_mut(s![i, ..]);
            chan.fill_signal_nsamps(start_pos, end_pos, nsamps, &mut channel_slice)?;
        }
        Ok(())
    }

    /// Computes and returns the signal values for the compiled channels matching the criteria.
    ///
    /// # Errors
    /// [`SignalError::NoChannels`] if there is no channel fulfilling the requirements, as well as any
    /// error of [`BaseDevice::fill_signal_nsamps`].
    fn calc_signal_nsamps(
        &self,
        start_pos: usize,
        end_pos: usize,
        nsamps: usize,
        require_streamable: bool,
        require_editable: bool,
    ) -> Result<Array2<f64>, SignalError> {
        let num_chans = self
            .compiled_channels(require_streamable, require_editable)
            .len();
        if num_chans == 0 {
            return Err(SignalError::NoChannels {
                dev: self.name().to_string(),
                require_streamable,
                require_editable,
            });
        }
        let mut buffer = Array2::from_elem((num_chans, nsamps), 0.);
        self.fill_signal_nsamps(
            start_pos,
            end_pos,
            nsamps,
            &mut buffer,
            require_streamable,
            require_editable,
        )?;
        Ok(buffer)
    }

    /// Retrieves the sorted port numbers of the edited line channels.
    ///
    /// Only meaningful for DO devices; AO devices have no port lines and return an empty vector.
    fn unique_port_numbers(&self) -> Vec<usize> {
        self.editable_channels()
            .iter()
            .filter(|chan| chan.is_edited())
            .filter_map(|chan| extract_port_line_numbers(chan.name()))
            .map(|(port, _line)| port)
            .collect::<BTreeSet<usize>>()
            .into_iter()
            .collect()
    }
}

/// Represents a National Instruments (NI) device.
///
/// A `Device` is the primary structure used to interact with NI hardware. It groups multiple
/// channels, each of which corresponds to a physical channel on an NI device.
/// For editing and compiling behavior of devices, see the [`BaseDevice`] trait.
///
/// # Fields
/// - `channels`: A collection of channels associated with this device, in registration order.
/// - `name`: Name of the device as seen by the NI driver.
/// - `task_type`: Specifies the task type associated with the device.
/// - `samp_rate`: The sampling rate of the device in Hz.
/// - `samp_clk_src`: Optional source of the sampling clock; `None` for on-board clock source.
/// - `trig_line`: Optional identifier for the port through which to import/export the task start trigger.
///     `None` for trivial triggering behavior.
/// - `export_trig`: Optional Boolean indicating if the device exports its start trigger. If `true`, the device
///     exports the start trigger of the NI-task associated with this device through `trig_line`. If `false`,
///     the device imports the start trigger. In case that any device in an experiment imports a trigger,
///     one and only one of the devices must have `export_trig` set to `true`.
/// - `ref_clk_line`: Optional source of the reference clock to phase-lock the device clock to.
/// - `export_ref_clk`: Optional indicator of whether to export the reference clock.
/// - `ref_clk_rate`: Optional rate of the reference clock in Hz.
///
/// # Synchronization Methods
///
/// For experiments that do not require synchronization between devices, leave all optional fields as `None`.
/// However, for more accurate and cohesive experiments, we recommend at least implementing start-trigger synchronization.
///
/// ## Start-trigger Synchronization
///
/// Relevant fields: `trig_line`, `export_trig`.
///
/// Refer to the official [NI documentation on start-trigger synchronization](https://www.ni.com/docs/en-US/bundle/ni-daqmx/page/mxcncpts/syncstarttrigger.html).
///
/// One device exports its start trigger and the others import it. When the experiment begins, tasks on
/// devices with `export_trig` set to `false` wait for a digital edge trigger from the `trig_line` channel.
///
/// For PCIe devices, use a `PFI` label. For PXIe devices, use the label `PXI_Trig` followed by a number in the range 0-7.
/// The streaming backend ensures that devices importing the trigger are armed before the exporting device starts.
///
/// ### Example:
/// Here, the device `PXI1Slot6` exports its start trigger to `PXI1_Trig0`, while `PXI1Slot7` imports its start
/// trigger from the same line.
/// ```
/// # use nicompiler_backend::*;
/// let mut exp = Experiment::new();
/// exp.add_do_device("PXI1Slot6", 1e6).unwrap();
/// exp.add_do_device("PXI1Slot7", 1e6).unwrap();
/// exp.device_cfg_trig("PXI1Slot6", "PXI1_Trig0", true).unwrap();
/// exp.device_cfg_trig("PXI1Slot7", "PXI1_Trig0", false).unwrap();
/// assert!(exp.check_trig_config().is_ok());
/// ```
///
/// Configuring more than one exporter is rejected at compile time:
/// ```
/// # use nicompiler_backend::*;
/// let mut exp = Experiment::new();
/// exp.add_do_device("PXI1Slot6", 1e6).unwrap();
/// exp.add_do_device("PXI1Slot7", 1e6).unwrap();
/// exp.device_cfg_trig("PXI1Slot6", "PXI1_Trig0", true).unwrap();
/// exp.device_cfg_trig("PXI1Slot7", "PXI1_Trig0", true).unwrap();
/// assert!(exp.compile(Some(1.0)).is_err());
/// ```
///
/// So is a device expecting a start trigger while no device exports one:
/// ```
/// # use nicompiler_backend::*;
/// let mut exp = Experiment::new();
/// exp.add_do_device("PXI1Slot6", 1e6).unwrap();
/// exp.add_do_channel("PXI1Slot6", 0, 4, 0.).unwrap();
/// exp.device_cfg_trig("PXI1Slot6", "PXI1_Trig0", false).unwrap();
/// exp.go_high("PXI1Slot6", "port0/line4", 0.5).unwrap();
/// assert!(exp.compile(Some(1.)).is_err());
/// ```
///
/// ## Phase-lock to Reference Clock
///
/// Relevant fields: `ref_clk_line`, `ref_clk_rate`, `export_ref_clk`.
///
/// Refer to the [NI documentation on phase-lock synchronization](https://www.ni.com/docs/en-US/bundle/ni-daqmx/page/mxcncpts/syncrefclock.html).
///
/// Devices phase-lock their on-board oscillators to an external reference at `ref_clk_line`
/// and indicate its frequency via `ref_clk_rate`. A device can optionally export its 10MHz onboard reference clock
/// to `ref_clk_line` by setting `export_ref_clk` to `true`.
///
/// ### Example:
/// ```rust
/// use nicompiler_backend::*;
/// let mut exp = Experiment::new();
/// exp.add_ao_device("PXI1Slot3", 1e6).unwrap();
/// exp.device_cfg_trig("PXI1Slot3", "PXI1_Trig0", true).unwrap();
/// exp.device_cfg_ref_clk("PXI1Slot3", "PXI1_Trig7", 1e7, true).unwrap();
///
/// exp.add_ao_device("PXI1Slot4", 1e6).unwrap();
/// exp.device_cfg_trig("PXI1Slot4", "PXI1_Trig0", false).unwrap();
/// exp.device_cfg_ref_clk("PXI1Slot4", "PXI1_Trig7", 1e7, false).unwrap();
///
/// // Exporting requires acknowledging the 10MHz rate
/// assert!(exp.device_cfg_ref_clk("PXI1Slot4", "PXI1_Trig7", 1e6, true).is_err());
/// ```
///
/// ## Importing Sample Clock
///
/// Relevant fields: `samp_clk_src`.
///
/// Some NI devices do not support reference clock synchronization. As an alternative, they can directly use external
/// clock signals for their sampling clock, which constrains them to operate at the rate of the imported clock.
///
/// ```rust
/// use nicompiler_backend::*;
/// let mut exp = Experiment::new();
/// exp.add_do_device("PXI1Slot6", 1e7).unwrap();
/// exp.device_cfg_samp_clk_src("PXI1Slot6", "PXI1_Trig7").unwrap();
/// exp.device_cfg_trig("PXI1Slot6", "PXI1_Trig0", false).unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct Device {
    channels: IndexMap<String, Channel>,

    name: String,
    task_type: TaskType,
    samp_rate: f64,

    samp_clk_src: Option<String>,
    trig_line: Option<String>,
    export_trig: Option<bool>,
    ref_clk_line: Option<String>,
    export_ref_clk: Option<bool>,
    ref_clk_rate: Option<f64>,
}

impl Device {
    /// Constructs a new `Device` instance with no channels.
    ///
    /// All synchronization fields are initialized to `None`. For nontrivial synchronization behavior,
    /// use the methods [`BaseDevice::cfg_samp_clk_src`], [`BaseDevice::cfg_trig`], and [`BaseDevice::cfg_ref_clk`].
    pub fn new(name: &str, task_type: TaskType, samp_rate: f64) -> Self {
        Self {
            channels: IndexMap::new(),

            name: name.to_string(),
            task_type,
            samp_rate,

            samp_clk_src: None,
            trig_line: None,
            export_trig: None,
            ref_clk_line: None,
            export_ref_clk: None,
            ref_clk_rate: None,
        }
    }
}

impl BaseDevice for Device {
    // Immutable accessors (getters)
    fn channels(&self) -> &IndexMap<String, Channel> {
        &self.channels
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn samp_rate(&self) -> f64 {
        self.samp_rate
    }

    fn samp_clk_src(&self) -> Option<&str> {
        self.samp_clk_src.as_deref()
    }

    fn trig_line(&self) -> Option<&str> {
        self.trig_line.as_deref()
    }

    fn export_trig(&self) -> Option<bool> {
        self.export_trig
    }

    fn ref_clk_line(&self) -> Option<&str> {
        self.ref_clk_line.as_deref()
    }

    fn export_ref_clk(&self) -> Option<bool> {
        self.export_ref_clk
    }

    fn ref_clk_rate(&self) -> Option<f64> {
        self.ref_clk_rate
    }

    // Mutable accessors
    fn channels_(&mut self) -> &mut IndexMap<String, Channel> {
        &mut self.channels
    }

    fn samp_clk_src_(&mut self) -> &mut Option<String> {
        &mut self.samp_clk_src
    }

    fn trig_line_(&mut self) -> &mut Option<String> {
        &mut self.trig_line
    }

    fn export_trig_(&mut self) -> &mut Option<bool> {
        &mut self.export_trig
    }

    fn ref_clk_line_(&mut self) -> &mut Option<String> {
        &mut self.ref_clk_line
    }

    fn export_ref_clk_(&mut self) -> &mut Option<bool> {
        &mut self.export_ref_clk
    }

    fn ref_clk_rate_(&mut self) -> &mut Option<f64> {
        &mut self.ref_clk_rate
    }
}
