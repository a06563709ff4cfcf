//! The experiment module provides the highest level of abstraction for managing NI experiments, and
//! the single place by which methods are exposed to python.
//!
//! ## Overview
//!
//! At the heart of this module lies the [`Experiment`] struct, which consists of a collection of devices.
//! The behavior of the `Experiment` struct is primarily defined
//! by the [`BaseExperiment`] trait, which prescribes a collection of methods for experiment management and manipulation.
//!
//! The module is organized into the following primary components:
//!
//! 1. **Experiment Struct**: The main data structure representing the entire experimental setup. It houses devices
//!    and their associated channels.
//! 2. **Traits**: Including the pivotal [`BaseExperiment`] trait, which defines the expected behaviors and operations
//!    possible on an `Experiment`.
//! 3. **Macro**: The module features a macro, `impl_exp_boilerplate!`, which generates the python-exposed wrappers
//!    of the trait methods (feature `python`).
//!
//! ## Key Structures and Their Relationships
//!
//! - **Experiment**: This is the main structure that users interact with. It represents a collection of devices and
//!   provides methods for their management.
//! - **Device**: Each device, represented by the [`Device`] struct, corresponds to a specific piece of NI hardware.
//!   Devices contain channels, and methods in the `Experiment` struct often redirect to these devices.
//! - **Channel**: Channels, denoted by the [`Channel`] struct, symbolize distinct physical channels on an NI device.
//!   They hold instructions and other functionalities specific to the channel.
//! - **Instruction**: Instructions, housed within [`InstrBook`], define specific tasks or commands for channels.
//!
//! [`InstrBook`]: crate::instruction::InstrBook

use indexmap::IndexMap;
use ndarray::Array2;
use rayon::prelude::*;

use crate::channel::*;
use crate::device::*;
use crate::error::*;
use crate::instruction::*;
use crate::utils::*;

/// This trait defines the behavior of the [`Experiment`] struct through default trait implementations.
///
/// Trait methods are primarily classified into the following categories:
/// 1. Experiment-targeted methods which alter or query the behavior of the entire experiment:
///     - [`add_ao_device`], [`add_do_device`]
///     - [`compile`], [`add_reset_instr`], [`check_trig_config`]
///     - [`last_instr_end_time`], [`total_run_time`]
///     - [`is_edited`], [`is_compiled`], [`is_fresh_compiled`]
///     - [`clear_edit_cache`], [`clear_compile_cache`]
/// 2. Device-targeted methods which alter or query the behavior of a specific device:
///     - [`add_ao_channel`], [`add_do_channel`]
///     - [`device_calc_signal_nsamps`], [`device_compiled_channel_names`]
///     - [`device_cfg_samp_clk_src`], [`device_cfg_trig`], [`device_cfg_ref_clk`]
///     - [`device_last_instr_end_time`], [`device_total_run_time`]
///     - [`device_clear_compile_cache`], [`device_clear_edit_cache`]
/// 3. Channel-targeted methods which alter or query the behavior of a particular channel
///     - [`constant`], [`go_constant`], [`sine`], [`go_sine`], [`linramp`]
///     - [`high`], [`low`], [`go_high`], [`go_low`]
///     - [`channel_clear_compile_cache`], [`channel_clear_edit_cache`], [`channel_cfg_reset_value`]
///     - [`channel_calc_signal_nsamps`], [`channel_instr_end`], [`channel_last_instr_end_time`]
/// 4. Internal helper methods which are not exposed to python
///     - [`devices`], [`devices_`], [`dev`], [`dev_`], [`busy`]
///     - [`typed_device_op`], [`device_op`], [`typed_channel_op`], [`channel_op`]
///
/// [`add_ao_device`]: BaseExperiment::add_ao_device
/// [`add_do_device`]: BaseExperiment::add_do_device
/// [`compile`]: BaseExperiment::compile
/// [`add_reset_instr`]: BaseExperiment::add_reset_instr
/// [`check_trig_config`]: BaseExperiment::check_trig_config
/// [`last_instr_end_time`]: BaseExperiment::last_instr_end_time
/// [`total_run_time`]: BaseExperiment::total_run_time
/// [`is_edited`]: BaseExperiment::is_edited
/// [`is_compiled`]: BaseExperiment::is_compiled
/// [`is_fresh_compiled`]: BaseExperiment::is_fresh_compiled
/// [`clear_edit_cache`]: BaseExperiment::clear_edit_cache
/// [`clear_compile_cache`]: BaseExperiment::clear_compile_cache
/// [`add_ao_channel`]: BaseExperiment::add_ao_channel
/// [`add_do_channel`]: BaseExperiment::add_do_channel
/// [`device_calc_signal_nsamps`]: BaseExperiment::device_calc_signal_nsamps
/// [`device_compiled_channel_names`]: BaseExperiment::device_compiled_channel_names
/// [`device_cfg_samp_clk_src`]: BaseExperiment::device_cfg_samp_clk_src
/// [`device_cfg_trig`]: BaseExperiment::device_cfg_trig
/// [`device_cfg_ref_clk`]: BaseExperiment::device_cfg_ref_clk
/// [`device_last_instr_end_time`]: BaseExperiment::device_last_instr_end_time
/// [`device_total_run_time`]: BaseExperiment::device_total_run_time
/// [`device_clear_compile_cache`]: BaseExperiment::device_clear_compile_cache
/// [`device_clear_edit_cache`]: BaseExperiment::device_clear_edit_cache
/// [`constant`]: BaseExperiment::constant
/// [`go_constant`]: BaseExperiment::go_constant
/// [`sine`]: BaseExperiment::sine
/// [`go_sine`]: BaseExperiment::go_sine
/// [`linramp`]: BaseExperiment::linramp
/// [`high`]: BaseExperiment::high
/// [`low`]: BaseExperiment::low
/// [`go_high`]: BaseExperiment::go_high
/// [`go_low`]: BaseExperiment::go_low
/// [`channel_clear_compile_cache`]: BaseExperiment::channel_clear_compile_cache
/// [`channel_clear_edit_cache`]: BaseExperiment::channel_clear_edit_cache
/// [`channel_cfg_reset_value`]: BaseExperiment::channel_cfg_reset_value
/// [`channel_calc_signal_nsamps`]: BaseExperiment::channel_calc_signal_nsamps
/// [`channel_instr_end`]: BaseExperiment::channel_instr_end
/// [`channel_last_instr_end_time`]: BaseExperiment::channel_last_instr_end_time
/// [`devices`]: BaseExperiment::devices
/// [`devices_`]: BaseExperiment::devices_
/// [`dev`]: BaseExperiment::dev
/// [`dev_`]: BaseExperiment::dev_
/// [`busy`]: BaseExperiment::busy
/// [`typed_device_op`]: BaseExperiment::typed_device_op
/// [`device_op`]: BaseExperiment::device_op
/// [`typed_channel_op`]: BaseExperiment::typed_channel_op
/// [`channel_op`]: BaseExperiment::channel_op
pub trait BaseExperiment {
    // FIELD methods
    fn devices(&self) -> &IndexMap<String, Device>;
    fn devices_(&mut self) -> &mut IndexMap<String, Device>;

    /// Returns `true` while the compile cache must not change, e.g. while a stream reads it.
    ///
    /// Compiling, clearing caches and adding reset instructions fail with [`CompileError::Busy`]
    /// while busy. The compiler itself is never busy; streaming front-ends override this.
    fn busy(&self) -> bool {
        false
    }

    fn check_not_busy(&self) -> Result<()> {
        if self.busy() {
            return Err(CompileError::Busy.into());
        }
        Ok(())
    }

    /// Helper method to add a device to the experiment's collection of devices.
    ///
    /// # Errors
    /// - [`RegistryError::DuplicateDevice`] if a device with the same name is already registered.
    /// - [`RegistryError::InvalidSampRate`] for a non-positive or non-finite sampling rate.
    fn add_device_base(&mut self, dev: Device) -> Result<()> {
        let name = dev.name().to_string();
        if !(dev.samp_rate().is_finite() && dev.samp_rate() > 0.0) {
            return Err(RegistryError::InvalidSampRate {
                name,
                samp_rate: dev.samp_rate(),
            }
            .into());
        }
        if self.devices().contains_key(&name) {
            return Err(RegistryError::DuplicateDevice { name }.into());
        }
        self.devices_().insert(name, dev);
        Ok(())
    }

    /// Registers an Analog Output (AO) device to the experiment.
    ///
    /// # Example
    /// ```
    /// # use nicompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_ao_device("PXI1Slot6", 1e6).unwrap();
    /// // Adding the same device again, even with different parameters, fails
    /// assert!(exp.add_ao_device("PXI1Slot6", 1e7).is_err());
    /// ```
    fn add_ao_device(&mut self, name: &str, samp_rate: f64) -> Result<()> {
        self.add_device_base(Device::new(name, TaskType::AO, samp_rate))
    }

    /// Registers a Digital Output (DO) device to the experiment.
    fn add_do_device(&mut self, name: &str, samp_rate: f64) -> Result<()> {
        self.add_device_base(Device::new(name, TaskType::DO, samp_rate))
    }

    /// Shortcut to borrow device instance by name
    fn dev(&self, name: &str) -> Result<&Device> {
        self.devices().get(name).ok_or_else(|| {
            RegistryError::UnknownDevice {
                name: name.to_string(),
                registered: self.devices().keys().cloned().collect(),
            }
            .into()
        })
    }
    /// Shortcut to mutably borrow device instance by name
    fn dev_(&mut self, name: &str) -> Result<&mut Device> {
        if !self.devices().contains_key(name) {
            return Err(RegistryError::UnknownDevice {
                name: name.to_string(),
                registered: self.devices().keys().cloned().collect(),
            }
            .into());
        }
        Ok(&mut self.devices_()[name])
    }

    /// Latest instruction end time across all devices, the natural stop time of the experiment.
    /// See [`BaseDevice::last_instr_end_time`] for more information.
    ///
    /// # Example
    /// ```
    /// # use nicompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_do_device("PXI1Slot6", 1e6).unwrap();
    /// exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();
    /// exp.add_do_channel("PXI1Slot6", 0, 4, 0.).unwrap();
    /// exp.high("PXI1Slot6", "port0/line0", 1., 4.).unwrap(); // stop time at 5
    /// assert_eq!(exp.last_instr_end_time(), 5.);
    /// exp.high("PXI1Slot6", "port0/line4", 0., 6.).unwrap(); // stop time at 6
    /// assert_eq!(exp.last_instr_end_time(), 6.);
    /// ```
    fn last_instr_end_time(&self) -> f64 {
        self.devices()
            .values()
            .map(|dev| dev.last_instr_end_time())
            .fold(0.0, f64::max)
    }

    /// The maximum `total_run_time` across all devices.
    /// See [`BaseDevice::total_run_time`] for more information.
    fn total_run_time(&self) -> f64 {
        self.devices()
            .values()
            .map(|dev| dev.total_run_time())
            .fold(0.0, f64::max)
    }

    /// Checks the start-trigger configuration of the devices.
    ///
    /// # Errors
    /// - [`ConfigError::MultipleTrigExporters`] if more than one device exports the start trigger.
    /// - [`ConfigError::MissingTrigExporter`] if some device imports a start trigger but none exports it.
    fn check_trig_config(&self) -> Result<()> {
        let with_export = |export: bool| -> Vec<String> {
            self.devices()
                .values()
                .filter(|dev| dev.export_trig() == Some(export))
                .map(|dev| dev.name().to_string())
                .collect()
        };
        let exporters = with_export(true);
        let importers = with_export(false);
        if exporters.len() > 1 {
            return Err(ConfigError::MultipleTrigExporters { exporters }.into());
        }
        if exporters.is_empty() && !importers.is_empty() {
            return Err(ConfigError::MissingTrigExporter { importers }.into());
        }
        Ok(())
    }

    /// Compiles the experiment by broadcasting the compile command to all devices.
    ///
    /// - `stop_time = None` compiles up to [`BaseExperiment::last_instr_end_time`].
    /// - `stop_time = Some(t)` compiles up to `t`, which must not cut any instruction.
    ///
    /// Device caches are prepared in parallel, joined, and published only if every device succeeded,
    /// so a failed compile leaves the previous compile cache intact.
    /// Returns the total run time, see [`BaseDevice::compile_stop_pos`] for the sample count policy.
    ///
    /// # Errors
    /// [`CompileError::Busy`], any error of [`BaseExperiment::check_trig_config`], and
    /// [`CompileError::StopTimeTooShort`] if `stop_time` is below the last instruction end of some device,
    /// [`EditError::InvalidTime`] if it is negative or not finite.
    ///
    /// # Example
    ///
    /// ```
    /// # use nicompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_do_device("PXI1Slot6", 1e6).unwrap();
    /// exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();
    /// exp.high("PXI1Slot6", "port0/line0", 1., 3.).unwrap();
    ///
    /// // The pulse ends on the stop tick, one extra sample forms its closing edge
    /// assert_eq!(exp.compile(None).unwrap(), 4.000001);
    /// assert_eq!(exp.compile(Some(5.)).unwrap(), 5.);
    /// assert!(exp.compile(Some(3.)).is_err());
    /// assert_eq!(exp.total_run_time(), 5.);
    /// ```
    fn compile(&mut self, stop_time: Option<f64>) -> Result<f64> {
        self.check_not_busy()?;
        self.check_trig_config()?;
        let mut timer = TickTimer::new();

        if let Some(t) = stop_time.filter(|t| !t.is_finite() || *t < 0.0) {
            return Err(EditError::InvalidTime {
                chan: "compile".to_string(),
                what: "stop_time",
                value: t,
            }
            .into());
        }
        let stop_time = stop_time.unwrap_or_else(|| self.last_instr_end_time());
        let devs: Vec<&Device> = self.devices().values().collect();
        let caches = devs
            .par_iter()
            .map(|dev| dev.prepare_compile(stop_time))
            .collect::<std::result::Result<Vec<_>, CompileError>>()?;
        timer.tick_print("prepare device compile caches");

        for (dev, cache) in self.devices_().values_mut().zip(caches) {
            if let Some(cache) = cache {
                dev.commit_compile(cache);
            }
        }
        timer.tick_print("commit device compile caches");
        log::info!(
            "compiled {} devices with stop_time={} s, total_run_time={} s",
            self.devices().len(),
            stop_time,
            self.total_run_time()
        );
        Ok(self.total_run_time())
    }

    /// Retrieves a list of devices that have been successfully compiled.
    fn compiled_devices(&self) -> Vec<&Device> {
        self.devices()
            .values()
            .filter(|dev| dev.is_compiled())
            .collect()
    }

    /// Checks if any of the experiment's devices have been edited.
    fn is_edited(&self) -> bool {
        self.devices().values().any(|dev| dev.is_edited())
    }

    /// Checks if any of the experiment's devices have been compiled.
    fn is_compiled(&self) -> bool {
        self.devices().values().any(|dev| dev.is_compiled())
    }

    /// Checks if every edited device is freshly compiled.
    fn is_fresh_compiled(&self) -> bool {
        self.is_edited()
            && self
                .devices()
                .values()
                .filter(|dev| dev.is_edited())
                .all(|dev| dev.is_fresh_compiled())
    }

    /// Clears the edit cache of every channel, along with all compile caches.
    /// Device and channel registrations are kept.
    fn clear_edit_cache(&mut self) -> Result<()> {
        self.check_not_busy()?;
        for dev in self.devices_().values_mut() {
            dev.clear_compile_cache();
            dev.clear_edit_cache();
        }
        Ok(())
    }

    /// Clears the compile cache of every device.
    fn clear_compile_cache(&mut self) -> Result<()> {
        self.check_not_busy()?;
        for dev in self.devices_().values_mut() {
            dev.clear_compile_cache();
        }
        Ok(())
    }

    /// Adds a reset instruction to every editable channel of every device.
    ///
    /// The reset instruction is a "go" constant instruction with the channel's reset value
    /// (see [`BaseExperiment::channel_cfg_reset_value`]) starting at `reset_time`, or at
    /// [`BaseExperiment::last_instr_end_time`] if `None`. Returns the reset time used.
    ///
    /// # Errors
    /// [`EditError::ResetTooEarly`] if `reset_time` falls before the last instruction end of some
    /// device; no channel is modified in that case.
    ///
    /// ```
    /// # use nicompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_ao_device("PXI1Slot3", 1e3).unwrap();
    /// exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();
    /// exp.go_constant("PXI1Slot3", "ao0", 0., 1.).unwrap();
    /// assert_eq!(exp.add_reset_instr(Some(1.)).unwrap(), 1.);
    /// assert!(exp.add_reset_instr(Some(0.5)).is_err());
    /// ```
    fn add_reset_instr(&mut self, reset_time: Option<f64>) -> Result<f64> {
        self.check_not_busy()?;
        let reset_time = reset_time.unwrap_or_else(|| self.last_instr_end_time());
        if !reset_time.is_finite() || reset_time < 0.0 {
            return Err(EditError::InvalidTime {
                chan: "reset".to_string(),
                what: "reset_time",
                value: reset_time,
            }
            .into());
        }
        for dev in self.devices().values() {
            let reset_pos = time_to_tick(reset_time, dev.samp_rate());
            if reset_pos < dev.last_instr_end_pos() {
                return Err(EditError::ResetTooEarly {
                    target: format!("device {}", dev.name()),
                    reset_pos,
                    last_end_pos: dev.last_instr_end_pos(),
                }
                .into());
            }
        }
        for dev in self.devices_().values_mut() {
            dev.add_reset_instr(reset_time)?;
        }
        Ok(reset_time)
    }

    /// Executes `f` on the device `name` after checking that it has the expected `task_type`.
    ///
    /// # Errors
    /// [`RegistryError::UnknownDevice`], [`RegistryError::TaskTypeMismatch`], or whatever `f` returns.
    ///
    /// # Example
    ///
    /// ```
    /// # use nicompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_ao_device("PXI1Slot6", 1e6).unwrap();
    /// exp.typed_device_op("PXI1Slot6", TaskType::AO, |dev| Ok(dev.clear_compile_cache())).unwrap();
    /// // PXI1Slot6 is not a DO device
    /// assert!(exp.typed_device_op("PXI1Slot6", TaskType::DO, |dev| Ok(dev.clear_compile_cache())).is_err());
    /// ```
    fn typed_device_op<F, R>(&mut self, name: &str, task_type: TaskType, f: F) -> Result<R>
    where
        F: FnOnce(&mut Device) -> Result<R>,
    {
        let dev = self.dev_(name)?;
        if dev.task_type() != task_type {
            return Err(RegistryError::TaskTypeMismatch {
                dev: name.to_string(),
                expected: task_type.to_string(),
                actual: dev.task_type().to_string(),
            }
            .into());
        }
        f(dev)
    }

    /// Type-agnostic variant of [`BaseExperiment::typed_device_op`].
    fn device_op<F, R>(&mut self, name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Device) -> Result<R>,
    {
        f(self.dev_(name)?)
    }

    /// Executes `f` on channel `chan_name` of device `name` after checking the device's `task_type`.
    ///
    /// # Example
    /// ```
    /// # use nicompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_ao_device("PXI1Slot6", 1e6).unwrap();
    /// exp.add_ao_channel("PXI1Slot6", 0, 0.).unwrap();
    /// exp.typed_channel_op("PXI1Slot6", "ao0", TaskType::AO,
    ///             |chan| Ok(chan.constant(1., 0., Some((1., false)))?)).unwrap();
    /// assert!(exp.typed_channel_op("PXI1Slot6", "ao0", TaskType::AO,
    ///             |chan| Ok(chan.is_edited())).unwrap());
    /// ```
    fn typed_channel_op<F, R>(
        &mut self,
        name: &str,
        chan_name: &str,
        task_type: TaskType,
        f: F,
    ) -> Result<R>
    where
        F: FnOnce(&mut Channel) -> Result<R>,
    {
        self.typed_device_op(name, task_type, |dev| f(dev.chan_(chan_name)?))
    }

    /// Type-agnostic variant of [`BaseExperiment::typed_channel_op`].
    fn channel_op<F, R>(&mut self, name: &str, chan_name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Channel) -> Result<R>,
    {
        self.device_op(name, |dev| f(dev.chan_(chan_name)?))
    }

    /// Adds an analogue output channel named `ao(channel_id)` to the designated AO device.
    ///
    /// Refer to the [`BaseDevice::add_channel`] method for detailed information on channel addition.
    ///
    /// # Example
    /// ```
    /// # use nicompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_ao_device("PXI1Slot3", 1e6).unwrap();
    /// exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();
    /// assert!(exp.add_ao_channel("PXI1Slot3", 0, 0.).is_err());
    /// ```
    fn add_ao_channel(&mut self, name: &str, channel_id: usize, default_value: f64) -> Result<()> {
        self.typed_device_op(name, TaskType::AO, |dev| {
            Ok(dev.add_channel(&format!("ao{}", channel_id), default_value)?)
        })
    }

    /// Adds a digital output line channel named `port(port_id)/line(line_id)` to the designated DO device.
    /// `default_value` must be 0 or 1.
    fn add_do_channel(
        &mut self,
        name: &str,
        port_id: usize,
        line_id: usize,
        default_value: f64,
    ) -> Result<()> {
        self.typed_device_op(name, TaskType::DO, |dev| {
            Ok(dev.add_channel(&format!("port{}/line{}", port_id, line_id), default_value)?)
        })
    }

    /// See [`BaseDevice::calc_signal_nsamps`]
    fn device_calc_signal_nsamps(
        &self,
        dev_name: &str,
        start_pos: usize,
        end_pos: usize,
        nsamps: usize,
        require_streamable: bool,
        require_editable: bool,
    ) -> Result<Array2<f64>> {
        Ok(self.dev(dev_name)?.calc_signal_nsamps(
            start_pos,
            end_pos,
            nsamps,
            require_streamable,
            require_editable,
        )?)
    }

    /// See [`BaseDevice::cfg_samp_clk_src`]
    fn device_cfg_samp_clk_src(&mut self, name: &str, src: &str) -> Result<()> {
        self.device_op(name, |dev| Ok(dev.cfg_samp_clk_src(src)))
    }

    /// See [`BaseDevice::cfg_trig`]
    fn device_cfg_trig(&mut self, name: &str, trig_line: &str, export_trig: bool) -> Result<()> {
        self.device_op(name, |dev| Ok(dev.cfg_trig(trig_line, export_trig)))
    }

    /// See [`BaseDevice::cfg_ref_clk`]
    fn device_cfg_ref_clk(
        &mut self,
        name: &str,
        ref_clk_line: &str,
        ref_clk_rate: f64,
        export_ref_clk: bool,
    ) -> Result<()> {
        self.device_op(name, |dev| {
            Ok(dev.cfg_ref_clk(ref_clk_line, ref_clk_rate, export_ref_clk)?)
        })
    }

    fn device_last_instr_end_time(&self, name: &str) -> Result<f64> {
        Ok(self.dev(name)?.last_instr_end_time())
    }

    fn device_total_run_time(&self, name: &str) -> Result<f64> {
        Ok(self.dev(name)?.total_run_time())
    }

    fn device_clear_compile_cache(&mut self, name: &str) -> Result<()> {
        self.check_not_busy()?;
        self.device_op(name, |dev| Ok(dev.clear_compile_cache()))
    }

    fn device_clear_edit_cache(&mut self, name: &str) -> Result<()> {
        self.check_not_busy()?;
        self.device_op(name, |dev| {
            dev.clear_compile_cache();
            dev.clear_edit_cache();
            Ok(())
        })
    }

    /// Names of the compiled channels of device `name`, in [`BaseDevice::compiled_channels`] order.
    fn device_compiled_channel_names(
        &self,
        name: &str,
        require_streamable: bool,
        require_editable: bool,
    ) -> Result<Vec<String>> {
        Ok(self
            .dev(name)?
            .compiled_channels(require_streamable, require_editable)
            .iter()
            .map(|chan| chan.name().to_string())
            .collect())
    }

    /// Constant value on an AO channel during `[t, t + duration)`, the channel returns to its
    /// default value afterwards.
    ///
    /// ```
    /// # use nicompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_ao_device("PXI1Slot3", 1e6).unwrap();
    /// exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();
    /// exp.constant("PXI1Slot3", "ao0", 0., 1e-3, 1.).unwrap();
    /// // Overlapping edits are rejected and leave the channel untouched
    /// assert!(exp.constant("PXI1Slot3", "ao0", 0.5e-3, 1e-3, 2.).is_err());
    /// assert_eq!(exp.compile(None).unwrap(), 0.001001);
    /// ```
    fn constant(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        t: f64,
        duration: f64,
        value: f64,
    ) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::AO, |chan| {
            Ok(chan.constant(value, t, Some((duration, false)))?)
        })
    }
    /// Constant value on an AO channel from `t` until the next instruction or the end.
    fn go_constant(&mut self, dev_name: &str, chan_name: &str, t: f64, value: f64) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::AO, |chan| {
            Ok(chan.constant(value, t, None)?)
        })
    }

    /// Sine wave on an AO channel during `[t, t + duration)`. See [`Instruction::new_sine`] for
    /// the waveform arguments. With `keep_val`, the last value is held until the next instruction.
    fn sine(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        t: f64,
        duration: f64,
        keep_val: bool,
        freq: f64,
        amplitude: Option<f64>,
        phase: Option<f64>,
        dc_offset: Option<f64>,
    ) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::AO, |chan| {
            let instr = Instruction::new_sine(freq, amplitude, phase, dc_offset);
            Ok(chan.add_instr(instr, t, Some((duration, keep_val)))?)
        })
    }
    fn go_sine(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        t: f64,
        freq: f64,
        amplitude: Option<f64>,
        phase: Option<f64>,
        dc_offset: Option<f64>,
    ) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::AO, |chan| {
            let instr = Instruction::new_sine(freq, amplitude, phase, dc_offset);
            Ok(chan.add_instr(instr, t, None)?)
        })
    }

    /// Linear ramp on an AO channel during `[t, t + duration)`, `start_val` on the first tick
    /// and `end_val` on the last tick.
    ///
    /// ```
    /// # use nicompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_ao_device("PXI1Slot3", 10.).unwrap();
    /// exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();
    /// exp.linramp("PXI1Slot3", "ao0", 0., 1., 0., 9., true).unwrap();
    /// exp.compile(Some(2.)).unwrap();
    /// let sig = exp.channel_calc_signal_nsamps("PXI1Slot3", "ao0", 0.5, 1.5, 10).unwrap();
    /// assert!((sig[4] - 9.).abs() < 1e-9); // last tick of the ramp
    /// assert!((sig[9] - 9.).abs() < 1e-9); // held afterwards
    /// ```
    fn linramp(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        t: f64,
        duration: f64,
        start_val: f64,
        end_val: f64,
        keep_val: bool,
    ) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::AO, |chan| {
            let samp_rate = chan.samp_rate();
            let start_pos = time_to_tick(t, samp_rate);
            let end_pos = time_to_tick(t + duration, samp_rate);
            let last_tick = std::cmp::max(start_pos + 1, end_pos) - 1;
            let instr = Instruction::new_linramp(
                start_val,
                end_val,
                start_pos as f64 / samp_rate,
                last_tick as f64 / samp_rate,
            );
            Ok(chan.add_instr(instr, t, Some((duration, keep_val)))?)
        })
    }

    /// Digital high on a DO line during `[t, t + duration)`
    fn high(&mut self, dev_name: &str, chan_name: &str, t: f64, duration: f64) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::DO, |chan| {
            Ok(chan.constant(1., t, Some((duration, false)))?)
        })
    }
    /// Digital low on a DO line during `[t, t + duration)`
    fn low(&mut self, dev_name: &str, chan_name: &str, t: f64, duration: f64) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::DO, |chan| {
            Ok(chan.constant(0., t, Some((duration, false)))?)
        })
    }
    fn go_high(&mut self, dev_name: &str, chan_name: &str, t: f64) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::DO, |chan| {
            Ok(chan.constant(1., t, None)?)
        })
    }
    fn go_low(&mut self, dev_name: &str, chan_name: &str, t: f64) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::DO, |chan| {
            Ok(chan.constant(0., t, None)?)
        })
    }

    fn channel_clear_edit_cache(&mut self, dev_name: &str, chan_name: &str) -> Result<()> {
        self.channel_op(dev_name, chan_name, |chan| Ok(chan.clear_edit_cache()))
    }

    fn channel_clear_compile_cache(&mut self, dev_name: &str, chan_name: &str) -> Result<()> {
        self.check_not_busy()?;
        self.channel_op(dev_name, chan_name, |chan| Ok(chan.clear_compile_cache()))
    }

    /// Sets the value reset instructions drive the channel to. Defaults to the channel's default value.
    fn channel_cfg_reset_value(&mut self, dev_name: &str, chan_name: &str, reset_value: f64) -> Result<()> {
        self.channel_op(dev_name, chan_name, |chan| {
            *chan.reset_value_() = reset_value;
            Ok(())
        })
    }

    fn channel_last_instr_end_time(&self, dev_name: &str, chan_name: &str) -> Result<f64> {
        Ok(self.dev(dev_name)?.chan(chan_name)?.last_instr_end_time())
    }

    /// Compiled instruction end positions of a channel, empty if not compiled
    fn channel_instr_end(&self, dev_name: &str, chan_name: &str) -> Result<Vec<usize>> {
        Ok(self.dev(dev_name)?.chan(chan_name)?.instr_end().clone())
    }

    /// See [`BaseChannel::calc_signal_nsamps`]
    fn channel_calc_signal_nsamps(
        &self,
        dev_name: &str,
        chan_name: &str,
        start_time: f64,
        end_time: f64,
        num_samps: usize,
    ) -> Result<Vec<f64>> {
        Ok(self
            .dev(dev_name)?
            .chan(chan_name)?
            .calc_signal_nsamps(start_time, end_time, num_samps)?)
    }
}

/// A concrete struct consisting of a collection of devices.
///
/// **Refer to the [`BaseExperiment`] trait for method behavior.**
#[cfg_attr(feature = "python", pyo3::pyclass)]
#[derive(Clone, Debug, Default)]
pub struct Experiment {
    devices: IndexMap<String, Device>,
}

impl Experiment {
    /// Creates an experiment with no devices.
    pub fn new() -> Self {
        Self {
            devices: IndexMap::new(),
        }
    }
}

impl BaseExperiment for Experiment {
    fn devices(&self) -> &IndexMap<String, Device> {
        &self.devices
    }
    fn devices_(&mut self) -> &mut IndexMap<String, Device> {
        &mut self.devices
    }
}

/// A macro to generate the python bindings of structs implementing [`BaseExperiment`].
///
/// PyO3 doesn't support exposing trait methods directly to Python, so this macro wraps
/// each [`BaseExperiment`] trait method with a direct implementation inside a `#[pymethods]` block.
/// Errors are raised as python `ValueError`s. The expansion is only compiled with the `python` feature,
/// and the invoking crate needs a `python` feature enabling `pyo3` and `numpy`.
///
/// Usage:
/// ```ignore
/// #[cfg_attr(feature = "python", pyo3::pyclass)]
/// struct CustomExperiment {
///     devices: IndexMap<String, Device>,
///     some_property: f64,
/// }
/// impl BaseExperiment for CustomExperiment {
///     fn devices(&self) -> &IndexMap<String, Device> { &self.devices }
///     fn devices_(&mut self) -> &mut IndexMap<String, Device> { &mut self.devices }
/// }
/// impl_exp_boilerplate!(CustomExperiment);
/// ```
#[macro_export]
macro_rules! impl_exp_boilerplate {
    ($exp_type: ty) => {
        #[cfg(feature = "python")]
        #[::pyo3::pymethods]
        impl $exp_type {
            fn add_ao_device(&mut self, name: &str, samp_rate: f64) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::add_ao_device(self, name, samp_rate)?)
            }

            fn add_do_device(&mut self, name: &str, samp_rate: f64) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::add_do_device(self, name, samp_rate)?)
            }

            pub fn last_instr_end_time(&self) -> f64 {
                $crate::experiment::BaseExperiment::last_instr_end_time(self)
            }

            pub fn total_run_time(&self) -> f64 {
                $crate::experiment::BaseExperiment::total_run_time(self)
            }

            pub fn check_trig_config(&self) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::check_trig_config(self)?)
            }

            #[pyo3(signature = (stop_time=None))]
            pub fn compile(&mut self, stop_time: Option<f64>) -> ::pyo3::PyResult<f64> {
                Ok($crate::experiment::BaseExperiment::compile(self, stop_time)?)
            }

            pub fn is_edited(&self) -> bool {
                $crate::experiment::BaseExperiment::is_edited(self)
            }

            pub fn is_compiled(&self) -> bool {
                $crate::experiment::BaseExperiment::is_compiled(self)
            }

            pub fn is_fresh_compiled(&self) -> bool {
                $crate::experiment::BaseExperiment::is_fresh_compiled(self)
            }

            pub fn clear_edit_cache(&mut self) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::clear_edit_cache(self)?)
            }

            #[pyo3(signature = (reset_time=None))]
            pub fn add_reset_instr(&mut self, reset_time: Option<f64>) -> ::pyo3::PyResult<f64> {
                Ok($crate::experiment::BaseExperiment::add_reset_instr(self, reset_time)?)
            }

            pub fn clear_compile_cache(&mut self) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::clear_compile_cache(self)?)
            }

            // DEVICE METHODS
            pub fn add_ao_channel(&mut self, name: &str, channel_id: usize, default_value: f64) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::add_ao_channel(self, name, channel_id, default_value)?)
            }

            pub fn add_do_channel(&mut self, name: &str, port_id: usize, line_id: usize, default_value: f64) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::add_do_channel(self, name, port_id, line_id, default_value)?)
            }

            pub fn device_cfg_samp_clk_src(&mut self, name: &str, src: &str) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::device_cfg_samp_clk_src(self, name, src)?)
            }

            pub fn device_cfg_trig(&mut self, name: &str, trig_line: &str, export_trig: bool) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::device_cfg_trig(self, name, trig_line, export_trig)?)
            }

            pub fn device_cfg_ref_clk(
                &mut self,
                name: &str,
                ref_clk_line: &str,
                ref_clk_rate: f64,
                export_ref_clk: bool,
            ) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::device_cfg_ref_clk(
                    self, name, ref_clk_line, ref_clk_rate, export_ref_clk,
                )?)
            }

            pub fn device_compiled_channel_names(
                &self,
                name: &str,
                require_streamable: bool,
                require_editable: bool,
            ) -> ::pyo3::PyResult<Vec<String>> {
                Ok($crate::experiment::BaseExperiment::device_compiled_channel_names(
                    self,
                    name,
                    require_streamable,
                    require_editable,
                )?)
            }

            pub fn calc_signal(
                &self,
                name: &str,
                t_start: f64,
                t_end: f64,
                nsamps: usize,
                require_streamable: bool,
                require_editable: bool,
                py: ::pyo3::Python,
            ) -> ::pyo3::PyResult<::pyo3::PyObject> {
                use ::pyo3::ToPyObject;
                let samp_rate = $crate::device::BaseDevice::samp_rate(
                    $crate::experiment::BaseExperiment::dev(self, name)?,
                );
                let arr = $crate::experiment::BaseExperiment::device_calc_signal_nsamps(
                    self,
                    name,
                    $crate::utils::time_to_tick(t_start, samp_rate),
                    $crate::utils::time_to_tick(t_end, samp_rate),
                    nsamps,
                    require_streamable,
                    require_editable,
                )?;
                Ok(::numpy::PyArray::from_array(py, &arr).to_object(py))
            }

            pub fn device_last_instr_end_time(&self, name: &str) -> ::pyo3::PyResult<f64> {
                Ok($crate::experiment::BaseExperiment::device_last_instr_end_time(self, name)?)
            }

            pub fn device_total_run_time(&self, name: &str) -> ::pyo3::PyResult<f64> {
                Ok($crate::experiment::BaseExperiment::device_total_run_time(self, name)?)
            }

            pub fn device_clear_compile_cache(&mut self, name: &str) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::device_clear_compile_cache(self, name)?)
            }

            pub fn device_clear_edit_cache(&mut self, name: &str) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::device_clear_edit_cache(self, name)?)
            }

            // INSTRUCTION METHODS
            pub fn constant(
                &mut self,
                dev_name: &str,
                chan_name: &str,
                t: f64,
                duration: f64,
                value: f64,
            ) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::constant(self, dev_name, chan_name, t, duration, value)?)
            }

            pub fn go_constant(&mut self, dev_name: &str, chan_name: &str, t: f64, value: f64) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::go_constant(self, dev_name, chan_name, t, value)?)
            }

            #[pyo3(signature = (dev_name, chan_name, t, duration, keep_val, freq, amplitude=None, phase=None, dc_offset=None))]
            pub fn sine(
                &mut self,
                dev_name: &str,
                chan_name: &str,
                t: f64,
                duration: f64,
                keep_val: bool,
                freq: f64,
                amplitude: Option<f64>,
                phase: Option<f64>,
                dc_offset: Option<f64>,
            ) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::sine(
                    self, dev_name, chan_name, t, duration, keep_val, freq, amplitude, phase, dc_offset,
                )?)
            }

            #[pyo3(signature = (dev_name, chan_name, t, freq, amplitude=None, phase=None, dc_offset=None))]
            pub fn go_sine(
                &mut self,
                dev_name: &str,
                chan_name: &str,
                t: f64,
                freq: f64,
                amplitude: Option<f64>,
                phase: Option<f64>,
                dc_offset: Option<f64>,
            ) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::go_sine(
                    self, dev_name, chan_name, t, freq, amplitude, phase, dc_offset,
                )?)
            }

            pub fn high(&mut self, dev_name: &str, chan_name: &str, t: f64, duration: f64) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::high(self, dev_name, chan_name, t, duration)?)
            }

            pub fn low(&mut self, dev_name: &str, chan_name: &str, t: f64, duration: f64) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::low(self, dev_name, chan_name, t, duration)?)
            }

            pub fn go_high(&mut self, dev_name: &str, chan_name: &str, t: f64) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::go_high(self, dev_name, chan_name, t)?)
            }

            pub fn go_low(&mut self, dev_name: &str, chan_name: &str, t: f64) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::go_low(self, dev_name, chan_name, t)?)
            }

            pub fn linramp(
                &mut self,
                dev_name: &str,
                chan_name: &str,
                t: f64,
                duration: f64,
                start_val: f64,
                end_val: f64,
                keep_val: bool,
            ) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::linramp(
                    self, dev_name, chan_name, t, duration, start_val, end_val, keep_val,
                )?)
            }

            pub fn channel_clear_compile_cache(&mut self, dev_name: &str, chan_name: &str) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::channel_clear_compile_cache(self, dev_name, chan_name)?)
            }

            pub fn channel_clear_edit_cache(&mut self, dev_name: &str, chan_name: &str) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::channel_clear_edit_cache(self, dev_name, chan_name)?)
            }

            pub fn channel_cfg_reset_value(&mut self, dev_name: &str, chan_name: &str, reset_value: f64) -> ::pyo3::PyResult<()> {
                Ok($crate::experiment::BaseExperiment::channel_cfg_reset_value(self, dev_name, chan_name, reset_value)?)
            }

            pub fn channel_last_instr_end_time(&self, dev_name: &str, chan_name: &str) -> ::pyo3::PyResult<f64> {
                Ok($crate::experiment::BaseExperiment::channel_last_instr_end_time(self, dev_name, chan_name)?)
            }

            pub fn channel_instr_end(&self, dev_name: &str, chan_name: &str) -> ::pyo3::PyResult<Vec<usize>> {
                Ok($crate::experiment::BaseExperiment::channel_instr_end(self, dev_name, chan_name)?)
            }

            pub fn channel_calc_signal_nsamps(
                &self,
                dev_name: &str,
                chan_name: &str,
                start_time: f64,
                end_time: f64,
                num_samps: usize,
            ) -> ::pyo3::PyResult<Vec<f64>> {
                Ok($crate::experiment::BaseExperiment::channel_calc_signal_nsamps(
                    self, dev_name, chan_name, start_time, end_time, num_samps,
                )?)
            }
        }
    };
}

#[cfg(feature = "python")]
#[pyo3::pymethods]
impl Experiment {
    /// Constructor for the python `Experiment` class, with no devices.
    ///
    /// # Example (python)
    /// ```python
    /// from nicompiler_backend import Experiment
    ///
    /// exp = Experiment()
    /// exp.add_ao_device("PXI1Slot3", 1e6)
    /// ```
    #[new]
    fn py_new() -> Self {
        Self::new()
    }
}

impl_exp_boilerplate!(Experiment);
