//! Provides definitions and implementations for instruction-related functionalities.
//!
//! ## Main Structures and Enumerations:
//!
//! - `InstrType`: An enumeration that defines the types of instructions supported: `CONST` for constant values,
//!   `SINE` for sinusoidal waves and `LINRAMP` for linear ramps.
//!
//! - `Instruction`: Represents a waveform function composed of a type (`InstrType`) and a set of arguments (`InstrArgs`).
//!   It offers methods for creating specific instruction types conveniently and for evaluating them.
//!
//! - `InstrBook`: Places an instruction on the clock grid of a channel during the editing phase, capturing the
//!   start tick and, optionally, the end tick and whether to retain the last value after the end.
//!
//! ## Utilities:
//!
//! - The `InstrArgs` type alias provides a convenient way to define instruction arguments using an ordered
//!   dictionary with string keys and float values.
//!
//! ## Features:
//!
//! - Easy creation of instruction objects with utility methods such as `new_const`, `new_sine` and `new_linramp`.
//! - Ability to evaluate instructions and in-place populate given time array views with the resulting float-point values.
//! - Support for default values in instructions, allowing for flexibility and ease of use.

use indexmap::IndexMap;
use ndarray::array;
use std::f64::consts::PI;
use std::fmt;

use crate::error::EditError;

/// Type alias for instruction arguments: a dictionary with key-value pairs of
/// string (argument name) and float (value)
pub type InstrArgs = IndexMap<String, f64>;

/// Enum type for different instructions. Supported instructions: `CONST`, `SINE`, `LINRAMP`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrType {
    CONST,
    SINE,
    LINRAMP,
}
impl fmt::Display for InstrType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                InstrType::CONST => "CONST",
                InstrType::SINE => "SINE",
                InstrType::LINRAMP => "LINRAMP",
            }
        )
    }
}

/// Struct for a general instruction, consisting of type and arguments.
///
/// Different instruction types expects different fields in their argument dictionary.
/// Minimally expected keys are checked in `Instruction::new`, behavior of
/// default values is defined in `Instruction::eval_inplace`.
///
/// ## Implemented instruction types and their expected fields:
/// 1. `InstrType::CONST`:
///    - `value`
/// 2. `InstrType::SINE`:
///    - `freq`
///    - `amplitude`: Default is `1.0`
///    - `offset`: Default is `0.0`
///    - `phase`: Default is `0.0`
/// 3. `InstrType::LINRAMP`:
///    - `start_val`, `end_val`: values at `start_time` and `end_time`
///    - `start_time`, `end_time`: in seconds, the ramp is linear in between
///
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    instr_type: InstrType,
    args: InstrArgs,
}
impl Instruction {
    /// Constructs an `Instruction` object.
    ///
    /// This method serves as the foundational constructor upon which custom constructor
    /// wrappers for new instructions should be built. For each instruction type,
    /// it ensures that the `args` dictionary contains the required keys.
    ///
    /// # Examples
    ///
    /// Constructing a new `CONST` instruction
    /// (this is effectively the underlying implementation for [`Instruction::new_const`],
    /// the more convenient constructor):
    ///
    /// ```
    /// use nicompiler_backend::instruction::*;
    ///
    /// let mut const_args = InstrArgs::new();
    /// const_args.insert("value".to_string(), 1.0);
    /// let const_instr = Instruction::new(InstrType::CONST, const_args).unwrap();
    /// ```
    ///
    /// Missing required argument fields are reported as [`EditError::MissingArg`]:
    ///
    /// ```
    /// # use nicompiler_backend::instruction::*;
    /// # use nicompiler_backend::error::EditError;
    /// let err = Instruction::new(InstrType::CONST, InstrArgs::new()).unwrap_err();
    /// assert!(matches!(err, EditError::MissingArg { .. }));
    /// ```
    pub fn new(instr_type: InstrType, args: InstrArgs) -> Result<Self, EditError> {
        let required: &[&str] = match instr_type {
            InstrType::CONST => &["value"],
            InstrType::SINE => &["freq"],
            InstrType::LINRAMP => &["start_val", "end_val", "start_time", "end_time"],
        };
        if let Some(key) = required.iter().find(|key| !args.contains_key(**key)) {
            return Err(EditError::MissingArg {
                instr_type: instr_type.to_string(),
                key: key.to_string(),
            });
        }
        Ok(Instruction { instr_type, args })
    }

    pub fn instr_type(&self) -> InstrType {
        self.instr_type
    }

    pub fn args(&self) -> &InstrArgs {
        &self.args
    }

    // Keys checked by `new` are always present; optional keys fall back to `default`
    fn arg_or(&self, key: &str, default: f64) -> f64 {
        self.args.get(key).copied().unwrap_or(default)
    }

    /// Returns `Some(value)` for `CONST` instructions, `None` otherwise.
    pub fn const_value(&self) -> Option<f64> {
        match self.instr_type {
            InstrType::CONST => Some(self.arg_or("value", 0.0)),
            _ => None,
        }
    }

    /// Evaluates the instruction and populates the given array view with float-point values.
    ///
    /// This method takes a mutable array view (`t_arr`) holding time values in seconds and
    /// replaces them in-place based on the instruction type and its arguments.
    ///
    /// - For `InstrType::CONST`, the array will be filled with the constant value specified by the `value` argument.
    /// - For `InstrType::SINE`, a sinusoidal waveform is generated using the arguments `freq`, `amplitude`, `offset`, and `phase`.
    /// - For `InstrType::LINRAMP`, values are interpolated linearly between `(start_time, start_val)` and `(end_time, end_val)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use ndarray::Array1;
    /// use nicompiler_backend::instruction::*;
    ///
    /// let t_row = Array1::linspace(0.0, 1.0, 10);
    /// let mut t_values = ndarray::stack(ndarray::Axis(0), &[t_row.view(), t_row.view()]).unwrap();
    /// let const_instr = Instruction::new_const(1.0);
    /// const_instr.eval_inplace(&mut t_values.row_mut(0));
    ///
    /// let sine_instr = Instruction::new_sine(10.0, None, None, Some(1.0));
    /// sine_instr.eval_inplace(&mut t_values.row_mut(1));
    /// assert!(t_values[[0, 0]] == 1. && t_values[[0, 1]] == 1.);
    /// assert!((t_values[[1, 0]] - 1.).abs() < 1e-12);
    /// ```
    pub fn eval_inplace(&self, t_arr: &mut ndarray::ArrayViewMut1<f64>) {
        match self.instr_type {
            InstrType::CONST => {
                t_arr.fill(self.arg_or("value", 0.0));
            }
            InstrType::SINE => {
                let freq = self.arg_or("freq", 0.0);
                let amplitude = self.arg_or("amplitude", 1.0);
                let offset = self.arg_or("offset", 0.0);
                let phase = self.arg_or("phase", 0.0);

                t_arr.map_inplace(|t| {
                    *t = (2.0 * PI * freq * (*t) + phase).sin() * amplitude + offset
                });
            }
            InstrType::LINRAMP => {
                let start_val = self.arg_or("start_val", 0.0);
                let end_val = self.arg_or("end_val", 0.0);
                let t_start = self.arg_or("start_time", 0.0);
                let t_end = self.arg_or("end_time", 0.0);

                if t_end == t_start {
                    // Single-tick ramp
                    t_arr.fill(end_val);
                } else {
                    t_arr.map_inplace(|t| {
                        *t = (*t - t_start) * (end_val - start_val) / (t_end - t_start) + start_val
                    });
                }
            }
        }
    }

    /// Evaluate function at a single time point
    pub fn eval_point(&self, t: f64) -> f64 {
        let mut t_arr = array![t];
        self.eval_inplace(&mut t_arr.view_mut());
        t_arr[0]
    }

    /// Wrapper for conveniently creating new constant instructions.
    /// ```
    /// # use nicompiler_backend::instruction::*;
    /// let const_instr = Instruction::new_const(1.0);
    /// assert_eq!(const_instr.const_value(), Some(1.0));
    /// ```
    pub fn new_const(value: f64) -> Instruction {
        let mut args = InstrArgs::new();
        args.insert(String::from("value"), value);
        Instruction {
            instr_type: InstrType::CONST,
            args,
        }
    }

    /// Wrapper for conveniently creating new linear ramp instructions.
    /// `start_val` is the value at `start_time` and `end_val` the value at `end_time`.
    pub fn new_linramp(start_val: f64, end_val: f64, start_time: f64, end_time: f64) -> Instruction {
        let mut args = InstrArgs::new();
        args.insert(String::from("start_val"), start_val);
        args.insert(String::from("end_val"), end_val);
        args.insert(String::from("start_time"), start_time);
        args.insert(String::from("end_time"), end_time);
        Instruction {
            instr_type: InstrType::LINRAMP,
            args,
        }
    }

    /// Constructs a new sine instruction with provided parameters.
    ///
    /// Allows for convenient creation of sine instructions by specifying the frequency and optionally, amplitude,
    /// phase, and DC offset. Unspecified parameters will not be included in the instruction's argument dictionary,
    /// so the defaults of [`Instruction::eval_inplace`] apply.
    ///
    /// # Arguments
    ///
    /// - `freq`: The frequency of the sine wave.
    /// - `amplitude`: Optional amplitude of the sine wave.
    /// - `phase`: Optional phase offset of the sine wave in radians.
    /// - `dc_offset`: Optional DC offset for the sine wave.
    ///
    /// ```
    /// # use nicompiler_backend::instruction::*;
    /// let sine_instr = Instruction::new_sine(10.0, None, None, Some(1.0));
    /// assert_eq!(sine_instr.args().get("offset"), Some(&1.0));
    /// assert!(sine_instr.args().get("amplitude").is_none());
    /// ```
    pub fn new_sine(
        freq: f64,
        amplitude: Option<f64>,
        phase: Option<f64>,
        dc_offset: Option<f64>,
    ) -> Instruction {
        let mut args = InstrArgs::new();
        args.insert(String::from("freq"), freq);
        // For each optional argument, if specified, insert into dictionary
        [
            ("amplitude", amplitude),
            ("phase", phase),
            ("offset", dc_offset),
        ]
        .iter()
        .for_each(|(key, opt_value)| {
            if let Some(value) = *opt_value {
                args.insert(key.to_string(), value);
            }
        });
        Instruction {
            instr_type: InstrType::SINE,
            args,
        }
    }
}
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let args_string = self
            .args
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "[{}, {{{}}}]", self.instr_type, args_string)
    }
}

/// Places an instruction on the clock grid of a channel during experiment editing.
///
/// - `start_pos` (inclusive) is the first tick of the instruction.
/// - `end_spec` is one of:
///     - `Some((end_pos, keep_val))`: the instruction ends at `end_pos` (exclusive). If there is a gap until
///       the next edge (the next instruction or the global end), the compiler keeps a constant value
///       starting at `end_pos`: the last instruction value if `keep_val` is `true`, otherwise the channel default.
///     - `None`: a "go" instruction with no specified end. It spans until the next edge.
#[derive(Clone, Debug, PartialEq)]
pub struct InstrBook {
    pub start_pos: usize,
    pub end_spec: Option<(usize, bool)>,
    pub instr: Instruction,
}
impl InstrBook {
    /// Constructs a new `InstrBook` object.
    ///
    /// Returns `None` if `end_pos` is not strictly greater than `start_pos`: the smallest
    /// permissible instruction length is 1 tick.
    ///
    /// ```
    /// # use nicompiler_backend::instruction::*;
    /// let book = InstrBook::new(0, Some((5, true)), Instruction::new_const(1.0));
    /// assert!(book.is_some());
    /// assert!(InstrBook::new(5, Some((5, true)), Instruction::new_const(1.0)).is_none());
    /// ```
    pub fn new(start_pos: usize, end_spec: Option<(usize, bool)>, instr: Instruction) -> Option<Self> {
        if let Some((end_pos, _keep_val)) = end_spec {
            if end_pos <= start_pos {
                return None;
            }
        }
        Some(InstrBook {
            start_pos,
            end_spec,
            instr,
        })
    }
    /// Returns `end_pos`, or `None` for "go" instructions
    pub fn end_pos(&self) -> Option<usize> {
        self.end_spec.map(|(end_pos, _keep_val)| end_pos)
    }
    pub fn keep_val(&self) -> bool {
        self.end_spec.map_or(false, |(_end_pos, keep_val)| keep_val)
    }
    /// "Effective" end position
    ///
    /// If `end_spec` is `Some`, simply returns `end_pos`.
    /// If `end_spec` is `None`, returns `start_pos + 1`: a "go" instruction must have at least one tick
    /// to have any effect, so the earliest any subsequent instruction can start is `start_pos + 1`.
    pub fn eff_end_pos(&self) -> usize {
        match self.end_pos() {
            Some(end_pos) => end_pos,
            None => self.start_pos + 1,
        }
    }
    /// Returns `Some(end_pos - start_pos)` or `None` if not specified
    pub fn dur(&self) -> Option<usize> {
        self.end_pos().map(|end_pos| end_pos - self.start_pos)
    }
}
impl fmt::Display for InstrBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end_spec = match self.end_spec {
            Some((end_pos, keep_val)) => format!("end_pos={end_pos}, keep_val={keep_val}"),
            None => "no specified end".to_string(),
        };
        write!(
            f,
            "InstrBook({}, start_pos={}, {})",
            self.instr, self.start_pos, end_spec
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn linramp_endpoints() {
        let ramp = Instruction::new_linramp(-1.0, 3.0, 1.0, 2.0);
        assert_eq!(ramp.eval_point(1.0), -1.0);
        assert_eq!(ramp.eval_point(2.0), 3.0);
        assert_eq!(ramp.eval_point(1.5), 1.0);

        let single_tick = Instruction::new_linramp(0.0, 5.0, 1.0, 1.0);
        assert_eq!(single_tick.eval_point(1.0), 5.0);
    }

    #[test]
    fn sine_defaults() {
        let sine = Instruction::new_sine(1.0, None, None, None);
        assert!(sine.eval_point(0.0).abs() < 1e-12);
        assert!((sine.eval_point(0.25) - 1.0).abs() < 1e-12);

        let shifted = Instruction::new_sine(1.0, Some(2.0), Some(PI / 2.0), Some(0.5));
        assert!((shifted.eval_point(0.0) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn missing_args() {
        let mut args = InstrArgs::new();
        args.insert("start_val".to_string(), 0.0);
        args.insert("end_val".to_string(), 1.0);
        args.insert("start_time".to_string(), 0.0);
        assert_eq!(
            Instruction::new(InstrType::LINRAMP, args.clone()),
            Err(EditError::MissingArg {
                instr_type: "LINRAMP".to_string(),
                key: "end_time".to_string()
            })
        );
        args.insert("end_time".to_string(), 1.0);
        assert!(Instruction::new(InstrType::LINRAMP, args).is_ok());
    }

    #[test]
    fn book_end_spec() {
        let go = InstrBook::new(3, None, Instruction::new_const(1.0)).unwrap();
        assert_eq!(go.end_pos(), None);
        assert_eq!(go.eff_end_pos(), 4);
        assert_eq!(go.dur(), None);
        assert!(!go.keep_val());

        let fin = InstrBook::new(3, Some((10, true)), Instruction::new_const(1.0)).unwrap();
        assert_eq!(fin.eff_end_pos(), 10);
        assert_eq!(fin.dur(), Some(7));
        assert!(fin.keep_val());
    }
}
