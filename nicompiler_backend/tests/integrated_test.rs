use nicompiler_backend::*;

fn ao_exp(samp_rate: f64) -> Experiment {
    let mut exp = Experiment::new();
    exp.add_ao_device("PXI1Slot3", samp_rate).unwrap();
    exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();
    exp
}

#[test]
fn full_experiment() {
    let mut exp = Experiment::new();
    // Define devices and associated channels
    exp.add_ao_device("PXI1Slot3", 1e6).unwrap();
    exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();

    exp.add_ao_device("PXI1Slot4", 1e6).unwrap();
    exp.add_ao_channel("PXI1Slot4", 0, 0.).unwrap();

    exp.add_do_device("PXI1Slot6", 1e7).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 4, 0.).unwrap();

    // Define synchronization behavior (refer to the "Device" struct for more information)
    exp.device_cfg_trig("PXI1Slot3", "PXI1_Trig0", true).unwrap();
    exp.device_cfg_ref_clk("PXI1Slot3", "PXI1_Trig7", 1e7, true).unwrap();

    exp.device_cfg_trig("PXI1Slot4", "PXI1_Trig0", false).unwrap();
    exp.device_cfg_ref_clk("PXI1Slot4", "PXI1_Trig7", 1e7, false).unwrap();

    exp.device_cfg_samp_clk_src("PXI1Slot6", "PXI1_Trig7").unwrap();
    exp.device_cfg_trig("PXI1Slot6", "PXI1_Trig0", false).unwrap();

    // PXI1Slot3/ao0 starts with a 1ms-long 7kHz sine wave with offset 1
    // and unit amplitude, zero phase. Does not keep its value.
    exp.sine("PXI1Slot3", "ao0", 0., 1e-3, false, 7e3, None, None, Some(1.)).unwrap();
    // Ends with a half-millisecond long 1V constant signal which returns to zero
    exp.constant("PXI1Slot3", "ao0", 9e-3, 0.5e-3, 1.).unwrap();

    // We can also leave a defined channel empty: the device / channel will simply not be compiled

    // Both lines of PXI1Slot6 start with a high at t=0 and a half-millisecond high at t=9ms
    exp.high("PXI1Slot6", "port0/line0", 0., 1e-3).unwrap();
    exp.high("PXI1Slot6", "port0/line0", 9e-3, 0.5e-3).unwrap();
    // Alternatively, we can also define the same behavior via go_high/go_low
    exp.go_high("PXI1Slot6", "port0/line4", 0.).unwrap();
    exp.go_low("PXI1Slot6", "port0/line4", 1e-3).unwrap();
    exp.go_high("PXI1Slot6", "port0/line4", 9e-3).unwrap();
    exp.go_low("PXI1Slot6", "port0/line4", 9.5e-3).unwrap();

    // Compile the experiment: this will stop the experiment at the last edit-time plus one tick
    // PXI1Slot3 adds the closing-edge sample of its constant pulse ending at 9.5ms
    let run_time = exp.compile(None).unwrap();
    assert!((run_time - 9.501e-3).abs() < 1e-12);
    assert!((exp.device_total_run_time("PXI1Slot6").unwrap() - 9.5001e-3).abs() < 1e-12);
    assert!(!exp.dev("PXI1Slot4").unwrap().is_compiled());

    // We can compile again with a specific stop_time (and add instructions in between)
    assert_eq!(exp.compile(Some(10e-3)).unwrap(), 10e-3);
    assert!(exp.is_fresh_compiled());

    assert_eq!(
        exp.device_compiled_channel_names("PXI1Slot6", true, false).unwrap(),
        vec!["port0".to_string()]
    );
    // Both lines high, then both low
    let sig = exp
        .device_calc_signal_nsamps("PXI1Slot6", 0, 100_000, 10, true, false)
        .unwrap();
    assert_eq!(sig[[0, 0]], 17.);
    assert_eq!(sig[[0, 1]], 0.);
    assert_eq!(sig[[0, 9]], 17.);

    // Editing invalidates the fresh compile state
    exp.go_constant("PXI1Slot3", "ao0", 9.5e-3, 0.5).unwrap();
    assert!(!exp.is_fresh_compiled());
    exp.clear_edit_cache().unwrap();
    assert!(!exp.is_edited());
    assert!(!exp.is_compiled());
}

#[test]
fn closing_edge_sample() {
    let mut exp = ao_exp(1e6);
    exp.constant("PXI1Slot3", "ao0", 0., 1e-3, 1.).unwrap();
    assert_eq!(exp.compile(None).unwrap(), 0.001001);
    assert_eq!(exp.channel_instr_end("PXI1Slot3", "ao0").unwrap(), vec![1000, 1001]);
}

#[test]
fn explicit_stop_time_pads_with_default() {
    let mut exp = ao_exp(1e6);
    exp.constant("PXI1Slot3", "ao0", 0., 1e-3, 1.).unwrap();
    assert_eq!(exp.compile(Some(2e-3)).unwrap(), 0.002);
    assert_eq!(exp.channel_instr_end("PXI1Slot3", "ao0").unwrap(), vec![1000, 2000]);
    let sig = exp
        .channel_calc_signal_nsamps("PXI1Slot3", "ao0", 0., 2e-3, 4)
        .unwrap();
    assert_eq!(sig, vec![1., 1., 0., 0.]);
}

#[test]
fn minimum_sample_count() {
    let mut exp = ao_exp(1e6);
    exp.go_constant("PXI1Slot3", "ao0", 0., 1.).unwrap();
    assert_eq!(exp.compile(Some(2e-6)).unwrap(), 2e-6);
    assert_eq!(exp.dev("PXI1Slot3").unwrap().total_samps(), 2);
    assert_eq!(exp.compile(None).unwrap(), 2e-6);
    assert_eq!(exp.dev("PXI1Slot3").unwrap().total_samps(), 2);
}

#[test]
/// Lines of one port whose timelines end far apart must merge without running past the end
/// of the shorter line's instruction list.
fn port_lines_with_distant_ends() {
    let mut exp = Experiment::new();
    exp.add_do_device("PXI1Slot6", 1e6).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 1, 0.).unwrap();
    exp.high("PXI1Slot6", "port0/line0", 0., 10.).unwrap();
    exp.high("PXI1Slot6", "port0/line1", 0., 2e-3).unwrap();

    assert_eq!(exp.compile(None).unwrap(), 10.000001);
    // The short line carries a trailing hold up to the common end
    assert_eq!(
        exp.channel_instr_end("PXI1Slot6", "port0/line1").unwrap(),
        vec![2000, 10_000_001]
    );
    assert_eq!(
        exp.channel_instr_end("PXI1Slot6", "port0").unwrap(),
        vec![2000, 10_000_000, 10_000_001]
    );
    let sig = exp
        .device_calc_signal_nsamps("PXI1Slot6", 1999, 2001, 2, true, false)
        .unwrap();
    assert_eq!(sig.row(0).to_vec(), vec![3., 1.]);
    let sig = exp
        .device_calc_signal_nsamps("PXI1Slot6", 9_999_999, 10_000_001, 2, true, false)
        .unwrap();
    assert_eq!(sig.row(0).to_vec(), vec![1., 0.]);
}

#[test]
fn compile_is_idempotent() {
    let mut exp = ao_exp(1e3);
    exp.sine("PXI1Slot3", "ao0", 0.1, 0.2, true, 5., Some(2.), None, None).unwrap();
    exp.linramp("PXI1Slot3", "ao0", 0.5, 0.1, 0., 1., false).unwrap();

    exp.compile(Some(1.)).unwrap();
    let instr_end = exp.channel_instr_end("PXI1Slot3", "ao0").unwrap();
    let sig = exp.channel_calc_signal_nsamps("PXI1Slot3", "ao0", 0., 1., 1000).unwrap();

    exp.compile(Some(1.)).unwrap();
    assert_eq!(exp.channel_instr_end("PXI1Slot3", "ao0").unwrap(), instr_end);
    assert_eq!(
        exp.channel_calc_signal_nsamps("PXI1Slot3", "ao0", 0., 1., 1000).unwrap(),
        sig
    );
    // gap, sine, held value, ramp, default tail
    assert_eq!(instr_end, vec![100, 300, 500, 600, 1000]);
}

#[test]
fn failed_edits_leave_no_trace() {
    let mut exp = ao_exp(1e3);
    exp.constant("PXI1Slot3", "ao0", 0., 1., 1.).unwrap();
    exp.compile(None).unwrap();

    let err = exp.constant("PXI1Slot3", "ao0", 0.5, 1., 2.).unwrap_err();
    assert!(matches!(err, NiCompError::Edit(EditError::Overlap { .. })));
    assert!(exp.constant("PXI1Slot3", "ao0", 2., 1e-4, 2.).is_err());
    assert!(exp.constant("PXI1Slot3", "ao0", -1., 0.5, 2.).is_err());

    // Compile state survives rejected edits
    assert!(exp.is_fresh_compiled());
    assert_eq!(exp.last_instr_end_time(), 1.);
}

#[test]
fn reset_shifts_natural_stop() {
    let mut exp = ao_exp(1e3);
    exp.channel_cfg_reset_value("PXI1Slot3", "ao0", 0.25).unwrap();
    exp.constant("PXI1Slot3", "ao0", 0., 1., 1.).unwrap();
    assert_eq!(exp.add_reset_instr(None).unwrap(), 1.);
    // The reset instruction occupies one tick at edit time
    assert_eq!(exp.last_instr_end_time(), 1.001);
    exp.compile(Some(2.)).unwrap();
    assert_eq!(
        exp.channel_calc_signal_nsamps("PXI1Slot3", "ao0", 0.999, 1.001, 2).unwrap(),
        vec![1., 0.25]
    );
    assert_eq!(
        exp.channel_calc_signal_nsamps("PXI1Slot3", "ao0", 1.998, 2., 2).unwrap(),
        vec![0.25, 0.25]
    );
}
