use std::sync::Arc;

use niexpctrl_backend::*;

fn main() -> Result<(), StreamError> {
    env_logger::init();

    let mut exp = Experiment::new();
    exp.add_ao_device("PXI1Slot3", 1e6)?;
    exp.add_ao_device("PXI1Slot4", 1e6)?;
    exp.add_do_device("PXI1Slot6", 1e7)?;
    exp.device_cfg_trig("PXI1Slot3", "PXI_Trig0", true)?;
    exp.device_cfg_ref_clk("PXI1Slot3", "PXI_Trig7", 1e7, true)?;
    exp.device_cfg_trig("PXI1Slot4", "PXI_Trig0", false)?;
    exp.device_cfg_ref_clk("PXI1Slot4", "PXI_Trig7", 1e7, false)?;
    exp.device_cfg_samp_clk_src("PXI1Slot6", "PXI_Trig7")?;
    exp.device_cfg_trig("PXI1Slot6", "PXI_Trig0", false)?;

    exp.add_ao_channel("PXI1Slot3", 0, 0.)?;
    exp.sine("PXI1Slot3", "ao0", 0.0, 0.1, true, 20.0, Some(5.), None, None)?;
    exp.constant("PXI1Slot3", "ao0", 0.2, 0.1 - 1e-6, 5.)?;

    exp.add_ao_channel("PXI1Slot4", 0, 0.)?;
    exp.sine("PXI1Slot4", "ao0", 0.0, 0.1, true, 20.0, Some(5.), None, None)?;
    exp.constant("PXI1Slot4", "ao0", 0.2, 0.1 - 1e-6, 5.)?;

    exp.add_do_channel("PXI1Slot6", 0, 1, 0.)?;
    exp.add_do_channel("PXI1Slot6", 0, 0, 0.)?;
    exp.high("PXI1Slot6", "port0/line1", 0., 0.1)?;
    exp.high("PXI1Slot6", "port0/line0", 0., 0.1)?;
    exp.high("PXI1Slot6", "port0/line1", 0.2, 0.1 - 2e-6)?;
    exp.high("PXI1Slot6", "port0/line0", 0.2, 0.1 - 2e-6)?;

    exp.add_reset_instr(None)?;
    exp.compile(Some(0.4))?;
    exp.stream_exp(
        Arc::new(LogSink),
        &StreamCfg {
            bufsize_ms: 50.,
            nreps: 2,
            write_timeout: None,
        },
    )
}
