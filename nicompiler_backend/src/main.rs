use nicompiler_backend::*;

fn main() -> nicompiler_backend::error::Result<()> {
    env_logger::init();

    let mut exp = Experiment::new();
    exp.add_do_device("PXI1Slot6", 1e6)?;
    exp.add_do_channel("PXI1Slot6", 0, 0, 0.)?;
    exp.add_do_channel("PXI1Slot6", 0, 4, 0.)?;
    exp.high("PXI1Slot6", "port0/line0", 1e-6, 4e-6)?;
    exp.high("PXI1Slot6", "port0/line4", 2e-6, 5e-6)?;
    exp.compile(Some(10e-6))?;
    println!(
        "{:?}",
        exp.device_calc_signal_nsamps("PXI1Slot6", 0, 10, 10, true, false)?
    );
    Ok(())
}
