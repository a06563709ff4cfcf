use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use niexpctrl_backend::*;

/// Sink blocking every write until opened
#[derive(Default)]
struct GatedSink {
    open: Mutex<bool>,
    condvar: Condvar,
    inner: MemorySink,
}

impl GatedSink {
    fn open(&self) {
        *self.open.lock() = true;
        self.condvar.notify_all();
    }
}

impl StreamSink for GatedSink {
    fn write(&self, card_id: &str, chan_id: &str, samples: &[f64], samp_rate: f64) -> Result<(), SinkError> {
        let mut open = self.open.lock();
        while !*open {
            self.condvar.wait(&mut open);
        }
        self.inner.write(card_id, chan_id, samples, samp_rate)
    }
}

/// Sink rejecting every write to one channel
struct FailingSink {
    chan_id: String,
}

impl StreamSink for FailingSink {
    fn write(&self, _card_id: &str, chan_id: &str, _samples: &[f64], _samp_rate: f64) -> Result<(), SinkError> {
        if chan_id == self.chan_id {
            return Err(SinkError::new("buffer underflow"));
        }
        Ok(())
    }
}

/// Sink panicking on every write
struct PanickingSink;

impl StreamSink for PanickingSink {
    fn write(&self, card_id: &str, _chan_id: &str, _samples: &[f64], _samp_rate: f64) -> Result<(), SinkError> {
        panic!("sink of {card_id} exploded");
    }
}

fn synced_exp() -> Experiment {
    let mut exp = Experiment::new();
    exp.add_ao_device("PXI1Slot3", 1e3).unwrap();
    exp.add_ao_device("PXI1Slot4", 1e3).unwrap();
    exp.add_do_device("PXI1Slot6", 1e4).unwrap();
    exp.device_cfg_trig("PXI1Slot3", "PXI1_Trig0", false).unwrap();
    exp.device_cfg_trig("PXI1Slot4", "PXI1_Trig0", true).unwrap();
    exp.device_cfg_trig("PXI1Slot6", "PXI1_Trig0", false).unwrap();

    exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();
    exp.add_ao_channel("PXI1Slot3", 1, 0.).unwrap();
    exp.add_ao_channel("PXI1Slot4", 0, 0.).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 3, 0.).unwrap();

    exp.sine("PXI1Slot3", "ao0", 0., 0.1, true, 10., None, None, None).unwrap();
    exp.linramp("PXI1Slot3", "ao1", 0.05, 0.1, -1., 1., false).unwrap();
    exp.go_constant("PXI1Slot4", "ao0", 0.02, 3.).unwrap();
    exp.high("PXI1Slot6", "port0/line0", 0.01, 0.05).unwrap();
    exp.go_high("PXI1Slot6", "port0/line3", 0.1).unwrap();
    exp.compile(Some(0.2)).unwrap();
    exp
}

#[test]
fn streamed_samples_match_compiled_signal() {
    let exp = synced_exp();
    let sink = Arc::new(MemorySink::new());
    let cfg = StreamCfg {
        bufsize_ms: 30.,
        nreps: 3,
        write_timeout: Some(Duration::from_secs(10)),
    };
    exp.stream_exp(sink.clone(), &cfg).unwrap();
    assert!(!exp.is_streaming());

    for (dev_name, chan_name) in [
        ("PXI1Slot3", "ao0"),
        ("PXI1Slot3", "ao1"),
        ("PXI1Slot4", "ao0"),
        ("PXI1Slot6", "port0"),
    ] {
        let dev = exp.dev(dev_name).unwrap();
        let total_samps = dev.total_samps();
        let expected = exp
            .channel_calc_signal_nsamps(dev_name, chan_name, 0., 0.2, total_samps)
            .unwrap();
        let streamed = sink.samples(dev_name, chan_name);
        assert_eq!(streamed.len(), 3 * total_samps);
        for rep in streamed.chunks(total_samps) {
            assert_eq!(rep, expected.as_slice());
        }
    }
    // Line channels are not streamed
    assert!(sink.samples("PXI1Slot6", "port0/line0").is_empty());
    assert!(sink
        .writes()
        .iter()
        .filter(|w| w.card_id == "PXI1Slot6")
        .all(|w| w.samp_rate == 1e4));
}

#[test]
fn trigger_exporter_starts_last() {
    let exp = synced_exp();
    let sink = Arc::new(MemorySink::new());
    let cfg = StreamCfg {
        nreps: 4,
        ..StreamCfg::default()
    };
    exp.stream_exp(sink.clone(), &cfg).unwrap();

    let starts = sink.starts();
    assert_eq!(starts.len(), 12);
    // Every repetition starts the exporter after both importers
    for rep in starts.chunks(3) {
        assert_eq!(rep[2], "PXI1Slot4");
    }
    assert_eq!(sink.stops().len(), 12);
}

#[test]
fn not_compiled() {
    let mut exp = Experiment::new();
    exp.add_ao_device("PXI1Slot3", 1e3).unwrap();
    exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();
    let sink = Arc::new(MemorySink::new());
    assert_eq!(
        exp.stream_exp(sink.clone(), &StreamCfg::default()),
        Err(StreamError::NotCompiled)
    );
    exp.go_constant("PXI1Slot3", "ao0", 0., 1.).unwrap();
    assert_eq!(
        exp.stream_exp(sink, &StreamCfg::default()),
        Err(StreamError::NotCompiled)
    );
}

#[test]
fn sink_errors_carry_card_and_channel() {
    let exp = synced_exp();
    let sink = Arc::new(FailingSink {
        chan_id: "ao1".to_string(),
    });
    match exp.stream_exp(sink, &StreamCfg::default()) {
        Err(StreamError::Sink { card, chan, source }) => {
            assert_eq!(card, "PXI1Slot3");
            assert_eq!(chan.as_deref(), Some("ao1"));
            assert_eq!(source, SinkError::new("buffer underflow"));
        }
        // A failing secondary can also surface as a broken start handshake of the primary
        Err(StreamError::Worker(_)) => {}
        other => panic!("unexpected result {other:?}"),
    }
    // The busy flag is released on failure
    assert!(!exp.is_streaming());
}

#[test]
fn background_stream_locks_compile() {
    let mut exp = synced_exp();
    let sink = Arc::new(GatedSink::default());
    let handle = exp.stream_exp_bg(sink.clone(), StreamCfg::default()).unwrap();

    assert!(exp.is_streaming());
    assert_eq!(
        exp.stream_exp(Arc::new(MemorySink::new()), &StreamCfg::default()),
        Err(StreamError::Busy)
    );
    assert_eq!(
        exp.compile(Some(0.3)).unwrap_err(),
        NiCompError::Compile(CompileError::Busy)
    );
    // Edits are accepted while streaming, the stream runs on a snapshot
    exp.go_constant("PXI1Slot4", "ao0", 0.25, 0.).unwrap();

    sink.open();
    handle.wait().unwrap();
    assert!(!exp.is_streaming());
    assert_eq!(sink.inner.samples("PXI1Slot4", "ao0").len(), 200);
    assert_eq!(exp.compile(None).unwrap(), 0.251);
}

#[test]
fn cancel_stops_at_chunk_boundary() {
    let mut exp = Experiment::new();
    exp.add_ao_device("PXI1Slot3", 1e3).unwrap();
    exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();
    exp.go_constant("PXI1Slot3", "ao0", 0., 1.).unwrap();
    exp.compile(Some(1.)).unwrap();

    let sink = Arc::new(GatedSink::default());
    let cfg = StreamCfg {
        bufsize_ms: 10.,
        nreps: 1,
        write_timeout: None,
    };
    let handle = exp.stream_exp_bg(sink.clone(), cfg).unwrap();
    handle.cancel();
    sink.open();
    assert_eq!(handle.wait(), Err(StreamError::Cancelled));
    // At most the chunk in flight when cancelled made it through
    assert!(sink.inner.samples("PXI1Slot3", "ao0").len() <= 10);
    assert!(!exp.is_streaming());
}

#[test]
fn wait_timeout_cancels() {
    let mut exp = Experiment::new();
    exp.add_ao_device("PXI1Slot3", 1e3).unwrap();
    exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();
    exp.go_constant("PXI1Slot3", "ao0", 0., 1.).unwrap();
    exp.compile(Some(1.)).unwrap();

    let sink = Arc::new(GatedSink::default());
    let handle = exp.stream_exp_bg(sink.clone(), StreamCfg::default()).unwrap();
    let token = handle.cancel_token();
    assert_eq!(
        handle.wait_timeout(Duration::from_millis(50)),
        Err(StreamError::Timeout)
    );
    assert!(token.is_cancelled());

    // Let the detached stream wind down
    sink.open();
    while exp.is_streaming() {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(sink.inner.samples("PXI1Slot3", "ao0").len() <= 50);
}

#[test]
fn report_timeout() {
    let mut exp = Experiment::new();
    exp.add_ao_device("PXI1Slot3", 1e3).unwrap();
    exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();
    exp.go_constant("PXI1Slot3", "ao0", 0., 1.).unwrap();
    exp.compile(Some(1.)).unwrap();

    let sink = Arc::new(GatedSink::default());
    let cfg = StreamCfg {
        write_timeout: Some(Duration::from_millis(20)),
        ..StreamCfg::default()
    };
    let handle = exp.stream_exp_bg(sink.clone(), cfg).unwrap();
    // Workers are stuck on the first write: the controller times out, cancels and closes them
    std::thread::sleep(Duration::from_millis(100));
    sink.open();
    assert_eq!(handle.wait(), Err(StreamError::Timeout));
}

#[test]
fn panicking_sink_fails_the_stream() {
    let exp = synced_exp();
    match exp.stream_exp(Arc::new(PanickingSink), &StreamCfg::default()) {
        Err(StreamError::Worker(msg)) => assert!(msg.contains("exploded"), "{msg}"),
        other => panic!("unexpected result {other:?}"),
    }
    assert!(!exp.is_streaming());

    // Same in the background, without running into the wait timeout
    let handle = exp
        .stream_exp_bg(Arc::new(PanickingSink), StreamCfg::default())
        .unwrap();
    assert!(matches!(
        handle.wait_timeout(Duration::from_secs(10)),
        Err(StreamError::Worker(_))
    ));
    while exp.is_streaming() {
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn importers_need_a_streamed_exporter() {
    let mut exp = Experiment::new();
    exp.add_ao_device("PXI1Slot3", 1e3).unwrap();
    exp.add_ao_device("PXI1Slot4", 1e3).unwrap();
    exp.device_cfg_trig("PXI1Slot3", "PXI1_Trig0", false).unwrap();
    exp.device_cfg_trig("PXI1Slot4", "PXI1_Trig0", true).unwrap();
    exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();
    exp.add_ao_channel("PXI1Slot4", 0, 0.).unwrap();
    // Only the importer has edits, the exporter is left out of the compile
    exp.constant("PXI1Slot3", "ao0", 0., 0.1, 1.).unwrap();
    exp.compile(None).unwrap();

    let sink = Arc::new(MemorySink::new());
    match exp.stream_exp(sink.clone(), &StreamCfg::default()) {
        Err(StreamError::Compile(NiCompError::Config(
            nicompiler_backend::ConfigError::MissingTrigExporter { importers },
        ))) => assert_eq!(importers, vec!["PXI1Slot3".to_string()]),
        other => panic!("unexpected result {other:?}"),
    }
    assert!(sink.writes().is_empty());

    exp.constant("PXI1Slot4", "ao0", 0., 0.1, 2.).unwrap();
    exp.compile(None).unwrap();
    exp.stream_exp(sink.clone(), &StreamCfg::default()).unwrap();
    assert!(!sink.samples("PXI1Slot3", "ao0").is_empty());
}
