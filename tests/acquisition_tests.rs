use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use thermopoll::mock::ScriptedTransport;
use thermopoll::{
    AcquisitionConfig, AcquisitionController, BufferConfig, ChannelSink, DisplayEvent, FrameCodec,
    IoError, OpenError, PortConfig, Sample, SchedulerError, SchedulerState,
};

const WAIT: Duration = Duration::from_secs(2);

fn fast_config() -> AcquisitionConfig {
    AcquisitionConfig {
        poll_period: Duration::from_millis(25),
        read_deadline: Duration::from_millis(5),
        buffer: BufferConfig {
            window_span: 10.0,
            min_spacing: 0.0,
        },
        ..AcquisitionConfig::default()
    }
}

fn controller_with(config: AcquisitionConfig) -> (AcquisitionController, Receiver<DisplayEvent>) {
    let (sink, events) = ChannelSink::new();
    let controller = AcquisitionController::new(config, Arc::new(sink)).expect("valid config");
    (controller, events)
}

fn next_sample(events: &Receiver<DisplayEvent>) -> (Sample, Vec<Sample>) {
    loop {
        match events.recv_timeout(WAIT).expect("no display event") {
            DisplayEvent::Sample { sample, window } => return (sample, window),
            _ => continue,
        }
    }
}

#[test]
fn reply_bytes_become_a_displayed_sample() {
    let sensor = ScriptedTransport::new();
    sensor.push_reply(vec![0x00, 0x00, 0x00, 0x00, 0x08, 0x09]);
    let (mut controller, events) = controller_with(fast_config());

    controller.open_transport("sim", Box::new(sensor.clone()));
    controller.start().unwrap();

    let (sample, window) = next_sample(&events);
    assert_eq!(sample.value, 23.12);
    assert_eq!(window, vec![sample]);
    assert_eq!(controller.latest(), Some(sample));

    controller.stop_session();
    assert_eq!(
        sensor.writes()[0],
        vec![0xFF, 0x04, 0x02, 0x00, 0x00, 0xD0]
    );
}

#[test]
fn reply_split_across_reads_is_reassembled() {
    let sensor = ScriptedTransport::new();
    sensor.trickle(2, Duration::from_millis(3));
    sensor.push_reply(FrameCodec::new().encode_reply(2312));
    let config = AcquisitionConfig {
        poll_period: Duration::from_millis(50),
        read_deadline: Duration::from_millis(20),
        ..fast_config()
    };
    let (mut controller, events) = controller_with(config);

    controller.open_transport("sim", Box::new(sensor));
    controller.start().unwrap();

    match events.recv_timeout(WAIT).unwrap() {
        DisplayEvent::Sample { sample, .. } => assert_eq!(sample.value, 23.12),
        other => panic!("unexpected {other:?}"),
    }
    controller.stop_session();
}

#[test]
fn silent_sensor_produces_no_events_and_keeps_running() {
    let sensor = ScriptedTransport::new();
    let (mut controller, events) = controller_with(fast_config());

    controller.open_transport("sim", Box::new(sensor.clone()));
    controller.start().unwrap();

    while sensor.write_count() < 5 {
        thread::sleep(Duration::from_millis(10));
    }
    // Let the fifth cycle's read window close.
    thread::sleep(Duration::from_millis(20));

    assert!(events.try_recv().is_err());
    assert_eq!(controller.status().scheduler, SchedulerState::Running);
    assert!(controller.latest().is_none());
    controller.stop_session();
}

#[test]
fn garbage_replies_are_reported_and_polling_continues() {
    let sensor = ScriptedTransport::new();
    sensor.push_reply(vec![0x01, 0x02]);
    sensor.push_reply(FrameCodec::new().encode_reply(2500));
    let (mut controller, events) = controller_with(fast_config());

    controller.open_transport("sim", Box::new(sensor));
    controller.start().unwrap();

    match events.recv_timeout(WAIT).unwrap() {
        DisplayEvent::FrameError(e) => assert!(e.to_string().contains("too short")),
        other => panic!("unexpected {other:?}"),
    }
    let (sample, _) = next_sample(&events);
    assert_eq!(sample.value, 25.0);
    controller.stop_session();
}

#[test]
fn repeated_write_failures_fault_until_reopen() {
    let sensor = ScriptedTransport::new();
    sensor.fail_all_writes(true);
    let (mut controller, events) = controller_with(fast_config());

    controller.open_transport("sim", Box::new(sensor.clone()));
    controller.start().unwrap();

    let mut link_errors = 0;
    loop {
        match events.recv_timeout(WAIT).expect("scheduler never faulted") {
            DisplayEvent::LinkError(IoError::WriteFailed(_)) => link_errors += 1,
            DisplayEvent::Faulted { failures } => {
                assert_eq!(failures, 3);
                break;
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(link_errors, 3);
    assert_eq!(controller.status().scheduler, SchedulerState::Faulted);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(sensor.write_count(), 3);
    assert_eq!(controller.start(), Err(SchedulerError::Faulted));

    // Operator reopens after fixing the link.
    sensor.fail_all_writes(false);
    sensor.push_reply(FrameCodec::new().encode_reply(1999));
    controller.open_transport("sim", Box::new(sensor.clone()));
    assert_eq!(controller.status().scheduler, SchedulerState::Idle);
    controller.start().unwrap();

    let (sample, _) = next_sample(&events);
    assert_eq!(sample.value, 19.99);
    controller.stop_session();
}

#[test]
fn buffer_survives_stop_and_start() {
    let sensor = ScriptedTransport::with_responder(|_| FrameCodec::new().encode_reply(2100));
    let (mut controller, events) = controller_with(fast_config());

    controller.open_transport("sim", Box::new(sensor));
    controller.start().unwrap();
    next_sample(&events);
    next_sample(&events);

    controller.stop();
    controller.stop();
    // Let the dispatcher finish anything polled before the stop.
    thread::sleep(Duration::from_millis(50));
    let _ = events.try_iter().count();
    let paused = controller.export_current_buffer();
    assert!(paused.len() >= 2);
    assert!(controller.status().port_open);

    controller.start().unwrap();
    next_sample(&events);
    controller.stop();
    assert!(controller.export_current_buffer().len() > paused.len());
    assert!(controller
        .export_current_buffer()
        .windows(2)
        .all(|w| w[0].0 <= w[1].0));

    controller.clear_buffer();
    assert!(controller.export_current_buffer().is_empty());
    assert!(controller.export_history().is_empty());
    assert!(controller.latest().is_none());
    controller.stop_session();
}

#[test]
fn debounce_caps_the_display_rate() {
    let sensor = ScriptedTransport::with_responder(|_| FrameCodec::new().encode_reply(2000));
    let config = AcquisitionConfig {
        poll_period: Duration::from_millis(20),
        read_deadline: Duration::from_millis(5),
        buffer: BufferConfig {
            window_span: 10.0,
            min_spacing: 0.2,
        },
        ..AcquisitionConfig::default()
    };
    let (mut controller, events) = controller_with(config);

    controller.open_transport("sim", Box::new(sensor.clone()));
    controller.start().unwrap();
    thread::sleep(Duration::from_millis(500));
    controller.stop_session();

    let displayed: Vec<Sample> = events
        .try_iter()
        .filter_map(|e| match e {
            DisplayEvent::Sample { sample, .. } => Some(sample),
            _ => None,
        })
        .collect();
    assert!(!displayed.is_empty());
    assert!(displayed.len() < sensor.write_count());
    assert!(displayed
        .windows(2)
        .all(|w| w[1].timestamp - w[0].timestamp >= 0.2));
}

#[test]
fn stop_session_is_idempotent_and_releases_the_port() {
    let (mut controller, _events) = controller_with(fast_config());
    controller.stop_session();

    controller.open_transport("sim", Box::new(ScriptedTransport::new()));
    controller.start().unwrap();
    controller.stop_session();
    controller.stop_session();

    let status = controller.status();
    assert!(!status.port_open);
    assert_eq!(status.port_name, None);
    assert_eq!(status.scheduler, SchedulerState::Idle);
    assert_eq!(controller.start(), Err(SchedulerError::PortNotOpen));
}

#[test]
fn repeated_open_close_cycles_reuse_one_scheduler() {
    let sensor = ScriptedTransport::with_responder(|_| FrameCodec::new().encode_reply(3000));
    let (mut controller, events) = controller_with(fast_config());

    for _ in 0..5 {
        controller.open_transport("sim", Box::new(sensor.clone()));
        controller.start().unwrap();
        next_sample(&events);
        controller.close();
        assert_eq!(controller.status().scheduler, SchedulerState::Idle);
    }

    let writes = sensor.write_count();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(sensor.write_count(), writes);
}

#[test]
fn missing_device_is_reported_as_open_error() {
    let (mut controller, _events) = controller_with(fast_config());
    let err = controller
        .start_session(&PortConfig::new("/dev/thermopoll-no-such-port", 9600))
        .unwrap_err();
    assert!(matches!(
        err,
        OpenError::NotFound | OpenError::PermissionDenied | OpenError::Other(_)
    ));
    assert!(!controller.status().port_open);
}

#[test]
fn history_export_writes_a_table() {
    let sensor = ScriptedTransport::with_responder(|_| FrameCodec::new().encode_reply(2345));
    let (mut controller, events) = controller_with(fast_config());
    controller.open_transport("sim", Box::new(sensor));
    controller.start().unwrap();
    next_sample(&events);
    controller.stop_session();

    let rows = controller.export_history();
    let mut out = Vec::new();
    thermopoll::export::write_table(&mut out, &rows).unwrap();
    let text = String::from_utf8(out).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("time\ttemperature"));
    let first = lines.next().unwrap();
    assert!(first.ends_with("\t23.45"));
    assert_eq!(text.lines().count(), rows.len() + 1);
}
