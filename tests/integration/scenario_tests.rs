//! End-to-end scenarios: a central connects, the polling loop samples and
//! publishes, commands arrive, the central leaves.

use envsense::adapters::sim_stack::SimStack;
use envsense::app::ports::ConnHandle;
use envsense::app::service::PollingLoop;
use envsense::config::SystemConfig;
use envsense::gatt::command::{CommandOutcome, Token};
use envsense::gatt::server::{EnvironmentSample, PublishMode, encode_value};
use envsense::gatt::service::Characteristic;
use envsense::sensors::{Reading, SensorError};

use super::mock_hw::{MockSensor, blink_channel, boot};

fn read_i32(
    server: &envsense::gatt::server::EnvironmentServer<SimStack>,
    c: Characteristic,
) -> i32 {
    let v = server.read_value(c).unwrap();
    i32::from_le_bytes(v.as_slice().try_into().unwrap())
}

#[test]
fn connect_publish_disconnect() {
    let server = boot();
    assert!(server.connections().is_empty());

    server.stack().connect(ConnHandle(1));
    server.publish(EnvironmentSample::new(21, 101_325, 45), PublishMode::NOTIFY);

    let h = *server.handles();
    assert_eq!(
        server.stack().notify_calls(),
        vec![
            (ConnHandle(1), h.temperature),
            (ConnHandle(1), h.pressure),
            (ConnHandle(1), h.humidity),
        ]
    );
    assert_eq!(read_i32(&server, Characteristic::Temperature), 21);
    assert_eq!(read_i32(&server, Characteristic::Pressure), 101_325);
    assert_eq!(read_i32(&server, Characteristic::Humidity), 45);

    server.stack().disconnect(ConnHandle(1));
    assert!(server.connections().is_empty());
    assert!(server.is_advertising());
    assert!(server.stack().advertising().is_some());
}

#[test]
fn polling_loop_notifies_every_tenth_tick() {
    let config = SystemConfig::default();
    let server = boot();
    server.stack().connect(ConnHandle(5));
    let (channel, _, _) = blink_channel(&config);
    let mut polling = PollingLoop::new(
        server.clone(),
        MockSensor::constant(22.7, 100_900.4, 40.2),
        channel,
        &config,
    );

    let reports: Vec<_> = (0..20).map(|_| polling.tick()).collect();
    let notify_ticks: Vec<u64> = reports
        .iter()
        .filter(|r| r.mode.notify)
        .map(|r| r.tick)
        .collect();
    assert_eq!(notify_ticks, [10u64, 20]);
    assert!(reports.iter().all(|r| !r.mode.indicate));
    assert_eq!(server.stack().notify_calls().len(), 6);
    assert_eq!(
        reports[0].sample,
        Some(EnvironmentSample::new(22, 100_900, 40))
    );
    assert_eq!(polling.sensor_mut().reads, 20);
}

#[test]
fn indicate_enabled_by_config() {
    let config = SystemConfig {
        indicate: true,
        notify_every: 1,
        ..SystemConfig::default()
    };
    let server = boot();
    server.stack().connect(ConnHandle(1));
    let (channel, _, _) = blink_channel(&config);
    let mut polling = PollingLoop::new(
        server.clone(),
        MockSensor::constant(1.0, 2.0, 3.0),
        channel,
        &config,
    );

    let report = polling.tick();
    assert!(report.mode.notify && report.mode.indicate);
    assert_eq!(report.publish.unwrap().indicated, 3);
    assert_eq!(server.stack().indicate_calls().len(), 3);
}

#[test]
fn sensor_failure_skips_publish_but_serves_commands() {
    let config = SystemConfig::default();
    let server = boot();
    let (channel, pin, _) = blink_channel(&config);
    let sensor = MockSensor::constant(20.0, 100_000.0, 50.0).then(Err(SensorError::Bus));
    let mut polling = PollingLoop::new(server.clone(), sensor, channel, &config);

    server
        .stack()
        .peer_write(server.handles().command, b"blink")
        .unwrap();
    let first = polling.tick();
    assert_eq!(first.sample, None);
    assert_eq!(first.publish, None);
    assert_eq!(
        first.command,
        CommandOutcome::Executed(Token::try_from("blink").unwrap())
    );
    assert_eq!(pin.pulses(), 3);
    assert!(server.read_value(Characteristic::Temperature).unwrap().is_empty());

    let second = polling.tick();
    assert_eq!(second.sample, Some(EnvironmentSample::new(20, 100_000, 50)));
    assert_eq!(second.command, CommandOutcome::Empty);
    assert_eq!(
        server.read_value(Characteristic::Temperature).unwrap().as_slice(),
        &encode_value(20)
    );
}

#[test]
fn reconnect_after_disconnect_receives_notifications() {
    let config = SystemConfig {
        notify_every: 1,
        ..SystemConfig::default()
    };
    let server = boot();
    let (channel, _, _) = blink_channel(&config);
    let reading = Reading {
        temperature_c: -3.5,
        pressure_pa: 99_000.0,
        humidity_pct: 80.0,
    };
    let sensor = MockSensor::constant(
        reading.temperature_c,
        reading.pressure_pa,
        reading.humidity_pct,
    );
    let mut polling = PollingLoop::new(server.clone(), sensor, channel, &config);

    server.stack().connect(ConnHandle(1));
    polling.tick();
    server.stack().disconnect(ConnHandle(1));
    assert_eq!(polling.tick().publish.unwrap().notified, 0);

    server.stack().connect(ConnHandle(2));
    polling.tick();
    let to_second = server
        .stack()
        .notify_calls()
        .into_iter()
        .filter(|(c, _)| *c == ConnHandle(2))
        .count();
    assert_eq!(to_second, 3);
    assert_eq!(read_i32(&server, Characteristic::Temperature), -3);
}
