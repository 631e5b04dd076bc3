use std::collections::VecDeque;

use vgreen_motor_tools::connection::{Connection, Transport};
use vgreen_motor_tools::modbus::{DemandMode, MotorMode};
use vgreen_motor_tools::motor::{Demand, Motor};
use vgreen_motor_tools::registry::Sensor;
use vgreen_motor_tools::rtu;
use vgreen_motor_tools::schedule::{EvoSchedule, ScheduleSet, ScheduleStep};

const DEVICE: u8 = 0x15;

/// Plays back one scripted response per request, checking each request on the way.
#[derive(Default)]
struct Script {
    exchanges: VecDeque<(Vec<u8>, Option<Vec<u8>>)>,
    pending: VecDeque<u8>,
}

impl Script {
    /// `response` is given without its checksum, `None` stands for a device that stays silent.
    fn expect(mut self, request: &[u8], response: Option<&[u8]>) -> Self {
        let response = response.map(|r| {
            let mut frame = r.to_vec();
            frame.extend(rtu::checksum(r));
            frame
        });
        self.exchanges.push_back((request.to_vec(), response));
        self
    }

    fn motor(self) -> Motor<Script> {
        Motor::new(Connection::new(self, DEVICE))
    }
}

impl Transport for Script {
    fn send(&mut self, frame: &[u8]) -> std::io::Result<()> {
        let (request, response) = self.exchanges.pop_front().expect("unexpected request");
        assert_eq!(frame, request, "request bytes");
        self.pending = response.unwrap_or_default().into();
        Ok(())
    }

    fn receive(&mut self, count: usize) -> std::io::Result<Vec<u8>> {
        if self.pending.len() < count {
            self.pending.clear();
            return Err(std::io::ErrorKind::TimedOut.into());
        }
        Ok(self.pending.drain(..count).collect())
    }

    fn verify_checksum(&self, frame: &[u8]) -> bool {
        rtu::has_valid_checksum(frame)
    }
}

fn finished(motor: Motor<Script>) {
    let script = motor.into_connection().into_inner();
    assert!(script.exchanges.is_empty(), "not every scripted request was sent");
}

#[test]
fn control_functions() {
    let mut motor = Script::default()
        .expect(&[DEVICE, 0x41, 0x20], Some(&[DEVICE, 0x41, 0x10]))
        .expect(&[DEVICE, 0x42, 0x20], Some(&[DEVICE, 0xc2, 0x01]))
        .expect(&[DEVICE, 0x65, 0x20], None)
        .motor();
    assert!(motor.go());
    assert!(!motor.stop());
    assert!(!motor.store_config());
    finished(motor);
}

#[test]
fn status() {
    let mut motor = Script::default()
        .expect(&[DEVICE, 0x43, 0x20], Some(&[DEVICE, 0x43, 0x10, 0x0b]))
        .expect(&[DEVICE, 0x43, 0x20], Some(&[DEVICE, 0x43, 0x10, 0x33]))
        .expect(&[DEVICE, 0x43, 0x20], None)
        .motor();
    let status = motor.status();
    assert_eq!(status.value(), MotorMode::RUN_VECTOR);
    assert_eq!(status.to_string(), "RUN");
    assert_eq!(motor.status().to_string(), "0x33");
    let status = motor.status();
    assert_eq!(status.to_string(), "Modbus Error");
    assert_eq!(status.value().0, 0);
    finished(motor);
}

#[test]
fn set_demand_reports_physical_units() {
    let mut motor = Script::default()
        .expect(&[DEVICE, 0x44, 0x20, 0x00, 0x90, 0x1a], Some(&[DEVICE, 0x44, 0x10, 0x00, 0x90, 0x1a]))
        .expect(&[DEVICE, 0x44, 0x20, 0x01, 0x60, 0x09], Some(&[DEVICE, 0x44, 0x10, 0x01, 0x60, 0x09]))
        .motor();
    assert_eq!(
        motor.set_demand(DemandMode::Speed, 1700),
        Some(Demand { mode: DemandMode::Speed, value: 1700 })
    );
    assert_eq!(
        motor.set_demand(DemandMode::Torque, 2),
        Some(Demand { mode: DemandMode::Torque, value: 2 })
    );
    // Does not fit the wire value, nothing is sent.
    assert_eq!(motor.set_demand(DemandMode::Torque, 100), None);
    finished(motor);
}

#[test]
fn sensors() {
    let mut motor = Script::default()
        .expect(&[DEVICE, 0x45, 0x20, 0x00, 0x00], Some(&[DEVICE, 0x45, 0x10, 0x00, 0x00, 0xf4, 0x1a]))
        .expect(&[DEVICE, 0x45, 0x20, 0x00, 0x07], Some(&[DEVICE, 0x45, 0x10, 0x00, 0x07, 0x00, 0x0c]))
        .expect(&[DEVICE, 0x45, 0x20, 0x00, 0x01], Some(&[DEVICE, 0x45, 0x10, 0x00]))
        .motor();
    assert_eq!(motor.read_sensor(Sensor::Speed).to_string(), "1725 RPM");
    assert_eq!(motor.read_sensor(Sensor::TempAmbient).value(), 24.0);
    let current = motor.read_sensor(Sensor::Current);
    assert!(current.value().is_nan());
    assert_eq!(current.to_string(), "~~.~~A");
    finished(motor);
}

#[test]
fn identification() {
    let mut response = vec![DEVICE, 0x46, 0x10, 0x00, 0x00, 0x1a];
    response.extend_from_slice(b"4321\x2a0000000000057200560123");
    let mut motor = Script::default()
        .expect(&[DEVICE, 0x46, 0x20, 0x00, 0x00, 0x1a], Some(&response))
        .expect(&[DEVICE, 0x46, 0x20, 0x00, 0x00, 0x1a], Some(&[DEVICE, 0xc6, 0x02]))
        .motor();
    let id = motor.read_identification();
    assert_eq!(id.drive_firmware(), "12.34.56");
    assert_eq!(id.horsepower(), "2.75 HP");
    let id = motor.read_identification();
    assert_eq!(id.drive_firmware(), "~~.~~.~~");
    assert_eq!(id.product_id(), "~~~~");
    finished(motor);
}

#[test]
fn config_items() {
    let mut motor = Script::default()
        .expect(&[DEVICE, 0x64, 0x20, 0x01, 0x00, 0x00], Some(&[DEVICE, 0x64, 0x10, 0x01, 0x00, 0x00, 30]))
        .expect(
            &[DEVICE, 0x64, 0x20, 0x8a, 0x5b, 0x01, 0xdc, 0x05],
            Some(&[DEVICE, 0x64, 0x10, 0x8a, 0x5b, 0x01, 0xdc, 0x05]),
        )
        .expect(
            &[DEVICE, 0x64, 0x20, 0x81, 0x00, 0x00, 0x0a],
            Some(&[DEVICE, 0x64, 0x10, 0x81, 0x00, 0x00, 0x05]),
        )
        .expect(&[DEVICE, 0x64, 0x20, 0x0a, 0x5a, 0x00], None)
        .motor();
    let timeout = motor.serial_timeout();
    assert_eq!(timeout.value(), 30);
    assert_eq!(timeout.to_string(), "30s");

    let rpm = motor.set_digital_input_rpm(2, 1500);
    assert_eq!(rpm.to_string(), "1500 RPM");

    // The echo is what counts.
    assert_eq!(motor.set_serial_timeout(10).value(), 5);

    let enable = motor.digital_input_enable(2);
    assert_eq!(enable.value(), 0);
    assert_eq!(enable.to_string(), "~");

    // Rejected before anything is sent.
    assert!(!motor.digital_input_rpm(5).is_present());
    assert!(!motor.set_selected_schedule(ScheduleSet::A, 9).is_present());
    finished(motor);
}

#[test]
fn schedules() {
    let address = 0x08 + 30;
    let mut motor = Script::default()
        .expect(
            &[DEVICE, 0x64, 0x20, 0x0b, address, 0x0b],
            Some(&[DEVICE, 0x64, 0x10, 0x0b, address, 0x0b, 8, 0xbd, 0x06, 16, 0, 0, 0, 0, 0, 0, 0, 0]),
        )
        .expect(
            &[DEVICE, 0x64, 0x20, 0x8b, address, 0x0b, 4, 0xe8, 0x03, 6, 0xd0, 0x07, 14, 0, 0, 0, 0, 0],
            Some(&[DEVICE, 0x64, 0x10, 0x8b, address, 0x0b, 4, 0xe8, 0x03, 6, 0xd0, 0x07, 14, 0, 0, 0, 0, 0]),
        )
        .expect(&[DEVICE, 0x64, 0x20, 0x0b, address, 0x0b], None)
        .motor();

    let schedule = motor.schedule_slot(ScheduleSet::A, 3).unwrap();
    assert_eq!(schedule.steps()[..2], [ScheduleStep::new(8, 1725), ScheduleStep::new(16, 0)]);

    let steps = [ScheduleStep::new(4, 1000), ScheduleStep::new(0, 3450), ScheduleStep::new(6, 2000)];
    let request = EvoSchedule::with_steps(ScheduleSet::A, 3, &steps).unwrap();
    let written = motor.write_schedule_slot(&request).unwrap();
    assert_eq!(written.steps(), request.pack().unwrap());

    let failed = motor.schedule_slot(ScheduleSet::A, 3).unwrap();
    assert!(failed.steps().iter().all(|s| *s == ScheduleStep::default()));

    let overflowing = [ScheduleStep::new(1, 600); 4];
    let request = EvoSchedule::with_steps(ScheduleSet::A, 3, &overflowing).unwrap();
    assert!(motor.write_schedule_slot(&request).is_err());
    finished(motor);
}
