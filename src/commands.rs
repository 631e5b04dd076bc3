use crate::connection::{self, Connection};
use crate::measurement::{Measurement, Quantity};
use crate::modbus::DemandMode;
use crate::motor::Motor;
use crate::output::{self, Record};
use crate::rtu::SerialTransport;
use crate::schedule::{self, ScheduleSet};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not connect to the motor")]
    Connect(#[source] connection::Error),
    #[error("could not output the results")]
    Output(#[source] output::Error),
    #[error("the motor did not respond to the {0} request")]
    NoResponse(&'static str),
    #[error("the schedule can not be written")]
    Schedule(#[source] schedule::Error),
    #[error("the motor stored a different schedule in slot {slot} of set {set}")]
    ScheduleNotStored { set: ScheduleSet, slot: u8 },
    #[error("{mode} demand of {demand} is out of range for the motor")]
    DemandOutOfRange { mode: DemandMode, demand: u16 },
    #[error("{value} does not fit into {item}, which is {length} byte(s) long")]
    ValueOutOfRange { item: &'static str, value: u16, length: usize },
    #[error("{0} is indexed, select the digital input with `--input`")]
    MissingInput(&'static str),
    #[error("{0} is not indexed, `--input` does not apply")]
    UnexpectedInput(&'static str),
    #[error("digital input {0} does not exist, inputs are numbered 1 to 4")]
    InvalidInput(u8),
}

fn open(args: &connection::Args) -> Result<Motor<SerialTransport>, Error> {
    Connection::open(args).map(Motor::new).map_err(Error::Connect)
}

/// A single named value read from or written to the motor.
#[derive(serde::Serialize)]
pub struct Reading {
    pub name: String,
    pub value: serde_json::Value,
    pub text: String,
}

impl Reading {
    pub fn new(name: impl Into<String>, value: serde_json::Value, text: impl Into<String>) -> Self {
        Self { name: name.into(), value, text: text.into() }
    }

    pub fn from_measurement<T>(name: impl Into<String>, measurement: &Measurement<T>) -> Self
    where
        T: Quantity + serde::Serialize,
    {
        Self::new(name, serde_json::json!(measurement.raw()), measurement.to_string())
    }
}

impl Record for Reading {
    const HEADERS: &'static [&'static str] = &["Name", "Value"];
    fn cells(&self) -> Vec<String> {
        vec![self.name.clone(), self.text.clone()]
    }
}

/// Fails unless at least one of the readings carries a value.
fn require_answer(readings: &[Reading], request: &'static str) -> Result<(), Error> {
    if readings.iter().all(|reading| reading.value.is_null()) {
        return Err(Error::NoResponse(request));
    }
    Ok(())
}

fn write_readings(args: &output::Args, readings: &[Reading]) -> Result<(), Error> {
    let mut output = args.to_output::<Reading>().map_err(Error::Output)?;
    for reading in readings {
        output.record(reading).map_err(Error::Output)?;
    }
    output.commit().map_err(Error::Output)
}

pub mod items {
    use super::Error;
    use crate::output::{self, Record};
    use crate::registry::{ConfigItem, Sensor};
    use strum::VariantArray as _;

    /// List the known sensors and configuration items.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        output: output::Args,
        /// Only list items whose name, page or address contains this text.
        filter: Option<String>,
    }

    #[derive(serde::Serialize)]
    pub struct ItemSchema {
        pub kind: &'static str,
        pub name: &'static str,
        pub page: u8,
        pub address: u8,
        pub length: usize,
        pub scale: Option<u16>,
        pub stride: Option<u8>,
        pub format: String,
        pub placeholder: &'static str,
    }

    impl ItemSchema {
        pub fn all_items() -> impl Iterator<Item = Self> {
            let sensors = Sensor::VARIANTS.iter().map(|s| {
                let d = s.descriptor();
                ItemSchema {
                    kind: "sensor",
                    name: d.name,
                    page: d.page,
                    address: d.address,
                    length: 2,
                    scale: d.scale,
                    stride: None,
                    format: d.format.to_string(),
                    placeholder: d.placeholder,
                }
            });
            let items = ConfigItem::VARIANTS.iter().map(|i| {
                let d = i.descriptor();
                ItemSchema {
                    kind: "config",
                    name: d.name,
                    page: d.page,
                    address: d.address,
                    length: d.length,
                    scale: None,
                    stride: d.stride,
                    format: d.format.to_string(),
                    placeholder: d.placeholder,
                }
            });
            sensors.chain(items)
        }

        pub fn is_match(&self, pattern: &str) -> bool {
            let pattern = pattern.to_uppercase();
            self.name.contains(&pattern)
                || format!("{:#04x}", self.page).contains(&pattern.to_lowercase())
                || format!("{:#04x}", self.address).contains(&pattern.to_lowercase())
        }
    }

    impl Record for ItemSchema {
        const HEADERS: &'static [&'static str] =
            &["Kind", "Name", "Page", "Address", "Length", "Scale", "Stride", "Format", "Error"];
        fn cells(&self) -> Vec<String> {
            vec![
                self.kind.to_string(),
                self.name.to_string(),
                format!("{:#04x}", self.page),
                format!("{:#04x}", self.address),
                self.length.to_string(),
                self.scale.map(|v| v.to_string()).unwrap_or_default(),
                self.stride.map(|v| v.to_string()).unwrap_or_default(),
                self.format.clone(),
                self.placeholder.to_string(),
            ]
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut output = args.output.to_output::<ItemSchema>().map_err(Error::Output)?;
        for item in ItemSchema::all_items() {
            if let Some(pattern) = &args.filter {
                if !item.is_match(pattern) {
                    continue;
                }
            }
            output.record(&item).map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)
    }
}

pub mod status {
    use super::{Error, Reading};
    use crate::{connection, output};

    /// Read the operating mode of the motor.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut motor = super::open(&args.connection)?;
        let status = motor.status();
        super::write_readings(&args.output, &[Reading::from_measurement("STATUS", &status)])?;
        if !status.is_present() {
            return Err(Error::NoResponse("Status"));
        }
        Ok(())
    }
}

pub mod control {
    use super::{Error, Reading};
    use crate::{connection, output};

    #[derive(Clone, Copy, Debug, strum::Display)]
    #[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
    pub enum Action {
        Go,
        Stop,
        StoreConfig,
    }

    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    pub fn run(action: Action, args: Args) -> Result<(), Error> {
        let mut motor = super::open(&args.connection)?;
        let acknowledged = match action {
            Action::Go => motor.go(),
            Action::Stop => motor.stop(),
            Action::StoreConfig => motor.store_config(),
        };
        let text = if acknowledged { "acknowledged" } else { "no response" };
        let reading = Reading::new(action.to_string(), serde_json::json!(acknowledged), text);
        super::write_readings(&args.output, &[reading])?;
        if !acknowledged {
            return Err(Error::NoResponse(match action {
                Action::Go => "Go",
                Action::Stop => "Stop",
                Action::StoreConfig => "StoreConfig",
            }));
        }
        Ok(())
    }
}

pub mod demand {
    use super::{Error, Reading};
    use crate::modbus::DemandMode;
    use crate::{connection, output};

    /// Set the speed (RPM) or torque (lb-ft) the motor should run at.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        #[arg(long, short = 'm', value_enum, default_value_t = DemandMode::Speed)]
        mode: DemandMode,
        demand: u16,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        if args.mode.to_wire(args.demand).is_none() {
            return Err(Error::DemandOutOfRange { mode: args.mode, demand: args.demand });
        }
        let mut motor = super::open(&args.connection)?;
        let Some(demand) = motor.set_demand(args.mode, args.demand) else {
            return Err(Error::NoResponse("SetDemand"));
        };
        let unit = match demand.mode {
            DemandMode::Speed => "RPM",
            DemandMode::Torque => "ft-lb",
        };
        let text = format!("{} {unit}", demand.value);
        let reading = Reading::new("DEMAND", serde_json::json!(demand), text);
        super::write_readings(&args.output, &[reading])
    }
}

pub mod sensors {
    use super::{Error, Reading};
    use crate::connection::{self, Transport};
    use crate::motor::Motor;
    use crate::output;
    use crate::registry::Sensor;
    use strum::VariantArray as _;

    /// Read sensor values.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        /// The sensors to read. All of them, if none are given.
        #[arg(value_enum)]
        sensors: Vec<Sensor>,
    }

    pub(super) fn read<T: Transport>(motor: &mut Motor<T>, sensors: &[Sensor]) -> Vec<Reading> {
        sensors
            .iter()
            .map(|&sensor| {
                Reading::from_measurement(sensor.descriptor().name, &motor.read_sensor(sensor))
            })
            .collect()
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut motor = super::open(&args.connection)?;
        let sensors = if args.sensors.is_empty() { Sensor::VARIANTS } else { &args.sensors[..] };
        let readings = read(&mut motor, sensors);
        super::write_readings(&args.output, &readings)?;
        super::require_answer(&readings, "ReadSensor")
    }
}

pub mod identify {
    use super::{Error, Reading};
    use crate::registry::Identification;
    use crate::{connection, output};

    /// Read the firmware versions and the rating of the motor.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    /// Fields that fell back to their placeholder have a null value.
    pub(super) fn readings(id: &Identification) -> Vec<Reading> {
        let field = |name: &str, text: &str, placeholder: &str| {
            let value = if text == placeholder { serde_json::Value::Null } else { text.into() };
            Reading::new(name, value, text)
        };
        vec![
            field("DRIVE_FIRMWARE", id.drive_firmware(), Identification::DRIVE_FIRMWARE_PLACEHOLDER),
            field("LVB_FIRMWARE", id.lvb_firmware(), Identification::LVB_FIRMWARE_PLACEHOLDER),
            field("PRODUCT_ID", id.product_id(), Identification::PRODUCT_ID_PLACEHOLDER),
            field("HORSEPOWER", id.horsepower(), Identification::HORSEPOWER_PLACEHOLDER),
        ]
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut motor = super::open(&args.connection)?;
        let id = motor.read_identification();
        super::write_readings(&args.output, &readings(&id))?;
        if !id.is_known() {
            return Err(Error::NoResponse("ReadId"));
        }
        Ok(())
    }
}

pub mod config {
    use super::{Error, Reading};
    use crate::connection::{self, Transport};
    use crate::motor::Motor;
    use crate::output;
    use crate::registry::DIGITAL_INPUTS;
    use crate::schedule::ScheduleSet;

    /// Read every configuration item.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    pub(super) fn read<T: Transport>(motor: &mut Motor<T>) -> Vec<Reading> {
        let mut readings = vec![
            Reading::from_measurement("SERIAL_TIMEOUT", &motor.serial_timeout()),
            Reading::from_measurement("MOTOR_ADDRESS", &motor.motor_address()),
        ];
        for input in DIGITAL_INPUTS {
            let enable = motor.digital_input_enable(input);
            readings.push(Reading::from_measurement(format!("DIGITAL_INPUT_ENABLE[{input}]"), &enable));
            let rpm = motor.digital_input_rpm(input);
            readings.push(Reading::from_measurement(format!("DIGITAL_INPUT_RPM[{input}]"), &rpm));
        }
        for set in [ScheduleSet::A, ScheduleSet::B] {
            let selected = motor.selected_schedule(set);
            readings.push(Reading::from_measurement(format!("SELECTED_SCHEDULE_{set}"), &selected));
        }
        readings
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut motor = super::open(&args.connection)?;
        let readings = read(&mut motor);
        super::write_readings(&args.output, &readings)?;
        super::require_answer(&readings, "ReadConfig")
    }
}

pub mod set_config {
    use super::{Error, Reading};
    use crate::registry::ConfigItem;
    use crate::{connection, output};

    /// Write a configuration item and report what the motor stored.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        #[arg(value_enum)]
        item: ConfigItem,
        value: u16,
        /// The digital input to configure, for the indexed items.
        #[arg(long)]
        input: Option<u8>,
        /// Persist the configuration to flash after writing.
        #[arg(long)]
        store: bool,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let item = args.item.descriptor();
        let offset = match (args.item.is_indexed(), args.input) {
            (true, None) => return Err(Error::MissingInput(item.name)),
            (false, Some(_)) => return Err(Error::UnexpectedInput(item.name)),
            (false, None) => 0,
            (true, Some(input)) => item.offset(input).ok_or(Error::InvalidInput(input))?,
        };
        if item.encode(args.value).is_none() {
            return Err(Error::ValueOutOfRange { item: item.name, value: args.value, length: item.length });
        }
        let mut motor = super::open(&args.connection)?;
        let stored = motor.write_item(&item, args.value, offset);
        let name = match args.input {
            Some(input) => format!("{}[{input}]", item.name),
            None => item.name.to_string(),
        };
        super::write_readings(&args.output, &[Reading::from_measurement(name, &stored)])?;
        if !stored.is_present() {
            return Err(Error::NoResponse("WriteConfig"));
        }
        if args.store && !motor.store_config() {
            return Err(Error::NoResponse("StoreConfig"));
        }
        Ok(())
    }
}

pub mod schedule_read {
    use std::ops::RangeInclusive;

    use super::Error;
    use crate::connection::{self, Transport};
    use crate::motor::Motor;
    use crate::output::{self, Record};
    use crate::schedule::{EvoSchedule, SLOTS, ScheduleSet};

    /// Read the timed-speed schedules.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        #[arg(long, short = 's', value_enum, ignore_case = true)]
        set: ScheduleSet,
        /// The slot to read. All of them, if not given.
        #[arg(long)]
        slot: Option<u8>,
    }

    impl Record for EvoSchedule {
        const HEADERS: &'static [&'static str] = &["Set", "Slot", "Address", "Steps (hours RPM)"];
        fn cells(&self) -> Vec<String> {
            vec![
                self.set().to_string(),
                self.slot().to_string(),
                format!("{:#04x}", self.address()),
                self.to_string().trim_end().to_string(),
            ]
        }
    }

    /// Read `slots` of `set`. Slots the motor did not answer for are zeroed and counted.
    pub(super) fn read<T: Transport>(
        motor: &mut Motor<T>,
        set: ScheduleSet,
        slots: RangeInclusive<u8>,
    ) -> Result<(Vec<EvoSchedule>, usize), Error> {
        let mut schedules = Vec::new();
        let mut unanswered = 0;
        for slot in slots {
            let schedule = match motor.try_schedule_slot(set, slot).map_err(Error::Schedule)? {
                Some(schedule) => schedule,
                None => {
                    unanswered += 1;
                    EvoSchedule::new(set, slot).map_err(Error::Schedule)?
                }
            };
            schedules.push(schedule);
        }
        Ok((schedules, unanswered))
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let slots = match args.slot {
            Some(slot) => slot..=slot,
            None => SLOTS,
        };
        let mut motor = super::open(&args.connection)?;
        let (schedules, unanswered) = read(&mut motor, args.set, slots)?;
        let mut output = args.output.to_output::<EvoSchedule>().map_err(Error::Output)?;
        for schedule in &schedules {
            output.record(schedule).map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)?;
        if unanswered > 0 {
            return Err(Error::NoResponse("ReadConfig"));
        }
        Ok(())
    }
}

pub mod schedule_write {
    use super::Error;
    use crate::connection::{self, Transport};
    use crate::motor::Motor;
    use crate::output;
    use crate::schedule::{EvoSchedule, ScheduleSet, ScheduleStep};

    fn parse_step(value: &str) -> Result<ScheduleStep, String> {
        let (hours, rpm) = value.split_once(':').ok_or("expected HOURS:RPM")?;
        let hours = hours.trim().parse::<u8>().map_err(|e| format!("hours: {e}"))?;
        let rpm = rpm.trim().parse::<u16>().map_err(|e| format!("RPM: {e}"))?;
        Ok(ScheduleStep::new(hours, rpm))
    }

    /// Replace a timed-speed schedule.
    ///
    /// Steps without a duration are dropped and a zero speed step fills the rest of the day.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        #[arg(long, short = 's', value_enum, ignore_case = true)]
        set: ScheduleSet,
        #[arg(long)]
        slot: u8,
        /// A step, given as `HOURS:RPM`. Repeat for every step in order.
        #[arg(long = "step", value_parser = parse_step)]
        steps: Vec<ScheduleStep>,
        /// Persist the configuration to flash after writing.
        #[arg(long)]
        store: bool,
    }

    /// Write `schedule` and return what the motor echoed back.
    pub(super) fn write<T: Transport>(
        motor: &mut Motor<T>,
        schedule: &EvoSchedule,
    ) -> Result<EvoSchedule, Error> {
        motor
            .try_write_schedule_slot(schedule)
            .map_err(Error::Schedule)?
            .ok_or(Error::NoResponse("WriteConfig"))
    }

    /// Fails if the echoed schedule differs from the packed request.
    pub(super) fn verify(written: &EvoSchedule, packed: &[ScheduleStep]) -> Result<(), Error> {
        if written.steps() != packed {
            return Err(Error::ScheduleNotStored { set: written.set(), slot: written.slot() });
        }
        Ok(())
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let schedule =
            EvoSchedule::with_steps(args.set, args.slot, &args.steps).map_err(Error::Schedule)?;
        let packed = schedule.pack().map_err(Error::Schedule)?;
        let mut motor = super::open(&args.connection)?;
        let written = write(&mut motor, &schedule)?;
        let mut output = args.output.to_output::<EvoSchedule>().map_err(Error::Output)?;
        output.record(&written).map_err(Error::Output)?;
        output.commit().map_err(Error::Output)?;
        verify(&written, &packed)?;
        if args.store && !motor.store_config() {
            return Err(Error::NoResponse("StoreConfig"));
        }
        Ok(())
    }

}

pub mod raw_sensor {
    use super::{Error, Reading};
    use crate::connection::{self, Transport, parse_byte};
    use crate::motor::Motor;
    use crate::output;

    /// Read an unscaled sensor value by its page and address.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        #[arg(value_parser = parse_byte)]
        page: u8,
        #[arg(value_parser = parse_byte)]
        address: u8,
    }

    pub(super) fn read<T: Transport>(
        motor: &mut Motor<T>,
        page: u8,
        address: u8,
    ) -> Result<Reading, Error> {
        let value = motor.read_sensor_raw(page, address).ok_or(Error::NoResponse("ReadSensor"))?;
        let name = format!("{page:#04x}:{address:#04x}");
        Ok(Reading::new(name, serde_json::json!(value), format!("{value} ({value:#06x})")))
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut motor = super::open(&args.connection)?;
        let reading = read(&mut motor, args.page, args.address)?;
        super::write_readings(&args.output, &[reading])
    }
}

pub mod raw_config {
    use super::{Error, Reading};
    use crate::connection::{self, parse_byte};
    use crate::output;

    /// Read a block of configuration memory.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        #[arg(value_parser = parse_byte)]
        page: u8,
        #[arg(value_parser = parse_byte)]
        address: u8,
        /// Number of bytes to read, 1 to 256.
        #[arg(value_parser = clap::value_parser!(u16).range(1..=256))]
        length: u16,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut motor = super::open(&args.connection)?;
        let Some(data) = motor.read_config(args.page, args.address, args.length.into()) else {
            return Err(Error::NoResponse("ReadConfig"));
        };
        let text = data.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ");
        let name = format!("{:#04x}:{:#04x}", args.page, args.address);
        super::write_readings(&args.output, &[Reading::new(name, serde_json::json!(data), text)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Transport;
    use crate::registry::{Identification, Sensor};
    use crate::rtu;
    use crate::schedule::{EvoSchedule, ScheduleStep};
    use clap::Parser as _;
    use std::collections::VecDeque;

    const DEVICE: u8 = 0x15;
    const NO_PORT: &str = "/nonexistent/ttyUSB0";

    /// Answers every request with the next queued frame and stays silent once they run out.
    #[derive(Default)]
    struct Replay {
        responses: VecDeque<Vec<u8>>,
        pending: VecDeque<u8>,
    }

    impl Transport for Replay {
        fn send(&mut self, _: &[u8]) -> std::io::Result<()> {
            self.pending = self.responses.pop_front().unwrap_or_default().into();
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

    /// Responses are given without their checksum.
    fn motor(responses: &[&[u8]]) -> Motor<Replay> {
        let responses = responses
            .iter()
            .map(|response| {
                let mut frame = response.to_vec();
                frame.extend(rtu::checksum(response));
                frame
            })
            .collect();
        Motor::new(Connection::new(Replay { responses, ..Default::default() }, DEVICE))
    }

    #[test]
    fn silent_motor_fails_sensor_reads() {
        let readings = sensors::read(&mut motor(&[]), &[Sensor::Speed, Sensor::Current]);
        assert_eq!(readings.len(), 2);
        assert!(readings.iter().all(|r| r.value.is_null()));
        assert_eq!(readings[1].text, "~~.~~A");
        assert!(matches!(
            require_answer(&readings, "ReadSensor"),
            Err(Error::NoResponse("ReadSensor"))
        ));
    }

    #[test]
    fn one_answered_sensor_is_enough() {
        let mut motor = motor(&[&[DEVICE, 0x45, 0x10, 0x00, 0x00, 0xf4, 0x1a]]);
        let readings = sensors::read(&mut motor, &[Sensor::Speed, Sensor::Current]);
        assert_eq!(readings[0].text, "1725 RPM");
        assert!(readings[1].value.is_null());
        assert!(require_answer(&readings, "ReadSensor").is_ok());
    }

    #[test]
    fn silent_motor_fails_config_reads() {
        let readings = config::read(&mut motor(&[]));
        assert_eq!(readings.len(), 12);
        assert!(matches!(
            require_answer(&readings, "ReadConfig"),
            Err(Error::NoResponse("ReadConfig"))
        ));

        let mut motor = motor(&[&[DEVICE, 0x64, 0x10, 0x01, 0x00, 0x00, 30]]);
        let readings = config::read(&mut motor);
        assert_eq!(readings[0].text, "30s");
        assert!(require_answer(&readings, "ReadConfig").is_ok());
    }

    #[test]
    fn unreadable_identification_fails() {
        let readings = identify::readings(&Identification::parse(None));
        assert_eq!(readings[0].text, "~~.~~.~~");
        assert!(readings.iter().all(|r| r.value.is_null()));
        assert!(matches!(require_answer(&readings, "ReadId"), Err(Error::NoResponse("ReadId"))));

        let id = Identification::parse(Some(b"4321\x2a0000000000057200560123"));
        let readings = identify::readings(&id);
        assert_eq!(readings[0].value, serde_json::json!("12.34.56"));
        assert_eq!(readings[2].value, serde_json::json!("0x2a"));
        assert!(require_answer(&readings, "ReadId").is_ok());
    }

    #[test]
    fn schedule_read_counts_unanswered_slots() {
        let mut response = vec![DEVICE, 0x64, 0x10, 0x0b, 0x08, 0x0e, 24, 0xbd, 0x06];
        response.resize(6 + 15, 0);
        let mut motor = motor(&[response.as_slice()]);
        let (schedules, unanswered) = schedule_read::read(&mut motor, ScheduleSet::A, 1..=2).unwrap();
        assert_eq!(unanswered, 1);
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0].steps()[0], ScheduleStep::new(24, 1725));
        assert_eq!(schedules[1].slot(), 2);
        assert!(schedules[1].steps().iter().all(|s| *s == ScheduleStep::default()));

        let result = schedule_read::read(&mut self::motor(&[]), ScheduleSet::A, 9..=9);
        assert!(matches!(result, Err(Error::Schedule(schedule::Error::InvalidSlot(9)))));
    }

    #[test]
    fn schedule_write_needs_an_echo() {
        let steps = [ScheduleStep::new(8, 1725)];
        let request = EvoSchedule::with_steps(ScheduleSet::A, 3, &steps).unwrap();
        let result = schedule_write::write(&mut motor(&[]), &request);
        assert!(matches!(result, Err(Error::NoResponse("WriteConfig"))));
    }

    #[test]
    fn schedule_write_detects_a_different_echo() {
        let steps = [ScheduleStep::new(8, 1725)];
        let packed = EvoSchedule::with_steps(ScheduleSet::A, 3, &steps).unwrap().pack().unwrap();

        let zeroed = EvoSchedule::new(ScheduleSet::A, 3).unwrap();
        assert!(matches!(
            schedule_write::verify(&zeroed, &packed),
            Err(Error::ScheduleNotStored { set: ScheduleSet::A, slot: 3 })
        ));

        let stored = EvoSchedule::with_steps(ScheduleSet::A, 3, &packed).unwrap();
        assert!(schedule_write::verify(&stored, &packed).is_ok());
    }

    #[test]
    fn demand_is_checked_before_connecting() {
        let args =
            demand::Args::try_parse_from(["demand", "--port", NO_PORT, "--mode", "torque", "100"])
                .unwrap();
        assert!(matches!(
            demand::run(args),
            Err(Error::DemandOutOfRange { mode: DemandMode::Torque, demand: 100 })
        ));
    }

    #[test]
    fn config_value_is_checked_before_connecting() {
        let args =
            set_config::Args::try_parse_from(["set-config", "--port", NO_PORT, "serial-timeout", "300"])
                .unwrap();
        assert!(matches!(
            set_config::run(args),
            Err(Error::ValueOutOfRange { item: "SERIAL_TIMEOUT", value: 300, length: 1 })
        ));
    }

    #[test]
    fn raw_sensor_at_any_address() {
        let args = raw_sensor::Args::try_parse_from(["raw-sensor", "--port", NO_PORT, "0x00", "13"]);
        assert!(args.is_ok());

        let mut motor = motor(&[&[DEVICE, 0x45, 0x10, 0x03, 0x02, 0x34, 0x12]]);
        let reading = raw_sensor::read(&mut motor, 0x03, 0x02).unwrap();
        assert_eq!(reading.name, "0x03:0x02");
        assert_eq!(reading.value, serde_json::json!(0x1234));
        assert_eq!(reading.text, "4660 (0x1234)");

        let result = raw_sensor::read(&mut motor, 0x00, 0x0d);
        assert!(matches!(result, Err(Error::NoResponse("ReadSensor"))));
    }
}
