//! Typed client for a single motor.
//!
//! Nothing here fails loudly. A request that goes wrong for any reason is logged and reported
//! as an absent value, leaving retry policy to the caller.
use num_traits::FromPrimitive as _;
use tracing::{debug, warn};

use crate::connection::{self, Connection, Transport};
use crate::measurement::{Format, Measurement};
use crate::modbus::{DemandMode, MotorMode, Operation, ResponseKind};
use crate::registry::{
    ConfigItem, ConfigItemDescriptor, IDENTIFICATION_LEN, Identification, Sensor,
};
use crate::schedule::{self, EvoSchedule, SLOTS, ScheduleSet};

pub const STATUS_PLACEHOLDER: &str = "Modbus Error";

/// The demand a motor confirmed, in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Demand {
    pub mode: DemandMode,
    /// RPM or lb-ft, depending on the mode.
    pub value: u16,
}

pub struct Motor<T> {
    connection: Connection<T>,
}

impl<T: Transport> Motor<T> {
    pub fn new(connection: Connection<T>) -> Self {
        Self { connection }
    }

    pub fn into_connection(self) -> Connection<T> {
        self.connection
    }

    fn execute(&mut self, operation: Operation) -> Option<ResponseKind> {
        let function = operation.function();
        match self.connection.send(operation) {
            Ok(response) => Some(response.kind),
            Err(connection::Error::Exception { function, code }) => {
                warn!(message = "device rejected the request", %function, code);
                None
            }
            Err(e) => {
                warn!(
                    message = "request failed",
                    %function,
                    error = (&e as &dyn std::error::Error)
                );
                None
            }
        }
    }

    fn acknowledge(&mut self, operation: Operation) -> bool {
        matches!(self.execute(operation), Some(ResponseKind::Acknowledged))
    }

    pub fn go(&mut self) -> bool {
        self.acknowledge(Operation::Go)
    }

    pub fn stop(&mut self) -> bool {
        self.acknowledge(Operation::Stop)
    }

    /// Persist the current configuration to flash.
    pub fn store_config(&mut self) -> bool {
        self.acknowledge(Operation::StoreConfig)
    }

    pub fn status(&mut self) -> Measurement<MotorMode> {
        let mode = match self.execute(Operation::Status) {
            Some(ResponseKind::Status(mode)) => Some(mode),
            _ => None,
        };
        Measurement::new(mode, Format::named(), STATUS_PLACEHOLDER)
    }

    pub fn set_demand(&mut self, mode: DemandMode, demand: u16) -> Option<Demand> {
        let Some(ResponseKind::SetDemand { mode: echoed, demand: raw }) =
            self.execute(Operation::SetDemand { mode, demand })
        else {
            return None;
        };
        let Some(echoed) = DemandMode::from_u8(echoed) else {
            warn!(message = "device echoed an unknown demand mode", mode = echoed);
            return None;
        };
        Some(Demand { mode: echoed, value: raw / echoed.scale() })
    }

    pub fn read_sensor_raw(&mut self, page: u8, address: u8) -> Option<u16> {
        match self.execute(Operation::ReadSensor { page, address })? {
            ResponseKind::Sensor { page: p, address: a, value } => {
                if (p, a) != (page, address) {
                    debug!(message = "sensor echo differs", page, address, echo_page = p, echo_address = a);
                }
                Some(value)
            }
            _ => None,
        }
    }

    pub fn read_sensor(&mut self, sensor: Sensor) -> Measurement<f64> {
        let descriptor = sensor.descriptor();
        let raw = self.read_sensor_raw(descriptor.page, descriptor.address);
        descriptor.measurement(raw)
    }

    fn data(&mut self, operation: Operation) -> Option<Vec<u8>> {
        match self.execute(operation)? {
            ResponseKind::Data { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn read_id(&mut self, address: u8, length: usize) -> Option<Vec<u8>> {
        self.data(Operation::ReadId { address, length })
    }

    pub fn read_config(&mut self, page: u8, address: u8, length: usize) -> Option<Vec<u8>> {
        self.data(Operation::ReadConfig { page, address, length })
    }

    /// Returns the bytes the device echoed back, which are what it actually stored.
    pub fn write_config(&mut self, page: u8, address: u8, data: Vec<u8>) -> Option<Vec<u8>> {
        self.data(Operation::WriteConfig { page, address, data })
    }

    pub fn read_identification(&mut self) -> Identification {
        let data = self.read_id(0, IDENTIFICATION_LEN);
        Identification::parse(data.as_deref())
    }

    pub fn read_item(&mut self, item: &ConfigItemDescriptor, offset: u8) -> Measurement<u16> {
        let Some(address) = item.address.checked_add(offset) else {
            warn!(message = "item address out of range", item = item.name, offset);
            return item.measurement(None);
        };
        let value = self
            .read_config(item.page, address, item.length)
            .and_then(|bytes| item.decode(&bytes));
        item.measurement(value)
    }

    /// Write an item and report the value the device echoed back.
    pub fn write_item(
        &mut self,
        item: &ConfigItemDescriptor,
        value: u16,
        offset: u8,
    ) -> Measurement<u16> {
        let Some(address) = item.address.checked_add(offset) else {
            warn!(message = "item address out of range", item = item.name, offset);
            return item.measurement(None);
        };
        let Some(data) = item.encode(value) else {
            warn!(message = "value does not fit the item", item = item.name, value, length = item.length);
            return item.measurement(None);
        };
        let echo = self
            .write_config(item.page, address, data)
            .and_then(|bytes| item.decode(&bytes));
        if let Some(echo) = echo {
            if echo != value {
                warn!(message = "device stored a different value", item = item.name, value, echo);
            }
        }
        item.measurement(echo)
    }

    fn indexed_offset(item: &ConfigItemDescriptor, input: u8) -> Option<u8> {
        let offset = item.offset(input);
        if offset.is_none() {
            warn!(message = "no such digital input", item = item.name, input);
        }
        offset
    }

    /// Seconds without serial traffic before the motor falls back to its schedule.
    pub fn serial_timeout(&mut self) -> Measurement<u16> {
        self.read_item(&ConfigItem::SerialTimeout.descriptor(), 0)
    }

    pub fn set_serial_timeout(&mut self, seconds: u8) -> Measurement<u16> {
        self.write_item(&ConfigItem::SerialTimeout.descriptor(), seconds.into(), 0)
    }

    pub fn motor_address(&mut self) -> Measurement<u16> {
        self.read_item(&ConfigItem::MotorAddress.descriptor(), 0)
    }

    /// Takes effect for requests sent after the configuration is stored and the motor restarts.
    pub fn set_motor_address(&mut self, address: u8) -> Measurement<u16> {
        self.write_item(&ConfigItem::MotorAddress.descriptor(), address.into(), 0)
    }

    pub fn digital_input_enable(&mut self, input: u8) -> Measurement<u16> {
        let item = ConfigItem::DigitalInputEnable.descriptor();
        match Self::indexed_offset(&item, input) {
            Some(offset) => self.read_item(&item, offset),
            None => item.measurement(None),
        }
    }

    pub fn set_digital_input_enable(&mut self, input: u8, enabled: bool) -> Measurement<u16> {
        let item = ConfigItem::DigitalInputEnable.descriptor();
        match Self::indexed_offset(&item, input) {
            Some(offset) => self.write_item(&item, enabled.into(), offset),
            None => item.measurement(None),
        }
    }

    pub fn digital_input_rpm(&mut self, input: u8) -> Measurement<u16> {
        let item = ConfigItem::DigitalInputRpm.descriptor();
        match Self::indexed_offset(&item, input) {
            Some(offset) => self.read_item(&item, offset),
            None => item.measurement(None),
        }
    }

    pub fn set_digital_input_rpm(&mut self, input: u8, rpm: u16) -> Measurement<u16> {
        let item = ConfigItem::DigitalInputRpm.descriptor();
        match Self::indexed_offset(&item, input) {
            Some(offset) => self.write_item(&item, rpm, offset),
            None => item.measurement(None),
        }
    }

    pub fn selected_schedule(&mut self, set: ScheduleSet) -> Measurement<u16> {
        self.read_item(&selected_schedule_item(set).descriptor(), 0)
    }

    pub fn set_selected_schedule(&mut self, set: ScheduleSet, slot: u8) -> Measurement<u16> {
        let item = selected_schedule_item(set).descriptor();
        if !SLOTS.contains(&slot) {
            warn!(message = "no such schedule slot", %set, slot);
            return item.measurement(None);
        }
        self.write_item(&item, slot.into(), 0)
    }

    /// Read a schedule slot, or `None` if the motor did not answer.
    pub fn try_schedule_slot(
        &mut self,
        set: ScheduleSet,
        slot: u8,
    ) -> Result<Option<EvoSchedule>, schedule::Error> {
        let mut schedule = EvoSchedule::new(set, slot)?;
        let Some(data) = self.read_config(set.page(), schedule.address(), schedule.length()) else {
            return Ok(None);
        };
        schedule.load(Some(&data));
        Ok(Some(schedule))
    }

    /// Read a schedule slot. A failed read yields a schedule with every step zeroed.
    pub fn schedule_slot(&mut self, set: ScheduleSet, slot: u8) -> Result<EvoSchedule, schedule::Error> {
        match self.try_schedule_slot(set, slot)? {
            Some(schedule) => Ok(schedule),
            None => EvoSchedule::new(set, slot),
        }
    }

    /// Pack and write a schedule slot, returning the schedule the device echoed back or `None`
    /// if it did not answer.
    pub fn try_write_schedule_slot(
        &mut self,
        schedule: &EvoSchedule,
    ) -> Result<Option<EvoSchedule>, schedule::Error> {
        let data = schedule.to_bytes()?;
        let mut written = EvoSchedule::new(schedule.set(), schedule.slot())?;
        let Some(echo) = self.write_config(schedule.set().page(), schedule.address(), data) else {
            return Ok(None);
        };
        written.load(Some(&echo));
        Ok(Some(written))
    }

    /// Like [`Motor::try_write_schedule_slot`], with a zeroed schedule when the write failed.
    pub fn write_schedule_slot(
        &mut self,
        schedule: &EvoSchedule,
    ) -> Result<EvoSchedule, schedule::Error> {
        match self.try_write_schedule_slot(schedule)? {
            Some(written) => Ok(written),
            None => EvoSchedule::new(schedule.set(), schedule.slot()),
        }
    }
}

fn selected_schedule_item(set: ScheduleSet) -> ConfigItem {
    match set {
        ScheduleSet::A => ConfigItem::SelectedScheduleA,
        ScheduleSet::B => ConfigItem::SelectedScheduleB,
    }
}
