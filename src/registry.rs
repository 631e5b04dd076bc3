//! Named sensors, configuration items and the identification block.
//!
//! Sensor pages and addresses are shared across the VGreen family. The configuration layout
//! below is specific to the EVO model.
use std::ops::RangeInclusive;

use crate::measurement::{Format, Measurement, Quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SensorDescriptor {
    pub name: &'static str,
    pub page: u8,
    pub address: u8,
    /// Divisor turning the raw wire value into physical units.
    pub scale: Option<u16>,
    pub format: Format,
    pub placeholder: &'static str,
}

impl SensorDescriptor {
    /// Apply the scale to a raw reading.
    pub fn physical(&self, raw: u16) -> f64 {
        match self.scale {
            Some(scale) => f64::from(raw) / f64::from(scale),
            None => f64::from(raw),
        }
    }

    pub fn measurement(&self, raw: Option<u16>) -> Measurement<f64> {
        Measurement::new(raw.map(|raw| self.physical(raw)), self.format, self.placeholder)
            .with_scale(self.scale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ConfigItemDescriptor {
    pub name: &'static str,
    pub page: u8,
    pub address: u8,
    /// Number of bytes, 1 or 2.
    pub length: usize,
    /// Address distance between consecutive instances of an indexed item.
    pub stride: Option<u8>,
    pub format: Format,
    pub placeholder: &'static str,
}

impl ConfigItemDescriptor {
    /// Address offset of the `index`th (counted from 1) instance of an indexed item.
    pub fn offset(&self, index: u8) -> Option<u8> {
        let stride = self.stride?;
        DIGITAL_INPUTS.contains(&index).then(|| (index - 1) * stride)
    }

    /// Encode `value` as `length` little-endian bytes, if it fits.
    pub fn encode(&self, value: u16) -> Option<Vec<u8>> {
        match self.length {
            1 => u8::try_from(value).ok().map(|v| vec![v]),
            2 => Some(value.to_le_bytes().to_vec()),
            _ => None,
        }
    }

    /// Interpret bytes read from this item as an unsigned little-endian integer.
    pub fn decode(&self, bytes: &[u8]) -> Option<u16> {
        match *bytes {
            [a] if self.length == 1 => Some(u16::from(a)),
            [a, b] if self.length == 2 => Some(u16::from_le_bytes([a, b])),
            _ => None,
        }
    }

    pub fn measurement<T: Quantity>(&self, value: Option<T>) -> Measurement<T> {
        Measurement::new(value, self.format, self.placeholder)
    }
}

/// Digital inputs are numbered from 1.
pub const DIGITAL_INPUTS: RangeInclusive<u8> = 1..=4;

macro_rules! optional {
    () => {
        None
    };
    ($($lit: tt)+) => {
        Some($($lit)*)
    };
}

macro_rules! make_sensors {
    ($($variant: ident = $name: literal: $page: literal, $address: literal, $format: expr,
       $placeholder: literal $(, scale = $scale: literal)?;)+) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, strum::VariantArray, strum::EnumString,
            strum::IntoStaticStr, clap::ValueEnum,
        )]
        #[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
        pub enum Sensor { $($variant),+ }

        impl Sensor {
            pub const fn descriptor(self) -> SensorDescriptor {
                match self {
                    $(Self::$variant => SensorDescriptor {
                        name: $name,
                        page: $page,
                        address: $address,
                        scale: optional!($($scale)?),
                        format: $format,
                        placeholder: $placeholder,
                    }),+
                }
            }
        }
    };
}

macro_rules! make_config_items {
    ($($variant: ident = $name: literal: $page: literal, $address: literal, len = $len: literal,
       $format: expr, $placeholder: literal $(, stride = $stride: literal)?;)+) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, strum::VariantArray, strum::EnumString,
            strum::IntoStaticStr, clap::ValueEnum,
        )]
        #[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
        pub enum ConfigItem { $($variant),+ }

        impl ConfigItem {
            pub const fn descriptor(self) -> ConfigItemDescriptor {
                match self {
                    $(Self::$variant => ConfigItemDescriptor {
                        name: $name,
                        page: $page,
                        address: $address,
                        length: $len,
                        stride: optional!($($stride)?),
                        format: $format,
                        placeholder: $placeholder,
                    }),+
                }
            }
        }
    };
}

make_sensors! {
    Speed = "SPEED": 0x00, 0x00, Format::decimal(4, 0).suffix(" RPM"), "~~~~ RPM", scale = 4;
    Current = "CURRENT": 0x00, 0x01, Format::decimal(5, 2).suffix("A"), "~~.~~A", scale = 1000;
    OperatingMode = "OPERATING_MODE": 0x00, 0x02, Format::integer(0), "";
    DemandRpm = "DEMAND_RPM": 0x00, 0x03, Format::decimal(4, 0).suffix(" RPM"), "~~~~ RPM",
        scale = 4;
    DemandTorque = "DEMAND_TORQUE": 0x00, 0x03, Format::decimal(5, 2).suffix(" ft-lb"),
        "~~.~~ ft-lb", scale = 1200;
    Torque = "TORQUE": 0x00, 0x04, Format::decimal(5, 2).suffix(" ft-lb"), "~~.~~ ft-lb",
        scale = 1200;
    PowerInverterInput = "POWER_INVERTER_INPUT": 0x00, 0x05, Format::decimal(4, 0).suffix("W"),
        "~~~~W";
    TempAmbient = "TEMP_AMBIENT": 0x00, 0x07, Format::decimal(5, 1).suffix("C"), "~~.~C",
        scale = 128;
    PowerShaftOutput = "POWER_SHAFT_OUTPUT": 0x00, 0x0a, Format::decimal(4, 0).suffix("W"),
        "~~~~W";
    DigitalInputActive = "DIGITAL_INPUT_ACTIVE": 0x00, 0x14, Format::binary(8).prefix("0b"),
        "0b~~~~~~~~";
}

make_config_items! {
    SerialTimeout = "SERIAL_TIMEOUT": 0x01, 0x00, len = 1, Format::integer(0).suffix("s"), "~~";
    MotorAddress = "MOTOR_ADDRESS": 0x01, 0x01, len = 1, Format::hex(2).prefix("0x"), "~~~~";
    DigitalInputEnable = "DIGITAL_INPUT_ENABLE": 0x0a, 0x57, len = 1, Format::integer(0), "~",
        stride = 3;
    DigitalInputRpm = "DIGITAL_INPUT_RPM": 0x0a, 0x58, len = 2, Format::integer(4).suffix(" RPM"),
        "~~~~ RPM", stride = 3;
    SelectedScheduleA = "SELECTED_SCHEDULE_A": 0x0b, 0x00, len = 1, Format::integer(0), "~";
    SelectedScheduleB = "SELECTED_SCHEDULE_B": 0x0c, 0x00, len = 1, Format::integer(0), "~";
}

impl ConfigItem {
    pub fn is_indexed(self) -> bool {
        self.descriptor().stride.is_some()
    }
}

/// Size of the identification block at page 0, address 0.
pub const IDENTIFICATION_LEN: usize = 27;

/// Firmware and rating information parsed out of the identification block.
///
/// The block is ASCII text at fixed offsets, digits stored in an order that only makes sense
/// to the firmware. Every field falls back to its placeholder on its own.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Identification {
    drive_firmware: String,
    lvb_firmware: String,
    product_id: String,
    horsepower: String,
}

impl Identification {
    pub const DRIVE_FIRMWARE_PLACEHOLDER: &'static str = "~~.~~.~~";
    pub const LVB_FIRMWARE_PLACEHOLDER: &'static str = "~~.~~";
    pub const PRODUCT_ID_PLACEHOLDER: &'static str = "~~~~";
    pub const HORSEPOWER_PLACEHOLDER: &'static str = "~~.~~";

    pub fn parse(data: Option<&[u8]>) -> Self {
        let data = data.unwrap_or_default();
        let drive_firmware = ascii(data, [0x03, 0x02, 0x01, 0x00, 0x15, 0x16])
            .map(|[a, b, c, d, e, f]| format!("{a}{b}.{c}{d}.{e}{f}"));
        let lvb_firmware =
            ascii(data, [0x17, 0x18, 0x19, 0x1a]).map(|[a, b, c, d]| format!("{a}{b}.{c}{d}"));
        let product_id = data.get(0x04).map(|id| format!("0x{id:02x}"));
        let horsepower = ascii(data, [0x13, 0x12, 0x11, 0x10])
            .and_then(|[a, b, c, d]| format!("{a}{b}.{c}{d}").trim().parse::<f64>().ok())
            .filter(|hp| hp.is_finite())
            .map(|hp| format!("{hp:.2} HP"));
        Self {
            drive_firmware: drive_firmware.unwrap_or_else(|| Self::DRIVE_FIRMWARE_PLACEHOLDER.into()),
            lvb_firmware: lvb_firmware.unwrap_or_else(|| Self::LVB_FIRMWARE_PLACEHOLDER.into()),
            product_id: product_id.unwrap_or_else(|| Self::PRODUCT_ID_PLACEHOLDER.into()),
            horsepower: horsepower.unwrap_or_else(|| Self::HORSEPOWER_PLACEHOLDER.into()),
        }
    }

    pub fn drive_firmware(&self) -> &str {
        &self.drive_firmware
    }
    pub fn lvb_firmware(&self) -> &str {
        &self.lvb_firmware
    }
    pub fn product_id(&self) -> &str {
        &self.product_id
    }
    pub fn horsepower(&self) -> &str {
        &self.horsepower
    }

    /// Whether at least one field could be decoded.
    pub fn is_known(&self) -> bool {
        self.drive_firmware != Self::DRIVE_FIRMWARE_PLACEHOLDER
            || self.lvb_firmware != Self::LVB_FIRMWARE_PLACEHOLDER
            || self.product_id != Self::PRODUCT_ID_PLACEHOLDER
            || self.horsepower != Self::HORSEPOWER_PLACEHOLDER
    }
}

fn ascii<const N: usize>(data: &[u8], indices: [usize; N]) -> Option<[char; N]> {
    let mut chars = ['\0'; N];
    for (c, index) in chars.iter_mut().zip(indices) {
        let byte = *data.get(index)?;
        if !byte.is_ascii() {
            return None;
        }
        *c = char::from(byte);
    }
    Some(chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::VariantArray as _;

    // "4321" firmware, product id 0x2a, horsepower digits, then revision and LVB firmware.
    const IDENTIFICATION: &[u8; IDENTIFICATION_LEN] = b"4321\x2a0000000000057200560123";

    #[test]
    fn identification_fixture() {
        let id = Identification::parse(Some(IDENTIFICATION));
        assert_eq!(id.drive_firmware(), "12.34.56");
        assert_eq!(id.lvb_firmware(), "01.23");
        assert_eq!(id.product_id(), "0x2a");
        assert_eq!(id.horsepower(), "2.75 HP");
    }

    #[test]
    fn identification_missing() {
        let id = Identification::parse(None);
        assert_eq!(id.drive_firmware(), "~~.~~.~~");
        assert_eq!(id.lvb_firmware(), "~~.~~");
        assert_eq!(id.product_id(), "~~~~");
        assert_eq!(id.horsepower(), "~~.~~");
        assert!(!id.is_known());
    }

    #[test]
    fn identification_malformed_fields_fall_back() {
        let mut data = *IDENTIFICATION;
        data[0x11] = b'x';
        data[0x00] = 0xff;
        let id = Identification::parse(Some(&data));
        assert_eq!(id.horsepower(), "~~.~~");
        assert_eq!(id.drive_firmware(), "~~.~~.~~");
        assert_eq!(id.lvb_firmware(), "01.23");
        assert_eq!(id.product_id(), "0x2a");

        assert!(id.is_known());

        let id = Identification::parse(Some(&IDENTIFICATION[..0x18]));
        assert_eq!(id.drive_firmware(), "12.34.56");
        assert_eq!(id.lvb_firmware(), "~~.~~");
        assert!(id.is_known());
    }

    #[test]
    fn sensor_scaling() {
        let speed = Sensor::Speed.descriptor();
        assert_eq!(speed.measurement(Some(6900)).to_string(), "1725 RPM");
        assert_eq!(speed.measurement(Some(0)).value(), 0.0);
        let temp = Sensor::TempAmbient.descriptor();
        assert_eq!(temp.measurement(Some(3200)).to_string(), " 25.0C");
        let power = Sensor::PowerShaftOutput.descriptor();
        assert_eq!(power.measurement(Some(250)).to_string(), " 250W");
        let missing = Sensor::Current.descriptor().measurement(None);
        assert!(missing.value().is_nan());
        assert_eq!(missing.to_string(), "~~.~~A");
        assert_eq!(missing.scale(), Some(1000));
    }

    #[test]
    fn indexed_items() {
        let rpm = ConfigItem::DigitalInputRpm.descriptor();
        assert_eq!(rpm.offset(1), Some(0));
        assert_eq!(rpm.offset(2), Some(3));
        assert_eq!(rpm.offset(4), Some(9));
        assert_eq!(rpm.offset(0), None);
        assert_eq!(rpm.offset(5), None);
        assert_eq!(ConfigItem::SerialTimeout.descriptor().offset(1), None);
        assert!(ConfigItem::DigitalInputEnable.is_indexed());
    }

    #[test]
    fn item_value_encoding() {
        let rpm = ConfigItem::DigitalInputRpm.descriptor();
        assert_eq!(rpm.encode(1500), Some(vec![0xdc, 0x05]));
        assert_eq!(rpm.decode(&[0xdc, 0x05]), Some(1500));
        assert_eq!(rpm.decode(&[0xdc]), None);
        let timeout = ConfigItem::SerialTimeout.descriptor();
        assert_eq!(timeout.encode(60), Some(vec![60]));
        assert_eq!(timeout.encode(300), None);
    }

    #[test]
    fn names_parse() {
        assert_eq!("DIGITAL_INPUT_RPM".parse::<ConfigItem>().unwrap(), ConfigItem::DigitalInputRpm);
        assert_eq!("temp_ambient".parse::<Sensor>().unwrap(), Sensor::TempAmbient);
        for item in ConfigItem::VARIANTS {
            let name: &'static str = (*item).into();
            assert_eq!(name, item.descriptor().name);
        }
        for sensor in Sensor::VARIANTS {
            let name: &'static str = (*sensor).into();
            assert_eq!(name, sensor.descriptor().name);
        }
    }
}
