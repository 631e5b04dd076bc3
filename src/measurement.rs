//! Decoded values that know both their numeric and their textual form.
use serde::ser::SerializeStruct as _;

use crate::modbus::MotorMode;

/// How the numeric part of a [`Format`] is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// Fixed point, right aligned to `width`.
    Decimal { width: usize, precision: usize },
    /// Whole number, right aligned to `width`.
    Integer { width: usize },
    /// Zero padded lower-case hexadecimal.
    Hex { width: usize },
    /// Zero padded binary.
    Binary { width: usize },
    /// Whatever the value's own `Display` produces.
    Named,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    pub prefix: &'static str,
    pub style: Style,
    pub suffix: &'static str,
}

impl Format {
    pub const fn decimal(width: usize, precision: usize) -> Self {
        Self::with_style(Style::Decimal { width, precision })
    }
    pub const fn integer(width: usize) -> Self {
        Self::with_style(Style::Integer { width })
    }
    pub const fn hex(width: usize) -> Self {
        Self::with_style(Style::Hex { width })
    }
    pub const fn binary(width: usize) -> Self {
        Self::with_style(Style::Binary { width })
    }
    pub const fn named() -> Self {
        Self::with_style(Style::Named)
    }

    const fn with_style(style: Style) -> Self {
        Self { prefix: "", style, suffix: "" }
    }

    pub const fn prefix(self, prefix: &'static str) -> Self {
        Self { prefix, ..self }
    }

    pub const fn suffix(self, suffix: &'static str) -> Self {
        Self { suffix, ..self }
    }

    pub fn render<Q: Quantity>(&self, value: Q) -> String {
        format!("{}{}{}", self.prefix, value.render(self.style), self.suffix)
    }
}

/// Renders the format as a template, e.g. `{:4.0} RPM` or `0b{:08b}`.
impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix)?;
        match self.style {
            Style::Decimal { width, precision } => write!(f, "{{:{width}.{precision}}}")?,
            Style::Integer { width: 0 } | Style::Named => f.write_str("{}")?,
            Style::Integer { width } => write!(f, "{{:>{width}}}")?,
            Style::Hex { width } => write!(f, "{{:0{width}x}}")?,
            Style::Binary { width } => write!(f, "{{:0{width}b}}")?,
        }
        f.write_str(self.suffix)
    }
}

impl serde::Serialize for Format {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// A value type that can be carried by a [`Measurement`].
pub trait Quantity: Copy {
    /// What an absent measurement coerces to.
    const ABSENT: Self;
    fn render(self, style: Style) -> String;
}

fn render_integer(value: i64, style: Style) -> String {
    match style {
        Style::Decimal { width, precision } => format!("{:width$.precision$}", value as f64),
        Style::Integer { width } => format!("{value:width$}"),
        Style::Hex { width } => format!("{value:0width$x}"),
        Style::Binary { width } => format!("{value:0width$b}"),
        Style::Named => value.to_string(),
    }
}

impl Quantity for f64 {
    const ABSENT: Self = f64::NAN;
    fn render(self, style: Style) -> String {
        match style {
            Style::Decimal { width, precision } => format!("{self:width$.precision$}"),
            Style::Named => self.to_string(),
            // Integer templates take the whole part, like an `int()` conversion would.
            _ => render_integer(self.trunc() as i64, style),
        }
    }
}

impl Quantity for u16 {
    const ABSENT: Self = 0;
    fn render(self, style: Style) -> String {
        render_integer(i64::from(self), style)
    }
}

impl Quantity for MotorMode {
    const ABSENT: Self = MotorMode(0);
    fn render(self, style: Style) -> String {
        match style {
            Style::Named => self.to_string(),
            _ => render_integer(i64::from(self.0), style),
        }
    }
}

/// The outcome of reading one formatted attribute.
///
/// A failed read leaves the value absent. Absent measurements coerce to [`Quantity::ABSENT`]
/// and display as the placeholder text of the attribute they were read for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement<T> {
    value: Option<T>,
    scale: Option<u16>,
    format: Format,
    placeholder: &'static str,
}

impl<T: Quantity> Measurement<T> {
    pub fn new(value: Option<T>, format: Format, placeholder: &'static str) -> Self {
        Self { value, scale: None, format, placeholder }
    }

    pub fn absent(format: Format, placeholder: &'static str) -> Self {
        Self::new(None, format, placeholder)
    }

    /// Record the divisor that was applied to the raw wire value.
    pub fn with_scale(self, scale: Option<u16>) -> Self {
        Self { scale, ..self }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn raw(&self) -> Option<T> {
        self.value
    }

    pub fn value(&self) -> T {
        self.value.unwrap_or(T::ABSENT)
    }

    pub fn scale(&self) -> Option<u16> {
        self.scale
    }
}

impl<T: Quantity> std::fmt::Display for Measurement<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value {
            None => f.write_str(self.placeholder),
            Some(value) => f.write_str(&self.format.render(value)),
        }
    }
}

impl<T: Quantity + serde::Serialize> serde::Serialize for Measurement<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Measurement", 2)?;
        state.serialize_field("value", &self.value)?;
        state.serialize_field("text", &self.to_string())?;
        state.end()
    }
}
