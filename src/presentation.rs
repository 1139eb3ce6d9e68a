//! Characteristic Presentation Format descriptor decoding
//!
//! The descriptor (UUID `0x2904`) describes how to interpret a characteristic value: its numeric format, a
//! base-10 exponent, and a unit code from the Bluetooth SIG unit table.

use num_enum::TryFromPrimitive;

use crate::codec::{text_or_hex, FixedWidth};
use crate::error::DecodeError;

/// Value formats understood by the presentation renderer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[allow(missing_docs)]
pub enum Format {
    Bool = 1,
    Uint8 = 4,
    Uint16 = 6,
    Uint32 = 8,
    Uint64 = 10,
    Sint8 = 12,
    Sint16 = 14,
    Sint32 = 16,
    Sint64 = 18,
    Float32 = 20,
    Float64 = 21,
}

/// A decoded Characteristic Presentation Format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PresentationFormat {
    /// Format of the characteristic value
    pub format: Format,
    /// Base-10 exponent applied to numeric values
    pub exponent: i8,
    /// Unit code (big-endian on the wire)
    pub unit: u16,
}

impl PresentationFormat {
    /// Parses the first four bytes of a presentation format descriptor value.
    pub fn parse(descriptor: &[u8]) -> Result<Self, DecodeError> {
        let [format, exponent, hi, lo, ..] = *descriptor else {
            return Err(DecodeError::ShortDescriptor(descriptor.len()));
        };
        let format = Format::try_from(format).map_err(|_| DecodeError::UnknownFormat(format))?;
        Ok(PresentationFormat {
            format,
            exponent: exponent as i8,
            unit: u16::from_be_bytes([hi, lo]),
        })
    }

    /// The label of [`unit`](Self::unit), if it has a non-empty one.
    pub fn unit_label(&self) -> Option<&'static str> {
        unit_label(self.unit)
    }

    /// Renders `value` according to this format.
    ///
    /// Numeric values are scaled by `10^exponent` and followed by the unit label.
    pub fn format_value(&self, value: &[u8]) -> Result<String, DecodeError> {
        let number = match self.format {
            Format::Bool => return Ok(bool::decode(value)?.to_string()),
            Format::Uint8 => u8::decode(value)? as f64,
            Format::Uint16 => u16::decode(value)? as f64,
            Format::Uint32 => u32::decode(value)? as f64,
            Format::Uint64 => u64::decode(value)? as f64,
            Format::Sint8 => i8::decode(value)? as f64,
            Format::Sint16 => i16::decode(value)? as f64,
            Format::Sint32 => i32::decode(value)? as f64,
            Format::Sint64 => i64::decode(value)? as f64,
            Format::Float32 => f32::decode(value)? as f64,
            Format::Float64 => f64::decode(value)?,
        };

        let scaled = format_number(number * 10f64.powi(i32::from(self.exponent)));
        Ok(match self.unit_label() {
            Some(label) => format!("{scaled} {label}"),
            None => scaled,
        })
    }
}

/// Shortest round-trip decimal with at least one fractional digit. Magnitudes of `1e16` and above, or
/// below `1e-4`, use scientific notation with a signed exponent of at least two digits (`1e+20`, `2.5e-07`).
fn format_number(value: f64) -> String {
    let text = format!("{value:?}");
    let Some((mantissa, exponent)) = text.split_once('e') else {
        return text;
    };
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

/// Renders a characteristic value for display.
///
/// Uses the presentation format descriptor when one is present and matches the value, else UTF-8 text when
/// valid, else lowercase hex.
pub fn display_value(value: &[u8], format_descriptor: Option<&[u8]>) -> String {
    format_descriptor
        .and_then(|descriptor| PresentationFormat::parse(descriptor).ok())
        .and_then(|format| format.format_value(value).ok())
        .unwrap_or_else(|| text_or_hex(value))
}

/// Label for a Bluetooth SIG unit code. Codes without a label (including the unitless code `0x2700`)
/// return `None`.
pub fn unit_label(code: u16) -> Option<&'static str> {
    let label = match code {
        0x2701 => "Meters",
        0x2702 => "Kilograms",
        0x2703 => "Seconds",
        0x2704 => "Amperes",
        0x2705 => "K",
        0x2706 => "Moles",
        0x2707 => "Candelas",
        0x2710 => "m2",
        0x2711 => "m3",
        0x2712 => "m/s",
        0x2713 => "m/s2",
        0x2714 => "Wavenumber",
        0x2715 => "kg/m3",
        0x2716 => "kg/m2",
        0x2717 => "m3/kg",
        0x2718 => "A/m2",
        0x2719 => "A/m",
        0x271A => "mol/m3",
        0x271B => "kg/m3",
        0x271C => "cd/m2",
        0x271D => "n",
        0x271E => "Kri",
        0x2720 => "Radians",
        0x2721 => "Steradians",
        0x2722 => "Hz",
        0x2723 => "N",
        0x2724 => "Pa",
        0x2725 => "Joules",
        0x2726 => "Watts",
        0x2727 => "Coulombs",
        0x2728 => "Volts",
        0x2729 => "Farads",
        0x272A => "Ohms",
        0x272B => "Siemens",
        0x272C => "Webers",
        0x272D => "Teslas",
        0x272E => "H",
        0x272F => "C",
        0x2730 => "Lumens",
        0x2731 => "Lux",
        0x2732 => "Bq",
        0x2733 => "Gy",
        0x2734 => "Sv",
        0x2735 => "kat",
        0x2740 => "Pa/s",
        0x2741 => "Nm",
        0x2742 => "N/m",
        0x2743 => "rad/s",
        0x2744 => "rad/s2",
        0x2745 => "W/m2",
        0x2746 => "J/K",
        0x2747 => "J/kgK",
        0x2748 => "J/kg",
        0x2749 => "W/(mK)",
        0x274A => "J/m3",
        0x274B => "V/m",
        0x274C => "Coulomb/m3",
        0x274D | 0x274E => "Coulomb/m2",
        0x274F => "Farad/m",
        0x2750 => "H/m",
        0x2751 => "Joule/mole",
        0x2752 => "J/molK",
        0x2753 => "Coulomb/kg",
        0x2754 => "Gy/s",
        0x2755 => "W/sr",
        0x2756 => "W/m2sr",
        0x2757 => "Katal/m3",
        0x2760 | 0x2764 => "Minutes",
        0x2761 => "Hours",
        0x2762 => "Days",
        0x2763 => "Degrees",
        0x2765 => "Seconds",
        0x2766 => "Hectares",
        0x2767 => "Litres",
        0x2768 => "Tonnes",
        0x2780 => "bar",
        0x2781 => "mmHg",
        0x2782 => "Angstroms",
        0x2783 => "NM",
        0x2784 => "Barns",
        0x2785 => "Knots",
        0x2786 => "Nepers",
        0x2787 => "bel",
        0x27A0 => "Yards",
        0x27A1 => "Parsecs",
        0x27A2 => "Inches",
        0x27A3 => "Feet",
        0x27A4 => "Miles",
        0x27A5 => "psi",
        0x27A6 => "KPH",
        0x27A7 => "MPH",
        0x27A8 => "RPM",
        0x27A9 => "cal",
        0x27AA => "Cal",
        0x27AB => "kWh",
        0x27AC => "F",
        0x27AD => "Percent",
        0x27AE => "Per Mile",
        0x27AF => "bp/m",
        0x27B0 => "Ah",
        0x27B1 => "mg/Decilitre",
        0x27B2 => "mmol/l",
        0x27B3 => "Years",
        0x27B4 => "Months",
        0x27B5 => "Count/m3",
        0x27B6 => "Watt/m2",
        0x27B7 => "ml/kg/min",
        0x27B8 => "lbs",
        _ => return None,
    };
    Some(label)
}
