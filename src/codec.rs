/*!
 # Command frame codec

 Pure construction of the binary frames KS lamps accept on their write
 characteristic. No I/O happens here: callers resolve a [`Dialect`] first
 (see [`crate::profile`]) and get back an opaque [`CommandFrame`] ready to
 deliver over a session.

 Byte layout is exact and order-sensitive. The devices give no error
 feedback for malformed frames, they just ignore them, so every layout
 below reproduces the vendor protocol byte for byte.
*/

use std::fmt;

use crate::profile::Dialect;
use crate::{Error, Result};

/// An RGB color, one byte per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Brightness as a percentage, validated to 0-100 at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Brightness(u8);

impl Brightness {
    /// 100%.
    pub const FULL: Brightness = Brightness(100);

    /// Validates a percentage. Values above 100 are rejected rather than
    /// clamped: a silently-capped value would make the lamp disagree with
    /// what the caller asked for without any indication why.
    pub fn new(percent: u8) -> Result<Self> {
        if percent > 100 {
            return Err(Error::ValueOutOfRange(u32::from(percent), 0, 100));
        }
        Ok(Self(percent))
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// Linear mapping of the percentage onto the 0-255 wire value,
    /// round-half-up: 0 -> 0, 50 -> 128, 100 -> 255.
    pub fn scaled(self) -> u8 {
        ((u16::from(self.0) * 255 + 50) / 100) as u8
    }
}

/// A semantic command, independent of any device dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    PowerOn,
    PowerOff,
    /// Set a static color. The brightness channel only exists on the
    /// extended dialect; passing one for a standard-dialect device fails
    /// with [`Error::UnsupportedCapability`].
    SetColor {
        color: Color,
        brightness: Option<Brightness>,
    },
    /// Adjust brightness without changing color (extended dialect only).
    SetBrightness(Brightness),
}

/// An encoded frame, ready to write to a device's command characteristic.
///
/// Produced fresh per command and never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandFrame(Vec<u8>);

impl CommandFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// Builds the power toggle frame. The layout is shared by every known
/// dialect: `5B F0 01 B5` for on, `5B 0F 01 B5` for off.
pub fn encode_power(on: bool) -> CommandFrame {
    CommandFrame(if on {
        vec![0x5b, 0xf0, 0x01, 0xb5]
    } else {
        vec![0x5b, 0x0f, 0x01, 0xb5]
    })
}

/// Builds a static-color frame for the given dialect.
///
/// Extended dialect: `5A 00 01 RR GG BB 00 LL 00 A5` where `LL` is the
/// scaled brightness. Without an explicit brightness the frame carries
/// `0xFF`; the codec is stateless, so "keep the current level" is the
/// caller's job to express.
///
/// Standard dialect: `7E 07 05 03 RR GG BB 00 EF`, no brightness channel.
/// A brightness argument is rejected, not dropped, so callers learn the
/// device cannot honor it.
pub fn encode_color(
    dialect: Dialect,
    color: Color,
    brightness: Option<Brightness>,
) -> Result<CommandFrame> {
    match dialect {
        Dialect::ExtendedRgbBrightness => {
            let level = brightness.map(Brightness::scaled).unwrap_or(0xff);
            Ok(CommandFrame(vec![
                0x5a, 0x00, 0x01, color.r, color.g, color.b, 0x00, level, 0x00, 0xa5,
            ]))
        }
        Dialect::StandardRgb => {
            if brightness.is_some() {
                return Err(Error::UnsupportedCapability {
                    dialect,
                    operation: "set brightness",
                });
            }
            Ok(CommandFrame(vec![
                0x7e, 0x07, 0x05, 0x03, color.r, color.g, color.b, 0x00, 0xef,
            ]))
        }
    }
}

/// Builds a brightness-only frame: `5A 00 02 00 00 00 LL 00 A5` (white
/// mode marker `0x02`, RGB placeholders zeroed). Only the extended dialect
/// has a brightness channel.
pub fn encode_brightness(dialect: Dialect, brightness: Brightness) -> Result<CommandFrame> {
    match dialect {
        Dialect::ExtendedRgbBrightness => Ok(CommandFrame(vec![
            0x5a,
            0x00,
            0x02,
            0x00,
            0x00,
            0x00,
            brightness.scaled(),
            0x00,
            0xa5,
        ])),
        Dialect::StandardRgb => Err(Error::UnsupportedCapability {
            dialect,
            operation: "set brightness",
        }),
    }
}

/// Encodes any [`Intent`] for the given dialect.
pub fn encode_intent(dialect: Dialect, intent: &Intent) -> Result<CommandFrame> {
    match intent {
        Intent::PowerOn => Ok(encode_power(true)),
        Intent::PowerOff => Ok(encode_power(false)),
        Intent::SetColor { color, brightness } => encode_color(dialect, *color, *brightness),
        Intent::SetBrightness(brightness) => encode_brightness(dialect, *brightness),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_frames_match_vendor_constants() {
        assert_eq!(encode_power(true).as_bytes(), [0x5b, 0xf0, 0x01, 0xb5]);
        assert_eq!(encode_power(false).as_bytes(), [0x5b, 0x0f, 0x01, 0xb5]);
        assert_eq!(format!("{:?}", encode_power(true)), "5BF001B5");
    }

    #[test]
    fn extended_color_frame_layout() {
        for (r, g, b) in [(0, 0, 0), (255, 255, 255), (17, 128, 203)] {
            let frame =
                encode_color(Dialect::ExtendedRgbBrightness, Color::new(r, g, b), None).unwrap();
            assert_eq!(frame.len(), 10);
            assert_eq!(&frame.as_bytes()[3..=5], [r, g, b]);
            assert_eq!(frame.as_bytes()[0], 0x5a);
            assert_eq!(frame.as_bytes()[2], 0x01);
            assert_eq!(frame.as_bytes()[9], 0xa5);
        }
    }

    #[test]
    fn extended_color_red_full_brightness() {
        let frame = encode_color(
            Dialect::ExtendedRgbBrightness,
            Color::new(255, 0, 0),
            Some(Brightness::FULL),
        )
        .unwrap();
        assert_eq!(format!("{frame:?}"), "5A0001FF000000FF00A5");
    }

    #[test]
    fn extended_color_defaults_to_full_brightness_byte() {
        let frame =
            encode_color(Dialect::ExtendedRgbBrightness, Color::new(1, 2, 3), None).unwrap();
        assert_eq!(frame.as_bytes()[7], 0xff);
    }

    #[test]
    fn standard_color_frame_layout() {
        for (r, g, b) in [(0, 0, 0), (255, 255, 255), (44, 99, 201)] {
            let frame = encode_color(Dialect::StandardRgb, Color::new(r, g, b), None).unwrap();
            assert_eq!(frame.len(), 9);
            assert_eq!(&frame.as_bytes()[4..=6], [r, g, b]);
            assert_eq!(frame.as_bytes()[0], 0x7e);
            assert_eq!(frame.as_bytes()[8], 0xef);
        }
    }

    #[test]
    fn standard_dialect_rejects_brightness() {
        let color = encode_color(
            Dialect::StandardRgb,
            Color::new(255, 0, 0),
            Some(Brightness::FULL),
        );
        assert!(matches!(
            color,
            Err(Error::UnsupportedCapability { .. })
        ));

        let brightness = encode_brightness(Dialect::StandardRgb, Brightness::FULL);
        assert!(matches!(
            brightness,
            Err(Error::UnsupportedCapability { .. })
        ));
    }

    #[test]
    fn brightness_frame_layout() {
        let frame =
            encode_brightness(Dialect::ExtendedRgbBrightness, Brightness::new(50).unwrap())
                .unwrap();
        assert_eq!(frame.len(), 9);
        assert_eq!(
            frame.as_bytes(),
            [0x5a, 0x00, 0x02, 0x00, 0x00, 0x00, 0x80, 0x00, 0xa5]
        );
    }

    #[test]
    fn brightness_scaling_rounds_half_up() {
        assert_eq!(Brightness::new(0).unwrap().scaled(), 0);
        assert_eq!(Brightness::new(50).unwrap().scaled(), 128);
        assert_eq!(Brightness::new(100).unwrap().scaled(), 255);
    }

    #[test]
    fn brightness_out_of_range_is_rejected() {
        assert!(matches!(
            Brightness::new(101),
            Err(Error::ValueOutOfRange(101, 0, 100))
        ));
    }

    #[test]
    fn encoding_is_deterministic() {
        let intent = Intent::SetColor {
            color: Color::new(10, 20, 30),
            brightness: Some(Brightness::new(75).unwrap()),
        };
        let first = encode_intent(Dialect::ExtendedRgbBrightness, &intent).unwrap();
        let second = encode_intent(Dialect::ExtendedRgbBrightness, &intent).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn intent_dispatch_covers_power() {
        assert_eq!(
            encode_intent(Dialect::StandardRgb, &Intent::PowerOn)
                .unwrap()
                .as_bytes(),
            encode_power(true).as_bytes()
        );
        assert_eq!(
            encode_intent(Dialect::ExtendedRgbBrightness, &Intent::PowerOff)
                .unwrap()
                .as_bytes(),
            encode_power(false).as_bytes()
        );
    }
}
