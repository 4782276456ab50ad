//! Channel operation commands.
//!
//! Movement and light commands share a single telegram layout that carries a
//! [`FunctionCode`], a raw position and a signed slat angle.
//! [`Intent`] maps high-level requests such as "open" or "light on"
//! to the values the gateway expects.

use strum::{Display, FromRepr};

/// Slat angle value meaning "angle not applicable".
pub const ANGLE_NOT_APPLICABLE: i16 = 32767;

/// Position value of a fully closed cover on the gateway's 0..200 scale.
pub const POSITION_CLOSED: u8 = 200;

/// Function code of a channel operation.
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum FunctionCode {
    /// Stop any movement (also switches lights off).
    Stop = 1,
    /// Move to an absolute position.
    SetState = 3,
    /// Move up until the end position is reached.
    Raise = 8,
    /// Move down until the end position is reached.
    Lower = 9,
}

/// High-level actuator request.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Intent {
    /// Stop the current movement.
    Stop,
    /// Move to a raw position (0 = open, 200 = closed).
    ///
    /// The value is transmitted unmodified, keeping it in range is up to the caller.
    SetPosition(u8),
    /// Move to the fully open position.
    FullOpen,
    /// Move to the fully closed position.
    FullClose,
    /// Move up (open).
    Raise,
    /// Move down (close).
    Lower,
    /// Switch a light channel on.
    LightOn,
    /// Switch a light channel off.
    LightOff,
}

/// Parameters of a single channel operation telegram.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct ChannelCommand {
    /// Function to execute.
    pub function: FunctionCode,
    /// Raw target position.
    pub position: u8,
    /// Signed slat angle or [`ANGLE_NOT_APPLICABLE`].
    pub angle: i16,
}

impl From<Intent> for ChannelCommand {
    fn from(intent: Intent) -> Self {
        let (function, position, angle) = match intent {
            Intent::Stop | Intent::LightOff => (FunctionCode::Stop, 0, ANGLE_NOT_APPLICABLE),
            Intent::SetPosition(pos) => (FunctionCode::SetState, pos, ANGLE_NOT_APPLICABLE),
            Intent::FullOpen => (FunctionCode::SetState, 0, ANGLE_NOT_APPLICABLE),
            Intent::FullClose => (FunctionCode::SetState, POSITION_CLOSED, ANGLE_NOT_APPLICABLE),
            Intent::Raise => (FunctionCode::Raise, 0, 0),
            Intent::Lower => (FunctionCode::Lower, 0, 0),
            Intent::LightOn => (FunctionCode::SetState, 100, ANGLE_NOT_APPLICABLE),
        };

        Self {
            function,
            position,
            angle,
        }
    }
}

impl ChannelCommand {
    /// Returns the command's payload bytes following the telegram code and address.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 4] {
        let (hi, lo) = encode_angle(self.angle);

        [self.function as u8, self.position, hi, lo]
    }
}

/// Splits a signed slat angle into its high and low transmission bytes.
///
/// Negative angles are sent in 16-bit two's complement,
/// [`ANGLE_NOT_APPLICABLE`] is passed through unchanged.
#[must_use]
pub fn encode_angle(angle: i16) -> (u8, u8) {
    let val = if angle != ANGLE_NOT_APPLICABLE && angle < 0 {
        65536 + i32::from(angle)
    } else {
        i32::from(angle)
    };

    // Both parts are within 0..=255 by construction
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    ((val / 256) as u8, (val % 256) as u8)
}
