//! frame.rs
//! Fixed-size wire frames exchanged with the rig microcontroller (little-endian).
//!
//! Inbound (16 bytes):
//! ```text
//! [0..2)  fan rotation      u16
//! [2..4)  turbine rotation  u16
//! [4..6)  current           i16
//! [6..8)  voltage           i16
//! [8..11) thrust            i24
//! [11]    reserved
//! [12..14) anemometer       u16
//! [14..16) potentiometer    u16
//! ```
//! Outbound (5 bytes): fan PWM u8, servo pulse u16, torque level i8, LED u8.

/// Single byte that asks the firmware for one frame.
pub const REQUEST_BYTE: u8 = 0x01;
pub const RAW_FRAME_LEN: usize = 16;
pub const ACTUATOR_FRAME_LEN: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawFrame {
    /// rpm
    pub fan_rotation: u16,
    /// rpm
    pub turbine_rotation: u16,
    pub current: i16,
    pub voltage: i16,
    pub thrust: i32,
    pub anemometer: u16,
    pub potentiometer: u16,
}

impl RawFrame {
    pub fn decode(bytes: &[u8; RAW_FRAME_LEN]) -> Self {
        Self {
            fan_rotation: u16::from_le_bytes([bytes[0], bytes[1]]),
            turbine_rotation: u16::from_le_bytes([bytes[2], bytes[3]]),
            current: i16::from_le_bytes([bytes[4], bytes[5]]),
            voltage: i16::from_le_bytes([bytes[6], bytes[7]]),
            thrust: decode_i24([bytes[8], bytes[9], bytes[10]]),
            anemometer: u16::from_le_bytes([bytes[12], bytes[13]]),
            potentiometer: u16::from_le_bytes([bytes[14], bytes[15]]),
        }
    }

    /// Firmware-side layout. Used by the simulated rig; thrust is truncated to 24 bits.
    pub fn encode(&self) -> [u8; RAW_FRAME_LEN] {
        let mut out = [0u8; RAW_FRAME_LEN];
        out[0..2].copy_from_slice(&self.fan_rotation.to_le_bytes());
        out[2..4].copy_from_slice(&self.turbine_rotation.to_le_bytes());
        out[4..6].copy_from_slice(&self.current.to_le_bytes());
        out[6..8].copy_from_slice(&self.voltage.to_le_bytes());
        out[8..11].copy_from_slice(&self.thrust.to_le_bytes()[0..3]);
        out[12..14].copy_from_slice(&self.anemometer.to_le_bytes());
        out[14..16].copy_from_slice(&self.potentiometer.to_le_bytes());
        out
    }
}

fn decode_i24(b: [u8; 3]) -> i32 {
    // Place in the top three bytes, then arithmetic shift to sign-extend.
    i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8
}

/// Outbound actuator message as it appears on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActuatorFrame {
    pub fan_pwm: u8,
    pub servo_pulse: u16,
    pub torque_level: i8,
    pub led: bool,
}

impl ActuatorFrame {
    pub fn encode(&self) -> [u8; ACTUATOR_FRAME_LEN] {
        let servo = self.servo_pulse.to_le_bytes();
        [
            self.fan_pwm,
            servo[0],
            servo[1],
            self.torque_level.to_le_bytes()[0],
            u8::from(self.led),
        ]
    }

    pub fn decode(bytes: &[u8; ACTUATOR_FRAME_LEN]) -> Self {
        Self {
            fan_pwm: bytes[0],
            servo_pulse: u16::from_le_bytes([bytes[1], bytes[2]]),
            torque_level: i8::from_le_bytes([bytes[3]]),
            led: bytes[4] != 0,
        }
    }
}
