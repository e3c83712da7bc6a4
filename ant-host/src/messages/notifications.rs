// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use packed_struct::prelude::*;

/// Reset-cause notification emitted by the stick after a [ResetSystem]
/// command or a power cycle
///
/// [ResetSystem]: crate::messages::control::ResetSystem
#[derive(PackedStruct, Debug, Clone, Copy, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", endian = "lsb", size_bytes = "1")]
pub struct StartUpMessage {
    #[packed_field(bits = "0")]
    pub hardware_reset_line: bool,
    #[packed_field(bits = "1")]
    pub watch_dog_reset: bool,
    #[packed_field(bits = "5")]
    pub command_reset: bool,
    #[packed_field(bits = "6")]
    pub synchronous_reset: bool,
    #[packed_field(bits = "7")]
    pub suspend_reset: bool,
}

impl StartUpMessage {
    /// Helper function to detect special bitfield case of power on reset cause
    pub fn is_power_on_reset(&self) -> bool {
        !(self.hardware_reset_line
            || self.watch_dog_reset
            || self.command_reset
            || self.synchronous_reset
            || self.suspend_reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_message() {
        let unpacked = StartUpMessage::unpack(&[0x02]).unwrap();
        assert!(unpacked.watch_dog_reset);
        assert!(!unpacked.is_power_on_reset());
        let unpacked = StartUpMessage::unpack(&[0x20]).unwrap();
        assert!(unpacked.command_reset);
    }

    #[test]
    fn power_on_reset() {
        let unpacked = StartUpMessage::unpack(&[0x00]).unwrap();
        assert!(unpacked.is_power_on_reset());
    }
}
