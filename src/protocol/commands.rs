//! # Polling Commands
//!
//! The controller only answers when asked. Requests are `0x55 0xAA` frames
//! built from a [`CommandDescriptor`]; the opcode/subopcode pairing of each
//! request lives in one table here rather than at call sites.

use serde::Deserialize;
use std::fmt;

use super::checksum;
use crate::error::Result;

/// Info/status read opcode (takes a subopcode)
pub const OPCODE_INFO: u8 = 0x22;

/// Realtime values opcode
pub const OPCODE_REALTIME: u8 = 0x21;

/// Dedicated battery opcode seen on some firmware
pub const OPCODE_BATTERY: u8 = 0x23;

/// Info: battery percent and pack voltage
pub const SUB_INFO_BATTERY_VOLTAGE: u8 = 0x01;

/// Info: battery percent only
pub const SUB_INFO_BATTERY: u8 = 0x31;

/// Info: odometer
pub const SUB_INFO_ODOMETER: u8 = 0x29;

/// Info: controller temperature
pub const SUB_INFO_TEMPERATURE: u8 = 0x1A;

/// Everything needed to build one outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub opcode: u8,
    pub subopcode: Option<u8>,
    pub payload: Vec<u8>,
}

impl CommandDescriptor {
    pub fn new(opcode: u8, subopcode: Option<u8>, payload: Vec<u8>) -> Self {
        Self {
            opcode,
            subopcode,
            payload,
        }
    }

    /// Build the checksummed wire frame for this command
    ///
    /// # Errors
    ///
    /// Returns error if the payload does not fit in one frame
    pub fn encode(&self) -> Result<Vec<u8>> {
        checksum::build(self.opcode, self.subopcode, &self.payload)
    }
}

impl fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subopcode {
            Some(sub) => write!(f, "0x{:02X}/0x{:02X}", self.opcode, sub)?,
            None => write!(f, "0x{:02X}", self.opcode)?,
        }
        if !self.payload.is_empty() {
            write!(f, " [{}]", hex::encode(&self.payload))?;
        }
        Ok(())
    }
}

/// Requests issued by the polling sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollCommand {
    GetInfo,
    GetBattery,
    GetOdometer,
    GetRealtime,
    GetTemperature,
}

/// How the battery request is addressed on a given firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryRequest {
    /// `0x22/0x31` on the info opcode
    #[default]
    InfoSubopcode,
    /// Dedicated `0x23` opcode
    DedicatedOpcode,
}

/// Order in which the poller cycles through requests
pub const POLL_SEQUENCE: [PollCommand; 5] = [
    PollCommand::GetInfo,
    PollCommand::GetBattery,
    PollCommand::GetOdometer,
    PollCommand::GetRealtime,
    PollCommand::GetTemperature,
];

impl PollCommand {
    /// Opcode and subopcode this request is sent with
    pub fn wire_ids(self, battery: BatteryRequest) -> (u8, Option<u8>) {
        match self {
            PollCommand::GetInfo => (OPCODE_INFO, Some(SUB_INFO_BATTERY_VOLTAGE)),
            PollCommand::GetBattery => match battery {
                BatteryRequest::InfoSubopcode => (OPCODE_INFO, Some(SUB_INFO_BATTERY)),
                BatteryRequest::DedicatedOpcode => (OPCODE_BATTERY, None),
            },
            PollCommand::GetOdometer => (OPCODE_INFO, Some(SUB_INFO_ODOMETER)),
            PollCommand::GetRealtime => (OPCODE_REALTIME, None),
            PollCommand::GetTemperature => (OPCODE_INFO, Some(SUB_INFO_TEMPERATURE)),
        }
    }

    /// Descriptor for this request with the default battery addressing
    pub fn descriptor(self) -> CommandDescriptor {
        self.descriptor_with(BatteryRequest::default())
    }

    pub fn descriptor_with(self, battery: BatteryRequest) -> CommandDescriptor {
        let (opcode, subopcode) = self.wire_ids(battery);
        CommandDescriptor::new(opcode, subopcode, Vec::new())
    }

    pub fn name(self) -> &'static str {
        match self {
            PollCommand::GetInfo => "GetInfo",
            PollCommand::GetBattery => "GetBattery",
            PollCommand::GetOdometer => "GetOdometer",
            PollCommand::GetRealtime => "GetRealtime",
            PollCommand::GetTemperature => "GetTemperature",
        }
    }
}

impl fmt::Display for PollCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
