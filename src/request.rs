//! Control requests

use usb_device::{
    control::{Recipient, RequestType},
    UsbDirection,
};

/// Size of a SETUP packet
pub const SETUP_LEN: usize = 8;

/// A decoded SETUP packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl ControlRequest {
    /// Decode the little-endian SETUP layout at the start of `bytes`
    ///
    /// Returns `None` if there are fewer than eight bytes.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; SETUP_LEN] = bytes.get(..SETUP_LEN)?.try_into().ok()?;
        Some(ControlRequest {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }

    pub fn direction(&self) -> UsbDirection {
        UsbDirection::from(self.request_type)
    }

    pub fn kind(&self) -> RequestType {
        match (self.request_type >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    pub fn recipient(&self) -> Recipient {
        match self.request_type & 0b1_1111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }

    /// Descriptor type and index of a GET_DESCRIPTOR request
    pub fn descriptor_type_index(&self) -> (u8, u8) {
        ((self.value >> 8) as u8, self.value as u8)
    }

    /// Encode this request as a SETUP packet
    pub fn to_bytes(&self) -> [u8; SETUP_LEN] {
        let [value_lo, value_hi] = self.value.to_le_bytes();
        let [index_lo, index_hi] = self.index.to_le_bytes();
        let [length_lo, length_hi] = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value_lo,
            value_hi,
            index_lo,
            index_hi,
            length_lo,
            length_hi,
        ]
    }
}
