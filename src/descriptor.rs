//! Standard and CDC descriptors
//!
//! The control state machine serves descriptors as opaque byte blocks.
//! The encoders here build those blocks at compile time or into a
//! caller's buffer; fields are little-endian and unpadded.

use usb_device::{descriptor::descriptor_type, UsbError};

pub const DEVICE_LEN: usize = 18;
pub const CONFIGURATION_LEN: usize = 9;
pub const INTERFACE_LEN: usize = 9;
pub const ENDPOINT_LEN: usize = 7;
pub const INTERFACE_ASSOCIATION_LEN: usize = 8;

/// Interface association descriptor type
pub const INTERFACE_ASSOCIATION: u8 = 11;

/// Communications device class constants
pub mod cdc {
    pub const CLASS_COMM: u8 = 0x02;
    pub const CLASS_DATA: u8 = 0x0A;
    pub const SUBCLASS_ACM: u8 = 0x02;
    pub const PROTOCOL_AT: u8 = 0x01;

    pub const CS_INTERFACE: u8 = 0x24;

    pub const HEADER: u8 = 0x00;
    pub const CALL_MANAGEMENT: u8 = 0x01;
    pub const ACM: u8 = 0x02;
    pub const UNION: u8 = 0x06;

    /// Header functional descriptor
    pub const fn header(cdc_version: u16) -> [u8; 5] {
        let [lo, hi] = cdc_version.to_le_bytes();
        [5, CS_INTERFACE, HEADER, lo, hi]
    }

    /// Call management functional descriptor
    pub const fn call_management(capabilities: u8, data_interface: u8) -> [u8; 5] {
        [5, CS_INTERFACE, CALL_MANAGEMENT, capabilities, data_interface]
    }

    /// Abstract control management functional descriptor
    pub const fn acm(capabilities: u8) -> [u8; 4] {
        [4, CS_INTERFACE, ACM, capabilities]
    }

    /// Union functional descriptor, with one subordinate interface
    pub const fn union(control_interface: u8, subordinate_interface: u8) -> [u8; 5] {
        [5, CS_INTERFACE, UNION, control_interface, subordinate_interface]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub usb_version: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    /// Maximum packet size of endpoint 0
    pub max_packet_size: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub manufacturer: u8,
    pub product: u8,
    pub serial_number: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub const fn to_bytes(&self) -> [u8; DEVICE_LEN] {
        let usb = self.usb_version.to_le_bytes();
        let vid = self.vendor_id.to_le_bytes();
        let pid = self.product_id.to_le_bytes();
        let version = self.device_version.to_le_bytes();
        [
            DEVICE_LEN as u8,
            descriptor_type::DEVICE,
            usb[0],
            usb[1],
            self.class,
            self.subclass,
            self.protocol,
            self.max_packet_size,
            vid[0],
            vid[1],
            pid[0],
            pid[1],
            version[0],
            version[1],
            self.manufacturer,
            self.product,
            self.serial_number,
            self.num_configurations,
        ]
    }
}

/// The header of a configuration block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    /// Length of the whole block, this header included
    pub total_length: u16,
    pub num_interfaces: u8,
    pub value: u8,
    pub configuration: u8,
    pub attributes: u8,
    /// In units of 2mA
    pub max_power: u8,
}

impl ConfigurationDescriptor {
    /// Bus powered, no remote wakeup
    pub const BUS_POWERED: u8 = 0x80;

    pub const fn to_bytes(&self) -> [u8; CONFIGURATION_LEN] {
        let total = self.total_length.to_le_bytes();
        [
            CONFIGURATION_LEN as u8,
            descriptor_type::CONFIGURATION,
            total[0],
            total[1],
            self.num_interfaces,
            self.value,
            self.configuration,
            self.attributes,
            self.max_power,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub interface: u8,
}

impl InterfaceDescriptor {
    pub const fn to_bytes(&self) -> [u8; INTERFACE_LEN] {
        [
            INTERFACE_LEN as u8,
            descriptor_type::INTERFACE,
            self.number,
            self.alternate_setting,
            self.num_endpoints,
            self.class,
            self.subclass,
            self.protocol,
            self.interface,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Endpoint number, with bit 7 set for IN endpoints
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub const ATTRIBUTES_BULK: u8 = 0x02;
    pub const ATTRIBUTES_INTERRUPT: u8 = 0x03;

    pub const fn to_bytes(&self) -> [u8; ENDPOINT_LEN] {
        let size = self.max_packet_size.to_le_bytes();
        [
            ENDPOINT_LEN as u8,
            descriptor_type::ENDPOINT,
            self.address,
            self.attributes,
            size[0],
            size[1],
            self.interval,
        ]
    }
}

/// Groups the interfaces of one function
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterfaceAssociationDescriptor {
    pub first_interface: u8,
    pub interface_count: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub function: u8,
}

impl InterfaceAssociationDescriptor {
    pub const fn to_bytes(&self) -> [u8; INTERFACE_ASSOCIATION_LEN] {
        [
            INTERFACE_ASSOCIATION_LEN as u8,
            INTERFACE_ASSOCIATION,
            self.first_interface,
            self.interface_count,
            self.class,
            self.subclass,
            self.protocol,
            self.function,
        ]
    }
}

/// Builds a configuration block in a caller's buffer
///
/// The writer keeps `wTotalLength` and `bNumInterfaces` current, so the
/// header may be written with zeros in both.
pub struct ConfigurationWriter<'b> {
    buf: &'b mut [u8],
    len: usize,
    interfaces: u8,
}

impl<'b> ConfigurationWriter<'b> {
    pub fn new(buf: &'b mut [u8], header: &ConfigurationDescriptor) -> Result<Self, UsbError> {
        let mut writer = ConfigurationWriter {
            buf,
            len: 0,
            interfaces: 0,
        };
        writer.write(&header.to_bytes())?;
        Ok(writer)
    }

    /// Append a raw descriptor
    pub fn write(&mut self, descriptor: &[u8]) -> Result<(), UsbError> {
        let end = self.len + descriptor.len();
        let dest = self
            .buf
            .get_mut(self.len..end)
            .ok_or(UsbError::BufferOverflow)?;
        dest.copy_from_slice(descriptor);
        self.len = end;
        self.patch_header();
        Ok(())
    }

    pub fn interface(&mut self, interface: &InterfaceDescriptor) -> Result<(), UsbError> {
        self.write(&interface.to_bytes())?;
        if interface.alternate_setting == 0 {
            self.interfaces += 1;
            self.patch_header();
        }
        Ok(())
    }

    pub fn endpoint(&mut self, endpoint: &EndpointDescriptor) -> Result<(), UsbError> {
        self.write(&endpoint.to_bytes())
    }

    pub fn association(&mut self, iad: &InterfaceAssociationDescriptor) -> Result<(), UsbError> {
        self.write(&iad.to_bytes())
    }

    fn patch_header(&mut self) {
        if self.len < CONFIGURATION_LEN {
            return;
        }
        let [lo, hi] = (self.len as u16).to_le_bytes();
        self.buf[2] = lo;
        self.buf[3] = hi;
        self.buf[4] = self.buf[4].max(self.interfaces);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The finished block
    pub fn finish(self) -> &'b [u8] {
        let ConfigurationWriter { buf, len, .. } = self;
        &buf[..len]
    }
}

/// The descriptors served by the control state machine
#[derive(Clone, Copy, Debug)]
pub struct Descriptors<'d> {
    device: &'d [u8],
    configuration: &'d [u8],
}

impl<'d> Descriptors<'d> {
    /// Check and wrap the device descriptor and configuration block
    ///
    /// Fails with [`UsbError::ParseError`] if either header is malformed, or
    /// if `wTotalLength` doesn't match the configuration block.
    pub fn new(device: &'d [u8], configuration: &'d [u8]) -> Result<Self, UsbError> {
        let device_ok = device.len() == DEVICE_LEN
            && device[0] as usize == DEVICE_LEN
            && device[1] == descriptor_type::DEVICE;
        let configuration_ok = configuration.len() >= CONFIGURATION_LEN
            && configuration[0] as usize == CONFIGURATION_LEN
            && configuration[1] == descriptor_type::CONFIGURATION
            && u16::from_le_bytes([configuration[2], configuration[3]]) as usize
                == configuration.len();
        if device_ok && configuration_ok {
            Ok(Descriptors {
                device,
                configuration,
            })
        } else {
            warn!("MALFORMED DESCRIPTORS");
            Err(UsbError::ParseError)
        }
    }

    pub fn device(&self) -> &'d [u8] {
        self.device
    }

    /// Maximum packet size of endpoint 0
    pub fn max_packet_size(&self) -> u8 {
        self.device[7]
    }

    /// The configuration header, without interfaces or endpoints
    pub fn configuration_header(&self) -> &'d [u8] {
        &self.configuration[..CONFIGURATION_LEN]
    }

    /// The whole configuration block
    pub fn configuration(&self) -> &'d [u8] {
        self.configuration
    }
}
