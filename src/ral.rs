//! Register access for the banked endpoint FIFO controller
//!
//! The module implements a RAL-compatible interface for the USB device
//! controller registers, laid out like the ATmega32U4. The block starts at
//! the general control register (`USBCON`); endpoint registers act on
//! whichever endpoint `UENUM` selects.

#![allow(non_snake_case, non_upper_case_globals)]

pub use ral_registers::{modify_reg, read_reg, write_reg, RORegister, RWRegister};

#[repr(C)]
pub struct RegisterBlock {
    pub USBCON: RWRegister<u8>,
    pub USBSTA: RORegister<u8>,
    pub USBINT: RWRegister<u8>,
    _reserved0: [u8; 5],
    pub UDCON: RWRegister<u8>,
    pub UDINT: RWRegister<u8>,
    pub UDIEN: RWRegister<u8>,
    pub UDADDR: RWRegister<u8>,
    pub UDFNUML: RORegister<u8>,
    pub UDFNUMH: RORegister<u8>,
    pub UDMFN: RORegister<u8>,
    _reserved1: [u8; 1],
    pub UEINTX: RWRegister<u8>,
    pub UENUM: RWRegister<u8>,
    pub UERST: RWRegister<u8>,
    pub UECONX: RWRegister<u8>,
    pub UECFG0X: RWRegister<u8>,
    pub UECFG1X: RWRegister<u8>,
    pub UESTA0X: RWRegister<u8>,
    pub UESTA1X: RORegister<u8>,
    pub UEIENX: RWRegister<u8>,
    pub UEDATX: RWRegister<u8>,
    pub UEBCLX: RORegister<u8>,
    pub UEBCHX: RORegister<u8>,
    pub UEINT: RORegister<u8>,
}

/// Owns the register block and whatever owned its address
pub struct Instance<P> {
    block: &'static RegisterBlock,
    _peripherals: P,
}

impl<P: crate::Peripherals> Instance<P> {
    pub fn new(peripherals: P) -> Self {
        // Safety: the `Peripherals` contract promises a valid, owned
        // register block at this address.
        let block = unsafe { &*(peripherals.usb() as *const RegisterBlock) };
        Instance {
            block,
            _peripherals: peripherals,
        }
    }
}

impl<P> core::ops::Deref for Instance<P> {
    type Target = RegisterBlock;
    fn deref(&self) -> &RegisterBlock {
        self.block
    }
}

// Safety: the instance is the sole owner of the register block.
unsafe impl<P: Send> Send for Instance<P> {}

macro_rules! field {
    ($name:ident, $offset:expr, $width_mask:expr) => {
        pub mod $name {
            pub const offset: u8 = $offset;
            pub const mask: u8 = $width_mask << offset;
            pub mod RW {}
            pub mod R {}
            pub mod W {}
        }
    };
}

pub mod USBCON {
    field!(VBUSTE, 0, 1);
    field!(OTGPADE, 4, 1);
    field!(FRZCLK, 5, 1);
    field!(USBE, 7, 1);
}

pub mod USBSTA {
    field!(VBUS, 0, 1);
    field!(ID, 1, 1);
}

pub mod USBINT {
    field!(VBUSTI, 0, 1);
}

pub mod UDCON {
    field!(DETACH, 0, 1);
    field!(RMWKUP, 1, 1);
    field!(LSM, 2, 1);
    field!(RSTCPU, 3, 1);
}

pub mod UDINT {
    field!(SUSPI, 0, 1);
    field!(SOFI, 2, 1);
    field!(EORSTI, 3, 1);
    field!(WAKEUPI, 4, 1);
    field!(EORSMI, 5, 1);
    field!(UPRSMI, 6, 1);
}

pub mod UDIEN {
    field!(SUSPE, 0, 1);
    field!(SOFE, 2, 1);
    field!(EORSTE, 3, 1);
    field!(WAKEUPE, 4, 1);
    field!(EORSME, 5, 1);
    field!(UPRSME, 6, 1);
}

pub mod UDADDR {
    field!(UADD, 0, 0x7F);
    field!(ADDEN, 7, 1);
}

pub mod UDFNUML {}
pub mod UDFNUMH {}
pub mod UDMFN {}

pub mod UEINTX {
    field!(TXINI, 0, 1);
    field!(STALLEDI, 1, 1);
    field!(RXOUTI, 2, 1);
    field!(RXSTPI, 3, 1);
    field!(NAKOUTI, 4, 1);
    field!(RWAL, 5, 1);
    field!(NAKINI, 6, 1);
    field!(FIFOCON, 7, 1);
}

pub mod UENUM {
    field!(EPNUM, 0, 0x7);
}

pub mod UERST {
    field!(EPRST, 0, 0x7F);
}

pub mod UECONX {
    field!(EPEN, 0, 1);
    field!(RSTDT, 3, 1);
    field!(STALLRQC, 4, 1);
    field!(STALLRQ, 5, 1);
}

pub mod UECFG0X {
    field!(EPDIR, 0, 1);
    field!(EPTYPE, 6, 0x3);
}

pub mod UECFG1X {
    field!(ALLOC, 1, 1);
    field!(EPBK, 2, 0x3);
    field!(EPSIZE, 4, 0x7);
}

pub mod UESTA0X {
    field!(NBUSYBK, 0, 0x3);
    field!(DTSEQ, 2, 0x3);
    field!(UNDERFI, 5, 1);
    field!(OVERFI, 6, 1);
    field!(CFGOK, 7, 1);
}

pub mod UESTA1X {
    field!(CURRBK, 0, 0x3);
    field!(CTRLDIR, 2, 1);
}

pub mod UEIENX {
    field!(TXINE, 0, 1);
    field!(STALLEDE, 1, 1);
    field!(RXOUTE, 2, 1);
    field!(RXSTPE, 3, 1);
    field!(NAKOUTE, 4, 1);
    field!(NAKINE, 6, 1);
    field!(FLERRE, 7, 1);
}

pub mod UEDATX {}

pub mod UEBCLX {}

pub mod UEBCHX {
    field!(BYCT, 0, 0x7);
}

pub mod UEINT {
    field!(EPINT, 0, 0x7F);
}

#[cfg(test)]
mod test {
    use super::{RegisterBlock, UDADDR, UECFG1X};
    use crate::ral;

    fn block() -> RegisterBlock {
        // Safety: every register is a u8 cell; all-zero is a valid reset value.
        unsafe { core::mem::zeroed() }
    }

    #[test]
    fn address_fields() {
        let regs = block();
        ral::write_reg!(super, &regs, UDADDR, UADD: 0xFF);
        assert_eq!(regs.UDADDR.read(), 0x7F);
        ral::modify_reg!(super, &regs, UDADDR, ADDEN: 1);
        assert_eq!(regs.UDADDR.read(), 0xFF);
        assert_eq!(ral::read_reg!(super, &regs, UDADDR, UADD), 0x7F);
        assert_eq!(UDADDR::ADDEN::mask, 0x80);
    }

    #[test]
    fn endpoint_config_fields() {
        let regs = block();
        ral::write_reg!(super, &regs, UECFG1X, EPSIZE: 3, EPBK: 1, ALLOC: 1);
        assert_eq!(regs.UECFG1X.read(), 0b0011_0110);
        assert_eq!(ral::read_reg!(super, &regs, UECFG1X, EPSIZE), 3);
        assert_eq!(UECFG1X::EPSIZE::mask, 0x70);
    }
}

const _: [(); 1] = [(); (core::mem::size_of::<RegisterBlock>() == 29) as usize];
