//! Driver state associated with endpoints

use crate::{endpoint::EndpointContext, MAX_ENDPOINTS};

/// One entry of the endpoint registry
pub enum Slot<'a> {
    Unconfigured,
    Active(EndpointContext<'a>),
}

impl<'a> Slot<'a> {
    fn active(&self) -> Option<&EndpointContext<'a>> {
        match self {
            Slot::Active(ep) => Some(ep),
            Slot::Unconfigured => None,
        }
    }

    fn active_mut(&mut self) -> Option<&mut EndpointContext<'a>> {
        match self {
            Slot::Active(ep) => Some(ep),
            Slot::Unconfigured => None,
        }
    }
}

/// Endpoints, indexed by endpoint number
///
/// All mutation goes through [`register()`](EndpointState::register);
/// there's no way to reach a slot that was never registered.
pub struct EndpointState<'a> {
    slots: [Slot<'a>; MAX_ENDPOINTS],
}

impl<'a> EndpointState<'a> {
    pub fn new() -> Self {
        EndpointState {
            slots: core::array::from_fn(|_| Slot::Unconfigured),
        }
    }

    /// Activate an endpoint
    ///
    /// Returns the context back if the number is out of range, or if the
    /// endpoint is already active.
    pub fn register(&mut self, ep: EndpointContext<'a>) -> Result<(), EndpointContext<'a>> {
        match self.slots.get_mut(ep.number()) {
            Some(slot @ Slot::Unconfigured) => {
                *slot = Slot::Active(ep);
                Ok(())
            }
            _ => Err(ep),
        }
    }

    pub fn is_active(&self, ep: usize) -> bool {
        self.endpoint(ep).is_some()
    }

    pub fn endpoint(&self, ep: usize) -> Option<&EndpointContext<'a>> {
        self.slots.get(ep).and_then(Slot::active)
    }

    pub fn endpoint_mut(&mut self, ep: usize) -> Option<&mut EndpointContext<'a>> {
        self.slots.get_mut(ep).and_then(Slot::active_mut)
    }

    /// Iterate over every active endpoint
    pub fn endpoints_mut(&mut self) -> impl Iterator<Item = &mut EndpointContext<'a>> {
        self.slots.iter_mut().filter_map(Slot::active_mut)
    }
}

impl Default for EndpointState<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::EndpointState;
    use crate::{
        endpoint::EndpointContext,
        hardware::{Banks, EndpointConfig, PacketSize},
        queue::ByteQueue,
        MAX_ENDPOINTS,
    };
    use usb_device::UsbDirection;

    fn bulk_in() -> EndpointConfig {
        EndpointConfig::bulk(UsbDirection::In, PacketSize::Bytes64, Banks::Double)
    }

    #[test]
    fn register_once() {
        let (mut a, mut b) = ([0; 8], [0; 8]);
        let mut state = EndpointState::new();
        assert!(!state.is_active(2));

        state
            .register(EndpointContext::new(2, bulk_in(), ByteQueue::new(&mut a)))
            .ok()
            .unwrap();
        assert!(state.is_active(2));
        assert_eq!(state.endpoint(2).unwrap().number(), 2);

        let rejected = state.register(EndpointContext::new(2, bulk_in(), ByteQueue::new(&mut b)));
        assert!(rejected.is_err());
    }

    #[test]
    fn out_of_range() {
        let mut storage = [0; 8];
        let mut state = EndpointState::new();
        let ep = EndpointContext::new(MAX_ENDPOINTS, bulk_in(), ByteQueue::new(&mut storage));
        assert!(state.register(ep).is_err());
        assert!(state.endpoint(MAX_ENDPOINTS).is_none());
        assert!(state.endpoint_mut(MAX_ENDPOINTS).is_none());
    }

    #[test]
    fn iterate_active() {
        let (mut a, mut b) = ([0; 8], [0; 8]);
        let mut state = EndpointState::new();
        let control = EndpointConfig::control(PacketSize::Bytes64);
        state.register(EndpointContext::new(0, control, ByteQueue::new(&mut a))).ok().unwrap();
        state.register(EndpointContext::new(3, bulk_in(), ByteQueue::new(&mut b))).ok().unwrap();

        let mut numbers = [0; MAX_ENDPOINTS];
        let mut count = 0;
        for ep in state.endpoints_mut() {
            numbers[count] = ep.number();
            count += 1;
        }
        assert_eq!(&numbers[..count], &[0, 3]);
    }
}
