use std::fmt;

use wayland_client::{
    protocol::{wl_output::WlOutput, wl_shm::WlShm},
    Proxy,
};
use wayland_protocols_wlr::screencopy::v1::client::zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1;

/// The three globals a capture needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Shm,
    ScreencopyManager,
    Output,
}

impl Capability {
    pub fn interface(self) -> &'static str {
        match self {
            Capability::Shm => WlShm::interface().name,
            Capability::ScreencopyManager => ZwlrScreencopyManagerV1::interface().name,
            Capability::Output => WlOutput::interface().name,
        }
    }

    pub fn from_interface(interface: &str) -> Option<Self> {
        [
            Capability::Shm,
            Capability::ScreencopyManager,
            Capability::Output,
        ]
        .into_iter()
        .find(|capability| capability.interface() == interface)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Shm => write!(f, "Compositor is missing wl_shm"),
            Capability::ScreencopyManager => {
                write!(f, "Compositor doesn't support wlr-screencopy-unstable-v1")
            }
            Capability::Output => write!(f, "No output available"),
        }
    }
}

/// Creates the client side object of an announced global
pub trait Binder<S, M, O> {
    fn bind_shm(&mut self) -> S;
    fn bind_screencopy_manager(&mut self) -> M;
    fn bind_output(&mut self) -> O;
}

/// What the compositor announced during discovery, filled as globals arrive
#[derive(Debug, Clone)]
pub struct CapabilitySet<S = WlShm, M = ZwlrScreencopyManagerV1, O = WlOutput> {
    pub shm: Option<S>,
    pub screencopy_manager: Option<M>,
    pub output: Option<O>,
    sealed: bool,
}

impl<S, M, O> Default for CapabilitySet<S, M, O> {
    fn default() -> Self {
        Self {
            shm: None,
            screencopy_manager: None,
            output: None,
            sealed: false,
        }
    }
}

/// A [CapabilitySet] with nothing missing
#[derive(Debug, Clone)]
pub struct Capabilities<S = WlShm, M = ZwlrScreencopyManagerV1, O = WlOutput> {
    pub shm: S,
    pub screencopy_manager: M,
    pub output: O,
}

impl<S, M, O> CapabilitySet<S, M, O> {
    pub fn is_bound(&self, capability: Capability) -> bool {
        match capability {
            Capability::Shm => self.shm.is_some(),
            Capability::ScreencopyManager => self.screencopy_manager.is_some(),
            Capability::Output => self.output.is_some(),
        }
    }

    /// Bind the announced global if it is one we want and we do not hold one yet.
    /// Returns the capability that got bound.
    pub fn announce<B>(&mut self, interface: &str, binder: &mut B) -> Option<Capability>
    where
        B: Binder<S, M, O>,
    {
        if self.sealed {
            return None;
        }
        let capability = Capability::from_interface(interface)?;
        if self.is_bound(capability) {
            tracing::debug!("Ignore another {interface}, keep the first one");
            return None;
        }
        match capability {
            Capability::Shm => self.shm = Some(binder.bind_shm()),
            Capability::ScreencopyManager => {
                self.screencopy_manager = Some(binder.bind_screencopy_manager())
            }
            Capability::Output => self.output = Some(binder.bind_output()),
        }
        tracing::debug!("Bound {interface}");
        Some(capability)
    }

    /// Discovery is over, later announcements are ignored
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn require(self) -> Result<Capabilities<S, M, O>, Capability> {
        let Some(shm) = self.shm else {
            return Err(Capability::Shm);
        };
        let Some(screencopy_manager) = self.screencopy_manager else {
            return Err(Capability::ScreencopyManager);
        };
        let Some(output) = self.output else {
            return Err(Capability::Output);
        };
        Ok(Capabilities {
            shm,
            screencopy_manager,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingBinder {
        next: u32,
    }

    impl CountingBinder {
        fn take(&mut self) -> u32 {
            self.next += 1;
            self.next
        }
    }

    impl Binder<u32, u32, u32> for CountingBinder {
        fn bind_shm(&mut self) -> u32 {
            self.take()
        }
        fn bind_screencopy_manager(&mut self) -> u32 {
            self.take()
        }
        fn bind_output(&mut self) -> u32 {
            self.take()
        }
    }

    #[test]
    fn interface_names_match_protocol() {
        assert_eq!(Capability::Shm.interface(), "wl_shm");
        assert_eq!(
            Capability::ScreencopyManager.interface(),
            "zwlr_screencopy_manager_v1"
        );
        assert_eq!(Capability::Output.interface(), "wl_output");
        assert_eq!(Capability::from_interface("wl_seat"), None);
    }

    #[test]
    fn first_output_wins() {
        let mut set = CapabilitySet::<u32, u32, u32>::default();
        let mut binder = CountingBinder::default();
        assert_eq!(
            set.announce("wl_output", &mut binder),
            Some(Capability::Output)
        );
        assert_eq!(set.announce("wl_output", &mut binder), None);
        assert_eq!(set.output, Some(1));
        assert_eq!(binder.next, 1);
    }

    #[test]
    fn unrelated_globals_are_not_bound() {
        let mut set = CapabilitySet::<u32, u32, u32>::default();
        let mut binder = CountingBinder::default();
        for interface in ["wl_compositor", "wl_seat", "zxdg_output_manager_v1"] {
            assert_eq!(set.announce(interface, &mut binder), None);
        }
        assert_eq!(binder.next, 0);
    }

    #[test]
    fn sealed_set_ignores_announcements() {
        let mut set = CapabilitySet::<u32, u32, u32>::default();
        let mut binder = CountingBinder::default();
        set.seal();
        assert_eq!(set.announce("wl_shm", &mut binder), None);
        assert!(set.shm.is_none());
    }

    #[test]
    fn require_reports_first_missing() {
        let mut binder = CountingBinder::default();

        let mut set = CapabilitySet::<u32, u32, u32>::default();
        set.announce("wl_output", &mut binder);
        set.announce("zwlr_screencopy_manager_v1", &mut binder);
        assert_eq!(set.require().unwrap_err(), Capability::Shm);

        let mut set = CapabilitySet::<u32, u32, u32>::default();
        set.announce("wl_shm", &mut binder);
        set.announce("wl_output", &mut binder);
        assert_eq!(set.require().unwrap_err(), Capability::ScreencopyManager);

        let mut set = CapabilitySet::<u32, u32, u32>::default();
        set.announce("wl_shm", &mut binder);
        set.announce("zwlr_screencopy_manager_v1", &mut binder);
        assert_eq!(set.require().unwrap_err(), Capability::Output);
    }

    #[test]
    fn require_full_set() {
        let mut set = CapabilitySet::<u32, u32, u32>::default();
        let mut binder = CountingBinder::default();
        set.announce("wl_shm", &mut binder);
        set.announce("zwlr_screencopy_manager_v1", &mut binder);
        set.announce("wl_output", &mut binder);
        let caps = set.require().unwrap();
        assert_eq!((caps.shm, caps.screencopy_manager, caps.output), (1, 2, 3));
    }
}
