mod capability;
mod capture;
mod capturedimage;
mod convert;
mod session;
mod shm;
mod shotcopyerror;
mod transport;

pub use capability::{Binder, Capabilities, Capability, CapabilitySet};
pub use capture::{capture_screen, capture_with, grab, CaptureOptions};
pub use capturedimage::{materialize, CapturedImage, ChannelLayout};
pub use session::{CompletedFrame, FrameEvent, FrameSession, SessionState};
pub use shm::{allocate, BufferHandle, BufferRegistrar, FrameFormat, SharedPixelBuffer};
pub use transport::{Transport, WaylandTransport};

pub use image::ColorType;

pub use shotcopyerror::{AllocationError, ShotCopyError as Error};

/// for user to read the state, report some object
pub mod reexport {
    pub mod wl_shm {
        /// reexport wl_shm Format
        pub use wayland_client::protocol::wl_shm::Format;
    }
    /// reexport wl_shm Format
    pub use wl_shm::Format;
    /// reexport WEnum, frame events carry it
    pub use wayland_client::WEnum;
}
