use std::{io, time::Duration};

use thiserror::Error;
use wayland_client::{ConnectError, DispatchError};

use crate::capability::Capability;

/// Error
/// every way a single capture can end without an image
/// 1. no compositor to talk to
/// 2. compositor lacks one of the globals we need
/// 3. shared memory could not be prepared
/// 4. compositor refused or lost the copy
/// 5. the delivered pixels cannot be turned into an image
#[derive(Error, Debug)]
pub enum ShotCopyError {
    #[error("Cannot connect to the wayland compositor")]
    ConnectionUnavailable(#[from] ConnectError),
    #[error("{0}")]
    CapabilityMissing(Capability),
    #[error("Failed to prepare the shm buffer")]
    AllocationFailed(#[from] AllocationError),
    #[error("Compositor failed to copy the frame")]
    CopyFailed,
    #[error("Not Support format: {0}")]
    UnsupportedFormat(u32),
    #[error("Frame geometry {width}x{height} with stride {stride} does not fit the buffer")]
    InvalidGeometry { width: u32, height: u32, stride: u32 },
    #[error("Connection lost during dispatch")]
    ConnectionLost(#[from] DispatchError),
    #[error("Compositor did not answer within {0:?}")]
    Timeout(Duration),
}

/// Failure of one of the shm buffer steps
#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("Cannot create shm object")]
    CreateFailed(#[source] io::Error),
    #[error("Cannot resize shm object")]
    ResizeFailed(#[source] io::Error),
    #[error("Cannot map shm object")]
    MapFailed(#[source] io::Error),
    #[error("Invalid buffer size, stride {stride}, height {height}")]
    InvalidSize { stride: u32, height: u32 },
}
