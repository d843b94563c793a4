use std::{
    fs::File,
    io,
    os::fd::{AsFd, BorrowedFd, OwnedFd},
    time::{SystemTime, UNIX_EPOCH},
};

use memmap2::{MmapMut, MmapOptions};
use nix::{
    fcntl,
    sys::{memfd, mman, stat},
    unistd,
};
use wayland_client::protocol::wl_shm::Format;

use crate::shotcopyerror::AllocationError;

/// Buffer requirements sent by the compositor
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameFormat {
    /// contain [Format], which in wl_shm
    pub format: Format,
    pub width: u32,
    pub height: u32,
    /// bytes per row, at least `4 * width` for the formats we read
    pub stride: u32,
}

impl FrameFormat {
    /// Size of the shm region in bytes, `None` when it cannot back a wl_shm pool
    pub fn byte_len(&self) -> Option<usize> {
        let len = self.stride.checked_mul(self.height)?;
        if len == 0 || len > i32::MAX as u32 {
            return None;
        }
        Some(len as usize)
    }
}

/// Transport side object wrapping a shm region
pub trait BufferHandle {
    fn release(&self);
}

/// Turns a mapped shm region into a transport buffer object
pub trait BufferRegistrar {
    type Handle: BufferHandle;

    fn register(&self, fd: BorrowedFd<'_>, format: &FrameFormat) -> Self::Handle;
}

/// A mapped shm region together with the transport buffer describing it.
/// Dropping it releases the buffer object and unmaps the region.
#[derive(Debug)]
pub struct SharedPixelBuffer<H: BufferHandle> {
    handle: H,
    mmap: MmapMut,
    format: FrameFormat,
}

impl<H: BufferHandle> SharedPixelBuffer<H> {
    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    /// Compositor side of the region, tests use it to fill pixels
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }
}

impl<H: BufferHandle> Drop for SharedPixelBuffer<H> {
    fn drop(&mut self) {
        tracing::debug!("Release shm buffer of {} bytes", self.mmap.len());
        self.handle.release();
    }
}

fn create_shm_fd() -> io::Result<OwnedFd> {
    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    loop {
        match memfd::memfd_create(
            c"shotcopy",
            memfd::MFdFlags::MFD_CLOEXEC | memfd::MFdFlags::MFD_ALLOW_SEALING,
        ) {
            Ok(fd) => {
                // sealing is optional
                let _ = fcntl::fcntl(
                    fd.as_fd(),
                    fcntl::F_ADD_SEALS(
                        fcntl::SealFlag::F_SEAL_SHRINK | fcntl::SealFlag::F_SEAL_SEAL,
                    ),
                );
                return Ok(fd);
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(nix::errno::Errno::ENOSYS) => break,
            Err(errno) => return Err(io::Error::from(errno)),
        }
    }

    let mut name = shm_name();
    loop {
        match mman::shm_open(
            name.as_str(),
            fcntl::OFlag::O_CREAT
                | fcntl::OFlag::O_EXCL
                | fcntl::OFlag::O_RDWR
                | fcntl::OFlag::O_CLOEXEC,
            stat::Mode::S_IRUSR | stat::Mode::S_IWUSR,
        ) {
            // the name only lives until the fd exists
            Ok(fd) => {
                mman::shm_unlink(name.as_str())?;
                return Ok(fd);
            }
            Err(nix::errno::Errno::EEXIST) => name = shm_name(),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(errno) => return Err(io::Error::from(errno)),
        }
    }
}

fn shm_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|time| time.subsec_nanos())
        .unwrap_or_default();
    format!("/shotcopy-{}-{nanos}", std::process::id())
}

fn resize(fd: &OwnedFd, len: usize) -> Result<(), AllocationError> {
    loop {
        match unistd::ftruncate(fd.as_fd(), len as nix::libc::off_t) {
            Ok(()) => return Ok(()),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(errno) => return Err(AllocationError::ResizeFailed(io::Error::from(errno))),
        }
    }
}

/// Create an anonymous shm region fitting `format` and register it with the transport.
///
/// The fd is closed before returning, the mapping and the transport buffer keep the
/// memory alive until the returned [SharedPixelBuffer] is dropped.
pub fn allocate<R: BufferRegistrar>(
    registrar: &R,
    format: FrameFormat,
) -> Result<SharedPixelBuffer<R::Handle>, AllocationError> {
    let len = format.byte_len().ok_or(AllocationError::InvalidSize {
        stride: format.stride,
        height: format.height,
    })?;

    let fd = create_shm_fd().map_err(AllocationError::CreateFailed)?;
    resize(&fd, len)?;

    let mem_file = File::from(fd);
    let mmap = unsafe { MmapOptions::new().len(len).map_mut(&mem_file) }
        .map_err(AllocationError::MapFailed)?;

    let handle = registrar.register(mem_file.as_fd(), &format);
    drop(mem_file);

    tracing::debug!(
        "Allocated shm buffer {}x{} stride {} ({:?})",
        format.width,
        format.height,
        format.stride,
        format.format
    );
    Ok(SharedPixelBuffer {
        handle,
        mmap,
        format,
    })
}
