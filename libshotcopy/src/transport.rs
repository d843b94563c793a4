use std::{
    os::{fd::BorrowedFd, unix::net::UnixStream},
    time::{Duration, Instant},
};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use wayland_client::{
    backend::WaylandError,
    delegate_noop,
    protocol::{
        wl_buffer::WlBuffer,
        wl_callback::{self, WlCallback},
        wl_output::WlOutput,
        wl_registry,
        wl_shm::WlShm,
        wl_shm_pool::WlShmPool,
    },
    Connection, Dispatch, DispatchError, EventQueue, QueueHandle, WEnum,
};
use wayland_protocols_wlr::screencopy::v1::client::{
    zwlr_screencopy_frame_v1::{self, ZwlrScreencopyFrameV1},
    zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1,
};

use crate::{
    capability::{Binder, Capabilities, CapabilitySet},
    session::{FrameEvent, FrameSession},
    shm::{BufferHandle, BufferRegistrar, FrameFormat},
    shotcopyerror::ShotCopyError,
};

/// Connection to a compositor able to run one capture
pub trait Transport {
    type Shm;
    type Manager;
    type Output;
    type Handle: BufferHandle;

    /// Learn the announced globals with a single roundtrip, `None` when `deadline`
    /// passed before the compositor answered
    fn discover(
        &mut self,
        deadline: Option<Instant>,
    ) -> Result<Option<CapabilitySet<Self::Shm, Self::Manager, Self::Output>>, ShotCopyError>;

    /// Ask for a frame of `capabilities.output`, the session starts in `Requested`
    fn capture_output(
        &mut self,
        capabilities: Capabilities<Self::Shm, Self::Manager, Self::Output>,
        overlay_cursor: bool,
    ) -> Result<(), ShotCopyError>;

    /// Process at least one batch of events, or return once `timeout` passed
    fn dispatch_once(&mut self, timeout: Option<Duration>) -> Result<(), ShotCopyError>;

    fn session(&mut self) -> &mut FrameSession<Self::Handle>;

    /// Release everything, after the session buffer
    fn close(self);
}

impl BufferHandle for WlBuffer {
    fn release(&self) {
        self.destroy();
    }
}

pub(crate) struct ShmRegistrar<'a> {
    shm: &'a WlShm,
    qh: &'a QueueHandle<ScreencopyState>,
}

impl BufferRegistrar for ShmRegistrar<'_> {
    type Handle = WlBuffer;

    fn register(&self, fd: BorrowedFd<'_>, format: &FrameFormat) -> WlBuffer {
        let size = format.stride * format.height;
        let shm_pool = self.shm.create_pool(fd, size as i32, self.qh, ());
        let buffer = shm_pool.create_buffer(
            0,
            format.width as i32,
            format.height as i32,
            format.stride as i32,
            format.format,
            self.qh,
            (),
        );
        shm_pool.destroy();
        buffer
    }
}

/// Dispatch target of the capture queue
#[derive(Debug, Default)]
pub(crate) struct ScreencopyState {
    capabilities: CapabilitySet,
    synced: bool,
    shm: Option<WlShm>,
    session: FrameSession<WlBuffer>,
}

struct RegistryBinder<'a> {
    registry: &'a wl_registry::WlRegistry,
    name: u32,
    qh: &'a QueueHandle<ScreencopyState>,
}

// Every global is bound at version 1, the only one this client speaks.
impl Binder<WlShm, ZwlrScreencopyManagerV1, WlOutput> for RegistryBinder<'_> {
    fn bind_shm(&mut self) -> WlShm {
        self.registry.bind(self.name, 1, self.qh, ())
    }

    fn bind_screencopy_manager(&mut self) -> ZwlrScreencopyManagerV1 {
        self.registry.bind(self.name, 1, self.qh, ())
    }

    fn bind_output(&mut self) -> WlOutput {
        self.registry.bind(self.name, 1, self.qh, ())
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for ScreencopyState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => {
                tracing::trace!("Global {interface} v{version} ({name})");
                let mut binder = RegistryBinder { registry, name, qh };
                state.capabilities.announce(&interface, &mut binder);
            }
            // A single short capture does not follow globals going away.
            wl_registry::Event::GlobalRemove { name } => {
                tracing::trace!("Ignore removal of global {name}");
            }
            _ => {}
        }
    }
}

impl Dispatch<WlCallback, ()> for ScreencopyState {
    fn event(
        state: &mut Self,
        _callback: &WlCallback,
        event: wl_callback::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { .. } = event {
            state.synced = true;
        }
    }
}

impl FrameEvent {
    pub(crate) fn from_wlr(event: zwlr_screencopy_frame_v1::Event) -> Option<Self> {
        match event {
            zwlr_screencopy_frame_v1::Event::Buffer {
                format,
                width,
                height,
                stride,
            } => Some(FrameEvent::Buffer {
                format,
                width,
                height,
                stride,
            }),
            zwlr_screencopy_frame_v1::Event::Flags { flags } => {
                let y_invert = match flags {
                    WEnum::Value(flags) => {
                        flags.contains(zwlr_screencopy_frame_v1::Flags::YInvert)
                    }
                    WEnum::Unknown(bits) => {
                        bits & zwlr_screencopy_frame_v1::Flags::YInvert.bits() != 0
                    }
                };
                Some(FrameEvent::Flags { y_invert })
            }
            zwlr_screencopy_frame_v1::Event::Ready { .. } => Some(FrameEvent::Ready),
            zwlr_screencopy_frame_v1::Event::Failed => Some(FrameEvent::Failed),
            zwlr_screencopy_frame_v1::Event::LinuxDmabuf { .. } => {
                tracing::info!("Receive LinuxDmabuf event");
                None
            }
            zwlr_screencopy_frame_v1::Event::Damage { .. } => {
                tracing::info!("Receive Damage event");
                None
            }
            zwlr_screencopy_frame_v1::Event::BufferDone => {
                tracing::info!("Receive BufferDone event");
                None
            }
            _ => None,
        }
    }
}

impl Dispatch<ZwlrScreencopyFrameV1, ()> for ScreencopyState {
    fn event(
        state: &mut Self,
        frame: &ZwlrScreencopyFrameV1,
        event: zwlr_screencopy_frame_v1::Event,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        let Some(event) = FrameEvent::from_wlr(event) else {
            return;
        };
        let Some(shm) = state.shm.as_ref() else {
            tracing::error!("Frame event before capture started");
            return;
        };
        let registrar = ShmRegistrar { shm, qh };
        state
            .session
            .handle(event, &registrar, |buffer| frame.copy(buffer));
    }
}

delegate_noop!(ScreencopyState: ignore WlShm);
delegate_noop!(ScreencopyState: ignore WlShmPool);
delegate_noop!(ScreencopyState: ignore WlBuffer);
delegate_noop!(ScreencopyState: ignore WlOutput);
delegate_noop!(ScreencopyState: ignore ZwlrScreencopyManagerV1);

/// [Transport] over a real wayland connection
pub struct WaylandTransport {
    connection: Connection,
    event_queue: EventQueue<ScreencopyState>,
    state: ScreencopyState,
    manager: Option<ZwlrScreencopyManagerV1>,
    frame: Option<ZwlrScreencopyFrameV1>,
}

impl WaylandTransport {
    /// Connect through `WAYLAND_DISPLAY`, a missing compositor is not retried
    pub fn connect() -> Result<Self, ShotCopyError> {
        Ok(Self::with_connection(Connection::connect_to_env()?))
    }

    /// Talk to the compositor on the other end of an already connected socket
    pub fn from_socket(stream: UnixStream) -> Result<Self, ShotCopyError> {
        Ok(Self::with_connection(Connection::from_socket(stream)?))
    }

    fn with_connection(connection: Connection) -> Self {
        let event_queue = connection.new_event_queue();
        Self {
            connection,
            event_queue,
            state: ScreencopyState::default(),
            manager: None,
            frame: None,
        }
    }

    fn dispatch_timeout(&mut self, timeout: Duration) -> Result<(), ShotCopyError> {
        if self.event_queue.dispatch_pending(&mut self.state)? > 0 {
            return Ok(());
        }
        self.event_queue.flush().map_err(lost)?;

        let Some(guard) = self.event_queue.prepare_read() else {
            // events were queued meanwhile
            self.event_queue.dispatch_pending(&mut self.state)?;
            return Ok(());
        };

        let readable = {
            let mut fds = [PollFd::new(guard.connection_fd(), PollFlags::POLLIN)];
            // rounded up, a zero timeout would spin until the deadline
            let millis = timeout.as_micros().div_ceil(1000).min(u16::MAX as u128) as u16;
            loop {
                match poll(&mut fds, PollTimeout::from(millis)) {
                    Ok(ready) => break ready > 0,
                    Err(nix::errno::Errno::EINTR) => continue,
                    Err(errno) => return Err(lost(WaylandError::Io(errno.into()))),
                }
            }
        };
        if !readable {
            return Ok(());
        }

        match guard.read() {
            Ok(_) => {}
            Err(WaylandError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(lost(e)),
        }
        self.event_queue.dispatch_pending(&mut self.state)?;
        Ok(())
    }
}

fn lost(error: WaylandError) -> ShotCopyError {
    ShotCopyError::ConnectionLost(DispatchError::Backend(error))
}

impl Transport for WaylandTransport {
    type Shm = WlShm;
    type Manager = ZwlrScreencopyManagerV1;
    type Output = WlOutput;
    type Handle = WlBuffer;

    fn discover(
        &mut self,
        deadline: Option<Instant>,
    ) -> Result<Option<CapabilitySet>, ShotCopyError> {
        let qh = self.event_queue.handle();
        let display = self.connection.display();
        let _registry = display.get_registry(&qh, ());
        match deadline {
            None => {
                self.event_queue.roundtrip(&mut self.state)?;
            }
            Some(deadline) => {
                let _sync = display.sync(&qh, ());
                while !self.state.synced {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        tracing::debug!("Registry roundtrip unanswered");
                        return Ok(None);
                    }
                    self.dispatch_timeout(remaining)?;
                }
            }
        }
        self.state.capabilities.seal();
        Ok(Some(self.state.capabilities.clone()))
    }

    fn capture_output(
        &mut self,
        Capabilities {
            shm,
            screencopy_manager,
            output,
        }: Capabilities,
        overlay_cursor: bool,
    ) -> Result<(), ShotCopyError> {
        let qh = self.event_queue.handle();
        tracing::debug!("Capture output, overlay_cursor: {overlay_cursor}");
        let frame = screencopy_manager.capture_output(overlay_cursor as i32, &output, &qh, ());
        self.state.shm = Some(shm);
        self.state.session = FrameSession::new();
        self.frame = Some(frame);
        self.manager = Some(screencopy_manager);
        Ok(())
    }

    fn dispatch_once(&mut self, timeout: Option<Duration>) -> Result<(), ShotCopyError> {
        match timeout {
            Some(timeout) => self.dispatch_timeout(timeout),
            None => {
                self.event_queue.blocking_dispatch(&mut self.state)?;
                Ok(())
            }
        }
    }

    fn session(&mut self) -> &mut FrameSession<WlBuffer> {
        &mut self.state.session
    }

    fn close(mut self) {
        self.state.session.release();
        if let Some(frame) = self.frame.take() {
            frame.destroy();
        }
        if let Some(manager) = self.manager.take() {
            manager.destroy();
        }
        if let Err(e) = self.connection.flush() {
            tracing::debug!("Flush on close failed: {e}");
        }
        tracing::debug!("Disconnect from compositor");
    }
}
