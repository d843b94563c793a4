use wayland_client::{protocol::wl_shm::Format, WEnum};

use crate::{
    capturedimage::{materialize, CapturedImage},
    shm::{self, BufferHandle, BufferRegistrar, FrameFormat, SharedPixelBuffer},
    shotcopyerror::ShotCopyError,
};

/// Where one capture request stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// capture sent, waiting for buffer requirements
    Requested,
    /// shm buffer exists, copy not yet sent
    BufferNegotiated,
    /// copy sent, waiting for ready or failed
    Copying,
    Ready,
    Failed,
}

/// What the compositor tells us about the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameEvent {
    Buffer {
        format: WEnum<Format>,
        width: u32,
        height: u32,
        stride: u32,
    },
    Flags {
        y_invert: bool,
    },
    Ready,
    Failed,
}

/// State of a single capture, mutated only from the frame events
#[derive(Debug)]
pub struct FrameSession<H: BufferHandle> {
    state: SessionState,
    y_invert: bool,
    buffer: Option<SharedPixelBuffer<H>>,
    failure: Option<ShotCopyError>,
}

impl<H: BufferHandle> Default for FrameSession<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: BufferHandle> FrameSession<H> {
    pub fn new() -> Self {
        Self {
            state: SessionState::Requested,
            y_invert: false,
            buffer: None,
            failure: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Ready | SessionState::Failed)
    }

    pub fn y_invert(&self) -> bool {
        self.y_invert
    }

    pub fn buffer(&self) -> Option<&SharedPixelBuffer<H>> {
        self.buffer.as_ref()
    }

    pub fn buffer_mut(&mut self) -> Option<&mut SharedPixelBuffer<H>> {
        self.buffer.as_mut()
    }

    /// Feed one compositor event.
    ///
    /// On the buffer event the shm buffer is allocated through `registrar` and, once it
    /// exists, `copy` is called with it before this returns.
    pub fn handle<R, F>(&mut self, event: FrameEvent, registrar: &R, copy: F)
    where
        R: BufferRegistrar<Handle = H>,
        F: FnOnce(&H),
    {
        if self.is_terminal() {
            tracing::debug!("Ignore {event:?}, session already {:?}", self.state);
            return;
        }
        match event {
            FrameEvent::Buffer {
                format,
                width,
                height,
                stride,
            } => self.on_buffer(format, width, height, stride, registrar, copy),
            FrameEvent::Flags { y_invert } => {
                tracing::debug!("Receive Flags event, y_invert: {y_invert}");
                self.y_invert = y_invert;
            }
            FrameEvent::Ready => {
                tracing::info!("Receive Ready event");
                if self.buffer.is_some() {
                    self.state = SessionState::Ready;
                } else {
                    tracing::error!("Ready without a buffer");
                    self.fail(ShotCopyError::CopyFailed);
                }
            }
            FrameEvent::Failed => {
                tracing::error!("Failed to copy frame");
                self.fail(ShotCopyError::CopyFailed);
            }
        }
    }

    fn on_buffer<R, F>(
        &mut self,
        format: WEnum<Format>,
        width: u32,
        height: u32,
        stride: u32,
        registrar: &R,
        copy: F,
    ) where
        R: BufferRegistrar<Handle = H>,
        F: FnOnce(&H),
    {
        if self.state != SessionState::Requested {
            tracing::warn!("Ignore another Buffer event in {:?}", self.state);
            return;
        }
        let format = match format {
            WEnum::Value(value) => value,
            WEnum::Unknown(code) => {
                tracing::error!("Unknown format :{code}");
                self.fail(ShotCopyError::UnsupportedFormat(code));
                return;
            }
        };
        tracing::info!("Format is {format:?}, {width}x{height}, stride {stride}");
        let frame_format = FrameFormat {
            format,
            width,
            height,
            stride,
        };
        match shm::allocate(registrar, frame_format) {
            Ok(buffer) => {
                self.state = SessionState::BufferNegotiated;
                copy(buffer.handle());
                self.buffer = Some(buffer);
                self.state = SessionState::Copying;
            }
            Err(e) => {
                tracing::error!("Failed to create buffer: {e}");
                self.fail(e.into());
            }
        }
    }

    /// Move to [SessionState::Failed] and release the buffer, the first reason is kept
    pub fn fail(&mut self, reason: ShotCopyError) {
        self.state = SessionState::Failed;
        self.buffer = None;
        if self.failure.is_none() {
            self.failure = Some(reason);
        }
    }

    /// Drop the buffer whatever state the session is in
    pub fn release(&mut self) {
        self.buffer = None;
    }

    /// Hand out the filled buffer of a ready session, or the reason there is none.
    /// The buffer is released in every case but [SessionState::Ready].
    pub fn finish(&mut self) -> Result<CompletedFrame<H>, ShotCopyError> {
        match (self.state, self.buffer.take()) {
            (SessionState::Ready, Some(buffer)) => Ok(CompletedFrame {
                buffer,
                y_invert: self.y_invert,
            }),
            _ => Err(self.failure.take().unwrap_or(ShotCopyError::CopyFailed)),
        }
    }
}

/// A buffer the compositor has filled
#[derive(Debug)]
pub struct CompletedFrame<H: BufferHandle> {
    buffer: SharedPixelBuffer<H>,
    y_invert: bool,
}

impl<H: BufferHandle> CompletedFrame<H> {
    /// Copy the pixels out, the shm buffer goes away with `self`
    pub fn into_image(self) -> Result<CapturedImage, ShotCopyError> {
        materialize(self.buffer.data(), self.buffer.format(), self.y_invert)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::shm::testing::{CountingHandle, CountingRegistrar};

    fn buffer_event(format: Format) -> FrameEvent {
        FrameEvent::Buffer {
            format: WEnum::Value(format),
            width: 4,
            height: 2,
            stride: 16,
        }
    }

    fn no_copy(_: &CountingHandle) {
        panic!("copy must not be issued");
    }

    #[test]
    fn buffer_event_allocates_and_copies() {
        let registrar = CountingRegistrar::default();
        let mut session = FrameSession::new();
        let copies = Cell::new(0);
        session.handle(buffer_event(Format::Xrgb8888), &registrar, |_| {
            copies.set(copies.get() + 1)
        });
        assert_eq!(session.state(), SessionState::Copying);
        assert_eq!(copies.get(), 1);
        assert_eq!(registrar.live.get(), 1);
        assert_eq!(session.buffer().unwrap().data().len(), 32);
    }

    #[test]
    fn second_buffer_event_is_ignored() {
        let registrar = CountingRegistrar::default();
        let mut session = FrameSession::new();
        session.handle(buffer_event(Format::Xrgb8888), &registrar, |_| {});
        session.handle(buffer_event(Format::Argb8888), &registrar, no_copy);
        assert_eq!(registrar.registered.get(), 1);
        assert_eq!(
            session.buffer().unwrap().format().format,
            Format::Xrgb8888
        );
    }

    #[test]
    fn flags_do_not_change_state() {
        let registrar = CountingRegistrar::default();
        let mut session = FrameSession::new();
        session.handle(FrameEvent::Flags { y_invert: true }, &registrar, no_copy);
        assert_eq!(session.state(), SessionState::Requested);
        assert!(session.y_invert());
    }

    #[test]
    fn allocation_failure_skips_copy() {
        let registrar = CountingRegistrar::default();
        let mut session = FrameSession::new();
        let event = FrameEvent::Buffer {
            format: WEnum::Value(Format::Xrgb8888),
            width: 0,
            height: 0,
            stride: 0,
        };
        session.handle(event, &registrar, no_copy);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(matches!(
            session.finish(),
            Err(ShotCopyError::AllocationFailed(_))
        ));
    }

    #[test]
    fn unknown_format_code_fails() {
        let registrar = CountingRegistrar::default();
        let mut session = FrameSession::new();
        let event = FrameEvent::Buffer {
            format: WEnum::Unknown(0xdead),
            width: 4,
            height: 2,
            stride: 16,
        };
        session.handle(event, &registrar, no_copy);
        assert!(matches!(
            session.finish(),
            Err(ShotCopyError::UnsupportedFormat(0xdead))
        ));
        assert_eq!(registrar.registered.get(), 0);
    }

    #[test]
    fn failed_event_releases_buffer() {
        let registrar = CountingRegistrar::default();
        let mut session = FrameSession::new();
        session.handle(buffer_event(Format::Xrgb8888), &registrar, |_| {});
        session.handle(FrameEvent::Failed, &registrar, no_copy);
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(registrar.live.get(), 0);
        assert!(matches!(session.finish(), Err(ShotCopyError::CopyFailed)));
    }

    #[test]
    fn ready_without_buffer_fails() {
        let registrar = CountingRegistrar::default();
        let mut session = FrameSession::<CountingHandle>::new();
        session.handle(FrameEvent::Ready, &registrar, no_copy);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn events_after_terminal_are_ignored() {
        let registrar = CountingRegistrar::default();
        let mut session = FrameSession::new();
        session.handle(FrameEvent::Failed, &registrar, no_copy);
        session.handle(buffer_event(Format::Xrgb8888), &registrar, no_copy);
        session.handle(FrameEvent::Ready, &registrar, no_copy);
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(registrar.registered.get(), 0);
    }

    #[test]
    fn ready_frame_materializes_then_releases() {
        let registrar = CountingRegistrar::default();
        let mut session = FrameSession::new();
        session.handle(buffer_event(Format::Xbgr8888), &registrar, |_| {});
        session
            .buffer_mut()
            .unwrap()
            .data_mut()
            .copy_from_slice(&[7; 32]);
        session.handle(FrameEvent::Ready, &registrar, no_copy);
        assert_eq!(session.state(), SessionState::Ready);

        let frame = session.finish().unwrap();
        assert_eq!(registrar.live.get(), 1);
        let image = frame.into_image().unwrap();
        assert_eq!(registrar.live.get(), 0);
        assert_eq!(image.data.len(), 32);
        assert!(image.data.chunks_exact(4).all(|p| p == [7, 7, 7, 255]));
    }

    #[test]
    fn unsupported_ready_frame_is_released() {
        let registrar = CountingRegistrar::default();
        let mut session = FrameSession::new();
        session.handle(buffer_event(Format::Rgb565), &registrar, |_| {});
        session.handle(FrameEvent::Ready, &registrar, no_copy);
        let result = session.finish().unwrap().into_image();
        assert!(matches!(result, Err(ShotCopyError::UnsupportedFormat(_))));
        assert_eq!(registrar.live.get(), 0);
    }
}
