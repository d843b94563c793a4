use std::time::{Duration, Instant};

use crate::{
    capturedimage::CapturedImage,
    shotcopyerror::ShotCopyError,
    transport::{Transport, WaylandTransport},
};

/// How to take the shot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    /// paint the cursor into the frame
    pub overlay_cursor: bool,
    /// bound on discovery and copy together, `None` waits forever
    pub timeout: Option<Duration>,
}

/// Capture the first output of the compositor found through `WAYLAND_DISPLAY`
pub fn capture_screen(options: &CaptureOptions) -> Result<CapturedImage, ShotCopyError> {
    let transport = WaylandTransport::connect()?;
    capture_with(transport, options)
}

/// Same as [capture_screen], but logs the failure and gives nothing back
pub fn grab(options: &CaptureOptions) -> Option<CapturedImage> {
    match capture_screen(options) {
        Ok(image) => Some(image),
        Err(e) => {
            tracing::error!("Cannot take screen copy: {e}");
            None
        }
    }
}

/// Run one capture over `transport`, which is closed before returning
pub fn capture_with<T: Transport>(
    mut transport: T,
    options: &CaptureOptions,
) -> Result<CapturedImage, ShotCopyError> {
    let result = drive(&mut transport, options);
    transport.session().release();
    transport.close();
    result
}

fn drive<T: Transport>(
    transport: &mut T,
    options: &CaptureOptions,
) -> Result<CapturedImage, ShotCopyError> {
    let deadline = options
        .timeout
        .map(|timeout| (Instant::now() + timeout, timeout));

    let Some(capabilities) = transport.discover(deadline.map(|(at, _)| at))? else {
        return Err(timed_out(options.timeout.unwrap_or_default()));
    };
    let capabilities = capabilities
        .require()
        .map_err(ShotCopyError::CapabilityMissing)?;
    tracing::info!("All data is ready");

    transport.capture_output(capabilities, options.overlay_cursor)?;

    while !transport.session().is_terminal() {
        let remaining = match deadline {
            Some((at, timeout)) => {
                let remaining = at.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    transport.session().fail(timed_out(timeout));
                    break;
                }
                Some(remaining)
            }
            None => None,
        };
        if let Err(e) = transport.dispatch_once(remaining) {
            tracing::error!("Dispatch failed: {e}");
            transport.session().fail(e);
        }
    }

    let frame = transport.session().finish()?;
    frame.into_image()
}

fn timed_out(timeout: Duration) -> ShotCopyError {
    tracing::error!("Compositor did not finish within {timeout:?}");
    ShotCopyError::Timeout(timeout)
}
