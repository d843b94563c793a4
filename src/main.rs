use std::io::{stdout, BufWriter, Cursor, Write};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use image::ImageFormat;
use libshotcopy::{CaptureOptions, CapturedImage};
use tracing::Level;

mod clapargs;

use clapargs::ShotCopyCli;

fn write_png(image: CapturedImage) -> Result<(), String> {
    let image = image
        .into_dynamic_image()
        .ok_or_else(|| "Image buffer does not match its size".to_string())?;
    let mut buff = Cursor::new(Vec::new());
    image
        .write_to(&mut buff, ImageFormat::Png)
        .map_err(|e| format!("Cannot encode png: {e}"))?;
    let stdout = stdout();
    let mut writer = BufWriter::new(stdout.lock());
    writer
        .write_all(buff.get_ref())
        .and_then(|_| writer.flush())
        .map_err(|e| format!("Picture failed to write: {e}"))
}

fn main() -> ExitCode {
    let args = ShotCopyCli::parse();

    // stdout may carry the picture, keep the log on stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
        .init();

    let options = CaptureOptions {
        overlay_cursor: args.cursor,
        timeout: args.timeout.map(Duration::from_millis),
    };

    let Some(image) = libshotcopy::grab(&options) else {
        return ExitCode::FAILURE;
    };
    tracing::info!(
        "Captured {}x{} ({:?})",
        image.width,
        image.height,
        image.layout
    );

    if args.stdout {
        if let Err(e) = write_png(image) {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
