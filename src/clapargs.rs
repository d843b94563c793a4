use clap::Parser;

#[derive(Debug, Parser, PartialEq, Eq)]
#[command(
    name = "shotcopy",
    about = "Take one wlr-screencopy shot of the first output",
    long_about = None,
    version,
)]
pub struct ShotCopyCli {
    /// write the shot as png to stdout
    #[arg(long)]
    pub stdout: bool,
    /// paint the cursor into the shot
    #[arg(long, default_value = "false")]
    pub cursor: bool,
    /// give up after this many milliseconds
    #[arg(long, value_name = "MILLIS")]
    pub timeout: Option<u64>,
    /// log debug messages
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = ShotCopyCli::parse_from(["shotcopy"]);
        assert_eq!(
            cli,
            ShotCopyCli {
                stdout: false,
                cursor: false,
                timeout: None,
                debug: false,
            }
        );
    }

    #[test]
    fn all_flags() {
        let cli = ShotCopyCli::parse_from([
            "shotcopy",
            "--stdout",
            "--cursor",
            "--timeout",
            "1500",
            "--debug",
        ]);
        assert!(cli.stdout && cli.cursor && cli.debug);
        assert_eq!(cli.timeout, Some(1500));
    }
}
