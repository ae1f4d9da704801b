use clap::Args;
use log::LevelFilter;

#[derive(Args, Debug)]
pub struct VerbosityFlag {
    #[arg(short, long, global = true, help = "Set the verbosity to quiet")]
    quiet: bool,

    #[arg(short, long, global = true, help = "Set the verbosity to verbose")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Set the verbosity to debug")]
    debug: bool,

    #[arg(short, long, global = true, help = "Set the verbosity to trace")]
    trace: bool,
}

impl VerbosityFlag {
    /// Returns the log level filter corresponding to the given verbosity flags.
    ///
    /// The most verbose flag wins, except that quiet overrides everything.
    pub fn log_level_filter(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Off
        } else if self.trace {
            LevelFilter::Trace
        } else if self.debug {
            LevelFilter::Debug
        } else if self.verbose {
            LevelFilter::Info
        } else {
            LevelFilter::Warn
        }
    }
}
