use crate::fiddle::{self, UnrecognizedFiddle};
use crate::filter::ChannelFilterBuilder;
use crate::model::{
    BisectRequest, ChannelFilter, FiddleSource, ReleaseChannel, RunRequest, Setup, TestRequest,
};
use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "fiddle-runner",
    version,
    about = "Run or bisect a fiddle against an execution host"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the fiddle once and report the result
    Test(TestArgs),
    /// Run the fiddle across a version range to find where it breaks
    Bisect(BisectArgs),
    /// Anything else is not a runner invocation and is quietly ignored
    #[command(external_subcommand)]
    Other(Vec<OsString>),
}

#[derive(Debug, Args, Clone)]
pub struct TestArgs {
    /// Fiddle to run: a local directory or a 32-char hex gist id (default: cwd)
    #[arg(long)]
    pub fiddle: Option<String>,

    /// Application version to test with
    #[arg(long)]
    pub version: Option<String>,

    #[command(flatten)]
    pub channels: ChannelArgs,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Debug, Args, Clone)]
pub struct BisectArgs {
    /// Last known good version
    pub good_version: String,

    /// First known bad version
    pub bad_version: String,

    /// Fiddle to run: a local directory or a 32-char hex gist id (default: cwd)
    #[arg(long)]
    pub fiddle: Option<String>,

    #[command(flatten)]
    pub channels: ChannelArgs,

    #[command(flatten)]
    pub wait: WaitArgs,
}

/// Paired show/hide channel flags. Within each pair the flag given last on
/// the command line wins; clap's `overrides_with` handles that resolution.
#[derive(Debug, Args, Clone, Default)]
pub struct ChannelArgs {
    /// Include nightly releases
    #[arg(long, overrides_with = "no_nightlies")]
    pub nightlies: bool,

    /// Exclude nightly releases
    #[arg(long, overrides_with = "nightlies")]
    pub no_nightlies: bool,

    /// Include beta releases
    #[arg(long, overrides_with = "no_betas")]
    pub betas: bool,

    /// Exclude beta releases
    #[arg(long, overrides_with = "betas")]
    pub no_betas: bool,
}

impl ChannelArgs {
    /// Fold the surviving flags into a filter. At most one flag per channel
    /// is set once clap has applied last-wins within each pair.
    fn to_filter(&self) -> ChannelFilter {
        let mut builder = ChannelFilterBuilder::new();
        for (channel, show, hide) in [
            (ReleaseChannel::Nightly, self.nightlies, self.no_nightlies),
            (ReleaseChannel::Beta, self.betas, self.no_betas),
        ] {
            if show {
                builder = builder.flag(channel, true);
            } else if hide {
                builder = builder.flag(channel, false);
            }
        }
        builder.build()
    }
}

#[derive(Debug, Args, Clone, Default)]
pub struct WaitArgs {
    /// Give up and treat the run as invalid if no verdict arrives in time
    #[arg(long)]
    pub timeout: Option<humantime::Duration>,
}

/// What an invocation asks of the process, if anything.
#[derive(Debug)]
pub enum Invocation {
    /// Dispatch this request and wait for its verdict.
    Run {
        request: RunRequest,
        timeout: Option<Duration>,
    },
    /// The fiddle argument was unusable; report it and dispatch nothing.
    InvalidFiddle(UnrecognizedFiddle),
    /// Not a runner command line; do nothing at all.
    NoOp,
}

/// Parse argv into a run request.
///
/// The working directory is injected rather than read from process state so
/// parsing stays deterministic under test. Help, version and usage errors are
/// printed by clap and collapse to `NoOp`; exit-code mapping belongs to the
/// verdict path alone.
pub fn parse<I, T>(argv: I, cwd: &Path) -> Invocation
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(argv) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return Invocation::NoOp;
        }
    };

    match cli.command {
        Some(Command::Test(args)) => {
            let fiddle = match resolve_fiddle(args.fiddle.as_deref(), cwd) {
                Ok(fiddle) => fiddle,
                Err(err) => return Invocation::InvalidFiddle(err),
            };
            let setup = Setup::new(fiddle, args.channels.to_filter(), args.version);
            Invocation::Run {
                request: RunRequest::Test(TestRequest { setup }),
                timeout: args.wait.timeout.map(Into::into),
            }
        }
        Some(Command::Bisect(args)) => {
            let fiddle = match resolve_fiddle(args.fiddle.as_deref(), cwd) {
                Ok(fiddle) => fiddle,
                Err(err) => return Invocation::InvalidFiddle(err),
            };
            let setup = Setup::new(fiddle, args.channels.to_filter(), None);
            Invocation::Run {
                request: RunRequest::Bisect(BisectRequest {
                    bad_version: args.bad_version,
                    good_version: args.good_version,
                    setup,
                }),
                timeout: args.wait.timeout.map(Into::into),
            }
        }
        Some(Command::Other(_)) | None => Invocation::NoOp,
    }
}

/// A value naming an existing directory is taken as a local fiddle before
/// the gist-id / unknown discrimination runs.
fn resolve_fiddle(raw: Option<&str>, cwd: &Path) -> Result<FiddleSource, UnrecognizedFiddle> {
    if let Some(value) = raw {
        if Path::new(value).is_dir() {
            return Ok(FiddleSource::FilePath(value.to_owned()));
        }
    }
    fiddle::resolve(raw, cwd)
}
