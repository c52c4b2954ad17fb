use std::path::PathBuf;

use clap::{builder::PossibleValuesParser, Parser, Subcommand, ValueEnum};

use retis_link::LinkVariant;

/// Inspect and manage BPF links pinned in bpffs.
#[derive(Parser, Debug)]
#[command(name = "retis-link", version, arg_required_else_help = true)]
pub(crate) struct Cli {
    #[arg(
        long,
        value_parser=PossibleValuesParser::new(["error", "warn", "info", "debug", "trace"]),
        default_value = "info",
        help = "Log level",
    )]
    pub(crate) log_level: String,
    #[arg(long, help = "Path to a YAML configuration file")]
    pub(crate) config: Option<PathBuf>,
    #[arg(
        long,
        help = "bpffs directory pins are relative to (default: /sys/fs/bpf, or the one set in the configuration file)"
    )]
    pub(crate) bpffs: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Show a pinned link.
    Show {
        #[arg(help = "Pin name, relative to the bpffs directory, or absolute path")]
        pin: PathBuf,
        #[arg(long, value_enum, help = "Fail if the pinned link is not of this kind")]
        expect: Option<Expect>,
        #[arg(long, help = "Open the pin read-only")]
        read_only: bool,
    },
    /// Remove a pin. The link is detached once nothing references it anymore.
    Unpin {
        #[arg(help = "Pin name, relative to the bpffs directory, or absolute path")]
        pin: PathBuf,
    },
    /// Show the link related features of the running kernel.
    Features,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum Expect {
    Tracing,
    Freplace,
    RawTracepoint,
    Generic,
}

impl From<Expect> for LinkVariant {
    fn from(expect: Expect) -> Self {
        match expect {
            Expect::Tracing => LinkVariant::Tracing,
            Expect::Freplace => LinkVariant::Freplace,
            Expect::RawTracepoint => LinkVariant::RawTracepoint,
            Expect::Generic => LinkVariant::Generic,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn show() {
        let cli = Cli::try_parse_from([
            "retis-link",
            "--log-level",
            "debug",
            "--bpffs",
            "/run/bpf",
            "show",
            "foo",
            "--expect",
            "raw-tracepoint",
        ])
        .unwrap();

        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.bpffs, Some(PathBuf::from("/run/bpf")));
        match cli.command {
            Command::Show {
                pin,
                expect,
                read_only,
            } => {
                assert_eq!(pin, PathBuf::from("foo"));
                assert_eq!(expect, Some(Expect::RawTracepoint));
                assert_eq!(LinkVariant::from(expect.unwrap()), LinkVariant::RawTracepoint);
                assert!(!read_only);
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn invalid() {
        assert!(Cli::try_parse_from(["retis-link", "show", "foo", "--expect", "kprobe"]).is_err());
        assert!(Cli::try_parse_from(["retis-link", "--log-level", "loud", "features"]).is_err());
        assert!(Cli::try_parse_from(["retis-link", "unpin"]).is_err());
    }
}
