use std::path::PathBuf;

use clap::Parser;

use crate::rewrite::{IdRange, RewriteConfig};

pub const DEFAULT_PATH_PREFIXES: &str = "/export/home/:/home/:/var/mail/:/tmp/:/var/tmp/";

#[derive(Debug, Parser)]
#[command(
    name = "trailshade",
    version,
    about = "\
Pseudonymizes Solaris BSM audit trails so they can be shared for research
without disclosing identities, hostnames, filesystem layouts or timing.
Reads plain or gzip-compressed trails and writes an equivalent trail to
standard output with identifiers replaced by consistent random pseudonyms."
)]
pub struct Opt {
    /// Pseudonymize pathnames matching one of these colon-separated
    /// prefixes. Trailing slashes are significant.
    #[arg(short = 'd', value_name = "LIST", default_value = DEFAULT_PATH_PREFIXES)]
    pub path_prefixes: String,

    /// Don't pseudonymize pathnames.
    #[arg(short = 'D')]
    pub no_paths: bool,

    /// Pseudonymize user IDs within this interval. The lower system uids
    /// and "nobody" stay recognizable with the default.
    #[arg(short = 'u', value_name = "MIN:MAX", value_parser = parse_id_range,
          default_value = "200:60000")]
    pub uid_range: IdRange,

    /// Don't pseudonymize user IDs.
    #[arg(short = 'U')]
    pub no_uids: bool,

    /// Pseudonymize group IDs within this interval.
    #[arg(short = 'g', value_name = "MIN:MAX", value_parser = parse_id_range,
          default_value = "10:60000")]
    pub gid_range: IdRange,

    /// Don't pseudonymize group IDs.
    #[arg(short = 'G')]
    pub no_gids: bool,

    /// Pseudonymize process IDs within this interval.
    #[arg(short = 'p', value_name = "MIN:MAX", value_parser = parse_id_range,
          default_value = "500:65535")]
    pub pid_range: IdRange,

    /// Don't pseudonymize process IDs.
    #[arg(short = 'P')]
    pub no_pids: bool,

    /// Shift all timestamps back by up to this many seconds.
    #[arg(short = 's', value_name = "SECONDS", default_value_t = 604_800)]
    pub time_shift: i64,

    /// Don't shift timestamps.
    #[arg(short = 'S')]
    pub no_time: bool,

    /// Don't pseudonymize IPv4/IPv6 addresses.
    #[arg(short = 'A')]
    pub no_addrs: bool,

    /// Don't blank exec arguments and exec environment tokens.
    #[arg(short = 'E')]
    pub no_exec: bool,

    /// Compress the output stream with gzip.
    #[arg(short = 'z')]
    pub gzip: bool,

    /// Log the configuration and every new mapping to standard error.
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Audit trail files to pseudonymize; standard input if none given.
    pub files: Vec<PathBuf>,
}

impl Opt {
    /// Turns the raw options into the rewrite configuration. A degenerate
    /// range or shift doesn't fail the run, it just switches that class
    /// off.
    pub fn rewrite_config(&self) -> RewriteConfig {
        fn id_range(range: IdRange, disabled: bool) -> Option<IdRange> {
            if disabled || range.min >= range.max {
                None
            } else {
                Some(range)
            }
        }

        let path_prefixes = if self.no_paths {
            None
        } else {
            Some(
                self.path_prefixes
                    .split(':')
                    .filter(|p| !p.is_empty())
                    .map(|p| p.as_bytes().to_vec())
                    .collect(),
            )
        };

        let time_shift_max = if self.no_time || self.time_shift <= 0 {
            None
        } else {
            Some(self.time_shift.min(u32::MAX as i64) as u32)
        };

        RewriteConfig {
            uids: id_range(self.uid_range, self.no_uids),
            gids: id_range(self.gid_range, self.no_gids),
            pids: id_range(self.pid_range, self.no_pids),
            path_prefixes,
            addrs: !self.no_addrs,
            exec_args: !self.no_exec,
            time_shift_max,
        }
    }
}

fn parse_id_range(s: &str) -> Result<IdRange, String> {
    let (min, max) = s
        .split_once(':')
        .ok_or_else(|| format!("expected MIN:MAX, got {s:?}"))?;
    let min = min
        .parse()
        .map_err(|_| format!("invalid minimum id {min:?}"))?;
    let max = max
        .parse()
        .map_err(|_| format!("invalid maximum id {max:?}"))?;
    Ok(IdRange { min, max })
}
