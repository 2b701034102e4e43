//! Command line front end.

use crate::config::{
    Backoff, BoundedConfig, KeyMode, UnboundedConfig, Workload, WorkloadConfig, DEFAULT_OBJECTS,
    DEFAULT_SECONDS,
};
use crate::table::Backend;
use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;

/// Parsed command line.
#[derive(Clone, Debug, PartialEq)]
pub struct Cli {
    pub config: WorkloadConfig,
    /// Flags that were not recognised and have been dropped, in the order they were found.
    pub unknown: Vec<String>,
}

pub fn command() -> Command {
    Command::new("rcu_lookup_bench")
        .about("Measures lookup throughput of pinned readers against a table under insert/remove churn")
        .arg(
            Arg::new("core")
                .short('c')
                .long("core")
                .visible_alias("cores")
                .value_name("ID")
                .help("Core to run on, repeatable; the last one runs the mutator")
                .action(ArgAction::Append)
                .num_args(1..)
                .value_parser(value_parser!(usize))
                .conflicts_with("threads"),
        )
        .arg(
            Arg::new("seconds")
                .short('s')
                .long("seconds")
                .value_name("SECONDS")
                .help("Run time in seconds")
                .default_value("10")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("objects")
                .short('o')
                .long("objects")
                .value_name("OBJECTS")
                .help("Number of keys the mutator inserts and removes")
                .default_value("1")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .value_name("THREADS")
                .help("Unbounded run with this many readers, stopped by SIGINT or SIGTERM")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .value_name("BACKEND")
                .help("Table implementation: rcu or spin-rwlock")
                .default_value("rcu")
                .value_parser(str::parse::<Backend>),
        )
        .arg(
            Arg::new("key-mode")
                .long("key-mode")
                .value_name("MODE")
                .help("fixed: every reader looks up --lookup-key; disjoint: each reader owns a key set")
                .default_value("fixed")
                .value_parser(["fixed", "disjoint"]),
        )
        .arg(
            Arg::new("lookup-key")
                .long("lookup-key")
                .value_name("KEY")
                .help("Key looked up in fixed mode")
                .default_value("0")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("backoff")
                .long("backoff")
                .value_name("BACKOFF")
                .help("Reader pause between lookups: none, yield or a spin count")
                .default_value("none")
                .value_parser(str::parse::<Backoff>),
        )
}

/// Parse `args` (program name first). Unknown flags are collected in `Cli::unknown` and skipped
/// together with a bare value right after them. Stray words that are no option's value are
/// skipped without being reported. Every other problem is returned as the clap error.
pub fn parse_from<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let mut unknown = Vec::new();
    loop {
        match command().try_get_matches_from(&args) {
            Ok(matches) => {
                return Ok(Cli {
                    config: to_config(&matches),
                    unknown,
                })
            }
            Err(e) if e.kind() == ErrorKind::UnknownArgument => {
                let flag = match e.get(ContextKind::InvalidArg) {
                    Some(ContextValue::String(flag)) => flag.clone(),
                    _ => return Err(e),
                };
                let stray = !flag.starts_with('-');
                let pos = (1..args.len()).find(|&i| {
                    let a = args[i].to_string_lossy();
                    if stray {
                        a == flag.as_str() && !takes_value(&args[i - 1].to_string_lossy())
                    } else {
                        a == flag.as_str() || a.starts_with(&format!("{}=", flag))
                    }
                });
                let pos = match pos {
                    Some(pos) => pos,
                    None => return Err(e),
                };
                let removed = args.remove(pos);
                if stray {
                    debug!("ignoring stray argument {}", flag);
                    continue;
                }
                // A bare word right after an unknown flag is its value.
                let inline_value = removed.to_string_lossy().contains('=');
                let bare_next = args
                    .get(pos)
                    .map_or(false, |a| !a.to_string_lossy().starts_with('-'));
                if !inline_value && bare_next {
                    let value = args.remove(pos);
                    debug!("dropping unknown option {} {:?}", flag, value);
                } else {
                    debug!("dropping unknown option {}", flag);
                }
                unknown.push(flag);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Whether `arg` is a known option that expects its value in the next argument.
fn takes_value(arg: &str) -> bool {
    let name = match (arg.strip_prefix("--"), arg.strip_prefix('-')) {
        (Some(long), _) => long,
        (None, Some(short)) => short,
        (None, None) => return false,
    };
    let cmd = command();
    let known = cmd.get_arguments().any(|a| {
        let named = if arg.starts_with("--") {
            a.get_long() == Some(name)
                || a.get_visible_aliases().map_or(false, |aliases| aliases.contains(&name))
        } else {
            name.len() == 1 && a.get_short().map_or(false, |c| name.starts_with(c))
        };
        named && a.get_action().takes_values()
    });
    known
}

fn to_config(matches: &ArgMatches) -> WorkloadConfig {
    let key_mode = match matches.get_one::<String>("key-mode").map(String::as_str) {
        Some("disjoint") => KeyMode::Disjoint,
        _ => KeyMode::Fixed(matches.get_one::<u32>("lookup-key").copied().unwrap_or(0)),
    };
    let workload = Workload {
        key_mode,
        backoff: matches.get_one::<Backoff>("backoff").copied().unwrap_or_default(),
        backend: matches.get_one::<Backend>("backend").copied().unwrap_or_default(),
        ..Workload::default()
    };

    if let Some(&reader_threads) = matches.get_one::<usize>("threads") {
        return WorkloadConfig::Unbounded(UnboundedConfig {
            reader_threads,
            workload,
        });
    }
    WorkloadConfig::Bounded(BoundedConfig {
        core_ids: matches
            .get_many::<usize>("core")
            .map(|ids| ids.copied().collect())
            .unwrap_or_default(),
        duration_seconds: matches
            .get_one::<u64>("seconds")
            .copied()
            .unwrap_or(DEFAULT_SECONDS),
        object_count: matches
            .get_one::<u32>("objects")
            .copied()
            .unwrap_or(DEFAULT_OBJECTS),
        workload,
    })
}
