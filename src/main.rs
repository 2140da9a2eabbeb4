mod cli;
mod error;
mod pseudonym;
mod random;
mod rewrite;
mod ring;
mod stream;
mod tokens;
mod trail;

use std::io;
use std::io::Write;

use clap::Parser;
use log::info;

use crate::error::Error;
use crate::random::RandomSource;
use crate::rewrite::{RewriteConfig, Rewriter};
use crate::ring::RingReader;
use crate::stream::{TrailInput, TrailOutput};

fn main() {
    let opt = cli::Opt::parse();

    // -v raises the default to info so the configuration dump and the
    // [map] lines show up; RUST_LOG still wins if set.
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if opt.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    });
    builder.parse_default_env();
    builder.init();

    if let Err(err) = run(&opt) {
        eprintln!("trailshade: {err}");
        std::process::exit(1);
    }
}

fn run(opt: &cli::Opt) -> Result<(), Error> {
    let config = opt.rewrite_config();
    log_config(&config);

    let mut rewriter = Rewriter::new(config, RandomSource::from_clock());
    let mut output = TrailOutput::new(io::stdout().lock(), opt.gzip);
    let mut bytes_since_flush = 0u64;

    if opt.files.is_empty() {
        let input = TrailInput::stdin_buffered()?;
        let mut reader = RingReader::new(input);
        trail::process_trail(
            &mut reader,
            &mut rewriter,
            &mut output,
            &mut bytes_since_flush,
            "stdin",
        )?;
    } else {
        for path in &opt.files {
            let input = match TrailInput::open(path) {
                Ok(input) => input,
                Err(err) => {
                    eprintln!("trailshade: could not open {}: {err}", path.display());
                    std::process::exit(1);
                }
            };
            let mut reader = RingReader::new(input);
            trail::process_trail(
                &mut reader,
                &mut rewriter,
                &mut output,
                &mut bytes_since_flush,
                &path.display().to_string(),
            )?;
        }
    }

    let mut sink = output.finish()?;
    sink.flush()?;
    Ok(())
}

fn log_config(config: &RewriteConfig) {
    match &config.path_prefixes {
        Some(prefixes) => {
            let list: Vec<_> = prefixes
                .iter()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .collect();
            info!("pathnames:      yes [{}]", list.join(":"));
        }
        None => info!("pathnames:      no"),
    }
    match &config.uids {
        Some(r) => info!("user ids:       yes [{}:{}]", r.min, r.max),
        None => info!("user ids:       no"),
    }
    match &config.gids {
        Some(r) => info!("group ids:      yes [{}:{}]", r.min, r.max),
        None => info!("group ids:      no"),
    }
    match &config.pids {
        Some(r) => info!("process ids:    yes [{}:{}]", r.min, r.max),
        None => info!("process ids:    no"),
    }
    match config.time_shift_max {
        Some(max) => info!("timestamps:     yes [{max} seconds]"),
        None => info!("timestamps:     no"),
    }
    info!(
        "inet addresses: {}",
        if config.addrs { "yes" } else { "no" }
    );
    info!(
        "exec args/env:  {}",
        if config.exec_args { "yes" } else { "no" }
    );
}
