// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::*;
use colored::Colorize;
use ljd_ast::{outline, process, AnalysisFailure, Listing, PipelineOptions};
use log::{debug, LevelFilter};
use simplelog::{Config, TermLogger, TerminalMode};

#[derive(Parser)]
#[clap(
    name = env!("CARGO_BIN_NAME"),
    about = "Structures warped LuaJIT function listings into nested Lua control flow and prints an outline of each function",
    rename_all = "kebab-case",
    author,
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Args {
    /// Listing file, or a directory searched recursively for `*.toml` listings
    #[clap(long = "input", short = 'i')]
    pub input: PathBuf,

    /// TOML file with pipeline options; replaces the flags below
    #[clap(long = "options", short = 'o')]
    pub options: Option<PathBuf>,

    /// Log each pipeline stage
    #[clap(long = "verbose", short = 'v')]
    pub verbose: bool,

    /// Log every rewrite
    #[clap(long = "trace")]
    pub trace: bool,

    #[clap(flatten)]
    pub pipeline: PipelineOptions,
}

struct Failure {
    file: PathBuf,
    failure: AnalysisFailure,
}

fn listings(input: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !input.is_dir() {
        return Ok(vec![input.to_path_buf()]);
    }
    let pattern = input.join("**").join("*.toml");
    let pattern = pattern
        .to_str()
        .with_context(|| format!("non UTF-8 path {}", input.display()))?;
    let mut paths = glob::glob(pattern)?.collect::<Result<Vec<_>, _>>()?;
    paths.sort();
    if paths.is_empty() {
        bail!("no listings found under {}", input.display());
    }
    Ok(paths)
}

/// Failures nested anywhere under a decompiled function.
fn nested_failures(
    function: &ljd_ast::StructuredFunction,
    file: &Path,
    failures: &mut Vec<Failure>,
) {
    for child in &function.children {
        match child {
            Ok(child) => nested_failures(child, file, failures),
            Err(failure) => failures.push(Failure {
                file: file.to_path_buf(),
                failure: failure.clone(),
            }),
        }
    }
}

fn execute(args: &Args) -> anyhow::Result<Vec<Failure>> {
    let options = match &args.options {
        Some(path) => PipelineOptions::from_toml_file(path)?,
        None => args.pipeline.clone(),
    };
    debug!("[ljd] options: {options:?}");

    let mut failures = vec![];
    for path in listings(&args.input)? {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let listing = Listing::from_toml_str(&text)
            .with_context(|| format!("invalid listing {}", path.display()))?;
        debug!("[ljd] {}: {} functions", path.display(), listing.functions.len());

        for function in listing.functions {
            match process(function, &options) {
                Ok(structured) => {
                    print!("{}", outline(&structured));
                    nested_failures(&structured, &path, &mut failures);
                }
                Err(failure) => failures.push(Failure {
                    file: path.clone(),
                    failure,
                }),
            }
        }
    }
    Ok(failures)
}

fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();
    let level = if args.trace {
        LevelFilter::Trace
    } else if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    // A second logger can only come from a test harness; keep the first.
    TermLogger::init(level, Config::default(), TerminalMode::Mixed).ok();

    debug!("ljd version: {}", env!("CARGO_PKG_VERSION"));

    match execute(&args) {
        Ok(failures) if failures.is_empty() => (),
        Ok(failures) => {
            eprintln!("{}", format!("{} functions failed:", failures.len()).bold());
            for Failure { file, failure } in &failures {
                let line = format!("{}: {failure}", file.display());
                if failure.is_internal() {
                    eprintln!("{}", line.red());
                } else {
                    eprintln!("{line}");
                }
            }
            std::process::exit(2);
        }
        Err(err) => {
            let err = format!("{:?}", err);
            eprintln!("{}", err.bold().red());
            std::process::exit(1);
        }
    }
}
