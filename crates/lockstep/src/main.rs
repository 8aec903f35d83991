// moon: The build system and package manager for MoonBit.
// Copyright (C) 2024 International Digital Economy Academy
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// For inquiries, you can contact us via e-mail at jichuruanjian@idea.edu.cn.

#![warn(clippy::clone_on_ref_ptr)]

use std::{any::Any, io::IsTerminal};

use clap::Parser;
use cli::LockstepSubcommands;
use lockutil::cli::ColorChoice;

mod cli;

use colored::*;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Raised to by `--verbose` when `RUST_LOG` is not set.
const VERBOSE_DIRECTIVES: [&str; 3] = ["lockcore=debug", "lockutil=debug", "lockstep=debug"];

/// Initialize logging and tracing.
///
/// - `RUST_LOG` filters the log output printed to stderr. Without it only
///   warnings are shown, or debug output of the lockstep crates under
///   `--verbose`.
/// - `LOCKSTEP_TRACE` enables Chrome tracing output, filtered by its value.
/// - `--trace` does the same as `LOCKSTEP_TRACE=trace`, writing to
///   `trace.json`. `LOCKSTEP_TRACE` takes precedence when both are given.
///
/// Returns a boxed guard that keeps the tracing system alive.
fn init_tracing(trace_flag: bool, verbose: bool) -> Box<dyn Any> {
    let log_env_set = std::env::var("RUST_LOG").is_ok();
    let trace_env = std::env::var("LOCKSTEP_TRACE").ok();
    let mut filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::WARN.into())
        .from_env_lossy();
    if verbose && !log_env_set {
        for directive in VERBOSE_DIRECTIVES {
            if let Ok(d) = directive.parse::<tracing_subscriber::filter::Directive>() {
                filter = filter.add_directive(d);
            }
        }
    }

    let fmt = tracing_subscriber::fmt::layer()
        .with_ansi(std::io::stderr().is_terminal())
        .with_line_number(log_env_set)
        .with_level(true)
        .with_writer(std::io::stderr);
    let fmt = if !log_env_set {
        fmt.with_target(false).without_time().boxed()
    } else {
        fmt.compact().boxed()
    };

    let chrome_trace = if let Some(env) = trace_env.as_deref() {
        let chrome_filter = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(tracing::Level::TRACE.into())
            .parse_lossy(env);
        let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .include_args(true)
            .build();
        Some((chrome_filter.and_then(layer), guard))
    } else if trace_flag {
        let chrome_filter = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(tracing::Level::TRACE.into())
            .parse_lossy("");
        let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .include_args(true)
            .file("trace.json")
            .build();
        Some((chrome_filter.and_then(layer), guard))
    } else {
        None
    };

    let (chrome_layer, chrome_guard) = chrome_trace.unzip();

    let fmt_layer = fmt.with_filter(filter);
    // also installs the bridge for `log` records from the library crates
    if let Err(e) = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(chrome_layer)
        .try_init()
    {
        eprintln!("Warning: Failed to set up logging: {e}");
    }

    Box::new(chrome_guard)
}

fn apply_color_choice(choice: ColorChoice) {
    match choice {
        ColorChoice::Auto => {}
        ColorChoice::Always => colored::control::set_override(true),
        ColorChoice::Never => colored::control::set_override(false),
    }
}

pub fn main() {
    let cli = cli::LockstepCli::parse();
    let flags = cli.flags;

    apply_color_choice(flags.color);
    let _trace_guard = init_tracing(flags.trace, flags.verbose);

    use LockstepSubcommands::*;
    let res = match cli.subcommand {
        Update(u) => cli::update_cli(&flags, u),
    };

    drop(_trace_guard);

    match res {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}: {:?}", "error".red().bold(), e);
            std::process::exit(101);
        }
    }
}
