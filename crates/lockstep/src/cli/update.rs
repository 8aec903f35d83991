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

use colored::Colorize;
use lockcore::{
    git::GitCommand,
    ops::update::{UpdateEnv, UpdateOptions, update},
    planner::UpdateMode,
    registry::{RegistryList, fetch::HttpIndexFetch},
    specifier::Specifier,
};
use lockutil::{
    config::{JsonConfig, Settings},
    lockstep_dir::LockstepHome,
};

use super::UniversalFlags;

/// Update dependencies as recorded in the lock file
#[derive(Debug, clap::Parser)]
pub struct UpdateSubcommand {
    /// Packages to update, e.g. `dep/one`, `dep/one@1.2` or
    /// `git+https://host/repo#dep/one`. Without any, every dependency is
    /// updated.
    #[clap(value_name = "SPEC")]
    pub specs: Vec<Specifier>,

    /// Also update the dependencies of the given packages
    #[clap(long, visible_alias = "recursive")]
    pub aggressive: bool,

    /// Update the given package to exactly this version or git revision
    #[clap(long, value_name = "PRECISE")]
    pub precise: Option<String>,

    /// Only update the workspace packages
    #[clap(long, short = 'w')]
    pub workspace: bool,

    /// Show what would change without writing the lock file
    #[clap(long)]
    pub dry_run: bool,

    /// Prefer the lowest matching versions
    #[clap(long, hide = true)]
    pub minimal_versions: bool,
}

pub fn update_cli(cli: &UniversalFlags, cmd: UpdateSubcommand) -> anyhow::Result<i32> {
    let dirs = cli.manifest_dirs.try_into_workspace_dirs()?;
    let home = LockstepHome::from_env()?;
    let config = JsonConfig::load(&home, &cli.config)?;
    let settings = Settings::from_provider(&config)?;
    log::debug!("Using {} as home, settings: {:?}", home.root().display(), settings);

    let registries = RegistryList::from_settings(&home, &settings);
    let git = GitCommand::new(&home);
    let fetch = HttpIndexFetch::new(&settings);

    let mode = UpdateMode {
        targets: cmd.specs,
        aggressive: cmd.aggressive,
        precise: cmd.precise,
        workspace_only: cmd.workspace,
        dry_run: cmd.dry_run,
        frozen: cli.is_locked(),
        offline: cli.is_offline(),
        minimal_versions: cmd.minimal_versions,
    };
    let dry_run = mode.dry_run;
    let opts = UpdateOptions { mode, settings };
    let env = UpdateEnv {
        home: &home,
        registries: &registries,
        git: &git,
        fetch: Some(&fetch),
    };
    let report = update(&dirs, &opts, &env)?;

    if !cli.quiet {
        for entry in report.diff.entries() {
            // workspace packages come and go with the manifests
            if entry.id().source.is_local() {
                continue;
            }
            eprintln!("{:>12} {}", entry.verb().green().bold(), entry.describe());
        }
        if dry_run {
            eprintln!(
                "{}: not updating the lock file due to dry run",
                "warning".yellow().bold()
            );
        }
    }
    Ok(0)
}
