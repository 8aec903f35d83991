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

use serde::{Deserialize, Serialize};

use crate::dirs::ManifestDirs;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
pub enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, clap::Parser, Serialize, Deserialize)]
#[clap(next_display_order(2000), next_help_heading("Common options"))]
pub struct UniversalFlags {
    #[clap(flatten)]
    pub manifest_dirs: ManifestDirs,

    /// Suppress output
    #[clap(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Increase verbosity
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Coloring of the output
    #[clap(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Trace the execution of the program
    #[clap(long, global = true)]
    pub trace: bool,

    /// Require the lock file to be up to date and do not touch the network
    #[clap(long, global = true, conflicts_with = "locked")]
    pub frozen: bool,

    /// Require the lock file to be up to date
    #[clap(long, global = true)]
    pub locked: bool,

    /// Use only locally cached registry data
    #[clap(long, global = true)]
    pub offline: bool,

    /// Override a configuration value: KEY=VALUE or a path to a JSON file
    #[clap(long = "config", global = true, value_name = "KEY=VALUE|PATH")]
    pub config: Vec<String>,
}

impl UniversalFlags {
    /// `--frozen` is `--locked` plus `--offline`.
    pub fn is_locked(&self) -> bool {
        self.frozen || self.locked
    }

    pub fn is_offline(&self) -> bool {
        self.frozen || self.offline
    }
}
