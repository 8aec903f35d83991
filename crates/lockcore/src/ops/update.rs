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

//! The `update` operation: load the workspace and the previous lock, plan,
//! resolve, then report or write.

use std::{collections::BTreeSet, rc::Rc};

use anyhow::Context;
use lockutil::{
    common::FileLock,
    config::Settings,
    dirs::WorkspaceDirs,
    locked::LockedGraph,
    lockfile::read_lock_file,
    lockstep_dir::LockstepHome,
    package::{PackageId, PackageName, SourceKind},
};

use crate::{
    diff::{LockDiff, persist},
    error::UpdateError,
    git::GitRemote,
    graph::RequirementGraph,
    planner::{Plan, UpdateMode, check_frozen, ensure_unchanged, solve},
    registry::{
        RegistryList,
        fetch::{FetchError, IndexFetch, Prefetcher},
    },
    resolver::PreciseTarget,
    source::{CandidateSource, SourceQueryer},
};

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub mode: UpdateMode,
    pub settings: Settings,
}

/// Where packages come from.
pub struct UpdateEnv<'a> {
    pub home: &'a LockstepHome,
    pub registries: &'a RegistryList,
    pub git: &'a dyn GitRemote,
    /// `None` skips refreshing the index cache.
    pub fetch: Option<&'a dyn IndexFetch>,
}

#[derive(Debug)]
pub struct UpdateReport {
    pub previous: LockedGraph,
    pub graph: LockedGraph,
    pub diff: LockDiff,
    /// Whether the lock file was rewritten.
    pub written: bool,
}

fn seed_locals(source: &mut SourceQueryer, graph: &RequirementGraph) {
    for (path, summary) in graph.locals() {
        source.seed_local(path.to_owned(), Rc::clone(summary));
    }
}

fn prefetch(
    env: &UpdateEnv,
    fetch: &dyn IndexFetch,
    settings: &Settings,
    names: BTreeSet<(Option<String>, PackageName)>,
) -> Result<(), UpdateError> {
    let _guard = FileLock::exclusive(&env.home.registry_lock())
        .context("failed to lock the registry cache")?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    let prefetcher = Prefetcher::new(env.home, fetch, settings);
    let fetched = runtime.block_on(async {
        tokio::select! {
            res = prefetcher.prefetch(names) => res.map_err(|e| match e {
                FetchError::Io { .. } => UpdateError::Source(e.into()),
                e => UpdateError::NetworkUnavailable(e),
            }),
            _ = tokio::signal::ctrl_c() => Err(UpdateError::Interrupted),
        }
    })?;
    log::debug!("Fetched {fetched} index files");
    Ok(())
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn update(
    dirs: &WorkspaceDirs,
    opts: &UpdateOptions,
    env: &UpdateEnv,
) -> Result<UpdateReport, UpdateError> {
    let mode = &opts.mode;
    mode.validate()?;
    // a locked run never touches the network
    let offline = mode.offline || mode.frozen || opts.settings.net_offline;
    let parallel_versions = opts.settings.parallel_versions;

    let workspace = RequirementGraph::load(&dirs.root_dir)?;
    let root = workspace.root_dir();
    let dirs = WorkspaceDirs::from_root(root.to_owned());
    let previous = read_lock_file(&dirs.lock_path, root)?.unwrap_or_default();

    let prechecked = if mode.frozen {
        let _guard = FileLock::shared(&env.home.registry_lock())
            .context("failed to lock the registry cache")?;
        let plan = Plan::frozen(&previous);
        let prefs = plan.preferences(&previous, mode.ordering());
        let mut source = SourceQueryer::new(env.registries, env.git, prefs, true);
        seed_locals(&mut source, &workspace);
        Some(check_frozen(
            &previous,
            &mut source,
            workspace.roots(),
            parallel_versions,
            root,
        )?)
    } else {
        None
    };

    let universe: Vec<&PackageId> = previous.ids().chain(workspace.local_ids()).collect();
    let mut targets = Vec::new();
    for spec in &mode.targets {
        targets.push(spec.query(universe.iter().copied(), root)?.clone());
    }

    let graph = match prechecked {
        // nothing requested beyond the lock itself
        Some(graph) if targets.is_empty() && !mode.workspace_only => graph,
        _ => {
            if let (false, Some(fetch)) = (offline, env.fetch) {
                let mut names = workspace.registry_names();
                names.extend(previous.ids().filter_map(|id| match &id.source {
                    SourceKind::Registry(r) => Some((r.clone(), id.name.clone())),
                    _ => None,
                }));
                prefetch(env, fetch, &opts.settings, names)?;
            }
            resolve_update(env, mode, &workspace, &previous, &targets, offline, parallel_versions)?
        }
    };

    let diff = LockDiff::between(&previous, &graph);
    if mode.frozen {
        ensure_unchanged(&diff)?;
    }
    let written = if mode.dry_run || mode.frozen {
        false
    } else {
        persist(&graph, &dirs)?
    };
    Ok(UpdateReport {
        previous,
        graph,
        diff,
        written,
    })
}

/// Plans and solves an update of `targets` against the index cache.
fn resolve_update(
    env: &UpdateEnv,
    mode: &UpdateMode,
    workspace: &RequirementGraph,
    previous: &LockedGraph,
    targets: &[PackageId],
    offline: bool,
    parallel_versions: bool,
) -> Result<LockedGraph, UpdateError> {
    let _guard = FileLock::shared(&env.home.registry_lock())
        .context("failed to lock the registry cache")?;
    let mut plan = Plan::new(mode, previous, targets, &workspace.workspace_keys());
    log::debug!(
        "{} of {} locked keys are pinned",
        plan.fixed.len(),
        previous.keys().len()
    );
    let prefs = plan.preferences(previous, mode.ordering());
    let mut source = SourceQueryer::new(env.registries, env.git, prefs, offline);
    seed_locals(&mut source, workspace);

    let precise = match (&mode.precise, &plan.precise) {
        (Some(value), Some(key)) => {
            let summary = source.precise(key, value)?;
            let others = previous
                .nodes_of_key(key)
                .filter(|n| n.id != summary.id)
                .cloned()
                .collect();
            Some(PreciseTarget {
                key: key.clone(),
                summary,
                others,
            })
        }
        _ => None,
    };

    solve(
        &mut plan,
        &mut source,
        workspace.roots(),
        precise.as_ref(),
        parallel_versions,
    )
}
