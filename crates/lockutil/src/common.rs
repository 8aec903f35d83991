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

use std::path::Path;

use fs4::fs_std::FileExt;

pub const MANIFEST_FILE: &str = "lockstep.mod.json";
pub const LOCK_FILE: &str = "lockstep.lock";
pub const LOCK_GUARD: &str = ".lockstep-lock";

/// Advisory file lock, released on drop.
pub struct FileLock {
    _file: std::fs::File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self._file.unlock();
    }
}

fn open_lock_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .read(true)
        .open(path)
}

impl FileLock {
    /// Takes the workspace guard `<dir>/.lockstep-lock` exclusively.
    pub fn lock(dir: &Path) -> std::io::Result<Self> {
        Self::exclusive(&dir.join(LOCK_GUARD))
    }

    pub fn exclusive(path: &Path) -> std::io::Result<Self> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(_) => Ok(FileLock { _file: file }),
            Err(_) => {
                #[cfg(not(test))]
                eprintln!("Blocking waiting for file lock {} ...", path.display());
                file.lock_exclusive().map_err(|e| {
                    std::io::Error::new(
                        e.kind(),
                        format!("failed to lock {}", path.display()),
                    )
                })?;
                Ok(FileLock { _file: file })
            }
        }
    }

    /// Readers share the lock; writers wait for them.
    pub fn shared(path: &Path) -> std::io::Result<Self> {
        let file = open_lock_file(path)?;
        FileExt::lock_shared(&file).map_err(|e| {
            std::io::Error::new(e.kind(), format!("failed to lock {}", path.display()))
        })?;
        Ok(FileLock { _file: file })
    }
}
