// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-aware scratch directory resolution.

use std::path::{Path, PathBuf};

/// Root under which job scratch directories are created.
///
/// An explicit directory wins. Otherwise the XDG cache dir, then
/// `~/.cache`, then the system temp dir.
pub fn work_dir(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(dir) => dir.to_path_buf(),
        None => cache_base(|key| std::env::var(key).ok()).join("schriftwerk"),
    }
}

fn cache_base<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(xdg) = lookup("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg);
    }
    if let Some(home) = lookup("HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".cache");
    }
    std::env::temp_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_directory_wins() {
        assert_eq!(work_dir(Some(Path::new("/srv/ocr"))), PathBuf::from("/srv/ocr"));
    }

    #[test]
    fn falls_back_from_xdg_to_home_to_temp() {
        let xdg = cache_base(|key| match key {
            "XDG_CACHE_HOME" => Some("/xdg".into()),
            "HOME" => Some("/home/u".into()),
            _ => None,
        });
        assert_eq!(xdg, PathBuf::from("/xdg"));

        let home = cache_base(|key| (key == "HOME").then(|| "/home/u".to_string()));
        assert_eq!(home, PathBuf::from("/home/u/.cache"));

        assert_eq!(cache_base(|_| None), std::env::temp_dir());
    }
}
