// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer — turns command-line choices into a ready pipeline.

pub mod config_file;
pub mod engines;
pub mod work_dir;
