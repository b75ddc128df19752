// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognised-text cleanup.

/// Strip characters that break downstream consumers (XML, JSON, PDF strings).
///
/// Removes NUL and other C0/C1 control characters except `\n` and `\t`, maps
/// the Unicode line/paragraph separators to spaces, and drops byte-order marks.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\n' | '\t' => Some(c),
            '\u{2028}' | '\u{2029}' => Some(' '),
            '\u{FEFF}' => None,
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect()
}
