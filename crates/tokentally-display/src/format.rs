// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Number formatting for terminal output.

/// Format a unit count with thousands separators: `1234567` -> `1,234,567`.
pub fn format_units(units: u64) -> String {
    let digits = units.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Format a USD amount with four decimals: `0.00105` -> `$0.0011`.
pub fn format_cost(amount: f64) -> String {
    format!("${amount:.4}")
}
