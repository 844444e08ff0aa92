//! Console dumps of small operands

use std::fmt::Write;

/// Largest matrix (in elements, N²) that is printed
pub const PRINT_THRESHOLD: usize = 1024;

/// Whether an N×N problem is small enough to print
#[must_use]
pub fn should_print(n: usize) -> bool {
    n.checked_mul(n).is_some_and(|elements| elements <= PRINT_THRESHOLD)
}

/// Render an N×N matrix, one bracketed row per line
///
/// ```
/// let text = tiled_mxv::display::format_matrix(2, |r, c| (r * 2 + c) as f64);
/// assert_eq!(text, "[     0     1\n;     2     3\n];\n");
/// ```
pub fn format_matrix(n: usize, value: impl Fn(usize, usize) -> f64) -> String {
    let mut out = String::new();
    for row in 0..n {
        out.push(if row == 0 { '[' } else { ';' });
        for col in 0..n {
            let _ = write!(out, " {:>5}", value(row, col));
        }
        out.push('\n');
    }
    if n == 0 {
        out.push('[');
    }
    out.push_str("];\n");
    out
}

/// Render a vector on one bracketed line
pub fn format_vector(values: &[f64]) -> String {
    let mut out = String::from("[");
    for value in values {
        let _ = write!(out, " {value:>5}");
    }
    out.push_str("\n];\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_print_threshold() {
        assert!(should_print(32));
        assert!(!should_print(33));
        assert!(!should_print(usize::MAX));
    }

    #[test]
    fn test_format_vector() {
        assert_eq!(format_vector(&[1.0, 28.0, 476.0]), "[     1    28   476\n];\n");
        assert_eq!(format_vector(&[]), "[\n];\n");
    }

    #[test]
    fn test_format_matrix_rows() {
        let text = format_matrix(3, |r, c| (r * 3 + c) as f64);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with('['));
        assert!(lines[1].starts_with(';'));
        assert!(lines[2].ends_with("    8"));
        assert_eq!(lines[3], "];");
    }
}
