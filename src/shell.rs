//! Shell quoting for values interpolated into constructed command lines.

/// Quote `s` as a single POSIX shell word.
///
/// The value is wrapped in single quotes; an embedded `'` closes the quote,
/// emits an escaped quote and reopens it (`O'Brien` -> `'O'\''Brien'`).
pub fn shell_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn through_shell(s: &str) -> String {
        let output = Command::new("sh")
            .arg("-c")
            .arg(format!("printf '%s' {}", shell_escape(s)))
            .output()
            .expect("sh should be available");
        String::from_utf8(output.stdout).unwrap()
    }

    #[test]
    fn test_escapes_single_quote() {
        assert_eq!(shell_escape("O'Brien"), r"'O'\''Brien'");
    }

    #[test]
    fn test_plain_values_are_wrapped() {
        assert_eq!(shell_escape("main"), "'main'");
        assert_eq!(shell_escape(""), "''");
    }

    #[test]
    fn test_round_trips_through_sh() {
        let cases = [
            "O'Brien",
            "plain",
            "",
            "with space",
            "$(rm -rf /)",
            "`id`",
            "a;b && c | d",
            "'''",
            "-rf",
            "line\nbreak",
            "$HOME \\ \"quoted\"",
        ];
        for case in cases {
            assert_eq!(through_shell(case), case, "round trip of {:?}", case);
        }
    }
}
