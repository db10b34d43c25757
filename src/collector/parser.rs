//! Parser for `/proc/[pid]/stat` records.
//!
//! A pure function from file content to structured data, designed to be
//! testable with string inputs.

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// The fields of `/proc/[pid]/stat` the supervisor samples.
///
/// `utime` and `stime` are in clock ticks, `rss` in pages. `rss` is kept
/// signed because the kernel reports it as a signed quantity; callers reject
/// negative values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PidStat {
    pub pid: i32,
    pub comm: String,
    pub ppid: i32,
    pub pgrp: i32,
    pub session: i32,
    pub utime: u64,
    pub stime: u64,
    pub rss: i64,
}

/// Parses `/proc/[pid]/stat` content.
///
/// The format is tricky because the comm field can contain spaces and
/// parentheses. Format: `pid (comm) state ppid pgrp session tty_nr ...`
pub fn parse_pid_stat(content: &str) -> Result<PidStat, ParseError> {
    let content = content.trim();

    // Locate the comm field boundaries; the last ')' is the closer since
    // everything after it is numeric.
    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;

    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: i32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;

    let comm = content[open_paren + 1..close_paren].to_string();

    // Positional fields after the closing ')'; index 0 is the state char.
    let remaining = &content[close_paren + 1..];
    let fields: Vec<&str> = remaining.split_whitespace().collect();

    if fields.len() < 22 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 22+, got {}",
            fields.len()
        )));
    }

    let parse_i32 = |idx: usize, name: &str| -> Result<i32, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };
    let parse_u64 = |idx: usize, name: &str| -> Result<u64, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };

    Ok(PidStat {
        pid,
        comm,
        ppid: parse_i32(1, "ppid")?,
        pgrp: parse_i32(2, "pgrp")?,
        session: parse_i32(3, "session")?,
        utime: parse_u64(11, "utime")?,
        stime: parse_u64(12, "stime")?,
        rss: fields[21]
            .parse()
            .map_err(|_| ParseError::new("invalid rss"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pid_stat_basic() {
        let content = "1234 (bash) S 1233 1234 1234 34816 1235 4194304 5000 50000 10 20 100 50 200 100 20 0 1 0 100000 25000000 2000 18446744073709551615 0 0 0 0 0 0 65536 3670020 1266777851 0 0 0 17 2 0 0 5 0 0 0 0 0 0 0 0 0 0";
        let stat = parse_pid_stat(content).unwrap();

        assert_eq!(stat.pid, 1234);
        assert_eq!(stat.comm, "bash");
        assert_eq!(stat.ppid, 1233);
        assert_eq!(stat.pgrp, 1234);
        assert_eq!(stat.session, 1234);
        assert_eq!(stat.utime, 100);
        assert_eq!(stat.stime, 50);
        assert_eq!(stat.rss, 2000);
    }

    #[test]
    fn test_parse_pid_stat_with_spaces_in_comm() {
        let content = "5000 (Web Content) S 4999 5000 4999 0 -1 4194304 100000 0 500 0 5000 1000 0 0 20 0 20 0 500000 2000000000 50000 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0";
        let stat = parse_pid_stat(content).unwrap();

        assert_eq!(stat.pid, 5000);
        assert_eq!(stat.comm, "Web Content");
        assert_eq!(stat.ppid, 4999);
        assert_eq!(stat.utime, 5000);
        assert_eq!(stat.stime, 1000);
    }

    #[test]
    fn test_parse_pid_stat_with_parentheses_in_comm() {
        let content = "5001 (test(1)) S 1 5001 5001 0 -1 4194304 1000 0 0 0 10 5 0 0 20 0 1 0 500100 10000000 1000 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0";
        let stat = parse_pid_stat(content).unwrap();

        assert_eq!(stat.pid, 5001);
        assert_eq!(stat.comm, "test(1)");
        assert_eq!(stat.rss, 1000);
    }

    #[test]
    fn test_parse_pid_stat_zombie() {
        // Zombies report zero usage but remain parseable.
        let content = "4000 (defunct) Z 1000 4000 1000 0 -1 4194308 0 0 0 0 0 0 0 0 20 0 1 0 400000 0 0 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 -1 0 0 0 0 0 0 0 0 0 0 0 0 0 0";
        let stat = parse_pid_stat(content).unwrap();

        assert_eq!(stat.pid, 4000);
        assert_eq!(stat.utime, 0);
        assert_eq!(stat.rss, 0);
    }

    #[test]
    fn test_parse_pid_stat_negative_rss_survives_parsing() {
        let content = "7 (kthread) S 2 0 0 0 -1 69238880 0 0 0 0 3 8 0 0 20 0 1 0 30 0 -1 18446744073709551615 0 0 0 0 0 0 0 2147483647 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0";
        let stat = parse_pid_stat(content).unwrap();
        assert_eq!(stat.rss, -1);
    }

    #[test]
    fn test_parse_pid_stat_rejects_truncated_record() {
        let err = parse_pid_stat("42 (short) S 1 42").unwrap_err();
        assert!(err.message.contains("not enough fields"));
    }

    #[test]
    fn test_parse_pid_stat_rejects_missing_parens() {
        assert!(parse_pid_stat("42 noparens S 1 42 42").is_err());
        assert!(parse_pid_stat(") 42 (backwards").is_err());
    }

    #[test]
    fn test_parse_pid_stat_rejects_non_numeric_field() {
        let content = "42 (x) S one 42 42 0 -1 0 0 0 0 0 1 2 0 0 20 0 1 0 30 0 5 9 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0";
        let err = parse_pid_stat(content).unwrap_err();
        assert_eq!(err.message, "invalid ppid");
    }
}
