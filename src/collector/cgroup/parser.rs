//! Parsers for cgroup memory controller files.

use crate::collector::procfs::ParseError;

/// Parses `memory.max` (cgroup v2).
///
/// Format: number or `max`. Returns `None` for `max`.
pub fn parse_memory_max(content: &str) -> Result<Option<u64>, ParseError> {
    let trimmed = content.trim();
    if trimmed == "max" {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| ParseError::at_line(trimmed, "invalid memory.max value"))
}

/// Parses `memory.limit_in_bytes` (cgroup v1).
///
/// Format: number (bytes)
pub fn parse_limit_in_bytes(content: &str) -> Result<u64, ParseError> {
    let trimmed = content.trim();
    trimmed
        .parse()
        .map_err(|_| ParseError::at_line(trimmed, "invalid memory.limit_in_bytes value"))
}

/// Extracts `hierarchical_memory_limit` from `memory.stat` (cgroup v1).
///
/// Format: key value pairs, one per line. Returns 0 when the key is absent.
pub fn parse_hierarchical_memory_limit(content: &str) -> Result<u64, ParseError> {
    for line in content.lines() {
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() < 2 {
            return Err(ParseError::at_line(line, "not enough fields in memory.stat"));
        }

        if fields[0] == "hierarchical_memory_limit" {
            if fields.len() > 2 {
                return Err(ParseError::at_line(
                    line,
                    "too many fields for hierarchical_memory_limit",
                ));
            }
            return fields[1]
                .parse()
                .map_err(|_| ParseError::at_line(line, "invalid hierarchical_memory_limit"));
        }
    }

    Ok(0)
}
