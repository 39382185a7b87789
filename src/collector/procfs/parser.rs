//! Parsers for `/proc` filesystem files.
//!
//! These are pure functions that parse the content of `/proc/self/mountinfo`,
//! `/proc/self/cgroup` and `/proc/meminfo` into structured data. They are
//! designed to be easily testable with string inputs.

use std::path::PathBuf;

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// The offending input line.
    pub line: String,
    pub message: String,
}

impl ParseError {
    /// Creates an error for a specific input line.
    pub fn at_line(line: &str, msg: impl Into<String>) -> Self {
        Self {
            line: line.to_string(),
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {} in {:?}", self.message, self.line)
    }
}

impl std::error::Error for ParseError {}

/// One mount from `/proc/self/mountinfo`.
///
/// ```text
/// 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue
/// (1)(2)(3)   (4)   (5)      (6)      (7)   (8) (9)   (10)         (11)
/// ```
///
/// Only root (4), mount point (5), filesystem type (9) and super options (11)
/// are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    /// Directory within the filesystem which forms the root of this mount.
    pub root: String,
    /// Mount point relative to the process's root directory.
    pub mount_point: PathBuf,
    /// Filesystem type, e.g. `cgroup2`.
    pub filesystem_type: String,
    /// Per-superblock options, e.g. `rw,memory`.
    pub super_options: String,
}

/// One hierarchy line from `/proc/self/cgroup`.
///
/// ```text
/// 5:cpuacct,cpu,cpuset:/daemons
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupMembership {
    /// Hierarchy ID; `0` for the unified hierarchy.
    pub hierarchy_id: String,
    /// Comma-separated controllers; empty for the unified hierarchy.
    pub controller_list: String,
    /// Path of the cgroup within the hierarchy.
    pub cgroup_path: String,
}

impl CgroupMembership {
    /// Returns `true` if `controller` is bound to this hierarchy.
    pub fn has_controller(&self, controller: &str) -> bool {
        self.controller_list.split(',').any(|c| c == controller)
    }
}

/// Parses `/proc/self/mountinfo` content.
pub fn parse_mountinfo(content: &str) -> Result<Vec<MountRecord>, ParseError> {
    let mut mounts = Vec::new();

    for line in content.lines() {
        if line.is_empty() {
            return Err(ParseError::at_line(line, "empty line"));
        }

        let (head, tail) = line
            .split_once(" - ")
            .ok_or_else(|| ParseError::at_line(line, "invalid separator"))?;

        let mut head_fields: Vec<&str> = head.split(' ').collect();
        if head_fields.len() < 6 {
            return Err(ParseError::at_line(
                line,
                format!("not enough fields before separator: {}", head_fields.len()),
            ));
        } else if head_fields.len() > 7 {
            return Err(ParseError::at_line(
                line,
                format!("too many fields before separator: {}", head_fields.len()),
            ));
        } else if head_fields.len() == 6 {
            // No optional fields.
            head_fields.push("");
        }

        // Super options run to the end of the line; some kernels leave
        // unescaped spaces in them.
        let tail_fields: Vec<&str> = tail.splitn(3, ' ').collect();
        if tail_fields.len() < 3 {
            return Err(ParseError::at_line(
                line,
                format!("not enough fields after separator: {}", tail_fields.len()),
            ));
        }

        mounts.push(MountRecord {
            root: unescape_octal(head_fields[3]),
            mount_point: PathBuf::from(unescape_octal(head_fields[4])),
            filesystem_type: tail_fields[0].to_string(),
            super_options: tail_fields[2].to_string(),
        });
    }

    Ok(mounts)
}

/// Parses `/proc/self/cgroup` content.
pub fn parse_cgroup_membership(content: &str) -> Result<Vec<CgroupMembership>, ParseError> {
    let mut memberships = Vec::new();

    for line in content.lines() {
        if line.is_empty() {
            return Err(ParseError::at_line(line, "empty line"));
        }

        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 3 {
            return Err(ParseError::at_line(
                line,
                format!("expected 3 fields, got {}", fields.len()),
            ));
        }

        memberships.push(CgroupMembership {
            hierarchy_id: fields[0].to_string(),
            controller_list: fields[1].to_string(),
            cgroup_path: fields[2].to_string(),
        });
    }

    Ok(memberships)
}

/// Parses the `MemTotal` line of `/proc/meminfo`, in bytes.
///
/// Returns 0 when the line is absent.
pub fn parse_mem_total(content: &str) -> Result<u64, ParseError> {
    for line in content.lines() {
        let Some(rest) = line.strip_prefix("MemTotal:") else {
            continue;
        };
        let kb: u64 = rest
            .split_whitespace()
            .next()
            .ok_or_else(|| ParseError::at_line(line, "missing MemTotal value"))?
            .parse()
            .map_err(|_| ParseError::at_line(line, "invalid MemTotal value"))?;
        return Ok(kb.saturating_mul(1024));
    }

    Ok(0)
}

/// Decodes the `\NNN` octal escapes the kernel uses for whitespace and
/// backslashes in mountinfo paths.
fn unescape_octal(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..=i + 3].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
