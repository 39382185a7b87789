//! Parsers for the Linux `/proc` files that cgroup discovery starts from.

pub mod parser;

pub use parser::{
    CgroupMembership, MountRecord, ParseError, parse_cgroup_membership, parse_mem_total,
    parse_mountinfo,
};
