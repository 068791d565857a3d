//! Parser for textual binding expressions
//!
//! Three grammars are accepted:
//!
//! - simple task ref:   `namespace.tasks.task_id:INDEX`
//! - advanced task ref: `namespace.tasks.task_id:INSTANCE:INDEX`
//! - entry ref:         `$entry:ENTRY_ID`
//!
//! The advanced grammar is tried first so `t:1:0` parses as instance 1,
//! index 0 rather than failing the simple grammar.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BindingError, Result};
use crate::types::TaskId;

/// Prefix that marks an entry-point reference
pub const ENTRY_PREFIX: &str = "$entry:";

static RX_TASK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9_\.]+)\.tasks\.([A-Za-z0-9_]+):([0-9]+)$")
        .expect("valid task binding regex")
});

static RX_TASK_ADVANCED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9_\.]+)\.tasks\.([A-Za-z0-9_]+):([0-9]+):([0-9]+)$")
        .expect("valid advanced task binding regex")
});

static RX_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$entry:([A-Za-z0-9_\.\-]+)$").expect("valid entry regex"));

/// One parsed end of a binding tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindingRef {
    /// A user-supplied entry point
    Entry { entry_id: String },
    /// A task io slot: output slot when on the producer side of a binding,
    /// input slot when on the consumer side
    TaskIo {
        task_id: TaskId,
        instance_id: u32,
        index: usize,
    },
}

impl fmt::Display for BindingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingRef::Entry { entry_id } => write!(f, "{}{}", ENTRY_PREFIX, entry_id),
            BindingRef::TaskIo {
                task_id,
                instance_id: 0,
                index,
            } => write!(f, "{}:{}", task_id, index),
            BindingRef::TaskIo {
                task_id,
                instance_id,
                index,
            } => write!(f, "{}:{}:{}", task_id, instance_id, index),
        }
    }
}

fn parse_u32(s: &str, original: &str) -> Result<u32> {
    s.parse()
        .map_err(|_| BindingError::MalformedBindingStr(original.to_string()))
}

fn parse_index(s: &str, original: &str) -> Result<usize> {
    s.parse()
        .map_err(|_| BindingError::MalformedBindingStr(original.to_string()))
}

/// Parse a simple task binding `ns.tasks.tid:INDEX`
pub fn parse_task_binding(s: &str) -> Result<(TaskId, usize)> {
    let caps = RX_TASK
        .captures(s)
        .ok_or_else(|| BindingError::MalformedBindingStr(s.to_string()))?;
    let task_id = format!("{}.tasks.{}", &caps[1], &caps[2]);
    let index = parse_index(&caps[3], s)?;
    Ok((task_id, index))
}

/// Parse an advanced task binding `ns.tasks.tid:INSTANCE:INDEX`
pub fn parse_advanced_task_binding(s: &str) -> Result<(TaskId, u32, usize)> {
    let caps = RX_TASK_ADVANCED
        .captures(s)
        .ok_or_else(|| BindingError::MalformedBindingStr(s.to_string()))?;
    let task_id = format!("{}.tasks.{}", &caps[1], &caps[2]);
    let instance_id = parse_u32(&caps[3], s)?;
    let index = parse_index(&caps[4], s)?;
    Ok((task_id, instance_id, index))
}

/// Parse a task binding in either form; simple form means instance 0
pub fn parse_task_ref(s: &str) -> Result<(TaskId, u32, usize)> {
    match parse_advanced_task_binding(s) {
        Ok(parsed) => Ok(parsed),
        Err(BindingError::MalformedBindingStr(_)) => {
            let (task_id, index) = parse_task_binding(s)?;
            Ok((task_id, 0, index))
        }
        Err(e) => Err(e),
    }
}

/// Parse an entry reference `$entry:ENTRY_ID`
pub fn parse_entry_ref(s: &str) -> Result<String> {
    let caps = RX_ENTRY
        .captures(s)
        .ok_or_else(|| BindingError::MalformedBindingStr(s.to_string()))?;
    Ok(caps[1].to_string())
}

/// Parse either end of a binding tuple
pub fn parse_binding_ref(s: &str) -> Result<BindingRef> {
    if s.starts_with(ENTRY_PREFIX) {
        let entry_id = parse_entry_ref(s)?;
        return Ok(BindingRef::Entry { entry_id });
    }
    let (task_id, instance_id, index) = parse_task_ref(s)?;
    Ok(BindingRef::TaskIo {
        task_id,
        instance_id,
        index,
    })
}

/// Strip an optional `$entry:` prefix from an entry id
///
/// Entry ids are accepted with or without the prefix wherever they are
/// consumed.
pub fn strip_entry_prefix(entry_id: &str) -> &str {
    entry_id.strip_prefix(ENTRY_PREFIX).unwrap_or(entry_id)
}
