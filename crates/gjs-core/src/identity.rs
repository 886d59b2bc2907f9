//! Canonical job keys and GJS job identifiers.
//!
//! A GJS job ID is `"<prefix>.<canonical job key>"`, truncated to 256 bytes
//! and sanitized to a filesystem- and handle-safe character set. The prefix
//! is either a Gearman queue handle (host segment stripped) when the job was
//! submitted through the queue, or a fresh random token for jobs that ran
//! locally and never touched a queue.

use uuid::Uuid;

use crate::codec::Dict;
use crate::error::{JobError, JobResult};

const MAX_GJS_ID_BYTES: usize = 256;

/// Builds the canonical job key `"<name>(<k1>=<v1>, <k2>=<v2>, …)"`, with
/// arguments sorted by key (free, since [`Dict`] is a `BTreeMap`).
pub fn canonical_job_key(name: &str, args: Option<&Dict>) -> String {
    let Some(args) = args else {
        return format!("{name}()");
    };

    let rendered: Vec<String> = args
        .iter()
        .map(|(k, v)| format!("{k}={}", v.render_stable()))
        .collect();
    format!("{name}({})", rendered.join(", "))
}

/// Source of the prefix used when minting a GJS job ID.
pub enum PrefixSource<'a> {
    /// The job was submitted through a queue; reuse its handle.
    Handle(&'a str),
    /// The job ran without ever touching a queue; mint a random prefix.
    Local,
}

/// Builds a GJS job ID from a prefix source and a canonical job key.
pub fn gjs_job_id(source: PrefixSource<'_>, canonical_key: &str) -> JobResult<String> {
    let prefix = match source {
        PrefixSource::Handle(handle) => parse_handle(handle)?,
        PrefixSource::Local => Uuid::new_v4().simple().to_string(),
    };

    let raw = format!("{prefix}.{canonical_key}");
    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '(' | ')' | '=' | ',') {
                c
            } else {
                '_'
            }
        })
        .collect();

    Ok(truncate_to_bytes(&sanitized, MAX_GJS_ID_BYTES))
}

/// Truncates `s` to at most `max_bytes` bytes, respecting UTF-8 char
/// boundaries (the sanitized alphabet above is ASCII-only, so this is a
/// plain byte slice in practice, but the boundary check keeps the function
/// correct for any input).
fn truncate_to_bytes(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Parses a Gearman queue handle, either `H:token:digits` or
/// `server//H:token:digits`, returning the host segment stripped.
pub fn parse_handle(handle: &str) -> JobResult<String> {
    let without_host = match handle.split_once("//") {
        Some((_host, rest)) => rest,
        None => handle,
    };

    let parts: Vec<&str> = without_host.splitn(3, ':').collect();
    let valid = parts.len() == 3
        && parts[0] == "H"
        && !parts[1].is_empty()
        && !parts[2].is_empty()
        && parts[2].chars().all(|c| c.is_ascii_digit());

    if !valid {
        return Err(JobError::HandleFormat(format!(
            "'{handle}' is not a valid Gearman handle"
        )));
    }

    Ok(without_host.to_string())
}
