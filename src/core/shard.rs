//! Purpose: Split a mapped source into regions that each begin at a true record boundary.
//! Exports: `plan_shards`, `shard_count`, `entry_states`, `MIN_SHARD_BYTES`.
//! Role: Lets independent scanners run in parallel without a quote-parity guess.
//! Invariants: Every returned region after the first starts right after a row terminator
//!   as seen by a sequential scan from the data start.
//! Invariants: Regions are contiguous, non-overlapping and cover `[start, len)`.
//! Notes: Each raw shard is pre-scanned once per candidate entry state in parallel;
//!   candidates converge quickly so the work runs in lockstep until they merge.
use std::ops::Range;
use std::thread;

use crate::core::dialect::{Dialect, EscapeMode};
use crate::core::error::{Error, ErrorKind};
use crate::core::scan::State;

pub const MIN_SHARD_BYTES: usize = 64 * 1024;
const LOCKSTEP_BYTES: usize = 64 * 1024;

pub fn shard_count(len: usize, workers: usize) -> usize {
    workers.max(1).min(len / MIN_SHARD_BYTES).max(1)
}

/// Every scanner state a raw shard might be entered in.
pub fn entry_states(dialect: &Dialect) -> Vec<State> {
    let mut states = vec![State::RowStart, State::FieldStart];
    for matched in 0..dialect.delimiter.len() as u8 {
        states.push(State::Field { matched });
    }
    if dialect.quote.is_some() {
        states.push(State::Quoted);
        if dialect.escape == EscapeMode::Backslash {
            states.push(State::QuotedEscape);
        }
        states.push(State::AfterQuote {
            immediate: true,
            matched: 0,
        });
        for matched in 0..dialect.delimiter.len() as u8 {
            states.push(State::AfterQuote {
                immediate: false,
                matched,
            });
            states.push(State::Stray { matched });
        }
    }
    if dialect.comment.is_some() {
        states.push(State::Comment);
    }
    states
}

#[derive(Debug)]
struct Transfer {
    entries: Vec<State>,
    exits: Vec<State>,
    boundaries: Vec<Option<usize>>,
}

impl Transfer {
    fn lookup(&self, entry: State) -> Option<(State, Option<usize>)> {
        let idx = self.entries.iter().position(|state| *state == entry)?;
        Some((self.exits[idx], self.boundaries[idx]))
    }
}

#[derive(Debug)]
struct Group {
    state: State,
    members: Vec<usize>,
}

/// Splits `bytes[start..]` into at most `count` regions. `start` must be a row start
/// with no lines left to skip.
pub fn plan_shards(
    dialect: &Dialect,
    bytes: &[u8],
    start: usize,
    count: usize,
) -> Result<Vec<Range<usize>>, Error> {
    let end = bytes.len();
    let len = end.saturating_sub(start);
    if count <= 1 || len == 0 {
        return Ok(vec![start..end]);
    }

    let raw: Vec<usize> = (0..=count)
        .map(|j| start + (len as u128 * j as u128 / count as u128) as usize)
        .collect();
    let candidates = entry_states(dialect);

    let transfers = thread::scope(|scope| {
        let handles: Vec<_> = (0..count)
            .map(|j| {
                let region = &bytes[raw[j]..raw[j + 1]];
                let base = raw[j];
                let entries = if j == 0 {
                    vec![State::RowStart]
                } else {
                    candidates.clone()
                };
                scope.spawn(move || summarize(dialect, region, base, entries))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().map_err(|_| {
                    Error::new(ErrorKind::Internal).with_message("shard pre-scan panicked")
                })
            })
            .collect::<Result<Vec<_>, Error>>()
    })?;

    let mut ranges = Vec::with_capacity(count);
    let mut state = State::RowStart;
    let mut cursor = start;
    for (j, transfer) in transfers.iter().enumerate() {
        let (exit, boundary) = transfer.lookup(state).ok_or_else(|| {
            Error::new(ErrorKind::Internal)
                .with_message(format!("no pre-scan for entry state {state:?}"))
                .with_offset(raw[j] as u64)
        })?;
        if j > 0 {
            if let Some(boundary) = boundary {
                if boundary > cursor {
                    ranges.push(cursor..boundary);
                    cursor = boundary;
                }
            }
        }
        state = exit;
    }
    if cursor < end {
        ranges.push(cursor..end);
    }

    tracing::debug!(
        requested = count,
        shards = ranges.len(),
        start,
        bytes = len,
        "planned shards"
    );
    Ok(ranges)
}

fn summarize(dialect: &Dialect, bytes: &[u8], base: usize, entries: Vec<State>) -> Transfer {
    let mut boundaries: Vec<Option<usize>> = vec![None; entries.len()];
    let mut groups: Vec<Group> = entries
        .iter()
        .enumerate()
        .map(|(idx, state)| Group {
            state: *state,
            members: vec![idx],
        })
        .collect();

    let lockstep = bytes.len().min(LOCKSTEP_BYTES);
    let mut i = 0usize;
    while i < lockstep && groups.len() > 1 {
        let byte = bytes[i];
        for group in &mut groups {
            let (next, action) = dialect.step(group.state, byte);
            if action.is_row_boundary() {
                for member in &group.members {
                    boundaries[*member].get_or_insert(base + i + 1);
                }
            }
            group.state = next;
        }
        merge_groups(&mut groups);
        i += 1;
    }

    for group in &mut groups {
        let want_boundary = group.members.iter().any(|m| boundaries[*m].is_none());
        let (exit, boundary) = run(dialect, group.state, &bytes[i..], base + i, want_boundary);
        group.state = exit;
        if let Some(boundary) = boundary {
            for member in &group.members {
                boundaries[*member].get_or_insert(boundary);
            }
        }
    }

    let mut exits = entries.clone();
    for group in &groups {
        for member in &group.members {
            exits[*member] = group.state;
        }
    }
    Transfer {
        entries,
        exits,
        boundaries,
    }
}

fn merge_groups(groups: &mut Vec<Group>) {
    let mut k = 1;
    while k < groups.len() {
        let state = groups[k].state;
        match groups[..k].iter().position(|group| group.state == state) {
            Some(target) => {
                let merged = groups.swap_remove(k);
                groups[target].members.extend(merged.members);
            }
            None => k += 1,
        }
    }
}

fn run(
    dialect: &Dialect,
    mut state: State,
    bytes: &[u8],
    base: usize,
    want_boundary: bool,
) -> (State, Option<usize>) {
    let mut boundary = None;
    let mut i = 0usize;
    while i < bytes.len() {
        i += dialect.skip_inert(state, &bytes[i..]);
        if i >= bytes.len() {
            break;
        }
        let (next, action) = dialect.step(state, bytes[i]);
        if want_boundary && boundary.is_none() && action.is_row_boundary() {
            boundary = Some(base + i + 1);
        }
        state = next;
        i += 1;
    }
    (state, boundary)
}
