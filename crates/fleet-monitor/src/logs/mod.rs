//! Node log parsing and block fan-out.
//!
//! Nodes announce each block they process with a log line such as
//!
//! ```text
//! INFO [05-04|09:34:15.537] New block    index=1 id=1:1:c0cb46 gas_used=417,928 txs=2/0 age=343.255ms t=3.071ms
//! ```
//!
//! [`parse_block_line`] turns such a line into a [`Block`]; the
//! [`NodeLogDispatcher`] streams every node's log and republishes the blocks.

mod dispatcher;

pub use dispatcher::{BlockListener, NodeLogDispatcher};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

const BLOCK_MARKER: &str = "New block";

/// A block as reported by a node's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub height: u64,
    pub time: DateTime<Utc>,
    pub txs: u64,
    pub gas_used: u64,
}

/// Parses a `New block` log line.
///
/// Log timestamps carry no year, so the caller provides one. Returns `None`
/// for any other line and for block lines missing the height, the
/// transaction count or a valid timestamp.
pub fn parse_block_line(line: &str, year: i32) -> Option<Block> {
    if !line.contains(BLOCK_MARKER) {
        return None;
    }

    let time = parse_timestamp(line, year)?;
    let mut height = None;
    let mut txs = None;
    let mut gas_used = 0;

    for (key, value) in line.split_whitespace().filter_map(|field| field.split_once('=')) {
        match key {
            "index" => height = value.parse().ok(),
            "txs" => txs = value.split('/').next().and_then(|n| n.parse().ok()),
            "gas_used" => gas_used = value.replace(',', "").parse().unwrap_or(0),
            _ => {}
        }
    }

    Some(Block { height: height?, time, txs: txs?, gas_used })
}

/// Reads the `[MM-DD|HH:MM:SS.mmm]` prefix.
fn parse_timestamp(line: &str, year: i32) -> Option<DateTime<Utc>> {
    let start = line.find('[')? + 1;
    let end = start + line[start..].find(']')?;
    let raw = format!("{year}-{}", &line[start..end]);
    let naive = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d|%H:%M:%S%.f").ok()?;
    Some(naive.and_utc())
}
