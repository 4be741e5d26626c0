//! JSON Lines observation import
//!
//! One `RawPropertyObservation` per line. Blank lines and `#` comments are
//! ignored; lines that fail to parse are reported, never fatal.

use crate::types::RawPropertyObservation;
use leadfuse_common::Result;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// Line that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based
    pub line_number: usize,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ObservationFile {
    pub observations: Vec<RawPropertyObservation>,
    pub rejected: Vec<RejectedLine>,
}

pub async fn read_observations(path: &Path) -> Result<ObservationFile> {
    let file = File::open(path).await?;
    parse_observations(BufReader::new(file)).await
}

pub async fn parse_observations<R>(reader: R) -> Result<ObservationFile>
where
    R: AsyncBufRead + Unpin,
{
    let mut parsed = ObservationFile::default();
    let mut lines = reader.lines();
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<RawPropertyObservation>(trimmed) {
            Ok(observation) => parsed.observations.push(observation),
            Err(e) => {
                tracing::warn!(line = line_number, "Unreadable observation: {}", e);
                parsed.rejected.push(RejectedLine {
                    line_number,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(parsed)
}
