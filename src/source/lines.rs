//! Newline-delimited JSON batches from a reader.

use anyhow::{anyhow, Result};
use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::Ordering;

use super::{BatchHandler, DetectionSource, Subscription};
use crate::detection::DetectionBatch;
use crate::queue::Overflow;

pub struct JsonLinesSource {
    reader: Option<Box<dyn Read + Send>>,
}

impl JsonLinesSource {
    pub fn new<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Some(Box::new(reader)),
        }
    }

    pub fn stdin() -> Self {
        Self::new(std::io::stdin())
    }
}

impl DetectionSource for JsonLinesSource {
    fn subscribe(&mut self, mut handler: BatchHandler) -> Result<Subscription> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| anyhow!("json lines source already subscribed"))?;
        Subscription::spawn("json-lines", move |stop| {
            let reader = BufReader::new(reader);
            for (index, line) in reader.lines().enumerate() {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        log::error!("failed to read detection input: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match DetectionBatch::from_json(line.as_bytes()) {
                    Ok(batch) => handler(batch),
                    Err(e) => log::warn!("skipping line {}: {:#}", index + 1, e),
                }
            }
            log::debug!("json lines input exhausted");
        })
    }

    /// Replayed input is never dropped; the reader waits for the worker.
    fn overflow(&self) -> Overflow {
        Overflow::Block
    }
}
