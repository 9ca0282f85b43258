//! Re-hash every stored blob and compare it with its catalog row.

use crate::catalog::{Catalog, FileContent};
use crate::content_store::ContentStore;
use crate::control::CancelToken;
use crate::error::{Error, Result};
use crate::events::{EventBus, RunEvent};
use crate::hasher::{ChecksumKind, Digest, DigestWriter};
use std::fmt;
use std::io;
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchKind {
    /// The blob is missing or its stream could not be decoded.
    Unreadable(String),
    Length { expected: u64, actual: u64 },
    Checksum { expected: String, actual: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub content_id: i64,
    pub path: String,
    pub kind: MismatchKind,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MismatchKind::Unreadable(reason) => {
                write!(f, "{} (content {}): unreadable: {}", self.path, self.content_id, reason)
            }
            MismatchKind::Length { expected, actual } => write!(
                f,
                "{} (content {}): length {} instead of {}",
                self.path, self.content_id, actual, expected
            ),
            MismatchKind::Checksum { expected, actual } => write!(
                f,
                "{} (content {}): checksum {} instead of {}",
                self.path, self.content_id, actual, expected
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub total: u64,
    pub checked: u64,
    /// Legacy checksums replaced by the strong hash.
    pub upgraded: u64,
    pub mismatches: Vec<Mismatch>,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.mismatches.is_empty() && self.checked == self.total
    }
}

pub struct IntegrityChecker<'a> {
    catalog: &'a Catalog,
    store: &'a ContentStore,
    events: Option<&'a EventBus>,
    stop_at_first_mismatch: bool,
}

impl<'a> IntegrityChecker<'a> {
    pub fn new(catalog: &'a Catalog, store: &'a ContentStore) -> Self {
        Self {
            catalog,
            store,
            events: None,
            stop_at_first_mismatch: true,
        }
    }

    pub fn with_events(mut self, events: &'a EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// `false` keeps scanning after a mismatch and reports all of them.
    pub fn stop_at_first_mismatch(mut self, stop: bool) -> Self {
        self.stop_at_first_mismatch = stop;
        self
    }

    /// Verify every content row. Cancellation is honoured between blobs.
    pub fn check(&self, cancel: &CancelToken) -> Result<IntegrityReport> {
        let _span = info_span!("integrity_check").entered();
        let contents = self.catalog.list_file_contents()?;
        let mut report = IntegrityReport {
            total: contents.len() as u64,
            ..Default::default()
        };
        info!("Checking {} stored contents", report.total);

        for content in &contents {
            if cancel.is_cancelled() {
                info!("Integrity check cancelled after {} contents", report.checked);
                return Err(Error::Cancelled);
            }
            match self.verify(content)? {
                Verdict::Intact => {}
                Verdict::Upgraded => report.upgraded += 1,
                Verdict::Mismatch(kind) => {
                    let mismatch = Mismatch {
                        content_id: content.id,
                        path: content.path.clone(),
                        kind,
                    };
                    warn!("Integrity mismatch: {}", mismatch);
                    report.mismatches.push(mismatch);
                }
            }
            report.checked += 1;
            if let Some(events) = self.events {
                events.emit(RunEvent::CheckProgress {
                    checked: report.checked,
                    total: report.total,
                });
            }
            if self.stop_at_first_mismatch && !report.mismatches.is_empty() {
                break;
            }
        }

        info!(
            "Integrity check done: {}/{} checked, {} mismatches, {} upgraded",
            report.checked,
            report.total,
            report.mismatches.len(),
            report.upgraded
        );
        Ok(report)
    }

    fn verify(&self, content: &FileContent) -> Result<Verdict> {
        let kind = content.checksum.kind();
        let digest = match self.rehash(content, kind == ChecksumKind::Legacy) {
            Ok(digest) => digest,
            Err(e) => return Ok(Verdict::Mismatch(MismatchKind::Unreadable(e.to_string()))),
        };

        if digest.length != content.length {
            return Ok(Verdict::Mismatch(MismatchKind::Length {
                expected: content.length,
                actual: digest.length,
            }));
        }

        let actual = match kind {
            ChecksumKind::Legacy => digest.legacy.as_ref(),
            _ => Some(&digest.checksum),
        };
        match actual {
            Some(actual) if *actual == content.checksum => {}
            actual => {
                return Ok(Verdict::Mismatch(MismatchKind::Checksum {
                    expected: content.checksum.to_string(),
                    actual: actual.map(|c| c.to_string()).unwrap_or_default(),
                }))
            }
        }

        if kind == ChecksumKind::Legacy {
            self.catalog.update_checksum(content.id, &digest.checksum)?;
            debug!("Upgraded checksum of content {} to the strong hash", content.id);
            return Ok(Verdict::Upgraded);
        }
        Ok(Verdict::Intact)
    }

    fn rehash(&self, content: &FileContent, with_legacy: bool) -> Result<Digest> {
        let mut reader = self
            .store
            .open(&content.path, content.compression, content.length)?;
        let mut sink = if with_legacy {
            DigestWriter::with_legacy()
        } else {
            DigestWriter::new()
        };
        io::copy(&mut reader, &mut sink)?;
        Ok(sink.finalize())
    }
}

enum Verdict {
    Intact,
    Upgraded,
    Mismatch(MismatchKind),
}
