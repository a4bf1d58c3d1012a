//! Report sink
//! Append-only line log the engine writes progress, warnings and failures to

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Progress,
    Warning,
    Failure,
}

/// Anything that can receive report lines
pub trait ReportSink: Sync {
    fn append(&self, kind: LineKind, line: &str);

    fn progress(&self, line: &str) {
        self.append(LineKind::Progress, line);
    }

    fn warning(&self, line: &str) {
        self.append(LineKind::Warning, line);
    }

    fn failure(&self, line: &str) {
        self.append(LineKind::Failure, line);
    }
}

/// Terminal output. Warnings and failures always go to stderr; progress
/// goes to stdout unless stdout is reserved for machine-readable output.
pub struct ConsoleSink {
    progress_on_stdout: bool,
}

impl ConsoleSink {
    pub fn new(progress_on_stdout: bool) -> Self {
        ConsoleSink { progress_on_stdout }
    }
}

impl ReportSink for ConsoleSink {
    fn append(&self, kind: LineKind, line: &str) {
        match kind {
            LineKind::Progress if self.progress_on_stdout => println!("{}", line),
            LineKind::Progress => eprintln!("{}", line),
            LineKind::Warning | LineKind::Failure => {
                log::debug!("{:?}: {}", kind, line);
                eprintln!("{}", line);
            }
        }
    }
}

/// Report file written next to the scan ("Generate Report")
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(FileSink {
            file: Mutex::new(file),
        })
    }
}

impl ReportSink for FileSink {
    fn append(&self, _kind: LineKind, line: &str) {
        if let Ok(mut file) = self.file.lock() {
            if let Err(e) = writeln!(file, "{}", line) {
                log::error!("Failed to write report line: {}", e);
            }
        }
    }
}

/// Fan-out to several sinks
pub struct TeeSink<'a> {
    sinks: Vec<&'a dyn ReportSink>,
}

impl<'a> TeeSink<'a> {
    pub fn new(sinks: Vec<&'a dyn ReportSink>) -> Self {
        TeeSink { sinks }
    }
}

impl ReportSink for TeeSink<'_> {
    fn append(&self, kind: LineKind, line: &str) {
        for sink in &self.sinks {
            sink.append(kind, line);
        }
    }
}

/// Passes lines through while counting warnings and failures
pub struct CountingSink<'a> {
    inner: &'a dyn ReportSink,
    warnings: AtomicUsize,
    failures: AtomicUsize,
}

impl<'a> CountingSink<'a> {
    pub fn new(inner: &'a dyn ReportSink) -> Self {
        CountingSink {
            inner,
            warnings: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

impl ReportSink for CountingSink<'_> {
    fn append(&self, kind: LineKind, line: &str) {
        match kind {
            LineKind::Warning => {
                self.warnings.fetch_add(1, Ordering::Relaxed);
            }
            LineKind::Failure => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
            LineKind::Progress => {}
        }
        self.inner.append(kind, line);
    }
}

/// Keeps every line in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(LineKind, String)>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(LineKind, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn count(&self, kind: LineKind) -> usize {
        self.lines().iter().filter(|(k, _)| *k == kind).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, l)| l.contains(needle))
    }
}

#[cfg(test)]
impl ReportSink for MemorySink {
    fn append(&self, kind: LineKind, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((kind, line.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tee_reaches_every_sink() {
        let a = MemorySink::new();
        let b = MemorySink::new();
        let tee = TeeSink::new(vec![&a, &b]);
        tee.warning("Warning: bad USA data at offset 510 - disk corrupt?");
        tee.progress("Reading MFT");
        assert_eq!(a.count(LineKind::Warning), 1);
        assert_eq!(b.count(LineKind::Progress), 1);
    }

    #[test]
    fn test_counting_sink() {
        let inner = MemorySink::new();
        let counting = CountingSink::new(&inner);
        counting.warning("Warning: invalid runlist header 44 (runlist 4401)");
        counting.warning("Warning: bad USA data at offset 1022 - disk corrupt?");
        counting.failure("failed: no DATA");
        counting.progress("Success!");
        assert_eq!(counting.warnings(), 2);
        assert_eq!(counting.failures(), 1);
        assert_eq!(inner.lines().len(), 4);
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        {
            let sink = FileSink::create(&path).unwrap();
            sink.progress("Recovering a/b.txt");
            sink.failure("failed: no DATA");
        }
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Recovering a/b.txt\nfailed: no DATA\n");
    }
}
