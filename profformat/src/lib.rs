// Copyright 2017 ETH Zurich. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Record format and reader for timestamped profile logs.
//!
//! Every line of a profile log starts with a float timestamp (seconds
//! since the epoch), followed by a comma and free-form event or state
//! text. The text itself may contain further commas; only the first
//! comma delimits the timestamp.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Event time in seconds since the epoch (midnight, January 1, 1970 UTC).
pub type Timestamp = f64;

/// One decoded profile log line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfRecord {
    pub timestamp: Timestamp,
    /// Everything after the leading `<timestamp>,` of the line.
    pub text: String,
}

impl ProfRecord {
    /// The comma-separated fields of the record text, trimmed.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.text.split(',').map(str::trim)
    }

    /// True when every marker occurs somewhere in the record text.
    pub fn contains_all(&self, markers: &[&str]) -> bool {
        markers.iter().all(|m| self.text.contains(m))
    }

    /// True when some field equals the marker exactly. Unlike
    /// [`contains_all`](Self::contains_all) this never matches a marker
    /// as a substring of a longer event name.
    pub fn has_field(&self, marker: &str) -> bool {
        self.fields().any(|f| f == marker)
    }
}

#[derive(Debug)]
pub enum ProfError {
    /// The log file does not exist.
    NotFound(PathBuf),
    Io(io::Error),
    /// A consumed line did not parse as `<float>,<text>`.
    MalformedLine { line: u64, content: String },
}

impl From<io::Error> for ProfError {
    fn from(io: io::Error) -> Self {
        ProfError::Io(io)
    }
}

impl fmt::Display for ProfError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ProfError::NotFound(ref path) => write!(f, "log not found: {}", path.display()),
            ProfError::Io(ref io) => io.fmt(f),
            ProfError::MalformedLine { line, ref content } => {
                write!(f, "malformed log line {}: {:?}", line, content)
            }
        }
    }
}

impl std::error::Error for ProfError {}

/// Forward-only reader over a profile log.
///
/// The reader owns its source, so the underlying file is closed on
/// every exit path, including early abandonment after a malformed
/// line. Re-`open`ing the same path restarts from the beginning.
pub struct ProfReader<R> {
    reader: R,
    line: u64,
}

impl ProfReader<BufReader<File>> {
    /// Open a profile log; fails with [`ProfError::NotFound`] when the
    /// path does not point to a file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ProfError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ProfError::NotFound(path.to_path_buf()));
        }
        Ok(ProfReader::from_reader(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> ProfReader<R> {
    pub fn from_reader(reader: R) -> Self {
        ProfReader { reader, line: 0 }
    }

    fn next_record(&mut self) -> Result<Option<ProfRecord>, ProfError> {
        let mut buf = String::new();
        loop {
            buf.clear();
            if self.reader.read_line(&mut buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            let line = buf.trim_end();
            // a trailing blank line is common and carries no event
            if line.is_empty() {
                continue;
            }
            return match parse_line(line) {
                Some(rec) => Ok(Some(rec)),
                None => Err(ProfError::MalformedLine {
                    line: self.line,
                    content: line.to_owned(),
                }),
            };
        }
    }

    /// Read forward until a line contains all of `markers`; `Ok(None)`
    /// when the end of the log is reached first.
    pub fn scan_until(&mut self, markers: &[&str]) -> Result<Option<ProfRecord>, ProfError> {
        while let Some(rec) = self.next_record()? {
            if rec.contains_all(markers) {
                return Ok(Some(rec));
            }
        }
        Ok(None)
    }

    /// The remaining records as a lazy, forward-only sequence.
    pub fn records(self) -> Records<R> {
        Records { inner: self }
    }
}

pub struct Records<R> {
    inner: ProfReader<R>,
}

impl<R: BufRead> Iterator for Records<R> {
    type Item = Result<ProfRecord, ProfError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next_record().transpose()
    }
}

fn parse_line(line: &str) -> Option<ProfRecord> {
    let comma = line.find(',')?;
    let timestamp = line[..comma].trim().parse::<f64>().ok()?;
    Some(ProfRecord {
        timestamp,
        text: line[comma + 1..].to_owned(),
    })
}
