//! Bounded output queue serviced by a single writer thread.
//!
//! Worker tasks format complete output lines and push them through a
//! bounded channel; one consumer serializes the writes. Write errors are
//! held until [`OutputWriter::finish`] so workers never observe them
//! mid-run.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};

use crate::error::{Result, SigmerError};

/// Queue depth before senders block; keeps memory bounded under fast
/// producers.
const QUEUE_CAPACITY: usize = 100;

pub struct OutputWriter {
    sender: Option<Sender<String>>,
    handle: JoinHandle<io::Result<()>>,
}

impl OutputWriter {
    /// Write to `path`, or stdout when `None`.
    pub fn create(path: Option<&Path>) -> Result<OutputWriter> {
        let sink: Box<dyn Write + Send> = match path {
            Some(p) => Box::new(BufWriter::new(
                File::create(p).map_err(|e| SigmerError::io(p, e))?,
            )),
            None => Box::new(BufWriter::new(io::stdout())),
        };
        let (sender, receiver) = bounded::<String>(QUEUE_CAPACITY);
        let handle = std::thread::spawn(move || -> io::Result<()> {
            let mut sink = sink;
            for line in receiver {
                sink.write_all(line.as_bytes())?;
                sink.write_all(b"\n")?;
            }
            sink.flush()
        });
        Ok(OutputWriter {
            sender: Some(sender),
            handle,
        })
    }

    /// Channel end handed to worker tasks. Send failures mean the writer
    /// thread died; the underlying error is reported by `finish`.
    pub fn sender(&self) -> &Sender<String> {
        self.sender.as_ref().expect("writer not finished")
    }

    /// Close the queue, join the writer and surface any deferred error.
    pub fn finish(mut self) -> Result<()> {
        drop(self.sender.take());
        match self.handle.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SigmerError::io("<output>", e)),
            Err(_) => Err(SigmerError::Internal("output writer panicked".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_arrive_in_send_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        let writer = OutputWriter::create(Some(&path)).unwrap();
        for i in 0..250 {
            writer.sender().send(format!("line{}", i)).unwrap();
        }
        writer.finish().unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 250);
        assert_eq!(lines[0], "line0");
        assert_eq!(lines[249], "line249");
    }

    #[test]
    fn create_fails_for_unwritable_path() {
        let err = OutputWriter::create(Some(Path::new("/nonexistent-dir/out.tsv")));
        assert!(err.is_err());
    }
}
