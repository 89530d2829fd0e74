//! Streaming FASTA parser.
//!
//! A deterministic state machine over the input byte stream. A record
//! begins at `>`; the identifier runs to the first blank or newline, the
//! rest of that line is the definition line, and subsequent lines are
//! sequence data until the next `>` at column 0 or end of stream.
//!
//! Carriage returns are dropped silently. Data characters must be
//! alphabetic or `*`; anything else is reported through the error callback
//! with the current line number and record id. Returning
//! [`ErrorAction::Continue`] drops the offending byte and resumes parsing.

use std::io::Read;

use crate::error::{Result, SigmerError};

/// What the error callback wants the parser to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Drop the offending byte and keep parsing.
    Continue,
    /// Abandon the stream; no further callbacks fire.
    Stop,
}

/// A completed FASTA record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FastaRecord {
    pub id: String,
    /// Definition line text following the id, without the separating blank.
    pub def: String,
    pub seq: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Id,
    Defline,
    Data,
    IdOrData,
}

pub struct FastaParser {
    state: State,
    line_number: usize,
    cur_id: String,
    cur_def: String,
    cur_seq: String,
}

impl Default for FastaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FastaParser {
    pub fn new() -> Self {
        FastaParser {
            state: State::Start,
            line_number: 1,
            cur_id: String::new(),
            cur_def: String::new(),
            cur_seq: String::new(),
        }
    }

    fn reset_record(&mut self) {
        self.cur_id.clear();
        self.cur_def.clear();
        self.cur_seq.clear();
    }

    /// Parse a whole stream, invoking `on_record` for each completed record
    /// and `on_error` for each malformed byte.
    pub fn parse<R, F, E>(&mut self, mut reader: R, mut on_record: F, mut on_error: E) -> Result<()>
    where
        R: Read,
        F: FnMut(FastaRecord),
        E: FnMut(&str, usize, &str) -> ErrorAction,
    {
        self.state = State::Start;
        self.line_number = 1;
        self.reset_record();

        let mut chunk = [0u8; 8192];
        loop {
            let n = reader
                .read(&mut chunk)
                .map_err(|e| SigmerError::io("<fasta stream>", e))?;
            if n == 0 {
                break;
            }
            for &byte in &chunk[..n] {
                if !self.parse_byte(byte, &mut on_record, &mut on_error) {
                    return Ok(());
                }
            }
        }
        self.finish(&mut on_record);
        Ok(())
    }

    /// Feed one byte through the state machine. Returns false when the
    /// error callback asked to stop.
    fn parse_byte<F, E>(&mut self, c: u8, on_record: &mut F, on_error: &mut E) -> bool
    where
        F: FnMut(FastaRecord),
        E: FnMut(&str, usize, &str) -> ErrorAction,
    {
        if c == b'\n' {
            self.line_number += 1;
        }
        if c == b'\r' {
            return true;
        }

        let mut err: Option<String> = None;
        match self.state {
            State::Start => {
                if c == b'>' {
                    self.state = State::Id;
                } else {
                    err = Some("Missing >".to_string());
                }
            }
            State::Id => {
                if c == b' ' || c == b'\t' {
                    self.state = State::Defline;
                } else if c == b'\n' {
                    self.state = State::Data;
                } else {
                    self.cur_id.push(c as char);
                }
            }
            State::Defline => {
                if c == b'\n' {
                    self.state = State::Data;
                } else {
                    self.cur_def.push(c as char);
                }
            }
            State::Data => {
                if c == b'\n' {
                    self.state = State::IdOrData;
                } else if c.is_ascii_alphabetic() || c == b'*' {
                    self.cur_seq.push(c as char);
                } else {
                    err = Some(format!("Bad data character '{}'", c as char));
                }
            }
            State::IdOrData => {
                if c == b'>' {
                    self.emit(on_record);
                    self.state = State::Id;
                } else if c == b'\n' {
                    // blank line; stay put
                } else if c.is_ascii_alphabetic() || c == b'*' {
                    self.cur_seq.push(c as char);
                    self.state = State::Data;
                } else {
                    err = Some(format!("Bad id or data character '{}'", c as char));
                }
            }
        }

        if let Some(msg) = err {
            log::warn!(
                "fasta parse error: {} at line {} id='{}'",
                msg,
                self.line_number,
                self.cur_id
            );
            return on_error(&msg, self.line_number, &self.cur_id) == ErrorAction::Continue;
        }
        true
    }

    /// Flush the trailing record at end of stream.
    fn finish<F: FnMut(FastaRecord)>(&mut self, on_record: &mut F) {
        if !self.cur_id.is_empty() || !self.cur_seq.is_empty() {
            self.emit(on_record);
        }
    }

    fn emit<F: FnMut(FastaRecord)>(&mut self, on_record: &mut F) {
        let record = FastaRecord {
            id: std::mem::take(&mut self.cur_id),
            def: std::mem::take(&mut self.cur_def),
            seq: std::mem::take(&mut self.cur_seq),
        };
        on_record(record);
    }
}

/// Parse a stream, collecting records and logging (then skipping past) any
/// malformed bytes. The default policy for every bulk ingestion path.
pub fn read_fasta<R: Read>(reader: R) -> Result<Vec<FastaRecord>> {
    let mut records = Vec::new();
    FastaParser::new().parse(reader, |r| records.push(r), |_, _, _| ErrorAction::Continue)?;
    Ok(records)
}
