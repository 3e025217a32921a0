//! Streaming reader for delimited export files
//!
//! Exports arrive as UTF-16 text. The byte stream is transcoded to UTF-8 as it
//! is read so the CSV parser never needs the whole file in memory, and records
//! are handed out in bounded chunks.

use csv::{ReaderBuilder, StringRecord};
use dex_common::{DexError, Result};
use encoding_rs::{Decoder, DecoderResult, Encoding};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::header::NormalizedHeader;

const INPUT_BUFFER_SIZE: usize = 64 * 1024;

/// Resolve a WHATWG encoding label such as `utf-16`, `utf-8` or `latin1`
pub fn encoding_for_label(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| DexError::Encoding(label.to_string()))
}

/// [`Read`] adapter that transcodes `inner` from `encoding` to UTF-8.
///
/// A byte order mark overrides the configured encoding and is stripped.
/// A malformed sequence fails the read with [`io::ErrorKind::InvalidData`].
pub struct DecodingReader<R> {
    inner: R,
    decoder: Decoder,
    input: Vec<u8>,
    input_start: usize,
    input_end: usize,
    output: Vec<u8>,
    output_start: usize,
    output_end: usize,
    eof: bool,
    finished: bool,
    consumed: u64,
    malformed: Option<io::Error>,
}

impl<R: Read> DecodingReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder(),
            input: vec![0; INPUT_BUFFER_SIZE],
            input_start: 0,
            input_end: 0,
            // Worst case is three UTF-8 bytes per input byte
            output: vec![0; INPUT_BUFFER_SIZE * 3 + 16],
            output_start: 0,
            output_end: 0,
            eof: false,
            finished: false,
            consumed: 0,
            malformed: None,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        if self.input_start == self.input_end && !self.eof {
            let n = self.inner.read(&mut self.input)?;
            self.input_start = 0;
            self.input_end = n;
            self.eof = n == 0;
        }

        let (result, read, written) = self.decoder.decode_to_utf8_without_replacement(
            &self.input[self.input_start..self.input_end],
            &mut self.output,
            self.eof,
        );
        self.input_start += read;
        self.consumed += read as u64;
        self.output_start = 0;
        self.output_end = written;

        match result {
            DecoderResult::Malformed(bad, _) => {
                // Text decoded before the bad sequence is still handed out
                self.finished = true;
                self.malformed = Some(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "malformed {} sequence ({} bytes) near byte offset {}",
                        self.decoder.encoding().name(),
                        bad,
                        self.consumed
                    ),
                ));
                Ok(())
            }
            DecoderResult::InputEmpty if self.eof => {
                self.finished = true;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.output_start < self.output_end {
                let n = buf.len().min(self.output_end - self.output_start);
                buf[..n].copy_from_slice(&self.output[self.output_start..self.output_start + n]);
                self.output_start += n;
                return Ok(n);
            }
            if let Some(err) = self.malformed.take() {
                return Err(err);
            }
            if self.finished || buf.is_empty() {
                return Ok(0);
            }
            self.refill()?;
        }
    }
}

/// Header plus a cursor over the data rows of one source file
pub struct ChunkedReader<R: Read> {
    reader: csv::Reader<DecodingReader<R>>,
    header: NormalizedHeader,
}

impl ChunkedReader<BufReader<File>> {
    /// Open `path`, decode it with `encoding` and read the header row.
    pub fn open(path: &Path, encoding: &'static Encoding, delimiter: u8) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), encoding, delimiter)
            .map_err(|e| match e {
                DexError::MissingHeader(_) => DexError::MissingHeader(path.to_path_buf()),
                other => other,
            })
    }
}

impl<R: Read> ChunkedReader<R> {
    pub fn from_reader(inner: R, encoding: &'static Encoding, delimiter: u8) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(DecodingReader::new(inner, encoding));

        let mut raw_header = StringRecord::new();
        if !reader.read_record(&mut raw_header)? {
            return Err(DexError::MissingHeader(Default::default()));
        }

        Ok(Self {
            reader,
            header: NormalizedHeader::from_raw(raw_header.iter()),
        })
    }

    pub fn header(&self) -> &NormalizedHeader {
        &self.header
    }

    /// Read up to `size` raw records; `None` once the file is exhausted.
    pub fn next_chunk(&mut self, size: usize) -> Result<Option<Vec<StringRecord>>> {
        let mut chunk = Vec::with_capacity(size.min(INPUT_BUFFER_SIZE));
        let mut record = StringRecord::new();

        while chunk.len() < size && self.reader.read_record(&mut record)? {
            chunk.push(record.clone());
        }

        Ok(if chunk.is_empty() { None } else { Some(chunk) })
    }
}
