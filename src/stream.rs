use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use log::warn;

/// A source of bytes for the tokenizer.
pub trait ByteStream {
    fn at_end(&mut self) -> bool;

    /// The next byte, or `None` at the end of the stream.
    fn next_byte(&mut self) -> Option<u8>;
}

/// Bytes of an in-memory string.
pub struct StringStream {
    bytes: Vec<u8>,
    pos: usize,
}

impl StringStream {
    pub fn new(source: &str) -> Self {
        StringStream {
            bytes: source.as_bytes().to_vec(),
            pos: 0,
        }
    }
}

impl ByteStream for StringStream {
    fn at_end(&mut self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn next_byte(&mut self) -> Option<u8> {
        let byte = self.bytes.get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }
}

/// Bytes of a file, read through a buffer. A read error ends the stream.
pub struct FileStream {
    reader: BufReader<File>,
}

impl FileStream {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(FileStream {
            reader: BufReader::new(file),
        })
    }
}

impl ByteStream for FileStream {
    fn at_end(&mut self) -> bool {
        match self.reader.fill_buf() {
            Ok(buf) => buf.is_empty(),
            Err(e) => {
                warn!("read error: {}", e);
                true
            }
        }
    }

    fn next_byte(&mut self) -> Option<u8> {
        if self.at_end() {
            return None;
        }
        let byte = self.reader.fill_buf().ok()?.first().copied()?;
        self.reader.consume(1);
        Some(byte)
    }
}
