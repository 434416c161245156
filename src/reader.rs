use crate::error::{ErrorKind, RtResult};
use crate::runtime::Runtime;
use crate::stream::ByteStream;
use crate::value::ObjId;

/// Space, newline, carriage return, tab, vertical tab, backspace, form feed.
fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\n' | b'\r' | b'\t' | 0x0B | 0x08 | 0x0C)
}

fn is_delimiter(byte: u8) -> bool {
    matches!(byte, b'(' | b')' | b'[' | b']' | b'{' | b'}')
}

/// Splits a byte stream into tokens: each bracket is a token of its own,
/// any other run of non-whitespace bytes is one token.
pub struct Tokenizer<S> {
    stream: S,
    /// A delimiter that ended the previous token and is emitted next.
    pending: Option<u8>,
}

impl<S: ByteStream> Tokenizer<S> {
    pub fn new(stream: S) -> Self {
        Tokenizer {
            stream,
            pending: None,
        }
    }

    pub fn next_token(&mut self) -> Option<String> {
        if let Some(delimiter) = self.pending.take() {
            return Some((delimiter as char).to_string());
        }

        let mut token = Vec::new();
        while !self.stream.at_end() {
            let Some(byte) = self.stream.next_byte() else {
                break;
            };
            if is_whitespace(byte) {
                if token.is_empty() {
                    continue;
                }
                break;
            }
            if is_delimiter(byte) {
                if token.is_empty() {
                    return Some((byte as char).to_string());
                }
                self.pending = Some(byte);
                break;
            }
            token.push(byte);
        }

        if token.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&token).into_owned())
        }
    }
}

/// Builds objects from tokens.
pub struct Reader<S> {
    tokens: Tokenizer<S>,
    /// Lists opened and not yet closed by the form being read.
    open: usize,
}

impl<S: ByteStream> Reader<S> {
    pub fn new(stream: S) -> Self {
        Reader {
            tokens: Tokenizer::new(stream),
            open: 0,
        }
    }

    /// Read one form. Returns None at end of input. The returned object is
    /// not rooted; push it before allocating again.
    ///
    /// When reading fails inside a list, the rest of that form is skipped so
    /// the next read starts at the following top-level form.
    pub fn read(&mut self, rt: &mut Runtime) -> RtResult<Option<ObjId>> {
        let token = match self.tokens.next_token() {
            Some(token) => token,
            None => return Ok(None),
        };
        let result = self.parse(rt, &token);
        if result.is_err() {
            self.skip_open_lists();
        }
        self.open = 0;
        result.map(Some)
    }

    fn skip_open_lists(&mut self) {
        while self.open > 0 {
            match self.tokens.next_token().as_deref() {
                Some("(") => self.open += 1,
                Some(")") => self.open -= 1,
                Some(_) => {}
                None => break,
            }
        }
    }

    fn parse(&mut self, rt: &mut Runtime, token: &str) -> RtResult<ObjId> {
        if token == "(" {
            self.open += 1;
            return rt.nested(|rt| self.read_list(rt));
        }
        match token.parse::<f64>() {
            Ok(value) => rt.make_number(value),
            Err(_) => rt.make_symbol(token),
        }
    }

    /// Elements are pushed as they are read and become a list at `)`.
    fn read_list(&mut self, rt: &mut Runtime) -> RtResult<ObjId> {
        let mut count = 0;
        loop {
            let token = match self.tokens.next_token() {
                Some(token) => token,
                None => return rt.raise(ErrorKind::UnexpectedEof),
            };
            if token == ")" {
                self.open -= 1;
                break;
            }
            let element = self.parse(rt, &token)?;
            rt.push(Some(element))?;
            count += 1;
        }
        if count == 0 {
            return Ok(rt.empty_list());
        }
        rt.list_from_stack(count)
    }
}
