//! Terminal output filtering for transports that cannot render a terminal

/// Longest unterminated escape sequence carried over to the next chunk
const MAX_PENDING_ESCAPE: usize = 4096;

/// Strip escape sequences and non-printable control characters.
///
/// Removes CSI (`ESC [`), OSC (`ESC ]`), DCS/SOS/PM/APC string sequences and
/// two-byte escapes. Carriage returns are dropped, a backspace erases the
/// previous character, and `\n` / `\t` are kept.
pub fn strip_ansi(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    strip_into(s, &mut result);
    result
}

/// Strip `s` into `result`.
///
/// Returns the byte offset of an escape sequence that is still open at the
/// end of `s`; nothing from that offset on is written.
fn strip_into(s: &str, result: &mut String) -> Option<usize> {
    let mut chars = s.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match c {
            '\x1b' => match chars.next().map(|(_, c)| c) {
                None => return Some(start),
                Some('[') => {
                    // Parameters and intermediates (0x20-0x3F), then one final byte
                    loop {
                        match chars.peek() {
                            None => return Some(start),
                            Some(&(_, next))
                                if next.is_ascii() && (0x20..=0x3F).contains(&(next as u8)) =>
                            {
                                chars.next();
                            }
                            Some(&(_, next)) => {
                                if next.is_ascii() && (0x40..=0x7E).contains(&(next as u8)) {
                                    chars.next();
                                }
                                break;
                            }
                        }
                    }
                }
                // OSC ends with BEL or ST; DCS, SOS, PM and APC end with ST
                Some(kind @ (']' | 'P' | 'X' | '^' | '_')) => loop {
                    match chars.next().map(|(_, c)| c) {
                        None => return Some(start),
                        Some('\x07') if kind == ']' => break,
                        Some('\x1b') => match chars.peek() {
                            None => return Some(start),
                            Some(&(_, '\\')) => {
                                chars.next();
                                break;
                            }
                            Some(_) => {}
                        },
                        Some(_) => {}
                    }
                },
                // Charset designation takes one more byte
                Some('(' | ')' | '*' | '+') => {
                    if chars.next().is_none() {
                        return Some(start);
                    }
                }
                _ => {}
            },
            '\x08' => {
                result.pop();
            }
            '\n' | '\t' => result.push(c),
            c if c.is_control() => {}
            c => result.push(c),
        }
    }
    None
}

/// [`strip_ansi`] over a stream of chunks.
///
/// An escape sequence cut off at the end of one chunk is held back and
/// completed by the next, so its tail never shows up as text.
#[derive(Debug, Default)]
pub struct AnsiStripper {
    pending: String,
}

impl AnsiStripper {
    /// Strip the next chunk of decoded text
    pub fn strip(&mut self, text: &str) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.push_str(text);
        let mut result = String::with_capacity(input.len());
        if let Some(open_at) = strip_into(&input, &mut result) {
            // A sequence this long is garbage; drop it rather than hold it forever
            if input.len() - open_at <= MAX_PENDING_ESCAPE {
                self.pending = input.split_off(open_at);
            }
        }
        result
    }

    /// Discard a sequence that never completed
    pub fn finish(&mut self) {
        self.pending.clear();
    }
}

/// Decodes a byte stream chunk by chunk without splitting UTF-8 sequences.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    /// Decode `bytes`, holding back an incomplete trailing sequence for the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let keep_from = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // error_len() == None means the input ended mid-sequence
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        let tail = self.pending.split_off(keep_from);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        text
    }

    /// Decode whatever is still held back
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Keep at most the last `max_chars` characters of `s`.
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_sgr_and_cr() {
        assert_eq!(strip_ansi("\x1b[32mHello\x1b[0m World\r\n"), "Hello World\n");
    }

    #[test]
    fn test_strip_osc_title() {
        assert_eq!(strip_ansi("\x1b]0;user@host: ~\x07user@host:~$ "), "user@host:~$ ");
        assert_eq!(strip_ansi("\x1b]2;title\x1b\\ok"), "ok");
    }

    #[test]
    fn test_strip_dcs_and_charset() {
        assert_eq!(strip_ansi("a\x1bP1$r0m\x1b\\b"), "ab");
        assert_eq!(strip_ansi("\x1b(Bplain"), "plain");
        assert_eq!(strip_ansi("\x1b[?2004hls\x1b[?2004l"), "ls");
    }

    #[test]
    fn test_control_chars() {
        assert_eq!(strip_ansi("bell\x07 tab\there"), "bell tab\there");
        assert_eq!(strip_ansi("abc\x08\x08x"), "ax");
    }

    #[test]
    fn test_stripper_holds_split_sequences() {
        let mut stripper = AnsiStripper::default();
        assert_eq!(stripper.strip("file1 \x1b[01;3"), "file1 ");
        assert_eq!(stripper.strip("4mdir1\x1b[0m\n"), "dir1\n");

        assert_eq!(stripper.strip("a\x1b"), "a");
        assert_eq!(stripper.strip("]0;title"), "");
        assert_eq!(stripper.strip("\x07b"), "b");

        assert_eq!(stripper.strip("x\x1bP1$r"), "x");
        assert_eq!(stripper.strip("0m\x1b"), "");
        assert_eq!(stripper.strip("\\y"), "y");
    }

    #[test]
    fn test_stripper_drops_runaway_sequence() {
        let mut stripper = AnsiStripper::default();
        assert_eq!(stripper.strip("\x1b]0;"), "");
        let junk = "t".repeat(MAX_PENDING_ESCAPE + 1);
        assert_eq!(stripper.strip(&junk), "");
        // Nothing is held any more, so plain text passes straight through
        assert_eq!(stripper.strip("ok"), "ok");
    }

    #[test]
    fn test_utf8_stream_holds_split_sequence() {
        let bytes = "héllo".as_bytes();
        let mut stream = Utf8Stream::default();
        // 'é' is two bytes; cut between them
        assert_eq!(stream.decode(&bytes[..2]), "h");
        assert_eq!(stream.decode(&bytes[2..]), "éllo");
        assert_eq!(stream.finish(), "");
    }

    #[test]
    fn test_utf8_stream_invalid_bytes_are_replaced() {
        let mut stream = Utf8Stream::default();
        assert_eq!(stream.decode(b"a\xffb"), "a\u{fffd}b");
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("abc", 10), "abc");
        assert_eq!(tail_chars("héllo", 4), "éllo");
    }
}
