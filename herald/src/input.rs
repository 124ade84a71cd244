use std::io::{self, BufRead, IsTerminal};

/// The lines of one notification. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    lines: Vec<String>,
}

impl Request {
    pub fn new(lines: Vec<String>) -> Option<Self> {
        (!lines.is_empty()).then_some(Self { lines })
    }

    pub fn lines(&self) -> &[String] { &self.lines }
}

/// Rewrites line terminators to spaces and keeps at most `max_len` characters.
pub fn normalize(raw: &str, max_len: usize) -> String {
    raw.replace("\r\n", " ")
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(max_len)
        .collect()
}

/// One line per argument.
pub fn from_args<S: AsRef<str>>(args: &[S], max_len: usize) -> Option<Request> {
    Request::new(args.iter().map(|a| normalize(a.as_ref(), max_len)).collect())
}

/// Reads until end of stream, one line per `\n`-terminated chunk.
pub fn from_reader<R: BufRead>(mut reader: R, max_len: usize) -> io::Result<Option<Request>> {
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 { break; }
        if buf.last() == Some(&b'\n') { buf.pop(); }
        if buf.last() == Some(&b'\r') { buf.pop(); }
        let text = String::from_utf8_lossy(&buf);
        lines.push(text.chars().take(max_len).collect());
    }
    Ok(Request::new(lines))
}

/// `None` when stdin is a terminal: nobody is piping anything in.
pub fn from_stdin(max_len: usize) -> io::Result<Option<Request>> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    from_reader(stdin.lock(), max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAXLEN: usize = 82;

    #[test]
    fn embedded_newline_becomes_space() {
        let req = from_args(&["a\nb"], MAXLEN).unwrap();
        assert_eq!(req.lines(), ["a b"]);
        assert_eq!(normalize("a\r\nb", MAXLEN), "a b");
    }

    #[test]
    fn long_lines_are_truncated() {
        let long = "x".repeat(MAXLEN + 50);
        let req = from_args(&[long.as_str()], MAXLEN).unwrap();
        assert_eq!(req.lines()[0].chars().count(), MAXLEN);

        let piped = format!("{long}\nok\n");
        let req = from_reader(piped.as_bytes(), MAXLEN).unwrap().unwrap();
        assert_eq!(req.lines()[0].len(), MAXLEN);
        assert_eq!(req.lines()[1], "ok");
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(normalize("héllo wörld", 4), "héll");
    }

    #[test]
    fn each_argument_is_one_line() {
        let req = from_args(&["first", "", "third"], MAXLEN).unwrap();
        assert_eq!(req.lines(), ["first", "", "third"]);
    }

    #[test]
    fn no_arguments_is_no_work() {
        assert_eq!(from_args::<&str>(&[], MAXLEN), None);
    }

    #[test]
    fn stream_splits_on_newline() {
        let req = from_reader(&b"one\r\ntwo\nthree"[..], MAXLEN).unwrap().unwrap();
        assert_eq!(req.lines(), ["one", "two", "three"]);
    }

    #[test]
    fn empty_stream_is_no_work() {
        assert_eq!(from_reader(&b""[..], MAXLEN).unwrap(), None);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let req = from_reader(&b"ok \xff\n"[..], MAXLEN).unwrap().unwrap();
        assert_eq!(req.lines(), ["ok \u{fffd}"]);
    }
}
