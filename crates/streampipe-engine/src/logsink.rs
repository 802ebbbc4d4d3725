use std::collections::VecDeque;
use std::io::{self, Write};

/// Borne de rétention du stderr d'un sous-processus pour les messages d'erreur
pub const STDERR_TAIL_LIMIT: usize = 4096;

/// Writer qui préfixe chaque ligne non vide avant de la transmettre au
/// writer interne. Le découpage conserve l'élément vide final, ainsi un
/// `\n` terminal n'est pas dupliqué.
pub struct PrefixWriter<W: Write> {
    inner: W,
    prefix: String,
}

impl<W: Write> PrefixWriter<W> {
    pub fn new(inner: W, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for PrefixWriter<W> {
    /// Renvoie la taille de la sortie préfixée, pas celle de l'entrée
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        let lines: Vec<&str> = text.split('\n').collect();

        let mut out = String::with_capacity(text.len() + lines.len() * self.prefix.len());
        for (i, line) in lines.iter().enumerate() {
            if !line.is_empty() {
                out.push_str(&self.prefix);
                out.push_str(line);
            }
            if i + 1 < lines.len() {
                out.push('\n');
            }
        }

        self.inner.write_all(out.as_bytes())?;
        Ok(out.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Queue des derniers octets de stderr d'un sous-processus, bornée
#[derive(Debug)]
pub struct StderrTail {
    buf: VecDeque<u8>,
    limit: usize,
}

impl StderrTail {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Ajouter des octets, en évinçant les plus anciens au-delà de la borne
    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.buf.len() == self.limit {
                self.buf.pop_front();
            }
            self.buf.push_back(b);
        }
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&Vec::from(self.buf)).trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixed(prefix: &str, chunks: &[&str]) -> (String, Vec<usize>) {
        let mut writer = PrefixWriter::new(Vec::new(), prefix);
        let mut counts = Vec::new();
        for chunk in chunks {
            counts.push(writer.write(chunk.as_bytes()).unwrap());
        }
        (String::from_utf8(writer.into_inner()).unwrap(), counts)
    }

    #[test]
    fn test_prefix_on_every_line() {
        let (out, _) = prefixed("[PRE] ", &["first\nsecond\n"]);
        assert_eq!(out, "[PRE] first\n[PRE] second\n");
    }

    #[test]
    fn test_trailing_newline_not_duplicated() {
        let (out, _) = prefixed("> ", &["one\n"]);
        assert_eq!(out, "> one\n");
    }

    #[test]
    fn test_empty_lines_pass_through() {
        let (out, _) = prefixed("> ", &["a\n\nb\n"]);
        assert_eq!(out, "> a\n\n> b\n");
    }

    #[test]
    fn test_write_returns_prefixed_length() {
        let (out, counts) = prefixed("[STREAMING] ", &["x\n", "yz\n"]);
        assert_eq!(out, "[STREAMING] x\n[STREAMING] yz\n");
        assert_eq!(counts, vec!["[STREAMING] x\n".len(), "[STREAMING] yz\n".len()]);
        assert_eq!(counts.iter().sum::<usize>(), out.len());
    }

    #[test]
    fn test_line_without_newline() {
        let (out, counts) = prefixed("p:", &["partial"]);
        assert_eq!(out, "p:partial");
        assert_eq!(counts, vec!["p:partial".len()]);
    }

    #[test]
    fn test_tail_keeps_only_last_bytes() {
        let mut tail = StderrTail::new(8);
        tail.push(b"0123456789abcdef");
        assert_eq!(tail.into_string(), "89abcdef");
    }

    #[test]
    fn test_tail_trims_trailing_newline() {
        let mut tail = StderrTail::new(64);
        tail.push(b"error: something broke\n");
        assert_eq!(tail.into_string(), "error: something broke");
    }
}
