use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy)]
enum Echo {
    Stdout,
    Stderr,
}

/// Append-only text stream fed by the BIOS handlers. In standard mode the
/// stream additionally echoes straight to stdout/stderr; in interactive mode
/// the buffered contents back the Output and Debug panels.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    buffer: Mutex<String>,
    echo: Option<Echo>,
}

impl Stream {
    pub fn buffered() -> Self {
        Self::new(None)
    }

    pub fn echoing_stdout() -> Self {
        Self::new(Some(Echo::Stdout))
    }

    pub fn echoing_stderr() -> Self {
        Self::new(Some(Echo::Stderr))
    }

    fn new(echo: Option<Echo>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                buffer: Mutex::new(String::new()),
                echo,
            }),
        }
    }

    pub fn push_char(&self, c: char) {
        let mut buffer = self.inner.buffer.lock().unwrap();
        buffer.push(c);
        self.echo(&c.to_string());
    }

    pub fn push_str(&self, text: &str) {
        let mut buffer = self.inner.buffer.lock().unwrap();
        buffer.push_str(text);
        self.echo(text);
    }

    pub fn push_line(&self, line: impl AsRef<str>) {
        let mut buffer = self.inner.buffer.lock().unwrap();
        buffer.push_str(line.as_ref());
        buffer.push('\n');
        self.echo(&format!("{}\n", line.as_ref()));
    }

    /// Snapshot of everything written so far.
    pub fn contents(&self) -> String {
        self.inner.buffer.lock().unwrap().clone()
    }

    fn echo(&self, text: &str) {
        match self.inner.echo {
            Some(Echo::Stdout) => {
                let mut out = std::io::stdout();
                let _ = out.write_all(text.as_bytes());
                let _ = out.flush();
            }
            Some(Echo::Stderr) => {
                let mut err = std::io::stderr();
                let _ = err.write_all(text.as_bytes());
                let _ = err.flush();
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Stream;

    #[test]
    fn readers_see_a_prefix_of_the_writes() {
        let stream = Stream::buffered();
        stream.push_char('H');
        stream.push_str("i");
        assert_eq!(stream.contents(), "Hi");

        stream.push_line("!");
        assert_eq!(stream.contents(), "Hi!\n");
    }

    #[test]
    fn clones_share_the_buffer() {
        let stream = Stream::buffered();
        let writer = stream.clone();
        writer.push_str("shared");
        assert_eq!(stream.contents(), "shared");
    }
}
