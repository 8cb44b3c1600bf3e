//! Scripted in-memory port for unit tests.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// Mock port with a scripted read side and a recording write side.
///
/// Each element of the script is one "arrival": `bytes_to_read` reports the
/// front arrival's length, and a read consumes from it. An empty script
/// behaves like an idle serial port (reads time out).
pub struct MockPort {
    script: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    timeout: Duration,
    timeouts_set: Vec<Duration>,
    reconnects: usize,
}

impl MockPort {
    /// Create a mock port with the given read script.
    pub fn new(script: &[Vec<u8>]) -> Self {
        Self {
            script: script.iter().cloned().collect(),
            written: Vec::new(),
            timeout: Duration::from_millis(1000),
            timeouts_set: Vec::new(),
            reconnects: 0,
        }
    }

    /// Everything written to the port so far.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Number of reconnect calls observed.
    pub fn reconnects(&self) -> usize {
        self.reconnects
    }

    /// Every timeout passed to `set_timeout`, in call order.
    pub fn timeouts_set(&self) -> &[Duration] {
        &self.timeouts_set
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let Some(front) = self.script.front_mut() else {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        };
        let n = buf.len().min(front.len());
        buf[..n].copy_from_slice(&front[..n]);
        front.drain(..n);
        if front.is_empty() {
            self.script.pop_front();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        self.timeouts_set.push(timeout);
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn bytes_to_read(&mut self) -> Result<u32> {
        // An empty arrival is a pause marker: it ends one buffered sweep,
        // then the next sweep proceeds past it.
        match self.script.front() {
            Some(front) if front.is_empty() => {
                self.script.pop_front();
                Ok(0)
            },
            Some(front) => Ok(front.len() as u32),
            None => Ok(0),
        }
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn reconnect(&mut self) -> Result<()> {
        self.reconnects += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
