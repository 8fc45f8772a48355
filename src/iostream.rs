//! The byte-oriented transport consumed by the device backends.
//!
//! Concrete serial ports (and the platform enumeration behind them) live
//! outside this crate; the protocol core only ever sees this trait.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Hardware,
    Software,
}

/// Serial line parameters, in the `baud/bits/parity/stop/flow` order the
/// family tables quote them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineParams {
    pub baudrate: u32,
    pub databits: u8,
    pub parity: Parity,
    pub stopbits: StopBits,
    pub flow: FlowControl,
}

impl LineParams {
    pub const fn new(
        baudrate: u32,
        databits: u8,
        parity: Parity,
        stopbits: StopBits,
        flow: FlowControl,
    ) -> Self {
        Self {
            baudrate,
            databits,
            parity,
            stopbits,
            flow,
        }
    }
}

/// Read/write deadline. `Blocking` waits forever, `None` polls, `Ms(n)`
/// waits at most `n` milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Blocking,
    None,
    Ms(u32),
}

/// Which transmit queue to drop on `purge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
    All,
}

/// Modem status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Dcd,
    Cts,
    Dsr,
    Rng,
}

/// A full-duplex byte pipe with timeouts and modem control. No framing.
///
/// `read` and `write` transfer as many bytes as the deadline allows and
/// report the count; the `read_exact`/`write_all` helpers apply the crate's
/// error policy (short read ⇒ `Timeout`, short write ⇒ `Io`).
pub trait IoStream {
    fn configure(&mut self, params: &LineParams) -> Result<()>;

    fn set_timeout(&mut self, timeout: Timeout) -> Result<()>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Drop pending bytes from the given queue.
    fn purge(&mut self, direction: Direction) -> Result<()>;

    fn set_dtr(&mut self, level: bool) -> Result<()>;

    fn set_rts(&mut self, level: bool) -> Result<()>;

    fn get_line(&mut self, _line: Line) -> Result<bool> {
        Err(Error::Unsupported)
    }

    /// Number of bytes already buffered for reading.
    fn get_received(&mut self) -> Result<usize>;

    /// Transport-clocked delay, so protocol pacing follows the same fake
    /// clock as the byte pipe in tests.
    fn sleep(&mut self, ms: u32);

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = self.read(&mut buf[offset..])?;
            if n == 0 {
                return Err(Error::Timeout);
            }
            offset += n;
        }
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = self.write(&buf[offset..])?;
            if n == 0 {
                return Err(Error::Io("short write".into()));
            }
            offset += n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePort;

    #[test]
    fn test_read_exact_short_read_is_timeout() {
        let mut port = FakePort::new();
        port.push_rx(&[0x01, 0x02]);

        let mut buf = [0u8; 4];
        assert!(matches!(port.read_exact(&mut buf), Err(Error::Timeout)));
    }

    #[test]
    fn test_read_exact_drains_buffered_bytes() {
        let mut port = FakePort::new();
        port.push_rx(&[0x10, 0x20, 0x30]);

        let mut buf = [0u8; 3];
        port.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0x10, 0x20, 0x30]);
        assert_eq!(port.get_received().unwrap(), 0);
    }
}
