//! Scripted in-memory transport for protocol tests.

use std::collections::VecDeque;

use crate::error::Result;
use crate::iostream::{Direction, IoStream, Line, LineParams, Timeout};

/// A fake serial port driven by an expect/respond script.
///
/// Each script entry pairs the exact bytes the device under test must
/// write with the bytes the fake device answers. Reads drain the response
/// queue; an empty queue reads zero bytes, which the `read_exact` helper
/// surfaces as a timeout.
pub(crate) struct FakePort {
    script: VecDeque<(Vec<u8>, Vec<u8>)>,
    rx: VecDeque<u8>,
    pending_tx: Vec<u8>,
    pub(crate) writes: Vec<Vec<u8>>,
    pub(crate) params: Option<LineParams>,
    pub(crate) dtr: bool,
    pub(crate) rts: bool,
    pub(crate) slept_ms: u32,
}

impl FakePort {
    pub(crate) fn new() -> Self {
        Self {
            script: VecDeque::new(),
            rx: VecDeque::new(),
            pending_tx: Vec::new(),
            writes: Vec::new(),
            params: None,
            dtr: false,
            rts: false,
            slept_ms: 0,
        }
    }

    /// Queue an exchange: when `request` has been written, `response`
    /// becomes readable.
    pub(crate) fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.script.push_back((request.to_vec(), response.to_vec()));
    }

    /// Make bytes readable without waiting for a write (devices that talk
    /// first, like the Aladin or the Aqualand).
    pub(crate) fn push_rx(&mut self, data: &[u8]) {
        self.rx.extend(data);
    }
}

impl IoStream for FakePort {
    fn configure(&mut self, params: &LineParams) -> Result<()> {
        self.params = Some(*params);
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Timeout) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.rx.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.writes.push(buf.to_vec());
        self.pending_tx.extend_from_slice(buf);

        while let Some((request, _)) = self.script.front() {
            if self.pending_tx.len() < request.len() {
                assert!(
                    request.starts_with(&self.pending_tx),
                    "unexpected write {:02X?}, script wants {:02X?}",
                    self.pending_tx,
                    request
                );
                break;
            }
            assert_eq!(
                &self.pending_tx[..request.len()],
                &request[..],
                "unexpected write"
            );
            let request_len = request.len();
            let (_, response) = self.script.pop_front().unwrap();
            self.pending_tx.drain(..request_len);
            self.rx.extend(response);
        }
        Ok(buf.len())
    }

    fn purge(&mut self, direction: Direction) -> Result<()> {
        match direction {
            Direction::Input => self.rx.clear(),
            Direction::Output => self.pending_tx.clear(),
            Direction::All => {
                self.rx.clear();
                self.pending_tx.clear();
            }
        }
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.dtr = level;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.rts = level;
        Ok(())
    }

    fn get_line(&mut self, _line: Line) -> Result<bool> {
        Ok(false)
    }

    fn get_received(&mut self) -> Result<usize> {
        Ok(self.rx.len())
    }

    fn sleep(&mut self, ms: u32) {
        self.slept_ms = self.slept_ms.saturating_add(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iostream::{FlowControl, Parity, StopBits};

    #[test]
    fn test_fake_port_records_line_state() {
        let mut port = FakePort::new();
        port.configure(&LineParams::new(
            9600,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))
        .unwrap();
        port.set_dtr(true).unwrap();
        port.set_rts(true).unwrap();
        port.sleep(50);
        port.expect(&[0x01], &[0x02]);
        port.write(&[0x01]).unwrap();

        assert_eq!(port.writes, vec![vec![0x01]]);
        assert_eq!(port.params.unwrap().baudrate, 9600);
        assert!(port.dtr && port.rts);
        assert_eq!(port.slept_ms, 50);

        let mut buf = [0u8; 1];
        port.read(&mut buf).unwrap();
        assert_eq!(buf, [0x02]);
    }
}

