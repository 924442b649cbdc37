//! The physical (or simulated) byte pipe to the axis chain. Kept as a
//! trait seam, the same role `em68k`'s `Bus`/`Device` trait plays
//! between the CPU core and memory-mapped peripherals, so the
//! controller's state machine and I/O loop never depend on a real
//! serial port directly: a substitutable transport, with a dummy
//! in-memory chain standing in for the serial bus, is the one seam
//! everything above goes through.

use std::time::Duration;

use crate::error::WireResult;

/// A byte-oriented transport to the axis chain: write a frame, then
/// read back exactly the number of bytes the issued command expects.
/// Implementations block up to `timeout` and report
/// `WireError::Timeout` past it.
pub trait Transport {
    fn write_frame(&mut self, bytes: &[u8]) -> WireResult<()>;
    fn read_exact(&mut self, len: usize, timeout: Duration) -> WireResult<Vec<u8>>;

    /// Downcast hook so tests can reach into a concrete transport
    /// (e.g. to queue a `DummyChain` response) through the trait
    /// object the controller actually holds.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// An in-memory transport for tests and for running an assembled
/// program against no hardware at all: frames
/// written are recorded, and responses are drained from a
/// pre-loaded queue (or synthesized by a scripted callback).
pub struct DummyChain {
    written: Vec<Vec<u8>>,
    responses: std::collections::VecDeque<Vec<u8>>,
}

impl DummyChain {
    pub fn new() -> Self {
        DummyChain {
            written: Vec::new(),
            responses: std::collections::VecDeque::new(),
        }
    }

    pub fn queue_response(&mut self, bytes: Vec<u8>) {
        self.responses.push_back(bytes);
    }

    pub fn written_frames(&self) -> &[Vec<u8>] {
        &self.written
    }
}

impl Default for DummyChain {
    fn default() -> Self {
        DummyChain::new()
    }
}

impl Transport for DummyChain {
    fn write_frame(&mut self, bytes: &[u8]) -> WireResult<()> {
        self.written.push(bytes.to_vec());
        Ok(())
    }

    fn read_exact(&mut self, len: usize, _timeout: Duration) -> WireResult<Vec<u8>> {
        match self.responses.pop_front() {
            Some(bytes) if bytes.len() == len => Ok(bytes),
            Some(bytes) => Err(crate::error::WireError::MalformedResponse {
                expected: len,
                actual: bytes.len(),
            }),
            None => Err(crate::error::WireError::Timeout),
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(feature = "serial")]
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "serial")]
impl SerialTransport {
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> WireResult<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| crate::error::WireError::OpenFailed(e.to_string()))?;
        Ok(SerialTransport { port })
    }
}

#[cfg(feature = "serial")]
impl Transport for SerialTransport {
    fn write_frame(&mut self, bytes: &[u8]) -> WireResult<()> {
        use std::io::Write;
        self.port.write_all(bytes).map_err(crate::error::WireError::Write)
    }

    fn read_exact(&mut self, len: usize, timeout: Duration) -> WireResult<Vec<u8>> {
        use std::io::Read;
        self.port
            .set_timeout(timeout)
            .map_err(|e| crate::error::WireError::OpenFailed(e.to_string()))?;
        let mut buf = vec![0u8; len];
        self.port.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                crate::error::WireError::Timeout
            } else {
                crate::error::WireError::Read(e)
            }
        })?;
        Ok(buf)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_chain_records_writes_and_drains_queued_responses() {
        let mut chain = DummyChain::new();
        chain.queue_response(vec![1, 2, 3, 4]);
        chain.write_frame(&[0x07]).unwrap();
        let response = chain.read_exact(4, Duration::from_millis(10)).unwrap();
        assert_eq!(response, vec![1, 2, 3, 4]);
        assert_eq!(chain.written_frames(), &[vec![0x07]]);
    }

    #[test]
    fn dummy_chain_times_out_with_no_queued_response() {
        let mut chain = DummyChain::new();
        let err = chain.read_exact(4, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, crate::error::WireError::Timeout));
    }
}
