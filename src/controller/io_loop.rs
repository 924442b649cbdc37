//! Drives the shared-bus broadcast queries (`QSHORT`/`QLONG`) that
//! keep `DeviceTable` current. Both queries answer for
//! every axis currently on the bus in a single frame, so
//! the I/O loop never addresses one axis at a time.

use std::time::Duration;

use crate::device_table::DeviceTable;
use crate::error::WireResult;
use crate::instructions::Instruction;
use crate::wire::{self, Command};

use super::transport::Transport;

pub struct IoLoop {
    pub timeout: Duration,
}

impl IoLoop {
    pub fn new(timeout: Duration) -> Self {
        IoLoop { timeout }
    }

    /// Issue a broadcast `QSHORT`, read back the `n_devs`-sized
    /// response, and fold it into `devices`. A read timeout is
    /// recorded against every axis that had already been discovered,
    /// since a silent bus gives no way to tell which axis dropped out.
    pub fn short_query(&self, transport: &mut dyn Transport, devices: &mut DeviceTable) -> WireResult<()> {
        let n_devs = devices.n_devs().max(1);
        transport.write_frame(&Command::QShort.encode())?;
        match transport.read_exact(wire::short_query_len(n_devs), self.timeout) {
            Ok(bytes) => {
                let responses = wire::parse_short_query(&bytes, n_devs)?;
                devices.record_short_broadcast(&responses);
                Ok(())
            }
            Err(err) => {
                for (axis, record) in devices.iter().collect::<Vec<_>>() {
                    if record.discovered {
                        devices.record_no_response(axis)?;
                    }
                }
                Err(err)
            }
        }
    }

    /// Issue a broadcast `QLONG` and fold the per-axis position and
    /// velocity into `devices`. Before any axis has been discovered,
    /// the request probes with the full 4-axis, 42-byte frame length.
    pub fn long_query(
        &self,
        transport: &mut dyn Transport,
        devices: &mut DeviceTable,
        insn: &Instruction,
    ) -> WireResult<()> {
        let n_devs = if devices.n_devs() == 0 { 4 } else { devices.n_devs() };
        transport.write_frame(&Command::QLong.encode())?;
        match transport.read_exact(wire::long_query_len(n_devs), self.timeout) {
            Ok(bytes) => {
                let responses = wire::parse_long_query(&bytes, n_devs)?;
                devices.record_long_broadcast(&responses, insn.is_pos_valid(), insn.is_vel_valid());
                Ok(())
            }
            Err(err) => {
                for (axis, record) in devices.iter().collect::<Vec<_>>() {
                    if record.discovered {
                        devices.record_no_response(axis)?;
                    }
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::transport::DummyChain;
    use crate::wire::StatusFlags;
    use std::path::PathBuf;
    use std::rc::Rc;

    fn anchor() -> crate::anchor::SourceAnchor {
        crate::anchor::SourceAnchor::synthetic(Rc::new(PathBuf::from("<test>")))
    }

    #[test]
    fn short_query_populates_responding_axis() {
        let mut chain = DummyChain::new();
        let mut response = vec![0xAAu8, 0xAA];
        response.extend_from_slice(&StatusFlags::empty().bits().to_le_bytes());
        response.extend_from_slice(&0u16.to_le_bytes());
        chain.queue_response(response);
        let mut devices = DeviceTable::new();
        let loop_ = IoLoop::new(Duration::from_millis(10));
        loop_.short_query(&mut chain, &mut devices).unwrap();
        assert_eq!(devices.n_devs(), 1);
        assert_eq!(chain.written_frames(), &[Command::QShort.encode()]);
    }

    #[test]
    fn initial_long_query_probes_full_four_axis_frame() {
        let mut chain = DummyChain::new();
        let mut response = vec![0u8, 0];
        for _ in 0..4 {
            response.extend_from_slice(&StatusFlags::empty().bits().to_le_bytes());
            response.extend_from_slice(&0u16.to_le_bytes());
            response.extend_from_slice(&crate::wire::encode_position_for_test(0));
            response.extend_from_slice(&0x8000u16.to_le_bytes());
        }
        assert_eq!(response.len(), 42);
        chain.queue_response(response);
        let mut devices = DeviceTable::new();
        let loop_ = IoLoop::new(Duration::from_millis(10));
        let insn = Instruction::Return { anchor: anchor() };
        loop_.long_query(&mut chain, &mut devices, &insn).unwrap();
        assert_eq!(devices.n_devs(), 4);
    }
}
