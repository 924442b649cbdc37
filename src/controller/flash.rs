//! Flash programmer: the lock-step block-upload exchange used to
//! reprogram an axis's firmware.

use std::time::Duration;

use crate::error::{WireError, WireResult};
use crate::wire::{encode_flash_block, pad_flash_block, Command, FlashAck, FLASH_BLOCK_LEN};

use super::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    Idle,
    WritingBlock { block: u32 },
    WaitingCancel,
    Done,
    Faulted(u8),
}

/// Drives one firmware image's worth of 256-byte blocks down the
/// wire, waiting for the axis's `'PP'`/`'E...'`/fault acknowledgement
/// before sending the next. A cancellation request is
/// only honored between blocks — an in-flight block is always allowed
/// to finish so the axis is never left with a half-written page.
pub struct FlashProgrammer {
    state: FlashState,
    cancel_requested: bool,
}

impl FlashProgrammer {
    pub fn new() -> Self {
        FlashProgrammer {
            state: FlashState::Idle,
            cancel_requested: false,
        }
    }

    pub fn state(&self) -> FlashState {
        self.state
    }

    pub fn request_cancel(&mut self) {
        self.cancel_requested = true;
    }

    /// Erase the currently addressed axis's flash, independent of the block-upload loop below.
    pub fn erase(&mut self, transport: &mut dyn Transport) -> WireResult<()> {
        transport.write_frame(&Command::Erase.encode())
    }

    /// Run the whole upload against `transport`, writing `image` in
    /// 256-byte, `GOTO 0`-padded blocks, one `CMD_FLASH` per block
    ///. The device may answer `Complete` before the
    /// image is exhausted; the remaining blocks are then skipped and
    /// `CMD_ENDFLASH` is sent immediately.
    pub fn run(&mut self, transport: &mut dyn Transport, image: &[u8], timeout: Duration) -> WireResult<()> {
        for (block, chunk) in image.chunks(FLASH_BLOCK_LEN).enumerate() {
            if self.cancel_requested {
                self.state = FlashState::WaitingCancel;
                transport.write_frame(&Command::EndFlash.encode())?;
                return Ok(());
            }
            let block = block as u32;
            self.state = FlashState::WritingBlock { block };
            let padded = pad_flash_block(chunk.to_vec());
            transport.write_frame(&encode_flash_block(&padded))?;
            let ack = transport.read_exact(2, timeout)?;
            match self.expect_ack(&ack)? {
                FlashOutcome::ReadyForNext => {}
                FlashOutcome::Complete => break,
            }
        }

        transport.write_frame(&Command::EndFlash.encode())?;
        self.state = FlashState::Done;
        Ok(())
    }

    fn expect_ack(&mut self, ack: &[u8]) -> WireResult<FlashOutcome> {
        match crate::wire::parse_flash_ack(ack)? {
            FlashAck::Programmed => Ok(FlashOutcome::ReadyForNext),
            FlashAck::Complete => Ok(FlashOutcome::Complete),
            FlashAck::Fault(code) => {
                self.state = FlashState::Faulted(code);
                Err(WireError::FlashFault(ack.to_vec()))
            }
        }
    }
}

enum FlashOutcome {
    ReadyForNext,
    Complete,
}

impl Default for FlashProgrammer {
    fn default() -> Self {
        FlashProgrammer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::transport::DummyChain;

    #[test]
    fn writes_one_full_block_and_finishes() {
        let mut chain = DummyChain::new();
        chain.queue_response(vec![b'P', b'P']); // block 0 ack
        let mut programmer = FlashProgrammer::new();
        let image = vec![0xABu8; FLASH_BLOCK_LEN];
        programmer.run(&mut chain, &image, Duration::from_millis(10)).unwrap();
        assert_eq!(programmer.state(), FlashState::Done);
        // one FLASH frame + ENDFLASH = 2 frames
        assert_eq!(chain.written_frames().len(), 2);
    }

    #[test]
    fn device_reported_completion_short_circuits_remaining_blocks() {
        let mut chain = DummyChain::new();
        chain.queue_response(vec![b'E', 0x00]); // device says done after block 0
        let mut programmer = FlashProgrammer::new();
        let image = vec![0x00u8; FLASH_BLOCK_LEN * 3];
        programmer.run(&mut chain, &image, Duration::from_millis(10)).unwrap();
        assert_eq!(programmer.state(), FlashState::Done);
        // one FLASH frame (block 0) + ENDFLASH, blocks 1-2 skipped
        assert_eq!(chain.written_frames().len(), 2);
    }

    #[test]
    fn fault_ack_aborts_with_code() {
        let mut chain = DummyChain::new();
        chain.queue_response(vec![b'F', 0x02]);
        let mut programmer = FlashProgrammer::new();
        let image = vec![0x00u8; FLASH_BLOCK_LEN];
        let err = programmer.run(&mut chain, &image, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, WireError::FlashFault(_)));
        assert_eq!(programmer.state(), FlashState::Faulted(0x02));
    }

    #[test]
    fn cancellation_is_honored_between_blocks() {
        let mut chain = DummyChain::new();
        let mut programmer = FlashProgrammer::new();
        programmer.request_cancel();
        let image = vec![0x00u8; FLASH_BLOCK_LEN * 2];
        programmer.run(&mut chain, &image, Duration::from_millis(10)).unwrap();
        assert_eq!(programmer.state(), FlashState::WaitingCancel);
        assert_eq!(chain.written_frames().len(), 1); // only ENDFLASH
    }
}
