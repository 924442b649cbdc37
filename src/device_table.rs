//! Per-axis status mirror the I/O loop keeps up to date from wire
//! responses, plus no-response and late-discovery recovery
//! bookkeeping.

use crate::error::{RecoveryAction, WireError};
use crate::fields::Axis;
use crate::wire::{LongQuery, ShortQuery, StatusFlags};

/// How many consecutive missed responses from an axis before the
/// controller gives up and reports `WireError::NoResponse`.
pub const DEFAULT_NO_RESPONSE_LIMIT: u32 = 5;

/// The controller's last-known view of one axis. `position`/`velocity`
/// are only meaningful once `pos_valid`/`vel_valid` say so. `position_offset` is
/// the host-side zero reference `RESPOS`/zero-offset establish; the
/// reported `position` is always the raw device value, offset
/// subtraction is a presentation concern for callers.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub axis: Axis,
    pub pc: u16,
    pub flags: StatusFlags,
    pub position: i32,
    pub velocity: i32,
    pub position_offset: i32,
    pub pos_valid: bool,
    pub vel_valid: bool,
    /// True once this axis has answered at least one query. An axis
    /// that was silent on the bus at startup but later responds
    /// (power-up stagger, a motor driver enabled mid-boot) is folded
    /// in as soon as it is heard from, rather than rejected as unknown
    ///.
    pub discovered: bool,
    no_response_count: u32,
}

impl DeviceRecord {
    fn new(axis: Axis) -> Self {
        DeviceRecord {
            axis,
            pc: 0,
            flags: StatusFlags::empty(),
            position: 0,
            velocity: 0,
            position_offset: 0,
            pos_valid: false,
            vel_valid: false,
            discovered: false,
            no_response_count: 0,
        }
    }

    fn apply_short(&mut self, q: ShortQuery) {
        self.discovered = true;
        if let Some(pc) = q.pc {
            self.pc = pc;
        }
        self.flags = q.flags;
        self.no_response_count = 0;
    }

    fn apply_long(&mut self, q: LongQuery, pos_valid: bool, vel_valid: bool) {
        self.discovered = true;
        self.pc = q.pc;
        self.flags = q.flags;
        self.position = q.position;
        self.velocity = q.velocity;
        self.pos_valid = pos_valid;
        self.vel_valid = vel_valid;
        self.no_response_count = 0;
    }

    pub fn is_ready(&self) -> bool {
        self.discovered && !self.flags.is_busy()
    }

    pub fn has_fault(&self) -> bool {
        self.flags.has_pic_error() || self.flags.has_fpga_error()
    }

    /// Reported position with the host-side zero offset applied.
    pub fn display_position(&self) -> i32 {
        self.position - self.position_offset
    }
}

/// The four-axis status table. Updated every I/O loop
/// tick from whichever axes answered the broadcast query, and tracks
/// `n_devs`, the count of axes discovered on the bus so far.
#[derive(Debug)]
pub struct DeviceTable {
    records: [DeviceRecord; 4],
    no_response_limit: u32,
}

impl DeviceTable {
    pub fn new() -> Self {
        DeviceTable {
            records: Axis::ALL.map(DeviceRecord::new),
            no_response_limit: DEFAULT_NO_RESPONSE_LIMIT,
        }
    }

    pub fn with_no_response_limit(limit: u32) -> Self {
        DeviceTable {
            records: Axis::ALL.map(DeviceRecord::new),
            no_response_limit: limit,
        }
    }

    pub fn get(&self, axis: Axis) -> &DeviceRecord {
        &self.records[axis.index() as usize]
    }

    /// Number of axes that have answered at least one query so far
    ///.
    pub fn n_devs(&self) -> usize {
        self.records.iter().filter(|r| r.discovered).count()
    }

    /// Fold a broadcast `QSHORT` response (one entry per responding
    /// axis) into the table.
    pub fn record_short_broadcast(&mut self, responses: &[ShortQuery]) {
        for q in responses {
            if let Some(axis) = Axis::from_index(q.axis) {
                self.records[axis.index() as usize].apply_short(*q);
            }
        }
    }

    /// Fold a broadcast `QLONG` response into the table. `profile`
    /// supplies the pos/vel validity for the instruction currently
    /// executing on each axis.
    pub fn record_long_broadcast(
        &mut self,
        responses: &[LongQuery],
        pos_valid: bool,
        vel_valid: bool,
    ) {
        for q in responses {
            if let Some(axis) = Axis::from_index(q.axis) {
                self.records[axis.index() as usize].apply_long(*q, pos_valid, vel_valid);
            }
        }
    }

    pub fn set_position_offset(&mut self, axis: Axis, offset: i32) {
        self.records[axis.index() as usize].position_offset = offset;
    }

    pub fn reset_offsets(&mut self) {
        for record in &mut self.records {
            record.position_offset = 0;
        }
    }

    /// Record a missed response from `axis`. Returns an error once the
    /// consecutive-miss count exceeds the configured limit; an axis
    /// never yet discovered is given the benefit of the doubt (it may
    /// simply not be populated on this bus) and never triggers this
    /// error, only escalating no-response counts for axes it has
    /// heard from before.
    pub fn record_no_response(&mut self, axis: Axis) -> Result<(), WireError> {
        let record = &mut self.records[axis.index() as usize];
        if !record.discovered {
            return Ok(());
        }
        record.no_response_count += 1;
        if record.no_response_count > self.no_response_limit {
            return Err(WireError::NoResponse {
                axis: axis.index(),
                limit: self.no_response_limit,
            });
        }
        Ok(())
    }

    /// Suggested operator-facing recovery action for a wire error
    ///.
    pub fn recovery_action(&self, error: &WireError) -> RecoveryAction {
        match error {
            WireError::PicError { .. } | WireError::FpgaError { .. } => RecoveryAction::Estop,
            WireError::NoResponse { .. } | WireError::PcDivergence { .. } => RecoveryAction::Disconnect,
            WireError::Timeout => RecoveryAction::Continue,
            _ => RecoveryAction::Disconnect,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, &DeviceRecord)> {
        Axis::ALL.into_iter().map(move |a| (a, self.get(a)))
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        DeviceTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_discovery_does_not_count_as_no_response() {
        let mut table = DeviceTable::new();
        for _ in 0..10 {
            table.record_no_response(Axis::Y).unwrap();
        }
        assert!(!table.get(Axis::Y).discovered);
    }

    #[test]
    fn no_response_limit_is_enforced_after_discovery() {
        let mut table = DeviceTable::with_no_response_limit(2);
        table.record_short_broadcast(&[ShortQuery { axis: 0, flags: StatusFlags::empty(), pc: Some(0) }]);
        table.record_no_response(Axis::X).unwrap();
        table.record_no_response(Axis::X).unwrap();
        let err = table.record_no_response(Axis::X).unwrap_err();
        assert!(matches!(err, WireError::NoResponse { axis: 0, limit: 2 }));
    }

    #[test]
    fn response_resets_no_response_counter() {
        let mut table = DeviceTable::with_no_response_limit(1);
        table.record_short_broadcast(&[ShortQuery { axis: 0, flags: StatusFlags::empty(), pc: Some(0) }]);
        table.record_no_response(Axis::X).unwrap();
        table.record_short_broadcast(&[ShortQuery { axis: 0, flags: StatusFlags::empty(), pc: Some(1) }]);
        table.record_no_response(Axis::X).unwrap();
    }

    #[test]
    fn broadcast_short_query_populates_three_axes_and_n_devs() {
        let mut table = DeviceTable::new();
        table.record_short_broadcast(&[
            ShortQuery { axis: 0, flags: StatusFlags::empty(), pc: Some(4) },
            ShortQuery { axis: 1, flags: StatusFlags::empty(), pc: None },
            ShortQuery { axis: 2, flags: StatusFlags::empty(), pc: None },
        ]);
        assert_eq!(table.n_devs(), 3);
        assert_eq!(table.get(Axis::X).pc, 4);
        assert!(table.get(Axis::Y).discovered);
        assert!(!table.get(Axis::W).discovered);
    }

    #[test]
    fn estop_style_reset_clears_offsets() {
        let mut table = DeviceTable::new();
        table.set_position_offset(Axis::X, 500);
        table.reset_offsets();
        assert_eq!(table.get(Axis::X).position_offset, 0);
    }
}
