//! The EVO timed-speed schedule tables.
//!
//! Each of the two schedule sets holds eight slots. A slot is a fixed number of steps, each
//! step three bytes on the wire: duration in hours followed by the little-endian speed. The
//! layout was worked out empirically from factory defaults, where every slot has four or five
//! steps adding up to a full day. Slots can not be resized.
use std::ops::RangeInclusive;

use tracing::warn;

pub const BYTES_PER_STEP: usize = 3;
pub const HOURS_PER_DAY: u8 = 24;
/// Schedule slots are numbered from 1.
pub const SLOTS: RangeInclusive<u8> = 1..=8;
/// Address of the first slot within a set's configuration page.
pub const TABLE_ADDRESS: u8 = 0x08;

// Index 0 is unused so that slots can index directly.
const STEP_COUNTS_A: [u8; 9] = [0, 5, 5, 4, 4, 4, 4, 4, 4];
const STEP_COUNTS_B: [u8; 9] = [0, 5, 5, 5, 5, 5, 5, 4, 4];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("schedule slot {0} does not exist, slots are numbered 1 to 8")]
    InvalidSlot(u8),
    #[error("step {step} does not exist in a slot of {steps} steps")]
    InvalidStep { step: usize, steps: usize },
    #[error("a step can not last {0} hours")]
    InvalidDuration(u8),
    #[error("steps add up to {0} hours, more than a day")]
    ExceedsDay(u32),
    #[error("{required} steps are needed to fill the day, but the slot only holds {capacity}")]
    Overflow { required: usize, capacity: usize },
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    clap::ValueEnum,
    serde::Serialize,
)]
pub enum ScheduleSet {
    A,
    B,
}

impl ScheduleSet {
    /// Configuration page holding this set's selected slot and schedule table.
    pub const fn page(self) -> u8 {
        match self {
            ScheduleSet::A => 0x0b,
            ScheduleSet::B => 0x0c,
        }
    }

    const fn step_counts(self) -> &'static [u8; 9] {
        match self {
            ScheduleSet::A => &STEP_COUNTS_A,
            ScheduleSet::B => &STEP_COUNTS_B,
        }
    }

    pub fn step_count(self, slot: u8) -> Option<usize> {
        SLOTS.contains(&slot).then(|| usize::from(self.step_counts()[usize::from(slot)]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct ScheduleStep {
    /// Hours, 0 to 24.
    pub duration: u8,
    pub speed: u16,
}

impl ScheduleStep {
    pub const fn new(duration: u8, speed: u16) -> Self {
        Self { duration, speed }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EvoSchedule {
    set: ScheduleSet,
    slot: u8,
    steps: Vec<ScheduleStep>,
}

impl EvoSchedule {
    /// An empty schedule of the right shape for the slot.
    pub fn new(set: ScheduleSet, slot: u8) -> Result<Self, Error> {
        let count = set.step_count(slot).ok_or(Error::InvalidSlot(slot))?;
        Ok(Self { set, slot, steps: vec![ScheduleStep::default(); count] })
    }

    /// A schedule with its leading steps set from `steps`.
    pub fn with_steps(set: ScheduleSet, slot: u8, steps: &[ScheduleStep]) -> Result<Self, Error> {
        let mut schedule = Self::new(set, slot)?;
        for (index, step) in steps.iter().enumerate() {
            schedule.set_step(index + 1, step.duration, step.speed)?;
        }
        Ok(schedule)
    }

    pub fn set(&self) -> ScheduleSet {
        self.set
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn steps(&self) -> &[ScheduleStep] {
        &self.steps
    }

    /// Bytes taken up by the slots before this one. At most 102, for the last slot of set B.
    fn table_offset(&self) -> u8 {
        let preceding: u8 = self.set.step_counts()[..usize::from(self.slot)].iter().sum();
        preceding * BYTES_PER_STEP as u8
    }

    /// Configuration address of this slot, given the address of the set's first slot.
    ///
    /// `None` if the slot would lie past the end of the page.
    pub fn address_from(&self, table_address: u8) -> Option<u8> {
        table_address.checked_add(self.table_offset())
    }

    pub fn address(&self) -> u8 {
        TABLE_ADDRESS + self.table_offset()
    }

    /// Size of this slot in bytes.
    pub fn length(&self) -> usize {
        self.steps.len() * BYTES_PER_STEP
    }

    /// Set the duration and speed of a step, counted from 1.
    pub fn set_step(&mut self, step: usize, duration: u8, speed: u16) -> Result<(), Error> {
        if duration > HOURS_PER_DAY {
            return Err(Error::InvalidDuration(duration));
        }
        let steps = self.steps.len();
        let entry = step
            .checked_sub(1)
            .and_then(|i| self.steps.get_mut(i))
            .ok_or(Error::InvalidStep { step, steps })?;
        *entry = ScheduleStep::new(duration, speed);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.steps.fill(ScheduleStep::default());
    }

    /// Replace the steps with the contents of a slot read from the device.
    ///
    /// `None` stands for a failed read and empties the schedule, as does data of the wrong size.
    pub fn load(&mut self, bytes: Option<&[u8]>) {
        match bytes {
            Some(bytes) if bytes.len() == self.length() => {
                for (step, record) in self.steps.iter_mut().zip(bytes.chunks_exact(BYTES_PER_STEP)) {
                    *step = ScheduleStep::new(record[0], u16::from_le_bytes([record[1], record[2]]));
                }
            }
            Some(bytes) => {
                warn!(
                    message = "schedule data has the wrong size",
                    set = %self.set,
                    slot = self.slot,
                    expected = self.length(),
                    actual = bytes.len()
                );
                self.clear();
            }
            None => self.clear(),
        }
    }

    /// The steps as they should be stored on the device.
    ///
    /// Steps with a duration are moved to the front in their original order, a zero-speed
    /// filler step makes up any remainder of the day and zero steps pad out the slot.
    pub fn pack(&self) -> Result<Vec<ScheduleStep>, Error> {
        let mut packed: Vec<ScheduleStep> =
            self.steps.iter().copied().filter(|s| s.duration > 0).collect();
        let total: u32 = packed.iter().map(|s| u32::from(s.duration)).sum();
        let day = u32::from(HOURS_PER_DAY);
        if total > day {
            return Err(Error::ExceedsDay(total));
        }
        if total < day {
            packed.push(ScheduleStep::new((day - total) as u8, 0));
        }
        let capacity = self.steps.len();
        if packed.len() > capacity {
            return Err(Error::Overflow { required: packed.len(), capacity });
        }
        packed.resize(capacity, ScheduleStep::default());
        Ok(packed)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let packed = self.pack()?;
        let mut bytes = Vec::with_capacity(self.length());
        for step in packed {
            bytes.push(step.duration);
            bytes.extend(step.speed.to_le_bytes());
        }
        Ok(bytes)
    }
}

impl std::fmt::Display for EvoSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for step in &self.steps {
            write!(f, "{:2} {:4}  ", step.duration, step.speed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(pairs: &[(u8, u16)]) -> Vec<ScheduleStep> {
        pairs.iter().map(|&(d, s)| ScheduleStep::new(d, s)).collect()
    }

    #[test]
    fn step_counts() {
        let a: Vec<_> = SLOTS.map(|s| ScheduleSet::A.step_count(s).unwrap()).collect();
        assert_eq!(a, [5, 5, 4, 4, 4, 4, 4, 4]);
        let b: Vec<_> = SLOTS.map(|s| ScheduleSet::B.step_count(s).unwrap()).collect();
        assert_eq!(b, [5, 5, 5, 5, 5, 5, 4, 4]);
        assert_eq!(ScheduleSet::A.step_count(0), None);
        assert_eq!(ScheduleSet::B.step_count(9), None);
        assert_eq!(EvoSchedule::new(ScheduleSet::A, 9), Err(Error::InvalidSlot(9)));
    }

    #[test]
    fn slot_addresses() {
        let slot1 = EvoSchedule::new(ScheduleSet::A, 1).unwrap();
        assert_eq!(slot1.address_from(0x40), Some(0x40));
        let slot3 = EvoSchedule::new(ScheduleSet::A, 3).unwrap();
        assert_eq!(slot3.address_from(0x40), Some(0x40 + 30));
        assert_eq!(slot3.length(), 12);
        let slot5 = EvoSchedule::new(ScheduleSet::A, 5).unwrap();
        assert_eq!(slot5.address(), 0x3e);
        let b8 = EvoSchedule::new(ScheduleSet::B, 8).unwrap();
        assert_eq!(b8.address(), TABLE_ADDRESS + (5 * 6 + 4) * 3);
        assert_eq!(b8.address_from(TABLE_ADDRESS), Some(b8.address()));
    }

    #[test]
    fn slot_past_end_of_page() {
        let b8 = EvoSchedule::new(ScheduleSet::B, 8).unwrap();
        assert_eq!(b8.address_from(0xf0), None);
        assert_eq!(b8.address_from(0xff - 102), Some(0xff));
        let a1 = EvoSchedule::new(ScheduleSet::A, 1).unwrap();
        assert_eq!(a1.address_from(0xff), Some(0xff));
    }

    #[test]
    fn pack_removes_gaps_without_filler() {
        let schedule =
            EvoSchedule::with_steps(ScheduleSet::A, 1, &steps(&[(1, 1725), (0, 0), (23, 0)]))
                .unwrap();
        assert_eq!(
            schedule.pack().unwrap(),
            steps(&[(1, 1725), (23, 0), (0, 0), (0, 0), (0, 0)])
        );
    }

    #[test]
    fn pack_appends_filler() {
        let schedule =
            EvoSchedule::with_steps(ScheduleSet::A, 3, &steps(&[(4, 1000), (0, 3450), (6, 2000)]))
                .unwrap();
        assert_eq!(schedule.pack().unwrap(), steps(&[(4, 1000), (6, 2000), (14, 0), (0, 0)]));
    }

    #[test]
    fn pack_empty_schedule_runs_nothing_all_day() {
        let schedule = EvoSchedule::new(ScheduleSet::B, 7).unwrap();
        assert_eq!(schedule.pack().unwrap(), steps(&[(24, 0), (0, 0), (0, 0), (0, 0)]));
    }

    #[test]
    fn pack_rejects_overflow() {
        let schedule = EvoSchedule::with_steps(
            ScheduleSet::A,
            3,
            &steps(&[(1, 600), (1, 700), (1, 800), (1, 900)]),
        )
        .unwrap();
        assert_eq!(schedule.pack(), Err(Error::Overflow { required: 5, capacity: 4 }));
    }

    #[test]
    fn pack_rejects_long_days() {
        let schedule =
            EvoSchedule::with_steps(ScheduleSet::A, 3, &steps(&[(20, 600), (5, 700)])).unwrap();
        assert_eq!(schedule.pack(), Err(Error::ExceedsDay(25)));
    }

    #[test]
    fn step_validation() {
        let mut schedule = EvoSchedule::new(ScheduleSet::A, 4).unwrap();
        assert_eq!(schedule.set_step(0, 1, 1), Err(Error::InvalidStep { step: 0, steps: 4 }));
        assert_eq!(schedule.set_step(5, 1, 1), Err(Error::InvalidStep { step: 5, steps: 4 }));
        assert_eq!(schedule.set_step(1, 25, 1), Err(Error::InvalidDuration(25)));
        assert_eq!(schedule.set_step(4, 24, 3450), Ok(()));
        assert_eq!(schedule.steps()[3], ScheduleStep::new(24, 3450));
    }

    #[test]
    fn serialize() {
        let schedule = EvoSchedule::with_steps(ScheduleSet::A, 5, &steps(&[(24, 1725)])).unwrap();
        assert_eq!(
            schedule.to_bytes().unwrap(),
            [24, 0xbd, 0x06, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn load_from_device() {
        let mut schedule = EvoSchedule::new(ScheduleSet::A, 3).unwrap();
        schedule.load(Some(&[8, 0xbd, 0x06, 16, 0x58, 0x02, 0, 0, 0, 0, 0, 0]));
        assert_eq!(schedule.steps(), steps(&[(8, 1725), (16, 600), (0, 0), (0, 0)]));
        assert_eq!(schedule.to_string(), " 8 1725  16  600   0    0   0    0  ");

        schedule.load(None);
        assert_eq!(schedule.steps(), steps(&[(0, 0); 4]));

        schedule.load(Some(&[8, 0xbd, 0x06, 16, 0x58, 0x02, 0, 0, 0, 0, 0, 0]));
        schedule.load(Some(&[1, 2, 3]));
        assert_eq!(schedule.steps(), steps(&[(0, 0); 4]));
    }
}
