//! Timer 0
//!
//! Registers (SFR offsets):
//!   0x20-0x21: TM0D   - target (16-bit)
//!   0x22-0x23: TM0C   - counter (16-bit, wraps)
//!   0x24:      TM0CON0
//!   0x25:      TM0CON1 - bit 0 = run
//!
//! The timer only matters while the core sits in STOP mode: it is the wake
//! source firmware uses for timed naps. It advances at a fixed logical rate of
//! 10kHz derived from host wall-clock time. A poll more than one second after
//! the previous one contributes nothing, and at most 100 ticks are applied per
//! poll; the remainder stays in the accumulator.

use std::time::{Duration, Instant};

use crate::peripherals::StandbyController;
use crate::sfr::{regs, SfrFile};

/// Flag written to IRQ0 when the timer wakes the core (TM0 request)
pub const TM0_WAKE_FLAG: u8 = 0x20;

/// Timer 0
#[derive(Debug, Clone)]
pub struct Timer {
    /// Host time of the previous poll
    last_time: Option<Instant>,
    /// Fractional tick accumulator in units of 1/NANOS_PER_SECOND tick
    passed: u64,
    /// Logical tick rate
    ticks_per_second: u64,
}

impl Timer {
    pub const TICKS_PER_SECOND: u64 = 10_000;
    pub const MAX_TICKS_PER_UPDATE: u64 = 100;
    const NANOS_PER_SECOND: u64 = 1_000_000_000;
    const MAX_ELAPSED: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self {
            last_time: None,
            passed: 0,
            ticks_per_second: Self::TICKS_PER_SECOND,
        }
    }

    pub fn reset(&mut self) {
        self.last_time = None;
        self.passed = 0;
    }

    /// Poll with the current host time. Returns true if the core was woken.
    pub fn poll(
        &mut self,
        now: Instant,
        sfr: &mut SfrFile,
        standby: &mut StandbyController,
    ) -> bool {
        let elapsed = match self.last_time {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::ZERO,
        };
        self.last_time = Some(now);
        self.advance(elapsed, sfr, standby)
    }

    /// Advance by an elapsed host duration. Returns true if the core was woken.
    pub fn advance(
        &mut self,
        elapsed: Duration,
        sfr: &mut SfrFile,
        standby: &mut StandbyController,
    ) -> bool {
        let elapsed = if elapsed > Self::MAX_ELAPSED {
            Duration::ZERO
        } else {
            elapsed
        };

        self.passed = self
            .passed
            .saturating_add(elapsed.as_nanos() as u64 * self.ticks_per_second);
        let ticks = (self.passed / Self::NANOS_PER_SECOND).min(Self::MAX_TICKS_PER_UPDATE);
        self.passed -= ticks * Self::NANOS_PER_SECOND;

        self.tick(ticks as u16, sfr, standby)
    }

    fn tick(&mut self, ticks: u16, sfr: &mut SfrFile, standby: &mut StandbyController) -> bool {
        if sfr.read(regs::TM0CON) & 0x01 == 0 {
            return false;
        }

        let counter = sfr.read_word(regs::TM0C).wrapping_add(ticks);
        sfr.write_word(regs::TM0C, counter);
        let target = sfr.read_word(regs::TM0D);

        if counter >= target && standby.stop_mode() {
            standby.wake();
            sfr.clear_bits(regs::SBYCON, 0x02);
            sfr.write(regs::IRQ0, TM0_WAKE_FLAG);
            log::debug!("timer 0 match {:04X} >= {:04X}, waking", counter, target);
            return true;
        }
        false
    }

    /// Whole ticks not yet applied, rounded down
    pub fn pending_ticks(&self) -> u64 {
        self.passed / Self::NANOS_PER_SECOND
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sfr::StandbyReg;

    fn running(target: u16, counter: u16) -> SfrFile {
        let mut sfr = SfrFile::new();
        sfr.write_word(regs::TM0D, target);
        sfr.write_word(regs::TM0C, counter);
        sfr.write(regs::TM0CON, 0x01);
        sfr
    }

    fn stopped(sfr: &mut SfrFile) -> StandbyController {
        let mut standby = StandbyController::new();
        standby.write(StandbyReg::Acceptance, 0x50, sfr);
        standby.write(StandbyReg::Acceptance, 0xA0, sfr);
        standby.write(StandbyReg::Control, 0x02, sfr);
        assert!(standby.stop_mode());
        standby
    }

    #[test]
    fn test_one_tick_period() {
        let mut timer = Timer::new();
        let mut sfr = running(0xFFFF, 0x0010);
        let mut standby = StandbyController::new();

        timer.advance(Duration::from_micros(100), &mut sfr, &mut standby);
        assert_eq!(sfr.read_word(regs::TM0C), 0x0011);

        // Half a period accumulates without ticking
        timer.advance(Duration::from_micros(50), &mut sfr, &mut standby);
        assert_eq!(sfr.read_word(regs::TM0C), 0x0011);
        timer.advance(Duration::from_micros(50), &mut sfr, &mut standby);
        assert_eq!(sfr.read_word(regs::TM0C), 0x0012);
    }

    #[test]
    fn test_counter_wraps() {
        let mut timer = Timer::new();
        let mut sfr = running(0xFFFF, 0xFFFF);
        let mut standby = StandbyController::new();
        timer.advance(Duration::from_micros(100), &mut sfr, &mut standby);
        assert_eq!(sfr.read_word(regs::TM0C), 0x0000);
    }

    #[test]
    fn test_stopped_timer_does_not_count() {
        let mut timer = Timer::new();
        let mut sfr = running(0xFFFF, 5);
        sfr.write(regs::TM0CON, 0x00);
        let mut standby = StandbyController::new();
        timer.advance(Duration::from_millis(1), &mut sfr, &mut standby);
        assert_eq!(sfr.read_word(regs::TM0C), 5);
    }

    #[test]
    fn test_tick_cap_carries_remainder() {
        let mut timer = Timer::new();
        let mut sfr = running(0xFFFF, 0);
        let mut standby = StandbyController::new();

        // 50ms = 500 ticks, applied 100 per update
        timer.advance(Duration::from_millis(50), &mut sfr, &mut standby);
        assert_eq!(sfr.read_word(regs::TM0C), 100);
        assert_eq!(timer.pending_ticks(), 400);
        timer.advance(Duration::ZERO, &mut sfr, &mut standby);
        assert_eq!(sfr.read_word(regs::TM0C), 200);
    }

    #[test]
    fn test_long_gap_discarded() {
        let mut timer = Timer::new();
        let mut sfr = running(0xFFFF, 7);
        let mut standby = StandbyController::new();
        timer.advance(Duration::from_secs(5), &mut sfr, &mut standby);
        assert_eq!(sfr.read_word(regs::TM0C), 7);
        assert_eq!(timer.pending_ticks(), 0);
    }

    #[test]
    fn test_match_wakes_from_stop() {
        let mut timer = Timer::new();
        let mut sfr = running(3, 0);
        let mut standby = stopped(&mut sfr);
        // Entering STOP cleared the counter
        assert_eq!(sfr.read_word(regs::TM0C), 0);
        sfr.write(regs::SBYCON, 0x02);

        assert!(!timer.advance(Duration::from_micros(200), &mut sfr, &mut standby));
        assert!(standby.stop_mode());
        assert!(timer.advance(Duration::from_micros(100), &mut sfr, &mut standby));
        assert!(!standby.stop_mode());
        assert_eq!(sfr.read(regs::IRQ0), TM0_WAKE_FLAG);
        assert_eq!(sfr.read(regs::SBYCON) & 0x02, 0);
    }

    #[test]
    fn test_match_without_stop_does_nothing() {
        let mut timer = Timer::new();
        let mut sfr = running(0, 0);
        let mut standby = StandbyController::new();
        assert!(!timer.advance(Duration::from_micros(100), &mut sfr, &mut standby));
        assert_eq!(sfr.read(regs::IRQ0), 0);
    }

    #[test]
    fn test_first_poll_only_records_time() {
        let mut timer = Timer::new();
        let mut sfr = running(0xFFFF, 0);
        let mut standby = StandbyController::new();
        let start = Instant::now();
        timer.poll(start, &mut sfr, &mut standby);
        assert_eq!(sfr.read_word(regs::TM0C), 0);
        timer.poll(start + Duration::from_micros(300), &mut sfr, &mut standby);
        assert_eq!(sfr.read_word(regs::TM0C), 3);
    }
}
