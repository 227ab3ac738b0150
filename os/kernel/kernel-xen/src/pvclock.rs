//! Paravirtual clock.
//!
//! Both time records in `shared_info` are protected by a version counter the
//! hypervisor makes odd while it updates the record. A consistent read sees
//! the same even version before and after copying the fields.

use core::hint::spin_loop;
use core::sync::atomic::{Ordering, fence};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ClockError {
    #[error("clock record kept changing for {0} attempts")]
    TimedOut(u32),
}

/// A record guarded by a seqlock-style version counter.
pub trait Versioned {
    type Snapshot;

    fn version(&self) -> u32;

    /// Copies the dependent fields. May observe a torn state.
    fn snapshot(&self) -> Self::Snapshot;
}

/// Reads `src` until a snapshot is bracketed by the same even version.
///
/// # Errors
/// [`ClockError::TimedOut`] after `max_attempts` unsuccessful tries.
pub fn read_consistent<S: Versioned>(src: &S, max_attempts: u32) -> Result<S::Snapshot, ClockError> {
    for _ in 0..max_attempts {
        let before = src.version();
        if before & 1 != 0 {
            spin_loop();
            continue;
        }
        fence(Ordering::Acquire);

        let snapshot = src.snapshot();

        fence(Ordering::Acquire);
        if src.version() == before {
            return Ok(snapshot);
        }
        spin_loop();
    }
    Err(ClockError::TimedOut(max_attempts))
}

/// The fields of `vcpu_time_info` that go into system time.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VcpuTimeSnapshot {
    pub tsc_timestamp: u64,
    pub system_time: u64,
    pub tsc_to_system_mul: u32,
    pub tsc_shift: i8,
}

impl VcpuTimeSnapshot {
    /// Nanoseconds since boot at TSC value `tsc`.
    ///
    /// A `tsc` older than the record's timestamp yields the record's own
    /// system time.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn system_time_ns(&self, tsc: u64) -> u64 {
        let mut delta = tsc.saturating_sub(self.tsc_timestamp);
        let shift = u32::from(self.tsc_shift.unsigned_abs());
        if self.tsc_shift >= 0 {
            delta <<= shift;
        } else {
            delta >>= shift;
        }
        let scaled = (u128::from(delta) * u128::from(self.tsc_to_system_mul)) >> 32;
        (scaled as u64).wrapping_add(self.system_time)
    }
}

/// The wall clock fields of `shared_info`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WallClockSnapshot {
    pub sec: u32,
    pub nsec: u32,
    pub sec_hi: u32,
}

impl WallClockSnapshot {
    /// Nanoseconds since the epoch at the time system time was zero.
    #[must_use]
    pub fn nanos(&self) -> u64 {
        let sec = (u64::from(self.sec_hi) << 32) | u64::from(self.sec);
        sec.wrapping_mul(1_000_000_000)
            .wrapping_add(u64::from(self.nsec))
    }
}

/// A `vcpu_time_info` source whose snapshot also samples the TSC, so the
/// counter value is bracketed by the same version reads as the record.
struct WithTsc<'a, S, T> {
    src: &'a S,
    tsc: T,
}

impl<S, T> Versioned for WithTsc<'_, S, T>
where
    S: Versioned<Snapshot = VcpuTimeSnapshot>,
    T: Fn() -> u64,
{
    type Snapshot = (VcpuTimeSnapshot, u64);

    fn version(&self) -> u32 {
        self.src.version()
    }

    fn snapshot(&self) -> Self::Snapshot {
        let record = self.src.snapshot();
        (record, (self.tsc)())
    }
}

/// Monotonic nanoseconds from a `vcpu_time_info` source. `tsc` is sampled
/// inside every read attempt.
///
/// # Errors
/// See [`read_consistent`].
pub fn monotonic_ns<S, T>(src: &S, tsc: T, max_attempts: u32) -> Result<u64, ClockError>
where
    S: Versioned<Snapshot = VcpuTimeSnapshot>,
    T: Fn() -> u64,
{
    read_consistent(&WithTsc { src, tsc }, max_attempts)
        .map(|(record, tsc)| record.system_time_ns(tsc))
}

/// Wall clock nanoseconds from the `shared_info` wall clock.
///
/// # Errors
/// See [`read_consistent`].
pub fn wall_clock_ns<S>(src: &S, max_attempts: u32) -> Result<u64, ClockError>
where
    S: Versioned<Snapshot = WallClockSnapshot>,
{
    read_consistent(src, max_attempts).map(|snap| snap.nanos())
}

/// Outcome of [`wait_one_second`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SelfTest {
    pub start_ns: u64,
    pub end_ns: u64,
    pub samples: u64,
}

/// Samples `now` until it has advanced by one second, proving that the
/// monotonic clock ticks.
///
/// Returns `Ok(None)` if the clock did not advance far enough within
/// `max_samples` reads.
///
/// # Errors
/// The first failed clock read.
pub fn wait_one_second(
    mut now: impl FnMut() -> Result<u64, ClockError>,
    max_samples: u64,
) -> Result<Option<SelfTest>, ClockError> {
    const ONE_SECOND_NS: u64 = 1_000_000_000;

    let start_ns = now()?;
    for samples in 1..=max_samples {
        let end_ns = now()?;
        if end_ns.saturating_sub(start_ns) >= ONE_SECOND_NS {
            return Ok(Some(SelfTest {
                start_ns,
                end_ns,
                samples,
            }));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64};

    /// Plays back a fixed sequence of version reads, the way a hypervisor
    /// racing the reader would produce them.
    struct Scripted {
        versions: Vec<u32>,
        reads: Cell<usize>,
        snapshots: Cell<u32>,
    }

    impl Scripted {
        fn new(versions: &[u32]) -> Self {
            Self {
                versions: versions.to_vec(),
                reads: Cell::new(0),
                snapshots: Cell::new(0),
            }
        }
    }

    impl Versioned for Scripted {
        type Snapshot = u32;

        fn version(&self) -> u32 {
            let i = self.reads.get();
            self.reads.set(i + 1);
            self.versions[i.min(self.versions.len() - 1)]
        }

        fn snapshot(&self) -> u32 {
            self.snapshots.set(self.snapshots.get() + 1);
            // The snapshot value names the version it was taken under.
            self.versions[self.reads.get() - 1]
        }
    }

    #[test]
    fn stable_even_version_reads_once() {
        let src = Scripted::new(&[6, 6]);
        assert_eq!(read_consistent(&src, 8), Ok(6));
        assert_eq!(src.snapshots.get(), 1);
    }

    #[test]
    fn version_change_mid_read_retries() {
        // First attempt: 2 .. 4 (torn). Second: 4 .. 4.
        let src = Scripted::new(&[2, 4, 4, 4]);
        assert_eq!(read_consistent(&src, 8), Ok(4));
        assert_eq!(src.snapshots.get(), 2);
    }

    #[test]
    fn odd_version_is_not_snapshotted() {
        let src = Scripted::new(&[3, 3, 4, 4]);
        assert_eq!(read_consistent(&src, 8), Ok(4));
        assert_eq!(src.snapshots.get(), 1);
    }

    #[test]
    fn writer_that_never_finishes_times_out() {
        let src = Scripted::new(&[1]);
        assert_eq!(read_consistent(&src, 16), Err(ClockError::TimedOut(16)));
        assert_eq!(src.snapshots.get(), 0);
    }

    #[test]
    fn system_time_scales_and_shifts() {
        let snap = VcpuTimeSnapshot {
            tsc_timestamp: 1_000,
            system_time: 50,
            // 0.5 in 32.32 fixed point
            tsc_to_system_mul: 1 << 31,
            tsc_shift: 1,
        };
        // (1000 << 1) * 0.5 + 50
        assert_eq!(snap.system_time_ns(2_000), 1_050);

        let right = VcpuTimeSnapshot { tsc_shift: -2, ..snap };
        // (1000 >> 2) * 0.5 + 50
        assert_eq!(right.system_time_ns(2_000), 175);
    }

    #[test]
    fn system_time_survives_large_products() {
        let snap = VcpuTimeSnapshot {
            tsc_timestamp: 0,
            system_time: 0,
            tsc_to_system_mul: u32::MAX,
            tsc_shift: 0,
        };
        let tsc = 1u64 << 40;
        assert_eq!(snap.system_time_ns(tsc), ((u128::from(tsc) * u128::from(u32::MAX)) >> 32) as u64);
    }

    #[test]
    fn wall_clock_combines_fields() {
        let wc = WallClockSnapshot {
            sec: 2,
            nsec: 500,
            sec_hi: 0,
        };
        assert_eq!(wc.nanos(), 2_000_000_500);
    }

    #[test]
    fn self_test_stops_after_one_second() {
        let mut t = 0u64;
        let res = wait_one_second(
            || {
                t += 250_000_000;
                Ok(t)
            },
            100,
        );
        let st = res.expect("clock ok").expect("advanced");
        assert_eq!(st.samples, 4);
        assert_eq!(st.end_ns - st.start_ns, 1_000_000_000);
    }

    #[test]
    fn self_test_gives_up() {
        assert_eq!(wait_one_second(|| Ok(5), 10), Ok(None));
        assert_eq!(
            wait_one_second(|| Err(ClockError::TimedOut(1)), 10),
            Err(ClockError::TimedOut(1))
        );
    }

    #[test]
    fn tsc_older_than_the_record_does_not_wrap() {
        let snap = VcpuTimeSnapshot {
            tsc_timestamp: 10_000,
            system_time: 5_000_000,
            tsc_to_system_mul: 1 << 31,
            tsc_shift: 0,
        };
        assert_eq!(snap.system_time_ns(9_990), 5_000_000);
    }

    #[test]
    fn self_test_ignores_a_clock_that_steps_back() {
        let mut reads = [5_000_000u64, 4_000_000, 4_000_000].into_iter();
        assert_eq!(
            wait_one_second(|| Ok(reads.next().unwrap_or(4_000_000)), 2),
            Ok(None)
        );
    }

    /// A time record that logs every access in order.
    struct Traced {
        events: RefCell<Vec<&'static str>>,
        record: VcpuTimeSnapshot,
    }

    impl Versioned for Traced {
        type Snapshot = VcpuTimeSnapshot;

        fn version(&self) -> u32 {
            self.events.borrow_mut().push("version");
            2
        }

        fn snapshot(&self) -> VcpuTimeSnapshot {
            self.events.borrow_mut().push("record");
            self.record
        }
    }

    #[test]
    fn tsc_is_sampled_between_the_version_reads() {
        let src = Traced {
            events: RefCell::new(Vec::new()),
            record: VcpuTimeSnapshot {
                tsc_timestamp: 1_000,
                system_time: 7,
                tsc_to_system_mul: 1 << 31,
                tsc_shift: 0,
            },
        };
        let tsc = || {
            src.events.borrow_mut().push("tsc");
            3_000
        };
        assert_eq!(monotonic_ns(&src, tsc, 4), Ok(1_007));
        assert_eq!(*src.events.borrow(), ["version", "record", "tsc", "version"]);
    }

    /// Two words a writer thread keeps equal under a version counter.
    #[derive(Default)]
    struct Racing {
        version: AtomicU32,
        low: AtomicU64,
        high: AtomicU64,
    }

    impl Racing {
        fn publish(&self, value: u64) {
            let v = self.version.load(Ordering::Relaxed);
            self.version.store(v + 1, Ordering::Relaxed);
            fence(Ordering::Release);
            self.low.store(value, Ordering::Relaxed);
            self.high.store(value, Ordering::Relaxed);
            self.version.store(v + 2, Ordering::Release);
        }
    }

    impl Versioned for Racing {
        type Snapshot = (u64, u64);

        fn version(&self) -> u32 {
            self.version.load(Ordering::Acquire)
        }

        fn snapshot(&self) -> (u64, u64) {
            (self.low.load(Ordering::Relaxed), self.high.load(Ordering::Relaxed))
        }
    }

    #[test]
    fn concurrent_writer_never_yields_a_torn_snapshot() {
        const WRITES: u64 = 50_000;
        let shared = Racing::default();
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                for value in 1..=WRITES {
                    shared.publish(value);
                }
                done.store(true, Ordering::Release);
            });

            let mut last = 0;
            while !done.load(Ordering::Acquire) {
                if let Ok((low, high)) = read_consistent(&shared, 64) {
                    assert_eq!(low, high, "torn read");
                    assert!(low >= last, "went back from {last} to {low}");
                    last = low;
                }
            }
        });

        assert_eq!(read_consistent(&shared, 1), Ok((WRITES, WRITES)));
    }
}
