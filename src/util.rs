use libc::timeval;
use rand::Rng;

/// Wall-clock microseconds since the epoch.
pub fn now_us() -> u64 {
    let tv = gettimeofday();
    tv.tv_sec as u64 * 1_000_000 + tv.tv_usec as u64
}

pub fn gettimeofday() -> timeval {
    let mut tv = timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    unsafe {
        libc::gettimeofday(&mut tv, std::ptr::null_mut());
    }
    tv
}

/// `a - b` with microsecond borrow normalisation; the result may be
/// negative in `tv_sec` with `tv_usec` in [0, 1000000).
pub fn timeval_sub(a: timeval, b: timeval) -> timeval {
    let mut diff = timeval {
        tv_sec: a.tv_sec - b.tv_sec,
        tv_usec: a.tv_usec - b.tv_usec,
    };
    if diff.tv_usec < 0 {
        diff.tv_sec -= 1;
        diff.tv_usec += 1_000_000;
    }
    diff
}

pub fn timeval_add_sec(mut tv: timeval, sec: i64) -> timeval {
    tv.tv_sec += sec as libc::time_t;
    tv
}

/// Absolute deadline `now + seconds`, the pattern every bounded I/O
/// loop starts from.
pub fn deadline_after(seconds: u32) -> timeval {
    timeval_add_sec(gettimeofday(), seconds as i64)
}

/// Remaining time until `deadline`; `None` once it has passed.
pub fn time_until(deadline: timeval) -> Option<timeval> {
    let left = timeval_sub(deadline, gettimeofday());
    if left.tv_sec < 0 {
        None
    } else {
        Some(left)
    }
}

pub fn timeval_to_ms(tv: timeval) -> i32 {
    (tv.tv_sec * 1000 + tv.tv_usec as libc::time_t / 1000) as i32
}

/// Uniformly random value in [lo, hi]; `lo` when the range is inverted.
pub fn rand_range(lo: u32, hi: u32) -> u32 {
    if lo >= hi {
        return lo;
    }
    rand::thread_rng().gen_range(lo..=hi)
}

pub fn usleep(us: u64) {
    std::thread::sleep(std::time::Duration::from_micros(us));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_borrows_microseconds() {
        let a = timeval {
            tv_sec: 5,
            tv_usec: 100,
        };
        let b = timeval {
            tv_sec: 3,
            tv_usec: 200,
        };
        let d = timeval_sub(a, b);
        assert_eq!(d.tv_sec, 1);
        assert_eq!(d.tv_usec, 999_900);
    }

    #[test]
    fn sub_can_go_negative() {
        let a = timeval {
            tv_sec: 1,
            tv_usec: 0,
        };
        let b = timeval {
            tv_sec: 2,
            tv_usec: 1,
        };
        let d = timeval_sub(a, b);
        assert!(d.tv_sec < 0);
        assert!(d.tv_usec >= 0 && d.tv_usec < 1_000_000);
    }

    #[test]
    fn rand_range_degenerate() {
        assert_eq!(rand_range(7, 7), 7);
        assert_eq!(rand_range(9, 2), 9);
        let v = rand_range(1, 3);
        assert!((1..=3).contains(&v));
    }
}
