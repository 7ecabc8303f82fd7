//! Environmental entropy for PRNG reseeding
//!
//! None of these sources is secret or even very random on its own; mixed
//! together they make instances and runs diverge, which is all a stress
//! run needs. Any source that fails simply contributes nothing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};
use kstress_core::kwarn;
use kstress_core::prng::{is_degenerate_seed, Mwc};
use crate::config::RunConfig;

/// 16 random bytes the kernel hands every new process image
fn at_random() -> Option<[u64; 2]> {
    // Safety: getauxval is always safe to call; AT_RANDOM points at 16 bytes
    unsafe {
        let p = libc::getauxval(libc::AT_RANDOM) as *const u8;
        if p.is_null() {
            return None;
        }
        let mut b = [0u8; 16];
        core::ptr::copy_nonoverlapping(p, b.as_mut_ptr(), 16);
        Some([
            u64::from_ne_bytes(b[..8].try_into().ok()?),
            u64::from_ne_bytes(b[8..].try_into().ok()?),
        ])
    }
}

fn getrandom_u64() -> Option<u64> {
    let mut v = 0u64;
    // Safety: writes at most 8 bytes into v
    let n = unsafe {
        libc::getrandom(&mut v as *mut u64 as *mut libc::c_void, 8, libc::GRND_NONBLOCK)
    };
    (n == 8).then_some(v)
}

fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // Safety: ts is a valid out pointer
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    (ts.tv_sec as u64).wrapping_mul(1_000_000_000).wrapping_add(ts.tv_nsec as u64)
}

fn loadavg_bits() -> Option<u64> {
    let mut avg = [0f64; 3];
    // Safety: avg has room for the single sample requested
    let n = unsafe { libc::getloadavg(avg.as_mut_ptr(), 1) };
    (n >= 1).then(|| avg[0].to_bits())
}

fn cpu_id() -> Option<u64> {
    // Safety: no arguments
    let cpu = unsafe { libc::sched_getcpu() };
    (cpu >= 0).then_some(cpu as u64)
}

fn memory_info() -> Option<[u64; 2]> {
    // Safety: sysinfo fills the zeroed struct
    unsafe {
        let mut info: libc::sysinfo = core::mem::zeroed();
        if libc::sysinfo(&mut info) != 0 {
            return None;
        }
        Some([info.totalram as u64, info.freeram as u64])
    }
}

fn root_fs_blocks() -> Option<[u64; 2]> {
    let st = nix::sys::statvfs::statvfs("/").ok()?;
    Some([st.blocks() as u64, st.blocks_free() as u64])
}

fn kernel_release_hash() -> Option<u64> {
    let uts = nix::sys::utsname::uname().ok()?;
    let mut h = DefaultHasher::new();
    uts.release().hash(&mut h);
    Some(h.finish())
}

/// Collect every available entropy source
pub fn gather() -> Vec<u64> {
    let mut e = Vec::with_capacity(16);
    e.extend(at_random().into_iter().flatten());
    e.extend(getrandom_u64());
    if let Ok(t) = SystemTime::now().duration_since(UNIX_EPOCH) {
        e.push(t.as_nanos() as u64);
    }
    e.push(monotonic_ns());
    e.push(std::process::id() as u64);
    e.push(nix::unistd::getppid().as_raw() as u64);
    e.extend(loadavg_bits());
    e.extend(cpu_id());
    e.extend(memory_info().into_iter().flatten());
    e.extend(root_fs_blocks().into_iter().flatten());
    e.extend(kernel_release_hash());
    e
}

/// Seed a worker's generator according to the run configuration
///
/// - an explicit seed wins, unless it is stuck at a fixed point, in which
///   case the defaults are used
/// - with random seeding, entropy plus `salt` (unique per instance) is mixed
/// - otherwise the fixed default seeds give reproducible runs
pub fn reseed(rng: &mut Mwc, config: &RunConfig, salt: u64) {
    if let Some((w, z)) = config.seed {
        if is_degenerate_seed(w, z) {
            kwarn!("seed {},{} never changes state, using defaults", w, z);
            rng.reset();
        } else {
            rng.set_seed(w, z);
        }
    } else if config.random_seed {
        let mut e = gather();
        e.push(salt);
        rng.reseed_with(&e);
    } else {
        rng.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_has_sources() {
        let e = gather();
        // clocks and pids never fail
        assert!(e.len() >= 4);
        assert!(e.contains(&(std::process::id() as u64)));
    }

    #[test]
    fn test_reseed_modes() {
        let mut a = Mwc::new();
        a.next_u32();
        reseed(&mut a, &RunConfig::new(), 7);
        assert_eq!(a, Mwc::new());

        reseed(&mut a, &RunConfig::new().seed(11, 22), 7);
        assert_eq!(a.get_seed(), (11, 22));

        let mut b = Mwc::new();
        reseed(&mut a, &RunConfig::new().random_seed(true), 1);
        reseed(&mut b, &RunConfig::new().random_seed(true), 2);
        assert_ne!(a.get_seed(), b.get_seed());
    }

    #[test]
    fn test_fixed_point_seed_uses_defaults() {
        kstress_core::kprint::set_log_level(kstress_core::kprint::LogLevel::Off);
        let mut a = Mwc::new();
        reseed(&mut a, &RunConfig::new().seed(0x464f_ffff, 0x9068_ffff), 3);
        assert_eq!(a, Mwc::new());
        assert!(a.bounded_u32(1009) < 1009);
    }
}
