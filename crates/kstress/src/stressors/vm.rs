//! Anonymous memory churn
//!
//! Maps a private anonymous area, dirties every page, checks the pattern
//! back and unmaps it again. The loop runs in an OOM-able child so an OOM
//! kill only costs a respawn.

use core::ptr::NonNull;
use nix::errno::Errno;
use nix::unistd::{sysconf, SysconfVar};
use kstress_core::{env_get, kdebug, ExitOutcome};
use kstress_runtime::{oomable_child, WorkerContext};
use super::Stressor;

/// Bytes mapped per instance unless `KSTRESS_VM_BYTES` says otherwise
pub const DEFAULT_VM_BYTES: usize = 16 * 1024 * 1024;

const FALLBACK_PAGE_SIZE: usize = 4096;

pub struct VmStressor;

struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    fn new(len: usize) -> nix::Result<Self> {
        // Safety: fresh private anonymous mapping, no existing memory touched
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Errno::last());
        }
        NonNull::new(ptr as *mut u8)
            .map(|ptr| Self { ptr, len })
            .ok_or(Errno::ENOMEM)
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: we own the whole mapping for its lifetime
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // Safety: ptr/len come from a successful mmap
        unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len) };
    }
}

fn page_size() -> usize {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(n)) if n > 0 => n as usize,
        _ => FALLBACK_PAGE_SIZE,
    }
}

/// Dirty one byte per page with `seed`-derived values; count mismatches
fn touch_pages(area: &mut [u8], page: usize, seed: u8, verify: bool) -> usize {
    for (i, b) in area.iter_mut().step_by(page).enumerate() {
        *b = seed.wrapping_add(i as u8);
    }
    if !verify {
        return 0;
    }
    area.iter()
        .step_by(page)
        .enumerate()
        .filter(|&(i, &b)| b != seed.wrapping_add(i as u8))
        .count()
}

impl Stressor for VmStressor {
    fn name(&self) -> &'static str {
        "vm"
    }

    fn run(&self, ctx: &mut WorkerContext<'_>) -> ExitOutcome {
        let page = page_size();
        let bytes = env_get("KSTRESS_VM_BYTES", DEFAULT_VM_BYTES).max(page);

        oomable_child(ctx, |ctx| {
            let verify = ctx.verify();
            while ctx.keep_running() {
                let mut map = match ctx.retry_transient(|| Mapping::new(bytes)) {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => return ctx.errno_outcome("mmap", e),
                    None => break,
                };
                let seed = ctx.rng().next_u8();
                let bad = touch_pages(map.as_mut_slice(), page, seed, verify);
                if bad > 0 {
                    kdebug!("vm: {} pages lost their pattern", bad);
                    return ExitOutcome::Failure;
                }
                ctx.bogo_inc();
            }
            ExitOutcome::Success
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_pages() {
        let page = page_size();
        let mut map = Mapping::new(page * 8).unwrap();
        assert_eq!(touch_pages(map.as_mut_slice(), page, 200, true), 0);
        let area = map.as_mut_slice();
        assert_eq!(area[0], 200);
        assert_eq!(area[page * 7], 200u8.wrapping_add(7));
        assert_eq!(area[1], 0);
    }
}
