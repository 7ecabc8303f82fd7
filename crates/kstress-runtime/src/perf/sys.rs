//! Raw perf_event bindings
//!
//! Mirrors the parts of `linux/perf_event.h` the harness uses.

use std::os::unix::io::RawFd;
use nix::errno::Errno;

/// `PERF_ATTR_SIZE_VER5`
pub const PERF_ATTR_SIZE: u32 = 112;

pub const PERF_FORMAT_TOTAL_TIME_ENABLED: u64 = 1 << 0;
pub const PERF_FORMAT_TOTAL_TIME_RUNNING: u64 = 1 << 1;

pub const PERF_FLAG_FD_CLOEXEC: libc::c_ulong = 1 << 3;

/// Apply an ioctl to the whole group
pub const PERF_IOC_FLAG_GROUP: libc::c_int = 1;

// attr.flags bitfield
pub const ATTR_DISABLED: u64 = 1 << 0;
pub const ATTR_INHERIT: u64 = 1 << 1;

// ── ioctl ──

const PERF_IOC_MAGIC: u8 = b'$';

// _IO('$', 0), _IO('$', 1), _IO('$', 3)
nix::ioctl_write_int_bad!(perf_ioc_enable, nix::request_code_none!(PERF_IOC_MAGIC, 0));
nix::ioctl_write_int_bad!(perf_ioc_disable, nix::request_code_none!(PERF_IOC_MAGIC, 1));
nix::ioctl_write_int_bad!(perf_ioc_reset, nix::request_code_none!(PERF_IOC_MAGIC, 3));

/// `struct perf_event_attr`, ABI version 5
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PerfEventAttr {
    pub type_: u32,
    pub size: u32,
    pub config: u64,
    pub sample_period: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub flags: u64,
    pub wakeup_events: u32,
    pub bp_type: u32,
    pub config1: u64,
    pub config2: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    pub _reserved: u16,
}

const _: () = assert!(core::mem::size_of::<PerfEventAttr>() == PERF_ATTR_SIZE as usize);

impl PerfEventAttr {
    /// Counting (not sampling) attr: created disabled, inherited by children
    pub fn counter(type_: u32, config: u64) -> Self {
        Self {
            type_,
            size: PERF_ATTR_SIZE,
            config,
            read_format: PERF_FORMAT_TOTAL_TIME_ENABLED | PERF_FORMAT_TOTAL_TIME_RUNNING,
            flags: ATTR_DISABLED | ATTR_INHERIT,
            ..Self::default()
        }
    }
}

/// What a read of a counter fd returns with our `read_format`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfReadValue {
    pub counter: u64,
    pub time_enabled: u64,
    pub time_running: u64,
}

/// perf_event_open for the calling process on any CPU, no group leader
pub fn perf_event_open(attr: &PerfEventAttr) -> Result<RawFd, Errno> {
    // Safety: attr is a valid, fully initialized perf_event_attr
    let fd = unsafe {
        libc::syscall(
            libc::SYS_perf_event_open,
            attr as *const PerfEventAttr,
            0 as libc::pid_t,
            -1 as libc::c_int,
            -1 as libc::c_int,
            PERF_FLAG_FD_CLOEXEC,
        )
    };
    if fd < 0 {
        Err(Errno::last())
    } else {
        Ok(fd as RawFd)
    }
}

/// Read `{counter, time_enabled, time_running}` from a counter fd
pub fn read_value(fd: RawFd) -> Result<PerfReadValue, Errno> {
    let mut val = PerfReadValue::default();
    let want = core::mem::size_of::<PerfReadValue>();
    loop {
        // Safety: val is a plain repr(C) struct of `want` bytes
        let n = unsafe { libc::read(fd, &mut val as *mut PerfReadValue as *mut libc::c_void, want) };
        if n == want as isize {
            return Ok(val);
        }
        if n < 0 {
            match Errno::last() {
                Errno::EINTR => continue,
                e => return Err(e),
            }
        }
        return Err(Errno::EIO);
    }
}

pub fn close(fd: RawFd) {
    // Safety: fd is owned by the caller's slot and not used afterwards
    unsafe { libc::close(fd) };
}
