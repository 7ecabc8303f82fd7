//! Built-in stressors
//!
//! Each stressor is a unit struct implementing [`Stressor`]; the closed
//! [`StressorKind`] enum names them for the command line.

mod getpid;
mod rand;
mod udp;
mod vm;

use core::fmt;
use kstress_core::ExitOutcome;
use kstress_runtime::WorkerContext;

pub use getpid::GetpidStressor;
pub use rand::RandStressor;
pub use udp::UdpStressor;
pub use vm::VmStressor;

/// A workload run inside every worker instance
///
/// `run` loops on `ctx.keep_running()`, counting one bogo-op per
/// iteration, and returns how the instance went.
pub trait Stressor: Sync {
    fn name(&self) -> &'static str;

    /// `Err(reason)` when this system cannot run the stressor at all
    fn supported(&self) -> Result<(), &'static str> {
        Ok(())
    }

    fn run(&self, ctx: &mut WorkerContext<'_>) -> ExitOutcome;
}

/// Built-in stressor names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StressorKind {
    Rand,
    Getpid,
    Udp,
    Vm,
}

impl StressorKind {
    pub const ALL: [StressorKind; 4] = [
        StressorKind::Rand,
        StressorKind::Getpid,
        StressorKind::Udp,
        StressorKind::Vm,
    ];

    pub fn name(self) -> &'static str {
        self.stressor().name()
    }

    /// Look a stressor up by its command-line name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name().eq_ignore_ascii_case(name))
    }

    pub fn stressor(self) -> &'static dyn Stressor {
        match self {
            StressorKind::Rand => &RandStressor,
            StressorKind::Getpid => &GetpidStressor,
            StressorKind::Udp => &UdpStressor,
            StressorKind::Vm => &VmStressor,
        }
    }
}

impl fmt::Display for StressorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        for kind in StressorKind::ALL {
            assert_eq!(StressorKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(StressorKind::from_name("UDP"), Some(StressorKind::Udp));
        assert_eq!(StressorKind::from_name("nope"), None);
        assert_eq!(StressorKind::Vm.to_string(), "vm");
    }
}
