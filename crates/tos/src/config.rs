//! Boot-time configuration.

use std::fmt;

use ktrace::TraceHook;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

pub const DEFAULT_MAX_PROCESSES: usize = 20;
pub const DEFAULT_MAX_PORTS: usize = 2 * DEFAULT_MAX_PROCESSES;

/// Table capacities, fixed for the lifetime of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KernelLimits {
    pub max_processes: usize,
    pub max_ports: usize,
}

impl Default for KernelLimits {
    fn default() -> Self {
        Self {
            max_processes: DEFAULT_MAX_PROCESSES,
            max_ports: DEFAULT_MAX_PORTS,
        }
    }
}

impl KernelLimits {
    pub fn validate(&self) -> KernelResult<()> {
        if self.max_processes < 1 {
            return Err(KernelError::InvalidConfig(
                "max_processes must be at least 1",
            ));
        }
        if self.max_ports < 1 {
            return Err(KernelError::InvalidConfig("max_ports must be at least 1"));
        }
        // Identifiers store the slot index as a u16.
        let max_slots = usize::from(u16::MAX);
        if self.max_processes > max_slots || self.max_ports > max_slots {
            return Err(KernelError::InvalidConfig(
                "table limits must not exceed 65535 slots",
            ));
        }
        if self.max_ports < self.max_processes {
            return Err(KernelError::InvalidConfig(
                "max_ports must not be smaller than max_processes",
            ));
        }
        Ok(())
    }
}

/// Configuration for booting a [`Kernel`](crate::Kernel).
///
/// The timer service is started by default; the serial and keyboard driver
/// processes are opt-in.
#[derive(Clone)]
pub struct KernelConfig {
    pub name: &'static str,
    pub limits: KernelLimits,
    pub timer: bool,
    pub serial: bool,
    pub keyboard: bool,
    pub trace: Option<TraceHook>,
    /// Runs on the idle process each time the system becomes quiescent.
    pub idle_callback: Option<fn()>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "TOS",
            limits: KernelLimits::default(),
            timer: true,
            serial: false,
            keyboard: false,
            trace: None,
            idle_callback: None,
        }
    }
}

impl fmt::Debug for KernelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelConfig")
            .field("name", &self.name)
            .field("limits", &self.limits)
            .field("timer", &self.timer)
            .field("serial", &self.serial)
            .field("keyboard", &self.keyboard)
            .field("trace", &self.trace.is_some())
            .field("idle_callback", &self.idle_callback.is_some())
            .finish()
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }

    pub fn validate(&self) -> KernelResult<()> {
        self.limits.validate()
    }
}

/// Builder for [`KernelConfig`].
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the kernel name.
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the process table capacity, idle process included.
    pub fn max_processes(mut self, max: usize) -> Self {
        self.config.limits.max_processes = max;
        self
    }

    /// Sets the port table capacity.
    pub fn max_ports(mut self, max: usize) -> Self {
        self.config.limits.max_ports = max;
        self
    }

    pub fn limits(mut self, limits: KernelLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Enables or disables the timer service.
    pub fn timer(mut self, enabled: bool) -> Self {
        self.config.timer = enabled;
        self
    }

    /// Enables or disables the COM1 driver processes.
    pub fn serial(mut self, enabled: bool) -> Self {
        self.config.serial = enabled;
        self
    }

    /// Enables or disables the keyboard driver process.
    pub fn keyboard(mut self, enabled: bool) -> Self {
        self.config.keyboard = enabled;
        self
    }

    /// Installs a binary trace hook.
    pub fn trace_hook(mut self, hook: TraceHook) -> Self {
        self.config.trace = Some(hook);
        self
    }

    /// Sets the idle callback function.
    pub fn idle_callback(mut self, callback: fn()) -> Self {
        self.config.idle_callback = Some(callback);
        self
    }

    /// Builds the kernel configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_classic_tables() {
        let config = KernelConfig::default();
        assert_eq!(config.limits.max_processes, 20);
        assert_eq!(config.limits.max_ports, 40);
        assert!(config.timer);
        assert!(!config.serial);
        assert!(!config.keyboard);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides_fields() {
        let config = KernelConfig::builder()
            .name("test")
            .max_processes(4)
            .max_ports(8)
            .timer(false)
            .serial(true)
            .keyboard(true)
            .build();

        assert_eq!(config.name, "test");
        assert_eq!(
            config.limits,
            KernelLimits {
                max_processes: 4,
                max_ports: 8
            }
        );
        assert!(!config.timer);
        assert!(config.serial);
        assert!(config.keyboard);
    }

    #[test]
    fn fewer_ports_than_processes_is_rejected() {
        let config = KernelConfig::builder().max_processes(8).max_ports(4).build();
        assert!(matches!(
            config.validate(),
            Err(KernelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn limits_beyond_identifier_range_are_rejected() {
        let too_many_ports = KernelLimits {
            max_processes: 4,
            max_ports: 65_536,
        };
        assert!(matches!(
            too_many_ports.validate(),
            Err(KernelError::InvalidConfig(_))
        ));

        let too_many_processes = KernelLimits {
            max_processes: 70_000,
            max_ports: 70_000,
        };
        assert!(too_many_processes.validate().is_err());

        let widest = KernelLimits {
            max_processes: 65_535,
            max_ports: 65_535,
        };
        assert!(widest.validate().is_ok());
    }

    #[test]
    fn empty_process_table_is_rejected() {
        let config = KernelConfig::builder().max_processes(0).build();
        assert!(matches!(
            config.validate(),
            Err(KernelError::InvalidConfig(_))
        ));
    }
}
