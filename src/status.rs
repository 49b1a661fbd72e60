//! System status tracking
//!
//! Three views of the same state. `status` is what the last fusion cycle
//! concluded, `pending` collects the verdict of the cycle in progress and
//! `displayed` is a rate-limited copy for indicators.

use crate::types::SystemStatus;

/// Status with a pending slot and a rate-limited display copy.
///
/// # Example
/// ```
/// use orientation_fusion::{StatusMonitor, SystemStatus};
///
/// let mut monitor = StatusMonitor::new();
/// monitor.queue(SystemStatus::Normal);
/// monitor.commit();
/// assert_eq!(monitor.status(), SystemStatus::Normal);
/// assert_eq!(monitor.displayed(), SystemStatus::Initializing);
///
/// monitor.publish();
/// assert_eq!(monitor.displayed(), SystemStatus::Normal);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusMonitor {
    status: SystemStatus,
    pending: SystemStatus,
    displayed: SystemStatus,
}

impl StatusMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status concluded by the last fusion cycle
    pub fn status(&self) -> SystemStatus {
        self.status
    }

    /// Status value waiting for the next commit
    pub fn pending(&self) -> SystemStatus {
        self.pending
    }

    /// Rate-limited status for indicators
    pub fn displayed(&self) -> SystemStatus {
        self.displayed
    }

    /// Change every view at once.
    pub fn set(&mut self, status: SystemStatus) {
        if self.is_latched() {
            return;
        }
        self.status = status;
        self.pending = status;
        self.displayed = status;
    }

    /// Record the verdict of the cycle in progress.
    pub fn queue(&mut self, status: SystemStatus) {
        if self.is_latched() {
            return;
        }
        self.pending = status;
    }

    /// Make the pending verdict current.
    pub fn commit(&mut self) {
        if self.is_latched() {
            return;
        }
        self.status = self.pending;
    }

    /// Refresh the displayed copy.
    pub fn publish(&mut self) {
        self.displayed = self.status;
    }

    /// Leave `HardFault` and start over at `Initializing`.
    pub fn clear_hard_fault(&mut self) {
        if self.is_latched() {
            log::info!("hard fault cleared");
            self.status = SystemStatus::Initializing;
            self.pending = SystemStatus::Initializing;
            self.displayed = SystemStatus::Initializing;
        }
    }

    /// Enter `HardFault`. Only [`StatusMonitor::clear_hard_fault`] leaves it.
    pub fn latch_hard_fault(&mut self) {
        self.status = SystemStatus::HardFault;
        self.pending = SystemStatus::HardFault;
        self.displayed = SystemStatus::HardFault;
    }

    fn is_latched(&self) -> bool {
        self.status == SystemStatus::HardFault
    }
}
