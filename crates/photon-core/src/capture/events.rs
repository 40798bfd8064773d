//! Events emitted by the capture orchestrator.

/// Lifecycle state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    /// No session.
    #[default]
    Idle,
    /// Acquiring the frame source.
    Starting,
    /// Cycle loop active.
    Running,
    /// Releasing resources.
    Stopping,
}

/// Outbound event stream for the host shell, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Human-readable status line.
    StatusChanged(String),
    /// User-visible error. Emitted for failures that halt capture.
    ErrorRaised(String),
    /// Upload progress percentage, 0–100.
    ProgressUpdated(u8),
    /// The shell should show a persistent "capturing" indicator.
    IndicatorShown(String),
    /// The indicator should be removed.
    IndicatorRetired,
    /// The orchestrator changed state.
    StateChanged(CaptureState),
}
