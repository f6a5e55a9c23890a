//! Lifecycle and configuration state

use crate::buffer::BufferMetadata;
use crate::callback::ProcessorCallback;
use crate::config::TransformConfig;
use crate::error::{Error, Result};
use crate::types::{LifecycleState, OutputFormat, PixelFormat, Resolution};

use std::sync::Arc;

use LifecycleState::*;

/// Lifecycle/configuration domain, guarded by the engine's state lock
pub(crate) struct Lifecycle {
    pub state: LifecycleState,
    pub callback: Option<Arc<dyn ProcessorCallback>>,
    pub config: Option<TransformConfig>,
    pub output_format: Option<OutputFormat>,
    /// The worker is between pulling a pair and finishing it
    pub processing: bool,
    /// `on_state(Stopped)` owed once the running transform finishes
    pub stop_notify_pending: bool,
    /// End-of-stream sentinel sits in the input queue (or was consumed)
    pub eos_queued: bool,
    pub eos_delivered: bool,
    pub shutdown: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Uninitialized,
            callback: None,
            config: None,
            output_format: None,
            processing: false,
            stop_notify_pending: false,
            eos_queued: false,
            eos_delivered: false,
            shutdown: false,
        }
    }

    /// Fail with `InvalidState` unless the current state is one of `allowed`
    pub fn ensure(&self, operation: &'static str, allowed: &[LifecycleState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::invalid_state(operation, self.state))
        }
    }

    pub fn transition(&mut self, to: LifecycleState) {
        if self.state != to {
            tracing::info!("State {} -> {}", self.state, to);
            self.state = to;
        }
    }

    /// Whether the worker may pull another input/output pair
    pub fn can_pull(&self) -> bool {
        !self.shutdown
            && match self.state {
                Running => true,
                EosReached => !self.eos_delivered,
                _ => false,
            }
    }

    pub fn clear_eos(&mut self) {
        self.eos_queued = false;
        self.eos_delivered = false;
    }
}

/// States in which each public operation is legal
pub(crate) mod legal {
    use crate::types::LifecycleState::{self, *};

    pub const INIT: &[LifecycleState] = &[Uninitialized];
    pub const SETUP: &[LifecycleState] = &[Initialized, Configuring];
    pub const PREPARE: &[LifecycleState] = &[Initialized, Configuring, Stopped];
    pub const START: &[LifecycleState] = &[Configured, Flushed];
    pub const STOP: &[LifecycleState] = &[Running, EosReached, Flushed];
    pub const NOTIFY_EOS: &[LifecycleState] = &[Running];
    pub const FLUSH: &[LifecycleState] = &[Running, EosReached];
    pub const RELEASE_OUTPUT: &[LifecycleState] = &[Running, EosReached];
    pub const HOT_SWAP: &[LifecycleState] = &[Running, EosReached, Flushed];
    pub const SET_PARAMETER: &[LifecycleState] = &[
        Initialized,
        Configuring,
        Configured,
        Running,
        Stopped,
        Flushed,
        EosReached,
    ];
    pub const GET_PARAMETER: &[LifecycleState] = &[
        Initialized,
        Configuring,
        Configured,
        Running,
        Stopped,
        Flushed,
        EosReached,
        Error,
    ];
    pub const OUTPUT_FORMAT: &[LifecycleState] =
        &[Configured, Running, Stopped, Flushed, EosReached];
    pub const RESET: &[LifecycleState] = &[
        Initialized,
        Configuring,
        Configured,
        Running,
        Stopped,
        Flushed,
        EosReached,
        Error,
    ];
}

/// Format reported for output buffers of the given geometry.
///
/// A color conversion config forces its target tags; otherwise the input's
/// tags carry over.
pub(crate) fn describe_output(
    resolution: Resolution,
    pixel_format: PixelFormat,
    config: Option<&TransformConfig>,
    input: &BufferMetadata,
) -> OutputFormat {
    let (color_space, hdr_metadata_type) = match config.and_then(|c| c.output_color()) {
        Some((cs, hdr)) => (Some(cs), hdr),
        None => (input.color_space, input.hdr_type),
    };
    OutputFormat {
        resolution,
        pixel_format,
        color_space,
        hdr_metadata_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColorSpaceConfig;
    use crate::processing::{ColorSpaceInfo, HdrMetadataType};

    #[test]
    fn test_can_pull() {
        let mut life = Lifecycle::new();
        assert!(!life.can_pull());

        life.state = Running;
        assert!(life.can_pull());

        life.state = EosReached;
        assert!(life.can_pull());
        life.eos_delivered = true;
        assert!(!life.can_pull());

        life.state = Running;
        life.shutdown = true;
        assert!(!life.can_pull());
    }

    #[test]
    fn test_ensure_reports_current_state() {
        let life = Lifecycle::new();
        let err = life.ensure("start", legal::START).unwrap_err();
        assert_eq!(err.to_string(), "start is not allowed in state UNINITIALIZED");
        assert!(life.ensure("init", legal::INIT).is_ok());
    }

    #[test]
    fn test_describe_output_color_source() {
        let input = BufferMetadata {
            color_space: Some(ColorSpaceInfo::bt2020_pq()),
            hdr_type: HdrMetadataType::Static,
            ..Default::default()
        };
        let res = Resolution::new(4, 4);

        let passthrough = describe_output(res, PixelFormat::Rgba1010102, None, &input);
        assert_eq!(passthrough.color_space, Some(ColorSpaceInfo::bt2020_pq()));
        assert_eq!(passthrough.hdr_metadata_type, HdrMetadataType::Static);

        let csc = TransformConfig::ColorSpace(ColorSpaceConfig::default());
        let converted = describe_output(res, PixelFormat::Rgba8888, Some(&csc), &input);
        assert_eq!(converted.color_space, Some(ColorSpaceInfo::srgb()));
        assert_eq!(converted.hdr_metadata_type, HdrMetadataType::None);
    }
}
