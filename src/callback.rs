//! Client notification
//!
//! The engine reports frame and lifecycle events through a
//! [`ProcessorCallback`]. Events are delivered synchronously on the thread
//! that triggered them: the worker thread for frame events, the calling
//! thread for `start`/`stop`.

use crate::error::ErrorCode;
use crate::types::{BufferFlag, LifecycleState, OutputFormat};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Client callback interface
pub trait ProcessorCallback: Send + Sync {
    /// A frame failed; the pipeline keeps running
    fn on_error(&self, code: ErrorCode);

    fn on_state(&self, state: LifecycleState);

    /// Output buffer `index` is ready; hand it back with `release_output_buffer`
    fn on_output_buffer_available(&self, index: u32, flag: BufferFlag);

    fn on_output_format_changed(&self, format: &OutputFormat);
}

/// A callback invocation captured by [`ChannelCallback`]
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackEvent {
    Error(ErrorCode),
    State(LifecycleState),
    OutputBufferAvailable { index: u32, flag: BufferFlag },
    OutputFormatChanged(OutputFormat),
}

/// Callback that forwards every event into a channel
#[derive(Clone)]
pub struct ChannelCallback {
    sender: Sender<CallbackEvent>,
}

impl ChannelCallback {
    /// Create a callback with its receiving end
    pub fn new() -> (Self, CallbackEvents) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, CallbackEvents { receiver })
    }

    fn send(&self, event: CallbackEvent) {
        // Receiver gone means nobody is listening anymore
        let _ = self.sender.send(event);
    }
}

impl ProcessorCallback for ChannelCallback {
    fn on_error(&self, code: ErrorCode) {
        self.send(CallbackEvent::Error(code));
    }

    fn on_state(&self, state: LifecycleState) {
        self.send(CallbackEvent::State(state));
    }

    fn on_output_buffer_available(&self, index: u32, flag: BufferFlag) {
        self.send(CallbackEvent::OutputBufferAvailable { index, flag });
    }

    fn on_output_format_changed(&self, format: &OutputFormat) {
        self.send(CallbackEvent::OutputFormatChanged(format.clone()));
    }
}

/// Receiving end of a [`ChannelCallback`]
pub struct CallbackEvents {
    receiver: Receiver<CallbackEvent>,
}

impl CallbackEvents {
    /// Try to receive the next event without blocking
    pub fn try_recv(&self) -> Option<CallbackEvent> {
        self.receiver.try_recv().ok()
    }

    /// Receive with timeout
    pub fn recv_timeout(&self, timeout: Duration) -> Option<CallbackEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Wait for the first event matching `pred`, discarding the others
    pub fn wait_for(
        &self,
        timeout: Duration,
        mut pred: impl FnMut(&CallbackEvent) -> bool,
    ) -> Option<CallbackEvent> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let event = self.recv_timeout(remaining)?;
            if pred(&event) {
                return Some(event);
            }
        }
    }

    /// Everything received so far
    pub fn drain(&self) -> Vec<CallbackEvent> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_callback_forwards_events() {
        let (callback, events) = ChannelCallback::new();
        callback.on_state(LifecycleState::Running);
        callback.on_output_buffer_available(7, BufferFlag::Eos);
        callback.on_error(ErrorCode::ProcessFailed);

        assert_eq!(
            events.try_recv(),
            Some(CallbackEvent::State(LifecycleState::Running))
        );
        let eos = events.wait_for(Duration::from_millis(10), |e| {
            matches!(e, CallbackEvent::OutputBufferAvailable { .. })
        });
        assert_eq!(
            eos,
            Some(CallbackEvent::OutputBufferAvailable {
                index: 7,
                flag: BufferFlag::Eos
            })
        );
        assert_eq!(events.drain(), vec![CallbackEvent::Error(ErrorCode::ProcessFailed)]);
        assert!(events.recv_timeout(Duration::from_millis(1)).is_none());
    }
}
