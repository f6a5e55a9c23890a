//! Worker loop: pairs input with output buffers and runs the backend

use super::state::{describe_output, legal};
use super::Inner;
use crate::buffer::{BufferWrapper, Fence, NativeBuffer};
use crate::callback::CallbackEvent;
use crate::error::{Error, Result};
use crate::types::{BufferFlag, LifecycleState};

use std::sync::Arc;
use std::time::Duration;

/// Longest wait for an input buffer's producer fence
const FENCE_TIMEOUT: Duration = Duration::from_secs(3);

/// Worker thread body
pub(super) fn run(engine: Arc<Inner>) {
    tracing::info!("{} worker started", engine.kind);

    while engine.wait_processing() {
        engine.reclaim_released();
        while let Some((input, output)) = engine.acquire_pair() {
            let mut events = Vec::new();
            let eos = input.is_eos();
            if eos {
                engine.deliver_eos(output, &mut events);
            } else {
                engine.process(input, output, &mut events);
            }
            engine.finish_frame(&mut events);
            engine.dispatch(events);
            if eos {
                break;
            }
        }
    }

    tracing::info!("{} worker stopped", engine.kind);
}

impl Inner {
    /// Block until a pair can be pulled or released output buffers wait to
    /// be reclaimed; false on shutdown
    fn wait_processing(&self) -> bool {
        loop {
            {
                let life = self.life.lock();
                if life.shutdown {
                    return false;
                }
                let input = self.input.lock();
                let output = self.output.lock();
                if output.pending_releases > 0 {
                    return true;
                }
                if life.can_pull() && !input.available.is_empty() && !output.available.is_empty()
                {
                    return true;
                }
            }
            if self.bell.recv().is_err() {
                return false;
            }
        }
    }

    /// Pop one input and one output buffer, marking a transform as running
    fn acquire_pair(&self) -> Option<(BufferWrapper, BufferWrapper)> {
        let mut life = self.life.lock();
        if !life.can_pull() {
            return None;
        }
        let mut input = self.input.lock();
        let mut output = self.output.lock();
        if input.available.is_empty() || output.available.is_empty() {
            return None;
        }
        let pair = (input.available.pop_front()?, output.available.pop_front()?);
        life.processing = true;
        Some(pair)
    }

    fn finish_frame(&self, events: &mut Vec<CallbackEvent>) {
        let mut life = self.life.lock();
        life.processing = false;
        if life.stop_notify_pending {
            life.stop_notify_pending = false;
            events.push(CallbackEvent::State(LifecycleState::Stopped));
        }
        self.idle.notify_all();
    }

    fn deliver_eos(&self, output: BufferWrapper, events: &mut Vec<CallbackEvent>) {
        let Some(seq) = output.seq() else {
            return;
        };
        let mut wrapper = output;
        wrapper.flag = BufferFlag::Eos;
        self.output.lock().delivered.insert(seq, wrapper);
        self.life.lock().eos_delivered = true;

        tracing::info!(seq, "End of stream delivered");
        events.push(CallbackEvent::OutputBufferAvailable {
            index: seq,
            flag: BufferFlag::Eos,
        });
    }

    /// Transform one frame.
    ///
    /// The input always goes back upstream; a failed frame is dropped and
    /// its output buffer recycled.
    fn process(&self, input: BufferWrapper, output: BufferWrapper, events: &mut Vec<CallbackEvent>) {
        let (Some(src), Some(dst)) = (input.buffer.clone(), output.buffer.clone()) else {
            self.release_input(&input);
            self.recycle(output);
            return;
        };

        let result = self.transform(&src, &dst, &input.fence, events);
        self.release_input(&input);

        let seq = dst.seq();
        match result {
            Ok(()) => {
                let mut wrapper = output;
                wrapper.flag = BufferFlag::Normal;
                wrapper.timestamp = input.timestamp;
                self.output.lock().delivered.insert(seq, wrapper);
                self.count(|s| s.frames_processed += 1);
                tracing::trace!(input = src.seq(), output = seq, "Frame processed");
                events.push(CallbackEvent::OutputBufferAvailable {
                    index: seq,
                    flag: BufferFlag::Normal,
                });
            }
            Err(e) => {
                tracing::error!(input = src.seq(), output = seq, "Frame dropped: {}", e);
                self.output.lock().available.push_back(output);
                self.count(|s| s.frames_failed += 1);
                events.push(CallbackEvent::Error(e.code()));
            }
        }
    }

    fn transform(
        &self,
        input: &NativeBuffer,
        output: &NativeBuffer,
        fence: &Fence,
        events: &mut Vec<CallbackEvent>,
    ) -> Result<()> {
        if !fence.wait(FENCE_TIMEOUT) {
            return Err(Error::Backend("Input fence timed out".into()));
        }

        let config = self.life.lock().config;
        let metadata = input.metadata();
        let resolution = input.resolution();
        let format = config
            .as_ref()
            .and_then(|c| c.output_pixel_format())
            .unwrap_or_else(|| input.format());

        let reallocated = output.reallocate(resolution, format);
        if reallocated {
            tracing::debug!(seq = output.seq(), "Output buffer reallocated to {} {:?}", resolution, format);
            if let Some(template) = self.swap.lock().template.as_mut() {
                template.width = resolution.width;
                template.height = resolution.height;
                template.format = format;
            }
        }

        let described = describe_output(resolution, format, config.as_ref(), &metadata);
        let changed = {
            let mut life = self.life.lock();
            match &life.output_format {
                // Unknown again after a reset: record it without a change notification
                None => {
                    life.output_format = Some(described.clone());
                    false
                }
                Some(current) if reallocated && *current != described => {
                    life.output_format = Some(described.clone());
                    true
                }
                Some(_) => false,
            }
        };
        if changed {
            tracing::info!("Output format changed to {} {:?}", resolution, format);
            self.count(|s| s.format_changes += 1);
            events.push(CallbackEvent::OutputFormatChanged(described));
        }

        output.update_metadata(|meta| match config.and_then(|c| c.output_color()) {
            Some((color_space, hdr_type)) => {
                meta.clear();
                meta.color_space = Some(color_space);
                meta.hdr_type = hdr_type;
            }
            None => *meta = metadata.clone(),
        });

        let mut backend = self.backend.lock();
        backend
            .as_mut()
            .ok_or_else(|| Error::Internal("Transform backend not created".into()))?
            .process(input, output)
    }

    /// Return pending input upstream and reclaim delivered output buffers
    pub(super) fn flush(&self) -> Result<()> {
        let pending = {
            let mut life = self.life.lock();
            life.ensure("flush", legal::FLUSH)?;
            self.idle.wait_while(&mut life, |l| l.processing);
            life.ensure("flush", legal::FLUSH)?;

            let pending = self.input.lock().take_queued();
            let reclaimed = self.output.lock().reclaim_delivered();
            tracing::debug!(
                "Flush: {} input buffers returned, {} output buffers reclaimed",
                pending.len(),
                reclaimed
            );
            life.clear_eos();
            life.transition(LifecycleState::Flushed);
            pending
        };
        self.return_inputs(pending);
        Ok(())
    }
}
