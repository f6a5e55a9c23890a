//! Input surface adapter

use super::state::describe_output;
use super::Inner;
use crate::buffer::{BufferHandle, BufferRequestConfig, BufferWrapper};
use crate::error::{Error, Result};
use crate::surface::{ConsumerListener, Surface, SurfaceError};
use crate::types::LifecycleState;

use std::sync::{Arc, Weak};

/// Registered on the input surface; forwards upstream pushes to the engine
pub(super) struct InputListener {
    engine: Weak<Inner>,
}

impl InputListener {
    pub fn new(engine: Weak<Inner>) -> Self {
        Self { engine }
    }
}

impl ConsumerListener for InputListener {
    fn on_buffer_available(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.on_consumer_buffer_available();
        }
    }
}

impl Inner {
    /// Create the input queue and register the engine as its consumer
    pub(super) fn create_input_surface(&self) -> Result<Arc<dyn Surface>> {
        let mut input = self.input.lock();
        if input.surface.is_some() {
            return Err(Error::InvalidOperation(
                "Input surface already created".into(),
            ));
        }

        let pair = self.surface_factory.create_queue(&self.config.name)?;
        pair.consumer
            .register_consumer_listener(self.input_listener.clone())?;
        tracing::info!(surface = pair.consumer.unique_id(), "Input surface created");

        input.surface = Some(pair.consumer);
        input.producer = Some(Arc::clone(&pair.producer));
        Ok(pair.producer)
    }

    /// Upstream pushed a frame
    pub(super) fn on_consumer_buffer_available(&self) {
        let (state, eos_queued) = {
            let life = self.life.lock();
            (life.state, life.eos_queued)
        };
        if matches!(
            state,
            LifecycleState::Uninitialized | LifecycleState::Stopped
        ) {
            tracing::debug!("Input frame left queued in state {}", state);
            return;
        }

        let Some(buffer) = self.acquire_input(eos_queued) else {
            return;
        };
        self.populate_output_pool(&buffer);

        if matches!(
            state,
            LifecycleState::Running | LifecycleState::EosReached
        ) {
            self.wake();
        }
    }

    /// Acquire everything upstream queued while frames were not being accepted
    pub(super) fn pump_input(&self) {
        let eos_queued = self.life.lock().eos_queued;
        while let Some(buffer) = self.acquire_input(eos_queued) {
            self.populate_output_pool(&buffer);
        }
    }

    /// Acquire one frame from the input surface into `available`.
    ///
    /// After end-of-stream the frame goes straight back upstream.
    fn acquire_input(&self, after_eos: bool) -> Option<BufferHandle> {
        let (surface, acquired) = {
            let mut input = self.input.lock();
            let surface = input.surface.clone()?;
            let acquired = match surface.acquire_buffer() {
                Ok(acquired) => acquired,
                Err(SurfaceError::NoBuffer) => return None,
                Err(e) => {
                    tracing::warn!("Failed to acquire input buffer: {}", e);
                    return None;
                }
            };
            self.count(|s| s.frames_acquired += 1);

            if !after_eos {
                tracing::trace!(seq = acquired.buffer.seq(), "Input buffer queued");
                input.available.push_back(BufferWrapper::new(
                    Arc::clone(&acquired.buffer),
                    acquired.fence,
                    acquired.timestamp,
                ));
                return Some(acquired.buffer);
            }
            (surface, acquired)
        };

        tracing::debug!(seq = acquired.buffer.seq(), "Dropping input after end of stream");
        if let Err(e) = surface.release_buffer(&acquired.buffer, acquired.fence) {
            tracing::warn!("Failed to return input buffer: {}", e);
        }
        self.count(|s| s.frames_dropped += 1);
        // Keep acquiring so the queue drains
        Some(acquired.buffer)
    }

    /// On the first frame, derive the request template and fill the output pool
    fn populate_output_pool(&self, first: &BufferHandle) {
        let config = self.life.lock().config;

        let format = {
            let mut slot = self.swap.lock();
            if slot.template.is_some() {
                return;
            }
            let Some(surface) = slot.surface.clone() else {
                tracing::debug!("No output surface yet, output pool deferred");
                return;
            };

            let resolution = first.resolution();
            let template = BufferRequestConfig {
                width: resolution.width,
                height: resolution.height,
                stride_alignment: self.config.stride_alignment,
                format: config
                    .as_ref()
                    .and_then(|c| c.output_pixel_format())
                    .unwrap_or_else(|| first.format()),
                usage: first.usage(),
                timeout: self.config.request_timeout(),
            };

            let mut requested = Vec::new();
            for _ in 0..self.config.output_buffer_count {
                match surface.request_buffer(&template) {
                    Ok(pair) => requested.push(pair),
                    Err(e) => {
                        tracing::warn!("Output buffer request failed: {}", e);
                        break;
                    }
                }
            }
            if requested.is_empty() {
                return;
            }

            let count = requested.len();
            slot.template = Some(template);
            let mut output = self.output.lock();
            for (buffer, fence) in requested {
                output.attached.insert(buffer.seq(), Arc::clone(&buffer));
                output.available.push_back(BufferWrapper::new(buffer, fence, 0));
            }
            tracing::info!(
                "Output pool ready: {} buffers of {} {:?}",
                count,
                resolution,
                template.format
            );
            describe_output(resolution, template.format, config.as_ref(), &first.metadata())
        };

        let mut life = self.life.lock();
        if life.output_format.is_none() {
            life.output_format = Some(format);
        }
    }

    /// Hand unprocessed input buffers back upstream
    pub(super) fn return_inputs(&self, buffers: Vec<BufferWrapper>) {
        if buffers.is_empty() {
            return;
        }
        let Some(surface) = self.input.lock().surface.clone() else {
            return;
        };
        let count = buffers.len() as u64;
        for wrapper in buffers {
            if let Some(buffer) = &wrapper.buffer {
                if let Err(e) = surface.release_buffer(buffer, wrapper.fence.clone()) {
                    tracing::warn!(seq = buffer.seq(), "Failed to return input buffer: {}", e);
                }
            }
        }
        self.count(|s| s.frames_dropped += count);
    }

    /// Give a processed input buffer back to upstream
    pub(super) fn release_input(&self, wrapper: &BufferWrapper) {
        let Some(buffer) = &wrapper.buffer else {
            return;
        };
        let Some(surface) = self.input.lock().surface.clone() else {
            return;
        };
        if let Err(e) = surface.release_buffer(buffer, wrapper.fence.clone()) {
            tracing::warn!(seq = buffer.seq(), "Failed to release input buffer: {}", e);
        }
    }

    pub(super) fn teardown_input(&self) {
        let (surface, pending) = {
            let mut input = self.input.lock();
            input.producer = None;
            (input.surface.take(), input.take_queued())
        };
        let Some(surface) = surface else {
            return;
        };
        for wrapper in pending {
            if let Some(buffer) = &wrapper.buffer {
                if let Err(e) = surface.release_buffer(buffer, wrapper.fence.clone()) {
                    tracing::warn!(seq = buffer.seq(), "Failed to return input buffer: {}", e);
                }
            }
        }
        if let Err(e) = surface.unregister_consumer_listener() {
            tracing::warn!("Failed to unregister input listener: {}", e);
        }
        tracing::debug!("Input surface torn down");
    }
}
