//! Output surface adapter: attachment, hot swap and render bookkeeping

use super::state::legal;
use super::Inner;
use crate::buffer::{BufferWrapper, Damage, FlushConfig};
use crate::error::{Error, Result};
use crate::surface::{ReleaseListener, Surface, SurfaceRole};
use crate::types::{BufferFlag, LifecycleState, ScalingMode, TransformMode};

use std::sync::{Arc, Weak};

/// Registered on the output surface; downstream finished with a buffer
pub(super) struct OutputReleaseListener {
    engine: Weak<Inner>,
}

impl OutputReleaseListener {
    pub fn new(engine: Weak<Inner>) -> Self {
        Self { engine }
    }
}

impl ReleaseListener for OutputReleaseListener {
    fn on_buffer_released(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.on_producer_buffer_released();
        }
    }
}

fn step<T>(what: &str, result: crate::surface::SurfaceResult<T>) -> Result<T> {
    result.map_err(|e| {
        tracing::warn!("Output surface {} failed: {}", what, e);
        Error::Surface(e)
    })
}

impl Inner {
    pub(super) fn set_output_surface(&self, surface: Arc<dyn Surface>) -> Result<()> {
        if surface.role() == SurfaceRole::Consumer {
            return Err(Error::InvalidValue(
                "Output surface must be a producer".into(),
            ));
        }

        {
            let mut life = self.life.lock();
            if legal::SETUP.contains(&life.state) {
                self.replace_output_surface(surface)?;
                life.transition(LifecycleState::Configuring);
                return Ok(());
            }
            life.ensure("set_output_surface", legal::HOT_SWAP)?;
        }

        self.replace_output_surface(surface)?;
        self.wake();
        Ok(())
    }

    /// Adopt `surface` as the output surface, migrating every buffer the
    /// pipeline already holds onto it.
    ///
    /// The swap lock is held throughout, so the worker never reclaims from a
    /// half-migrated surface. On failure no surface is current and the
    /// in-flight buffers stay tracked, so setting the same surface again
    /// redoes the whole migration.
    fn replace_output_surface(&self, surface: Arc<dyn Surface>) -> Result<()> {
        let (transform, scaling) = self.input_presentation();

        let mut slot = self.swap.lock();
        if let Some(current) = &slot.surface {
            if current.unique_id() == surface.unique_id() {
                tracing::debug!(surface = surface.unique_id(), "Output surface unchanged");
                return Ok(());
            }
        }

        if let Some(old) = slot.surface.take() {
            if let Err(e) = old.unregister_release_listener() {
                tracing::warn!("Failed to unregister release listener: {}", e);
            }
            if let Err(e) = old.clean_cache() {
                tracing::warn!("Failed to clean old output surface: {}", e);
            }
        }

        step(
            "listener registration",
            surface.register_release_listener(self.release_listener.clone()),
        )?;
        step(
            "queue size",
            surface.set_queue_size(self.config.output_buffer_count),
        )?;

        // Nothing requested yet: storing the surface is enough
        if slot.template.is_none() {
            slot.surface = Some(surface.clone());
            tracing::info!(surface = surface.unique_id(), "Output surface set");
            return Ok(());
        }

        step("connect", surface.connect())?;
        step("cache clean", surface.clean_cache())?;

        let (drained, attached) = {
            let mut output = self.output.lock();
            for buffer in output.attached.values() {
                step("buffer attach", surface.attach_buffer(buffer))?;
            }
            let drained = output.in_flight.len();
            let in_flight: Vec<_> = output.in_flight.drain(..).collect();
            output.available.extend(in_flight);
            output.pending_releases = 0;
            (drained, output.attached.len())
        };

        step("transform", surface.set_transform(transform))?;
        step("scaling mode", surface.set_scaling_mode(scaling))?;
        slot.surface = Some(surface.clone());

        tracing::info!(
            surface = surface.unique_id(),
            "Output surface swapped: {} in-flight buffers reclaimed, {} attached",
            drained,
            attached
        );
        Ok(())
    }

    fn input_presentation(&self) -> (TransformMode, ScalingMode) {
        match self.input.lock().surface.clone() {
            Some(input) => (input.transform(), input.scaling_mode()),
            None => Default::default(),
        }
    }

    /// Downstream released a buffer. Runs on the releasing thread, possibly
    /// inside `release_output_buffer`, so only the output lock is taken here;
    /// the worker does the reclaim.
    pub(super) fn on_producer_buffer_released(&self) {
        if self.output.lock().note_release() {
            self.wake();
        }
    }

    /// Pull one buffer back from the current surface per pending release
    pub(super) fn reclaim_released(&self) {
        let slot = self.swap.lock();
        while self.output.lock().take_release() {
            let (Some(surface), Some(template)) = (slot.surface.clone(), slot.template) else {
                self.output.lock().pending_releases = 0;
                return;
            };

            let (buffer, fence) = match surface.request_buffer(&template) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!("Failed to reclaim released output buffer: {}", e);
                    continue;
                }
            };

            let seq = buffer.seq();
            let mut output = self.output.lock();
            let Some(replaced) = output
                .in_flight_slot(seq)
                .and_then(|pos| output.in_flight.remove(pos))
            else {
                continue;
            };
            if let Some(old_seq) = replaced.seq().filter(|old| *old != seq) {
                output.attached.remove(&old_seq);
            }
            output.attached.insert(seq, Arc::clone(&buffer));
            output.available.push_back(BufferWrapper::new(buffer, fence, 0));
            tracing::debug!(seq, "Output buffer back from downstream");
        }
    }

    pub(super) fn release_output_buffer(&self, index: u32, render: bool) -> Result<()> {
        self.life
            .lock()
            .ensure("release_output_buffer", legal::RELEASE_OUTPUT)?;

        let slot = self.swap.lock();
        let wrapper = self
            .output
            .lock()
            .delivered
            .remove(&index)
            .ok_or_else(|| Error::InvalidParam(format!("Unknown output buffer {}", index)))?;

        let target = match (&wrapper.buffer, slot.surface.clone()) {
            (Some(buffer), Some(surface)) if render && !wrapper.is_eos() => {
                Some((Arc::clone(buffer), surface))
            }
            _ => None,
        };
        let Some((buffer, surface)) = target else {
            drop(slot);
            self.recycle(wrapper);
            return Ok(());
        };

        let flush = FlushConfig {
            damage: Damage::full(buffer.resolution()),
            timestamp: wrapper.timestamp,
        };
        let fence = wrapper.fence.clone();
        // Tracked before flushing: a consumer may release it before the flush returns
        self.output.lock().in_flight.push_back(wrapper);
        match surface.flush_buffer(&buffer, fence, &flush) {
            Ok(()) => {
                tracing::trace!(seq = index, "Output buffer rendered");
                self.count(|s| s.buffers_rendered += 1);
                Ok(())
            }
            Err(e) => {
                let wrapper = {
                    let mut output = self.output.lock();
                    let pos = output.in_flight.iter().position(|w| w.seq() == Some(index));
                    pos.and_then(|pos| output.in_flight.remove(pos))
                };
                drop(slot);
                tracing::warn!(seq = index, "Failed to render output buffer: {}", e);
                if let Some(wrapper) = wrapper {
                    self.recycle(wrapper);
                }
                Err(e.into())
            }
        }
    }

    /// Put an output buffer back into `available`
    pub(super) fn recycle(&self, mut wrapper: BufferWrapper) {
        wrapper.flag = BufferFlag::Normal;
        self.output.lock().available.push_back(wrapper);
        self.wake();
    }

    pub(super) fn teardown_output(&self) {
        let mut slot = self.swap.lock();
        slot.template = None;
        let Some(surface) = slot.surface.take() else {
            return;
        };
        if let Err(e) = surface.unregister_release_listener() {
            tracing::warn!("Failed to unregister release listener: {}", e);
        }
        if let Err(e) = surface.clean_cache() {
            tracing::warn!("Failed to clean output surface: {}", e);
        }
        tracing::debug!("Output surface torn down");
    }
}
