//! Downstream consumer that drains a surface on its own thread

use super::{ConsumerListener, Surface};
use crate::error::Result;

use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

struct SinkListener {
    sender: Sender<()>,
}

impl ConsumerListener for SinkListener {
    fn on_buffer_available(&self) {
        let _ = self.sender.try_send(());
    }
}

/// Acquires every buffer flushed into a consumer surface and releases it
/// right away, like a display that presents instantly.
///
/// Acquire and release happen on the sink's thread, never on the thread
/// that flushed the buffer.
pub struct DrainingSink {
    surface: Arc<dyn Surface>,
    consumed: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl DrainingSink {
    /// Register on `consumer` and start draining it
    pub fn spawn(consumer: Arc<dyn Surface>) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        consumer.register_consumer_listener(Arc::new(SinkListener { sender }))?;

        let consumed = Arc::new(AtomicU64::new(0));
        let surface = Arc::clone(&consumer);
        let counter = Arc::clone(&consumed);
        let handle = std::thread::Builder::new()
            .name(format!("{}-sink", consumer.name()))
            .spawn(move || drain(surface, receiver, counter))?;

        Ok(Self {
            surface: consumer,
            consumed,
            handle: Some(handle),
        })
    }

    /// Buffers presented so far
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Acquire)
    }
}

fn drain(surface: Arc<dyn Surface>, wakeups: Receiver<()>, consumed: Arc<AtomicU64>) {
    // Ends once the listener (the only sender) is unregistered
    while wakeups.recv().is_ok() {
        while let Ok(acquired) = surface.acquire_buffer() {
            if let Err(e) = surface.release_buffer(&acquired.buffer, acquired.fence) {
                tracing::warn!(surface = surface.name(), "Sink release failed: {}", e);
            }
            consumed.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Drop for DrainingSink {
    fn drop(&mut self) {
        if let Err(e) = self.surface.unregister_consumer_listener() {
            tracing::warn!("Failed to unregister sink listener: {}", e);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferRequestConfig, Fence, FlushConfig};
    use crate::surface::BufferQueue;
    use crate::types::{BufferUsage, PixelFormat};
    use std::time::{Duration, Instant};

    #[test]
    fn test_sink_drains_flushed_buffers() {
        let queue = BufferQueue::new("sink-test");
        let producer = queue.producer();
        let sink = DrainingSink::spawn(queue.consumer()).unwrap();

        let request = BufferRequestConfig {
            width: 4,
            height: 4,
            stride_alignment: 4,
            format: PixelFormat::Rgba8888,
            usage: BufferUsage::CPU_WRITE,
            timeout: Duration::from_secs(1),
        };
        for _ in 0..5 {
            let (buffer, _) = producer.request_buffer(&request).unwrap();
            producer
                .flush_buffer(&buffer, Fence::signaled(), &FlushConfig::default())
                .unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.consumed() < 5 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sink.consumed(), 5);
        drop(sink);
        assert_eq!(queue.queued_buffers(), 0);
    }
}
