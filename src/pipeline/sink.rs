//! Single-slot, latest-frame-wins hand-off between the capture thread and
//! the display.
//!
//! There is no queue: publishing replaces the held frame, readers always
//! get the most recent one. The slot is an atomic `Arc` swap, so neither
//! side can observe a torn frame or block the other beyond the pointer
//! exchange itself.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam::utils::CachePadded;

use crate::capture::frame::Frame;

pub struct FrameSink {
    slot: ArcSwap<Frame>,
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_published: AtomicUsize,
    frames_read: AtomicUsize,
}

impl FrameSink {
    /// A sink pre-seeded with a black placeholder, so `latest` is total
    /// even before the first publish.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            slot: ArcSwap::from_pointee(Frame::blank(width, height)),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: replace the held frame. Latest wins; the previous frame is
    /// released once its last reader drops it.
    pub fn publish(&self, frame: Frame) {
        self.slot.store(Arc::new(frame));
        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("iris_frames_published").increment(1);
    }

    /// Consumer: the most recently published frame, as an owned handle the
    /// reader can hold across the next publish.
    pub fn latest(&self) -> Arc<Frame> {
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        self.slot.load_full()
    }

    /// (published, read) counters.
    pub fn stats(&self) -> (usize, usize) {
        (
            self.stats.frames_published.load(Ordering::Relaxed),
            self.stats.frames_read.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::PixelFormat;
    use std::thread;

    fn solid_frame(value: u8) -> Frame {
        Frame::new(16, 12, PixelFormat::Mono8, vec![value; 16 * 12 * 3])
    }

    #[test]
    fn placeholder_before_first_publish() {
        let sink = FrameSink::new(16, 12);
        let frame = sink.latest();
        assert_eq!(frame.pixels.len(), 16 * 12 * 3);
        assert!(frame.pixels.iter().all(|b| *b == 0));
    }

    #[test]
    fn publish_replaces_previous_frame() {
        let sink = FrameSink::new(16, 12);
        sink.publish(solid_frame(1));
        sink.publish(solid_frame(2));
        assert!(sink.latest().pixels.iter().all(|b| *b == 2));
        assert_eq!(sink.stats().0, 2);
    }

    #[test]
    fn racing_readers_never_observe_a_torn_frame() {
        let sink = Arc::new(FrameSink::new(16, 12));
        let mut workers = Vec::new();

        for writer in 0..4u8 {
            let sink = Arc::clone(&sink);
            workers.push(thread::spawn(move || {
                for i in 0..250 {
                    sink.publish(solid_frame(writer.wrapping_mul(50).wrapping_add(i as u8)));
                }
            }));
        }
        for _ in 0..4 {
            let sink = Arc::clone(&sink);
            workers.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let frame = sink.latest();
                    let first = frame.pixels[0];
                    // Every published frame is a solid fill: any mixed
                    // content would mean a reader saw a partial write.
                    assert!(frame.pixels.iter().all(|b| *b == first));
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
    }
}
