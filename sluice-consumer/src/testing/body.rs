use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering},
    },
};

use crate::message::{BodyEncoder, LargeBody};

/// A large message body held in memory.
#[derive(Debug)]
pub struct MemoryLargeBody {
    data: Arc<[u8]>,
    reported_size: u64,
    delay_deletion: AtomicI32,
    releases: AtomicUsize,
    encoder_closed: Arc<AtomicBool>,
}

impl MemoryLargeBody {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        let reported_size = data.len() as u64;
        Self::truncated(data, reported_size)
    }

    /// A body that claims `reported_size` bytes but holds only `data`.
    #[must_use]
    pub fn truncated(data: Vec<u8>, reported_size: u64) -> Self {
        Self {
            data: data.into(),
            reported_size,
            delay_deletion: AtomicI32::new(0),
            releases: AtomicUsize::new(0),
            encoder_closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Outstanding deletion-delay holds.
    #[must_use]
    pub fn delay_deletion_count(&self) -> i32 {
        self.delay_deletion.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.release_count() > 0
    }

    #[must_use]
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Whether the most recently created encoder was closed.
    #[must_use]
    pub fn encoder_closed(&self) -> bool {
        self.encoder_closed.load(Ordering::SeqCst)
    }
}

impl LargeBody for MemoryLargeBody {
    fn body_encoder(&self) -> Box<dyn BodyEncoder> {
        self.encoder_closed.store(false, Ordering::SeqCst);
        Box::new(MemoryEncoder {
            data: self.data.clone(),
            reported_size: self.reported_size,
            position: 0,
            open: false,
            closed: self.encoder_closed.clone(),
        })
    }

    fn increment_delay_deletion_count(&self) {
        self.delay_deletion.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_delay_deletion_count(&self) {
        self.delay_deletion.fetch_sub(1, Ordering::SeqCst);
    }

    fn release_resources(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

struct MemoryEncoder {
    data: Arc<[u8]>,
    reported_size: u64,
    position: usize,
    open: bool,
    closed: Arc<AtomicBool>,
}

impl BodyEncoder for MemoryEncoder {
    fn open(&mut self) -> io::Result<()> {
        self.open = true;
        Ok(())
    }

    fn large_body_size(&self) -> u64 {
        self.reported_size
    }

    fn encode(&mut self, out: &mut Vec<u8>, size: usize) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::other("encoder is not open"));
        }

        let end = self.data.len().min(self.position + size);
        out.extend_from_slice(&self.data[self.position..end]);
        let read = end - self.position;
        self.position = end;

        Ok(read)
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
