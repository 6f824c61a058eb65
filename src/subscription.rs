//! Consumer handle over all images matching a `(channel, streamId)`

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, RwLock, Weak,
};

use crate::{
    concurrent::{
        bits::Index,
        logbuffer::{ControlledPollAction, Header},
    },
    conductor::ClientLink,
    error::Result,
    image::Image,
};

/// Consumer of matching streams, distributing the poll budget across its
/// images round-robin.
///
/// The image list is copy-on-write: the conductor publishes a new
/// snapshot on every add/remove, pollers take the current snapshot per
/// call and never hold a lock across a handler.
#[derive(Debug)]
pub struct Subscription {
    link: Weak<ClientLink>,
    channel: String,
    registration_id: i64,
    stream_id: i32,
    channel_status_id: i32,
    images: RwLock<Arc<Vec<Arc<Image>>>>,
    round_robin_index: AtomicUsize,
    is_closed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        link: Weak<ClientLink>,
        registration_id: i64,
        channel: String,
        stream_id: i32,
        channel_status_id: i32,
    ) -> Self {
        Self {
            link,
            channel,
            registration_id,
            stream_id,
            channel_status_id,
            images: RwLock::new(Arc::new(Vec::new())),
            round_robin_index: AtomicUsize::new(0),
            is_closed: AtomicBool::new(false),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    /// Counter id for the channel's status indicator, driver-assigned
    pub fn channel_status_id(&self) -> i32 {
        self.channel_status_id
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        !self.images_snapshot().is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.images_snapshot().len()
    }

    /// Current immutable snapshot of the image list
    pub fn images(&self) -> Arc<Vec<Arc<Image>>> {
        self.images_snapshot()
    }

    pub fn image_by_session_id(&self, session_id: i32) -> Option<Arc<Image>> {
        self.images_snapshot()
            .iter()
            .find(|image| image.session_id() == session_id)
            .cloned()
    }

    /// Poll the images for up to `fragment_limit` fragments in total,
    /// rotating the starting image for fairness.
    pub fn poll<F>(&self, handler: &mut F, fragment_limit: i32) -> i32
    where
        F: FnMut(&[u8], &Header) -> Result<()>,
    {
        let images = self.images_snapshot();
        let length = images.len();
        let mut fragments_read = 0;

        if length > 0 {
            let starting_index = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % length;
            let mut i = starting_index;

            loop {
                let read = images[i].poll(handler, fragment_limit - fragments_read);
                if read > 0 {
                    fragments_read += read;
                }

                i = (i + 1) % length;
                if fragments_read >= fragment_limit || i == starting_index {
                    break;
                }
            }
        }

        fragments_read
    }

    /// Controlled-flow poll across images
    pub fn controlled_poll<F>(&self, handler: &mut F, fragment_limit: i32) -> i32
    where
        F: FnMut(&[u8], &Header) -> Result<ControlledPollAction>,
    {
        let images = self.images_snapshot();
        let length = images.len();
        let mut fragments_read = 0;

        if length > 0 {
            let starting_index = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % length;
            let mut i = starting_index;

            loop {
                let read = images[i].controlled_poll(handler, fragment_limit - fragments_read);
                if read > 0 {
                    fragments_read += read;
                }

                i = (i + 1) % length;
                if fragments_read >= fragment_limit || i == starting_index {
                    break;
                }
            }
        }

        fragments_read
    }

    /// Block-poll every image once, returning total bytes consumed
    pub fn block_poll<F>(&self, handler: &mut F, block_length_limit: Index) -> i64
    where
        F: FnMut(&[u8], i32, i32) -> Result<()>,
    {
        let images = self.images_snapshot();
        let mut bytes_consumed: i64 = 0;

        for image in images.iter() {
            let read = image.block_poll(handler, block_length_limit);
            if read > 0 {
                bytes_consumed += read as i64;
            }
        }

        bytes_consumed
    }

    /// Close the subscription. Idempotent; the conductor removes the
    /// images and lingers their log buffers on its next pass.
    pub fn close(&self) {
        if !self.is_closed.swap(true, Ordering::AcqRel) {
            if let Some(link) = self.link.upgrade() {
                link.release_subscription(self.registration_id);
            }
        }
    }

    fn images_snapshot(&self) -> Arc<Vec<Arc<Image>>> {
        Arc::clone(&self.images.read().expect("images lock poisoned"))
    }

    pub(crate) fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
    }

    /// Conductor-side: publish a snapshot with the image appended
    pub(crate) fn add_image(&self, image: Arc<Image>) {
        let mut guard = self.images.write().expect("images lock poisoned");
        let mut next = guard.as_ref().clone();
        next.push(image);
        *guard = Arc::new(next);
    }

    /// Conductor-side: publish a snapshot without the image, returning it
    pub(crate) fn remove_image(&self, correlation_id: i64) -> Option<Arc<Image>> {
        let mut guard = self.images.write().expect("images lock poisoned");
        let position = guard
            .iter()
            .position(|image| image.correlation_id() == correlation_id)?;

        let mut next = guard.as_ref().clone();
        let removed = next.remove(position);
        *guard = Arc::new(next);
        Some(removed)
    }

    pub(crate) fn has_image(&self, correlation_id: i64) -> bool {
        self.images_snapshot()
            .iter()
            .any(|image| image.correlation_id() == correlation_id)
    }

    /// Conductor-side: close the subscription and take every image for
    /// lingering release
    pub(crate) fn close_and_take_images(&self) -> Vec<Arc<Image>> {
        self.mark_closed();
        let mut guard = self.images.write().expect("images lock poisoned");
        let images = guard.as_ref().clone();
        *guard = Arc::new(Vec::new());
        images
    }
}
