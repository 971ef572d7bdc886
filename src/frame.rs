// Frame synchronization
//
// `FrameLoop` drives acquire -> update -> submit -> present over a ring of
// in-flight slots and decides when the swapchain epoch has to be rebuilt.
// The GPU side is behind `FrameTarget`, so the ordering rules here are
// testable without a device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::RenderResult;

/// Result of asking the presentation engine for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image_index: u32, suboptimal: bool },
    /// The surface changed; nothing was acquired
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt,
    /// The window has no area yet; try again on a later frame
    Deferred,
}

/// What happened to one `render_frame` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { image_index: u32 },
    /// Acquisition found the swapchain out of date; it was rebuilt and
    /// nothing was submitted
    Skipped,
    /// A rebuild is pending on a zero-size window
    Deferred,
}

/// Resize flag shared with the windowing side
#[derive(Debug, Clone, Default)]
pub struct ResizeSignal(Arc<AtomicBool>);

impl ResizeSignal {
    pub fn notify(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Read and clear
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// GPU operations the frame loop sequences.
///
/// `slot` is an in-flight slot index in `0..frames_in_flight`; `image_index`
/// is a presentable image index from the current epoch.
pub trait FrameTarget {
    /// Block until the last submission made from `slot` has completed
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()>;

    /// Acquire the next image, signalling `slot`'s acquire semaphore
    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome>;

    /// Write per-image mutable data (uniforms) for `image_index`
    fn update_image_resources(&mut self, image_index: u32) -> RenderResult<()>;

    /// Reset `slot`'s fence and submit the command buffer for `image_index`
    fn submit(&mut self, slot: usize, image_index: u32) -> RenderResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome>;

    /// Tear down and rebuild the swapchain epoch
    fn rebuild(&mut self) -> RenderResult<RebuildOutcome>;
}

pub struct FrameLoop {
    frames_in_flight: usize,
    frame_counter: u64,
    rebuild_pending: bool,
    resize: ResizeSignal,
    /// Slot that last submitted work for each image index
    image_owners: Vec<Option<usize>>,
    rebuilds: u64,
}

impl FrameLoop {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            frame_counter: 0,
            rebuild_pending: false,
            resize: ResizeSignal::default(),
            image_owners: Vec::new(),
            rebuilds: 0,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.frames_in_flight as u64) as usize
    }

    /// Frames submitted and presented so far
    pub fn frame_count(&self) -> u64 {
        self.frame_counter
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn is_rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    pub fn resize_signal(&self) -> ResizeSignal {
        self.resize.clone()
    }

    /// Rebuild before the next frame does anything else
    pub fn request_rebuild(&mut self) {
        self.rebuild_pending = true;
    }

    /// Run one frame against `target`
    pub fn render_frame<T: FrameTarget>(&mut self, target: &mut T) -> RenderResult<FrameStatus> {
        if self.rebuild_pending && self.rebuild(target, "pending")? == RebuildOutcome::Deferred {
            return Ok(FrameStatus::Deferred);
        }

        let slot = self.current_slot();
        target.wait_for_slot(slot)?;

        let (image_index, acquired_suboptimal) = match target.acquire_image(slot)? {
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                // Abandon the frame: nothing submitted, counter untouched
                return Ok(match self.rebuild(target, "acquire out of date")? {
                    RebuildOutcome::Rebuilt => FrameStatus::Skipped,
                    RebuildOutcome::Deferred => FrameStatus::Deferred,
                });
            }
        };

        // Another slot may still be reading this image's resources
        let owner = self.claim_image(image_index, slot);
        if let Some(previous) = owner.filter(|&previous| previous != slot) {
            target.wait_for_slot(previous)?;
        }

        target.update_image_resources(image_index)?;
        target.submit(slot, image_index)?;
        let presented = target.present(slot, image_index)?;

        self.frame_counter += 1;
        log::trace!("Frame {} presented image {} from slot {}", self.frame_counter, image_index, slot);

        let resized = self.resize.take();
        let reason = match presented {
            PresentOutcome::OutOfDate => Some("present out of date"),
            PresentOutcome::Suboptimal => Some("present suboptimal"),
            PresentOutcome::Presented if acquired_suboptimal => Some("acquire suboptimal"),
            PresentOutcome::Presented if resized => Some("window resized"),
            PresentOutcome::Presented => None,
        };
        if let Some(reason) = reason {
            // A deferred rebuild is retried at the start of the next frame
            self.rebuild(target, reason)?;
        }

        Ok(FrameStatus::Presented { image_index })
    }

    /// Record `slot` as the new user of `image_index`, returning the previous one
    fn claim_image(&mut self, image_index: u32, slot: usize) -> Option<usize> {
        let index = image_index as usize;
        if index >= self.image_owners.len() {
            self.image_owners.resize(index + 1, None);
        }
        self.image_owners[index].replace(slot)
    }

    fn rebuild<T: FrameTarget>(&mut self, target: &mut T, reason: &str) -> RenderResult<RebuildOutcome> {
        // Any resize seen so far is covered by this rebuild
        self.resize.take();

        let outcome = target.rebuild()?;
        match outcome {
            RebuildOutcome::Rebuilt => {
                self.rebuild_pending = false;
                // New epoch, new images: nobody owns them yet
                self.image_owners.clear();
                self.rebuilds += 1;
                log::info!("Swapchain rebuilt ({}), rebuild #{}", reason, self.rebuilds);
            }
            RebuildOutcome::Deferred => {
                if !self.rebuild_pending {
                    log::debug!("Swapchain rebuild deferred ({}): window has no area", reason);
                }
                self.rebuild_pending = true;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Wait(usize),
        Acquire(usize),
        Update(u32),
        Submit(usize, u32),
        Present(usize, u32),
        Rebuild,
    }

    /// In-memory GPU model.
    ///
    /// Fences only signal when waited on (or when a rebuild idles the
    /// device), which is the most pessimistic schedule a real GPU can produce.
    struct ScriptedTarget {
        image_count: u32,
        next_image: u32,
        fence_signaled: Vec<bool>,
        /// Image each slot's outstanding submission reads
        slot_image: Vec<Option<u32>>,
        acquires: VecDeque<AcquireOutcome>,
        presents: VecDeque<PresentOutcome>,
        rebuilds: VecDeque<RebuildOutcome>,
        events: Vec<Event>,
    }

    impl ScriptedTarget {
        fn new(frames_in_flight: usize, image_count: u32) -> Self {
            Self {
                image_count,
                next_image: 0,
                fence_signaled: vec![true; frames_in_flight],
                slot_image: vec![None; frames_in_flight],
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                rebuilds: VecDeque::new(),
                events: Vec::new(),
            }
        }

        fn with_acquires(mut self, images: &[u32]) -> Self {
            self.acquires.extend(images.iter().map(|&image_index| AcquireOutcome::Ready {
                image_index,
                suboptimal: false,
            }));
            self
        }

        fn count(&self, wanted: impl Fn(&Event) -> bool) -> usize {
            self.events.iter().filter(|e| wanted(e)).count()
        }

        fn position(&self, event: Event) -> Option<usize> {
            self.events.iter().position(|&e| e == event)
        }
    }

    impl FrameTarget for ScriptedTarget {
        fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
            self.events.push(Event::Wait(slot));
            self.fence_signaled[slot] = true;
            self.slot_image[slot] = None;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
            self.events.push(Event::Acquire(slot));
            Ok(self.acquires.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count;
                AcquireOutcome::Ready {
                    image_index,
                    suboptimal: false,
                }
            }))
        }

        fn update_image_resources(&mut self, image_index: u32) -> RenderResult<()> {
            self.events.push(Event::Update(image_index));
            for (slot, image) in self.slot_image.iter().enumerate() {
                assert!(
                    *image != Some(image_index) || self.fence_signaled[slot],
                    "uniforms for image {image_index} written while slot {slot} may still read them"
                );
            }
            Ok(())
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> RenderResult<()> {
            self.events.push(Event::Submit(slot, image_index));
            assert!(self.fence_signaled[slot], "slot {slot} resubmitted before its fence signaled");
            self.fence_signaled[slot] = false;
            self.slot_image[slot] = Some(image_index);
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome> {
            self.events.push(Event::Present(slot, image_index));
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn rebuild(&mut self) -> RenderResult<RebuildOutcome> {
            self.events.push(Event::Rebuild);
            let outcome = self.rebuilds.pop_front().unwrap_or(RebuildOutcome::Rebuilt);
            if outcome == RebuildOutcome::Rebuilt {
                // Rebuilds idle the device first
                self.fence_signaled.iter_mut().for_each(|f| *f = true);
                self.slot_image.iter_mut().for_each(|i| *i = None);
                self.next_image = 0;
            }
            Ok(outcome)
        }
    }

    #[test]
    fn slots_cycle_and_fences_gate_resubmission() {
        let mut frames = FrameLoop::new(2);
        let mut target = ScriptedTarget::new(2, 3);

        for expected_image in (0..3).cycle().take(12) {
            let status = frames.render_frame(&mut target).unwrap();
            assert_eq!(
                status,
                FrameStatus::Presented {
                    image_index: expected_image
                }
            );
        }

        let submits: Vec<usize> = target
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Submit(slot, _) => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(submits, [0, 1].repeat(6));
        assert_eq!(frames.frame_count(), 12);
        assert_eq!(frames.rebuild_count(), 0);
    }

    #[test]
    fn single_slot_loop_never_overlaps() {
        let mut frames = FrameLoop::new(1);
        let mut target = ScriptedTarget::new(1, 2);

        for _ in 0..5 {
            frames.render_frame(&mut target).unwrap();
        }
        assert_eq!(target.count(|e| matches!(e, Event::Submit(0, _))), 5);
    }

    #[test]
    fn image_reused_by_another_slot_waits_for_its_owner() {
        let mut frames = FrameLoop::new(2);
        // Slot 1 gets image 0 while slot 0's submission for it is outstanding
        let mut target = ScriptedTarget::new(2, 3).with_acquires(&[0, 0, 1, 1, 2, 0]);

        for _ in 0..6 {
            frames.render_frame(&mut target).unwrap();
        }

        let second_frame = &target.events[target.position(Event::Submit(0, 0)).unwrap() + 2..];
        assert_eq!(
            &second_frame[..4],
            &[Event::Wait(1), Event::Acquire(1), Event::Wait(0), Event::Update(0)]
        );
    }

    #[test]
    fn image_owned_by_the_current_slot_needs_no_extra_wait() {
        let mut frames = FrameLoop::new(2);
        let mut target = ScriptedTarget::new(2, 2).with_acquires(&[0, 1, 0, 1]);

        for _ in 0..4 {
            frames.render_frame(&mut target).unwrap();
        }
        // One wait per frame, nothing more
        assert_eq!(target.count(|e| matches!(e, Event::Wait(_))), 4);
    }

    #[test]
    fn two_out_of_date_acquires_rebuild_twice_then_resume() {
        let mut frames = FrameLoop::new(2);
        let mut target = ScriptedTarget::new(2, 3);
        target.acquires.extend([AcquireOutcome::OutOfDate, AcquireOutcome::OutOfDate]);

        assert_eq!(frames.render_frame(&mut target).unwrap(), FrameStatus::Skipped);
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.render_frame(&mut target).unwrap(), FrameStatus::Skipped);
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.rebuild_count(), 2);
        assert_eq!(frames.frame_count(), 0);
        assert_eq!(target.count(|e| matches!(e, Event::Submit(..))), 0);

        for _ in 0..4 {
            assert!(matches!(
                frames.render_frame(&mut target).unwrap(),
                FrameStatus::Presented { .. }
            ));
        }
        assert_eq!(frames.frame_count(), 4);
        assert_eq!(frames.rebuild_count(), 2);
    }

    #[test]
    fn suboptimal_acquire_still_presents_before_rebuilding() {
        let mut frames = FrameLoop::new(2);
        let mut target = ScriptedTarget::new(2, 3);
        target.acquires.push_back(AcquireOutcome::Ready {
            image_index: 1,
            suboptimal: true,
        });

        let status = frames.render_frame(&mut target).unwrap();

        assert_eq!(status, FrameStatus::Presented { image_index: 1 });
        assert_eq!(frames.rebuild_count(), 1);
        assert!(target.position(Event::Present(0, 1)) < target.position(Event::Rebuild));
        assert_eq!(frames.current_slot(), 1);
    }

    #[test]
    fn present_out_of_date_or_suboptimal_rebuilds_after_presenting() {
        for outcome in [PresentOutcome::OutOfDate, PresentOutcome::Suboptimal] {
            let mut frames = FrameLoop::new(2);
            let mut target = ScriptedTarget::new(2, 3);
            target.presents.push_back(outcome);

            let status = frames.render_frame(&mut target).unwrap();

            assert_eq!(status, FrameStatus::Presented { image_index: 0 });
            assert_eq!(
                &target.events[target.events.len() - 2..],
                &[Event::Present(0, 0), Event::Rebuild]
            );
            assert_eq!(frames.rebuild_count(), 1);
        }
    }

    #[test]
    fn resize_notification_rebuilds_after_the_next_present() {
        let mut frames = FrameLoop::new(2);
        let mut target = ScriptedTarget::new(2, 3);
        let signal = frames.resize_signal();

        frames.render_frame(&mut target).unwrap();
        assert_eq!(frames.rebuild_count(), 0);

        signal.notify();
        assert!(signal.is_set());
        frames.render_frame(&mut target).unwrap();

        assert_eq!(frames.rebuild_count(), 1);
        assert!(!signal.is_set());
        assert_eq!(target.events.last(), Some(&Event::Rebuild));

        frames.render_frame(&mut target).unwrap();
        assert_eq!(frames.rebuild_count(), 1);
    }

    #[test]
    fn zero_size_window_defers_until_it_has_area() {
        let mut frames = FrameLoop::new(2);
        let mut target = ScriptedTarget::new(2, 3);
        target.acquires.push_back(AcquireOutcome::OutOfDate);
        target.rebuilds.extend([RebuildOutcome::Deferred, RebuildOutcome::Deferred]);

        assert_eq!(frames.render_frame(&mut target).unwrap(), FrameStatus::Deferred);
        assert!(frames.is_rebuild_pending());

        let before = target.events.len();
        assert_eq!(frames.render_frame(&mut target).unwrap(), FrameStatus::Deferred);
        // Only the rebuild attempt; no acquire while deferred
        assert_eq!(&target.events[before..], &[Event::Rebuild]);

        assert_eq!(
            frames.render_frame(&mut target).unwrap(),
            FrameStatus::Presented { image_index: 0 }
        );
        assert!(!frames.is_rebuild_pending());
        assert_eq!(frames.rebuild_count(), 1);
    }

    #[test]
    fn deferred_rebuild_after_present_is_retried_next_frame() {
        let mut frames = FrameLoop::new(2);
        let mut target = ScriptedTarget::new(2, 3);
        target.presents.push_back(PresentOutcome::OutOfDate);
        target.rebuilds.push_back(RebuildOutcome::Deferred);

        assert_eq!(
            frames.render_frame(&mut target).unwrap(),
            FrameStatus::Presented { image_index: 0 }
        );
        assert!(frames.is_rebuild_pending());

        let before = target.events.len();
        frames.render_frame(&mut target).unwrap();
        assert_eq!(target.events[before], Event::Rebuild);
        assert_eq!(frames.rebuild_count(), 1);
    }

    #[test]
    fn requested_rebuild_runs_before_the_first_frame() {
        let mut frames = FrameLoop::new(2);
        let mut target = ScriptedTarget::new(2, 3);
        frames.request_rebuild();

        frames.render_frame(&mut target).unwrap();
        assert_eq!(target.events[0], Event::Rebuild);
        assert_eq!(target.events[1], Event::Wait(0));
    }

    #[test]
    fn zero_frames_in_flight_is_treated_as_one() {
        let frames = FrameLoop::new(0);
        assert_eq!(frames.frames_in_flight(), 1);
        assert_eq!(frames.current_slot(), 0);
    }
}
