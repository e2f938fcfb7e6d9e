//! Owner of the single shared capture device.
//!
//! Every acquisition bumps a generation counter and hands out a
//! [`CameraLease`] tagged with it. Streams re-check their lease each frame, so
//! a release or a newer acquire is observed on the next iteration instead of
//! the stream reading from a device it no longer owns.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info};
use video_ingest::{CaptureError, CaptureOptions, FrameSource, open_source};

/// Device handle shared between the manager and the stream currently reading
/// from it. The inner lock is only held for a single read.
pub(crate) type SharedDevice = Arc<Mutex<Box<dyn FrameSource>>>;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera {uri:?} is unavailable")]
    DeviceUnavailable {
        uri: String,
        #[source]
        source: CaptureError,
    },
}

/// Opens capture devices. Split out so tests can script frame sources.
pub trait SourceFactory: Send + Sync {
    fn open(&self, uri: &str) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Production factory backed by `video_ingest::open_source`.
pub struct CaptureFactory {
    options: CaptureOptions,
}

impl CaptureFactory {
    pub fn new(options: CaptureOptions) -> Self {
        Self { options }
    }
}

impl SourceFactory for CaptureFactory {
    fn open(&self, uri: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        open_source(uri, &self.options)
    }
}

/// The camera-release side of the manager, as seen by the connection
/// coordinator.
pub trait CameraControl: Send + Sync {
    /// Release the live device, if any. Returns whether one was released.
    fn release(&self) -> bool;
}

/// Proof of a successful acquire. Only the most recent lease is current.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraLease {
    generation: u64,
}

impl CameraLease {
    pub fn generation(self) -> u64 {
        self.generation
    }
}

struct LiveCamera {
    generation: u64,
    uri: String,
    device: SharedDevice,
}

#[derive(Default)]
struct CameraState {
    live: Option<LiveCamera>,
    next_generation: u64,
}

pub struct CameraManager {
    factory: Arc<dyn SourceFactory>,
    state: Mutex<CameraState>,
}

impl CameraManager {
    pub fn new(factory: Arc<dyn SourceFactory>) -> Self {
        Self {
            factory,
            state: Mutex::new(CameraState::default()),
        }
    }

    /// Open `uri`, replacing any live device. Blocks while the device opens.
    pub fn acquire(&self, uri: &str) -> Result<CameraLease, CameraError> {
        if let Some(previous) = self.take_live() {
            debug!(
                uri = %previous.uri,
                generation = previous.generation,
                "replacing live camera"
            );
            metrics::counter!("pose_coach_camera_releases_total").increment(1);
        }

        // Open outside the lock: devices can take seconds to produce a frame.
        let source = self
            .factory
            .open(uri)
            .map_err(|source| CameraError::DeviceUnavailable {
                uri: uri.to_string(),
                source,
            })?;

        let (lease, replaced) = {
            let mut state = self.lock_state();
            state.next_generation += 1;
            let generation = state.next_generation;
            let replaced = state.live.replace(LiveCamera {
                generation,
                uri: uri.to_string(),
                device: Arc::new(Mutex::new(source)),
            });
            (CameraLease { generation }, replaced)
        };
        // A concurrent acquire may have installed a device while this one was
        // opening; the later install wins.
        if replaced.is_some() {
            metrics::counter!("pose_coach_camera_releases_total").increment(1);
        }
        drop(replaced);

        metrics::counter!("pose_coach_camera_acquisitions_total").increment(1);
        info!(uri, generation = lease.generation, "camera acquired");
        Ok(lease)
    }

    /// Release the live device regardless of who acquired it. Idempotent.
    pub fn release(&self) -> bool {
        match self.take_live() {
            Some(live) => {
                metrics::counter!("pose_coach_camera_releases_total").increment(1);
                info!(uri = %live.uri, generation = live.generation, "camera released");
                true
            }
            None => false,
        }
    }

    /// Release only if `lease` is still the current acquisition.
    pub fn release_lease(&self, lease: CameraLease) -> bool {
        let taken = {
            let mut state = self.lock_state();
            let current = state
                .live
                .as_ref()
                .is_some_and(|live| live.generation == lease.generation);
            if current { state.live.take() } else { None }
        };
        match taken {
            Some(live) => {
                metrics::counter!("pose_coach_camera_releases_total").increment(1);
                info!(uri = %live.uri, generation = live.generation, "camera released by stream");
                true
            }
            None => false,
        }
    }

    /// Device for `lease`, or `None` once it was released or replaced.
    pub(crate) fn device(&self, lease: CameraLease) -> Option<SharedDevice> {
        let state = self.lock_state();
        state
            .live
            .as_ref()
            .filter(|live| live.generation == lease.generation)
            .map(|live| Arc::clone(&live.device))
    }

    pub fn is_live(&self) -> bool {
        self.lock_state().live.is_some()
    }

    fn take_live(&self) -> Option<LiveCamera> {
        self.lock_state().live.take()
    }

    fn lock_state(&self) -> MutexGuard<'_, CameraState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CameraControl for CameraManager {
    fn release(&self) -> bool {
        CameraManager::release(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use video_ingest::{Frame, FrameFormat};

    use super::*;

    pub(crate) fn solid_frame(width: u32, height: u32, bgr: [u8; 3]) -> Frame {
        let data = bgr
            .iter()
            .copied()
            .cycle()
            .take(Frame::expected_len(width, height, FrameFormat::Bgr8))
            .collect();
        Frame {
            data,
            width,
            height,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        }
    }

    /// Plays back a fixed list of frames and tracks how many sources are open.
    pub(crate) struct ScriptedSource {
        uri: String,
        frames: VecDeque<Frame>,
        open: Arc<AtomicUsize>,
    }

    impl FrameSource for ScriptedSource {
        fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
            Ok(self.frames.pop_front())
        }

        fn uri(&self) -> &str {
            &self.uri
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub(crate) struct ScriptedFactory {
        pub(crate) frames: Vec<Frame>,
        pub(crate) fail: bool,
        pub(crate) open: Arc<AtomicUsize>,
        pub(crate) opened: AtomicUsize,
    }

    impl ScriptedFactory {
        pub(crate) fn with_frames(frames: Vec<Frame>) -> Self {
            Self {
                frames,
                ..Self::default()
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub(crate) fn open_sources(&self) -> usize {
            self.open.load(Ordering::SeqCst)
        }
    }

    impl SourceFactory for ScriptedFactory {
        fn open(&self, uri: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
            if self.fail {
                return Err(CaptureError::Open {
                    uri: uri.to_string(),
                });
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.open.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSource {
                uri: uri.to_string(),
                frames: self.frames.iter().cloned().collect(),
                open: Arc::clone(&self.open),
            }))
        }
    }

    fn manager(factory: ScriptedFactory) -> (CameraManager, Arc<ScriptedFactory>) {
        let factory = Arc::new(factory);
        (CameraManager::new(factory.clone()), factory)
    }

    #[test]
    fn release_is_idempotent() {
        let (cameras, factory) = manager(ScriptedFactory::default());
        assert!(!cameras.release());

        cameras.acquire("0").unwrap();
        assert!(cameras.is_live());
        assert!(cameras.release());
        assert!(!cameras.release());
        assert!(!cameras.is_live());
        assert_eq!(factory.open_sources(), 0);
    }

    #[test]
    fn acquire_replaces_without_leaking() {
        let (cameras, factory) = manager(ScriptedFactory::default());
        let first = cameras.acquire("0").unwrap();
        let second = cameras.acquire("0").unwrap();

        assert_ne!(first, second);
        assert!(second.generation() > first.generation());
        assert_eq!(factory.open_sources(), 1);
        assert!(cameras.device(first).is_none());
        assert!(cameras.device(second).is_some());
    }

    #[test]
    fn stale_lease_cannot_release_newer_camera() {
        let (cameras, _factory) = manager(ScriptedFactory::default());
        let stale = cameras.acquire("0").unwrap();
        let current = cameras.acquire("0").unwrap();

        assert!(!cameras.release_lease(stale));
        assert!(cameras.is_live());
        assert!(cameras.release_lease(current));
        assert!(!cameras.is_live());
    }

    #[test]
    fn device_stays_readable_while_a_read_holds_it() {
        let (cameras, factory) = manager(ScriptedFactory::with_frames(vec![solid_frame(
            2,
            2,
            [1, 2, 3],
        )]));
        let lease = cameras.acquire("0").unwrap();
        let device = cameras.device(lease).unwrap();

        cameras.release();
        assert!(cameras.device(lease).is_none());
        // The in-flight holder still owns the source until it lets go.
        assert_eq!(factory.open_sources(), 1);
        let frame = device.lock().unwrap().read_frame().unwrap();
        assert!(frame.is_some());
        drop(device);
        assert_eq!(factory.open_sources(), 0);
    }

    #[test]
    fn failed_open_is_device_unavailable() {
        let (cameras, _factory) = manager(ScriptedFactory::failing());
        let err = cameras.acquire("/dev/video9").unwrap_err();
        let CameraError::DeviceUnavailable { uri, .. } = err;
        assert_eq!(uri, "/dev/video9");
        assert!(!cameras.is_live());
    }
}
