// Frame capture: sources and the pump feeding frames to the session

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{OverlayError, Result};
use crate::models::Frame;

/// A device or file set delivering frames on demand
pub trait FrameSource: Send + 'static {
    /// Human-readable name for logs
    fn name(&self) -> String;

    /// Acquires the device. Fails with `CameraUnavailable` when it cannot.
    fn open(&mut self) -> Result<()>;

    /// Returns the next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Releases the device
    fn close(&mut self);
}

/// Replays still images from a directory in file-name order
pub struct ImageSequenceSource {
    dir: PathBuf,
    paths: Vec<PathBuf>,
    position: usize,
    size: Option<(u32, u32)>,
}

impl ImageSequenceSource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            paths: Vec::new(),
            position: 0,
            size: None,
        }
    }

    /// Resizes every frame to `width` x `height`
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = Some((width, height));
        self
    }
}

impl FrameSource for ImageSequenceSource {
    fn name(&self) -> String {
        format!("image sequence {}", self.dir.display())
    }

    fn open(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            OverlayError::CameraUnavailable(format!(
                "Failed to read directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let image_extensions = ["png", "jpg", "jpeg"];
        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| image_extensions.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(OverlayError::CameraUnavailable(format!(
                "No images in {}",
                self.dir.display()
            )));
        }

        self.paths = paths;
        self.position = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.paths.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;

        let mut image = image::open(path)
            .map_err(|e| {
                OverlayError::FrameProcessing(format!("Failed to decode {}: {e}", path.display()))
            })?
            .to_rgb8();
        if let Some((width, height)) = self.size {
            if image.dimensions() != (width, height) {
                image = image::imageops::resize(
                    &image,
                    width,
                    height,
                    image::imageops::FilterType::Triangle,
                );
            }
        }
        Ok(Some(Frame::from_rgb_image(image)))
    }

    fn close(&mut self) {
        self.paths.clear();
        self.position = 0;
    }
}

/// A running capture: a task pulling frames from a source at a fixed rate
/// and pushing them into a bounded channel.
pub struct CaptureHandle {
    stop_sender: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Opens the source and starts the pump on the current tokio runtime.
    /// The source is left untouched when there is no runtime.
    pub fn start(
        mut source: Box<dyn FrameSource>,
        frame_interval: Duration,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<Frame>)> {
        let runtime = Handle::try_current()
            .map_err(|e| OverlayError::CameraUnavailable(format!("no tokio runtime: {e}")))?;
        source.open().map_err(|e| {
            error!("Failed to open {}: {}", source.name(), e);
            match e {
                OverlayError::CameraUnavailable(_) => e,
                other => OverlayError::CameraUnavailable(other.to_string()),
            }
        })?;
        info!("Capture started from {}", source.name());

        let (frame_sender, frame_receiver) = mpsc::channel(capacity.max(1));
        let (stop_sender, stop_receiver) = oneshot::channel();
        let task = runtime.spawn(pump(source, frame_sender, stop_receiver, frame_interval));

        Ok((
            Self {
                stop_sender: Some(stop_sender),
                task: Some(task),
            },
            frame_receiver,
        ))
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the pump and waits for it to release the source. Safe to call
    /// any number of times.
    pub async fn stop(&mut self) {
        if let Some(stop_sender) = self.stop_sender.take() {
            let _ = stop_sender.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Capture task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        // Dropping the sender wakes the pump, which closes the source itself.
        self.stop_sender.take();
    }
}

async fn pump(
    mut source: Box<dyn FrameSource>,
    frame_sender: mpsc::Sender<Frame>,
    mut stop_receiver: oneshot::Receiver<()>,
    frame_interval: Duration,
) {
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut stop_receiver => break,
            _ = ticker.tick() => {
                match source.next_frame() {
                    Ok(Some(frame)) => match frame_sender.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => debug!("Frame dropped, consumer busy"),
                        Err(TrySendError::Closed(_)) => break,
                    },
                    Ok(None) => {
                        info!("{} exhausted", source.name());
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to capture frame: {}", e);
                        continue;
                    }
                }
            }
        }
    }

    source.close();
    info!("Capture stopped for {}", source.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSource {
        frames: usize,
        closes: Arc<AtomicUsize>,
    }

    impl FrameSource for CountingSource {
        fn name(&self) -> String {
            "counting".to_string()
        }

        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.frames == 0 {
                return Ok(None);
            }
            self.frames -= 1;
            Ok(Some(Frame::new(vec![0; 3], 1, 1)))
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct DeniedSource;

    impl FrameSource for DeniedSource {
        fn name(&self) -> String {
            "denied".to_string()
        }

        fn open(&mut self) -> Result<()> {
            Err(OverlayError::FrameProcessing("permission denied".to_string()))
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            Ok(None)
        }

        fn close(&mut self) {}
    }

    #[tokio::test]
    async fn delivers_frames_then_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            frames: 3,
            closes: closes.clone(),
        };
        let (mut handle, mut frames) =
            CaptureHandle::start(Box::new(source), Duration::from_millis(1), 8).unwrap();

        let mut received = 0;
        while frames.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 3);

        handle.stop().await;
        handle.stop().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn stop_interrupts_endless_source() {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            frames: usize::MAX,
            closes: closes.clone(),
        };
        let (mut handle, mut frames) =
            CaptureHandle::start(Box::new(source), Duration::from_millis(1), 1).unwrap();

        assert!(frames.recv().await.is_some());
        handle.stop().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_failure_is_camera_unavailable() {
        let result = CaptureHandle::start(Box::new(DeniedSource), Duration::from_millis(1), 1);
        assert!(matches!(result, Err(OverlayError::CameraUnavailable(_))));
    }

    #[test]
    fn start_without_runtime_is_camera_unavailable() {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            frames: 1,
            closes: closes.clone(),
        };
        let result = CaptureHandle::start(Box::new(source), Duration::from_millis(1), 1);
        assert!(matches!(result, Err(OverlayError::CameraUnavailable(_))));
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn image_sequence_reads_sorted_files() {
        let dir = std::env::temp_dir().join("emotion_overlay_sequence_test");
        std::fs::create_dir_all(&dir).unwrap();
        image::RgbImage::from_pixel(4, 2, image::Rgb([10, 20, 30]))
            .save(dir.join("b.png"))
            .unwrap();
        image::RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3]))
            .save(dir.join("a.png"))
            .unwrap();
        std::fs::write(dir.join("notes.txt"), "skip me").unwrap();

        let mut source = ImageSequenceSource::new(&dir).with_size(4, 2);
        source.open().unwrap();

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!((first.width, first.height), (4, 2));
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(&second.data[..3], &[10, 20, 30]);
        assert!(source.next_frame().unwrap().is_none());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_directory_is_camera_unavailable() {
        let mut source = ImageSequenceSource::new("/nonexistent/emotion-overlay-frames");
        assert!(matches!(source.open(), Err(OverlayError::CameraUnavailable(_))));
    }
}
