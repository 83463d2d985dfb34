use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use image::RgbImage;
use log::{debug, info};
use walkdir::WalkDir;

use crate::error::CameraError;

pub const FRAME_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// A single captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// A live source of frames, owned by the video surface once bound.
pub trait FrameStream: Send {
    /// Next frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Stops capture. Further calls to `next_frame` return `None`.
    fn release(&mut self);
}

pub trait CameraProvider: Send {
    fn request_stream(&mut self) -> Result<Box<dyn FrameStream>, CameraError>;
}

/// Camera backed by a directory of still images, read in name order.
///
/// With `repeat` set the images cycle forever, which is how a recorded
/// session is played back as a live feed.
pub struct DirectoryCamera {
    dir: PathBuf,
    repeat: bool,
}

impl DirectoryCamera {
    pub fn new(dir: impl Into<PathBuf>, repeat: bool) -> Self {
        Self {
            dir: dir.into(),
            repeat,
        }
    }
}

impl CameraProvider for DirectoryCamera {
    fn request_stream(&mut self) -> Result<Box<dyn FrameStream>, CameraError> {
        match std::fs::read_dir(&self.dir) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                return Err(CameraError::PermissionDenied(self.dir.clone()));
            }
            Err(_) => return Err(CameraError::NotFound(self.dir.clone())),
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(&self.dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && is_frame_file(e.path()))
            .map(|e| e.path().to_owned())
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(CameraError::NoFrames(self.dir.clone()));
        }

        info!("Camera stream opened on {:?} ({} frames)", self.dir, paths.len());
        Ok(Box::new(DirectoryStream {
            paths,
            cursor: 0,
            next_index: 0,
            repeat: self.repeat,
            released: false,
        }))
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.as_str()))
}

struct DirectoryStream {
    paths: Vec<PathBuf>,
    cursor: usize,
    next_index: u64,
    repeat: bool,
    released: bool,
}

impl FrameStream for DirectoryStream {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.released {
            return Ok(None);
        }
        if self.cursor >= self.paths.len() {
            if !self.repeat {
                return Ok(None);
            }
            self.cursor = 0;
        }

        let path = &self.paths[self.cursor];
        self.cursor += 1;
        let index = self.next_index;
        self.next_index += 1;

        let image = image::open(path)
            .map_err(|source| CameraError::Read {
                path: path.clone(),
                source,
            })?
            .to_rgb8();
        debug!("Captured frame {} from {:?}", index, path);
        Ok(Some(Frame::new(index, image)))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            info!("Camera stream released");
        }
    }
}

/// The element a camera stream is bound to; hands out the current frame.
#[derive(Default)]
pub struct VideoSurface {
    stream: Option<Box<dyn FrameStream>>,
}

impl VideoSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `stream`, releasing any previously bound one.
    pub fn bind(&mut self, stream: Box<dyn FrameStream>) {
        self.release();
        self.stream = Some(stream);
    }

    /// Captures the current frame. `None` when unbound or the stream ended.
    pub fn capture(&mut self) -> Result<Option<Frame>, CameraError> {
        match self.stream.as_mut() {
            Some(stream) => stream.next_frame(),
            None => Ok(None),
        }
    }

    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
        }
    }
}

impl Drop for VideoSurface {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_frames(dir: &Path, count: usize) {
        for i in 0..count {
            let img = RgbImage::from_pixel(8, 6, Rgb([i as u8, 0, 0]));
            img.save(dir.join(format!("frame_{:03}.png", i))).unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "not a frame").unwrap();
    }

    #[test]
    fn test_directory_stream_reads_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);

        let mut stream = DirectoryCamera::new(dir.path(), false).request_stream().unwrap();
        let reds: Vec<u8> = std::iter::from_fn(|| stream.next_frame().unwrap())
            .map(|f| f.image.get_pixel(0, 0)[0])
            .collect();

        assert_eq!(reds, vec![0, 1, 2]);
    }

    #[test]
    fn test_repeating_stream_cycles_with_increasing_index() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 2);

        let mut stream = DirectoryCamera::new(dir.path(), true).request_stream().unwrap();
        let frames: Vec<Frame> = (0..5).map(|_| stream.next_frame().unwrap().unwrap()).collect();

        assert_eq!(frames[4].index, 4);
        assert_eq!(frames[4].image.get_pixel(0, 0)[0], 0);
        assert_eq!(frames[0].size(), (8, 6));
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = DirectoryCamera::new(&missing, true).request_stream().err().unwrap();
        assert!(matches!(err, CameraError::NotFound(_)));
    }

    #[test]
    fn test_empty_directory_has_no_frames() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectoryCamera::new(dir.path(), true).request_stream().err().unwrap();
        assert!(matches!(err, CameraError::NoFrames(_)));
    }

    #[test]
    fn test_released_surface_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 1);
        let stream = DirectoryCamera::new(dir.path(), true).request_stream().unwrap();

        let mut surface = VideoSurface::new();
        surface.bind(stream);
        assert!(surface.capture().unwrap().is_some());

        surface.release();
        assert!(surface.capture().unwrap().is_none());
    }
}
