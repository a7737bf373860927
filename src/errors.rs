// SPDX-License-Identifier: GPL-3.0-only

//! Error types for capture, rendering and output sinks
//!
//! Every failure the orchestrator surfaces to observers is reduced to an
//! [`ErrorEvent`] by [`AppError::to_event`]. The match there is exhaustive,
//! so adding a variant forces a decision about how it is reported.

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Camera device or capture session errors
    Camera(CameraError),
    /// GPU rendering errors
    Render(RenderError),
    /// Recording-related errors
    Recording(RecordingError),
    /// Photo capture errors
    Photo(PhotoError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Camera device and capture session errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// The platform refused or failed to open the device
    DeviceOpenFailure(String),
    /// No device with the requested identity or facing exists
    DeviceNotFound(String),
    /// Camera permission has not been granted
    PermissionDenied,
    /// The device went away after it was opened
    DeviceDisconnected,
    /// The device could not be used after it was opened
    DeviceAccessFailure(String),
    /// The device rejected the requested set of output surfaces
    SessionConfigurationFailure(String),
}

/// GPU rendering errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A single frame could not be produced; the next frame may succeed
    TransientGlitch(String),
    /// The rendering context is unusable
    Fatal(String),
    /// The render thread is gone
    ContextLost,
    /// Drawing was attempted before `prepare`
    NotPrepared,
    /// The output target already has a live rendering context
    SurfaceAlreadyBound(String),
    /// The frame texture is not attached to this context
    TextureNotAttached(String),
}

/// Recording-specific errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    /// Encoder or muxer failed while starting, running or finalizing
    EncoderOrMuxerFailure(String),
    /// No usable encoder element was found
    EncoderNotAvailable(String),
    /// Recording already in progress
    AlreadyRecording,
    /// No recording is in progress
    NotRecording,
    /// Recording requires video mode
    NotInVideoMode,
    /// The finished file could not be handed to storage
    SaveFailed(String),
}

/// Photo capture errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoError {
    /// No frame arrived in time
    NoFrameAvailable,
    /// Still capture requires picture mode
    NotInPictureMode,
    /// Capture failed
    CaptureFailed(String),
    /// Encoding failed
    EncodingFailed(String),
    /// Save failed
    SaveFailed(String),
}

/// User-visible error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorEvent {
    /// A camera device could not be opened
    CameraOpenError,
    /// A capture session could not be configured
    SessionConfigurationError,
    /// Disconnects, access failures and everything else
    UnknownError,
}

impl AppError {
    /// Reduce this error to the event reported to observers
    pub fn to_event(&self) -> ErrorEvent {
        match self {
            AppError::Camera(e) => e.to_event(),
            AppError::Render(_)
            | AppError::Recording(_)
            | AppError::Photo(_)
            | AppError::Config(_)
            | AppError::Storage(_)
            | AppError::Other(_) => ErrorEvent::UnknownError,
        }
    }
}

impl CameraError {
    pub fn to_event(&self) -> ErrorEvent {
        match self {
            CameraError::DeviceOpenFailure(_)
            | CameraError::DeviceNotFound(_)
            | CameraError::PermissionDenied => ErrorEvent::CameraOpenError,
            CameraError::SessionConfigurationFailure(_) => ErrorEvent::SessionConfigurationError,
            CameraError::DeviceDisconnected | CameraError::DeviceAccessFailure(_) => {
                ErrorEvent::UnknownError
            }
        }
    }
}

impl RenderError {
    /// Whether the render loop should skip the frame and keep going
    pub fn is_transient(&self) -> bool {
        matches!(self, RenderError::TransientGlitch(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Camera(e) => write!(f, "Camera error: {}", e),
            AppError::Render(e) => write!(f, "Render error: {}", e),
            AppError::Recording(e) => write!(f, "Recording error: {}", e),
            AppError::Photo(e) => write!(f, "Photo error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::DeviceOpenFailure(msg) => write!(f, "Failed to open device: {}", msg),
            CameraError::DeviceNotFound(what) => write!(f, "No camera found for {}", what),
            CameraError::PermissionDenied => write!(f, "Camera permission not granted"),
            CameraError::DeviceDisconnected => write!(f, "Camera disconnected"),
            CameraError::DeviceAccessFailure(msg) => write!(f, "Camera access failed: {}", msg),
            CameraError::SessionConfigurationFailure(msg) => {
                write!(f, "Session configuration failed: {}", msg)
            }
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::TransientGlitch(msg) => write!(f, "Transient rendering glitch: {}", msg),
            RenderError::Fatal(msg) => write!(f, "Rendering failed: {}", msg),
            RenderError::ContextLost => write!(f, "Rendering context lost"),
            RenderError::NotPrepared => write!(f, "Rendering context not prepared"),
            RenderError::SurfaceAlreadyBound(label) => {
                write!(f, "Output surface '{}' is already bound to a context", label)
            }
            RenderError::TextureNotAttached(label) => {
                write!(f, "Surface texture '{}' is not attached", label)
            }
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::EncoderOrMuxerFailure(msg) => write!(f, "Encoder failure: {}", msg),
            RecordingError::EncoderNotAvailable(msg) => write!(f, "Encoder not available: {}", msg),
            RecordingError::AlreadyRecording => write!(f, "Recording already in progress"),
            RecordingError::NotRecording => write!(f, "Not recording"),
            RecordingError::NotInVideoMode => write!(f, "Recording requires video mode"),
            RecordingError::SaveFailed(msg) => write!(f, "Save failed: {}", msg),
        }
    }
}

impl fmt::Display for PhotoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoError::NoFrameAvailable => write!(f, "No frame available for capture"),
            PhotoError::NotInPictureMode => write!(f, "Still capture requires picture mode"),
            PhotoError::CaptureFailed(msg) => write!(f, "Capture failed: {}", msg),
            PhotoError::EncodingFailed(msg) => write!(f, "Encoding failed: {}", msg),
            PhotoError::SaveFailed(msg) => write!(f, "Save failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for CameraError {}
impl std::error::Error for RenderError {}
impl std::error::Error for RecordingError {}
impl std::error::Error for PhotoError {}

// Conversions from sub-errors to AppError
impl From<CameraError> for AppError {
    fn from(err: CameraError) -> Self {
        AppError::Camera(err)
    }
}

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        AppError::Render(err)
    }
}

impl From<RecordingError> for AppError {
    fn from(err: RecordingError) -> Self {
        AppError::Recording(err)
    }
}

impl From<PhotoError> for AppError {
    fn from(err: PhotoError) -> Self {
        AppError::Photo(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for PhotoError {
    fn from(err: std::io::Error) -> Self {
        PhotoError::SaveFailed(err.to_string())
    }
}

impl From<std::io::Error> for RecordingError {
    fn from(err: std::io::Error) -> Self {
        RecordingError::SaveFailed(err.to_string())
    }
}

impl From<RenderError> for PhotoError {
    fn from(err: RenderError) -> Self {
        PhotoError::CaptureFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_errors_map_to_events() {
        assert_eq!(
            AppError::from(CameraError::DeviceOpenFailure("busy".into())).to_event(),
            ErrorEvent::CameraOpenError
        );
        assert_eq!(
            AppError::from(CameraError::SessionConfigurationFailure("bad".into())).to_event(),
            ErrorEvent::SessionConfigurationError
        );
        assert_eq!(
            AppError::from(CameraError::DeviceDisconnected).to_event(),
            ErrorEvent::UnknownError
        );
        assert_eq!(
            AppError::from(CameraError::DeviceAccessFailure("gone".into())).to_event(),
            ErrorEvent::UnknownError
        );
    }

    #[test]
    fn test_non_camera_errors_are_unknown() {
        let errors = [
            AppError::Render(RenderError::Fatal("lost".into())),
            AppError::Recording(RecordingError::EncoderOrMuxerFailure("mux".into())),
            AppError::Photo(PhotoError::NoFrameAvailable),
            AppError::Storage("full".into()),
        ];
        for error in errors {
            assert_eq!(error.to_event(), ErrorEvent::UnknownError);
        }
    }

    #[test]
    fn test_only_glitches_are_transient() {
        assert!(RenderError::TransientGlitch("stale".into()).is_transient());
        assert!(!RenderError::Fatal("oom".into()).is_transient());
        assert!(!RenderError::ContextLost.is_transient());
    }
}
