use thiserror::Error;

pub type ImrResult<T> = Result<T, ImrError>;

/// Every failure surfaced by the render layer.
///
/// Protocol violations (mismatched begin/end, drawing outside a context,
/// duplicate registrations) are recoverable: the caller usually logs them and
/// skips the rest of the frame step. Resource errors carry the diagnostic text
/// of whatever failed underneath.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImrError {
    #[error("no camera context is active")]
    NoCamera,
    #[error("camera end() called without a matching begin()")]
    CameraNotBegun,
    #[error("a batch run from a previous try-batch is still queued")]
    BatchPending,
    #[error("end_try_batch() called but batching was never enabled")]
    BatchNotStarted,
    #[error("camera ended while a sprite batch is still open or queued")]
    UnflushedBatch,
    #[error("camera ended while a {0} context begun inside it is still open")]
    UnclosedContext(&'static str),
    #[error("instancing not begun")]
    InstancingNotBegun,
    #[error("instancing contexts nested deeper than {max}")]
    InstancingTooDeep { max: usize },
    #[error("instance scratch full: {requested} instances requested, capacity is {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },
    #[error("mesh not begun")]
    MeshNotBegun,
    #[error("mesh context has no program selected")]
    NoMeshProgram,
    #[error("texture slot {slot} has no texture or frame")]
    MissingTexture { slot: u32 },
    #[error("vertex data length {len} is not a multiple of stride {stride}")]
    InvalidVertexStride { len: usize, stride: usize },
    #[error("mesh index {index} does not fit in 16 bits")]
    MeshIndexOverflow { index: usize },
    #[error("program '{0}' already exists")]
    ProgramAlreadyRegistered(String),
    #[error("program '{0}' is not registered")]
    ProgramNotRegistered(String),
    #[error("program '{0}' is still in use")]
    ProgramInUse(String),
    #[error("program stack is empty")]
    ProgramStackEmpty,
    #[error("no blend state pushed outside of a camera context")]
    BlendStackUnderflow,
    #[error("sprite '{0}' is not registered in the atlas")]
    SpriteNotFound(String),
    #[error("animation cursor has no current sprite")]
    NoAnimationFrame,
    #[error("animation '{0}' is not defined")]
    AnimationNotFound(String),
    #[error("text not begun")]
    TextNotBegun,
    #[error("frame buffer size must be larger than zero (got {width}x{height})")]
    InvalidFrameBuffer { width: u32, height: u32 },
    #[error("invalid vertex attribute layout: {0}")]
    InvalidAttribLayout(String),
    #[error("failed to load texture '{path}': {reason}")]
    TextureLoad { path: String, reason: String },
    #[error("pixel buffer holds {len} bytes, {width}x{height} RGBA needs {expected}")]
    InvalidPixelData {
        len: usize,
        width: u32,
        height: u32,
        expected: usize,
    },
    #[error("shader build failed: {0}")]
    ShaderBuild(String),
    #[error("graphics backend error: {0}")]
    Backend(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ImrError {
    /// Stable numeric code, handy for logs and FFI-ish callers.
    pub fn code(&self) -> u32 {
        match self {
            ImrError::NoCamera => 1,
            ImrError::CameraNotBegun => 2,
            ImrError::BatchPending => 3,
            ImrError::BatchNotStarted => 4,
            ImrError::UnflushedBatch => 5,
            ImrError::UnclosedContext(_) => 6,
            ImrError::InstancingNotBegun => 10,
            ImrError::InstancingTooDeep { .. } => 11,
            ImrError::CapacityExceeded { .. } => 12,
            ImrError::MeshNotBegun => 20,
            ImrError::NoMeshProgram => 21,
            ImrError::MissingTexture { .. } => 22,
            ImrError::InvalidVertexStride { .. } => 23,
            ImrError::MeshIndexOverflow { .. } => 24,
            ImrError::ProgramAlreadyRegistered(_) => 30,
            ImrError::ProgramNotRegistered(_) => 31,
            ImrError::ProgramStackEmpty => 32,
            ImrError::BlendStackUnderflow => 33,
            ImrError::ProgramInUse(_) => 34,
            ImrError::SpriteNotFound(_) => 40,
            ImrError::NoAnimationFrame => 41,
            ImrError::TextNotBegun => 42,
            ImrError::AnimationNotFound(_) => 43,
            ImrError::InvalidFrameBuffer { .. } => 50,
            ImrError::InvalidAttribLayout(_) => 51,
            ImrError::TextureLoad { .. } => 60,
            ImrError::InvalidPixelData { .. } => 61,
            ImrError::ShaderBuild(_) => 62,
            ImrError::Backend(_) => 63,
            ImrError::Config(_) => 70,
        }
    }

    /// True for begin/end and registration misuse, false for resource failures.
    pub fn is_protocol_violation(&self) -> bool {
        self.code() < 60
    }
}
