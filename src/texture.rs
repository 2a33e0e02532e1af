//! Shared texture and frame buffer handles.
//!
//! Handles are reference counted. When the last clone of an owning handle
//! drops, its GPU id lands in the context's release queue and is deleted on
//! the next [`crate::ImrContext::collect_garbage`] (or at teardown).

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use glam::Vec2;

use crate::gpu::{FrameBufferId, TargetId, TextureId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    Texture(TextureId),
    FrameBuffer(FrameBufferId),
}

pub(crate) type ReleaseQueue = Rc<RefCell<Vec<Release>>>;

/// Who deletes a texture's GPU object.
enum Owner {
    /// The texture itself, when its last handle drops.
    Standalone(Weak<RefCell<Vec<Release>>>),
    /// Its frame buffer. The attachment keeps the frame buffer alive.
    Attachment { _frame_buffer: Rc<FrameBufferCore> },
}

struct TextureInner {
    id: TextureId,
    width: u32,
    height: u32,
    name: String,
    owner: Owner,
}

impl Drop for TextureInner {
    fn drop(&mut self) {
        if let Owner::Standalone(releases) = &self.owner {
            if let Some(queue) = releases.upgrade() {
                queue.borrow_mut().push(Release::Texture(self.id));
            }
        }
    }
}

#[derive(Clone)]
pub struct Texture(Rc<TextureInner>);

impl Texture {
    pub(crate) fn new(
        id: TextureId,
        width: u32,
        height: u32,
        name: &str,
        releases: &ReleaseQueue,
    ) -> Self {
        Texture(Rc::new(TextureInner {
            id,
            width,
            height,
            name: name.to_string(),
            owner: Owner::Standalone(Rc::downgrade(releases)),
        }))
    }

    fn attachment(id: TextureId, width: u32, height: u32, core: &Rc<FrameBufferCore>) -> Self {
        Texture(Rc::new(TextureInner {
            id,
            width,
            height,
            name: String::new(),
            owner: Owner::Attachment {
                _frame_buffer: core.clone(),
            },
        }))
    }

    pub fn id(&self) -> TextureId {
        self.0.id
    }

    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn height(&self) -> u32 {
        self.0.height
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.0.width as f32, self.0.height as f32)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }
}

/// Identity comparison: two handles are equal when they name the same GPU texture.
impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Texture {}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("width", &self.0.width)
            .field("height", &self.0.height)
            .finish()
    }
}

/// Shared by a frame buffer handle and its attachment textures. The GPU
/// frame buffer is released when the last of them drops.
struct FrameBufferCore {
    id: FrameBufferId,
    releases: Weak<RefCell<Vec<Release>>>,
}

impl Drop for FrameBufferCore {
    fn drop(&mut self) {
        if let Some(queue) = self.releases.upgrade() {
            queue.borrow_mut().push(Release::FrameBuffer(self.id));
        }
    }
}

struct FrameBufferInner {
    core: Rc<FrameBufferCore>,
    width: u32,
    height: u32,
    colors: Vec<Texture>,
}

/// Offscreen surface with one or more color attachments.
#[derive(Clone)]
pub struct FrameBuffer(Rc<FrameBufferInner>);

impl FrameBuffer {
    /// Wraps a GPU frame buffer whose color attachments are `colors`.
    pub(crate) fn new(
        id: FrameBufferId,
        width: u32,
        height: u32,
        colors: &[TextureId],
        releases: &ReleaseQueue,
    ) -> Self {
        let core = Rc::new(FrameBufferCore {
            id,
            releases: Rc::downgrade(releases),
        });
        let colors = colors
            .iter()
            .map(|&color| Texture::attachment(color, width, height, &core))
            .collect();
        FrameBuffer(Rc::new(FrameBufferInner {
            core,
            width,
            height,
            colors,
        }))
    }

    pub fn id(&self) -> FrameBufferId {
        self.0.core.id
    }

    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn height(&self) -> u32 {
        self.0.height
    }

    /// Color attachment `index` as a sampleable texture.
    pub fn color_texture(&self, index: usize) -> Option<Texture> {
        self.0.colors.get(index).cloned()
    }

    pub fn attachment_count(&self) -> usize {
        self.0.colors.len()
    }
}

impl PartialEq for FrameBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.0.core.id)
            .field("width", &self.0.width)
            .field("height", &self.0.height)
            .field("attachments", &self.0.colors.len())
            .finish()
    }
}

/// Where a camera draws: the window's backbuffer or an offscreen frame buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderTarget {
    Backbuffer { width: u32, height: u32 },
    FrameBuffer(FrameBuffer),
}

impl RenderTarget {
    pub fn width(&self) -> u32 {
        match self {
            RenderTarget::Backbuffer { width, .. } => *width,
            RenderTarget::FrameBuffer(fb) => fb.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            RenderTarget::Backbuffer { height, .. } => *height,
            RenderTarget::FrameBuffer(fb) => fb.height(),
        }
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width() as f32, self.height() as f32)
    }

    pub fn target_id(&self) -> TargetId {
        match self {
            RenderTarget::Backbuffer { .. } => TargetId::Backbuffer,
            RenderTarget::FrameBuffer(fb) => TargetId::FrameBuffer(fb.id()),
        }
    }
}

impl From<FrameBuffer> for RenderTarget {
    fn from(fb: FrameBuffer) -> Self {
        RenderTarget::FrameBuffer(fb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_owner_drop_queues_release() {
        let queue: ReleaseQueue = Rc::new(RefCell::new(Vec::new()));
        let tex = Texture::new(TextureId(7), 4, 4, "t", &queue);
        let clone = tex.clone();
        drop(tex);
        assert!(queue.borrow().is_empty());
        drop(clone);
        assert_eq!(*queue.borrow(), vec![Release::Texture(TextureId(7))]);
    }

    #[test]
    fn attachments_are_not_released_on_their_own() {
        let queue: ReleaseQueue = Rc::new(RefCell::new(Vec::new()));
        let fb = FrameBuffer::new(FrameBufferId(1), 8, 8, &[TextureId(2)], &queue);
        drop(fb);
        assert_eq!(*queue.borrow(), vec![Release::FrameBuffer(FrameBufferId(1))]);
    }

    #[test]
    fn attachment_handle_keeps_its_frame_buffer() {
        let queue: ReleaseQueue = Rc::new(RefCell::new(Vec::new()));
        let fb = FrameBuffer::new(FrameBufferId(1), 8, 8, &[TextureId(2), TextureId(3)], &queue);
        let color = fb.color_texture(1).unwrap();
        drop(fb);
        assert!(queue.borrow().is_empty());
        assert_eq!(color.id(), TextureId(3));
        drop(color);
        assert_eq!(*queue.borrow(), vec![Release::FrameBuffer(FrameBufferId(1))]);
    }
}
