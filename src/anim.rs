//! Frame-by-frame sprite animation over an atlas.

use std::collections::HashMap;
use std::rc::Rc;

use crate::atlas::{Atlas, SpriteRect};
use crate::error::{ImrError, ImrResult};
use crate::texture::Texture;

/// Anything that can say which sprite to draw right now.
pub trait AnimationCursor {
    fn current_sprite(&self) -> Option<SpriteRect>;
    fn texture(&self) -> Option<Texture>;
}

#[derive(Debug, Clone)]
pub struct Animation {
    pub name: String,
    /// Seconds for one pass over all frames.
    pub duration: f32,
    pub frames: Vec<SpriteRect>,
}

impl Animation {
    fn time_per_frame(&self) -> f32 {
        if self.frames.is_empty() {
            return 0.0;
        }
        self.duration / self.frames.len() as f32
    }
}

/// Named animations sharing one atlas.
#[derive(Debug, Clone)]
pub struct AnimationSet {
    atlas: Rc<Atlas>,
    animations: HashMap<String, Animation>,
}

impl AnimationSet {
    pub fn new(atlas: Rc<Atlas>) -> Self {
        Self {
            atlas,
            animations: HashMap::new(),
        }
    }

    /// Adds an animation stepping through `sprites` (atlas names) over `duration` seconds.
    pub fn add_animation(
        &mut self,
        name: &str,
        sprites: &[&str],
        duration: f32,
    ) -> ImrResult<&mut Self> {
        let frames = sprites
            .iter()
            .map(|s| self.atlas.sprite(s))
            .collect::<ImrResult<Vec<_>>>()?;
        self.animations.insert(
            name.to_string(),
            Animation {
                name: name.to_string(),
                duration,
                frames,
            },
        );
        Ok(self)
    }

    pub fn animation(&self, name: &str) -> Option<&Animation> {
        self.animations.get(name)
    }

    pub fn texture(&self) -> &Texture {
        self.atlas.texture()
    }
}

/// Playback state over an [`AnimationSet`].
#[derive(Debug, Clone)]
pub struct SpriteAnimation {
    set: Rc<AnimationSet>,
    current: Option<String>,
    frame: usize,
    elapsed: f32,
    looping: bool,
}

impl SpriteAnimation {
    pub fn new(set: Rc<AnimationSet>) -> Self {
        Self {
            set,
            current: None,
            frame: 0,
            elapsed: 0.0,
            looping: false,
        }
    }

    /// Switches to `name`. With `reset == false` the animation already playing
    /// under that name keeps its position.
    pub fn set_animation(&mut self, name: &str, looping: bool, reset: bool) -> ImrResult<()> {
        if self.set.animation(name).is_none() {
            return Err(ImrError::AnimationNotFound(name.to_string()));
        }
        if !reset && self.current.as_deref() == Some(name) {
            return Ok(());
        }
        self.current = Some(name.to_string());
        self.frame = 0;
        self.elapsed = 0.0;
        self.looping = looping;
        Ok(())
    }

    /// Advances by `dt` seconds. Negative or non-finite steps are ignored.
    pub fn update(&mut self, dt: f32) {
        let Some(animation) = self.current.as_deref().and_then(|n| self.set.animation(n)) else {
            return;
        };
        let slice = animation.time_per_frame();
        if !slice.is_finite() || slice <= 0.0 || !dt.is_finite() || dt < 0.0 {
            return;
        }
        let len = animation.frames.len();
        let elapsed = self.elapsed + dt;
        let steps = (elapsed / slice).floor();
        self.elapsed = (elapsed % slice).max(0.0);
        if self.looping {
            self.frame = (self.frame + (steps % len as f32) as usize) % len;
        } else {
            self.frame = self.frame.saturating_add(steps as usize).min(len - 1);
        }
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn is_finished(&self) -> bool {
        match self.current.as_deref().and_then(|n| self.set.animation(n)) {
            Some(a) => !self.looping && self.frame + 1 >= a.frames.len(),
            None => true,
        }
    }
}

impl AnimationCursor for SpriteAnimation {
    fn current_sprite(&self) -> Option<SpriteRect> {
        let animation = self.set.animation(self.current.as_deref()?)?;
        animation.frames.get(self.frame).copied()
    }

    fn texture(&self) -> Option<Texture> {
        Some(self.set.texture().clone())
    }
}
