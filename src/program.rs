use std::borrow::Cow;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{ImrError, ImrResult};
use crate::gpu::ProgramId;

pub const INSTANCING_PROGRAM: &str = "_IPN_";
pub const TEXT_PROGRAM: &str = "_TPN_";
pub const SPRITE_PROGRAM: &str = "_SPN_";
pub const MESH_PROGRAM: &str = "_MPN_";

/// Uniform register holding the projection matrix (or the start of a packed block).
pub const UNIFORM_PROJECTION: u32 = 0;
pub const UNIFORM_VIEW: u32 = 1;

/// Where a program expects its inputs: uniform registers map to byte offsets
/// inside the program's uniform block, attribute registers map to shader
/// locations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramLayout {
    pub uniform_block_size: u32,
    pub texture_slots: u32,
    uniforms: HashMap<u32, u32>,
    attribs: HashMap<u32, u32>,
}

impl ProgramLayout {
    pub fn new(uniform_block_size: u32, texture_slots: u32) -> Self {
        Self {
            uniform_block_size,
            texture_slots,
            ..Default::default()
        }
    }

    pub fn with_uniform(mut self, register: u32, offset: u32) -> Self {
        self.uniforms.insert(register, offset);
        self
    }

    pub fn with_attrib(mut self, register: u32, shader_location: u32) -> Self {
        self.attribs.insert(register, shader_location);
        self
    }

    pub fn uniform_offset(&self, register: u32) -> Option<u32> {
        self.uniforms.get(&register).copied()
    }

    pub fn attrib_location(&self, register: u32) -> Option<u32> {
        self.attribs.get(&register).copied()
    }

    /// Layout shared by the instancing and text programs: two matrices, the
    /// quad corner at register 0 and five per-instance vec4s at 1..=5.
    pub fn instancing() -> Self {
        let mut layout = ProgramLayout::new(128, 4)
            .with_uniform(UNIFORM_PROJECTION, 0)
            .with_uniform(UNIFORM_VIEW, 64);
        for register in 0..=5 {
            layout = layout.with_attrib(register, register);
        }
        layout
    }

    /// Sprite program: one packed block of 13 vec4s.
    pub fn sprite() -> Self {
        ProgramLayout::new(208, 4)
            .with_uniform(UNIFORM_PROJECTION, 0)
            .with_attrib(0, 0)
    }

    /// Mesh program: projection and view packed as `ub[2]`, pos/uv and color attributes.
    pub fn mesh() -> Self {
        ProgramLayout::new(128, 4)
            .with_uniform(UNIFORM_PROJECTION, 0)
            .with_attrib(0, 0)
            .with_attrib(1, 1)
    }
}

/// Everything a backend needs to build a program.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    pub label: String,
    pub wgsl: Cow<'static, str>,
    pub vs_entry: String,
    pub fs_entry: String,
    pub layout: ProgramLayout,
}

impl ProgramSource {
    pub fn new(label: &str, wgsl: impl Into<Cow<'static, str>>, layout: ProgramLayout) -> Self {
        Self {
            label: label.to_string(),
            wgsl: wgsl.into(),
            vs_entry: "vs_main".to_string(),
            fs_entry: "fs_main".to_string(),
            layout,
        }
    }
}

/// A built GPU program. Selection goes through the registry by name; the
/// program itself is only ever used through its id and layout.
#[derive(Debug)]
pub struct Program {
    id: ProgramId,
    layout: ProgramLayout,
}

impl Program {
    pub fn new(id: ProgramId, layout: ProgramLayout) -> Self {
        Self { id, layout }
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn layout(&self) -> &ProgramLayout {
        &self.layout
    }

    pub fn uniform_offset(&self, register: u32) -> ImrResult<u32> {
        self.layout.uniform_offset(register).ok_or_else(|| {
            ImrError::InvalidAttribLayout(format!("program has no uniform register {register}"))
        })
    }

    pub fn attrib_location(&self, register: u32) -> ImrResult<u32> {
        self.layout.attrib_location(register).ok_or_else(|| {
            ImrError::InvalidAttribLayout(format!("program has no attribute register {register}"))
        })
    }
}

/// Programs compare by GPU id, which is what the program stack cares about.
impl PartialEq for Program {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Default)]
pub struct ProgramRegistry {
    programs: HashMap<String, Rc<Program>>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, program: Rc<Program>) -> ImrResult<()> {
        if self.programs.contains_key(name) {
            return Err(ImrError::ProgramAlreadyRegistered(name.to_string()));
        }
        self.programs.insert(name.to_string(), program);
        Ok(())
    }

    /// Removes the entry and hands the program back so its GPU side can be deleted.
    pub fn unregister(&mut self, name: &str) -> ImrResult<Rc<Program>> {
        self.programs
            .remove(name)
            .ok_or_else(|| ImrError::ProgramNotRegistered(name.to_string()))
    }

    pub fn get(&self, name: &str) -> ImrResult<Rc<Program>> {
        self.programs
            .get(name)
            .cloned()
            .ok_or_else(|| ImrError::ProgramNotRegistered(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (String, Rc<Program>)> + '_ {
        self.programs.drain()
    }
}

/// Sources of the programs every context registers at startup.
pub fn builtin_sources() -> Vec<(&'static str, ProgramSource)> {
    vec![
        (
            INSTANCING_PROGRAM,
            ProgramSource::new(
                "instancing",
                include_str!("../shaders/instancing.wgsl"),
                ProgramLayout::instancing(),
            ),
        ),
        (
            TEXT_PROGRAM,
            ProgramSource::new(
                "text",
                include_str!("../shaders/text.wgsl"),
                ProgramLayout::instancing(),
            ),
        ),
        (
            SPRITE_PROGRAM,
            ProgramSource::new(
                "sprite",
                include_str!("../shaders/sprite.wgsl"),
                ProgramLayout::sprite(),
            ),
        ),
        (
            MESH_PROGRAM,
            ProgramSource::new(
                "mesh",
                include_str!("../shaders/mesh.wgsl"),
                ProgramLayout::mesh(),
            ),
        ),
    ]
}
