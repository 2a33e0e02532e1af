use crate::gpu::{BlendFactor, BlendFunc};

/// Stack of render states that only touches the GPU when the effective state
/// changes across a push or pop.
#[derive(Debug, Clone)]
pub struct StateStack<T> {
    items: Vec<T>,
}

impl<T> Default for StateStack<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: PartialEq> StateStack<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `state`, calling `apply` first unless it equals the current top.
    pub fn push(&mut self, state: T, apply: impl FnOnce(&T)) {
        if self.items.last() != Some(&state) {
            apply(&state);
        }
        self.items.push(state);
    }

    /// Pops the top and re-applies the new top if it differs from the popped
    /// state. Popping an empty stack is a broken call sequence and panics.
    pub fn pop(&mut self, apply: impl FnOnce(&T)) -> T {
        let Some(popped) = self.items.pop() else {
            panic!("pop on an empty render-state stack");
        };
        if let Some(top) = self.items.last() {
            if *top != popped {
                apply(top);
            }
        }
        popped
    }

    pub fn top(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn contains(&self, state: &T) -> bool {
        self.items.contains(state)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Blend presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Additive,
    Multiply,
    Screen,
}

impl BlendMode {
    pub fn func(self) -> BlendFunc {
        match self {
            BlendMode::Normal => BlendFunc::ALPHA,
            BlendMode::Additive => BlendFunc::ADDITIVE,
            BlendMode::Multiply => BlendFunc {
                src: BlendFactor::DstColor,
                dst: BlendFactor::OneMinusSrcAlpha,
            },
            BlendMode::Screen => BlendFunc {
                src: BlendFactor::One,
                dst: BlendFactor::OneMinusSrcColor,
            },
        }
    }
}
