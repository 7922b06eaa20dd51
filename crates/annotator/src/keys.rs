use serde::{Deserialize, Serialize};

/// Logical key code plus physical scan code. Lookups try the exact pair first,
/// then the logical code alone so bindings survive layouts whose scan codes differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyBinding {
    pub code: u32,
    #[serde(default)]
    pub scan: u32,
}

impl KeyBinding {
    pub const fn new(code: u32, scan: u32) -> Self { Self { code, scan } }

    /// Two bindings conflict when they share a logical code, since the
    /// code-only fallback could not tell them apart.
    pub fn conflicts_with(&self, other: &KeyBinding) -> bool { self.code == other.code }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub key: KeyBinding,
    pub auto_repeat: bool,
}

impl KeyInput {
    pub const fn new(key: KeyBinding) -> Self { Self { key, auto_repeat: false } }

    pub const fn repeat(key: KeyBinding) -> Self { Self { key, auto_repeat: true } }
}

impl From<KeyBinding> for KeyInput {
    fn from(key: KeyBinding) -> Self { Self::new(key) }
}

pub mod codes {
    // Logical codes follow ASCII uppercase; scan codes are PC set 1.
    pub const KEY_F: u32 = 0x46;
    pub const KEY_J: u32 = 0x4A;
    pub const SCAN_F: u32 = 0x21;
    pub const SCAN_J: u32 = 0x24;
}

/// Index of the binding matching `pressed`, exact pair first, then logical code.
pub fn find_binding(bindings: &[Option<KeyBinding>], pressed: KeyBinding) -> Option<usize> {
    bindings.iter().position(|b| *b == Some(pressed))
        .or_else(|| bindings.iter().position(|b| b.map_or(false, |b| b.code == pressed.code)))
}
