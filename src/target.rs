use std::mem;

/// Compile target for a checking pass. The semantic core only needs the
/// target's word sizes: they decide what `int`/`uint` alias to, how `this`
/// parameters are passed, and how struct layout rounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildTarget {
    Host,
    Triple(String),
}

impl BuildTarget {
    pub fn host() -> Self {
        Self::Host
    }

    pub fn triple(&self) -> Option<&str> {
        match self {
            BuildTarget::Host => None,
            BuildTarget::Triple(triple) => Some(triple),
        }
    }

    pub fn pointer_width_bits(&self) -> u32 {
        match self {
            BuildTarget::Host => mem::size_of::<usize>() as u32 * 8,
            BuildTarget::Triple(triple) => {
                let arch = triple.split('-').next().unwrap_or("");
                if matches!(arch, "i386" | "i686" | "arm" | "armv7" | "riscv32" | "wasm32") {
                    32
                } else {
                    64
                }
            }
        }
    }

    /// Size in bytes of a pointer (and of `&T`, `mut&T`, `*T`).
    pub fn ptr_size(&self) -> u64 {
        (self.pointer_width_bits() / 8) as u64
    }

    /// Size in bytes of `int` and `uint`; Keel sizes them to the target word.
    pub fn int_size(&self) -> u64 {
        self.ptr_size()
    }
}

impl Default for BuildTarget {
    fn default() -> Self {
        BuildTarget::Host
    }
}
