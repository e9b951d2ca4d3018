use bitflags::bitflags;

bitflags! {
    /// Side-effect summary of an IR tree.
    ///
    /// A node's flags are its own effects unioned with those of all operands;
    /// see [`IrContext::new_node`](crate::IrContext::new_node).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SideEffects: u8 {
        /// Stores to a local or through memory.
        const ASG = 1 << 0;
        /// Contains a call (user method or runtime helper).
        const CALL = 1 << 1;
        /// May raise an exception.
        const EXCEPT = 1 << 2;
        /// Reads or writes memory visible outside the method.
        const GLOB_REF = 1 << 3;
        /// Must not be reordered with anything else (catch argument).
        const ORDER_SIDEEFF = 1 << 4;

        const SIDE_EFFECT = Self::ASG.bits() | Self::CALL.bits() | Self::EXCEPT.bits();
        const GLOB_EFFECT = Self::SIDE_EFFECT.bits() | Self::GLOB_REF.bits();
        const ALL_EFFECT = Self::GLOB_EFFECT.bits() | Self::ORDER_SIDEEFF.bits();
    }
}

impl SideEffects {
    pub fn has_side_effects(self) -> bool {
        self.intersects(SideEffects::SIDE_EFFECT)
    }

    pub fn has_global_effects(self) -> bool {
        self.intersects(SideEffects::GLOB_EFFECT)
    }
}

impl std::fmt::Display for SideEffects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NAMES: [(SideEffects, char); 5] = [
            (SideEffects::ASG, 'A'),
            (SideEffects::CALL, 'C'),
            (SideEffects::EXCEPT, 'X'),
            (SideEffects::GLOB_REF, 'G'),
            (SideEffects::ORDER_SIDEEFF, 'O'),
        ];
        for (flag, c) in NAMES {
            if self.contains(flag) {
                write!(f, "{c}")?;
            } else {
                f.write_str("-")?;
            }
        }
        Ok(())
    }
}
