use crate::rop::RegisterSpec;

/// A finished assignment of SSA registers to Dalvik frame registers
#[derive(Debug, Clone)]
pub struct RegisterMapper {
    map: Vec<u32>,
    reg_count: u32,
}

impl RegisterMapper {
    pub fn new(map: Vec<u32>, reg_count: u32) -> RegisterMapper {
        RegisterMapper { map, reg_count }
    }

    pub fn identity(reg_count: u32) -> RegisterMapper {
        RegisterMapper {
            map: (0..reg_count).collect(),
            reg_count,
        }
    }

    pub fn map(&self, reg: u32) -> u32 {
        self.map[reg as usize]
    }

    /// Map a register operand, preserving its type
    pub fn map_spec(&self, spec: RegisterSpec) -> RegisterSpec {
        RegisterSpec::new(self.map(spec.reg), spec.tag)
    }

    /// Size of the Dalvik register frame this mapping targets
    pub fn reg_count(&self) -> u32 {
        self.reg_count
    }
}
