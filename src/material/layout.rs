use crate::error::{Result, SimulationError};

/// Location of a named quantity inside the state variable vector of a quadrature point.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StateSlot {
    pub offset: usize,
    pub width: usize,
}

impl StateSlot {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.width
    }

    pub fn get<'a>(&self, state: &'a [f64]) -> &'a [f64] {
        &state[self.range()]
    }

    pub fn get_mut<'a>(&self, state: &'a mut [f64]) -> &'a mut [f64] {
        &mut state[self.range()]
    }
}

pub const SHEAR_RATE_EFFECTIVE: &str = "shrateEff";
pub const SHEAR_EFFECTIVE: &str = "shrEff";
pub const PLASTIC_WORK: &str = "pl_work";
pub const QUATERNIONS: &str = "quats";
pub const HARDNESS: &str = "hardness";
pub const SHEAR_RATES: &str = "gdot";
pub const ELASTIC_STRAIN: &str = "elas_strain";
pub const RELATIVE_VOLUME: &str = "rel_vol";

/// Stable mapping from state variable names to their slots.
///
/// Consumers of the state must go through this lookup instead of hardcoding offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    entries: Vec<(&'static str, StateSlot)>,
    len: usize,
}

impl StateLayout {
    pub(crate) fn from_widths(widths: &[(&'static str, usize)]) -> Self {
        let mut offset = 0;
        let entries = widths
            .iter()
            .map(|&(name, width)| {
                let slot = StateSlot { offset, width };
                offset += width;
                (name, slot)
            })
            .collect();
        Self { entries, len: offset }
    }

    /// Total number of state variables per quadrature point.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn find(&self, name: &str) -> Option<StateSlot> {
        self.entries
            .iter()
            .find(|(entry_name, _)| *entry_name == name)
            .map(|(_, slot)| *slot)
    }

    /// Like [`find`](Self::find), but an unknown name is a configuration error.
    pub fn lookup(&self, name: &str) -> Result<StateSlot> {
        self.find(name)
            .ok_or_else(|| SimulationError::configuration(format!("unknown state variable \"{}\"", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }
}
