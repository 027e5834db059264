//! Register allocation and management.
//!
//! This module implements the RegisterFile that tracks which Result currently
//! occupies each physical register of a Unit. Free registers are handed out
//! volatile-first, and a clock sweep picks eviction candidates when a bank is
//! exhausted. Spilling itself is performed by the Unit, which owns the results
//! and emits the relocating moves.

use crate::assembler::result::ResultId;

/// Maximum number of register banks supported (GP, media).
pub const MAX_REGISTER_BANKS: usize = 4;

/// Maximum number of registers per bank.
pub const MAX_REGISTERS_PER_BANK: usize = 32;

/// General-purpose register bank.
pub const GP_BANK: RegBank = 0;

/// Floating-point / vector register bank.
pub const MEDIA_BANK: RegBank = 1;

/// Type for register bank indices.
pub type RegBank = u8;

/// Type for register IDs within a bank.
pub type RegId = u8;

/// Combined register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: RegId,
}

impl AsmReg {
    pub const fn new(bank: RegBank, id: RegId) -> Self {
        Self { bank, id }
    }

    pub const fn gp(id: RegId) -> Self {
        Self::new(GP_BANK, id)
    }

    pub const fn media(id: RegId) -> Self {
        Self::new(MEDIA_BANK, id)
    }

    pub fn is_media(&self) -> bool {
        self.bank == MEDIA_BANK
    }

    /// Get the linear register index for array indexing.
    pub fn linear_index(&self, regs_per_bank: usize) -> usize {
        (self.bank as usize) * regs_per_bank + (self.id as usize)
    }

    /// Create from linear index.
    pub fn from_linear_index(index: usize, regs_per_bank: usize) -> Self {
        let bank = (index / regs_per_bank) as RegBank;
        let id = (index % regs_per_bank) as RegId;
        Self { bank, id }
    }
}

/// Bit set for efficiently tracking register sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegBitSet {
    /// Bit mask for each register bank.
    banks: [u64; MAX_REGISTER_BANKS],
}

impl RegBitSet {
    /// Create empty register set.
    pub fn new() -> Self {
        Self {
            banks: [0; MAX_REGISTER_BANKS],
        }
    }

    /// Create register set with all registers in bank marked.
    pub fn all_in_bank(bank: RegBank, count: u8) -> Self {
        let mut set = Self::new();
        if count < 64 {
            set.banks[bank as usize] = (1u64 << count) - 1;
        } else {
            set.banks[bank as usize] = u64::MAX;
        }
        set
    }

    pub fn from_registers(registers: &[AsmReg]) -> Self {
        let mut set = Self::new();
        for &reg in registers {
            set.set(reg);
        }
        set
    }

    /// Check if register is set.
    pub fn contains(&self, reg: AsmReg) -> bool {
        if reg.bank as usize >= MAX_REGISTER_BANKS || reg.id >= 64 {
            return false;
        }
        (self.banks[reg.bank as usize] & (1u64 << reg.id)) != 0
    }

    /// Set a register.
    pub fn set(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] |= 1u64 << reg.id;
        }
    }

    /// Clear a register.
    pub fn clear(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] &= !(1u64 << reg.id);
        }
    }

    /// Set union with another set.
    pub fn union(&mut self, other: &RegBitSet) {
        for i in 0..MAX_REGISTER_BANKS {
            self.banks[i] |= other.banks[i];
        }
    }

    /// Set intersection with another set.
    pub fn intersect(&mut self, other: &RegBitSet) {
        for i in 0..MAX_REGISTER_BANKS {
            self.banks[i] &= other.banks[i];
        }
    }

    /// Find first set register in the given bank, excluding specified registers.
    pub fn find_first_in_bank(&self, bank: RegBank, exclude: &RegBitSet) -> Option<RegId> {
        if bank as usize >= MAX_REGISTER_BANKS {
            return None;
        }

        let available = self.banks[bank as usize] & !exclude.banks[bank as usize];
        if available == 0 {
            return None;
        }

        Some(available.trailing_zeros() as RegId)
    }

    /// Count number of set registers in bank.
    pub fn count_in_bank(&self, bank: RegBank) -> u32 {
        if bank as usize >= MAX_REGISTER_BANKS {
            return 0;
        }
        self.banks[bank as usize].count_ones()
    }

    /// Registers of the set in ascending order.
    pub fn registers(&self) -> Vec<AsmReg> {
        let mut registers = Vec::new();
        for (bank, mask) in self.banks.iter().enumerate() {
            let mut rest = *mask;
            while rest != 0 {
                let id = rest.trailing_zeros() as RegId;
                registers.push(AsmReg::new(bank as RegBank, id));
                rest &= rest - 1;
            }
        }
        registers
    }

    /// Clear all registers.
    pub fn clear_all(&mut self) {
        self.banks.fill(0);
    }
}

impl Default for RegBitSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Error types for register allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegAllocError {
    /// No registers available in the requested bank.
    NoRegistersAvailable,
    /// Register is not allocated.
    RegisterNotAllocated,
    /// Invalid register bank or ID.
    InvalidRegister,
    /// Lock count underflow (too many unlocks).
    LockCountUnderflow,
}

impl std::fmt::Display for RegAllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegAllocError::NoRegistersAvailable => write!(f, "No registers available"),
            RegAllocError::RegisterNotAllocated => write!(f, "Register is not allocated"),
            RegAllocError::InvalidRegister => write!(f, "Invalid register"),
            RegAllocError::LockCountUnderflow => write!(f, "Register lock count underflow"),
        }
    }
}

impl std::error::Error for RegAllocError {}

/// Snapshot of which result owns each register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupancy {
    used: RegBitSet,
    assignments: Vec<Option<ResultId>>,
}

impl Occupancy {
    /// Occupied registers paired with their owners.
    pub fn occupants(&self, regs_per_bank: usize) -> Vec<(AsmReg, ResultId)> {
        self.assignments
            .iter()
            .enumerate()
            .filter_map(|(i, owner)| owner.map(|o| (AsmReg::from_linear_index(i, regs_per_bank), o)))
            .collect()
    }
}

/// RegisterFile manages register allocation for a single function.
///
/// Registers are split into volatile (caller-saved) and non-volatile
/// (callee-saved) classes; registers outside `allocatable` are reserved
/// (stack pointer, frame pointer, scratch).
#[derive(Debug, Clone)]
pub struct RegisterFile {
    /// Number of registers per bank (must be ≤ 64).
    regs_per_bank: usize,
    /// Total number of registers across all banks.
    total_regs: usize,

    /// Registers available for allocation.
    allocatable: RegBitSet,
    /// Registers a call may clobber.
    volatile: RegBitSet,
    /// Currently allocated registers.
    used: RegBitSet,
    /// Registers that cannot be evicted (locked or fixed).
    fixed: RegBitSet,
    /// Registers that have ever been written in this function.
    clobbered: RegBitSet,

    /// Clock position for eviction in each bank.
    clocks: [RegId; MAX_REGISTER_BANKS],
    /// Which result owns each register.
    assignments: Vec<Option<ResultId>>,
    /// Lock count for each register (prevents eviction).
    lock_counts: Vec<u8>,
}

impl RegisterFile {
    /// Create a new register file with the given configuration.
    ///
    /// # Arguments
    /// * `regs_per_bank` - Number of registers per bank (max 64)
    /// * `num_banks` - Number of register banks (max 4)
    /// * `allocatable_regs` - Which registers are available for allocation
    /// * `volatile_regs` - Which registers calls clobber
    pub fn new(
        regs_per_bank: usize,
        num_banks: usize,
        allocatable_regs: RegBitSet,
        volatile_regs: RegBitSet,
    ) -> Self {
        assert!(regs_per_bank <= 64, "Too many registers per bank");
        assert!(num_banks <= MAX_REGISTER_BANKS, "Too many register banks");

        let total_regs = regs_per_bank * num_banks;

        Self {
            regs_per_bank,
            total_regs,
            allocatable: allocatable_regs,
            volatile: volatile_regs,
            used: RegBitSet::new(),
            fixed: RegBitSet::new(),
            clobbered: RegBitSet::new(),
            clocks: [0; MAX_REGISTER_BANKS],
            assignments: vec![None; total_regs],
            lock_counts: vec![0; total_regs],
        }
    }

    pub fn regs_per_bank(&self) -> usize {
        self.regs_per_bank
    }

    /// Find a free register, volatile registers first.
    pub fn find_free(&self, bank: RegBank, exclude: &RegBitSet) -> Option<AsmReg> {
        self.find_free_in_class(bank, true, exclude)
            .or_else(|| self.find_free_in_class(bank, false, exclude))
    }

    /// Find a free register of one class only.
    pub fn find_free_in_class(
        &self,
        bank: RegBank,
        volatile: bool,
        exclude: &RegBitSet,
    ) -> Option<AsmReg> {
        let mut free_regs = self.allocatable.clone();
        free_regs.intersect(&RegBitSet::all_in_bank(bank, self.regs_per_bank as u8));

        if volatile {
            free_regs.intersect(&self.volatile);
        } else {
            for i in 0..MAX_REGISTER_BANKS {
                free_regs.banks[i] &= !self.volatile.banks[i];
            }
        }

        let mut unavailable = self.used.clone();
        unavailable.union(exclude);

        free_regs
            .find_first_in_bank(bank, &unavailable)
            .map(|id| AsmReg::new(bank, id))
    }

    /// Find evictable register using clock algorithm.
    pub fn find_clocked_evictable(&mut self, bank: RegBank, exclude: &RegBitSet) -> Option<AsmReg> {
        if bank as usize >= MAX_REGISTER_BANKS {
            return None;
        }

        for _ in 0..self.regs_per_bank {
            let reg = AsmReg::new(bank, self.clocks[bank as usize]);

            // Advance clock for next allocation
            self.clocks[bank as usize] =
                (self.clocks[bank as usize] + 1) % (self.regs_per_bank as RegId);

            if self.allocatable.contains(reg)
                && self.used.contains(reg)
                && !self.fixed.contains(reg)
                && !exclude.contains(reg)
            {
                return Some(reg);
            }
        }

        None
    }

    /// Assign a register to a result, replacing any previous owner.
    pub fn assign_register(&mut self, reg: AsmReg, owner: ResultId) -> Result<(), RegAllocError> {
        let linear_idx = reg.linear_index(self.regs_per_bank);
        if linear_idx >= self.total_regs {
            return Err(RegAllocError::InvalidRegister);
        }

        self.used.set(reg);
        self.clobbered.set(reg);
        self.assignments[linear_idx] = Some(owner);
        Ok(())
    }

    /// Free a register without spilling.
    pub fn free_register(&mut self, reg: AsmReg) -> Result<(), RegAllocError> {
        let linear_idx = reg.linear_index(self.regs_per_bank);
        if linear_idx >= self.total_regs {
            return Err(RegAllocError::InvalidRegister);
        }

        if !self.used.contains(reg) {
            return Err(RegAllocError::RegisterNotAllocated);
        }

        self.used.clear(reg);
        self.fixed.clear(reg);
        self.assignments[linear_idx] = None;
        self.lock_counts[linear_idx] = 0;
        Ok(())
    }

    /// Lock a register to prevent eviction.
    pub fn lock_register(&mut self, reg: AsmReg) -> Result<(), RegAllocError> {
        let linear_idx = reg.linear_index(self.regs_per_bank);
        if linear_idx >= self.total_regs {
            return Err(RegAllocError::InvalidRegister);
        }

        if !self.used.contains(reg) {
            return Err(RegAllocError::RegisterNotAllocated);
        }

        self.lock_counts[linear_idx] += 1;
        self.fixed.set(reg);
        Ok(())
    }

    /// Unlock a register, allowing eviction when lock count reaches zero.
    pub fn unlock_register(&mut self, reg: AsmReg) -> Result<(), RegAllocError> {
        let linear_idx = reg.linear_index(self.regs_per_bank);
        if linear_idx >= self.total_regs {
            return Err(RegAllocError::InvalidRegister);
        }

        if self.lock_counts[linear_idx] == 0 {
            return Err(RegAllocError::LockCountUnderflow);
        }

        self.lock_counts[linear_idx] -= 1;
        if self.lock_counts[linear_idx] == 0 {
            self.fixed.clear(reg);
        }
        Ok(())
    }

    /// Release every lock.
    pub fn unlock_all(&mut self) {
        self.fixed.clear_all();
        self.lock_counts.fill(0);
    }

    /// Mark a register as written without changing its owner.
    pub fn mark_clobbered(&mut self, reg: AsmReg) {
        self.clobbered.set(reg);
    }

    /// Get the owner of a register.
    pub fn get_assignment(&self, reg: AsmReg) -> Option<ResultId> {
        let linear_idx = reg.linear_index(self.regs_per_bank);
        if linear_idx < self.total_regs {
            self.assignments[linear_idx]
        } else {
            None
        }
    }

    /// Check if register is currently allocated.
    pub fn is_allocated(&self, reg: AsmReg) -> bool {
        self.used.contains(reg)
    }

    /// Check if register is locked.
    pub fn is_locked(&self, reg: AsmReg) -> bool {
        self.fixed.contains(reg)
    }

    /// Check if register has been written in this function.
    pub fn is_clobbered(&self, reg: AsmReg) -> bool {
        self.clobbered.contains(reg)
    }

    pub fn is_volatile(&self, reg: AsmReg) -> bool {
        self.volatile.contains(reg)
    }

    pub fn is_allocatable(&self, reg: AsmReg) -> bool {
        self.allocatable.contains(reg)
    }

    /// Get register usage statistics for a bank.
    pub fn bank_usage(&self, bank: RegBank) -> (u32, u32, u32) {
        let total = self.allocatable.count_in_bank(bank);
        let used = self.used.count_in_bank(bank);
        let fixed = self.fixed.count_in_bank(bank);
        (used, fixed, total)
    }

    /// Occupied registers with their owners.
    pub fn occupants(&self) -> Vec<(AsmReg, ResultId)> {
        self.occupancy().occupants(self.regs_per_bank)
    }

    /// Capture the current ownership.
    pub fn occupancy(&self) -> Occupancy {
        Occupancy {
            used: self.used.clone(),
            assignments: self.assignments.clone(),
        }
    }

    /// Return to a captured ownership. Locks are dropped.
    pub fn restore(&mut self, occupancy: &Occupancy) {
        self.used = occupancy.used.clone();
        self.assignments = occupancy.assignments.clone();
        self.unlock_all();
    }

    /// Reset register file for new function.
    pub fn reset(&mut self) {
        self.used.clear_all();
        self.fixed.clear_all();
        self.clobbered.clear_all();
        self.clocks.fill(0);
        self.assignments.fill(None);
        self.lock_counts.fill(0);
    }

    /// Find a register currently assigned to the given result.
    pub fn find_register_for_value(&self, owner: ResultId) -> Option<AsmReg> {
        for (i, assignment) in self.assignments.iter().enumerate() {
            if *assignment == Some(owner) {
                return Some(AsmReg::from_linear_index(i, self.regs_per_bank));
            }
        }
        None
    }
}
