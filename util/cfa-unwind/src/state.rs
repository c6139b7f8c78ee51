//! Register-state stack used while evaluating CFA programs.
//!
//! Rules are kept in a fixed array of entries linked by 8-bit indices, so a
//! [`CfaState`] needs no allocation and can live on the stack of a signal
//! handler or inside an [`AsyncBox`](async_alloc::AsyncBox). Each snapshot
//! hashes register numbers into [`BUCKET_COUNT`] chains; all snapshots share
//! one free list of entries.

use core::fmt;

use async_alloc::AsyncAllocatable;

use crate::{
    config::{BUCKET_COUNT, MAX_REGISTERS, MAX_STATES},
    error::{CfaError, Result},
};

/// How a register's value in the calling frame is recovered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterRule {
    /// Saved at `CFA + value`.
    Offset = 0,
    /// The value is `CFA + value`.
    ValOffset,
    /// Held in the register numbered `value`.
    Register,
    /// Saved at the address computed by the DWARF block at `value`.
    Expression,
    /// The value is computed by the DWARF block at `value`.
    ValExpression,
    /// Unchanged from the current frame.
    SameValue,
}

/// How the canonical frame address is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfaRule {
    /// No rule has been defined.
    Undefined,
    /// `register + offset`, offset unsigned.
    Register { regnum: u32, offset: u64 },
    /// `register + offset`, offset signed.
    RegisterSigned { regnum: u32, offset: i64 },
    /// Result of the `length` expression bytes at `address`.
    Expression { address: u64, length: u64 },
}

impl CfaRule {
    /// Register the rule is based on, if any.
    pub const fn regnum(&self) -> Option<u32> {
        match *self {
            Self::Register { regnum, .. } | Self::RegisterSigned { regnum, .. } => Some(regnum),
            _ => None,
        }
    }
}

const INVALID: u8 = u8::MAX;

const _: () = assert!(MAX_REGISTERS < INVALID as usize);

#[derive(Clone, Copy)]
struct Entry {
    regnum: u32,
    rule: RegisterRule,
    value: i64,
    next: u8,
}

impl Entry {
    const EMPTY: Self = Self {
        regnum: 0,
        rule: RegisterRule::SameValue,
        value: 0,
        next: INVALID,
    };
}

#[derive(Clone, Copy)]
struct Snapshot {
    buckets: [u8; BUCKET_COUNT],
    cfa: CfaRule,
    count: u8,
}

impl Snapshot {
    const EMPTY: Self = Self {
        buckets: [INVALID; BUCKET_COUNT],
        cfa: CfaRule::Undefined,
        count: 0,
    };
}

/// Register rules for one CFA evaluation, with a bounded stack of saved
/// snapshots for `DW_CFA_remember_state` / `DW_CFA_restore_state`.
#[derive(Clone)]
pub struct CfaState {
    entries: [Entry; MAX_REGISTERS],
    free: u8,
    snapshots: [Snapshot; MAX_STATES],
    depth: usize,
}

impl AsyncAllocatable for CfaState {}

impl Default for CfaState {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
const fn bucket_of(regnum: u32) -> usize {
    regnum as usize % BUCKET_COUNT
}

impl CfaState {
    /// Creates a state with no rules and an undefined CFA.
    pub const fn new() -> Self {
        let mut entries = [Entry::EMPTY; MAX_REGISTERS];
        let mut i = 0;
        while i + 1 < MAX_REGISTERS {
            entries[i].next = (i + 1) as u8;
            i += 1;
        }
        Self {
            entries,
            free: 0,
            snapshots: [Snapshot::EMPTY; MAX_STATES],
            depth: 0,
        }
    }

    fn current(&self) -> &Snapshot {
        &self.snapshots[self.depth]
    }

    fn current_mut(&mut self) -> &mut Snapshot {
        &mut self.snapshots[self.depth]
    }

    fn find(&self, regnum: u32) -> Option<usize> {
        let mut idx = self.current().buckets[bucket_of(regnum)];
        while idx != INVALID {
            let entry = &self.entries[idx as usize];
            if entry.regnum == regnum {
                return Some(idx as usize);
            }
            idx = entry.next;
        }
        None
    }

    /// Inserts or replaces the rule for `regnum` in the current snapshot.
    ///
    /// Fails with [`CfaError::RegisterLimit`] once every entry is in use.
    pub fn set_register(&mut self, regnum: u32, rule: RegisterRule, value: i64) -> Result<()> {
        if let Some(idx) = self.find(regnum) {
            let entry = &mut self.entries[idx];
            entry.rule = rule;
            entry.value = value;
            return Ok(());
        }

        if self.free == INVALID {
            log::debug!("no free entry for register {}", regnum);
            return Err(CfaError::RegisterLimit);
        }
        let idx = self.free;
        let bucket = bucket_of(regnum);
        let head = self.current().buckets[bucket];
        let entry = &mut self.entries[idx as usize];
        self.free = entry.next;
        *entry = Entry {
            regnum,
            rule,
            value,
            next: head,
        };
        let snapshot = self.current_mut();
        snapshot.buckets[bucket] = idx;
        snapshot.count += 1;
        Ok(())
    }

    /// Returns the rule and value recorded for `regnum`.
    pub fn get_register_rule(&self, regnum: u32) -> Option<(RegisterRule, i64)> {
        self.find(regnum).map(|idx| {
            let entry = &self.entries[idx];
            (entry.rule, entry.value)
        })
    }

    /// Drops the rule for `regnum`, returning whether one existed.
    pub fn remove_register(&mut self, regnum: u32) -> bool {
        let bucket = bucket_of(regnum);
        let mut prev = INVALID;
        let mut idx = self.current().buckets[bucket];
        while idx != INVALID {
            let next = self.entries[idx as usize].next;
            if self.entries[idx as usize].regnum == regnum {
                if prev == INVALID {
                    self.current_mut().buckets[bucket] = next;
                } else {
                    self.entries[prev as usize].next = next;
                }
                self.entries[idx as usize].next = self.free;
                self.free = idx;
                self.current_mut().count -= 1;
                return true;
            }
            prev = idx;
            idx = next;
        }
        false
    }

    /// Number of registers with a rule in the current snapshot.
    pub fn register_count(&self) -> usize {
        self.current().count as usize
    }

    /// Sets the CFA to `regnum + offset`, offset unsigned.
    pub fn set_cfa_register(&mut self, regnum: u32, offset: u64) {
        self.current_mut().cfa = CfaRule::Register { regnum, offset };
    }

    /// Sets the CFA to `regnum + offset`, offset signed.
    pub fn set_cfa_register_signed(&mut self, regnum: u32, offset: i64) {
        self.current_mut().cfa = CfaRule::RegisterSigned { regnum, offset };
    }

    /// Sets the CFA to the result of the expression bytes at `address`.
    pub fn set_cfa_expression(&mut self, address: u64, length: u64) {
        self.current_mut().cfa = CfaRule::Expression { address, length };
    }

    /// Replaces the CFA rule of the current snapshot.
    pub fn set_cfa_rule(&mut self, rule: CfaRule) {
        self.current_mut().cfa = rule;
    }

    /// CFA rule of the current snapshot.
    pub fn cfa_rule(&self) -> CfaRule {
        self.current().cfa
    }

    /// Number of snapshots saved below the current one.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Starts a new, empty snapshot above the current one.
    ///
    /// Nothing is copied; the saved snapshot becomes current again on
    /// [`pop_state`](Self::pop_state).
    pub fn push_state(&mut self) -> Result<()> {
        if self.depth + 1 >= MAX_STATES {
            return Err(CfaError::StateOverflow);
        }
        self.depth += 1;
        *self.current_mut() = Snapshot::EMPTY;
        Ok(())
    }

    /// Discards the current snapshot and returns to the one below it.
    ///
    /// Entries of the discarded snapshot go back to the free list.
    pub fn pop_state(&mut self) -> Result<()> {
        if self.depth == 0 {
            return Err(CfaError::StateUnderflow);
        }
        for bucket in 0..BUCKET_COUNT {
            let mut idx = self.current().buckets[bucket];
            while idx != INVALID {
                let next = self.entries[idx as usize].next;
                self.entries[idx as usize].next = self.free;
                self.free = idx;
                idx = next;
            }
        }
        *self.current_mut() = Snapshot::EMPTY;
        self.depth -= 1;
        Ok(())
    }

    /// Drops every rule and saved snapshot without moving the state.
    pub fn reset(&mut self) {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            *entry = Entry::EMPTY;
            if i + 1 < MAX_REGISTERS {
                entry.next = (i + 1) as u8;
            }
        }
        self.free = 0;
        self.snapshots.fill(Snapshot::EMPTY);
        self.depth = 0;
    }

    /// Replaces `dest` with the current snapshot's rules and CFA rule.
    pub fn snapshot_into(&self, dest: &mut CfaState) -> Result<()> {
        dest.reset();
        for (regnum, rule, value) in self.iter() {
            dest.set_register(regnum, rule, value)?;
        }
        dest.set_cfa_rule(self.cfa_rule());
        Ok(())
    }

    /// Iterates over `(regnum, rule, value)` of the current snapshot.
    ///
    /// The order is bucket by bucket, then chain order within a bucket.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            state: self,
            bucket: 0,
            idx: INVALID,
        }
    }
}

impl fmt::Debug for CfaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CfaState")
            .field("depth", &self.depth)
            .field("cfa", &self.cfa_rule())
            .field("registers", &DebugRules(self))
            .finish()
    }
}

struct DebugRules<'a>(&'a CfaState);

impl fmt::Debug for DebugRules<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(regnum, rule, value)| (regnum, (rule, value))))
            .finish()
    }
}

/// Iterator returned by [`CfaState::iter`].
pub struct Iter<'a> {
    state: &'a CfaState,
    bucket: usize,
    idx: u8,
}

impl Iterator for Iter<'_> {
    type Item = (u32, RegisterRule, i64);

    fn next(&mut self) -> Option<Self::Item> {
        while self.idx == INVALID {
            if self.bucket >= BUCKET_COUNT {
                return None;
            }
            self.idx = self.state.current().buckets[self.bucket];
            self.bucket += 1;
        }
        let entry = &self.state.entries[self.idx as usize];
        self.idx = entry.next;
        Some((entry.regnum, entry.rule, entry.value))
    }
}

impl<'a> IntoIterator for &'a CfaState {
    type Item = (u32, RegisterRule, i64);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_entries(state: &CfaState) -> usize {
        let mut count = 0;
        let mut idx = state.free;
        while idx != INVALID {
            count += 1;
            idx = state.entries[idx as usize].next;
        }
        count
    }

    #[test]
    fn test_set_get_remove() {
        let mut state = CfaState::new();
        state.set_register(6, RegisterRule::Offset, -16).unwrap();
        assert_eq!(state.get_register_rule(6), Some((RegisterRule::Offset, -16)));

        state.set_register(6, RegisterRule::ValOffset, 8).unwrap();
        assert_eq!(state.get_register_rule(6), Some((RegisterRule::ValOffset, 8)));
        assert_eq!(state.register_count(), 1);

        assert!(state.remove_register(6));
        assert_eq!(state.get_register_rule(6), None);
        assert!(!state.remove_register(6));
        assert_eq!(state.register_count(), 0);
        assert_eq!(free_entries(&state), MAX_REGISTERS);
    }

    #[test]
    fn test_bucket_collisions() {
        let mut state = CfaState::new();
        let regs = [3u32, 3 + BUCKET_COUNT as u32, 3 + 2 * BUCKET_COUNT as u32];
        for (i, &reg) in regs.iter().enumerate() {
            state.set_register(reg, RegisterRule::Offset, i as i64).unwrap();
        }
        assert!(state.remove_register(regs[1]));
        assert_eq!(state.get_register_rule(regs[0]), Some((RegisterRule::Offset, 0)));
        assert_eq!(state.get_register_rule(regs[1]), None);
        assert_eq!(state.get_register_rule(regs[2]), Some((RegisterRule::Offset, 2)));
        assert_eq!(state.iter().count(), 2);
    }

    #[test]
    fn test_register_limit() {
        let mut state = CfaState::new();
        for reg in 0..MAX_REGISTERS as u32 {
            state.set_register(reg, RegisterRule::SameValue, 0).unwrap();
        }
        assert_eq!(
            state.set_register(1000, RegisterRule::SameValue, 0),
            Err(CfaError::RegisterLimit)
        );
        // Updating an existing rule needs no new entry.
        state.set_register(5, RegisterRule::Offset, 4).unwrap();
        assert_eq!(state.register_count(), MAX_REGISTERS);
    }

    #[test]
    fn test_iter_yields_each_once() {
        let mut state = CfaState::new();
        for reg in [0u32, 14, 7, 31, 100] {
            state.set_register(reg, RegisterRule::Register, reg as i64 + 1).unwrap();
        }
        let mut seen: Vec<_> = state.iter().map(|(reg, _, value)| (reg, value)).collect();
        seen.sort_unstable();
        assert_eq!(seen, [(0, 1), (7, 8), (14, 15), (31, 32), (100, 101)]);
    }

    #[test]
    fn test_cfa_rules() {
        let mut state = CfaState::new();
        assert_eq!(state.cfa_rule(), CfaRule::Undefined);
        state.set_cfa_register(7, 16);
        assert_eq!(state.cfa_rule(), CfaRule::Register { regnum: 7, offset: 16 });
        assert_eq!(state.cfa_rule().regnum(), Some(7));
        state.set_cfa_register_signed(6, -8);
        assert_eq!(state.cfa_rule(), CfaRule::RegisterSigned { regnum: 6, offset: -8 });
        state.set_cfa_expression(0x400, 3);
        assert_eq!(state.cfa_rule(), CfaRule::Expression { address: 0x400, length: 3 });
        assert_eq!(state.cfa_rule().regnum(), None);
    }

    #[test]
    fn test_push_pop_is_transparent() {
        let mut state = CfaState::new();
        state.set_register(6, RegisterRule::Offset, -16).unwrap();
        state.set_cfa_register(7, 16);

        state.push_state().unwrap();
        assert_eq!(state.depth(), 1);
        assert_eq!(state.get_register_rule(6), None);
        assert_eq!(state.cfa_rule(), CfaRule::Undefined);
        state.set_register(6, RegisterRule::SameValue, 0).unwrap();
        state.set_register(3, RegisterRule::Offset, -24).unwrap();
        state.set_cfa_register(6, 32);

        state.pop_state().unwrap();
        assert_eq!(state.depth(), 0);
        assert_eq!(state.get_register_rule(6), Some((RegisterRule::Offset, -16)));
        assert_eq!(state.get_register_rule(3), None);
        assert_eq!(state.cfa_rule(), CfaRule::Register { regnum: 7, offset: 16 });
        assert_eq!(free_entries(&state), MAX_REGISTERS - 1);
    }

    #[test]
    fn test_push_pop_bounds() {
        let mut state = CfaState::new();
        assert_eq!(state.pop_state(), Err(CfaError::StateUnderflow));
        for _ in 1..MAX_STATES {
            state.push_state().unwrap();
        }
        assert_eq!(state.push_state(), Err(CfaError::StateOverflow));
        for _ in 1..MAX_STATES {
            state.pop_state().unwrap();
        }
        assert_eq!(state.depth(), 0);
    }

    #[test]
    fn test_repeated_push_pop_does_not_leak() {
        let mut state = CfaState::new();
        for round in 0..1000 {
            state.push_state().unwrap();
            for reg in 0..10 {
                state.set_register(reg, RegisterRule::Offset, round).unwrap();
            }
            state.pop_state().unwrap();
        }
        assert_eq!(free_entries(&state), MAX_REGISTERS);
    }

    #[test]
    fn test_snapshot_copies_current_row() {
        let mut state = CfaState::new();
        state.set_register(16, RegisterRule::Offset, -8).unwrap();
        state.set_cfa_register(7, 8);
        state.push_state().unwrap();
        state.set_register(3, RegisterRule::SameValue, 0).unwrap();

        let mut copy = CfaState::new();
        copy.set_register(40, RegisterRule::Offset, 8).unwrap();
        copy.push_state().unwrap();
        state.snapshot_into(&mut copy).unwrap();
        assert_eq!(copy.depth(), 0);
        assert_eq!(copy.register_count(), 1);
        assert_eq!(copy.get_register_rule(3), Some((RegisterRule::SameValue, 0)));
        assert_eq!(copy.get_register_rule(16), None);
        assert_eq!(copy.get_register_rule(40), None);
        assert_eq!(copy.cfa_rule(), CfaRule::Undefined);
        assert_eq!(free_entries(&copy), MAX_REGISTERS - 1);
    }

    #[test]
    fn test_reset() {
        let mut state = CfaState::new();
        for reg in 0..MAX_REGISTERS as u32 {
            state.set_register(reg, RegisterRule::Offset, 8).unwrap();
        }
        state.set_cfa_register(7, 8);
        state.push_state().unwrap();

        state.reset();
        assert_eq!(state.depth(), 0);
        assert_eq!(state.register_count(), 0);
        assert_eq!(state.cfa_rule(), CfaRule::Undefined);
        assert_eq!(free_entries(&state), MAX_REGISTERS);
    }
}
