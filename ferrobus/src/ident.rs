//! Real and expected identification: the API → slot → subslot inventory,
//! plug/pull mutation, ownership, and the real-vs-expected diff reported in
//! the connect response.

use crate::error::{StackError, StackResult};
use crate::limits::{MAX_API, MAX_SLOTS, MAX_SUBSLOTS};
use crate::types::Arep;

/// Data direction of a plugged submodule. Stable once plugged; changing it
/// requires pull then plug.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SubmoduleDir {
    NoIo,
    Input,
    Output,
    InputOutput,
}

impl SubmoduleDir {
    #[inline]
    pub fn has_input(&self) -> bool {
        matches!(self, SubmoduleDir::Input | SubmoduleDir::InputOutput)
    }

    #[inline]
    pub fn has_output(&self) -> bool {
        matches!(self, SubmoduleDir::Output | SubmoduleDir::InputOutput)
    }
}

/// Ownership of a subslot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OwnerState {
    Free,
    SuperordinateLocked,
    OwnedBySupervisor,
    OwnedByController,
}

/// Severity summary of a subslot's diagnosis list, recomputed on every
/// modification.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct DiagSummary {
    pub maintenance_required: bool,
    pub maintenance_demanded: bool,
    pub fault: bool,
}

#[derive(Debug, PartialEq)]
pub struct Subslot {
    pub subslot_nr: u16,
    pub ident: u32,
    pub dir: SubmoduleDir,
    pub input_len: u16,
    pub output_len: u16,
    pub owner: Option<Arep>,
    pub ownsm: OwnerState,
    /// Head of the diagnosis list: an arena index into the diagnosis store.
    pub diag_head: Option<usize>,
    pub summary: DiagSummary,
}

#[derive(Debug)]
pub struct Slot {
    pub slot_nr: u16,
    pub module_ident: u32,
    pub subslots: Vec<Subslot>,
}

#[derive(Debug)]
pub struct Api {
    pub api: u32,
    pub slots: Vec<Slot>,
}

pub struct IdentTree {
    pub apis: Vec<Api>,
}

impl IdentTree {
    pub fn new() -> IdentTree {
        IdentTree { apis: Vec::new() }
    }

    fn api_mut(&mut self, api: u32) -> Option<&mut Api> {
        self.apis.iter_mut().find(|entry| entry.api == api)
    }

    pub fn api(&self, api: u32) -> Option<&Api> {
        self.apis.iter().find(|entry| entry.api == api)
    }

    pub fn slot(&self, api: u32, slot_nr: u16) -> Option<&Slot> {
        self.api(api)?.slots.iter().find(|s| s.slot_nr == slot_nr)
    }

    pub fn slot_mut(&mut self, api: u32, slot_nr: u16) -> Option<&mut Slot> {
        self.api_mut(api)?
            .slots
            .iter_mut()
            .find(|s| s.slot_nr == slot_nr)
    }

    pub fn subslot(&self, api: u32, slot_nr: u16, subslot_nr: u16) -> Option<&Subslot> {
        self.slot(api, slot_nr)?
            .subslots
            .iter()
            .find(|s| s.subslot_nr == subslot_nr)
    }

    pub fn subslot_mut(
        &mut self,
        api: u32,
        slot_nr: u16,
        subslot_nr: u16,
    ) -> Option<&mut Subslot> {
        self.slot_mut(api, slot_nr)?
            .subslots
            .iter_mut()
            .find(|s| s.subslot_nr == subslot_nr)
    }

    /// Add a module to a slot. The API is created on first use.
    pub fn plug_module(&mut self, api: u32, slot_nr: u16, module_ident: u32) -> StackResult<()> {
        if (slot_nr as usize) >= MAX_SLOTS {
            return Err(StackError::InvalidArgument);
        }

        if self.api(api).is_none() {
            if self.apis.len() >= MAX_API {
                return Err(StackError::OutOfResources);
            }
            self.apis.push(Api {
                api,
                slots: Vec::new(),
            });
        }

        let entry = self.api_mut(api).expect("api just ensured");

        if entry.slots.iter().any(|s| s.slot_nr == slot_nr) {
            return Err(StackError::AlreadyExists);
        }
        if entry.slots.len() >= MAX_SLOTS {
            return Err(StackError::OutOfResources);
        }

        entry.slots.push(Slot {
            slot_nr,
            module_ident,
            subslots: Vec::new(),
        });

        Ok(())
    }

    /// Add a submodule to a plugged module. The I/O sizes must be
    /// consistent with the direction.
    pub fn plug_submodule(
        &mut self,
        api: u32,
        slot_nr: u16,
        subslot_nr: u16,
        ident: u32,
        dir: SubmoduleDir,
        input_len: u16,
        output_len: u16,
    ) -> StackResult<()> {
        let input_ok = dir.has_input() || input_len == 0;
        let output_ok = dir.has_output() || output_len == 0;
        if !input_ok || !output_ok {
            return Err(StackError::InvalidArgument);
        }

        let slot = self
            .slot_mut(api, slot_nr)
            .ok_or(StackError::NotFound)?;

        if slot.subslots.iter().any(|s| s.subslot_nr == subslot_nr) {
            return Err(StackError::AlreadyExists);
        }
        if slot.subslots.len() >= MAX_SUBSLOTS {
            return Err(StackError::OutOfResources);
        }

        slot.subslots.push(Subslot {
            subslot_nr,
            ident,
            dir,
            input_len,
            output_len,
            owner: None,
            ownsm: OwnerState::Free,
            diag_head: None,
            summary: DiagSummary::default(),
        });

        Ok(())
    }

    /// Remove a submodule, returning it so the caller can release its
    /// diagnosis chain.
    pub fn pull_submodule(
        &mut self,
        api: u32,
        slot_nr: u16,
        subslot_nr: u16,
    ) -> StackResult<Subslot> {
        let slot = self.slot_mut(api, slot_nr).ok_or(StackError::NotFound)?;
        let position = slot
            .subslots
            .iter()
            .position(|s| s.subslot_nr == subslot_nr)
            .ok_or(StackError::NotFound)?;

        Ok(slot.subslots.remove(position))
    }

    /// Remove a module. Every submodule must have been pulled first.
    pub fn pull_module(&mut self, api: u32, slot_nr: u16) -> StackResult<()> {
        let entry = self.api_mut(api).ok_or(StackError::NotFound)?;
        let position = entry
            .slots
            .iter()
            .position(|s| s.slot_nr == slot_nr)
            .ok_or(StackError::NotFound)?;

        if !entry.slots[position].subslots.is_empty() {
            return Err(StackError::WrongState);
        }

        entry.slots.remove(position);
        Ok(())
    }

    /// Release every subslot owned by the AR.
    pub fn release_owner(&mut self, arep: Arep) {
        for api in self.apis.iter_mut() {
            for slot in api.slots.iter_mut() {
                for sub in slot.subslots.iter_mut() {
                    if sub.owner == Some(arep) {
                        sub.owner = None;
                        sub.ownsm = OwnerState::Free;
                    }
                }
            }
        }
    }

    /// Visit every plugged subslot.
    pub fn for_each_subslot<F: FnMut(u32, u16, &Subslot)>(&self, mut visit: F) {
        for api in &self.apis {
            for slot in &api.slots {
                for sub in &slot.subslots {
                    visit(api.api, slot.slot_nr, sub);
                }
            }
        }
    }
}

/* Expected identification, as declared by the controller in the connect. */

#[derive(Debug, Clone)]
pub struct ExpDataDesc {
    /// 1 = input, 2 = output.
    pub direction: u16,
    pub length: u16,
}

#[derive(Debug, Clone)]
pub struct ExpSubmodule {
    pub subslot_nr: u16,
    pub ident: u32,
    pub properties: u16,
    pub data: Vec<ExpDataDesc>,
}

#[derive(Debug, Clone)]
pub struct ExpModule {
    pub slot_nr: u16,
    pub module_ident: u32,
    pub properties: u16,
    pub submodules: Vec<ExpSubmodule>,
}

#[derive(Debug, Clone)]
pub struct ExpApi {
    pub api: u32,
    pub modules: Vec<ExpModule>,
}

#[derive(Debug, Clone, Default)]
pub struct ExpectedIdent {
    pub apis: Vec<ExpApi>,
}

/// Module state in the identification diff.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ModuleState {
    NoModule = 0,
    WrongModule = 1,
    ProperModule = 2,
    Substitute = 3,
}

/// Submodule identity comparison result.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IdentInfo {
    Ok = 0,
    Substitute = 1,
    Wrong = 2,
    None = 3,
}

/// Submodule ownership as seen by the connecting AR.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ArInfo {
    Own = 0,
    ApplicationReadyPending = 1,
    SuperordinatedLocked = 2,
    LockedByIoController = 3,
    LockedByIoSupervisor = 4,
}

#[derive(Debug)]
pub struct SubmoduleDiff {
    pub subslot_nr: u16,
    pub ident: u32,
    pub ident_info: IdentInfo,
    pub ar_info: ArInfo,
}

#[derive(Debug)]
pub struct ModuleDiff {
    pub slot_nr: u16,
    pub module_ident: u32,
    pub module_state: ModuleState,
    pub submodules: Vec<SubmoduleDiff>,
}

#[derive(Debug)]
pub struct ApiDiff {
    pub api: u32,
    pub modules: Vec<ModuleDiff>,
}

/// Walk the (real, expected) pairs and produce the per-module and
/// per-submodule differences. The connection proceeds even with
/// mismatches; substitutions are honoured but flagged.
pub fn module_diff(real: &IdentTree, expected: &ExpectedIdent, owner: Arep) -> Vec<ApiDiff> {
    let mut out = Vec::new();

    for exp_api in &expected.apis {
        let mut modules = Vec::new();

        for exp_module in &exp_api.modules {
            let real_slot = real.slot(exp_api.api, exp_module.slot_nr);

            let (module_ident, module_state) = match real_slot {
                None => (0, ModuleState::NoModule),
                Some(slot) if slot.module_ident == exp_module.module_ident => {
                    (slot.module_ident, ModuleState::ProperModule)
                }
                Some(slot) => (slot.module_ident, ModuleState::WrongModule),
            };

            let mut submodules = Vec::new();

            for exp_sub in &exp_module.submodules {
                let real_sub = real_slot
                    .and_then(|slot| slot.subslots.iter().find(|s| s.subslot_nr == exp_sub.subslot_nr));

                let (ident, ident_info) = match real_sub {
                    None => (0, IdentInfo::None),
                    Some(sub) if sub.ident == exp_sub.ident => (sub.ident, IdentInfo::Ok),
                    Some(sub) => (sub.ident, IdentInfo::Wrong),
                };

                let ar_info = match real_sub {
                    None => ArInfo::ApplicationReadyPending,
                    Some(sub) => match (sub.owner, sub.ownsm) {
                        (Some(holder), _) if holder == owner => ArInfo::ApplicationReadyPending,
                        (None, _) => ArInfo::ApplicationReadyPending,
                        (_, OwnerState::SuperordinateLocked) => ArInfo::SuperordinatedLocked,
                        (_, OwnerState::OwnedBySupervisor) => ArInfo::LockedByIoSupervisor,
                        _ => ArInfo::LockedByIoController,
                    },
                };

                submodules.push(SubmoduleDiff {
                    subslot_nr: exp_sub.subslot_nr,
                    ident,
                    ident_info,
                    ar_info,
                });
            }

            modules.push(ModuleDiff {
                slot_nr: exp_module.slot_nr,
                module_ident,
                module_state,
                submodules,
            });
        }

        out.push(ApiDiff {
            api: exp_api.api,
            modules,
        });
    }

    out
}

/// Take ownership of every expected submodule that is plugged and free.
/// Returns false when some submodule is held by another AR.
pub fn claim_ownership(real: &mut IdentTree, expected: &ExpectedIdent, owner: Arep) -> bool {
    let mut all_claimed = true;

    for exp_api in &expected.apis {
        for exp_module in &exp_api.modules {
            for exp_sub in &exp_module.submodules {
                match real.subslot_mut(exp_api.api, exp_module.slot_nr, exp_sub.subslot_nr) {
                    Some(sub) => match sub.owner {
                        None => {
                            sub.owner = Some(owner);
                            sub.ownsm = OwnerState::OwnedByController;
                        }
                        Some(holder) if holder == owner => {}
                        Some(_) => all_claimed = false,
                    },
                    None => all_claimed = false,
                }
            }
        }
    }

    all_claimed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugged_tree() -> IdentTree {
        let mut tree = IdentTree::new();
        tree.plug_module(0, 0, 0x10).unwrap();
        tree.plug_submodule(0, 0, 0x0001, 0x11, SubmoduleDir::NoIo, 0, 0)
            .unwrap();
        tree.plug_module(0, 1, 0x20).unwrap();
        tree.plug_submodule(0, 1, 1, 0x21, SubmoduleDir::Input, 1, 0)
            .unwrap();
        tree
    }

    fn expectation(module_ident: u32, submodule_ident: u32) -> ExpectedIdent {
        ExpectedIdent {
            apis: vec![ExpApi {
                api: 0,
                modules: vec![ExpModule {
                    slot_nr: 1,
                    module_ident,
                    properties: 0,
                    submodules: vec![ExpSubmodule {
                        subslot_nr: 1,
                        ident: submodule_ident,
                        properties: 0,
                        data: vec![ExpDataDesc {
                            direction: 1,
                            length: 1,
                        }],
                    }],
                }],
            }],
        }
    }

    #[test]
    fn test_plug_pull_lifecycle() {
        let mut tree = plugged_tree();

        assert!(tree.subslot(0, 1, 1).is_some());

        // Re-plugging an occupied subslot is refused.
        assert_eq!(
            tree.plug_submodule(0, 1, 1, 0x99, SubmoduleDir::Input, 1, 0),
            Err(StackError::AlreadyExists)
        );

        // A module with plugged submodules cannot be pulled.
        assert_eq!(tree.pull_module(0, 1), Err(StackError::WrongState));

        tree.pull_submodule(0, 1, 1).unwrap();
        tree.pull_module(0, 1).unwrap();
        assert!(tree.slot(0, 1).is_none());

        // Double pull errors.
        assert_eq!(tree.pull_submodule(0, 1, 1), Err(StackError::NotFound));
    }

    #[test]
    fn test_direction_size_consistency() {
        let mut tree = plugged_tree();

        assert_eq!(
            tree.plug_submodule(0, 1, 2, 0x22, SubmoduleDir::Input, 1, 4),
            Err(StackError::InvalidArgument)
        );
        assert_eq!(
            tree.plug_submodule(0, 1, 2, 0x22, SubmoduleDir::NoIo, 1, 0),
            Err(StackError::InvalidArgument)
        );
    }

    #[test]
    fn test_slot_range_checked() {
        let mut tree = IdentTree::new();
        assert_eq!(
            tree.plug_module(0, MAX_SLOTS as u16, 0x10),
            Err(StackError::InvalidArgument)
        );
    }

    #[test]
    fn test_diff_proper_module() {
        let tree = plugged_tree();
        let diff = module_diff(&tree, &expectation(0x20, 0x21), 1);

        assert_eq!(diff.len(), 1);
        let module = &diff[0].modules[0];
        assert_eq!(module.module_state, ModuleState::ProperModule);
        assert_eq!(module.submodules[0].ident_info, IdentInfo::Ok);
        assert_eq!(
            module.submodules[0].ar_info,
            ArInfo::ApplicationReadyPending
        );
    }

    #[test]
    fn test_diff_wrong_and_missing() {
        let tree = plugged_tree();

        let diff = module_diff(&tree, &expectation(0x77, 0x21), 1);
        assert_eq!(diff[0].modules[0].module_state, ModuleState::WrongModule);

        let mut other = expectation(0x20, 0x21);
        other.apis[0].modules[0].slot_nr = 5;
        let diff = module_diff(&tree, &other, 1);
        assert_eq!(diff[0].modules[0].module_state, ModuleState::NoModule);
        assert_eq!(diff[0].modules[0].submodules[0].ident_info, IdentInfo::None);
    }

    #[test]
    fn test_ownership_claim_and_release() {
        let mut tree = plugged_tree();
        let expected = expectation(0x20, 0x21);

        assert!(claim_ownership(&mut tree, &expected, 1));
        assert_eq!(tree.subslot(0, 1, 1).unwrap().owner, Some(1));

        // A second AR cannot claim the same submodule.
        assert!(!claim_ownership(&mut tree, &expected, 2));
        let diff = module_diff(&tree, &expected, 2);
        assert_eq!(
            diff[0].modules[0].submodules[0].ar_info,
            ArInfo::LockedByIoController
        );

        tree.release_owner(1);
        assert_eq!(tree.subslot(0, 1, 1).unwrap().owner, None);
        assert!(claim_ownership(&mut tree, &expected, 2));
    }
}
