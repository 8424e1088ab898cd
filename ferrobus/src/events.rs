//! Application capability record: one value implementing the behaviours the
//! stack raises into user code. Every method has a success/no-op default,
//! so applications implement only what they care about. A returned error
//! aborts the affected AR.
//!
//! Handlers receive the stack itself, so calling back into the device
//! (`application_ready` from the PRMEND event, alarm acknowledgement from
//! `alarm_ind`) needs no extra plumbing.

use crate::alarm::AlarmNotification;
use crate::device::Stack;
use crate::error::{PnioStatus, StackError};
use crate::types::{Arep, SubslotKey};

pub type EventResult = Result<(), StackError>;

/// AR lifecycle milestones surfaced through `state_ind`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ArEvent {
    Startup,
    PrmEnd,
    ApplReady,
    Data,
    Abort,
}

pub trait DeviceEvents: Send + Sync {
    /// A controller requested a connection. Reject by returning an error.
    fn connect_ind(&self, _stack: &mut Stack, _arep: Arep) -> EventResult {
        Ok(())
    }

    fn release_ind(&self, _stack: &mut Stack, _arep: Arep) -> EventResult {
        Ok(())
    }

    /// A DControl request arrived; `command` carries the control bits.
    fn dcontrol_ind(&self, _stack: &mut Stack, _arep: Arep, _command: u16) -> EventResult {
        Ok(())
    }

    /// The controller answered our application-ready request.
    fn ccontrol_cnf(&self, _stack: &mut Stack, _arep: Arep, _status: PnioStatus) -> EventResult {
        Ok(())
    }

    /// AR lifecycle notification. PRMEND handling is the one obligation:
    /// the application must call `application_ready` after it, immediately
    /// or once its own parameterization finished.
    fn state_ind(&self, _stack: &mut Stack, _arep: Arep, _event: ArEvent, _status: PnioStatus) {}

    /// Read of a user record index; fill `out` with the record data.
    fn read_ind(
        &self,
        _stack: &mut Stack,
        _arep: Arep,
        _key: SubslotKey,
        _index: u16,
        _out: &mut Vec<u8>,
    ) -> EventResult {
        Err(StackError::NotFound)
    }

    /// Write of a user record index.
    fn write_ind(
        &self,
        _stack: &mut Stack,
        _arep: Arep,
        _key: SubslotKey,
        _index: u16,
        _data: &[u8],
    ) -> EventResult {
        Err(StackError::NotFound)
    }

    /// The connect expects a module the tree does not carry; the
    /// application may plug it now.
    fn exp_module_ind(
        &self,
        _stack: &mut Stack,
        _api: u32,
        _slot: u16,
        _module_ident: u32,
    ) -> EventResult {
        Ok(())
    }

    fn exp_submodule_ind(
        &self,
        _stack: &mut Stack,
        _key: SubslotKey,
        _module_ident: u32,
        _submodule_ident: u32,
    ) -> EventResult {
        Ok(())
    }

    /// The data status of an inbound CR changed.
    fn new_data_status_ind(&self, _stack: &mut Stack, _arep: Arep, _cr: usize, _status: u8) {}

    /// An alarm notification arrived. After handling it the application
    /// calls `alarm_send_ack`.
    fn alarm_ind(&self, _stack: &mut Stack, _arep: Arep, _alarm: &AlarmNotification) -> EventResult {
        Ok(())
    }

    /// Our outgoing alarm was acknowledged.
    fn alarm_cnf(&self, _stack: &mut Stack, _arep: Arep, _status: PnioStatus) {}

    /// Our alarm acknowledgement went through.
    fn alarm_ack_cnf(&self, _stack: &mut Stack, _arep: Arep, _status: PnioStatus) {}

    /// Factory reset requested (via DCP or the facade). Persisted state is
    /// already gone when this fires.
    fn reset_ind(&self, _stack: &mut Stack, _full_reset: bool) -> EventResult {
        Ok(())
    }

    /// DCP signal service: make the identification LED blink.
    fn signal_led_ind(&self, _stack: &mut Stack, _on: bool) {}
}

/// The all-defaults implementation.
pub struct NullEvents;

impl DeviceEvents for NullEvents {}
