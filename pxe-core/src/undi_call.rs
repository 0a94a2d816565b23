//! The UNDI call gateway: marshals a call through the UNDI real-mode entry
//! point and unconditionally restores A20 on every exit path (§4, "A20
//! corruption workaround").

use crate::env::CallGate;
use crate::far_ptr::SegOff;

/// Outcome of one gateway-mediated UNDI call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndiCallOutcome {
    /// The call completed; carries the vendor's own status word.
    Completed { vendor_status: u16 },
    /// The far call itself did not complete (crashed, hung, or the gate
    /// reported it never returned cleanly).
    Failed,
}

/// Invoke `entry` with `opcode` and `params`, guaranteeing
/// [`CallGate::a20_enable`] runs exactly once before this function returns,
/// on every path -- success, vendor failure, or gate failure alike. This is
/// the "scoped acquisition around every UNDI call with guaranteed
/// re-enable on all exit paths" the Design Notes call for.
pub fn a20_guarded(
    gate: &dyn CallGate,
    entry: SegOff,
    opcode: u16,
    params: SegOff,
) -> UndiCallOutcome {
    let result = gate.call(entry, opcode, params);
    // Unconditional: some UNDI drivers disable A20 and never restore it,
    // regardless of whether the call itself succeeded.
    gate.a20_enable();

    if result.completed {
        UndiCallOutcome::Completed { vendor_status: result.vendor_status }
    } else {
        UndiCallOutcome::Failed
    }
}
