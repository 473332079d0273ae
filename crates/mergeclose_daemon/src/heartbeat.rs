//! Heartbeat file: the liveness signal read by `mergeclose health`.

use mergeclose_protocol::defaults::SAFE_MODE_OPERATOR_ACTION;
use mergeclose_protocol::HeartbeatFile;
use std::io;
use std::path::Path;

use crate::atomic::write_json_atomic;
use crate::checkpoint::CheckpointState;

pub fn build_heartbeat(updated_at: String, state: &CheckpointState, poll_ok: bool) -> HeartbeatFile {
    let operator_action = if state.safe_mode {
        SAFE_MODE_OPERATOR_ACTION.to_string()
    } else {
        String::new()
    };
    HeartbeatFile {
        updated_at,
        safe_mode: state.safe_mode,
        safe_mode_reason: state.safe_mode_reason.clone(),
        operator_action,
        poll_ok,
    }
}

pub fn write_heartbeat(path: &Path, heartbeat: &HeartbeatFile) -> io::Result<()> {
    write_json_atomic(path, heartbeat)
}
