//! Unix-domain datagram endpoint naming (spec §6): each replica exposes
//! three SCADA-side IPC endpoints plus Prime's own pair. Named here so both
//! `itrc` and the `prime-node` shell bind to the same socket paths.

/// The SCADA main endpoint for replica `id`.
pub fn sm_ipc_main(id: u32) -> String {
    format!("SM_IPC_MAIN_{id}")
}

/// The ITRC endpoint for replica `id`.
pub fn sm_ipc_itrc(id: u32) -> String {
    format!("SM_IPC_ITRC_{id}")
}

/// The state-transfer signal endpoint for replica `id`.
pub fn sm_ipc_inject(id: u32) -> String {
    format!("SM_IPC_INJECT_{id}")
}

/// Prime's client-facing IPC path for replica `id`.
pub fn prime_client_ipc_path(id: u32) -> String {
    format!("PRIME_CLIENT_IPC_PATH_{id}")
}

/// Prime's replica-to-replica IPC path for replica `id`.
pub fn prime_replica_ipc_path(id: u32) -> String {
    format!("PRIME_REPLICA_IPC_PATH_{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_names_embed_the_replica_id() {
        assert_eq!(sm_ipc_main(3), "SM_IPC_MAIN_3");
        assert_eq!(sm_ipc_itrc(3), "SM_IPC_ITRC_3");
        assert_eq!(sm_ipc_inject(3), "SM_IPC_INJECT_3");
        assert_eq!(prime_client_ipc_path(3), "PRIME_CLIENT_IPC_PATH_3");
        assert_eq!(prime_replica_ipc_path(3), "PRIME_REPLICA_IPC_PATH_3");
    }
}
