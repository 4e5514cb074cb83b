//! Binds the Unix-domain datagram endpoints named in spec §6
//! (`SM_IPC_MAIN_<id>`, `SM_IPC_ITRC_<id>`, `SM_IPC_INJECT_<id>`,
//! `PRIME_CLIENT_IPC_PATH_<id>`, `PRIME_REPLICA_IPC_PATH_<id>`) as
//! non-blocking sockets under a runtime directory, registered with `mio`.

use std::fs;
use std::path::{Path, PathBuf};

use mio::net::UnixDatagram;
use mio::{Interest, Registry, Token};

use crate::error::{NodeError, Result};

/// Every IPC endpoint a running replica exposes, bound and `mio`-registered.
pub struct IpcEndpoints {
    pub sm_main: UnixDatagram,
    pub sm_itrc: UnixDatagram,
    pub sm_inject: UnixDatagram,
    pub client: UnixDatagram,
    pub replica: UnixDatagram,
}

pub const SM_MAIN_TOKEN: Token = Token(0);
pub const SM_ITRC_TOKEN: Token = Token(1);
pub const SM_INJECT_TOKEN: Token = Token(2);
pub const CLIENT_TOKEN: Token = Token(3);
pub const REPLICA_TOKEN: Token = Token(4);

fn bind(dir: &Path, name: &str) -> Result<UnixDatagram> {
    let path = dir.join(name);
    if path.exists() {
        fs::remove_file(&path)?;
    }
    UnixDatagram::bind(&path).map_err(|source| NodeError::IpcBindFailed {
        path: path.display().to_string(),
        source,
    })
}

impl IpcEndpoints {
    /// Binds all five endpoints for replica `id` under `ipc_dir`, creating
    /// the directory if needed.
    pub fn bind(ipc_dir: &Path, id: u32) -> Result<Self> {
        fs::create_dir_all(ipc_dir)?;
        Ok(Self {
            sm_main: bind(ipc_dir, &scada_stub::ipc::sm_ipc_main(id))?,
            sm_itrc: bind(ipc_dir, &scada_stub::ipc::sm_ipc_itrc(id))?,
            sm_inject: bind(ipc_dir, &scada_stub::ipc::sm_ipc_inject(id))?,
            client: bind(ipc_dir, &scada_stub::ipc::prime_client_ipc_path(id))?,
            replica: bind(ipc_dir, &scada_stub::ipc::prime_replica_ipc_path(id))?,
        })
    }

    pub fn register(&mut self, registry: &Registry) -> Result<()> {
        registry.register(&mut self.sm_main, SM_MAIN_TOKEN, Interest::READABLE)?;
        registry.register(&mut self.sm_itrc, SM_ITRC_TOKEN, Interest::READABLE)?;
        registry.register(&mut self.sm_inject, SM_INJECT_TOKEN, Interest::READABLE)?;
        registry.register(&mut self.client, CLIENT_TOKEN, Interest::READABLE)?;
        registry.register(&mut self.replica, REPLICA_TOKEN, Interest::READABLE)?;
        Ok(())
    }

    /// Resolves the socket path of a peer replica's replica-to-replica
    /// endpoint, for sending outbound Prime/ITRC traffic.
    pub fn peer_replica_path(ipc_dir: &Path, peer: u32) -> PathBuf {
        ipc_dir.join(scada_stub::ipc::prime_replica_ipc_path(peer))
    }

    /// Resolves a client's inbound path, for delivering `TC_Final`/replies.
    pub fn client_path(ipc_dir: &Path, id: u32) -> PathBuf {
        ipc_dir.join(scada_stub::ipc::prime_client_ipc_path(id))
    }
}
