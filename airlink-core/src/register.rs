//! Inter-chip register transport contract: typed values at discrete addresses.
//!
//! The link to the co-processor is not implemented here. Hosts provide a
//! `RegisterTransport`; values are serialised with bincode so both sides agree on layout.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Addressable values exposed by the co-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// `u32` scratch register for link tests.
    Scratch,
    /// The whole `Settings` block.
    Settings,
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("no value at {0:?}")]
    Empty(Address),
    #[error("write to {0:?} was not acknowledged")]
    NotAcknowledged(Address),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Byte-level register access; typed helpers are provided on top.
pub trait RegisterTransport {
    fn read_bytes(&mut self, address: Address) -> Result<Vec<u8>, RegisterError>;

    /// With `require_ack` the call returns only after the remote side confirms the write.
    fn write_bytes(
        &mut self,
        address: Address,
        bytes: &[u8],
        require_ack: bool,
    ) -> Result<(), RegisterError>;

    fn read<T: DeserializeOwned>(&mut self, address: Address) -> Result<T, RegisterError>
    where
        Self: Sized,
    {
        let bytes = self.read_bytes(address)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    fn write<T: Serialize>(
        &mut self,
        address: Address,
        value: &T,
        require_ack: bool,
    ) -> Result<(), RegisterError>
    where
        Self: Sized,
    {
        let bytes = bincode::serialize(value)?;
        self.write_bytes(address, &bytes, require_ack)
    }
}

/// In-memory remote. Unacknowledged writes are queued and land before the next read or
/// acknowledged write, like posted writes on the real link.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    registers: HashMap<Address, Vec<u8>>,
    posted: Vec<(Address, Vec<u8>)>,
    silent: bool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote stops confirming writes; acknowledged writes fail and are dropped.
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    pub fn posted_writes(&self) -> usize {
        self.posted.len()
    }

    fn drain_posted(&mut self) {
        for (address, bytes) in self.posted.drain(..) {
            self.registers.insert(address, bytes);
        }
    }
}

impl RegisterTransport for LoopbackTransport {
    fn read_bytes(&mut self, address: Address) -> Result<Vec<u8>, RegisterError> {
        self.drain_posted();
        self.registers
            .get(&address)
            .cloned()
            .ok_or(RegisterError::Empty(address))
    }

    fn write_bytes(
        &mut self,
        address: Address,
        bytes: &[u8],
        require_ack: bool,
    ) -> Result<(), RegisterError> {
        if !require_ack {
            self.posted.push((address, bytes.to_vec()));
            return Ok(());
        }
        self.drain_posted();
        if self.silent {
            return Err(RegisterError::NotAcknowledged(address));
        }
        self.registers.insert(address, bytes.to_vec());
        Ok(())
    }
}
