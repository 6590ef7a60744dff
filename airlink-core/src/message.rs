//! Generic message for access-point client fan-out.

/// Largest payload a `NetworkMessage` carries.
pub const MAX_NETWORK_MESSAGE_LEN: usize = 512;

/// Datagram payload plus destination port. Stored inline so it is copied into the queue
/// by value.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NetworkMessage {
    data: [u8; MAX_NETWORK_MESSAGE_LEN],
    len: u16,
    port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("payload of {0} bytes exceeds network message capacity")]
pub struct MessageTooLong(pub usize);

impl NetworkMessage {
    pub fn new(payload: &[u8], port: u16) -> Result<Self, MessageTooLong> {
        if payload.len() > MAX_NETWORK_MESSAGE_LEN {
            return Err(MessageTooLong(payload.len()));
        }
        let mut data = [0u8; MAX_NETWORK_MESSAGE_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            data,
            len: payload.len() as u16,
            port,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Debug for NetworkMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMessage")
            .field("len", &self.len)
            .field("port", &self.port)
            .finish()
    }
}
