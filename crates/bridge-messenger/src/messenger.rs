//! UDP sender for OSC messages

use crate::osc::{OscError, OscMessage};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Largest payload a single UDP/IPv4 datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Outbound messaging errors
#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] OscError),

    #[error("Encoded message is {size} bytes, larger than one datagram ({max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Failed to bind local UDP socket: {0}")]
    Bind(std::io::Error),

    #[error("Failed to send to {target}: {source}")]
    Send {
        target: SocketAddr,
        source: std::io::Error,
    },

    #[error("Datagram to {target} was truncated: sent {sent} of {size} bytes")]
    ShortSend {
        target: SocketAddr,
        sent: usize,
        size: usize,
    },
}

/// Sends addressed messages to the simulation's OSC port
pub struct OutboundMessenger {
    socket: UdpSocket,
    target: SocketAddr,
}

impl OutboundMessenger {
    /// Bind an ephemeral local socket for sending to `target`
    pub async fn connect(target: SocketAddr) -> Result<Self, MessengerError> {
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await.map_err(MessengerError::Bind)?;

        info!(target_addr = %target, "OSC messenger ready");
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send `payload` as the single string argument of a message at `address`
    pub async fn send(&self, address: &str, payload: &str) -> Result<(), MessengerError> {
        self.send_message(&OscMessage::with_text(address, payload))
            .await
    }

    /// Encode and transmit one message as one datagram
    pub async fn send_message(&self, message: &OscMessage) -> Result<(), MessengerError> {
        let packet = message.encode()?;
        if packet.len() > MAX_DATAGRAM_SIZE {
            return Err(MessengerError::PayloadTooLarge {
                size: packet.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        let sent = self
            .socket
            .send_to(&packet, self.target)
            .await
            .map_err(|e| MessengerError::Send {
                target: self.target,
                source: e,
            })?;

        if sent != packet.len() {
            return Err(MessengerError::ShortSend {
                target: self.target,
                sent,
                size: packet.len(),
            });
        }

        debug!(
            target_addr = %self.target,
            address = %message.address,
            bytes = sent,
            "Sent OSC message"
        );
        Ok(())
    }
}
