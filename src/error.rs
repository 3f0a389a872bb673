//! # Error Types
//!
//! Error and status types shared by every layer of the client, from socket
//! failures reported by the network shim up to protocol violations detected by
//! the parser and refusals reported by the broker.

use crate::bsp::{FsError, NetError, TlsError};

/// The primary error enum for the MQTT client.
///
/// All variants are plain data so errors can travel through the layer chain
/// and the dispatcher by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError {
    /// The network shim reported a socket failure.
    Transport(NetError),
    /// A protocol-level error occurred, indicating a violation of the MQTT specification.
    Protocol(ProtocolError),
    /// The connection was refused by the broker. The enclosed code provides the reason.
    ConnectionRefused(ConnectReasonCode),
    /// The peer closed or reset the connection.
    ConnectionReset,
    /// Connecting or waiting for `CONNACK` took longer than the configured timeout.
    Timeout,
    /// Neither `PINGRESP` nor any other packet arrived within the keep-alive window.
    KeepaliveTimeout,
    /// The client is not currently connected to the broker.
    NotConnected,
    /// The buffer provided for an operation was too small.
    BufferTooSmall,
    /// A fixed-capacity queue, table or slot was full.
    OutOfResources,
    /// A request was retransmitted `max_retries` times without being acknowledged.
    RetryLimitExceeded,
    /// The TLS provider failed.
    Tls(TlsError),
    /// The filesystem shim failed.
    Fs(FsError),
    /// An operation reached a layer whose `init` has not completed.
    LayerNotInitialized,
    /// The caller passed a value the client cannot represent.
    InvalidArgument,
}

impl From<ProtocolError> for MqttError {
    fn from(err: ProtocolError) -> Self {
        MqttError::Protocol(err)
    }
}

impl From<NetError> for MqttError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::ConnectionReset => MqttError::ConnectionReset,
            other => MqttError::Transport(other),
        }
    }
}

impl From<TlsError> for MqttError {
    fn from(err: TlsError) -> Self {
        MqttError::Tls(err)
    }
}

impl From<FsError> for MqttError {
    fn from(err: FsError) -> Self {
        MqttError::Fs(err)
    }
}

/// Represents the return codes of a `CONNACK` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    /// The connection was accepted.
    Success,
    /// The broker does not support the requested MQTT protocol version.
    UnacceptableProtocolVersion,
    /// The client identifier is not valid.
    IdentifierRejected,
    /// The broker is unavailable.
    ServerUnavailable,
    /// The username or password is not valid.
    BadUserNameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// A code outside the MQTT 3.1.1 range.
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

impl From<ConnectReasonCode> for u8 {
    fn from(code: ConnectReasonCode) -> Self {
        match code {
            ConnectReasonCode::Success => 0,
            ConnectReasonCode::UnacceptableProtocolVersion => 1,
            ConnectReasonCode::IdentifierRejected => 2,
            ConnectReasonCode::ServerUnavailable => 3,
            ConnectReasonCode::BadUserNameOrPassword => 4,
            ConnectReasonCode::NotAuthorized => 5,
            ConnectReasonCode::Other(val) => val,
        }
    }
}

/// Enumerates specific MQTT protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// An invalid packet type was received.
    InvalidPacketType(u8),
    /// The fixed-header flags are not allowed for this packet type.
    InvalidFlags(u8),
    /// A QoS value of 3 was found.
    InvalidQoS,
    /// The remaining-length field used more than four bytes.
    MalformedRemainingLength,
    /// A remaining length above 268,435,455 cannot be encoded.
    RemainingLengthTooLarge,
    /// A packet was received that was not correctly formed.
    MalformedPacket,
    /// A packet identifier of zero where a non-zero one is required.
    ZeroPacketId,
    /// The payload of a message exceeds the maximum allowable size.
    PayloadTooLarge,
    /// A topic, client id or credential exceeds its fixed capacity.
    FieldTooLong,
    /// A string was not valid UTF-8.
    InvalidUtf8String,
    /// `CONNECT` named a protocol other than MQTT 3.1.1.
    UnsupportedProtocol,
    /// A `SUBACK` carried a return code other than 0, 1, 2 or 0x80.
    InvalidSubAckCode(u8),
    /// The broker sent a packet the client never expects in its current state.
    UnexpectedPacket(u8),
}

/// Status exchanged between layers alongside every operation.
///
/// `WantRead`, `WantWrite` and `Written` are progress signals, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    Ok,
    /// A buffer handed toward the wire has been fully written.
    Written,
    WantRead,
    WantWrite,
    /// The operation was resumed by a timer rather than by I/O.
    Timeout,
    Failed(MqttError),
}

impl Status {
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Failed(_))
    }

    /// Returns the error carried by a failed status.
    pub fn error(&self) -> Option<MqttError> {
        match self {
            Status::Failed(err) => Some(*err),
            _ => None,
        }
    }
}

impl From<MqttError> for Status {
    fn from(err: MqttError) -> Self {
        Status::Failed(err)
    }
}

impl From<Result<(), MqttError>> for Status {
    fn from(res: Result<(), MqttError>) -> Self {
        match res {
            Ok(()) => Status::Ok,
            Err(err) => Status::Failed(err),
        }
    }
}
