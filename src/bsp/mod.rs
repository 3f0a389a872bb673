//! # Platform Shims
//!
//! The narrow contracts the client calls into for everything platform
//! specific: time, randomness, hashing, raw sockets, TLS and storage. The
//! core never implements these itself; boards plug in their own types, and
//! [`crate::transport`] provides the embassy-net socket shim.
//!
//! No allocator shim exists: the crate never allocates, every buffer is a
//! fixed-capacity `heapless` container owned by its user.

mod memory_fs;

pub use memory_fs::MemoryFs;

use embassy_time::Instant;

use crate::data::DataDesc;

// --- Time ---

/// Monotonic time source.
pub trait Clock {
    /// Milliseconds since an arbitrary epoch, monotonic within one boot.
    fn now(&self) -> Instant;

    /// Whole seconds since the same epoch.
    fn now_secs(&self) -> u64 {
        self.now().as_secs()
    }
}

/// Reads the embassy time driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

// --- Random ---

/// Source of the jitter used by reconnect backoff. Does not need to be
/// cryptographically secure.
pub trait RngBsp {
    fn init(&mut self) {}
    fn next_u32(&mut self) -> u32;
    fn shutdown(&mut self) {}
}

impl<R: rand_core::RngCore> RngBsp for R {
    fn next_u32(&mut self) -> u32 {
        rand_core::RngCore::next_u32(self)
    }
}

// --- Hash ---

pub const SHA256_DIGEST_LEN: usize = 32;

/// Incremental SHA-256 used for firmware image integrity checks.
pub trait HashBsp {
    fn init(&mut self);
    fn update(&mut self, data: &[u8]);
    fn finalize(&mut self) -> [u8; SHA256_DIGEST_LEN];
}

// --- Network ---

/// Identifies a socket created by a [`NetworkBsp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SocketHandle(pub u8);

/// Failure and progress codes of the raw socket shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetError {
    /// The operation would block; retry once the socket is ready.
    Busy,
    /// A non-blocking connect has started but not finished.
    InProgress,
    /// The peer reset or closed the connection.
    ConnectionReset,
    /// The host could not be parsed or resolved.
    InvalidAddress,
    /// No socket slot is free.
    NoSocket,
    /// Any other socket failure.
    Failed,
}

/// Readiness a socket watch waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interest {
    Read,
    Write,
    /// A non-blocking connect finished, successfully or not.
    Connect,
}

/// What the readiness poll found for a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Readiness {
    Pending,
    Ready,
    Error,
}

/// One entry of the array handed to [`NetworkBsp::select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Watch {
    pub socket: SocketHandle,
    pub interest: Interest,
    pub readiness: Readiness,
}

impl Watch {
    pub fn new(socket: SocketHandle, interest: Interest) -> Self {
        Self {
            socket,
            interest,
            readiness: Readiness::Pending,
        }
    }
}

/// Non-blocking socket primitives.
pub trait NetworkBsp {
    fn create_socket(&mut self) -> Result<SocketHandle, NetError>;

    /// Starts connecting. `Err(NetError::InProgress)` means the connect
    /// continues in the background and completion is reported through
    /// [`Interest::Connect`].
    fn connect(&mut self, socket: SocketHandle, host: &str, port: u16) -> Result<(), NetError>;

    /// Reports whether a finished connect actually succeeded.
    fn connection_check(&mut self, socket: SocketHandle) -> Result<(), NetError>;

    /// Returns the number of bytes accepted, or `Err(NetError::Busy)`.
    fn write(&mut self, socket: SocketHandle, buf: &[u8]) -> Result<usize, NetError>;

    /// Returns the number of bytes read. Zero means the peer closed.
    fn read(&mut self, socket: SocketHandle, buf: &mut [u8]) -> Result<usize, NetError>;

    fn close(&mut self, socket: SocketHandle);

    /// Fills in `readiness` for every watch and returns how many are not pending.
    fn select(&mut self, watches: &mut [Watch]) -> Result<usize, NetError>;
}

// --- TLS ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TlsError {
    /// The chain has no TLS provider.
    Unsupported,
    HandshakeFailed,
    /// Peer certificate validation failed.
    BadCertificate,
    /// A record could not be decrypted or authenticated.
    BadRecord,
    BufferTooSmall,
}

/// Progress of a TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Handshake {
    InProgress,
    Complete,
}

/// Sans-I/O TLS engine. The TLS layer moves ciphertext between the engine
/// and the socket layer; the engine never touches a socket.
pub trait TlsProvider {
    fn begin(&mut self, server_name: &str) -> Result<(), TlsError>;

    /// Consumes handshake records from `incoming` and appends the next flight,
    /// if any, to `outgoing`.
    fn handshake(
        &mut self,
        incoming: &mut DataDesc,
        outgoing: &mut DataDesc,
    ) -> Result<Handshake, TlsError>;

    fn encrypt(&mut self, plain: &[u8], out: &mut DataDesc) -> Result<(), TlsError>;

    /// Decrypts every complete record in `incoming` into `out`, leaving a
    /// partial trailing record unread.
    fn decrypt(&mut self, incoming: &mut DataDesc, out: &mut DataDesc) -> Result<(), TlsError>;

    fn end(&mut self);
}

/// Provider type for chains without TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTls;

impl TlsProvider for NoTls {
    fn begin(&mut self, _server_name: &str) -> Result<(), TlsError> {
        Err(TlsError::Unsupported)
    }

    fn handshake(&mut self, _: &mut DataDesc, _: &mut DataDesc) -> Result<Handshake, TlsError> {
        Err(TlsError::Unsupported)
    }

    fn encrypt(&mut self, _: &[u8], _: &mut DataDesc) -> Result<(), TlsError> {
        Err(TlsError::Unsupported)
    }

    fn decrypt(&mut self, _: &mut DataDesc, _: &mut DataDesc) -> Result<(), TlsError> {
        Err(TlsError::Unsupported)
    }

    fn end(&mut self) {}
}

// --- Filesystem ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsError {
    NotFound,
    OutOfMemory,
    Busy,
    NotImplemented,
    InvalidHandle,
}

/// Handle of an open resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FileHandle(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpenMode {
    Read,
    /// Truncates or creates the resource.
    Write,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FileStat {
    pub size: usize,
}

/// Named-resource storage.
pub trait FsBsp {
    fn open(&mut self, name: &str, mode: OpenMode) -> Result<FileHandle, FsError>;
    fn read(&mut self, file: FileHandle, offset: usize, buf: &mut [u8]) -> Result<usize, FsError>;
    fn write(&mut self, file: FileHandle, offset: usize, buf: &[u8]) -> Result<usize, FsError>;
    fn close(&mut self, file: FileHandle) -> Result<(), FsError>;
    fn remove(&mut self, name: &str) -> Result<(), FsError>;
    fn stat(&mut self, name: &str) -> Result<FileStat, FsError>;
}
