use linux_io::result::Error as Errno;
use thiserror::Error;

pub(crate) const EINTR: Errno = Errno(4);
pub(crate) const EAGAIN: Errno = Errno(11);
pub(crate) const EBUSY: Errno = Errno(16);
pub(crate) const EALREADY: Errno = Errno(114);
pub(crate) const ENOTTY: Errno = Errno(25);

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid argument")]
    Invalid,
    #[error("no such object")]
    NonExist,
    #[error("out of system memory")]
    SystemMem,
    #[error("out of graphics memory")]
    GraphicsMem,
    #[error("permission denied")]
    Permission,
    #[error("device or resource busy")]
    Busy,
    #[error("interrupted")]
    Interrupted,
    #[error("resource temporarily unavailable")]
    WouldBlock,
    #[error("device disconnected")]
    Disconnected,
    #[error("operation not supported")]
    NotSupported,
    #[error("device returned inconsistent data")]
    RemoteFailure,
    #[error("device died")]
    Died,
    #[error("object was already released")]
    AlreadyReleased,
    #[error("user data key was never declared")]
    NotDeclared,
    #[error("buffer objects belong to different managers")]
    ManagerMismatch,
    #[error("buffer objects differ in size")]
    SizeMismatch,
    #[error("os error {0:?}")]
    Other(Errno),
}

impl Error {
    /// The negative errno a C-style caller would see for this error.
    pub fn as_neg_errno(self) -> i32 {
        let e: Errno = self.into();
        -e.0
    }
}

impl From<Errno> for Error {
    fn from(value: Errno) -> Self {
        match value {
            linux_io::result::EINVAL => Self::Invalid,
            linux_io::result::ENOENT => Self::NonExist,
            linux_io::result::ENOMEM => Self::SystemMem,
            linux_io::result::ENOSPC => Self::GraphicsMem,
            linux_io::result::EPERM | linux_io::result::EACCES => Self::Permission,
            linux_io::result::ENODEV => Self::Disconnected,
            linux_io::result::EOPNOTSUPP => Self::NotSupported,
            linux_io::result::ENXIO => Self::RemoteFailure,
            linux_io::result::EIO => Self::Died,
            EBUSY => Self::Busy,
            EINTR => Self::Interrupted,
            EAGAIN => Self::WouldBlock,
            EALREADY => Self::AlreadyReleased,
            _ => Self::Other(value),
        }
    }
}

impl From<Error> for Errno {
    fn from(value: Error) -> Self {
        match value {
            Error::Invalid
            | Error::NotDeclared
            | Error::ManagerMismatch
            | Error::SizeMismatch => linux_io::result::EINVAL,
            Error::NonExist => linux_io::result::ENOENT,
            Error::SystemMem => linux_io::result::ENOMEM,
            Error::GraphicsMem => linux_io::result::ENOSPC,
            Error::Permission => linux_io::result::EACCES,
            Error::Busy => EBUSY,
            Error::Interrupted => EINTR,
            Error::WouldBlock => EAGAIN,
            Error::Disconnected => linux_io::result::ENODEV,
            Error::NotSupported => linux_io::result::EOPNOTSUPP,
            Error::RemoteFailure => linux_io::result::ENXIO,
            Error::Died => linux_io::result::EIO,
            Error::AlreadyReleased => EALREADY,
            Error::Other(v) => v,
        }
    }
}

impl From<std::collections::TryReserveError> for Error {
    #[inline(always)]
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::SystemMem
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        match value.raw_os_error() {
            Some(code) => Errno(code).into(),
            None => Self::RemoteFailure,
        }
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("file is not a DRM card device")]
    NotDrmCard,
    #[error("could not open DRM card device: {0:?}")]
    Other(Errno),
}

impl From<InitError> for Errno {
    fn from(value: InitError) -> Self {
        match value {
            InitError::NotDrmCard => ENOTTY,
            InitError::Other(e) => e,
        }
    }
}

impl From<Errno> for InitError {
    fn from(value: Errno) -> Self {
        match value {
            ENOTTY => InitError::NotDrmCard,
            _ => InitError::Other(value),
        }
    }
}
