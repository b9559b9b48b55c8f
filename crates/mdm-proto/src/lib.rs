#![no_std]

use core::{convert::TryFrom, fmt};

/// ioctl type byte shared by every control-surface command.
pub const CONTROL_TYPE: u8 = 0xCC;
/// Capacity of the modem diagnostic message buffer, trailing NUL included.
pub const ERRMSG_LEN: usize = 256;
/// Status code an agent reports for a successful boot or dump.
pub const STATUS_OK: i64 = 0;
/// Size in bytes of the integer argument carried by value-bearing commands.
pub const INT_ARG_LEN: u32 = 4;

const NR_SHIFT: u32 = 0;
const TYPE_SHIFT: u32 = 8;
const SIZE_SHIFT: u32 = 16;
const DIR_SHIFT: u32 = 30;
const SIZE_MASK: u32 = (1 << 14) - 1;

/// Data direction encoded in the top bits of a command code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Transfer {
    /// No argument.
    None = 0,
    /// Caller supplies an argument to the supervisor.
    Write = 1,
    /// Supervisor fills an argument for the caller.
    Read = 2,
}

/// Builds a command code from its components.
pub const fn encode(transfer: Transfer, ty: u8, nr: u8, size: u32) -> u32 {
    ((transfer as u32) << DIR_SHIFT)
        | ((size & SIZE_MASK) << SIZE_SHIFT)
        | ((ty as u32) << TYPE_SHIFT)
        | ((nr as u32) << NR_SHIFT)
}

/// Extracts the type byte of a command code.
pub const fn code_type(code: u32) -> u8 {
    (code >> TYPE_SHIFT) as u8
}

/// Extracts the command number of a command code.
pub const fn code_nr(code: u32) -> u8 {
    (code >> NR_SHIFT) as u8
}

/// Extracts the argument size of a command code.
pub const fn code_size(code: u32) -> u32 {
    (code >> SIZE_SHIFT) & SIZE_MASK
}

/// Errors surfaced while decoding control-surface values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtoError {
    /// Command code carries a foreign type byte.
    InvalidType(u8),
    /// Command code is not part of the vocabulary.
    InvalidCommand(u32),
    /// Boot type value is unknown.
    InvalidBootType(i64),
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtoError::InvalidType(ty) => {
                write!(f, "invalid command type {ty:#04x}, expected {CONTROL_TYPE:#04x}")
            }
            ProtoError::InvalidCommand(code) => write!(f, "invalid command {code:#010x}"),
            ProtoError::InvalidBootType(value) => write!(f, "invalid boot type {value}"),
        }
    }
}

/// Result alias for control-surface decoding.
pub type Result<T> = core::result::Result<T, ProtoError>;

/// Commands accepted by the control surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Power the modem on.
    PowerOn,
    /// Query whether the modem still needs its boot images.
    CheckForBoot,
    /// Agent reports the outcome of a normal boot.
    NormalBootDone,
    /// Agent reports the outcome of a memory-dump collection.
    RamDumpDone,
    /// Agent blocks until the supervisor requests a reload.
    WaitForRestart,
    /// Query the board manufacturing mode.
    GetMfgMode,
    /// Agent stores a diagnostic message.
    SetErrmsg,
    /// Agent notes that a filesystem sync finished.
    EfsSyncDone,
    /// Agent notes that a non-volatile write finished.
    NvWriteDone,
}

impl Command {
    pub const ALL: [Command; 9] = [
        Command::PowerOn,
        Command::CheckForBoot,
        Command::NormalBootDone,
        Command::RamDumpDone,
        Command::WaitForRestart,
        Command::GetMfgMode,
        Command::SetErrmsg,
        Command::EfsSyncDone,
        Command::NvWriteDone,
    ];

    /// Command number within the [`CONTROL_TYPE`] namespace.
    pub const fn nr(self) -> u8 {
        match self {
            Command::PowerOn => 1,
            Command::CheckForBoot => 3,
            Command::NormalBootDone => 5,
            Command::RamDumpDone => 6,
            Command::WaitForRestart => 7,
            Command::GetMfgMode => 8,
            Command::SetErrmsg => 9,
            Command::EfsSyncDone => 10,
            Command::NvWriteDone => 11,
        }
    }

    /// Direction of the argument this command carries.
    pub const fn transfer(self) -> Transfer {
        match self {
            Command::PowerOn | Command::EfsSyncDone | Command::NvWriteDone => Transfer::None,
            Command::CheckForBoot | Command::WaitForRestart | Command::GetMfgMode => Transfer::Read,
            Command::NormalBootDone | Command::RamDumpDone | Command::SetErrmsg => Transfer::Write,
        }
    }

    /// Size of the argument this command carries.
    pub const fn arg_len(self) -> u32 {
        match self.transfer() {
            Transfer::None => 0,
            _ => match self {
                Command::SetErrmsg => ERRMSG_LEN as u32,
                _ => INT_ARG_LEN,
            },
        }
    }

    /// Full command code.
    pub const fn code(self) -> u32 {
        encode(self.transfer(), CONTROL_TYPE, self.nr(), self.arg_len())
    }
}

impl TryFrom<u32> for Command {
    type Error = ProtoError;

    fn try_from(code: u32) -> Result<Self> {
        let ty = code_type(code);
        if ty != CONTROL_TYPE {
            return Err(ProtoError::InvalidType(ty));
        }
        Command::ALL
            .into_iter()
            .find(|command| command.code() == code)
            .ok_or(ProtoError::InvalidCommand(code))
    }
}

/// Kind of reload the agent is asked to perform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum BootType {
    /// Load the normal boot images.
    #[default]
    Normal = 0,
    /// Collect memory dumps from the crashed modem.
    RamDumps = 1,
}

impl From<BootType> for i64 {
    fn from(value: BootType) -> Self {
        value as i64
    }
}

impl TryFrom<i64> for BootType {
    type Error = ProtoError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::RamDumps),
            other => Err(ProtoError::InvalidBootType(other)),
        }
    }
}
