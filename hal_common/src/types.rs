//! HAL value and object type vocabulary.
//!
//! This module defines:
//! - `HalType` / `HalValue` - the scalar types a pin, signal or parameter carries
//! - `HalData` trait - maps Rust scalars onto the 64-bit storage cell
//! - `PinDir` / `ParamDir` - data directions
//! - `ObjectKind` - type tag of every named object in the registry
//! - `CompType` / `CompState` - component subtype and lifecycle state
//! - `FunctSignature` - call signature tag of an exported function
//! - `PinFlags` - per-pin behaviour flags
//!
//! Every enum here is stored in shared memory as a raw `u8` and converted back
//! with `from_u8`, so discriminants are part of the layout.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar data type carried by pins, signals and parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum HalType {
    /// Boolean.
    Bit = 1,
    /// 64-bit IEEE float.
    Float = 2,
    /// Signed 32-bit integer.
    S32 = 3,
    /// Unsigned 32-bit integer.
    U32 = 4,
    /// Signed 64-bit integer.
    S64 = 5,
    /// Unsigned 64-bit integer.
    U64 = 6,
}

impl HalType {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Bit),
            2 => Some(Self::Float),
            3 => Some(Self::S32),
            4 => Some(Self::U32),
            5 => Some(Self::S64),
            6 => Some(Self::U64),
            _ => None,
        }
    }

    /// Zero value of this type.
    pub const fn zero(self) -> HalValue {
        match self {
            Self::Bit => HalValue::Bit(false),
            Self::Float => HalValue::Float(0.0),
            Self::S32 => HalValue::S32(0),
            Self::U32 => HalValue::U32(0),
            Self::S64 => HalValue::S64(0),
            Self::U64 => HalValue::U64(0),
        }
    }
}

impl fmt::Display for HalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bit => "bit",
            Self::Float => "float",
            Self::S32 => "s32",
            Self::U32 => "u32",
            Self::S64 => "s64",
            Self::U64 => "u64",
        };
        f.write_str(s)
    }
}

/// A typed scalar value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HalValue {
    /// Boolean.
    Bit(bool),
    /// 64-bit float.
    Float(f64),
    /// Signed 32-bit integer.
    S32(i32),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Signed 64-bit integer.
    S64(i64),
    /// Unsigned 64-bit integer.
    U64(u64),
}

impl HalValue {
    /// Type tag of this value.
    pub const fn hal_type(&self) -> HalType {
        match self {
            Self::Bit(_) => HalType::Bit,
            Self::Float(_) => HalType::Float,
            Self::S32(_) => HalType::S32,
            Self::U32(_) => HalType::U32,
            Self::S64(_) => HalType::S64,
            Self::U64(_) => HalType::U64,
        }
    }

    /// Encode into the 64-bit storage cell representation.
    pub fn to_bits(&self) -> u64 {
        match *self {
            Self::Bit(v) => HalData::to_bits(v),
            Self::Float(v) => HalData::to_bits(v),
            Self::S32(v) => HalData::to_bits(v),
            Self::U32(v) => HalData::to_bits(v),
            Self::S64(v) => HalData::to_bits(v),
            Self::U64(v) => HalData::to_bits(v),
        }
    }

    /// Decode a storage cell of the given type.
    pub fn from_bits(ty: HalType, bits: u64) -> Self {
        match ty {
            HalType::Bit => Self::Bit(<bool as HalData>::from_bits(bits)),
            HalType::Float => Self::Float(<f64 as HalData>::from_bits(bits)),
            HalType::S32 => Self::S32(<i32 as HalData>::from_bits(bits)),
            HalType::U32 => Self::U32(<u32 as HalData>::from_bits(bits)),
            HalType::S64 => Self::S64(<i64 as HalData>::from_bits(bits)),
            HalType::U64 => Self::U64(<u64 as HalData>::from_bits(bits)),
        }
    }
}

impl fmt::Display for HalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bit(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            Self::Float(v) => write!(f, "{v}"),
            Self::S32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::S64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
        }
    }
}

/// Rust scalar that can live in a HAL storage cell.
///
/// Storage cells are 64-bit words accessed atomically, so every supported
/// type is encoded as raw bits.
pub trait HalData: Copy + Send + Sync + 'static {
    /// HAL type tag for this Rust type.
    const TYPE: HalType;

    /// Encode to cell bits.
    fn to_bits(self) -> u64;

    /// Decode from cell bits.
    fn from_bits(bits: u64) -> Self;
}

impl HalData for bool {
    const TYPE: HalType = HalType::Bit;
    fn to_bits(self) -> u64 {
        self as u64
    }
    fn from_bits(bits: u64) -> Self {
        bits != 0
    }
}

impl HalData for f64 {
    const TYPE: HalType = HalType::Float;
    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }
    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }
}

impl HalData for i32 {
    const TYPE: HalType = HalType::S32;
    fn to_bits(self) -> u64 {
        self as u32 as u64
    }
    fn from_bits(bits: u64) -> Self {
        bits as u32 as i32
    }
}

impl HalData for u32 {
    const TYPE: HalType = HalType::U32;
    fn to_bits(self) -> u64 {
        self as u64
    }
    fn from_bits(bits: u64) -> Self {
        bits as u32
    }
}

impl HalData for i64 {
    const TYPE: HalType = HalType::S64;
    fn to_bits(self) -> u64 {
        self as u64
    }
    fn from_bits(bits: u64) -> Self {
        bits as i64
    }
}

impl HalData for u64 {
    const TYPE: HalType = HalType::U64;
    fn to_bits(self) -> u64 {
        self
    }
    fn from_bits(bits: u64) -> Self {
        bits
    }
}

/// Pin data direction, seen from the owning component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PinDir {
    /// Component reads the pin.
    In = 16,
    /// Component writes the pin.
    Out = 32,
    /// Component reads and writes the pin.
    Io = 48,
}

impl PinDir {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            16 => Some(Self::In),
            32 => Some(Self::Out),
            48 => Some(Self::Io),
            _ => None,
        }
    }
}

/// Parameter direction, seen from outside the owning component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ParamDir {
    /// Only the owning component writes it.
    Ro = 64,
    /// Anyone holding the HAL lock may write it.
    Rw = 192,
}

impl ParamDir {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            64 => Some(Self::Ro),
            192 => Some(Self::Rw),
            _ => None,
        }
    }
}

/// Type tag of a named object in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ObjectKind {
    /// Registered module.
    Component = 1,
    /// Named sub-object of an instantiable component.
    Instance = 2,
    /// Typed data port.
    Pin = 3,
    /// Shared value cell.
    Signal = 4,
    /// Typed value, not linkable.
    Param = 5,
    /// Exported unit of work.
    Funct = 6,
    /// Periodic execution context.
    Thread = 7,
    /// Versioned function table handle.
    Vtable = 8,
    /// Auxiliary ring segment.
    Ring = 9,
}

impl ObjectKind {
    /// Number of kinds; sizes the per-kind free list table.
    pub const COUNT: usize = 10;

    /// All kinds, in discriminant order.
    pub const ALL: [ObjectKind; 9] = [
        Self::Component,
        Self::Instance,
        Self::Pin,
        Self::Signal,
        Self::Param,
        Self::Funct,
        Self::Thread,
        Self::Vtable,
        Self::Ring,
    ];

    /// Convert from raw `u8` value. Returns `None` for invalid values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Component),
            2 => Some(Self::Instance),
            3 => Some(Self::Pin),
            4 => Some(Self::Signal),
            5 => Some(Self::Param),
            6 => Some(Self::Funct),
            7 => Some(Self::Thread),
            8 => Some(Self::Vtable),
            9 => Some(Self::Ring),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Component => "component",
            Self::Instance => "instance",
            Self::Pin => "pin",
            Self::Signal => "signal",
            Self::Param => "param",
            Self::Funct => "funct",
            Self::Thread => "thread",
            Self::Vtable => "vtable",
            Self::Ring => "ring",
        };
        f.write_str(s)
    }
}

/// Component subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompType {
    /// Module running in the realtime context.
    Realtime = 1,
    /// Ordinary user process.
    User = 2,
    /// Factory producing named instances.
    Instantiable = 3,
    /// Proxy for a component living on another host.
    Remote = 4,
}

impl CompType {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Realtime),
            2 => Some(Self::User),
            3 => Some(Self::Instantiable),
            4 => Some(Self::Remote),
            _ => None,
        }
    }
}

/// Component lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompState {
    /// Registered, still exporting pins and functions.
    Initializing = 1,
    /// Remote component with no peer bound.
    Unbound = 2,
    /// Remote component with a peer bound.
    Bound = 3,
    /// Fully initialized.
    Ready = 4,
}

impl CompState {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Initializing),
            2 => Some(Self::Unbound),
            3 => Some(Self::Bound),
            4 => Some(Self::Ready),
            _ => None,
        }
    }
}

/// Call signature of an exported function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum FunctSignature {
    /// Called with the thread period only.
    Legacy = 1,
    /// Called with a full invocation context.
    Extended = 2,
    /// Called out of band with an argument vector; never scheduled.
    Userland = 3,
}

impl FunctSignature {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Legacy),
            2 => Some(Self::Extended),
            3 => Some(Self::Userland),
            _ => None,
        }
    }

    /// Whether functions of this signature may be added to a thread.
    pub const fn is_schedulable(self) -> bool {
        !matches!(self, Self::Userland)
    }
}

bitflags! {
    /// Per-pin behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PinFlags: u8 {
        /// No change monitoring, no reporting.
        const DO_NOT_TRACK = 0x01;
    }
}
