//! Property protocol of the virtual input device.
//!
//! The object tree is fixed: a plugin owning one device owning one input
//! stream. Property answers are typed values rather than raw byte blobs, but
//! the protocol itself is the host contract: existence, settability, reads
//! and writes must agree (a settable property always exists, a read of an
//! advertised property always succeeds).

use crate::error::PropertyError;
use crate::registry::TransportKind;

use super::{DEVICE_NAME, DEVICE_UID, MANUFACTURER, MODEL_UID, ZERO_TIMESTAMP_PERIOD_FRAMES};

/// The three objects the driver publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectId {
    /// The plugin itself.
    Plugin,
    /// The virtual input device.
    Device,
    /// The device's single input stream.
    InputStream,
}

/// Class of an object, as reported by the class properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassId {
    /// Root object class.
    Object,
    /// Plugin class.
    Plugin,
    /// Device class.
    Device,
    /// Stream class.
    Stream,
}

/// Scope qualifier on a property address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Applies to the whole object.
    Global,
    /// Input side.
    Input,
    /// Output side.
    Output,
}

/// Every property selector the driver answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    // Object-level.
    BaseClass,
    Class,
    Owner,
    Name,
    Manufacturer,
    ControlList,
    // Plugin.
    DeviceList,
    TranslateUidToDevice,
    ResourceBundle,
    // Device.
    DeviceUid,
    ModelUid,
    TransportType,
    RelatedDevices,
    ClockDomain,
    DeviceIsAlive,
    DeviceIsRunning,
    CanBeDefaultDevice,
    CanBeDefaultSystemDevice,
    Latency,
    SafetyOffset,
    Streams,
    NominalSampleRate,
    AvailableNominalSampleRates,
    ZeroTimestampPeriod,
    ClockIsStable,
    IsHidden,
    // Stream.
    IsActive,
    Direction,
    TerminalType,
    StartingChannel,
    VirtualFormat,
    PhysicalFormat,
    AvailableVirtualFormats,
    AvailablePhysicalFormats,
}

/// Stream format description.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamFormat {
    /// Frames per second.
    pub sample_rate: f64,
    /// Interleaved channels per frame.
    pub channels: u32,
    /// Bits per channel sample.
    pub bits_per_channel: u32,
}

impl StreamFormat {
    /// The one format the device supports: 48 kHz stereo 32-bit float.
    pub const fn canonical() -> Self {
        Self {
            sample_rate: 48_000.0,
            channels: 2,
            bits_per_channel: 32,
        }
    }

    /// Bytes per interleaved frame.
    pub fn bytes_per_frame(&self) -> u32 {
        self.channels * self.bits_per_channel / 8
    }
}

/// A stream format with its supported rate range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangedStreamFormat {
    /// The format.
    pub format: StreamFormat,
    /// Lowest supported rate.
    pub rate_minimum: f64,
    /// Highest supported rate.
    pub rate_maximum: f64,
}

/// Typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A class identifier.
    Class(ClassId),
    /// A single object reference.
    Object(ObjectId),
    /// A list of object references (possibly empty).
    Objects(Vec<ObjectId>),
    /// A string.
    Str(&'static str),
    /// An unsigned integer.
    U32(u32),
    /// A float, used for sample rates.
    F64(f64),
    /// A boolean flag.
    Bool(bool),
    /// A transport kind.
    Transport(TransportKind),
    /// A stream format.
    Format(StreamFormat),
    /// Supported formats with rate ranges.
    Formats(Vec<RangedStreamFormat>),
    /// A closed range of sample rates.
    RateRange {
        /// Lowest supported rate.
        minimum: f64,
        /// Highest supported rate.
        maximum: f64,
    },
}

/// Terminal type of the input stream (a microphone).
pub const TERMINAL_TYPE_MICROPHONE: u32 = 0x6D69_6372; // 'micr'

/// Stream direction value for input.
pub const DIRECTION_INPUT: u32 = 1;

/// Returns `true` if the object answers the selector.
pub fn has_property(object: ObjectId, selector: Selector) -> bool {
    use Selector::*;
    match object {
        ObjectId::Plugin => matches!(
            selector,
            BaseClass
                | Class
                | Owner
                | Manufacturer
                | DeviceList
                | TranslateUidToDevice
                | ResourceBundle
        ),
        ObjectId::Device => matches!(
            selector,
            BaseClass
                | Class
                | Owner
                | Name
                | Manufacturer
                | DeviceUid
                | ModelUid
                | TransportType
                | RelatedDevices
                | ClockDomain
                | DeviceIsAlive
                | DeviceIsRunning
                | CanBeDefaultDevice
                | CanBeDefaultSystemDevice
                | Latency
                | SafetyOffset
                | Streams
                | ControlList
                | NominalSampleRate
                | AvailableNominalSampleRates
                | ZeroTimestampPeriod
                | ClockIsStable
                | IsHidden
        ),
        ObjectId::InputStream => matches!(
            selector,
            BaseClass
                | Class
                | Owner
                | IsActive
                | Direction
                | TerminalType
                | StartingChannel
                | Latency
                | VirtualFormat
                | PhysicalFormat
                | AvailableVirtualFormats
                | AvailablePhysicalFormats
        ),
    }
}

/// Returns whether the property accepts writes.
///
/// Only the device's nominal sample rate and the stream formats are settable,
/// and each accepts exactly the canonical configuration.
pub fn is_settable(object: ObjectId, selector: Selector) -> Result<bool, PropertyError> {
    if !has_property(object, selector) {
        return Err(PropertyError::UnknownProperty { object, selector });
    }
    Ok(matches!(
        (object, selector),
        (ObjectId::Device, Selector::NominalSampleRate)
            | (ObjectId::InputStream, Selector::VirtualFormat)
            | (ObjectId::InputStream, Selector::PhysicalFormat)
    ))
}

/// Answers a property read.
///
/// `running` is the device's IO state, surfaced through `DeviceIsRunning`.
pub fn property(
    object: ObjectId,
    selector: Selector,
    scope: Scope,
    running: bool,
) -> Result<PropertyValue, PropertyError> {
    use PropertyValue as V;
    use Selector::*;

    let unknown = || PropertyError::UnknownProperty { object, selector };
    let canonical = StreamFormat::canonical();

    let value = match (object, selector) {
        (ObjectId::Plugin, BaseClass) => V::Class(ClassId::Object),
        (ObjectId::Plugin, Class) => V::Class(ClassId::Plugin),
        (ObjectId::Plugin, Owner) => V::Object(ObjectId::Plugin),
        (ObjectId::Plugin, Manufacturer) => V::Str(MANUFACTURER),
        (ObjectId::Plugin, DeviceList) => V::Objects(vec![ObjectId::Device]),
        (ObjectId::Plugin, ResourceBundle) => V::Str(""),
        // Needs a uid qualifier; answered by `translate_uid`.
        (ObjectId::Plugin, TranslateUidToDevice) => return Err(unknown()),

        (ObjectId::Device, BaseClass) => V::Class(ClassId::Object),
        (ObjectId::Device, Class) => V::Class(ClassId::Device),
        (ObjectId::Device, Owner) => V::Object(ObjectId::Plugin),
        (ObjectId::Device, Name) => V::Str(DEVICE_NAME),
        (ObjectId::Device, Manufacturer) => V::Str(MANUFACTURER),
        (ObjectId::Device, DeviceUid) => V::Str(DEVICE_UID),
        (ObjectId::Device, ModelUid) => V::Str(MODEL_UID),
        (ObjectId::Device, TransportType) => V::Transport(TransportKind::Virtual),
        (ObjectId::Device, RelatedDevices) => V::Objects(vec![ObjectId::Device]),
        (ObjectId::Device, ClockDomain) => V::U32(0),
        (ObjectId::Device, DeviceIsAlive) => V::Bool(true),
        (ObjectId::Device, DeviceIsRunning) => V::Bool(running),
        (ObjectId::Device, CanBeDefaultDevice) => {
            V::Bool(matches!(scope, Scope::Input | Scope::Global))
        }
        (ObjectId::Device, CanBeDefaultSystemDevice) => V::Bool(false),
        (ObjectId::Device, Latency) => V::U32(0),
        (ObjectId::Device, SafetyOffset) => V::U32(0),
        (ObjectId::Device, Streams) => match scope {
            Scope::Input | Scope::Global => V::Objects(vec![ObjectId::InputStream]),
            Scope::Output => V::Objects(Vec::new()),
        },
        (ObjectId::Device, ControlList) => V::Objects(Vec::new()),
        (ObjectId::Device, NominalSampleRate) => V::F64(canonical.sample_rate),
        (ObjectId::Device, AvailableNominalSampleRates) => V::RateRange {
            minimum: canonical.sample_rate,
            maximum: canonical.sample_rate,
        },
        (ObjectId::Device, ZeroTimestampPeriod) => V::U32(ZERO_TIMESTAMP_PERIOD_FRAMES),
        (ObjectId::Device, ClockIsStable) => V::Bool(true),
        (ObjectId::Device, IsHidden) => V::Bool(false),

        (ObjectId::InputStream, BaseClass) => V::Class(ClassId::Object),
        (ObjectId::InputStream, Class) => V::Class(ClassId::Stream),
        (ObjectId::InputStream, Owner) => V::Object(ObjectId::Device),
        (ObjectId::InputStream, IsActive) => V::Bool(true),
        (ObjectId::InputStream, Direction) => V::U32(DIRECTION_INPUT),
        (ObjectId::InputStream, TerminalType) => V::U32(TERMINAL_TYPE_MICROPHONE),
        (ObjectId::InputStream, StartingChannel) => V::U32(1),
        (ObjectId::InputStream, Latency) => V::U32(0),
        (ObjectId::InputStream, VirtualFormat) | (ObjectId::InputStream, PhysicalFormat) => {
            V::Format(canonical)
        }
        (ObjectId::InputStream, AvailableVirtualFormats)
        | (ObjectId::InputStream, AvailablePhysicalFormats) => {
            V::Formats(vec![RangedStreamFormat {
                format: canonical,
                rate_minimum: canonical.sample_rate,
                rate_maximum: canonical.sample_rate,
            }])
        }

        _ => return Err(unknown()),
    };
    Ok(value)
}

/// Answers a property write.
///
/// The device accepts its own nominal sample rate and the stream accepts its
/// own canonical format; anything else is rejected.
pub fn set_property(
    object: ObjectId,
    selector: Selector,
    value: &PropertyValue,
) -> Result<(), PropertyError> {
    let canonical = StreamFormat::canonical();
    match (object, selector) {
        (ObjectId::Device, Selector::NominalSampleRate) => match value {
            PropertyValue::F64(rate) if *rate == canonical.sample_rate => Ok(()),
            _ => Err(PropertyError::UnsupportedFormat { selector }),
        },
        (ObjectId::InputStream, Selector::VirtualFormat)
        | (ObjectId::InputStream, Selector::PhysicalFormat) => match value {
            PropertyValue::Format(format)
                if format.sample_rate == canonical.sample_rate
                    && format.channels == canonical.channels
                    && format.bits_per_channel == canonical.bits_per_channel =>
            {
                Ok(())
            }
            PropertyValue::Format(_) => Err(PropertyError::UnsupportedFormat { selector }),
            _ => Err(PropertyError::UnsupportedFormat { selector }),
        },
        _ => Err(PropertyError::UnknownProperty { object, selector }),
    }
}

/// Resolves a device uid to its object, the qualifier form of
/// `TranslateUidToDevice`. Unknown uids map to `None`.
pub fn translate_uid(uid: &str) -> Option<ObjectId> {
    (uid == DEVICE_UID).then_some(ObjectId::Device)
}
