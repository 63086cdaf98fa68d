//! Implementation of the Generic Attribute Profile (GATT).
//!
//! GATT layers *Services* and *Characteristics* on top of the Attribute Protocol: a service groups
//! a set of characteristics under a *Primary Service* declaration, and each characteristic is a
//! *Characteristic* declaration attribute immediately followed by its value attribute and, for
//! notifiable/indicatable characteristics, a *Client Characteristic Configuration* (CCCD)
//! descriptor.
//!
//! [`attribute_table`] builds a fixed table from these building blocks: Generic Access and Device
//! Information (both mandatory on a compliant peripheral), plus a Battery Service to exercise
//! notifications end to end.

pub mod characteristic;

use crate::{
    att::{
        access::{read_value, AccessArgs, AccessResult, AccessType},
        cccd::{self, CccdStore},
        notify_queue::{NotificationKind, NotificationQueue},
        AttHandle, AttUuid, AttributeTable, StaticAttribute,
    },
    gatt::characteristic::{char_decl_access, service_decl_access, BatteryLevel},
    uuid::Uuid16,
};

const PRIMARY_SERVICE: u16 = 0x2800;
const CHARACTERISTIC: u16 = 0x2803;
const CLIENT_CHAR_CONFIG: u16 = 0x2902;

const GENERIC_ACCESS_SERVICE: u16 = 0x1800;
const DEVICE_NAME: u16 = 0x2A00;
const APPEARANCE: u16 = 0x2A01;

const DEVICE_INFORMATION_SERVICE: u16 = 0x180A;
const MANUFACTURER_NAME: u16 = 0x2A29;
const MODEL_NUMBER: u16 = 0x2A24;
const FIRMWARE_REVISION: u16 = 0x2A26;

const BATTERY_SERVICE: u16 = 0x180F;
const BATTERY_LEVEL: u16 = 0x2A19;

const READ: u8 = characteristic::Properties::READ.bits();
const READ_NOTIFY: u8 = characteristic::Properties::READ.bits() | characteristic::Properties::NOTIFY.bits();

/// Handler state backing the attribute table [`attribute_table`] builds.
///
/// Holds everything an access function needs to read or mutate: the static strings and appearance
/// value exposed read-only, the battery level the application updates over time, and the single
/// CCCD slot for the Battery Level characteristic's notifications.
pub struct GattHandler {
    device_name: &'static str,
    appearance: u16,
    manufacturer: &'static str,
    model_number: &'static str,
    firmware_revision: &'static str,
    battery: BatteryLevel,
    cccd: CccdStore<{ cccd::bytes_for(1) }>,
    notifications: NotificationQueue<1>,
}

/// Index of the Battery Level characteristic's CCCD slot within [`GattHandler::cccd`].
const BATTERY_CCCD_INDEX: usize = 0;

/// Compile-time outgoing priority of every notifiable/indicatable characteristic, indexed the same
/// way as [`GattHandler::cccd`] and [`GattHandler::notifications`]. Battery Level is this table's
/// only notifiable characteristic, so its priority value is arbitrary.
const NOTIFICATION_PRIORITIES: [i8; 1] = [0];

fn device_name_access(h: &mut GattHandler, args: &mut AccessArgs<'_, '_>) -> AccessResult {
    match args.ty {
        AccessType::Read => read_value(h.device_name.as_bytes(), args.offset, &mut args.output),
        AccessType::CompareValue => compare(h.device_name.as_bytes(), args.input),
        _ => AccessResult::WriteNotPermitted,
    }
}

fn appearance_access(h: &mut GattHandler, args: &mut AccessArgs<'_, '_>) -> AccessResult {
    let bytes = h.appearance.to_le_bytes();
    match args.ty {
        AccessType::Read => read_value(&bytes, args.offset, &mut args.output),
        AccessType::CompareValue => compare(&bytes, args.input),
        _ => AccessResult::WriteNotPermitted,
    }
}

/// Read accessor for one of the three Device Information strings, selected by `I`.
fn info_string_access<const I: usize>(h: &mut GattHandler, args: &mut AccessArgs<'_, '_>) -> AccessResult {
    let value = match I {
        0 => h.manufacturer,
        1 => h.model_number,
        _ => h.firmware_revision,
    }
    .as_bytes();
    match args.ty {
        AccessType::Read => read_value(value, args.offset, &mut args.output),
        AccessType::CompareValue => compare(value, args.input),
        _ => AccessResult::WriteNotPermitted,
    }
}

fn battery_level_access(h: &mut GattHandler, args: &mut AccessArgs<'_, '_>) -> AccessResult {
    let byte = [h.battery.percentage()];
    match args.ty {
        AccessType::Read => read_value(&byte, args.offset, &mut args.output),
        AccessType::CompareValue => compare(&byte, args.input),
        _ => AccessResult::WriteNotPermitted,
    }
}

/// Read/write accessor for a 2-bit-per-characteristic CCCD slot, selected by `I`.
///
/// The wire value is the usual 16-bit bitfield (bit 0 notifications, bit 1 indications); storage
/// is the packed 2-bit form `CccdStore` uses internally.
fn cccd_access<const I: usize>(h: &mut GattHandler, args: &mut AccessArgs<'_, '_>) -> AccessResult {
    match args.ty {
        AccessType::Read => {
            let flags = h.cccd.flags(I);
            let mut bits = 0u16;
            if flags & cccd::NOTIFY != 0 {
                bits |= 0x0001;
            }
            if flags & cccd::INDICATE != 0 {
                bits |= 0x0002;
            }
            read_value(&bits.to_le_bytes(), args.offset, &mut args.output)
        }
        AccessType::Write | AccessType::PrepareWrite => {
            if args.input.len() != 2 {
                return AccessResult::InvalidAttributeValueLength;
            }
            let bits = u16::from_le_bytes([args.input[0], args.input[1]]);
            if args.ty == AccessType::Write {
                let mut flags = 0;
                if bits & 0x0001 != 0 {
                    flags |= cccd::NOTIFY;
                }
                if bits & 0x0002 != 0 {
                    flags |= cccd::INDICATE;
                }
                h.cccd.set_flags(I, flags);
            }
            AccessResult::Success
        }
        AccessType::CompareValue => AccessResult::RequestNotSupported,
    }
}

fn compare(value: &[u8], input: &[u8]) -> AccessResult {
    if value == input {
        AccessResult::ValueEqual
    } else {
        AccessResult::ValueNotEqual
    }
}

macro_rules! handle {
    ($h:expr) => {
        AttHandle::from_raw($h)
    };
}

#[rustfmt::skip]
static ATTRS: &[StaticAttribute<GattHandler>] = &[
    // --- Generic Access ----------------------------------------------------------------------
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(PRIMARY_SERVICE)), handle: handle!(0x0001),
        access: service_decl_access::<GattHandler, GENERIC_ACCESS_SERVICE> },
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(CHARACTERISTIC)), handle: handle!(0x0002),
        access: char_decl_access::<GattHandler, READ, 0x0003, DEVICE_NAME> },
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(DEVICE_NAME)), handle: handle!(0x0003),
        access: device_name_access },
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(CHARACTERISTIC)), handle: handle!(0x0004),
        access: char_decl_access::<GattHandler, READ, 0x0005, APPEARANCE> },
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(APPEARANCE)), handle: handle!(0x0005),
        access: appearance_access },

    // --- Device Information --------------------------------------------------------------------
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(PRIMARY_SERVICE)), handle: handle!(0x0006),
        access: service_decl_access::<GattHandler, DEVICE_INFORMATION_SERVICE> },
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(CHARACTERISTIC)), handle: handle!(0x0007),
        access: char_decl_access::<GattHandler, READ, 0x0008, MANUFACTURER_NAME> },
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(MANUFACTURER_NAME)), handle: handle!(0x0008),
        access: info_string_access::<0> },
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(CHARACTERISTIC)), handle: handle!(0x0009),
        access: char_decl_access::<GattHandler, READ, 0x000A, MODEL_NUMBER> },
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(MODEL_NUMBER)), handle: handle!(0x000A),
        access: info_string_access::<1> },
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(CHARACTERISTIC)), handle: handle!(0x000B),
        access: char_decl_access::<GattHandler, READ, 0x000C, FIRMWARE_REVISION> },
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(FIRMWARE_REVISION)), handle: handle!(0x000C),
        access: info_string_access::<2> },

    // --- Battery Service -----------------------------------------------------------------------
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(PRIMARY_SERVICE)), handle: handle!(0x000D),
        access: service_decl_access::<GattHandler, BATTERY_SERVICE> },
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(CHARACTERISTIC)), handle: handle!(0x000E),
        access: char_decl_access::<GattHandler, READ_NOTIFY, 0x000F, BATTERY_LEVEL> },
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(BATTERY_LEVEL)), handle: handle!(0x000F),
        access: battery_level_access },
    StaticAttribute { att_type: AttUuid::Uuid16(Uuid16(CLIENT_CHAR_CONFIG)), handle: handle!(0x0010),
        access: cccd_access::<BATTERY_CCCD_INDEX> },
];

/// Handle of the Battery Level value attribute, for sending notifications once
/// [`GattHandler::notifications_enabled`] reports the client has subscribed.
pub const BATTERY_LEVEL_HANDLE: AttHandle = handle!(0x000F);

impl GattHandler {
    /// Updates the battery level reported by the Battery Level characteristic.
    ///
    /// If the client has subscribed to notifications, queues one; otherwise this is a no-op beyond
    /// updating the stored value, per the notification queue's "queuing while disabled" invariant.
    /// Call [`Self::poll_notification`] from the foreground loop to drain the queue.
    pub fn set_battery_level(&mut self, percentage: u8) {
        self.battery.set_percentage(percentage);
        if self.notifications_enabled() {
            self.notifications.queue(BATTERY_CCCD_INDEX, NotificationKind::Notify);
        }
    }

    /// Returns whether the client has enabled notifications for the Battery Level characteristic.
    pub fn notifications_enabled(&self) -> bool {
        self.cccd.notifications_enabled(BATTERY_CCCD_INDEX)
    }

    /// Returns the next characteristic value handle, notification kind and current value byte
    /// ready to be sent, if any, removing it from the queue.
    ///
    /// [`crate::link::Responder::poll_notifications`] calls this once per foreground iteration with
    /// free TX space and forwards the result to
    /// [`crate::att::AttributeServerTx::notify_raw`]/`indicate_raw`.
    pub fn poll_notification(&mut self) -> Option<(AttHandle, NotificationKind, u8)> {
        let cccd = &self.cccd;
        let (index, kind) = self.notifications.pop_next_ready(&NOTIFICATION_PRIORITIES, |i, kind| {
            match kind {
                NotificationKind::Notify => cccd.notifications_enabled(i),
                NotificationKind::Indicate => cccd.indications_enabled(i),
            }
        })?;
        debug_assert_eq!(index, BATTERY_CCCD_INDEX);
        Some((BATTERY_LEVEL_HANDLE, kind, self.battery.percentage()))
    }

    /// Marks a previously popped indication as confirmed by the peer, allowing the next queued
    /// indication (if any) to be sent.
    ///
    /// [`crate::link::Responder::poll_notifications`] calls this whenever
    /// [`crate::att::AttributeServer::take_confirmed_indication`] reports a `HandleValueConfirmation`
    /// arrived since the last check.
    pub fn confirm_indication(&mut self) {
        self.notifications.confirm_indication();
    }

    /// Drops all queued notifications/indications. Called on disconnect.
    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
    }

    /// Returns the packed CCCD byte representation, for persisting across reconnections.
    pub fn cccd_bytes(&self) -> &[u8] {
        self.cccd.as_bytes()
    }

    /// Restores CCCD state previously obtained from [`Self::cccd_bytes`].
    pub fn restore_cccd(&mut self, bytes: &[u8]) -> Result<(), crate::Error> {
        self.cccd.restore(bytes)
    }
}

/// Builds the attribute table for a GATT server exposing Generic Access, Device Information and a
/// notifiable Battery Service.
///
/// The returned table already implements [`crate::att::AttributeProvider`] and can be passed
/// directly to [`crate::att::AttributeServer::new`].
pub fn attribute_table(device_name: &'static str) -> AttributeTable<'static, GattHandler> {
    let handler = GattHandler {
        device_name,
        appearance: characteristic::Appearance::Unknown as u16,
        manufacturer: "Unknown",
        model_number: "Unknown",
        firmware_revision: env!("CARGO_PKG_VERSION"),
        battery: BatteryLevel::new(100),
        cccd: CccdStore::new(1),
        notifications: NotificationQueue::new(),
    };
    AttributeTable::new(ATTRS, handler)
}
