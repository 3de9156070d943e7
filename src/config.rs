//! Compile-time sizing knobs, selected through Cargo features.
//!
//! Mirrors the `l2cap-*-size-*` feature ladder pattern: for every tunable, at most one
//! `-N` feature should be enabled, and the smallest listed value is the default.

macro_rules! config_usize {
    ($name:ident, $default:literal, [$($feature:literal => $value:literal),+ $(,)?]) => {
        #[cfg(not(any($(feature = $feature),+)))]
        pub const $name: usize = $default;

        $(
            #[cfg(feature = $feature)]
            pub const $name: usize = $value;
        )+
    };
}

config_usize!(GATT_CLIENT_NOTIFICATION_MAX_SUBSCRIBERS, 1, [
    "gatt-client-notification-max-subscribers-1" => 1,
    "gatt-client-notification-max-subscribers-2" => 2,
    "gatt-client-notification-max-subscribers-4" => 4,
    "gatt-client-notification-max-subscribers-8" => 8,
    "gatt-client-notification-max-subscribers-16" => 16,
    "gatt-client-notification-max-subscribers-32" => 32,
    "gatt-client-notification-max-subscribers-64" => 64,
    "gatt-client-notification-max-subscribers-128" => 128,
    "gatt-client-notification-max-subscribers-256" => 256,
    "gatt-client-notification-max-subscribers-512" => 512,
]);

config_usize!(GATT_CLIENT_NOTIFICATION_QUEUE_SIZE, 1, [
    "gatt-client-notification-queue-size-1" => 1,
    "gatt-client-notification-queue-size-2" => 2,
    "gatt-client-notification-queue-size-4" => 4,
    "gatt-client-notification-queue-size-8" => 8,
    "gatt-client-notification-queue-size-16" => 16,
    "gatt-client-notification-queue-size-32" => 32,
    "gatt-client-notification-queue-size-64" => 64,
    "gatt-client-notification-queue-size-128" => 128,
    "gatt-client-notification-queue-size-256" => 256,
    "gatt-client-notification-queue-size-512" => 512,
]);

config_usize!(GATT_CLIENT_PENDING_REQUESTS, 4, [
    "gatt-client-pending-requests-1" => 1,
    "gatt-client-pending-requests-2" => 2,
    "gatt-client-pending-requests-4" => 4,
    "gatt-client-pending-requests-8" => 8,
    "gatt-client-pending-requests-16" => 16,
    "gatt-client-pending-requests-32" => 32,
]);

/// ATT default MTU per Core Spec Vol 3 Part F, before any `ATT_MTU_REQ` exchange.
pub const ATT_DEFAULT_MTU: u16 = 23;

/// ATT's mandated per-request response timeout.
pub const ATT_RESPONSE_TIMEOUT_SECS: u64 = 30;
